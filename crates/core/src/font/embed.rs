//! Registration of the translation font inside the output document.
//!
//! Embedded TrueType faces become a Type0 font with a CIDFontType2
//! descendant: FontDescriptor + FontFile2 for the face bytes, a
//! CIDToGIDMap stream mapping CIDs to glyph ids, Identity-H encoding, and
//! a ToUnicode CMap so extracted text stays searchable. CIDs are UTF-16
//! code units, so show strings are the UTF-16BE encoding of the text.
//! When no face can be embedded the engine falls back to a built-in,
//! non-embedded Type1 Helvetica.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Mutex;

use lopdf::{Document, Object, ObjectId, Stream, StringFormat, dictionary};
use rustc_hash::FxHashSet;
use tracing::warn;

use crate::error::Result;
use crate::font::truetype::TrueTypeFace;

/// Resource key under which the translation font is registered on every
/// font dictionary in the document.
pub const TRANSLATION_FONT_KEY: &[u8] = b"RstF1";

/// The font all translated text is shown with.
pub struct EmbeddedFont {
    key: Vec<u8>,
    font_id: ObjectId,
    inner: FontInner,
}

enum FontInner {
    Embedded {
        face: TrueTypeFace,
        file_id: ObjectId,
        descendant_id: ObjectId,
        tounicode_id: ObjectId,
        /// UTF-16 code units actually shown; drives the W array, the
        /// ToUnicode CMap, and subsetting.
        used: Mutex<BTreeSet<u16>>,
    },
    Builtin,
}

impl EmbeddedFont {
    /// Registers a parsed TrueType face in the document and returns the
    /// handle the rewrite pass encodes text through.
    pub fn embed(doc: &mut Document, face: TrueTypeFace) -> Result<EmbeddedFont> {
        let base_name = format!("RST+{}", face.postscript_name);
        let scale = 1000.0 / face.units_per_em as f64;

        let file_id = doc.add_object(Stream::new(
            dictionary! { "Length1" => face.bytes().len() as i64 },
            face.bytes().to_vec(),
        ));

        let (x_min, y_min, x_max, y_max) = face.bbox;
        let descriptor_id = doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => Object::Name(base_name.as_bytes().to_vec()),
            "Flags" => 4,
            "FontBBox" => vec![
                ((x_min as f64 * scale) as i64).into(),
                ((y_min as f64 * scale) as i64).into(),
                ((x_max as f64 * scale) as i64).into(),
                ((y_max as f64 * scale) as i64).into(),
            ],
            "ItalicAngle" => 0,
            "Ascent" => (face.ascender as f64 * scale) as i64,
            "Descent" => (face.descender as f64 * scale) as i64,
            "CapHeight" => (face.ascender as f64 * scale) as i64,
            "StemV" => 80,
            "FontFile2" => Object::Reference(file_id),
        });

        let cid2gid_id = doc.add_object(Stream::new(
            dictionary! {},
            build_cid_to_gid_map(&face),
        ));

        let descendant_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => Object::Name(base_name.as_bytes().to_vec()),
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::String(b"Adobe".to_vec(), StringFormat::Literal),
                "Ordering" => Object::String(b"Identity".to_vec(), StringFormat::Literal),
                "Supplement" => 0,
            },
            "FontDescriptor" => Object::Reference(descriptor_id),
            "DW" => 1000,
            "W" => Object::Array(vec![]),
            "CIDToGIDMap" => Object::Reference(cid2gid_id),
        });

        let tounicode_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => Object::Name(base_name.as_bytes().to_vec()),
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![Object::Reference(descendant_id)],
            "ToUnicode" => Object::Reference(tounicode_id),
        });

        Ok(EmbeddedFont {
            key: TRANSLATION_FONT_KEY.to_vec(),
            font_id,
            inner: FontInner::Embedded {
                face,
                file_id,
                descendant_id,
                tounicode_id,
                used: Mutex::new(BTreeSet::new()),
            },
        })
    }

    /// Registers the built-in non-embedded fallback family.
    pub fn builtin(doc: &mut Document) -> EmbeddedFont {
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        EmbeddedFont {
            key: TRANSLATION_FONT_KEY.to_vec(),
            font_id,
            inner: FontInner::Builtin,
        }
    }

    /// The resource name translated show operators select with `Tf`.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn font_id(&self) -> ObjectId {
        self.font_id
    }

    /// Encodes text as a show-string operand, recording glyph usage.
    /// Characters the face does not cover are replaced with `?`.
    pub fn encode(&self, text: &str) -> Object {
        match &self.inner {
            FontInner::Embedded { face, used, .. } => {
                let mut units = Vec::with_capacity(text.len() * 2);
                let mut seen = used.lock().expect("font usage lock poisoned");
                for ch in text.chars() {
                    let unit = match u16::try_from(ch as u32) {
                        Ok(u) if face.has_glyph(ch) => u,
                        _ => b'?' as u16,
                    };
                    seen.insert(unit);
                    units.extend_from_slice(&unit.to_be_bytes());
                }
                Object::String(units, StringFormat::Hexadecimal)
            }
            FontInner::Builtin => {
                let bytes = text
                    .chars()
                    .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
                    .collect();
                Object::String(bytes, StringFormat::Literal)
            }
        }
    }

    /// Patches the usage-dependent parts of the font after all pages are
    /// rewritten: the W array, the ToUnicode CMap, and (unless skipped)
    /// the subsetted FontFile2. Subsetting failure keeps the full face.
    pub fn finalize(&self, doc: &mut Document, skip_subset: bool) -> Result<()> {
        let FontInner::Embedded {
            face,
            file_id,
            descendant_id,
            tounicode_id,
            used,
        } = &self.inner
        else {
            return Ok(());
        };
        let used = used.lock().expect("font usage lock poisoned").clone();

        let mut widths = Vec::with_capacity(used.len() * 2);
        for &unit in &used {
            let gid = char::from_u32(unit as u32)
                .and_then(|c| face.glyph_id(c))
                .unwrap_or(0);
            widths.push(Object::Integer(unit as i64));
            widths.push(Object::Array(vec![Object::Integer(face.advance_1000(gid))]));
        }
        if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(*descendant_id) {
            dict.set("W", Object::Array(widths));
        }

        if let Ok(Object::Stream(stream)) = doc.get_object_mut(*tounicode_id) {
            stream.set_content(build_tounicode_cmap(&used).into_bytes());
        }

        if !skip_subset {
            let gids: FxHashSet<u16> = used
                .iter()
                .filter_map(|&u| char::from_u32(u as u32))
                .filter_map(|c| face.glyph_id(c))
                .collect();
            match face.subset(&gids) {
                Ok(bytes) => {
                    if let Ok(Object::Stream(stream)) = doc.get_object_mut(*file_id) {
                        stream.dict.set("Length1", bytes.len() as i64);
                        stream.set_content(bytes);
                    }
                }
                Err(e) => warn!(error = %e, "font subsetting failed, keeping full face"),
            }
        }
        Ok(())
    }
}

/// Full BMP CID-to-glyph map, two big-endian bytes per CID.
fn build_cid_to_gid_map(face: &TrueTypeFace) -> Vec<u8> {
    let mut map = vec![0u8; 0x10000 * 2];
    for code in 0u32..0x10000 {
        let Some(ch) = char::from_u32(code) else {
            continue;
        };
        if let Some(gid) = face.glyph_id(ch) {
            let i = code as usize * 2;
            map[i..i + 2].copy_from_slice(&gid.to_be_bytes());
        }
    }
    map
}

/// ToUnicode CMap for the Identity-H encoding: each used CID maps to the
/// same UTF-16 code unit.
fn build_tounicode_cmap(used: &BTreeSet<u16>) -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n\
         <0000> <FFFF>\n\
         endcodespacerange\n",
    );
    for chunk in used.iter().collect::<Vec<_>>().chunks(100) {
        let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
        for &&unit in chunk {
            let _ = writeln!(cmap, "<{unit:04X}> <{unit:04X}>");
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str(
        "endcmap\n\
         CMapName currentdict /CMap defineresource pop\n\
         end\n\
         end\n",
    );
    cmap
}
