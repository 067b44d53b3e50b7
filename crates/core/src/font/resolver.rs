//! Font selection and document-wide resource registration.
//!
//! Picks the face translated text is shown with: a caller-specified font
//! wins when it passes a coverage probe, otherwise a language-keyed
//! default (a CJK family for Chinese/Japanese/Korean, a broad-coverage
//! fallback for everything else), otherwise the built-in non-embedded
//! family. The winner is then registered under one resource key on every
//! page and on every object carrying a `Font` dictionary, so pages
//! sharing a resource dictionary are neither missed nor duplicated.

use std::path::PathBuf;

use lopdf::{Dictionary, Document, Object, ObjectId, dictionary};
use tracing::{debug, warn};

use crate::error::{Result, TranslateError};
use crate::font::embed::{EmbeddedFont, TRANSLATION_FONT_KEY};
use crate::font::truetype::TrueTypeFace;

/// Reference text the coverage probe renders against a candidate face.
const PROBE_TEXT: &str = "The quick brown fox 0123456789";

/// Resolves a language/script tag or explicit identifier to font bytes.
/// Bundling, caching, and downloading are the provider's business.
pub trait FontSource: Send + Sync {
    fn load(&self, lang: &str, explicit: Option<&str>) -> Result<Vec<u8>>;
}

/// Loads fonts from a directory, mapping languages to bundled filenames.
#[derive(Debug, Clone)]
pub struct DirFontSource {
    dir: PathBuf,
}

impl DirFontSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirFontSource { dir: dir.into() }
    }

    /// Default font filename for a target language.
    pub fn filename_for_lang(lang: &str) -> &'static str {
        let lang = lang.to_ascii_lowercase();
        match lang.as_str() {
            "zh" | "zh-cn" | "zh-hans" => "SourceHanSerifCN-Regular.ttf",
            "zh-tw" | "zh-hant" | "zh-hk" => "SourceHanSerifTW-Regular.ttf",
            "ja" => "SourceHanSerifJP-Regular.ttf",
            "ko" => "SourceHanSerifKR-Regular.ttf",
            _ => "GoNotoKurrent-Regular.ttf",
        }
    }
}

impl FontSource for DirFontSource {
    fn load(&self, lang: &str, explicit: Option<&str>) -> Result<Vec<u8>> {
        let path = match explicit {
            Some(name) => {
                let p = PathBuf::from(name);
                if p.is_absolute() { p } else { self.dir.join(p) }
            }
            None => self.dir.join(Self::filename_for_lang(lang)),
        };
        std::fs::read(&path).map_err(|e| {
            TranslateError::FontEmbed(format!("cannot read font {}: {e}", path.display()))
        })
    }
}

/// A source with no fonts at all; resolution falls through to the
/// built-in family.
#[derive(Debug, Default)]
pub struct NoFontSource;

impl FontSource for NoFontSource {
    fn load(&self, _lang: &str, _explicit: Option<&str>) -> Result<Vec<u8>> {
        Err(TranslateError::FontEmbed("no font source configured".into()))
    }
}

/// True when the face covers the probe text.
fn passes_probe(face: &TrueTypeFace) -> bool {
    PROBE_TEXT
        .chars()
        .filter(|c| !c.is_whitespace())
        .all(|c| face.has_glyph(c))
}

/// Runs the fallback chain and registers the winning font on the
/// document. Never fatal: the built-in family is the floor.
pub fn resolve_font(
    doc: &mut Document,
    pages: &[ObjectId],
    source: &dyn FontSource,
    target_lang: &str,
    explicit: Option<&str>,
) -> EmbeddedFont {
    let face = candidate_face(source, target_lang, explicit);
    let font = match face {
        Some(face) => match EmbeddedFont::embed(doc, face) {
            Ok(font) => font,
            Err(e) => {
                warn!(error = %e, "font embedding failed, using built-in family");
                EmbeddedFont::builtin(doc)
            }
        },
        None => EmbeddedFont::builtin(doc),
    };
    register_everywhere(doc, pages, font.font_id());
    font
}

fn candidate_face(
    source: &dyn FontSource,
    target_lang: &str,
    explicit: Option<&str>,
) -> Option<TrueTypeFace> {
    if explicit.is_some() {
        match source.load(target_lang, explicit).and_then(TrueTypeFace::parse) {
            Ok(face) if passes_probe(&face) => return Some(face),
            Ok(_) => warn!("override font fails coverage probe, using language default"),
            Err(e) => warn!(error = %e, "override font unusable, using language default"),
        }
    }
    match source.load(target_lang, None).and_then(TrueTypeFace::parse) {
        Ok(face) => Some(face),
        Err(e) => {
            warn!(error = %e, "no embeddable font for language, using built-in family");
            None
        }
    }
}

/// Registers `font_id` under the translation key on every page's
/// resource dictionary and on every object whose dictionary carries a
/// `Font` entry, directly or inside an inline `Resources` dictionary.
/// Form XObjects keep their resources on the stream dictionary, so
/// stream objects are walked too.
fn register_everywhere(doc: &mut Document, pages: &[ObjectId], font_id: ObjectId) {
    for &page_id in pages {
        ensure_page_font(doc, page_id, font_id);
    }

    // Shared resource dictionaries live as their own indirect objects;
    // walk the whole object table so none are missed.
    let mut targets: Vec<ObjectId> = Vec::new();
    let mut direct: Vec<ObjectId> = Vec::new();
    let mut nested: Vec<ObjectId> = Vec::new();
    for (&id, obj) in doc.objects.iter() {
        let dict = match obj {
            Object::Dictionary(dict) => dict,
            Object::Stream(stream) => &stream.dict,
            _ => continue,
        };
        match dict.get(b"Font") {
            Ok(Object::Reference(font_dict_id)) => targets.push(*font_dict_id),
            Ok(Object::Dictionary(_)) => direct.push(id),
            _ => {}
        }
        if let Ok(Object::Dictionary(res)) = dict.get(b"Resources") {
            match res.get(b"Font") {
                Ok(Object::Reference(font_dict_id)) => targets.push(*font_dict_id),
                Ok(Object::Dictionary(_)) => nested.push(id),
                _ => {}
            }
        }
    }
    for id in targets {
        if let Ok(Object::Dictionary(font_dict)) = doc.get_object_mut(id) {
            set_translation_key(font_dict, font_id);
        }
    }
    for id in direct {
        if let Some(dict) = object_dict_mut(doc, id) {
            if let Ok(Object::Dictionary(font_dict)) = dict.get_mut(b"Font") {
                set_translation_key(font_dict, font_id);
            }
        }
    }
    for id in nested {
        if let Some(dict) = object_dict_mut(doc, id) {
            if let Ok(Object::Dictionary(res)) = dict.get_mut(b"Resources") {
                if let Ok(Object::Dictionary(font_dict)) = res.get_mut(b"Font") {
                    set_translation_key(font_dict, font_id);
                }
            }
        }
    }
}

fn object_dict_mut(doc: &mut Document, id: ObjectId) -> Option<&mut Dictionary> {
    match doc.get_object_mut(id).ok()? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&mut stream.dict),
        _ => None,
    }
}

fn set_translation_key(font_dict: &mut Dictionary, font_id: ObjectId) {
    if !font_dict.has(TRANSLATION_FONT_KEY) {
        font_dict.set(TRANSLATION_FONT_KEY, Object::Reference(font_id));
    }
}

fn ensure_page_font(doc: &mut Document, page_id: ObjectId, font_id: ObjectId) {
    // The Resources entry may be direct, a reference, or inherited.
    let resources = match doc.get_object(page_id) {
        Ok(Object::Dictionary(page)) => page.get(b"Resources").ok().cloned(),
        _ => return,
    };
    match resources {
        Some(Object::Reference(res_id)) => {
            if let Ok(Object::Dictionary(res)) = doc.get_object_mut(res_id) {
                set_font_entry(res, font_id);
            }
        }
        Some(Object::Dictionary(_)) => {
            if let Ok(Object::Dictionary(page)) = doc.get_object_mut(page_id) {
                if let Ok(Object::Dictionary(res)) = page.get_mut(b"Resources") {
                    set_font_entry(res, font_id);
                }
            }
        }
        _ => {
            debug!(?page_id, "page has no direct resources, adding one");
            if let Ok(Object::Dictionary(page)) = doc.get_object_mut(page_id) {
                page.set(
                    "Resources",
                    dictionary! {
                        "Font" => dictionary! {},
                    },
                );
                if let Ok(Object::Dictionary(res)) = page.get_mut(b"Resources") {
                    set_font_entry(res, font_id);
                }
            }
        }
    }
}

fn set_font_entry(resources: &mut Dictionary, font_id: ObjectId) {
    match resources.get_mut(b"Font") {
        Ok(Object::Dictionary(fonts)) => {
            if !fonts.has(TRANSLATION_FONT_KEY) {
                fonts.set(TRANSLATION_FONT_KEY, Object::Reference(font_id));
            }
        }
        Ok(Object::Reference(_)) => {
            // Handled by the document-wide font dictionary walk.
        }
        _ => {
            resources.set(
                b"Font",
                dictionary! { TRANSLATION_FONT_KEY => Object::Reference(font_id) },
            );
        }
    }
}
