//! Decoding of show-string bytes for fonts already present in the input
//! document.
//!
//! The rewrite pass needs two things from the original font: the Unicode
//! text behind a glyph run (for translation) and per-code advance widths
//! (to track the text matrix between shows). A ToUnicode CMap is used
//! when present; otherwise simple fonts fall back to Latin-1 and CID
//! fonts to treating the code as a UTF-16 unit.

use lopdf::{Dictionary, Document, Object};
use rustc_hash::FxHashMap;

use crate::document::resolve;

/// One code pulled out of a show string.
#[derive(Debug, Clone, Copy)]
pub struct CharCode {
    pub cid: u32,
    /// True for the single-byte code 32, which word spacing applies to.
    pub is_space: bool,
}

/// Decoder for one font resource, built once per `Tf` target and cached
/// for the execution context.
pub struct SpanDecoder {
    two_byte: bool,
    to_unicode: Option<FxHashMap<u32, String>>,
    widths: Widths,
}

enum Widths {
    Simple { first_char: i64, widths: Vec<f64> },
    Cid { map: FxHashMap<u32, f64>, default: f64 },
}

impl SpanDecoder {
    /// A decoder for an unresolvable font: Latin-1 text, 500-unit glyphs.
    pub fn fallback() -> SpanDecoder {
        SpanDecoder {
            two_byte: false,
            to_unicode: None,
            widths: Widths::Simple {
                first_char: 0,
                widths: Vec::new(),
            },
        }
    }

    pub fn from_font(doc: &Document, font: &Dictionary) -> SpanDecoder {
        let subtype = match font.get(b"Subtype") {
            Ok(Object::Name(name)) => name.clone(),
            _ => Vec::new(),
        };
        let two_byte = subtype.as_slice() == b"Type0";

        let to_unicode = font
            .get(b"ToUnicode")
            .ok()
            .map(|obj| resolve(doc, obj))
            .and_then(|obj| match obj {
                Object::Stream(s) => s.decompressed_content().ok(),
                _ => None,
            })
            .map(|bytes| parse_tounicode(&bytes));

        let widths = if two_byte {
            cid_widths(doc, font)
        } else {
            simple_widths(doc, font)
        };

        SpanDecoder {
            two_byte,
            to_unicode,
            widths,
        }
    }

    /// Splits show-string bytes into character codes.
    pub fn codes(&self, bytes: &[u8]) -> Vec<CharCode> {
        if self.two_byte {
            bytes
                .chunks(2)
                .map(|c| {
                    let cid = if c.len() == 2 {
                        u16::from_be_bytes([c[0], c[1]]) as u32
                    } else {
                        c[0] as u32
                    };
                    CharCode {
                        cid,
                        is_space: false,
                    }
                })
                .collect()
        } else {
            bytes
                .iter()
                .map(|&b| CharCode {
                    cid: b as u32,
                    is_space: b == 32,
                })
                .collect()
        }
    }

    /// Decodes show-string bytes to Unicode text.
    pub fn decode(&self, bytes: &[u8]) -> String {
        let mut out = String::new();
        for code in self.codes(bytes) {
            if let Some(map) = &self.to_unicode {
                if let Some(s) = map.get(&code.cid) {
                    out.push_str(s);
                    continue;
                }
            }
            if self.two_byte {
                // Identity-style CID: treat the code as a UTF-16 unit.
                if let Some(c) = char::from_u32(code.cid) {
                    out.push(c);
                }
            } else if let Some(c) = char::from_u32(code.cid) {
                // Latin-1 heuristic for unmapped simple fonts.
                out.push(c);
            }
        }
        out
    }

    /// Glyph width in thousandths of the font size.
    pub fn width(&self, cid: u32) -> f64 {
        match &self.widths {
            Widths::Simple { first_char, widths } => {
                let idx = cid as i64 - first_char;
                if idx >= 0 {
                    widths.get(idx as usize).copied().unwrap_or(500.0)
                } else {
                    500.0
                }
            }
            Widths::Cid { map, default } => map.get(&cid).copied().unwrap_or(*default),
        }
    }
}

fn number(obj: &Object) -> Option<f64> {
    match *obj {
        Object::Integer(i) => Some(i as f64),
        Object::Real(r) => Some(r as f64),
        _ => None,
    }
}

fn simple_widths(doc: &Document, font: &Dictionary) -> Widths {
    let first_char = font
        .get(b"FirstChar")
        .ok()
        .and_then(|o| match resolve(doc, o) {
            Object::Integer(i) => Some(*i),
            _ => None,
        })
        .unwrap_or(0);
    let widths = font
        .get(b"Widths")
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| match o {
            Object::Array(items) => Some(
                items
                    .iter()
                    .map(|w| number(resolve(doc, w)).unwrap_or(500.0))
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default();
    Widths::Simple { first_char, widths }
}

fn cid_widths(doc: &Document, font: &Dictionary) -> Widths {
    let mut map = FxHashMap::default();
    let mut default = 1000.0;
    let descendant = font
        .get(b"DescendantFonts")
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| match o {
            Object::Array(items) => items.first(),
            _ => None,
        })
        .map(|o| resolve(doc, o))
        .and_then(|o| match o {
            Object::Dictionary(d) => Some(d),
            _ => None,
        });
    let Some(desc) = descendant else {
        return Widths::Cid { map, default };
    };
    if let Some(dw) = desc.get(b"DW").ok().and_then(|o| number(resolve(doc, o))) {
        default = dw;
    }
    if let Ok(w) = desc.get(b"W") {
        if let Object::Array(items) = resolve(doc, w) {
            // W entries: `c [w1 w2 ...]` or `c_first c_last w`.
            let mut i = 0;
            while i < items.len() {
                let Some(start) = number(resolve(doc, &items[i])) else {
                    break;
                };
                match items.get(i + 1).map(|o| resolve(doc, o)) {
                    Some(Object::Array(ws)) => {
                        for (k, w) in ws.iter().enumerate() {
                            if let Some(w) = number(resolve(doc, w)) {
                                map.insert(start as u32 + k as u32, w);
                            }
                        }
                        i += 2;
                    }
                    Some(_) => {
                        let end = number(resolve(doc, &items[i + 1])).unwrap_or(start);
                        let Some(w) = items.get(i + 2).and_then(|o| number(resolve(doc, o)))
                        else {
                            break;
                        };
                        for cid in start as u32..=end as u32 {
                            map.insert(cid, w);
                        }
                        i += 3;
                    }
                    None => break,
                }
            }
        }
    }
    Widths::Cid { map, default }
}

/// Parses bfchar/bfrange mappings out of a ToUnicode CMap stream.
fn parse_tounicode(bytes: &[u8]) -> FxHashMap<u32, String> {
    let mut map = FxHashMap::default();
    let tokens = tokenize_cmap(bytes);
    let mut i = 0;
    while i < tokens.len() {
        match &tokens[i] {
            CmapToken::Keyword(k) if k == "beginbfchar" => {
                i += 1;
                while i + 1 < tokens.len() {
                    let (CmapToken::Hex(src), CmapToken::Hex(dst)) = (&tokens[i], &tokens[i + 1])
                    else {
                        break;
                    };
                    if let (Some(code), Some(text)) = (hex_code(src), hex_text(dst)) {
                        map.insert(code, text);
                    }
                    i += 2;
                }
            }
            CmapToken::Keyword(k) if k == "beginbfrange" => {
                i += 1;
                while i + 2 < tokens.len() {
                    let (CmapToken::Hex(lo), CmapToken::Hex(hi)) = (&tokens[i], &tokens[i + 1])
                    else {
                        break;
                    };
                    let (Some(lo), Some(hi)) = (hex_code(lo), hex_code(hi)) else {
                        break;
                    };
                    match &tokens[i + 2] {
                        CmapToken::Hex(dst) => {
                            if let Some(base) = hex_code(dst) {
                                for (k, code) in (lo..=hi).enumerate() {
                                    if let Some(c) = char::from_u32(base + k as u32) {
                                        map.insert(code, c.to_string());
                                    }
                                }
                            }
                            i += 3;
                        }
                        CmapToken::ArrayStart => {
                            let mut j = i + 3;
                            let mut code = lo;
                            while j < tokens.len() {
                                match &tokens[j] {
                                    CmapToken::Hex(dst) => {
                                        if let Some(text) = hex_text(dst) {
                                            map.insert(code, text);
                                        }
                                        code += 1;
                                        j += 1;
                                    }
                                    _ => break,
                                }
                            }
                            i = j + 1;
                        }
                        _ => break,
                    }
                }
            }
            _ => i += 1,
        }
    }
    map
}

enum CmapToken {
    Hex(Vec<u8>),
    Keyword(String),
    ArrayStart,
    ArrayEnd,
}

fn tokenize_cmap(bytes: &[u8]) -> Vec<CmapToken> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'<' => {
                let mut hex = Vec::new();
                i += 1;
                while i < bytes.len() && bytes[i] != b'>' {
                    if bytes[i].is_ascii_hexdigit() {
                        hex.push(bytes[i]);
                    }
                    i += 1;
                }
                i += 1;
                let mut out = Vec::with_capacity(hex.len() / 2);
                for pair in hex.chunks_exact(2) {
                    let s = std::str::from_utf8(pair).unwrap_or("00");
                    out.push(u8::from_str_radix(s, 16).unwrap_or(0));
                }
                tokens.push(CmapToken::Hex(out));
            }
            b'[' => {
                tokens.push(CmapToken::ArrayStart);
                i += 1;
            }
            b']' => {
                tokens.push(CmapToken::ArrayEnd);
                i += 1;
            }
            c if c.is_ascii_whitespace() => i += 1,
            _ => {
                let start = i;
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && !matches!(bytes[i], b'<' | b'[' | b']')
                {
                    i += 1;
                }
                tokens.push(CmapToken::Keyword(
                    String::from_utf8_lossy(&bytes[start..i]).into_owned(),
                ));
            }
        }
    }
    tokens
}

fn hex_code(bytes: &[u8]) -> Option<u32> {
    match bytes.len() {
        1 => Some(bytes[0] as u32),
        2 => Some(u16::from_be_bytes([bytes[0], bytes[1]]) as u32),
        3 | 4 => {
            let mut v = 0u32;
            for &b in bytes {
                v = (v << 8) | b as u32;
            }
            Some(v)
        }
        _ => None,
    }
}

fn hex_text(bytes: &[u8]) -> Option<String> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    if units.is_empty() {
        return None;
    }
    Some(String::from_utf16_lossy(&units))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bfchar() {
        let cmap = b"begincmap 2 beginbfchar <0041> <0041> <0042> <4E2D> endbfchar endcmap";
        let map = parse_tounicode(cmap);
        assert_eq!(map.get(&0x41).map(String::as_str), Some("A"));
        assert_eq!(map.get(&0x42).map(String::as_str), Some("\u{4E2D}"));
    }

    #[test]
    fn test_parse_bfrange_flat() {
        let cmap = b"1 beginbfrange <0020> <0022> <0041> endbfrange";
        let map = parse_tounicode(cmap);
        assert_eq!(map.get(&0x20).map(String::as_str), Some("A"));
        assert_eq!(map.get(&0x22).map(String::as_str), Some("C"));
    }

    #[test]
    fn test_parse_bfrange_array() {
        let cmap = b"1 beginbfrange <0001> <0002> [<0058> <0059>] endbfrange";
        let map = parse_tounicode(cmap);
        assert_eq!(map.get(&1).map(String::as_str), Some("X"));
        assert_eq!(map.get(&2).map(String::as_str), Some("Y"));
    }

    #[test]
    fn test_fallback_decode_latin1() {
        let dec = SpanDecoder::fallback();
        assert_eq!(dec.decode(b"Hello"), "Hello");
        assert_eq!(dec.width(65), 500.0);
    }
}
