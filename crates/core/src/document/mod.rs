//! Document access: page enumeration with attribute inheritance, and the
//! patch commit / mono-dual assembly pass.

pub mod assemble;

use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::error::Result;
use crate::utils::Rect;

pub use assemble::{PatchSet, assemble_dual, assemble_mono, prepare_page_content};

/// Follows reference chains to the underlying object. Cycles and dangling
/// references stop the walk and return the last object reached.
pub fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    let mut cur = obj;
    for _ in 0..16 {
        match cur {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(next) => cur = next,
                Err(_) => return cur,
            },
            _ => return cur,
        }
    }
    cur
}

/// One page's geometry and content, gathered before interpretation.
#[derive(Debug, Clone)]
pub struct PageInfo {
    /// 1-based page number.
    pub number: usize,
    pub id: ObjectId,
    pub mediabox: Rect,
    pub cropbox: Rect,
    /// Normalized to 0, 90, 180, or 270.
    pub rotate: i64,
    pub resources: Dictionary,
    /// The original content stream objects, voided after rewriting.
    pub content_ids: Vec<ObjectId>,
    /// Concatenated, decompressed content stream bytes.
    pub content: Vec<u8>,
}

const LETTER: Rect = (0.0, 0.0, 612.0, 792.0);

/// Enumerates pages in document order, resolving the inheritable page
/// attributes (MediaBox, CropBox, Rotate, Resources) through the page
/// tree.
pub fn collect_pages(doc: &Document) -> Result<Vec<PageInfo>> {
    let mut pages = Vec::new();
    for (number, (_, page_id)) in doc.get_pages().into_iter().enumerate() {
        let mediabox = inherited(doc, page_id, b"MediaBox")
            .and_then(|o| rect_from(doc, o))
            .unwrap_or(LETTER);
        let cropbox = inherited(doc, page_id, b"CropBox")
            .and_then(|o| rect_from(doc, o))
            .unwrap_or(mediabox);
        let rotate = inherited(doc, page_id, b"Rotate")
            .and_then(|o| match *resolve(doc, o) {
                Object::Integer(i) => Some(i),
                _ => None,
            })
            .unwrap_or(0);
        let rotate = ((rotate % 360) + 360) % 360;
        let resources = inherited(doc, page_id, b"Resources")
            .map(|o| resolve(doc, o))
            .and_then(|o| match o {
                Object::Dictionary(d) => Some(d.clone()),
                _ => None,
            })
            .unwrap_or_default();
        let content_ids = doc.get_page_contents(page_id);
        let content = page_content(doc, &content_ids);
        pages.push(PageInfo {
            number: number + 1,
            id: page_id,
            mediabox,
            cropbox,
            rotate,
            resources,
            content_ids,
            content,
        });
    }
    Ok(pages)
}

/// Looks up an inheritable page attribute, walking Parent links upward.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut id = page_id;
    for _ in 0..64 {
        let Ok(Object::Dictionary(dict)) = doc.get_object(id) else {
            return None;
        };
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => id = *parent,
            _ => return None,
        }
    }
    None
}

fn rect_from(doc: &Document, obj: &Object) -> Option<Rect> {
    let Object::Array(items) = resolve(doc, obj) else {
        return None;
    };
    if items.len() != 4 {
        return None;
    }
    let mut vals = [0.0f64; 4];
    for (i, item) in items.iter().enumerate() {
        vals[i] = match *resolve(doc, item) {
            Object::Integer(v) => v as f64,
            Object::Real(v) => v as f64,
            _ => return None,
        };
    }
    // Normalize so (x0, y0) is the lower-left corner.
    Some((
        vals[0].min(vals[2]),
        vals[1].min(vals[3]),
        vals[0].max(vals[2]),
        vals[1].max(vals[3]),
    ))
}

fn page_content(doc: &Document, content_ids: &[ObjectId]) -> Vec<u8> {
    let mut out = Vec::new();
    for &id in content_ids {
        let Ok(Object::Stream(stream)) = doc.get_object(id) else {
            continue;
        };
        let bytes = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        if !out.is_empty() {
            out.push(b'\n');
        }
        out.extend_from_slice(&bytes);
    }
    out
}
