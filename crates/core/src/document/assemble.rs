//! Patch commit and output assembly.
//!
//! Replacement stream bytes accumulate in a [`PatchSet`] while pages are
//! interpreted, then land in the object table in one pass. The mono
//! output is the patched document; the dual output merges a pristine copy
//! of the input with the patched document, interleaving each original
//! page with its translated counterpart.

use lopdf::{Document, Object, ObjectId, Stream, dictionary};
use rustc_hash::FxHashMap;

use crate::document::{PageInfo, inherited};
use crate::error::{Result, TranslateError};

/// Pending replacement stream bytes per indirect object, for both output
/// variants. An object is either fully patched or left untouched.
#[derive(Debug, Default)]
pub struct PatchSet {
    entries: FxHashMap<ObjectId, (Vec<u8>, Vec<u8>)>,
    voids: Vec<ObjectId>,
}

impl PatchSet {
    pub fn new() -> Self {
        PatchSet::default()
    }

    pub fn insert(&mut self, id: ObjectId, mono: Vec<u8>, dual: Vec<u8>) {
        self.entries.insert(id, (mono, dual));
    }

    /// Marks an original content object to be emptied so it cannot render
    /// a second copy of the page.
    pub fn void(&mut self, id: ObjectId) {
        self.voids.push(id);
    }

    pub fn merge(&mut self, other: PatchSet) {
        self.entries.extend(other.entries);
        self.voids.extend(other.voids);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies the chosen variant's bytes to a clone of `base`.
    fn apply(&self, base: &Document, dual: bool) -> Document {
        let mut doc = base.clone();
        for (&id, (mono_bytes, dual_bytes)) in &self.entries {
            let bytes = if dual { dual_bytes } else { mono_bytes };
            set_stream(&mut doc, id, bytes.clone());
        }
        for &id in &self.voids {
            set_stream(&mut doc, id, Vec::new());
        }
        doc
    }
}

/// Replaces a stream object's content with plain (unfiltered) bytes.
fn set_stream(doc: &mut Document, id: ObjectId, bytes: Vec<u8>) {
    if let Ok(obj) = doc.get_object_mut(id) {
        match obj {
            Object::Stream(stream) => {
                stream.dict.remove(b"Filter");
                stream.dict.remove(b"DecodeParms");
                stream.set_content(bytes);
            }
            other => {
                *other = Object::Stream(Stream::new(dictionary! {}, bytes));
            }
        }
    }
}

/// Allocates a fresh content object per page and points the page's
/// `Contents` at it. Returns page id to content id. Runs before the
/// parallel phase so object allocation stays single-threaded.
pub fn prepare_page_content(
    doc: &mut Document,
    pages: &[PageInfo],
) -> FxHashMap<ObjectId, ObjectId> {
    let mut map = FxHashMap::default();
    for page in pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(page.id) {
            dict.set("Contents", Object::Reference(content_id));
        }
        map.insert(page.id, content_id);
    }
    map
}

/// The translated-only document.
pub fn assemble_mono(work: &Document, patches: &PatchSet) -> Result<Vec<u8>> {
    let mut doc = patches.apply(work, false);
    doc.compress();
    save(&mut doc)
}

/// The interleaved document: every original page followed by its
/// translated counterpart, 2N pages for an N-page input.
pub fn assemble_dual(pristine: &Document, work: &Document, patches: &PatchSet) -> Result<Vec<u8>> {
    let mut merged = pristine.clone();
    let mut translated = patches.apply(work, true);

    translated.renumber_objects_with(merged.max_id + 1);

    let original_pages: Vec<ObjectId> = merged.get_pages().into_values().collect();
    let translated_pages: Vec<ObjectId> = translated.get_pages().into_values().collect();
    if original_pages.len() != translated_pages.len() {
        return Err(TranslateError::Parse(
            "page count mismatch between original and translated halves".into(),
        ));
    }

    merged.max_id = translated.max_id;
    merged.objects.extend(std::mem::take(&mut translated.objects));

    // Reparenting severs both original page trees, so attributes the
    // pages inherit through those trees are copied down first.
    const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Rotate", b"Resources"];
    for &id in original_pages.iter().chain(translated_pages.iter()) {
        let mut missing: Vec<(Vec<u8>, Object)> = Vec::new();
        for key in INHERITABLE {
            let present =
                matches!(merged.get_object(id), Ok(Object::Dictionary(d)) if d.has(key));
            if present {
                continue;
            }
            if let Some(value) = inherited(&merged, id, key) {
                missing.push((key.to_vec(), value.clone()));
            }
        }
        if missing.is_empty() {
            continue;
        }
        if let Ok(Object::Dictionary(page)) = merged.get_object_mut(id) {
            for (key, value) in missing {
                page.set(key, value);
            }
        }
    }

    let mut kids = Vec::with_capacity(original_pages.len() * 2);
    for (&orig, &trans) in original_pages.iter().zip(translated_pages.iter()) {
        kids.push(Object::Reference(orig));
        kids.push(Object::Reference(trans));
    }
    let count = kids.len() as i64;
    let pages_id = merged.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
    });

    for id in original_pages.iter().chain(translated_pages.iter()) {
        if let Ok(Object::Dictionary(page)) = merged.get_object_mut(*id) {
            page.set("Parent", Object::Reference(pages_id));
        }
    }

    let root_id = match merged.trailer.get(b"Root") {
        Ok(Object::Reference(id)) => *id,
        _ => return Err(TranslateError::Parse("document has no catalog".into())),
    };
    if let Ok(Object::Dictionary(catalog)) = merged.get_object_mut(root_id) {
        catalog.set("Pages", Object::Reference(pages_id));
    }

    merged.compress();
    save(&mut merged)
}

fn save(doc: &mut Document) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}
