//! Page composition: paint the clipped region of every source page onto a
//! fresh label-sized page.
//!
//! Each source page becomes a Form XObject in the destination document. The
//! form's `/BBox` is the clip rectangle, so everything outside the clip is
//! cut away by the viewer; the destination page content then scales the form
//! so that the clip fills the whole canvas:
//!
//! ```text
//! q  sx 0 0 sy tx ty cm  /LabelSrc Do  Q
//! ```
//!
//! Only objects reachable from a page's `/Resources` are copied, and shared
//! resources (fonts, images) are copied once per document. `/Parent`
//! back-links are never followed, so the source page tree stays behind.
//!
//! ## Why spawn_blocking?
//!
//! Parsing and serialising a PDF is CPU-bound and lopdf is synchronous.
//! [`compose_file`] moves the whole load → compose → save sequence onto the
//! blocking pool so the Tokio workers keep serving other requests.
//!
//! A blocking task cannot be aborted from outside, so dropping the
//! [`compose_file`] future (a timeout or a cancelled request) raises a
//! [`CancelFlag`] that the worker checks between pages.

use crate::config::ConversionParams;
use crate::error::LabelError;
use crate::pipeline::geometry::{page_transform, PageBox, PageTransform, Rotation};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Resource name of the wrapped source page inside each destination page.
const FORM_NAME: &str = "LabelSrc";

/// How far up the page tree inherited attributes are looked for.
const MAX_TREE_DEPTH: usize = 32;

/// Tells a running composition to stop at the next page boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), LabelError> {
        if self.is_cancelled() {
            Err(LabelError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Raises the flag when the owning future is dropped, finished or not.
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// A composed destination document, already serialised.
#[derive(Debug)]
pub struct ComposedDocument {
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

/// Load `source_path`, compose every page, and serialise the result.
///
/// Runs on the blocking pool. Nothing is written to disk here; the caller
/// decides where the bytes go. Dropping the returned future stops the worker
/// at its next page boundary.
pub async fn compose_file(
    source_path: &Path,
    params: &ConversionParams,
    max_pages: usize,
) -> Result<ComposedDocument, LabelError> {
    let path = source_path.to_path_buf();
    let params = *params;
    let cancel = CancelFlag::default();
    let _abandon = CancelOnDrop(cancel.clone());

    tokio::task::spawn_blocking(move || compose_file_blocking(&path, &params, max_pages, &cancel))
        .await
        .map_err(|e| LabelError::Internal(format!("Compose task panicked: {}", e)))?
}

/// Blocking implementation of [`compose_file`].
fn compose_file_blocking(
    source_path: &Path,
    params: &ConversionParams,
    max_pages: usize,
    cancel: &CancelFlag,
) -> Result<ComposedDocument, LabelError> {
    let source = Document::load(source_path).map_err(|e| LabelError::CorruptDocument {
        detail: e.to_string(),
    })?;

    let mut destination = compose_document(&source, params, max_pages, cancel)?;
    let page_count = destination.get_pages().len();
    cancel.check()?;

    let mut bytes = Vec::new();
    destination
        .save_to(&mut bytes)
        .map_err(|e| {
            LabelError::storage("serialising output", std::io::Error::other(e.to_string()))
        })?;

    info!("Composed {} pages → {} bytes", page_count, bytes.len());
    Ok(ComposedDocument { bytes, page_count })
}

/// Build a new document with one canvas page per source page.
///
/// The source is only read. On error the partially built destination is
/// dropped; callers never see it. `cancel` is checked before every page.
pub fn compose_document(
    source: &Document,
    params: &ConversionParams,
    max_pages: usize,
    cancel: &CancelFlag,
) -> Result<Document, LabelError> {
    let pages = source.get_pages();
    let total = pages.len();
    if total == 0 {
        return Err(LabelError::EmptyDocument);
    }
    if total > max_pages {
        return Err(LabelError::TooManyPages {
            pages: total,
            limit: max_pages,
        });
    }
    info!("Source document has {} pages", total);

    let canvas = params.canvas();
    let mut destination = Document::with_version("1.5");
    let pages_id = destination.new_object_id();
    let mut importer = Importer::new(source);
    let mut kids = Vec::with_capacity(total);

    // get_pages() is keyed by 1-based page number, so iteration is in order.
    for (&page_num, &page_id) in &pages {
        cancel.check()?;
        let page = page_num as usize;
        let page_box = page_box(source, page_id).ok_or_else(|| LabelError::PageFailed {
            page,
            detail: "page has no usable MediaBox".into(),
        })?;
        let transform = page_transform(page, page_box, params.margin_mm, canvas)?;
        let (shown_w, shown_h) = page_box.displayed_size();
        debug!(
            "Page {}/{}: {:.2}x{:.2}pt rotated {}, clip x0={:.4}",
            page,
            total,
            shown_w,
            shown_h,
            page_box.rotation.degrees(),
            transform.clip.x0
        );

        let form_id = wrap_page_as_form(
            source,
            page_id,
            page,
            &transform,
            &mut importer,
            &mut destination,
        )?;
        let new_page_id = append_canvas_page(&mut destination, pages_id, form_id, &transform)?;
        kids.push(Object::Reference(new_page_id));
    }

    let count = kids.len() as i64;
    destination.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(count)),
        ])),
    );
    let catalog_id = destination.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    destination.trailer.set("Root", Object::Reference(catalog_id));
    destination.compress();

    Ok(destination)
}

/// Turn one source page into a Form XObject in `destination`.
fn wrap_page_as_form(
    source: &Document,
    page_id: ObjectId,
    page: usize,
    transform: &PageTransform,
    importer: &mut Importer<'_>,
    destination: &mut Document,
) -> Result<ObjectId, LabelError> {
    let (content, filter) = page_content(source, page_id, page)?;

    let [llx, lly, urx, ury] = transform.clip_bbox();
    let mut form_dict = Dictionary::from_iter([
        ("Type", Object::Name(b"XObject".to_vec())),
        ("Subtype", Object::Name(b"Form".to_vec())),
        ("FormType", Object::Integer(1)),
        ("BBox", Object::Array(vec![real(llx), real(lly), real(urx), real(ury)])),
    ]);
    if let Some(resources) = inherited(source, page_id, b"Resources") {
        let imported = importer.import(destination, resources);
        form_dict.set("Resources", imported);
    }
    for (key, value) in filter {
        let imported = importer.import(destination, &value);
        form_dict.set(key, imported);
    }

    Ok(destination.add_object(Stream::new(form_dict, content)))
}

/// Append a canvas-sized page that draws `form_id` through the transform.
fn append_canvas_page(
    destination: &mut Document,
    pages_id: ObjectId,
    form_id: ObjectId,
    transform: &PageTransform,
) -> Result<ObjectId, LabelError> {
    let [a, b, c, d, e, f] = transform.matrix();
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new("cm", vec![real(a), real(b), real(c), real(d), real(e), real(f)]),
            Operation::new("Do", vec![Object::Name(FORM_NAME.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let encoded = content
        .encode()
        .map_err(|e| LabelError::Internal(format!("encoding canvas content: {e}")))?;
    let content_id = destination.add_object(Stream::new(Dictionary::new(), encoded));

    let resources = Dictionary::from_iter([(
        "XObject",
        Object::Dictionary(Dictionary::from_iter([(FORM_NAME, Object::Reference(form_id))])),
    )]);

    let canvas = transform.canvas;
    Ok(destination.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Page".to_vec())),
        ("Parent", Object::Reference(pages_id)),
        (
            "MediaBox",
            Object::Array(vec![
                0.into(),
                0.into(),
                real(canvas.width_points),
                real(canvas.height_points),
            ]),
        ),
        ("Contents", Object::Reference(content_id)),
        ("Resources", Object::Dictionary(resources)),
    ])))
}

type FilterEntries = Vec<(&'static str, Object)>;

/// Raw content of a page plus the stream filter entries to carry over.
///
/// A single content stream is copied byte for byte together with its
/// `/Filter` and `/DecodeParms`. Several streams are decoded and joined with
/// newlines so tokens at stream boundaries stay separate.
fn page_content(
    source: &Document,
    page_id: ObjectId,
    page: usize,
) -> Result<(Vec<u8>, FilterEntries), LabelError> {
    let stream_ids = source.get_page_contents(page_id);
    let streams = stream_ids
        .iter()
        .map(|id| {
            source
                .get_object(*id)
                .and_then(Object::as_stream)
                .map_err(|e| LabelError::PageFailed {
                    page,
                    detail: format!("unreadable content stream {:?}: {}", id, e),
                })
        })
        .collect::<Result<Vec<&Stream>, _>>()?;

    if let [single] = streams.as_slice() {
        let mut filter = Vec::new();
        for key in ["Filter", "DecodeParms"] {
            if let Ok(value) = single.dict.get(key.as_bytes()) {
                filter.push((key, value.clone()));
            }
        }
        return Ok((single.content.clone(), filter));
    }

    let mut joined = Vec::new();
    for stream in streams {
        let decoded = if stream.dict.get(b"Filter").is_err() {
            stream.content.clone()
        } else {
            stream
                .decompressed_content()
                .map_err(|e| LabelError::PageFailed {
                    page,
                    detail: format!("cannot decode content stream: {}", e),
                })?
        };
        joined.extend_from_slice(&decoded);
        joined.push(b'\n');
    }
    Ok((joined, Vec::new()))
}

/// Visible page box: CropBox when present, otherwise MediaBox, carrying the
/// page's inherited `/Rotate`.
fn page_box(doc: &Document, page_id: ObjectId) -> Option<PageBox> {
    let page_box = inherited(doc, page_id, b"CropBox")
        .and_then(|o| rect(doc, o))
        .or_else(|| inherited(doc, page_id, b"MediaBox").and_then(|o| rect(doc, o)))?;
    let rotation = inherited(doc, page_id, b"Rotate")
        .and_then(|o| number(doc, o))
        .map(|degrees| Rotation::from_degrees(degrees as i64))
        .unwrap_or_default();
    Some(page_box.with_rotation(rotation))
}

fn rect(doc: &Document, obj: &Object) -> Option<PageBox> {
    let arr = resolve(doc, obj)?.as_array().ok()?;
    if arr.len() != 4 {
        return None;
    }
    let v: Vec<f64> = arr.iter().filter_map(|o| number(doc, o)).collect();
    if v.len() != 4 {
        return None;
    }
    Some(PageBox::from_corners(v[0], v[1], v[2], v[3]))
}

fn number(doc: &Document, obj: &Object) -> Option<f64> {
    match resolve(doc, obj)? {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// Look up an inheritable page attribute, walking `/Parent` links.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut node = doc.get_object(page_id).ok()?.as_dict().ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(value);
        }
        let parent = match node.get(b"Parent") {
            Ok(Object::Reference(id)) => *id,
            _ => return None,
        };
        node = doc.get_object(parent).ok()?.as_dict().ok()?;
    }
    None
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn real(v: f64) -> Object {
    Object::Real((v as f32).into())
}

/// Deep copy of objects from one document into another with id remapping.
struct Importer<'a> {
    source: &'a Document,
    ids: BTreeMap<ObjectId, ObjectId>,
}

impl<'a> Importer<'a> {
    fn new(source: &'a Document) -> Self {
        Self {
            source,
            ids: BTreeMap::new(),
        }
    }

    fn import(&mut self, destination: &mut Document, object: &Object) -> Object {
        match object {
            Object::Reference(id) => Object::Reference(self.import_indirect(destination, *id)),
            Object::Array(items) => Object::Array(
                items
                    .iter()
                    .map(|item| self.import(destination, item))
                    .collect(),
            ),
            Object::Dictionary(dict) => Object::Dictionary(self.import_dict(destination, dict)),
            Object::Stream(stream) => {
                let dict = self.import_dict(destination, &stream.dict);
                let mut copy = Stream::new(dict, stream.content.clone());
                copy.allows_compression = stream.allows_compression;
                Object::Stream(copy)
            }
            other => other.clone(),
        }
    }

    fn import_dict(&mut self, destination: &mut Document, dict: &Dictionary) -> Dictionary {
        let mut copy = Dictionary::new();
        for (key, value) in dict.iter() {
            if key.as_slice() == b"Parent" {
                continue;
            }
            copy.set(key.clone(), self.import(destination, value));
        }
        copy
    }

    fn import_indirect(&mut self, destination: &mut Document, id: ObjectId) -> ObjectId {
        if let Some(&mapped) = self.ids.get(&id) {
            return mapped;
        }
        // Reserve before recursing so cycles resolve to the same id.
        let mapped = destination.new_object_id();
        self.ids.insert(id, mapped);
        let source = self.source;
        let copy = match source.get_object(id) {
            Ok(object) => self.import(destination, object),
            Err(_) => Object::Null,
        };
        destination.objects.insert(mapped, copy);
        mapped
    }
}
