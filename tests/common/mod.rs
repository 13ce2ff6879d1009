//! Shared fixtures for integration tests.
//!
//! PDFs are generated in memory with lopdf so the suite needs no binary
//! fixtures on disk.

#![allow(dead_code)]

use labelcrop::{Area, ConversionParams, Converter, RetentionMode, ServiceConfig};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object};
use std::time::Duration;
use tempfile::TempDir;

/// Serialised PDF with one page per `(width, height)` in points.
pub fn pdf_bytes(sizes: &[(i64, i64)]) -> Vec<u8> {
    let pages: Vec<_> = sizes.iter().map(|&(w, h)| (w, h, 0)).collect();
    rotated_pdf_bytes(&pages)
}

/// Like [`pdf_bytes`], with a `/Rotate` value per page.
pub fn rotated_pdf_bytes(pages: &[(i64, i64, i64)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(b"Helvetica".to_vec())),
    ]));

    let mut kids = Vec::new();
    for (i, &(w, h, rotate)) in pages.iter().enumerate() {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![(w / 2 + 5).into(), 20.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::string_literal(format!("TRACKING {}", i + 1))],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(lopdf::Stream::new(
            Dictionary::new(),
            content.encode().expect("encode fixture content"),
        ));
        let page_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            ("Contents", Object::Reference(content_id)),
            (
                "Resources",
                Object::Dictionary(Dictionary::from_iter([(
                    "Font",
                    Object::Dictionary(Dictionary::from_iter([("F1", Object::Reference(font_id))])),
                )])),
            ),
            (
                "MediaBox",
                Object::Array(vec![0.into(), 0.into(), w.into(), h.into()]),
            ),
            ("Rotate", Object::Integer(rotate)),
        ]));
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(count)),
        ])),
    );
    let catalog_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("serialise fixture");
    bytes
}

/// Converter over a fresh temporary base directory.
pub fn converter(mode: RetentionMode) -> (TempDir, Converter) {
    converter_with(|b| b.retention_mode(mode))
}

pub fn converter_with(
    tweak: impl FnOnce(labelcrop::ServiceConfigBuilder) -> labelcrop::ServiceConfigBuilder,
) -> (TempDir, Converter) {
    let dir = TempDir::new().expect("tempdir");
    let builder = ServiceConfig::builder()
        .base_dir(dir.path())
        .retention_window(Duration::from_secs(3600))
        .sweep_interval(Duration::from_secs(3600));
    let config = tweak(builder).build().expect("config");
    let converter = Converter::start(config).expect("start converter");
    (dir, converter)
}

/// Number of entries in one area directory.
pub fn files_in(converter: &Converter, area: Area) -> usize {
    std::fs::read_dir(converter.store().area_dir(area))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

/// True when no area holds any file.
pub fn no_residue(converter: &Converter) -> bool {
    Area::ALL.iter().all(|&area| files_in(converter, area) == 0)
}

/// `[llx, lly, urx, ury]` of every page in a serialised PDF, in order.
pub fn page_boxes(pdf: &[u8]) -> Vec<[f64; 4]> {
    let doc = Document::load_mem(pdf).expect("output parses");
    doc.get_pages()
        .values()
        .map(|&id| {
            let page = doc.get_dictionary(id).expect("page dictionary");
            let media = page
                .get(b"MediaBox")
                .and_then(Object::as_array)
                .expect("MediaBox");
            rect(media)
        })
        .collect()
}

/// `/BBox` of the form each output page draws, in page order.
pub fn form_bboxes(pdf: &[u8]) -> Vec<[f64; 4]> {
    let doc = Document::load_mem(pdf).expect("output parses");
    doc.get_pages()
        .values()
        .map(|&id| {
            let page = doc.get_dictionary(id).expect("page dictionary");
            let form_id = page
                .get(b"Resources")
                .and_then(Object::as_dict)
                .and_then(|r| r.get(b"XObject"))
                .and_then(Object::as_dict)
                .and_then(|x| x.iter().next().ok_or(lopdf::Error::DictKey))
                .and_then(|(_, form)| form.as_reference())
                .expect("form reference");
            let form = doc
                .get_object(form_id)
                .and_then(Object::as_stream)
                .expect("form stream");
            rect(form.dict.get(b"BBox").and_then(Object::as_array).expect("BBox"))
        })
        .collect()
}

fn rect(values: &[Object]) -> [f64; 4] {
    let mut out = [0.0; 4];
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = match value {
            Object::Integer(i) => *i as f64,
            Object::Real(r) => f64::from(*r),
            other => panic!("unexpected rectangle entry {other:?}"),
        };
    }
    out
}

pub fn default_params() -> ConversionParams {
    ConversionParams::default()
}
