//! End-to-end conversions through `Converter`, using generated PDFs and a
//! temporary artifact root per test.

mod common;

use common::{
    converter, converter_with, default_params, files_in, form_bboxes, no_residue, page_boxes,
    pdf_bytes, rotated_pdf_bytes,
};
use futures::StreamExt;
use labelcrop::{
    Area, ConversionParams, ErrorKind, JobStatus, LabelError, RetentionMode, Upload,
    PDF_MEDIA_TYPE,
};
use std::time::{Duration, SystemTime};
use tokio_test::{assert_err, assert_ok};

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn reference_label_becomes_one_4x6_page() {
    let (_dir, converter) = converter(RetentionMode::Eager);
    let upload = Upload::from_bytes("label.pdf", pdf_bytes(&[(200, 300)]));

    let doc = assert_ok!(converter.convert(upload, &default_params()).await);
    assert_eq!(doc.filename, "label_print.pdf");
    assert_eq!(doc.media_type, PDF_MEDIA_TYPE);
    assert_eq!(doc.page_count, 1);
    assert!(doc.size_bytes > 0);

    // input is gone before the caller sees the document
    assert_eq!(files_in(&converter, Area::Inbound), 0);
    assert_eq!(files_in(&converter, Area::Scratch), 0);
    assert_eq!(files_in(&converter, Area::Outbound), 1);

    let bytes = doc.bytes().await.unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    assert_eq!(page_boxes(&bytes), vec![[0.0, 0.0, 288.0, 432.0]]);

    drop(doc);
    assert!(no_residue(&converter));
}

#[tokio::test]
async fn page_count_is_preserved() {
    for pages in [1usize, 2, 50] {
        let (_dir, converter) = converter(RetentionMode::Eager);
        let sizes = vec![(612, 792); pages];
        let upload = Upload::from_bytes("batch.pdf", pdf_bytes(&sizes));

        let doc = converter.convert(upload, &default_params()).await.unwrap();
        assert_eq!(doc.page_count, pages);
        let boxes = page_boxes(&doc.bytes().await.unwrap());
        assert_eq!(boxes.len(), pages);
        assert!(boxes.iter().all(|b| *b == [0.0, 0.0, 288.0, 432.0]));
    }
}

#[tokio::test]
async fn mixed_page_sizes_share_one_canvas() {
    let (_dir, converter) = converter(RetentionMode::Eager);
    let upload = Upload::from_bytes("mixed.pdf", pdf_bytes(&[(200, 300), (612, 792), (842, 595)]));
    let params = ConversionParams::builder()
        .width_inches(3.0)
        .height_inches(2.0)
        .points_per_inch(100)
        .build()
        .unwrap();

    let doc = converter.convert(upload, &params).await.unwrap();
    let boxes = page_boxes(&doc.bytes().await.unwrap());
    assert_eq!(boxes, vec![[0.0, 0.0, 300.0, 200.0]; 3]);
}

#[tokio::test]
async fn rotated_label_is_clipped_as_viewed() {
    let (_dir, converter) = converter(RetentionMode::Eager);
    // landscape box shown as a 200pt-wide portrait page, next to an upright one
    let upload = Upload::from_bytes(
        "carrier.pdf",
        rotated_pdf_bytes(&[(300, 200, 90), (200, 300, 0)]),
    );

    let doc = converter.convert(upload, &default_params()).await.unwrap();
    let bytes = doc.bytes().await.unwrap();
    assert_eq!(page_boxes(&bytes), vec![[0.0, 0.0, 288.0, 432.0]; 2]);

    let bboxes = form_bboxes(&bytes);
    let expected = [[0.0, 168.0316, 300.0, 200.0], [168.0316, 0.0, 200.0, 300.0]];
    for (got, want) in bboxes.iter().zip(expected) {
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-3, "{got:?} vs {want:?}");
        }
    }
}

#[tokio::test]
async fn streaming_upload_and_streaming_output() {
    let (_dir, converter) = converter(RetentionMode::Eager);
    let body = pdf_bytes(&[(400, 600), (400, 600)]);
    let upload = Upload::from_reader("Stream.PDF", std::io::Cursor::new(body));

    let doc = converter.convert(upload, &default_params()).await.unwrap();
    assert_eq!(doc.filename, "Stream_print.pdf");
    let expected_len = doc.size_bytes as usize;
    let output_path = doc.artifact().path.clone();

    let mut received = Vec::new();
    let mut stream = doc.into_stream();
    while let Some(chunk) = stream.next().await {
        received.extend(chunk.unwrap());
    }
    assert_eq!(received.len(), expected_len);
    assert_eq!(page_boxes(&received).len(), 2);
    assert!(!output_path.exists());
    assert!(no_residue(&converter));
}

#[tokio::test]
async fn save_to_writes_file_and_cleans_up() {
    let (dir, converter) = converter(RetentionMode::Eager);
    let upload = Upload::from_bytes("label.pdf", pdf_bytes(&[(200, 300)]));
    let doc = converter.convert(upload, &default_params()).await.unwrap();

    let dest = dir.path().join("exports").join("label_print.pdf");
    let written = doc.save_to(&dest).await.unwrap();
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), written);
    assert!(no_residue(&converter));
}

#[tokio::test]
async fn concurrent_conversions_do_not_interfere() {
    let (_dir, converter) = converter(RetentionMode::Janitor);
    let converter = std::sync::Arc::new(converter);

    let tasks: Vec<_> = (1..=8)
        .map(|pages| {
            let converter = std::sync::Arc::clone(&converter);
            tokio::spawn(async move {
                let upload = Upload::from_bytes(
                    format!("doc{pages}.pdf"),
                    pdf_bytes(&vec![(300, 400); pages]),
                );
                converter
                    .convert(upload, &ConversionParams::default())
                    .await
                    .map(|doc| (pages, doc))
            })
        })
        .collect();

    let mut outputs = Vec::new();
    for task in tasks {
        let (pages, doc) = task.await.unwrap().unwrap();
        assert_eq!(doc.page_count, pages);
        assert_eq!(doc.filename, format!("doc{pages}_print.pdf"));
        outputs.push(doc.artifact().path.clone());
    }
    outputs.sort();
    outputs.dedup();
    assert_eq!(outputs.len(), 8);
    assert_eq!(files_in(&converter, Area::Outbound), 8);
    assert_eq!(files_in(&converter, Area::Inbound), 0);
}

// ── Failure paths ────────────────────────────────────────────────────────────

#[tokio::test]
async fn non_pdf_name_is_rejected_before_storage() {
    let (_dir, converter) = converter(RetentionMode::Eager);
    let upload = Upload::from_bytes("notes.txt", pdf_bytes(&[(200, 300)]));

    let err = assert_err!(converter.convert(upload, &default_params()).await);
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.is_client_fault());
    assert!(no_residue(&converter));
}

#[tokio::test]
async fn malformed_pdf_fails_without_residue() {
    let (_dir, converter) = converter(RetentionMode::Eager);
    let upload = Upload::from_bytes("broken.pdf", b"this is not a pdf at all".to_vec());

    let err = converter.convert(upload, &default_params()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transform);
    assert!(!err.is_client_fault());
    assert!(no_residue(&converter));
}

#[tokio::test]
async fn margin_outside_page_is_a_geometry_error() {
    let (_dir, converter) = converter(RetentionMode::Eager);
    // page 2 is only 200pt wide: 100 + 40 * 2.83465 > 200
    let upload = Upload::from_bytes("wide.pdf", pdf_bytes(&[(612, 792), (200, 300)]));
    let params = ConversionParams::builder().margin_mm(-40.0).build().unwrap();

    let err = converter.convert(upload, &params).await.unwrap_err();
    match &err {
        LabelError::Geometry { page, .. } => assert_eq!(*page, 2),
        other => panic!("expected geometry error, got {other:?}"),
    }
    assert!(no_residue(&converter));
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let (_dir, converter) = converter_with(|b| b.max_upload_bytes(64));
    let body = pdf_bytes(&[(200, 300)]);
    assert!(body.len() > 64);

    let err = converter
        .convert(Upload::from_bytes("big.pdf", body.clone()), &default_params())
        .await
        .unwrap_err();
    assert!(matches!(err, LabelError::UploadTooLarge { limit: 64 }));

    let err = converter
        .convert(
            Upload::from_reader("big.pdf", std::io::Cursor::new(body)),
            &default_params(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(no_residue(&converter));
}

#[tokio::test]
async fn page_cap_is_enforced() {
    let (_dir, converter) = converter_with(|b| b.max_pages(3));
    let upload = Upload::from_bytes("long.pdf", pdf_bytes(&[(200, 300); 4]));

    let err = converter.convert(upload, &default_params()).await.unwrap_err();
    assert!(matches!(err, LabelError::TooManyPages { pages: 4, limit: 3 }));
    assert!(no_residue(&converter));
}

#[tokio::test]
async fn slow_conversion_times_out_without_residue() {
    let (_dir, converter) = converter_with(|b| b.conversion_timeout(Duration::from_nanos(1)));
    let upload = Upload::from_bytes("slow.pdf", pdf_bytes(&[(612, 792); 300]));

    let err = converter.convert(upload, &default_params()).await.unwrap_err();
    assert!(matches!(err, LabelError::TimedOut { .. }), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::Transform);
    assert!(no_residue(&converter));

    // the abandoned worker never writes anything
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(no_residue(&converter));
}

#[tokio::test]
async fn cancelled_conversion_leaves_nothing_behind() {
    let (_dir, converter) = converter(RetentionMode::Eager);
    let body = pdf_bytes(&[(612, 792); 300]);
    let body_len = body.len() as u64;
    let upload = Upload::from_bytes("cancel.pdf", body);

    let params = default_params();
    let mut pending = Box::pin(converter.convert(upload, &params));
    // drive the request until the upload is fully on disk, then walk away
    let inbound = converter.store().area_dir(Area::Inbound);
    loop {
        tokio::select! {
            biased;
            result = &mut pending => panic!("conversion finished before cancellation: {result:?}"),
            _ = tokio::task::yield_now() => {}
        }
        let stored = std::fs::read_dir(&inbound)
            .unwrap()
            .filter_map(Result::ok)
            .filter_map(|e| e.metadata().ok())
            .any(|m| m.len() == body_len);
        if stored {
            break;
        }
    }
    drop(pending);

    assert!(no_residue(&converter));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(no_residue(&converter));
}

#[tokio::test]
async fn invalid_params_are_client_faults() {
    let (_dir, converter) = converter(RetentionMode::Eager);
    let params = ConversionParams {
        width_inches: -1.0,
        ..ConversionParams::default()
    };
    let upload = Upload::from_bytes("label.pdf", pdf_bytes(&[(200, 300)]));
    let err = converter.convert(upload, &params).await.unwrap_err();
    assert!(err.is_client_fault());
    assert!(no_residue(&converter));
}

// ── Jobs and status ──────────────────────────────────────────────────────────

#[tokio::test]
async fn jobs_record_outcomes() {
    let (_dir, converter) = converter(RetentionMode::Eager);

    let doc = converter
        .convert(Upload::from_bytes("ok.pdf", pdf_bytes(&[(200, 300)])), &default_params())
        .await
        .unwrap();
    let job = converter.job(doc.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.output_artifact_id.as_ref(), Some(&doc.artifact().id));

    let report = converter.status().await.unwrap();
    assert_eq!(report.outbound.artifacts, 1);
    assert_eq!(report.jobs, 1);
    drop(doc);

    let _ = converter
        .convert(Upload::from_bytes("bad.pdf", b"%PDF-garbage".to_vec()), &default_params())
        .await;
    let report = converter.status().await.unwrap();
    assert_eq!(report.total_artifacts(), 0);
    assert_eq!(report.jobs, 2);
}

#[test]
fn unwritable_base_dir_fails_start() {
    let dir = tempfile::TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let config = labelcrop::ServiceConfig::builder()
        .base_dir(&blocker)
        .build()
        .unwrap();
    let err = labelcrop::Converter::start(config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(!err.public_message().contains("not-a-dir"));
}

// ── Retention modes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn janitor_mode_keeps_output_until_swept() {
    let (_dir, converter) = converter(RetentionMode::Janitor);
    let doc = converter
        .convert(Upload::from_bytes("label.pdf", pdf_bytes(&[(200, 300)])), &default_params())
        .await
        .unwrap();
    let path = doc.artifact().path.clone();
    let _ = doc.bytes().await.unwrap();
    drop(doc);
    assert!(path.exists());

    let janitor = converter.janitor();
    let young = janitor.sweep_once().await;
    assert_eq!(young.removed, 0);
    assert!(path.exists());

    let later = SystemTime::now() + converter.config().retention_window + Duration::from_secs(1);
    let report = janitor.sweep_at(later).await;
    assert_eq!(report.removed, 1);
    assert!(!path.exists());
    assert!(no_residue(&converter));
}
