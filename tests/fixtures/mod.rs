//! Test fixtures: sample images and inference API payloads

use image::{DynamicImage, ImageFormat};
use serde_json::{json, Value};
use std::io::Cursor;

/// Findings the materializer classifies as STAT.
pub const STAT_FINDINGS: &[&str] = &["Acute subdural hematoma", "Midline shift 4mm"];

/// Findings the materializer classifies as URGENT.
pub const URGENT_FINDINGS: &[&str] = &["Non-displaced rib fracture"];

/// Findings the materializer classifies as ROUTINE.
pub const ROUTINE_FINDINGS: &[&str] = &["No intracranial abnormality"];

pub const MODEL_VERSION: &str = "ct-brain-3.2.1";

/// A small but real PNG, encoded on the fly.
pub fn png_bytes() -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::new_rgb8(4, 4)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode test PNG");
    buf
}

/// A well-formed `GET /results/{job_id}` body.
pub fn results_payload(job_id: &str, findings: &[&str], confidence: f64) -> Value {
    json!({
        "job_id": job_id,
        "status": "completed",
        "findings": findings,
        "confidence": confidence,
        "summary": "Findings reviewed by model",
        "model_version": MODEL_VERSION,
    })
}

/// A results body that parses but breaks the contract (confidence > 1).
pub fn out_of_range_payload(job_id: &str) -> Value {
    json!({
        "job_id": job_id,
        "status": "completed",
        "findings": ROUTINE_FINDINGS,
        "confidence": 1.7,
        "model_version": MODEL_VERSION,
    })
}
