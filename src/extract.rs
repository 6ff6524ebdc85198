//! Type-specific metadata for stored files.
//!
//! Extraction never fails outright: a problem is recorded under `error` next to whatever could
//! be read.

use std::io::Cursor;

use image::ImageReader;
use serde_json::{json, Map, Value};

const PDF_MAGIC: &[u8] = b"%PDF-";

pub fn extract_metadata(mime_type: &str, bytes: &[u8]) -> Value {
    let mut fields = Map::new();
    fields.insert("size_bytes".into(), json!(bytes.len()));

    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    let outcome = if essence.starts_with("image/") {
        image_metadata(bytes, &mut fields)
    } else if essence == "application/pdf" {
        pdf_metadata(bytes, &mut fields)
    } else if essence == "text/plain" || essence == "text/csv" {
        text_metadata(bytes, &mut fields)
    } else {
        fields.insert("type".into(), json!("generic"));
        Ok(())
    };

    if let Err(message) = outcome {
        fields.insert("error".into(), json!(message));
    }
    Value::Object(fields)
}

fn image_metadata(bytes: &[u8], fields: &mut Map<String, Value>) -> Result<(), String> {
    fields.insert("type".into(), json!("image"));

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| format!("could not read image: {err}"))?;
    let format = reader
        .format()
        .ok_or_else(|| "unrecognized image format".to_string())?;
    let name = format
        .extensions_str()
        .first()
        .copied()
        .unwrap_or("unknown");
    fields.insert("format".into(), json!(name));

    let (width, height) = reader
        .into_dimensions()
        .map_err(|err| format!("could not read image dimensions: {err}"))?;
    fields.insert("width".into(), json!(width));
    fields.insert("height".into(), json!(height));
    Ok(())
}

fn pdf_metadata(bytes: &[u8], fields: &mut Map<String, Value>) -> Result<(), String> {
    fields.insert("type".into(), json!("pdf"));

    let rest = bytes
        .strip_prefix(PDF_MAGIC)
        .ok_or_else(|| "missing PDF header".to_string())?;
    let version: String = rest
        .iter()
        .take(8)
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|b| *b as char)
        .collect();
    if version.is_empty() {
        return Err("missing PDF version".into());
    }
    fields.insert("pdf_version".into(), json!(version));
    Ok(())
}

fn text_metadata(bytes: &[u8], fields: &mut Map<String, Value>) -> Result<(), String> {
    fields.insert("type".into(), json!("text"));

    let text = std::str::from_utf8(bytes).map_err(|_| "text is not valid UTF-8".to_string())?;
    fields.insert("lines".into(), json!(text.lines().count()));
    fields.insert("words".into(), json!(text.split_whitespace().count()));
    fields.insert("characters".into(), json!(text.chars().count()));
    Ok(())
}
