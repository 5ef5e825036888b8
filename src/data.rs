use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::Path;

pub const PDF_MIME: &str = "application/pdf";

#[derive(Debug, Clone)]
pub struct DataAttachment {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub name: Option<String>,
}

impl DataAttachment {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>, name: Option<String>) -> Self {
        Self {
            bytes,
            mime: mime.into(),
            name,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("document")
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

pub fn load_attachment(path: &Path, mime_hint: Option<&str>) -> Result<DataAttachment> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read data file: {}", path.display()))?;
    let mime = resolve_mime(mime_hint.unwrap_or("auto"), &bytes, Some(path))?;
    let name = path
        .file_name()
        .and_then(|value| value.to_str())
        .map(|value| value.to_string());
    Ok(DataAttachment { bytes, mime, name })
}

pub fn load_attachment_from_bytes(
    bytes: Vec<u8>,
    mime_hint: Option<&str>,
    name: Option<String>,
) -> Result<DataAttachment> {
    if bytes.is_empty() {
        return Err(anyhow!("input is empty"));
    }
    let mime = resolve_mime(mime_hint.unwrap_or("auto"), &bytes, None)?;
    Ok(DataAttachment { bytes, mime, name })
}

/// Renders the attachment as `data:<mime>;base64,<payload>`.
pub fn encode_data_url(data: &DataAttachment) -> String {
    format!("data:{};base64,{}", data.mime, BASE64.encode(&data.bytes))
}

/// Splits a data URL into its MIME type and base64 payload. Bare base64 input
/// is returned unchanged with no MIME type.
pub fn split_data_url(input: &str) -> Result<(Option<String>, &str)> {
    let trimmed = input.trim();
    let Some(rest) = trimmed.strip_prefix("data:") else {
        return Ok((None, trimmed));
    };
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("data URL has no payload"))?;
    let mut params = header.split(';');
    let mime = params.next().unwrap_or_default().trim().to_lowercase();
    if !params.any(|param| param.trim().eq_ignore_ascii_case("base64")) {
        return Err(anyhow!("data URL is not base64 encoded"));
    }
    let mime = if mime.is_empty() { None } else { Some(mime) };
    Ok((mime, payload))
}

/// Estimates the decoded size of a base64 payload without decoding it.
pub fn estimated_decoded_len(payload: &str) -> usize {
    let significant = payload
        .bytes()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect::<Vec<_>>();
    let padding = significant
        .iter()
        .rev()
        .take(2)
        .take_while(|byte| **byte == b'=')
        .count();
    (significant.len() * 3 / 4).saturating_sub(padding)
}

pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    let compact = payload
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect::<String>();
    BASE64
        .decode(compact.as_bytes())
        .with_context(|| "payload is not valid base64")
}

pub fn sniff_mime(bytes: &[u8]) -> Option<String> {
    let kind = infer::get(bytes)?;
    let detected = kind.mime_type();
    if detected.starts_with("image/") || detected == PDF_MIME {
        return Some(detected.to_string());
    }
    None
}

fn resolve_mime(input: &str, bytes: &[u8], path: Option<&Path>) -> Result<String> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(anyhow!("data-mime is empty"));
    }
    let lower = raw.to_lowercase();

    match lower.as_str() {
        "auto" => return detect_mime(bytes, path),
        "pdf" => return Ok(PDF_MIME.to_string()),
        "png" => return Ok("image/png".to_string()),
        "jpg" | "jpeg" => return Ok("image/jpeg".to_string()),
        "gif" => return Ok("image/gif".to_string()),
        "webp" => return Ok("image/webp".to_string()),
        "bmp" => return Ok("image/bmp".to_string()),
        "tiff" | "tif" => return Ok("image/tiff".to_string()),
        "heic" => return Ok("image/heic".to_string()),
        _ => {}
    }

    if lower == PDF_MIME || lower.starts_with("image/") {
        return Ok(lower);
    }

    Err(anyhow!(
        "unsupported --data-mime '{}' (expected auto, image/*, pdf, png, jpg, gif, webp, bmp, tiff, heic)",
        raw
    ))
}

fn detect_mime(bytes: &[u8], path: Option<&Path>) -> Result<String> {
    if let Some(detected) = sniff_mime(bytes) {
        return Ok(detected);
    }

    if let Some(mime) = extension_lower(path).and_then(|ext| mime_from_extension(&ext)) {
        return Ok(mime.to_string());
    }

    Err(anyhow!(
        "unable to detect supported mime for file '{}'",
        path.map(|value| value.display().to_string())
            .unwrap_or_else(|| "stdin".to_string())
    ))
}

fn extension_lower(path: Option<&Path>) -> Option<String> {
    path.and_then(|path| path.extension())
        .and_then(|value| value.to_str())
        .map(|value| value.to_lowercase())
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "pdf" => Some(PDF_MIME),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "tiff" | "tif" => Some("image/tiff"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}
