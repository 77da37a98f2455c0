//! Payload classification for replay
//!
//! Stored payloads are plain JSON, so multipart bodies have to be described
//! in a serializable form and rebuilt at send time. Two descriptions are
//! recognised:
//!
//! * tagged: `{"__multipart": true, "parts": [...]}` where each part is
//!   `{"kind": "field", "name", "value"}` or
//!   `{"kind": "file", "name", "filename", "mime", "last_modified", "data"}`
//!   with `data` base64 encoded
//! * legacy: an object with exactly the keys `data` and `files`; `data` is
//!   flattened into bracketed field names and each file becomes a part
//!
//! Anything else is sent as JSON.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::multipart::{Form, Part};
use serde_json::{Map, Value};

use super::sender::SendError;

/// Key marking a tagged multipart description
pub const MULTIPART_MARKER: &str = "__multipart";

const DEFAULT_FILENAME: &str = "blob";
const DEFAULT_MIME: &str = "application/octet-stream";

/// One part of a rebuilt multipart body
#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        filename: String,
        mime: String,
        /// Epoch millis from the stored descriptor. Multipart part headers
        /// have no slot for it, so `build_form` does not send it.
        last_modified: Option<i64>,
        data: Vec<u8>,
    },
}

impl FormPart {
    pub fn name(&self) -> &str {
        match self {
            FormPart::Text { name, .. } | FormPart::File { name, .. } => name,
        }
    }
}

/// How a stored payload will go over the wire
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadShape {
    /// Tagged multipart description
    Tagged(Vec<FormPart>),
    /// Legacy `{data, files}` object
    Legacy(Vec<FormPart>),
    /// Plain JSON body
    Json,
}

impl PayloadShape {
    pub fn is_multipart(&self) -> bool {
        !matches!(self, PayloadShape::Json)
    }

    /// Parts for a multipart body, `None` for JSON
    pub fn into_parts(self) -> Option<Vec<FormPart>> {
        match self {
            PayloadShape::Tagged(parts) | PayloadShape::Legacy(parts) => Some(parts),
            PayloadShape::Json => None,
        }
    }
}

/// Classify a stored payload
///
/// Fails only when a payload claims to be multipart but its description
/// cannot be decoded.
pub fn classify(payload: &Value) -> Result<PayloadShape, SendError> {
    let Some(object) = payload.as_object() else {
        return Ok(PayloadShape::Json);
    };

    if is_tagged(object) {
        return parse_tagged(object).map(PayloadShape::Tagged);
    }

    if is_legacy(object) {
        return parse_legacy(object).map(PayloadShape::Legacy);
    }

    Ok(PayloadShape::Json)
}

/// Flatten any payload into form parts
///
/// Used by senders that always emit multipart: described payloads keep
/// their parts, plain objects are flattened field by field.
pub fn to_parts(payload: &Value) -> Result<Vec<FormPart>, SendError> {
    match classify(payload)? {
        PayloadShape::Json => {
            let mut parts = Vec::new();
            flatten_fields(None, payload, &mut parts);
            Ok(parts)
        }
        shape => Ok(shape.into_parts().unwrap_or_default()),
    }
}

/// Build a reqwest form from parts
pub fn build_form(parts: Vec<FormPart>) -> Result<Form, SendError> {
    let mut form = Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name, value),
            FormPart::File {
                name,
                filename,
                mime,
                data,
                ..
            } => {
                let file = Part::bytes(data)
                    .file_name(filename)
                    .mime_str(&mime)
                    .map_err(|e| SendError::Payload(format!("bad mime type '{}': {}", mime, e)))?;
                form.part(name, file)
            }
        };
    }
    Ok(form)
}

fn is_tagged(object: &Map<String, Value>) -> bool {
    object.get(MULTIPART_MARKER).and_then(Value::as_bool) == Some(true)
}

fn is_legacy(object: &Map<String, Value>) -> bool {
    object.len() == 2
        && object.get("data").is_some_and(Value::is_object)
        && object
            .get("files")
            .is_some_and(|f| f.is_array() || f.is_object())
}

fn parse_tagged(object: &Map<String, Value>) -> Result<Vec<FormPart>, SendError> {
    let parts = object
        .get("parts")
        .and_then(Value::as_array)
        .ok_or_else(|| SendError::Payload("multipart description has no parts".to_string()))?;

    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let name = part
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| SendError::Payload(format!("part {} has no name", i)))?;

            match part.get("kind").and_then(Value::as_str) {
                Some("field") | None => Ok(FormPart::Text {
                    name: name.to_string(),
                    value: part.get("value").map(text_value).unwrap_or_default(),
                }),
                Some("file") => file_part(name, part),
                Some(other) => Err(SendError::Payload(format!(
                    "part {} has unknown kind '{}'",
                    i, other
                ))),
            }
        })
        .collect()
}

fn parse_legacy(object: &Map<String, Value>) -> Result<Vec<FormPart>, SendError> {
    let mut parts = Vec::new();
    if let Some(data) = object.get("data") {
        flatten_fields(None, data, &mut parts);
    }

    match object.get("files") {
        Some(Value::Array(files)) => {
            for (i, file) in files.iter().enumerate() {
                let field = file
                    .get("field")
                    .and_then(Value::as_str)
                    .ok_or_else(|| SendError::Payload(format!("file {} has no field", i)))?;
                parts.push(file_part(field, file)?);
            }
        }
        Some(Value::Object(files)) => {
            for (field, entry) in files {
                match entry {
                    Value::Array(many) => {
                        for file in many {
                            parts.push(file_part(field, file)?);
                        }
                    }
                    file => parts.push(file_part(field, file)?),
                }
            }
        }
        _ => {}
    }

    Ok(parts)
}

fn file_part(name: &str, descriptor: &Value) -> Result<FormPart, SendError> {
    let encoded = descriptor
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| SendError::Payload(format!("file '{}' has no data", name)))?;
    let data = STANDARD
        .decode(encoded)
        .map_err(|e| SendError::Payload(format!("file '{}' is not valid base64: {}", name, e)))?;

    let str_field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| descriptor.get(*k).and_then(Value::as_str))
            .map(str::to_string)
    };

    Ok(FormPart::File {
        name: name.to_string(),
        filename: str_field(&["filename", "name"]).unwrap_or_else(|| DEFAULT_FILENAME.to_string()),
        mime: str_field(&["mime", "type"]).unwrap_or_else(|| DEFAULT_MIME.to_string()),
        last_modified: descriptor
            .get("last_modified")
            .or_else(|| descriptor.get("lastModified"))
            .and_then(Value::as_i64),
        data,
    })
}

/// Flatten nested JSON into bracketed form fields
///
/// `{"patient": {"address": {"city": "X"}}}` becomes `patient[address][city]=X`
/// and arrays use their index: `items[0]`. Nulls become empty strings.
fn flatten_fields(prefix: Option<&str>, value: &Value, out: &mut Vec<FormPart>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let name = match prefix {
                    Some(p) => format!("{}[{}]", p, key),
                    None => key.clone(),
                };
                flatten_fields(Some(&name), child, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                let name = match prefix {
                    Some(p) => format!("{}[{}]", p, i),
                    None => i.to_string(),
                };
                flatten_fields(Some(&name), child, out);
            }
        }
        scalar => {
            if let Some(name) = prefix {
                out.push(FormPart::Text {
                    name: name.to_string(),
                    value: text_value(scalar),
                });
            }
        }
    }
}

fn text_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
