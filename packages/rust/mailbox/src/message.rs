//! Message payload shapes and body decoding.

use base64::Engine;
use base64::alphabet::URL_SAFE;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::Deserialize;

/// base64url, padding optional (the API omits it on some parts).
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A full message as returned with `format=full`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub payload: MessagePart,
}

/// One MIME part; the root payload is itself a part.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub body: PartBody,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
}

impl Message {
    /// Decoded body text, preferring HTML over plain text.
    ///
    /// Returns `None` when no part carries decodable data.
    pub fn body_text(&self) -> Option<String> {
        let payload = &self.payload;

        if payload.parts.is_empty() {
            return payload.body.data.as_deref().and_then(decode_data);
        }

        find_part(payload, "text/html")
            .or_else(|| find_part(payload, "text/plain"))
            .and_then(decode_data)
    }
}

/// Depth-first search for the first part of `mime` that has data.
fn find_part<'a>(part: &'a MessagePart, mime: &str) -> Option<&'a str> {
    for child in &part.parts {
        if child.mime_type.eq_ignore_ascii_case(mime) {
            if let Some(data) = child.body.data.as_deref().filter(|d| !d.is_empty()) {
                return Some(data);
            }
        }
        if let Some(data) = find_part(child, mime) {
            return Some(data);
        }
    }
    None
}

fn decode_data(data: &str) -> Option<String> {
    let bytes = BODY_ENGINE.decode(data.trim()).ok()?;
    if bytes.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}
