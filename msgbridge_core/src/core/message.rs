//! Normalized dispatch input and the payload handed to providers.

use log::warn;
use serde::{Deserialize, Serialize};
use url::Url;

const DOCUMENT_MIMETYPE: &str = "application/octet-stream";
const DEFAULT_DOCUMENT_NAME: &str = "document.pdf";
const INVALID_FILE_PLACEHOLDER: &str = "Invalid file";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    pub url: String,
    pub mimetype: String,
    pub file_name: String,
}

/// The payload a provider delivers.
///
/// Serialized untagged, so JSON looks like `{ "text": "hi" }` or
/// `{ "image": { "url": "..." }, "caption": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutgoingMessage {
    Document {
        document: DocumentRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Image {
        image: MediaRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Video {
        video: MediaRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Text {
        text: String,
    },
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        OutgoingMessage::Text { text: text.into() }
    }
}

/// Caller-facing message description, as received on the control surface.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    #[serde(default, alias = "texto")]
    pub text: Option<String>,
    #[serde(default, alias = "tipoMidia")]
    pub media_type: Option<String>,
    #[serde(default, alias = "caminhoMidia")]
    pub media_path: Option<String>,
}

impl MessageRequest {
    /// Builds the provider payload. Never fails: bad document URLs fall back to text.
    pub fn into_message(self) -> OutgoingMessage {
        let text = self.text.filter(|t| !t.is_empty());
        let (Some(kind), Some(path)) = (
            self.media_type.filter(|k| !k.is_empty()),
            self.media_path.filter(|p| !p.is_empty()),
        ) else {
            return OutgoingMessage::text(text.unwrap_or_default());
        };

        match kind.to_lowercase().as_str() {
            "imagem" | "image" => OutgoingMessage::Image {
                image: MediaRef { url: path },
                caption: text,
            },
            "video" => OutgoingMessage::Video {
                video: MediaRef { url: path },
                caption: text,
            },
            "documento" | "document" => match document_file_name(&path) {
                Some(file_name) => OutgoingMessage::Document {
                    document: DocumentRef {
                        url: path,
                        mimetype: DOCUMENT_MIMETYPE.to_string(),
                        file_name,
                    },
                    caption: text,
                },
                None => {
                    warn!("Unusable document URL {:?}, sending text instead", path);
                    OutgoingMessage::text(text.unwrap_or_else(|| INVALID_FILE_PLACEHOLDER.into()))
                }
            },
            _ => OutgoingMessage::text(text.unwrap_or_default()),
        }
    }
}

/// Display name from the last path segment of `source`, percent-decoded.
///
/// `None` when the URL does not parse or the name is not valid UTF-8.
fn document_file_name(source: &str) -> Option<String> {
    let url = Url::parse(source).ok()?;
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("");
    if has_malformed_escape(segment) {
        return None;
    }
    let decoded = urlencoding::decode(segment).ok()?;
    if decoded.is_empty() {
        Some(DEFAULT_DOCUMENT_NAME.to_string())
    } else {
        Some(decoded.into_owned())
    }
}

/// A `%` not followed by two hex digits; `urlencoding` would keep it verbatim.
fn has_malformed_escape(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    let is_hex = |i: usize| bytes.get(i).is_some_and(|b| b.is_ascii_hexdigit());
    bytes
        .iter()
        .enumerate()
        .any(|(i, &b)| b == b'%' && !(is_hex(i + 1) && is_hex(i + 2)))
}
