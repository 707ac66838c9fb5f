//! Base64 data URLs carrying images, e.g. `data:image/jpeg;base64,/9j/4AAQ...`.
//!
use base64::{engine::general_purpose, Engine};
use thiserror::Error;

const SCHEME: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

/// Errors decoding a data URL.
#[derive(Debug, Error)]
pub enum DataUrlError {
    #[error("not a data URL (missing `data:` scheme)")]
    MissingScheme,

    #[error("data URL is not base64 encoded")]
    NotBase64,

    #[error("invalid base64 payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),
}

/// Decoded data URL.
#[derive(Debug, Eq, PartialEq)]
pub struct DataUrl {
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Encode bytes of the given media type as a data URL.
pub fn encode(media_type: &str, data: &[u8]) -> String {
    format!(
        "{SCHEME}{media_type}{BASE64_MARKER}{}",
        general_purpose::STANDARD.encode(data)
    )
}

/// Encode JPEG bytes as a data URL.
pub fn encode_jpeg(data: &[u8]) -> String {
    encode("image/jpeg", data)
}

/// Decode a base64 data URL.
pub fn decode(url: &str) -> Result<DataUrl, DataUrlError> {
    let rest = url.strip_prefix(SCHEME).ok_or(DataUrlError::MissingScheme)?;
    let (media_type, payload) = rest
        .split_once(BASE64_MARKER)
        .ok_or(DataUrlError::NotBase64)?;
    let data = general_purpose::STANDARD.decode(payload.trim())?;

    Ok(DataUrl {
        media_type: media_type.to_owned(),
        data,
    })
}
