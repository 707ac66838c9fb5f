//! Protocol definition for the detection service.
//!
//! The service speaks JSON over HTTP:
//! - `GET /ready` answers with [`ReadyResponse`]
//! - `POST /detect` takes a [`DetectRequest`] and answers with a [`DetectionResponse`]
//! - `POST /upload` takes a multipart `file` field and answers with an [`UploadResponse`]
//!
//! Failures on every endpoint are reported as `{"error": "..."}`, see [`ServiceReply`].
use std::{fmt, str::FromStr};

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::stats::RipenessStats;

/// Ripeness class assigned by the service to every detected object.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Ripeness {
    #[serde(rename = "RIPEN", alias = "Maduro")]
    Ripen,
    #[serde(rename = "UNRIPEN", alias = "Inmaduro")]
    Unripen,
    #[serde(rename = "OVERRIPE", alias = "Sobremaduro")]
    Overripe,
    #[serde(rename = "NO-FRUIT")]
    NoFruit,
}

impl Ripeness {
    /// All known classes in display order.
    pub const ALL: [Ripeness; 4] = [
        Ripeness::Ripen,
        Ripeness::Unripen,
        Ripeness::Overripe,
        Ripeness::NoFruit,
    ];

    /// Wire name of the class.
    pub fn as_str(&self) -> &'static str {
        match self {
            Ripeness::Ripen => "RIPEN",
            Ripeness::Unripen => "UNRIPEN",
            Ripeness::Overripe => "OVERRIPE",
            Ripeness::NoFruit => "NO-FRUIT",
        }
    }

    /// Position of the class in [`Ripeness::ALL`].
    pub fn index(&self) -> usize {
        match self {
            Ripeness::Ripen => 0,
            Ripeness::Unripen => 1,
            Ripeness::Overripe => 2,
            Ripeness::NoFruit => 3,
        }
    }

    /// Parse a wire label, accepting the Spanish labels of older servers.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "RIPEN" | "Maduro" => Some(Ripeness::Ripen),
            "UNRIPEN" | "Inmaduro" => Some(Ripeness::Unripen),
            "OVERRIPE" | "Sobremaduro" => Some(Ripeness::Overripe),
            "NO-FRUIT" => Some(Ripeness::NoFruit),
            _ => None,
        }
    }
}

impl fmt::Display for Ripeness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Ripeness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ripeness::from_label(s).ok_or_else(|| format!("unknown ripeness class {s:?}"))
    }
}

/// Body of a detect request.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DetectRequest {
    /// JPEG frame as a data URL.
    pub image: String,
}

impl DetectRequest {
    pub fn new(image: String) -> Self {
        Self { image }
    }
}

/// One classified object.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DetectionResult {
    pub class: String,
    pub ripeness: Ripeness,
    pub confidence: f32,
    /// Pixel box `[x1, y1, x2, y2]` in the submitted frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[i32; 4]>,
}

/// Historical detection kept by the service.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GalleryEntry {
    pub url: String,
    pub fruit: String,
    pub ripeness: Ripeness,
    pub date: String,
}

/// Successful answer to a detect request.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DetectionResponse {
    /// Annotated frame as a data URL.
    pub image: String,
    pub detections: Vec<DetectionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RipenessStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<Vec<GalleryEntry>>,
}

/// Answer of the readiness endpoint.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Successful answer to an upload.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct UploadResponse {
    pub msg: String,
}

/// Either an `{"error": ...}` body or the expected payload.
///
/// An `error` field takes precedence over everything else in the body. Without one, the body is
/// decoded as `T` and decoding errors of `T` are passed on unchanged.
#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServiceReply<T> {
    Failure { error: String },
    Success(T),
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for ServiceReply<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut body = Value::deserialize(deserializer)?;
        match body.get_mut("error").map(Value::take) {
            None | Some(Value::Null) => T::deserialize(body)
                .map(ServiceReply::Success)
                .map_err(serde::de::Error::custom),
            Some(Value::String(error)) => Ok(ServiceReply::Failure { error }),
            Some(other) => Ok(ServiceReply::Failure {
                error: other.to_string(),
            }),
        }
    }
}

impl<T> ServiceReply<T> {
    pub fn into_result(self) -> Result<T, String> {
        match self {
            ServiceReply::Failure { error } => Err(error),
            ServiceReply::Success(payload) => Ok(payload),
        }
    }
}
