//! Typed async access to the detection service.
//!
use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use common::protocol::{
    DetectRequest, DetectionResponse, ReadyResponse, ServiceReply, UploadResponse,
};
use reqwest::{multipart, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::snapshot::{blank_frame, SnapshotError};

/// Errors talking to the detection service.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with an `{"error": ...}` body.
    #[error("{0}")]
    Service(String),

    #[error("unexpected response (HTTP {status}): {source}")]
    Decode {
        status: StatusCode,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Operations of the detection service.
#[async_trait]
pub trait DetectService: Send + Sync {
    /// Whether the service finished initializing its model.
    async fn ready(&self) -> Result<ReadyResponse, ClientError>;

    /// Classify the objects in a JPEG data URL.
    async fn detect(&self, image: String) -> Result<DetectionResponse, ClientError>;

    /// Upload a file, returning the service's message.
    async fn upload(&self, file_name: String, data: Vec<u8>) -> Result<String, ClientError>;
}

/// How readiness of the service is determined.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum ReadinessProbe {
    /// Ask `GET /ready`.
    #[default]
    Endpoint,
    /// Send a throwaway blank frame to `POST /detect`.
    Warmup,
}

/// Read a file and upload it under its file name.
pub async fn upload_file<S: DetectService + ?Sized>(
    service: &S,
    path: &Path,
) -> Result<String, ClientError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|source| ClientError::Read {
            path: path.to_owned(),
            source,
        })?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_owned());

    service.upload(file_name, data).await
}

/// [`DetectService`] over HTTP.
pub struct HttpDetectService {
    client: Client,
    base_url: String,
    probe: ReadinessProbe,
}

impl HttpDetectService {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        probe: ReadinessProbe,
    ) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            probe,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", &self.base_url, path)
    }

    async fn warmup(&self) -> Result<ReadyResponse, ClientError> {
        match self.detect(blank_frame()?).await {
            Ok(_) => Ok(ReadyResponse {
                ready: true,
                error: None,
            }),
            Err(ClientError::Service(msg)) => Ok(ReadyResponse {
                ready: false,
                error: Some(msg),
            }),
            Err(err) => Err(err),
        }
    }
}

/// Decode a JSON body, whatever the HTTP status.
///
/// Failing requests still carry `{"error": ...}` bodies, so the status only matters for reporting.
async fn decode_body<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    let body = resp.bytes().await?;
    log::debug!("HTTP {} with {} bytes", status, body.len());

    serde_json::from_slice(&body).map_err(|source| ClientError::Decode { status, source })
}

#[async_trait]
impl DetectService for HttpDetectService {
    async fn ready(&self) -> Result<ReadyResponse, ClientError> {
        match self.probe {
            ReadinessProbe::Endpoint => {
                let resp = self.client.get(self.url("/ready")).send().await?;
                let reply = decode_body::<ServiceReply<ReadyResponse>>(resp).await?;
                Ok(reply.into_result().unwrap_or_else(|error| ReadyResponse {
                    ready: false,
                    error: Some(error),
                }))
            }
            ReadinessProbe::Warmup => self.warmup().await,
        }
    }

    async fn detect(&self, image: String) -> Result<DetectionResponse, ClientError> {
        let resp = self
            .client
            .post(self.url("/detect"))
            .json(&DetectRequest::new(image))
            .send()
            .await?;

        decode_body::<ServiceReply<DetectionResponse>>(resp)
            .await?
            .into_result()
            .map_err(ClientError::Service)
    }

    async fn upload(&self, file_name: String, data: Vec<u8>) -> Result<String, ClientError> {
        log::info!("Uploading {} ({} bytes)", &file_name, data.len());
        let form =
            multipart::Form::new().part("file", multipart::Part::bytes(data).file_name(file_name));

        let resp = self
            .client
            .post(self.url("/upload"))
            .multipart(form)
            .send()
            .await?;

        decode_body::<ServiceReply<UploadResponse>>(resp)
            .await?
            .into_result()
            .map(|reply| reply.msg)
            .map_err(ClientError::Service)
    }
}
