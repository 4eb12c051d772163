//! HTTP seam used by the streaming entry points.
use std::pin::Pin;

use bytes::Bytes;
use futures::TryStreamExt as _;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderValue};
use tracing::debug;

use crate::config::join_url;
use crate::errors::TransportError;
use crate::model::ImageUpload;

/// Response body as a stream of raw chunks.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, TransportError>> + Send + 'static>>;

/// One multipart form field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormPart {
    Text { name: String, value: String },
    File { name: String, upload: ImageUpload },
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(name: impl Into<String>, upload: ImageUpload) -> Self {
        Self::File {
            name: name.into(),
            upload,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::File { name, .. } => name,
        }
    }
}

/// Body of a streaming request.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Multipart(Vec<FormPart>),
}

/// A POST to `path` (relative to the configured base URL).
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    pub path: String,
    pub body: RequestBody,
}

/// Status and (optional) body of an opened stream.
pub struct StreamResponse {
    pub status: u16,
    /// `None` when the response has no readable body.
    pub body: Option<ByteStream>,
}

impl StreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Opens streaming requests. The reqwest implementation is
/// [`ReqwestTransport`]; tests and alternative stacks plug in their own.
#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, request: StreamRequest) -> Result<StreamResponse, TransportError>;
}

/// [`StreamTransport`] backed by a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl StreamTransport for ReqwestTransport {
    async fn open(&self, request: StreamRequest) -> Result<StreamResponse, TransportError> {
        let url = join_url(&self.base_url, &request.path);
        let builder = self
            .client
            .post(&url)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"));
        let builder = match request.body {
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Multipart(parts) => builder.multipart(build_multipart(parts)?),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::connect(e.to_string()))?;
        let status = response.status();
        debug!(
            event = "stream.response_received",
            domain = "stream",
            path = %request.path,
            status = status.as_u16(),
            content_length = ?response.content_length()
        );

        if status == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            return Ok(StreamResponse {
                status: status.as_u16(),
                body: None,
            });
        }
        let body = response
            .bytes_stream()
            .map_err(|e| TransportError::read(e.to_string()));
        Ok(StreamResponse {
            status: status.as_u16(),
            body: Some(Box::pin(body)),
        })
    }
}

pub(crate) fn build_multipart(
    parts: Vec<FormPart>,
) -> Result<reqwest::multipart::Form, TransportError> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name, value),
            FormPart::File { name, upload } => {
                let file = reqwest::multipart::Part::bytes(upload.bytes.to_vec())
                    .file_name(upload.file_name)
                    .mime_str(&upload.content_type)
                    .map_err(|e| {
                        TransportError::build(format!("invalid content type for {name}: {e}"))
                    })?;
                form.part(name, file)
            }
        };
    }
    Ok(form)
}
