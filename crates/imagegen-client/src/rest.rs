//! Request/response client for the non-streaming image endpoints.
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::model::{
    EditImageRequest, GenerateImageRequest, HealthStatus, ImageFile, ImageMetadata,
    ListImagesQuery,
};
use crate::transport::build_multipart;

pub const HEALTH_PATH: &str = "/health";
pub const IMAGES_PATH: &str = "/api/images/";
pub const GENERATE_PATH: &str = "/api/generate/";
pub const EDIT_PATH: &str = "/api/edit/";

/// Client for gallery, health and one-shot generate/edit calls.
///
/// GETs are retried on transport errors and 5xx responses according to the
/// configured [`RetryPolicy`](crate::retry::RetryPolicy). POSTs are sent once.
#[derive(Clone, Debug)]
pub struct ImagesApi {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ImagesApi {
    /// Builds a client with its own connection pool.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = build_http_client(&config)?;
        Ok(Self { http, config })
    }

    pub(crate) fn with_client(http: reqwest::Client, config: ClientConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `GET /health`.
    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        let response = self.get_with_retry(HEALTH_PATH, &[]).await?;
        decode_json(response).await
    }

    /// One page of stored image records.
    pub async fn list(&self, query: &ListImagesQuery) -> Result<Vec<ImageMetadata>, ClientError> {
        query.validate()?;
        let response = self
            .get_with_retry(IMAGES_PATH, &query.query_pairs())
            .await?;
        decode_json(response).await
    }

    /// Image bytes for a stored record.
    pub async fn file_by_id(&self, id: &str) -> Result<ImageFile, ClientError> {
        let id = path_segment("image id", id)?;
        let response = self
            .get_with_retry(&format!("{IMAGES_PATH}{id}"), &[])
            .await?;
        read_file(response).await
    }

    /// Image bytes by storage file name.
    pub async fn file_by_name(&self, filename: &str) -> Result<ImageFile, ClientError> {
        let filename = path_segment("filename", filename)?;
        let response = self
            .get_with_retry(&format!("{IMAGES_PATH}file/{filename}"), &[])
            .await?;
        read_file(response).await
    }

    /// Non-streaming generation; returns the stored record.
    pub async fn generate(
        &self,
        request: &GenerateImageRequest,
    ) -> Result<ImageMetadata, ClientError> {
        request.validate()?;
        let url = self.config.url(GENERATE_PATH);
        debug!(
            event = "images.post",
            domain = "images",
            path = GENERATE_PATH,
            prompt_chars = request.prompt.chars().count() as u64
        );
        let response = self
            .http
            .post(&url)
            .timeout(self.config.request_timeout)
            .json(&request.json_body())
            .send()
            .await
            .map_err(send_error)?;
        decode_json(check_status(response).await?).await
    }

    /// Non-streaming edit; returns the stored record.
    pub async fn edit(&self, request: &EditImageRequest) -> Result<ImageMetadata, ClientError> {
        request.validate()?;
        let form = build_multipart(request.form_parts())?;
        let url = self.config.url(EDIT_PATH);
        debug!(
            event = "images.post",
            domain = "images",
            path = EDIT_PATH,
            has_mask = request.mask.is_some()
        );
        let response = self
            .http
            .post(&url)
            .timeout(self.config.request_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(send_error)?;
        decode_json(check_status(response).await?).await
    }

    async fn get_with_retry(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> Result<reqwest::Response, ClientError> {
        let url = self.config.url(path);
        let policy = &self.config.retry;
        let mut retries_done = 0u32;
        loop {
            let attempt = retries_done + 1;
            debug!(
                event = "images.request_attempt",
                domain = "images",
                path = path,
                attempt = attempt
            );
            let result = match self
                .http
                .get(&url)
                .query(query)
                .timeout(self.config.request_timeout)
                .send()
                .await
            {
                Ok(response) => check_status(response).await,
                Err(err) => Err(send_error(err)),
            };
            let err = match result {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            let retry = policy.should_retry(&err, retries_done);
            debug!(
                event = "images.request_failed",
                domain = "images",
                path = path,
                attempt = attempt,
                retry = retry,
                status = ?err.status(),
                error = %err
            );
            if !retry {
                return Err(err);
            }
            let backoff = policy.backoff_duration(retries_done);
            info!(
                event = "images.retry_scheduled",
                domain = "images",
                path = path,
                next_attempt = attempt + 1,
                backoff_ms = backoff.as_millis() as u64
            );
            tokio::time::sleep(backoff).await;
            retries_done += 1;
        }
    }
}

pub(crate) fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .user_agent(concat!("imagegen-client/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ClientError::Config(format!("cannot build HTTP client: {e}")))
}

fn send_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Transport(format!("request timed out: {err}"))
    } else {
        ClientError::Transport(err.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Http {
        status: status.as_u16(),
        detail: error_detail(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string()),
    })
}

/// Message from a FastAPI-style `{"detail": ...}` body, or the raw body.
fn error_detail(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => match map.get("detail") {
            Some(serde_json::Value::String(detail)) => Some(detail.clone()),
            Some(other) => Some(other.to_string()),
            None => Some(body.to_string()),
        },
        _ => Some(body.to_string()),
    }
}

async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let bytes = response.bytes().await.map_err(send_error)?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

async fn read_file(response: reqwest::Response) -> Result<ImageFile, ClientError> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response.bytes().await.map_err(send_error)?;
    Ok(ImageFile {
        content_type,
        bytes,
    })
}

fn path_segment<'a>(what: &str, value: &'a str) -> Result<&'a str, ClientError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ClientError::validation(format!("{what} must not be empty")));
    }
    if value.contains(['/', '\\', '?', '#']) || value == ".." {
        return Err(ClientError::validation(format!("invalid {what} '{value}'")));
    }
    Ok(value)
}
