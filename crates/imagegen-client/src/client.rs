use std::sync::Arc;

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::model::{EditImageRequest, GenerateImageRequest};
use crate::rest::{ImagesApi, build_http_client};
use crate::run::{AbortHandle, EventSubscription, spawn_stream};
use crate::stream::StreamEvent;
use crate::transport::{ReqwestTransport, RequestBody, StreamRequest, StreamTransport};

pub const GENERATE_STREAM_PATH: &str = "/api/generate/stream";
pub const EDIT_STREAM_PATH: &str = "/api/edit/stream";

/// Entry point for streaming generation/edit and the REST endpoints.
///
/// ```no_run
/// use imagegen_client::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), ClientError> {
/// let studio = ImageStudio::new(ClientConfig::default())?;
/// let abort = studio.start_generation_stream(
///     &GenerateImageRequest::new("a lighthouse at dusk"),
///     |event| println!("{}", event.kind()),
/// );
/// abort.abort();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ImageStudio {
    config: ClientConfig,
    transport: Arc<dyn StreamTransport>,
    images: ImagesApi,
}

impl std::fmt::Debug for ImageStudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStudio")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ImageStudio {
    /// Builds the reqwest-backed client. One connection pool is shared by the
    /// streaming and REST calls.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = build_http_client(&config)?;
        let transport = Arc::new(ReqwestTransport::new(http.clone(), config.base_url.clone()));
        let images = ImagesApi::with_client(http, config.clone());
        Ok(Self {
            config,
            transport,
            images,
        })
    }

    /// Builds a client from `IMAGEGEN_*` environment variables.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Uses `transport` for streaming requests; REST calls still go through
    /// reqwest.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn StreamTransport>,
    ) -> Result<Self, ClientError> {
        let images = ImagesApi::new(config.clone())?;
        Ok(Self {
            config,
            transport,
            images,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// REST client over the same base URL.
    pub fn images(&self) -> &ImagesApi {
        &self.images
    }

    /// Streams a text-to-image generation.
    ///
    /// `on_event` is called once per decoded event, in stream order, from the
    /// runtime the call was made on. Failures arrive as exactly one
    /// [`StreamEvent::Error`]; nothing is delivered after
    /// [`AbortHandle::abort`].
    pub fn start_generation_stream<F>(
        &self,
        request: &GenerateImageRequest,
        on_event: F,
    ) -> AbortHandle
    where
        F: FnMut(StreamEvent) + Send + 'static,
    {
        spawn_stream(
            self.transport.clone(),
            generation_request(request),
            on_event,
        )
    }

    /// Streams an edit of `request.image`, optionally restricted by a mask.
    pub fn start_edit_stream<F>(&self, request: &EditImageRequest, on_event: F) -> AbortHandle
    where
        F: FnMut(StreamEvent) + Send + 'static,
    {
        spawn_stream(self.transport.clone(), edit_request(request), on_event)
    }

    /// Like [`start_generation_stream`](Self::start_generation_stream) but
    /// queues events for [`EventSubscription::next_event`].
    pub fn subscribe_generation(&self, request: &GenerateImageRequest) -> EventSubscription {
        EventSubscription::start(self.transport.clone(), generation_request(request))
    }

    pub fn subscribe_edit(&self, request: &EditImageRequest) -> EventSubscription {
        EventSubscription::start(self.transport.clone(), edit_request(request))
    }
}

fn generation_request(request: &GenerateImageRequest) -> StreamRequest {
    StreamRequest {
        path: GENERATE_STREAM_PATH.to_string(),
        body: RequestBody::Json(request.json_body()),
    }
}

fn edit_request(request: &EditImageRequest) -> StreamRequest {
    StreamRequest {
        path: EDIT_STREAM_PATH.to_string(),
        body: RequestBody::Multipart(request.form_parts()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{ImageQuality, ImageSize, ImageUpload};
    use crate::transport::FormPart;
    use crate::transport::fake::FakeTransport;

    fn studio(transport: Arc<FakeTransport>) -> ImageStudio {
        ImageStudio::with_transport(ClientConfig::default(), transport).expect("studio")
    }

    #[tokio::test]
    async fn generation_posts_json_to_stream_endpoint() {
        let transport = FakeTransport::ok(["data: {\"type\":\"progress\",\"data\":\"Starting\"}\n\n"]);
        let studio = studio(transport.clone());
        let request = GenerateImageRequest::new("a red fox")
            .size(ImageSize::Landscape)
            .quality(ImageQuality::High);
        let mut sub = studio.subscribe_generation(&request);
        assert_eq!(sub.next_event().await, Some(StreamEvent::progress("Starting")));
        assert_eq!(sub.next_event().await, None);

        let recorded = transport.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].path, GENERATE_STREAM_PATH);
        assert_eq!(
            recorded[0].body,
            RequestBody::Json(json!({"prompt": "a red fox", "size": "1792x1024", "quality": "high"}))
        );
    }

    #[tokio::test]
    async fn edit_posts_multipart_fields_in_order() {
        let transport = FakeTransport::ok(["data: {\"type\":\"image\",\"data\":\"QQ==\"}\n\n"]);
        let studio = studio(transport.clone());
        let image = ImageUpload::png("in.png", b"\x89PNG\r\n\x1a\nrest".to_vec());
        let mask = ImageUpload::png("mask.png", b"\x89PNG\r\n\x1a\nmask".to_vec());
        let request = EditImageRequest::new("add a hat", image.clone()).mask(mask.clone());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        studio.start_edit_stream(&request, move |event| {
            let _ = tx.send(event);
        });
        assert_eq!(rx.recv().await, Some(StreamEvent::image("QQ==")));
        assert_eq!(rx.recv().await, None);

        let recorded = transport.recorded();
        assert_eq!(recorded[0].path, EDIT_STREAM_PATH);
        assert_eq!(
            recorded[0].body,
            RequestBody::Multipart(vec![
                FormPart::text("prompt", "add a hat"),
                FormPart::file("image", image),
                FormPart::text("size", "1024x1024"),
                FormPart::text("quality", "auto"),
                FormPart::file("mask", mask),
            ])
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = ImageStudio::new(ClientConfig::new("localhost:8000")).expect_err("no scheme");
        assert!(matches!(err, ClientError::Config(_)));
    }
}
