//! Async client for an image generation service that streams progress,
//! partial previews and the final image over Server-Sent Events.
//!
//! # Streaming a generation
//!
//! ```no_run
//! use imagegen_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let studio = ImageStudio::from_env()?;
//! let mut events = studio.subscribe_generation(
//!     &GenerateImageRequest::new("a lighthouse at dusk").quality(ImageQuality::High),
//! );
//! while let Some(event) = events.next_event().await {
//!     if let StreamEvent::Error { error, .. } = &event {
//!         eprintln!("{error}");
//!     }
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Streaming client entry point.
pub mod client;
/// Client configuration and environment loading.
pub mod config;
/// Public error types.
pub mod errors;
/// Request parameters, validation and response records.
pub mod model;
/// Logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// REST client for gallery, health and one-shot requests.
pub mod rest;
/// Retry policy for REST calls.
pub mod retry;
/// Stream task, abort handle and subscription.
pub mod run;
mod sse;
/// Typed stream events.
pub mod stream;
/// Transport seam for streaming requests.
pub mod transport;

pub use client::{EDIT_STREAM_PATH, GENERATE_STREAM_PATH, ImageStudio};
pub use config::ClientConfig;
pub use errors::{ClientError, StreamError, TransportError};
pub use model::{
    EditImageRequest, GenerateImageRequest, HealthStatus, ImageFile, ImageMetadata, ImageQuality,
    ImageSize, ImageUpload, ListImagesQuery, SortOrder,
};
pub use observability::init_observability;
pub use rest::ImagesApi;
pub use retry::RetryPolicy;
pub use run::{AbortHandle, EventSubscription};
pub use stream::StreamEvent;
pub use transport::{
    ByteStream, FormPart, RequestBody, ReqwestTransport, StreamRequest, StreamResponse,
    StreamTransport,
};
