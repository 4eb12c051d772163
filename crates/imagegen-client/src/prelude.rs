//! Common imports for streaming and gallery usage.
pub use crate::{
    AbortHandle, ClientConfig, ClientError, EditImageRequest, EventSubscription,
    GenerateImageRequest, ImageMetadata, ImageQuality, ImageSize, ImageStudio, ImageUpload,
    ImagesApi, ListImagesQuery, StreamEvent,
};
