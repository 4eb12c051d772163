//! Request parameters and response records exchanged with the image API.
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::ClientError;
use crate::transport::FormPart;

/// Longest prompt accepted by the API.
pub const MAX_PROMPT_CHARS: usize = 4000;
/// Largest image or mask upload accepted by the API (4 MiB).
pub const MAX_UPLOAD_BYTES: usize = 4 * 1024 * 1024;
/// The only upload content type the edit endpoints accept.
pub const PNG_CONTENT_TYPE: &str = "image/png";

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Output dimensions supported by the image model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageSize {
    #[default]
    #[serde(rename = "1024x1024")]
    Square,
    #[serde(rename = "1792x1024")]
    Landscape,
    #[serde(rename = "1024x1792")]
    Portrait,
}

impl ImageSize {
    pub const ALL: [ImageSize; 3] = [Self::Square, Self::Landscape, Self::Portrait];

    /// Wire value, e.g. `1024x1024`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1024x1024",
            Self::Landscape => "1792x1024",
            Self::Portrait => "1024x1792",
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|size| size.as_str() == s)
            .ok_or_else(|| {
                ClientError::validation(format!(
                    "invalid size '{s}'; valid values are: {}",
                    quoted_list(Self::ALL.iter().map(|v| v.as_str()))
                ))
            })
    }
}

/// Rendering quality hint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    #[default]
    Auto,
    Low,
    Medium,
    High,
}

impl ImageQuality {
    pub const ALL: [ImageQuality; 4] = [Self::Auto, Self::Low, Self::Medium, Self::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ImageQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageQuality {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|quality| quality.as_str() == s)
            .ok_or_else(|| {
                ClientError::validation(format!(
                    "invalid quality '{s}'; valid values are: {}",
                    quoted_list(Self::ALL.iter().map(|v| v.as_str()))
                ))
            })
    }
}

fn quoted_list<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values
        .map(|v| format!("'{v}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Checks a prompt the way the API does: 1..=4000 characters, not blank.
pub fn validate_prompt(prompt: &str) -> Result<(), ClientError> {
    if prompt.trim().is_empty() {
        return Err(ClientError::validation("prompt must not be empty"));
    }
    let chars = prompt.chars().count();
    if chars > MAX_PROMPT_CHARS {
        return Err(ClientError::validation(format!(
            "prompt is {chars} characters; the limit is {MAX_PROMPT_CHARS}"
        )));
    }
    Ok(())
}

/// Parameters for a text-to-image request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateImageRequest {
    pub prompt: String,
    #[serde(default)]
    pub size: ImageSize,
    #[serde(default)]
    pub quality: ImageQuality,
}

impl GenerateImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            size: ImageSize::default(),
            quality: ImageQuality::default(),
        }
    }

    pub fn size(mut self, size: ImageSize) -> Self {
        self.size = size;
        self
    }

    pub fn quality(mut self, quality: ImageQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        validate_prompt(&self.prompt)
    }

    pub(crate) fn json_body(&self) -> serde_json::Value {
        serde_json::json!({
            "prompt": self.prompt,
            "size": self.size.as_str(),
            "quality": self.quality.as_str(),
        })
    }
}

/// A binary file forwarded as a multipart field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl ImageUpload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Creates a PNG upload.
    pub fn png(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self::new(file_name, PNG_CONTENT_TYPE, bytes)
    }

    /// Reads a file from disk as a PNG upload named after the file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            ClientError::validation(format!("cannot read {}: {e}", path.display()))
        })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image.png")
            .to_string();
        Ok(Self::png(file_name, bytes))
    }

    /// Checks type, signature and size; `field` names the upload in messages.
    pub fn validate(&self, field: &str) -> Result<(), ClientError> {
        if self.content_type != PNG_CONTENT_TYPE {
            return Err(ClientError::validation(format!(
                "invalid {field} file type: {}; must be PNG",
                self.content_type
            )));
        }
        if !self.bytes.starts_with(&PNG_SIGNATURE) {
            return Err(ClientError::validation(format!(
                "{field} file '{}' is not a PNG image",
                self.file_name
            )));
        }
        if self.bytes.len() > MAX_UPLOAD_BYTES {
            return Err(ClientError::validation(format!(
                "{field} file size exceeds limit ({MAX_UPLOAD_BYTES} bytes)"
            )));
        }
        Ok(())
    }
}

/// Parameters for an image edit request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditImageRequest {
    pub prompt: String,
    pub image: ImageUpload,
    pub mask: Option<ImageUpload>,
    pub size: ImageSize,
    pub quality: ImageQuality,
}

impl EditImageRequest {
    pub fn new(prompt: impl Into<String>, image: ImageUpload) -> Self {
        Self {
            prompt: prompt.into(),
            image,
            mask: None,
            size: ImageSize::default(),
            quality: ImageQuality::default(),
        }
    }

    pub fn mask(mut self, mask: ImageUpload) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn size(mut self, size: ImageSize) -> Self {
        self.size = size;
        self
    }

    pub fn quality(mut self, quality: ImageQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        validate_prompt(&self.prompt)?;
        self.image.validate("image")?;
        if let Some(mask) = &self.mask {
            mask.validate("mask")?;
        }
        Ok(())
    }

    /// Multipart fields in wire order: prompt, image, size, quality, mask.
    pub(crate) fn form_parts(&self) -> Vec<FormPart> {
        let mut parts = vec![
            FormPart::text("prompt", &self.prompt),
            FormPart::file("image", self.image.clone()),
            FormPart::text("size", self.size.as_str()),
            FormPart::text("quality", self.quality.as_str()),
        ];
        if let Some(mask) = &self.mask {
            parts.push(FormPart::file("mask", mask.clone()));
        }
        parts
    }
}

/// Stored record describing one generated or edited image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub id: String,
    pub prompt: String,
    /// Free-form generation parameters as recorded by the server.
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    /// File name within the server's image storage.
    pub filename: String,
    /// Server timestamp, passed through as sent.
    #[serde(default)]
    pub timestamp: String,
}

/// Gallery ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            other => Err(ClientError::validation(format!(
                "invalid sort order '{other}'; valid values are: 'newest', 'oldest'"
            ))),
        }
    }
}

/// Pagination and ordering for the gallery listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListImagesQuery {
    /// Page size, 1..=100.
    pub limit: u32,
    pub offset: u32,
    pub sort: SortOrder,
}

impl Default for ListImagesQuery {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
            sort: SortOrder::default(),
        }
    }
}

impl ListImagesQuery {
    pub fn validate(&self) -> Result<(), ClientError> {
        if !(1..=100).contains(&self.limit) {
            return Err(ClientError::validation(format!(
                "limit must be between 1 and 100 (got {})",
                self.limit
            )));
        }
        Ok(())
    }

    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("limit", self.limit.to_string()),
            ("offset", self.offset.to_string()),
            ("sort", self.sort.as_str().to_string()),
        ]
    }
}

/// Response of the health endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub database: Option<String>,
}

impl HealthStatus {
    /// True when both the service and its database report `OK`.
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
            && self
                .database
                .as_deref()
                .is_none_or(|db| db.eq_ignore_ascii_case("ok"))
    }
}

/// Raw image bytes downloaded from the gallery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageFile {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}
