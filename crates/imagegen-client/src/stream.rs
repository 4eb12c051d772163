use serde_json::{Map, Value};

use crate::model::ImageMetadata;

/// Extra payload fields carried through untouched.
pub type ExtraFields = Map<String, Value>;

/// Typed event decoded from one `data:` frame of a generation or edit stream.
///
/// The `type` tag selects the variant. Fields the variant does not name are
/// kept in `extra` so callers see the payload exactly as sent.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Status update with a free-form payload.
    Progress {
        #[serde(default, skip_serializing_if = "Value::is_null")]
        data: Value,
        #[serde(flatten)]
        extra: ExtraFields,
    },
    /// Base64 fragment of an in-progress preview.
    PartialImage {
        data: String,
        #[serde(flatten)]
        extra: ExtraFields,
    },
    /// Base64 of the finished image.
    Image {
        data: String,
        #[serde(flatten)]
        extra: ExtraFields,
    },
    /// Legacy terminal event with the stored record and optional image data.
    Complete {
        #[serde(default)]
        metadata: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_data: Option<String>,
        #[serde(flatten)]
        extra: ExtraFields,
    },
    /// Terminal failure, message shown to the user verbatim.
    Error {
        error: String,
        #[serde(flatten)]
        extra: ExtraFields,
    },
}

impl StreamEvent {
    pub fn progress(data: impl Into<Value>) -> Self {
        Self::Progress {
            data: data.into(),
            extra: ExtraFields::new(),
        }
    }

    pub fn partial_image(data: impl Into<String>) -> Self {
        Self::PartialImage {
            data: data.into(),
            extra: ExtraFields::new(),
        }
    }

    pub fn image(data: impl Into<String>) -> Self {
        Self::Image {
            data: data.into(),
            extra: ExtraFields::new(),
        }
    }

    pub fn complete(metadata: Option<Value>, image_data: Option<String>) -> Self {
        Self::Complete {
            metadata,
            image_data,
            extra: ExtraFields::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
            extra: ExtraFields::new(),
        }
    }

    /// Every wire tag this client decodes.
    pub const KINDS: [&'static str; 5] = ["progress", "partial_image", "image", "complete", "error"];

    /// Wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::PartialImage { .. } => "partial_image",
            Self::Image { .. } => "image",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// `image`, `complete` and `error` end a generation from the UI's point
    /// of view. The stream itself may still carry trailing frames.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Image { .. } | Self::Complete { .. } | Self::Error { .. }
        )
    }

    /// Base64 payload of the final image, if this event carries one.
    pub fn image_base64(&self) -> Option<&str> {
        match self {
            Self::Image { data, .. } => Some(data),
            Self::Complete {
                image_data: Some(data),
                ..
            } => Some(data),
            _ => None,
        }
    }

    /// `complete.metadata` as a full [`ImageMetadata`] record, when it has
    /// that shape.
    pub fn metadata_record(&self) -> Option<ImageMetadata> {
        match self {
            Self::Complete {
                metadata: Some(value),
                ..
            } => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }

    /// Extra fields not named by the variant.
    pub fn extra(&self) -> &ExtraFields {
        match self {
            Self::Progress { extra, .. }
            | Self::PartialImage { extra, .. }
            | Self::Image { extra, .. }
            | Self::Complete { extra, .. }
            | Self::Error { extra, .. } => extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> StreamEvent {
        serde_json::from_value(value).expect("event")
    }

    #[test]
    fn parses_progress_then_complete_payloads() {
        assert_eq!(
            parse(json!({"type": "progress", "data": "Starting"})),
            StreamEvent::progress("Starting")
        );
        assert_eq!(
            parse(json!({"type": "complete", "metadata": {"id": "1"}, "image_data": "abc"})),
            StreamEvent::complete(Some(json!({"id": "1"})), Some("abc".into()))
        );
    }

    #[test]
    fn progress_payload_stays_untyped() {
        let event = parse(json!({"type": "progress", "status": "queued"}));
        match &event {
            StreamEvent::Progress { data, extra } => {
                assert!(data.is_null());
                assert_eq!(extra.get("status"), Some(&json!("queued")));
            }
            other => panic!("unexpected event {other:?}"),
        }
        let event = parse(json!({"type": "progress", "data": {"step": 2, "of": 5}}));
        assert_eq!(event, StreamEvent::progress(json!({"step": 2, "of": 5})));
    }

    #[test]
    fn unknown_fields_are_carried_through() {
        let event = parse(json!({"type": "partial_image", "data": "AAA", "index": 1}));
        assert_eq!(event.kind(), "partial_image");
        assert_eq!(event.extra().get("index"), Some(&json!(1)));
        let back = serde_json::to_value(&event).expect("serialize");
        assert_eq!(back, json!({"type": "partial_image", "data": "AAA", "index": 1}));
    }

    #[test]
    fn unknown_tag_and_missing_fields_are_rejected() {
        assert!(serde_json::from_value::<StreamEvent>(json!({"type": "partial"})).is_err());
        assert!(serde_json::from_value::<StreamEvent>(json!({"type": "image"})).is_err());
        assert!(serde_json::from_value::<StreamEvent>(json!({"data": "x"})).is_err());
    }

    #[test]
    fn terminal_helpers() {
        assert!(!StreamEvent::progress("x").is_terminal());
        assert!(!StreamEvent::partial_image("x").is_terminal());
        assert!(StreamEvent::error("boom").is_terminal());
        assert_eq!(StreamEvent::image("QUJD").image_base64(), Some("QUJD"));
        assert_eq!(StreamEvent::complete(None, None).image_base64(), None);
    }

    #[test]
    fn metadata_record_requires_full_shape() {
        let partial = StreamEvent::complete(Some(json!({"id": "1"})), None);
        assert!(partial.metadata_record().is_none());

        let full = StreamEvent::complete(
            Some(json!({
                "id": "1",
                "prompt": "a lighthouse",
                "parameters": null,
                "filename": "1.png",
                "timestamp": "2025-01-01T00:00:00"
            })),
            None,
        );
        let record = full.metadata_record().expect("record");
        assert_eq!(record.filename, "1.png");
    }
}
