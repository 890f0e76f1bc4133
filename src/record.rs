//! Per-image unit of work and result.

use crate::mime::detect_image_mime;
use crate::protocol::DispatchOutcome;
use serde::Serialize;
use uuid::Uuid;

/// Message stored on records whose source could not be reached.
pub const UNAVAILABLE_MESSAGE: &str = "source unavailable";

/// One image of a batch: identity and classification are fixed at creation,
/// the result fields are filled in by dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRecord {
    id: String,
    source: String,
    is_remote: bool,
    task: String,
    destination: Option<String>,
    src_size: u64,
    dst_size: u64,
    percent: f64,
    error: Option<String>,
    #[serde(skip)]
    src_binary: Option<Vec<u8>>,
    #[serde(skip)]
    dst_binary: Option<Vec<u8>>,
}

impl ImageRecord {
    /// New pending record; remote when `source` starts with `http`.
    pub fn new(source: impl Into<String>, task: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            id: Uuid::new_v4().simple().to_string(),
            is_remote: source.starts_with("http"),
            source,
            task: task.into(),
            destination: None,
            src_size: 0,
            dst_size: 0,
            percent: 0.0,
            error: None,
            src_binary: None,
            dst_binary: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Optimized image url, percent-decoded. Set only on success.
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn src_size(&self) -> u64 {
        self.src_size
    }

    pub fn dst_size(&self) -> u64 {
        self.dst_size
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    /// Bytes saved by the optimization.
    pub fn savings(&self) -> u64 {
        self.src_size.saturating_sub(self.dst_size)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Source bytes, fetched only in binary mode.
    pub fn src_binary(&self) -> Option<&[u8]> {
        self.src_binary.as_deref()
    }

    pub fn dst_binary(&self) -> Option<&[u8]> {
        self.dst_binary.as_deref()
    }

    pub fn src_mime_type(&self) -> Option<&'static str> {
        self.src_binary().and_then(detect_image_mime)
    }

    pub fn dst_mime_type(&self) -> Option<&'static str> {
        self.dst_binary().and_then(detect_image_mime)
    }

    pub(crate) fn set_error(&mut self, error: impl Into<String>) {
        self.destination = None;
        self.error = Some(error.into());
    }

    pub(crate) fn set_src_binary(&mut self, bytes: Vec<u8>) {
        self.src_binary = Some(bytes);
    }

    pub(crate) fn set_dst_binary(&mut self, bytes: Vec<u8>) {
        self.dst_binary = Some(bytes);
    }

    /// Record the result of a dispatch. Exactly one of `destination` and
    /// `error` is set afterwards.
    pub(crate) fn apply(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Success(optimized) => {
                self.error = None;
                self.destination = Some(optimized.destination);
                self.dst_size = optimized.dst_size;
                self.percent = optimized.percent;
                self.src_size = optimized.src_size;
            }
            DispatchOutcome::RecordError(error) => self.set_error(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Optimized;

    #[test]
    fn test_classification_by_prefix() {
        assert!(ImageRecord::new("http://example.com/a.png", "t").is_remote());
        assert!(ImageRecord::new("https://example.com/a.png", "t").is_remote());
        assert!(!ImageRecord::new("/var/images/a.png", "t").is_remote());
        assert!(!ImageRecord::new("images/http.png", "t").is_remote());
    }

    #[test]
    fn test_new_record_defaults() {
        let record = ImageRecord::new("a.png", "task-1");
        assert_eq!(record.task(), "task-1");
        assert_eq!(record.source(), "a.png");
        assert_eq!(record.destination(), None);
        assert_eq!(record.src_size(), 0);
        assert_eq!(record.dst_size(), 0);
        assert_eq!(record.percent(), 0.0);
        assert!(!record.has_error());
        assert!(record.src_binary().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = ImageRecord::new("a.png", "t");
        let b = ImageRecord::new("a.png", "t");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_apply_success_then_savings() {
        let mut record = ImageRecord::new("a.png", "t");
        record.apply(DispatchOutcome::Success(Optimized {
            destination: "http://cdn/a.png".to_string(),
            dst_size: 700,
            percent: 30.0,
            src_size: 1000,
        }));

        assert_eq!(record.destination(), Some("http://cdn/a.png"));
        assert_eq!(record.savings(), 300);
        assert!(!record.has_error());
    }

    #[test]
    fn test_apply_error_clears_destination() {
        let mut record = ImageRecord::new("a.png", "t");
        record.apply(DispatchOutcome::RecordError("too large".to_string()));

        assert_eq!(record.error(), Some("too large"));
        assert_eq!(record.destination(), None);
    }

    #[test]
    fn test_mime_types_from_binaries() {
        let mut record = ImageRecord::new("a.png", "t");
        assert_eq!(record.src_mime_type(), None);

        record.set_src_binary(vec![0x89, 0x50, 0x4E, 0x47]);
        record.set_dst_binary(vec![0xFF, 0xD8, 0xFF, 0xE0]);
        assert_eq!(record.src_mime_type(), Some("image/png"));
        assert_eq!(record.dst_mime_type(), Some("image/jpeg"));
    }

    #[test]
    fn test_serialization_skips_binaries() {
        let mut record = ImageRecord::new("a.png", "t");
        record.set_src_binary(vec![1, 2, 3]);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["source"], "a.png");
        assert!(json.get("src_binary").is_none());
    }
}
