//! Per-source adapters for the registration workflow
//!
//! An adapter knows how to recognise an external id of its service. The
//! workflow itself is identical for every source.

use crate::models::VideoSourceKind;

/// External id that does not match the source's format
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} id: {raw:?}")]
pub struct InvalidSourceId {
    pub kind: VideoSourceKind,
    pub raw: String,
}

/// Validation of external ids for one video service
pub trait SourceAdapter: Send + Sync + 'static {
    const SOURCE: VideoSourceKind;

    /// Normalized external id, or why it is not one
    fn validate_external_id(&self, raw: &str) -> Result<String, InvalidSourceId>;

    /// Public page of the video on its service
    fn watch_url(&self, source_id: &str) -> String;

    fn invalid(&self, raw: &str) -> InvalidSourceId {
        InvalidSourceId {
            kind: Self::SOURCE,
            raw: raw.to_string(),
        }
    }
}

/// `sm`/`nm`/`so` followed by digits
#[derive(Debug, Clone, Copy, Default)]
pub struct Nicovideo;

/// 11 characters of `[A-Za-z0-9_-]`
#[derive(Debug, Clone, Copy, Default)]
pub struct Youtube;

/// Numeric track id
#[derive(Debug, Clone, Copy, Default)]
pub struct Soundcloud;

/// `BV` followed by 10 alphanumerics
#[derive(Debug, Clone, Copy, Default)]
pub struct Bilibili;

impl SourceAdapter for Nicovideo {
    const SOURCE: VideoSourceKind = VideoSourceKind::Nicovideo;

    fn validate_external_id(&self, raw: &str) -> Result<String, InvalidSourceId> {
        let id = raw.trim();
        let digits = ["sm", "nm", "so"]
            .iter()
            .find_map(|prefix| id.strip_prefix(prefix))
            .ok_or_else(|| self.invalid(raw))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(self.invalid(raw));
        }
        Ok(id.to_string())
    }

    fn watch_url(&self, source_id: &str) -> String {
        format!("https://www.nicovideo.jp/watch/{source_id}")
    }
}

impl SourceAdapter for Youtube {
    const SOURCE: VideoSourceKind = VideoSourceKind::Youtube;

    fn validate_external_id(&self, raw: &str) -> Result<String, InvalidSourceId> {
        let id = raw.trim();
        let valid = id.len() == 11
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(self.invalid(raw));
        }
        Ok(id.to_string())
    }

    fn watch_url(&self, source_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={source_id}")
    }
}

impl SourceAdapter for Soundcloud {
    const SOURCE: VideoSourceKind = VideoSourceKind::Soundcloud;

    fn validate_external_id(&self, raw: &str) -> Result<String, InvalidSourceId> {
        let id = raw.trim();
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(self.invalid(raw));
        }
        Ok(id.to_string())
    }

    fn watch_url(&self, source_id: &str) -> String {
        format!("https://api.soundcloud.com/tracks/{source_id}")
    }
}

impl SourceAdapter for Bilibili {
    const SOURCE: VideoSourceKind = VideoSourceKind::Bilibili;

    fn validate_external_id(&self, raw: &str) -> Result<String, InvalidSourceId> {
        let id = raw.trim();
        let rest = id.strip_prefix("BV").ok_or_else(|| self.invalid(raw))?;
        if rest.len() != 10 || !rest.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(self.invalid(raw));
        }
        Ok(id.to_string())
    }

    fn watch_url(&self, source_id: &str) -> String {
        format!("https://www.bilibili.com/video/{source_id}")
    }
}
