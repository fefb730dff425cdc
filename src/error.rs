//! Error types for decode and encode sessions.
//!
//! Request tracking never fails on its own; failures of individual requests
//! are observed through their status.

use thiserror::Error;

/// Errors raised by a [`DecodeSession`](crate::decoder::DecodeSession).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("decoder init failed with code {code}")]
    LoadFailure { code: i32 },

    #[error("frame index {index} out of range for {frame_count} frame(s)")]
    OutOfRange { index: i64, frame_count: usize },

    #[error("no image loaded")]
    NotLoaded,

    /// Only surfaced by `try_recycle`; `recycle` treats it as fatal.
    #[error("decoder release failed with code {code}")]
    ReleaseFailure { code: i32 },
}

/// Errors raised by an [`EncodeSession`](crate::encoder::EncodeSession).
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("invalid output dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("frame is {actual_width}x{actual_height}, session expects {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("encode session already closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GIF encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_display() {
        let err = SessionError::OutOfRange {
            index: -1,
            frame_count: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("-1"));
        assert!(msg.contains("3 frame"));
    }

    #[test]
    fn load_failure_display() {
        let err = SessionError::LoadFailure { code: 2 };
        assert_eq!(err.to_string(), "decoder init failed with code 2");
    }

    #[test]
    fn encode_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = EncodeError::from(io_err);
        assert!(err.to_string().contains("read-only"));
    }
}
