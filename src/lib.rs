//! Animated GIF decode sessions and pausable playback requests.
//!
//! [`decoder::DecodeSession`] owns one backend handle and one reusable frame
//! buffer for a loaded image. [`request::RequestTracker`] pauses, resumes,
//! clears and restarts a set of [`request::Request`]s together;
//! [`request::PlaybackRequest`] is the request that plays a GIF through a
//! decode session.

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod request;

pub use decoder::{DecodeSession, GifBackend, ImageGifBackend};
pub use error::{EncodeError, SessionError};
pub use request::{Request, RequestTracker};
