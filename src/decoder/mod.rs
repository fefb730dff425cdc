pub mod backend;
pub mod session;

use std::num::NonZeroU64;
use std::path::Path;

pub use backend::{GifBackend, ImageGifBackend};
pub use session::DecodeSession;

/// Delay used when a frame reports no usable duration
pub const DEFAULT_FRAME_DELAY_MS: u32 = 100;

/// Opaque identifier of a decoding context owned by a backend.
/// Never zero; "no handle" is expressed as `Option<RawHandle>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RawHandle(pub NonZeroU64);

impl RawHandle {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// Metadata reported by a successful backend init
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
    pub handle: RawHandle,
}

/// Encoded input for [`DecodeSession::load`]
#[derive(Clone, Copy, Debug)]
pub enum Source<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

impl<'a> From<&'a Path> for Source<'a> {
    fn from(path: &'a Path) -> Self {
        Source::Path(path)
    }
}

impl<'a> From<&'a [u8]> for Source<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Source::Bytes(bytes)
    }
}
