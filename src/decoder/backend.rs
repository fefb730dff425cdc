use super::{ImageInfo, RawHandle};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, Frame, ImageDecoder, ImageError, RgbaImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek};
use std::num::NonZeroU64;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// The file could not be opened or read
pub const ERR_IO: i32 = 1;
/// The data is not a decodable GIF
pub const ERR_MALFORMED: i32 = 2;
/// The GIF has no frames or a zero-sized canvas
pub const ERR_EMPTY: i32 = 3;
/// The handle is not known to the backend
pub const ERR_UNKNOWN_HANDLE: i32 = 4;

/// Handle-based decoding routine consumed by [`DecodeSession`](super::DecodeSession).
///
/// Init and release report failure as a non-zero error code. Per-frame
/// decode writes pixels into the caller's buffer and returns the frame delay
/// in milliseconds; a value `<= 0` means the frame carries no usable delay.
pub trait GifBackend: Send + Sync {
    fn init_by_path(&self, path: &Path) -> Result<ImageInfo, i32>;

    fn init_by_bytes(&self, bytes: &[u8]) -> Result<ImageInfo, i32>;

    fn decode_frame_into(&self, index: usize, buffer: &mut RgbaImage, handle: RawHandle) -> i32;

    fn release_handle(&self, handle: RawHandle) -> Result<(), i32>;
}

/// In-process backend built on the `image` crate's GIF decoder.
///
/// All frames are decoded and composited to the full canvas at init time,
/// so per-frame decode is a copy into the session's buffer.
pub struct ImageGifBackend {
    images: Mutex<HashMap<u64, Vec<Frame>>>,
    next_handle: AtomicU64,
}

impl Default for ImageGifBackend {
    fn default() -> Self {
        Self {
            images: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }
}

impl ImageGifBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles currently held
    pub fn live_handles(&self) -> usize {
        self.images.lock().len()
    }

    fn register<R: BufRead + Seek>(&self, reader: R) -> Result<ImageInfo, i32> {
        let start = Instant::now();

        let decoder = GifDecoder::new(reader).map_err(error_code)?;
        let (width, height) = decoder.dimensions();
        let frames = decoder.into_frames().collect_frames().map_err(error_code)?;

        if frames.is_empty() || width == 0 || height == 0 {
            log::warn!("Rejecting GIF: {}x{}, {} frames", width, height, frames.len());
            return Err(ERR_EMPTY);
        }

        let frame_count = frames.len();
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let handle = RawHandle(NonZeroU64::new(id).ok_or(ERR_UNKNOWN_HANDLE)?);
        self.images.lock().insert(id, frames);

        log::info!(
            "Decoded GIF {}x{} with {} frames in {:?} (handle {})",
            width,
            height,
            frame_count,
            start.elapsed(),
            id
        );

        Ok(ImageInfo {
            frame_count,
            width,
            height,
            handle,
        })
    }
}

impl GifBackend for ImageGifBackend {
    fn init_by_path(&self, path: &Path) -> Result<ImageInfo, i32> {
        log::info!("Opening GIF file: {:?}", path);
        let file = File::open(path).map_err(|e| {
            log::error!("Failed to open {:?}: {}", path, e);
            ERR_IO
        })?;
        self.register(BufReader::new(file))
    }

    fn init_by_bytes(&self, bytes: &[u8]) -> Result<ImageInfo, i32> {
        log::info!("Opening GIF from {} bytes", bytes.len());
        self.register(Cursor::new(bytes))
    }

    fn decode_frame_into(&self, index: usize, buffer: &mut RgbaImage, handle: RawHandle) -> i32 {
        let images = self.images.lock();
        let Some(frame) = images.get(&handle.get()).and_then(|frames| frames.get(index)) else {
            log::warn!("No frame {} for handle {}", index, handle.get());
            return -1;
        };

        let pixels = frame.buffer();
        if pixels.dimensions() != buffer.dimensions() {
            log::warn!(
                "Buffer is {:?}, frame {} is {:?}",
                buffer.dimensions(),
                index,
                pixels.dimensions()
            );
            return -1;
        }

        let dst: &mut [u8] = buffer;
        dst.copy_from_slice(pixels);

        let (numer, denom) = frame.delay().numer_denom_ms();
        i32::try_from(numer / denom.max(1)).unwrap_or(i32::MAX)
    }

    fn release_handle(&self, handle: RawHandle) -> Result<(), i32> {
        match self.images.lock().remove(&handle.get()) {
            Some(_) => {
                log::debug!("Released handle {}", handle.get());
                Ok(())
            }
            None => Err(ERR_UNKNOWN_HANDLE),
        }
    }
}

fn error_code(err: ImageError) -> i32 {
    log::error!("GIF decode failed: {}", err);
    match err {
        ImageError::IoError(_) => ERR_IO,
        _ => ERR_MALFORMED,
    }
}

/// Encode solid-colour frames into an in-memory GIF
#[cfg(test)]
pub(crate) fn encode_test_gif(width: u32, height: u32, frames: &[([u8; 4], u32)]) -> Vec<u8> {
    use image::codecs::gif::{GifEncoder, Repeat};
    use image::{Delay, Rgba};

    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        encoder.set_repeat(Repeat::Infinite).unwrap();
        for &(color, delay_ms) in frames {
            let pixels = RgbaImage::from_pixel(width, height, Rgba(color));
            let delay = Delay::from_numer_denom_ms(delay_ms, 1);
            encoder.encode_frame(Frame::from_parts(pixels, 0, 0, delay)).unwrap();
        }
    }
    bytes
}
