//! Animated GIF writer session.
//!
//! Mirrors the decode side: one session owns one output file and writer,
//! frames are appended in order, and the file is finished on `close` or drop.
//!
//! Frames are encoded into memory and the whole GIF hits the disk in `close`,
//! so write failures surface there instead of vanishing in the encoder's drop.

use crate::error::EncodeError;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, RgbaImage};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Palette quantization effort
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EncodeQuality {
    Fast,
    #[default]
    Balanced,
    Best,
}

impl EncodeQuality {
    /// NeuQuant sampling speed, 1 (best) to 30 (fastest)
    fn speed(self) -> i32 {
        match self {
            EncodeQuality::Fast => 30,
            EncodeQuality::Balanced => 10,
            EncodeQuality::Best => 1,
        }
    }
}

/// Encoder output kept reachable after the encoder itself is dropped
#[derive(Clone, Default)]
struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct EncodeSession {
    encoder: Option<GifEncoder<OutputBuffer>>,
    output: OutputBuffer,
    path: PathBuf,
    width: u32,
    height: u32,
    frames_written: u64,
}

impl EncodeSession {
    /// Create `path` and prepare an infinitely looping GIF of the given size
    pub fn create(
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        quality: EncodeQuality,
    ) -> Result<Self, EncodeError> {
        if width == 0 || height == 0 || width > u32::from(u16::MAX) || height > u32::from(u16::MAX) {
            return Err(EncodeError::InvalidDimensions { width, height });
        }

        let path = path.as_ref().to_path_buf();
        // Fail early on an unwritable path; the content is written on close
        File::create(&path)?;
        let output = OutputBuffer::default();
        let mut encoder = GifEncoder::new_with_speed(output.clone(), quality.speed());
        encoder.set_repeat(Repeat::Infinite)?;

        log::info!(
            "Encoding {}x{} GIF to {:?} ({:?})",
            width,
            height,
            path,
            quality
        );

        Ok(Self {
            encoder: Some(encoder),
            output,
            path,
            width,
            height,
            frames_written: 0,
        })
    }

    pub fn encode_frame(&mut self, pixels: &RgbaImage, delay_ms: u32) -> Result<(), EncodeError> {
        let encoder = self.encoder.as_mut().ok_or(EncodeError::Closed)?;

        let (actual_width, actual_height) = pixels.dimensions();
        if (actual_width, actual_height) != (self.width, self.height) {
            return Err(EncodeError::DimensionMismatch {
                width: self.width,
                height: self.height,
                actual_width,
                actual_height,
            });
        }

        let delay = Delay::from_numer_denom_ms(delay_ms, 1);
        encoder.encode_frame(Frame::from_parts(pixels.clone(), 0, 0, delay))?;
        self.frames_written += 1;
        log::debug!("Encoded frame {} ({}ms)", self.frames_written, delay_ms);
        Ok(())
    }

    /// Finish the GIF and write it to the output path.
    ///
    /// Later calls return `Ok(())` without touching the file. After a failed
    /// write the session is still closed; the encoded bytes are lost.
    pub fn close(&mut self) -> Result<(), EncodeError> {
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };
        // Dropping the encoder appends the trailer
        drop(encoder);

        let bytes = self.output.take();
        std::fs::write(&self.path, &bytes)?;
        log::info!(
            "Wrote {} frames ({} bytes) to {:?}",
            self.frames_written,
            bytes.len(),
            self.path
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.encoder.is_none()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EncodeSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to write {:?} on drop: {}", self.path, e);
        }
    }
}
