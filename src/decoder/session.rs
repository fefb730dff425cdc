use super::{GifBackend, ImageGifBackend, RawHandle, Source, DEFAULT_FRAME_DELAY_MS};
use crate::error::SessionError;
use image::RgbaImage;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// One loaded multi-frame image: a backend handle plus a reusable RGBA buffer.
///
/// The handle and buffer are owned exclusively by the session. The buffer is
/// overwritten in place by every decode, so anything borrowed from
/// [`buffer`](Self::buffer) is only meaningful until the next `decode_*` or
/// [`recycle`](Self::recycle) call; the borrow checker enforces this for
/// in-process callers.
///
/// Dropping a session releases its handle. A backend that refuses the release
/// is treated as fatal.
pub struct DecodeSession<B: GifBackend = ImageGifBackend> {
    backend: Arc<B>,
    handle: Option<RawHandle>,
    buffer: Option<RgbaImage>,
    frame_count: usize,
    width: u32,
    height: u32,
    /// `None` until a frame has been decoded since load/recycle/prepare
    current_index: Option<usize>,
    current_delay_ms: u32,
}

impl<B: GifBackend> std::fmt::Debug for DecodeSession<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeSession")
            .field("handle", &self.handle.map(RawHandle::get))
            .field("frame_count", &self.frame_count)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("current_index", &self.current_index)
            .field("current_delay_ms", &self.current_delay_ms)
            .finish()
    }
}

impl<B: GifBackend> DecodeSession<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            handle: None,
            buffer: None,
            frame_count: 0,
            width: 0,
            height: 0,
            current_index: None,
            current_delay_ms: 0,
        }
    }

    /// Load an image, releasing whatever this session held before.
    ///
    /// On failure the session stays released and only the error is meaningful.
    pub fn load<'a>(&mut self, source: impl Into<Source<'a>>) -> Result<(), SessionError> {
        self.recycle();

        let result = match source.into() {
            Source::Path(path) => self.backend.init_by_path(path),
            Source::Bytes(bytes) => self.backend.init_by_bytes(bytes),
        };

        let info = match result {
            Ok(info) => info,
            Err(code) => {
                log::warn!("Decoder init failed with code {}", code);
                self.frame_count = 0;
                self.width = 0;
                self.height = 0;
                return Err(SessionError::LoadFailure { code });
            }
        };

        self.frame_count = info.frame_count;
        self.width = info.width;
        self.height = info.height;
        self.buffer = Some(RgbaImage::new(info.width, info.height));
        self.handle = Some(info.handle);

        log::info!(
            "Loaded {}x{} image with {} frames (handle {})",
            info.width,
            info.height,
            info.frame_count,
            info.handle.get()
        );
        Ok(())
    }

    pub fn load_path(&mut self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        self.load(Source::Path(path.as_ref()))
    }

    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.load(Source::Bytes(bytes))
    }

    /// Decode frame `index` into the buffer and return the backend's raw
    /// delay, which may be a non-positive "no delay" value.
    pub fn decode_frame(&mut self, index: usize) -> Result<i32, SessionError> {
        self.decode_at(i64::try_from(index).unwrap_or(i64::MAX))
    }

    pub fn decode_first_frame(&mut self) -> Result<i32, SessionError> {
        self.decode_at(0)
    }

    /// Re-decode the current frame; fails after [`prepare_decode`](Self::prepare_decode)
    pub fn decode_current_frame(&mut self) -> Result<i32, SessionError> {
        self.decode_at(self.position())
    }

    /// Advance one frame, wrapping to 0 after the last
    pub fn next_frame(&mut self) -> Result<i32, SessionError> {
        let index = self.wrapped(self.position() + 1)?;
        self.decode_at(index)
    }

    /// Step back one frame, wrapping to the last frame before 0.
    ///
    /// Unpositioned counts as index -1, so this lands on `frame_count - 2`
    /// (or 0 for a single frame). Use
    /// [`decode_first_frame`](Self::decode_first_frame) to position first.
    pub fn previous_frame(&mut self) -> Result<i32, SessionError> {
        let index = self.wrapped(self.position() - 1)?;
        self.decode_at(index)
    }

    /// Forget the current position without releasing anything.
    /// Follow with [`decode_first_frame`](Self::decode_first_frame).
    pub fn prepare_decode(&mut self) {
        self.current_index = None;
    }

    /// Release the handle and buffer. No-op when already released.
    ///
    /// # Panics
    /// If the backend fails to release the handle; the external state can no
    /// longer be trusted at that point.
    pub fn recycle(&mut self) {
        if let Err(err) = self.try_recycle() {
            panic!("{}", err);
        }
    }

    /// Like [`recycle`](Self::recycle), but reports a failed release instead
    /// of panicking. The session keeps its handle in that case.
    pub fn try_recycle(&mut self) -> Result<(), SessionError> {
        if let Some(handle) = self.handle {
            self.backend.release_handle(handle).map_err(|code| {
                log::error!("Releasing handle {} failed with code {}", handle.get(), code);
                SessionError::ReleaseFailure { code }
            })?;
            log::info!("Recycled decode session (handle {})", handle.get());
        }

        self.handle = None;
        self.buffer = None;
        self.current_index = None;
        self.current_delay_ms = 0;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<RawHandle> {
        self.handle
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current_delay_ms(&self) -> u32 {
        self.current_delay_ms
    }

    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.current_delay_ms))
    }

    /// Pixels of the last decoded frame
    pub fn buffer(&self) -> Option<&RgbaImage> {
        self.buffer.as_ref()
    }

    /// Current index with "not positioned" as -1
    fn position(&self) -> i64 {
        self.current_index
            .and_then(|i| i64::try_from(i).ok())
            .unwrap_or(-1)
    }

    fn wrapped(&self, index: i64) -> Result<i64, SessionError> {
        match i64::try_from(self.frame_count) {
            Ok(count) if count > 0 => Ok(index.rem_euclid(count)),
            _ => Err(SessionError::OutOfRange {
                index,
                frame_count: self.frame_count,
            }),
        }
    }

    fn decode_at(&mut self, index: i64) -> Result<i32, SessionError> {
        let frame_count = self.frame_count;
        let Some(slot) = usize::try_from(index).ok().filter(|&i| i < frame_count) else {
            return Err(SessionError::OutOfRange { index, frame_count });
        };
        let (Some(buffer), Some(handle)) = (self.buffer.as_mut(), self.handle) else {
            return Err(SessionError::NotLoaded);
        };

        let delay = self.backend.decode_frame_into(slot, buffer, handle);
        self.current_delay_ms = match u32::try_from(delay) {
            Ok(ms) if ms > 0 => ms,
            _ => DEFAULT_FRAME_DELAY_MS,
        };
        self.current_index = Some(slot);

        log::debug!(
            "Decoded frame {}/{} (raw delay {}, using {}ms)",
            slot + 1,
            frame_count,
            delay,
            self.current_delay_ms
        );
        Ok(delay)
    }
}

impl DecodeSession<ImageGifBackend> {
    /// Session with its own private [`ImageGifBackend`]
    pub fn with_default_backend() -> Self {
        Self::new(Arc::new(ImageGifBackend::new()))
    }
}

impl<B: GifBackend> Drop for DecodeSession<B> {
    fn drop(&mut self) {
        if let Err(err) = self.try_recycle() {
            log::error!("Decode session dropped with unreleasable handle: {}", err);
            if !std::thread::panicking() {
                panic!("{}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::backend::encode_test_gif;
    use crate::decoder::ImageInfo;
    use parking_lot::Mutex;
    use std::num::NonZeroU64;

    #[derive(Default)]
    struct FakeState {
        next_handle: u64,
        live: Vec<u64>,
        max_live: usize,
        inits: usize,
        releases: usize,
        init_error: Option<i32>,
        release_error: Option<i32>,
        decoded: Vec<usize>,
    }

    /// Backend that fabricates handles and tracks how many are alive at once
    struct FakeBackend {
        frame_count: usize,
        width: u32,
        height: u32,
        delays: Vec<i32>,
        state: Mutex<FakeState>,
    }

    impl FakeBackend {
        fn new(frame_count: usize, delays: Vec<i32>) -> Arc<Self> {
            Arc::new(Self {
                frame_count,
                width: 4,
                height: 3,
                delays,
                state: Mutex::new(FakeState::default()),
            })
        }

        fn init(&self) -> Result<ImageInfo, i32> {
            let mut state = self.state.lock();
            state.inits += 1;
            if let Some(code) = state.init_error {
                return Err(code);
            }
            state.next_handle += 1;
            let id = state.next_handle;
            state.live.push(id);
            state.max_live = state.max_live.max(state.live.len());
            Ok(ImageInfo {
                frame_count: self.frame_count,
                width: self.width,
                height: self.height,
                handle: RawHandle(NonZeroU64::new(id).unwrap()),
            })
        }
    }

    impl GifBackend for FakeBackend {
        fn init_by_path(&self, _path: &Path) -> Result<ImageInfo, i32> {
            self.init()
        }

        fn init_by_bytes(&self, _bytes: &[u8]) -> Result<ImageInfo, i32> {
            self.init()
        }

        fn decode_frame_into(&self, index: usize, buffer: &mut RgbaImage, _handle: RawHandle) -> i32 {
            buffer.put_pixel(0, 0, image::Rgba([index as u8, 0, 0, 255]));
            self.state.lock().decoded.push(index);
            self.delays.get(index).copied().unwrap_or(0)
        }

        fn release_handle(&self, handle: RawHandle) -> Result<(), i32> {
            let mut state = self.state.lock();
            if let Some(code) = state.release_error {
                return Err(code);
            }
            state.releases += 1;
            state.live.retain(|&id| id != handle.get());
            Ok(())
        }
    }

    fn loaded(frames: usize) -> (Arc<FakeBackend>, DecodeSession<FakeBackend>) {
        let backend = FakeBackend::new(frames, vec![40; frames]);
        let mut session = DecodeSession::new(backend.clone());
        session.load_bytes(b"gif").unwrap();
        (backend, session)
    }

    #[test]
    fn test_load_allocates_exact_buffer() {
        let (_backend, session) = loaded(3);

        assert!(session.is_loaded());
        assert_ne!(session.handle().unwrap().get(), 0);
        let buffer = session.buffer().unwrap();
        assert_eq!(buffer.dimensions(), (4, 3));
        assert_eq!(buffer.pixels().count(), 12);
        assert_eq!(session.current_index(), None);
    }

    #[test]
    fn test_recycle_releases_and_is_idempotent() {
        let (backend, mut session) = loaded(3);
        session.decode_frame(1).unwrap();

        session.recycle();
        assert!(session.handle().is_none());
        assert!(session.buffer().is_none());
        assert_eq!(session.current_index(), None);
        assert_eq!(session.current_delay_ms(), 0);

        session.recycle();
        assert_eq!(backend.state.lock().releases, 1);
        assert!(backend.state.lock().live.is_empty());
    }

    #[test]
    fn test_reload_never_holds_two_handles() {
        let (backend, mut session) = loaded(3);
        session.load_path("second.gif").unwrap();
        session.load_bytes(b"third").unwrap();

        let state = backend.state.lock();
        assert_eq!(state.inits, 3);
        assert_eq!(state.releases, 2);
        assert_eq!(state.max_live, 1);
        assert_eq!(state.live.len(), 1);
    }

    #[test]
    fn test_failed_load_keeps_nothing() {
        let (backend, mut session) = loaded(3);
        backend.state.lock().init_error = Some(7);

        assert_eq!(
            session.load_bytes(b"broken"),
            Err(SessionError::LoadFailure { code: 7 })
        );
        assert!(!session.is_loaded());
        assert!(session.buffer().is_none());
        assert!(backend.state.lock().live.is_empty());
    }

    #[test]
    fn test_decode_out_of_range() {
        let (_backend, mut session) = loaded(3);
        assert_eq!(
            session.decode_frame(3),
            Err(SessionError::OutOfRange {
                index: 3,
                frame_count: 3
            })
        );

        let mut empty = DecodeSession::new(FakeBackend::new(0, vec![]));
        empty.load_bytes(b"gif").unwrap();
        assert!(matches!(
            empty.decode_first_frame(),
            Err(SessionError::OutOfRange { frame_count: 0, .. })
        ));
        assert!(matches!(
            empty.next_frame(),
            Err(SessionError::OutOfRange { frame_count: 0, .. })
        ));
        assert!(matches!(
            empty.previous_frame(),
            Err(SessionError::OutOfRange { frame_count: 0, .. })
        ));
    }

    #[test]
    fn test_decode_after_recycle_is_not_loaded() {
        let (_backend, mut session) = loaded(3);
        session.recycle();
        assert_eq!(session.decode_frame(0), Err(SessionError::NotLoaded));
    }

    #[test]
    fn test_next_frame_wraps_to_zero() {
        let (_backend, mut session) = loaded(3);
        session.decode_frame(2).unwrap();
        session.next_frame().unwrap();
        assert_eq!(session.current_index(), Some(0));
    }

    #[test]
    fn test_previous_frame_wraps_to_last() {
        let (_backend, mut session) = loaded(3);
        session.decode_first_frame().unwrap();
        session.previous_frame().unwrap();
        assert_eq!(session.current_index(), Some(2));
    }

    #[test]
    fn test_next_frame_from_unpositioned_starts_at_zero() {
        let (backend, mut session) = loaded(3);
        session.next_frame().unwrap();
        assert_eq!(session.current_index(), Some(0));
        assert_eq!(backend.state.lock().decoded, vec![0]);
    }

    #[test]
    fn test_previous_frame_from_unpositioned_steps_back_from_minus_one() {
        let (backend, mut session) = loaded(3);
        session.previous_frame().unwrap();
        assert_eq!(session.current_index(), Some(1));

        let (_single_backend, mut single) = loaded(1);
        single.previous_frame().unwrap();
        assert_eq!(single.current_index(), Some(0));
        assert_eq!(backend.state.lock().decoded, vec![1]);
    }

    #[test]
    fn test_delay_falls_back_to_default() {
        let backend = FakeBackend::new(3, vec![0, -5, 40]);
        let mut session = DecodeSession::new(backend);
        session.load_bytes(b"gif").unwrap();

        assert_eq!(session.decode_frame(0), Ok(0));
        assert_eq!(session.current_delay_ms(), DEFAULT_FRAME_DELAY_MS);

        assert_eq!(session.decode_frame(1), Ok(-5));
        assert_eq!(session.current_delay_ms(), 100);

        assert_eq!(session.decode_frame(2), Ok(40));
        assert_eq!(session.current_delay_ms(), 40);
        assert_eq!(session.current_delay(), Duration::from_millis(40));
    }

    #[test]
    fn test_prepare_decode_keeps_resources() {
        let (backend, mut session) = loaded(3);
        session.decode_frame(1).unwrap();

        session.prepare_decode();
        assert_eq!(session.current_index(), None);
        assert!(session.is_loaded());
        assert_eq!(
            session.decode_current_frame(),
            Err(SessionError::OutOfRange {
                index: -1,
                frame_count: 3
            })
        );

        session.decode_first_frame().unwrap();
        session.decode_current_frame().unwrap();
        assert_eq!(backend.state.lock().decoded, vec![1, 0, 0]);
    }

    #[test]
    fn test_drop_releases_handle() {
        let (backend, session) = loaded(2);
        drop(session);
        assert!(backend.state.lock().live.is_empty());
    }

    #[test]
    fn test_try_recycle_reports_release_failure() {
        let (backend, mut session) = loaded(2);
        backend.state.lock().release_error = Some(9);

        assert_eq!(
            session.try_recycle(),
            Err(SessionError::ReleaseFailure { code: 9 })
        );
        assert!(session.is_loaded());

        backend.state.lock().release_error = None;
        session.recycle();
        assert!(!session.is_loaded());
    }

    #[test]
    #[should_panic(expected = "release failed")]
    fn test_recycle_panics_on_release_failure() {
        let (backend, mut session) = loaded(2);
        backend.state.lock().release_error = Some(9);
        session.recycle();
    }

    #[test]
    fn test_round_trip_with_image_backend() {
        let gif = encode_test_gif(3, 2, &[([255, 0, 0, 255], 30), ([0, 255, 0, 255], 0)]);
        let mut session = DecodeSession::with_default_backend();
        session.load_bytes(&gif).unwrap();
        assert_eq!(session.frame_count(), 2);
        assert_eq!((session.width(), session.height()), (3, 2));

        assert_eq!(session.decode_first_frame(), Ok(30));
        assert_eq!(session.buffer().unwrap().get_pixel(2, 1).0, [255, 0, 0, 255]);

        assert_eq!(session.next_frame(), Ok(0));
        assert_eq!(session.current_delay_ms(), DEFAULT_FRAME_DELAY_MS);
        assert_eq!(session.buffer().unwrap().get_pixel(0, 0).0, [0, 255, 0, 255]);
    }
}
