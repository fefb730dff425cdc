//! A [`Request`] that plays an animated GIF into a [`FrameTarget`].
//!
//! Each `begin` spawns a worker thread that owns a fresh [`DecodeSession`],
//! so the session's buffer never leaves that thread except as a borrowed
//! [`FrameView`]. Pausing, clearing or recycling bumps a generation counter;
//! a worker whose generation is stale stops before delivering another frame
//! and its session is released when the worker returns.

use super::{Request, RequestStatus};
use crate::decoder::{DecodeSession, GifBackend, ImageGifBackend, Source};
use crate::error::SessionError;
use image::RgbaImage;
use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Encoded GIF owned by a request
#[derive(Clone, Debug)]
pub enum PlaybackSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
}

impl PlaybackSource {
    fn as_source(&self) -> Source<'_> {
        match self {
            PlaybackSource::Path(path) => Source::Path(path),
            PlaybackSource::Bytes(bytes) => Source::Bytes(bytes),
        }
    }
}

impl From<PathBuf> for PlaybackSource {
    fn from(path: PathBuf) -> Self {
        PlaybackSource::Path(path)
    }
}

impl From<Vec<u8>> for PlaybackSource {
    fn from(bytes: Vec<u8>) -> Self {
        PlaybackSource::Bytes(bytes.into())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackOptions {
    /// Passes over the animation before completing; 0 plays forever
    pub loops: u32,
    /// Wait each frame's delay before showing the next one
    pub realtime: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            loops: 1,
            realtime: true,
        }
    }
}

/// One decoded frame, borrowed from the worker's session buffer
pub struct FrameView<'a> {
    pub index: usize,
    pub frame_count: usize,
    pub delay_ms: u32,
    pub pixels: &'a RgbaImage,
}

/// Receives frames from a [`PlaybackRequest`]. Called on the worker thread.
pub trait FrameTarget: Send + Sync {
    fn on_frame(&self, frame: &FrameView<'_>);

    fn on_complete(&self) {}

    fn on_error(&self, _error: &SessionError) {}
}

struct State {
    status: RequestStatus,
    generation: u64,
    next_frame: usize,
    loops_done: u32,
}

struct Shared<B> {
    source: PlaybackSource,
    backend: Arc<B>,
    options: PlaybackOptions,
    target: Mutex<Option<Arc<dyn FrameTarget>>>,
    state: Mutex<State>,
    wake: Condvar,
}

pub struct PlaybackRequest<B: GifBackend + 'static = ImageGifBackend> {
    shared: Arc<Shared<B>>,
}

impl PlaybackRequest<ImageGifBackend> {
    pub fn new(
        source: impl Into<PlaybackSource>,
        target: Arc<dyn FrameTarget>,
        options: PlaybackOptions,
    ) -> Self {
        Self::with_backend(source, Arc::new(ImageGifBackend::new()), target, options)
    }
}

impl<B: GifBackend + 'static> PlaybackRequest<B> {
    pub fn with_backend(
        source: impl Into<PlaybackSource>,
        backend: Arc<B>,
        target: Arc<dyn FrameTarget>,
        options: PlaybackOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                source: source.into(),
                backend,
                options,
                target: Mutex::new(Some(target)),
                state: Mutex::new(State {
                    status: RequestStatus::Pending,
                    generation: 0,
                    next_frame: 0,
                    loops_done: 0,
                }),
                wake: Condvar::new(),
            }),
        }
    }

    pub fn status(&self) -> RequestStatus {
        self.shared.state.lock().status
    }

    /// Completed passes over the animation
    pub fn loops_done(&self) -> u32 {
        self.shared.state.lock().loops_done
    }

    /// Move to `status` and invalidate the running worker, if any
    fn interrupt(&self, status: RequestStatus, rewind: bool) {
        let mut state = self.shared.state.lock();
        state.status = status;
        state.generation += 1;
        if rewind {
            state.next_frame = 0;
            state.loops_done = 0;
        }
        self.shared.wake.notify_all();
    }
}

impl<B: GifBackend + 'static> Request for PlaybackRequest<B> {
    fn begin(&self) {
        let generation = {
            let mut state = self.shared.state.lock();
            match state.status {
                RequestStatus::Pending | RequestStatus::Paused => {}
                RequestStatus::Failed | RequestStatus::Cancelled => {
                    state.next_frame = 0;
                    state.loops_done = 0;
                }
                status => {
                    log::debug!("Ignoring begin while {:?}", status);
                    return;
                }
            }
            state.status = RequestStatus::Running;
            state.generation += 1;
            state.generation
        };

        log::debug!("Starting playback worker (generation {})", generation);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("gif-playback".to_string())
            .spawn(move || shared.run(generation));

        if let Err(err) = spawned {
            log::error!("Failed to spawn playback worker: {}", err);
            let mut state = self.shared.state.lock();
            if state.generation == generation {
                state.status = RequestStatus::Failed;
            }
        }
    }

    fn pause(&self) {
        if self.status() == RequestStatus::Running {
            self.interrupt(RequestStatus::Paused, false);
        }
    }

    fn clear(&self) {
        if self.status() != RequestStatus::Recycled {
            self.interrupt(RequestStatus::Cancelled, true);
        }
    }

    fn recycle(&self) {
        self.interrupt(RequestStatus::Recycled, true);
        self.shared.target.lock().take();
    }

    fn is_running(&self) -> bool {
        self.status() == RequestStatus::Running
    }

    fn is_complete(&self) -> bool {
        self.status() == RequestStatus::Complete
    }

    fn is_cancelled(&self) -> bool {
        matches!(
            self.status(),
            RequestStatus::Cancelled | RequestStatus::Recycled
        )
    }
}

impl<B: GifBackend + 'static> Shared<B> {
    fn run(&self, generation: u64) {
        let mut session = DecodeSession::new(Arc::clone(&self.backend));
        if let Err(err) = session.load(self.source.as_source()) {
            self.fail(generation, &err);
            return;
        }

        let start = {
            let state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.next_frame
        };
        let first = if start == 0 {
            session.decode_first_frame()
        } else {
            session.decode_frame(start)
        };
        if let Err(err) = first {
            self.fail(generation, &err);
            return;
        }

        loop {
            let Some(index) = session.current_index() else {
                return;
            };
            if !self.deliver(generation, &session, index) {
                return;
            }

            let finished = {
                let mut state = self.state.lock();
                if state.generation != generation {
                    return;
                }
                state.next_frame = index + 1;
                if state.next_frame >= session.frame_count() {
                    state.next_frame = 0;
                    state.loops_done += 1;
                    self.options.loops != 0 && state.loops_done >= self.options.loops
                } else {
                    false
                }
            };
            if finished {
                self.complete(generation);
                return;
            }

            if self.options.realtime && !self.wait(generation, session.current_delay()) {
                return;
            }
            if let Err(err) = session.next_frame() {
                self.fail(generation, &err);
                return;
            }
        }
    }

    fn current_target(&self, generation: u64) -> Option<Arc<dyn FrameTarget>> {
        let state = self.state.lock();
        if state.generation != generation {
            return None;
        }
        self.target.lock().clone()
    }

    fn deliver(&self, generation: u64, session: &DecodeSession<B>, index: usize) -> bool {
        let (Some(target), Some(pixels)) = (self.current_target(generation), session.buffer()) else {
            return false;
        };
        target.on_frame(&FrameView {
            index,
            frame_count: session.frame_count(),
            delay_ms: session.current_delay_ms(),
            pixels,
        });
        true
    }

    /// Sleep for `delay` unless the worker is invalidated first
    fn wait(&self, generation: u64, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let mut state = self.state.lock();
        while state.generation == generation {
            if self.wake.wait_until(&mut state, deadline).timed_out() {
                return state.generation == generation;
            }
        }
        false
    }

    fn finish(&self, generation: u64, status: RequestStatus) -> Option<Arc<dyn FrameTarget>> {
        let mut state = self.state.lock();
        if state.generation != generation {
            return None;
        }
        state.status = status;
        drop(state);
        self.target.lock().clone()
    }

    fn fail(&self, generation: u64, err: &SessionError) {
        log::error!("Playback failed: {}", err);
        if let Some(target) = self.finish(generation, RequestStatus::Failed) {
            target.on_error(err);
        }
    }

    fn complete(&self, generation: u64) {
        log::info!("Playback complete");
        if let Some(target) = self.finish(generation, RequestStatus::Complete) {
            target.on_complete();
        }
    }
}
