pub mod playback;
pub mod tracker;

pub use playback::{FrameTarget, FrameView, PlaybackOptions, PlaybackRequest, PlaybackSource};
pub use tracker::RequestTracker;

/// A unit of asynchronous load-and-display work.
///
/// Lifecycle calls are signals: an implementation may hand the work to
/// another thread and return immediately, so implementations must be
/// shareable across threads. Status queries report what the
/// request has recorded so far.
pub trait Request: Send + Sync {
    /// Start or resume. Ignored by implementations that are already running
    /// or finished.
    fn begin(&self);

    /// Stop at a point from which `begin` can continue
    fn pause(&self);

    /// Cancel in-flight work and release its resources
    fn clear(&self);

    /// Release everything; the request is not reused afterwards
    fn recycle(&self);

    fn is_running(&self) -> bool;

    fn is_complete(&self) -> bool;

    fn is_cancelled(&self) -> bool;
}

/// Lifecycle state recorded by [`PlaybackRequest`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Running,
    Paused,
    Complete,
    Failed,
    Cancelled,
    Recycled,
}
