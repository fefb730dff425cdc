use super::Request;
use smallvec::SmallVec;
use std::sync::{Arc, Weak};

/// Strong references taken at the start of a bulk operation
type Snapshot = SmallVec<[Arc<dyn Request>; 8]>;

/// Tracks in-flight requests and pauses, resumes, clears or restarts them
/// together, e.g. while the surface showing them is hidden.
///
/// Tracked requests are held weakly: once every other owner drops a request
/// it disappears from the tracker. Requests queued to (re)start are also held
/// strongly in the pending queue so they survive until they actually run.
///
/// Not synchronized; wrap it in a lock to share it between threads.
#[derive(Default)]
pub struct RequestTracker {
    requests: Vec<Weak<dyn Request>>,
    pending: Vec<Arc<dyn Request>>,
    paused: bool,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `request` and start it, or queue it while paused
    pub fn run_request(&mut self, request: Arc<dyn Request>) {
        self.prune();
        if !self.is_tracked(&request) {
            self.requests.push(Arc::downgrade(&request));
        }

        if self.paused {
            log::debug!("Tracker paused, queueing request");
            self.queue(request);
        } else {
            request.begin();
        }
    }

    /// Forget `request`. Does not touch the request itself.
    pub fn remove_request(&mut self, request: &Arc<dyn Request>) -> bool {
        let tracked = self.requests.len();
        self.requests
            .retain(|weak| !std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(request)));
        self.pending.retain(|queued| !Arc::ptr_eq(queued, request));
        self.requests.len() != tracked
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pause every running request and hold it until resumed
    pub fn pause_requests(&mut self) {
        self.paused = true;
        let snapshot = self.snapshot();
        log::info!("Pausing requests ({} tracked)", snapshot.len());

        for request in snapshot {
            if request.is_running() {
                request.pause();
                self.queue(request);
            }
        }
    }

    /// Start every request that is not complete, cancelled or already running
    pub fn resume_requests(&mut self) {
        self.paused = false;
        let snapshot = self.snapshot();
        log::info!("Resuming requests ({} tracked)", snapshot.len());

        for request in snapshot {
            if !request.is_complete() && !request.is_cancelled() && !request.is_running() {
                request.begin();
            }
        }
        self.pending.clear();
    }

    /// Cancel every request and release its resources
    pub fn clear_requests(&mut self) {
        let snapshot = self.snapshot();
        log::info!("Clearing {} requests", snapshot.len());

        for request in snapshot {
            request.clear();
        }
        self.pending.clear();
    }

    /// Recycle every request. Meant for final teardown.
    pub fn destroy_requests(&mut self) {
        let snapshot = self.snapshot();
        log::info!("Destroying {} requests", snapshot.len());

        for request in snapshot {
            request.recycle();
        }
    }

    /// Restart every unfinished request from a clean pause point
    pub fn restart_requests(&mut self) {
        let snapshot = self.snapshot();
        log::info!("Restarting requests ({} tracked)", snapshot.len());

        for request in snapshot {
            if request.is_complete() || request.is_cancelled() {
                continue;
            }
            request.pause();
            if self.paused {
                self.queue(request);
            } else {
                request.begin();
            }
        }
    }

    /// Number of tracked requests that are still alive
    pub fn len(&self) -> usize {
        self.requests.iter().filter(|weak| weak.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, request: &Arc<dyn Request>) -> bool {
        self.pending.iter().any(|queued| Arc::ptr_eq(queued, request))
    }

    pub fn is_tracked(&self, request: &Arc<dyn Request>) -> bool {
        self.requests
            .iter()
            .any(|weak| std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(request)))
    }

    fn queue(&mut self, request: Arc<dyn Request>) {
        if !self.is_pending(&request) {
            self.pending.push(request);
        }
    }

    /// Forget requests nobody else holds any more
    fn prune(&mut self) {
        self.requests.retain(|weak| weak.strong_count() > 0);
    }

    /// Drop dead entries and pin the live ones for one bulk operation
    fn snapshot(&mut self) -> Snapshot {
        self.prune();
        self.requests.iter().filter_map(|weak| weak.upgrade()).collect()
    }
}
