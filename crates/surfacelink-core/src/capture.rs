//! Frame capture source: binds a platform capture item to a single-slot
//! "latest frame" inbox.
//!
//! # Threading model
//!
//! ```text
//! capture thread (platform-owned)          consumer thread (host renderer)
//! ───────────────────────────────          ───────────────────────────────
//! FrameArrived
//!   │ gate.read()  ── stop() waits here
//!   │ pool.try_get_next_frame()
//!   ▼
//! latest: Mutex<Option<Frame>>  ◄──────────  latest_frame() (clone, no wait)
//!   │
//!   │ needs_update.swap(false) → pool.recreate(item.size())
//!   ▼
//! on_frame_available()  (flags only)
//! ```
//!
//! `notify_surface_size_changed()` may be called from any thread; it only
//! sets an `AtomicBool` that the next frame-arrived notification consumes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, info, trace, warn};

use crate::errors::CaptureError;
use crate::types::{CaptureState, Size};

// ── Platform seam ─────────────────────────────────────────────────────────────

/// Callback run on the capture thread after a frame has been stored.
/// Must only flag state (e.g. mark a host texture dirty).
pub type FrameAvailableCallback = Arc<dyn Fn() + Send + Sync>;

/// Handler the platform invokes on its capture thread for every
/// frame-arrived notification.
pub type FrameArrivedHandler<P> = Box<dyn Fn(&P) + Send + Sync>;

/// Handler the platform invokes once when the captured surface goes away.
pub type ClosedHandler = Arc<dyn Fn() + Send + Sync>;

/// Ring of GPU buffers the platform cycles captured frames through.
pub trait FramePool: Send + Sync + 'static {
    type Frame: Clone + Send + Sync + 'static;

    /// Dequeue the next rendered frame, if any. Never blocks.
    fn try_get_next_frame(&self) -> Option<Self::Frame>;

    /// Reallocate the pool buffers at `size`.
    fn recreate(&self, size: Size, buffer_count: u32) -> Result<(), CaptureError>;
}

/// A started capture session. Closing it revokes the frame-arrived handler.
pub trait CaptureStream: Send + 'static {
    fn close(&mut self);
}

/// A visual surface the platform can capture.
pub trait CaptureItem: Send + Sync + 'static {
    type Frame: Clone + Send + Sync + 'static;
    type Pool: FramePool<Frame = Self::Frame>;
    type Stream: CaptureStream;

    /// Current size of the captured surface.
    fn size(&self) -> Result<Size, CaptureError>;

    /// Register the handler for the "surface closed" notification.
    fn set_closed_handler(&self, handler: ClosedHandler) -> Result<(), CaptureError>;

    /// Create a frame pool of `buffer_count` BGRA buffers at `size`, attach
    /// `on_frame` and start the capture session.
    fn start_capture(
        &self,
        size: Size,
        buffer_count: u32,
        on_frame: FrameArrivedHandler<Self::Pool>,
    ) -> Result<Self::Stream, CaptureError>;
}

// ── Shared state ──────────────────────────────────────────────────────────────

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_arrived: u64,
    pub pool_recreations: u64,
}

struct Shared<F> {
    state: Mutex<CaptureState>,
    latest: Mutex<Option<F>>,
    needs_update: AtomicBool,
    closed: AtomicBool,
    /// `true` while notifications may be delivered. Handlers hold the read
    /// side for their whole run so `stop()` can wait them out.
    gate: RwLock<bool>,
    frame_available: Mutex<Option<FrameAvailableCallback>>,
    frames_arrived: AtomicU64,
    pool_recreations: AtomicU64,
}

impl<F> Shared<F> {
    fn new() -> Self {
        Self {
            state: Mutex::new(CaptureState::Idle),
            latest: Mutex::new(None),
            needs_update: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            gate: RwLock::new(false),
            frame_available: Mutex::new(None),
            frames_arrived: AtomicU64::new(0),
            pool_recreations: AtomicU64::new(0),
        }
    }

    fn set_state(&self, next: CaptureState) {
        *lock(&self.state) = next;
    }

    fn on_frame_arrived<I: CaptureItem<Frame = F>>(&self, item: &I, pool: &I::Pool, buffer_count: u32) {
        let delivering = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if !*delivering || self.closed.load(Ordering::Acquire) {
            return;
        }

        if let Some(frame) = pool.try_get_next_frame() {
            let previous = lock(&self.latest).replace(frame);
            drop(previous);
            let n = self.frames_arrived.fetch_add(1, Ordering::Relaxed) + 1;
            trace!("frame #{n} stored");
        }

        if self.needs_update.swap(false, Ordering::AcqRel) {
            match item.size().and_then(|size| pool.recreate(size, buffer_count).map(|_| size)) {
                Ok(size) => {
                    self.pool_recreations.fetch_add(1, Ordering::Relaxed);
                    debug!("frame pool recreated at {size}");
                }
                Err(e) => warn!("frame pool recreation failed: {e}"),
            }
        }

        let callback = lock(&self.frame_available).clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn on_closed(&self) {
        self.closed.store(true, Ordering::Release);
        self.set_state(CaptureState::Closed);
        lock(&self.latest).take();
        info!("captured surface closed, capture source is now inert");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── SurfaceSizeNotifier ───────────────────────────────────────────────────────

/// Cloneable handle that raises the pending-resize flag of a capture source
/// from any thread, without touching the frame pool.
#[derive(Clone)]
pub struct SurfaceSizeNotifier {
    flag: Arc<dyn ResizeFlag>,
}

trait ResizeFlag: Send + Sync {
    fn raise(&self);
}

impl<F: Send + Sync> ResizeFlag for Shared<F> {
    fn raise(&self) {
        self.needs_update.store(true, Ordering::Release);
    }
}

impl SurfaceSizeNotifier {
    pub fn notify(&self) {
        self.flag.raise();
    }
}

impl std::fmt::Debug for SurfaceSizeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceSizeNotifier").finish_non_exhaustive()
    }
}

// ── FrameCaptureSource ────────────────────────────────────────────────────────

/// Capture source bound to one visual surface.
///
/// Only the most recent frame is retained; a new arrival releases the
/// previous one. [`latest_frame`](Self::latest_frame) never blocks on the
/// capture thread beyond the slot swap.
pub struct FrameCaptureSource<I: CaptureItem> {
    item: Option<Arc<I>>,
    buffer_count: u32,
    shared: Arc<Shared<I::Frame>>,
    stream: Mutex<Option<I::Stream>>,
}

impl<I: CaptureItem> FrameCaptureSource<I> {
    /// Bind to `item`. The source starts out `Idle`.
    pub fn new(item: I, buffer_count: u32) -> Self {
        let shared = Arc::new(Shared::new());

        let closed = Arc::clone(&shared);
        let item = match item.set_closed_handler(Arc::new(move || closed.on_closed())) {
            Ok(()) => Some(Arc::new(item)),
            Err(e) => {
                warn!("capture item rejected closed handler: {e}");
                None
            }
        };

        Self { item, buffer_count: buffer_count.max(1), shared, stream: Mutex::new(None) }
    }

    /// A source whose binding failed. `start()` always fails with
    /// [`CaptureError::NotBound`].
    pub fn unbound(buffer_count: u32) -> Self {
        Self {
            item: None,
            buffer_count: buffer_count.max(1),
            shared: Arc::new(Shared::new()),
            stream: Mutex::new(None),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.item.is_some()
    }

    pub fn state(&self) -> CaptureState {
        *lock(&self.shared.state)
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Start delivering frames. Succeeds without side effects when already
    /// running; `Stopped` sources resume with a fresh frame pool.
    pub fn start(&self) -> Result<(), CaptureError> {
        let item = self.item.as_ref().ok_or(CaptureError::NotBound)?;
        let mut stream = lock(&self.stream);

        let previous = {
            let mut state = lock(&self.shared.state);
            match *state {
                CaptureState::Running => return Ok(()),
                CaptureState::Closed => return Err(CaptureError::SourceClosed),
                other => {
                    *state = CaptureState::Starting;
                    other
                }
            }
        };

        let size = match item.size() {
            Ok(size) => size,
            Err(e) => {
                self.shared.set_state(previous);
                return Err(e);
            }
        };

        // A fresh pool is created at the current size.
        self.shared.needs_update.store(false, Ordering::Release);
        *self.shared.gate.write().unwrap_or_else(PoisonError::into_inner) = true;

        let shared = Arc::clone(&self.shared);
        let handler_item = Arc::clone(item);
        let buffer_count = self.buffer_count;
        let started = item.start_capture(
            size,
            buffer_count,
            Box::new(move |pool: &I::Pool| shared.on_frame_arrived(&*handler_item, pool, buffer_count)),
        );

        let mut started = match started {
            Ok(s) => s,
            Err(e) => {
                *self.shared.gate.write().unwrap_or_else(PoisonError::into_inner) = false;
                self.shared.set_state(previous);
                warn!("capture start failed: {e}");
                return Err(e);
            }
        };

        {
            let mut state = lock(&self.shared.state);
            if *state == CaptureState::Closed {
                drop(state);
                *self.shared.gate.write().unwrap_or_else(PoisonError::into_inner) = false;
                started.close();
                return Err(CaptureError::SourceClosed);
            }
            *state = CaptureState::Running;
        }
        *stream = Some(started);

        info!("capture started at {size} ({buffer_count} buffers)");
        Ok(())
    }

    /// Stop delivering frames and release the session. Blocks until any
    /// in-flight frame-arrived handler has returned; none runs afterwards.
    ///
    /// Must not be called from the frame-available callback.
    pub fn stop(&self) {
        let mut stream = lock(&self.stream);

        *self.shared.gate.write().unwrap_or_else(PoisonError::into_inner) = false;

        let was_running = stream.is_some();
        if let Some(mut s) = stream.take() {
            s.close();
        }
        lock(&self.shared.latest).take();

        let mut state = lock(&self.shared.state);
        if matches!(*state, CaptureState::Running | CaptureState::Starting) {
            *state = CaptureState::Stopped;
        }
        if was_running {
            info!("capture stopped");
        }
    }

    /// Most recent frame, if one has arrived and the source is running.
    pub fn latest_frame(&self) -> Option<I::Frame> {
        if !self.is_running() {
            return None;
        }
        lock(&self.shared.latest).clone()
    }

    /// Request a frame-pool recreation at the next frame-arrived notification.
    pub fn notify_surface_size_changed(&self) {
        self.shared.needs_update.store(true, Ordering::Release);
    }

    pub fn size_notifier(&self) -> SurfaceSizeNotifier {
        SurfaceSizeNotifier { flag: self.shared.clone() }
    }

    /// Install (or clear) the frame-available callback.
    pub fn set_on_frame_available(&self, callback: Option<FrameAvailableCallback>) {
        *lock(&self.shared.frame_available) = callback;
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_arrived: self.shared.frames_arrived.load(Ordering::Relaxed),
            pool_recreations: self.shared.pool_recreations.load(Ordering::Relaxed),
        }
    }
}

impl<I: CaptureItem> Drop for FrameCaptureSource<I> {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuDevice;
    use crate::soft::{SoftwareCaptureItem, SoftwareDevice, SoftwareVisual};

    fn visual(width: u32, height: u32) -> (Arc<SoftwareDevice>, SoftwareVisual) {
        let device = Arc::new(SoftwareDevice::new());
        let visual = SoftwareVisual::new(Arc::clone(&device), Size::new(width, height));
        (device, visual)
    }

    fn source(visual: &SoftwareVisual) -> FrameCaptureSource<SoftwareCaptureItem> {
        let item = SoftwareCaptureItem::from_visual(visual).expect("open visual");
        FrameCaptureSource::new(item, 2)
    }

    #[test]
    fn unbound_source_never_starts() {
        let src: FrameCaptureSource<SoftwareCaptureItem> = FrameCaptureSource::unbound(2);
        assert!(matches!(src.start(), Err(CaptureError::NotBound)));
        assert_eq!(src.state(), CaptureState::Idle);
        assert!(src.latest_frame().is_none());
    }

    #[test]
    fn no_frame_before_first_arrival() {
        let (_device, visual) = visual(16, 16);
        let src = source(&visual);
        assert!(src.latest_frame().is_none());
        src.start().unwrap();
        assert!(src.latest_frame().is_none());
    }

    #[test]
    fn latest_frame_wins() {
        let (device, visual) = visual(4, 4);
        let src = source(&visual);
        src.start().unwrap();

        for shade in 1..=5u8 {
            assert!(visual.render_fill([shade, shade, shade, 255]));
        }

        let frame = src.latest_frame().expect("frame");
        let pixels = device.download(&frame);
        assert!(pixels.chunks_exact(4).all(|px| px == [5, 5, 5, 255]));
        assert_eq!(src.stats().frames_arrived, 5);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let (_device, visual) = visual(8, 8);
        let src = source(&visual);

        src.start().unwrap();
        src.start().unwrap();
        assert_eq!(src.state(), CaptureState::Running);
        assert_eq!(visual.sessions_started(), 1);

        src.stop();
        src.stop();
        assert_eq!(src.state(), CaptureState::Stopped);
        assert!(!visual.render_fill([1, 2, 3, 4]));
        assert!(src.latest_frame().is_none());

        src.start().unwrap();
        assert!(visual.render_fill([1, 2, 3, 4]));
        assert!(src.latest_frame().is_some());
        assert_eq!(visual.sessions_started(), 2);
    }

    #[test]
    fn resize_notifications_coalesce() {
        let (_device, visual) = visual(100, 100);
        let src = source(&visual);
        src.start().unwrap();

        visual.resize(Size::new(200, 150));
        for _ in 0..5 {
            src.notify_surface_size_changed();
        }
        src.size_notifier().notify();
        assert_eq!(visual.pool_recreations(), 0);

        visual.render_fill([0, 0, 0, 255]);
        assert_eq!(visual.pool_recreations(), 1);
        assert_eq!(visual.pool_size(), Some(Size::new(200, 150)));

        visual.render_fill([0, 0, 0, 255]);
        assert_eq!(visual.pool_recreations(), 1);
        assert_eq!(src.stats().pool_recreations, 1);
    }

    #[test]
    fn frame_available_runs_on_capture_thread() {
        let (_device, visual) = visual(2, 2);
        let src = source(&visual);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        src.set_on_frame_available(Some(Arc::new(move || {
            lock(&sink).push(std::thread::current().id());
        })));
        src.start().unwrap();

        visual.render_fill([9, 9, 9, 9]);
        visual.render_fill([9, 9, 9, 9]);

        let seen = lock(&seen);
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|id| *id != std::thread::current().id()));
    }

    #[test]
    fn closed_surface_makes_source_inert() {
        let (_device, visual) = visual(8, 8);
        let src = source(&visual);
        src.start().unwrap();
        visual.render_fill([1, 1, 1, 1]);
        assert!(src.latest_frame().is_some());

        visual.close();
        assert_eq!(src.state(), CaptureState::Closed);
        assert!(src.latest_frame().is_none());
        assert!(!visual.render_fill([1, 1, 1, 1]));
        assert!(matches!(src.start(), Err(CaptureError::SourceClosed)));

        src.stop();
        assert_eq!(src.state(), CaptureState::Closed);
    }

    #[test]
    fn stop_waits_for_in_flight_handler() {
        let (_device, visual) = visual(2, 2);
        let src = Arc::new(source(&visual));
        let entered = Arc::new(std::sync::Barrier::new(2));
        let calls = Arc::new(AtomicU64::new(0));

        let barrier = Arc::clone(&entered);
        let counter = Arc::clone(&calls);
        src.set_on_frame_available(Some(Arc::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                barrier.wait();
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
        })));
        src.start().unwrap();

        let renderer = {
            let visual = visual.clone();
            std::thread::spawn(move || visual.render_fill([1, 1, 1, 1]))
        };
        entered.wait();
        src.stop();
        // The handler finished before stop() returned.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        renderer.join().unwrap();

        assert!(!visual.render_fill([2, 2, 2, 2]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frames_have_pool_format_dimensions() {
        let (device, visual) = visual(12, 7);
        let src = source(&visual);
        src.start().unwrap();
        visual.render_fill([0, 0, 0, 0]);
        let frame = src.latest_frame().unwrap();
        assert_eq!(device.texture_size(&frame), Size::new(12, 7));
    }
}
