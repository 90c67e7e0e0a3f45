//! Software capture item: a visual the caller renders into, a frame pool
//! and a capture thread that delivers frame-arrived notifications.
//!
//! [`SoftwareVisual::render`] blocks until the capture thread has handled
//! the notification, so a render followed by a pull is deterministic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tracing::{debug, warn};

use super::{SoftwareDevice, SoftwareTexture};
use crate::capture::{CaptureItem, CaptureStream, ClosedHandler, FrameArrivedHandler, FramePool};
use crate::errors::CaptureError;
use crate::types::Size;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── SoftwareFramePool ─────────────────────────────────────────────────────────

struct PoolInner {
    size: Mutex<Size>,
    buffer_count: AtomicU32,
    queue: Mutex<VecDeque<SoftwareTexture>>,
    recreations: Arc<AtomicU64>,
}

/// Bounded queue of rendered frames. When full, the oldest frame is dropped.
#[derive(Clone)]
pub struct SoftwareFramePool {
    inner: Arc<PoolInner>,
}

impl SoftwareFramePool {
    fn push(&self, frame: SoftwareTexture) {
        let capacity = self.inner.buffer_count.load(Ordering::Acquire).max(1) as usize;
        let mut queue = lock(&self.inner.queue);
        while queue.len() >= capacity {
            queue.pop_front();
        }
        queue.push_back(frame);
    }

    pub fn size(&self) -> Size {
        *lock(&self.inner.size)
    }
}

impl FramePool for SoftwareFramePool {
    type Frame = SoftwareTexture;

    fn try_get_next_frame(&self) -> Option<SoftwareTexture> {
        lock(&self.inner.queue).pop_front()
    }

    fn recreate(&self, size: Size, buffer_count: u32) -> Result<(), CaptureError> {
        if size.is_empty() {
            return Err(CaptureError::FramePool { reason: format!("invalid pool size {size}") });
        }
        *lock(&self.inner.size) = size;
        self.inner.buffer_count.store(buffer_count, Ordering::Release);
        lock(&self.inner.queue).clear();
        self.inner.recreations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ── SoftwareVisual ────────────────────────────────────────────────────────────

struct ActiveStream {
    pool: SoftwareFramePool,
    notify: Sender<Sender<()>>,
}

struct VisualInner {
    device: Arc<SoftwareDevice>,
    size: Mutex<Size>,
    closed: AtomicBool,
    closed_handlers: Mutex<Vec<(u64, ClosedHandler)>>,
    next_handler: AtomicU64,
    active: Mutex<Option<ActiveStream>>,
    recreations: Arc<AtomicU64>,
    sessions: AtomicU64,
}

/// Off-screen surface that produces BGRA frames on request.
#[derive(Clone)]
pub struct SoftwareVisual {
    inner: Arc<VisualInner>,
}

impl SoftwareVisual {
    pub fn new(device: Arc<SoftwareDevice>, size: Size) -> Self {
        Self {
            inner: Arc::new(VisualInner {
                device,
                size: Mutex::new(size),
                closed: AtomicBool::new(false),
                closed_handlers: Mutex::new(Vec::new()),
                next_handler: AtomicU64::new(0),
                active: Mutex::new(None),
                recreations: Arc::new(AtomicU64::new(0)),
                sessions: AtomicU64::new(0),
            }),
        }
    }

    pub fn device(&self) -> &Arc<SoftwareDevice> {
        &self.inner.device
    }

    pub fn size(&self) -> Size {
        *lock(&self.inner.size)
    }

    /// Change the surface size. Frames rendered afterwards use the new size.
    pub fn resize(&self, size: Size) {
        *lock(&self.inner.size) = size;
    }

    /// Render one frame of packed BGRA bytes and wait until the capture
    /// thread has handled its notification.
    ///
    /// Returns `false` if nothing is capturing the visual.
    pub fn render(&self, bgra: &[u8]) -> bool {
        if self.inner.closed.load(Ordering::Acquire) {
            return false;
        }
        let (pool, notify) = match lock(&self.inner.active).as_ref() {
            Some(active) => (active.pool.clone(), active.notify.clone()),
            None => return false,
        };

        let frame = self.inner.device.create_frame(self.size(), bgra);
        pool.push(frame);

        let (ack_tx, ack_rx) = mpsc::channel();
        if notify.send(ack_tx).is_err() {
            return false;
        }
        match ack_rx.recv_timeout(DELIVERY_TIMEOUT) {
            Ok(()) => true,
            Err(_) => {
                warn!("software capture thread did not acknowledge frame");
                false
            }
        }
    }

    /// Render a frame with every pixel set to `bgra`.
    pub fn render_fill(&self, bgra: [u8; 4]) -> bool {
        let size = self.size();
        let pixels: Vec<u8> = bgra.iter().copied().cycle().take(size.pixel_count() * 4).collect();
        self.render(&pixels)
    }

    /// Render a frame where each pixel is produced by `shade(x, y)` (BGRA).
    pub fn render_with(&self, shade: impl Fn(u32, u32) -> [u8; 4]) -> bool {
        let size = self.size();
        let mut pixels = Vec::with_capacity(size.pixel_count() * 4);
        for y in 0..size.height {
            for x in 0..size.width {
                pixels.extend_from_slice(&shade(x, y));
            }
        }
        self.render(&pixels)
    }

    /// Destroy the surface. Registered closed handlers run on the caller's
    /// thread; further renders are ignored.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let handlers: Vec<ClosedHandler> =
            lock(&self.inner.closed_handlers).iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler();
        }
        debug!("software visual closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Pool recreations across every session of this visual.
    pub fn pool_recreations(&self) -> u64 {
        self.inner.recreations.load(Ordering::Relaxed)
    }

    /// Size of the active session's frame pool.
    pub fn pool_size(&self) -> Option<Size> {
        lock(&self.inner.active).as_ref().map(|a| a.pool.size())
    }

    pub fn sessions_started(&self) -> u64 {
        self.inner.sessions.load(Ordering::Relaxed)
    }

    /// Closed handlers registered by capture items that are still alive.
    pub fn closed_handler_count(&self) -> usize {
        lock(&self.inner.closed_handlers).len()
    }
}

// ── SoftwareCaptureItem ───────────────────────────────────────────────────────

/// Capture item bound to a [`SoftwareVisual`].
///
/// Closed handlers registered through the item are removed from the visual
/// when the item is dropped.
pub struct SoftwareCaptureItem {
    visual: SoftwareVisual,
    handlers: Mutex<Vec<u64>>,
}

impl SoftwareCaptureItem {
    pub fn from_visual(visual: &SoftwareVisual) -> Result<Self, CaptureError> {
        if visual.is_closed() {
            return Err(CaptureError::ItemCreation { reason: "visual is closed".into() });
        }
        Ok(Self { visual: visual.clone(), handlers: Mutex::new(Vec::new()) })
    }
}

impl Drop for SoftwareCaptureItem {
    fn drop(&mut self) {
        let ids = std::mem::take(&mut *lock(&self.handlers));
        if ids.is_empty() {
            return;
        }
        lock(&self.visual.inner.closed_handlers).retain(|(id, _)| !ids.contains(id));
        debug!("released {} closed handler(s)", ids.len());
    }
}

impl CaptureItem for SoftwareCaptureItem {
    type Frame = SoftwareTexture;
    type Pool = SoftwareFramePool;
    type Stream = SoftwareCaptureStream;

    fn size(&self) -> Result<Size, CaptureError> {
        if self.visual.is_closed() {
            return Err(CaptureError::SourceClosed);
        }
        Ok(self.visual.size())
    }

    fn set_closed_handler(&self, handler: ClosedHandler) -> Result<(), CaptureError> {
        let id = self.visual.inner.next_handler.fetch_add(1, Ordering::Relaxed);
        lock(&self.visual.inner.closed_handlers).push((id, handler));
        lock(&self.handlers).push(id);
        Ok(())
    }

    fn start_capture(
        &self,
        size: Size,
        buffer_count: u32,
        on_frame: FrameArrivedHandler<SoftwareFramePool>,
    ) -> Result<SoftwareCaptureStream, CaptureError> {
        let inner = &self.visual.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(CaptureError::Session { reason: "visual is closed".into() });
        }

        let pool = SoftwareFramePool {
            inner: Arc::new(PoolInner {
                size: Mutex::new(size),
                buffer_count: AtomicU32::new(buffer_count),
                queue: Mutex::new(VecDeque::new()),
                recreations: Arc::clone(&inner.recreations),
            }),
        };

        let (notify_tx, notify_rx) = mpsc::channel::<Sender<()>>();
        let thread_pool = pool.clone();
        let thread = thread::Builder::new()
            .name("soft-capture".into())
            .spawn(move || deliver(notify_rx, thread_pool, on_frame))
            .map_err(|e| CaptureError::Session { reason: e.to_string() })?;

        let delivery_thread = thread.thread().id();
        *lock(&inner.active) = Some(ActiveStream { pool, notify: notify_tx });
        inner.sessions.fetch_add(1, Ordering::Relaxed);

        Ok(SoftwareCaptureStream {
            visual: self.visual.clone(),
            thread: Some(thread),
            delivery_thread,
        })
    }
}

fn deliver(
    notifications: Receiver<Sender<()>>,
    pool: SoftwareFramePool,
    on_frame: FrameArrivedHandler<SoftwareFramePool>,
) {
    while let Ok(ack) = notifications.recv() {
        on_frame(&pool);
        let _ = ack.send(());
    }
}

// ── SoftwareCaptureStream ─────────────────────────────────────────────────────

pub struct SoftwareCaptureStream {
    visual: SoftwareVisual,
    thread: Option<JoinHandle<()>>,
    delivery_thread: ThreadId,
}

impl CaptureStream for SoftwareCaptureStream {
    fn close(&mut self) {
        // Dropping the sender ends the delivery loop.
        lock(&self.visual.inner.active).take();
        if let Some(thread) = self.thread.take() {
            if thread::current().id() != self.delivery_thread {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for SoftwareCaptureStream {
    fn drop(&mut self) {
        self.close();
    }
}
