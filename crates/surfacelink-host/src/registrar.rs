//! Host texture registry: the renderer pulls registered textures on its own
//! schedule and is told when one has a new frame.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use surfacelink_core::{PixelBuffer, SurfaceDescriptor};

/// What one pull hands the host renderer.
#[derive(Debug)]
pub enum TextureFrame<'a> {
    PixelBuffer(PixelBuffer<'a>),
    GpuSurface(SurfaceDescriptor),
}

/// A pull-based texture source. `pull` is called on the renderer thread; the
/// returned frame borrows from the source until the next pull.
pub trait ExternalTexture: Send {
    fn pull(&mut self, width: u32, height: u32) -> Option<TextureFrame<'_>>;
}

pub type SharedTexture = Arc<Mutex<dyn ExternalTexture>>;

pub trait TextureRegistrar: Send + Sync {
    fn register_texture(&self, texture: SharedTexture) -> i64;
    fn unregister_texture(&self, id: i64);
    /// Called from the capture thread; must only flag.
    fn mark_frame_available(&self, id: i64);
}

// ── TextureTable ──────────────────────────────────────────────────────────────

struct Entry {
    texture: SharedTexture,
    dirty: AtomicBool,
}

/// In-process registrar used by the demo and tests. Identifiers start at 1.
#[derive(Default)]
pub struct TextureTable {
    next_id: AtomicI64,
    entries: RwLock<HashMap<i64, Arc<Entry>>>,
}

impl TextureTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: i64) -> Option<Arc<Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entry(id).is_some()
    }

    /// Clear and return the frame-available flag of `id`.
    pub fn take_dirty(&self, id: i64) -> bool {
        self.entry(id).is_some_and(|e| e.dirty.swap(false, Ordering::AcqRel))
    }

    /// Pull texture `id` at the given layout size and hand the result to
    /// `f`. `None` if no such texture is registered.
    pub fn with_frame<R>(
        &self,
        id: i64,
        width: u32,
        height: u32,
        f: impl FnOnce(Option<TextureFrame<'_>>) -> R,
    ) -> Option<R> {
        let entry = self.entry(id)?;
        let mut texture = entry.texture.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(texture.pull(width, height)))
    }
}

impl TextureRegistrar for TextureTable {
    fn register_texture(&self, texture: SharedTexture) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = Arc::new(Entry { texture, dirty: AtomicBool::new(false) });
        self.entries.write().unwrap_or_else(PoisonError::into_inner).insert(id, entry);
        tracing::debug!("texture {id} registered");
        id
    }

    fn unregister_texture(&self, id: i64) {
        if self.entries.write().unwrap_or_else(PoisonError::into_inner).remove(&id).is_some() {
            tracing::debug!("texture {id} unregistered");
        }
    }

    fn mark_frame_available(&self, id: i64) {
        if let Some(entry) = self.entry(id) {
            entry.dirty.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surfacelink_core::{SharedHandle, Size};

    struct Fixed(Option<SurfaceDescriptor>);

    impl ExternalTexture for Fixed {
        fn pull(&mut self, _width: u32, _height: u32) -> Option<TextureFrame<'_>> {
            self.0.map(TextureFrame::GpuSurface)
        }
    }

    #[test]
    fn ids_are_unique_and_start_at_one() {
        let table = TextureTable::new();
        let a = table.register_texture(Arc::new(Mutex::new(Fixed(None))));
        let b = table.register_texture(Arc::new(Mutex::new(Fixed(None))));
        assert_eq!((a, b), (1, 2));
        table.unregister_texture(a);
        assert!(!table.contains(a));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn dirty_flag_is_consumed_once() {
        let table = TextureTable::new();
        let id = table.register_texture(Arc::new(Mutex::new(Fixed(None))));
        assert!(!table.take_dirty(id));
        table.mark_frame_available(id);
        table.mark_frame_available(id);
        assert!(table.take_dirty(id));
        assert!(!table.take_dirty(id));
    }

    #[test]
    fn with_frame_pulls_registered_texture() {
        let table = TextureTable::new();
        let desc = SurfaceDescriptor::new(SharedHandle(0x40), Size::new(8, 6));
        let id = table.register_texture(Arc::new(Mutex::new(Fixed(Some(desc)))));

        let pulled = table.with_frame(id, 8, 6, |frame| match frame {
            Some(TextureFrame::GpuSurface(d)) => Some(d),
            _ => None,
        });
        assert_eq!(pulled, Some(Some(desc)));
        assert!(table.with_frame(id + 1, 8, 6, |_| ()).is_none());
    }
}
