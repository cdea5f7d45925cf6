//! Write-once bake results keyed by [`BakeKey`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::{BakeError, BakeKey, BakedTexture};

pub type BakeResult = Result<Arc<BakedTexture>, BakeError>;

/// Coalesces concurrent requests for the same key into one render.
///
/// The map lock is only held to fetch the per-key slot; rendering happens
/// inside [`OnceLock::get_or_init`], so other keys proceed in parallel and
/// requesters of the same key block until the first render finishes.
#[derive(Default)]
pub struct BakeCache {
    slots: Mutex<HashMap<BakeKey, Arc<OnceLock<BakeResult>>>>,
    renders: AtomicUsize,
}

impl BakeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_render(&self, key: BakeKey, render: impl FnOnce() -> BakeResult) -> BakeResult {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key).or_default())
        };
        slot.get_or_init(|| {
            self.renders.fetch_add(1, Ordering::Relaxed);
            render()
        })
        .clone()
    }

    pub fn get(&self, key: &BakeKey) -> Option<BakeResult> {
        self.slots.lock().get(key).and_then(|s| s.get().cloned())
    }

    /// Number of renders performed so far.
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
