//! A byte-budgeted cache of decoded tiles.
//!
//! The reading core itself never caches (every request decodes afresh);
//! the slide owns one of these for its caller to keep decoded tiles in,
//! keyed by the natural tile identity.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

/// Identity of one decoded tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileId {
    /// Index of the file in the slide's flat file array.
    pub file: u32,
    /// Tile column within that file.
    pub tile_x: u32,
    /// Tile row within that file.
    pub tile_y: u32,
    /// Scale denominator the tile was decoded at.
    pub scale_denom: u32,
}

/// A least-recently-used cache of decoded ARGB tiles.
///
/// Entries are weighted by their pixel payload; once the total exceeds the
/// byte budget, the least recently touched tiles are dropped. Shared
/// access goes through an internal lock, so the cache can be used from the
/// same `&Slide` that serves regions.
pub struct TileCache {
    inner: Mutex<Inner>,
}

struct Inner {
    entries: FxHashMap<TileId, Arc<[u32]>>,
    /// Keys ordered least to most recently touched.
    order: VecDeque<TileId>,
    bytes: usize,
    capacity: usize,
}

impl TileCache {
    pub(crate) fn new(capacity: usize) -> TileCache {
        TileCache {
            inner: Mutex::new(Inner {
                entries: FxHashMap::default(),
                order: VecDeque::new(),
                bytes: 0,
                capacity,
            }),
        }
    }

    /// Look up a tile, marking it most recently used.
    pub fn get(&self, id: TileId) -> Option<Arc<[u32]>> {
        let mut inner = self.inner.lock().unwrap();
        let pixels = inner.entries.get(&id)?.clone();
        if let Some(at) = inner.order.iter().position(|&k| k == id) {
            inner.order.remove(at);
            inner.order.push_back(id);
        }
        Some(pixels)
    }

    /// Insert a tile, evicting the least recently used entries until the
    /// cache fits its budget again.
    pub fn put(&self, id: TileId, pixels: Arc<[u32]>) {
        let mut inner = self.inner.lock().unwrap();

        if let Some(old) = inner.entries.remove(&id) {
            inner.bytes -= size_of_val(&old[..]);
            if let Some(at) = inner.order.iter().position(|&k| k == id) {
                inner.order.remove(at);
            }
        }

        inner.bytes += size_of_val(&pixels[..]);
        inner.entries.insert(id, pixels);
        inner.order.push_back(id);

        while inner.bytes > inner.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.bytes -= size_of_val(&evicted[..]);
            }
        }
    }

    /// Bytes of pixel data currently held.
    pub fn occupied_bytes(&self) -> usize {
        self.inner.lock().unwrap().bytes
    }
}
