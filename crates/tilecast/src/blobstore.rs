// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Where tile bytes actually come from. The scheduler and transport layers
//! never care which [`BlobStore`] backs a server — swap it for a unit test
//! double without touching anything else.

/// Resolves `(segment, tile)` to response payload bytes. A missing tile is
/// `None`, not an error: the stream handler turns that into a zero-byte
/// response rather than failing the request.
pub trait BlobStore: Send + Sync {
    fn read(&self, segment: u32, tile: u32) -> Option<Vec<u8>>;

    /// Cheap estimate of `read`'s payload size, without reading it. Used to
    /// attribute `stale_bytes` when a deadline drop means the request is
    /// abandoned before `read` ever runs. `None` if no estimate is
    /// available for this tile.
    fn size_hint(&self, segment: u32, tile: u32) -> Option<u64>;
}

/// Reads tiles from `<root>/<segment>/<tile>.bin`. Stateless beyond the
/// immutable root path, so concurrent reads need no internal locking.
pub struct FileBlobStore {
    root: std::path::PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, segment: u32, tile: u32) -> std::path::PathBuf {
        self.root
            .join(segment.to_string())
            .join(format!("{tile}.bin"))
    }
}

impl BlobStore for FileBlobStore {
    fn read(&self, segment: u32, tile: u32) -> Option<Vec<u8>> {
        std::fs::read(self.path_for(segment, tile)).ok()
    }

    fn size_hint(&self, segment: u32, tile: u32) -> Option<u64> {
        std::fs::metadata(self.path_for(segment, tile))
            .ok()
            .map(|m| m.len())
    }
}

/// Synthesizes deterministic payloads of a fixed size, for load testing
/// against a server with no real tile corpus on disk. Byte content is
/// irrelevant to every measured metric; only length matters.
pub struct SyntheticBlobStore {
    tile_bytes: usize,
}

impl SyntheticBlobStore {
    pub fn new(tile_bytes: usize) -> Self {
        Self { tile_bytes }
    }
}

impl BlobStore for SyntheticBlobStore {
    fn read(&self, segment: u32, tile: u32) -> Option<Vec<u8>> {
        let mut data = vec![0u8; self.tile_bytes];
        let seed = segment.wrapping_mul(2654435761).wrapping_add(tile);
        for (i, b) in data.iter_mut().enumerate() {
            *b = (seed.wrapping_add(i as u32) % 256) as u8;
        }
        Some(data)
    }

    fn size_hint(&self, _segment: u32, _tile: u32) -> Option<u64> {
        Some(self.tile_bytes as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_store_returns_requested_length() {
        let store = SyntheticBlobStore::new(4096);
        assert_eq!(store.read(1, 2).unwrap().len(), 4096);
    }

    #[test]
    fn synthetic_store_is_deterministic() {
        let store = SyntheticBlobStore::new(500);
        assert_eq!(store.read(7, 4), store.read(7, 4));
    }

    #[test]
    fn synthetic_store_varies_by_key() {
        let store = SyntheticBlobStore::new(64);
        assert_ne!(store.read(1, 1), store.read(1, 2));
    }

    #[test]
    fn synthetic_store_size_hint_matches_read_length() {
        let store = SyntheticBlobStore::new(2048);
        assert_eq!(store.size_hint(1, 1), Some(2048));
        assert_eq!(store.read(1, 1).unwrap().len(), 2048);
    }

    #[test]
    fn file_store_reports_missing_tile_as_none() {
        let store = FileBlobStore::new("/nonexistent/tilecast-root");
        assert!(store.read(0, 0).is_none());
        assert!(store.size_hint(0, 0).is_none());
    }
}
