//! Tile payloads.
//!
//! A tile is the opaque fixed-size block a unit starts an exchange with.
//! `Bytes` backing keeps the multicast fan-out cheap: depositing one tile
//! into N-1 inboxes clones a refcount, not the payload.

use bytes::Bytes;

/// Opaque fixed-size payload owned by exactly one unit at the start of
/// an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    data: Bytes,
}

impl Tile {
    /// Wrap an existing payload.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// Tile filled with `value` f32 elements, little-endian.
    ///
    /// Demo and test data; the engine itself never interprets the bytes.
    #[must_use]
    pub fn splat_f32(value: f32, elems: usize) -> Self {
        let mut buf = Vec::with_capacity(elems * 4);
        for _ in 0..elems {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        Self { data: buf.into() }
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tile holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Payload bytes.
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// First f32 element, little-endian. Demo/verification helper.
    #[must_use]
    pub fn first_f32(&self) -> Option<f32> {
        let chunk: [u8; 4] = self.data.get(0..4)?.try_into().ok()?;
        Some(f32::from_le_bytes(chunk))
    }
}

impl From<Vec<u8>> for Tile {
    fn from(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splat_layout() {
        let tile = Tile::splat_f32(30.0, 8);
        assert_eq!(tile.len(), 32);
        assert_eq!(tile.first_f32(), Some(30.0));
    }

    #[test]
    fn clone_shares_payload() {
        let tile = Tile::splat_f32(1.5, 1024);
        let copy = tile.clone();
        // Bytes clones share the buffer pointer.
        assert_eq!(tile.bytes().as_ptr(), copy.bytes().as_ptr());
    }

    #[test]
    fn first_f32_of_short_tile_is_none() {
        let tile = Tile::from(vec![1u8, 2]);
        assert_eq!(tile.first_f32(), None);
    }
}
