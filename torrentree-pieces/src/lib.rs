// File: torrentree-pieces/src/lib.rs
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use torrentree_hash::{Digest, Hasher};
use tracing::{debug, trace};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid piece size {0}: must be at least 1 byte")]
    InvalidPieceSize(usize),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A contiguous chunk of the input. Every piece is `piece_size` bytes except possibly the last.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    index: usize,
    #[serde(with = "hex::serde")]
    data: Vec<u8>,
}

impl Piece {
    pub fn new(index: usize, data: Vec<u8>) -> Self {
        Self { index, data }
    }
    pub fn index(&self) -> usize {
        self.index
    }
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    /// Byte offset of this piece in the original input.
    pub fn offset(&self, piece_size: usize) -> usize {
        self.index * piece_size
    }
}

impl std::fmt::Debug for Piece {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Piece")
            .field("index", &self.index)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Piece arithmetic for an input of `total_length` bytes, without touching the data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    total_length: usize,
    piece_size: usize,
}

impl Layout {
    pub fn new(total_length: usize, piece_size: usize) -> Result<Self> {
        if piece_size == 0 {
            return Err(Error::InvalidPieceSize(piece_size));
        }
        Ok(Self {
            total_length,
            piece_size,
        })
    }
    pub const fn total_length(&self) -> usize {
        self.total_length
    }
    pub const fn piece_size(&self) -> usize {
        self.piece_size
    }
    pub const fn piece_count(&self) -> usize {
        self.total_length.div_ceil(self.piece_size)
    }
    pub const fn last_piece_len(&self) -> usize {
        if self.total_length == 0 {
            return 0;
        }
        let rem = self.total_length % self.piece_size;
        if rem == 0 {
            return self.piece_size;
        }
        rem
    }
    pub const fn piece_len(&self, index: usize) -> Option<usize> {
        let count = self.piece_count();
        if index >= count {
            return None;
        }
        if index == count - 1 {
            return Some(self.last_piece_len());
        }
        Some(self.piece_size)
    }
    pub const fn piece_offset(&self, index: usize) -> usize {
        index * self.piece_size
    }
}

/// Split `data` into non-overlapping windows of `piece_size` bytes. No padding is added.
pub fn split(data: &[u8], piece_size: usize) -> Result<Vec<Piece>> {
    if piece_size == 0 {
        return Err(Error::InvalidPieceSize(piece_size));
    }
    let pieces: Vec<Piece> = data
        .chunks(piece_size)
        .enumerate()
        .map(|(index, chunk)| Piece::new(index, chunk.to_vec()))
        .collect();
    debug!(
        bytes = data.len(),
        piece_size,
        pieces = pieces.len(),
        "split input into pieces"
    );
    Ok(pieces)
}

/// Concatenate pieces back into the original byte sequence.
pub fn reassemble(pieces: &[Piece]) -> Vec<u8> {
    pieces.iter().flat_map(|p| p.data.iter().copied()).collect()
}

/// Leaf digests, one per piece, in piece order.
pub fn hash_all<H: Hasher + Sync>(hasher: &H, pieces: &[Piece]) -> Vec<Digest> {
    let leaves: Vec<Digest> = pieces
        .par_iter()
        .map(|p| {
            let d = hasher.digest(&p.data);
            trace!(piece = p.index, digest = %d.short(16), "hashed piece");
            d
        })
        .collect();
    debug!(leaves = leaves.len(), "hashed all pieces");
    leaves
}

/// Like [`hash_all`], but gives up as soon as `cancelled` reports true.
/// Returns `None` if any piece was skipped, so no partial leaf level escapes.
pub fn hash_all_cancellable<H, F>(hasher: &H, pieces: &[Piece], cancelled: F) -> Option<Vec<Digest>>
where
    H: Hasher + Sync,
    F: Fn() -> bool + Sync,
{
    let leaves: Option<Vec<Digest>> = pieces
        .par_iter()
        .map(|p| {
            if cancelled() {
                return None;
            }
            Some(hasher.digest(&p.data))
        })
        .collect();
    match &leaves {
        Some(l) => debug!(leaves = l.len(), "hashed all pieces"),
        None => debug!("piece hashing cancelled"),
    }
    leaves
}
