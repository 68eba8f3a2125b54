use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use torrentree_pieces::Piece;
use torrentree_verify::Overrides;
use tracing::trace;

use crate::{Error, Result};

/// One piece arriving at the leecher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub index: usize,
    pub corrupted: bool,
}

/// The downloading peer's view of a transfer: which pieces arrived, and which are flagged corrupt.
///
/// Pieces are fetched in order. Each freshly received piece has its corruption flag
/// toggled with probability `corruption_rate`, so a hit on a piece flagged by hand clears it.
pub struct Transfer {
    slots: Vec<Option<Vec<u8>>>,
    cursor: usize,
    overrides: Overrides,
    corruption_rate: f64,
    rng: StdRng,
}

impl Transfer {
    /// A rate outside `0.0..=1.0` is clamped; a non-finite rate disables random corruption.
    pub fn new(piece_count: usize, corruption_rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            slots: vec![None; piece_count],
            cursor: 0,
            overrides: Overrides::new(),
            corruption_rate: match corruption_rate.is_finite() {
                true => corruption_rate.clamp(0.0, 1.0),
                false => 0.0,
            },
            rng,
        }
    }

    pub fn piece_count(&self) -> usize {
        self.slots.len()
    }
    pub fn received(&self) -> &[Option<Vec<u8>>] {
        &self.slots
    }
    pub fn received_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
    pub fn is_received(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(Option::is_some)
    }
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }
    pub fn overrides(&self) -> &Overrides {
        &self.overrides
    }

    /// Download progress in percent.
    pub fn progress(&self) -> f64 {
        if self.slots.is_empty() {
            return 100.0;
        }
        self.received_count() as f64 / self.slots.len() as f64 * 100.0
    }

    /// Receive the next missing piece from `pieces`, or `None` once everything arrived.
    pub fn step(&mut self, pieces: &[Piece]) -> Option<Delivery> {
        while self.cursor < self.slots.len() && self.slots[self.cursor].is_some() {
            self.cursor += 1;
        }
        let index = self.cursor;
        let piece = pieces.get(index)?;
        *self.slots.get_mut(index)? = Some(piece.data().to_vec());
        self.cursor += 1;

        let corrupted = match self.rng.gen_bool(self.corruption_rate) {
            true => self.overrides.toggle(index),
            false => self.overrides.contains(index),
        };
        trace!(piece = index, corrupted, progress = self.progress(), "received piece");
        Some(Delivery { index, corrupted })
    }

    /// Receive every remaining piece.
    pub fn run(&mut self, pieces: &[Piece]) -> Vec<Delivery> {
        std::iter::from_fn(|| self.step(pieces)).collect()
    }

    /// Flip the corruption flag of a piece; returns whether it is now flagged.
    pub fn toggle_corruption(&mut self, index: usize) -> Result<bool> {
        self.check_index(index)?;
        Ok(self.overrides.toggle(index))
    }

    /// Replace the bytes of a received piece, e.g. to model bit rot in transit.
    pub fn tamper(&mut self, index: usize, bytes: Vec<u8>) -> Result<()> {
        self.check_index(index)?;
        match self.slots.get_mut(index) {
            Some(Some(slot)) => {
                *slot = bytes;
                Ok(())
            }
            _ => Err(Error::NotReceived(index)),
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.slots.len() {
            return Err(Error::PieceOutOfRange {
                index,
                count: self.slots.len(),
            });
        }
        Ok(())
    }
}
