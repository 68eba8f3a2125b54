// File: torrentree-verify/src/lib.rs
use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use torrentree_hash::{Digest, Hasher};
use torrentree_pieces::Piece;
use tracing::{debug, warn};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("{pieces} pieces but {digests} original digests")]
    LengthMismatch { pieces: usize, digests: usize },
    #[error("piece index {index} out of range for {count} pieces")]
    IndexOutOfRange { index: usize, count: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Piece indices forced to fail verification regardless of their bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides(BTreeSet<usize>);

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, index: usize) -> bool {
        self.0.insert(index)
    }
    pub fn remove(&mut self, index: usize) -> bool {
        self.0.remove(&index)
    }
    /// Flips the corruption flag of `index`; returns whether it is now forced corrupt.
    pub fn toggle(&mut self, index: usize) -> bool {
        if self.0.remove(&index) {
            false
        } else {
            self.0.insert(index);
            true
        }
    }
    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<usize> for Overrides {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub index: usize,
    pub recomputed: Digest,
    pub matches: bool,
    /// The mismatch came from an override rather than from the bytes.
    pub forced: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PieceStatus {
    Missing,
    Verified,
    Corrupted,
}

/// Whether `current` still hashes to `original`.
pub fn matches<H: Hasher>(hasher: &H, current: &[u8], original: &Digest) -> bool {
    hasher.digest(current) == *original
}

pub fn verify<H: Hasher>(
    hasher: &H,
    index: usize,
    current: &[u8],
    original: &Digest,
    forced_corrupt: bool,
) -> VerificationResult {
    let recomputed = hasher.digest(current);
    let matches = !forced_corrupt && recomputed == *original;
    if !matches {
        warn!(piece = index, forced = forced_corrupt, "piece failed verification");
    }
    VerificationResult {
        index,
        recomputed,
        matches,
        forced: forced_corrupt,
    }
}

/// Verify every piece against its original digest.
pub fn verify_all<H: Hasher + Sync>(
    hasher: &H,
    pieces: &[Piece],
    originals: &[Digest],
    overrides: &Overrides,
) -> Result<VerificationReport> {
    let slots: Vec<Option<&[u8]>> = pieces.iter().map(|p| Some(p.data())).collect();
    verify_received(hasher, &slots, originals, overrides)
}

/// Verify the pieces received so far; `None` slots have not arrived and are skipped.
pub fn verify_received<H, B>(
    hasher: &H,
    received: &[Option<B>],
    originals: &[Digest],
    overrides: &Overrides,
) -> Result<VerificationReport>
where
    H: Hasher + Sync,
    B: AsRef<[u8]> + Sync,
{
    if received.len() != originals.len() {
        return Err(Error::LengthMismatch {
            pieces: received.len(),
            digests: originals.len(),
        });
    }
    if let Some(index) = overrides.iter().find(|&i| i >= received.len()) {
        return Err(Error::IndexOutOfRange {
            index,
            count: received.len(),
        });
    }

    let checked: Vec<Option<VerificationResult>> = received
        .par_iter()
        .zip(originals.par_iter())
        .enumerate()
        .map(|(index, (bytes, original))| {
            bytes
                .as_ref()
                .map(|b| verify(hasher, index, b.as_ref(), original, overrides.contains(index)))
        })
        .collect();

    let mut report = VerificationReport {
        total: received.len(),
        results: Vec::with_capacity(received.len()),
        missing: Vec::new(),
    };
    for (index, slot) in checked.into_iter().enumerate() {
        match slot {
            Some(result) => report.results.push(result),
            None => report.missing.push(index),
        }
    }
    debug!(
        checked = report.results.len(),
        missing = report.missing.len(),
        corrupted = report.mismatches().len(),
        "verification finished"
    );
    Ok(report)
}

/// Outcome of a batch verification, in piece order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    total: usize,
    results: Vec<VerificationResult>,
    missing: Vec<usize>,
}

impl VerificationReport {
    pub fn results(&self) -> &[VerificationResult] {
        &self.results
    }
    pub fn missing(&self) -> &[usize] {
        &self.missing
    }
    pub fn total(&self) -> usize {
        self.total
    }

    /// 0-based indices of pieces that failed.
    pub fn mismatches(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter(|r| !r.matches)
            .map(|r| r.index)
            .collect()
    }

    /// 1-based piece numbers of failed pieces, as shown to users.
    pub fn corrupted_ordinals(&self) -> Vec<usize> {
        self.mismatches().into_iter().map(|i| i + 1).collect()
    }

    pub fn first_mismatch(&self) -> Option<usize> {
        self.results.iter().find(|r| !r.matches).map(|r| r.index)
    }

    /// No checked piece failed. Missing pieces do not count as failures.
    pub fn is_clean(&self) -> bool {
        self.results.iter().all(|r| r.matches)
    }

    pub fn status(&self, index: usize) -> Option<PieceStatus> {
        if index >= self.total {
            return None;
        }
        if self.missing.binary_search(&index).is_ok() {
            return Some(PieceStatus::Missing);
        }
        self.results
            .iter()
            .find(|r| r.index == index)
            .map(|r| match r.matches {
                true => PieceStatus::Verified,
                false => PieceStatus::Corrupted,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torrentree_hash::Algorithm;
    use torrentree_merkle::MerkleTree;
    use torrentree_pieces::{hash_all, split};

    const H: Algorithm = Algorithm::Sha256;

    fn five_pieces() -> (Vec<Piece>, Vec<Digest>) {
        let data: Vec<u8> = (0..50u8).collect();
        let pieces = split(&data, 10).unwrap();
        let digests = hash_all(&H, &pieces);
        (pieces, digests)
    }

    #[test]
    fn verify_round_trip_and_tamper() {
        let (pieces, digests) = five_pieces();
        let ok = verify(&H, 1, pieces[1].data(), &digests[1], false);
        assert!(ok.matches);
        assert_eq!(ok.recomputed, digests[1]);
        assert!(matches(&H, pieces[1].data(), &digests[1]));

        let mut tampered = pieces[1].data().to_vec();
        tampered[0] ^= 0x01;
        let bad = verify(&H, 1, &tampered, &digests[1], false);
        assert!(!bad.matches);
        assert!(!bad.forced);
    }

    #[test]
    fn override_forces_mismatch() {
        let (pieces, digests) = five_pieces();
        let r = verify(&H, 0, pieces[0].data(), &digests[0], true);
        assert!(!r.matches);
        assert!(r.forced);
        assert_eq!(r.recomputed, digests[0]);
    }

    #[test]
    fn verify_all_reports_only_corrupted_piece() {
        let (pieces, digests) = five_pieces();
        let tree = MerkleTree::build(&H, &digests).unwrap();
        let root_before = tree.root();

        let overrides: Overrides = [2].into_iter().collect();
        let report = verify_all(&H, &pieces, &digests, &overrides).unwrap();
        assert_eq!(report.mismatches(), vec![2]);
        assert_eq!(report.corrupted_ordinals(), vec![3]);
        assert_eq!(report.first_mismatch(), Some(2));
        assert!(!report.is_clean());
        assert_eq!(report.status(2), Some(PieceStatus::Corrupted));
        assert_eq!(report.status(3), Some(PieceStatus::Verified));
        assert_eq!(report.status(5), None);
        assert_eq!(tree.root(), root_before);

        let clean = verify_all(&H, &pieces, &digests, &Overrides::new()).unwrap();
        assert!(clean.is_clean());
        assert!(clean.mismatches().is_empty());
    }

    #[test]
    fn verify_received_skips_missing() {
        let (pieces, digests) = five_pieces();
        let mut received: Vec<Option<Vec<u8>>> =
            pieces.iter().map(|p| Some(p.data().to_vec())).collect();
        received[4] = None;
        received[1] = Some(b"garbage".to_vec());

        let report = verify_received(&H, &received, &digests, &Overrides::new()).unwrap();
        assert_eq!(report.missing(), &[4]);
        assert_eq!(report.results().len(), 4);
        assert_eq!(report.mismatches(), vec![1]);
        assert_eq!(report.status(4), Some(PieceStatus::Missing));
        let indices: Vec<usize> = report.results().iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn rejects_inconsistent_inputs() {
        let (pieces, digests) = five_pieces();
        assert_eq!(
            verify_all(&H, &pieces[..4], &digests, &Overrides::new()),
            Err(Error::LengthMismatch { pieces: 4, digests: 5 })
        );
        let overrides: Overrides = [7].into_iter().collect();
        assert_eq!(
            verify_all(&H, &pieces, &digests, &overrides),
            Err(Error::IndexOutOfRange { index: 7, count: 5 })
        );
    }

    #[test]
    fn overrides_toggle() {
        let mut o = Overrides::new();
        assert!(o.toggle(3));
        assert!(o.contains(3));
        assert!(!o.toggle(3));
        assert!(o.is_empty());
        o.insert(1);
        o.insert(0);
        assert_eq!(o.iter().collect::<Vec<_>>(), vec![0, 1]);
        assert!(o.remove(1));
        assert_eq!(o.len(), 1);
    }
}
