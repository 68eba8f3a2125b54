// File: torrentree-sim/src/lib.rs
//! One simulation run: split a file into pieces, hash them, build the Merkle tree,
//! simulate a transfer to a leecher and verify what arrived.
//!
//! A [`SimulationRun`] owns every intermediate result. Nothing is shared between runs;
//! discarding a run (or cancelling it while it starts) discards all of its state.

mod transfer;

pub use transfer::{Delivery, Transfer};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use torrentree_hash::Digest;
use torrentree_merkle::{AncestorPath, MerkleTree};
use torrentree_pieces::{hash_all_cancellable, split, Layout, Piece};
use torrentree_spec::Config;
use torrentree_verify::{verify_all, verify_received, Overrides, VerificationReport};
use tracing::{debug, debug_span, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("simulation run was cancelled")]
    Cancelled,
    #[error("invalid configuration")]
    Config(#[from] torrentree_spec::Error),
    #[error(transparent)]
    Pieces(#[from] torrentree_pieces::Error),
    #[error(transparent)]
    Merkle(#[from] torrentree_merkle::Error),
    #[error(transparent)]
    Verify(#[from] torrentree_verify::Error),
    #[error("piece index {index} out of range for {count} pieces")]
    PieceOutOfRange { index: usize, count: usize },
    #[error("piece {0} has not been received yet")]
    NotReceived(usize),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Split,
    Hashed,
    TreeBuilt,
    Transferring,
    Verified,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Split,
        Stage::Hashed,
        Stage::TreeBuilt,
        Stage::Transferring,
        Stage::Verified,
    ];

    /// 1-based step number.
    pub const fn step(&self) -> usize {
        match self {
            Stage::Split => 1,
            Stage::Hashed => 2,
            Stage::TreeBuilt => 3,
            Stage::Transferring => 4,
            Stage::Verified => 5,
        }
    }

    pub const fn title(&self) -> &'static str {
        match self {
            Stage::Split => "File Divided into Pieces",
            Stage::Hashed => "Hashing Each Piece",
            Stage::TreeBuilt => "Building the Merkle Tree",
            Stage::Transferring => "Peer-to-Peer Transfer Simulation",
            Stage::Verified => "Verifying Downloaded Pieces",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}. {}", self.step(), self.title())
    }
}

/// Result of verifying a run. The tree root is the one recorded at build time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub report: VerificationReport,
    /// Ancestor chain of the first corrupted piece, if any.
    pub highlighted: Option<AncestorPath>,
    pub root: Digest,
}

pub struct SimulationRun {
    config: Config,
    data: Vec<u8>,
    layout: Layout,
    pieces: Vec<Piece>,
    leaves: Vec<Digest>,
    tree: MerkleTree,
    transfer: Option<Transfer>,
    stage: Stage,
}

impl SimulationRun {
    /// Split, hash and build the tree. `cancel` is checked between and during stages;
    /// a cancelled start returns [`Error::Cancelled`] and keeps nothing.
    pub fn start(data: Vec<u8>, config: Config, cancel: &CancellationToken) -> Result<Self> {
        config.validate()?;
        let span = debug_span!(
            "simulation_run",
            bytes = data.len(),
            piece_size = config.piece_size,
            algorithm = %config.algorithm
        );
        let _guard = span.enter();
        let checkpoint = || match cancel.is_cancelled() {
            true => Err(Error::Cancelled),
            false => Ok(()),
        };

        checkpoint()?;
        let layout = Layout::new(data.len(), config.piece_size)?;
        let pieces = split(&data, config.piece_size)?;
        debug!(stage = %Stage::Split, pieces = pieces.len());

        checkpoint()?;
        let hasher = config.algorithm;
        let leaves = hash_all_cancellable(&hasher, &pieces, || cancel.is_cancelled())
            .ok_or(Error::Cancelled)?;
        debug!(stage = %Stage::Hashed, leaves = leaves.len());

        checkpoint()?;
        let tree = MerkleTree::build(&hasher, &leaves)?;
        checkpoint()?;
        debug!(stage = %Stage::TreeBuilt, height = tree.height(), root = %tree.root());

        Ok(Self {
            config,
            data,
            layout,
            pieces,
            leaves,
            tree,
            transfer: None,
            stage: Stage::TreeBuilt,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }
    pub fn leaf_digests(&self) -> &[Digest] {
        &self.leaves
    }
    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }
    pub fn root(&self) -> Digest {
        self.tree.root()
    }
    pub fn stage(&self) -> Stage {
        self.stage
    }
    pub fn layout(&self) -> Layout {
        self.layout
    }
    pub fn transfer(&self) -> Option<&Transfer> {
        self.transfer.as_ref()
    }

    /// Start (or resume) the simulated download.
    pub fn begin_transfer(&mut self) -> &mut Transfer {
        self.stage = Stage::Transferring;
        let (count, rate, seed) = (
            self.pieces.len(),
            self.config.transfer.corruption_rate,
            self.config.transfer.seed,
        );
        self.transfer
            .get_or_insert_with(|| Transfer::new(count, rate, seed))
    }

    pub fn step_transfer(&mut self) -> Option<Delivery> {
        self.begin_transfer();
        self.transfer.as_mut()?.step(&self.pieces)
    }

    pub fn run_transfer(&mut self) -> Vec<Delivery> {
        self.begin_transfer();
        match self.transfer.as_mut() {
            Some(t) => t.run(&self.pieces),
            None => Vec::new(),
        }
    }

    pub fn toggle_corruption(&mut self, index: usize) -> Result<bool> {
        self.begin_transfer().toggle_corruption(index)
    }

    pub fn tamper(&mut self, index: usize, bytes: Vec<u8>) -> Result<()> {
        self.begin_transfer().tamper(index, bytes)
    }

    /// Verify the received pieces (all pieces when no transfer was started).
    /// Never rebuilds or alters the tree.
    pub fn verify(&mut self) -> Result<Verification> {
        let report = self.report()?;
        let highlighted = report
            .first_mismatch()
            .map(|i| self.tree.path_to_root(i))
            .transpose()?;
        self.stage = Stage::Verified;

        let root = self.tree.root();
        if report.is_clean() {
            info!(
                checked = report.results().len(),
                missing = report.missing().len(),
                root = %root.short(16),
                "all received pieces verified"
            );
        } else {
            warn!(corrupted = ?report.corrupted_ordinals(), "corrupted pieces detected");
        }
        Ok(Verification {
            report,
            highlighted,
            root,
        })
    }

    fn report(&self) -> Result<VerificationReport> {
        let hasher = self.config.algorithm;
        let report = match &self.transfer {
            Some(t) => verify_received(&hasher, t.received(), &self.leaves, t.overrides())?,
            None => verify_all(&hasher, &self.pieces, &self.leaves, &Overrides::new())?,
        };
        Ok(report)
    }

    pub fn path_to_root(&self, piece: usize) -> Result<AncestorPath> {
        Ok(self.tree.path_to_root(piece)?)
    }

    /// Snapshot of the run. `corrupted` lists the received pieces that currently fail
    /// verification, whether flagged or actually altered.
    pub fn summary(&self) -> Result<RunSummary<'_>> {
        let pieces = self
            .pieces
            .iter()
            .zip(&self.leaves)
            .map(|(p, d)| PieceSummary {
                index: p.index(),
                offset: p.offset(self.config.piece_size),
                len: p.len(),
                digest: *d,
            })
            .collect();
        let corrupted = self.report()?.mismatches();
        Ok(RunSummary {
            config: &self.config,
            stage: self.stage,
            total_bytes: self.data.len(),
            pieces,
            levels: self.tree.levels(),
            root: self.tree.root(),
            progress: self.transfer.as_ref().map(Transfer::progress),
            corrupted,
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PieceSummary {
    pub index: usize,
    pub offset: usize,
    pub len: usize,
    pub digest: Digest,
}

/// Plain data view of a run for presentation layers.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary<'a> {
    pub config: &'a Config,
    pub stage: Stage,
    pub total_bytes: usize,
    pub pieces: Vec<PieceSummary>,
    pub levels: &'a [Vec<Digest>],
    pub root: Digest,
    pub progress: Option<f64>,
    pub corrupted: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use torrentree_hash::Algorithm;

    fn config(piece_size: usize, corruption_rate: f64) -> Config {
        let mut c = Config {
            piece_size,
            ..Config::default()
        };
        c.transfer.corruption_rate = corruption_rate;
        c.transfer.seed = Some(3);
        c
    }

    fn text(len: usize) -> Vec<u8> {
        b"The quick brown fox jumps over the lazy dog. "
            .iter()
            .copied()
            .cycle()
            .take(len)
            .collect()
    }

    #[test]
    fn start_builds_all_stages() {
        let run = SimulationRun::start(text(100), config(30, 0.0), &CancellationToken::new())
            .unwrap();
        assert_eq!(run.stage(), Stage::TreeBuilt);
        assert_eq!(run.pieces().len(), 4);
        assert_eq!(run.leaf_digests().len(), 4);
        assert_eq!(run.tree().height(), 3);
        assert_eq!(run.layout().last_piece_len(), 10);
        assert_eq!(run.data(), text(100).as_slice());
    }

    #[test]
    fn cancelled_run_keeps_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = SimulationRun::start(text(100), config(30, 0.0), &cancel);
        assert!(matches!(res, Err(Error::Cancelled)));
    }

    #[test]
    fn invalid_inputs_fail_the_run() {
        let cancel = CancellationToken::new();
        assert!(matches!(
            SimulationRun::start(text(10), config(0, 0.0), &cancel),
            Err(Error::Config(torrentree_spec::Error::InvalidPieceSize(0)))
        ));
        assert!(matches!(
            SimulationRun::start(Vec::new(), config(8, 0.0), &cancel),
            Err(Error::Merkle(torrentree_merkle::Error::EmptyLeaves))
        ));
    }

    #[test]
    fn verify_without_transfer_is_clean() {
        let mut run =
            SimulationRun::start(text(64), config(16, 0.0), &CancellationToken::new()).unwrap();
        let v = run.verify().unwrap();
        assert!(v.report.is_clean());
        assert!(v.highlighted.is_none());
        assert_eq!(v.root, run.root());
        assert_eq!(run.stage(), Stage::Verified);
    }

    #[test]
    fn partial_transfer_skips_missing_pieces() {
        let mut run =
            SimulationRun::start(text(64), config(16, 0.0), &CancellationToken::new()).unwrap();
        run.step_transfer();
        run.step_transfer();
        assert_eq!(run.stage(), Stage::Transferring);
        assert_eq!(run.transfer().map(Transfer::progress), Some(50.0));
        let v = run.verify().unwrap();
        assert_eq!(v.report.missing(), &[2, 3]);
        assert!(v.report.is_clean());
    }

    #[test]
    fn tampered_bytes_are_detected_and_highlighted() {
        let mut run =
            SimulationRun::start(text(80), config(16, 0.0), &CancellationToken::new()).unwrap();
        let root = run.root();
        run.run_transfer();
        run.tamper(3, b"not the original piece".to_vec()).unwrap();
        let v = run.verify().unwrap();
        assert_eq!(v.report.corrupted_ordinals(), vec![4]);
        let path = v.highlighted.unwrap();
        assert_eq!(path.leaf().map(|n| n.index), Some(3));
        assert_eq!(path.len(), run.tree().height());
        assert_eq!(run.root(), root);
    }

    #[test]
    fn toggled_corruption_clears_again() {
        let mut run =
            SimulationRun::start(text(80), config(16, 0.0), &CancellationToken::new()).unwrap();
        run.run_transfer();
        assert!(run.toggle_corruption(1).unwrap());
        assert_eq!(run.verify().unwrap().report.mismatches(), vec![1]);
        assert!(!run.toggle_corruption(1).unwrap());
        assert!(run.verify().unwrap().report.is_clean());
    }

    #[test]
    fn algorithm_choice_changes_root() {
        let cancel = CancellationToken::new();
        let a = SimulationRun::start(text(100), config(30, 0.0), &cancel).unwrap();
        let mut cfg = config(30, 0.0);
        cfg.algorithm = Algorithm::Sha3_256;
        let b = SimulationRun::start(text(100), cfg, &cancel).unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn summary_serializes() {
        let mut run =
            SimulationRun::start(text(100), config(30, 1.0), &CancellationToken::new()).unwrap();
        run.run_transfer();
        let json = serde_json::to_value(run.summary().unwrap()).unwrap();
        assert_eq!(json["pieces"].as_array().unwrap().len(), 4);
        assert_eq!(json["levels"].as_array().unwrap().len(), 3);
        assert_eq!(json["root"], run.root().to_hex());
        assert_eq!(json["stage"], "transferring");
        assert_eq!(json["corrupted"], serde_json::json!([0, 1, 2, 3]));
        assert_eq!(json["pieces"][3]["offset"], 90);
    }

    #[test]
    fn summary_counts_tampered_pieces() {
        let mut run =
            SimulationRun::start(text(80), config(16, 0.0), &CancellationToken::new()).unwrap();
        run.run_transfer();
        run.tamper(2, b"bit rot".to_vec()).unwrap();
        run.toggle_corruption(4).unwrap();
        let mismatches = run.verify().unwrap().report.mismatches();
        assert_eq!(mismatches, vec![2, 4]);
        assert_eq!(run.summary().unwrap().corrupted, mismatches);
    }

    #[test]
    fn flagging_a_missing_piece_keeps_it_missing() {
        let mut run =
            SimulationRun::start(text(64), config(16, 0.0), &CancellationToken::new()).unwrap();
        run.step_transfer();
        assert!(run.toggle_corruption(3).unwrap());
        let v = run.verify().unwrap();
        assert_eq!(v.report.missing(), &[1, 2, 3]);
        assert!(v.report.is_clean());
        assert_eq!(
            v.report.status(3),
            Some(torrentree_verify::PieceStatus::Missing)
        );

        run.run_transfer();
        assert_eq!(run.verify().unwrap().report.corrupted_ordinals(), vec![4]);
    }

    #[test]
    fn stages_are_numbered() {
        let steps: Vec<usize> = Stage::ALL.iter().map(Stage::step).collect();
        assert_eq!(steps, vec![1, 2, 3, 4, 5]);
        assert_eq!(Stage::TreeBuilt.to_string(), "3. Building the Merkle Tree");
    }
}
