// File: torrentree-cli/src/render.rs
//! Text rendering of a run's stages.
use std::io::{self, Write};

use torrentree_hash::Digest;
use torrentree_merkle::{AncestorPath, MerkleTree, NodeRef};
use torrentree_pieces::Piece;
use torrentree_sim::{Delivery, Stage, Transfer, Verification};

pub fn format_file_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

pub fn stage_header(w: &mut impl Write, stage: Stage) -> io::Result<()> {
    writeln!(w)?;
    writeln!(w, "== {stage} ==")
}

pub fn pieces(w: &mut impl Write, pieces: &[Piece], piece_size: usize) -> io::Result<()> {
    writeln!(
        w,
        "The file is split into {} pieces for efficient transfer.",
        pieces.len()
    )?;
    for p in pieces {
        writeln!(
            w,
            "  Piece {:<4} offset {:<8} {}",
            p.index() + 1,
            p.offset(piece_size),
            format_file_size(p.len() as u64)
        )?;
    }
    Ok(())
}

pub fn hashes(w: &mut impl Write, leaves: &[Digest], preview: usize) -> io::Result<()> {
    writeln!(
        w,
        "Each piece is hashed; these digests are the leaves of the Merkle tree."
    )?;
    for (i, d) in leaves.iter().enumerate() {
        writeln!(w, "  Piece {:<4} {}", i + 1, d.short(preview))?;
    }
    Ok(())
}

/// Levels from the root down. Nodes on `highlight` are marked with `*`.
pub fn tree(
    w: &mut impl Write,
    tree: &MerkleTree,
    highlight: Option<&AncestorPath>,
    preview: usize,
) -> io::Result<()> {
    let height = tree.height();
    for (level, digests) in tree.levels().iter().enumerate().rev() {
        let row: Vec<String> = digests
            .iter()
            .enumerate()
            .map(|(index, d)| {
                let node = NodeRef::new(level, index);
                let mark = match highlight.is_some_and(|p| p.contains(level, index)) {
                    true => "*",
                    false => "",
                };
                format!("[{mark}{} {}]", node.label(height), d.short(preview))
            })
            .collect();
        writeln!(w, "  L{level}: {}", row.join(" "))?;
    }
    writeln!(
        w,
        "Root {} is what the torrent file would carry.",
        tree.root().short(preview.max(12))
    )
}

pub fn transfer(w: &mut impl Write, deliveries: &[Delivery], transfer: &Transfer) -> io::Result<()> {
    for d in deliveries {
        let note = match d.corrupted {
            true => "  (arrived corrupted)",
            false => "",
        };
        writeln!(w, "  received piece {}{note}", d.index + 1)?;
    }
    writeln!(
        w,
        "Progress: {:.0}% ({}/{} pieces)",
        transfer.progress(),
        transfer.received_count(),
        transfer.piece_count()
    )
}

pub fn verification(w: &mut impl Write, v: &Verification, preview: usize) -> io::Result<()> {
    if v.report.is_clean() {
        writeln!(w, "All pieces verified successfully.")?;
        writeln!(w, "The file is complete and matches the original.")?;
        writeln!(w, "Root hash: {}", v.root.short(preview.max(16)))?;
    } else {
        let list: Vec<String> = v
            .report
            .corrupted_ordinals()
            .iter()
            .map(ToString::to_string)
            .collect();
        writeln!(w, "Verification failed.")?;
        writeln!(w, "Corrupted pieces detected: {}", list.join(", "))?;
        writeln!(
            w,
            "Only these pieces need to be downloaded again from other peers."
        )?;
    }
    if !v.report.missing().is_empty() {
        writeln!(w, "{} pieces not received yet.", v.report.missing().len())?;
    }
    Ok(())
}

pub fn path(
    w: &mut impl Write,
    path: &AncestorPath,
    tree: &MerkleTree,
    preview: usize,
) -> io::Result<()> {
    let height = tree.height();
    for (node, digest) in path.iter().zip(path.digests(tree)) {
        writeln!(
            w,
            "  L{} {:<8} {}",
            node.level,
            node.label(height),
            digest.short(preview)
        )?;
    }
    Ok(())
}
