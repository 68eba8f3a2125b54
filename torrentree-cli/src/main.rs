// File: torrentree-cli/src/main.rs
mod render;

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use torrentree_hash::Algorithm;
use torrentree_sim::{SimulationRun, Stage};
use torrentree_spec::{load_params_toml, Config, Params, PresentationParams, TransferParams};
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Parser)]
#[command(name = "torrentree", version, about = "How BitTorrent-style Merkle trees verify file pieces")]
struct Cli {
    /// The log level. RUST_LOG takes precedence when set.
    #[arg(value_enum, short = 'v', long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args)]
struct RunArgs {
    /// File to split into pieces
    #[arg(short, long)]
    file: Option<PathBuf>,
    /// Piece size in bytes
    #[arg(long)]
    piece_size: Option<usize>,
    /// Digest function: sha256 or sha3-256
    #[arg(long)]
    algorithm: Option<Algorithm>,
    /// Optional params file (toml); flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run every stage: split, hash, build the tree, transfer, verify
    Simulate {
        #[command(flatten)]
        run: RunArgs,
        /// Mark piece N (1-based) corrupted after the transfer; repeatable
        #[arg(long = "corrupt", value_name = "N")]
        corrupt: Vec<usize>,
        /// Chance that a received piece arrives corrupted
        #[arg(long)]
        corruption_rate: Option<f64>,
        /// Seed for the simulated corruption
        #[arg(long)]
        seed: Option<u64>,
        /// Pause between stages, in milliseconds
        #[arg(long)]
        stage_delay_ms: Option<u64>,
    },
    /// Print the Merkle tree, root first
    Tree {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Print the ancestor path from a piece to the root
    Path {
        #[command(flatten)]
        run: RunArgs,
        /// Piece number (1-based)
        #[arg(long)]
        piece: usize,
    },
}

fn init_logging(level: Option<LogLevel>) -> anyhow::Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_rust_log = match level {
        Some(level) => match level {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        },
        None => "info",
    };
    let stderr_filter = match std::env::var("RUST_LOG").ok() {
        Some(rust_log) => EnvFilter::builder()
            .parse(&rust_log)
            .context("can't parse RUST_LOG")?,
        None => EnvFilter::builder()
            .parse(default_rust_log)
            .context("can't parse default log level")?,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(stderr_filter)
        .init();
    Ok(())
}

fn read_input(file: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    let Some(path) = file else {
        anyhow::bail!("Please select a file first (--file)");
    };
    let data = fs::read(path).with_context(|| format!("error reading {path:?}"))?;
    info!(
        file = %path.display(),
        size = %render::format_file_size(data.len() as u64),
        "loaded file"
    );
    Ok(data)
}

fn load_config(args: &RunArgs, overlay: Params) -> anyhow::Result<Config> {
    let from_file = match &args.config {
        Some(p) => {
            let txt = fs::read_to_string(p).with_context(|| format!("error reading {p:?}"))?;
            load_params_toml(&txt).with_context(|| format!("can't parse params file {p:?}"))?
        }
        None => Params::default(),
    };
    let flags = Params {
        piece_size: args.piece_size,
        algorithm: args.algorithm,
        ..overlay
    };
    from_file
        .merge(flags)
        .resolve()
        .context("invalid configuration")
}

fn start_run(args: &RunArgs, overlay: Params) -> anyhow::Result<SimulationRun> {
    let data = read_input(args.file.as_deref())?;
    let config = load_config(args, overlay)?;
    let cancel = CancellationToken::new();
    SimulationRun::start(data, config, &cancel).context("simulation run failed")
}

fn piece_index(ordinal: usize, count: usize) -> anyhow::Result<usize> {
    if ordinal == 0 || ordinal > count {
        anyhow::bail!("piece {ordinal} does not exist, valid pieces are 1..={count}");
    }
    Ok(ordinal - 1)
}

fn pace(config: &Config) {
    let ms = config.presentation.stage_delay_ms;
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

fn simulate(
    out: &mut impl Write,
    mut run: SimulationRun,
    corrupt: &[usize],
    json: bool,
) -> anyhow::Result<()> {
    let count = run.pieces().len();
    let indices = corrupt
        .iter()
        .map(|&n| piece_index(n, count))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let config = run.config().clone();
    let preview = config.presentation.hash_preview_len;

    if !json {
        render::stage_header(out, Stage::Split)?;
        render::pieces(out, run.pieces(), config.piece_size)?;
        pace(&config);
        render::stage_header(out, Stage::Hashed)?;
        render::hashes(out, run.leaf_digests(), preview)?;
        pace(&config);
        render::stage_header(out, Stage::TreeBuilt)?;
        render::tree(out, run.tree(), None, preview)?;
        pace(&config);
    }

    let deliveries = run.run_transfer();
    for i in indices {
        let already = run.transfer().is_some_and(|t| t.overrides().contains(i));
        if !already {
            run.toggle_corruption(i)?;
        }
    }
    if !json {
        render::stage_header(out, Stage::Transferring)?;
        if let Some(t) = run.transfer() {
            render::transfer(out, &deliveries, t)?;
        }
        pace(&config);
    }

    let verification = run.verify()?;
    if json {
        let doc = serde_json::json!({
            "run": run.summary()?,
            "verification": verification,
        });
        serde_json::to_writer_pretty(&mut *out, &doc)?;
        writeln!(out)?;
        return Ok(());
    }
    render::stage_header(out, Stage::Verified)?;
    render::verification(out, &verification, preview)?;
    if let Some(path) = &verification.highlighted {
        let piece = path.leaf().map(|n| n.index + 1).unwrap_or_default();
        writeln!(out, "Verification path for piece {piece}:")?;
        render::tree(out, run.tree(), Some(path), preview)?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level)?;

    match cli.cmd {
        Cmd::Simulate {
            run,
            corrupt,
            corruption_rate,
            seed,
            stage_delay_ms,
        } => {
            let overlay = Params {
                transfer: Some(TransferParams {
                    corruption_rate,
                    seed,
                }),
                presentation: Some(PresentationParams {
                    stage_delay_ms,
                    hash_preview_len: None,
                }),
                ..Params::default()
            };
            let sim = start_run(&run, overlay)?;
            simulate(&mut io::stdout().lock(), sim, &corrupt, run.json)?;
        }
        Cmd::Tree { run } => {
            let sim = start_run(&run, Params::default())?;
            let mut out = io::stdout().lock();
            if run.json {
                serde_json::to_writer_pretty(&mut out, sim.tree())?;
                writeln!(out)?;
            } else {
                let preview = sim.config().presentation.hash_preview_len;
                render::tree(&mut out, sim.tree(), None, preview)?;
            }
        }
        Cmd::Path { run, piece } => {
            let sim = start_run(&run, Params::default())?;
            let index = piece_index(piece, sim.pieces().len())?;
            let path = sim.path_to_root(index)?;
            let mut out = io::stdout().lock();
            if run.json {
                let nodes: Vec<_> = path
                    .iter()
                    .zip(path.digests(sim.tree()))
                    .map(|(n, d)| serde_json::json!({ "level": n.level, "index": n.index, "digest": d }))
                    .collect();
                serde_json::to_writer_pretty(&mut out, &nodes)?;
                writeln!(out)?;
            } else {
                let preview = sim.config().presentation.hash_preview_len;
                writeln!(out, "Ancestor path of piece {piece}:")?;
                render::path(&mut out, &path, sim.tree(), preview)?;
            }
        }
    }
    Ok(())
}
