use serde::{Deserialize, Serialize};
use torrentree_hash::Algorithm;

pub const DEFAULT_PIECE_SIZE: usize = 1024;
pub const DEFAULT_CORRUPTION_RATE: f64 = 0.3;
pub const DEFAULT_HASH_PREVIEW_LEN: usize = 8;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid piece size {0}: must be at least 1 byte")]
    InvalidPieceSize(usize),
    #[error("invalid corruption rate {0}: must be within 0.0..=1.0")]
    InvalidCorruptionRate(f64),
    #[error("invalid hash preview length: must be at least 1")]
    InvalidPreviewLen,
    #[error("can't parse parameters")]
    Toml(#[from] toml::de::Error),
}

/// Run parameters as they appear in a TOML file. Unset fields fall back to defaults.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Params {
    /// Piece size in bytes
    pub piece_size: Option<usize>,
    /// Digest function for pieces and tree nodes
    pub algorithm: Option<Algorithm>,
    pub transfer: Option<TransferParams>,
    pub presentation: Option<PresentationParams>,
}

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct TransferParams {
    /// Chance that a freshly received piece arrives corrupted
    pub corruption_rate: Option<f64>,
    /// Seed for the corruption RNG; random when unset
    pub seed: Option<u64>,
}

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct PresentationParams {
    /// Pause between pipeline stages when rendering
    pub stage_delay_ms: Option<u64>,
    /// Hex characters shown for abbreviated digests
    pub hash_preview_len: Option<usize>,
}

/// Parse run parameters from TOML text
pub fn load_params_toml(input: &str) -> Result<Params, toml::de::Error> {
    toml::from_str::<Params>(input)
}

/// Parse and validate a configuration from TOML text
pub fn load_config_toml(input: &str) -> Result<Config, Error> {
    load_params_toml(input)?.resolve()
}

impl Params {
    /// Field-wise overlay: values set in `other` win.
    pub fn merge(self, other: Params) -> Params {
        let transfer = match (self.transfer, other.transfer) {
            (Some(a), Some(b)) => Some(TransferParams {
                corruption_rate: b.corruption_rate.or(a.corruption_rate),
                seed: b.seed.or(a.seed),
            }),
            (a, b) => b.or(a),
        };
        let presentation = match (self.presentation, other.presentation) {
            (Some(a), Some(b)) => Some(PresentationParams {
                stage_delay_ms: b.stage_delay_ms.or(a.stage_delay_ms),
                hash_preview_len: b.hash_preview_len.or(a.hash_preview_len),
            }),
            (a, b) => b.or(a),
        };
        Params {
            piece_size: other.piece_size.or(self.piece_size),
            algorithm: other.algorithm.or(self.algorithm),
            transfer,
            presentation,
        }
    }

    pub fn resolve(&self) -> Result<Config, Error> {
        let defaults = Config::default();
        let transfer = self.transfer.clone().unwrap_or_default();
        let presentation = self.presentation.clone().unwrap_or_default();
        let config = Config {
            piece_size: self.piece_size.unwrap_or(defaults.piece_size),
            algorithm: self.algorithm.unwrap_or(defaults.algorithm),
            transfer: TransferConfig {
                corruption_rate: transfer
                    .corruption_rate
                    .unwrap_or(defaults.transfer.corruption_rate),
                seed: transfer.seed.or(defaults.transfer.seed),
            },
            presentation: PresentationConfig {
                stage_delay_ms: presentation
                    .stage_delay_ms
                    .unwrap_or(defaults.presentation.stage_delay_ms),
                hash_preview_len: presentation
                    .hash_preview_len
                    .unwrap_or(defaults.presentation.hash_preview_len),
            },
        };
        config.validate()?;
        Ok(config)
    }
}

/// Validated configuration of one simulation run.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Config {
    pub piece_size: usize,
    pub algorithm: Algorithm,
    pub transfer: TransferConfig,
    pub presentation: PresentationConfig,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct TransferConfig {
    pub corruption_rate: f64,
    pub seed: Option<u64>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PresentationConfig {
    pub stage_delay_ms: u64,
    pub hash_preview_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            piece_size: DEFAULT_PIECE_SIZE,
            algorithm: Algorithm::default(),
            transfer: TransferConfig {
                corruption_rate: DEFAULT_CORRUPTION_RATE,
                seed: None,
            },
            presentation: PresentationConfig {
                stage_delay_ms: 0,
                hash_preview_len: DEFAULT_HASH_PREVIEW_LEN,
            },
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.piece_size == 0 {
            return Err(Error::InvalidPieceSize(self.piece_size));
        }
        let rate = self.transfer.corruption_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(Error::InvalidCorruptionRate(rate));
        }
        if self.presentation.hash_preview_len == 0 {
            return Err(Error::InvalidPreviewLen);
        }
        Ok(())
    }
}
