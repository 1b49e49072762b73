//! Run configuration shared by the library and the CLI.

use std::time::Duration;

use clap::ValueEnum;
use thiserror::Error;

use crate::genomics::{GenotypePriors, DEFAULT_HETEROZYGOSITY};
use crate::stream::DEFAULT_LOG_EVERY;

/// How evidence reaches durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PersistenceMode {
    /// Batch in memory, merge into a shared map, checkpoint periodically.
    #[default]
    WriteBack,
    /// Read-modify-write the durable store for every evidence tuple.
    WriteThrough,
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Batches must hold at least one read.
    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    /// The checkpoint timer needs a positive period.
    #[error("checkpoint interval must be positive")]
    ZeroCheckpointInterval,

    /// Heterozygosity must leave room for the other two priors.
    #[error("heterozygosity {0} is outside (0, 0.5)")]
    Heterozygosity(f64),

    /// The reference window is inverted.
    #[error("window start {start} is beyond window stop {stop}")]
    InvertedWindow {
        /// Requested start.
        start: u64,
        /// Requested stop.
        stop: u64,
    },
}

/// Parameters for one streaming run.
#[derive(Debug, Clone, PartialEq)]
pub struct CallerConfig {
    /// Persistence strategy.
    pub mode: PersistenceMode,
    /// Reads per write-back merge.
    pub batch_size: usize,
    /// Period of the checkpoint timer.
    pub checkpoint_interval: Duration,
    /// Per-site heterozygosity used to derive genotype priors.
    pub heterozygosity: f64,
    /// First reference position considered (0-based, inclusive).
    pub window_start: u64,
    /// End of the reference window (exclusive); `None` means contig end.
    pub window_stop: Option<u64>,
    /// Reads between progress log lines.
    pub log_every: u64,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            mode: PersistenceMode::WriteBack,
            batch_size: 1000,
            checkpoint_interval: Duration::from_secs(60),
            heterozygosity: DEFAULT_HETEROZYGOSITY,
            window_start: 0,
            window_stop: None,
            log_every: DEFAULT_LOG_EVERY,
        }
    }
}

impl CallerConfig {
    /// Set the persistence mode.
    pub fn with_mode(mut self, mode: PersistenceMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the write-back batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the checkpoint period.
    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Set the heterozygosity.
    pub fn with_heterozygosity(mut self, heterozygosity: f64) -> Self {
        self.heterozygosity = heterozygosity;
        self
    }

    /// Restrict processing to `[start, stop)`.
    pub fn with_window(mut self, start: u64, stop: Option<u64>) -> Self {
        self.window_start = start;
        self.window_stop = stop;
        self
    }

    /// Check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.checkpoint_interval.is_zero() {
            return Err(ConfigError::ZeroCheckpointInterval);
        }
        if !(self.heterozygosity > 0.0 && self.heterozygosity < 0.5) {
            return Err(ConfigError::Heterozygosity(self.heterozygosity));
        }
        if let Some(stop) = self.window_stop {
            if self.window_start > stop {
                return Err(ConfigError::InvertedWindow {
                    start: self.window_start,
                    stop,
                });
            }
        }
        Ok(())
    }

    /// Genotype priors for this configuration.
    pub fn priors(&self) -> GenotypePriors {
        GenotypePriors::from_heterozygosity(self.heterozygosity)
    }
}
