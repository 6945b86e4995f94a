//! Admission controller: decides how large the next chunk is and how long to
//! pause before it, from a smoothed success-rate signal and chunk latency.
//!
//! Pure state machine. It never sleeps or reads a clock; the dispatcher feeds
//! it one [`ChunkSample`] per barrier and acts on the returned [`Adjustment`].

use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Tuning for the admission controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub initial_size: usize,
    pub min_size: usize,
    pub max_size: usize,
    /// Weight of the newest chunk in the moving average.
    pub alpha: f64,
    pub grow_factor: f64,
    pub shrink_factor: f64,
    /// Grow only while the average is above this...
    pub grow_above: f64,
    /// ...and the chunk finished within this many seconds.
    pub grow_within_secs: f64,
    /// Shrink when the average drops below this...
    pub shrink_below: f64,
    /// ...or the chunk took longer than this many seconds.
    pub shrink_after_secs: f64,
    /// Above this average the short delay schedule applies.
    pub healthy_above: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            initial_size: 100,
            min_size: 50,
            max_size: 200,
            alpha: 0.3,
            grow_factor: 1.2,
            shrink_factor: 0.8,
            grow_above: 0.95,
            grow_within_secs: 2.0,
            shrink_below: 0.8,
            shrink_after_secs: 5.0,
            healthy_above: 0.9,
        }
    }
}

impl AdmissionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_size == 0 {
            return Err(Error::Config("admission.min_size must be at least 1".into()));
        }
        if !(self.min_size <= self.initial_size && self.initial_size <= self.max_size) {
            return Err(Error::Config(format!(
                "admission sizes must satisfy min <= initial <= max (got {} / {} / {})",
                self.min_size, self.initial_size, self.max_size
            )));
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(Error::Config(format!(
                "admission.alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }
        if !(self.grow_factor > 1.0) {
            return Err(Error::Config("admission.grow_factor must exceed 1".into()));
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor < 1.0) {
            return Err(Error::Config(
                "admission.shrink_factor must be in (0, 1)".into(),
            ));
        }
        Ok(())
    }
}

/// What one chunk looked like at its barrier.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSample {
    /// Items actually dispatched in the chunk.
    pub size: usize,
    pub successes: usize,
    pub elapsed: Duration,
}

impl ChunkSample {
    pub fn success_rate(&self) -> f64 {
        if self.size == 0 {
            return 1.0;
        }
        (self.successes as f64 / self.size as f64).clamp(0.0, 1.0)
    }

    /// Mean seconds per item in the chunk.
    fn secs_per_item(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.elapsed.as_secs_f64() / self.size as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resize {
    Grow,
    Shrink,
    Hold,
}

/// The controller's decision after a chunk.
#[derive(Debug, Clone, Copy)]
pub struct Adjustment {
    pub resize: Resize,
    /// Size of the next chunk.
    pub chunk_size: usize,
    /// Pause before the next chunk.
    pub delay: Duration,
    /// Smoothed success rate after folding in the sample.
    pub ema: f64,
}

#[derive(Debug, Clone)]
pub struct AdmissionController {
    config: AdmissionConfig,
    chunk_size: usize,
    ema: f64,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        let chunk_size = config.initial_size.clamp(config.min_size, config.max_size);
        Self {
            config,
            chunk_size,
            ema: 1.0,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn ema(&self) -> f64 {
        self.ema
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Fold one chunk into the signal and decide the next size and delay.
    pub fn observe(&mut self, sample: ChunkSample) -> Adjustment {
        let cfg = &self.config;
        let elapsed = sample.elapsed.as_secs_f64();

        let blended = cfg.alpha * sample.success_rate() + (1.0 - cfg.alpha) * self.ema;
        self.ema = blended.clamp(0.0, 1.0);

        let resize = if self.ema > cfg.grow_above && elapsed < cfg.grow_within_secs {
            Resize::Grow
        } else if self.ema < cfg.shrink_below || elapsed > cfg.shrink_after_secs {
            Resize::Shrink
        } else {
            Resize::Hold
        };

        self.chunk_size = match resize {
            Resize::Grow => {
                let scaled = (self.chunk_size as f64 * cfg.grow_factor) as usize;
                scaled.max(self.chunk_size + 1).min(cfg.max_size)
            }
            Resize::Shrink => {
                let scaled = (self.chunk_size as f64 * cfg.shrink_factor) as usize;
                scaled
                    .min(self.chunk_size.saturating_sub(1))
                    .max(cfg.min_size)
            }
            Resize::Hold => self.chunk_size,
        };

        let delay_secs = if self.ema > cfg.healthy_above {
            (1.0 - sample.secs_per_item()).max(0.1)
        } else {
            (2.0 - sample.secs_per_item()).max(0.5)
        };

        Adjustment {
            resize,
            chunk_size: self.chunk_size,
            delay: Duration::from_secs_f64(delay_secs),
            ema: self.ema,
        }
    }
}
