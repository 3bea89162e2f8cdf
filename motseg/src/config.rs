//! # Tracker configuration

use crate::segment::SegmentWeights;
use crate::workspace::WorkspaceBounds;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Full configuration of the segmentation pipeline.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Appearance model sliding window length.
    pub window_length: usize,
    /// Lucas-Kanade accumulation window radius.
    pub flow_window_radius: usize,
    /// Optical flow pyramid level count.
    pub pyramid_levels: usize,
    /// Structure tensor eigenvalue ratio for the corner-response threshold.
    pub eigen_ratio: f32,
    /// Flow magnitude threshold in pixels.
    pub magnitude_thresh: f32,
    /// Graph-cut terminal capacities.
    pub weights: SegmentWeights,
    /// Neighbourhood radius forced to foreground around prior hint points.
    pub hint_grow_radius: usize,
    /// Workspace volume and crop rectangle.
    pub bounds: WorkspaceBounds,
    /// Resolution-halving passes applied to all inputs.
    pub num_downsamples: usize,
    /// How long initialisation waits for camera calibration, in seconds.
    pub calibration_timeout_secs: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_length: 5,
            flow_window_radius: 2,
            pyramid_levels: 4,
            eigen_ratio: 5.0,
            magnitude_thresh: 0.1,
            weights: SegmentWeights::default(),
            hint_grow_radius: 2,
            bounds: WorkspaceBounds::default(),
            num_downsamples: 2,
            calibration_timeout_secs: 5.0,
        }
    }
}

impl TrackerConfig {
    /// Check every option against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if self.window_length < 1 {
            return Err(anyhow!("window_length must be at least 1"));
        }
        if self.flow_window_radius < 1 {
            return Err(anyhow!("flow_window_radius must be at least 1"));
        }
        if self.pyramid_levels < 1 {
            return Err(anyhow!("pyramid_levels must be at least 1"));
        }
        if !(self.eigen_ratio > 0.0) {
            return Err(anyhow!("eigen_ratio must be positive"));
        }
        if self.magnitude_thresh < 0.0 {
            return Err(anyhow!("magnitude_thresh must not be negative"));
        }
        let w = &self.weights;
        for (name, value) in [
            ("foreground", w.foreground),
            ("background", w.background),
            ("neutral_foreground", w.neutral_foreground),
            ("neutral_background", w.neutral_background),
            ("workspace_background", w.workspace_background),
            ("uncertain_foreground", w.uncertain_foreground),
            ("uncertain_background", w.uncertain_background),
        ] {
            if value < 0.0 {
                return Err(anyhow!("weight {} must not be negative", name));
            }
        }
        if self.calibration_timeout_secs <= 0.0 {
            return Err(anyhow!("calibration_timeout_secs must be positive"));
        }
        Ok(())
    }

    /// Calibration wait deadline as a [`Duration`].
    pub fn calibration_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.calibration_timeout_secs)
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let cfg: Self = serde_json::from_reader(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Save the configuration to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
