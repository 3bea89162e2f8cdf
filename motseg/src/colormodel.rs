//! # Colour histogram arm model
//!
//! Optional naive-Bayes style discriminator between manipulator and
//! background pixels: two 3D histograms over quantised colour bins, built
//! offline from labelled image/mask pairs and persisted as plain text.

use anyhow::{anyhow, Context, Result};
use nalgebra::DMatrix;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// Two-class quantised colour histogram model.
pub struct ColorHistogramModel {
    fg_hist: Vec<f32>,
    bg_hist: Vec<f32>,
    fg_count: u64,
    bg_count: u64,
    num_bins: usize,
    bin_size: usize,
    /// Likelihood-ratio decision threshold.
    pub theta: f32,
    have_model: bool,
}

impl Default for ColorHistogramModel {
    fn default() -> Self {
        Self::new(32)
    }
}

impl ColorHistogramModel {
    /// Create an empty model with `num_bins` bins per colour axis.
    pub fn new(num_bins: usize) -> Self {
        let num_bins = num_bins.clamp(1, 256);
        Self {
            fg_hist: vec![0.0; num_bins * num_bins * num_bins],
            bg_hist: vec![0.0; num_bins * num_bins * num_bins],
            fg_count: 0,
            bg_count: 0,
            num_bins,
            bin_size: 256 / num_bins,
            theta: 0.5,
            have_model: false,
        }
    }

    /// True once histograms have been learned or loaded.
    pub fn is_ready(&self) -> bool {
        self.have_model
    }

    fn bin_index(&self, pixel: [u8; 3]) -> usize {
        // Truncating bin sizes leave a remainder band at the top of the value
        // range when the bin count does not divide 256; clamp it into the
        // last bin.
        let bin = |v: u8| (v as usize / self.bin_size).min(self.num_bins - 1);
        (bin(pixel[0]) * self.num_bins + bin(pixel[1])) * self.num_bins + bin(pixel[2])
    }

    /// Accumulate labelled pixels into the histograms.
    ///
    /// # Arguments
    ///
    /// * `samples` - `(colour image, mask)` pairs; mask 255 marks foreground
    ///   pixels, 0 marks background pixels, anything else is ignored.
    pub fn learn<'a>(
        &mut self,
        samples: impl IntoIterator<Item = (&'a DMatrix<[u8; 3]>, &'a DMatrix<u8>)>,
    ) {
        self.fg_hist.iter_mut().for_each(|v| *v = 0.0);
        self.bg_hist.iter_mut().for_each(|v| *v = 0.0);
        self.fg_count = 0;
        self.bg_count = 0;

        for (image, mask) in samples {
            for (pixel, label) in image.iter().zip(mask.iter()) {
                let bin = self.bin_index(*pixel);
                match label {
                    255 => {
                        self.fg_hist[bin] += 1.0;
                        self.fg_count += 1;
                    }
                    0 => {
                        self.bg_hist[bin] += 1.0;
                        self.bg_count += 1;
                    }
                    _ => (),
                }
            }
        }
        self.have_model = true;
    }

    /// Laplace-smoothed foreground likelihood ratio for one pixel.
    ///
    /// Returns 0 when no model has been learned or loaded.
    pub fn pixel_probability(&self, pixel: [u8; 3]) -> f32 {
        if !self.have_model {
            return 0.0;
        }
        let bin = self.bin_index(pixel);
        let denom = (self.num_bins * self.num_bins * self.num_bins) as f32;
        let p_fg = ((self.fg_hist[bin] + 1.0) / (self.fg_count as f32 + denom)).ln();
        let p_bg = ((self.bg_hist[bin] + 1.0) / (self.bg_count as f32 + denom)).ln();
        (p_fg - p_bg).exp()
    }

    /// Per-pixel hard classification of an image against `theta`.
    pub fn probability_image(&self, image: &DMatrix<[u8; 3]>) -> DMatrix<f32> {
        image.map(|pixel| {
            if self.pixel_probability(pixel) >= self.theta {
                1.0
            } else {
                0.0
            }
        })
    }

    /// Persist the model as plain text.
    ///
    /// Format: foreground count, background count, bins per axis, theta, then
    /// the flattened foreground histogram followed by the background one, in
    /// row-major `(i, j, k)` order.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let out = File::create(path.as_ref())
            .with_context(|| format!("creating {}", path.as_ref().display()))?;
        let mut out = BufWriter::new(out);
        writeln!(out, "{}", self.fg_count)?;
        writeln!(out, "{}", self.bg_count)?;
        writeln!(out, "{}", self.num_bins)?;
        writeln!(out, "{}", self.theta)?;
        for hist in [&self.fg_hist, &self.bg_hist] {
            for chunk in hist.chunks(self.num_bins) {
                let line = chunk
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                writeln!(out, "{}", line)?;
            }
        }
        Ok(())
    }

    /// Load a model previously written by [`ColorHistogramModel::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut text = String::new();
        File::open(path.as_ref())
            .with_context(|| format!("opening {}", path.as_ref().display()))?
            .read_to_string(&mut text)?;
        let mut values = text.split_whitespace();
        let mut next = || {
            values
                .next()
                .ok_or_else(|| anyhow!("truncated colour model file"))
        };

        let fg_count: u64 = next()?.parse()?;
        let bg_count: u64 = next()?.parse()?;
        let num_bins: usize = next()?.parse()?;
        let theta: f32 = next()?.parse()?;
        if num_bins == 0 || num_bins > 256 {
            return Err(anyhow!("invalid bin count {}", num_bins));
        }

        let mut model = Self::new(num_bins);
        model.fg_count = fg_count;
        model.bg_count = bg_count;
        model.theta = theta;
        for slot in model.fg_hist.iter_mut().chain(model.bg_hist.iter_mut()) {
            *slot = next()?.parse()?;
        }
        model.have_model = true;
        Ok(model)
    }
}
