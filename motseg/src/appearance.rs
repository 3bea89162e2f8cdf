//! # Temporal appearance model
//!
//! Maintains a bounded sliding window of smoothed colour + depth frames and
//! scores, per pixel, how unlikely the current sample is to belong to the
//! background distribution described by that window.

use crate::frame::{Frame, Plane};
use std::collections::VecDeque;

/// Variance floor; also substituted when a computed variance is NaN.
const VAR_FLOOR: f32 = 0.1;

/// Per-pixel appearance-change scores for one cycle.
pub struct MotionProbs {
    /// One score plane per colour channel.
    pub color: [Plane; 3],
    /// Composite channel: `max(depth score, product of colour scores)`.
    pub composite: Plane,
    /// Depth score plane.
    pub depth: Plane,
}

/// Sliding-window per-pixel background model.
///
/// Every incoming frame is smoothed with the fixed 3x3 Gaussian before either
/// comparison or storage. Scores are computed against the stored history
/// *before* the current frame is pushed, so the model needs at least one prior
/// frame to produce output.
pub struct AppearanceModel {
    history: VecDeque<Frame>,
    window: usize,
}

impl AppearanceModel {
    /// Create a model with the given window length.
    ///
    /// # Arguments
    ///
    /// * `window` - maximum number of history frames, at least 1.
    pub fn new(window: usize) -> Self {
        Self {
            history: VecDeque::new(),
            window: window.max(1),
        }
    }

    /// Reset the history and seed it from `frame`.
    ///
    /// The embedded update is degenerate (no history yet), so no probabilities
    /// are produced for this cycle.
    pub fn initialize(&mut self, frame: &Frame) {
        self.history.clear();
        self.update(frame);
    }

    /// Number of frames currently stored.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// True when no history is stored.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Score the frame against the history, then absorb it.
    ///
    /// Returns `None` during the first cycle (empty history); otherwise a
    /// best-effort score over however many samples are stored so far.
    pub fn update(&mut self, frame: &Frame) -> Option<MotionProbs> {
        let smoothed = frame.smoothed();

        let probs = if self.history.is_empty() {
            None
        } else {
            Some(self.score(&smoothed))
        };

        self.history.push_back(smoothed);
        if self.history.len() > self.window {
            self.history.pop_front();
        }

        probs
    }

    fn score(&self, frame: &Frame) -> MotionProbs {
        let (rows, cols) = frame.dim();
        let count = self.history.len() as f32;

        // Per-pixel sample means.
        let mut means = [
            Plane::zeros(rows, cols),
            Plane::zeros(rows, cols),
            Plane::zeros(rows, cols),
        ];
        let mut d_mean = Plane::zeros(rows, cols);
        for past in &self.history {
            for ch in 0..3 {
                means[ch] += &past.color[ch];
            }
            d_mean += &past.depth;
        }
        for ch in 0..3 {
            means[ch] /= count;
        }
        d_mean /= count;

        // Per-pixel sample variances, unbiased divisor only past one sample.
        let mut vars = [
            Plane::zeros(rows, cols),
            Plane::zeros(rows, cols),
            Plane::zeros(rows, cols),
        ];
        let mut d_var = Plane::zeros(rows, cols);
        for past in &self.history {
            for ch in 0..3 {
                let diff = &past.color[ch] - &means[ch];
                vars[ch] += diff.component_mul(&diff);
            }
            let d_diff = &past.depth - &d_mean;
            d_var += d_diff.component_mul(&d_diff);
        }
        if self.history.len() > 1 {
            for ch in 0..3 {
                vars[ch] /= count - 1.0;
            }
            d_var /= count - 1.0;
        }

        let mut color = [
            Plane::zeros(rows, cols),
            Plane::zeros(rows, cols),
            Plane::zeros(rows, cols),
        ];
        let mut composite = Plane::zeros(rows, cols);
        let mut depth = Plane::zeros(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                let mut product = 1.0;
                for ch in 0..3 {
                    let s = pixel_score(frame.color[ch][(r, c)], means[ch][(r, c)], vars[ch][(r, c)]);
                    color[ch][(r, c)] = s;
                    product *= s;
                }
                let d = pixel_score(frame.depth[(r, c)], d_mean[(r, c)], d_var[(r, c)]);
                depth[(r, c)] = d;
                composite[(r, c)] = d.max(product);
            }
        }

        MotionProbs {
            color,
            composite,
            depth,
        }
    }
}

/// Bounded linear discriminant against the background statistics.
fn pixel_score(x: f32, mean: f32, var: f32) -> f32 {
    let var = if var.is_nan() { VAR_FLOOR } else { var };
    (x - mean).abs() / (var + VAR_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn constant_frame(rows: usize, cols: usize, value: f32, depth: f32) -> Frame {
        Frame::new(
            [
                Plane::repeat(rows, cols, value),
                Plane::repeat(rows, cols, value),
                Plane::repeat(rows, cols, value),
            ],
            Plane::repeat(rows, cols, depth),
        )
    }

    #[test]
    fn no_output_without_history() {
        let mut model = AppearanceModel::new(5);
        assert!(model.update(&constant_frame(4, 4, 0.5, 1.0)).is_none());
        assert_eq!(model.len(), 1);
    }

    #[test]
    fn initialize_resets_history() {
        let mut model = AppearanceModel::new(5);
        for _ in 0..3 {
            model.update(&constant_frame(4, 4, 0.5, 1.0));
        }
        model.initialize(&constant_frame(4, 4, 0.5, 1.0));
        assert_eq!(model.len(), 1);
    }

    #[test]
    fn static_sequence_scores_zero() {
        let mut model = AppearanceModel::new(5);
        let frame = constant_frame(6, 6, 0.4, 1.2);
        let mut probs = None;
        for _ in 0..7 {
            probs = model.update(&frame);
        }
        let probs = probs.unwrap();
        // Identical frames: variance 0 everywhere, score |x - mean| / 0.1 = 0.
        for v in probs.composite.iter().chain(probs.depth.iter()) {
            assert_approx_eq!(*v, 0.0, 1e-6);
        }
        assert_eq!(model.len(), 5);
    }

    #[test]
    fn history_is_bounded() {
        let mut model = AppearanceModel::new(3);
        for i in 0..10 {
            model.update(&constant_frame(4, 4, i as f32 * 0.1, 1.0));
        }
        assert_eq!(model.len(), 3);
    }

    #[test]
    fn depth_step_raises_composite() {
        let mut model = AppearanceModel::new(5);
        let background = constant_frame(4, 4, 0.5, 1.0);
        for _ in 0..5 {
            model.update(&background);
        }
        // Same colour, depth jumps: composite tracks the depth score.
        let moved = constant_frame(4, 4, 0.5, 0.5);
        let probs = model.update(&moved).unwrap();
        let expected = 0.5 / VAR_FLOOR;
        for (d, comp) in probs.depth.iter().zip(probs.composite.iter()) {
            assert_approx_eq!(*d, expected, 1e-4);
            assert_approx_eq!(*comp, expected, 1e-4);
        }
    }

    #[test]
    fn single_sample_window_uses_variance_floor() {
        let mut model = AppearanceModel::new(1);
        model.update(&constant_frame(4, 4, 0.2, 1.0));
        // One stored sample, variance divisor not applied; scores stay finite.
        let probs = model.update(&constant_frame(4, 4, 0.8, 1.0)).unwrap();
        for ch in 0..3 {
            for v in probs.color[ch].iter() {
                assert!(v.is_finite());
                assert!(*v > 0.0);
            }
        }
    }
}
