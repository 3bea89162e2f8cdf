//! # Motion energy segmentation
//!
//! Builds a pixel-grid graph whose terminal capacities encode flow and
//! geometric evidence and whose neighbour capacities encode local colour +
//! depth similarity, then solves a global min-cut for the binary
//! foreground/background labelling.

use crate::flow::MotionField;
use crate::frame::{BoolMask, Plane};
use crate::graph::{DinicGraph, FlowGraph};
use nalgebra::{DMatrix, Point2};

/// Terminal capacity constants of the segmentation energy.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct SegmentWeights {
    /// Source capacity of a likely-foreground pixel.
    pub foreground: f32,
    /// Sink capacity of a likely-background pixel.
    pub background: f32,
    /// Sink capacity paired with `foreground`.
    pub neutral_foreground: f32,
    /// Source capacity paired with `background`.
    pub neutral_background: f32,
    /// Sink capacity pinning pixels outside the workspace to background.
    pub workspace_background: f32,
    /// Source capacity where the flow estimate is untrustworthy.
    pub uncertain_foreground: f32,
    /// Sink capacity where the flow estimate is untrustworthy.
    pub uncertain_background: f32,
}

impl Default for SegmentWeights {
    fn default() -> Self {
        Self {
            foreground: 3.0,
            background: 2.0,
            neutral_foreground: 0.01,
            neutral_background: 0.01,
            workspace_background: 5.0,
            uncertain_foreground: 0.1,
            uncertain_background: 0.1,
        }
    }
}

/// Graph-cut segmenter fusing flow, appearance and geometric evidence.
pub struct MotionSegmenter {
    pub weights: SegmentWeights,
    /// Flow magnitude above which a trusted estimate votes foreground.
    pub magnitude_thresh: f32,
    /// Chebyshev radius of the neighbourhood forced to foreground around each
    /// prior hint point.
    pub hint_grow_radius: usize,
    corner_thresh: f32,
}

impl Default for MotionSegmenter {
    fn default() -> Self {
        Self::new(SegmentWeights::default(), 5.0, 0.1, 2)
    }
}

impl MotionSegmenter {
    /// Create a segmenter.
    ///
    /// # Arguments
    ///
    /// * `weights` - terminal capacity constants.
    /// * `eigen_ratio` - structure tensor eigenvalue ratio used to derive the
    ///   corner-response threshold.
    /// * `magnitude_thresh` - flow magnitude threshold in pixels.
    /// * `hint_grow_radius` - neighbourhood radius around prior hint points.
    pub fn new(
        weights: SegmentWeights,
        eigen_ratio: f32,
        magnitude_thresh: f32,
        hint_grow_radius: usize,
    ) -> Self {
        let mut seg = Self {
            weights,
            magnitude_thresh,
            hint_grow_radius,
            corner_thresh: 0.0,
        };
        seg.set_eigen_ratio(eigen_ratio);
        seg
    }

    /// Derive the corner-response threshold from an eigenvalue ratio.
    ///
    /// Flow scores below `(k + 1)^2 / k` indicate a well conditioned local
    /// gradient structure whose flow magnitude can be trusted.
    pub fn set_eigen_ratio(&mut self, eigen_ratio: f32) {
        self.corner_thresh = (eigen_ratio + 1.0) * (eigen_ratio + 1.0) / eigen_ratio;
    }

    /// Segment one frame into a 0.0/1.0 labelling.
    ///
    /// # Arguments
    ///
    /// * `color` - colour planes of the current frame.
    /// * `depth` - depth plane of the current frame.
    /// * `flow` - displacement field and quality scores from the estimator.
    /// * `workspace_mask` - pixels eligible as foreground candidates.
    /// * `hints` - prior foreground points in (possibly out-of-bounds) image
    ///   coordinates; out-of-bounds points are skipped.
    pub fn segment(
        &self,
        color: &[Plane; 3],
        depth: &Plane,
        flow: &MotionField,
        workspace_mask: &BoolMask,
        hints: &[Point2<i32>],
    ) -> Plane {
        let (rows, cols) = (depth.nrows(), depth.ncols());
        let num_edges = if rows > 0 && cols > 0 {
            ((cols - 1) * 3 + 1) * (rows - 1) + (cols - 1)
        } else {
            0
        };
        let mut graph = DinicGraph::with_capacity(rows * cols, num_edges);
        self.build(&mut graph, color, depth, flow, workspace_mask, hints);
        graph.solve();

        Plane::from_fn(rows, cols, |r, c| {
            if graph.is_source_side(r * cols + c) {
                1.0
            } else {
                0.0
            }
        })
    }

    /// Populate a [`FlowGraph`] with the segmentation energy.
    fn build<G: FlowGraph>(
        &self,
        graph: &mut G,
        color: &[Plane; 3],
        depth: &Plane,
        flow: &MotionField,
        workspace_mask: &BoolMask,
        hints: &[Point2<i32>],
    ) {
        let w = &self.weights;
        let (rows, cols) = (depth.nrows(), depth.ncols());
        let first = graph.add_nodes(rows * cols);
        let node = |r: usize, c: usize| first + r * cols + c;

        for r in 0..rows {
            for c in 0..cols {
                if !workspace_mask[(r, c)] {
                    // Hard background: effectively un-cuttable into foreground.
                    graph.add_terminal_weights(node(r, c), 0.0, w.workspace_background);
                } else if flow.score(r, c) < self.corner_thresh {
                    if flow.magnitude(r, c) > self.magnitude_thresh {
                        graph.add_terminal_weights(node(r, c), w.foreground, w.neutral_foreground);
                    } else {
                        graph.add_terminal_weights(node(r, c), w.neutral_background, w.background);
                    }
                } else {
                    graph.add_terminal_weights(
                        node(r, c),
                        w.uncertain_foreground,
                        w.uncertain_background,
                    );
                }

                // Smoothness edges to the previously visited neighbours.
                if c > 0 {
                    let cap = edge_weight(color, depth, (r, c), (r, c - 1));
                    graph.add_edge(node(r, c), node(r, c - 1), cap);
                }
                if r > 0 {
                    let cap = edge_weight(color, depth, (r, c), (r - 1, c));
                    graph.add_edge(node(r, c), node(r - 1, c), cap);
                    if c > 0 {
                        let cap = edge_weight(color, depth, (r, c), (r - 1, c - 1));
                        graph.add_edge(node(r, c), node(r - 1, c - 1), cap);
                    }
                }
            }
        }

        // Prior foreground hints are applied after the main loop and therefore
        // override any of the per-pixel decisions above.
        for hint in hints {
            if hint.x < 0 || hint.x >= cols as i32 || hint.y < 0 || hint.y >= rows as i32 {
                continue;
            }
            let radius = self.hint_grow_radius as i32;
            for r in (hint.y - radius).max(0)..(hint.y + radius).min(rows as i32) {
                for c in (hint.x - radius).max(0)..(hint.x + radius).min(cols as i32) {
                    graph.add_terminal_weights(
                        node(r as usize, c as usize),
                        w.foreground,
                        w.neutral_foreground,
                    );
                }
            }
        }
    }
}

/// Boundary-strength term between two neighbouring pixels.
///
/// Uses only the first colour channel plus depth, matching the behaviour the
/// downstream weights were tuned against.
fn edge_weight(color: &[Plane; 3], depth: &Plane, a: (usize, usize), b: (usize, usize)) -> f32 {
    let dc = color[0][a] - color[0][b];
    let dd = depth[a] - depth[b];
    (dc * dc + dd * dd).sqrt()
}

/// Convert a 0.0/1.0 labelling into an 8-bit 0/255 mask.
pub fn to_mask_u8(labels: &Plane) -> DMatrix<u8> {
    labels.map(|v| if v > 0.5 { 255 } else { 0 })
}
