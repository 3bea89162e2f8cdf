//! # Visual Motion Segmentation Library
//!
//! This library isolates moving pixels (e.g. a manipulator arm interacting with
//! objects on a table) from a static background, given a live stream of aligned
//! colour and depth frames plus an organised 3D point cloud.
//!
//! The pipeline has three stages: a per-pixel temporal appearance model, a
//! pyramidal Lucas-Kanade optical flow estimator, and a graph-cut based energy
//! minimisation that fuses flow evidence, geometric priors and hard spatial
//! constraints into a single binary labelling.
//!
//! The easiest way to use the library is to import its prelude:
//!
//! ```
//! use motseg::prelude::v1::*;
//! ```
//!
//! You may need [`nalgebra`](https://crates.io/crates/nalgebra) to make use of
//! the functionality.

pub mod appearance;
pub mod colormodel;
pub mod config;
pub mod flow;
pub mod frame;
pub mod graph;
pub mod segment;
pub mod tracker;
pub mod util;
pub mod workspace;

pub mod prelude {
    pub mod v1 {
        pub use crate::{
            appearance::{AppearanceModel, MotionProbs},
            colormodel::ColorHistogramModel,
            config::TrackerConfig,
            flow::{FlowEstimator, MotionField},
            frame::{BoolMask, Frame, Plane},
            graph::{DinicGraph, FlowGraph},
            segment::{MotionSegmenter, SegmentWeights},
            tracker::{
                CalibrationSource, CameraInfo, CycleOutput, InstantCalibration, MotionTracker,
                PlaneEstimator, SensorInput, StaticPlane, TrackerError, TrackerState,
            },
            workspace::{PointCloud, WorkspaceBounds},
        };
        pub use anyhow::{anyhow, Error, Result};
    }
}
