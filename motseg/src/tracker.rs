//! # Pipeline driver
//!
//! Owns the per-cycle state (current/previous frames, workspace mask) and the
//! tracking state machine, and runs the three pipeline stages in order on
//! every synchronised sensor triple. Table-plane fitting and camera
//! calibration are external collaborators injected through traits.

use crate::appearance::{AppearanceModel, MotionProbs};
use crate::config::TrackerConfig;
use crate::flow::FlowEstimator;
use crate::frame::{self, BoolMask, Frame, Plane};
use crate::segment::{self, MotionSegmenter};
use crate::workspace::{self, PointCloud};
use anyhow::Result;
use nalgebra::{DMatrix, Point2, Point3};
use std::time::Duration;

/// Tracker-surface error conditions.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Plane fitting on the workspace cloud yielded no inliers.
    #[error("no workspace geometry found")]
    NoGeometryFound,
    /// Camera calibration did not arrive within the configured timeout.
    #[error("camera calibration timed out")]
    CalibrationTimeout,
    /// A query was made before any sensor data arrived.
    #[error("no sensor data received yet")]
    NotReady,
}

/// Pinhole camera intrinsics delivered by the calibration source.
#[derive(Clone, Copy, Debug)]
pub struct CameraInfo {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

/// External table-plane fitting collaborator.
pub trait PlaneEstimator {
    /// Fit the dominant workspace plane and return its centroid.
    ///
    /// Implementations should return [`TrackerError::NoGeometryFound`] (or a
    /// zero centroid) when no inliers are found.
    fn table_centroid(&mut self, cloud: &PointCloud) -> Result<Point3<f32>>;
}

/// External one-shot camera calibration collaborator.
pub trait CalibrationSource {
    /// Block until calibration arrives or `timeout` elapses.
    fn wait_camera_info(&mut self, timeout: Duration) -> Result<CameraInfo>;
}

/// Plane estimator returning a fixed centroid.
pub struct StaticPlane(pub Point3<f32>);

impl PlaneEstimator for StaticPlane {
    fn table_centroid(&mut self, _cloud: &PointCloud) -> Result<Point3<f32>> {
        Ok(self.0)
    }
}

/// Calibration source that answers immediately.
pub struct InstantCalibration(pub CameraInfo);

impl CalibrationSource for InstantCalibration {
    fn wait_camera_info(&mut self, _timeout: Duration) -> Result<CameraInfo> {
        Ok(self.0)
    }
}

/// Tracking state machine states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerState {
    /// Not tracking; incoming frames are stored but not segmented.
    Idle,
    /// One-cycle setup: workspace geometry and calibration.
    Initializing,
    /// Steady state: full pipeline every cycle.
    Tracking,
}

/// One synchronised sensor triple.
pub struct SensorInput {
    pub frame: Frame,
    pub cloud: PointCloud,
}

impl SensorInput {
    /// Assemble an input from aligned colour, depth and cloud data.
    pub fn new(color: [Plane; 3], depth: Plane, cloud: PointCloud) -> Self {
        Self {
            frame: Frame::new(color, depth),
            cloud,
        }
    }
}

/// Result of one tracked cycle.
pub struct CycleOutput {
    /// Binary 0/255 motion mask at the downsampled resolution.
    pub mask: DMatrix<u8>,
    /// Colour image restricted to mask pixels.
    pub masked_color: [Plane; 3],
    /// Appearance-change scores of this cycle, absent during warm-up.
    pub probs: Option<MotionProbs>,
}

/// Frame-at-a-time motion segmentation driver.
///
/// Single-threaded and synchronous: each call to [`MotionTracker::process`]
/// runs one full pipeline pass to completion. The appearance history is the
/// only state mutated across cycles.
pub struct MotionTracker {
    config: TrackerConfig,
    state: TrackerState,
    appearance: AppearanceModel,
    flow: FlowEstimator,
    segmenter: MotionSegmenter,
    plane: Box<dyn PlaneEstimator>,
    calibration: Box<dyn CalibrationSource>,
    cur: Option<Frame>,
    prev: Option<Frame>,
    cur_mask: Option<BoolMask>,
    last_cloud: Option<PointCloud>,
    table_centroid: Option<Point3<f32>>,
    camera_info: Option<CameraInfo>,
    cycle_count: usize,
}

impl MotionTracker {
    /// Create a tracker.
    ///
    /// # Arguments
    ///
    /// * `config` - pipeline configuration, validated here.
    /// * `plane` - table-plane fitting collaborator.
    /// * `calibration` - camera calibration collaborator.
    pub fn new(
        config: TrackerConfig,
        plane: Box<dyn PlaneEstimator>,
        calibration: Box<dyn CalibrationSource>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: TrackerState::Idle,
            appearance: AppearanceModel::new(config.window_length),
            flow: FlowEstimator {
                win_radius: config.flow_window_radius,
                levels: config.pyramid_levels,
            },
            segmenter: MotionSegmenter::new(
                config.weights,
                config.eigen_ratio,
                config.magnitude_thresh,
                config.hint_grow_radius,
            ),
            plane,
            calibration,
            config,
            cur: None,
            prev: None,
            cur_mask: None,
            last_cloud: None,
            table_centroid: None,
            camera_info: None,
            cycle_count: 0,
        })
    }

    /// Current state machine state.
    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Calibration received during initialisation, if any.
    pub fn camera_info(&self) -> Option<CameraInfo> {
        self.camera_info
    }

    /// Workspace plane centroid found during initialisation, if any.
    pub fn table_centroid(&self) -> Option<Point3<f32>> {
        self.table_centroid
    }

    /// Number of tracked cycles since the last start.
    pub fn cycle_count(&self) -> usize {
        self.cycle_count
    }

    /// Request tracking; the next cycle initialises workspace geometry.
    pub fn start(&mut self) {
        log::info!("starting tracker");
        self.state = TrackerState::Initializing;
        self.cycle_count = 0;
    }

    /// Request a stop; takes effect between cycles.
    pub fn stop(&mut self) {
        log::info!("stopping tracker");
        self.state = TrackerState::Idle;
    }

    /// Run one pipeline cycle on a synchronised sensor triple.
    ///
    /// Returns `None` while idle. Prior-foreground `hints` are in downsampled
    /// image coordinates; out-of-bounds points are skipped by the segmenter.
    pub fn process(
        &mut self,
        input: SensorInput,
        hints: &[Point2<i32>],
    ) -> Result<Option<CycleOutput>> {
        let SensorInput { frame, cloud } = input;

        let mask = workspace::compute_mask(&cloud, &self.config.bounds);
        let frame = frame.downsample(self.config.num_downsamples);
        let mask = frame::downsample_mask(&mask, self.config.num_downsamples);

        self.prev = self.cur.replace(frame);
        self.cur_mask = Some(mask);
        self.last_cloud = Some(cloud);

        match self.state {
            TrackerState::Idle => Ok(None),
            TrackerState::Initializing => self.initialize_cycle().map(Some),
            TrackerState::Tracking => self.tracking_cycle(hints).map(Some),
        }
    }

    /// Establish workspace geometry; motion output is discarded this cycle.
    fn initialize_cycle(&mut self) -> Result<CycleOutput> {
        let cloud = self.last_cloud.as_ref().ok_or(TrackerError::NotReady)?;

        match self.plane.table_centroid(cloud) {
            Ok(centroid) if centroid != Point3::origin() => {
                log::info!(
                    "table centroid at ({}, {}, {})",
                    centroid.x,
                    centroid.y,
                    centroid.z
                );
                self.table_centroid = Some(centroid);
            }
            Ok(_) => {
                log::error!("no workspace plane found");
                self.table_centroid = None;
            }
            Err(e) => {
                log::error!("plane fitting failed: {}", e);
                self.table_centroid = None;
            }
        }

        match self
            .calibration
            .wait_camera_info(self.config.calibration_timeout())
        {
            Ok(info) => {
                self.camera_info = Some(info);
                let cur = self.cur.as_ref().ok_or(TrackerError::NotReady)?;
                self.appearance.initialize(cur);
                self.state = TrackerState::Tracking;
            }
            Err(e) => {
                // Initialisation is deferred to the next cycle.
                log::warn!("camera calibration not received: {}", e);
            }
        }

        self.empty_output()
    }

    /// Steady-state cycle: appearance update, flow, graph-cut segmentation.
    fn tracking_cycle(&mut self, hints: &[Point2<i32>]) -> Result<CycleOutput> {
        let cur = self.cur.as_ref().ok_or(TrackerError::NotReady)?;
        let mask = self.cur_mask.as_ref().ok_or(TrackerError::NotReady)?;

        let prev = match self.prev.as_ref() {
            Some(prev) => prev,
            None => {
                // No frame pair yet; reseed and report an empty mask.
                self.appearance.initialize(cur);
                return self.empty_output();
            }
        };

        let probs = self.appearance.update(cur);
        let flow = self.flow.estimate(cur, prev);
        let labels = self.segmenter.segment(&cur.color, &cur.depth, &flow, mask, hints);

        let mask_u8 = segment::to_mask_u8(&labels);
        let masked_color = frame::mask_color(&cur.color, &mask_u8);
        self.cycle_count += 1;

        Ok(CycleOutput {
            mask: mask_u8,
            masked_color,
            probs,
        })
    }

    /// All-background output at the current downsampled resolution.
    fn empty_output(&self) -> Result<CycleOutput> {
        let cur = self.cur.as_ref().ok_or(TrackerError::NotReady)?;
        let (rows, cols) = cur.dim();
        Ok(CycleOutput {
            mask: DMatrix::zeros(rows, cols),
            masked_color: [
                Plane::zeros(rows, cols),
                Plane::zeros(rows, cols),
                Plane::zeros(rows, cols),
            ],
            probs: None,
        })
    }

    /// Densify a chain of projected joint positions into per-pixel hints.
    ///
    /// Consecutive joints are connected with rasterised line segments, so a
    /// sparse kinematic projection covers every pixel the limb crosses.
    pub fn hints_from_joints(joints: &[Point2<i32>]) -> Vec<Point2<i32>> {
        let mut hints = Vec::new();
        for pair in joints.windows(2) {
            hints.extend(crate::util::line_points(pair[0], pair[1]));
        }
        if let [only] = joints {
            hints.push(*only);
        }
        hints
    }

    /// Locate the table plane in the most recent cloud.
    ///
    /// Service-style query; rejects with [`TrackerError::NotReady`] before the
    /// first frame, and [`TrackerError::NoGeometryFound`] when plane fitting
    /// yields a degenerate centroid.
    pub fn locate_table(&mut self) -> Result<Point3<f32>> {
        let cloud = self.last_cloud.as_ref().ok_or(TrackerError::NotReady)?;
        let centroid = self.plane.table_centroid(cloud)?;
        if centroid == Point3::origin() {
            log::error!("no plane found");
            return Err(TrackerError::NoGeometryFound.into());
        }
        Ok(centroid)
    }
}
