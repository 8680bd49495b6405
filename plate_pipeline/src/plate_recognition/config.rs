use std::time::Duration;

/// Shape gates for the plate candidate filter. Every threshold is supplied by
/// the caller so the same filter serves different plate standards.
#[derive(Clone, Debug)]
pub struct FilterConfig {
    /// Target width/height ratios; a candidate must land near one of them.
    pub aspect_ratios: Vec<f32>,
    /// Half-width of the acceptance band around each target ratio.
    pub aspect_tolerance: f32,
    /// Top and bottom edges may not differ in length by more than this fraction.
    pub edge_similarity: f32,
    /// Upper bound, radians, on the angle between top and bottom edge.
    pub max_parallel_angle: f32,
    /// How far, radians, the right edge may lean away from vertical.
    pub max_perpendicular_angle: f32,
    /// Contours kept per frame, largest by enclosed area first.
    pub max_contours: usize,
    /// Polygon approximation epsilon as a fraction of the contour perimeter.
    pub approx_epsilon: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            // EU long plate and US-style short plate proportions.
            aspect_ratios: vec![4.6, 2.0],
            aspect_tolerance: 0.6,
            edge_similarity: 0.2,
            max_parallel_angle: 0.1,
            max_perpendicular_angle: 0.35,
            max_contours: 60,
            approx_epsilon: 0.05,
        }
    }
}

/// Plate-length window for OCR fusion.
#[derive(Clone, Debug)]
pub struct FusionConfig {
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            min_len: 4,
            max_len: 8,
        }
    }
}

/// Every tunable of the orchestrator and its workers in one place; nothing is
/// hard-coded in the formulas.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Number of tracker worker threads.
    pub tracker_workers: usize,
    /// Objects one tracker worker may own at a time.
    pub max_trackers_per_worker: usize,
    /// Frames buffered while a dispatch cycle is in flight; oldest dropped first.
    pub backlog_capacity: usize,
    /// Source pacing; `None` drains the source as fast as cycles complete.
    pub fps: Option<usize>,
    /// Worker-side mailbox wait; a worker that hears nothing for this long
    /// assumes the orchestrator is gone and exits.
    pub worker_recv_timeout: Duration,
    /// Orchestrator-side wait for a worker's cycle report before the worker
    /// is declared failed and restarted.
    pub cycle_timeout: Duration,
    /// Wait for workers to acknowledge termination before detaching them.
    pub shutdown_timeout: Duration,
    /// Sleep between reply polls while a cycle is in flight.
    pub poll_interval: Duration,
    /// Run OCR on an object every this many frames of its age.
    pub ocr_interval: u64,
    /// Window expansion factor applied before cropping a plate for OCR.
    pub ocr_crop_scale: f32,
    /// Overlap fraction at which rectangles merge into one cluster.
    pub merge_overlap: f64,
    /// Observations required before a consensus is computed and published.
    pub min_observations: usize,
    pub filter: FilterConfig,
    pub fusion: FusionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tracker_workers: 2,
            max_trackers_per_worker: 4,
            backlog_capacity: 32,
            fps: None,
            worker_recv_timeout: Duration::from_secs(10),
            cycle_timeout: Duration::from_secs(3),
            shutdown_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(1),
            ocr_interval: 5,
            ocr_crop_scale: 1.2,
            merge_overlap: 0.5,
            min_observations: 3,
            filter: FilterConfig::default(),
            fusion: FusionConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Drain a recorded source as fast as cycles complete.
    pub fn offline() -> Self {
        Self::default()
    }

    /// Pace ingestion at a fixed rate; frames arriving mid-cycle go through
    /// the bounded backlog.
    pub fn realtime(fps: usize) -> Self {
        Self {
            fps: Some(fps),
            ..Self::default()
        }
    }
}
