pub mod balancer;
pub mod bounding_box_render;
pub mod candidates;
pub mod config;
pub mod detector;
pub mod error;
pub mod fusion;
pub mod geometry;
pub mod imaging;
pub mod metrics;
pub mod ocr;
pub mod pipeline;
pub mod result_sink;
pub mod tracker;
pub mod video_reader;

use std::sync::Arc;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::plate_recognition::geometry::Rect;

/// Identity of one tracked object, unique for the lifetime of a pipeline run.
pub type TrackId = u64;

/// One grayscale video frame. The pixel buffer is behind an `Arc` so handing
/// a frame to a worker transfers the handle, not the pixels; nobody mutates
/// the buffer after construction.
#[derive(Clone, Debug)]
pub struct Frame {
    pub index: u64,
    pub image: Arc<GrayImage>,
}

impl Frame {
    pub fn new(index: u64, image: GrayImage) -> Self {
        Self {
            index,
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Per-cycle view of one tracked object as reported by its tracker worker.
#[derive(Clone, Debug)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub window: Rect,
    /// Frames elapsed since the object was created.
    pub age: u64,
    pub observations: Vec<String>,
}

/// A fused plate reading as delivered to the result sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateReading {
    pub tracker_id: TrackId,
    pub text: String,
    pub window: Rect,
    pub frame_index: u64,
}

impl PlateReading {
    pub fn new(tracker_id: TrackId, text: String, window: Rect, frame_index: u64) -> Self {
        Self {
            tracker_id,
            text,
            window,
            frame_index,
        }
    }
}
