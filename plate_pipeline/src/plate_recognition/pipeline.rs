use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{debug, info, warn};

use crate::plate_recognition::balancer;
use crate::plate_recognition::bounding_box_render::Renderer;
use crate::plate_recognition::config::PipelineConfig;
use crate::plate_recognition::detector::DetectorHandle;
use crate::plate_recognition::error::PipelineError;
use crate::plate_recognition::fusion;
use crate::plate_recognition::geometry::{self, Rect};
use crate::plate_recognition::imaging::ImageOps;
use crate::plate_recognition::metrics;
use crate::plate_recognition::ocr::Recognizer;
use crate::plate_recognition::result_sink::ResultSink;
use crate::plate_recognition::tracker::{
    TrackerPool, TrackerReport, TrackerWorkerConfig, WindowTracker,
};
use crate::plate_recognition::video_reader::{FpsLimiter, FrameSource};
use crate::plate_recognition::{Frame, PlateReading, TrackId, TrackSnapshot};

/// Decides when a tracked object is done: left the frame, grew too old,
/// whatever the caller cares about. The pipeline only mechanizes the removal.
pub type RetirePolicy = Box<dyn FnMut(&TrackSnapshot) -> bool>;

/// The external collaborators a pipeline is wired with at construction time.
pub struct PipelineDeps {
    pub ops: Arc<dyn ImageOps>,
    pub recognizer: Arc<dyn Recognizer>,
    pub window_tracker: Arc<dyn WindowTracker>,
    pub sink: Box<dyn ResultSink>,
    pub renderer: Option<Box<dyn Renderer>>,
    pub retire: RetirePolicy,
}

/// One dispatch cycle in flight: the frame every worker is looking at and
/// which of them have reported back. The next cycle starts only when every
/// slot is filled; results correlate by this gate, not by sequence numbers.
struct Cycle {
    frame: Frame,
    started: Instant,
    detections: Option<Vec<Rect>>,
    reports: Vec<Option<TrackerReport>>,
}

impl Cycle {
    fn complete(&self) -> bool {
        self.detections.is_some() && self.reports.iter().all(Option::is_some)
    }
}

/// Drives the whole pipeline: keeps the source flowing at its rate, feeds the
/// detection worker and the tracker pool one gated cycle at a time, buffers
/// overflow frames in a bounded backlog, and turns tracker observations into
/// published consensus readings. Single-threaded and cooperative from the
/// outside; every receive is bounded.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    detector: DetectorHandle,
    trackers: TrackerPool,
    sink: Box<dyn ResultSink>,
    renderer: Option<Box<dyn Renderer>>,
    retire: RetirePolicy,
    backlog: VecDeque<Frame>,
    cycle: Option<Cycle>,
    next_track_id: TrackId,
    published: HashMap<TrackId, String>,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig, deps: PipelineDeps) -> Result<Self, PipelineError> {
        let detector = DetectorHandle::spawn(
            Arc::clone(&deps.ops),
            config.filter.clone(),
            config.merge_overlap,
            config.worker_recv_timeout,
        )?;
        let trackers = TrackerPool::spawn(
            config.tracker_workers,
            TrackerWorkerConfig {
                max_objects: config.max_trackers_per_worker,
                ocr_interval: config.ocr_interval,
                ocr_crop_scale: config.ocr_crop_scale,
                recv_timeout: config.worker_recv_timeout,
            },
            deps.window_tracker,
            deps.ops,
            deps.recognizer,
        )?;
        Ok(Self {
            config,
            detector,
            trackers,
            sink: deps.sink,
            renderer: deps.renderer,
            retire: deps.retire,
            backlog: VecDeque::new(),
            cycle: None,
            next_track_id: 0,
            published: HashMap::new(),
        })
    }

    /// Run until the source is exhausted and the last cycle has drained, or
    /// until a channel is lost. Either way every worker is stopped before
    /// this returns.
    pub fn run(mut self, source: &mut dyn FrameSource) -> Result<(), PipelineError> {
        let paced = self.config.fps.is_some();
        let mut limiter = self.config.fps.map(FpsLimiter::new);
        let mut source_done = false;
        let result = loop {
            // Paced mode keeps reading at the source rate and lets the
            // backlog shed; unpaced mode reads only as cycles free up.
            if !source_done && (paced || self.backlog.is_empty()) {
                match source.next_frame() {
                    Some(frame) => self.buffer_frame(frame),
                    None => {
                        source_done = true;
                        info!("source exhausted, draining {} buffered frames", self.backlog.len());
                    }
                }
            }

            if self.cycle.is_none() {
                if let Some(frame) = self.backlog.pop_front() {
                    if let Err(err) = self.dispatch(frame) {
                        break Err(err);
                    }
                } else if source_done {
                    break Ok(());
                }
            }

            if let Err(err) = self.poll_workers() {
                break Err(err);
            }
            if let Err(err) = self.check_cycle_timeout() {
                break Err(err);
            }
            if self.cycle.as_ref().is_some_and(Cycle::complete) {
                if let Err(err) = self.finish_cycle() {
                    break Err(err);
                }
            }

            match &mut limiter {
                Some(limiter) if !source_done => limiter.wait(),
                _ => {
                    if self.cycle.is_some() {
                        thread::sleep(self.config.poll_interval);
                    }
                }
            }
        };
        self.shutdown();
        result
    }

    /// Bounded backlog with drop-oldest backpressure; the buffered count
    /// never exceeds the configured capacity.
    fn buffer_frame(&mut self, frame: Frame) {
        metrics::FRAMES_READ.inc();
        if self.backlog.len() >= self.config.backlog_capacity {
            if let Some(dropped) = self.backlog.pop_front() {
                metrics::FRAMES_DROPPED.inc();
                warn!("backlog full, dropping frame {}", dropped.index);
            }
        }
        self.backlog.push_back(frame);
    }

    fn dispatch(&mut self, frame: Frame) -> Result<(), PipelineError> {
        self.detector.dispatch(frame.clone())?;
        self.trackers.dispatch(&frame)?;
        self.cycle = Some(Cycle {
            frame,
            started: Instant::now(),
            detections: None,
            reports: (0..self.trackers.len()).map(|_| None).collect(),
        });
        Ok(())
    }

    fn poll_workers(&mut self) -> Result<(), PipelineError> {
        if let Some(reply) = self.detector.try_reply()? {
            if let Some(cycle) = &mut self.cycle {
                cycle.detections = Some(reply.candidates);
            }
        }
        for (index, report) in self.trackers.poll()? {
            if let Some(cycle) = &mut self.cycle {
                cycle.reports[index] = Some(report);
            }
        }
        Ok(())
    }

    /// A worker that misses the cycle deadline is declared failed: its
    /// contribution is dropped for this cycle and it is replaced before the
    /// next dispatch. The frame loop never blocks on a wedged worker.
    fn check_cycle_timeout(&mut self) -> Result<(), PipelineError> {
        let Some(cycle) = &mut self.cycle else {
            return Ok(());
        };
        if cycle.started.elapsed() <= self.config.cycle_timeout {
            return Ok(());
        }
        if cycle.detections.is_none() {
            warn!("plate detector missed the cycle deadline");
            metrics::WORKER_RESTARTS.inc();
            self.detector.restart()?;
            cycle.detections = Some(Vec::new());
        }
        for index in 0..self.trackers.len() {
            if cycle.reports[index].is_none() {
                warn!("{} missed the cycle deadline", self.trackers.worker_name(index));
                metrics::WORKER_RESTARTS.inc();
                self.trackers.restart(index)?;
                cycle.reports[index] = Some(TrackerReport::default());
            }
        }
        Ok(())
    }

    /// All workers have reported for the dispatched frame: hand fresh
    /// candidates to the balancer, fuse and publish observations, retire
    /// finished objects, render.
    fn finish_cycle(&mut self) -> Result<(), PipelineError> {
        let Some(cycle) = self.cycle.take() else {
            return Ok(());
        };
        let detections = cycle.detections.unwrap_or_default();
        let mut snapshots: Vec<TrackSnapshot> = Vec::new();
        for report in cycle.reports.into_iter().flatten() {
            snapshots.extend(report.snapshots);
        }
        let windows: Vec<Rect> = snapshots.iter().map(|s| s.window).collect();

        // Candidates overlapping an existing track are the same object seen
        // again, not a new one.
        let fresh = geometry::exclude_overlapping(&detections, &windows, self.config.merge_overlap);
        let assignments = balancer::distribute(
            self.trackers.loads(),
            self.config.max_trackers_per_worker,
            &fresh,
        );
        let assigned: usize = assignments.iter().map(Vec::len).sum();
        if assigned < fresh.len() {
            metrics::CANDIDATES_SHED.inc_by((fresh.len() - assigned) as u64);
            debug!(
                "shed {} candidates, all tracker workers saturated",
                fresh.len() - assigned
            );
        }
        for (index, new_windows) in assignments.into_iter().enumerate() {
            for window in new_windows {
                let id = self.next_track_id;
                self.next_track_id += 1;
                self.trackers.assign(index, id, window)?;
            }
        }

        for snapshot in &snapshots {
            if snapshot.observations.len() < self.config.min_observations {
                continue;
            }
            let Some(text) = fusion::fuse(&snapshot.observations, &self.config.fusion) else {
                continue;
            };
            if self.published.get(&snapshot.id) == Some(&text) {
                continue;
            }
            let reading =
                PlateReading::new(snapshot.id, text.clone(), snapshot.window, cycle.frame.index);
            match self.sink.publish(&reading) {
                Ok(()) => {
                    metrics::PLATES_PUBLISHED.inc();
                    info!(
                        "object {} read as {} at frame {}",
                        snapshot.id, text, cycle.frame.index
                    );
                    self.published.insert(snapshot.id, text);
                }
                // A sink hiccup degrades output, it does not stop the frame loop.
                Err(err) => warn!("sink rejected reading for object {}: {err}", snapshot.id),
            }
        }

        for snapshot in &snapshots {
            if (self.retire)(snapshot) {
                debug!("retiring object {} at age {}", snapshot.id, snapshot.age);
                self.trackers.remove(snapshot.id)?;
                self.published.remove(&snapshot.id);
            }
        }

        if let Some(renderer) = &mut self.renderer {
            renderer.render(&cycle.frame, &windows);
        }
        Ok(())
    }

    fn shutdown(self) {
        info!("stopping workers");
        self.detector.terminate(self.config.shutdown_timeout);
        self.trackers.terminate_all(self.config.shutdown_timeout);
    }
}
