use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, warn};

use crate::plate_recognition::detector::drain_until_closed;
use crate::plate_recognition::error::PipelineError;
use crate::plate_recognition::geometry::{self, Rect};
use crate::plate_recognition::imaging::ImageOps;
use crate::plate_recognition::ocr::{self, Recognizer};
use crate::plate_recognition::{Frame, TrackId, TrackSnapshot};

/// Single-object tracking algorithm, consumed as a black box: move a window
/// to the object's position in the new frame.
pub trait WindowTracker: Send + Sync {
    fn advance(&self, window: Rect, frame: &Frame) -> Rect;
}

/// Tracker that leaves every window where it is. Good enough for static
/// scenes and for exercising the pipeline without a real tracking algorithm.
pub struct PassthroughTracker;

impl WindowTracker for PassthroughTracker {
    fn advance(&self, window: Rect, _frame: &Frame) -> Rect {
        window
    }
}

pub enum TrackerRequest {
    Advance(Frame),
    Add { id: TrackId, window: Rect },
    Remove { id: TrackId },
    Terminate,
}

/// Per-cycle report of one tracker worker: a snapshot of every owned object
/// plus the ids confirmed removed since the previous report.
#[derive(Debug, Default)]
pub struct TrackerReport {
    pub snapshots: Vec<TrackSnapshot>,
    pub removed: Vec<TrackId>,
}

/// Everything a tracker worker thread needs besides its channels.
#[derive(Clone)]
pub struct TrackerWorkerConfig {
    pub max_objects: usize,
    pub ocr_interval: u64,
    pub ocr_crop_scale: f32,
    pub recv_timeout: Duration,
}

struct TrackedObject {
    id: TrackId,
    window: Rect,
    age: u64,
    observations: Vec<String>,
}

impl TrackedObject {
    fn new(id: TrackId, window: Rect) -> Self {
        Self {
            id,
            window,
            age: 0,
            observations: Vec::new(),
        }
    }

    fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id,
            window: self.window,
            age: self.age,
            observations: self.observations.clone(),
        }
    }
}

struct Collaborators {
    tracker: Arc<dyn WindowTracker>,
    ops: Arc<dyn ImageOps>,
    recognizer: Arc<dyn Recognizer>,
}

/// Worker loop. Owns its objects outright; membership changes only through
/// add/remove messages, observation lists only grow. A silent mailbox past
/// the bound means the orchestrator is gone; the worker exits and the
/// orchestrator-side timeout replaces it.
fn run_worker(
    name: String,
    request_rx: Receiver<TrackerRequest>,
    report_tx: Sender<TrackerReport>,
    cfg: TrackerWorkerConfig,
    collab: Collaborators,
) {
    let mut objects: Vec<TrackedObject> = Vec::new();
    let mut removed: Vec<TrackId> = Vec::new();
    let ocr_interval = cfg.ocr_interval.max(1);

    if report_tx.send(TrackerReport::default()).is_err() {
        return;
    }
    loop {
        match request_rx.recv_timeout(cfg.recv_timeout) {
            Ok(TrackerRequest::Advance(frame)) => {
                for object in &mut objects {
                    object.window = collab.tracker.advance(object.window, &frame);
                    object.age += 1;
                    if object.age % ocr_interval == 0 {
                        let crop = geometry::scale(
                            &object.window,
                            cfg.ocr_crop_scale,
                            frame.width(),
                            frame.height(),
                        );
                        // A failed crop or an empty reading is "no
                        // observation this frame", nothing more.
                        if let Some(plate) = collab.ops.prepare_plate(&frame, crop) {
                            let reading =
                                ocr::normalize_reading(&collab.recognizer.recognize(&plate));
                            if !reading.is_empty() {
                                object.observations.push(reading);
                            }
                        }
                    }
                }
                let report = TrackerReport {
                    snapshots: objects.iter().map(TrackedObject::snapshot).collect(),
                    removed: mem::take(&mut removed),
                };
                if report_tx.send(report).is_err() {
                    return;
                }
            }
            Ok(TrackerRequest::Add { id, window }) => {
                if objects.len() >= cfg.max_objects {
                    // The balancer should never let this happen; hand the id
                    // straight back so the load count stays truthful.
                    warn!("{name}: at capacity, refusing object {id}");
                    removed.push(id);
                } else {
                    debug!("{name}: tracking object {id} at {window:?}");
                    objects.push(TrackedObject::new(id, window));
                }
            }
            Ok(TrackerRequest::Remove { id }) => {
                if let Some(pos) = objects.iter().position(|o| o.id == id) {
                    objects.remove(pos);
                    removed.push(id);
                }
            }
            Ok(TrackerRequest::Terminate) => return,
            Err(RecvTimeoutError::Timeout) => {
                error!("{name}: mailbox silent past {:?}, exiting", cfg.recv_timeout);
                return;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

struct TrackerHandle {
    name: String,
    request_tx: Sender<TrackerRequest>,
    report_rx: Receiver<TrackerReport>,
    join: Option<JoinHandle<()>>,
    busy: bool,
}

impl TrackerHandle {
    fn spawn(index: usize, cfg: TrackerWorkerConfig, collab: Collaborators) -> Result<Self, PipelineError> {
        let name = format!("plate-tracker-{index}");
        let startup_timeout = cfg.recv_timeout;
        let (request_tx, request_rx) = unbounded();
        let (report_tx, report_rx) = unbounded();
        let thread_name = name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(thread_name, request_rx, report_tx, cfg, collab))
            .map_err(PipelineError::Spawn)?;

        let handle = Self {
            name,
            request_tx,
            report_rx,
            join: Some(join),
            busy: false,
        };
        handle
            .report_rx
            .recv_timeout(startup_timeout)
            .map_err(|_| PipelineError::ChannelClosed {
                worker: handle.name.clone(),
            })?;
        Ok(handle)
    }

    fn send(&self, request: TrackerRequest) -> Result<(), PipelineError> {
        self.request_tx
            .send(request)
            .map_err(|_| PipelineError::ChannelClosed {
                worker: self.name.clone(),
            })
    }
}

/// The tracker worker pool: a collection of (channel handle, load counter)
/// entries indexed by a stable integer id. Loads change only through
/// `assign` and through removals the workers themselves confirm; no object
/// is ever owned by two workers.
pub struct TrackerPool {
    workers: Vec<TrackerHandle>,
    loads: Vec<usize>,
    owners: HashMap<TrackId, usize>,
    worker_cfg: TrackerWorkerConfig,
    tracker: Arc<dyn WindowTracker>,
    ops: Arc<dyn ImageOps>,
    recognizer: Arc<dyn Recognizer>,
}

impl TrackerPool {
    pub fn spawn(
        count: usize,
        worker_cfg: TrackerWorkerConfig,
        tracker: Arc<dyn WindowTracker>,
        ops: Arc<dyn ImageOps>,
        recognizer: Arc<dyn Recognizer>,
    ) -> Result<Self, PipelineError> {
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            workers.push(TrackerHandle::spawn(
                index,
                worker_cfg.clone(),
                Collaborators {
                    tracker: Arc::clone(&tracker),
                    ops: Arc::clone(&ops),
                    recognizer: Arc::clone(&recognizer),
                },
            )?);
        }
        Ok(Self {
            loads: vec![0; count],
            workers,
            owners: HashMap::new(),
            worker_cfg,
            tracker,
            ops,
            recognizer,
        })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn loads(&self) -> &[usize] {
        &self.loads
    }

    pub fn is_busy(&self, index: usize) -> bool {
        self.workers[index].busy
    }

    pub fn worker_name(&self, index: usize) -> &str {
        &self.workers[index].name
    }

    /// Start a cycle: hand the frame to every worker.
    pub fn dispatch(&mut self, frame: &Frame) -> Result<(), PipelineError> {
        for worker in &mut self.workers {
            worker.send(TrackerRequest::Advance(frame.clone()))?;
            worker.busy = true;
        }
        Ok(())
    }

    /// Assign a fresh object to the given worker and count its load.
    pub fn assign(&mut self, index: usize, id: TrackId, window: Rect) -> Result<(), PipelineError> {
        self.workers[index].send(TrackerRequest::Add { id, window })?;
        self.loads[index] += 1;
        self.owners.insert(id, index);
        Ok(())
    }

    /// Ask the owning worker to drop an object. The load is not decremented
    /// here; the worker confirms the removal in its next report.
    pub fn remove(&mut self, id: TrackId) -> Result<(), PipelineError> {
        if let Some(&index) = self.owners.get(&id) {
            self.workers[index].send(TrackerRequest::Remove { id })?;
        }
        Ok(())
    }

    /// Non-blocking poll of every worker. Confirmed removals adjust loads and
    /// ownership as the reports come in.
    pub fn poll(&mut self) -> Result<Vec<(usize, TrackerReport)>, PipelineError> {
        let mut reports = Vec::new();
        for (index, worker) in self.workers.iter_mut().enumerate() {
            match worker.report_rx.try_recv() {
                Ok(report) => {
                    worker.busy = false;
                    for id in &report.removed {
                        if self.owners.remove(id).is_some() {
                            self.loads[index] = self.loads[index].saturating_sub(1);
                        }
                    }
                    reports.push((index, report));
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    return Err(PipelineError::ChannelClosed {
                        worker: worker.name.clone(),
                    })
                }
            }
        }
        Ok(reports)
    }

    /// Replace a failed worker. Its objects are gone with it: ownership and
    /// load reset, and detection will rediscover whatever is still in frame.
    pub fn restart(&mut self, index: usize) -> Result<(), PipelineError> {
        let lost: Vec<TrackId> = self
            .owners
            .iter()
            .filter(|&(_, &owner)| owner == index)
            .map(|(&id, _)| id)
            .collect();
        error!(
            "restarting {} ({} objects lost)",
            self.workers[index].name,
            lost.len()
        );
        for id in lost {
            self.owners.remove(&id);
        }
        self.loads[index] = 0;
        self.workers[index] = TrackerHandle::spawn(
            index,
            self.worker_cfg.clone(),
            Collaborators {
                tracker: Arc::clone(&self.tracker),
                ops: Arc::clone(&self.ops),
                recognizer: Arc::clone(&self.recognizer),
            },
        )?;
        Ok(())
    }

    /// Terminate every worker, waiting up to `timeout` each for the
    /// acknowledgement before detaching it.
    pub fn terminate_all(self, timeout: Duration) {
        for mut worker in self.workers {
            let _ = worker.request_tx.send(TrackerRequest::Terminate);
            if !drain_until_closed(&worker.report_rx, timeout) {
                error!("{} ignored termination, detaching", worker.name);
                continue;
            }
            if let Some(join) = worker.join.take() {
                let _ = join.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plate_recognition::imaging::Contour;
    use image::GrayImage;
    use imageproc::point::Point;
    use std::sync::Mutex;

    struct NoopOps;

    impl ImageOps for NoopOps {
        fn binarize(&self, frame: &Frame) -> GrayImage {
            frame.image.as_ref().clone()
        }

        fn contours(&self, _binary: &GrayImage) -> Vec<Contour> {
            Vec::new()
        }

        fn approximate(&self, contour: &[Point<i32>], _epsilon: f64) -> Contour {
            contour.to_vec()
        }

        fn prepare_plate(&self, _frame: &Frame, _window: Rect) -> Option<GrayImage> {
            Some(GrayImage::new(8, 8))
        }
    }

    /// Scripted recognizer: pops readings in order, then keeps repeating the
    /// final one.
    struct ScriptedRecognizer {
        readings: Mutex<Vec<String>>,
    }

    impl ScriptedRecognizer {
        fn new(readings: &[&str]) -> Self {
            let mut list: Vec<String> = readings.iter().rev().map(|s| s.to_string()).collect();
            if list.is_empty() {
                list.push(String::new());
            }
            Self {
                readings: Mutex::new(list),
            }
        }
    }

    impl Recognizer for ScriptedRecognizer {
        fn recognize(&self, _plate: &GrayImage) -> String {
            let mut readings = self.readings.lock().unwrap();
            if readings.len() > 1 {
                readings.pop().unwrap()
            } else {
                readings[0].clone()
            }
        }
    }

    fn pool(count: usize, max_objects: usize, readings: &[&str]) -> TrackerPool {
        TrackerPool::spawn(
            count,
            TrackerWorkerConfig {
                max_objects,
                ocr_interval: 1,
                ocr_crop_scale: 1.0,
                recv_timeout: Duration::from_secs(5),
            },
            Arc::new(PassthroughTracker),
            Arc::new(NoopOps),
            Arc::new(ScriptedRecognizer::new(readings)),
        )
        .expect("pool starts")
    }

    fn cycle(pool: &mut TrackerPool, frame: &Frame) -> Vec<(usize, TrackerReport)> {
        pool.dispatch(frame).expect("dispatch");
        let mut reports = Vec::new();
        while reports.len() < pool.len() {
            reports.extend(pool.poll().expect("poll"));
            thread::sleep(Duration::from_millis(1));
        }
        reports
    }

    #[test]
    fn tracks_and_accumulates_observations() {
        let mut pool = pool(1, 4, &["KR1234"]);
        pool.assign(0, 7, Rect::new(10, 10, 60, 20)).expect("assign");
        assert_eq!(pool.loads(), &[1]);

        let frame = Frame::new(0, GrayImage::new(100, 50));
        let reports = cycle(&mut pool, &frame);
        let snapshot = &reports[0].1.snapshots[0];
        assert_eq!(snapshot.id, 7);
        assert_eq!(snapshot.age, 1);
        assert_eq!(snapshot.observations, vec!["KR1234".to_string()]);

        // Observations only grow.
        let reports = cycle(&mut pool, &Frame::new(1, GrayImage::new(100, 50)));
        assert_eq!(reports[0].1.snapshots[0].observations.len(), 2);

        pool.terminate_all(Duration::from_secs(1));
    }

    #[test]
    fn removal_is_confirmed_in_next_report() {
        let mut pool = pool(1, 4, &[]);
        pool.assign(0, 3, Rect::new(0, 0, 40, 10)).expect("assign");
        pool.remove(3).expect("remove");

        let reports = cycle(&mut pool, &Frame::new(0, GrayImage::new(64, 32)));
        assert_eq!(reports[0].1.removed, vec![3]);
        assert!(reports[0].1.snapshots.is_empty());
        assert_eq!(pool.loads(), &[0]);

        pool.terminate_all(Duration::from_secs(1));
    }

    #[test]
    fn capacity_refusal_hands_the_id_back() {
        let mut pool = pool(1, 1, &[]);
        pool.assign(0, 1, Rect::new(0, 0, 10, 10)).expect("assign");
        pool.assign(0, 2, Rect::new(20, 0, 10, 10)).expect("assign");

        let reports = cycle(&mut pool, &Frame::new(0, GrayImage::new(64, 32)));
        assert_eq!(reports[0].1.snapshots.len(), 1);
        assert_eq!(reports[0].1.removed, vec![2]);
        assert_eq!(pool.loads(), &[1]);

        pool.terminate_all(Duration::from_secs(1));
    }

    #[test]
    fn restart_resets_load_and_ownership() {
        let mut pool = pool(2, 4, &[]);
        pool.assign(0, 1, Rect::new(0, 0, 10, 10)).expect("assign");
        pool.assign(1, 2, Rect::new(30, 0, 10, 10)).expect("assign");

        pool.restart(0).expect("restart");
        assert_eq!(pool.loads(), &[0, 1]);

        // The restarted worker reports empty; the survivor still owns its object.
        let reports = cycle(&mut pool, &Frame::new(0, GrayImage::new(64, 32)));
        let total_snapshots: usize = reports.iter().map(|(_, r)| r.snapshots.len()).sum();
        assert_eq!(total_snapshots, 1);

        pool.terminate_all(Duration::from_secs(1));
    }
}
