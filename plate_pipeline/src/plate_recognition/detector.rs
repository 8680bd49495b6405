use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error};

use crate::plate_recognition::candidates;
use crate::plate_recognition::config::FilterConfig;
use crate::plate_recognition::error::PipelineError;
use crate::plate_recognition::geometry::Rect;
use crate::plate_recognition::imaging::ImageOps;
use crate::plate_recognition::Frame;

pub enum DetectorRequest {
    Detect(Frame),
    Terminate,
}

/// Reply framing: the status flag plus the candidate windows. Rect fields
/// cross the channel as plain integers, nothing is re-encoded.
#[derive(Debug, Default)]
pub struct DetectorReply {
    pub busy: bool,
    pub candidates: Vec<Rect>,
}

/// Orchestrator-side handle to the detection worker thread. Holds at most one
/// outstanding request; `restart` replaces the thread and both channels, so a
/// reply from a failed incarnation can never leak into a new cycle.
pub struct DetectorHandle {
    request_tx: Sender<DetectorRequest>,
    reply_rx: Receiver<DetectorReply>,
    join: Option<JoinHandle<()>>,
    busy: bool,
    ops: Arc<dyn ImageOps>,
    filter: FilterConfig,
    merge_overlap: f64,
    recv_timeout: Duration,
}

impl DetectorHandle {
    /// Spawn the worker and wait for its startup idle signal.
    pub fn spawn(
        ops: Arc<dyn ImageOps>,
        filter: FilterConfig,
        merge_overlap: f64,
        recv_timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let (request_tx, request_rx) = unbounded();
        let (reply_tx, reply_rx) = unbounded();
        let worker_ops = Arc::clone(&ops);
        let worker_filter = filter.clone();
        let join = thread::Builder::new()
            .name("plate-detector".into())
            .spawn(move || {
                run_worker(
                    request_rx,
                    reply_tx,
                    worker_ops,
                    worker_filter,
                    merge_overlap,
                    recv_timeout,
                )
            })
            .map_err(PipelineError::Spawn)?;

        let handle = Self {
            request_tx,
            reply_rx,
            join: Some(join),
            busy: false,
            ops,
            filter,
            merge_overlap,
            recv_timeout,
        };
        handle.await_ready()?;
        Ok(handle)
    }

    fn await_ready(&self) -> Result<(), PipelineError> {
        self.reply_rx
            .recv_timeout(self.recv_timeout)
            .map(|_| ())
            .map_err(|_| PipelineError::ChannelClosed {
                worker: "plate-detector".into(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Hand a frame to the worker. One outstanding request at a time.
    pub fn dispatch(&mut self, frame: Frame) -> Result<(), PipelineError> {
        debug_assert!(!self.busy, "detector already has a request in flight");
        self.request_tx
            .send(DetectorRequest::Detect(frame))
            .map_err(|_| PipelineError::ChannelClosed {
                worker: "plate-detector".into(),
            })?;
        self.busy = true;
        Ok(())
    }

    /// Non-blocking reply poll. `Ok(None)` while the worker is still busy.
    pub fn try_reply(&mut self) -> Result<Option<DetectorReply>, PipelineError> {
        match self.reply_rx.try_recv() {
            Ok(reply) => {
                self.busy = false;
                Ok(Some(reply))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(PipelineError::ChannelClosed {
                worker: "plate-detector".into(),
            }),
        }
    }

    /// Replace the worker after a missed report: fresh channels, fresh thread.
    /// The previous thread sees its request channel disconnect and exits.
    pub fn restart(&mut self) -> Result<(), PipelineError> {
        error!("restarting plate detector worker");
        let fresh = Self::spawn(
            Arc::clone(&self.ops),
            self.filter.clone(),
            self.merge_overlap,
            self.recv_timeout,
        )?;
        // Dropping the old handle disconnects the stale thread's mailbox; it
        // exits on its own, detached.
        *self = fresh;
        Ok(())
    }

    /// Send the termination message and wait for the worker to wind down;
    /// detach it if the acknowledgement never comes.
    pub fn terminate(mut self, timeout: Duration) {
        let _ = self.request_tx.send(DetectorRequest::Terminate);
        if !drain_until_closed(&self.reply_rx, timeout) {
            error!("plate detector ignored termination, detaching");
            return;
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Drain stale replies until the worker drops its end (acknowledgement of
/// termination) or the deadline passes.
pub(crate) fn drain_until_closed<T>(rx: &Receiver<T>, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let left = deadline.saturating_duration_since(std::time::Instant::now());
        if left.is_zero() {
            return false;
        }
        match rx.recv_timeout(left) {
            Ok(_) => continue,
            Err(RecvTimeoutError::Disconnected) => return true,
            Err(RecvTimeoutError::Timeout) => return false,
        }
    }
}

/// Worker loop: stateless across requests beyond the in-flight frame. Signals
/// idle on startup, then serves one detection request at a time. A mailbox
/// that stays silent past the bound means the orchestrator is gone or wedged;
/// the worker gives up and lets the orchestrator-side timeout replace it.
fn run_worker(
    request_rx: Receiver<DetectorRequest>,
    reply_tx: Sender<DetectorReply>,
    ops: Arc<dyn ImageOps>,
    filter: FilterConfig,
    merge_overlap: f64,
    recv_timeout: Duration,
) {
    if reply_tx.send(DetectorReply::default()).is_err() {
        return;
    }
    loop {
        match request_rx.recv_timeout(recv_timeout) {
            Ok(DetectorRequest::Detect(frame)) => {
                let binary = ops.binarize(&frame);
                let found = candidates::find_candidates(ops.as_ref(), &binary, &filter, merge_overlap);
                debug!("frame {}: {} plate candidates", frame.index, found.len());
                let reply = DetectorReply {
                    busy: false,
                    candidates: found,
                };
                if reply_tx.send(reply).is_err() {
                    return;
                }
            }
            Ok(DetectorRequest::Terminate) => return,
            Err(RecvTimeoutError::Timeout) => {
                error!("plate detector mailbox silent past {recv_timeout:?}, exiting");
                return;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plate_recognition::imaging::Contour;
    use image::GrayImage;
    use imageproc::point::Point;

    /// Contour source that always reports one plate-shaped quadrilateral.
    struct OneQuadOps;

    impl ImageOps for OneQuadOps {
        fn binarize(&self, frame: &Frame) -> GrayImage {
            frame.image.as_ref().clone()
        }

        fn contours(&self, _binary: &GrayImage) -> Vec<Contour> {
            vec![vec![
                Point::new(40, 30),
                Point::new(160, 30),
                Point::new(160, 70),
                Point::new(40, 70),
            ]]
        }

        fn approximate(&self, contour: &[Point<i32>], _epsilon: f64) -> Contour {
            contour.to_vec()
        }

        fn prepare_plate(&self, _frame: &Frame, _window: Rect) -> Option<GrayImage> {
            None
        }
    }

    fn test_filter() -> FilterConfig {
        FilterConfig {
            aspect_ratios: vec![3.0],
            aspect_tolerance: 0.5,
            ..FilterConfig::default()
        }
    }

    #[test]
    fn detects_and_replies_idle() {
        let mut handle = DetectorHandle::spawn(
            Arc::new(OneQuadOps),
            test_filter(),
            0.5,
            Duration::from_secs(5),
        )
        .expect("worker starts");

        handle
            .dispatch(Frame::new(0, GrayImage::new(200, 100)))
            .expect("dispatch");
        assert!(handle.is_busy());

        let reply = loop {
            if let Some(reply) = handle.try_reply().expect("channel open") {
                break reply;
            }
            thread::sleep(Duration::from_millis(1));
        };
        assert!(!reply.busy);
        assert_eq!(reply.candidates, vec![Rect::new(40, 30, 120, 40)]);
        assert!(!handle.is_busy());

        handle.terminate(Duration::from_secs(1));
    }

    #[test]
    fn restart_yields_working_worker() {
        let mut handle = DetectorHandle::spawn(
            Arc::new(OneQuadOps),
            test_filter(),
            0.5,
            Duration::from_secs(5),
        )
        .expect("worker starts");
        handle.restart().expect("restart");

        handle
            .dispatch(Frame::new(1, GrayImage::new(200, 100)))
            .expect("dispatch after restart");
        let reply = loop {
            if let Some(reply) = handle.try_reply().expect("channel open") {
                break reply;
            }
            thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(reply.candidates.len(), 1);
        handle.terminate(Duration::from_secs(1));
    }
}
