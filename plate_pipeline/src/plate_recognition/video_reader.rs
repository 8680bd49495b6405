use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::warn;
use spin_sleep::SpinSleeper;

use crate::plate_recognition::error::PipelineError;
use crate::plate_recognition::Frame;

/// Where frames come from. The orchestrator owns each frame until it hands it
/// to the workers; `None` means the source is exhausted.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Frame>;
}

/// Reads a directory of still images in filename order, optionally looping
/// back to the start when it runs out. Undecodable files are skipped with a
/// warning rather than ending the stream.
pub struct ImageDirSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    do_loop: bool,
    next_index: u64,
}

impl ImageDirSource {
    pub fn new(dir: &Path, do_loop: bool) -> Result<Self, PipelineError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| PipelineError::Source(format!("{}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("png") | Some("jpg") | Some("jpeg") | Some("bmp")
                )
            })
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(PipelineError::Source(format!(
                "no frames in {}",
                dir.display()
            )));
        }
        Ok(Self {
            paths,
            cursor: 0,
            do_loop,
            next_index: 0,
        })
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if self.cursor >= self.paths.len() {
                if !self.do_loop {
                    return None;
                }
                self.cursor = 0;
            }
            let path = &self.paths[self.cursor];
            self.cursor += 1;
            match image::open(path) {
                Ok(decoded) => {
                    let frame = Frame::new(self.next_index, decoded.to_luma8());
                    self.next_index += 1;
                    return Some(frame);
                }
                Err(err) => {
                    warn!("skipping {}: {err}", path.display());
                }
            }
        }
    }
}

/// Keeps a loop running at a fixed rate; sleeps off whatever the iteration
/// left of its frame budget.
pub struct FpsLimiter {
    sleeper: SpinSleeper,
    frame_budget: Duration,
    mark: Instant,
}

impl FpsLimiter {
    pub fn new(fps: usize) -> Self {
        Self {
            sleeper: SpinSleeper::default(),
            frame_budget: Duration::from_secs(1) / fps.max(1) as u32,
            mark: Instant::now(),
        }
    }

    pub fn wait(&mut self) {
        let elapsed = self.mark.elapsed();
        if self.frame_budget > elapsed {
            self.sleeper.sleep(self.frame_budget - elapsed);
        }
        self.mark = Instant::now();
    }
}
