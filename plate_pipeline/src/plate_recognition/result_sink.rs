use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::plate_recognition::PlateReading;

/// Terminal stage for fused readings. Delivery semantics (append-only log,
/// overwrite, network push) are the implementation's business.
pub trait ResultSink {
    fn publish(&mut self, reading: &PlateReading) -> io::Result<()>;
}

/// One JSON object per line, flushed as it is written so a tail on the file
/// sees readings live.
pub struct JsonLinesSink {
    out: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
        })
    }
}

impl ResultSink for JsonLinesSink {
    fn publish(&mut self, reading: &PlateReading) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, reading)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

/// Collects readings in memory behind a shared handle; the pipeline owns the
/// sink while the caller keeps the handle to inspect afterwards.
#[derive(Default)]
pub struct MemorySink {
    readings: Arc<Mutex<Vec<PlateReading>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Arc<Mutex<Vec<PlateReading>>> {
        Arc::clone(&self.readings)
    }
}

impl ResultSink for MemorySink {
    fn publish(&mut self, reading: &PlateReading) -> io::Result<()> {
        self.readings
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "sink poisoned"))?
            .push(reading.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plate_recognition::geometry::Rect;

    #[test]
    fn memory_sink_retains_readings() {
        let mut sink = MemorySink::new();
        let handle = sink.handle();
        let reading = PlateReading::new(1, "KR1234".into(), Rect::new(5, 5, 60, 20), 42);
        sink.publish(&reading).expect("publish");
        assert_eq!(handle.lock().unwrap().as_slice(), &[reading]);
    }

    #[test]
    fn json_lines_round_trip() {
        let dir = std::env::temp_dir().join("plate_pipeline_sink_test");
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("readings.jsonl");
        {
            let mut sink = JsonLinesSink::create(&path).expect("create");
            sink.publish(&PlateReading::new(3, "WA6102X".into(), Rect::new(0, 0, 90, 30), 7))
                .expect("publish");
        }
        let line = std::fs::read_to_string(&path).expect("read back");
        let parsed: PlateReading = serde_json::from_str(line.trim()).expect("parse");
        assert_eq!(parsed.text, "WA6102X");
        assert_eq!(parsed.window, Rect::new(0, 0, 90, 30));
        std::fs::remove_file(&path).ok();
    }
}
