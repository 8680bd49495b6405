use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use plate_pipeline::plate_recognition::config::PipelineConfig;
use plate_pipeline::plate_recognition::imaging::ImageProcOps;
use plate_pipeline::plate_recognition::ocr::NullRecognizer;
use plate_pipeline::plate_recognition::pipeline::{PipelineDeps, PipelineOrchestrator};
use plate_pipeline::plate_recognition::result_sink::JsonLinesSink;
use plate_pipeline::plate_recognition::tracker::PassthroughTracker;
use plate_pipeline::plate_recognition::video_reader::ImageDirSource;
use plate_pipeline::plate_recognition::TrackSnapshot;

/// Drain a directory of frames as fast as cycles complete and write fused
/// readings to a JSON-lines file. Swap `NullRecognizer` for a real OCR engine
/// to get text out.
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let frames_dir = args.next().unwrap_or_else(|| "data/frames".to_string());
    let out_path = args.next().unwrap_or_else(|| "plates.jsonl".to_string());

    let mut source = ImageDirSource::new(Path::new(&frames_dir), false)?;
    let pipeline = PipelineOrchestrator::new(
        PipelineConfig::offline(),
        PipelineDeps {
            ops: Arc::new(ImageProcOps::default()),
            recognizer: Arc::new(NullRecognizer),
            window_tracker: Arc::new(PassthroughTracker),
            sink: Box::new(JsonLinesSink::create(Path::new(&out_path))?),
            renderer: None,
            retire: Box::new(|snapshot: &TrackSnapshot| {
                snapshot.age > 250 || snapshot.window.is_empty()
            }),
        },
    )?;
    pipeline.run(&mut source)?;
    Ok(())
}
