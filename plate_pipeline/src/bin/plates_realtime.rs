use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use plate_pipeline::plate_recognition::bounding_box_render::PngDumpRenderer;
use plate_pipeline::plate_recognition::config::PipelineConfig;
use plate_pipeline::plate_recognition::imaging::ImageProcOps;
use plate_pipeline::plate_recognition::ocr::NullRecognizer;
use plate_pipeline::plate_recognition::pipeline::{PipelineDeps, PipelineOrchestrator};
use plate_pipeline::plate_recognition::result_sink::JsonLinesSink;
use plate_pipeline::plate_recognition::tracker::PassthroughTracker;
use plate_pipeline::plate_recognition::video_reader::ImageDirSource;
use plate_pipeline::plate_recognition::TrackSnapshot;

/// Pace a directory of frames at the source frame rate; frames arriving while
/// a cycle is in flight go through the bounded backlog and the oldest are
/// shed under pressure. Annotated frames land next to the readings.
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let frames_dir = args.next().unwrap_or_else(|| "data/frames".to_string());
    let out_path = args.next().unwrap_or_else(|| "plates.jsonl".to_string());
    let render_dir = args.next().unwrap_or_else(|| "annotated".to_string());
    let fps = 20;

    let mut source = ImageDirSource::new(Path::new(&frames_dir), false)?;
    let pipeline = PipelineOrchestrator::new(
        PipelineConfig::realtime(fps),
        PipelineDeps {
            ops: Arc::new(ImageProcOps::default()),
            recognizer: Arc::new(NullRecognizer),
            window_tracker: Arc::new(PassthroughTracker),
            sink: Box::new(JsonLinesSink::create(Path::new(&out_path))?),
            renderer: Some(Box::new(PngDumpRenderer::new(PathBuf::from(render_dir))?)),
            retire: Box::new(|snapshot: &TrackSnapshot| {
                snapshot.age > 250 || snapshot.window.is_empty()
            }),
        },
    )?;
    pipeline.run(&mut source)?;
    Ok(())
}
