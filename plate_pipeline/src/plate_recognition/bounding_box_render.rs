use std::path::PathBuf;

use image::Luma;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use log::warn;

use crate::plate_recognition::geometry::Rect;
use crate::plate_recognition::Frame;

/// Optional visualization side channel: the current frame plus the windows
/// under track. Never read back by the pipeline.
pub trait Renderer {
    fn render(&mut self, frame: &Frame, windows: &[Rect]);
}

/// Draws the tracked windows onto a copy of the frame and writes one PNG per
/// cycle, numbered by frame index.
pub struct PngDumpRenderer {
    dir: PathBuf,
}

impl PngDumpRenderer {
    pub fn new(dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl Renderer for PngDumpRenderer {
    fn render(&mut self, frame: &Frame, windows: &[Rect]) {
        let mut canvas = frame.image.as_ref().clone();
        for window in windows {
            if window.is_empty() {
                continue;
            }
            let outline = imageproc::rect::Rect::at(window.x, window.y)
                .of_size(window.width as u32, window.height as u32);
            draw_hollow_rect_mut(&mut canvas, outline, Luma([255u8]));
            // Header band above the window, like a label strip.
            let band_h = window.y.max(0).min(6) as u32;
            if band_h > 0 {
                let band = imageproc::rect::Rect::at(window.x, window.y - band_h as i32)
                    .of_size(window.width as u32, band_h);
                draw_filled_rect_mut(&mut canvas, band, Luma([255u8]));
            }
        }
        let path = self.dir.join(format!("frame_{:06}.png", frame.index));
        if let Err(err) = canvas.save(&path) {
            warn!("could not write {}: {err}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;

    #[test]
    fn renders_windows_into_pngs() {
        let dir = std::env::temp_dir().join("plate_pipeline_render_test");
        let mut renderer = PngDumpRenderer::new(dir.clone()).expect("dir");
        let frame = Frame::new(12, GrayImage::new(64, 48));
        renderer.render(&frame, &[Rect::new(10, 10, 30, 12), Rect::new(0, 0, 0, 0)]);

        let path = dir.join("frame_000012.png");
        assert!(path.exists());
        std::fs::remove_file(&path).ok();
    }
}
