use image::{imageops, GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::approximate_polygon_dp;
use imageproc::point::Point;

use crate::plate_recognition::geometry::Rect;
use crate::plate_recognition::Frame;

/// Ordered boundary points of one connected region.
pub type Contour = Vec<Point<i32>>;

/// Pixel-level primitives the pipeline consumes as black boxes: binarization,
/// contour extraction, polygon approximation and OCR crop preparation.
pub trait ImageOps: Send + Sync {
    /// Blur and threshold a grayscale frame into a two-level image.
    fn binarize(&self, frame: &Frame) -> GrayImage;

    /// Shape boundaries of the binary image, unordered.
    fn contours(&self, binary: &GrayImage) -> Vec<Contour>;

    /// Polygon approximation of a closed contour.
    fn approximate(&self, contour: &[Point<i32>], epsilon: f64) -> Contour;

    /// Crop `window` out of the frame and prepare it for text recognition
    /// (binarize, margin-pad). `None` when the crop is degenerate or blank;
    /// the caller records that as "no observation", never as an error.
    fn prepare_plate(&self, frame: &Frame, window: Rect) -> Option<GrayImage>;
}

/// Default backend on `image` + `imageproc`.
pub struct ImageProcOps {
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// White margin, pixels, padded around a plate crop before OCR.
    pub plate_margin: u32,
}

impl Default for ImageProcOps {
    fn default() -> Self {
        Self {
            blur_sigma: 1.0,
            canny_low: 1.0,
            canny_high: 30.0,
            plate_margin: 6,
        }
    }
}

impl ImageProcOps {
    fn is_blank(image: &GrayImage) -> bool {
        let mut pixels = image.pixels();
        match pixels.next() {
            Some(first) => pixels.all(|p| p == first),
            None => true,
        }
    }
}

impl ImageOps for ImageProcOps {
    fn binarize(&self, frame: &Frame) -> GrayImage {
        let blurred = gaussian_blur_f32(frame.image.as_ref(), self.blur_sigma);
        let level = otsu_level(&blurred);
        threshold(&blurred, level, ThresholdType::Binary)
    }

    fn contours(&self, binary: &GrayImage) -> Vec<Contour> {
        let edges = canny(binary, self.canny_low, self.canny_high);
        find_contours::<i32>(&edges)
            .into_iter()
            .map(|c| c.points)
            .collect()
    }

    fn approximate(&self, contour: &[Point<i32>], epsilon: f64) -> Contour {
        approximate_polygon_dp(contour, epsilon, true)
    }

    fn prepare_plate(&self, frame: &Frame, window: Rect) -> Option<GrayImage> {
        if window.is_empty()
            || window.x < 0
            || window.y < 0
            || window.right() > frame.width() as i32
            || window.bottom() > frame.height() as i32
        {
            return None;
        }
        let cropped = imageops::crop_imm(
            frame.image.as_ref(),
            window.x as u32,
            window.y as u32,
            window.width as u32,
            window.height as u32,
        )
        .to_image();
        if Self::is_blank(&cropped) {
            return None;
        }
        let level = otsu_level(&cropped);
        let binary = threshold(&cropped, level, ThresholdType::Binary);

        let m = self.plate_margin;
        let mut padded = GrayImage::from_pixel(
            binary.width() + 2 * m,
            binary.height() + 2 * m,
            Luma([255u8]),
        );
        imageops::replace(&mut padded, &binary, m as i64, m as i64);
        Some(padded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_box(w: u32, h: u32, rect: Rect) -> Frame {
        let mut image = GrayImage::new(w, h);
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                image.put_pixel(x as u32, y as u32, Luma([255u8]));
            }
        }
        Frame::new(0, image)
    }

    #[test]
    fn binarize_produces_two_levels() {
        let frame = frame_with_box(64, 64, Rect::new(10, 10, 30, 20));
        let binary = ImageProcOps::default().binarize(&frame);
        assert!(binary.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn contours_found_for_solid_box() {
        let ops = ImageProcOps::default();
        let frame = frame_with_box(100, 80, Rect::new(20, 20, 50, 30));
        let contours = ops.contours(&ops.binarize(&frame));
        assert!(!contours.is_empty());
    }

    #[test]
    fn prepare_plate_rejects_degenerate_windows() {
        let ops = ImageProcOps::default();
        let frame = frame_with_box(64, 64, Rect::new(10, 10, 30, 20));
        assert!(ops.prepare_plate(&frame, Rect::new(0, 0, 0, 10)).is_none());
        assert!(ops.prepare_plate(&frame, Rect::new(-5, 0, 10, 10)).is_none());
        assert!(ops.prepare_plate(&frame, Rect::new(60, 60, 10, 10)).is_none());
    }

    #[test]
    fn prepare_plate_rejects_blank_crops() {
        let ops = ImageProcOps::default();
        let frame = frame_with_box(64, 64, Rect::new(40, 40, 10, 10));
        // Uniform black region: nothing to read.
        assert!(ops.prepare_plate(&frame, Rect::new(0, 0, 20, 20)).is_none());
    }

    #[test]
    fn prepare_plate_pads_margin() {
        let ops = ImageProcOps::default();
        let frame = frame_with_box(64, 64, Rect::new(10, 10, 30, 20));
        let plate = ops
            .prepare_plate(&frame, Rect::new(8, 8, 34, 24))
            .expect("crop spans both levels");
        assert_eq!(plate.width(), 34 + 2 * ops.plate_margin);
        assert_eq!(plate.height(), 24 + 2 * ops.plate_margin);
    }
}
