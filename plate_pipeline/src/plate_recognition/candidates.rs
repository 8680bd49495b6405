use std::cmp::Ordering;
use std::f32::consts::FRAC_PI_2;

use image::GrayImage;
use imageproc::point::Point;

use crate::plate_recognition::config::FilterConfig;
use crate::plate_recognition::geometry::{self, Rect};
use crate::plate_recognition::imaging::{Contour, ImageOps};

/// Find plate-shaped rectangles in a binary frame: trace contours, keep the
/// largest, polygon-approximate each and test the quadrilateral against the
/// configured proportion and angle gates. Survivors contribute the bounding
/// box of their full contour; the boxes are merged before return, so the
/// result never holds two rectangles past the merge threshold.
pub fn find_candidates(
    ops: &dyn ImageOps,
    binary: &GrayImage,
    cfg: &FilterConfig,
    merge_overlap: f64,
) -> Vec<Rect> {
    let mut contours = ops.contours(binary);
    contours.sort_by(|a, b| {
        contour_area(b)
            .partial_cmp(&contour_area(a))
            .unwrap_or(Ordering::Equal)
    });
    contours.truncate(cfg.max_contours);

    let mut boxes = Vec::new();
    for contour in &contours {
        let approx = ops.approximate(contour, cfg.approx_epsilon * perimeter(contour));
        if check_plate_shape(&approx, cfg) {
            boxes.push(bounding_rect(contour));
        }
    }
    geometry::merge_overlapping(&boxes, merge_overlap)
}

/// Is this polygon approximation a plate-proportioned quadrilateral?
pub fn check_plate_shape(approx: &[Point<i32>], cfg: &FilterConfig) -> bool {
    if approx.len() != 4 {
        return false;
    }
    let corners = reorder_corners(approx);
    check_proportions(&corners, cfg) && check_angles(&corners, cfg)
}

/// Canonical corner order: top-left, bottom-left, top-right, bottom-right.
/// Sort on x, then resolve each left/right pair by y.
fn reorder_corners(points: &[Point<i32>]) -> [Point<i32>; 4] {
    let mut sorted = [points[0], points[1], points[2], points[3]];
    sorted.sort_by_key(|p| p.x);
    if sorted[0].y > sorted[1].y {
        sorted.swap(0, 1);
    }
    if sorted[2].y > sorted[3].y {
        sorted.swap(2, 3);
    }
    sorted
}

/// Width/height ratio near a configured target, top and bottom edges of
/// similar length, wider than tall.
fn check_proportions(corners: &[Point<i32>; 4], cfg: &FilterConfig) -> bool {
    let [tl, bl, tr, br] = corners;
    let height = (br.y - tr.y).abs();
    let width = (bl.x - br.x).abs();
    let width_top = (tl.x - tr.x).abs();
    if height == 0 || width == 0 {
        return false;
    }
    if height > width {
        return false;
    }
    let edge_ratio = width_top as f32 / width as f32;
    if edge_ratio < 1.0 - cfg.edge_similarity || edge_ratio > 1.0 + cfg.edge_similarity {
        return false;
    }
    let ratio = width as f32 / height as f32;
    cfg.aspect_ratios
        .iter()
        .any(|&target| target - cfg.aspect_tolerance < ratio && ratio < target + cfg.aspect_tolerance)
}

/// Top and bottom edges near-parallel, right edge near-perpendicular to the
/// horizontal. An exactly vertical right edge passes outright.
fn check_angles(corners: &[Point<i32>; 4], cfg: &FilterConfig) -> bool {
    let [tl, bl, tr, br] = corners;
    if tl.x == tr.x || bl.x == br.x {
        return false;
    }
    let slope_top = ((tl.y - tr.y) as f32 / (tl.x - tr.x) as f32).abs();
    let slope_bottom = ((bl.y - br.y) as f32 / (bl.x - br.x) as f32).abs();
    let between = ((slope_top - slope_bottom).abs() / (1.0 + slope_top * slope_bottom)).atan();
    if between > cfg.max_parallel_angle {
        return false;
    }
    if tr.x == br.x {
        return true;
    }
    let slope_right = ((tr.y - br.y) as f32 / (tr.x - br.x) as f32).abs();
    slope_right.atan() >= FRAC_PI_2 - cfg.max_perpendicular_angle
}

fn bounding_rect(contour: &Contour) -> Rect {
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
    for p in contour {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
}

/// Enclosed area by the shoelace formula.
fn contour_area(contour: &Contour) -> f64 {
    if contour.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0i64;
    for (i, p) in contour.iter().enumerate() {
        let q = &contour[(i + 1) % contour.len()];
        twice_area += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice_area.abs() as f64) / 2.0
}

fn perimeter(contour: &Contour) -> f64 {
    if contour.len() < 2 {
        return 0.0;
    }
    let mut length = 0.0;
    for (i, p) in contour.iter().enumerate() {
        let q = &contour[(i + 1) % contour.len()];
        let (dx, dy) = ((p.x - q.x) as f64, (p.y - q.y) as f64);
        length += (dx * dx + dy * dy).sqrt();
    }
    length
}
