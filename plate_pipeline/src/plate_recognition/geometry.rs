use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates, `width`/`height` non-negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Bounds are inclusive on all four edges, so touching counts as containment.
    pub fn contains_point(&self, px: i32, py: i32) -> bool {
        self.x <= px && px <= self.right() && self.y <= py && py <= self.bottom()
    }

    fn corners(&self) -> [(i32, i32); 4] {
        [
            (self.x, self.y),
            (self.x, self.bottom()),
            (self.right(), self.y),
            (self.right(), self.bottom()),
        ]
    }
}

/// Corner-containment overlap test: true if any corner of `a` lies inside `b`
/// or vice versa. Not a full polygon intersection; thin interleaved rectangles
/// can be misclassified, and the merge threshold downstream is tuned against
/// exactly this behavior.
pub fn overlaps(a: &Rect, b: &Rect) -> bool {
    a.corners().iter().any(|&(x, y)| b.contains_point(x, y))
        || b.corners().iter().any(|&(x, y)| a.contains_point(x, y))
}

/// True if `inner` is fully bounded by `outer` on all four edges.
pub fn within(outer: &Rect, inner: &Rect) -> bool {
    outer.x <= inner.x
        && outer.y <= inner.y
        && inner.right() <= outer.right()
        && inner.bottom() <= outer.bottom()
}

fn intersection_area(a: &Rect, b: &Rect) -> i64 {
    let w = a.right().min(b.right()) - a.x.max(b.x);
    let h = a.bottom().min(b.bottom()) - a.y.max(b.y);
    if w <= 0 || h <= 0 {
        return 0;
    }
    w as i64 * h as i64
}

/// Intersection area over the smaller rectangle's area. Zero for empty rects.
pub fn overlap_fraction(a: &Rect, b: &Rect) -> f64 {
    let min_area = a.area().min(b.area());
    if min_area <= 0 {
        return 0.0;
    }
    intersection_area(a, b) as f64 / min_area as f64
}

fn bounding(a: &Rect, b: &Rect) -> Rect {
    let x = a.x.min(b.x);
    let y = a.y.min(b.y);
    Rect::new(
        x,
        y,
        a.right().max(b.right()) - x,
        a.bottom().max(b.bottom()) - y,
    )
}

/// Partition `rects` into clusters whose members pairwise-chain above the
/// overlap threshold; return one bounding rect per cluster of at least
/// `min_cluster` members.
fn cluster(rects: &[Rect], threshold: f64, min_cluster: usize) -> Vec<Rect> {
    let mut parent: Vec<usize> = (0..rects.len()).collect();

    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if overlap_fraction(&rects[i], &rects[j]) >= threshold {
                let (ri, rj) = (root(&mut parent, i), root(&mut parent, j));
                parent[ri] = rj;
            }
        }
    }

    let mut merged: Vec<Option<(Rect, usize)>> = vec![None; rects.len()];
    for i in 0..rects.len() {
        let r = root(&mut parent, i);
        merged[r] = Some(match merged[r] {
            Some((acc, n)) => (bounding(&acc, &rects[i]), n + 1),
            None => (rects[i], 1),
        });
    }

    merged
        .into_iter()
        .flatten()
        .filter(|&(_, n)| n >= min_cluster)
        .map(|(rect, _)| rect)
        .collect()
}

/// Merge overlapping rectangles into cluster bounding boxes, repeated until
/// no two results still overlap past the threshold. Idempotent; output order
/// is not guaranteed.
pub fn merge_overlapping(rects: &[Rect], threshold: f64) -> Vec<Rect> {
    let mut current = rects.to_vec();
    loop {
        let merged = cluster(&current, threshold, 1);
        if merged.len() == current.len() {
            return merged;
        }
        current = merged;
    }
}

/// Members of `set_a` that do not overlap any genuine overlap-cluster of
/// `set_a ∪ set_b` (clusters of at least two members). Rectangles already
/// under track thereby mask fresh detections of the same object.
pub fn exclude_overlapping(set_a: &[Rect], set_b: &[Rect], threshold: f64) -> Vec<Rect> {
    if set_a.is_empty() {
        return Vec::new();
    }
    if set_b.is_empty() {
        return set_a.to_vec();
    }
    let mut all = set_a.to_vec();
    all.extend_from_slice(set_b);
    let clusters = cluster(&all, threshold, 2);
    if clusters.is_empty() {
        return set_a.to_vec();
    }
    set_a
        .iter()
        .filter(|rect| clusters.iter().all(|c| !overlaps(rect, c)))
        .copied()
        .collect()
}

/// Expand `rect` about its center by `factor`, clamped so the result never
/// extends past `(0,0)-(max_w,max_h)`.
pub fn scale(rect: &Rect, factor: f32, max_w: u32, max_h: u32) -> Rect {
    let mut w = (rect.width as f32 * factor) as i32;
    let mut h = (rect.height as f32 * factor) as i32;
    let x = (rect.x - (w - rect.width) / 2).max(0);
    let y = (rect.y - (h - rect.height) / 2).max(0);
    w = w.min(max_w as i32 - x).max(0);
    h = h.min(max_h as i32 - y).max(0);
    Rect::new(x, y, w, h)
}
