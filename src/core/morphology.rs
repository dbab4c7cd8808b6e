//! Binary morphology and connected-component labeling on raster masks

use ndarray::{Array2, Zip};
use std::collections::BTreeMap;

use crate::types::BodyId;

/// Diamond (L1 ball) structuring element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diamond {
    pub radius: usize,
}

impl Diamond {
    pub fn new(radius: usize) -> Self {
        Self { radius }
    }

    /// Offsets `(drow, dcol)` with `|drow| + |dcol| <= radius`
    pub fn offsets(&self) -> Vec<(isize, isize)> {
        let r = self.radius as isize;
        let mut out = Vec::new();
        for di in -r..=r {
            let span = r - di.abs();
            for dj in -span..=span {
                out.push((di, dj));
            }
        }
        out
    }
}

/// City-block distance from every pixel to the nearest set pixel.
///
/// Two-pass chamfer transform; exact for the L1 metric. Pixels with no set
/// pixel in the raster get `u32::MAX`.
pub fn manhattan_distance(mask: &Array2<bool>) -> Array2<u32> {
    let (height, width) = mask.dim();
    let far = u32::MAX;
    let mut dist = mask.mapv(|v| if v { 0 } else { far });

    for i in 0..height {
        for j in 0..width {
            let mut d = dist[[i, j]];
            if i > 0 {
                d = d.min(dist[[i - 1, j]].saturating_add(1));
            }
            if j > 0 {
                d = d.min(dist[[i, j - 1]].saturating_add(1));
            }
            dist[[i, j]] = d;
        }
    }
    for i in (0..height).rev() {
        for j in (0..width).rev() {
            let mut d = dist[[i, j]];
            if i + 1 < height {
                d = d.min(dist[[i + 1, j]].saturating_add(1));
            }
            if j + 1 < width {
                d = d.min(dist[[i, j + 1]].saturating_add(1));
            }
            dist[[i, j]] = d;
        }
    }
    dist
}

/// Binary dilation by a diamond; pixels outside the raster count as unset.
///
/// Dilation by a diamond of radius `r` keeps every pixel within L1 distance `r`
/// of a set pixel, so one distance transform covers any radius.
pub fn dilate(mask: &Array2<bool>, element: Diamond) -> Array2<bool> {
    dilate_repeated(mask, element, 1)
}

/// `iterations` successive dilations by the same diamond
pub fn dilate_repeated(mask: &Array2<bool>, element: Diamond, iterations: usize) -> Array2<bool> {
    let reach = (element.radius * iterations) as u32;
    let dist = manhattan_distance(mask);
    dist.mapv(|d| d <= reach)
}

/// Binary erosion by a diamond; pixels outside the raster count as set
pub fn erode(mask: &Array2<bool>, element: Diamond) -> Array2<bool> {
    let (height, width) = mask.dim();
    let offsets = element.offsets();
    let mut out = Array2::from_elem((height, width), false);

    Zip::indexed(&mut out).par_for_each(|(i, j), o| {
        if !mask[[i, j]] {
            return;
        }
        *o = offsets.iter().all(|&(di, dj)| {
            let ni = i as isize + di;
            let nj = j as isize + dj;
            if ni < 0 || nj < 0 || ni >= height as isize || nj >= width as isize {
                return true;
            }
            mask[[ni as usize, nj as usize]]
        });
    });
    out
}

/// Label 8-connected components; labels are numbered in raster scan order starting at 1
pub fn label_components(mask: &Array2<bool>) -> (Array2<u32>, u32) {
    let (height, width) = mask.dim();
    let mut labels = Array2::<u32>::zeros((height, width));
    let mut next = 0u32;
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for i in 0..height {
        for j in 0..width {
            if !mask[[i, j]] || labels[[i, j]] != 0 {
                continue;
            }
            next += 1;
            labels[[i, j]] = next;
            stack.push((i, j));

            while let Some((r, c)) = stack.pop() {
                let r0 = r.saturating_sub(1);
                let c0 = c.saturating_sub(1);
                let r1 = (r + 1).min(height - 1);
                let c1 = (c + 1).min(width - 1);
                for nr in r0..=r1 {
                    for nc in c0..=c1 {
                        if mask[[nr, nc]] && labels[[nr, nc]] == 0 {
                            labels[[nr, nc]] = next;
                            stack.push((nr, nc));
                        }
                    }
                }
            }
        }
    }

    (labels, next)
}

/// Pixel membership and bounding box of one labeled region
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: BodyId,
    /// Pixel coordinates in row-major order
    pub coords: Vec<(usize, usize)>,
    pub min_row: usize,
    pub max_row: usize,
    pub min_col: usize,
    pub max_col: usize,
}

impl Region {
    pub fn area(&self) -> usize {
        self.coords.len()
    }

    /// Fraction of the bounding box covered by the region
    pub fn extent(&self) -> f64 {
        let bbox = (self.max_row - self.min_row + 1) * (self.max_col - self.min_col + 1);
        self.area() as f64 / bbox as f64
    }

    /// Mean (row, col) of the member pixels
    pub fn centroid(&self) -> (f64, f64) {
        let n = self.coords.len() as f64;
        let (sr, sc) = self
            .coords
            .iter()
            .fold((0.0, 0.0), |(sr, sc), &(r, c)| (sr + r as f64, sc + c as f64));
        (sr / n, sc / n)
    }

    /// True if any member pixel is set in `mask`
    pub fn touches(&self, mask: &Array2<bool>) -> bool {
        self.coords.iter().any(|&(r, c)| mask[[r, c]])
    }
}

/// Collect every non-zero label's region
pub fn regions(labels: &Array2<u32>) -> BTreeMap<BodyId, Region> {
    let mut out: BTreeMap<BodyId, Region> = BTreeMap::new();
    for ((i, j), &label) in labels.indexed_iter() {
        if label == 0 {
            continue;
        }
        let id = BodyId(label);
        let region = out.entry(id).or_insert_with(|| Region {
            id,
            coords: Vec::new(),
            min_row: i,
            max_row: i,
            min_col: j,
            max_col: j,
        });
        region.coords.push((i, j));
        region.min_row = region.min_row.min(i);
        region.max_row = region.max_row.max(i);
        region.min_col = region.min_col.min(j);
        region.max_col = region.max_col.max(j);
    }
    out
}
