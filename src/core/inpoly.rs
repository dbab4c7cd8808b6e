//! Point-in-polygon classification with boundary tolerance.
//!
//! Crossing-number test driven by a scan over points sorted along one axis:
//! each polygon edge only visits the points inside its own scan-axis interval,
//! located by binary search. Points within the floating-point tolerance of an
//! edge are reported as boundary points (and as inside).

use crate::types::{LakeError, LakeResult};

/// Polygon (or set of rings) described as nodes plus edge index pairs
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub nodes: Vec<[f64; 2]>,
    pub edges: Vec<[usize; 2]>,
}

impl Polygon {
    pub fn new(nodes: Vec<[f64; 2]>, edges: Vec<[usize; 2]>) -> Self {
        Self { nodes, edges }
    }

    /// Single closed ring; a repeated closing vertex is dropped
    pub fn from_ring(ring: &[[f64; 2]]) -> Self {
        Self::from_rings(std::slice::from_ref(&ring.to_vec()))
    }

    /// Several closed rings (outer boundaries and holes) in one edge set
    pub fn from_rings(rings: &[Vec<[f64; 2]>]) -> Self {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for ring in rings {
            let mut ring = ring.as_slice();
            if ring.len() > 1 && ring.first() == ring.last() {
                ring = &ring[..ring.len() - 1];
            }
            if ring.is_empty() {
                continue;
            }
            let start = nodes.len();
            let n = ring.len();
            nodes.extend_from_slice(ring);
            edges.extend((0..n).map(|k| [start + k, start + (k + 1) % n]));
        }
        Self { nodes, edges }
    }

    /// Axis-aligned bounds as `([min_x, min_y], [max_x, max_y])`
    pub fn bounds(&self) -> Option<([f64; 2], [f64; 2])> {
        let first = *self.nodes.first()?;
        let mut lo = first;
        let mut hi = first;
        for p in &self.nodes {
            lo[0] = lo[0].min(p[0]);
            lo[1] = lo[1].min(p[1]);
            hi[0] = hi[0].max(p[0]);
            hi[1] = hi[1].max(p[1]);
        }
        Some((lo, hi))
    }

    fn validate(&self) -> LakeResult<()> {
        if self.nodes.is_empty() {
            return Err(LakeError::InvalidGeometry("polygon has no nodes".to_string()));
        }
        if let Some(bad) = self
            .edges
            .iter()
            .find(|e| e[0] >= self.nodes.len() || e[1] >= self.nodes.len())
        {
            return Err(LakeError::InvalidGeometry(format!(
                "edge {:?} references a node outside 0..{}",
                bad,
                self.nodes.len()
            )));
        }
        if self.nodes.iter().any(|p| !p[0].is_finite() || !p[1].is_finite()) {
            return Err(LakeError::InvalidGeometry("polygon has non-finite nodes".to_string()));
        }
        Ok(())
    }
}

/// Per-point classification result, in input order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolygonTest {
    pub inside: Vec<bool>,
    pub boundary: Vec<bool>,
}

/// Default relative tolerance, `eps^0.85`
pub fn default_tolerance() -> f64 {
    f64::EPSILON.powf(0.85)
}

/// Classify `points` against `polygon`.
///
/// `tolerance` is relative to the polygon's half bounding-box perimeter and
/// defaults to [`default_tolerance`].
pub fn inpoly(points: &[[f64; 2]], polygon: &Polygon, tolerance: Option<f64>) -> LakeResult<PolygonTest> {
    polygon.validate()?;
    let ftol = tolerance.unwrap_or_else(default_tolerance);
    if !ftol.is_finite() || ftol < 0.0 {
        return Err(LakeError::InvalidGeometry(format!("invalid tolerance {}", ftol)));
    }

    let n = points.len();
    let mut result = PolygonTest {
        inside: vec![false; n],
        boundary: vec![false; n],
    };

    let (nmin, nmax) = match polygon.bounds() {
        Some(b) => b,
        None => return Ok(result),
    };
    let lbar = ((nmax[0] - nmin[0]) + (nmax[1] - nmin[1])) / 2.0;
    let veps = ftol * lbar;

    let candidates: Vec<usize> = (0..n)
        .filter(|&i| {
            let [x, y] = points[i];
            x >= nmin[0] - veps && x <= nmax[0] + veps && y >= nmin[1] - veps && y <= nmax[1] + veps
        })
        .collect();
    if candidates.is_empty() {
        return Ok(result);
    }

    // scan along the longer extent of the surviving points
    let mut vmin = [f64::INFINITY; 2];
    let mut vmax = [f64::NEG_INFINITY; 2];
    for &i in &candidates {
        for k in 0..2 {
            vmin[k] = vmin[k].min(points[i][k]);
            vmax[k] = vmax[k].max(points[i][k]);
        }
    }
    let swap = vmax[0] - vmin[0] > vmax[1] - vmin[1];
    let orient = |p: [f64; 2]| if swap { [p[1], p[0]] } else { p };

    let mut sorted: Vec<(usize, [f64; 2])> = candidates.iter().map(|&i| (i, orient(points[i]))).collect();
    sorted.sort_by(|a, b| a.1[1].total_cmp(&b.1[1]));

    let verts: Vec<[f64; 2]> = sorted.iter().map(|s| s.1).collect();
    let nodes: Vec<[f64; 2]> = polygon.nodes.iter().map(|&p| orient(p)).collect();

    let (stat, bnds) = crossing_scan(&verts, &nodes, &polygon.edges, ftol, lbar);

    for (k, (orig, _)) in sorted.iter().enumerate() {
        result.inside[*orig] = stat[k];
        result.boundary[*orig] = bnds[k];
    }
    Ok(result)
}

/// Core crossing-number pass over points sorted by their second coordinate
fn crossing_scan(
    verts: &[[f64; 2]],
    nodes: &[[f64; 2]],
    edges: &[[usize; 2]],
    ftol: f64,
    lbar: f64,
) -> (Vec<bool>, Vec<bool>) {
    let nvrt = verts.len();
    let mut stat = vec![false; nvrt];
    let mut bnds = vec![false; nvrt];

    let feps = ftol * lbar;
    let veps = ftol * lbar;

    for &[a, b] in edges {
        let (inod, jnod) = if nodes[b][1] < nodes[a][1] { (b, a) } else { (a, b) };
        let [x1, y1] = nodes[inod];
        let [x2, y2] = nodes[jnod];

        let xmin = x1.min(x2) - veps;
        let xmax = x1.max(x2) + veps;
        let ymin = y1 - veps;
        let ymax = y2 + veps;

        let ydel = y2 - y1;
        let xdel = x2 - x1;
        let edel = xdel.abs() + ydel;

        let start = verts.partition_point(|v| v[1] < ymin);

        for j in start..nvrt {
            if bnds[j] {
                continue;
            }
            let [x, y] = verts[j];
            if y > ymax {
                break;
            }

            if x < xmin {
                if y1 <= y && y < y2 {
                    stat[j] = !stat[j];
                }
                continue;
            }
            if x > xmax {
                continue;
            }

            let mul1 = ydel * (x - x1);
            let mul2 = xdel * (y - y1);

            if (mul2 - mul1).abs() <= feps * edel
                || (y == y1 && x == x1)
                || (y == y2 && x == x2)
            {
                bnds[j] = true;
                stat[j] = true;
            } else if mul1 < mul2 && y1 <= y && y < y2 {
                stat[j] = !stat[j];
            }
        }
    }

    (stat, bnds)
}
