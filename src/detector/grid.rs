use super::candidates::Candidate;
use crate::consts::{
    LATTICE_AMBIGUITY, LATTICE_FIT_TOLERANCE, MAX_LATTICE_PLACEMENTS, MAX_RESIDUAL_SLOPE,
};
use crate::error::{GridAxis, OmrError, OmrResult};
use tracing::debug;

/// Expected lines along one axis: `blocks` groups of `per_block` evenly spaced
/// lines, the groups themselves evenly spaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AxisLayout {
    pub blocks: usize,
    pub per_block: usize,
}

impl AxisLayout {
    pub fn uniform(lines: usize) -> Self {
        Self {
            blocks: 1,
            per_block: lines,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks * self.per_block
    }

    /// (block, step within the block) of line `index`.
    fn coords(&self, index: usize) -> (f64, f64) {
        let per = self.per_block.max(1);
        ((index / per) as f64, (index % per) as f64)
    }
}

/// Image region bubble centres may occupy, as inclusive `(min, max)` per axis.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bounds {
    pub x: (f64, f64),
    pub y: (f64, f64),
}

#[cfg(test)]
impl Bounds {
    pub fn unlimited() -> Self {
        Self {
            x: (f64::NEG_INFINITY, f64::INFINITY),
            y: (f64::NEG_INFINITY, f64::INFINITY),
        }
    }
}

#[derive(Debug, Clone)]
struct Cluster {
    center: f64,
    members: Vec<usize>,
}

/// Row and column lines of the bubble lattice, expressed in coordinates with
/// the residual slope removed.
#[derive(Debug, Clone)]
pub(crate) struct Lattice {
    pub rows: Vec<f64>,
    pub cols: Vec<f64>,
    pub slope: f64,
    pub center: (f64, f64),
    pub bubble_w: f64,
    pub bubble_h: f64,
    pub rows_detected: usize,
    pub cols_detected: usize,
}

impl Lattice {
    /// Slope-corrected coordinates of an image point.
    pub fn straighten(&self, x: f64, y: f64) -> (f64, f64) {
        let (cx, cy) = self.center;
        (x + self.slope * (y - cy), y - self.slope * (x - cx))
    }

    /// Image position of lattice crossing (`row`, `col`).
    pub fn position(&self, row: usize, col: usize) -> (f64, f64) {
        let (xs, ys) = (self.cols[col], self.rows[row]);
        let (cx, cy) = self.center;
        let s = self.slope;
        let x = (xs - s * (ys - cy) + s * s * cx) / (1.0 + s * s);
        let y = ys + s * (x - cx);
        (x, y)
    }

    /// Arena indexed `row * cols + col` holding the candidate claimed by each
    /// crossing. Collisions keep the larger outline.
    pub fn assign(&self, candidates: &[Candidate]) -> Vec<Option<usize>> {
        let ncols = self.cols.len();
        let mut arena: Vec<Option<usize>> = vec![None; self.rows.len() * ncols];
        let fallback = 1.5 * self.bubble_w.max(self.bubble_h);
        for (idx, c) in candidates.iter().enumerate() {
            let (xs, ys) = self.straighten(c.cx, c.cy);
            let Some(r) = nearest_line(&self.rows, ys, fallback) else {
                continue;
            };
            let Some(col) = nearest_line(&self.cols, xs, fallback) else {
                continue;
            };
            let slot = &mut arena[r * ncols + col];
            match slot {
                Some(prev) if candidates[*prev].area >= c.area => {}
                _ => *slot = Some(idx),
            }
        }
        arena
    }
}

/// Index of the closest line, if `v` lies within half the gap to its neighbours.
fn nearest_line(lines: &[f64], v: f64, fallback_radius: f64) -> Option<usize> {
    let (idx, dist) = lines
        .iter()
        .enumerate()
        .map(|(i, &l)| (i, (l - v).abs()))
        .min_by(|a, b| a.1.total_cmp(&b.1))?;
    let prev_gap = idx.checked_sub(1).map(|p| lines[idx] - lines[p]);
    let next_gap = lines.get(idx + 1).map(|n| n - lines[idx]);
    let radius = match (prev_gap, next_gap) {
        (Some(a), Some(b)) => a.min(b) / 2.0,
        (Some(g), None) | (None, Some(g)) => g / 2.0,
        (None, None) => fallback_radius,
    };
    (dist <= radius).then_some(idx)
}

pub(crate) fn fit_lattice(
    candidates: &[Candidate],
    rows: AxisLayout,
    cols: AxisLayout,
    tolerance: usize,
    bounds: Bounds,
) -> OmrResult<Lattice> {
    if candidates.is_empty() {
        return Err(OmrError::GridMismatch {
            axis: GridAxis::Rows,
            expected: rows.len(),
            detected: 0,
        });
    }
    let bubble_w = median(candidates.iter().map(|c| c.width).collect());
    let bubble_h = median(candidates.iter().map(|c| c.height).collect());
    let n = candidates.len() as f64;
    let center = (
        candidates.iter().map(|c| c.cx).sum::<f64>() / n,
        candidates.iter().map(|c| c.cy).sum::<f64>() / n,
    );
    let row_gap = (0.5 * bubble_h).max(3.0);
    let col_gap = (0.5 * bubble_w).max(3.0);

    // 1. Residual slope from a first pass of raw rows
    let raw_rows = cluster(candidates.iter().map(|c| c.cy).collect(), row_gap);
    let slope = residual_slope(candidates, &raw_rows);

    // 2. Cluster again with the slope removed
    let mut lattice = Lattice {
        rows: Vec::new(),
        cols: Vec::new(),
        slope,
        center,
        bubble_w,
        bubble_h,
        rows_detected: 0,
        cols_detected: 0,
    };
    let straight: Vec<(f64, f64)> = candidates
        .iter()
        .map(|c| lattice.straighten(c.cx, c.cy))
        .collect();
    let row_clusters = prune_sparse(cluster(straight.iter().map(|p| p.1).collect(), row_gap));
    let col_clusters = prune_sparse(cluster(straight.iter().map(|p| p.0).collect(), col_gap));
    lattice.rows_detected = row_clusters.len();
    lattice.cols_detected = col_clusters.len();

    // 3. Reconcile with the expected layout; whole bubbles must fit inside the bounds
    let row_room = (bounds.y.0 + bubble_h / 2.0, bounds.y.1 - bubble_h / 2.0);
    let col_room = (bounds.x.0 + bubble_w / 2.0, bounds.x.1 - bubble_w / 2.0);
    lattice.rows = reconcile(row_clusters, rows, tolerance, GridAxis::Rows, row_room)?;
    lattice.cols = reconcile(col_clusters, cols, tolerance, GridAxis::Columns, col_room)?;
    Ok(lattice)
}

/// 1-D gap clustering of `values`; a new cluster starts after a gap wider than `gap`.
fn cluster(values: Vec<f64>, gap: f64) -> Vec<Cluster> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut out: Vec<Cluster> = Vec::new();
    let mut last = f64::NEG_INFINITY;
    for idx in order {
        let v = values[idx];
        match out.last_mut() {
            Some(c) if v - last <= gap => c.members.push(idx),
            _ => out.push(Cluster {
                center: 0.0,
                members: vec![idx],
            }),
        }
        last = v;
    }
    for c in &mut out {
        c.center = c.members.iter().map(|&i| values[i]).sum::<f64>() / c.members.len() as f64;
    }
    out
}

/// Drops clusters far smaller than a typical line (stray marks, speckle).
fn prune_sparse(clusters: Vec<Cluster>) -> Vec<Cluster> {
    let typical = median(clusters.iter().map(|c| c.members.len() as f64).collect());
    clusters
        .into_iter()
        .filter(|c| c.members.len() as f64 * 4.0 >= typical)
        .collect()
}

fn residual_slope(candidates: &[Candidate], rows: &[Cluster]) -> f64 {
    let slopes: Vec<f64> = rows
        .iter()
        .filter(|r| r.members.len() >= 3)
        .filter_map(|r| {
            let k = r.members.len() as f64;
            let mx = r.members.iter().map(|&i| candidates[i].cx).sum::<f64>() / k;
            let my = r.members.iter().map(|&i| candidates[i].cy).sum::<f64>() / k;
            let (mut sxy, mut sxx) = (0.0, 0.0);
            for &i in &r.members {
                let dx = candidates[i].cx - mx;
                sxy += dx * (candidates[i].cy - my);
                sxx += dx * dx;
            }
            (sxx > 0.0).then(|| sxy / sxx)
        })
        .collect();
    if slopes.is_empty() {
        return 0.0;
    }
    median(slopes).clamp(-MAX_RESIDUAL_SLOPE, MAX_RESIDUAL_SLOPE)
}

fn reconcile(
    mut clusters: Vec<Cluster>,
    layout: AxisLayout,
    tolerance: usize,
    axis: GridAxis,
    room: (f64, f64),
) -> OmrResult<Vec<f64>> {
    let expected = layout.len();
    let detected = clusters.len();
    let mismatch = || OmrError::GridMismatch {
        axis,
        expected,
        detected,
    };
    if detected.abs_diff(expected) > tolerance || detected == 0 {
        return Err(mismatch());
    }

    // Surplus lines: drop the least populated.
    while clusters.len() > expected {
        let weakest = (0..clusters.len())
            .min_by_key(|&i| clusters[i].members.len())
            .unwrap_or(0);
        clusters.remove(weakest);
    }
    let centers: Vec<f64> = clusters.iter().map(|c| c.center).collect();
    if centers.len() == expected {
        return Ok(centers);
    }

    let lines = place_missing(&centers, layout, room).ok_or_else(mismatch)?;
    debug!(
        %axis,
        expected,
        detected,
        "Missing lattice lines estimated from the layout"
    );
    Ok(lines)
}

/// Puts the detected `centers` on the expected lines and estimates the rest
/// from a fitted pitch. Every way of leaving lines out is tried; the result is
/// `None` unless exactly one placement fits and keeps its estimated lines in
/// `room`.
fn place_missing(centers: &[f64], layout: AxisLayout, room: (f64, f64)) -> Option<Vec<f64>> {
    let expected = layout.len();
    let missing = expected.checked_sub(centers.len())?;
    if binomial(expected, missing) > MAX_LATTICE_PLACEMENTS {
        return None;
    }

    let mut fits: Vec<(f64, Vec<f64>)> = Vec::new();
    for gaps in combinations(expected, missing) {
        let indices: Vec<usize> = (0..expected).filter(|i| !gaps.contains(i)).collect();
        let Some(model) = AxisModel::fit(layout, &indices, centers) else {
            continue;
        };
        let worst = indices
            .iter()
            .zip(centers)
            .map(|(&i, &c)| (model.at(layout, i) - c).abs())
            .fold(0.0, f64::max)
            / model.unit(layout);
        if worst > LATTICE_FIT_TOLERANCE {
            continue;
        }
        if gaps
            .iter()
            .map(|&i| model.at(layout, i))
            .any(|v| v < room.0 || v > room.1)
        {
            continue;
        }
        let mut found = centers.iter().copied();
        let mut lines = Vec::with_capacity(expected);
        for i in 0..expected {
            if gaps.contains(&i) {
                lines.push(model.at(layout, i));
            } else {
                lines.push(found.next()?);
            }
        }
        fits.push((worst, lines));
    }

    fits.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut ranked = fits.into_iter();
    let (best, lines) = ranked.next()?;
    match ranked.next() {
        Some((runner_up, _)) if runner_up - best <= LATTICE_AMBIGUITY => None,
        _ => Some(lines),
    }
}

/// Line positions along one axis modelled as
/// `origin + step * pitch + block * block_pitch`.
#[derive(Debug, Clone, Copy)]
struct AxisModel {
    origin: f64,
    pitch: f64,
    block_pitch: f64,
}

impl AxisModel {
    /// Least-squares fit of the lines at `indices` to `centers`. `None` when
    /// the points cannot pin the model down or the fit is not a lattice.
    fn fit(layout: AxisLayout, indices: &[usize], centers: &[f64]) -> Option<Self> {
        let use_step = layout.per_block > 1;
        let use_block = layout.blocks > 1;
        let dims = 1 + usize::from(use_step) + usize::from(use_block);

        let mut a = [[0.0f64; 3]; 3];
        let mut y = [0.0f64; 3];
        for (&i, &c) in indices.iter().zip(centers) {
            let (block, step) = layout.coords(i);
            let mut row = [1.0, 0.0, 0.0];
            let mut k = 1;
            if use_step {
                row[k] = step;
                k += 1;
            }
            if use_block {
                row[k] = block;
            }
            for r in 0..dims {
                for col in 0..dims {
                    a[r][col] += row[r] * row[col];
                }
                y[r] += row[r] * c;
            }
        }
        let x = solve(a, y, dims)?;

        let pitch = if use_step { x[1] } else { 0.0 };
        let block_pitch = if use_block { x[dims - 1] } else { 0.0 };
        let model = Self {
            origin: x[0],
            pitch,
            block_pitch,
        };
        let ordered = (!use_step || pitch > 0.0)
            && (!use_block || block_pitch > (layout.per_block as f64 - 0.5) * pitch.max(0.0));
        (ordered && model.unit(layout) > 0.0).then_some(model)
    }

    fn at(&self, layout: AxisLayout, index: usize) -> f64 {
        let (block, step) = layout.coords(index);
        self.origin + step * self.pitch + block * self.block_pitch
    }

    /// Smallest spacing between neighbouring lines.
    fn unit(&self, layout: AxisLayout) -> f64 {
        if layout.per_block > 1 {
            self.pitch
        } else {
            self.block_pitch
        }
    }
}

/// Gaussian elimination with partial pivoting on the leading `n` x `n` block.
fn solve(mut a: [[f64; 3]; 3], mut y: [f64; 3], n: usize) -> Option<[f64; 3]> {
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-9 {
            return None;
        }
        a.swap(col, pivot);
        y.swap(col, pivot);
        for row in col + 1..n {
            let f = a[row][col] / a[col][col];
            for c in col..n {
                let v = f * a[col][c];
                a[row][c] -= v;
            }
            let v = f * y[col];
            y[row] -= v;
        }
    }
    let mut x = [0.0f64; 3];
    for row in (0..n).rev() {
        let known: f64 = (row + 1..n).map(|c| a[row][c] * x[c]).sum();
        x[row] = (y[row] - known) / a[row][row];
    }
    Some(x)
}

/// All `k`-element subsets of `0..n`, in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k > n {
        return out;
    }
    let mut pick: Vec<usize> = (0..k).collect();
    loop {
        out.push(pick.clone());
        let Some(i) = (0..k).rev().find(|&i| pick[i] < n - k + i) else {
            break;
        };
        pick[i] += 1;
        for j in i + 1..k {
            pick[j] = pick[j - 1] + 1;
        }
    }
    out
}

fn binomial(n: usize, k: usize) -> usize {
    let k = k.min(n.saturating_sub(k));
    (0..k).fold(1usize, |acc, i| acc.saturating_mul(n - i) / (i + 1))
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
