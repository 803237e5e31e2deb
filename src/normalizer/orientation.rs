use super::quad::Corners;
use super::threshold::is_ink_at;
use crate::consts::*;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Clockwise rotation the sheet had in the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Orientation {
    #[default]
    Upright,
    Clockwise90,
    Rotated180,
    Clockwise270,
}

impl Orientation {
    pub fn from_quarter_turns(turns: usize) -> Self {
        match turns % 4 {
            0 => Orientation::Upright,
            1 => Orientation::Clockwise90,
            2 => Orientation::Rotated180,
            _ => Orientation::Clockwise270,
        }
    }

    pub fn quarter_turns(self) -> usize {
        match self {
            Orientation::Upright => 0,
            Orientation::Clockwise90 => 1,
            Orientation::Rotated180 => 2,
            Orientation::Clockwise270 => 3,
        }
    }

    pub fn degrees(self) -> u16 {
        self.quarter_turns() as u16 * 90
    }
}

impl From<Orientation> for u16 {
    fn from(o: Orientation) -> Self {
        o.degrees()
    }
}

impl TryFrom<u16> for Orientation {
    type Error = String;

    fn try_from(deg: u16) -> Result<Self, Self::Error> {
        match deg {
            0 | 90 | 180 | 270 => Ok(Orientation::from_quarter_turns(deg as usize / 90)),
            other => Err(format!("orientation must be 0, 90, 180 or 270, got {}", other)),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Corner list re-indexed so the fiducial corner comes first.
pub(crate) fn rotate_corners(corners: Corners, turns: usize) -> Corners {
    let mut out = corners;
    out.rotate_left(turns % 4);
    out
}

/// Which image corner of the quad carries the solid fiducial, if any.
pub(crate) fn marker_corner(mask: &GrayImage, corners: &Corners) -> Option<usize> {
    corner_with_marker(mask, corners, MARKER_WINDOW_START, MARKER_WINDOW_END)
}

/// Same decision for an axis-aligned ink bounding box, where the fiducial
/// sits flush with the box corner.
pub(crate) fn marker_corner_in_box(mask: &GrayImage, bbox: (u32, u32, u32, u32)) -> Option<usize> {
    let (x0, y0, x1, y1) = bbox;
    let corners = [
        (x0 as f32, y0 as f32),
        (x1 as f32, y0 as f32),
        (x1 as f32, y1 as f32),
        (x0 as f32, y1 as f32),
    ];
    corner_with_marker(mask, &corners, 0.005, 0.035)
}

fn corner_with_marker(mask: &GrayImage, corners: &Corners, start: f32, end: f32) -> Option<usize> {
    let mut ink = [0.0f32; 4];
    for (turns, slot) in ink.iter_mut().enumerate() {
        *slot = corner_ink(mask, &rotate_corners(*corners, turns), start, end);
    }
    pick_marker(ink)
}

/// Ink fraction of the window `[start, end]^2` (sheet-relative) next to `q[0]`.
fn corner_ink(mask: &GrayImage, q: &Corners, start: f32, end: f32) -> f32 {
    const STEPS: usize = 9;
    let mut hits = 0usize;
    for i in 0..STEPS {
        let v = start + (end - start) * i as f32 / (STEPS - 1) as f32;
        for j in 0..STEPS {
            let u = start + (end - start) * j as f32 / (STEPS - 1) as f32;
            let (x, y) = bilinear(q, u, v);
            if is_ink_at(mask, x, y) {
                hits += 1;
            }
        }
    }
    hits as f32 / (STEPS * STEPS) as f32
}

fn bilinear(q: &Corners, u: f32, v: f32) -> (f32, f32) {
    let w = [(1.0 - u) * (1.0 - v), u * (1.0 - v), u * v, (1.0 - u) * v];
    let x = w[0] * q[0].0 + w[1] * q[1].0 + w[2] * q[2].0 + w[3] * q[3].0;
    let y = w[0] * q[0].1 + w[1] * q[1].1 + w[2] * q[2].1 + w[3] * q[3].1;
    (x, y)
}

fn pick_marker(ink: [f32; 4]) -> Option<usize> {
    let mut order = [0usize, 1, 2, 3];
    order.sort_by(|&a, &b| ink[b].total_cmp(&ink[a]));
    let (best, second) = (ink[order[0]], ink[order[1]]);
    (best > MARKER_MIN_INK && best > MARKER_DOMINANCE * second + MARKER_DOMINANCE_SLACK)
        .then_some(order[0])
}
