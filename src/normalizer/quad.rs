use crate::consts::{FRAME_TOUCH_PX, QUAD_EPSILONS};
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};

pub(crate) type Corners = [(f32, f32); 4];

/// Largest convex quadrilateral outline in `mask` that does not touch the
/// image edge, corners ordered TL, TR, BR, BL as seen in the image.
pub(crate) fn find_sheet_quad(mask: &GrayImage, min_area_fraction: f32) -> Option<Corners> {
    let (w, h) = mask.dimensions();
    let min_area = min_area_fraction * w as f32 * h as f32;

    let mut best: Option<(f32, Corners)> = None;
    for contour in find_contours::<u32>(mask) {
        if contour.border_type != BorderType::Outer || contour.points.len() < 8 {
            continue;
        }
        let pts: Vec<(f32, f32)> = contour
            .points
            .iter()
            .map(|p| (p.x as f32, p.y as f32))
            .collect();
        if touches_frame(&pts, w, h) {
            continue;
        }
        let area = polygon_area(&pts);
        if area < min_area || best.as_ref().is_some_and(|(a, _)| *a >= area) {
            continue;
        }
        if let Some(quad) = approximate_quad(&pts) {
            best = Some((area, quad));
        }
    }
    best.map(|(_, quad)| quad)
}

fn touches_frame(pts: &[(f32, f32)], w: u32, h: u32) -> bool {
    let m = FRAME_TOUCH_PX as f32;
    let (right, bottom) = (w as f32 - 1.0 - m, h as f32 - 1.0 - m);
    pts.iter()
        .any(|&(x, y)| x <= m || y <= m || x >= right || y >= bottom)
}

/// Shoelace area of a closed polygon.
pub(crate) fn polygon_area(pts: &[(f32, f32)]) -> f32 {
    if pts.len() < 3 {
        return 0.0;
    }
    let n = pts.len();
    let mut acc = 0.0f64;
    for i in 0..n {
        let (x1, y1) = pts[i];
        let (x2, y2) = pts[(i + 1) % n];
        acc += x1 as f64 * y2 as f64 - x2 as f64 * y1 as f64;
    }
    (acc.abs() / 2.0) as f32
}

fn perimeter(pts: &[(f32, f32)]) -> f32 {
    let n = pts.len();
    (0..n)
        .map(|i| {
            let (x1, y1) = pts[i];
            let (x2, y2) = pts[(i + 1) % n];
            ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt()
        })
        .sum()
}

/// Reduces a closed outline to four vertices, trying looser tolerances in turn.
fn approximate_quad(pts: &[(f32, f32)]) -> Option<Corners> {
    // Split the closed curve at two opposite extremes so each half is an open chain.
    let key = |p: &(f32, f32)| p.0 + p.1;
    let a = (0..pts.len()).min_by(|&i, &j| key(&pts[i]).total_cmp(&key(&pts[j])))?;
    let b = (0..pts.len()).max_by(|&i, &j| key(&pts[i]).total_cmp(&key(&pts[j])))?;
    if a == b {
        return None;
    }
    let n = pts.len();
    let chain = |from: usize, to: usize| -> Vec<(f32, f32)> {
        let len = (to + n - from) % n + 1;
        (0..len).map(|k| pts[(from + k) % n]).collect()
    };
    let first = chain(a, b);
    let second = chain(b, a);

    let perim = perimeter(pts);
    for eps in QUAD_EPSILONS {
        let tol = eps as f32 * perim;
        let mut verts = douglas_peucker(&first, tol);
        verts.pop();
        let mut rest = douglas_peucker(&second, tol);
        rest.pop();
        verts.extend(rest);
        if verts.len() == 4 {
            let quad = order_corners([verts[0], verts[1], verts[2], verts[3]]);
            if is_convex(&quad) {
                return Some(quad);
            }
        }
    }
    None
}

/// Iterative Douglas-Peucker over an open chain; keeps both endpoints.
fn douglas_peucker(points: &[(f32, f32)], epsilon: f32) -> Vec<(f32, f32)> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut stack = vec![(0usize, points.len() - 1)];
    while let Some((start, end)) = stack.pop() {
        if end - start <= 1 {
            continue;
        }
        let mut max_dist = 0.0;
        let mut max_index = start;
        for i in (start + 1)..end {
            let d = point_line_distance(points[i], points[start], points[end]);
            if d > max_dist {
                max_dist = d;
                max_index = i;
            }
        }
        if max_dist > epsilon {
            keep[max_index] = true;
            stack.push((start, max_index));
            stack.push((max_index, end));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

fn point_line_distance(p: (f32, f32), a: (f32, f32), b: (f32, f32)) -> f32 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return ((p.0 - a.0).powi(2) + (p.1 - a.1).powi(2)).sqrt();
    }
    ((p.0 - a.0) * dy - (p.1 - a.1) * dx).abs() / len
}

/// Clockwise (in image coordinates) starting from the corner nearest the origin.
pub(crate) fn order_corners(pts: Corners) -> Corners {
    let cx = pts.iter().map(|p| p.0).sum::<f32>() / 4.0;
    let cy = pts.iter().map(|p| p.1).sum::<f32>() / 4.0;
    let mut sorted = pts;
    sorted.sort_by(|a, b| {
        let ta = (a.1 - cy).atan2(a.0 - cx);
        let tb = (b.1 - cy).atan2(b.0 - cx);
        ta.total_cmp(&tb)
    });
    let start = (0..4)
        .min_by(|&i, &j| (sorted[i].0 + sorted[i].1).total_cmp(&(sorted[j].0 + sorted[j].1)))
        .unwrap_or(0);
    sorted.rotate_left(start);
    sorted
}

fn is_convex(q: &Corners) -> bool {
    let mut sign = 0.0f32;
    for i in 0..4 {
        let (a, b, c) = (q[i], q[(i + 1) % 4], q[(i + 2) % 4]);
        let cross = (b.0 - a.0) * (c.1 - b.1) - (b.1 - a.1) * (c.0 - b.0);
        if cross == 0.0 {
            return false;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// Longer horizontal than vertical extent.
pub(crate) fn is_landscape(q: &Corners) -> bool {
    let dist = |a: (f32, f32), b: (f32, f32)| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt();
    let width = (dist(q[0], q[1]) + dist(q[3], q[2])) / 2.0;
    let height = (dist(q[0], q[3]) + dist(q[1], q[2])) / 2.0;
    width > height
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_hollow_rect_mut;
    use imageproc::rect::Rect;

    #[test]
    fn test_shoelace_area_rectangle() {
        let rect = [(0.0, 0.0), (10.0, 0.0), (10.0, 5.0), (0.0, 5.0)];
        assert!((polygon_area(&rect) - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_order_corners_from_scrambled_input() {
        let q = order_corners([(90.0, 110.0), (10.0, 5.0), (12.0, 100.0), (95.0, 8.0)]);
        assert_eq!(q, [(10.0, 5.0), (95.0, 8.0), (90.0, 110.0), (12.0, 100.0)]);
    }

    #[test]
    fn test_finds_outline_away_from_edges() {
        let mut mask = GrayImage::new(200, 260);
        for inset in 0..3 {
            let r = Rect::at(20 + inset, 30 + inset).of_size(160 - 2 * inset as u32, 200 - 2 * inset as u32);
            draw_hollow_rect_mut(&mut mask, r, Luma([255u8]));
        }
        let quad = find_sheet_quad(&mask, 0.2).expect("outline should be found");
        let expected = [(20.0, 30.0), (179.0, 30.0), (179.0, 229.0), (20.0, 229.0)];
        for (got, want) in quad.iter().zip(expected) {
            assert!((got.0 - want.0).abs() <= 1.0 && (got.1 - want.1).abs() <= 1.0, "{:?} vs {:?}", got, want);
        }
        assert!(!is_landscape(&quad));
    }

    #[test]
    fn test_small_outline_is_ignored() {
        let mut mask = GrayImage::new(200, 200);
        draw_hollow_rect_mut(&mut mask, Rect::at(50, 50).of_size(30, 30), Luma([255u8]));
        assert!(find_sheet_quad(&mask, 0.2).is_none());
    }
}
