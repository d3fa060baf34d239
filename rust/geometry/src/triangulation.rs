// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Polygon triangulation utilities
//!
//! Ear clipping (earcutr) for planar faces, plus the 2D predicates the face
//! tessellator shares.

use crate::{Error, Point2, Point3, Result, Vector3};

/// Ear-clip a planar region given as rings in the same plane, outer ring
/// first. Indices run over the rings' points in order, holes after the outer.
pub fn earcut_rings(rings: &[Vec<Point2<f64>>]) -> Result<Vec<usize>> {
    let Some((outer, holes)) = rings.split_first() else {
        return Err(Error::TriangulationError("region has no boundary".to_string()));
    };
    if let Some(short) = rings.iter().find(|ring| ring.len() < 3) {
        return Err(Error::TriangulationError(format!(
            "ring of {} points bounds no area",
            short.len()
        )));
    }

    let mut hole_starts = Vec::with_capacity(holes.len());
    let mut start = outer.len();
    for hole in holes {
        hole_starts.push(start);
        start += hole.len();
    }
    let coords: Vec<f64> = rings.iter().flatten().flat_map(|p| [p.x, p.y]).collect();

    earcutr::earcut(&coords, &hole_starts, 2)
        .map_err(|e| Error::TriangulationError(format!("{:?}", e)))
}

/// Newell normal of a closed 3D polygon; its length is twice the area
pub fn newell_normal(points: &[Point3<f64>]) -> Vector3<f64> {
    let n = points.len();
    let mut normal = Vector3::<f64>::zeros();

    for i in 0..n {
        let current = &points[i];
        let next = &points[(i + 1) % n];

        normal.x += (current.y - next.y) * (current.z + next.z);
        normal.y += (current.z - next.z) * (current.x + next.x);
        normal.z += (current.x - next.x) * (current.y + next.y);
    }

    normal
}

/// Signed area of a closed 2D ring, positive when counter-clockwise
pub fn signed_area(points: &[Point2<f64>]) -> f64 {
    let n = points.len();
    let mut area = 0.0;
    for i in 0..n {
        let a = &points[i];
        let b = &points[(i + 1) % n];
        area += a.x * b.y - b.x * a.y;
    }
    area * 0.5
}

/// Even-odd containment of `p` in a set of closed rings
pub fn contains_point(rings: &[Vec<Point2<f64>>], p: &Point2<f64>) -> bool {
    let mut inside = false;
    for ring in rings {
        let n = ring.len();
        for i in 0..n {
            let a = &ring[i];
            let b = &ring[(i + 1) % n];
            if (a.y > p.y) != (b.y > p.y) {
                let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
                if p.x < x {
                    inside = !inside;
                }
            }
        }
    }
    inside
}

/// Distance from `p` to the closest edge of any ring
pub fn distance_to_rings(rings: &[Vec<Point2<f64>>], p: &Point2<f64>) -> f64 {
    let mut best = f64::INFINITY;
    for ring in rings {
        let n = ring.len();
        for i in 0..n {
            let a = &ring[i];
            let b = &ring[(i + 1) % n];
            let ab = b - a;
            let len2 = ab.norm_squared();
            let t = if len2 > 0.0 {
                ((p - a).dot(&ab) / len2).clamp(0.0, 1.0)
            } else {
                0.0
            };
            best = best.min((p - (a + ab * t)).norm());
        }
    }
    best
}
