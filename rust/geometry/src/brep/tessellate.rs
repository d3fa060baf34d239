// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Preview tessellation of BRep faces
//!
//! Every edge is sampled once into a shared point table, so neighbouring
//! faces meet on identical vertices. Planar faces are ear clipped with their
//! holes. Curved faces are triangulated in a length-scaled parameter domain
//! with a constrained Delaunay triangulation, interior Steiner points and an
//! even-odd flood fill to keep the faces inside the boundary.

use std::collections::VecDeque;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, TAU};

use nalgebra::{Point2, Point3};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use spade::handles::{FixedFaceHandle, InnerTag};
use spade::{ConstrainedDelaunayTriangulation, Point2 as SpadePoint2, Triangulation};
use tracing::{debug, warn};

use super::geom::{arc_segments, wrap_angle, Frame, Surface};
use super::model::{BrepModel, Face, Loop};
use crate::error::{Error, Result};
use crate::mesh::Mesh;
use crate::triangulation::{contains_point, distance_to_rings, earcut_rings, signed_area};

/// Upper bound on interior points of one curved face
const MAX_STEINER_POINTS: f64 = 20_000.0;

/// Vertex of a face triangle: a shared boundary point or a face-local one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Ref {
    Global(u32),
    Local(u32),
}

#[derive(Debug, Default)]
struct FacePatch {
    points: Vec<Point3<f64>>,
    triangles: Vec<[Ref; 3]>,
}

impl FacePatch {
    fn add_point(&mut self, p: Point3<f64>) -> Ref {
        self.points.push(p);
        Ref::Local(self.points.len() as u32 - 1)
    }

    fn resolve(&self, global: &[Point3<f64>], r: Ref) -> Point3<f64> {
        match r {
            Ref::Global(i) => global[i as usize],
            Ref::Local(i) => self.points[i as usize],
        }
    }

    /// Add a triangle wound counter-clockwise around the outward normal;
    /// triangles that collapse onto a repeated vertex are dropped
    fn push_oriented(&mut self, global: &[Point3<f64>], face: &Face, tri: [Ref; 3]) {
        if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
            return;
        }
        let [a, b, c] = tri.map(|r| self.resolve(global, r));
        let centroid = Point3::from((a.coords + b.coords + c.coords) / 3.0);
        let normal = (b - a).cross(&(c - a));
        if normal.dot(&face.normal_at(&centroid)) < 0.0 {
            self.triangles.push([tri[0], tri[2], tri[1]]);
        } else {
            self.triangles.push(tri);
        }
    }
}

/// Triangulate every face of a model for preview; positions are returned in
/// millimetres and `deflection_mm` bounds the chord error
pub fn tessellate(model: &BrepModel, deflection_mm: f64) -> Result<Mesh> {
    if !(deflection_mm > 0.0 && deflection_mm.is_finite()) {
        return Err(Error::TriangulationError(format!(
            "linear deflection must be positive, got {}",
            deflection_mm
        )));
    }
    let deflection = deflection_mm / model.unit_scale_mm;

    // Shared samples: model vertices first, then edge interiors
    let mut points = model.vertices.clone();
    let mut edge_samples = Vec::with_capacity(model.edges.len());
    for edge in &model.edges {
        let samples = edge.curve.sample(deflection);
        let mut ids = Vec::with_capacity(samples.len());
        ids.push(edge.start);
        if samples.len() > 2 {
            for p in &samples[1..samples.len() - 1] {
                ids.push(points.len() as u32);
                points.push(*p);
            }
        }
        ids.push(edge.end);
        edge_samples.push(ids);
    }

    let faces: Vec<&Face> = model.faces().collect();
    let patches: Vec<Option<FacePatch>> = faces
        .par_iter()
        .enumerate()
        .map(|(index, face)| {
            match tessellate_face(face, &points, &edge_samples, deflection) {
                Ok(patch) => Some(patch),
                Err(e) => {
                    warn!(
                        face = index,
                        surface = face.surface.kind(),
                        error = %e,
                        "Skipping face that failed to tessellate"
                    );
                    None
                }
            }
        })
        .collect();

    let local_points: usize = patches.iter().flatten().map(|p| p.points.len()).sum();
    let triangles: usize = patches.iter().flatten().map(|p| p.triangles.len()).sum();
    let mut mesh = Mesh::with_capacity(points.len() + local_points, triangles);
    let scale = model.unit_scale_mm;
    for p in &points {
        mesh.add_vertex(Point3::from(p.coords * scale));
    }
    for patch in patches.iter().flatten() {
        let offset = mesh.vertex_count() as u32;
        for p in &patch.points {
            mesh.add_vertex(Point3::from(p.coords * scale));
        }
        for tri in &patch.triangles {
            let [a, b, c] = tri.map(|r| match r {
                Ref::Global(i) => i,
                Ref::Local(i) => offset + i,
            });
            mesh.add_triangle(a, b, c);
        }
    }

    if mesh.triangle_count() == 0 {
        return Err(Error::EmptyMesh("no face could be tessellated".to_string()));
    }
    debug!(
        faces = faces.len(),
        triangles = mesh.triangle_count(),
        vertices = mesh.vertex_count(),
        "Tessellated BRep"
    );
    Ok(mesh)
}

/// Boundary ring of a loop as shared point indices, without the closing repeat
fn loop_ring(face_loop: &Loop, edge_samples: &[Vec<u32>]) -> Vec<u32> {
    let mut ring: Vec<u32> = Vec::new();
    for oe in &face_loop.edges {
        let ids = &edge_samples[oe.edge as usize];
        let n = ids.len();
        if oe.forward {
            ring.extend_from_slice(&ids[..n - 1]);
        } else {
            ring.extend(ids[1..].iter().rev());
        }
    }
    ring.dedup();
    while ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    ring
}

fn tessellate_face(
    face: &Face,
    global: &[Point3<f64>],
    edge_samples: &[Vec<u32>],
    deflection: f64,
) -> Result<FacePatch> {
    let rings: Vec<Vec<u32>> = face
        .loops
        .iter()
        .map(|lp| loop_ring(lp, edge_samples))
        .collect();

    match &face.surface {
        Surface::Plane(frame) => tessellate_plane(face, frame, &rings, global),
        surface => {
            let map = ParamMap::new(surface, &rings, global);
            tessellate_curved(face, &map, &rings, global, deflection)
        }
    }
}

fn tessellate_plane(
    face: &Face,
    frame: &Frame,
    rings: &[Vec<u32>],
    global: &[Point3<f64>],
) -> Result<FacePatch> {
    let projected: Vec<(Vec<Point2<f64>>, &Vec<u32>)> = rings
        .iter()
        .filter(|ring| ring.len() >= 3)
        .map(|ring| {
            let uv = ring
                .iter()
                .map(|&i| {
                    let d = global[i as usize] - frame.origin;
                    Point2::new(d.dot(&frame.x), d.dot(&frame.y))
                })
                .collect();
            (uv, ring)
        })
        .collect();

    let outer = projected
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| signed_area(&a.0).abs().total_cmp(&signed_area(&b.0).abs()))
        .map(|(i, _)| i)
        .ok_or_else(|| Error::TriangulationError("planar face has no boundary".to_string()))?;

    // Outer ring first, as the index layout of `earcut_rings` expects
    let order: Vec<usize> = std::iter::once(outer)
        .chain((0..projected.len()).filter(|&i| i != outer))
        .collect();
    let uv_rings: Vec<Vec<Point2<f64>>> = order.iter().map(|&i| projected[i].0.clone()).collect();
    let indices = earcut_rings(&uv_rings)?;
    let refs: Vec<Ref> = order
        .iter()
        .flat_map(|&i| projected[i].1.iter().map(|&v| Ref::Global(v)))
        .collect();

    let mut patch = FacePatch::default();
    for tri in indices.chunks_exact(3) {
        patch.push_oriented(global, face, [refs[tri[0]], refs[tri[1]], refs[tri[2]]]);
    }
    Ok(patch)
}

/// Length-preserving parametrisation of a curved surface: `u` is the angle
/// about the axis times a radius, `v` a height or arc length
#[derive(Debug, Clone, Copy)]
enum ParamMap {
    Cylinder { frame: Frame, radius: f64 },
    Cone { frame: Frame, radius: f64, tan: f64, scale: f64 },
    Sphere { frame: Frame, radius: f64 },
}

impl ParamMap {
    fn new(surface: &Surface, rings: &[Vec<u32>], global: &[Point3<f64>]) -> Self {
        match *surface {
            Surface::Cone {
                frame,
                radius,
                semi_angle,
            } => {
                // Widest boundary circle sets the angular scale
                let scale = rings
                    .iter()
                    .flatten()
                    .map(|&i| {
                        let l = frame.local(&global[i as usize]);
                        l.x.hypot(l.y)
                    })
                    .fold(radius, f64::max);
                ParamMap::Cone {
                    frame,
                    radius,
                    tan: semi_angle.tan(),
                    scale: if scale > 0.0 { scale } else { 1.0 },
                }
            }
            Surface::Sphere { frame, radius } => ParamMap::Sphere { frame, radius },
            Surface::Cylinder { frame, radius } => ParamMap::Cylinder { frame, radius },
            Surface::Plane(frame) => ParamMap::Cylinder { frame, radius: 1.0 },
        }
    }

    fn frame(&self) -> &Frame {
        match self {
            ParamMap::Cylinder { frame, .. }
            | ParamMap::Cone { frame, .. }
            | ParamMap::Sphere { frame, .. } => frame,
        }
    }

    /// Radius that converts angles about the axis into `u`
    fn u_scale(&self) -> f64 {
        match *self {
            ParamMap::Cylinder { radius, .. } | ParamMap::Sphere { radius, .. } => radius,
            ParamMap::Cone { scale, .. } => scale,
        }
    }

    fn period(&self) -> f64 {
        TAU * self.u_scale()
    }

    /// On the axis, where the angle is undefined
    fn is_singular(&self, p: &Point3<f64>) -> bool {
        let l = self.frame().local(p);
        l.x.hypot(l.y) <= 1e-9 * self.u_scale()
    }

    fn angle(&self, p: &Point3<f64>) -> f64 {
        self.frame().azimuth(p)
    }

    fn height(&self, p: &Point3<f64>) -> f64 {
        let z = self.frame().local(p).z;
        match *self {
            ParamMap::Sphere { radius, .. } => radius * (z / radius).clamp(-1.0, 1.0).asin(),
            _ => z,
        }
    }

    fn point(&self, uv: &Point2<f64>) -> Point3<f64> {
        let theta = uv.x / self.u_scale();
        let (sin, cos) = theta.sin_cos();
        match *self {
            ParamMap::Cylinder { frame, radius } => frame.point(radius * cos, radius * sin, uv.y),
            ParamMap::Cone {
                frame, radius, tan, ..
            } => {
                let rho = (radius + uv.y * tan).max(0.0);
                frame.point(rho * cos, rho * sin, uv.y)
            }
            ParamMap::Sphere { frame, radius } => {
                let phi = uv.y / radius;
                let r = radius * phi.cos();
                frame.point(r * cos, r * sin, radius * phi.sin())
            }
        }
    }

    /// Surface radius of curvature that sets the interior point spacing
    fn curvature_radius(&self) -> f64 {
        self.u_scale()
    }

    /// Height and position of the point a single wrapping loop is capped at
    fn cap(&self, face: &Face, winding: i32) -> Result<(f64, Point3<f64>)> {
        match *self {
            ParamMap::Sphere { frame, radius } => {
                let north = (winding > 0) == face.same_sense;
                let sign = if north { 1.0 } else { -1.0 };
                Ok((sign * radius * FRAC_PI_2, frame.point(0.0, 0.0, sign * radius)))
            }
            ParamMap::Cone {
                frame, radius, tan, ..
            } => {
                let v = -radius / tan;
                Ok((v, frame.point(0.0, 0.0, v)))
            }
            ParamMap::Cylinder { .. } => Err(Error::TriangulationError(
                "cylindrical face bounded by a single circumferential loop".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ParamPoint {
    uv: Point2<f64>,
    r: Ref,
}

/// Boundary loop unwrapped into the parameter domain
#[derive(Debug, Clone)]
struct ParamLoop {
    points: Vec<ParamPoint>,
    /// Turns about the axis
    winding: i32,
}

impl ParamLoop {
    fn area(&self) -> f64 {
        let uv: Vec<Point2<f64>> = self.points.iter().map(|p| p.uv).collect();
        signed_area(&uv)
    }

    fn shifted(&self, du: f64) -> Vec<ParamPoint> {
        self.points
            .iter()
            .map(|p| ParamPoint {
                uv: Point2::new(p.uv.x + du, p.uv.y),
                r: p.r,
            })
            .collect()
    }
}

/// Unwrap the angle along a ring; points on the axis take the angles of
/// their neighbours and become two parameter points
fn unwrap_ring(map: &ParamMap, ring: &[u32], global: &[Point3<f64>]) -> Option<ParamLoop> {
    let n = ring.len();
    let angles: Vec<Option<f64>> = ring
        .iter()
        .map(|&i| {
            let p = &global[i as usize];
            (!map.is_singular(p)).then(|| map.angle(p))
        })
        .collect();
    let start = angles.iter().position(Option::is_some)?;
    let scale = map.u_scale();

    let mut points = Vec::with_capacity(n + 2);
    let mut raw = angles[start]?;
    let mut theta = raw;
    let first = theta;

    for k in 0..n {
        let i = (start + k) % n;
        let p = &global[ring[i] as usize];
        let v = map.height(p);
        let r = Ref::Global(ring[i]);
        match angles[i] {
            Some(angle) => {
                theta += wrap_angle(angle - raw);
                raw = angle;
                points.push(ParamPoint {
                    uv: Point2::new(theta * scale, v),
                    r,
                });
            }
            None => {
                let next = (1..=n)
                    .map(|j| (i + j) % n)
                    .find_map(|j| angles[j])
                    .unwrap_or(raw);
                let jump = wrap_angle(next - raw);
                points.push(ParamPoint {
                    uv: Point2::new(theta * scale, v),
                    r,
                });
                theta += jump;
                raw = next;
                points.push(ParamPoint {
                    uv: Point2::new(theta * scale, v),
                    r,
                });
            }
        }
    }
    theta += wrap_angle(angles[start]? - raw);
    points.dedup_by(|a, b| a.r == b.r && (a.uv - b.uv).norm() <= 1e-12 * scale);

    Some(ParamLoop {
        points,
        winding: ((theta - first) / TAU).round() as i32,
    })
}

/// Evenly spaced points strictly between `a` and `b`
fn interior_samples(a: &Point2<f64>, b: &Point2<f64>, step: f64) -> Vec<Point2<f64>> {
    let count = ((b - a).norm() / step).ceil() as usize;
    (1..count)
        .map(|i| a + (b - a) * (i as f64 / count as f64))
        .collect()
}

fn tessellate_curved(
    face: &Face,
    map: &ParamMap,
    rings: &[Vec<u32>],
    global: &[Point3<f64>],
    deflection: f64,
) -> Result<FacePatch> {
    let rho = map.curvature_radius();
    let step = (2.0 * (2.0 * rho * deflection).sqrt()).min(rho * FRAC_PI_4);
    let period = map.period();

    let loops: Vec<ParamLoop> = rings
        .iter()
        .filter_map(|ring| unwrap_ring(map, ring, global))
        .collect();
    let (wrapping, plain): (Vec<&ParamLoop>, Vec<&ParamLoop>) =
        loops.iter().partition(|lp| lp.winding != 0);
    let plain: Vec<&ParamLoop> = plain
        .into_iter()
        .filter(|lp| lp.points.len() >= 3 && lp.area().abs() > 1e-12 * period * period)
        .collect();

    let mut patch = FacePatch::default();

    let (outer, holes): (Vec<ParamPoint>, Vec<&ParamLoop>) = match (wrapping.as_slice(), plain.len()) {
        ([], 0) => {
            if let ParamMap::Sphere { frame, radius } = *map {
                return Ok(full_sphere(face, &frame, radius, deflection));
            }
            return Err(Error::TriangulationError(format!(
                "{} face has no bounding loop",
                face.surface.kind()
            )));
        }
        ([], _) => {
            let outer = plain
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.area().abs().total_cmp(&b.area().abs()))
                .map(|(i, _)| i)
                .unwrap_or(0);
            let holes = plain
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != outer)
                .map(|(_, lp)| *lp)
                .collect();
            (plain[outer].points.clone(), holes)
        }
        ([single], _) if single.winding.abs() == 1 => {
            let (pole_v, pole) = map.cap(face, single.winding)?;
            let pole_ref = patch.add_point(pole);
            (cap_polygon(map, single, pole_v, pole_ref, step, &mut patch), plain)
        }
        ([a, b], _) if a.winding.abs() == 1 && a.winding + b.winding == 0 => {
            (seam_polygon(map, a, b, step, &mut patch), plain)
        }
        _ => {
            return Err(Error::TriangulationError(format!(
                "unsupported loop windings {:?} on a {} face",
                wrapping.iter().map(|lp| lp.winding).collect::<Vec<_>>(),
                face.surface.kind()
            )))
        }
    };

    // Holes may have been unwrapped a whole turn away from the outer polygon
    let u_min = outer.iter().map(|p| p.uv.x).fold(f64::INFINITY, f64::min);
    let mut polygons = vec![outer];
    for hole in holes {
        let mean = hole.points.iter().map(|p| p.uv.x).sum::<f64>() / hole.points.len() as f64;
        let turns = ((mean - u_min) / period).floor();
        polygons.push(hole.shifted(-turns * period));
    }

    triangulate_domain(face, map, &polygons, global, step, &mut patch)?;
    Ok(patch)
}

/// Close a loop that winds once around the axis by running up one side to
/// the pole or apex, along it, and back down the other side
fn cap_polygon(
    map: &ParamMap,
    lp: &ParamLoop,
    pole_v: f64,
    pole: Ref,
    step: f64,
    patch: &mut FacePatch,
) -> Vec<ParamPoint> {
    let shift = lp.winding as f64 * map.period();
    let start = lp.points[0];
    let end_uv = Point2::new(start.uv.x + shift, start.uv.y);

    let side: Vec<(f64, Ref)> = interior_samples(&start.uv, &Point2::new(start.uv.x, pole_v), step)
        .into_iter()
        .map(|uv| (uv.y, patch.add_point(map.point(&uv))))
        .collect();

    let mut polygon = lp.points.clone();
    polygon.push(ParamPoint {
        uv: end_uv,
        r: start.r,
    });
    for &(v, r) in &side {
        polygon.push(ParamPoint {
            uv: Point2::new(end_uv.x, v),
            r,
        });
    }
    let pole_end = Point2::new(end_uv.x, pole_v);
    let pole_start = Point2::new(start.uv.x, pole_v);
    polygon.push(ParamPoint { uv: pole_end, r: pole });
    for uv in interior_samples(&pole_end, &pole_start, step) {
        polygon.push(ParamPoint { uv, r: pole });
    }
    polygon.push(ParamPoint { uv: pole_start, r: pole });
    for &(v, r) in side.iter().rev() {
        polygon.push(ParamPoint {
            uv: Point2::new(start.uv.x, v),
            r,
        });
    }
    polygon
}

/// Join two loops winding in opposite directions with a seam crossed twice
fn seam_polygon(
    map: &ParamMap,
    a: &ParamLoop,
    b: &ParamLoop,
    step: f64,
    patch: &mut FacePatch,
) -> Vec<ParamPoint> {
    let period = map.period();
    let a_shift = a.winding as f64 * period;
    let a_start = a.points[0];
    let a_end = Point2::new(a_start.uv.x + a_shift, a_start.uv.y);

    // Point of `b` closest in angle to the start of `a`
    let scale = map.u_scale();
    let offset = |p: &ParamPoint| wrap_angle((p.uv.x - a_end.x) / scale).abs();
    let j = (0..b.points.len())
        .min_by(|&x, &y| offset(&b.points[x]).total_cmp(&offset(&b.points[y])))
        .unwrap_or(0);

    let b_shift = b.winding as f64 * period;
    let m = b.points.len();
    let mut b_run: Vec<ParamPoint> = (0..=m)
        .map(|k| {
            let p = b.points[(j + k) % m];
            let du = if j + k >= m { b_shift } else { 0.0 };
            ParamPoint {
                uv: Point2::new(p.uv.x + du, p.uv.y),
                r: p.r,
            }
        })
        .collect();
    let turns = ((a_end.x - b_run[0].uv.x) / period).round();
    for p in &mut b_run {
        p.uv.x += turns * period;
    }

    let seam: Vec<(Point2<f64>, Ref)> = interior_samples(&a_end, &b_run[0].uv, step)
        .into_iter()
        .map(|uv| (uv, patch.add_point(map.point(&uv))))
        .collect();

    let mut polygon = a.points.clone();
    polygon.push(ParamPoint {
        uv: a_end,
        r: a_start.r,
    });
    polygon.extend(seam.iter().map(|&(uv, r)| ParamPoint { uv, r }));
    polygon.extend(b_run);
    polygon.extend(seam.iter().rev().map(|&(uv, r)| ParamPoint {
        uv: Point2::new(uv.x - a_shift, uv.y),
        r,
    }));
    polygon
}

/// Constrained Delaunay triangulation of the polygons (outer first, then
/// holes) with interior points on a regular grid
fn triangulate_domain(
    face: &Face,
    map: &ParamMap,
    polygons: &[Vec<ParamPoint>],
    global: &[Point3<f64>],
    step: f64,
    patch: &mut FacePatch,
) -> Result<()> {
    let mut cdt = ConstrainedDelaunayTriangulation::<SpadePoint2<f64>>::new();
    let mut refs: FxHashMap<usize, Ref> = FxHashMap::default();

    for polygon in polygons {
        let mut handles = Vec::with_capacity(polygon.len());
        for p in polygon {
            let handle = cdt
                .insert(SpadePoint2::new(p.uv.x, p.uv.y))
                .map_err(|e| Error::TriangulationError(format!("CDT insert: {:?}", e)))?;
            refs.entry(handle.index()).or_insert(p.r);
            handles.push(handle);
        }
        for i in 0..handles.len() {
            let from = handles[i];
            let to = handles[(i + 1) % handles.len()];
            if from != to && cdt.can_add_constraint(from, to) {
                cdt.add_constraint(from, to);
            }
        }
    }

    let rings: Vec<Vec<Point2<f64>>> = polygons
        .iter()
        .map(|polygon| polygon.iter().map(|p| p.uv).collect())
        .collect();
    let (min, max) = rings.iter().flatten().fold(
        (
            Point2::new(f64::INFINITY, f64::INFINITY),
            Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
        ),
        |(lo, hi), p| {
            (
                Point2::new(lo.x.min(p.x), lo.y.min(p.y)),
                Point2::new(hi.x.max(p.x), hi.y.max(p.y)),
            )
        },
    );
    let extent = max - min;
    let mut spacing = step;
    if extent.x * extent.y / (spacing * spacing) > MAX_STEINER_POINTS {
        spacing = (extent.x * extent.y / MAX_STEINER_POINTS).sqrt();
    }

    let columns = (extent.x / spacing).floor() as usize;
    let rows = (extent.y / spacing).floor() as usize;
    for row in 0..rows {
        for column in 0..columns {
            let uv = Point2::new(
                min.x + (column as f64 + 0.5) * spacing,
                min.y + (row as f64 + 0.5) * spacing,
            );
            if !contains_point(&rings, &uv) || distance_to_rings(&rings, &uv) <= 0.25 * spacing {
                continue;
            }
            let handle = cdt
                .insert(SpadePoint2::new(uv.x, uv.y))
                .map_err(|e| Error::TriangulationError(format!("CDT insert: {:?}", e)))?;
            if let std::collections::hash_map::Entry::Vacant(slot) = refs.entry(handle.index()) {
                slot.insert(patch.add_point(map.point(&uv)));
            }
        }
    }

    let interior = classify_interior_faces(&cdt);
    for triangle in cdt.inner_faces() {
        if !interior.contains(&triangle.fix().index()) {
            continue;
        }
        let vertices = triangle.vertices();
        let mut tri = [Ref::Local(0); 3];
        for (slot, vertex) in tri.iter_mut().zip(vertices.iter()) {
            *slot = *refs
                .get(&vertex.fix().index())
                .ok_or_else(|| Error::TriangulationError("CDT vertex without a source".to_string()))?;
        }
        patch.push_oriented(global, face, tri);
    }
    Ok(())
}

/// Inner triangles reached from the outside by crossing an odd number of
/// constraint edges
fn classify_interior_faces(
    cdt: &ConstrainedDelaunayTriangulation<SpadePoint2<f64>>,
) -> FxHashSet<usize> {
    let mut interior = FxHashSet::default();
    let mut depth: FxHashMap<usize, u32> = FxHashMap::default();
    let mut queue: VecDeque<(FixedFaceHandle<InnerTag>, u32)> = VecDeque::new();

    let outer = cdt.outer_face().fix();
    for edge in cdt.directed_edges() {
        if edge.face().fix() != outer {
            continue;
        }
        if let Some(inner) = edge.rev().face().as_inner() {
            let index = inner.fix().index();
            if depth.contains_key(&index) {
                continue;
            }
            let d = u32::from(cdt.is_constraint_edge(edge.as_undirected().fix()));
            depth.insert(index, d);
            if d % 2 == 1 {
                interior.insert(index);
            }
            queue.push_back((inner.fix(), d));
        }
    }

    while let Some((handle, d)) = queue.pop_front() {
        for edge in cdt.face(handle).adjacent_edges() {
            let Some(neighbour) = edge.rev().face().as_inner() else {
                continue;
            };
            let index = neighbour.fix().index();
            if depth.contains_key(&index) {
                continue;
            }
            let next = d + u32::from(cdt.is_constraint_edge(edge.as_undirected().fix()));
            depth.insert(index, next);
            if next % 2 == 1 {
                interior.insert(index);
            }
            queue.push_back((neighbour.fix(), next));
        }
    }
    interior
}

/// Latitude-longitude grid of a sphere with no real boundary
fn full_sphere(face: &Face, frame: &Frame, radius: f64, deflection: f64) -> FacePatch {
    let columns = arc_segments(radius, TAU, deflection).max(8);
    let rows = (columns / 2).max(4);
    let mut patch = FacePatch::default();

    let south = patch.add_point(frame.point(0.0, 0.0, -radius));
    let north = patch.add_point(frame.point(0.0, 0.0, radius));
    let mut grid = Vec::with_capacity(rows - 1);
    for row in 1..rows {
        let phi = -FRAC_PI_2 + std::f64::consts::PI * row as f64 / rows as f64;
        let ring: Vec<Ref> = (0..columns)
            .map(|column| {
                let theta = TAU * column as f64 / columns as f64;
                let r = radius * phi.cos();
                patch.add_point(frame.point(r * theta.cos(), r * theta.sin(), radius * phi.sin()))
            })
            .collect();
        grid.push(ring);
    }

    let no_global: &[Point3<f64>] = &[];
    for column in 0..columns {
        let next = (column + 1) % columns;
        patch.push_oriented(no_global, face, [south, grid[0][next], grid[0][column]]);
        for row in 0..grid.len() - 1 {
            let (lower, upper) = (&grid[row], &grid[row + 1]);
            patch.push_oriented(no_global, face, [lower[column], lower[next], upper[next]]);
            patch.push_oriented(no_global, face, [lower[column], upper[next], upper[column]]);
        }
        let top = &grid[grid.len() - 1];
        patch.push_oriented(no_global, face, [north, top[column], top[next]]);
    }
    patch
}
