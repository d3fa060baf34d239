// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mesh simplification by quadric-error edge collapse
//!
//! Edges are collapsed cheapest first. A collapse is applied only when the
//! edge is interior to a manifold fan (exactly two incident faces and exactly
//! two common neighbours) and no surviving face turns over, so a closed
//! input stays closed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use nalgebra::Point3;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::mesh::Mesh;
use crate::quadric::Quadric;

/// Face count above which meshes are simplified
pub const DEFAULT_SIMPLIFY_THRESHOLD: usize = 10_000;

/// Fewest faces a decimated mesh may keep
pub const MIN_FACES: usize = 4;

/// Face-count threshold and the target it implies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimplificationRequest {
    pub threshold: usize,
}

impl Default for SimplificationRequest {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMPLIFY_THRESHOLD,
        }
    }
}

impl SimplificationRequest {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// Target face count, or `None` when the mesh passes through unchanged
    pub fn target_for(&self, faces: usize) -> Option<usize> {
        (faces > self.threshold).then(|| (faces / 2).max(MIN_FACES))
    }
}

/// Result of mesh decimation
#[derive(Debug, Clone)]
pub struct DecimationResult {
    pub mesh: Mesh,
    pub original_faces: usize,
    pub final_faces: usize,
    pub collapses_performed: usize,
    /// Collapses refused by the manifold or flip checks
    pub collapses_rejected: usize,
}

impl DecimationResult {
    fn unchanged(mesh: &Mesh) -> Self {
        Self {
            mesh: mesh.clone(),
            original_faces: mesh.triangle_count(),
            final_faces: mesh.triangle_count(),
            collapses_performed: 0,
            collapses_rejected: 0,
        }
    }

    pub fn was_decimated(&self) -> bool {
        self.collapses_performed > 0
    }
}

impl std::fmt::Display for DecimationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Decimation: {} -> {} faces ({} collapses, {} rejected)",
            self.original_faces, self.final_faces, self.collapses_performed, self.collapses_rejected
        )
    }
}

/// Apply `request` to `mesh`: decimate to half the faces when above the
/// threshold, otherwise return the mesh unchanged
pub fn simplify(mesh: &Mesh, request: &SimplificationRequest) -> DecimationResult {
    match request.target_for(mesh.triangle_count()) {
        Some(target) => decimate_mesh(mesh, target),
        None => {
            debug!(
                faces = mesh.triangle_count(),
                threshold = request.threshold,
                "Mesh below simplification threshold"
            );
            DecimationResult::unchanged(mesh)
        }
    }
}

/// An edge collapse candidate in the priority queue
#[derive(Debug, Clone)]
struct EdgeCollapse {
    cost: f64,
    v1: u32,
    v2: u32,
    /// Vertex versions the candidate was computed against
    stamp: (u32, u32),
    target: Point3<f64>,
}

impl PartialEq for EdgeCollapse {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EdgeCollapse {}

impl PartialOrd for EdgeCollapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCollapse {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behaviour; ties broken by edge for determinism
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| (other.v1, other.v2).cmp(&(self.v1, self.v2)))
    }
}

/// Working state of one decimation run
struct Decimator {
    positions: Vec<Point3<f64>>,
    quadrics: Vec<Quadric>,
    versions: Vec<u32>,
    alive: Vec<bool>,
    faces: Vec<[u32; 3]>,
    face_alive: Vec<bool>,
    vertex_faces: Vec<SmallVec<[u32; 8]>>,
}

impl Decimator {
    fn new(mesh: &Mesh) -> Self {
        let vertex_count = mesh.vertex_count();
        let positions: Vec<Point3<f64>> = (0..vertex_count as u32).map(|i| mesh.position(i)).collect();
        let faces: Vec<[u32; 3]> = (0..mesh.triangle_count()).map(|f| mesh.triangle(f)).collect();

        let mut quadrics = vec![Quadric::default(); vertex_count];
        let mut vertex_faces = vec![SmallVec::new(); vertex_count];
        for (face_index, face) in faces.iter().enumerate() {
            let q = Quadric::from_triangle(
                &positions[face[0] as usize],
                &positions[face[1] as usize],
                &positions[face[2] as usize],
            );
            for &v in face {
                if let Some(q) = &q {
                    quadrics[v as usize].add(q);
                }
                vertex_faces[v as usize].push(face_index as u32);
            }
        }

        Self {
            positions,
            quadrics,
            versions: vec![0; vertex_count],
            alive: vec![true; vertex_count],
            face_alive: vec![true; faces.len()],
            faces,
            vertex_faces,
        }
    }

    fn neighbours(&self, v: u32) -> SmallVec<[u32; 16]> {
        let mut out: SmallVec<[u32; 16]> = SmallVec::new();
        for &f in &self.vertex_faces[v as usize] {
            for &u in &self.faces[f as usize] {
                if u != v && !out.contains(&u) {
                    out.push(u);
                }
            }
        }
        out
    }

    fn candidate(&self, v1: u32, v2: u32) -> EdgeCollapse {
        let (a, b) = if v1 < v2 { (v1, v2) } else { (v2, v1) };
        let mut q = self.quadrics[a as usize];
        q.add(&self.quadrics[b as usize]);

        let pa = self.positions[a as usize];
        let pb = self.positions[b as usize];
        let midpoint = nalgebra::center(&pa, &pb);
        let reach = (pb - pa).norm();

        // Near-singular solves can land far away; keep the target near the edge
        let target = match q.optimal_point() {
            Some(p) if (p - midpoint).norm() <= reach => p,
            _ => [pa, pb, midpoint]
                .into_iter()
                .min_by(|x, y| q.evaluate(x).total_cmp(&q.evaluate(y)))
                .unwrap_or(midpoint),
        };

        EdgeCollapse {
            cost: q.evaluate(&target).max(0.0),
            v1: a,
            v2: b,
            stamp: (self.versions[a as usize], self.versions[b as usize]),
            target,
        }
    }

    fn is_current(&self, c: &EdgeCollapse) -> bool {
        self.alive[c.v1 as usize]
            && self.alive[c.v2 as usize]
            && self.versions[c.v1 as usize] == c.stamp.0
            && self.versions[c.v2 as usize] == c.stamp.1
    }

    /// Manifold link condition: the edge has two incident faces and the two
    /// end points share exactly the two opposite vertices
    fn satisfies_link_condition(&self, v1: u32, v2: u32) -> bool {
        let shared_faces = self.vertex_faces[v1 as usize]
            .iter()
            .filter(|&&f| self.faces[f as usize].contains(&v2))
            .count();
        if shared_faces != 2 {
            return false;
        }
        let n1 = self.neighbours(v1);
        let n2 = self.neighbours(v2);
        n1.iter().filter(|u| n2.contains(u)).count() == 2
    }

    /// Whether moving `v1` and `v2` onto `target` turns any surviving face over
    fn flips_a_face(&self, v1: u32, v2: u32, target: &Point3<f64>) -> bool {
        for &v in &[v1, v2] {
            for &f in &self.vertex_faces[v as usize] {
                let face = self.faces[f as usize];
                if face.contains(&v1) && face.contains(&v2) {
                    continue;
                }
                let corners = face.map(|u| self.positions[u as usize]);
                let moved = face.map(|u| {
                    if u == v1 || u == v2 {
                        *target
                    } else {
                        self.positions[u as usize]
                    }
                });
                let before = (corners[1] - corners[0]).cross(&(corners[2] - corners[0]));
                let after = (moved[1] - moved[0]).cross(&(moved[2] - moved[0]));
                let after_len = after.norm();
                if after_len <= f64::EPSILON * before.norm() || before.dot(&after) <= 0.0 {
                    return true;
                }
            }
        }
        false
    }

    /// Merge `v2` into `v1` at `target`; returns the number of faces removed
    fn collapse(&mut self, v1: u32, v2: u32, target: Point3<f64>) -> usize {
        self.positions[v1 as usize] = target;
        let q2 = self.quadrics[v2 as usize];
        self.quadrics[v1 as usize].add(&q2);
        self.alive[v2 as usize] = false;
        self.versions[v1 as usize] += 1;
        self.versions[v2 as usize] += 1;

        let mut removed = 0;
        let v2_faces = std::mem::take(&mut self.vertex_faces[v2 as usize]);
        for f in v2_faces {
            let face = &mut self.faces[f as usize];
            if face.contains(&v1) {
                self.face_alive[f as usize] = false;
                removed += 1;
                let corners = *face;
                for u in corners {
                    if u != v2 {
                        self.vertex_faces[u as usize].retain(|g| *g != f);
                    }
                }
            } else {
                for u in face.iter_mut() {
                    if *u == v2 {
                        *u = v1;
                    }
                }
                self.vertex_faces[v1 as usize].push(f);
            }
        }
        removed
    }

    fn into_mesh(self) -> Mesh {
        let mut remap = vec![u32::MAX; self.positions.len()];
        let mut mesh = Mesh::new();
        for (face, _) in self
            .faces
            .iter()
            .zip(&self.face_alive)
            .filter(|(_, &alive)| alive)
        {
            let mut tri = [0u32; 3];
            for (slot, &v) in tri.iter_mut().zip(face) {
                if remap[v as usize] == u32::MAX {
                    remap[v as usize] = mesh.add_vertex(self.positions[v as usize]);
                }
                *slot = remap[v as usize];
            }
            mesh.add_triangle(tri[0], tri[1], tri[2]);
        }
        mesh
    }
}

/// Decimate `mesh` until it has at most `target` faces or no valid collapse
/// remains. Never goes below [`MIN_FACES`].
pub fn decimate_mesh(mesh: &Mesh, target: usize) -> DecimationResult {
    let original_faces = mesh.triangle_count();
    let target = target.max(MIN_FACES);
    if original_faces <= target {
        return DecimationResult::unchanged(mesh);
    }

    info!(original = original_faces, target, "Starting mesh decimation");

    let mut state = Decimator::new(mesh);

    let mut heap = BinaryHeap::with_capacity(original_faces * 3 / 2);
    let mut seen = FxHashSet::default();
    for face in &state.faces {
        for i in 0..3 {
            let (a, b) = (face[i], face[(i + 1) % 3]);
            let edge = if a < b { (a, b) } else { (b, a) };
            if a != b && seen.insert(edge) {
                heap.push(state.candidate(a, b));
            }
        }
    }
    drop(seen);

    let mut active_faces = original_faces;
    let mut collapses_performed = 0;
    let mut collapses_rejected = 0;

    while active_faces > target && active_faces - 2 >= MIN_FACES {
        let Some(collapse) = heap.pop() else {
            break;
        };
        if !state.is_current(&collapse) {
            continue;
        }
        let (v1, v2) = (collapse.v1, collapse.v2);

        if !state.satisfies_link_condition(v1, v2) || state.flips_a_face(v1, v2, &collapse.target) {
            collapses_rejected += 1;
            continue;
        }

        active_faces -= state.collapse(v1, v2, collapse.target);
        collapses_performed += 1;

        for u in state.neighbours(v1) {
            heap.push(state.candidate(v1, u));
        }
    }

    let result = DecimationResult {
        mesh: state.into_mesh(),
        original_faces,
        final_faces: active_faces,
        collapses_performed,
        collapses_rejected,
    };

    info!(
        final_faces = result.final_faces,
        collapses = result.collapses_performed,
        rejected = result.collapses_rejected,
        "Decimation complete"
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::box_mesh;
    use crate::volume::signed_volume;
    use std::f64::consts::PI;

    /// Closed UV sphere with `rings` latitude bands and `segments` longitudes
    fn uv_sphere(radius: f64, rings: u32, segments: u32) -> Mesh {
        let mut mesh = Mesh::new();
        let north = mesh.add_vertex(Point3::new(0.0, 0.0, radius));
        for r in 1..rings {
            let phi = PI * r as f64 / rings as f64;
            for s in 0..segments {
                let theta = 2.0 * PI * s as f64 / segments as f64;
                mesh.add_vertex(Point3::new(
                    radius * phi.sin() * theta.cos(),
                    radius * phi.sin() * theta.sin(),
                    radius * phi.cos(),
                ));
            }
        }
        let south = mesh.add_vertex(Point3::new(0.0, 0.0, -radius));
        let ring = |r: u32, s: u32| 1 + (r - 1) * segments + s % segments;
        for s in 0..segments {
            mesh.add_triangle(north, ring(1, s), ring(1, s + 1));
            mesh.add_triangle(south, ring(rings - 1, s + 1), ring(rings - 1, s));
        }
        for r in 1..rings - 1 {
            for s in 0..segments {
                mesh.add_triangle(ring(r, s), ring(r + 1, s), ring(r + 1, s + 1));
                mesh.add_triangle(ring(r, s), ring(r + 1, s + 1), ring(r, s + 1));
            }
        }
        mesh
    }

    #[test]
    fn test_target_for() {
        let request = SimplificationRequest::default();
        assert_eq!(request.target_for(10_000), None);
        assert_eq!(request.target_for(10_001), Some(5_000));
        assert_eq!(request.target_for(50_000), Some(25_000));
        assert_eq!(SimplificationRequest::new(0).target_for(6), Some(4));
    }

    #[test]
    fn test_below_threshold_is_noop() {
        let cube = box_mesh(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let result = simplify(&cube, &SimplificationRequest::default());
        assert!(!result.was_decimated());
        assert_eq!(result.mesh, cube);
    }

    #[test]
    fn test_sphere_halves_and_keeps_volume() {
        let sphere = uv_sphere(10.0, 40, 80);
        assert!(sphere.topology().is_closed());
        let before = signed_volume(&sphere);

        let faces = sphere.triangle_count();
        let result = decimate_mesh(&sphere, faces / 2);
        assert_eq!(result.final_faces, faces / 2);
        assert_eq!(result.mesh.triangle_count(), faces / 2);
        assert!(result.mesh.topology().is_closed());

        let after = signed_volume(&result.mesh);
        assert!(((after - before) / before).abs() < 0.02, "{} vs {}", after, before);
    }

    #[test]
    fn test_never_below_min_faces() {
        let cube = box_mesh(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let result = decimate_mesh(&cube, 0);
        assert!(result.final_faces >= MIN_FACES);
        assert!(result.mesh.topology().is_closed());
    }

    #[test]
    fn test_second_pass_below_threshold_is_noop() {
        let sphere = uv_sphere(5.0, 30, 60);
        let request = SimplificationRequest::new(3_000);
        let first = simplify(&sphere, &request);
        assert!(first.was_decimated());
        assert!(first.final_faces <= 3_000);
        let second = simplify(&first.mesh, &request);
        assert!(!second.was_decimated());
        assert_eq!(second.mesh, first.mesh);
    }
}
