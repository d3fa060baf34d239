// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mesh data structures

use nalgebra::{Point3, Vector3};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

/// Indexed triangle mesh in double precision
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    /// Vertex positions (x, y, z)
    pub positions: Vec<f64>,
    /// Triangle indices (i0, i1, i2)
    pub indices: Vec<u32>,
    /// Optional per-face normals (nx, ny, nz), one triple per triangle when present
    pub normals: Vec<f64>,
}

/// Edge-use statistics of a mesh
///
/// A mesh bounds a volume when every undirected edge is used by exactly two
/// faces that traverse it in opposite directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopologyReport {
    pub edges: usize,
    /// Edges used by a single face
    pub boundary_edges: usize,
    /// Edges used by more than two faces
    pub non_manifold_edges: usize,
    /// Edges used twice in the same direction
    pub inconsistent_edges: usize,
}

impl TopologyReport {
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.edges > 0
            && self.boundary_edges == 0
            && self.non_manifold_edges == 0
            && self.inconsistent_edges == 0
    }
}

impl std::fmt::Display for TopologyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} boundary, {} non-manifold and {} inconsistently oriented of {} edges",
            self.boundary_edges, self.non_manifold_edges, self.inconsistent_edges, self.edges
        )
    }
}

impl Mesh {
    /// Create a new empty mesh
    pub fn new() -> Self {
        Self {
            positions: Vec::new(),
            indices: Vec::new(),
            normals: Vec::new(),
        }
    }

    /// Create a mesh with capacity
    pub fn with_capacity(vertex_count: usize, triangle_count: usize) -> Self {
        Self {
            positions: Vec::with_capacity(vertex_count * 3),
            indices: Vec::with_capacity(triangle_count * 3),
            normals: Vec::new(),
        }
    }

    /// Add a vertex, returning its index
    #[inline]
    pub fn add_vertex(&mut self, position: Point3<f64>) -> u32 {
        let index = self.vertex_count() as u32;
        self.positions.push(position.x);
        self.positions.push(position.y);
        self.positions.push(position.z);
        index
    }

    /// Add a triangle
    #[inline]
    pub fn add_triangle(&mut self, i0: u32, i1: u32, i2: u32) {
        self.indices.push(i0);
        self.indices.push(i1);
        self.indices.push(i2);
    }

    #[inline]
    pub fn position(&self, index: u32) -> Point3<f64> {
        let i = index as usize * 3;
        Point3::new(self.positions[i], self.positions[i + 1], self.positions[i + 2])
    }

    #[inline]
    pub fn triangle(&self, face: usize) -> [u32; 3] {
        let i = face * 3;
        [self.indices[i], self.indices[i + 1], self.indices[i + 2]]
    }

    /// Stored normal of a face, if the mesh carries normals
    #[inline]
    pub fn stored_normal(&self, face: usize) -> Option<Vector3<f64>> {
        let i = face * 3;
        (self.normals.len() >= i + 3)
            .then(|| Vector3::new(self.normals[i], self.normals[i + 1], self.normals[i + 2]))
    }

    /// Unit normal from the winding order, zero for degenerate faces
    #[inline]
    pub fn face_normal(&self, face: usize) -> Vector3<f64> {
        let [a, b, c] = self.triangle(face);
        let (a, b, c) = (self.position(a), self.position(b), self.position(c));
        (b - a).cross(&(c - a)).try_normalize(0.0).unwrap_or_else(Vector3::zeros)
    }

    /// Twice the area of a face
    #[inline]
    pub fn face_area2(&self, face: usize) -> f64 {
        let [a, b, c] = self.triangle(face);
        let (a, b, c) = (self.position(a), self.position(b), self.position(c));
        (b - a).cross(&(c - a)).norm()
    }

    /// Merge another mesh into this one
    pub fn merge(&mut self, other: &Mesh) {
        if other.is_empty() {
            return;
        }

        let vertex_offset = self.vertex_count() as u32;
        let keep_normals = self.normals.len() == self.indices.len()
            && other.normals.len() == other.indices.len();

        self.positions.extend_from_slice(&other.positions);
        self.indices
            .extend(other.indices.iter().map(|&i| i + vertex_offset));
        if keep_normals {
            self.normals.extend_from_slice(&other.normals);
        } else {
            self.normals.clear();
        }
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Calculate bounds (min, max)
    pub fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        if self.positions.is_empty() {
            return (Point3::origin(), Point3::origin());
        }

        let mut min = Point3::new(f64::MAX, f64::MAX, f64::MAX);
        let mut max = Point3::new(f64::MIN, f64::MIN, f64::MIN);

        self.positions.chunks_exact(3).for_each(|chunk| {
            min.x = min.x.min(chunk[0]);
            min.y = min.y.min(chunk[1]);
            min.z = min.z.min(chunk[2]);
            max.x = max.x.max(chunk[0]);
            max.y = max.y.max(chunk[1]);
            max.z = max.z.max(chunk[2]);
        });

        (min, max)
    }

    /// Centre of the bounding box
    pub fn bounds_center(&self) -> Point3<f64> {
        let (min, max) = self.bounds();
        nalgebra::center(&min, &max)
    }

    /// Multiply every coordinate by `factor`
    pub fn scale(&mut self, factor: f64) {
        if factor == 1.0 {
            return;
        }
        self.positions.iter_mut().for_each(|c| *c *= factor);
    }

    /// Merge vertices with bit-identical coordinates and drop faces that
    /// collapse onto repeated indices
    pub fn weld(&self) -> Mesh {
        let mut remap = Vec::with_capacity(self.vertex_count());
        let mut seen: FxHashMap<[u64; 3], u32> =
            FxHashMap::with_capacity_and_hasher(self.vertex_count(), Default::default());
        let mut welded = Mesh::with_capacity(self.vertex_count(), self.triangle_count());

        for chunk in self.positions.chunks_exact(3) {
            // +0.0 and -0.0 are the same point
            let key = [
                (chunk[0] + 0.0).to_bits(),
                (chunk[1] + 0.0).to_bits(),
                (chunk[2] + 0.0).to_bits(),
            ];
            let index = *seen
                .entry(key)
                .or_insert_with(|| welded.add_vertex(Point3::new(chunk[0], chunk[1], chunk[2])));
            remap.push(index);
        }

        let has_normals = self.normals.len() == self.indices.len();
        for face in 0..self.triangle_count() {
            let [a, b, c] = self.triangle(face);
            let (a, b, c) = (remap[a as usize], remap[b as usize], remap[c as usize]);
            if a == b || b == c || a == c {
                continue;
            }
            welded.add_triangle(a, b, c);
            if has_normals {
                welded
                    .normals
                    .extend_from_slice(&self.normals[face * 3..face * 3 + 3]);
            }
        }

        welded
    }

    /// Count faces with zero area
    pub fn degenerate_face_count(&self) -> usize {
        (0..self.triangle_count())
            .filter(|&f| self.face_area2(f) == 0.0)
            .count()
    }

    /// Classify every undirected edge by how faces use it
    pub fn topology(&self) -> TopologyReport {
        // (uses, direction balance)
        let mut edges: FxHashMap<(u32, u32), (u32, i32)> =
            FxHashMap::with_capacity_and_hasher(self.indices.len(), Default::default());

        for face in 0..self.triangle_count() {
            let tri = self.triangle(face);
            for i in 0..3 {
                let (a, b) = (tri[i], tri[(i + 1) % 3]);
                if a == b {
                    continue;
                }
                let (key, dir) = if a < b { ((a, b), 1) } else { ((b, a), -1) };
                let entry = edges.entry(key).or_insert((0, 0));
                entry.0 += 1;
                entry.1 += dir;
            }
        }

        let mut report = TopologyReport {
            edges: edges.len(),
            ..TopologyReport::default()
        };
        for &(uses, balance) in edges.values() {
            match uses {
                1 => report.boundary_edges += 1,
                2 if balance != 0 => report.inconsistent_edges += 1,
                2 => {}
                _ => report.non_manifold_edges += 1,
            }
        }
        report
    }
}

/// Weld a freshly decoded triangle list and reject inputs that carry no
/// surface: no faces at all, or only faces that collapse or have zero area
pub fn weld_decoded(raw: &Mesh, source: &str) -> Result<Mesh> {
    if raw.is_empty() {
        return Err(Error::EmptyMesh(format!(
            "{} contains no faces ({} vertices)",
            source,
            raw.vertex_count()
        )));
    }
    let welded = raw.weld();
    if welded.is_empty() || welded.degenerate_face_count() == welded.triangle_count() {
        return Err(Error::Degenerate(format!(
            "all {} faces of {} have zero area",
            raw.triangle_count(),
            source
        )));
    }
    Ok(welded)
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

/// Closed axis-aligned box mesh with outward winding
#[cfg(test)]
pub(crate) fn box_mesh(min: Point3<f64>, max: Point3<f64>) -> Mesh {
    let mut mesh = Mesh::new();
    for i in 0..8u32 {
        let x = if i & 1 == 0 { min.x } else { max.x };
        let y = if i & 2 == 0 { min.y } else { max.y };
        let z = if i & 4 == 0 { min.z } else { max.z };
        mesh.add_vertex(Point3::new(x, y, z));
    }
    let quads = [
        [0, 2, 3, 1], // -z
        [4, 5, 7, 6], // +z
        [0, 1, 5, 4], // -y
        [2, 6, 7, 3], // +y
        [0, 4, 6, 2], // -x
        [1, 3, 7, 5], // +x
    ];
    for q in quads {
        mesh.add_triangle(q[0], q[1], q[2]);
        mesh.add_triangle(q[0], q[2], q[3]);
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_creation() {
        let mesh = Mesh::new();
        assert!(mesh.is_empty());
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.triangle_count(), 0);
    }

    #[test]
    fn test_add_vertex() {
        let mut mesh = Mesh::new();
        let i = mesh.add_vertex(Point3::new(1.0, 2.0, 3.0));
        assert_eq!(i, 0);
        assert_eq!(mesh.positions, vec![1.0, 2.0, 3.0]);
        assert_eq!(mesh.position(0), Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_merge() {
        let mut mesh1 = box_mesh(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let mesh2 = box_mesh(Point3::new(2.0, 0.0, 0.0), Point3::new(3.0, 1.0, 1.0));
        mesh1.merge(&mesh2);
        assert_eq!(mesh1.vertex_count(), 16);
        assert_eq!(mesh1.triangle_count(), 24);
        assert_eq!(mesh1.triangle(12), [8, 10, 11]);
    }

    #[test]
    fn test_box_is_closed() {
        let mesh = box_mesh(Point3::origin(), Point3::new(1.0, 2.0, 3.0));
        let report = mesh.topology();
        assert_eq!(report.edges, 18);
        assert!(report.is_closed(), "{}", report);
        assert_eq!(mesh.bounds_center(), Point3::new(0.5, 1.0, 1.5));
    }

    #[test]
    fn test_open_and_flipped_faces_are_reported() {
        let mut open = box_mesh(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        open.indices.truncate(30);
        let report = open.topology();
        assert!(!report.is_closed());
        assert_eq!(report.boundary_edges, 4);

        let mut flipped = box_mesh(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        flipped.indices.swap(0, 1);
        let report = flipped.topology();
        assert!(!report.is_closed());
        assert!(report.inconsistent_edges > 0);
    }

    #[test]
    fn test_weld_merges_duplicate_corners() {
        // Triangle soup: every face carries its own copies of the corners
        let indexed = box_mesh(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let mut soup = Mesh::new();
        for face in 0..indexed.triangle_count() {
            let [a, b, c] = indexed.triangle(face);
            let ia = soup.add_vertex(indexed.position(a));
            let ib = soup.add_vertex(indexed.position(b));
            let ic = soup.add_vertex(indexed.position(c));
            soup.add_triangle(ia, ib, ic);
        }
        assert_eq!(soup.vertex_count(), 36);
        assert!(!soup.topology().is_closed());

        let welded = soup.weld();
        assert_eq!(welded.vertex_count(), 8);
        assert_eq!(welded.triangle_count(), 12);
        assert!(welded.topology().is_closed());
    }

    #[test]
    fn test_weld_drops_collapsed_faces() {
        let mut mesh = Mesh::new();
        mesh.add_vertex(Point3::new(0.0, 0.0, 0.0));
        mesh.add_vertex(Point3::new(0.0, 0.0, 0.0));
        mesh.add_vertex(Point3::new(1.0, 0.0, 0.0));
        mesh.add_triangle(0, 1, 2);
        mesh.normals = vec![0.0, 0.0, 1.0];
        let welded = mesh.weld();
        assert_eq!(welded.triangle_count(), 0);
        assert!(welded.normals.is_empty());
    }

    #[test]
    fn test_weld_decoded_rejects_empty_and_flat() {
        let mut points = Mesh::new();
        points.add_vertex(Point3::new(0.0, 0.0, 0.0));
        assert!(matches!(weld_decoded(&points, "p.obj"), Err(Error::EmptyMesh(_))));

        let mut flat = Mesh::new();
        flat.add_vertex(Point3::new(0.0, 0.0, 0.0));
        flat.add_vertex(Point3::new(1.0, 0.0, 0.0));
        flat.add_vertex(Point3::new(2.0, 0.0, 0.0));
        flat.add_triangle(0, 1, 2);
        assert!(matches!(weld_decoded(&flat, "f.stl"), Err(Error::Degenerate(_))));
    }

    #[test]
    fn test_face_normal() {
        let mesh = box_mesh(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        assert_eq!(mesh.face_normal(0), Vector3::new(0.0, 0.0, -1.0));
        assert_eq!(mesh.face_normal(2), Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(mesh.degenerate_face_count(), 0);
    }
}
