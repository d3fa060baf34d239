// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boundary representation topology
//!
//! Loops are stored already oriented: after applying bound and edge
//! orientations they run counter-clockwise around the face's outward normal
//! (the surface normal, reversed when `same_sense` is false).

use nalgebra::{Point3, Vector3};
use rustc_hash::FxHashMap;

use super::geom::{EdgeCurve, Frame, Surface};
use crate::error::{Error, Result};
use crate::triangulation::newell_normal;

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub start: u32,
    pub end: u32,
    pub curve: EdgeCurve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrientedEdge {
    pub edge: u32,
    /// Traversed from `start` to `end`
    pub forward: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Loop {
    pub edges: Vec<OrientedEdge>,
}

impl Loop {
    pub fn reversed(&self) -> Self {
        Self {
            edges: self
                .edges
                .iter()
                .rev()
                .map(|oe| OrientedEdge {
                    edge: oe.edge,
                    forward: !oe.forward,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub surface: Surface,
    pub same_sense: bool,
    pub loops: Vec<Loop>,
}

impl Face {
    /// Same face seen from the other side
    pub fn flipped(&self) -> Self {
        Self {
            surface: self.surface.clone(),
            same_sense: !self.same_sense,
            loops: self.loops.iter().map(Loop::reversed).collect(),
        }
    }

    /// Outward unit normal of the face at a point on it
    pub fn normal_at(&self, p: &Point3<f64>) -> Vector3<f64> {
        let n = self.surface.normal_at(p);
        if self.same_sense {
            n
        } else {
            -n
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shell {
    pub faces: Vec<Face>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solid {
    /// Source identifier, for diagnostics
    pub name: String,
    pub outer: Shell,
    pub voids: Vec<Shell>,
}

/// Solids of one exchange file in model units
#[derive(Debug, Clone, PartialEq)]
pub struct BrepModel {
    pub vertices: Vec<Point3<f64>>,
    pub edges: Vec<Edge>,
    pub solids: Vec<Solid>,
    /// Millimetres per model unit
    pub unit_scale_mm: f64,
}

impl BrepModel {
    pub fn edge(&self, index: u32) -> &Edge {
        &self.edges[index as usize]
    }

    /// All faces of all shells
    pub fn faces(&self) -> impl Iterator<Item = &Face> {
        self.solids.iter().flat_map(|solid| {
            std::iter::once(&solid.outer)
                .chain(solid.voids.iter())
                .flat_map(|shell| shell.faces.iter())
        })
    }

    pub fn face_count(&self) -> usize {
        self.faces().count()
    }

    /// Corner points of a loop in traversal order (edge start points)
    pub fn loop_vertices(&self, lp: &Loop) -> Vec<Point3<f64>> {
        lp.edges
            .iter()
            .map(|oe| {
                let edge = self.edge(oe.edge);
                let v = if oe.forward { edge.start } else { edge.end };
                self.vertices[v as usize]
            })
            .collect()
    }
}

/// Accumulates vertices and edges while a file is transferred, sharing them
/// by source identifier so adjacent faces reference the same edge
#[derive(Debug, Default)]
pub struct BrepBuilder {
    vertices: Vec<Point3<f64>>,
    vertex_ids: FxHashMap<u64, u32>,
    edges: Vec<Edge>,
    edge_ids: FxHashMap<u64, u32>,
}

impl BrepBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_point(&self, index: u32) -> Point3<f64> {
        self.vertices[index as usize]
    }

    pub fn edge_curve(&self, index: u32) -> &EdgeCurve {
        &self.edges[index as usize].curve
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Vertex for `key`, created from `point` on first use
    pub fn vertex(&mut self, key: u64, point: impl FnOnce() -> Result<Point3<f64>>) -> Result<u32> {
        if let Some(&index) = self.vertex_ids.get(&key) {
            return Ok(index);
        }
        let index = self.vertices.len() as u32;
        self.vertices.push(point()?);
        self.vertex_ids.insert(key, index);
        Ok(index)
    }

    pub fn known_edge(&self, key: u64) -> Option<u32> {
        self.edge_ids.get(&key).copied()
    }

    pub fn add_edge(&mut self, key: u64, edge: Edge) -> u32 {
        let index = self.edges.len() as u32;
        self.edges.push(edge);
        self.edge_ids.insert(key, index);
        index
    }

    /// Straight edge between two vertices, shared by the unordered pair
    pub fn line_between(&mut self, a: u32, b: u32) -> OrientedEdge {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let key = (1u64 << 63) | ((lo as u64) << 32) | hi as u64;
        let edge = match self.known_edge(key) {
            Some(edge) => edge,
            None => {
                let curve = EdgeCurve::Line {
                    start: self.vertices[lo as usize],
                    end: self.vertices[hi as usize],
                };
                self.add_edge(
                    key,
                    Edge {
                        start: lo,
                        end: hi,
                        curve,
                    },
                )
            }
        };
        OrientedEdge {
            edge,
            forward: a == lo,
        }
    }

    /// Plane through the corners of a polygonal loop, oriented so the loop
    /// runs counter-clockwise around its normal
    pub fn newell_plane(&self, lp: &Loop) -> Result<Frame> {
        let corners: Vec<Point3<f64>> = lp
            .edges
            .iter()
            .map(|oe| {
                let edge = &self.edges[oe.edge as usize];
                let v = if oe.forward { edge.start } else { edge.end };
                self.vertices[v as usize]
            })
            .collect();
        let normal = newell_normal(&corners);
        if corners.len() < 3 || normal.norm() <= 1e-12 {
            return Err(Error::Degenerate("planar face loop has no area".to_string()));
        }
        Frame::new(corners[0], normal, Some(corners[1] - corners[0]))
    }

    pub fn finish(self, solids: Vec<Solid>, unit_scale_mm: f64) -> BrepModel {
        BrepModel {
            vertices: self.vertices,
            edges: self.edges,
            solids,
            unit_scale_mm,
        }
    }
}
