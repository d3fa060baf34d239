// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IGES manifold solid to BRep transfer
//!
//! Follows manifold solid objects (186) through shells (514), faces (510),
//! loops (508), edge lists (504) and vertex lists (502). Loops in an IGES
//! face run counter-clockwise around the underlying surface normal; the
//! shell and solid orientation flags are applied by flipping whole faces.

use std::f64::consts::TAU;

use nalgebra::{Matrix4, Point3, Vector3};
use solidvol_core::{DirectoryEntry, IgesFile};
use tracing::{debug, info};

use super::geom::{EdgeCurve, Frame, Surface};
use super::model::{BrepBuilder, BrepModel, Edge, Face, Loop, OrientedEdge, Shell, Solid};
use crate::error::{Error, Result};

const FORMAT: &str = "IGES";

/// Transformation matrices may reference further matrices
const MAX_TRANSFORM_DEPTH: usize = 16;

const MANIFOLD_SOLID: u32 = 186;
const SHELL: u32 = 514;
const FACE: u32 = 510;
const LOOP: u32 = 508;
const EDGE_LIST: u32 = 504;
const VERTEX_LIST: u32 = 502;
const TRANSFORMATION: u32 = 124;
const POINT: u32 = 116;
const DIRECTION: u32 = 123;
const CIRCULAR_ARC: u32 = 100;
const LINE: u32 = 110;
const PLANE: u32 = 190;
const CYLINDER: u32 = 192;
const CONE: u32 = 194;
const SPHERE: u32 = 196;

/// Read every manifold solid of an IGES document
pub fn read_iges(content: &str, source: &str) -> Result<BrepModel> {
    let file = IgesFile::parse(content)?;
    let mut transfer = IgesTransfer {
        file: &file,
        builder: BrepBuilder::new(),
    };
    let solids = transfer.solids()?;
    if solids.is_empty() {
        return Err(Error::NoSolid(format!(
            "{} has no manifold solid or closed shell",
            source
        )));
    }

    let model = transfer.builder.finish(solids, file.unit_scale_mm());
    info!(
        source,
        solids = model.solids.len(),
        faces = model.face_count(),
        edges = model.edges.len(),
        unit_scale_mm = model.unit_scale_mm,
        "Transferred IGES solids"
    );
    Ok(model)
}

fn missing(entry: &DirectoryEntry, what: &str) -> Error {
    Error::parse(
        FORMAT,
        format!("DE {}", entry.de),
        format!("type {} is missing {}", entry.entity_type, what),
    )
}

fn unsupported(kind: &'static str, entry: &DirectoryEntry) -> Error {
    Error::unsupported(
        kind,
        format!("type {} form {} (DE {})", entry.entity_type, entry.form, entry.de),
    )
}

fn float(entry: &DirectoryEntry, index: usize, what: &str) -> Result<f64> {
    entry.float(index).ok_or_else(|| missing(entry, what))
}

fn pointer(entry: &DirectoryEntry, index: usize, what: &str) -> Result<u32> {
    entry.pointer(index).ok_or_else(|| missing(entry, what))
}

fn count(entry: &DirectoryEntry, index: usize, what: &str) -> Result<usize> {
    entry
        .int(index)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| missing(entry, what))
}

/// Orientation flag; `0` disagrees with the referenced entity, defaults agree
fn agrees(entry: &DirectoryEntry, index: usize) -> bool {
    entry.int(index).unwrap_or(1) != 0
}

/// Key for an item of a list entity (1-based index)
fn list_key(de: u32, index: usize) -> u64 {
    ((de as u64) << 32) | index as u64
}

fn flip_shell(shell: Shell) -> Shell {
    Shell {
        faces: shell.faces.iter().map(Face::flipped).collect(),
    }
}

fn transform_frame(m: &Matrix4<f64>, frame: &Frame) -> Result<Frame> {
    let x = m.transform_vector(&frame.x);
    let y = m.transform_vector(&frame.y);
    Frame::new(m.transform_point(&frame.origin), x.cross(&y), Some(x))
}

struct IgesTransfer<'f> {
    file: &'f IgesFile,
    builder: BrepBuilder,
}

impl<'f> IgesTransfer<'f> {
    fn entry(&self, de: u32, expected: &[u32]) -> Result<&'f DirectoryEntry> {
        let entry = self.file.require(de)?;
        if !expected.contains(&entry.entity_type) {
            return Err(Error::parse(
                FORMAT,
                format!("DE {}", de),
                format!("expected type {:?}, found {}", expected, entry.entity_type),
            ));
        }
        Ok(entry)
    }

    fn solids(&mut self) -> Result<Vec<Solid>> {
        let file = self.file;
        let mut solids = Vec::new();
        for entry in file.of_type(MANIFOLD_SOLID) {
            let mut outer = self.shell(pointer(entry, 0, "shell")?)?;
            if !agrees(entry, 1) {
                outer = flip_shell(outer);
            }

            let void_count = entry.int(2).unwrap_or(0).max(0) as usize;
            let mut voids = Vec::with_capacity(void_count);
            for i in 0..void_count {
                let mut void = self.shell(pointer(entry, 3 + 2 * i, "void shell")?)?;
                if !agrees(entry, 4 + 2 * i) {
                    void = flip_shell(void);
                }
                voids.push(void);
            }
            debug!(de = entry.de, voids = voids.len(), "IGES manifold solid");
            solids.push(Solid {
                name: format!("DE {}", entry.de),
                outer,
                voids,
            });
        }

        if solids.is_empty() {
            for entry in file.of_type(SHELL).filter(|e| e.form == 1) {
                debug!(de = entry.de, "Promoting closed shell to solid");
                solids.push(Solid {
                    name: format!("DE {}", entry.de),
                    outer: self.shell(entry.de)?,
                    voids: Vec::new(),
                });
            }
        }
        Ok(solids)
    }

    fn shell(&mut self, de: u32) -> Result<Shell> {
        let entry = self.entry(de, &[SHELL])?;
        let n = count(entry, 0, "face count")?;
        let mut faces = Vec::with_capacity(n);
        for i in 0..n {
            let face = self.face(pointer(entry, 1 + 2 * i, "face")?)?;
            faces.push(if agrees(entry, 2 + 2 * i) {
                face
            } else {
                face.flipped()
            });
        }
        Ok(Shell { faces })
    }

    fn face(&mut self, de: u32) -> Result<Face> {
        let entry = self.entry(de, &[FACE])?;
        let surface = self.surface(pointer(entry, 0, "surface")?)?;
        let n = count(entry, 1, "loop count")?;
        let mut loops = Vec::with_capacity(n);
        for i in 0..n {
            let lp = self.face_loop(pointer(entry, 3 + i, "loop")?)?;
            if !lp.edges.is_empty() {
                loops.push(lp);
            }
        }
        Ok(Face {
            surface,
            same_sense: true,
            loops,
        })
    }

    fn face_loop(&mut self, de: u32) -> Result<Loop> {
        let entry = self.entry(de, &[LOOP])?;
        let n = count(entry, 0, "edge count")?;
        let mut edges = Vec::with_capacity(n);
        let mut at = 1;
        for _ in 0..n {
            let kind = entry.int(at).ok_or_else(|| missing(entry, "edge type"))?;
            let list = pointer(entry, at + 1, "edge list")?;
            let index = count(entry, at + 2, "edge index")?;
            let forward = agrees(entry, at + 3);
            let curves = count(entry, at + 4, "parameter curve count")?;
            at += 5 + 2 * curves;

            // Vertex entries bound no area
            if kind == 1 {
                continue;
            }
            edges.push(OrientedEdge {
                edge: self.edge(list, index)?,
                forward,
            });
        }
        Ok(Loop { edges })
    }

    fn edge(&mut self, list: u32, index: usize) -> Result<u32> {
        let key = list_key(list, index);
        if let Some(edge) = self.builder.known_edge(key) {
            return Ok(edge);
        }

        let entry = self.entry(list, &[EDGE_LIST])?;
        let n = count(entry, 0, "edge count")?;
        if index == 0 || index > n {
            return Err(missing(entry, &format!("edge {}", index)));
        }
        let at = 1 + 5 * (index - 1);
        let curve_de = pointer(entry, at, "edge curve")?;
        let start = self.vertex(pointer(entry, at + 1, "start vertex list")?, count(entry, at + 2, "start vertex")?)?;
        let end = self.vertex(pointer(entry, at + 3, "end vertex list")?, count(entry, at + 4, "end vertex")?)?;
        let curve = self.curve(curve_de, start, end)?;
        Ok(self.builder.add_edge(key, Edge { start, end, curve }))
    }

    fn vertex(&mut self, list: u32, index: usize) -> Result<u32> {
        let entry = self.entry(list, &[VERTEX_LIST])?;
        let file = self.file;
        self.builder.vertex(list_key(list, index), || {
            let n = count(entry, 0, "vertex count")?;
            if index == 0 || index > n {
                return Err(missing(entry, &format!("vertex {}", index)));
            }
            let at = 1 + 3 * (index - 1);
            let p = Point3::new(
                float(entry, at, "x")?,
                float(entry, at + 1, "y")?,
                float(entry, at + 2, "z")?,
            );
            Ok(transform(file, entry.transform, 0)?.transform_point(&p))
        })
    }

    /// Model-space curve of an edge from `start` to `end`
    fn curve(&mut self, de: u32, start: u32, end: u32) -> Result<EdgeCurve> {
        let entry = self.file.require(de)?;
        let p1 = self.builder.vertex_point(start);
        let p2 = self.builder.vertex_point(end);

        match entry.entity_type {
            LINE => Ok(EdgeCurve::Line { start: p1, end: p2 }),
            CIRCULAR_ARC => {
                let z = float(entry, 0, "plane offset")?;
                let centre = Point3::new(float(entry, 1, "centre x")?, float(entry, 2, "centre y")?, z);
                let arc_start = Point3::new(float(entry, 3, "start x")?, float(entry, 4, "start y")?, z);
                let radius = (arc_start - centre).norm();
                if radius <= 0.0 {
                    return Err(Error::Degenerate(format!("circular arc DE {} has zero radius", de)));
                }

                // Definition space is the XY plane; arcs run counter-clockwise
                let local = Frame {
                    origin: centre,
                    x: Vector3::x(),
                    y: Vector3::y(),
                    z: Vector3::z(),
                };
                let frame = transform_frame(&transform(self.file, entry.transform, 0)?, &local)?;
                let t0 = frame.azimuth(&p1);
                let delta = if start == end {
                    0.0
                } else {
                    (frame.azimuth(&p2) - t0).rem_euclid(TAU)
                };
                Ok(EdgeCurve::Arc {
                    frame,
                    rx: radius,
                    ry: radius,
                    t0,
                    t1: t0 + if delta <= 1e-12 { TAU } else { delta },
                })
            }
            _ => Err(unsupported("curve", entry)),
        }
    }

    fn surface(&mut self, de: u32) -> Result<Surface> {
        let entry = self.file.require(de)?;
        let (location, axis, reference) = match entry.entity_type {
            PLANE | CYLINDER | CONE => {
                let reference_at = match entry.entity_type {
                    PLANE => 2,
                    CYLINDER => 3,
                    _ => 4,
                };
                (pointer(entry, 0, "location")?, pointer(entry, 1, "axis")?, entry.pointer(reference_at))
            }
            SPHERE => (
                pointer(entry, 0, "centre")?,
                entry.pointer(2).unwrap_or(0),
                entry.pointer(3),
            ),
            _ => return Err(unsupported("surface", entry)),
        };

        let origin = self.point(location)?;
        let z = if axis == 0 { Vector3::z() } else { self.direction(axis)? };
        let reference = match reference {
            Some(r) => Some(self.direction(r)?),
            None => None,
        };
        let frame = transform_frame(
            &transform(self.file, entry.transform, 0)?,
            &Frame::new(origin, z, reference)?,
        )?;

        let radius = |index: usize| -> Result<f64> {
            let r = float(entry, index, "radius")?;
            if r > 0.0 && r.is_finite() {
                Ok(r)
            } else {
                Err(Error::Degenerate(format!("surface DE {} has radius {}", de, r)))
            }
        };

        Ok(match entry.entity_type {
            PLANE => Surface::Plane(frame),
            CYLINDER => Surface::Cylinder {
                frame,
                radius: radius(2)?,
            },
            CONE => {
                let semi_angle = float(entry, 3, "semi angle")?.to_radians();
                if !(semi_angle > 0.0 && semi_angle < std::f64::consts::FRAC_PI_2) {
                    return Err(Error::Degenerate(format!(
                        "conical surface DE {} has semi angle {} rad",
                        de, semi_angle
                    )));
                }
                Surface::Cone {
                    frame,
                    radius: float(entry, 2, "radius")?.max(0.0),
                    semi_angle,
                }
            }
            _ => Surface::Sphere {
                frame,
                radius: radius(1)?,
            },
        })
    }

    fn point(&self, de: u32) -> Result<Point3<f64>> {
        let entry = self.entry(de, &[POINT])?;
        let p = Point3::new(float(entry, 0, "x")?, float(entry, 1, "y")?, float(entry, 2, "z")?);
        Ok(transform(self.file, entry.transform, 0)?.transform_point(&p))
    }

    fn direction(&self, de: u32) -> Result<Vector3<f64>> {
        let entry = self.entry(de, &[DIRECTION])?;
        let d = Vector3::new(float(entry, 0, "x")?, float(entry, 1, "y")?, float(entry, 2, "z")?);
        Ok(transform(self.file, entry.transform, 0)?.transform_vector(&d))
    }
}

/// Model-space matrix of a transformation entity, including the matrices it
/// is itself defined in
fn transform(file: &IgesFile, de: u32, depth: usize) -> Result<Matrix4<f64>> {
    if de == 0 {
        return Ok(Matrix4::identity());
    }
    if depth >= MAX_TRANSFORM_DEPTH {
        return Err(Error::topology(format!("transformation chain at DE {} is cyclic", de)));
    }
    let entry = file.require(de)?;
    if entry.entity_type != TRANSFORMATION {
        return Err(Error::parse(
            FORMAT,
            format!("DE {}", de),
            format!("expected a transformation matrix, found type {}", entry.entity_type),
        ));
    }

    let mut m = [0.0; 12];
    for (i, value) in m.iter_mut().enumerate() {
        *value = float(entry, i, "matrix element")?;
    }
    #[rustfmt::skip]
    let own = Matrix4::new(
        m[0], m[1], m[2], m[3],
        m[4], m[5], m[6], m[7],
        m[8], m[9], m[10], m[11],
        0.0, 0.0, 0.0, 1.0,
    );
    Ok(transform(file, entry.transform, depth + 1)? * own)
}
