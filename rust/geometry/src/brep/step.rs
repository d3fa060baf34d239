// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! STEP (ISO 10303-21) to BRep transfer
//!
//! Walks the solids of a Part 21 document through their shells, faces, loops
//! and edges and builds a [`BrepModel`] with shared vertices and edges.
//! Elementary surfaces and conic or polygonal edge curves are supported; any
//! other geometry referenced by a solid is reported as unsupported.

use std::f64::consts::TAU;
use std::sync::Arc;

use nalgebra::{Point3, Vector3};
use solidvol_core::{
    extract_length_unit_scale, extract_plane_angle_scale, DecodedEntity, EntityDecoder,
};
use tracing::{debug, info};

use super::geom::{EdgeCurve, Frame, Surface};
use super::model::{BrepBuilder, BrepModel, Edge, Face, Loop, OrientedEdge, Shell, Solid};
use crate::error::{Error, Result};
use crate::triangulation::newell_normal;

const FORMAT: &str = "STEP";

/// Deepest chain of oriented or curve wrappers followed before giving up
const MAX_NESTING: usize = 32;

/// Read every solid of a STEP document
pub fn read_step(content: &str, source: &str) -> Result<BrepModel> {
    let decoder = EntityDecoder::new(content)?;
    let mut transfer = StepTransfer::new(decoder)?;
    let solids = transfer.solids()?;
    if solids.is_empty() {
        return Err(Error::NoSolid(format!("{} has no solid or closed shell", source)));
    }

    let unit_scale_mm = extract_length_unit_scale(&mut transfer.decoder)?;
    let model = transfer.builder.finish(solids, unit_scale_mm);
    info!(
        source,
        solids = model.solids.len(),
        faces = model.face_count(),
        edges = model.edges.len(),
        unit_scale_mm,
        "Transferred STEP solids"
    );
    Ok(model)
}

fn missing(entity: &DecodedEntity, what: &str) -> Error {
    Error::parse(
        FORMAT,
        format!("#{}", entity.id),
        format!("{} is missing {}", entity.type_name(), what),
    )
}

/// A topology slot refers to an entity that cannot fill it
fn wrong_type(expected: &str, entity: &DecodedEntity) -> Error {
    Error::parse(
        FORMAT,
        format!("#{}", entity.id),
        format!("expected {}, found {}", expected, entity.type_name()),
    )
}

fn unsupported(kind: &'static str, entity: &DecodedEntity) -> Error {
    Error::unsupported(kind, format!("{} #{}", entity.type_name(), entity.id))
}

fn attr_ref(entity: &DecodedEntity, index: usize, what: &str) -> Result<u32> {
    entity.get_ref(index).ok_or_else(|| missing(entity, what))
}

fn attr_float(entity: &DecodedEntity, index: usize, what: &str) -> Result<f64> {
    entity.get_float(index).ok_or_else(|| missing(entity, what))
}

/// Logical attribute; `.U.` and unset values read as true
fn attr_sense(entity: &DecodedEntity, index: usize) -> bool {
    entity.get_bool(index).unwrap_or(true)
}

fn label(entity: &DecodedEntity) -> String {
    match entity.get(0).and_then(|v| v.as_string()) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("#{}", entity.id),
    }
}

/// Angle of `p` in the parametrisation `rx·cos t, ry·sin t` of `frame`
fn conic_param(frame: &Frame, rx: f64, ry: f64, p: &Point3<f64>) -> f64 {
    let local = frame.local(p);
    (local.y / ry).atan2(local.x / rx)
}

struct StepTransfer<'a> {
    decoder: EntityDecoder<'a>,
    builder: BrepBuilder,
    /// Radians per plane angle unit
    angle_scale: f64,
    /// Wrapper entities currently being resolved, outermost first
    resolving: Vec<u32>,
}

impl<'a> StepTransfer<'a> {
    fn new(mut decoder: EntityDecoder<'a>) -> Result<Self> {
        let angle_scale = extract_plane_angle_scale(&mut decoder)?;
        Ok(Self {
            decoder,
            builder: BrepBuilder::new(),
            angle_scale,
            resolving: Vec::new(),
        })
    }

    /// Resolve a reference held by wrapper `id`, refusing cycles and
    /// unbounded chains
    fn nested<T>(&mut self, id: u32, resolve: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.resolving.contains(&id) {
            return Err(Error::parse(FORMAT, format!("#{}", id), "cyclic reference"));
        }
        if self.resolving.len() >= MAX_NESTING {
            return Err(Error::parse(
                FORMAT,
                format!("#{}", id),
                format!("references nested deeper than {}", MAX_NESTING),
            ));
        }
        self.resolving.push(id);
        let resolved = resolve(self);
        self.resolving.pop();
        resolved
    }

    fn entity(&mut self, id: u32) -> Result<Arc<DecodedEntity>> {
        Ok(self.decoder.decode_by_id(id)?)
    }

    fn solids(&mut self) -> Result<Vec<Solid>> {
        let mut roots = Vec::new();
        for type_name in ["MANIFOLD_SOLID_BREP", "BREP_WITH_VOIDS", "FACETED_BREP"] {
            roots.extend(self.decoder.find_by_type(type_name)?);
        }
        roots.sort_unstable();
        roots.dedup();

        let mut solids = Vec::with_capacity(roots.len());
        for id in roots {
            let entity = self.entity(id)?;
            let outer = self.shell(attr_ref(&entity, 1, "outer shell")?)?;
            let mut voids = Vec::new();
            if entity.has_type("BREP_WITH_VOIDS") {
                for void in entity.get(2).map(|v| v.ref_list()).unwrap_or_default() {
                    voids.push(self.shell(void)?);
                }
            }
            debug!(id, voids = voids.len(), "STEP solid");
            solids.push(Solid {
                name: label(&entity),
                outer,
                voids,
            });
        }

        if solids.is_empty() {
            // Shells without a solid wrapper still bound a volume
            for id in self.decoder.find_by_type("CLOSED_SHELL")? {
                let entity = self.entity(id)?;
                if entity.type_name() != "CLOSED_SHELL" {
                    continue;
                }
                debug!(id, "Promoting closed shell to solid");
                solids.push(Solid {
                    name: label(&entity),
                    outer: self.shell(id)?,
                    voids: Vec::new(),
                });
            }
        }
        Ok(solids)
    }

    fn shell(&mut self, id: u32) -> Result<Shell> {
        let entity = self.entity(id)?;
        match entity.type_name() {
            "CLOSED_SHELL" | "OPEN_SHELL" => {
                let face_ids = entity
                    .get(1)
                    .map(|v| v.ref_list())
                    .ok_or_else(|| missing(&entity, "faces"))?;
                let mut faces = Vec::with_capacity(face_ids.len());
                for face_id in face_ids {
                    faces.push(self.face(face_id)?);
                }
                Ok(Shell { faces })
            }
            "ORIENTED_CLOSED_SHELL" => {
                let element = attr_ref(&entity, 2, "shell element")?;
                let shell = self.nested(id, |t| t.shell(element))?;
                Ok(if attr_sense(&entity, 3) {
                    shell
                } else {
                    Shell {
                        faces: shell.faces.iter().map(Face::flipped).collect(),
                    }
                })
            }
            _ => Err(wrong_type("a shell", &entity)),
        }
    }

    fn face(&mut self, id: u32) -> Result<Face> {
        let entity = self.entity(id)?;
        match entity.type_name() {
            "ADVANCED_FACE" | "FACE_SURFACE" => {
                let loops = self.bounds(&entity)?;
                let surface = self.surface(attr_ref(&entity, 2, "face geometry")?)?;
                Ok(Face {
                    surface,
                    same_sense: attr_sense(&entity, 3),
                    loops,
                })
            }
            "FACE" => {
                let loops = self.bounds(&entity)?;
                let outer = loops
                    .iter()
                    .max_by(|a, b| {
                        let area = |lp: &Loop| newell_normal(&self.loop_corners(lp)).norm();
                        area(a).total_cmp(&area(b))
                    })
                    .ok_or_else(|| missing(&entity, "bounds"))?;
                let plane = self.builder.newell_plane(outer)?;
                Ok(Face {
                    surface: Surface::Plane(plane),
                    same_sense: true,
                    loops,
                })
            }
            "ORIENTED_FACE" => {
                let element = attr_ref(&entity, 2, "face element")?;
                let face = self.nested(id, |t| t.face(element))?;
                Ok(if attr_sense(&entity, 3) {
                    face
                } else {
                    face.flipped()
                })
            }
            _ => Err(wrong_type("a face", &entity)),
        }
    }

    fn loop_corners(&self, lp: &Loop) -> Vec<Point3<f64>> {
        lp.edges
            .iter()
            .map(|oe| {
                let curve = self.builder.edge_curve(oe.edge);
                if oe.forward {
                    curve.start()
                } else {
                    curve.end()
                }
            })
            .collect()
    }

    fn bounds(&mut self, face: &DecodedEntity) -> Result<Vec<Loop>> {
        let bound_ids = face
            .get(1)
            .map(|v| v.ref_list())
            .ok_or_else(|| missing(face, "bounds"))?;

        let mut loops = Vec::with_capacity(bound_ids.len());
        for id in bound_ids {
            let bound = self.entity(id)?;
            if !matches!(bound.type_name(), "FACE_OUTER_BOUND" | "FACE_BOUND") {
                return Err(wrong_type("a face bound", &bound));
            }
            let Some(lp) = self.face_loop(attr_ref(&bound, 1, "loop")?)? else {
                continue;
            };
            loops.push(if attr_sense(&bound, 2) { lp } else { lp.reversed() });
        }
        Ok(loops)
    }

    /// Loop of a bound; vertex loops carry no area and are skipped
    fn face_loop(&mut self, id: u32) -> Result<Option<Loop>> {
        let entity = self.entity(id)?;
        match entity.type_name() {
            "EDGE_LOOP" => {
                let edge_ids = entity
                    .get(1)
                    .map(|v| v.ref_list())
                    .ok_or_else(|| missing(&entity, "edges"))?;
                let mut edges = Vec::with_capacity(edge_ids.len());
                for edge_id in edge_ids {
                    edges.push(self.oriented_edge(edge_id)?);
                }
                Ok(Some(Loop { edges }))
            }
            "POLY_LOOP" => {
                let point_ids = entity
                    .get(1)
                    .map(|v| v.ref_list())
                    .ok_or_else(|| missing(&entity, "polygon"))?;
                let mut corners = Vec::with_capacity(point_ids.len());
                for point_id in point_ids {
                    let p = self.point(point_id)?;
                    corners.push(self.builder.vertex(point_id as u64, || Ok(p))?);
                }
                // Closing point repeated by some writers
                if corners.len() > 1 && corners.first() == corners.last() {
                    corners.pop();
                }
                let n = corners.len();
                let edges = (0..n)
                    .map(|i| self.builder.line_between(corners[i], corners[(i + 1) % n]))
                    .collect();
                Ok(Some(Loop { edges }))
            }
            "VERTEX_LOOP" => Ok(None),
            _ => Err(wrong_type("a loop", &entity)),
        }
    }

    fn oriented_edge(&mut self, id: u32) -> Result<OrientedEdge> {
        let entity = self.entity(id)?;
        match entity.type_name() {
            "ORIENTED_EDGE" => {
                let element = attr_ref(&entity, 3, "edge element")?;
                let inner = self.nested(id, |t| t.oriented_edge(element))?;
                Ok(OrientedEdge {
                    edge: inner.edge,
                    forward: inner.forward == attr_sense(&entity, 4),
                })
            }
            "EDGE_CURVE" => Ok(OrientedEdge {
                edge: self.edge_curve(&entity)?,
                forward: true,
            }),
            _ => Err(wrong_type("an edge", &entity)),
        }
    }

    fn edge_curve(&mut self, entity: &DecodedEntity) -> Result<u32> {
        let key = entity.id as u64;
        if let Some(edge) = self.builder.known_edge(key) {
            return Ok(edge);
        }

        let start = self.vertex(attr_ref(entity, 1, "start vertex")?)?;
        let end = self.vertex(attr_ref(entity, 2, "end vertex")?)?;
        let curve = self.curve(
            attr_ref(entity, 3, "edge geometry")?,
            start,
            end,
            attr_sense(entity, 4),
        )?;
        Ok(self.builder.add_edge(key, Edge { start, end, curve }))
    }

    fn vertex(&mut self, id: u32) -> Result<u32> {
        let entity = self.entity(id)?;
        if entity.type_name() != "VERTEX_POINT" {
            return Err(wrong_type("a vertex", &entity));
        }
        let p = self.point(attr_ref(&entity, 1, "point")?)?;
        self.builder.vertex(id as u64, || Ok(p))
    }

    /// Edge geometry between two vertices; `same_sense` tells whether the
    /// edge runs along the curve's own direction
    fn curve(&mut self, id: u32, start: u32, end: u32, same_sense: bool) -> Result<EdgeCurve> {
        let entity = self.entity(id)?;
        let p1 = self.builder.vertex_point(start);
        let p2 = self.builder.vertex_point(end);

        match entity.type_name() {
            "LINE" => Ok(EdgeCurve::Line { start: p1, end: p2 }),
            "CIRCLE" | "ELLIPSE" => {
                let frame = self.placement(attr_ref(&entity, 1, "position")?)?;
                let rx = attr_float(&entity, 2, "radius")?;
                let ry = if entity.type_name() == "ELLIPSE" {
                    attr_float(&entity, 3, "second semi axis")?
                } else {
                    rx
                };
                if rx <= 0.0 || ry <= 0.0 {
                    return Err(Error::Degenerate(format!(
                        "{} #{} has a non-positive radius",
                        entity.type_name(),
                        id
                    )));
                }

                let t0 = conic_param(&frame, rx, ry, &p1);
                let delta = if start == end {
                    0.0
                } else {
                    (conic_param(&frame, rx, ry, &p2) - t0).rem_euclid(TAU)
                };
                let span = match (same_sense, delta <= 1e-12) {
                    (true, true) => TAU,
                    (true, false) => delta,
                    (false, true) => -TAU,
                    (false, false) => delta - TAU,
                };
                Ok(EdgeCurve::Arc {
                    frame,
                    rx,
                    ry,
                    t0,
                    t1: t0 + span,
                })
            }
            "POLYLINE" => {
                let point_ids = entity
                    .get(1)
                    .map(|v| v.ref_list())
                    .ok_or_else(|| missing(&entity, "points"))?;
                let mut points = Vec::with_capacity(point_ids.len());
                for point_id in point_ids {
                    points.push(self.point(point_id)?);
                }
                if points.len() < 2 {
                    return Err(missing(&entity, "at least two points"));
                }
                if !same_sense {
                    points.reverse();
                }
                // End points coincide with the vertices up to file precision
                if let Some(first) = points.first_mut() {
                    *first = p1;
                }
                if let Some(last) = points.last_mut() {
                    *last = p2;
                }
                Ok(EdgeCurve::Polyline(points))
            }
            "SURFACE_CURVE" | "SEAM_CURVE" => {
                let curve_3d = attr_ref(&entity, 1, "3D curve")?;
                self.nested(id, |t| t.curve(curve_3d, start, end, same_sense))
            }
            _ => Err(unsupported("curve", &entity)),
        }
    }

    fn surface(&mut self, id: u32) -> Result<Surface> {
        let entity = self.entity(id)?;
        let frame = match entity.type_name() {
            "PLANE" | "CYLINDRICAL_SURFACE" | "CONICAL_SURFACE" | "SPHERICAL_SURFACE" => {
                self.placement(attr_ref(&entity, 1, "position")?)?
            }
            _ => return Err(unsupported("surface", &entity)),
        };

        let positive = |value: f64, what: &str| {
            if value > 0.0 && value.is_finite() {
                Ok(value)
            } else {
                Err(Error::Degenerate(format!(
                    "{} #{} has {} {}",
                    entity.type_name(),
                    id,
                    what,
                    value
                )))
            }
        };

        Ok(match entity.type_name() {
            "PLANE" => Surface::Plane(frame),
            "CYLINDRICAL_SURFACE" => Surface::Cylinder {
                frame,
                radius: positive(attr_float(&entity, 2, "radius")?, "radius")?,
            },
            "CONICAL_SURFACE" => {
                let semi_angle = attr_float(&entity, 3, "semi angle")? * self.angle_scale;
                if !(semi_angle > 0.0 && semi_angle < std::f64::consts::FRAC_PI_2) {
                    return Err(Error::Degenerate(format!(
                        "CONICAL_SURFACE #{} has semi angle {} rad",
                        id, semi_angle
                    )));
                }
                Surface::Cone {
                    frame,
                    // A zero radius puts the placement at the apex
                    radius: attr_float(&entity, 2, "radius")?.max(0.0),
                    semi_angle,
                }
            }
            _ => Surface::Sphere {
                frame,
                radius: positive(attr_float(&entity, 2, "radius")?, "radius")?,
            },
        })
    }

    fn placement(&mut self, id: u32) -> Result<Frame> {
        let entity = self.entity(id)?;
        if entity.type_name() != "AXIS2_PLACEMENT_3D" {
            return Err(wrong_type("an axis placement", &entity));
        }
        let origin = self.point(attr_ref(&entity, 1, "location")?)?;
        let axis = match entity.get_ref(2) {
            Some(d) => self.direction(d)?,
            None => Vector3::z(),
        };
        let reference = match entity.get_ref(3) {
            Some(d) => Some(self.direction(d)?),
            None => None,
        };
        Frame::new(origin, axis, reference)
    }

    fn point(&mut self, id: u32) -> Result<Point3<f64>> {
        let entity = self.entity(id)?;
        if entity.type_name() != "CARTESIAN_POINT" {
            return Err(wrong_type("a point", &entity));
        }
        let [x, y, z] = entity
            .get(1)
            .and_then(|v| v.as_coords())
            .ok_or_else(|| missing(&entity, "coordinates"))?;
        Ok(Point3::new(x, y, z))
    }

    fn direction(&mut self, id: u32) -> Result<Vector3<f64>> {
        let entity = self.entity(id)?;
        if entity.type_name() != "DIRECTION" {
            return Err(wrong_type("a direction", &entity));
        }
        let [x, y, z] = entity
            .get(1)
            .and_then(|v| v.as_coords())
            .ok_or_else(|| missing(&entity, "direction ratios"))?;
        Ok(Vector3::new(x, y, z))
    }
}
