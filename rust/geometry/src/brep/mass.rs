// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exact volume from the analytic boundary
//!
//! By the divergence theorem a shell encloses `V = ⅓ Σ ∫ x·n dA`. For each
//! face the integral is split about a reference point `C` of its surface:
//!
//! ```text
//! ∫ x·n dA = ∫ (x - C)·n dA + C · ½∮ x × dx
//! ```
//!
//! The first term vanishes for planes and cones (with `C` on the plane or at
//! the apex). For cylinders and spheres it is proportional to the face area,
//! which is itself a boundary integral in the surface's angular coordinates.
//! Everything reduces to closed forms or Gauss-Legendre quadrature over the
//! edge curves, so the tessellation never enters the result.

use std::f64::consts::PI;

use nalgebra::{Point3, Vector3};
use tracing::debug;

use super::geom::{wrap_angle, EdgeCurve, Frame, Surface};
use super::model::{BrepModel, Face, Loop, Shell};
use crate::error::{Error, Result};
use crate::volume::to_cm3;

/// 8-point Gauss-Legendre nodes and weights on `[-1, 1]`
const GAUSS_LEGENDRE_8: [(f64, f64); 8] = [
    (-0.960_289_856_497_536_3, 0.101_228_536_290_376_26),
    (-0.796_666_477_413_626_7, 0.222_381_034_453_374_47),
    (-0.525_532_409_916_329_0, 0.313_706_645_877_887_3),
    (-0.183_434_642_495_649_8, 0.362_683_783_378_362_0),
    (0.183_434_642_495_649_8, 0.362_683_783_378_362_0),
    (0.525_532_409_916_329_0, 0.313_706_645_877_887_3),
    (0.796_666_477_413_626_7, 0.222_381_034_453_374_47),
    (0.960_289_856_497_536_3, 0.101_228_536_290_376_26),
];

/// Volume summary of a BRep model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassProperties {
    /// Cubic model units
    pub volume: f64,
    pub volume_cm3: f64,
    pub solids: usize,
    pub faces: usize,
}

/// `∫ f(x, x') dt` along a curve in its own direction
fn integrate_curve(curve: &EdgeCurve, f: &impl Fn(&Point3<f64>, &Vector3<f64>) -> f64) -> f64 {
    curve
        .pieces()
        .iter()
        .map(|piece| {
            GAUSS_LEGENDRE_8
                .iter()
                .map(|&(node, weight)| {
                    let (x, dx) = piece.eval(0.5 * (node + 1.0));
                    0.5 * weight * f(&x, &dx)
                })
                .sum::<f64>()
        })
        .sum()
}

/// `∮ f(x, x') dt` around a loop as traversed
fn integrate_loop(model: &BrepModel, lp: &Loop, f: &impl Fn(&Point3<f64>, &Vector3<f64>) -> f64) -> f64 {
    lp.edges
        .iter()
        .map(|oe| {
            let value = integrate_curve(&model.edge(oe.edge).curve, f);
            if oe.forward {
                value
            } else {
                -value
            }
        })
        .sum()
}

/// `∫ n dA` of a face, as `½ ∮ x × dx` over its loops
pub fn face_area_vector(model: &BrepModel, face: &Face) -> Vector3<f64> {
    face.loops
        .iter()
        .flat_map(|lp| lp.edges.iter())
        .map(|oe| {
            let a = model.edge(oe.edge).curve.area_vector();
            if oe.forward {
                a
            } else {
                -a
            }
        })
        .sum()
}

/// Rate of change of the azimuth about `frame.z` along `dx` at `x`
#[inline]
fn azimuth_rate(frame: &Frame, x: &Point3<f64>, dx: &Vector3<f64>) -> f64 {
    let d = x - frame.origin;
    let perp = d - frame.z * d.dot(&frame.z);
    let r2 = perp.norm_squared();
    if r2 <= f64::MIN_POSITIVE {
        return 0.0;
    }
    perp.cross(dx).dot(&frame.z) / r2
}

/// Point on an oriented edge at a fraction of the way along it
fn oriented_point(model: &BrepModel, edge: u32, forward: bool, s: f64) -> Point3<f64> {
    let curve = &model.edge(edge).curve;
    curve.point_at(if forward { s } else { 1.0 - s })
}

/// Signed area measure `∮ R²(1 - sin φ) dθ` of a spherical face, with the
/// sweep across the south pole added where a loop passes through it
fn sphere_area_measure(model: &BrepModel, face: &Face, frame: &Frame, radius: f64) -> f64 {
    let r2 = radius * radius;
    let mut measure = 0.0;
    let south = frame.origin - frame.z * radius;
    let tolerance = 1e-7 * radius.max(1.0);

    for lp in &face.loops {
        measure += integrate_loop(model, lp, &|x, dx| {
            let sin_phi = ((x - frame.origin).dot(&frame.z) / radius).clamp(-1.0, 1.0);
            r2 * (1.0 - sin_phi) * azimuth_rate(frame, x, dx)
        });

        // 1 - sin φ is 2 at the south pole, where θ jumps between edges
        let n = lp.edges.len();
        for i in 0..n {
            let incoming = lp.edges[i];
            let outgoing = lp.edges[(i + 1) % n];
            let junction = oriented_point(model, incoming.edge, incoming.forward, 1.0);
            if (junction - south).norm() > tolerance {
                continue;
            }
            let before = oriented_point(model, incoming.edge, incoming.forward, 1.0 - 1e-4);
            let after = oriented_point(model, outgoing.edge, outgoing.forward, 1e-4);
            measure += 2.0 * r2 * wrap_angle(frame.azimuth(&after) - frame.azimuth(&before));
        }
    }
    measure
}

/// Reduce a signed spherical area into `(0, 4πR²]` for outward faces and
/// `[-4πR², 0)` for reversed ones; loops encircling the pole differ by
/// whole spheres
fn reduce_sphere_measure(measure: f64, radius: f64, same_sense: bool) -> f64 {
    let full = 4.0 * PI * radius * radius;
    let mut m = measure.rem_euclid(full);
    // Rounding noise around a whole sphere
    if m < 1e-12 * full {
        m = 0.0;
    } else if full - m < 1e-12 * full {
        m = full;
    }
    if same_sense {
        if m == 0.0 {
            full
        } else {
            m
        }
    } else if m == full || m == 0.0 {
        -full
    } else {
        m - full
    }
}

/// `∫ x·n dA` over one face
pub fn face_flux(model: &BrepModel, face: &Face) -> f64 {
    let area_vector = face_area_vector(model, face);
    match &face.surface {
        Surface::Plane(frame) => frame.origin.coords.dot(&area_vector),
        Surface::Cone { .. } => face
            .surface
            .apex()
            .map(|apex| apex.coords.dot(&area_vector))
            .unwrap_or(0.0),
        Surface::Cylinder { frame, radius } => {
            // r² ∮ -h dθ: the area in (θ, h) scaled by r, signed by orientation
            let param_area: f64 = face
                .loops
                .iter()
                .map(|lp| {
                    integrate_loop(model, lp, &|x, dx| {
                        -(x - frame.origin).dot(&frame.z) * azimuth_rate(frame, x, dx)
                    })
                })
                .sum();
            radius * radius * param_area + frame.origin.coords.dot(&area_vector)
        }
        Surface::Sphere { frame, radius } => {
            let measure = sphere_area_measure(model, face, frame, *radius);
            let signed_area = reduce_sphere_measure(measure, *radius, face.same_sense);
            radius * signed_area + frame.origin.coords.dot(&area_vector)
        }
    }
}

/// Signed volume enclosed by a shell; positive when its faces point outward
pub fn shell_volume(model: &BrepModel, shell: &Shell) -> f64 {
    shell.faces.iter().map(|face| face_flux(model, face)).sum::<f64>() / 3.0
}

/// Volume of every solid (outer shell less its voids), in cubic model units
pub fn mass_properties(model: &BrepModel) -> Result<MassProperties> {
    if model.solids.is_empty() {
        return Err(Error::NoSolid("model contains no solids".to_string()));
    }

    let mut total = 0.0;
    for solid in &model.solids {
        let outer = shell_volume(model, &solid.outer).abs();
        let voids: f64 = solid
            .voids
            .iter()
            .map(|shell| shell_volume(model, shell).abs())
            .sum();
        debug!(
            solid = %solid.name,
            faces = solid.outer.faces.len(),
            outer,
            voids,
            "Solid volume"
        );
        total += outer - voids;
    }

    if !total.is_finite() || total <= 0.0 {
        return Err(Error::Degenerate(format!(
            "solid volume is {} model units³",
            total
        )));
    }

    Ok(MassProperties {
        volume: total,
        volume_cm3: to_cm3(total, model.unit_scale_mm),
        solids: model.solids.len(),
        faces: model.face_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brep::geom::Frame;
    use crate::brep::model::{BrepBuilder, Edge, OrientedEdge, Solid};
    use approx::assert_relative_eq;
    use std::f64::consts::TAU;

    fn circle(builder: &mut BrepBuilder, key: u64, frame: Frame, radius: f64, forward_ccw: bool) -> u32 {
        let v = builder
            .vertex(key, || Ok(frame.point(radius, 0.0, 0.0)))
            .unwrap();
        builder.add_edge(
            key,
            Edge {
                start: v,
                end: v,
                curve: EdgeCurve::Arc {
                    frame,
                    rx: radius,
                    ry: radius,
                    t0: 0.0,
                    t1: if forward_ccw { TAU } else { -TAU },
                },
            },
        )
    }

    fn one_loop(edge: u32, forward: bool) -> Loop {
        Loop {
            edges: vec![OrientedEdge { edge, forward }],
        }
    }

    /// Cylinder r, h along z built from two circles (no seam)
    fn cylinder_model(r: f64, h: f64, base: Point3<f64>) -> BrepModel {
        let mut builder = BrepBuilder::new();
        let bottom_frame = Frame::new(base, Vector3::z(), None).unwrap();
        let top_frame = Frame::new(base + Vector3::z() * h, Vector3::z(), None).unwrap();
        let bottom = circle(&mut builder, 1, bottom_frame, r, true);
        let top = circle(&mut builder, 2, top_frame, r, true);

        let faces = vec![
            // Bottom cap, normal -z: circle runs clockwise seen from +z
            Face {
                surface: Surface::Plane(bottom_frame),
                same_sense: false,
                loops: vec![one_loop(bottom, false)],
            },
            Face {
                surface: Surface::Plane(top_frame),
                same_sense: true,
                loops: vec![one_loop(top, true)],
            },
            Face {
                surface: Surface::Cylinder {
                    frame: bottom_frame,
                    radius: r,
                },
                same_sense: true,
                loops: vec![one_loop(bottom, true), one_loop(top, false)],
            },
        ];
        let solids = vec![Solid {
            name: "cylinder".into(),
            outer: Shell { faces },
            voids: Vec::new(),
        }];
        builder.finish(solids, 1.0)
    }

    #[test]
    fn test_cylinder_volume() {
        let model = cylinder_model(5.0, 10.0, Point3::new(3.0, -7.0, 11.0));
        let props = mass_properties(&model).unwrap();
        assert_relative_eq!(props.volume, PI * 25.0 * 10.0, max_relative = 1e-10);
        assert_relative_eq!(props.volume_cm3, PI * 0.25, max_relative = 1e-10);
        assert_eq!(props.faces, 3);
    }

    #[test]
    fn test_reversed_shell_is_measured_by_magnitude() {
        let mut model = cylinder_model(2.0, 3.0, Point3::origin());
        let faces = model.solids[0].outer.faces.iter().map(Face::flipped).collect();
        model.solids[0].outer.faces = faces;
        assert!(shell_volume(&model, &model.solids[0].outer) < 0.0);
        let props = mass_properties(&model).unwrap();
        assert_relative_eq!(props.volume, PI * 12.0, max_relative = 1e-10);
    }

    #[test]
    fn test_hemisphere_volume() {
        let r = 4.0;
        let mut builder = BrepBuilder::new();
        let frame = Frame::new(Point3::new(1.0, 2.0, 3.0), Vector3::z(), None).unwrap();
        let equator = circle(&mut builder, 1, frame, r, true);
        let faces = vec![
            Face {
                surface: Surface::Sphere { frame, radius: r },
                same_sense: true,
                loops: vec![one_loop(equator, true)],
            },
            Face {
                surface: Surface::Plane(frame),
                same_sense: false,
                loops: vec![one_loop(equator, false)],
            },
        ];
        let model = builder.finish(
            vec![Solid {
                name: "dome".into(),
                outer: Shell { faces },
                voids: Vec::new(),
            }],
            1.0,
        );
        let props = mass_properties(&model).unwrap();
        assert_relative_eq!(props.volume, 2.0 / 3.0 * PI * r * r * r, max_relative = 1e-10);
    }

    #[test]
    fn test_full_sphere_with_void() {
        let frame = Frame::world();
        let outer = Face {
            surface: Surface::Sphere { frame, radius: 3.0 },
            same_sense: true,
            loops: Vec::new(),
        };
        let inner = Face {
            surface: Surface::Sphere { frame, radius: 1.0 },
            same_sense: false,
            loops: Vec::new(),
        };
        let model = BrepBuilder::new().finish(
            vec![Solid {
                name: "hollow".into(),
                outer: Shell { faces: vec![outer] },
                voids: vec![Shell { faces: vec![inner] }],
            }],
            10.0,
        );
        let props = mass_properties(&model).unwrap();
        let expected = 4.0 / 3.0 * PI * (27.0 - 1.0);
        assert_relative_eq!(props.volume, expected, max_relative = 1e-12);
        assert_relative_eq!(props.volume_cm3, expected, max_relative = 1e-12);
    }

    #[test]
    fn test_cone_volume() {
        // Apex at z = 6 above a base circle of radius 3 at z = 0
        let r = 3.0;
        let h = 6.0;
        let mut builder = BrepBuilder::new();
        let base = Frame::world();
        let rim = circle(&mut builder, 1, base, r, true);
        let semi_angle = (r / h).atan();
        // Surface frame points down so the cone opens towards -z from its apex
        let cone_frame = Frame::new(Point3::origin(), -Vector3::z(), Some(Vector3::x())).unwrap();
        let faces = vec![
            Face {
                surface: Surface::Plane(base),
                same_sense: false,
                loops: vec![one_loop(rim, false)],
            },
            Face {
                surface: Surface::Cone {
                    frame: cone_frame,
                    radius: r,
                    semi_angle,
                },
                same_sense: true,
                loops: vec![one_loop(rim, true)],
            },
        ];
        assert_relative_eq!(
            faces[1].surface.apex().unwrap(),
            Point3::new(0.0, 0.0, h),
            epsilon = 1e-12
        );
        let model = builder.finish(
            vec![Solid {
                name: "cone".into(),
                outer: Shell { faces },
                voids: Vec::new(),
            }],
            1.0,
        );
        let props = mass_properties(&model).unwrap();
        assert_relative_eq!(props.volume, PI * r * r * h / 3.0, max_relative = 1e-10);
    }

    #[test]
    fn test_sphere_measure_reduction() {
        let full = 4.0 * PI;
        assert_relative_eq!(reduce_sphere_measure(0.0, 1.0, true), full);
        assert_relative_eq!(reduce_sphere_measure(0.0, 1.0, false), -full);
        assert_relative_eq!(reduce_sphere_measure(-2.0 * PI, 1.0, true), 2.0 * PI);
        assert_relative_eq!(reduce_sphere_measure(2.0 * PI + full, 1.0, false), -2.0 * PI);
    }

    #[test]
    fn test_empty_model() {
        let model = BrepBuilder::new().finish(Vec::new(), 1.0);
        assert!(matches!(mass_properties(&model), Err(Error::NoSolid(_))));
    }
}
