// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Analytic surfaces and edge curves

use std::f64::consts::{FRAC_PI_4, PI, TAU};

use nalgebra::{Point3, Vector3};
use smallvec::SmallVec;

use crate::error::{Error, Result};

/// Largest parameter span of one integration piece of an arc
const MAX_PIECE_ANGLE: f64 = PI / 16.0;

/// Right-handed orthonormal placement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub origin: Point3<f64>,
    pub x: Vector3<f64>,
    pub y: Vector3<f64>,
    pub z: Vector3<f64>,
}

impl Frame {
    /// Frame from a main axis and an optional reference direction; the
    /// reference is made orthogonal to the axis, or chosen when absent
    pub fn new(origin: Point3<f64>, axis: Vector3<f64>, reference: Option<Vector3<f64>>) -> Result<Self> {
        let z = axis
            .try_normalize(1e-12)
            .ok_or_else(|| Error::Degenerate("placement axis has zero length".to_string()))?;

        let x = reference
            .and_then(|r| (r - z * r.dot(&z)).try_normalize(1e-9))
            .unwrap_or_else(|| {
                // Axis least parallel to z
                let helper = if z.x.abs() <= z.y.abs() && z.x.abs() <= z.z.abs() {
                    Vector3::x()
                } else if z.y.abs() <= z.z.abs() {
                    Vector3::y()
                } else {
                    Vector3::z()
                };
                (helper - z * helper.dot(&z)).normalize()
            });

        Ok(Self {
            origin,
            x,
            y: z.cross(&x),
            z,
        })
    }

    pub fn world() -> Self {
        Self {
            origin: Point3::origin(),
            x: Vector3::x(),
            y: Vector3::y(),
            z: Vector3::z(),
        }
    }

    /// Coordinates of `p` in this frame
    #[inline]
    pub fn local(&self, p: &Point3<f64>) -> Vector3<f64> {
        let d = p - self.origin;
        Vector3::new(d.dot(&self.x), d.dot(&self.y), d.dot(&self.z))
    }

    #[inline]
    pub fn point(&self, u: f64, v: f64, w: f64) -> Point3<f64> {
        self.origin + self.x * u + self.y * v + self.z * w
    }

    /// Angle of `p` about the frame's z axis, measured from x
    #[inline]
    pub fn azimuth(&self, p: &Point3<f64>) -> f64 {
        let d = p - self.origin;
        d.dot(&self.y).atan2(d.dot(&self.x))
    }
}

/// Elementary surface of a face
#[derive(Debug, Clone, PartialEq)]
pub enum Surface {
    Plane(Frame),
    Cylinder { frame: Frame, radius: f64 },
    /// `radius` is measured in the frame's xy plane, `semi_angle` in radians
    Cone {
        frame: Frame,
        radius: f64,
        semi_angle: f64,
    },
    Sphere { frame: Frame, radius: f64 },
}

impl Surface {
    pub fn frame(&self) -> &Frame {
        match self {
            Surface::Plane(frame)
            | Surface::Cylinder { frame, .. }
            | Surface::Cone { frame, .. }
            | Surface::Sphere { frame, .. } => frame,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Surface::Plane(_) => "plane",
            Surface::Cylinder { .. } => "cylinder",
            Surface::Cone { .. } => "cone",
            Surface::Sphere { .. } => "sphere",
        }
    }

    /// Apex of a cone
    pub fn apex(&self) -> Option<Point3<f64>> {
        match self {
            Surface::Cone {
                frame,
                radius,
                semi_angle,
            } => Some(frame.origin - frame.z * (radius / semi_angle.tan())),
            _ => None,
        }
    }

    /// Unit normal in the surface's own sense (`∂u × ∂v`) at a point on it
    pub fn normal_at(&self, p: &Point3<f64>) -> Vector3<f64> {
        match self {
            Surface::Plane(frame) => frame.z,
            Surface::Cylinder { frame, .. } => {
                let d = p - frame.origin;
                (d - frame.z * d.dot(&frame.z))
                    .try_normalize(1e-12)
                    .unwrap_or(frame.x)
            }
            Surface::Cone {
                frame, semi_angle, ..
            } => {
                let d = p - frame.origin;
                let radial = (d - frame.z * d.dot(&frame.z))
                    .try_normalize(1e-12)
                    .unwrap_or(frame.x);
                (radial * semi_angle.cos() - frame.z * semi_angle.sin()).normalize()
            }
            Surface::Sphere { frame, .. } => (p - frame.origin)
                .try_normalize(1e-12)
                .unwrap_or(frame.z),
        }
    }
}

/// Geometry of an edge, parametrised from the edge's start vertex to its end
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeCurve {
    Line {
        start: Point3<f64>,
        end: Point3<f64>,
    },
    /// `origin + rx·cos t·x + ry·sin t·y` for `t` from `t0` to `t1`; the
    /// sign of `t1 - t0` gives the direction of travel
    Arc {
        frame: Frame,
        rx: f64,
        ry: f64,
        t0: f64,
        t1: f64,
    },
    /// Vertices including both end points
    Polyline(Vec<Point3<f64>>),
}

/// Smooth span of an edge curve, parametrised over `[0, 1]`
#[derive(Debug, Clone, Copy)]
pub enum Piece {
    Segment(Point3<f64>, Point3<f64>),
    Arc {
        frame: Frame,
        rx: f64,
        ry: f64,
        t0: f64,
        t1: f64,
    },
}

impl Piece {
    /// Position and derivative at `s` in `[0, 1]`
    #[inline]
    pub fn eval(&self, s: f64) -> (Point3<f64>, Vector3<f64>) {
        match *self {
            Piece::Segment(a, b) => (a + (b - a) * s, b - a),
            Piece::Arc {
                ref frame,
                rx,
                ry,
                t0,
                t1,
            } => {
                let dt = t1 - t0;
                let t = t0 + dt * s;
                let (sin, cos) = t.sin_cos();
                (
                    frame.origin + frame.x * (rx * cos) + frame.y * (ry * sin),
                    (frame.x * (-rx * sin) + frame.y * (ry * cos)) * dt,
                )
            }
        }
    }
}

impl EdgeCurve {
    pub fn start(&self) -> Point3<f64> {
        self.point_at(0.0)
    }

    pub fn end(&self) -> Point3<f64> {
        self.point_at(1.0)
    }

    /// Point at normalised parameter `s` in `[0, 1]`
    pub fn point_at(&self, s: f64) -> Point3<f64> {
        match self {
            EdgeCurve::Line { start, end } => start + (end - start) * s,
            EdgeCurve::Arc {
                frame,
                rx,
                ry,
                t0,
                t1,
            } => {
                let t = t0 + (t1 - t0) * s;
                frame.point(rx * t.cos(), ry * t.sin(), 0.0)
            }
            EdgeCurve::Polyline(points) => {
                let segments = points.len().saturating_sub(1);
                if segments == 0 {
                    return points.first().copied().unwrap_or_else(Point3::origin);
                }
                let scaled = (s.clamp(0.0, 1.0) * segments as f64).min(segments as f64 - 1e-12);
                let i = scaled.floor() as usize;
                let f = scaled - i as f64;
                points[i] + (points[i + 1] - points[i]) * f
            }
        }
    }

    /// Smooth spans for quadrature; arcs are split into short pieces
    pub fn pieces(&self) -> SmallVec<[Piece; 8]> {
        let mut out = SmallVec::new();
        match self {
            EdgeCurve::Line { start, end } => out.push(Piece::Segment(*start, *end)),
            EdgeCurve::Arc {
                frame,
                rx,
                ry,
                t0,
                t1,
            } => {
                let span = t1 - t0;
                let n = ((span.abs() / MAX_PIECE_ANGLE).ceil() as usize).max(1);
                for i in 0..n {
                    out.push(Piece::Arc {
                        frame: *frame,
                        rx: *rx,
                        ry: *ry,
                        t0: t0 + span * i as f64 / n as f64,
                        t1: t0 + span * (i + 1) as f64 / n as f64,
                    });
                }
            }
            EdgeCurve::Polyline(points) => {
                for pair in points.windows(2) {
                    out.push(Piece::Segment(pair[0], pair[1]));
                }
            }
        }
        out
    }

    /// `½ ∫ x × dx` along the curve
    pub fn area_vector(&self) -> Vector3<f64> {
        match self {
            EdgeCurve::Line { start, end } => start.coords.cross(&end.coords) * 0.5,
            EdgeCurve::Arc {
                frame,
                rx,
                ry,
                t0,
                t1,
            } => {
                let chord = self.end() - self.start();
                (frame.origin.coords.cross(&chord) + frame.z * (rx * ry * (t1 - t0))) * 0.5
            }
            EdgeCurve::Polyline(points) => points
                .windows(2)
                .map(|pair| pair[0].coords.cross(&pair[1].coords) * 0.5)
                .sum(),
        }
    }

    /// Points along the curve, both ends included, with chord height at most
    /// `deflection`
    pub fn sample(&self, deflection: f64) -> Vec<Point3<f64>> {
        match self {
            EdgeCurve::Line { start, end } => vec![*start, *end],
            EdgeCurve::Arc { rx, ry, t0, t1, .. } => {
                let n = arc_segments(rx.max(*ry), (t1 - t0).abs(), deflection);
                (0..=n).map(|i| self.point_at(i as f64 / n as f64)).collect()
            }
            EdgeCurve::Polyline(points) => points.clone(),
        }
    }
}

/// Segments needed to keep the chord height of an arc below `deflection`
pub fn arc_segments(radius: f64, span: f64, deflection: f64) -> usize {
    let step = if deflection > 0.0 && deflection < radius {
        (2.0 * (1.0 - deflection / radius).acos()).min(FRAC_PI_4)
    } else {
        FRAC_PI_4
    };
    let n = (span / step - 1e-9).ceil() as usize;
    // A closed circle needs a real polygon
    let min = if span >= TAU - 1e-9 { 3 } else { 1 };
    n.clamp(min, 4096)
}

/// Wrap an angle difference into `(-π, π]`
#[inline]
pub fn wrap_angle(a: f64) -> f64 {
    PI - (PI - a).rem_euclid(TAU)
}
