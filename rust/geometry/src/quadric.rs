// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Quadric error metric
//!
//! A quadric accumulates the squared distances to a set of planes. Summing the
//! quadrics of two vertices and minimising the result gives the collapse
//! target of the edge joining them.

use nalgebra::{Matrix3, Point3, Vector3};

/// Symmetric 4x4 error matrix stored as its upper triangle
///
/// ```text
/// [xx xy xz xw]
/// [   yy yz yw]
/// [      zz zw]
/// [         ww]
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Quadric {
    xx: f64,
    xy: f64,
    xz: f64,
    xw: f64,
    yy: f64,
    yz: f64,
    yw: f64,
    zz: f64,
    zw: f64,
    ww: f64,
}

impl Quadric {
    /// Quadric of the plane `n·x + d = 0`; `normal` must be unit length
    pub fn from_plane(normal: Vector3<f64>, d: f64) -> Self {
        let (a, b, c) = (normal.x, normal.y, normal.z);
        Self {
            xx: a * a,
            xy: a * b,
            xz: a * c,
            xw: a * d,
            yy: b * b,
            yz: b * c,
            yw: b * d,
            zz: c * c,
            zw: c * d,
            ww: d * d,
        }
    }

    /// Area-weighted quadric of a triangle's supporting plane, `None` when
    /// the triangle is degenerate
    pub fn from_triangle(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Option<Self> {
        let cross = (b - a).cross(&(c - a));
        let double_area = cross.norm();
        if double_area <= f64::EPSILON * (b - a).norm_squared().max((c - a).norm_squared()) {
            return None;
        }
        let normal = cross / double_area;
        let mut q = Self::from_plane(normal, -normal.dot(&a.coords));
        q.scale(0.5 * double_area);
        Some(q)
    }

    pub fn add(&mut self, other: &Self) {
        self.xx += other.xx;
        self.xy += other.xy;
        self.xz += other.xz;
        self.xw += other.xw;
        self.yy += other.yy;
        self.yz += other.yz;
        self.yw += other.yw;
        self.zz += other.zz;
        self.zw += other.zw;
        self.ww += other.ww;
    }

    pub fn scale(&mut self, factor: f64) {
        self.xx *= factor;
        self.xy *= factor;
        self.xz *= factor;
        self.xw *= factor;
        self.yy *= factor;
        self.yz *= factor;
        self.yw *= factor;
        self.zz *= factor;
        self.zw *= factor;
        self.ww *= factor;
    }

    /// `vᵀ Q v` with `v = (p, 1)`
    pub fn evaluate(&self, p: &Point3<f64>) -> f64 {
        let (x, y, z) = (p.x, p.y, p.z);
        x * (self.xx * x + 2.0 * (self.xy * y + self.xz * z + self.xw))
            + y * (self.yy * y + 2.0 * (self.yz * z + self.yw))
            + z * (self.zz * z + 2.0 * self.zw)
            + self.ww
    }

    /// Point of minimum error, or `None` when the 3x3 block is close to
    /// singular (flat or cylindrical neighbourhoods)
    pub fn optimal_point(&self) -> Option<Point3<f64>> {
        let m = Matrix3::new(
            self.xx, self.xy, self.xz, //
            self.xy, self.yy, self.yz, //
            self.xz, self.yz, self.zz,
        );
        let trace = self.xx + self.yy + self.zz;
        if trace <= 0.0 || m.determinant().abs() <= 1e-9 * trace * trace * trace {
            return None;
        }
        let inverse = m.try_inverse()?;
        let solution = inverse * -Vector3::new(self.xw, self.yw, self.zw);
        solution
            .iter()
            .all(|c| c.is_finite())
            .then(|| Point3::from(solution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_is_zero() {
        let q = Quadric::default();
        assert_eq!(q.evaluate(&Point3::new(1.0, 2.0, 3.0)), 0.0);
    }

    #[test]
    fn test_plane_distance() {
        // z = 2
        let q = Quadric::from_plane(Vector3::z(), -2.0);
        assert_relative_eq!(q.evaluate(&Point3::new(5.0, -1.0, 2.0)), 0.0);
        assert_relative_eq!(q.evaluate(&Point3::new(0.0, 0.0, 5.0)), 9.0);
    }

    #[test]
    fn test_corner_optimum() {
        let mut q = Quadric::from_plane(Vector3::x(), -1.0);
        q.add(&Quadric::from_plane(Vector3::y(), -2.0));
        q.add(&Quadric::from_plane(Vector3::z(), -3.0));
        let p = q.optimal_point().unwrap();
        assert_relative_eq!(p, Point3::new(1.0, 2.0, 3.0), epsilon = 1e-12);
    }

    #[test]
    fn test_flat_neighbourhood_has_no_optimum() {
        let mut q = Quadric::from_plane(Vector3::z(), 0.0);
        q.add(&Quadric::from_plane(Vector3::z(), 0.0));
        assert!(q.optimal_point().is_none());
    }

    #[test]
    fn test_triangle_quadric() {
        let a = Point3::new(0.0, 0.0, 1.0);
        let b = Point3::new(2.0, 0.0, 1.0);
        let c = Point3::new(0.0, 2.0, 1.0);
        let q = Quadric::from_triangle(&a, &b, &c).unwrap();
        // area 2, distance 1
        assert_relative_eq!(q.evaluate(&Point3::new(0.3, 0.3, 2.0)), 2.0, epsilon = 1e-12);
        assert!(Quadric::from_triangle(&a, &a, &c).is_none());
    }
}
