// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Enclosed volume of closed triangle meshes
//!
//! Each triangle spans a signed tetrahedron with a reference point; the sum
//! over a closed surface is independent of that point. Summing about the
//! bounding-box centre keeps the terms small.

use nalgebra::Point3;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mesh::Mesh;

/// Cubic millimetres per cubic centimetre
pub const MM3_PER_CM3: f64 = 1000.0;

/// Signed volume about an explicit reference point
pub fn signed_volume_about(mesh: &Mesh, reference: Point3<f64>) -> f64 {
    let mut total = 0.0;
    for face in 0..mesh.triangle_count() {
        let [a, b, c] = mesh.triangle(face);
        let a = mesh.position(a) - reference;
        let b = mesh.position(b) - reference;
        let c = mesh.position(c) - reference;
        total += a.dot(&b.cross(&c));
    }
    total / 6.0
}

/// Signed volume about the bounding-box centre; positive for outward winding
pub fn signed_volume(mesh: &Mesh) -> f64 {
    signed_volume_about(mesh, mesh.bounds_center())
}

/// Volume enclosed by a closed, consistently oriented mesh, in cubic mesh
/// units
///
/// Open, non-manifold or inconsistently oriented meshes are rejected. An
/// inward-facing closed mesh yields the magnitude.
pub fn enclosed_volume(mesh: &Mesh) -> Result<f64> {
    if mesh.is_empty() {
        return Err(Error::EmptyMesh("mesh has no faces".to_string()));
    }
    let report = mesh.topology();
    if !report.is_closed() {
        return Err(Error::InvalidTopology(format!(
            "mesh is not closed: {}",
            report
        )));
    }

    let signed = signed_volume(mesh);
    if !signed.is_finite() {
        return Err(Error::Degenerate(format!(
            "volume is not finite ({})",
            signed
        )));
    }
    if signed < 0.0 {
        debug!(volume = signed, "Mesh is oriented inward, using magnitude");
    }
    Ok(signed.abs())
}

/// Convert a volume in cubic model units to cm³ given millimetres per unit
#[inline]
pub fn to_cm3(volume: f64, unit_mm: f64) -> f64 {
    volume * unit_mm * unit_mm * unit_mm / MM3_PER_CM3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::box_mesh;
    use approx::assert_relative_eq;

    #[test]
    fn test_cube_volume() {
        let cube = box_mesh(Point3::new(-3.0, 4.0, 10.0), Point3::new(7.0, 14.0, 20.0));
        assert_relative_eq!(enclosed_volume(&cube).unwrap(), 1000.0, epsilon = 1e-9);
        assert_relative_eq!(to_cm3(1000.0, 1.0), 1.0);
    }

    #[test]
    fn test_reference_point_independent() {
        let cube = box_mesh(Point3::origin(), Point3::new(2.0, 3.0, 4.0));
        for r in [
            Point3::origin(),
            Point3::new(100.0, -50.0, 7.0),
            Point3::new(1.0, 1.5, 2.0),
        ] {
            assert_relative_eq!(signed_volume_about(&cube, r), 24.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_inward_mesh_uses_magnitude() {
        let mut cube = box_mesh(Point3::origin(), Point3::new(10.0, 10.0, 10.0));
        cube.indices.chunks_exact_mut(3).for_each(|tri| tri.swap(1, 2));
        assert!(signed_volume(&cube) < 0.0);
        assert_relative_eq!(enclosed_volume(&cube).unwrap(), 1000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_winding_start_independent() {
        let mut cube = box_mesh(Point3::origin(), Point3::new(10.0, 10.0, 10.0));
        cube.indices.chunks_exact_mut(3).for_each(|tri| tri.rotate_left(1));
        assert_relative_eq!(enclosed_volume(&cube).unwrap(), 1000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_open_mesh_is_rejected() {
        let mut cube = box_mesh(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        cube.indices.truncate(33);
        assert!(matches!(enclosed_volume(&cube), Err(Error::InvalidTopology(_))));
        assert!(matches!(enclosed_volume(&Mesh::new()), Err(Error::EmptyMesh(_))));
    }

    #[test]
    fn test_inch_units() {
        // 1 in³ = 16.387064 cm³
        assert_relative_eq!(to_cm3(1.0, 25.4), 16.387064, epsilon = 1e-9);
    }
}
