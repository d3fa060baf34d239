// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Solidvol Geometry
//!
//! Mesh decoding (STL, OBJ), BRep transfer (STEP, IGES), exact and
//! mesh-based volume, quadric-error simplification and ASCII STL export.
//! Built on nalgebra for linear algebra, earcutr and spade for
//! triangulation.

pub mod brep;
pub mod decimate;
pub mod error;
pub mod mesh;
pub mod obj;
pub mod quadric;
pub mod stl;
pub mod triangulation;
pub mod volume;

// Re-export nalgebra types for convenience
pub use nalgebra::{Point2, Point3, Vector2, Vector3};

pub use brep::{mass_properties, read_iges, read_step, tessellate, BrepModel, MassProperties};
pub use decimate::{
    decimate_mesh, simplify, DecimationResult, SimplificationRequest, DEFAULT_SIMPLIFY_THRESHOLD,
};
pub use error::{Error, Result};
pub use mesh::{weld_decoded, Mesh, TopologyReport};
pub use obj::{read_obj, read_obj_file};
pub use stl::{is_binary_stl, read_stl, read_stl_file, write_ascii_stl, write_stl_file};
pub use triangulation::earcut_rings;
pub use volume::{enclosed_volume, signed_volume, to_cm3};
