// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boundary representation solids from STEP and IGES
//!
//! Both readers produce the same [`BrepModel`]: shared vertices and edges,
//! faces on elementary surfaces, and loops oriented around the outward
//! normal. Volume comes from [`mass_properties`]; [`tessellate`] only builds
//! a preview mesh.

pub mod geom;
pub mod iges;
pub mod mass;
pub mod model;
pub mod step;
pub mod tessellate;

pub use geom::{EdgeCurve, Frame, Surface};
pub use iges::read_iges;
pub use mass::{mass_properties, MassProperties};
pub use model::{BrepBuilder, BrepModel, Edge, Face, Loop, OrientedEdge, Shell, Solid};
pub use step::read_step;
pub use tessellate::tessellate;
