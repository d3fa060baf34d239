// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Solidvol Core
//!
//! Readers for the two CAD exchange formats accepted by the volume pipeline.
//!
//! - **STEP (ISO 10303-21)**: zero-copy [nom](https://docs.rs/nom) tokenizer,
//!   a single-pass entity index over the DATA section using
//!   [memchr](https://docs.rs/memchr), and a lazily decoding, caching
//!   [`EntityDecoder`]. Complex (multi-record) instances are supported.
//! - **IGES 5.3**: fixed 80-column reader producing directory entries with
//!   their parameter data ([`IgesFile`]).
//!
//! Both readers report the model's length unit as millimetres per unit.
//!
//! ```rust,ignore
//! use solidvol_core::{EntityDecoder, extract_length_unit_scale};
//!
//! let mut decoder = EntityDecoder::new(content)?;
//! for id in decoder.find_by_type("MANIFOLD_SOLID_BREP")? {
//!     let brep = decoder.decode_by_id(id)?;
//!     println!("#{} shell #{:?}", id, brep.get_ref(1));
//! }
//! let mm_per_unit = extract_length_unit_scale(&mut decoder)?;
//! ```

pub mod decoder;
pub mod entity;
pub mod error;
pub mod iges;
pub mod parser;
pub mod units;

pub use decoder::{build_entity_index, EntityDecoder, EntityIndex};
pub use entity::{AttributeValue, DecodedEntity, EntityRecord};
pub use error::{Error, Result};
pub use iges::{DirectoryEntry, GlobalSection, IgesFile, IgesValue};
pub use parser::{parse_entity, RawInstance, RawRecord, Token};
pub use units::{extract_length_unit_scale, extract_plane_angle_scale, get_si_prefix_multiplier};
