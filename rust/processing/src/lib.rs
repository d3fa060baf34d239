// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Solidvol Processing
//!
//! Turns an uploaded STL, OBJ, STEP or IGES file into a volume in cm³ and a
//! canonical ASCII STL export. Jobs run on a bounded worker pool; every file
//! the pipeline owns is removed by a drop guard.

pub mod classifier;
pub mod config;
pub mod error;
pub mod files;
pub mod pipeline;
pub mod pool;

pub use classifier::{classify, BrepFormat, MeshFormat, ModelFormat};
pub use config::PipelineConfig;
pub use error::{ErrorCode, ErrorContext, ErrorReport, PipelineError, Result, Stage};
pub use files::{SourceFile, TempFile};
pub use pipeline::{decode, run, DecodedModel, Pipeline, ProcessedModel, VolumeResult};
pub use pool::{JobError, JobHandle, WorkerPool};
