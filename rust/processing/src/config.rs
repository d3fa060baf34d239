// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pipeline configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use solidvol_geometry::{SimplificationRequest, DEFAULT_SIMPLIFY_THRESHOLD};
use tracing::warn;

pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 20;

/// Chord error of BRep preview meshes, in millimetres.
pub const DEFAULT_LINEAR_DEFLECTION: f64 = 0.1;

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Largest accepted upload in MiB.
    pub max_file_size_mb: u64,
    /// Meshes with more faces than this are simplified.
    pub simplify_threshold: usize,
    /// Preview tessellation tolerance for BRep input, in millimetres.
    pub linear_deflection: f64,
    /// Number of worker threads for decoding and volume computation.
    pub worker_threads: usize,
    /// Directory that receives exported STL files and preview paths.
    pub export_dir: PathBuf,
    /// Millimetres per mesh unit (STL and OBJ carry no unit).
    pub mesh_unit_mm: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            simplify_threshold: DEFAULT_SIMPLIFY_THRESHOLD,
            linear_deflection: DEFAULT_LINEAR_DEFLECTION,
            worker_threads: num_cpus::get(),
            export_dir: std::env::temp_dir().join("solidvol"),
            mesh_unit_mm: 1.0,
        }
    }
}

/// A set variable that fails to parse or validate is logged and ignored
fn setting<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    valid: impl Fn(&T) -> bool,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => Some(value),
        _ => {
            warn!(key, value = %raw, "Ignoring invalid configuration value, using default");
            None
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Configuration from a variable lookup; absent, unparsable and
    /// out-of-range values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_file_size_mb: setting(&lookup, "MAX_FILE_SIZE_MB", |&mb: &u64| mb > 0)
                .unwrap_or(defaults.max_file_size_mb),
            simplify_threshold: setting(&lookup, "SIMPLIFY_THRESHOLD", |&faces: &usize| faces > 0)
                .unwrap_or(defaults.simplify_threshold),
            linear_deflection: setting(&lookup, "LINEAR_DEFLECTION", |d: &f64| {
                d.is_finite() && *d > 0.0
            })
            .unwrap_or(defaults.linear_deflection),
            worker_threads: setting(&lookup, "WORKER_THREADS", |&n: &usize| n > 0)
                .unwrap_or(defaults.worker_threads),
            export_dir: lookup("EXPORT_DIR")
                .map(|dir| dir.trim().to_string())
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.export_dir),
            mesh_unit_mm: setting(&lookup, "MESH_UNIT_MM", |u: &f64| u.is_finite() && *u > 0.0)
                .unwrap_or(defaults.mesh_unit_mm),
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn simplification(&self) -> SimplificationRequest {
        SimplificationRequest::new(self.simplify_threshold)
    }
}
