// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Volume estimation for one uploaded file
//!
//! classify → read → decode → simplify (meshes) → volume → export. Each step
//! runs under its own panic boundary so failures carry the step they
//! happened in.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Instant;

use rayon::ThreadPoolBuildError;
use serde::{Deserialize, Serialize};
use solidvol_geometry::{
    enclosed_volume, mass_properties, read_iges, read_obj, read_step, read_stl, simplify,
    tessellate, to_cm3, write_stl_file, BrepModel, Mesh, TopologyReport,
};
use tracing::{debug, info, warn};

use crate::classifier::{classify, BrepFormat, MeshFormat, ModelFormat};
use crate::config::PipelineConfig;
use crate::error::{ErrorContext, PipelineError, Result, Stage};
use crate::files::{SourceFile, TempFile};
use crate::pool::{JobError, JobHandle, WorkerPool};

/// Geometry produced by the decode step
#[derive(Debug, Clone)]
pub enum DecodedModel {
    Mesh {
        mesh: Mesh,
        topology: TopologyReport,
    },
    Brep {
        model: BrepModel,
        /// Tessellation for export and preview, in millimetres
        preview: Mesh,
    },
}

impl DecodedModel {
    pub fn face_count(&self) -> usize {
        match self {
            DecodedModel::Mesh { mesh, .. } => mesh.triangle_count(),
            DecodedModel::Brep { preview, .. } => preview.triangle_count(),
        }
    }
}

/// Decode file contents in the given format
pub fn decode(
    format: ModelFormat,
    bytes: &[u8],
    source: &str,
    linear_deflection: f64,
) -> solidvol_geometry::Result<DecodedModel> {
    match format {
        ModelFormat::Mesh(kind) => {
            let mesh = match kind {
                MeshFormat::Stl => read_stl(bytes, source)?,
                MeshFormat::Obj => read_obj(&String::from_utf8_lossy(bytes), source)?,
            };
            let topology = mesh.topology();
            Ok(DecodedModel::Mesh { mesh, topology })
        }
        ModelFormat::Brep(kind) => {
            let text = String::from_utf8_lossy(bytes);
            let model = match kind {
                BrepFormat::Step => read_step(&text, source)?,
                BrepFormat::Iges => read_iges(&text, source)?,
            };
            let preview = tessellate(&model, linear_deflection)?;
            Ok(DecodedModel::Brep { model, preview })
        }
    }
}

/// Outcome of a successful run, ready for the pricing layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeResult {
    pub file_name: String,
    pub format: ModelFormat,
    pub volume_cm3: f64,
    /// Canonical ASCII STL
    pub export_path: PathBuf,
    /// Where the preview renderer should write its image
    pub preview_path: PathBuf,
    /// Faces in the exported mesh
    pub face_count: usize,
    pub simplified: bool,
}

impl VolumeResult {
    /// JSON for the orchestration layer
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A finished run; the guards delete the export and preview files when
/// dropped
#[derive(Debug)]
pub struct ProcessedModel {
    pub result: VolumeResult,
    pub export: TempFile,
    pub preview: TempFile,
}

/// Identity of the file being processed, for error context
struct Run<'a> {
    file_name: &'a str,
    format: Option<ModelFormat>,
}

impl Run<'_> {
    fn context(&self, stage: Stage) -> ErrorContext {
        ErrorContext::new(self.file_name, self.format, stage)
    }

    fn geometry(&self, stage: Stage) -> impl FnOnce(solidvol_geometry::Error) -> PipelineError + '_ {
        move |err| PipelineError::from_geometry(err, self.context(stage))
    }

    fn internal(&self, stage: Stage, message: impl ToString) -> PipelineError {
        PipelineError::Internal {
            context: self.context(stage),
            message: message.to_string(),
        }
    }

    /// Run one step, converting a panic into an internal error of that step
    fn step<T>(&self, stage: Stage, f: impl FnOnce() -> Result<T>) -> Result<T> {
        debug!(file = self.file_name, stage = %stage, "Pipeline step");
        panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            Err(self.internal(stage, format!("panicked: {}", message)))
        })
    }
}

/// Process one file to completion on the current thread
///
/// `source` is borrowed; its file is deleted when the caller drops it.
pub fn run(config: &PipelineConfig, source: &SourceFile) -> Result<ProcessedModel> {
    let start = Instant::now();
    let mut job = Run {
        file_name: source.file_name(),
        format: None,
    };

    let format = job.step(Stage::Classify, || classify(source.file_name(), source.extension()))?;
    job.format = Some(format);
    info!(file = source.file_name(), format = %format, size = source.size(), "Processing model");

    let limit = config.max_file_size_bytes();
    let bytes = job.step(Stage::Read, || {
        if source.size() > limit {
            return Err(PipelineError::ResourceLimitExceeded {
                context: job.context(Stage::Read),
                size: source.size(),
                limit,
            });
        }
        let bytes = std::fs::read(source.path()).map_err(|e| job.internal(Stage::Read, e))?;
        if bytes.len() as u64 > limit {
            return Err(PipelineError::ResourceLimitExceeded {
                context: job.context(Stage::Read),
                size: bytes.len() as u64,
                limit,
            });
        }
        Ok(bytes)
    })?;

    let decode_start = Instant::now();
    let decoded = job.step(Stage::Decode, || {
        decode(format, &bytes, source.file_name(), config.linear_deflection)
            .map_err(job.geometry(Stage::Decode))
    })?;
    drop(bytes);
    debug!(
        faces = decoded.face_count(),
        elapsed_ms = decode_start.elapsed().as_millis() as u64,
        "Decoded model"
    );

    let (mesh, volume_cm3, simplified) = match decoded {
        DecodedModel::Mesh { mesh, topology } => {
            let (mesh, simplified) =
                job.step(Stage::Simplify, || Ok(simplify_closed(config, mesh, &topology)))?;
            let volume_cm3 = job.step(Stage::Volume, || {
                let volume = enclosed_volume(&mesh).map_err(job.geometry(Stage::Volume))?;
                Ok(to_cm3(volume, config.mesh_unit_mm))
            })?;
            (mesh, volume_cm3, simplified)
        }
        DecodedModel::Brep { model, preview } => {
            let volume_cm3 = job.step(Stage::Volume, || {
                mass_properties(&model)
                    .map(|props| props.volume_cm3)
                    .map_err(job.geometry(Stage::Volume))
            })?;
            (preview, volume_cm3, false)
        }
    };

    if !(volume_cm3.is_finite() && volume_cm3 > 0.0) {
        return Err(PipelineError::Geometry {
            context: job.context(Stage::Volume),
            message: format!("volume is {} cm³", volume_cm3),
        });
    }

    let (export, preview) = job.step(Stage::Export, || {
        let stem = source.stem();
        let export = TempFile::reserve(&config.export_dir, &stem, "stl")
            .map_err(|e| job.internal(Stage::Export, e))?;
        write_stl_file(&mesh, &stem, export.path()).map_err(job.geometry(Stage::Export))?;
        let preview = TempFile::reserve(&config.export_dir, &stem, "png")
            .map_err(|e| job.internal(Stage::Export, e))?;
        Ok((export, preview))
    })?;

    let result = VolumeResult {
        file_name: source.file_name().to_string(),
        format,
        volume_cm3,
        export_path: export.path().to_path_buf(),
        preview_path: preview.path().to_path_buf(),
        face_count: mesh.triangle_count(),
        simplified,
    };
    info!(
        file = source.file_name(),
        volume_cm3,
        faces = result.face_count,
        simplified,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Model processed"
    );

    Ok(ProcessedModel {
        result,
        export,
        preview,
    })
}

/// Simplify large meshes, keeping the original when decimation would open a
/// closed mesh
fn simplify_closed(config: &PipelineConfig, mesh: Mesh, topology: &TopologyReport) -> (Mesh, bool) {
    let result = simplify(&mesh, &config.simplification());
    if !result.was_decimated() {
        return (mesh, false);
    }
    if topology.is_closed() && !result.mesh.topology().is_closed() {
        warn!(
            original_faces = result.original_faces,
            final_faces = result.final_faces,
            "Simplified mesh is no longer closed, keeping the original"
        );
        return (mesh, false);
    }
    info!(
        original_faces = result.original_faces,
        final_faces = result.final_faces,
        "Simplified mesh"
    );
    (result.mesh, true)
}

/// Pipeline with its own worker pool
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    pool: WorkerPool,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> std::result::Result<Self, ThreadPoolBuildError> {
        let pool = WorkerPool::new(config.worker_threads)?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Queue `source` for processing; the job owns the file and deletes it
    /// when it finishes
    pub fn submit(&self, source: SourceFile) -> JobHandle<Result<ProcessedModel>> {
        let config = self.config.clone();
        self.pool.submit(move || run(&config, &source))
    }

    /// Process `source` on the pool and wait for the result
    pub async fn process(&self, source: SourceFile) -> Result<ProcessedModel> {
        let file_name = source.file_name().to_string();
        flatten(&file_name, self.submit(source).await)
    }

    /// Blocking counterpart of [`Pipeline::process`]
    pub fn process_blocking(&self, source: SourceFile) -> Result<ProcessedModel> {
        let file_name = source.file_name().to_string();
        flatten(&file_name, self.submit(source).wait())
    }
}

fn flatten(
    file_name: &str,
    outcome: std::result::Result<Result<ProcessedModel>, JobError>,
) -> Result<ProcessedModel> {
    outcome.unwrap_or_else(|e| {
        Err(PipelineError::Internal {
            context: ErrorContext::new(file_name, None, Stage::Worker),
            message: e.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use solidvol_geometry::Point3;

    fn tetrahedron(flip: bool) -> Mesh {
        let mut mesh = Mesh::new();
        for p in [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(6.0, 0.0, 0.0),
            Point3::new(0.0, 6.0, 0.0),
            Point3::new(0.0, 0.0, 6.0),
        ] {
            mesh.add_vertex(p);
        }
        for [a, b, c] in [[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]] {
            if flip {
                mesh.add_triangle(a, c, b);
            } else {
                mesh.add_triangle(a, b, c);
            }
        }
        mesh
    }

    #[test]
    fn test_decode_stl_reports_topology() {
        let text = "solid t
facet normal 0 0 0
outer loop
vertex 0 0 0
vertex 1 0 0
vertex 0 1 0
endloop
endfacet
endsolid t
";
        let decoded = decode(ModelFormat::Mesh(MeshFormat::Stl), text.as_bytes(), "t.stl", 0.1).unwrap();
        match decoded {
            DecodedModel::Mesh { mesh, topology } => {
                assert_eq!(mesh.triangle_count(), 1);
                assert_eq!(topology.boundary_edges, 3);
                assert!(!topology.is_closed());
            }
            other => panic!("expected mesh, got {:?}", other),
        }
    }

    #[test]
    fn test_below_threshold_passes_through() {
        let mesh = tetrahedron(false);
        let topology = mesh.topology();
        let (out, simplified) = simplify_closed(&PipelineConfig::default(), mesh.clone(), &topology);
        assert!(!simplified);
        assert_eq!(out, mesh);
    }

    #[test]
    fn test_inward_mesh_uses_magnitude() {
        let volume = enclosed_volume(&tetrahedron(true)).unwrap();
        assert!((volume - 36.0).abs() < 1e-9);
    }

    #[test]
    fn test_step_panic_becomes_internal() {
        let job = Run {
            file_name: "x.stl",
            format: Some(ModelFormat::Mesh(MeshFormat::Stl)),
        };
        let err = job
            .step(Stage::Simplify, || -> Result<()> { panic!("collapse bug") })
            .unwrap_err();
        match err {
            PipelineError::Internal { context, message } => {
                assert_eq!(context.stage, Stage::Simplify);
                assert!(message.contains("collapse bug"), "{}", message);
            }
            other => panic!("expected internal error, got {:?}", other),
        }
    }

    #[test]
    fn test_lost_worker_is_internal() {
        let err = flatten("lost.step", Err(JobError::Lost)).unwrap_err();
        assert_eq!(err.stage(), Stage::Worker);
        assert_eq!(err.context().map(|c| c.file_name.as_str()), Some("lost.step"));
    }
}
