// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pipeline error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};
use solidvol_geometry::Error as GeometryError;
use thiserror::Error;

use crate::classifier::ModelFormat;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline step a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Classify,
    Read,
    Decode,
    Simplify,
    Volume,
    Export,
    /// Outside any step, at the worker pool boundary
    Worker,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::Read => "read",
            Stage::Decode => "decode",
            Stage::Simplify => "simplify",
            Stage::Volume => "volume",
            Stage::Export => "export",
            Stage::Worker => "worker",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which file failed, as what, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Name the file was uploaded under.
    pub file_name: String,
    pub format: Option<ModelFormat>,
    pub stage: Stage,
}

impl ErrorContext {
    pub fn new(file_name: impl Into<String>, format: Option<ModelFormat>, stage: Stage) -> Self {
        Self {
            file_name: file_name.into(),
            format,
            stage,
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.format {
            Some(format) => write!(f, "{} ({}, {} stage)", self.file_name, format, self.stage),
            None => write!(f, "{} ({} stage)", self.file_name, self.stage),
        }
    }
}

/// Stable machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UnsupportedFormat,
    ParseError,
    GeometryError,
    ValidationError,
    ResourceLimitExceeded,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::GeometryError => "GEOMETRY_ERROR",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::ResourceLimitExceeded => "RESOURCE_LIMIT_EXCEEDED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Terminal failure of one file's pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unsupported file type '.{extension}' ({file_name}): {hint}")]
    UnsupportedFormat {
        file_name: String,
        extension: String,
        hint: String,
    },

    #[error("Could not parse {context}: {message}")]
    Parse { context: ErrorContext, message: String },

    #[error("No usable solid in {context}: {message}")]
    Geometry { context: ErrorContext, message: String },

    #[error("Invalid geometry in {context}: {message}")]
    Validation { context: ErrorContext, message: String },

    #[error("{context} is too large: {size} bytes exceeds the limit of {limit} bytes")]
    ResourceLimitExceeded {
        context: ErrorContext,
        size: u64,
        limit: u64,
    },

    #[error("Internal error processing {context}: {message}")]
    Internal { context: ErrorContext, message: String },
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            PipelineError::Parse { .. } => ErrorCode::ParseError,
            PipelineError::Geometry { .. } => ErrorCode::GeometryError,
            PipelineError::Validation { .. } => ErrorCode::ValidationError,
            PipelineError::ResourceLimitExceeded { .. } => ErrorCode::ResourceLimitExceeded,
            PipelineError::Internal { .. } => ErrorCode::InternalError,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            PipelineError::UnsupportedFormat { .. } => None,
            PipelineError::Parse { context, .. }
            | PipelineError::Geometry { context, .. }
            | PipelineError::Validation { context, .. }
            | PipelineError::ResourceLimitExceeded { context, .. }
            | PipelineError::Internal { context, .. } => Some(context),
        }
    }

    pub fn stage(&self) -> Stage {
        self.context().map_or(Stage::Classify, |c| c.stage)
    }

    /// Message suitable for showing to the person who uploaded the file
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::UnsupportedFormat { hint, .. } => {
                format!("This file type is not supported: {}.", hint)
            }
            PipelineError::Parse { context, .. } => format!(
                "{} could not be read as a valid {} file. Please check the export and try again.",
                context.file_name,
                format_name(context)
            ),
            PipelineError::Geometry { context, message } => format!(
                "No measurable solid was found in {}: {}.",
                context.file_name, message
            ),
            PipelineError::Validation { context, message } => format!(
                "The model in {} cannot be measured: {}. Please upload a closed (watertight) model.",
                context.file_name, message
            ),
            PipelineError::ResourceLimitExceeded { context, limit, .. } => format!(
                "{} is larger than the {} MiB upload limit.",
                context.file_name,
                limit / (1024 * 1024)
            ),
            PipelineError::Internal { context, .. } => format!(
                "Something went wrong while processing {}. Please try again later.",
                context.file_name
            ),
        }
    }

    /// Map a geometry-layer error raised in `context`
    ///
    /// An empty or zero-area mesh file fails validation; the same conditions
    /// on a BRep preview mean the solid itself is unusable.
    pub fn from_geometry(err: GeometryError, context: ErrorContext) -> Self {
        let mesh_input = context.format.map_or(false, |f| f.is_mesh());
        let message = err.to_string();
        match err {
            GeometryError::Parse { .. } | GeometryError::CoreError(_) => {
                PipelineError::Parse { context, message }
            }
            GeometryError::InvalidTopology(_) => PipelineError::Validation { context, message },
            GeometryError::EmptyMesh(_) | GeometryError::Degenerate(_) if mesh_input => {
                PipelineError::Validation { context, message }
            }
            GeometryError::Io(_) => PipelineError::Internal { context, message },
            GeometryError::EmptyMesh(_)
            | GeometryError::Degenerate(_)
            | GeometryError::TriangulationError(_)
            | GeometryError::Unsupported { .. }
            | GeometryError::NoSolid(_) => PipelineError::Geometry { context, message },
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code(),
            message: self.user_message(),
            detail: self.to_string(),
            context: self.context().cloned(),
        }
    }
}

fn format_name(context: &ErrorContext) -> &'static str {
    context.format.map_or("model", |f| f.name())
}

/// Serializable summary handed to the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
    pub detail: String,
    pub context: Option<ErrorContext>,
}

impl ErrorReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{BrepFormat, MeshFormat};

    fn context(format: ModelFormat, stage: Stage) -> ErrorContext {
        ErrorContext::new("part.x", Some(format), stage)
    }

    #[test]
    fn test_geometry_error_mapping() {
        let stl = ModelFormat::Mesh(MeshFormat::Stl);
        let step = ModelFormat::Brep(BrepFormat::Step);

        let err = PipelineError::from_geometry(
            GeometryError::parse("STL", "line 3", "bad number"),
            context(stl, Stage::Decode),
        );
        assert_eq!(err.code(), ErrorCode::ParseError);

        let err = PipelineError::from_geometry(
            GeometryError::EmptyMesh("no faces".into()),
            context(stl, Stage::Decode),
        );
        assert_eq!(err.code(), ErrorCode::ValidationError);

        let err = PipelineError::from_geometry(
            GeometryError::EmptyMesh("no faces".into()),
            context(step, Stage::Decode),
        );
        assert_eq!(err.code(), ErrorCode::GeometryError);

        let err = PipelineError::from_geometry(
            GeometryError::unsupported("surface", "B_SPLINE_SURFACE #12"),
            context(step, Stage::Decode),
        );
        assert_eq!(err.code(), ErrorCode::GeometryError);
        assert!(err.to_string().contains("B_SPLINE_SURFACE #12"), "{}", err);

        let err = PipelineError::from_geometry(
            GeometryError::topology("3 boundary edges"),
            context(stl, Stage::Volume),
        );
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.stage(), Stage::Volume);
    }

    #[test]
    fn test_context_in_message() {
        let err = PipelineError::Geometry {
            context: context(ModelFormat::Brep(BrepFormat::Iges), Stage::Decode),
            message: "no solids".into(),
        };
        let text = err.to_string();
        assert!(text.contains("part.x"), "{}", text);
        assert!(text.contains("IGES"), "{}", text);
        assert!(text.contains("decode"), "{}", text);
    }

    #[test]
    fn test_report_json() {
        let err = PipelineError::ResourceLimitExceeded {
            context: ErrorContext::new("huge.stl", None, Stage::Read),
            size: 30 * 1024 * 1024,
            limit: 20 * 1024 * 1024,
        };
        let report = err.report();
        assert!(report.message.contains("20 MiB"), "{}", report.message);
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["code"], "RESOURCE_LIMIT_EXCEEDED");
        assert_eq!(json["context"]["stage"], "read");
        assert_eq!(json["context"]["format"], serde_json::Value::Null);
    }
}
