// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! File format detection from the declared extension

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshFormat {
    Stl,
    Obj,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrepFormat {
    Step,
    Iges,
}

/// Decoding strategy for an input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "format", rename_all = "lowercase")]
pub enum ModelFormat {
    Mesh(MeshFormat),
    Brep(BrepFormat),
}

impl ModelFormat {
    /// Format for a normalised extension
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "stl" => Some(ModelFormat::Mesh(MeshFormat::Stl)),
            "obj" => Some(ModelFormat::Mesh(MeshFormat::Obj)),
            "step" | "stp" => Some(ModelFormat::Brep(BrepFormat::Step)),
            "iges" | "igs" => Some(ModelFormat::Brep(BrepFormat::Iges)),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelFormat::Mesh(MeshFormat::Stl) => "STL",
            ModelFormat::Mesh(MeshFormat::Obj) => "OBJ",
            ModelFormat::Brep(BrepFormat::Step) => "STEP",
            ModelFormat::Brep(BrepFormat::Iges) => "IGES",
        }
    }

    pub fn is_mesh(&self) -> bool {
        matches!(self, ModelFormat::Mesh(_))
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Native formats of CAD packages that can export STEP or IGES
pub const PROPRIETARY_CAD_EXTENSIONS: &[&str] = &[
    "sldprt",
    "sldasm",
    "ipt",
    "iam",
    "f3d",
    "catpart",
    "catproduct",
    "prt",
    "x_t",
    "x_b",
    "3dm",
    "skp",
    "fcstd",
    "dwg",
    "dxf",
];

/// Lower-cased extension without surrounding whitespace or a leading dot
pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Normalised extension of a file name, empty when it has none
pub fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(normalize_extension)
        .unwrap_or_default()
}

/// What the user should do instead of uploading a file of this type
pub fn unsupported_hint(extension: &str) -> String {
    if PROPRIETARY_CAD_EXTENSIONS.contains(&extension) {
        format!(
            "'.{}' is a native CAD format; export the part as STEP (.step/.stp) or IGES (.iges/.igs) and upload that instead",
            extension
        )
    } else {
        "only STL, OBJ, STEP and IGES files are supported".to_string()
    }
}

/// Select the decoding strategy for `file_name` from its declared extension
pub fn classify(file_name: &str, extension: &str) -> Result<ModelFormat, PipelineError> {
    let extension = normalize_extension(extension);
    ModelFormat::from_extension(&extension).ok_or_else(|| PipelineError::UnsupportedFormat {
        file_name: file_name.to_string(),
        hint: unsupported_hint(&extension),
        extension,
    })
}
