// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for geometry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during geometry processing
#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed {format} data at {location}: {message}")]
    Parse {
        format: &'static str,
        location: String,
        message: String,
    },

    #[error("Empty mesh: {0}")]
    EmptyMesh(String),

    #[error("Triangulation failed: {0}")]
    TriangulationError(String),

    #[error("Unsupported {kind} entity {name}")]
    Unsupported { kind: &'static str, name: String },

    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("No solid bodies found: {0}")]
    NoSolid(String),

    #[error("Degenerate geometry: {0}")]
    Degenerate(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core parser error: {0}")]
    CoreError(#[from] solidvol_core::Error),
}

impl Error {
    pub fn parse(format: &'static str, location: impl ToString, message: impl Into<String>) -> Self {
        Error::Parse {
            format,
            location: location.to_string(),
            message: message.into(),
        }
    }

    pub fn topology(message: impl Into<String>) -> Self {
        Error::InvalidTopology(message.into())
    }

    pub fn unsupported(kind: &'static str, name: impl Into<String>) -> Self {
        Error::Unsupported {
            kind,
            name: name.into(),
        }
    }
}
