// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for exchange-file reading
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading STEP or IGES documents
#[derive(Error, Debug)]
pub enum Error {
    #[error("Parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Entity #{0} not found")]
    EntityNotFound(u32),

    #[error("Entity #{id} has type {found}, expected {expected}")]
    UnexpectedType {
        id: u32,
        expected: String,
        found: String,
    },

    #[error("Missing {0} section")]
    MissingSection(&'static str),

    #[error("Malformed IGES record at line {line}: {message}")]
    Record { line: usize, message: String },
}

impl Error {
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            position,
            message: message.into(),
        }
    }

    pub fn record(line: usize, message: impl Into<String>) -> Self {
        Error::Record {
            line,
            message: message.into(),
        }
    }
}
