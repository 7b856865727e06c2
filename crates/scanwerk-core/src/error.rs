// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.

use thiserror::Error;

use crate::types::{Operation, ScanParameters, Status};

/// Top-level error type for all Scanwerk operations.
///
/// Errors are `Clone` because a scan session keeps its terminal error as the
/// kill flag and also hands it to `stop` listeners.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScanwerkError {
    // -- Engine protocol --
    #[error("status {status} during {operation}")]
    Status { operation: Operation, status: Status },

    #[error("{operation} called while another engine operation is in progress")]
    ConcurrencyViolation { operation: Operation },

    #[error("engine protocol violation: {0}")]
    ProtocolViolation(String),

    // -- Scan sessions --
    #[error("scan sessions cannot be reused")]
    AlreadyUsed,

    #[error("scan event listener failed: {0}")]
    Listener(String),

    // -- Image decoding --
    #[error("unsupported scan parameters: {reason} ({parameters})")]
    UnsupportedParameters {
        reason: String,
        parameters: ScanParameters,
    },

    #[error("image decoding failed: {0}")]
    Decode(String),

    #[error("image export failed: {0}")]
    Image(String),

    // -- Configuration --
    #[error("configuration error: {0}")]
    Config(String),
}

impl ScanwerkError {
    /// Shorthand for a status error raised by `operation`.
    pub fn status(operation: Operation, status: Status) -> Self {
        Self::Status { operation, status }
    }

    /// The engine status carried by this error, if any.
    pub fn engine_status(&self) -> Option<Status> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanwerkError>;
