// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk core: types and error definitions shared across all crates.

pub mod config;
pub mod error;
pub mod human_errors;
pub mod logging;
pub mod option;
pub mod types;

pub use config::ClientConfig;
pub use error::{Result, ScanwerkError};
pub use option::*;
pub use types::*;
