// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk scan: sessions and device options on top of an
// `EngineHandle`.

pub mod events;
pub mod options;
pub mod session;

pub use events::{Event, EventEmitter, Listener};
pub use options::{OptionSetting, OptionTable, ScanOption, ScanOptions, ScanOptionsMut, discover};
pub use session::{ScanEvent, ScanEventKind, ScanRun, ScanSession, ScanSummary, SessionState};
