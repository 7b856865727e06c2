// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk image: turns raw scan data into RGBA pages.

pub mod decoder;
pub mod reader;

pub use decoder::{ImageDecoder, LineBlock, PixelBuffer, validate_parameters};
pub use reader::{ImageEvent, ImageEventKind, ScanImageReader};
