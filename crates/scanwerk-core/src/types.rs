// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the scanner engine protocol.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status codes returned by every engine primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Good,
    Unsupported,
    Cancelled,
    DeviceBusy,
    Inval,
    Eof,
    Jammed,
    NoDocs,
    CoverOpen,
    IoError,
    NoMem,
    AccessDenied,
}

impl Status {
    /// All status codes in protocol order.
    pub const ALL: [Status; 12] = [
        Self::Good,
        Self::Unsupported,
        Self::Cancelled,
        Self::DeviceBusy,
        Self::Inval,
        Self::Eof,
        Self::Jammed,
        Self::NoDocs,
        Self::CoverOpen,
        Self::IoError,
        Self::NoMem,
        Self::AccessDenied,
    ];

    /// Numeric wire code.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Parse a numeric wire code.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Protocol name of the status (e.g. `DEVICE_BUSY`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "GOOD",
            Self::Unsupported => "UNSUPPORTED",
            Self::Cancelled => "CANCELLED",
            Self::DeviceBusy => "DEVICE_BUSY",
            Self::Inval => "INVAL",
            Self::Eof => "EOF",
            Self::Jammed => "JAMMED",
            Self::NoDocs => "NO_DOCS",
            Self::CoverOpen => "COVER_OPEN",
            Self::IoError => "IO_ERROR",
            Self::NoMem => "NO_MEM",
            Self::AccessDenied => "ACCESS_DENIED",
        }
    }

    /// Standard status text, as produced by the engine's status-to-text
    /// primitive.
    pub fn description(self) -> &'static str {
        match self {
            Self::Good => "Success",
            Self::Unsupported => "Operation not supported",
            Self::Cancelled => "Operation was cancelled",
            Self::DeviceBusy => "Device busy",
            Self::Inval => "Invalid argument",
            Self::Eof => "End of file reached",
            Self::Jammed => "Document feeder jammed",
            Self::NoDocs => "Document feeder out of documents",
            Self::CoverOpen => "Scanner cover is open",
            Self::IoError => "Error during device I/O",
            Self::NoMem => "Out of memory",
            Self::AccessDenied => "Access to resource has been denied",
        }
    }

    /// Convert into a `Result`, mapping `Good` to `Ok(())`.
    pub fn into_result(self) -> std::result::Result<(), Status> {
        match self {
            Self::Good => Ok(()),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The engine primitives, used for call classification, logging, and error
/// messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    GetState,
    Init,
    Exit,
    GetDevices,
    Open,
    Close,
    GetOptionDescriptor,
    GetOptionValue,
    SetOptionValue,
    SetOptionAuto,
    GetParameters,
    Start,
    Read,
    Cancel,
    StatusText,
}

impl Operation {
    /// Whether the primitive may suspend for device I/O.
    ///
    /// Suspending operations are queued by the call serializer; the others
    /// must never be issued while a suspending one is outstanding.
    /// `SetOptionAuto` is only suspected of suspending and is treated as if it
    /// always does.
    pub fn may_suspend(self) -> bool {
        match self {
            Self::Exit
            | Self::GetDevices
            | Self::Open
            | Self::Close
            | Self::GetOptionValue
            | Self::SetOptionValue
            | Self::SetOptionAuto
            | Self::Read
            | Self::Cancel => true,
            Self::GetState
            | Self::Init
            | Self::GetOptionDescriptor
            | Self::GetParameters
            | Self::Start
            | Self::StatusText => false,
        }
    }

    /// Primitive name used in log lines and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetState => "get_state",
            Self::Init => "init",
            Self::Exit => "exit",
            Self::GetDevices => "get_devices",
            Self::Open => "open",
            Self::Close => "close",
            Self::GetOptionDescriptor => "get_option_descriptor",
            Self::GetOptionValue => "control_option_get_value",
            Self::SetOptionValue => "control_option_set_value",
            Self::SetOptionAuto => "control_option_set_auto",
            Self::GetParameters => "get_parameters",
            Self::Start => "start",
            Self::Read => "read",
            Self::Cancel => "cancel",
            Self::StatusText => "strstatus",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame format of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Gray,
    Rgb,
    Red,
    Green,
    Blue,
}

impl Frame {
    /// Number of interleaved channels carried by one frame of this format.
    pub fn channels(self) -> u32 {
        match self {
            Self::Rgb => 3,
            Self::Gray | Self::Red | Self::Green | Self::Blue => 1,
        }
    }
}

/// Scan parameters reported by the engine once a scan has started.
///
/// Values are kept as the signed integers the protocol uses: a negative
/// `lines` means the height is unknown (hand scanners).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParameters {
    pub format: Frame,
    pub last_frame: bool,
    pub bytes_per_line: i32,
    pub pixels_per_line: i32,
    pub lines: i32,
    pub depth: i32,
}

impl std::fmt::Display for ScanParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "format={:?} last_frame={} bytes_per_line={} pixels_per_line={} lines={} depth={}",
            self.format,
            self.last_frame,
            self.bytes_per_line,
            self.pixels_per_line,
            self.lines,
            self.depth
        )
    }
}

/// Decoded engine version code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl Version {
    /// Split a packed version code (`major << 24 | minor << 16 | build`).
    pub fn from_code(code: u32) -> Self {
        Self {
            major: (code >> 24) & 0xff,
            minor: (code >> 16) & 0xff,
            build: code & 0xffff,
        }
    }

    /// Pack into a version code.
    pub fn code(self) -> u32 {
        ((self.major & 0xff) << 24) | ((self.minor & 0xff) << 16) | (self.build & 0xffff)
    }
}

/// Library state as reported by the engine's query-state primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EngineState {
    /// Whether `init` has been called successfully.
    pub initialized: bool,
    /// Version code provided by the last `init`.
    pub version_code: u32,
    pub version: Version,
    /// Whether a device handle is currently open.
    pub open: bool,
}

/// A device reported by the engine's list-devices primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub vendor: String,
    pub model: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Side-effect flags returned after setting an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SetInfo {
    /// The value was rounded or otherwise adjusted by the device.
    pub inexact: bool,
    /// Other options changed; the option list must be reloaded.
    pub reload_options: bool,
    /// Scan parameters may have changed.
    pub reload_params: bool,
}
