// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for scanner front-ends.
//
// Every technical error is mapped to plain English with a clear suggestion.
// Nothing here retries on its own: a retriable error means the user may start
// a fresh scan or option change once the suggestion has been followed.

use crate::error::ScanwerkError;
use crate::types::Status;

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Device busy or an I/O blip; trying again later may work.
    Transient,
    /// User must do something (clear jam, close cover, load paper).
    ActionRequired,
    /// Will not succeed as configured, e.g. an unsupported mode.
    Permanent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether a fresh attempt can reasonably succeed.
    pub retriable: bool,
    /// Severity level (drives icon/colour in UI).
    pub severity: Severity,
}

impl HumanError {
    fn new(message: &str, suggestion: &str, retriable: bool, severity: Severity) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
            retriable,
            severity,
        }
    }
}

/// Convert a `ScanwerkError` into a `HumanError`.
pub fn humanize_error(err: &ScanwerkError) -> HumanError {
    match err {
        ScanwerkError::Status { status, .. } => humanize_status(*status),

        ScanwerkError::ConcurrencyViolation { .. } => HumanError::new(
            "The scanner is still busy with another request.",
            "Wait for the current scan or setting change to finish, then try again.",
            true,
            Severity::Transient,
        ),

        ScanwerkError::ProtocolViolation(detail) => HumanError {
            message: "The scanner driver reported inconsistent information.".into(),
            suggestion: format!("Reconnect the scanner and reopen it. ({detail})"),
            retriable: false,
            severity: Severity::Permanent,
        },

        ScanwerkError::AlreadyUsed => HumanError::new(
            "This scan has already been run.",
            "Start a new scan.",
            true,
            Severity::Transient,
        ),

        ScanwerkError::Listener(detail) => HumanError {
            message: "The scan was stopped by the application.".into(),
            suggestion: format!("Try scanning again. ({detail})"),
            retriable: true,
            severity: Severity::Transient,
        },

        ScanwerkError::UnsupportedParameters { reason, .. } => HumanError {
            message: "This scan mode isn't supported.".into(),
            suggestion: format!(
                "Choose a Gray or Color mode with a known page size and try again. ({reason})"
            ),
            retriable: false,
            severity: Severity::Permanent,
        },

        ScanwerkError::Decode(detail) => HumanError {
            message: "The scanned image could not be assembled.".into(),
            suggestion: format!("Try scanning again. ({detail})"),
            retriable: true,
            severity: Severity::Transient,
        },

        ScanwerkError::Image(detail) => HumanError {
            message: "The scanned image could not be saved.".into(),
            suggestion: format!("Check available storage and try again. ({detail})"),
            retriable: true,
            severity: Severity::Transient,
        },

        ScanwerkError::Config(detail) => HumanError {
            message: "Scanwerk is not set up correctly.".into(),
            suggestion: format!("Check the settings file and how the client is started. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },
    }
}

/// Map an engine status to a human-readable explanation.
fn humanize_status(status: Status) -> HumanError {
    match status {
        Status::Jammed => HumanError::new(
            "Paper is stuck in the document feeder.",
            "Open the feeder, gently remove the stuck paper, and scan again.",
            true,
            Severity::ActionRequired,
        ),
        Status::NoDocs => HumanError::new(
            "There is no paper in the document feeder.",
            "Place your pages in the feeder and scan again.",
            true,
            Severity::ActionRequired,
        ),
        Status::CoverOpen => HumanError::new(
            "The scanner cover is open.",
            "Close the cover and scan again.",
            true,
            Severity::ActionRequired,
        ),
        Status::DeviceBusy => HumanError::new(
            "The scanner is busy.",
            "Wait a moment for the scanner to finish, then try again.",
            true,
            Severity::Transient,
        ),
        Status::IoError => HumanError::new(
            "We lost contact with the scanner.",
            "Check the cable or network connection, then try again.",
            true,
            Severity::Transient,
        ),
        Status::NoMem => HumanError::new(
            "The scanner ran out of memory.",
            "Try a lower resolution or a smaller scan area.",
            true,
            Severity::ActionRequired,
        ),
        Status::AccessDenied => HumanError::new(
            "Access to the scanner was denied.",
            "Check that you have permission to use this scanner.",
            false,
            Severity::ActionRequired,
        ),
        Status::Cancelled => HumanError::new(
            "The scan was cancelled.",
            "Start a new scan when you're ready.",
            true,
            Severity::Transient,
        ),
        Status::Unsupported | Status::Inval => HumanError::new(
            "The scanner didn't accept this request.",
            "Check the scan settings and try again.",
            false,
            Severity::Permanent,
        ),
        Status::Good | Status::Eof => HumanError::new(
            "The scanner reported an unexpected state.",
            "Try scanning again.",
            true,
            Severity::Transient,
        ),
    }
}
