// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device option metadata and typed option values.

use serde::{Deserialize, Serialize};

/// Declared type of an option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Int,
    /// Fixed-point number, exposed as `f64`.
    Fixed,
    String,
    Button,
    Group,
}

/// Physical unit of an option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    None,
    Pixel,
    Bit,
    Mm,
    Dpi,
    Percent,
    Microsecond,
}

/// Capability flags of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub soft_select: bool,
    pub hard_select: bool,
    pub soft_detect: bool,
    pub emulated: bool,
    pub automatic: bool,
    pub inactive: bool,
    pub advanced: bool,
}

/// Constraint on the values an option accepts.
///
/// Numeric bounds are `f64` for both integer and fixed-point options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    None,
    Range { min: f64, max: f64, quant: f64 },
    WordList(Vec<f64>),
    StringList(Vec<String>),
}

/// Immutable device metadata describing one option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionDescriptor {
    pub name: String,
    pub title: String,
    pub desc: String,
    pub value_type: ValueType,
    pub unit: Unit,
    /// Size in items (words for numeric types, characters for strings).
    pub size: usize,
    pub cap: Capabilities,
    pub constraint: Constraint,
}

impl OptionDescriptor {
    /// Whether the current value of this option can be fetched.
    ///
    /// Inactive options, options that cannot be read in software, and
    /// buttons carry no value.
    pub fn has_value(&self) -> bool {
        !self.cap.inactive && self.cap.soft_detect && self.value_type != ValueType::Button
    }
}

/// A typed option value, discriminated by the descriptor's declared type and
/// size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum OptionValue {
    Bool(bool),
    Int(i32),
    IntList(Vec<i32>),
    Fixed(f64),
    FixedList(Vec<f64>),
    String(String),
}

impl OptionValue {
    /// Scalar numbers may be silently rounded by the device.
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Fixed(_))
    }

    /// Whether this value has the shape the descriptor declares.
    pub fn matches(&self, descriptor: &OptionDescriptor) -> bool {
        let list = descriptor.size > 1;
        match (self, descriptor.value_type) {
            (Self::Bool(_), ValueType::Bool) => true,
            (Self::Int(_), ValueType::Int) => !list,
            (Self::IntList(_), ValueType::Int) => list,
            (Self::Fixed(_), ValueType::Fixed) => !list,
            (Self::FixedList(_), ValueType::Fixed) => list,
            (Self::String(_), ValueType::String) => true,
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view of a scalar integer or fixed-point value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(f64::from(*n)),
            Self::Fixed(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}
