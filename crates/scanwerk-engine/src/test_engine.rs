// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scriptable in-memory engine for tests and offline development.
//
// Behaves like a small flatbed scanner: a handful of devices, a realistic
// option table (mode, depth, resolution, preview, scan area, a group, a
// button), and a scan whose reads follow a script of data chunks, idle polls,
// and failure statuses.  After `cancel` reads report `Cancelled` by default;
// `with_eof_after_cancel` switches to backends that keep reporting `Eof`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use scanwerk_core::{
    Capabilities, Constraint, Device, EngineState, Frame, Operation, OptionDescriptor,
    OptionValue, ScanParameters, SetInfo, Status, Unit, ValueType, Version,
};

use crate::traits::{Engine, EngineResult};

/// Version reported by `init`.
const TEST_VERSION: Version = Version {
    major: 1,
    minor: 0,
    build: 32,
};

/// One scripted outcome of a `read` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStep {
    /// Return these bytes.
    Data(Vec<u8>),
    /// Return no bytes (data not ready yet).
    Idle,
    /// Fail with this status.
    Status(Status),
}

impl ReadStep {
    /// Split `data` into `Data` steps of at most `size` bytes.
    pub fn chunks(data: &[u8], size: usize) -> Vec<ReadStep> {
        data.chunks(size.max(1))
            .map(|chunk| ReadStep::Data(chunk.to_vec()))
            .collect()
    }
}

/// An option held by the test engine.
#[derive(Debug, Clone)]
pub struct TestOption {
    pub descriptor: OptionDescriptor,
    pub value: Option<OptionValue>,
    /// Value restored by `set_option_auto`.
    pub default: Option<OptionValue>,
    /// Options whose `inactive` flag flips whenever this one is set.
    pub dependents: Vec<u32>,
}

impl TestOption {
    pub fn new(descriptor: OptionDescriptor, value: Option<OptionValue>) -> Self {
        Self {
            descriptor,
            default: value.clone(),
            value,
            dependents: Vec::new(),
        }
    }

    /// Setting this option toggles the listed options and requests a reload.
    pub fn with_dependents(mut self, dependents: Vec<u32>) -> Self {
        self.dependents = dependents;
        self
    }
}

#[derive(Debug)]
enum ScanState {
    Idle,
    Scanning(VecDeque<ReadStep>),
    Finished,
    Cancelled,
}

#[derive(Debug)]
struct TestState {
    initialized: bool,
    open: Option<String>,
    options: Vec<TestOption>,
    scan: ScanState,
    calls: Vec<Operation>,
}

/// In-memory engine with scripted scan data.
#[derive(Debug)]
pub struct TestEngine {
    state: Mutex<TestState>,
    devices: Vec<Device>,
    parameters: ScanParameters,
    reads: Vec<ReadStep>,
    after_cancel: Status,
    start_status: Option<Status>,
    parameters_status: Option<Status>,
    declared_option_count: Option<i32>,
    latency: Duration,
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEngine {
    /// Two devices, the default option table, and a 16x8 8-bit gray
    /// gradient delivered in 10-byte chunks after one idle poll.
    pub fn new() -> Self {
        let parameters = ScanParameters {
            format: Frame::Gray,
            last_frame: true,
            bytes_per_line: 16,
            pixels_per_line: 16,
            lines: 8,
            depth: 8,
        };
        let image: Vec<u8> = (0..128u32).map(|i| (i * 2) as u8).collect();
        let mut reads = vec![ReadStep::Idle];
        reads.extend(ReadStep::chunks(&image, 10));

        Self {
            state: Mutex::new(TestState {
                initialized: false,
                open: None,
                options: default_options(),
                scan: ScanState::Idle,
                calls: Vec::new(),
            }),
            devices: test_devices(2),
            parameters,
            reads,
            after_cancel: Status::Cancelled,
            start_status: None,
            parameters_status: None,
            declared_option_count: None,
            latency: Duration::ZERO,
        }
    }

    /// Replace the device list with `count` devices named `test:0`, `test:1`, ...
    pub fn with_devices(mut self, count: usize) -> Self {
        self.devices = test_devices(count);
        self
    }

    /// Replace the option table. Option 0 (the option count) is prepended.
    pub fn with_options(self, options: Vec<TestOption>) -> Self {
        let mut table = vec![option_count_option()];
        table.extend(options);
        self.lock().options = table;
        self
    }

    pub fn with_parameters(mut self, parameters: ScanParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Script for `read` calls; once exhausted every read reports `Eof`.
    pub fn with_reads(mut self, reads: Vec<ReadStep>) -> Self {
        self.reads = reads;
        self
    }

    /// Scan `data` with `parameters`, delivered in chunks of `chunk` bytes.
    pub fn with_image(self, parameters: ScanParameters, data: &[u8], chunk: usize) -> Self {
        self.with_parameters(parameters)
            .with_reads(ReadStep::chunks(data, chunk))
    }

    /// Keep reporting `Eof` (instead of `Cancelled`) after a cancel.
    pub fn with_eof_after_cancel(mut self) -> Self {
        self.after_cancel = Status::Eof;
        self
    }

    /// Make `start` fail with `status`.
    pub fn with_start_status(mut self, status: Status) -> Self {
        self.start_status = Some(status);
        self
    }

    /// Make `get_parameters` fail with `status`.
    pub fn with_parameters_status(mut self, status: Status) -> Self {
        self.parameters_status = Some(status);
        self
    }

    /// Report `count` as option 0's value regardless of the real table size.
    pub fn with_declared_option_count(mut self, count: i32) -> Self {
        self.declared_option_count = Some(count);
        self
    }

    /// Delay every suspending call by `latency` instead of a bare yield.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every primitive invoked so far, in order.
    pub fn calls(&self) -> Vec<Operation> {
        self.lock().calls.clone()
    }

    /// How many times `operation` was invoked.
    pub fn call_count(&self, operation: Operation) -> usize {
        self.lock().calls.iter().filter(|op| **op == operation).count()
    }

    /// Stored value of option `index`, bypassing the protocol.
    pub fn option_value(&self, index: u32) -> Option<OptionValue> {
        self.lock()
            .options
            .get(index as usize)
            .and_then(|option| option.value.clone())
    }

    fn lock(&self) -> MutexGuard<'_, TestState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state and record the call.
    fn enter(&self, operation: Operation) -> MutexGuard<'_, TestState> {
        trace!(%operation, "test engine call");
        let mut state = self.lock();
        state.calls.push(operation);
        state
    }

    /// Lock, record the call, and require an open device.
    fn enter_open(&self, operation: Operation) -> EngineResult<MutexGuard<'_, TestState>> {
        let state = self.enter(operation);
        if state.open.is_none() {
            return Err(Status::Inval);
        }
        Ok(state)
    }

    async fn suspend(&self) {
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn option_count(&self, state: &TestState) -> i32 {
        self.declared_option_count
            .unwrap_or(state.options.len() as i32)
    }
}

#[async_trait]
impl Engine for TestEngine {
    fn get_state(&self) -> EngineState {
        let state = self.enter(Operation::GetState);
        let version_code = if state.initialized {
            TEST_VERSION.code()
        } else {
            0
        };
        EngineState {
            initialized: state.initialized,
            version_code,
            version: Version::from_code(version_code),
            open: state.open.is_some(),
        }
    }

    fn init(&self) -> EngineResult<u32> {
        let mut state = self.enter(Operation::Init);
        if state.initialized {
            return Err(Status::Inval);
        }
        state.initialized = true;
        Ok(TEST_VERSION.code())
    }

    async fn exit(&self) -> EngineResult<()> {
        self.suspend().await;
        let mut state = self.enter(Operation::Exit);
        if !state.initialized {
            return Err(Status::Inval);
        }
        state.initialized = false;
        state.open = None;
        state.scan = ScanState::Idle;
        Ok(())
    }

    async fn get_devices(&self) -> EngineResult<Vec<Device>> {
        self.suspend().await;
        let state = self.enter(Operation::GetDevices);
        if !state.initialized {
            return Err(Status::Inval);
        }
        Ok(self.devices.clone())
    }

    async fn open(&self, device_name: &str) -> EngineResult<()> {
        self.suspend().await;
        let mut state = self.enter(Operation::Open);
        if !state.initialized || state.open.is_some() {
            return Err(Status::Inval);
        }
        if !self.devices.iter().any(|device| device.name == device_name) {
            return Err(Status::Inval);
        }
        debug!(device = device_name, "test device opened");
        state.open = Some(device_name.to_string());
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        self.suspend().await;
        let mut state = self.enter(Operation::Close);
        state.open = None;
        state.scan = ScanState::Idle;
        Ok(())
    }

    fn get_option_descriptor(&self, index: u32) -> EngineResult<Option<OptionDescriptor>> {
        let state = self.enter_open(Operation::GetOptionDescriptor)?;
        Ok(state
            .options
            .get(index as usize)
            .map(|option| option.descriptor.clone()))
    }

    async fn get_option_value(&self, index: u32) -> EngineResult<Option<OptionValue>> {
        self.suspend().await;
        let state = self.enter_open(Operation::GetOptionValue)?;
        let option = state.options.get(index as usize).ok_or(Status::Inval)?;
        if option.descriptor.cap.inactive {
            return Err(Status::Inval);
        }
        if index == 0 {
            return Ok(Some(OptionValue::Int(self.option_count(&state))));
        }
        match option.descriptor.value_type {
            ValueType::Button | ValueType::Group => Ok(None),
            _ => Ok(option.value.clone()),
        }
    }

    async fn set_option_value(&self, index: u32, value: &OptionValue) -> EngineResult<SetInfo> {
        self.suspend().await;
        let mut state = self.enter_open(Operation::SetOptionValue)?;
        let option = state
            .options
            .get_mut(index as usize)
            .filter(|_| index != 0)
            .ok_or(Status::Inval)?;
        let cap = option.descriptor.cap;
        if cap.inactive || !cap.soft_select || !value.matches(&option.descriptor) {
            return Err(Status::Inval);
        }

        let (stored, inexact) = constrain(&option.descriptor, value)?;
        debug!(index, ?stored, inexact, "test option set");
        option.value = Some(stored);
        let dependents = option.dependents.clone();
        for dependent in &dependents {
            if let Some(target) = state.options.get_mut(*dependent as usize) {
                target.descriptor.cap.inactive = !target.descriptor.cap.inactive;
            }
        }

        Ok(SetInfo {
            inexact,
            reload_options: !dependents.is_empty(),
            reload_params: false,
        })
    }

    async fn set_option_auto(&self, index: u32) -> EngineResult<SetInfo> {
        self.suspend().await;
        let mut state = self.enter_open(Operation::SetOptionAuto)?;
        let option = state
            .options
            .get_mut(index as usize)
            .ok_or(Status::Inval)?;
        if !option.descriptor.cap.automatic || option.descriptor.cap.inactive {
            return Err(Status::Inval);
        }
        option.value = option.default.clone();
        Ok(SetInfo::default())
    }

    fn get_parameters(&self) -> EngineResult<ScanParameters> {
        let _state = self.enter_open(Operation::GetParameters)?;
        match self.parameters_status {
            Some(status) => Err(status),
            None => Ok(self.parameters),
        }
    }

    fn start(&self) -> EngineResult<()> {
        let mut state = self.enter_open(Operation::Start)?;
        if let Some(status) = self.start_status {
            return Err(status);
        }
        if matches!(state.scan, ScanState::Scanning(_)) {
            return Err(Status::DeviceBusy);
        }
        state.scan = ScanState::Scanning(self.reads.iter().cloned().collect());
        Ok(())
    }

    async fn read(&self) -> EngineResult<Vec<u8>> {
        self.suspend().await;
        let mut state = self.enter_open(Operation::Read)?;
        let next = match &mut state.scan {
            ScanState::Idle => return Err(Status::Inval),
            ScanState::Finished => return Err(Status::Eof),
            ScanState::Cancelled => return Err(self.after_cancel),
            ScanState::Scanning(steps) => steps.pop_front(),
        };
        match next {
            Some(ReadStep::Data(data)) => Ok(data),
            Some(ReadStep::Idle) => Ok(Vec::new()),
            Some(ReadStep::Status(status)) => Err(status),
            None => {
                state.scan = ScanState::Finished;
                Err(Status::Eof)
            }
        }
    }

    async fn cancel(&self) -> EngineResult<()> {
        self.suspend().await;
        let mut state = self.enter_open(Operation::Cancel)?;
        if !matches!(state.scan, ScanState::Idle) {
            state.scan = ScanState::Cancelled;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Value constraints
// ---------------------------------------------------------------------------

/// Round to the protocol's 16.16 fixed-point grid.
fn fix(value: f64) -> f64 {
    (value * 65536.0).round() / 65536.0
}

/// Apply a numeric constraint; returns the stored value and whether it moved.
fn constrain_number(value: f64, constraint: &Constraint) -> (f64, bool) {
    let constrained = match constraint {
        Constraint::Range { min, max, quant } => {
            let clamped = value.clamp(*min, *max);
            if *quant > 0.0 {
                (min + ((clamped - min) / quant).round() * quant).min(*max)
            } else {
                clamped
            }
        }
        Constraint::WordList(words) => words
            .iter()
            .copied()
            .min_by(|a, b| (a - value).abs().total_cmp(&(b - value).abs()))
            .unwrap_or(value),
        Constraint::None | Constraint::StringList(_) => value,
    };
    (constrained, constrained != value)
}

/// Convert a requested value into the value the device stores.
///
/// Fixed-point rounding is silent: only constraint adjustments are reported
/// as inexact.
fn constrain(descriptor: &OptionDescriptor, value: &OptionValue) -> EngineResult<(OptionValue, bool)> {
    let size = descriptor.size.max(1);
    Ok(match value {
        OptionValue::Bool(b) => (OptionValue::Bool(*b), false),
        OptionValue::Int(n) => {
            let (stored, inexact) = constrain_number(f64::from(*n), &descriptor.constraint);
            (OptionValue::Int(stored.round() as i32), inexact)
        }
        OptionValue::Fixed(x) => {
            let (stored, inexact) = constrain_number(*x, &descriptor.constraint);
            (OptionValue::Fixed(fix(stored)), inexact)
        }
        OptionValue::IntList(items) => (
            OptionValue::IntList(items.iter().copied().take(size).collect()),
            items.len() > size,
        ),
        OptionValue::FixedList(items) => (
            OptionValue::FixedList(items.iter().copied().take(size).map(fix).collect()),
            items.len() > size,
        ),
        OptionValue::String(s) => {
            if let Constraint::StringList(allowed) = &descriptor.constraint {
                if !allowed.contains(s) {
                    return Err(Status::Inval);
                }
            }
            let stored: String = s.chars().take(descriptor.size).collect();
            let inexact = stored.len() != s.len();
            (OptionValue::String(stored), inexact)
        }
    })
}

// ---------------------------------------------------------------------------
// Default device and option tables
// ---------------------------------------------------------------------------

fn test_devices(count: usize) -> Vec<Device> {
    (0..count)
        .map(|i| Device {
            name: format!("test:{i}"),
            vendor: "Noname".into(),
            model: "frontend-tester".into(),
            kind: "virtual device".into(),
        })
        .collect()
}

fn descriptor(
    name: &str,
    title: &str,
    value_type: ValueType,
    unit: Unit,
    size: usize,
    constraint: Constraint,
) -> OptionDescriptor {
    OptionDescriptor {
        name: name.into(),
        title: title.into(),
        desc: format!("{title}."),
        value_type,
        unit,
        size,
        cap: Capabilities {
            soft_select: true,
            soft_detect: true,
            ..Default::default()
        },
        constraint,
    }
}

fn option_count_option() -> TestOption {
    let mut desc = descriptor(
        "",
        "Number of options",
        ValueType::Int,
        Unit::None,
        1,
        Constraint::None,
    );
    desc.cap.soft_select = false;
    TestOption::new(desc, None)
}

fn area_option(name: &str, title: &str, max: f64, value: f64) -> TestOption {
    TestOption::new(
        descriptor(
            name,
            title,
            ValueType::Fixed,
            Unit::Mm,
            1,
            Constraint::Range {
                min: 0.0,
                max,
                quant: 0.0,
            },
        ),
        Some(OptionValue::Fixed(fix(value))),
    )
}

/// Option table of the default test device. Index 0 is the option count.
fn default_options() -> Vec<TestOption> {
    let mode = TestOption::new(
        descriptor(
            "mode",
            "Scan mode",
            ValueType::String,
            Unit::None,
            32,
            Constraint::StringList(vec!["Gray".into(), "Color".into(), "Lineart".into()]),
        ),
        Some(OptionValue::String("Gray".into())),
    )
    .with_dependents(vec![9]);

    let depth = TestOption::new(
        descriptor(
            "depth",
            "Bit depth",
            ValueType::Int,
            Unit::Bit,
            1,
            Constraint::WordList(vec![1.0, 8.0]),
        ),
        Some(OptionValue::Int(8)),
    );

    let mut resolution = TestOption::new(
        descriptor(
            "resolution",
            "Scan resolution",
            ValueType::Int,
            Unit::Dpi,
            1,
            Constraint::WordList(vec![75.0, 150.0, 300.0, 600.0]),
        ),
        Some(OptionValue::Int(150)),
    );
    resolution.descriptor.cap.automatic = true;

    let preview = TestOption::new(
        descriptor(
            "preview",
            "Preview",
            ValueType::Bool,
            Unit::None,
            1,
            Constraint::None,
        ),
        Some(OptionValue::Bool(false)),
    );

    let mut threshold = TestOption::new(
        descriptor(
            "threshold",
            "Threshold",
            ValueType::Fixed,
            Unit::Percent,
            1,
            Constraint::Range {
                min: 0.0,
                max: 100.0,
                quant: 1.0,
            },
        ),
        Some(OptionValue::Fixed(50.0)),
    );
    threshold.descriptor.cap.inactive = true;

    let mut group = descriptor(
        "geometry-group",
        "Geometry",
        ValueType::Group,
        Unit::None,
        0,
        Constraint::None,
    );
    group.cap = Capabilities::default();

    let mut calibrate = descriptor(
        "calibrate",
        "Calibrate",
        ValueType::Button,
        Unit::None,
        0,
        Constraint::None,
    );
    calibrate.cap.advanced = true;

    let mut lamp = descriptor(
        "lamp-switch",
        "Lamp switch",
        ValueType::Bool,
        Unit::None,
        1,
        Constraint::None,
    );
    lamp.cap.soft_select = false;
    lamp.cap.soft_detect = false;
    lamp.cap.hard_select = true;

    vec![
        option_count_option(),
        mode,
        depth,
        resolution,
        preview,
        area_option("tl-x", "Top-left x", 215.9, 0.0),
        area_option("tl-y", "Top-left y", 297.0, 0.0),
        area_option("br-x", "Bottom-right x", 215.9, 215.9),
        area_option("br-y", "Bottom-right y", 297.0, 297.0),
        threshold,
        TestOption::new(group, None),
        TestOption::new(calibrate, None),
        TestOption::new(lamp, None),
    ]
}
