// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine trait: one method per protocol primitive.
//
// Primitives that may suspend for device I/O are `async`; the rest are plain
// functions and must return without suspending.  Which is which follows
// `Operation::may_suspend`.

use async_trait::async_trait;

use scanwerk_core::{
    Device, EngineState, OptionDescriptor, OptionValue, ScanParameters, SetInfo, Status,
};

/// Result of a single engine primitive. `Status::Good` never appears as an
/// error.
pub type EngineResult<T> = std::result::Result<T, Status>;

/// The native scanning engine.
///
/// Implementations own exactly one device handle and are not expected to
/// handle overlapping calls; callers must go through `EngineHandle`.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Library state (initialized, version, open device).
    fn get_state(&self) -> EngineState;

    /// Initialize the library and return its version code.
    fn init(&self) -> EngineResult<u32>;

    /// Shut the library down, closing any open device.
    async fn exit(&self) -> EngineResult<()>;

    /// List the devices the engine can reach.
    async fn get_devices(&self) -> EngineResult<Vec<Device>>;

    /// Open a device by name.
    async fn open(&self, device_name: &str) -> EngineResult<()>;

    /// Close the open device.
    async fn close(&self) -> EngineResult<()>;

    /// Descriptor of option `index`, or `None` past the last option.
    fn get_option_descriptor(&self, index: u32) -> EngineResult<Option<OptionDescriptor>>;

    /// Current value of option `index`; `None` for options without a value.
    async fn get_option_value(&self, index: u32) -> EngineResult<Option<OptionValue>>;

    async fn set_option_value(&self, index: u32, value: &OptionValue) -> EngineResult<SetInfo>;

    /// Put option `index` in automatic mode.
    async fn set_option_auto(&self, index: u32) -> EngineResult<SetInfo>;

    fn get_parameters(&self) -> EngineResult<ScanParameters>;

    fn start(&self) -> EngineResult<()>;

    /// Non-blocking read: returns whatever is ready, possibly nothing.
    async fn read(&self) -> EngineResult<Vec<u8>>;

    /// Cancel the current scan. Required after every completed or aborted
    /// scan.
    async fn cancel(&self) -> EngineResult<()>;

    fn status_text(&self, status: Status) -> String {
        status.description().to_string()
    }
}
