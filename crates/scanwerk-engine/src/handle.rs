// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Serialized engine handle.
//
// Wraps an `Engine` with its own `CallSerializer` and exposes every protocol
// primitive.  Suspending primitives are async and always queued;
// non-suspending ones are synchronous and fail with `ConcurrencyViolation`
// while anything is outstanding.  Every call is logged at debug level under
// this module's target, which `ClientConfig::debug_calls` switches on.

use std::sync::Arc;

use tracing::debug;

use scanwerk_core::{
    Device, EngineState, Operation, OptionDescriptor, OptionValue, Result, ScanParameters,
    ScanwerkError, SetInfo, Status,
};

use crate::serializer::CallSerializer;
use crate::traits::{Engine, EngineResult};

/// Clonable, serialized view of one engine instance.
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<dyn Engine>,
    serializer: CallSerializer,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("serializer", &self.serializer)
            .finish_non_exhaustive()
    }
}

impl EngineHandle {
    pub fn new(engine: impl Engine + 'static) -> Self {
        Self::from_arc(Arc::new(engine))
    }

    /// Wrap a shared engine. Each call creates a fresh serializer, so only
    /// one handle per engine instance should exist (clone the handle instead).
    pub fn from_arc(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            serializer: CallSerializer::new(),
        }
    }

    pub fn serializer(&self) -> &CallSerializer {
        &self.serializer
    }

    /// Whether an engine call is currently outstanding.
    pub fn is_busy(&self) -> bool {
        self.serializer.is_busy()
    }

    // -- Non-suspending primitives ---------------------------------------------

    pub fn get_state(&self) -> Result<EngineState> {
        self.immediate(Operation::GetState, |engine| Ok(engine.get_state()))
    }

    /// Initialize the engine; returns the version code.
    pub fn init(&self) -> Result<u32> {
        self.immediate(Operation::Init, |engine| engine.init())
    }

    pub fn get_option_descriptor(&self, index: u32) -> Result<Option<OptionDescriptor>> {
        self.immediate(Operation::GetOptionDescriptor, |engine| {
            engine.get_option_descriptor(index)
        })
    }

    pub fn get_parameters(&self) -> Result<ScanParameters> {
        self.immediate(Operation::GetParameters, |engine| engine.get_parameters())
    }

    pub fn start(&self) -> Result<()> {
        self.immediate(Operation::Start, |engine| engine.start())
    }

    pub fn status_text(&self, status: Status) -> Result<String> {
        self.immediate(Operation::StatusText, |engine| Ok(engine.status_text(status)))
    }

    // -- Suspending primitives -------------------------------------------------

    pub async fn exit(&self) -> Result<()> {
        let outcome = self
            .serializer
            .submit(Operation::Exit, || self.engine.exit())
            .await;
        finish(Operation::Exit, outcome)
    }

    pub async fn get_devices(&self) -> Result<Vec<Device>> {
        let outcome = self
            .serializer
            .submit(Operation::GetDevices, || self.engine.get_devices())
            .await;
        finish(Operation::GetDevices, outcome)
    }

    pub async fn open(&self, device_name: &str) -> Result<()> {
        let outcome = self
            .serializer
            .submit(Operation::Open, || self.engine.open(device_name))
            .await;
        finish(Operation::Open, outcome)
    }

    pub async fn close(&self) -> Result<()> {
        let outcome = self
            .serializer
            .submit(Operation::Close, || self.engine.close())
            .await;
        finish(Operation::Close, outcome)
    }

    pub async fn get_option_value(&self, index: u32) -> Result<Option<OptionValue>> {
        let outcome = self
            .serializer
            .submit(Operation::GetOptionValue, || self.engine.get_option_value(index))
            .await;
        finish(Operation::GetOptionValue, outcome)
    }

    pub async fn set_option_value(&self, index: u32, value: &OptionValue) -> Result<SetInfo> {
        let outcome = self
            .serializer
            .submit(Operation::SetOptionValue, || {
                self.engine.set_option_value(index, value)
            })
            .await;
        finish(Operation::SetOptionValue, outcome)
    }

    pub async fn set_option_auto(&self, index: u32) -> Result<SetInfo> {
        let outcome = self
            .serializer
            .submit(Operation::SetOptionAuto, || self.engine.set_option_auto(index))
            .await;
        finish(Operation::SetOptionAuto, outcome)
    }

    /// Non-blocking read of the next chunk; an empty chunk means no data was
    /// ready yet.
    pub async fn read(&self) -> Result<Vec<u8>> {
        let outcome = self
            .serializer
            .submit(Operation::Read, || self.engine.read())
            .await;
        if let Ok(data) = &outcome {
            debug!(bytes = data.len(), "read returned data");
        }
        finish(Operation::Read, outcome)
    }

    pub async fn cancel(&self) -> Result<()> {
        let outcome = self
            .serializer
            .submit(Operation::Cancel, || self.engine.cancel())
            .await;
        finish(Operation::Cancel, outcome)
    }

    fn immediate<T>(
        &self,
        operation: Operation,
        call: impl FnOnce(&dyn Engine) -> EngineResult<T>,
    ) -> Result<T> {
        let outcome = self
            .serializer
            .run_immediate(operation, || call(self.engine.as_ref()))?;
        finish(operation, outcome)
    }
}

/// Log the outcome of a primitive and lift its status into `ScanwerkError`.
fn finish<T>(operation: Operation, outcome: EngineResult<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            debug!(%operation, status = %Status::Good, "engine call");
            Ok(value)
        }
        Err(status) => {
            debug!(%operation, %status, "engine call");
            Err(ScanwerkError::status(operation, status))
        }
    }
}
