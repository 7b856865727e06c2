// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan session: one scan's lifecycle from start to the acknowledged cancel.
//
// `start` issues the engine's start primitive, fetches the scan parameters,
// fires `Start`, then hands over to a polling task.  The task reads on a
// timer (fast after data, slow after an idle read), fires `Data` for every
// non-empty chunk, and once the session is killed (end of data, user cancel,
// or an error) issues `cancel` on every tick until the engine acknowledges
// it.  `Stop` fires exactly once when the task finishes.
//
// Sessions are single use.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use scanwerk_core::{ClientConfig, Result, ScanParameters, ScanwerkError, SessionId, Status};
use scanwerk_engine::EngineHandle;

use crate::events::{Event, EventEmitter};

/// Lifecycle state of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Started,
    Reading,
    StoppedOk,
    StoppedError,
}

/// Events fired by a `ScanSession`.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// The scan started; fired once, before any data.
    Start { parameters: ScanParameters },
    /// A non-empty chunk of raw scan data.
    Data {
        parameters: ScanParameters,
        data: Vec<u8>,
    },
    /// The session finished. `parameters` is `None` when they could not be
    /// fetched; `error` is the terminal error, if any.
    Stop {
        parameters: Option<ScanParameters>,
        error: Option<ScanwerkError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEventKind {
    Start,
    Data,
    Stop,
}

impl Event for ScanEvent {
    type Kind = ScanEventKind;

    fn kind(&self) -> ScanEventKind {
        match self {
            Self::Start { .. } => ScanEventKind::Start,
            Self::Data { .. } => ScanEventKind::Data,
            Self::Stop { .. } => ScanEventKind::Stop,
        }
    }
}

/// Outcome of a completed scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSummary {
    pub session: SessionId,
    pub parameters: Option<ScanParameters>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Non-empty chunks returned by `read`.
    pub chunks: usize,
    pub bytes: usize,
    /// The scan ended because `cancel` was requested.
    pub cancelled: bool,
}

/// Kill flag of a running session.
#[derive(Debug, Clone, PartialEq)]
enum Kill {
    Alive,
    /// `ScanSession::cancel` was called.
    Requested,
    /// The engine reported end of data.
    Finished,
    Failed(ScanwerkError),
}

impl Kill {
    fn is_killed(&self) -> bool {
        !matches!(self, Self::Alive)
    }

    fn into_outcome(self) -> Result<()> {
        match self {
            Self::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    kill: Kill,
    parameters: Option<ScanParameters>,
}

#[derive(Debug)]
struct Shared {
    id: SessionId,
    inner: Mutex<Inner>,
    events: EventEmitter<ScanEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn kill(&self) -> Kill {
        self.lock().kill.clone()
    }

    /// Mark end of data unless the session was already killed, in which case
    /// the existing kill is returned.
    fn finish(&self) -> std::result::Result<(), Kill> {
        let mut inner = self.lock();
        if inner.kill == Kill::Alive {
            inner.kill = Kill::Finished;
            Ok(())
        } else {
            Err(inner.kill.clone())
        }
    }

    /// Record `err` as the terminal error unless one is already recorded.
    fn fail(&self, err: ScanwerkError) {
        let mut inner = self.lock();
        if !matches!(inner.kill, Kill::Failed(_)) {
            inner.kill = Kill::Failed(err);
        }
    }

    fn set_state(&self, state: SessionState) {
        self.lock().state = state;
    }
}

#[derive(Debug, Clone, Copy)]
struct Polling {
    fast: Duration,
    slow: Duration,
}

/// One scan against an open device.
#[derive(Debug)]
pub struct ScanSession {
    engine: EngineHandle,
    polling: Polling,
    shared: Arc<Shared>,
}

impl ScanSession {
    /// A session using the default 10 ms / 200 ms poll intervals.
    pub fn new(engine: EngineHandle) -> Self {
        Self::with_config(engine, &ClientConfig::default())
    }

    pub fn with_config(engine: EngineHandle, config: &ClientConfig) -> Self {
        Self {
            engine,
            polling: Polling {
                fast: config.fast_poll(),
                slow: config.slow_poll(),
            },
            shared: Arc::new(Shared {
                id: SessionId::new(),
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    kill: Kill::Alive,
                    parameters: None,
                }),
                events: EventEmitter::new(),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Parameters fetched at start, if any.
    pub fn parameters(&self) -> Option<ScanParameters> {
        self.shared.lock().parameters
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.lock().kill == Kill::Requested
    }

    /// Register a listener for session events.
    pub fn on<F>(&self, kind: ScanEventKind, listener: F)
    where
        F: FnMut(&ScanEvent) -> Result<()> + Send + 'static,
    {
        self.shared.events.on(kind, listener);
    }

    /// Start scanning.
    ///
    /// Fails with `AlreadyUsed` unless the session is idle.  A failing start
    /// primitive ends the session in `StoppedError` without firing any event.
    /// Once the engine has started, every later failure is reported through
    /// the returned `ScanRun` so that the engine still receives its cancel.
    ///
    /// Fails with `Config`, before touching the engine, when called outside
    /// a tokio runtime.
    #[instrument(skip(self), fields(session = %self.shared.id))]
    pub fn start(&self) -> Result<ScanRun> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ScanwerkError::Config(format!("scan needs a tokio runtime: {e}")))?;
        {
            let mut inner = self.shared.lock();
            if inner.state != SessionState::Idle {
                return Err(ScanwerkError::AlreadyUsed);
            }
            inner.state = SessionState::Started;
        }

        if let Err(err) = self.engine.start() {
            let state = match err {
                // Nothing reached the engine; the session can still be used.
                ScanwerkError::ConcurrencyViolation { .. } => SessionState::Idle,
                _ => SessionState::StoppedError,
            };
            warn!(%err, ?state, "scan did not start");
            self.shared.set_state(state);
            return Err(err);
        }
        let started_at = Utc::now();

        let parameters = match self.engine.get_parameters() {
            Ok(parameters) => {
                info!(%parameters, "scan started");
                Some(parameters)
            }
            Err(err) => {
                warn!(%err, "scan parameters unavailable, cancelling");
                self.shared.fail(err);
                None
            }
        };
        self.shared.lock().parameters = parameters;

        if let Some(parameters) = parameters {
            if let Err(err) = self.shared.events.fire(ScanEvent::Start { parameters }) {
                warn!(%err, "start listener failed, cancelling");
                self.shared.fail(err);
            }
        }

        self.shared.set_state(SessionState::Reading);
        let task = runtime.spawn(
            run(
                Arc::clone(&self.shared),
                self.engine.clone(),
                self.polling,
                parameters,
                started_at,
            )
            .instrument(info_span!("scan", session = %self.shared.id)),
        );

        Ok(ScanRun { parameters, task })
    }

    /// Request cancellation.
    ///
    /// Only sets the kill flag; the polling task issues the engine's cancel
    /// on its next tick.  Returns `false` if the session is not running or
    /// already being stopped.
    pub fn cancel(&self) -> bool {
        let mut inner = self.shared.lock();
        let running = matches!(
            inner.state,
            SessionState::Started | SessionState::Reading
        );
        if running && inner.kill == Kill::Alive {
            info!(session = %self.shared.id, "scan cancel requested");
            inner.kill = Kill::Requested;
            true
        } else {
            false
        }
    }
}

/// Handle to a started scan.
#[derive(Debug)]
pub struct ScanRun {
    parameters: Option<ScanParameters>,
    task: JoinHandle<Result<ScanSummary>>,
}

impl ScanRun {
    /// Parameters reported at start; `None` if they could not be fetched,
    /// in which case `wait` reports that error.
    pub fn parameters(&self) -> Option<ScanParameters> {
        self.parameters
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the scan to finish.
    pub async fn wait(self) -> Result<ScanSummary> {
        self.task
            .await
            .map_err(|e| ScanwerkError::Listener(format!("scan task ended abnormally: {e}")))?
    }
}

/// Polling task body: read until the engine acknowledges the cancel, then
/// fire `Stop`.
async fn run(
    shared: Arc<Shared>,
    engine: EngineHandle,
    polling: Polling,
    parameters: Option<ScanParameters>,
    started_at: DateTime<Utc>,
) -> Result<ScanSummary> {
    let mut progress = Progress::default();
    let mut outcome = read_loop(&shared, &engine, polling, parameters, &mut progress).await;

    let error = outcome.as_ref().err().cloned();
    let stopped = shared.events.fire(ScanEvent::Stop { parameters, error });
    if outcome.is_ok() {
        if let Err(err) = stopped {
            outcome = Err(err);
        }
    }

    match &outcome {
        Ok(()) => {
            shared.set_state(SessionState::StoppedOk);
            info!(chunks = progress.chunks, bytes = progress.bytes, "scan finished");
        }
        Err(err) => {
            shared.set_state(SessionState::StoppedError);
            warn!(%err, chunks = progress.chunks, "scan failed");
        }
    }

    outcome.map(|()| ScanSummary {
        session: shared.id,
        parameters,
        started_at,
        finished_at: Utc::now(),
        chunks: progress.chunks,
        bytes: progress.bytes,
        cancelled: progress.cancelled,
    })
}

#[derive(Debug, Default)]
struct Progress {
    chunks: usize,
    bytes: usize,
    cancelled: bool,
}

async fn read_loop(
    shared: &Shared,
    engine: &EngineHandle,
    polling: Polling,
    parameters: Option<ScanParameters>,
    progress: &mut Progress,
) -> Result<()> {
    let mut delay = polling.slow;
    loop {
        tokio::time::sleep(delay).await;

        let kill = shared.kill();
        if kill.is_killed() {
            progress.cancelled |= kill == Kill::Requested;
            if let Err(err) = engine.cancel().await {
                debug!(%err, "cancel status ignored");
            }
        }

        match engine.read().await {
            Ok(data) if data.is_empty() => delay = polling.slow,
            Ok(data) => {
                delay = polling.fast;
                progress.chunks += 1;
                progress.bytes += data.len();
                if let Some(parameters) = parameters {
                    if let Err(err) = shared.events.fire(ScanEvent::Data { parameters, data }) {
                        warn!(%err, "data listener failed, cancelling");
                        shared.fail(err);
                    }
                }
            }
            Err(err) => {
                delay = polling.slow;
                match err.engine_status() {
                    Some(Status::Cancelled) => return shared.kill().into_outcome(),
                    Some(Status::Eof) => match shared.finish() {
                        Ok(()) => debug!("end of data, cancelling"),
                        // Some backends keep reporting end of data after the
                        // cancel instead of switching to cancelled.
                        Err(kill) => return kill.into_outcome(),
                    },
                    _ => {
                        warn!(%err, "scan error, cancelling");
                        shared.fail(err);
                    }
                }
            }
        }
    }
}
