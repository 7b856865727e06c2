// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Event emitter with reentrancy deferral.
//
// A `fire` issued from inside a listener (or from another thread while a
// dispatch is running) is queued and dispatched by the outermost `fire` once
// the current dispatch completes.  Dispatches never overlap, and events are
// delivered in the order they were fired.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{trace, warn};

use scanwerk_core::Result;

/// An event that can be dispatched by an `EventEmitter`.
pub trait Event: Send + 'static {
    /// Discriminant listeners subscribe to.
    type Kind: Copy + Eq + Debug + Send + 'static;

    fn kind(&self) -> Self::Kind;
}

/// A registered listener. Returning an error stops the remaining listeners
/// for that event.
pub type Listener<E> = Box<dyn FnMut(&E) -> Result<()> + Send>;

struct Registered<E: Event> {
    kind: E::Kind,
    listener: Listener<E>,
}

struct EmitterState<E: Event> {
    listeners: Vec<Registered<E>>,
    firing: bool,
    pending: VecDeque<E>,
}

/// Per-source listener registry and dispatch queue.
pub struct EventEmitter<E: Event> {
    state: Mutex<EmitterState<E>>,
}

impl<E: Event> Default for EventEmitter<E> {
    fn default() -> Self {
        Self {
            state: Mutex::new(EmitterState {
                listeners: Vec::new(),
                firing: false,
                pending: VecDeque::new(),
            }),
        }
    }
}

impl<E: Event> Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("EventEmitter")
            .field("listeners", &state.listeners.len())
            .field("firing", &state.firing)
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl<E: Event> EventEmitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for events of `kind`.
    ///
    /// Listeners registered during a dispatch only see later events.
    pub fn on<F>(&self, kind: E::Kind, listener: F)
    where
        F: FnMut(&E) -> Result<()> + Send + 'static,
    {
        self.lock().listeners.push(Registered {
            kind,
            listener: Box::new(listener),
        });
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.lock()
            .listeners
            .iter()
            .filter(|registered| registered.kind == kind)
            .count()
    }

    /// Whether a dispatch is currently running.
    pub fn is_firing(&self) -> bool {
        self.lock().firing
    }

    /// Dispatch `event` to its listeners.
    ///
    /// If a dispatch is already running the event is queued and `Ok` is
    /// returned immediately; the outermost call drains the queue and reports
    /// the first listener error it saw.
    pub fn fire(&self, event: E) -> Result<()> {
        {
            let mut state = self.lock();
            if state.firing {
                trace!(kind = ?event.kind(), "event deferred until current dispatch ends");
                state.pending.push_back(event);
                return Ok(());
            }
            state.firing = true;
            state.pending.push_back(event);
        }

        let mut outcome = Ok(());
        let mut firing = Firing {
            emitter: self,
            done: false,
        };
        loop {
            let (event, listeners) = {
                let mut state = self.lock();
                match state.pending.pop_front() {
                    Some(event) => (event, std::mem::take(&mut state.listeners)),
                    None => {
                        state.firing = false;
                        firing.done = true;
                        break;
                    }
                }
            };

            // Listeners run unlocked so they can fire or register freely.
            let mut taken = Taken {
                emitter: self,
                listeners,
            };
            let result = dispatch(&mut taken.listeners, &event);
            drop(taken);

            if let Err(err) = result {
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, EmitterState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Listeners taken out for a dispatch; put back in front of any registered
/// meanwhile when dropped, also when a listener panics.
struct Taken<'a, E: Event> {
    emitter: &'a EventEmitter<E>,
    listeners: Vec<Registered<E>>,
}

impl<E: Event> Drop for Taken<'_, E> {
    fn drop(&mut self) {
        let mut state = self.emitter.lock();
        let added = std::mem::replace(&mut state.listeners, std::mem::take(&mut self.listeners));
        state.listeners.extend(added);
    }
}

/// Ends the outermost dispatch if it unwinds before draining the queue.
struct Firing<'a, E: Event> {
    emitter: &'a EventEmitter<E>,
    done: bool,
}

impl<E: Event> Drop for Firing<'_, E> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut state = self.emitter.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        state.firing = false;
        warn!(dropped, "listener panicked, pending events discarded");
    }
}

fn dispatch<E: Event>(listeners: &mut [Registered<E>], event: &E) -> Result<()> {
    let kind = event.kind();
    trace!(?kind, "dispatching event");
    for registered in listeners.iter_mut().filter(|r| r.kind == kind) {
        (registered.listener)(event)?;
    }
    Ok(())
}
