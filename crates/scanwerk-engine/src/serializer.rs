// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Call serializer: single-flight access to one engine.
//
// Suspending operations are queued FIFO and resolved in submission order.
// Non-suspending operations run immediately when the engine is free and fail
// with `ConcurrencyViolation` otherwise; they are never queued.
//
// Ownership of the busy flag passes directly from the finishing operation to
// the next waiter, so a newcomer can never overtake the queue.  A waiter that
// is dropped (its future cancelled) before or after being handed the turn
// passes it on, so the queue never stalls.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use scanwerk_core::{Operation, Result, ScanwerkError};

/// Busy flag plus FIFO of waiting suspending operations.
#[derive(Default)]
struct State {
    busy: bool,
    outstanding: Option<Operation>,
    queue: VecDeque<(Operation, oneshot::Sender<()>)>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the engine: wake the oldest live waiter or clear the busy flag.
    fn hand_off(&self) {
        let mut state = self.lock();
        while let Some((operation, waiter)) = state.queue.pop_front() {
            if waiter.send(()).is_ok() {
                trace!(%operation, "engine handed to queued operation");
                state.outstanding = Some(operation);
                return;
            }
        }
        state.busy = false;
        state.outstanding = None;
    }
}

/// Owned scheduler for one engine instance.
///
/// Cloning shares the same queue; separate `CallSerializer::new()` instances
/// never interfere with each other.
#[derive(Clone, Default)]
pub struct CallSerializer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CallSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("CallSerializer")
            .field("busy", &state.busy)
            .field("outstanding", &state.outstanding)
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl CallSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an operation currently holds the engine.
    pub fn is_busy(&self) -> bool {
        self.inner.lock().busy
    }

    /// The operation currently holding the engine, if any.
    pub fn outstanding(&self) -> Option<Operation> {
        self.inner.lock().outstanding
    }

    /// Number of suspending operations waiting for their turn.
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Run a suspending operation, waiting behind every earlier submission.
    ///
    /// The engine stays marked busy until `call`'s future completes or is
    /// dropped.
    pub async fn submit<F, Fut, T>(&self, operation: Operation, call: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire(operation).await;
        call().await
    }

    /// Run a non-suspending operation now, or fail if the engine is held.
    pub fn run_immediate<F, T>(&self, operation: Operation, call: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        let _permit = self.try_acquire(operation)?;
        Ok(call())
    }

    fn try_acquire(&self, operation: Operation) -> Result<Permit> {
        let mut state = self.inner.lock();
        if state.busy {
            warn!(
                %operation,
                outstanding = ?state.outstanding,
                "non-suspending call rejected while engine is busy"
            );
            return Err(ScanwerkError::ConcurrencyViolation { operation });
        }
        state.busy = true;
        state.outstanding = Some(operation);
        Ok(Permit {
            inner: Arc::clone(&self.inner),
        })
    }

    async fn acquire(&self, operation: Operation) -> Permit {
        let rx = {
            let mut state = self.inner.lock();
            if !state.busy {
                state.busy = true;
                state.outstanding = Some(operation);
                return Permit {
                    inner: Arc::clone(&self.inner),
                };
            }
            let (tx, rx) = oneshot::channel();
            state.queue.push_back((operation, tx));
            debug!(%operation, queued = state.queue.len(), "engine busy, operation queued");
            rx
        };

        Waiter {
            rx,
            inner: Arc::clone(&self.inner),
            granted: false,
        }
        .wait()
        .await
    }
}

/// Exclusive hold on the engine; releasing it hands the engine on.
struct Permit {
    inner: Arc<Inner>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.inner.hand_off();
    }
}

/// A queued operation waiting for its turn.
struct Waiter {
    rx: oneshot::Receiver<()>,
    inner: Arc<Inner>,
    granted: bool,
}

impl Waiter {
    async fn wait(mut self) -> Permit {
        // Senders are only dropped unsent when this receiver is already
        // closed, so completion here always means the turn was handed over.
        let _ = (&mut self.rx).await;
        self.granted = true;
        Permit {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            // The turn arrived after the waiting future was abandoned.
            self.inner.hand_off();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[tokio::test]
    async fn immediate_operation_runs_when_idle() {
        let serializer = CallSerializer::new();
        let value = serializer
            .run_immediate(Operation::GetParameters, || 42)
            .expect("engine idle");
        assert_eq!(value, 42);
        assert!(!serializer.is_busy());
    }

    #[tokio::test]
    async fn immediate_operation_fails_while_suspending_one_is_outstanding() {
        let serializer = CallSerializer::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let background = serializer.clone();
        let read = tokio::spawn(async move {
            background
                .submit(Operation::Read, || async move {
                    let _ = release_rx.await;
                    "read done"
                })
                .await
        });

        while !serializer.is_busy() {
            tokio::task::yield_now().await;
        }
        assert_eq!(serializer.outstanding(), Some(Operation::Read));

        let result = serializer.run_immediate(Operation::Start, || ());
        assert_eq!(
            result,
            Err(ScanwerkError::ConcurrencyViolation {
                operation: Operation::Start
            })
        );
        assert_eq!(serializer.queued(), 0);

        release_tx.send(()).expect("read still waiting");
        assert_eq!(read.await.expect("join"), "read done");
        assert!(!serializer.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_operations_resolve_in_submission_order() {
        let serializer = CallSerializer::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for (i, delay) in [30u64, 10, 20, 0].into_iter().enumerate() {
            let serializer = serializer.clone();
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                serializer
                    .submit(Operation::GetOptionValue, || async move {
                        order.lock().expect("order").push(format!("start {i}"));
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        order.lock().expect("order").push(format!("end {i}"));
                    })
                    .await
            }));
            // Make sure submissions are enqueued in loop order.
            tokio::task::yield_now().await;
        }
        for task in tasks {
            task.await.expect("join");
        }

        let order = order.lock().expect("order").clone();
        assert_eq!(
            order,
            vec![
                "start 0", "end 0", "start 1", "end 1", "start 2", "end 2", "start 3", "end 3"
            ]
        );
        assert!(!serializer.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_waiter_does_not_stall_the_queue() {
        let serializer = CallSerializer::new();

        let first = {
            let serializer = serializer.clone();
            tokio::spawn(async move {
                serializer
                    .submit(Operation::Read, || {
                        tokio::time::sleep(Duration::from_millis(50))
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let abandoned = {
            let serializer = serializer.clone();
            tokio::spawn(async move {
                serializer
                    .submit(Operation::Cancel, || async { "never runs" })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(serializer.queued(), 1);
        abandoned.abort();
        let _ = abandoned.await;

        let last = serializer
            .submit(Operation::Close, || async { "closed" })
            .await;
        assert_eq!(last, "closed");
        first.await.expect("join");
        assert!(!serializer.is_busy());
    }

    #[tokio::test]
    async fn separate_serializers_do_not_interfere() {
        let a = CallSerializer::new();
        let b = CallSerializer::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let held = a.clone();
        let task = tokio::spawn(async move {
            held.submit(Operation::Read, || async move {
                let _ = release_rx.await;
            })
            .await
        });
        while !a.is_busy() {
            tokio::task::yield_now().await;
        }

        assert!(b.run_immediate(Operation::Start, || ()).is_ok());
        release_tx.send(()).expect("waiting");
        task.await.expect("join");
    }
}
