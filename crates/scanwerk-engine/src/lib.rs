// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk engine: the boundary to the native scanning engine.
//
// The engine is a single logical thread of execution behind one mutable
// device handle.  Every call goes through a `CallSerializer` so that at most
// one operation is ever in flight; `EngineHandle` is the serialized view the
// rest of the workspace talks to.

pub mod handle;
pub mod serializer;
pub mod test_engine;
pub mod traits;

pub use handle::EngineHandle;
pub use serializer::CallSerializer;
pub use test_engine::{ReadStep, TestEngine, TestOption};
pub use traits::{Engine, EngineResult};
