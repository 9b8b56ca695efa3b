//! A single-threaded, stackful, cooperative coroutine scheduler.

mod context;
mod engine;
mod routine;

pub use engine::{Engine, RoutineId};
