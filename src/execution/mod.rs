//! # Execution Module
//!
//! Parallel fan-out inside a step: a bounded pool of OS worker threads
//! draining a shared task queue, plus the wrapper used to run external
//! executables.

pub mod interrupt;
pub mod process;
pub mod progress;
pub mod queue;
pub mod worker_pool;

pub use interrupt::install_interrupt_handler;
pub use process::{CapturedOutput, CommandLine};
pub use progress::{ProgressCounter, ProgressThrottle};
pub use queue::{Task, TaskQueue};
pub use worker_pool::{CleanupHook, PoolSummary, WorkerPool, WorkerPoolConfig};
