//! Kernel performance monitoring and event tracing.
//!
//! [`perf`] drives the performance monitoring units found in [`pmu`] and
//! samples their overflows. [`trace`] records kernel events into an offline
//! ring or streams them to a client over a [`trace::TracePipeline`].
//!
//! Everything kernel specific is reached through the [`Platform`] trait.

mod error;

pub mod lock;
pub mod perf;
pub mod platform;
pub mod pmu;
pub mod testing_common;
pub mod trace;

pub use crate::error::{PerfError, TraceError};
pub use crate::lock::{IrqLock, IrqLockGuard, LockMode};
pub use crate::perf::{Perf, PerfConfigAttr, PerfEventConfig, PerfStatus};
pub use crate::platform::{IrqState, MemPoolInfo, PerfRegs, Platform};
pub use crate::pmu::{Pmu, PmuRegistry, PmuType};
pub use crate::trace::{TraceConfig, TraceMode, TraceState, Tracer};
