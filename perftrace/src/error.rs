use crate::pmu::PmuType;
use crate::trace::TraceState;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PerfError {
    #[error("perf status invalid: {0:?}")]
    StatusInvalid(crate::perf::PerfStatus),
    #[error("hardware pmu init failed")]
    HwInit,
    #[error("timed pmu init failed")]
    TimedInit,
    #[error("software pmu init failed")]
    SwInit,
    #[error("perf output buffer could not be allocated")]
    BufError,
    #[error("no pmu registered for type {0}")]
    InvalidPmu(u32),
    #[error("pmu config failed")]
    PmuConfig,
    #[error("pmu type {0} out of range")]
    TypeOutOfRange(u32),
    #[error("a pmu of type {0:?} is already registered")]
    AlreadyRegistered(PmuType),
    #[error("config period {0:#x} invalid")]
    InvalidPeriod(u32),
    #[error("event {0:#x} has no counter encoding")]
    UnmappedEvent(u32),
    #[error("max events: {0} excluding cycle event")]
    CounterBudget(u32),
    #[error("event id {0} not supported by this pmu")]
    InvalidEvent(u32),
    #[error("no event with a non-zero period configured")]
    NotConfigured,
    #[error("sampling timer could not be armed")]
    Timer,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("trace is already initialized")]
    AlreadyInitialized,
    #[error("operation not allowed in state {0:?}")]
    StatusInvalid(TraceState),
    #[error("trace buffer of {size} bytes is too small, need more than {needed}")]
    BufTooSmall { size: usize, needed: usize },
    #[error("out of memory allocating {0} bytes")]
    NoMemory(usize),
    #[error("trace pipeline init failed: {0}")]
    PipelineInit(String),
    #[error("could not spawn the trace agent: {0}")]
    AgentSpawn(String),
    #[error("operation only available in offline mode")]
    NotOffline,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}
