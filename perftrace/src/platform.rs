//! The kernel services that the PMU layer and the tracer call into.
//!
//! Everything that would otherwise be a direct call into the scheduler, the
//! interrupt controller or the memory manager goes through [`Platform`]. A
//! kernel port implements it once; tests use
//! [`FakePlatform`](crate::testing_common::FakePlatform).

/// Interrupt state returned by [`Platform::irq_save`] and handed back to
/// [`Platform::irq_restore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IrqState(pub usize);

/// Register snapshot used as the sampling context of an overflow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PerfRegs {
    pub pc: usize,
    pub fp: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemPoolInfo {
    pub used: usize,
    pub free: usize,
}

pub trait Platform: Send + Sync {
    /// Id of the CPU executing the caller.
    fn current_cpu(&self) -> u32;

    fn cpu_count(&self) -> u32;

    /// Free running cycle counter used for trace timestamps.
    fn cycles(&self) -> u64;

    /// Frequency of [`Platform::cycles`] in Hz.
    fn clock_freq(&self) -> u32;

    fn current_task(&self) -> u32;

    fn current_pid(&self) -> u32;

    /// Whether the caller runs in interrupt context.
    fn in_interrupt(&self) -> bool;

    /// Scheduler lock nesting of the current task.
    fn sched_lock_count(&self) -> u32;

    /// Disables interrupts on the current CPU, returning the previous state.
    fn irq_save(&self) -> IrqState;

    fn irq_restore(&self, state: IrqState);

    fn irq_mask(&self, irq: u32);

    fn irq_unmask(&self, irq: u32);

    /// Runs `f` once on every online CPU, the caller's CPU included.
    fn smp_call(&self, f: &mut dyn FnMut());

    /// Registers captured on entry of the interrupt being serviced.
    fn irq_regs(&self) -> PerfRegs;

    /// Registers of the caller of the current hook.
    fn caller_regs(&self) -> PerfRegs;

    /// Walks the frame chain starting at `fp`, filling `out` with return
    /// addresses. Returns the number of entries written.
    fn backtrace(&self, fp: usize, out: &mut [usize]) -> usize;

    /// Link registers of the current call site.
    fn record_lr(&self, out: &mut [usize]) -> usize {
        let regs = self.caller_regs();
        self.backtrace(regs.fp, out)
    }

    /// Copies the task name into `name` (truncated, not NUL terminated) and
    /// returns the task priority, or `None` for an unused task id.
    fn task_info(&self, task_id: u32, name: &mut [u8]) -> Option<u32>;

    /// Calls `f` with the id of every live task.
    fn for_each_task(&self, f: &mut dyn FnMut(u32));

    /// Identity of the system memory pool.
    fn system_mem_pool(&self) -> usize;

    fn mem_pool_info(&self, pool: usize) -> Option<MemPoolInfo>;

    /// Kernel console output.
    fn print(&self, text: &str);
}
