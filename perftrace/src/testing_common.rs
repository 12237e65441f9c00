//! Simulated kernel services for unit and integration tests.

use crate::error::PerfError;
use crate::platform::{IrqState, MemPoolInfo, Platform, PerfRegs};
use crate::pmu::{Armv7Regs, Event, HrTimer, OverflowHandler};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

pub const FAKE_CLOCK_FREQ: u32 = 50_000_000;
pub const FAKE_SYSTEM_POOL: usize = 0x4000_0000;

/// A [`Platform`] whose every observable is set by the test.
///
/// `cycles()` advances by the configured step on every read so consecutive
/// trace frames get increasing timestamps.
pub struct FakePlatform {
    cpus: u32,
    cpu: AtomicU32,
    cycles: AtomicU64,
    cycle_step: AtomicU64,
    task: AtomicU32,
    pid: AtomicU32,
    in_interrupt: AtomicBool,
    sched_lock: AtomicU32,
    irq_enabled: Vec<AtomicBool>,
    masked: Mutex<Vec<u32>>,
    regs: Mutex<PerfRegs>,
    backtrace: Mutex<Vec<usize>>,
    tasks: Mutex<BTreeMap<u32, (u32, String)>>,
    pools: Mutex<BTreeMap<usize, MemPoolInfo>>,
    console: Mutex<String>,
}

impl FakePlatform {
    pub fn new(cpus: u32) -> FakePlatform {
        FakePlatform {
            cpus,
            cpu: AtomicU32::new(0),
            cycles: AtomicU64::new(1000),
            cycle_step: AtomicU64::new(100),
            task: AtomicU32::new(1),
            pid: AtomicU32::new(1),
            in_interrupt: AtomicBool::new(false),
            sched_lock: AtomicU32::new(0),
            irq_enabled: (0..cpus.max(1)).map(|_| AtomicBool::new(true)).collect(),
            masked: Mutex::new(Vec::new()),
            regs: Mutex::new(PerfRegs::default()),
            backtrace: Mutex::new(Vec::new()),
            tasks: Mutex::new(BTreeMap::new()),
            pools: Mutex::new(BTreeMap::new()),
            console: Mutex::new(String::new()),
        }
    }

    pub fn set_cpu(&self, cpu: u32) {
        self.cpu.store(cpu, Ordering::SeqCst);
    }

    pub fn set_task(&self, task: u32) {
        self.task.store(task, Ordering::SeqCst);
    }

    pub fn set_pid(&self, pid: u32) {
        self.pid.store(pid, Ordering::SeqCst);
    }

    pub fn set_cycles(&self, cycles: u64) {
        self.cycles.store(cycles, Ordering::SeqCst);
    }

    pub fn set_cycle_step(&self, step: u64) {
        self.cycle_step.store(step, Ordering::SeqCst);
    }

    pub fn set_in_interrupt(&self, active: bool) {
        self.in_interrupt.store(active, Ordering::SeqCst);
    }

    pub fn set_sched_lock_count(&self, count: u32) {
        self.sched_lock.store(count, Ordering::SeqCst);
    }

    pub fn set_regs(&self, regs: PerfRegs) {
        *self.regs.lock() = regs;
    }

    pub fn set_backtrace(&self, frames: Vec<usize>) {
        *self.backtrace.lock() = frames;
    }

    pub fn add_task(&self, task_id: u32, priority: u32, name: &str) {
        self.tasks.lock().insert(task_id, (priority, name.to_string()));
    }

    pub fn remove_task(&self, task_id: u32) {
        self.tasks.lock().remove(&task_id);
    }

    pub fn set_mem_pool(&self, pool: usize, used: usize, free: usize) {
        self.pools.lock().insert(pool, MemPoolInfo { used, free });
    }

    /// Whether interrupts are enabled on the current CPU.
    pub fn irqs_enabled(&self) -> bool {
        self.irq_enabled[self.slot()].load(Ordering::SeqCst)
    }

    pub fn irq_masked(&self, irq: u32) -> bool {
        self.masked.lock().contains(&irq)
    }

    pub fn console(&self) -> String {
        self.console.lock().clone()
    }

    pub fn take_console(&self) -> String {
        std::mem::take(&mut *self.console.lock())
    }

    fn slot(&self) -> usize {
        (self.cpu.load(Ordering::SeqCst) as usize).min(self.irq_enabled.len() - 1)
    }
}

impl Platform for FakePlatform {
    fn current_cpu(&self) -> u32 {
        self.cpu.load(Ordering::SeqCst)
    }

    fn cpu_count(&self) -> u32 {
        self.cpus
    }

    fn cycles(&self) -> u64 {
        let step = self.cycle_step.load(Ordering::SeqCst);
        self.cycles.fetch_add(step, Ordering::SeqCst)
    }

    fn clock_freq(&self) -> u32 {
        FAKE_CLOCK_FREQ
    }

    fn current_task(&self) -> u32 {
        self.task.load(Ordering::SeqCst)
    }

    fn current_pid(&self) -> u32 {
        self.pid.load(Ordering::SeqCst)
    }

    fn in_interrupt(&self) -> bool {
        self.in_interrupt.load(Ordering::SeqCst)
    }

    fn sched_lock_count(&self) -> u32 {
        self.sched_lock.load(Ordering::SeqCst)
    }

    fn irq_save(&self) -> IrqState {
        let was_enabled = self.irq_enabled[self.slot()].swap(false, Ordering::SeqCst);
        IrqState(was_enabled as usize)
    }

    fn irq_restore(&self, state: IrqState) {
        self.irq_enabled[self.slot()].store(state.0 != 0, Ordering::SeqCst);
    }

    fn irq_mask(&self, irq: u32) {
        let mut masked = self.masked.lock();
        if !masked.contains(&irq) {
            masked.push(irq);
        }
    }

    fn irq_unmask(&self, irq: u32) {
        self.masked.lock().retain(|&m| m != irq);
    }

    fn smp_call(&self, f: &mut dyn FnMut()) {
        let caller = self.current_cpu();
        for cpu in 0..self.cpus {
            self.set_cpu(cpu);
            f();
        }
        self.set_cpu(caller);
    }

    fn irq_regs(&self) -> PerfRegs {
        *self.regs.lock()
    }

    fn caller_regs(&self) -> PerfRegs {
        *self.regs.lock()
    }

    fn backtrace(&self, _fp: usize, out: &mut [usize]) -> usize {
        let frames = self.backtrace.lock();
        let n = frames.len().min(out.len());
        out[..n].copy_from_slice(&frames[..n]);
        n
    }

    fn task_info(&self, task_id: u32, name: &mut [u8]) -> Option<u32> {
        let tasks = self.tasks.lock();
        let (priority, task_name) = tasks.get(&task_id)?;
        let n = task_name.len().min(name.len());
        name[..n].copy_from_slice(&task_name.as_bytes()[..n]);
        Some(*priority)
    }

    fn for_each_task(&self, f: &mut dyn FnMut(u32)) {
        let ids: Vec<u32> = self.tasks.lock().keys().copied().collect();
        for id in ids {
            f(id);
        }
    }

    fn system_mem_pool(&self) -> usize {
        FAKE_SYSTEM_POOL
    }

    fn mem_pool_info(&self, pool: usize) -> Option<MemPoolInfo> {
        self.pools.lock().get(&pool).copied()
    }

    fn print(&self, text: &str) {
        self.console.lock().push_str(text);
    }
}

#[derive(Default)]
struct SimState {
    pmnc: u32,
    selected: u32,
    ccnt: u32,
    counters: [u32; 31],
    event_types: [u32; 31],
    cnten: u32,
    inten: u32,
    overflow: u32,
}

/// Register file of an ARMv7 performance monitor. Counters only move when
/// the test calls [`SimArmv7Regs::tick`].
#[derive(Default)]
pub struct SimArmv7Regs {
    state: Mutex<SimState>,
}

const CCNT_BIT: u32 = 31;

impl SimArmv7Regs {
    pub fn new() -> SimArmv7Regs {
        SimArmv7Regs::default()
    }

    /// Advances the counter at driver `index` (0 is the cycle counter),
    /// raising its overflow flag when it wraps.
    pub fn tick(&self, index: u32, delta: u32) {
        let mut state = self.state.lock();
        let (value, bit) = if index == 0 {
            (&mut state.ccnt, CCNT_BIT)
        } else {
            (&mut state.counters[(index - 1) as usize], index - 1)
        };

        let (next, wrapped) = value.overflowing_add(delta);
        *value = next;
        if wrapped {
            state.overflow |= 1 << bit;
        }
    }

    pub fn counter_value(&self, index: u32) -> u32 {
        let state = self.state.lock();
        if index == 0 {
            state.ccnt
        } else {
            state.counters[(index - 1) as usize]
        }
    }

    pub fn event_type(&self, index: u32) -> u32 {
        self.state.lock().event_types[(index - 1) as usize]
    }

    pub fn enabled_counters(&self) -> u32 {
        self.state.lock().cnten
    }

    pub fn enabled_interrupts(&self) -> u32 {
        self.state.lock().inten
    }

    pub fn counting(&self) -> bool {
        self.state.lock().pmnc & 1 != 0
    }

    pub fn divided(&self) -> bool {
        self.state.lock().pmnc & (1 << 3) != 0
    }
}

impl Armv7Regs for SimArmv7Regs {
    fn read_pmnc(&self) -> u32 {
        self.state.lock().pmnc
    }

    fn write_pmnc(&self, value: u32) {
        let mut state = self.state.lock();
        if value & (1 << 1) != 0 {
            state.counters = [0; 31];
        }
        if value & (1 << 2) != 0 {
            state.ccnt = 0;
        }
        // P and C read back as zero.
        state.pmnc = value & !0b110;
    }

    fn select_counter(&self, counter: u32) {
        self.state.lock().selected = counter;
    }

    fn read_ccnt(&self) -> u32 {
        self.state.lock().ccnt
    }

    fn write_ccnt(&self, value: u32) {
        self.state.lock().ccnt = value;
    }

    fn read_selected(&self) -> u32 {
        let state = self.state.lock();
        state.counters[state.selected as usize % 31]
    }

    fn write_selected(&self, value: u32) {
        let mut state = self.state.lock();
        let selected = state.selected as usize % 31;
        state.counters[selected] = value;
    }

    fn write_event_type(&self, value: u32) {
        let mut state = self.state.lock();
        let selected = state.selected as usize % 31;
        state.event_types[selected] = value;
    }

    fn write_cnten_set(&self, bits: u32) {
        self.state.lock().cnten |= bits;
    }

    fn write_cnten_clr(&self, bits: u32) {
        self.state.lock().cnten &= !bits;
    }

    fn write_inten_set(&self, bits: u32) {
        self.state.lock().inten |= bits;
    }

    fn write_inten_clr(&self, bits: u32) {
        self.state.lock().inten &= !bits;
    }

    fn read_overflow(&self) -> u32 {
        self.state.lock().overflow
    }

    fn write_overflow(&self, bits: u32) {
        self.state.lock().overflow &= !bits;
    }
}

/// An [`HrTimer`] that only records whether it is armed. Tests fire it by
/// calling `TimedPmu::on_timer` directly.
#[derive(Default)]
pub struct ManualTimer {
    armed: Mutex<Option<Duration>>,
    fail: AtomicBool,
}

impl ManualTimer {
    pub fn armed(&self) -> Option<Duration> {
        *self.armed.lock()
    }

    pub fn fail_next_start(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl HrTimer for ManualTimer {
    fn start(&self, period: Duration) -> Result<(), PerfError> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(PerfError::Timer);
        }
        *self.armed.lock() = Some(period);
        Ok(())
    }

    fn cancel(&self) {
        *self.armed.lock() = None;
    }
}

/// Remembers the event id of every overflow it receives.
#[derive(Default)]
pub struct RecordingOverflowHandler {
    seen: Mutex<Vec<u32>>,
}

impl RecordingOverflowHandler {
    pub fn overflows(&self) -> Vec<u32> {
        self.seen.lock().clone()
    }
}

impl OverflowHandler for RecordingOverflowHandler {
    fn handle_overflow(&self, event: &Event, _regs: &PerfRegs) {
        self.seen.lock().push(event.event_id);
    }
}
