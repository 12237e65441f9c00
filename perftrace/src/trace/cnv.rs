//! Entry points for the instrumented kernel paths.
//!
//! Each notification becomes a [`Tracer::hook`] call with the parameter list
//! the decoders expect, and the ones a software PMU can count are forwarded
//! to it as well.

use super::device::UsrEventInfo;
use super::events::*;
use super::Tracer;
use crate::pmu::{KernelHook, SwPmu};
use std::sync::Arc;

/// Recorded in place of a mutex owner when the mutex is free.
pub const NO_OWNER: u64 = 0xFFFF_FFFF;

#[derive(Clone, Default)]
pub struct KernelEvents {
    tracer: Option<Arc<Tracer>>,
    sw_pmu: Option<Arc<SwPmu>>,
}

impl KernelEvents {
    pub fn new(tracer: Option<Arc<Tracer>>, sw_pmu: Option<Arc<SwPmu>>) -> KernelEvents {
        KernelEvents { tracer, sw_pmu }
    }

    #[inline]
    fn trace(&self, event_type: u32, identity: u64, params: &[u64]) {
        if let Some(ref tracer) = self.tracer {
            tracer.hook(event_type, identity, params);
        }
    }

    #[inline]
    fn count(&self, hook: KernelHook) {
        if let Some(ref pmu) = self.sw_pmu {
            pmu.on_hook(hook);
        }
    }

    pub fn mem_info_req(&self, pool: usize) {
        self.trace(MEM_INFO_REQ, pool as u64, &[]);
    }

    pub fn mem_alloc(&self, pool: usize, ptr: usize, size: usize) {
        self.count(KernelHook::MemAlloc);
        self.trace(MEM_ALLOC, pool as u64, &[ptr as u64, size as u64]);
    }

    pub fn mem_alloc_align(&self, pool: usize, ptr: usize, size: usize, boundary: usize) {
        self.trace(
            MEM_ALLOC_ALIGN,
            pool as u64,
            &[ptr as u64, size as u64, boundary as u64],
        );
    }

    pub fn mem_realloc(&self, pool: usize, ptr: usize, size: usize) {
        self.trace(MEM_REALLOC, pool as u64, &[ptr as u64, size as u64]);
    }

    pub fn mem_free(&self, pool: usize, ptr: usize) {
        self.trace(MEM_FREE, pool as u64, &[ptr as u64]);
    }

    pub fn event_create(&self, cb: usize) {
        self.trace(EVENT_CREATE, cb as u64, &[]);
    }

    pub fn event_read(&self, cb: usize, event_id: u32, mask: u32, mode: u32, timeout: u32) {
        self.trace(
            EVENT_READ,
            cb as u64,
            &[event_id as u64, mask as u64, mode as u64, timeout as u64],
        );
    }

    pub fn event_write(&self, cb: usize, event_id: u32, events: u32) {
        self.trace(EVENT_WRITE, cb as u64, &[event_id as u64, events as u64]);
    }

    pub fn event_clear(&self, cb: usize, event_id: u32, events: u32) {
        self.trace(EVENT_CLEAR, cb as u64, &[event_id as u64, events as u64]);
    }

    pub fn event_delete(&self, cb: usize) {
        self.trace(EVENT_DELETE, cb as u64, &[0]);
    }

    /// `msg_size` includes the four byte length prefix of every message.
    pub fn queue_create(&self, queue_id: u32, len: u16, msg_size: u16, cb: usize) {
        self.trace(
            QUEUE_CREATE,
            queue_id as u64,
            &[
                len as u64,
                msg_size.saturating_sub(4) as u64,
                cb as u64,
                0,
            ],
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn queue_rw(
        &self,
        queue_id: u32,
        queue_size: u16,
        buf_size: u32,
        op_type: u32,
        readable: u16,
        writable: u16,
        timeout: u32,
    ) {
        self.trace(
            QUEUE_RW,
            queue_id as u64,
            &[
                queue_size as u64,
                buf_size as u64,
                op_type as u64,
                readable as u64,
                writable as u64,
                timeout as u64,
            ],
        );
    }

    pub fn queue_delete(&self, queue_id: u32, state: u16, readable: u16) {
        self.trace(QUEUE_DELETE, queue_id as u64, &[state as u64, readable as u64]);
    }

    pub fn sem_create(&self, sem_id: u32, count: u16) {
        self.trace(SEM_CREATE, sem_id as u64, &[0, count as u64]);
    }

    pub fn sem_post(&self, sem_id: u32, count: u16) {
        self.trace(SEM_POST, sem_id as u64, &[0, count as u64]);
    }

    pub fn sem_pend(&self, sem_id: u32, count: u16, timeout: u32) {
        self.trace(SEM_PEND, sem_id as u64, &[count as u64, timeout as u64]);
    }

    pub fn sem_delete(&self, sem_id: u32) {
        self.trace(SEM_DELETE, sem_id as u64, &[0]);
    }

    pub fn mux_create(&self, mux: usize) {
        self.trace(MUX_CREATE, mux as u64, &[]);
    }

    pub fn mux_post(&self, mux: usize, count: u16, owner: Option<u32>) {
        self.trace(MUX_POST, mux as u64, &[count as u64, owner_id(owner)]);
    }

    pub fn mux_pend(&self, mux: usize, count: u16, owner: Option<u32>, timeout: u32) {
        self.count(KernelHook::MuxPend);
        self.trace(
            MUX_PEND,
            mux as u64,
            &[count as u64, owner_id(owner), timeout as u64],
        );
    }

    pub fn mux_delete(&self, mux: usize, attr: u32, count: u16, owner: Option<u32>) {
        self.trace(
            MUX_DELETE,
            mux as u64,
            &[attr as u64, count as u64, owner_id(owner)],
        );
    }

    pub fn task_create(&self, task_id: u32, status: u16, priority: u16) {
        self.trace(TASK_CREATE, task_id as u64, &[status as u64, priority as u64]);
    }

    pub fn task_prio_modify(&self, task_id: u32, status: u16, old_prio: u16, new_prio: u16) {
        self.trace(
            TASK_PRIOSET,
            task_id as u64,
            &[status as u64, old_prio as u64, new_prio as u64],
        );
    }

    pub fn task_delete(&self, task_id: u32, status: u16, stack_pointer: usize) {
        self.trace(TASK_DELETE, task_id as u64, &[status as u64, stack_pointer as u64]);
    }

    /// The scheduler switched from the running task to `new_task`.
    pub fn task_switched_in(
        &self,
        new_task: u32,
        run_prio: u16,
        run_status: u16,
        new_prio: u16,
        new_status: u16,
    ) {
        self.count(KernelHook::TaskSwitchedIn);
        self.trace(
            TASK_SWITCH,
            new_task as u64,
            &[
                run_prio as u64,
                run_status as u64,
                new_prio as u64,
                new_status as u64,
            ],
        );
    }

    pub fn task_resume(&self, task_id: u32, status: u16, priority: u16) {
        self.trace(TASK_RESUME, task_id as u64, &[status as u64, priority as u64]);
    }

    pub fn task_suspend(&self, task_id: u32, status: u16, running_task: u32) {
        self.trace(
            TASK_SUSPEND,
            task_id as u64,
            &[status as u64, running_task as u64],
        );
    }

    pub fn isr_enter(&self, irq: u32) {
        self.count(KernelHook::IsrEnter);
        self.trace(HWI_RESPONSE_IN, irq as u64, &[]);
    }

    pub fn isr_exit(&self, irq: u32) {
        self.trace(HWI_RESPONSE_OUT, irq as u64, &[]);
    }

    pub fn swtmr_create(&self, timer_id: u32) {
        self.trace(SWTMR_CREATE, timer_id as u64, &[]);
    }

    pub fn swtmr_delete(&self, timer_id: u32) {
        self.trace(SWTMR_DELETE, timer_id as u64, &[]);
    }

    pub fn swtmr_expired(&self, timer_id: u32) {
        self.trace(SWTMR_EXPIRED, timer_id as u64, &[]);
    }

    pub fn swtmr_start(&self, timer_id: u32, mode: u8, interval: u32) {
        self.trace(SWTMR_START, timer_id as u64, &[mode as u64, interval as u64]);
    }

    pub fn swtmr_stop(&self, timer_id: u32) {
        self.trace(SWTMR_STOP, timer_id as u64, &[]);
    }

    /// A message was written to `dst_task`, or dropped when `dropped`.
    pub fn ipc_write(
        &self,
        dropped: bool,
        dst_task: u32,
        dst_pid: u32,
        msg_type: u32,
        code: u32,
        status: u32,
    ) {
        let event_type = if dropped { IPC_WRITE_DROP } else { IPC_WRITE };
        self.trace(
            event_type,
            dst_task as u64,
            &[dst_pid as u64, msg_type as u64, code as u64, status as u64],
        );
    }

    pub fn ipc_read(
        &self,
        dropped: bool,
        task: u32,
        pid: u32,
        msg_type: u32,
        code: u32,
        status: u32,
    ) {
        let event_type = if dropped { IPC_READ_DROP } else { IPC_READ };
        self.trace(
            event_type,
            task as u64,
            &[pid as u64, msg_type as u64, code as u64, status as u64],
        );
    }

    pub fn ipc_try_read(&self, msg_type: u32, status: u32) {
        self.trace(IPC_TRY_READ, msg_type as u64, &[status as u64]);
    }

    pub fn ipc_read_timeout(&self, msg_type: u32, status: u32) {
        self.trace(IPC_READ_TIMEOUT, msg_type as u64, &[status as u64]);
    }

    pub fn ipc_kill(&self, msg_type: u32, status: u32) {
        self.trace(IPC_KILL, msg_type as u64, &[status as u64]);
    }

    pub fn usr_event(&self, info: &UsrEventInfo) {
        self.trace(user_event(info.event_type), info.identity, &info.params);
    }
}

fn owner_id(owner: Option<u32>) -> u64 {
    owner.map_or(NO_OWNER, u64::from)
}
