//! Trace event type codes.
//!
//! An event type is a class flag in the upper 28 bits combined with a
//! sub-code in the low 4 bits. The event mask is matched against the class
//! flags only.

pub const SYS_FLAG: u32 = 0x10;
pub const HWI_FLAG: u32 = 0x20;
pub const TASK_FLAG: u32 = 0x40;
pub const SWTMR_FLAG: u32 = 0x80;
pub const MEM_FLAG: u32 = 0x100;
pub const QUE_FLAG: u32 = 0x200;
pub const EVENT_FLAG: u32 = 0x400;
pub const SEM_FLAG: u32 = 0x800;
pub const MUX_FLAG: u32 = 0x1000;
pub const IPC_FLAG: u32 = 0x2000;

pub const MAX_FLAG: u32 = 0x8000_0000;
pub const USER_DEFAULT_FLAG: u32 = 0xFFFF_FFF0;

/// Bits of an event type that select its class.
pub const EVENT_MASK: u32 = 0xFFFF_FFF0;

pub const DEFAULT_MASK: u32 = HWI_FLAG | TASK_FLAG;

pub const SYS_ERROR: u32 = SYS_FLAG;
pub const SYS_START: u32 = SYS_FLAG | 1;
pub const SYS_STOP: u32 = SYS_FLAG | 2;

pub const HWI_CREATE: u32 = HWI_FLAG;
pub const HWI_CREATE_SHARE: u32 = HWI_FLAG | 1;
pub const HWI_DELETE: u32 = HWI_FLAG | 2;
pub const HWI_DELETE_SHARE: u32 = HWI_FLAG | 3;
pub const HWI_RESPONSE_IN: u32 = HWI_FLAG | 4;
pub const HWI_RESPONSE_OUT: u32 = HWI_FLAG | 5;
pub const HWI_ENABLE: u32 = HWI_FLAG | 6;
pub const HWI_DISABLE: u32 = HWI_FLAG | 7;
pub const HWI_IRQ_SET_PRIORITY: u32 = HWI_FLAG | 8;
pub const HWI_SET_AFFINITY: u32 = HWI_FLAG | 9;
pub const HWI_SEND_IPI: u32 = HWI_FLAG | 10;

pub const TASK_CREATE: u32 = TASK_FLAG;
pub const TASK_PRIOSET: u32 = TASK_FLAG | 1;
pub const TASK_DELETE: u32 = TASK_FLAG | 2;
pub const TASK_SUSPEND: u32 = TASK_FLAG | 3;
pub const TASK_RESUME: u32 = TASK_FLAG | 4;
pub const TASK_SWITCH: u32 = TASK_FLAG | 5;
pub const TASK_SIGNAL: u32 = TASK_FLAG | 6;

pub const SWTMR_CREATE: u32 = SWTMR_FLAG;
pub const SWTMR_DELETE: u32 = SWTMR_FLAG | 1;
pub const SWTMR_START: u32 = SWTMR_FLAG | 2;
pub const SWTMR_STOP: u32 = SWTMR_FLAG | 3;
pub const SWTMR_EXPIRED: u32 = SWTMR_FLAG | 4;

pub const MEM_ALLOC: u32 = MEM_FLAG;
pub const MEM_ALLOC_ALIGN: u32 = MEM_FLAG | 1;
pub const MEM_REALLOC: u32 = MEM_FLAG | 2;
pub const MEM_FREE: u32 = MEM_FLAG | 3;
pub const MEM_INFO_REQ: u32 = MEM_FLAG | 4;
pub const MEM_INFO: u32 = MEM_FLAG | 5;

pub const QUEUE_CREATE: u32 = QUE_FLAG;
pub const QUEUE_DELETE: u32 = QUE_FLAG | 1;
pub const QUEUE_RW: u32 = QUE_FLAG | 2;

pub const EVENT_CREATE: u32 = EVENT_FLAG;
pub const EVENT_DELETE: u32 = EVENT_FLAG | 1;
pub const EVENT_READ: u32 = EVENT_FLAG | 2;
pub const EVENT_WRITE: u32 = EVENT_FLAG | 3;
pub const EVENT_CLEAR: u32 = EVENT_FLAG | 4;

pub const SEM_CREATE: u32 = SEM_FLAG;
pub const SEM_DELETE: u32 = SEM_FLAG | 1;
pub const SEM_PEND: u32 = SEM_FLAG | 2;
pub const SEM_POST: u32 = SEM_FLAG | 3;

pub const MUX_CREATE: u32 = MUX_FLAG;
pub const MUX_DELETE: u32 = MUX_FLAG | 1;
pub const MUX_PEND: u32 = MUX_FLAG | 2;
pub const MUX_POST: u32 = MUX_FLAG | 3;

pub const IPC_WRITE_DROP: u32 = IPC_FLAG;
pub const IPC_WRITE: u32 = IPC_FLAG | 1;
pub const IPC_READ_DROP: u32 = IPC_FLAG | 2;
pub const IPC_READ: u32 = IPC_FLAG | 3;
pub const IPC_TRY_READ: u32 = IPC_FLAG | 4;
pub const IPC_READ_TIMEOUT: u32 = IPC_FLAG | 5;
pub const IPC_KILL: u32 = IPC_FLAG | 6;

/// The class flag of `event_type`.
#[inline]
pub fn mode_flag(event_type: u32) -> u32 {
    event_type & EVENT_MASK
}

/// Event type used for a user event carrying the sub-code `code`.
#[inline]
pub fn user_event(code: u32) -> u32 {
    USER_DEFAULT_FLAG | (code & !USER_DEFAULT_FLAG)
}

/// Short human readable name, used by the dump tools.
pub fn name(event_type: u32) -> Option<&'static str> {
    Some(match event_type {
        SYS_ERROR => "SYS_ERROR",
        SYS_START => "SYS_START",
        SYS_STOP => "SYS_STOP",
        HWI_CREATE => "HWI_CREATE",
        HWI_CREATE_SHARE => "HWI_CREATE_SHARE",
        HWI_DELETE => "HWI_DELETE",
        HWI_DELETE_SHARE => "HWI_DELETE_SHARE",
        HWI_RESPONSE_IN => "HWI_RESPONSE_IN",
        HWI_RESPONSE_OUT => "HWI_RESPONSE_OUT",
        HWI_ENABLE => "HWI_ENABLE",
        HWI_DISABLE => "HWI_DISABLE",
        HWI_IRQ_SET_PRIORITY => "HWI_IRQ_SET_PRIORITY",
        HWI_SET_AFFINITY => "HWI_SET_AFFINITY",
        HWI_SEND_IPI => "HWI_SEND_IPI",
        TASK_CREATE => "TASK_CREATE",
        TASK_PRIOSET => "TASK_PRIOSET",
        TASK_DELETE => "TASK_DELETE",
        TASK_SUSPEND => "TASK_SUSPEND",
        TASK_RESUME => "TASK_RESUME",
        TASK_SWITCH => "TASK_SWITCH",
        TASK_SIGNAL => "TASK_SIGNAL",
        SWTMR_CREATE => "SWTMR_CREATE",
        SWTMR_DELETE => "SWTMR_DELETE",
        SWTMR_START => "SWTMR_START",
        SWTMR_STOP => "SWTMR_STOP",
        SWTMR_EXPIRED => "SWTMR_EXPIRED",
        MEM_ALLOC => "MEM_ALLOC",
        MEM_ALLOC_ALIGN => "MEM_ALLOC_ALIGN",
        MEM_REALLOC => "MEM_REALLOC",
        MEM_FREE => "MEM_FREE",
        MEM_INFO_REQ => "MEM_INFO_REQ",
        MEM_INFO => "MEM_INFO",
        QUEUE_CREATE => "QUEUE_CREATE",
        QUEUE_DELETE => "QUEUE_DELETE",
        QUEUE_RW => "QUEUE_RW",
        EVENT_CREATE => "EVENT_CREATE",
        EVENT_DELETE => "EVENT_DELETE",
        EVENT_READ => "EVENT_READ",
        EVENT_WRITE => "EVENT_WRITE",
        EVENT_CLEAR => "EVENT_CLEAR",
        SEM_CREATE => "SEM_CREATE",
        SEM_DELETE => "SEM_DELETE",
        SEM_PEND => "SEM_PEND",
        SEM_POST => "SEM_POST",
        MUX_CREATE => "MUX_CREATE",
        MUX_DELETE => "MUX_DELETE",
        MUX_PEND => "MUX_PEND",
        MUX_POST => "MUX_POST",
        IPC_WRITE_DROP => "IPC_WRITE_DROP",
        IPC_WRITE => "IPC_WRITE",
        IPC_READ_DROP => "IPC_READ_DROP",
        IPC_READ => "IPC_READ",
        IPC_TRY_READ => "IPC_TRY_READ",
        IPC_READ_TIMEOUT => "IPC_READ_TIMEOUT",
        IPC_KILL => "IPC_KILL",
        _ if mode_flag(event_type) == USER_DEFAULT_FLAG => "USER_EVENT",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_flags() {
        assert_eq!(mode_flag(TASK_SWITCH), TASK_FLAG);
        assert_eq!(mode_flag(HWI_RESPONSE_IN), HWI_FLAG);
        assert_eq!(mode_flag(MEM_INFO_REQ), MEM_FLAG);
        assert_eq!(DEFAULT_MASK & SYS_START, 0);
    }

    #[test]
    fn user_events_keep_the_low_nibble() {
        assert_eq!(user_event(3), 0xFFFF_FFF3);
        assert_eq!(user_event(0x1234_5675), 0xFFFF_FFF5);
        assert_eq!(name(user_event(1)), Some("USER_EVENT"));
        assert_eq!(name(TASK_SWITCH), Some("TASK_SWITCH"));
        assert_eq!(name(0x4000), None);
    }
}
