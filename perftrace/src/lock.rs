use crate::platform::{IrqState, Platform};
use log::error;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// How shared state is protected against the other CPUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// A single core. Disabling interrupts is all the exclusion needed, so
    /// the spin lock underneath can never be contended.
    Uniprocessor,
    /// Interrupts are disabled and a spin lock is taken.
    Smp,
}

/// A spin lock that also disables interrupts on the local CPU for as long as
/// the guard lives. It can be taken from task and interrupt context alike.
pub struct IrqLock<T> {
    mode: LockMode,
    platform: Arc<dyn Platform>,
    data: spin::Mutex<T>,
}

impl<T> IrqLock<T> {
    pub fn new(platform: Arc<dyn Platform>, mode: LockMode, value: T) -> IrqLock<T> {
        IrqLock {
            mode,
            platform,
            data: spin::Mutex::new(value),
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn lock(&self) -> IrqLockGuard<'_, T> {
        let state = self.platform.irq_save();

        let guard = match self.mode {
            LockMode::Smp => self.data.lock(),
            LockMode::Uniprocessor => match self.data.try_lock() {
                Some(guard) => guard,
                None => {
                    error!("IrqLock: re-entered with interrupts disabled on a uniprocessor");
                    self.data.lock()
                }
            },
        };

        IrqLockGuard {
            guard: ManuallyDrop::new(guard),
            platform: &*self.platform,
            state,
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

pub struct IrqLockGuard<'a, T> {
    guard: ManuallyDrop<spin::MutexGuard<'a, T>>,
    platform: &'a dyn Platform,
    state: IrqState,
}

impl<T> Deref for IrqLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release the lock before interrupts come back on.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.platform.irq_restore(self.state);
    }
}
