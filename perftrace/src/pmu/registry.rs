use super::{Pmu, PmuType};
use crate::error::PerfError;
use crate::lock::{IrqLock, LockMode};
use crate::platform::Platform;
use log::{debug, error};
use std::sync::Arc;

/// One slot per [`PmuType`]. The first PMU registered for a type wins.
pub struct PmuRegistry {
    slots: IrqLock<[Option<Arc<dyn Pmu>>; PmuType::COUNT]>,
}

impl PmuRegistry {
    pub fn new(platform: Arc<dyn Platform>, mode: LockMode) -> PmuRegistry {
        PmuRegistry {
            slots: IrqLock::new(platform, mode, Default::default()),
        }
    }

    pub fn register(&self, pmu: Arc<dyn Pmu>) -> Result<(), PerfError> {
        let ty = pmu.pmu_type();
        let mut slots = self.slots.lock();
        let slot = &mut slots[ty as usize];

        if slot.is_some() {
            error!("PmuRegistry::register: a pmu of type {:?} already exists", ty);
            return Err(PerfError::AlreadyRegistered(ty));
        }

        debug!("PmuRegistry::register: {:?}", ty);
        *slot = Some(pmu);
        Ok(())
    }

    /// Raw events are served by the hardware PMU.
    pub fn get(&self, ty: PmuType) -> Option<Arc<dyn Pmu>> {
        let ty = if ty == PmuType::Raw { PmuType::Hw } else { ty };
        self.slots.lock()[ty as usize].clone()
    }

    pub fn get_raw(&self, ty: u32) -> Result<Arc<dyn Pmu>, PerfError> {
        let ty = PmuType::from_u32(ty).ok_or(PerfError::TypeOutOfRange(ty))?;
        self.get(ty).ok_or(PerfError::InvalidPmu(ty.as_u32()))
    }

    /// Empties the slot and hands the PMU back to the caller.
    pub fn remove(&self, ty: PmuType) -> Option<Arc<dyn Pmu>> {
        self.slots.lock()[ty as usize].take()
    }
}
