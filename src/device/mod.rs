//! Process-wide device/thread state, scoped to the lifetime of one
//! `PartitionRunner` run via RAII guards. Mirrors the acquire-on-new,
//! restore-on-drop shape of the teacher's own system guards, applied to a
//! plain integer id and a thread-count limit instead of GPU resource
//! handles.

use crate::common::backend::DeviceClass;
use crate::error::{Error, Result};
use std::sync::Mutex;

lazy_static! {
    static ref CURRENT_DEVICE: Mutex<Option<u32>> = Mutex::new(None);
    static ref THREAD_LIMIT: Mutex<Option<usize>> = Mutex::new(None);
}

/// Selects `device_id` as the process-wide current CUDA device for the
/// duration of the guard's lifetime, restoring whatever was selected before
/// on every exit path, success or failure (including a panic unwinding
/// through `?`).
pub struct DeviceGuard {
    previous: Option<u32>,
}

impl DeviceGuard {
    /// Acquires the guard. `device_class` is checked only for `Cuda`; on a
    /// `Cpu` worker this is a no-op guard (there is no device id to save).
    pub fn acquire(device_class: DeviceClass, device_id: Option<u32>) -> Result<Self> {
        match device_class {
            DeviceClass::Cpu => Ok(DeviceGuard { previous: None }),
            DeviceClass::Cuda => {
                let device_id = device_id
                    .ok_or_else(|| Error::Device("cuda device class requires a device id".into()))?;
                let mut current = CURRENT_DEVICE
                    .lock()
                    .map_err(|_| Error::Device("device state lock poisoned".into()))?;
                let previous = *current;
                *current = Some(device_id);
                Ok(DeviceGuard { previous })
            }
        }
    }

    /// The device id this guard restores to on drop, if any.
    pub fn previous(&self) -> Option<u32> {
        self.previous
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        if let Ok(mut current) = CURRENT_DEVICE.lock() {
            *current = self.previous;
        }
    }
}

/// Pins the process-wide numeric-library thread count to `limit` for the
/// duration of the guard, restoring the previous limit (or "unset") on
/// drop. Used by the runner so concurrently scheduled `PartitionRunner`s on
/// one host don't oversubscribe.
pub struct ThreadLimitGuard {
    previous: Option<usize>,
}

impl ThreadLimitGuard {
    pub fn acquire(limit: usize) -> Result<Self> {
        let mut current = THREAD_LIMIT
            .lock()
            .map_err(|_| Error::Device("thread limit lock poisoned".into()))?;
        let previous = *current;
        *current = Some(limit);
        Ok(ThreadLimitGuard { previous })
    }

    pub fn current() -> Option<usize> {
        THREAD_LIMIT.lock().ok().and_then(|g| *g)
    }
}

impl Drop for ThreadLimitGuard {
    fn drop(&mut self) {
        if let Ok(mut current) = THREAD_LIMIT.lock() {
            *current = self.previous;
        }
    }
}
