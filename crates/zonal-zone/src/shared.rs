//! External-lock pattern for zones with several producers.
//!
//! A [`Zone`] has no internal synchronisation: mutation takes `&mut`.
//! [`SharedZone`] puts one behind an `Arc<Mutex<_>>` so several threads
//! can allocate from it, one at a time. Offsets handed out stay valid
//! across threads because they are relative to whatever buffer the zone
//! currently owns.
//!
//! Prefer one zone per thread where the workload allows it; the lock
//! serialises every operation.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;
use zonal_core::{Offset, ZoneError};

use crate::zone::Zone;

/// A zone shared between threads behind a single lock.
///
/// Cloning is cheap and yields another handle to the same zone.
#[derive(Clone, Debug)]
pub struct SharedZone {
    inner: Arc<Mutex<Zone>>,
}

impl SharedZone {
    /// Wrap an existing zone.
    pub fn new(zone: Zone) -> Self {
        Self {
            inner: Arc::new(Mutex::new(zone)),
        }
    }

    /// Create a zone of `capacity` payload bytes and wrap it.
    pub fn create(capacity: usize) -> Result<Self, ZoneError> {
        Zone::create(capacity).map(Self::new)
    }

    /// Acquire exclusive access to the zone.
    ///
    /// Fails with [`ZoneError::Poisoned`] if a previous holder panicked;
    /// see [`recover`](Self::recover).
    pub fn lock(&self) -> Result<MutexGuard<'_, Zone>, ZoneError> {
        self.inner.lock().map_err(|_| ZoneError::Poisoned)
    }

    /// Run `f` with exclusive access to the zone.
    pub fn with<R>(&self, f: impl FnOnce(&mut Zone) -> R) -> Result<R, ZoneError> {
        let mut zone = self.lock()?;
        Ok(f(&mut zone))
    }

    /// Lock and [`allocate`](Zone::allocate).
    pub fn allocate(&self, size: usize) -> Result<Option<Offset>, ZoneError> {
        self.with(|zone| zone.allocate(size))
    }

    /// Lock, allocate and copy `bytes` into the new payload.
    pub fn allocate_from(&self, bytes: &[u8]) -> Result<Option<Offset>, ZoneError> {
        self.with(|zone| {
            let at = zone.allocate(bytes.len())?;
            zone.payload_mut(at)[..bytes.len()].copy_from_slice(bytes);
            Some(at)
        })
    }

    /// Lock and [`free`](Zone::free).
    pub fn free(&self, payload: Offset) -> Result<(), ZoneError> {
        self.with(|zone| zone.free(payload))
    }

    /// Lock and [`grow_in_place`](Zone::grow_in_place).
    pub fn grow(&self, new_capacity: usize) -> Result<(), ZoneError> {
        self.lock()?.grow_in_place(new_capacity)
    }

    /// Clear the poison flag if the zone still passes the heap check.
    ///
    /// Returns `true` when the zone is usable again. A zone that fails
    /// the check stays poisoned.
    pub fn recover(&self) -> bool {
        if !self.inner.is_poisoned() {
            return true;
        }
        let consistent = match self.inner.lock() {
            Ok(zone) => zone.check_heap(),
            Err(poisoned) => poisoned.into_inner().check_heap(),
        };
        if consistent {
            self.inner.clear_poison();
        } else {
            warn!("poisoned zone failed its heap check, staying poisoned");
        }
        consistent
    }

    /// Take the zone back if this is the last handle.
    pub fn try_unwrap(self) -> Result<Zone, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex
                .into_inner()
                .map_err(|poisoned| Self::new(poisoned.into_inner())),
            Err(inner) => Err(Self { inner }),
        }
    }
}

impl From<Zone> for SharedZone {
    fn from(zone: Zone) -> Self {
        Self::new(zone)
    }
}
