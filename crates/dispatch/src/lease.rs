//! Per-vehicle reservation leases
//!
//! A lease is a map entry keyed by vehicle id and stamped with a UUID fencing
//! token. Dropping the guard releases the entry only if the token still
//! matches.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use lifeline_core::VehicleId;

/// Table of in-flight vehicle reservations
#[derive(Debug, Default)]
pub struct LeaseTable {
    held: Mutex<HashMap<VehicleId, Uuid>>,
}

impl LeaseTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for a vehicle; `None` when another holder has it
    pub fn acquire(&self, vehicle_id: VehicleId) -> Option<LeaseGuard<'_>> {
        let mut held = self.held.lock();
        if held.contains_key(&vehicle_id) {
            debug!(vehicle_id = %vehicle_id, "Vehicle lease busy");
            return None;
        }
        let token = Uuid::new_v4();
        held.insert(vehicle_id, token);
        Some(LeaseGuard {
            table: self,
            vehicle_id,
            token,
        })
    }

    /// Whether a vehicle is currently leased
    pub fn is_held(&self, vehicle_id: VehicleId) -> bool {
        self.held.lock().contains_key(&vehicle_id)
    }

    fn release(&self, vehicle_id: VehicleId, token: Uuid) {
        let mut held = self.held.lock();
        if held.get(&vehicle_id) == Some(&token) {
            held.remove(&vehicle_id);
        }
    }
}

/// Held lease; released on drop
#[derive(Debug)]
pub struct LeaseGuard<'a> {
    table: &'a LeaseTable,
    vehicle_id: VehicleId,
    token: Uuid,
}

impl LeaseGuard<'_> {
    /// Fencing token of this lease
    pub fn token(&self) -> Uuid {
        self.token
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.table.release(self.vehicle_id, self.token);
    }
}
