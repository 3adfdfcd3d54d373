//! Distress events, vehicles, directories, tracking and escalation state
//!
//! Records are stored as JSON. Columns beside `data` exist only for lookups
//! and for the `version` compare-and-set.

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Params};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use lifeline_core::{
    Contact, ContactDirectory, ContactId, Coordinates, DistressEvent, DistressId,
    DistressRepository, DistressStatus, Error, EscalationPath, EscalationRepository, EscalationRun,
    EscalationTier, Facility, FacilityId, FacilityIndex, PathId, Result, RunId, Subject,
    SubjectDirectory, TierId, TrackingRepository, TrackingUpdate, UserId, Vehicle, VehicleId,
    VehicleRepository, VehicleStatus,
};

use super::SqliteStore;
use crate::error::{stale, StoreError};

fn encode<T: Serialize>(record: &T) -> std::result::Result<String, StoreError> {
    Ok(serde_json::to_string(record)?)
}

fn decode<T: DeserializeOwned>(data: &str) -> std::result::Result<T, StoreError> {
    Ok(serde_json::from_str(data)?)
}

/// Decode the `data` column of every row, in query order
fn load_all<T: DeserializeOwned, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> std::result::Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.iter().map(|data| decode(data)).collect()
}

fn load_one<T: DeserializeOwned, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> std::result::Result<Option<T>, StoreError> {
    let data: Option<String> = conn.query_row(sql, params, |row| row.get(0)).optional()?;
    data.as_deref().map(decode).transpose()
}

/// Constraint violations become Conflict; anything else is internal
fn write_error(err: rusqlite::Error, message: impl FnOnce() -> String) -> Error {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _) if e.code == ErrorCode::ConstraintViolation => {
            Error::conflict(message())
        }
        other => StoreError::from(other).into(),
    }
}

/// Explain a versioned update that matched no row
fn missed_update(
    conn: &Connection,
    table: &str,
    kind: &str,
    resource: &'static str,
    id: &str,
    expected: u64,
) -> Error {
    let found = conn
        .query_row(
            &format!("SELECT version FROM {table} WHERE id = ?1"),
            params![id],
            |row| row.get::<_, i64>(0),
        )
        .optional();
    match found {
        Ok(Some(found)) => {
            debug!(table, id, expected, found, "Rejected stale write");
            stale(kind, id, expected, found as u64)
        }
        Ok(None) => Error::not_found(resource, id),
        Err(e) => StoreError::from(e).into(),
    }
}

impl SqliteStore {
    /// Register or replace a facility
    pub fn insert_facility(&self, facility: &Facility) -> Result<()> {
        let data = encode(facility)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO facilities (id, data) VALUES (?1, ?2) \
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                params![facility.id.to_string(), data],
            )
            .map_err(StoreError::from)?;
        Ok(())
    }

    /// Register or replace a subject
    pub fn insert_subject(&self, subject: &Subject) -> Result<()> {
        let data = encode(subject)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO subjects (id, data) VALUES (?1, ?2) \
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                params![subject.id.to_string(), data],
            )
            .map_err(StoreError::from)?;
        Ok(())
    }

    /// Register or replace a contact
    pub fn insert_contact(&self, contact: &Contact) -> Result<()> {
        let data = encode(contact)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO contacts (id, emergency, data) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(id) DO UPDATE SET emergency = excluded.emergency, data = excluded.data",
                params![contact.id.to_string(), contact.emergency, data],
            )
            .map_err(StoreError::from)?;
        Ok(())
    }

    fn all_facilities(&self) -> Result<Vec<Facility>> {
        let conn = self.conn.lock();
        Ok(load_all(&conn, "SELECT data FROM facilities ORDER BY id", [])?)
    }
}

#[async_trait]
impl DistressRepository for SqliteStore {
    async fn insert_distress(&self, event: &DistressEvent) -> Result<DistressEvent> {
        let mut stored = event.clone();
        stored.version = 1;
        let data = encode(&stored)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO distress_events (id, subject_id, status, active, created, version, data) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                stored.id.to_string(),
                stored.subject_id.to_string(),
                stored.status.as_str(),
                stored.status.is_active(),
                stored.created.timestamp_millis(),
                stored.version as i64,
                data,
            ],
        )
        .map_err(|e| write_error(e, || format!("distress {} already exists", stored.id)))?;
        Ok(stored)
    }

    async fn get_distress(&self, id: DistressId) -> Result<Option<DistressEvent>> {
        let conn = self.conn.lock();
        Ok(load_one(
            &conn,
            "SELECT data FROM distress_events WHERE id = ?1",
            params![id.to_string()],
        )?)
    }

    async fn update_distress(&self, event: &DistressEvent) -> Result<DistressEvent> {
        let id = event.id.to_string();
        let mut stored = event.clone();
        stored.version = event.version + 1;
        let data = encode(&stored)?;
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE distress_events SET status = ?3, active = ?4, version = version + 1, data = ?5 \
                 WHERE id = ?1 AND version = ?2",
                params![
                    id,
                    event.version as i64,
                    stored.status.as_str(),
                    stored.status.is_active(),
                    data,
                ],
            )
            .map_err(StoreError::from)?;
        if changed == 0 {
            return Err(missed_update(
                &conn,
                "distress_events",
                "distress",
                DistressId::RESOURCE,
                &id,
                event.version,
            ));
        }
        Ok(stored)
    }

    async fn list_active_distress(&self) -> Result<Vec<DistressEvent>> {
        let conn = self.conn.lock();
        Ok(load_all(
            &conn,
            "SELECT data FROM distress_events WHERE active = 1 ORDER BY created, id",
            [],
        )?)
    }

    async fn list_distress_by_status(&self, status: DistressStatus) -> Result<Vec<DistressEvent>> {
        let conn = self.conn.lock();
        Ok(load_all(
            &conn,
            "SELECT data FROM distress_events WHERE status = ?1 ORDER BY created, id",
            params![status.as_str()],
        )?)
    }

    async fn list_distress_by_subject(&self, subject: UserId) -> Result<Vec<DistressEvent>> {
        let conn = self.conn.lock();
        Ok(load_all(
            &conn,
            "SELECT data FROM distress_events WHERE subject_id = ?1 ORDER BY created, id",
            params![subject.to_string()],
        )?)
    }
}

#[async_trait]
impl VehicleRepository for SqliteStore {
    async fn insert_vehicle(&self, vehicle: &Vehicle) -> Result<Vehicle> {
        let mut stored = vehicle.clone();
        stored.version = 1;
        let data = encode(&stored)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO vehicles (id, available, version, data) VALUES (?1, ?2, ?3, ?4)",
            params![
                stored.id.to_string(),
                stored.status == VehicleStatus::Available,
                stored.version as i64,
                data,
            ],
        )
        .map_err(|e| write_error(e, || format!("vehicle {} already exists", stored.id)))?;
        Ok(stored)
    }

    async fn get_vehicle(&self, id: VehicleId) -> Result<Option<Vehicle>> {
        let conn = self.conn.lock();
        Ok(load_one(
            &conn,
            "SELECT data FROM vehicles WHERE id = ?1",
            params![id.to_string()],
        )?)
    }

    async fn update_vehicle(&self, vehicle: &Vehicle) -> Result<Vehicle> {
        let id = vehicle.id.to_string();
        let mut stored = vehicle.clone();
        stored.version = vehicle.version + 1;
        let data = encode(&stored)?;
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE vehicles SET available = ?3, version = version + 1, data = ?4 \
                 WHERE id = ?1 AND version = ?2",
                params![
                    id,
                    vehicle.version as i64,
                    stored.status == VehicleStatus::Available,
                    data,
                ],
            )
            .map_err(StoreError::from)?;
        if changed == 0 {
            return Err(missed_update(
                &conn,
                "vehicles",
                "vehicle",
                VehicleId::RESOURCE,
                &id,
                vehicle.version,
            ));
        }
        Ok(stored)
    }

    async fn list_available_vehicles(&self) -> Result<Vec<Vehicle>> {
        let conn = self.conn.lock();
        Ok(load_all(
            &conn,
            "SELECT data FROM vehicles WHERE available = 1 ORDER BY id",
            [],
        )?)
    }

    async fn available_vehicles_within(&self, center: Coordinates, radius_km: f64) -> Result<Vec<Vehicle>> {
        let vehicles = self.list_available_vehicles().await?;
        Ok(vehicles
            .into_iter()
            .filter(|v| {
                v.last_known_location
                    .is_some_and(|loc| loc.within(&center, radius_km))
            })
            .collect())
    }
}

#[async_trait]
impl FacilityIndex for SqliteStore {
    async fn get_facility(&self, id: FacilityId) -> Result<Option<Facility>> {
        let conn = self.conn.lock();
        Ok(load_one(
            &conn,
            "SELECT data FROM facilities WHERE id = ?1",
            params![id.to_string()],
        )?)
    }

    async fn facilities_within(&self, center: Coordinates, radius_km: f64) -> Result<Vec<Facility>> {
        let mut found: Vec<(f64, Facility)> = self
            .all_facilities()?
            .into_iter()
            .map(|f| (f.coordinates.distance_km(&center), f))
            .filter(|(d, _)| *d <= radius_km)
            .collect();
        found.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.id.cmp(&b.1.id)));
        Ok(found.into_iter().map(|(_, f)| f).collect())
    }

    async fn nearest_facility(&self, center: Coordinates) -> Result<Option<Facility>> {
        Ok(self.all_facilities()?.into_iter().min_by(|a, b| {
            a.coordinates
                .distance_km(&center)
                .total_cmp(&b.coordinates.distance_km(&center))
                .then(a.id.cmp(&b.id))
        }))
    }
}

#[async_trait]
impl SubjectDirectory for SqliteStore {
    async fn get_subject(&self, id: UserId) -> Result<Option<Subject>> {
        let conn = self.conn.lock();
        Ok(load_one(
            &conn,
            "SELECT data FROM subjects WHERE id = ?1",
            params![id.to_string()],
        )?)
    }
}

#[async_trait]
impl ContactDirectory for SqliteStore {
    async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>> {
        let conn = self.conn.lock();
        Ok(load_one(
            &conn,
            "SELECT data FROM contacts WHERE id = ?1",
            params![id.to_string()],
        )?)
    }

    async fn emergency_contacts(&self) -> Result<Vec<Contact>> {
        let conn = self.conn.lock();
        Ok(load_all(
            &conn,
            "SELECT data FROM contacts WHERE emergency = 1 ORDER BY id",
            [],
        )?)
    }
}

#[async_trait]
impl TrackingRepository for SqliteStore {
    async fn insert_update(&self, update: &TrackingUpdate) -> Result<()> {
        let data = encode(update)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO tracking_updates (distress_id, data) VALUES (?1, ?2)",
                params![update.distress_id.to_string(), data],
            )
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn list_updates(&self, distress_id: DistressId) -> Result<Vec<TrackingUpdate>> {
        let conn = self.conn.lock();
        Ok(load_all(
            &conn,
            "SELECT data FROM tracking_updates WHERE distress_id = ?1 ORDER BY seq",
            params![distress_id.to_string()],
        )?)
    }
}

#[async_trait]
impl EscalationRepository for SqliteStore {
    async fn insert_tier(&self, tier: &EscalationTier) -> Result<EscalationTier> {
        let mut stored = tier.clone();
        stored.version = 1;
        let data = encode(&stored)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO escalation_tiers (id, version, data) VALUES (?1, ?2, ?3)",
                params![stored.id.to_string(), stored.version as i64, data],
            )
            .map_err(|e| write_error(e, || format!("tier {} already exists", stored.id)))?;
        Ok(stored)
    }

    async fn get_tier(&self, id: TierId) -> Result<Option<EscalationTier>> {
        let conn = self.conn.lock();
        Ok(load_one(
            &conn,
            "SELECT data FROM escalation_tiers WHERE id = ?1",
            params![id.to_string()],
        )?)
    }

    async fn update_tier(&self, tier: &EscalationTier) -> Result<EscalationTier> {
        let id = tier.id.to_string();
        let mut stored = tier.clone();
        stored.version = tier.version + 1;
        let data = encode(&stored)?;
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE escalation_tiers SET version = version + 1, data = ?3 \
                 WHERE id = ?1 AND version = ?2",
                params![id, tier.version as i64, data],
            )
            .map_err(StoreError::from)?;
        if changed == 0 {
            return Err(missed_update(
                &conn,
                "escalation_tiers",
                "tier",
                TierId::RESOURCE,
                &id,
                tier.version,
            ));
        }
        Ok(stored)
    }

    async fn delete_tier(&self, id: TierId) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .execute(
                "DELETE FROM escalation_tiers WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(StoreError::from)?;
        Ok(changed == 1)
    }

    async fn list_tiers(&self) -> Result<Vec<EscalationTier>> {
        let mut tiers: Vec<EscalationTier> = {
            let conn = self.conn.lock();
            load_all(&conn, "SELECT data FROM escalation_tiers", [])?
        };
        tiers.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(tiers)
    }

    async fn insert_path(&self, path: &EscalationPath) -> Result<EscalationPath> {
        let mut stored = path.clone();
        stored.version = 1;
        let data = encode(&stored)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO escalation_paths (id, version, data) VALUES (?1, ?2, ?3)",
                params![stored.id.to_string(), stored.version as i64, data],
            )
            .map_err(|e| write_error(e, || format!("path {} already exists", stored.id)))?;
        Ok(stored)
    }

    async fn get_path(&self, id: PathId) -> Result<Option<EscalationPath>> {
        let conn = self.conn.lock();
        Ok(load_one(
            &conn,
            "SELECT data FROM escalation_paths WHERE id = ?1",
            params![id.to_string()],
        )?)
    }

    async fn update_path(&self, path: &EscalationPath) -> Result<EscalationPath> {
        let id = path.id.to_string();
        let mut stored = path.clone();
        stored.version = path.version + 1;
        let data = encode(&stored)?;
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE escalation_paths SET version = version + 1, data = ?3 \
                 WHERE id = ?1 AND version = ?2",
                params![id, path.version as i64, data],
            )
            .map_err(StoreError::from)?;
        if changed == 0 {
            return Err(missed_update(
                &conn,
                "escalation_paths",
                "path",
                PathId::RESOURCE,
                &id,
                path.version,
            ));
        }
        Ok(stored)
    }

    async fn list_paths(&self) -> Result<Vec<EscalationPath>> {
        let mut paths: Vec<EscalationPath> = {
            let conn = self.conn.lock();
            load_all(&conn, "SELECT data FROM escalation_paths", [])?
        };
        paths.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(paths)
    }

    async fn insert_run(&self, run: &EscalationRun) -> Result<EscalationRun> {
        let mut stored = run.clone();
        stored.version = 1;
        let data = encode(&stored)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO escalation_runs (id, distress_id, active, created_at, version, data) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    stored.id.to_string(),
                    stored.distress_id.to_string(),
                    stored.is_active(),
                    stored.created_at.timestamp_millis(),
                    stored.version as i64,
                    data,
                ],
            )
            .map_err(|e| {
                write_error(e, || {
                    format!(
                        "distress {} already has an active escalation run",
                        stored.distress_id
                    )
                })
            })?;
        Ok(stored)
    }

    async fn get_run(&self, id: RunId) -> Result<Option<EscalationRun>> {
        let conn = self.conn.lock();
        Ok(load_one(
            &conn,
            "SELECT data FROM escalation_runs WHERE id = ?1",
            params![id.to_string()],
        )?)
    }

    async fn update_run(&self, run: &EscalationRun) -> Result<EscalationRun> {
        let id = run.id.to_string();
        let mut stored = run.clone();
        stored.version = run.version + 1;
        let data = encode(&stored)?;
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE escalation_runs SET active = ?3, version = version + 1, data = ?4 \
                 WHERE id = ?1 AND version = ?2",
                params![id, run.version as i64, stored.is_active(), data],
            )
            .map_err(|e| {
                write_error(e, || {
                    format!(
                        "distress {} already has an active escalation run",
                        run.distress_id
                    )
                })
            })?;
        if changed == 0 {
            return Err(missed_update(
                &conn,
                "escalation_runs",
                "escalation run",
                RunId::RESOURCE,
                &id,
                run.version,
            ));
        }
        Ok(stored)
    }

    async fn active_run_for(&self, distress_id: DistressId) -> Result<Option<EscalationRun>> {
        let conn = self.conn.lock();
        Ok(load_one(
            &conn,
            "SELECT data FROM escalation_runs WHERE distress_id = ?1 AND active = 1",
            params![distress_id.to_string()],
        )?)
    }

    async fn list_active_runs(&self) -> Result<Vec<EscalationRun>> {
        let conn = self.conn.lock();
        Ok(load_all(
            &conn,
            "SELECT data FROM escalation_runs WHERE active = 1 ORDER BY created_at, id",
            [],
        )?)
    }
}
