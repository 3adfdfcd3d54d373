//! Per-action input decoding and service calls

use axum::http::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use lifeline_core::{
    CancellationToken, Contact, ContactId, Coordinates, DistressId, Error, Facility, FacilityId, MessageId,
    MessageKind, PathId, Recipient, Result, Subject, SubjectDirectory, TierId, Timestamp, UserId, Vehicle,
    VehicleId,
};
use lifeline_dispatch::ReportDistress;
use lifeline_escalation::{NewPath, NewTier};
use lifeline_notify::{PreferencesPatch, ScheduleRequest};

use crate::error::ApiError;
use crate::state::AppState;

type Reply = std::result::Result<(StatusCode, Value), ApiError>;

fn decode<T: DeserializeOwned>(input: Value) -> Result<T> {
    let input = if input.is_null() { json!({}) } else { input };
    Ok(serde_json::from_value(input)?)
}

fn render<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::internal(format!("response encoding failed: {e}")))
}

fn ok<T: Serialize>(value: &T) -> Reply {
    Ok((StatusCode::OK, render(value)?))
}

fn created<T: Serialize>(value: &T) -> Reply {
    Ok((StatusCode::CREATED, render(value)?))
}

fn success() -> Reply {
    Ok((StatusCode::OK, json!({ "success": true })))
}

fn required_name(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::invalid_field(field, format!("{field} cannot be empty")));
    }
    Ok(value.to_string())
}

/// Route a normalised action name to its handler
pub async fn execute(state: &AppState, cancel: &CancellationToken, action: &str, input: Value) -> Reply {
    match action {
        "register_facility" => register_facility(state, input),
        "register_subject" => register_subject(state, input),
        "register_contact" => register_contact(state, input),
        "register_vehicle" => register_vehicle(state, cancel, input).await,
        "get_vehicle" => get_vehicle(state, cancel, input).await,
        "create_escalation_tier" => create_tier(state, cancel, input).await,
        "create_escalation_path" => create_path(state, cancel, input).await,

        "report_distress" => report_distress(state, cancel, input).await,
        "get_distress" => get_distress(state, cancel, input).await,
        "list_active_distress" => list_active_distress(state, cancel, input).await,
        "set_distress_status" => set_distress_status(state, cancel, input).await,
        "assign_facility" => assign_facility(state, cancel, input).await,
        "set_distress_priority" => set_distress_priority(state, cancel, input).await,

        "find_candidates" => find_candidates(state, cancel, input).await,
        "dispatch" => dispatch(state, cancel, input).await,
        "update_vehicle_status" => update_vehicle_status(state, cancel, input).await,
        "update_vehicle_location" => update_vehicle_location(state, cancel, input).await,

        "get_eta" => get_eta(state, cancel, input).await,
        "record_arrival" => record_arrival(state, cancel, input).await,
        "record_update" => record_update(state, cancel, input).await,
        "report_traffic_delay" => report_traffic_delay(state, cancel, input).await,

        "start_escalation" => start_escalation(state, cancel, input).await,
        "escalate_next" => escalate_next(state, cancel, input).await,
        "send_reminder" => send_reminder(state, cancel, input).await,
        "acknowledge_escalation" => acknowledge_escalation(state, cancel, input).await,

        "schedule_sms" => schedule(state, cancel, MessageKind::Sms, input).await,
        "schedule_push" => schedule(state, cancel, MessageKind::Push, input).await,
        "cancel_scheduled" => cancel_scheduled(state, cancel, input).await,
        "list_scheduled" => list_scheduled(state, cancel, input).await,

        "get_preferences" => get_preferences(state, cancel, input).await,
        "update_preferences" => update_preferences(state, cancel, input).await,

        other => Err(Error::invalid_field("action_name", format!("unknown action '{other}'")).into()),
    }
}

// ---- reference data ----

#[derive(Deserialize)]
struct FacilityInput {
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    district: Option<String>,
}

fn register_facility(state: &AppState, input: Value) -> Reply {
    let input: FacilityInput = decode(input)?;
    let facility = Facility::new(
        required_name("name", &input.name)?,
        Coordinates::new(input.latitude, input.longitude)?,
        input.district,
    );
    state.store.insert_facility(&facility)?;
    created(&facility)
}

#[derive(Deserialize)]
struct SubjectInput {
    #[serde(default)]
    subject_id: Option<UserId>,
    #[serde(default)]
    primary_facility_id: Option<FacilityId>,
    #[serde(default)]
    district: Option<String>,
}

fn register_subject(state: &AppState, input: Value) -> Reply {
    let input: SubjectInput = decode(input)?;
    let subject = Subject {
        id: input.subject_id.unwrap_or_else(UserId::new),
        primary_facility: input.primary_facility_id,
        district: input.district,
    };
    state.store.insert_subject(&subject)?;
    created(&subject)
}

#[derive(Deserialize)]
struct ContactInput {
    name: String,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    emergency: bool,
    #[serde(default)]
    escalation: bool,
    #[serde(default)]
    facility_id: Option<FacilityId>,
}

fn register_contact(state: &AppState, input: Value) -> Reply {
    let input: ContactInput = decode(input)?;
    let mut contact = Contact::new(required_name("name", &input.name)?);
    contact.phone = input.phone;
    contact.email = input.email;
    contact.emergency = input.emergency;
    contact.escalation = input.escalation;
    contact.facility_id = input.facility_id;
    if !contact.is_reachable() {
        return Err(Error::validation("contact needs a phone number or an email address").into());
    }
    state.store.insert_contact(&contact)?;
    created(&contact)
}

#[derive(Deserialize)]
struct VehicleInput {
    call_sign: String,
    kind: String,
    home_facility_id: FacilityId,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    crew: Vec<UserId>,
}

fn optional_location(latitude: Option<f64>, longitude: Option<f64>) -> Result<Option<Coordinates>> {
    match (latitude, longitude) {
        (Some(lat), Some(lon)) => Coordinates::new(lat, lon).map(Some),
        (None, None) => Ok(None),
        _ => Err(Error::validation("latitude and longitude must be given together")),
    }
}

async fn register_vehicle(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: VehicleInput = decode(input)?;
    let mut vehicle = Vehicle::new(input.call_sign, input.kind.parse()?, input.home_facility_id, state.clock.now());
    vehicle.last_known_location = optional_location(input.latitude, input.longitude)?;
    vehicle.crew = input.crew.into_iter().collect();
    let stored = state.dispatch.register_vehicle(cancel, vehicle).await?;
    created(&stored)
}

#[derive(Deserialize)]
struct VehicleRef {
    vehicle_id: VehicleId,
}

async fn get_vehicle(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: VehicleRef = decode(input)?;
    ok(&state.dispatch.get_vehicle(cancel, input.vehicle_id).await?)
}

async fn create_tier(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: NewTier = decode(input)?;
    created(&state.escalation.create_tier(cancel, input).await?)
}

async fn create_path(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: NewPath = decode(input)?;
    created(&state.escalation.create_path(cancel, input).await?)
}

// ---- distress ----

#[derive(Deserialize)]
struct ReportInput {
    subject_id: UserId,
    reporter_id: UserId,
    latitude: f64,
    longitude: f64,
    nature: String,
    #[serde(default)]
    description: String,
}

async fn report_distress(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: ReportInput = decode(input)?;
    let report = ReportDistress {
        subject_id: input.subject_id,
        reporter_id: input.reporter_id,
        coordinates: Coordinates::new(input.latitude, input.longitude)?,
        nature: input.nature.parse()?,
        description: input.description,
    };
    created(&state.coordinator.report(cancel, report).await?)
}

#[derive(Deserialize)]
struct DistressRef {
    distress_id: DistressId,
}

async fn get_distress(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: DistressRef = decode(input)?;
    ok(&state.coordinator.get(cancel, input.distress_id).await?)
}

#[derive(Deserialize)]
struct ActiveQuery {
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    radius_km: Option<f64>,
}

async fn list_active_distress(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let query: ActiveQuery = decode(input)?;
    let center = optional_location(query.latitude, query.longitude)?;
    let events = match (center, query.radius_km) {
        (Some(center), Some(km)) => state.coordinator.list_within_radius(cancel, center, km).await?,
        (None, None) => state.coordinator.list_active(cancel).await?,
        _ => return Err(Error::validation("radius queries need latitude, longitude and radius_km").into()),
    };
    ok(&events)
}

#[derive(Deserialize)]
struct StatusInput {
    distress_id: DistressId,
    status: String,
}

async fn set_distress_status(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: StatusInput = decode(input)?;
    let status = input.status.parse()?;
    ok(&state.coordinator.set_status(cancel, input.distress_id, status).await?)
}

#[derive(Deserialize)]
struct FacilityAssignment {
    distress_id: DistressId,
    facility_id: FacilityId,
}

async fn assign_facility(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: FacilityAssignment = decode(input)?;
    ok(&state
        .coordinator
        .attach_facility(cancel, input.distress_id, input.facility_id)
        .await?)
}

#[derive(Deserialize)]
struct PriorityInput {
    distress_id: DistressId,
    priority: u8,
}

async fn set_distress_priority(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: PriorityInput = decode(input)?;
    ok(&state
        .coordinator
        .set_priority(cancel, input.distress_id, input.priority)
        .await?)
}

// ---- dispatch ----

fn default_max_results() -> usize {
    5
}

#[derive(Deserialize)]
struct CandidateQuery {
    distress_id: DistressId,
    #[serde(default = "default_max_results")]
    max_results: usize,
}

async fn find_candidates(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let query: CandidateQuery = decode(input)?;
    ok(&state
        .dispatch
        .find_candidates(cancel, query.distress_id, query.max_results)
        .await?)
}

#[derive(Deserialize)]
struct DispatchInput {
    distress_id: DistressId,
    vehicle_id: VehicleId,
}

async fn dispatch(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: DispatchInput = decode(input)?;
    ok(&state
        .dispatch
        .dispatch(cancel, input.distress_id, input.vehicle_id)
        .await?)
}

#[derive(Deserialize)]
struct VehicleStatusInput {
    vehicle_id: VehicleId,
    status: String,
}

async fn update_vehicle_status(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: VehicleStatusInput = decode(input)?;
    let status = input.status.parse()?;
    ok(&state
        .dispatch
        .update_vehicle_status(cancel, input.vehicle_id, status)
        .await?)
}

#[derive(Deserialize)]
struct LocationInput {
    vehicle_id: VehicleId,
    latitude: f64,
    longitude: f64,
}

async fn update_vehicle_location(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: LocationInput = decode(input)?;
    let location = Coordinates::new(input.latitude, input.longitude)?;
    ok(&state
        .dispatch
        .update_vehicle_location(cancel, input.vehicle_id, location)
        .await?)
}

// ---- tracking ----

async fn get_eta(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: DistressRef = decode(input)?;
    ok(&state.tracking.get_eta(cancel, input.distress_id).await?)
}

async fn record_arrival(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: DistressRef = decode(input)?;
    state.tracking.record_arrival(cancel, input.distress_id).await?;
    success()
}

#[derive(Deserialize)]
struct UpdateInput {
    distress_id: DistressId,
    kind: String,
    description: String,
}

async fn record_update(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: UpdateInput = decode(input)?;
    let kind = input.kind.parse()?;
    ok(&state
        .tracking
        .record_update(cancel, input.distress_id, kind, &input.description)
        .await?)
}

#[derive(Deserialize)]
struct TrafficInput {
    distress_id: DistressId,
    delay_minutes: i64,
}

async fn report_traffic_delay(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: TrafficInput = decode(input)?;
    ok(&state
        .tracking
        .refresh_on_traffic(cancel, input.distress_id, input.delay_minutes)
        .await?)
}

// ---- escalation ----

#[derive(Deserialize)]
struct StartInput {
    distress_id: DistressId,
    #[serde(default)]
    path_id: Option<PathId>,
}

async fn start_escalation(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: StartInput = decode(input)?;
    let path_id = match input.path_id {
        Some(id) => id,
        None => {
            let event = state.coordinator.get(cancel, input.distress_id).await?;
            let district = state
                .store
                .get_subject(event.subject_id)
                .await?
                .and_then(|s| s.district);
            state
                .escalation
                .find_path(cancel, event.assigned_facility, district.as_deref())
                .await?
                .map(|p| p.id)
                .ok_or_else(|| Error::invalid_field("path_id", "no active escalation path applies"))?
        }
    };
    let (_, tier) = state.escalation.start(cancel, input.distress_id, path_id).await?;
    ok(&tier)
}

#[derive(Deserialize)]
struct EscalateInput {
    distress_id: DistressId,
    current_tier_id: TierId,
}

async fn escalate_next(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: EscalateInput = decode(input)?;
    ok(&state
        .escalation
        .escalate_next(cancel, input.distress_id, input.current_tier_id)
        .await?)
}

#[derive(Deserialize)]
struct ReminderInput {
    distress_id: DistressId,
    tier_id: TierId,
    #[serde(default)]
    attempts: u32,
}

async fn send_reminder(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: ReminderInput = decode(input)?;
    ok(&state
        .escalation
        .send_reminder(cancel, input.distress_id, input.tier_id, input.attempts)
        .await?)
}

#[derive(Deserialize)]
struct AcknowledgeInput {
    distress_id: DistressId,
    tier_id: TierId,
    #[serde(default)]
    contact_id: Option<ContactId>,
}

async fn acknowledge_escalation(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: AcknowledgeInput = decode(input)?;
    let run = state
        .escalation
        .active_run(cancel, input.distress_id)
        .await?
        .ok_or_else(|| Error::validation(format!("distress {} has no active escalation run", input.distress_id)))?;
    ok(&state
        .escalation
        .acknowledge(cancel, run.id, input.tier_id, input.contact_id)
        .await?)
}

// ---- scheduled messages ----

#[derive(Deserialize)]
struct ScheduleInput {
    recipient: String,
    payload: Value,
    #[serde(default)]
    channel: String,
    when: Timestamp,
}

async fn schedule(state: &AppState, cancel: &CancellationToken, kind: MessageKind, input: Value) -> Reply {
    let input: ScheduleInput = decode(input)?;
    let request = ScheduleRequest {
        kind,
        recipient: Recipient::parse(&input.recipient)?,
        payload: input.payload,
        channel: input.channel,
        when: input.when,
    };
    created(&state.scheduler.schedule(cancel, request).await?)
}

#[derive(Deserialize)]
struct MessageRef {
    id: MessageId,
}

async fn cancel_scheduled(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: MessageRef = decode(input)?;
    state.scheduler.cancel(cancel, input.id).await?;
    success()
}

#[derive(Deserialize)]
struct UserRef {
    user_id: UserId,
}

async fn list_scheduled(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: UserRef = decode(input)?;
    ok(&state.scheduler.list_for_user(cancel, input.user_id).await?)
}

// ---- preferences ----

async fn get_preferences(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: UserRef = decode(input)?;
    ok(&state.preferences.get(cancel, input.user_id).await?)
}

#[derive(Deserialize)]
struct PreferencesInput {
    user_id: UserId,
    #[serde(flatten)]
    patch: PreferencesPatch,
}

async fn update_preferences(state: &AppState, cancel: &CancellationToken, input: Value) -> Reply {
    let input: PreferencesInput = decode(input)?;
    ok(&state.preferences.update(cancel, input.user_id, &input.patch).await?)
}
