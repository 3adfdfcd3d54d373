//! Escalation engine
//!
//! Owns tier and path definitions and drives escalation runs. Within one
//! engine, run mutations are serialised through an async lock so a ticker and
//! an operator cannot both advance the same run. Engines sharing a repository
//! are ordered by the run's version: a stale write is rejected, and `check`
//! and `acknowledge` reload the run and decide again.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use lifeline_core::config::EscalationConfig;
use lifeline_core::escalation::dedup_contacts;
use lifeline_core::{
    ensure_active, CancellationToken, Clock, ContactDirectory, ContactId, DistressId,
    DistressRepository, EscalationLevel, EscalationPath, EscalationRepository, EscalationRun,
    EscalationTier, Error, FacilityId, Notification, Notifier, PathId, Result, RunId, TierId,
};

use crate::graph;
use crate::timing::{decide, Decision};

/// Attempts for a run write that keeps losing to another engine
const RUN_WRITE_RETRIES: usize = 3;

/// Input to [`EscalationEngine::create_tier`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewTier {
    /// Display name
    pub name: String,
    /// Severity level
    pub level: EscalationLevel,
    /// Minutes before promotion
    pub response_budget_minutes: u32,
    /// Contacts, de-duplicated on create
    pub contacts: Vec<ContactId>,
    /// Default successor
    #[serde(default)]
    pub next_tier_id: Option<TierId>,
}

/// Input to [`EscalationEngine::create_path`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewPath {
    /// Display name
    pub name: String,
    /// Tier order
    pub tier_ids: Vec<TierId>,
    /// Facility scope
    #[serde(default)]
    pub facility_id: Option<FacilityId>,
    /// District scope
    #[serde(default)]
    pub district: Option<String>,
}

/// Result of [`EscalationEngine::send_reminder`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderReceipt {
    /// Recipients reached
    pub sent_count: usize,
    /// Distress event
    pub distress_id: DistressId,
    /// Tier reminded
    pub tier_id: TierId,
}

/// Summary of one ticker pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Runs examined
    pub checked: usize,
    /// Runs promoted or finished
    pub advanced: usize,
    /// Reminders sent
    pub reminded: usize,
}

/// Tier graph, paths and escalation runs
pub struct EscalationEngine {
    repo: Arc<dyn EscalationRepository>,
    distress: Arc<dyn DistressRepository>,
    contacts: Arc<dyn ContactDirectory>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: EscalationConfig,
    runs: Mutex<()>,
    definitions: Mutex<()>,
}

impl EscalationEngine {
    /// Create an engine
    pub fn new(
        repo: Arc<dyn EscalationRepository>,
        distress: Arc<dyn DistressRepository>,
        contacts: Arc<dyn ContactDirectory>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: EscalationConfig,
    ) -> Self {
        Self {
            repo,
            distress,
            contacts,
            notifier,
            clock,
            config,
            runs: Mutex::new(()),
            definitions: Mutex::new(()),
        }
    }

    async fn load_tier(&self, id: TierId) -> Result<EscalationTier> {
        self.repo
            .get_tier(id)
            .await?
            .ok_or_else(|| Error::not_found(TierId::RESOURCE, id))
    }

    async fn load_path(&self, id: PathId) -> Result<EscalationPath> {
        self.repo
            .get_path(id)
            .await?
            .ok_or_else(|| Error::not_found(PathId::RESOURCE, id))
    }

    async fn load_run(&self, id: RunId) -> Result<EscalationRun> {
        self.repo
            .get_run(id)
            .await?
            .ok_or_else(|| Error::not_found(RunId::RESOURCE, id))
    }

    async fn check_contacts(&self, contacts: &[ContactId]) -> Result<()> {
        for id in contacts {
            if self.contacts.get_contact(*id).await?.is_none() {
                return Err(Error::not_found(ContactId::RESOURCE, id));
            }
        }
        Ok(())
    }

    // ---- tiers ----

    /// Create a tier
    pub async fn create_tier(&self, cancel: &CancellationToken, input: NewTier) -> Result<EscalationTier> {
        let tier = EscalationTier::new(
            input.name,
            input.level,
            input.response_budget_minutes,
            input.contacts,
            input.next_tier_id,
        )?;
        let _guard = self.definitions.lock().await;
        self.check_contacts(&tier.contacts).await?;

        let mut tiers = graph::index(self.repo.list_tiers().await?);
        tiers.insert(tier.id, tier.clone());
        graph::check_chain(&tiers, tier.id)?;

        ensure_active(cancel)?;
        let tier = self.repo.insert_tier(&tier).await?;
        info!(tier_id = %tier.id, name = %tier.name, "Escalation tier created");
        Ok(tier)
    }

    /// Fetch a tier
    pub async fn get_tier(&self, cancel: &CancellationToken, id: TierId) -> Result<EscalationTier> {
        ensure_active(cancel)?;
        self.load_tier(id).await
    }

    /// All tiers
    pub async fn list_tiers(&self, cancel: &CancellationToken) -> Result<Vec<EscalationTier>> {
        ensure_active(cancel)?;
        self.repo.list_tiers().await
    }

    /// Replace a tier definition, re-checking the graph; Conflict when `tier`
    /// carries a stale version
    pub async fn update_tier(&self, cancel: &CancellationToken, tier: EscalationTier) -> Result<EscalationTier> {
        let mut tier = tier;
        tier.contacts = dedup_contacts(tier.contacts);
        tier.validate()?;

        let _guard = self.definitions.lock().await;
        self.load_tier(tier.id).await?;
        self.check_contacts(&tier.contacts).await?;

        let mut tiers = graph::index(self.repo.list_tiers().await?);
        tiers.insert(tier.id, tier.clone());
        graph::check_graph(&tiers)?;

        ensure_active(cancel)?;
        let tier = self.repo.update_tier(&tier).await?;
        info!(tier_id = %tier.id, version = tier.version, "Escalation tier updated");
        Ok(tier)
    }

    /// Delete an unreferenced tier
    pub async fn delete_tier(&self, cancel: &CancellationToken, id: TierId) -> Result<()> {
        let _guard = self.definitions.lock().await;
        self.load_tier(id).await?;

        if let Some(path) = self
            .repo
            .list_paths()
            .await?
            .into_iter()
            .find(|p| p.tier_ids.contains(&id))
        {
            return Err(Error::conflict(format!("tier {id} is used by path {}", path.id)));
        }
        if let Some(tier) = self
            .repo
            .list_tiers()
            .await?
            .into_iter()
            .find(|t| t.next_tier_id == Some(id))
        {
            return Err(Error::conflict(format!("tier {id} is the next tier of {}", tier.id)));
        }

        ensure_active(cancel)?;
        self.repo.delete_tier(id).await?;
        info!(tier_id = %id, "Escalation tier deleted");
        Ok(())
    }

    // ---- paths ----

    /// Create an active path
    pub async fn create_path(&self, cancel: &CancellationToken, input: NewPath) -> Result<EscalationPath> {
        if input.name.trim().is_empty() {
            return Err(Error::invalid_field("name", "path name cannot be empty"));
        }
        let _guard = self.definitions.lock().await;
        let tiers = graph::index(self.repo.list_tiers().await?);
        graph::check_path(&tiers, &input.tier_ids)?;

        let path = EscalationPath {
            id: PathId::new(),
            name: input.name,
            tier_ids: input.tier_ids,
            active: true,
            facility_id: input.facility_id,
            district: input.district,
            version: 0,
        };
        ensure_active(cancel)?;
        let path = self.repo.insert_path(&path).await?;
        info!(path_id = %path.id, tiers = path.tier_ids.len(), "Escalation path created");
        Ok(path)
    }

    /// Fetch a path
    pub async fn get_path(&self, cancel: &CancellationToken, id: PathId) -> Result<EscalationPath> {
        ensure_active(cancel)?;
        self.load_path(id).await
    }

    /// All paths
    pub async fn list_paths(&self, cancel: &CancellationToken) -> Result<Vec<EscalationPath>> {
        ensure_active(cancel)?;
        self.repo.list_paths().await
    }

    /// Enable or disable a path
    pub async fn set_path_active(&self, cancel: &CancellationToken, id: PathId, active: bool) -> Result<EscalationPath> {
        let _guard = self.definitions.lock().await;
        let mut path = self.load_path(id).await?;
        path.active = active;
        ensure_active(cancel)?;
        let path = self.repo.update_path(&path).await?;
        info!(path_id = %id, active, "Escalation path toggled");
        Ok(path)
    }

    /// Most specific active path: facility match, then district, then unscoped
    pub async fn find_path(
        &self,
        cancel: &CancellationToken,
        facility: Option<FacilityId>,
        district: Option<&str>,
    ) -> Result<Option<EscalationPath>> {
        ensure_active(cancel)?;
        let active: Vec<EscalationPath> = self
            .repo
            .list_paths()
            .await?
            .into_iter()
            .filter(|p| p.active && !p.tier_ids.is_empty())
            .collect();

        let by_facility = facility.and_then(|f| active.iter().find(|p| p.facility_id == Some(f)));
        let by_district = district.and_then(|d| {
            active
                .iter()
                .find(|p| p.facility_id.is_none() && p.district.as_deref() == Some(d))
        });
        let unscoped = active
            .iter()
            .find(|p| p.facility_id.is_none() && p.district.is_none());

        Ok(by_facility.or(by_district).or(unscoped).cloned())
    }

    // ---- runs ----

    async fn path_name(&self, path_id: PathId) -> String {
        match self.repo.get_path(path_id).await {
            Ok(Some(path)) => path.name,
            Ok(None) => path_id.to_string(),
            Err(e) => {
                warn!(path_id = %path_id, error = %e, "Path lookup failed");
                path_id.to_string()
            }
        }
    }

    async fn deliver(&self, notification: Notification) -> usize {
        match self.notifier.deliver(&notification).await {
            Ok(delivery) => delivery.reached,
            Err(e) => {
                warn!(
                    kind = notification.name(),
                    distress_id = %notification.distress_id(),
                    error = %e,
                    "Escalation notification failed"
                );
                0
            }
        }
    }

    async fn notify_tier(&self, distress_id: DistressId, path_name: String, tier: &EscalationTier) -> usize {
        self.deliver(Notification::Escalation {
            distress_id,
            path_name,
            tier_id: tier.id,
            tier_name: tier.name.clone(),
            level: tier.level,
            contacts: tier.contacts.clone(),
        })
        .await
    }

    async fn notify_reminder(
        &self,
        distress_id: DistressId,
        path_name: String,
        tier: &EscalationTier,
        attempt: u32,
    ) -> usize {
        self.deliver(Notification::Reminder {
            distress_id,
            path_name,
            tier_id: tier.id,
            tier_name: tier.name.clone(),
            attempt,
            contacts: tier.contacts.clone(),
        })
        .await
    }

    /// Begin walking a path for a distress event; returns the run and its first tier
    pub async fn start(
        &self,
        cancel: &CancellationToken,
        distress_id: DistressId,
        path_id: PathId,
    ) -> Result<(EscalationRun, EscalationTier)> {
        ensure_active(cancel)?;
        let _guard = self.runs.lock().await;
        let event = self
            .distress
            .get_distress(distress_id)
            .await?
            .ok_or_else(|| Error::not_found(DistressId::RESOURCE, distress_id))?;
        if event.status.is_terminal() {
            return Err(Error::validation(format!(
                "distress {distress_id} is {} and cannot be escalated",
                event.status
            )));
        }
        let path = self.load_path(path_id).await?;
        if !path.active {
            return Err(Error::validation(format!("escalation path {path_id} is inactive")));
        }
        let first = path
            .tier_at(0)
            .ok_or_else(|| Error::validation(format!("escalation path {path_id} is empty")))?;
        if self.repo.active_run_for(distress_id).await?.is_some() {
            return Err(Error::conflict(format!(
                "distress {distress_id} already has an active escalation run"
            )));
        }
        let tier = self.load_tier(first).await?;

        let run = EscalationRun::start(distress_id, path_id, self.clock.now());
        ensure_active(cancel)?;
        let run = self.repo.insert_run(&run).await?;
        info!(run_id = %run.id, distress_id = %distress_id, tier_id = %tier.id, "Escalation started");

        self.notify_tier(distress_id, path.name, &tier).await;
        Ok((run, tier))
    }

    async fn advance_locked(&self, cancel: &CancellationToken, mut run: EscalationRun) -> Result<Option<EscalationTier>> {
        if !run.is_active() {
            return Err(Error::validation(format!("escalation run {} is not active", run.id)));
        }
        let path = self.load_path(run.path_id).await?;
        let now = self.clock.now();
        let next = if run.advance(path.tier_ids.len(), now) {
            let id = path
                .tier_at(run.current_tier_index)
                .ok_or_else(|| Error::internal("path index out of range"))?;
            Some(self.load_tier(id).await?)
        } else {
            None
        };

        ensure_active(cancel)?;
        let run = self.repo.update_run(&run).await?;
        match &next {
            Some(tier) => {
                info!(run_id = %run.id, distress_id = %run.distress_id, tier_id = %tier.id, "Escalation advanced");
                self.notify_tier(run.distress_id, path.name, tier).await;
            }
            None => info!(run_id = %run.id, distress_id = %run.distress_id, "Escalation path exhausted"),
        }
        Ok(next)
    }

    /// Promote a run to its next tier; `None` when the path is exhausted
    pub async fn advance(&self, cancel: &CancellationToken, run_id: RunId) -> Result<Option<EscalationTier>> {
        ensure_active(cancel)?;
        let _guard = self.runs.lock().await;
        let run = self.load_run(run_id).await?;
        self.advance_locked(cancel, run).await
    }

    async fn remind_locked(&self, cancel: &CancellationToken, mut run: EscalationRun) -> Result<usize> {
        if !run.is_active() {
            return Err(Error::validation(format!("escalation run {} is not active", run.id)));
        }
        let path = self.load_path(run.path_id).await?;
        let tier_id = path
            .tier_at(run.current_tier_index)
            .ok_or_else(|| Error::internal("path index out of range"))?;
        let tier = self.load_tier(tier_id).await?;
        let attempt = run.reminder_attempts + 1;

        run.record_reminder(self.clock.now());
        ensure_active(cancel)?;
        let run = self.repo.update_run(&run).await?;
        let reached = self.notify_reminder(run.distress_id, path.name, &tier, attempt).await;
        debug!(run_id = %run.id, tier_id = %tier.id, attempt, reached, "Escalation reminder sent");
        Ok(reached)
    }

    /// Send the next reminder for the run's current tier
    pub async fn remind(&self, cancel: &CancellationToken, run_id: RunId) -> Result<usize> {
        ensure_active(cancel)?;
        let _guard = self.runs.lock().await;
        let run = self.load_run(run_id).await?;
        self.remind_locked(cancel, run).await
    }

    /// Terminate a run because its current tier responded
    pub async fn acknowledge(
        &self,
        cancel: &CancellationToken,
        run_id: RunId,
        tier_id: TierId,
        by: Option<ContactId>,
    ) -> Result<EscalationRun> {
        ensure_active(cancel)?;
        let _guard = self.runs.lock().await;
        let mut attempt = 0;
        loop {
            match self.acknowledge_locked(cancel, run_id, tier_id, by).await {
                Err(Error::Conflict(message)) if attempt + 1 < RUN_WRITE_RETRIES => {
                    attempt += 1;
                    debug!(run_id = %run_id, attempt, %message, "Acknowledgement raced; reloading run");
                }
                other => return other,
            }
        }
    }

    async fn acknowledge_locked(
        &self,
        cancel: &CancellationToken,
        run_id: RunId,
        tier_id: TierId,
        by: Option<ContactId>,
    ) -> Result<EscalationRun> {
        let mut run = self.load_run(run_id).await?;
        if run.acknowledged {
            return Ok(run);
        }
        if run.done {
            return Err(Error::validation(format!("escalation run {run_id} is already done")));
        }
        let path = self.load_path(run.path_id).await?;
        if path.tier_at(run.current_tier_index) != Some(tier_id) {
            return Err(Error::invalid_field(
                "tier_id",
                format!("tier {tier_id} is not the current tier of run {run_id}"),
            ));
        }
        run.acknowledge(by, self.clock.now());
        ensure_active(cancel)?;
        let run = self.repo.update_run(&run).await?;
        info!(run_id = %run_id, distress_id = %run.distress_id, tier_id = %tier_id, "Escalation acknowledged");
        Ok(run)
    }

    /// Active run of a distress event
    pub async fn active_run(&self, cancel: &CancellationToken, distress_id: DistressId) -> Result<Option<EscalationRun>> {
        ensure_active(cancel)?;
        self.repo.active_run_for(distress_id).await
    }

    /// Fetch a run
    pub async fn get_run(&self, cancel: &CancellationToken, run_id: RunId) -> Result<EscalationRun> {
        ensure_active(cancel)?;
        self.load_run(run_id).await
    }

    /// Move an event's escalation past `current_tier`
    pub async fn escalate_next(
        &self,
        cancel: &CancellationToken,
        distress_id: DistressId,
        current_tier: TierId,
    ) -> Result<EscalationTier> {
        ensure_active(cancel)?;
        let _guard = self.runs.lock().await;
        if self.distress.get_distress(distress_id).await?.is_none() {
            return Err(Error::not_found(DistressId::RESOURCE, distress_id));
        }

        if let Some(run) = self.repo.active_run_for(distress_id).await? {
            let path = self.load_path(run.path_id).await?;
            if path.tier_at(run.current_tier_index) != Some(current_tier) {
                return Err(Error::invalid_field(
                    "current_tier_id",
                    format!("tier {current_tier} is not the current tier of run {}", run.id),
                ));
            }
            return self
                .advance_locked(cancel, run)
                .await?
                .ok_or_else(|| Error::validation("no next tier available"));
        }

        let tier = self.load_tier(current_tier).await?;
        let next_id = tier
            .next_tier_id
            .ok_or_else(|| Error::validation("no next tier available"))?;
        let next = self.load_tier(next_id).await?;
        info!(distress_id = %distress_id, tier_id = %next.id, "Escalated along tier link");
        self.notify_tier(distress_id, tier.name.clone(), &next).await;
        Ok(next)
    }

    /// Remind a tier about a distress event
    pub async fn send_reminder(
        &self,
        cancel: &CancellationToken,
        distress_id: DistressId,
        tier_id: TierId,
        attempts: u32,
    ) -> Result<ReminderReceipt> {
        ensure_active(cancel)?;
        let _guard = self.runs.lock().await;
        if self.distress.get_distress(distress_id).await?.is_none() {
            return Err(Error::not_found(DistressId::RESOURCE, distress_id));
        }
        let tier = self.load_tier(tier_id).await?;

        let mut path_name = tier.name.clone();
        if let Some(mut run) = self.repo.active_run_for(distress_id).await? {
            let path = self.load_path(run.path_id).await?;
            if path.tier_at(run.current_tier_index) == Some(tier_id) {
                run.record_reminder(self.clock.now());
                ensure_active(cancel)?;
                self.repo.update_run(&run).await?;
            }
            path_name = path.name;
        }

        let sent_count = self
            .notify_reminder(distress_id, path_name, &tier, attempts.saturating_add(1))
            .await;
        Ok(ReminderReceipt {
            sent_count,
            distress_id,
            tier_id,
        })
    }

    /// Apply the timing protocol to one run
    pub async fn check(&self, cancel: &CancellationToken, run_id: RunId) -> Result<Decision> {
        ensure_active(cancel)?;
        let _guard = self.runs.lock().await;
        let mut attempt = 0;
        loop {
            match self.check_locked(cancel, run_id).await {
                Err(Error::Conflict(message)) if attempt + 1 < RUN_WRITE_RETRIES => {
                    attempt += 1;
                    debug!(run_id = %run_id, attempt, %message, "Run write raced; deciding again");
                }
                other => return other,
            }
        }
    }

    async fn check_locked(&self, cancel: &CancellationToken, run_id: RunId) -> Result<Decision> {
        let mut run = self.load_run(run_id).await?;
        if !run.is_active() {
            return Ok(Decision::Exit);
        }

        let terminal = match self.distress.get_distress(run.distress_id).await? {
            Some(event) => event.status.is_terminal(),
            None => true,
        };
        if terminal {
            run.finish(self.clock.now());
            ensure_active(cancel)?;
            self.repo.update_run(&run).await?;
            info!(run_id = %run_id, distress_id = %run.distress_id, "Escalation ended with its distress event");
            return Ok(Decision::Exit);
        }

        let path = self.load_path(run.path_id).await?;
        let tier_id = path
            .tier_at(run.current_tier_index)
            .ok_or_else(|| Error::internal("path index out of range"))?;
        let tier = self.load_tier(tier_id).await?;

        let decision = decide(&run, &tier, self.config.max_attempts, self.clock.now());
        match decision {
            Decision::Advance => {
                self.advance_locked(cancel, run).await?;
            }
            Decision::Remind { .. } => {
                self.remind_locked(cancel, run).await?;
            }
            Decision::Exit | Decision::Wait => {}
        }
        Ok(decision)
    }

    /// Check every active run once
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickReport> {
        let runs = self.repo.list_active_runs().await?;
        let mut report = TickReport::default();
        for run in runs {
            ensure_active(cancel)?;
            report.checked += 1;
            match self.check(cancel, run.id).await {
                Ok(Decision::Advance) => report.advanced += 1,
                Ok(Decision::Remind { .. }) => report.reminded += 1,
                Ok(_) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => warn!(run_id = %run.id, error = %e, "Escalation check failed"),
            }
        }
        if report.advanced + report.reminded > 0 {
            info!(checked = report.checked, advanced = report.advanced, reminded = report.reminded, "Escalation tick");
        }
        Ok(report)
    }

    /// Tick every `escalation.tick_secs` until cancelled
    pub async fn run_ticker(&self, cancel: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.tick());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(tick_secs = self.config.tick_secs, "Escalation ticker started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.tick(&cancel).await {
                        Ok(_) | Err(Error::Cancelled) => {}
                        Err(e) => warn!(error = %e, "Escalation tick failed"),
                    }
                }
            }
        }
        info!("Escalation ticker stopped");
        Ok(())
    }
}
