//! The agent runtime: one task per agent, one mailbox, one event at a time.
//!
//! Everything an agent owns (entities, correlations, approvals, counters)
//! lives in its [`AgentContext`] and is only touched from the agent's own
//! loop. Role-specific logic plugs in through [`AgentBehavior`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_models::journal_schema::JournalEventKind;
use launchpad_models::{
    AckStatus, AgentAddress, AgentConfig, AgentRole, DecisionResult, EntityId, EntityReport,
    Envelope, Metrics, MonitoredEntity, Payload, PendingApproval, RuntimeConfig, StatusReport,
};
use launchpad_store::{DecisionJournal, DeliveryFilter};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alert::AlertSink;
use crate::approval::ApprovalBook;
use crate::correlation::{CorrelationEntry, CorrelationTracker};
use crate::error::{AgentError, FaultClass, TransportError};
use crate::scheduler::{spawn_sweeper, MonitorScheduler};
use crate::state::StateStore;
use crate::transport::Transport;

/// Convert configured seconds into a chrono span without overflowing.
pub(crate) fn span(seconds: u64) -> chrono::Duration {
    chrono::Duration::from_std(Duration::from_secs(seconds))
        .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

/// What arrives in an agent's mailbox.
#[derive(Debug)]
pub enum Event {
    Inbound(Envelope),
    /// Re-evaluate due entities.
    Tick,
    /// Expire overdue correlations and approvals.
    Sweep,
}

/// Cloneable sender side of an agent's mailbox.
#[derive(Clone)]
pub struct AgentHandle {
    address: AgentAddress,
    tx: mpsc::Sender<Event>,
    tick_pending: Arc<AtomicBool>,
}

impl fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentHandle")
            .field("address", &self.address)
            .finish()
    }
}

impl AgentHandle {
    /// A handle and mailbox not yet attached to a runtime.
    pub fn detached(address: &str, capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            address: AgentAddress::new(address),
            tx,
            tick_pending: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx)
    }

    pub fn address(&self) -> &AgentAddress {
        &self.address
    }

    /// Wait for mailbox space, then enqueue.
    pub async fn submit(&self, event: Event) -> Result<(), TransportError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| TransportError::Closed(self.address.to_string()))
    }

    pub fn try_submit(&self, event: Event) -> Result<(), TransportError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Full(self.address.to_string()),
            TrySendError::Closed(_) => TransportError::Closed(self.address.to_string()),
        })
    }

    /// Enqueue a tick unless one is already waiting. Returns whether a tick
    /// was enqueued.
    pub fn request_tick(&self) -> bool {
        if self.tick_pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self.try_submit(Event::Tick).is_err() {
            self.tick_pending.store(false, Ordering::Release);
            return false;
        }
        true
    }

    fn tick_started(&self) {
        self.tick_pending.store(false, Ordering::Release);
    }
}

/// Collaborators shared by every agent in a process.
#[derive(Clone)]
pub struct AgentServices {
    pub transport: Arc<dyn Transport>,
    pub alerts: Arc<dyn AlertSink>,
    pub journal: Arc<DecisionJournal>,
    pub runtime: RuntimeConfig,
}

/// Effects an evaluation asks for. Applied only if the decision commits.
#[derive(Debug)]
pub struct Evaluation<P> {
    /// `None` when the decision is completed later, e.g. by a reply.
    pub decision: Option<DecisionResult>,
    /// Report the decision to the alert sink.
    pub alert: bool,
    pub outbound: Vec<(AgentAddress, Payload)>,
    /// Sends that expect a correlated reply, with the context to resume from.
    pub requests: Vec<(AgentAddress, Payload, P)>,
    /// Record an action on the entity (starts the cooldown).
    pub acted: bool,
    pub metric_updates: Option<Metrics>,
    /// Open an approval workflow for the decision, notifying this address.
    pub propose_to: Option<AgentAddress>,
    pub counters: Vec<&'static str>,
}

impl<P> Evaluation<P> {
    pub fn decided(decision: DecisionResult) -> Self {
        Self {
            decision: Some(decision),
            ..Self::pending()
        }
    }

    pub fn pending() -> Self {
        Self {
            decision: None,
            alert: false,
            outbound: Vec::new(),
            requests: Vec::new(),
            acted: false,
            metric_updates: None,
            propose_to: None,
            counters: Vec::new(),
        }
    }
}

/// How a role-specific command was handled.
#[derive(Debug)]
pub enum CommandOutcome {
    Done,
    Reply(Payload),
    /// The command registered or changed an entity that must be evaluated now.
    Evaluate(EntityId),
}

/// Whether the agent loop keeps running after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

/// Role-specific logic of an agent.
#[async_trait]
pub trait AgentBehavior: Send + Sync + 'static {
    /// Context kept for each outstanding request until its reply or timeout.
    type Pending: Send + Sync + fmt::Debug + 'static;

    fn role(&self) -> AgentRole;

    /// Evaluate a snapshot of one entity. Must not assume the entity still
    /// exists when the result is committed.
    async fn evaluate(
        &self,
        entity: &MonitoredEntity,
        now: DateTime<Utc>,
    ) -> Evaluation<Self::Pending>;

    async fn on_command(
        &mut self,
        _ctx: &mut AgentContext<Self::Pending>,
        envelope: &Envelope,
    ) -> Result<CommandOutcome, AgentError> {
        Err(AgentError::UnexpectedKind(envelope.kind()))
    }

    async fn on_reply(
        &mut self,
        _ctx: &mut AgentContext<Self::Pending>,
        _request: CorrelationEntry<Self::Pending>,
        _reply: &Envelope,
    ) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_timeout(
        &mut self,
        _ctx: &mut AgentContext<Self::Pending>,
        _request: CorrelationEntry<Self::Pending>,
    ) -> Result<(), AgentError> {
        Ok(())
    }

    /// Called after every approval transition, including expiry.
    async fn on_approval(
        &mut self,
        _ctx: &mut AgentContext<Self::Pending>,
        _approval: &PendingApproval,
    ) -> Result<(), AgentError> {
        Ok(())
    }

    async fn on_execution(
        &mut self,
        _ctx: &mut AgentContext<Self::Pending>,
        _entity_id: &EntityId,
        _success: bool,
    ) -> Result<(), AgentError> {
        Ok(())
    }

    fn on_removed(&mut self, _entity_id: &EntityId) {}
}

/// State owned by one agent plus handles to shared services.
pub struct AgentContext<P> {
    pub address: AgentAddress,
    pub config: AgentConfig,
    pub store: StateStore,
    pub correlations: CorrelationTracker<P>,
    pub approvals: ApprovalBook,
    pub counters: BTreeMap<String, u64>,
    services: AgentServices,
}

impl<P: Send + Sync + fmt::Debug + 'static> AgentContext<P> {
    fn new(config: AgentConfig, services: AgentServices) -> Self {
        Self {
            address: AgentAddress::new(config.name.clone()),
            config,
            store: StateStore::new(),
            correlations: CorrelationTracker::new(),
            approvals: ApprovalBook::new(),
            counters: BTreeMap::new(),
            services,
        }
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.services.runtime
    }

    pub fn journal(&self) -> &DecisionJournal {
        &self.services.journal
    }

    pub fn bump(&mut self, counter: &str) {
        *self.counters.entry(counter.to_string()).or_default() += 1;
    }

    pub fn counter(&self, counter: &str) -> u64 {
        self.counters.get(counter).copied().unwrap_or(0)
    }

    /// Send an envelope, retrying once on a transport failure.
    pub async fn deliver(&self, envelope: Envelope) -> Result<(), AgentError> {
        let retry = envelope.clone();
        match self.services.transport.send(envelope).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(agent = %self.address, to = %retry.receiver, error = %first, "Send failed, retrying once");
                self.services.transport.send(retry).await.map_err(AgentError::from)
            }
        }
    }

    pub async fn send(&self, to: AgentAddress, payload: Payload) -> Result<Uuid, AgentError> {
        let envelope = Envelope::new(self.address.clone(), to, payload);
        let id = envelope.id;
        self.deliver(envelope).await?;
        Ok(id)
    }

    /// Send a request and remember `context` until the reply or the timeout.
    pub async fn request(
        &mut self,
        to: AgentAddress,
        payload: Payload,
        context: P,
        now: DateTime<Utc>,
    ) -> Result<Uuid, AgentError> {
        let envelope = Envelope::new(self.address.clone(), to, payload);
        let id = envelope.id;
        self.correlations
            .register(id, context, span(self.config.request_timeout_seconds), now)?;
        if let Err(e) = self.deliver(envelope).await {
            let _ = self.correlations.resolve(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Append to the decision journal. A failed write is logged, not fatal.
    pub fn record<T: Serialize>(&self, entity_id: &EntityId, event: JournalEventKind, payload: &T) {
        if let Err(e) =
            self.services
                .journal
                .record(self.address.as_str(), entity_id.as_str(), event, payload)
        {
            warn!(agent = %self.address, entity = %entity_id, error = %e, "Journal write failed");
        }
    }

    /// Hand a decision to the alert sink without waiting for it.
    pub fn alert(&self, entity_id: &EntityId, decision: &DecisionResult) {
        let sink = Arc::clone(&self.services.alerts);
        let agent = self.address.clone();
        let entity_id = entity_id.clone();
        let decision = decision.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.notify(&agent, &entity_id, &decision).await {
                warn!(agent = %agent, entity = %entity_id, error = %e, "Alert delivery failed");
            }
        });
    }

    /// Open an approval for `decision` and notify `requested_by`.
    pub async fn open_approval(
        &mut self,
        entity_id: EntityId,
        decision: DecisionResult,
        requested_by: AgentAddress,
        now: DateTime<Utc>,
    ) -> Result<PendingApproval, AgentError> {
        let ttl = span(self.config.approval_ttl_seconds);
        let approval = self
            .approvals
            .propose(entity_id, decision, requested_by, ttl, now);
        info!(agent = %self.address, approval = %approval.id, entity = %approval.entity_id, "Approval requested");
        self.bump("approvals_requested");
        self.settle_approval(&approval).await?;
        Ok(approval)
    }

    /// Journal an approval transition and notify the requester.
    pub async fn settle_approval(&self, approval: &PendingApproval) -> Result<(), AgentError> {
        self.record(&approval.entity_id, JournalEventKind::ApprovalTransition, approval);
        self.send(
            approval.requested_by.clone(),
            Payload::ApprovalNotice {
                approval: approval.clone(),
            },
        )
        .await?;
        Ok(())
    }

    /// Commit an evaluation of `entity_id` made from registration
    /// `generation`, then apply its effects.
    ///
    /// Returns `false` and applies nothing when the entity was removed or
    /// re-registered in the meantime.
    pub async fn commit(
        &mut self,
        entity_id: &EntityId,
        generation: u64,
        evaluation: Evaluation<P>,
        now: DateTime<Utc>,
    ) -> Result<bool, AgentError> {
        if !self
            .store
            .commit(entity_id, generation, evaluation.decision.clone(), now)
        {
            debug!(agent = %self.address, entity = %entity_id, generation, "Discarding stale evaluation");
            return Ok(false);
        }

        let Evaluation {
            decision,
            alert,
            outbound,
            requests,
            acted,
            metric_updates,
            propose_to,
            counters,
        } = evaluation;

        if let Some(decision) = &decision {
            info!(
                agent = %self.address,
                entity = %entity_id,
                kind = ?decision.kind,
                score = %decision.score,
                level = %decision.level,
                confidence = %decision.confidence,
                degraded = decision.degraded,
                "Decision committed"
            );
            self.bump("evaluations");
            self.record(entity_id, JournalEventKind::Decision, decision);
            if alert {
                self.alert(entity_id, decision);
            }
        }

        if let Some(metrics) = metric_updates {
            self.store.update_metrics(entity_id, metrics)?;
        }
        if acted {
            self.store.mark_action(entity_id, now);
        }
        for counter in counters {
            self.bump(counter);
        }
        // The decision stands from here on; a lost delivery does not undo it.
        for (to, payload) in outbound {
            if let Err(e) = self.send(to.clone(), payload).await {
                self.delivery_failed(entity_id, &to, &e);
            }
        }
        for (to, payload, context) in requests {
            if let Err(e) = self.request(to.clone(), payload, context, now).await {
                self.delivery_failed(entity_id, &to, &e);
            }
        }
        if let (Some(requested_by), Some(decision)) = (propose_to, decision) {
            if let Err(e) = self
                .open_approval(entity_id.clone(), decision, requested_by.clone(), now)
                .await
            {
                self.delivery_failed(entity_id, &requested_by, &e);
            }
        }
        Ok(true)
    }

    fn delivery_failed(&mut self, entity_id: &EntityId, to: &AgentAddress, e: &AgentError) {
        error!(agent = %self.address, entity = %entity_id, to = %to, error = %e, "Decision committed but delivery failed");
        self.bump("deliveries_failed");
    }

    fn status(&self, role: AgentRole) -> StatusReport {
        StatusReport {
            agent: self.address.clone(),
            role: role.as_str().to_string(),
            monitored: self.store.len(),
            awaiting_approvals: self.approvals.awaiting(),
            pending_requests: self.correlations.len(),
            counters: self.counters.clone(),
        }
    }

    fn report(&self, entity_id: &EntityId) -> Result<EntityReport, AgentError> {
        let entity = self
            .store
            .get(entity_id)
            .ok_or_else(|| AgentError::UnknownEntity(entity_id.clone()))?;

        let history = self
            .services
            .journal
            .history(
                self.address.as_str(),
                entity_id.as_str(),
                self.services.runtime.report_history_limit,
            )
            .unwrap_or_else(|e| {
                warn!(agent = %self.address, entity = %entity_id, error = %e, "Journal read failed");
                Vec::new()
            });

        Ok(EntityReport {
            entity_id: entity.id.clone(),
            entity_kind: entity.kind,
            metrics: entity.metrics.clone(),
            last_evaluated_at: entity.last_evaluated_at,
            latest: entity.last_decision.clone(),
            history,
        })
    }
}

/// Drives one agent: owns its context and behavior, consumes its mailbox.
pub struct AgentRuntime<B: AgentBehavior> {
    behavior: B,
    ctx: AgentContext<B::Pending>,
    scheduler: MonitorScheduler,
    dedup: DeliveryFilter,
    handle: AgentHandle,
    mailbox: mpsc::Receiver<Event>,
}

impl<B: AgentBehavior> AgentRuntime<B> {
    pub fn new(config: AgentConfig, behavior: B, services: AgentServices) -> (Self, AgentHandle) {
        let runtime = &services.runtime;
        let (handle, mailbox) = AgentHandle::detached(&config.name, runtime.mailbox_capacity);

        if behavior.role() != config.role {
            warn!(agent = %config.name, configured = config.role.as_str(), actual = behavior.role().as_str(), "Role mismatch, using the behavior's role");
        }

        let scheduler = MonitorScheduler::new(
            behavior.role().monitored_kind(),
            Duration::from_secs(config.period_seconds().max(1)),
            Duration::from_secs(config.min_reevaluation_seconds),
        );
        let dedup = DeliveryFilter::new(
            runtime.dedup_capacity,
            Duration::from_secs(runtime.dedup_ttl_seconds),
        );

        let agent = Self {
            behavior,
            ctx: AgentContext::new(config, services),
            scheduler,
            dedup,
            handle: handle.clone(),
            mailbox,
        };
        (agent, handle)
    }

    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    pub fn context(&self) -> &AgentContext<B::Pending> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut AgentContext<B::Pending> {
        &mut self.ctx
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    /// Run on its own task with a ticker and a sweeper. The helpers stop
    /// when the agent stops.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let local = cancel.child_token();
        let sweep_every = Duration::from_millis(self.ctx.runtime().sweep_interval_ms.max(1));
        let ticker = self
            .scheduler
            .spawn_ticker(self.handle.clone(), local.clone());
        let sweeper = spawn_sweeper(self.handle.clone(), sweep_every, local.clone());

        tokio::spawn(async move {
            self.run(local.clone()).await;
            local.cancel();
            let _ = ticker.await;
            let _ = sweeper.await;
        })
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            agent = %self.ctx.address,
            role = self.behavior.role().as_str(),
            period_secs = self.scheduler.period().as_secs(),
            "Agent started"
        );

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.mailbox.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if self.process(event).await == Flow::Halt {
                error!(agent = %self.ctx.address, "Agent halted");
                break;
            }
        }

        info!(agent = %self.ctx.address, "Agent stopped");
    }

    /// Handle one event to completion.
    pub async fn process(&mut self, event: Event) -> Flow {
        let now = Utc::now();
        let result = match event {
            Event::Inbound(envelope) => self.handle_inbound(envelope, now).await,
            Event::Tick => {
                self.handle.tick_started();
                self.handle_tick(now).await
            }
            Event::Sweep => self.handle_sweep(now).await,
        };

        if let Err(e) = result {
            if e.class() == FaultClass::Fatal {
                error!(agent = %self.ctx.address, error = %e, "Fatal error");
                return Flow::Halt;
            }
            warn!(agent = %self.ctx.address, error = %e, "Event failed");
        }

        if let Err(e) = self.ctx.store.check_integrity() {
            error!(agent = %self.ctx.address, error = %e, "State integrity check failed");
            return Flow::Halt;
        }
        Flow::Continue
    }

    async fn handle_inbound(&mut self, envelope: Envelope, now: DateTime<Utc>) -> Result<(), AgentError> {
        let kind = envelope.kind();
        if !self.dedup.check_and_mark(envelope.id).await {
            debug!(agent = %self.ctx.address, id = %envelope.id, %kind, "Duplicate delivery");
            self.ack_duplicate(&envelope).await?;
            return Ok(());
        }

        if kind.is_response() {
            return self.handle_response(envelope).await;
        }

        debug!(agent = %self.ctx.address, from = %envelope.sender, %kind, "Handling");
        match self.dispatch(&envelope, now).await {
            Ok(Some(payload)) => self.ctx.deliver(envelope.reply(payload)).await,
            Ok(None) if kind.requires_ack() => self.ctx.deliver(envelope.ack(AckStatus::Ok)).await,
            Ok(None) => Ok(()),
            Err(e) => self.answer_failure(&envelope, e).await,
        }
    }

    async fn ack_duplicate(&mut self, envelope: &Envelope) -> Result<(), AgentError> {
        self.ctx.bump("duplicates");
        if envelope.kind().requires_ack() {
            self.ctx.deliver(envelope.ack(AckStatus::Duplicate)).await?;
        }
        Ok(())
    }

    async fn answer_failure(&mut self, envelope: &Envelope, e: AgentError) -> Result<(), AgentError> {
        let class = e.class();
        if class == FaultClass::Fatal {
            return Err(e);
        }

        let status = match &e {
            AgentError::AlreadyResolved {
                approval_id,
                current,
            } => {
                info!(agent = %self.ctx.address, approval = %approval_id, current = ?current, "Approval already resolved");
                AckStatus::AlreadyResolved { current: *current }
            }
            _ if class == FaultClass::Transient => {
                error!(agent = %self.ctx.address, kind = %envelope.kind(), error = %e, "Dropping event after retry");
                self.ctx.bump("dropped");
                AckStatus::error(e.to_string())
            }
            _ => {
                warn!(agent = %self.ctx.address, kind = %envelope.kind(), error = %e, "Rejected");
                self.ctx.bump("rejected");
                AckStatus::error(e.to_string())
            }
        };
        self.ctx.deliver(envelope.ack(status)).await
    }

    async fn handle_response(&mut self, envelope: Envelope) -> Result<(), AgentError> {
        let Some(request_id) = envelope.in_reply_to else {
            debug!(agent = %self.ctx.address, kind = %envelope.kind(), from = %envelope.sender, "Ignoring notification");
            return Ok(());
        };

        match self.ctx.correlations.resolve(&request_id) {
            Ok(request) => {
                self.behavior
                    .on_reply(&mut self.ctx, request, &envelope)
                    .await
            }
            Err(e) => {
                warn!(agent = %self.ctx.address, kind = %envelope.kind(), from = %envelope.sender, error = %e, "Late or unknown reply");
                Ok(())
            }
        }
    }

    async fn dispatch(
        &mut self,
        envelope: &Envelope,
        now: DateTime<Utc>,
    ) -> Result<Option<Payload>, AgentError> {
        match &envelope.payload {
            Payload::AddEntity {
                entity_id,
                entity_kind,
                metrics,
            } => {
                let expected = self.behavior.role().monitored_kind();
                if *entity_kind != expected {
                    return Err(AgentError::WrongEntityKind {
                        expected,
                        actual: *entity_kind,
                    });
                }
                self.ctx
                    .store
                    .add(entity_id.clone(), *entity_kind, metrics.clone(), now)?;
                info!(agent = %self.ctx.address, entity = %entity_id, "Monitoring entity");
                self.evaluate_entity(entity_id, now).await?;
                Ok(None)
            }
            Payload::RemoveEntity { entity_id } => {
                self.ctx.store.remove(entity_id)?;
                self.behavior.on_removed(entity_id);
                info!(agent = %self.ctx.address, entity = %entity_id, "Stopped monitoring entity");
                Ok(None)
            }
            Payload::UpdateMetrics { entity_id, metrics } => {
                self.ctx.store.update_metrics(entity_id, metrics.clone())?;
                Ok(None)
            }
            Payload::GetStatus => Ok(Some(Payload::Status(
                self.ctx.status(self.behavior.role()),
            ))),
            Payload::GetReport { entity_id } => {
                Ok(Some(Payload::Report(self.ctx.report(entity_id)?)))
            }
            Payload::ApprovalDecision {
                approval_id,
                verdict,
                approver,
            } => {
                // Settle lapsed approvals first so a late verdict finds them expired.
                self.expire_approvals(now).await?;
                let approval = self
                    .ctx
                    .approvals
                    .decide(approval_id, *verdict, approver.clone(), now)?;
                info!(agent = %self.ctx.address, approval = %approval.id, status = ?approval.status, "Approval resolved");
                self.ctx.settle_approval(&approval).await?;
                self.behavior.on_approval(&mut self.ctx, &approval).await?;
                Ok(None)
            }
            Payload::ExecutionResult {
                entity_id,
                success,
                detail,
            } => {
                if !self.ctx.store.contains(entity_id) {
                    return Err(AgentError::UnknownEntity(entity_id.clone()));
                }
                self.ctx.record(
                    entity_id,
                    JournalEventKind::Execution,
                    &serde_json::json!({ "success": success, "detail": detail }),
                );
                self.ctx.bump(if *success {
                    "executions_succeeded"
                } else {
                    "executions_failed"
                });
                self.behavior
                    .on_execution(&mut self.ctx, entity_id, *success)
                    .await?;
                Ok(None)
            }
            _ => match self.behavior.on_command(&mut self.ctx, envelope).await? {
                CommandOutcome::Done => Ok(None),
                CommandOutcome::Reply(payload) => Ok(Some(payload)),
                CommandOutcome::Evaluate(entity_id) => {
                    self.evaluate_entity(&entity_id, now).await?;
                    Ok(None)
                }
            },
        }
    }

    /// Evaluate a snapshot of the entity and commit the result.
    async fn evaluate_entity(&mut self, entity_id: &EntityId, now: DateTime<Utc>) -> Result<bool, AgentError> {
        let snapshot = self
            .ctx
            .store
            .get(entity_id)
            .cloned()
            .ok_or_else(|| AgentError::UnknownEntity(entity_id.clone()))?;

        let evaluation = self.behavior.evaluate(&snapshot, now).await;
        self.ctx
            .commit(&snapshot.id, snapshot.generation, evaluation, now)
            .await
    }

    async fn handle_tick(&mut self, now: DateTime<Utc>) -> Result<(), AgentError> {
        let due: Vec<EntityId> = self
            .scheduler
            .due(&self.ctx.store, now)
            .cloned()
            .collect();
        debug!(agent = %self.ctx.address, due = due.len(), "Tick");

        for entity_id in due {
            if let Err(e) = self.evaluate_entity(&entity_id, now).await {
                if e.class() == FaultClass::Fatal {
                    return Err(e);
                }
                warn!(agent = %self.ctx.address, entity = %entity_id, error = %e, "Evaluation failed");
            }
        }
        Ok(())
    }

    async fn handle_sweep(&mut self, now: DateTime<Utc>) -> Result<(), AgentError> {
        for request in self.ctx.correlations.expire_due(now) {
            warn!(agent = %self.ctx.address, request = %request.request_id, context = ?request.context, "Request timed out");
            self.ctx.bump("requests_timed_out");
            if let Err(e) = self.behavior.on_timeout(&mut self.ctx, request).await {
                if e.class() == FaultClass::Fatal {
                    return Err(e);
                }
                warn!(agent = %self.ctx.address, error = %e, "Timeout handling failed");
            }
        }

        self.expire_approvals(now).await
    }

    async fn expire_approvals(&mut self, now: DateTime<Utc>) -> Result<(), AgentError> {
        for approval in self.ctx.approvals.expire_due(now) {
            info!(agent = %self.ctx.address, approval = %approval.id, entity = %approval.entity_id, "Approval expired");
            self.ctx.bump("approvals_expired");
            let settled = match self.ctx.settle_approval(&approval).await {
                Ok(()) => self.behavior.on_approval(&mut self.ctx, &approval).await,
                Err(e) => Err(e),
            };
            if let Err(e) = settled {
                if e.class() == FaultClass::Fatal {
                    return Err(e);
                }
                warn!(agent = %self.ctx.address, approval = %approval.id, error = %e, "Expiry handling failed");
            }
        }
        Ok(())
    }
}
