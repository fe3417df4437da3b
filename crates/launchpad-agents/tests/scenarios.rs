//! End-to-end scenarios over the in-process transport.
//!
//! Each test spawns real agent runtimes, talks to them through the transport
//! the way an external client would, and reads answers from the outbox.

use std::sync::Arc;
use std::time::Duration;

use launchpad_agents::engine::risk::assess_local;
use launchpad_agents::engine::DEGRADED_RISK_REPLY_FLAG;
use launchpad_agents::runtime::AgentRuntime;
use launchpad_agents::test_support::{
    launch_proposal, risky_token, safe_token, services_with_alerts, strategy_answer,
    RecordingAlerts, ScriptedOracle,
};
use launchpad_agents::{
    AgentHandle, AgentServices, InProcessTransport, LaunchCoordinator, RiskAnalyzer, Transport,
};
use launchpad_models::{
    AckStatus, AgentAddress, AgentConfig, AgentRole, ApprovalStatus, ApprovalVerdict,
    DecisionDetail, EntityKind, EntityReport, Envelope, ExecutionAction, Metrics, Payload,
    PendingApproval, RiskConfig, RiskLevel,
};
use rust_decimal_macros::dec;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    transport: Arc<InProcessTransport>,
    outbox: mpsc::Receiver<Envelope>,
    /// Outbox envelopes received but not yet claimed by an `expect`.
    unclaimed: Vec<Envelope>,
    alerts: Arc<RecordingAlerts>,
    cancel: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        let (transport, outbox) = InProcessTransport::with_outbox(64);
        Self {
            transport,
            outbox,
            unclaimed: Vec::new(),
            alerts: Arc::new(RecordingAlerts::default()),
            cancel: CancellationToken::new(),
        }
    }

    fn services(&self) -> AgentServices {
        let mut services = services_with_alerts(self.transport.clone(), self.alerts.clone());
        services.runtime.sweep_interval_ms = 20;
        services
    }

    async fn start_risk_analyzer(&self, oracle: ScriptedOracle, subscribers: &[&str]) {
        let mut config = AgentConfig::new("risk_analyzer", AgentRole::RiskAnalyzer);
        config.alert_subscribers = subscribers.iter().map(|s| s.to_string()).collect();
        let behavior = RiskAnalyzer::new(Arc::new(oracle), None, RiskConfig::default())
            .with_subscribers(&config.alert_subscribers);
        let (runtime, handle) = AgentRuntime::new(config, behavior, self.services());
        self.transport.register(handle).await;
        runtime.spawn(self.cancel.clone());
    }

    async fn start_coordinator(&self, oracle: ScriptedOracle, risk_agent: Option<&str>, timeout: u64) {
        let mut config = AgentConfig::new("launch_coordinator", AgentRole::LaunchCoordinator);
        config.risk_agent = risk_agent.map(str::to_string);
        config.execution_agent = Some("executor".to_string());
        config.request_timeout_seconds = timeout;
        let behavior = LaunchCoordinator::new(
            Arc::new(oracle),
            None,
            RiskConfig::default(),
            config.risk_agent.as_deref().map(AgentAddress::from),
            Some(AgentAddress::from("executor")),
        );
        let (runtime, handle) = AgentRuntime::new(config, behavior, self.services());
        self.transport.register(handle).await;
        runtime.spawn(self.cancel.clone());
    }

    /// Register an address whose mailbox the test reads by hand.
    async fn puppet(&self, address: &str) -> mpsc::Receiver<launchpad_agents::Event> {
        let (handle, mailbox) = AgentHandle::detached(address, 16);
        self.transport.register(handle).await;
        mailbox
    }

    async fn send(&self, envelope: Envelope) {
        self.transport.send(envelope).await.unwrap();
    }

    /// Wait for the first outbox envelope matching `pred`.
    async fn expect(&mut self, pred: impl Fn(&Envelope) -> bool) -> Envelope {
        if let Some(pos) = self.unclaimed.iter().position(&pred) {
            return self.unclaimed.remove(pos);
        }
        loop {
            let envelope = tokio::time::timeout(WAIT, self.outbox.recv())
                .await
                .expect("timed out waiting for outbox")
                .expect("outbox closed");
            if pred(&envelope) {
                return envelope;
            }
            self.unclaimed.push(envelope);
        }
    }

    async fn expect_reply(&mut self, request: &Envelope) -> Payload {
        let id = request.id;
        self.expect(move |e| e.in_reply_to == Some(id)).await.payload
    }

    async fn expect_notice(&mut self, to: &str) -> PendingApproval {
        let envelope = self
            .expect(|e| {
                e.receiver.as_str() == to && matches!(e.payload, Payload::ApprovalNotice { .. })
            })
            .await;
        match envelope.payload {
            Payload::ApprovalNotice { approval } => approval,
            other => panic!("unexpected payload {other:?}"),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn next_inbound(mailbox: &mut mpsc::Receiver<launchpad_agents::Event>) -> Envelope {
    match tokio::time::timeout(WAIT, mailbox.recv()).await {
        Ok(Some(launchpad_agents::Event::Inbound(envelope))) => envelope,
        other => panic!("expected an inbound envelope, got {other:?}"),
    }
}

fn from(sender: &str, receiver: &str, payload: Payload) -> Envelope {
    Envelope::new(sender.into(), receiver.into(), payload)
}

fn add_token(id: &str, metrics: Metrics) -> Envelope {
    from(
        "user",
        "risk_analyzer",
        Payload::AddEntity {
            entity_id: id.into(),
            entity_kind: EntityKind::Token,
            metrics,
        },
    )
}

fn propose(launch_id: &str) -> Envelope {
    from(
        "founder",
        "launch_coordinator",
        Payload::ProposeLaunch {
            launch_id: launch_id.into(),
            metrics: launch_proposal(),
        },
    )
}

fn strategy_oracle() -> ScriptedOracle {
    ScriptedOracle::new().answer("predict-optimal-launch-config", strategy_answer())
}

#[tokio::test]
async fn high_risk_token_alerts_sink_and_subscribers() {
    let mut harness = Harness::new();
    harness
        .start_risk_analyzer(ScriptedOracle::new(), &["ops"])
        .await;

    let add = add_token("TokenA", risky_token());
    harness.send(add.clone()).await;

    assert_eq!(
        harness.expect_reply(&add).await,
        Payload::Ack {
            status: AckStatus::Ok
        }
    );
    let notice = harness.expect(|e| e.receiver.as_str() == "ops").await;
    match notice.payload {
        Payload::EvaluationResult { entity_id, result } => {
            assert_eq!(entity_id.as_str(), "TokenA");
            assert_eq!(result.level, RiskLevel::High);
            assert_eq!(result.score, dec!(0));
        }
        other => panic!("unexpected payload {other:?}"),
    }

    assert!(harness.alerts.wait_for(1).await);
    let alerts = harness.alerts.alerts();
    assert_eq!(alerts[0].0.as_str(), "risk_analyzer");
    assert_eq!(alerts[0].1.as_str(), "TokenA");
}

#[tokio::test]
async fn duplicate_delivery_is_acknowledged_once_and_not_reapplied() {
    let mut harness = Harness::new();
    harness
        .start_risk_analyzer(ScriptedOracle::new(), &[])
        .await;

    let add = add_token("TokenA", safe_token());
    harness.send(add.clone()).await;
    harness.send(add.clone()).await;

    assert_eq!(
        harness.expect_reply(&add).await,
        Payload::Ack {
            status: AckStatus::Ok
        }
    );
    assert_eq!(
        harness.expect_reply(&add).await,
        Payload::Ack {
            status: AckStatus::Duplicate
        }
    );

    let status = from("user", "risk_analyzer", Payload::GetStatus);
    harness.send(status.clone()).await;
    match harness.expect_reply(&status).await {
        Payload::Status(report) => {
            assert_eq!(report.monitored, 1);
            assert_eq!(report.counters.get("evaluations"), Some(&1));
            assert_eq!(report.counters.get("duplicates"), Some(&1));
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn report_carries_latest_decision_and_history() {
    let mut harness = Harness::new();
    harness
        .start_risk_analyzer(ScriptedOracle::new(), &[])
        .await;

    let add = add_token("TokenA", safe_token());
    harness.send(add.clone()).await;
    harness.expect_reply(&add).await;

    let report = from(
        "user",
        "risk_analyzer",
        Payload::GetReport {
            entity_id: "TokenA".into(),
        },
    );
    harness.send(report.clone()).await;
    match harness.expect_reply(&report).await {
        Payload::Report(report) => {
            assert_eq!(report.entity_kind, EntityKind::Token);
            assert_eq!(report.latest.unwrap().score, dec!(7.5));
            assert_eq!(report.history.len(), 1);
            assert!(report.last_evaluated_at.is_some());
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn approved_launch_executes_and_second_verdict_is_refused() {
    let mut harness = Harness::new();
    harness
        .start_coordinator(strategy_oracle(), None, 30)
        .await;

    let proposal = propose("launch-1");
    harness.send(proposal.clone()).await;
    let awaiting = harness.expect_notice("founder").await;
    assert_eq!(awaiting.status, ApprovalStatus::Awaiting);
    assert_eq!(awaiting.entity_id.as_str(), "launch-1");
    assert_eq!(
        harness.expect_reply(&proposal).await,
        Payload::Ack {
            status: AckStatus::Ok
        }
    );

    let approve = from(
        "ops",
        "launch_coordinator",
        Payload::ApprovalDecision {
            approval_id: awaiting.id,
            verdict: ApprovalVerdict::Approve,
            approver: Some("alice".to_string()),
        },
    );
    harness.send(approve.clone()).await;

    let approved = harness.expect_notice("founder").await;
    assert_eq!(approved.status, ApprovalStatus::Approved);
    assert_eq!(approved.resolved_by.as_deref(), Some("alice"));

    let execute = harness.expect(|e| e.receiver.as_str() == "executor").await;
    match execute.payload {
        Payload::ExecuteStrategy {
            entity_id,
            approval_id,
            action: ExecutionAction::Launch { strategy },
        } => {
            assert_eq!(entity_id.as_str(), "launch-1");
            assert_eq!(approval_id, Some(awaiting.id));
            assert_eq!(strategy.graduation_threshold, dec!(80000));
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(
        harness.expect_reply(&approve).await,
        Payload::Ack {
            status: AckStatus::Ok
        }
    );

    let reject = from(
        "ops",
        "launch_coordinator",
        Payload::ApprovalDecision {
            approval_id: awaiting.id,
            verdict: ApprovalVerdict::Reject,
            approver: None,
        },
    );
    harness.send(reject.clone()).await;
    assert_eq!(
        harness.expect_reply(&reject).await,
        Payload::Ack {
            status: AckStatus::AlreadyResolved {
                current: ApprovalStatus::Approved
            }
        }
    );
}

#[tokio::test]
async fn coordinator_waits_for_the_risk_analyzer_verdict() {
    let mut harness = Harness::new();
    harness
        .start_risk_analyzer(
            ScriptedOracle::new()
                .answer("analyze-risk-factors", json!({"matched_patterns": ["honeypot"]})),
            &[],
        )
        .await;
    harness
        .start_coordinator(strategy_oracle(), Some("risk_analyzer"), 30)
        .await;

    harness.send(propose("launch-1")).await;
    let approval = harness.expect_notice("founder").await;

    let decision = approval.proposed;
    assert_eq!(decision.score, dec!(6.5));
    assert_eq!(decision.level, RiskLevel::Medium);
    assert!(decision
        .flags
        .contains(&"Fraud pattern matched: honeypot".to_string()));
    match decision.detail {
        DecisionDetail::Launch(detail) => assert!(detail.remote_risk),
        other => panic!("unexpected detail {other:?}"),
    }

    let report = from(
        "user",
        "risk_analyzer",
        Payload::GetReport {
            entity_id: "MOON".into(),
        },
    );
    harness.send(report.clone()).await;
    assert!(matches!(
        harness.expect_reply(&report).await,
        Payload::Report(EntityReport { latest: Some(_), .. })
    ));
}

#[tokio::test]
async fn silent_risk_analyzer_falls_back_to_local_rules() {
    let mut harness = Harness::new();
    let _silent = harness.puppet("silent_risk").await;
    harness
        .start_coordinator(strategy_oracle(), Some("silent_risk"), 0)
        .await;

    harness.send(propose("launch-1")).await;
    let approval = harness.expect_notice("founder").await;

    let decision = approval.proposed;
    assert!(decision.degraded);
    assert_eq!(decision.score, dec!(7.5));
    assert!(decision
        .flags
        .contains(&DEGRADED_RISK_REPLY_FLAG.to_string()));
    match decision.detail {
        DecisionDetail::Launch(detail) => assert!(!detail.remote_risk),
        other => panic!("unexpected detail {other:?}"),
    }
}

#[tokio::test]
async fn reply_for_a_replaced_launch_is_discarded() {
    let mut harness = Harness::new();
    let mut risk = harness.puppet("puppet_risk").await;
    harness
        .start_coordinator(strategy_oracle(), Some("puppet_risk"), 30)
        .await;

    harness.send(propose("launch-1")).await;
    let first_registration = next_inbound(&mut risk).await;
    let stale_request = next_inbound(&mut risk).await;
    assert!(matches!(stale_request.payload, Payload::GetReport { .. }));

    let remove = from(
        "founder",
        "launch_coordinator",
        Payload::RemoveEntity {
            entity_id: "launch-1".into(),
        },
    );
    harness.send(remove.clone()).await;
    harness.expect_reply(&remove).await;

    harness.send(propose("launch-1")).await;
    let second_registration = next_inbound(&mut risk).await;
    let fresh_request = next_inbound(&mut risk).await;
    for registration in [first_registration, second_registration] {
        assert!(matches!(registration.payload, Payload::AddEntity { .. }));
        harness.send(registration.ack(AckStatus::Ok)).await;
    }

    let verdict = assess_local(&safe_token(), &RiskConfig::default());
    let report = |request: &Envelope| {
        request.reply(Payload::Report(EntityReport {
            entity_id: "MOON".into(),
            entity_kind: EntityKind::Token,
            metrics: safe_token(),
            last_evaluated_at: None,
            latest: Some(verdict.clone()),
            history: Vec::new(),
        }))
    };
    harness.send(report(&stale_request)).await;
    harness.send(report(&fresh_request)).await;

    let approval = harness.expect_notice("founder").await;
    assert_eq!(approval.entity_id.as_str(), "launch-1");

    let status = from("user", "launch_coordinator", Payload::GetStatus);
    harness.send(status.clone()).await;
    match harness.expect_reply(&status).await {
        Payload::Status(report) => {
            assert_eq!(report.counters.get("evaluations"), Some(&1));
            assert_eq!(report.counters.get("approvals_requested"), Some(&1));
            assert_eq!(report.pending_requests, 0);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}
