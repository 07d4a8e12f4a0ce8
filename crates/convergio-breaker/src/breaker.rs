use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use convergio_ledger::{BudgetScope, CostLedger};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::anomaly::AnomalyTracker;
use crate::state::{AdmitDecision, AdmitRequest, CircuitState, OverrideAuditEntry, Scope, ScopeState};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub consecutive_error_threshold: u32,
    pub half_open_success_threshold: u32,
    pub retry_after: chrono::Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            consecutive_error_threshold: 3,
            half_open_success_threshold: 1,
            retry_after: chrono::Duration::seconds(60),
        }
    }
}

/// Gates admission and outbound provider calls across three independent
/// scopes (global, per-provider, per-agent). Consults the cost ledger for
/// budget-driven opens, tracks anomaly signals, and honors emergency
/// overrides with a TTL and an audit trail.
pub struct CircuitBreaker {
    ledger: Arc<CostLedger>,
    config: BreakerConfig,
    scopes: RwLock<HashMap<Scope, ScopeState>>,
    anomaly: RwLock<AnomalyTracker>,
    audit_log: RwLock<Vec<OverrideAuditEntry>>,
}

impl CircuitBreaker {
    pub fn new(ledger: Arc<CostLedger>, config: BreakerConfig) -> Self {
        Self {
            ledger,
            config,
            scopes: RwLock::new(HashMap::new()),
            anomaly: RwLock::new(AnomalyTracker::default()),
            audit_log: RwLock::new(Vec::new()),
        }
    }

    /// Decide whether `request` may proceed. Checks, in order: active
    /// override, ledger utilization, anomaly signals, provider health
    /// (consecutive errors), then admits or allows exactly one HALF_OPEN
    /// probe per scope.
    pub async fn admit(&self, request: &AdmitRequest) -> AdmitDecision {
        let relevant = [
            Scope::Global,
            Scope::Provider(request.provider.clone()),
            Scope::Agent(request.agent_id.clone()),
        ];

        if self.has_active_override(&relevant).await {
            return AdmitDecision::allow();
        }

        if let Some(decision) = self.check_ledger_utilization(&request.provider).await {
            return decision;
        }

        let now = Utc::now();
        let rate_spike = {
            let mut anomaly = self.anomaly.write().await;
            anomaly.record_and_check_rate_spike(&request.user_id, now)
        };
        if rate_spike {
            self.open(Scope::Global, "anomaly").await;
            return AdmitDecision::deny(Scope::Global, "anomaly");
        }

        let cost_spike = {
            let mut anomaly = self.anomaly.write().await;
            anomaly.record_and_check_cost_spike(&request.provider, request.estimated_cost)
        };
        if cost_spike {
            self.open(Scope::Provider(request.provider.clone()), "anomaly").await;
            return AdmitDecision::deny(Scope::Provider(request.provider.clone()), "anomaly");
        }

        for scope in &relevant {
            self.maybe_expire_open(scope).await;
        }

        let mut guard = self.scopes.write().await;
        for scope in &relevant {
            let entry = guard.entry(scope.clone()).or_default();
            match entry.state {
                CircuitState::Open => {
                    return AdmitDecision::deny(
                        scope.clone(),
                        entry.reason.clone().unwrap_or_else(|| "open".to_string()),
                    );
                }
                CircuitState::HalfOpen => {
                    if entry.probe_in_flight {
                        return AdmitDecision::deny(scope.clone(), "probe in flight");
                    }
                }
                CircuitState::Closed => {}
            }
        }

        // Second pass: commit the probe flag only after confirming every
        // scope admits, so a deny on scope 2 doesn't leave scope 1 marked
        // probing.
        let mut is_probe = false;
        for scope in &relevant {
            let entry = guard.entry(scope.clone()).or_default();
            if entry.state == CircuitState::HalfOpen {
                entry.probe_in_flight = true;
                is_probe = true;
            }
        }

        if is_probe {
            AdmitDecision::allow_probe()
        } else {
            AdmitDecision::allow()
        }
    }

    /// Report the outcome of a call admitted by `admit`. Drives the
    /// CLOSED/OPEN/HALF_OPEN transitions for every relevant scope. Only the
    /// provider scope accumulates consecutive-error counts (provider health
    /// per spec §4.5); global/agent scopes only open via ledger utilization
    /// or anomaly signals, but still honor HALF_OPEN probe results so an
    /// anomaly-driven open can recover.
    pub async fn report_outcome(&self, provider: &str, agent_id: &str, success: bool) {
        let relevant = [
            Scope::Global,
            Scope::Provider(provider.to_string()),
            Scope::Agent(agent_id.to_string()),
        ];
        let mut guard = self.scopes.write().await;
        for scope in &relevant {
            let entry = guard.entry(scope.clone()).or_default();
            entry.probe_in_flight = false;
            let tracks_errors = matches!(scope, Scope::Provider(_));

            if success {
                match entry.state {
                    CircuitState::HalfOpen => {
                        entry.half_open_successes += 1;
                        if entry.half_open_successes >= self.config.half_open_success_threshold {
                            info!(%scope, "breaker -> closed (probe succeeded)");
                            *entry = ScopeState::default();
                        }
                    }
                    CircuitState::Closed if tracks_errors => {
                        entry.consecutive_errors = 0;
                    }
                    CircuitState::Closed | CircuitState::Open => {}
                }
            } else {
                match entry.state {
                    CircuitState::Closed if tracks_errors => {
                        entry.consecutive_errors += 1;
                        if entry.consecutive_errors >= self.config.consecutive_error_threshold {
                            warn!(%scope, "breaker -> open (consecutive provider errors)");
                            entry.state = CircuitState::Open;
                            entry.opened_at = Some(Utc::now());
                            entry.reason = Some("provider_errors".to_string());
                        }
                    }
                    CircuitState::HalfOpen => {
                        warn!(%scope, "breaker -> open (probe failed)");
                        entry.state = CircuitState::Open;
                        entry.opened_at = Some(Utc::now());
                        entry.reason = Some("probe_failed".to_string());
                        entry.half_open_successes = 0;
                    }
                    CircuitState::Closed | CircuitState::Open => {}
                }
            }
        }
    }

    /// Force a scope CLOSED for `ttl`, bypassing all other checks while
    /// active. Recorded in the audit trail with the approving identity.
    pub async fn emergency_override(&self, scope: Scope, approver_id: impl Into<String>, ttl: chrono::Duration) {
        let approver_id = approver_id.into();
        let now = Utc::now();
        let expires_at = now + ttl;
        {
            let mut guard = self.scopes.write().await;
            let entry = guard.entry(scope.clone()).or_default();
            entry.override_until = Some(expires_at);
            entry.override_approver = Some(approver_id.clone());
        }
        self.audit_log.write().await.push(OverrideAuditEntry {
            scope: scope.to_string(),
            approver_id,
            granted_at: now,
            expires_at,
        });
    }

    pub async fn audit_trail(&self) -> Vec<OverrideAuditEntry> {
        self.audit_log.read().await.clone()
    }

    pub async fn state(&self, scope: &Scope) -> CircuitState {
        self.maybe_expire_open(scope).await;
        self.scopes
            .read()
            .await
            .get(scope)
            .map(|s| s.state)
            .unwrap_or(CircuitState::Closed)
    }

    async fn has_active_override(&self, scopes: &[Scope]) -> bool {
        let now = Utc::now();
        let guard = self.scopes.read().await;
        scopes.iter().any(|scope| {
            guard
                .get(scope)
                .and_then(|s| s.override_until)
                .is_some_and(|until| until > now)
        })
    }

    /// Consults the ledger's daily/monthly/provider utilization and opens
    /// the corresponding scope when the spec's thresholds are crossed.
    async fn check_ledger_utilization(&self, provider: &str) -> Option<AdmitDecision> {
        if let Ok(pct) = self.ledger.utilization(BudgetScope::DailyGlobal).await {
            if pct >= 90.0 {
                self.open(Scope::Global, "budget_exceeded").await;
                return Some(AdmitDecision::deny(Scope::Global, "budget_exceeded"));
            }
        }
        if let Ok(pct) = self.ledger.utilization(BudgetScope::MonthlyGlobal).await {
            if pct >= 90.0 {
                self.open(Scope::Global, "budget_exceeded").await;
                return Some(AdmitDecision::deny(Scope::Global, "budget_exceeded"));
            }
        }
        if let Ok(pct) = self
            .ledger
            .utilization(BudgetScope::Provider(provider.to_string()))
            .await
        {
            if pct >= 95.0 {
                self.open(Scope::Provider(provider.to_string()), "budget_exceeded").await;
                return Some(AdmitDecision::deny(
                    Scope::Provider(provider.to_string()),
                    "budget_exceeded",
                ));
            }
        }
        None
    }

    async fn open(&self, scope: Scope, reason: &str) {
        let mut guard = self.scopes.write().await;
        let entry = guard.entry(scope.clone()).or_default();
        if entry.state != CircuitState::Open {
            warn!(%scope, reason, "breaker -> open");
        }
        entry.state = CircuitState::Open;
        entry.opened_at = Some(Utc::now());
        entry.reason = Some(reason.to_string());
    }

    /// OPEN -> HALF_OPEN once `retry_after` has elapsed since the scope
    /// opened, unless an override is active (overrides are checked
    /// separately by callers before this lazily-applied transition runs).
    async fn maybe_expire_open(&self, scope: &Scope) {
        let mut guard = self.scopes.write().await;
        if let Some(entry) = guard.get_mut(scope) {
            if entry.state == CircuitState::Open {
                if let Some(opened_at) = entry.opened_at {
                    if Utc::now() - opened_at >= self.config.retry_after {
                        info!(%scope, "breaker -> half_open (retry window elapsed)");
                        entry.state = CircuitState::HalfOpen;
                        entry.half_open_successes = 0;
                    }
                }
            }
        }
    }
}
