//! The abuse scoring engine.
//!
//! [`AbuseEngine::detect`] scores an attempt against the corpus and then
//! enforces the decision before returning: blocking the IP, alerting and
//! auditing all happen inline, so a rejection the caller sees is already in
//! force.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use warden_audit::{ActionKind, AuditSink, NewAuditRecord};
use warden_core::{Actor, ActorRole, Alert, AlertDispatcher, Severity};
use warden_reputation::{BlockEntry, BlockTier, IpReputationStore};

use crate::error::{AbuseError, AbuseResult};
use crate::fingerprint::{EventType, Fingerprint};
use crate::policy::{Decision, ScoreResult, ScoringPolicy, SignalMatches};
use crate::store::FingerprintStore;

/// Result of [`AbuseEngine::detect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Whether the caller may proceed.
    pub allowed: bool,
    /// Match counts, score, severity and decision.
    pub result: ScoreResult,
    /// The block imposed, when the decision blocks and the block succeeded.
    pub block: Option<BlockEntry>,
}

impl Detection {
    /// Weighted score.
    #[must_use]
    pub fn score(&self) -> u32 {
        self.result.score
    }

    /// Severity tier.
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.result.severity
    }

    /// Decision taken.
    #[must_use]
    pub fn decision(&self) -> Decision {
        self.result.decision
    }
}

/// Scores attempts and enforces the outcome.
pub struct AbuseEngine {
    store: Arc<dyn FingerprintStore>,
    reputation: IpReputationStore,
    audit: Arc<dyn AuditSink>,
    alerts: Arc<dyn AlertDispatcher>,
    policy: ScoringPolicy,
}

impl fmt::Debug for AbuseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbuseEngine")
            .field("reputation", &self.reputation)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn entity_ref(fp: &Fingerprint) -> String {
    format!("ip_hash:{}", fp.ip_hash.to_hex())
}

impl AbuseEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn FingerprintStore>,
        reputation: IpReputationStore,
        audit: Arc<dyn AuditSink>,
        alerts: Arc<dyn AlertDispatcher>,
        policy: ScoringPolicy,
    ) -> Self {
        Self {
            store,
            reputation,
            audit,
            alerts,
            policy,
        }
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Score `fp` against prior attempts and enforce the decision.
    ///
    /// `Allow` and `SoftFlag` return `Ok`. `TempBlock` and `Escalate` block
    /// the IP for the policy's TTL, alert, audit, and return
    /// [`AbuseError::Rejected`]. A failed block is logged; the attempt is
    /// rejected regardless.
    ///
    /// # Errors
    ///
    /// Returns [`AbuseError::Rejected`] for a rejection, or a storage error if
    /// the corpus cannot be read.
    pub async fn detect(&self, fp: &Fingerprint) -> AbuseResult<Detection> {
        let since = self.window_start();
        let mut matches = SignalMatches::default();
        for record in self.store.find_matches(fp, since).await? {
            matches.add(record.hits(fp));
        }
        let result = self.policy.score(matches);

        match result.decision {
            Decision::Allow => {
                debug!(
                    ip_hash = %fp.ip_hash.short(),
                    score = result.score,
                    "attempt allowed"
                );
                Ok(Detection {
                    allowed: true,
                    result,
                    block: None,
                })
            },
            Decision::SoftFlag => {
                info!(
                    ip_hash = %fp.ip_hash.short(),
                    score = result.score,
                    event_type = %fp.event_type,
                    "attempt soft-flagged"
                );
                let detection = Detection {
                    allowed: true,
                    result,
                    block: None,
                };
                self.audit_detection(fp, &detection).await;
                Ok(detection)
            },
            Decision::TempBlock | Decision::Escalate => {
                let block = self.enforce_block(fp, &result).await;
                let detection = Detection {
                    allowed: false,
                    result,
                    block,
                };
                self.alert(fp, &detection).await;
                self.audit_detection(fp, &detection).await;
                Err(AbuseError::Rejected(Box::new(detection)))
            },
        }
    }

    /// Add an allowed attempt to the corpus and audit it.
    ///
    /// A `SoftFlag` detection is audited but kept out of the corpus; the
    /// return value says whether the corpus grew.
    ///
    /// # Errors
    ///
    /// Returns [`AbuseError::Validation`] for an empty user id or a detection
    /// that was not allowed, or a storage error if the insert fails.
    pub async fn log_usage(
        &self,
        user_id: &str,
        fp: &Fingerprint,
        detection: &Detection,
    ) -> AbuseResult<bool> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(AbuseError::Validation("user id is required".into()));
        }
        if !detection.allowed || !detection.result.decision.is_allowed() {
            return Err(AbuseError::Validation(format!(
                "cannot log usage for a {} decision",
                detection.result.decision
            )));
        }

        let added = if detection.result.decision == Decision::Allow {
            self.store.insert(fp.to_record(user_id, Utc::now())).await?;
            true
        } else {
            false
        };

        let action = match fp.event_type {
            EventType::TrialUsage => ActionKind::Registration,
            EventType::InviteAttempt => ActionKind::Invite,
        };
        self.audit
            .record(
                NewAuditRecord::new(Actor::new(user_id, ActorRole::Member), action)
                    .with_entity(entity_ref(fp))
                    .with_detail(json!({
                        "event_type": fp.event_type,
                        "institution": fp.institution,
                        "score": detection.result.score,
                        "corpus": added,
                    })),
            )
            .await;
        debug!(%user_id, event_type = %fp.event_type, added, "usage logged");
        Ok(added)
    }

    /// Delete corpus records created before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the corpus cannot be purged.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> AbuseResult<u64> {
        let removed = self.store.purge_older_than(cutoff).await?;
        info!(removed, cutoff = %cutoff.to_rfc3339(), "fingerprint records purged");
        Ok(removed)
    }

    fn window_start(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.policy.lookback)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    async fn enforce_block(&self, fp: &Fingerprint, result: &ScoreResult) -> Option<BlockEntry> {
        let reason = format!(
            "abuse score {} ({}, {})",
            result.score, result.severity, fp.event_type
        );
        match self
            .reputation
            .block_temporary(fp.ip(), &reason, Some(self.policy.temp_block_ttl))
            .await
        {
            Ok(entry) => Some(entry),
            Err(e) => {
                error!(
                    ip_hash = %fp.ip_hash.short(),
                    error = %e,
                    "failed to block ip; rejecting attempt anyway"
                );
                None
            },
        }
    }

    async fn alert(&self, fp: &Fingerprint, detection: &Detection) {
        let (severity, title) = match detection.result.decision {
            Decision::Escalate => (Severity::Critical, "Abuse escalation: manual review required"),
            _ => (Severity::High, "Abusive attempt blocked"),
        };
        warn!(
            ip_hash = %fp.ip_hash.short(),
            score = detection.result.score,
            severity = %detection.result.severity,
            decision = %detection.result.decision,
            "attempt rejected"
        );
        let mut alert = Alert::new(
            severity,
            title,
            format!(
                "{} attempt scored {} ({})",
                fp.event_type, detection.result.score, detection.result.severity
            ),
        )
        .with_meta("ip_hash", fp.ip_hash.to_hex())
        .with_meta("score", detection.result.score)
        .with_meta("decision", detection.result.decision)
        .with_meta("blocked", detection.block.is_some());
        if let Some(BlockEntry {
            tier: BlockTier::Temporary { expires_at },
            ..
        }) = &detection.block
        {
            alert = alert.with_meta("expires_at", expires_at.to_rfc3339());
        }
        self.alerts.notify(alert).await;
    }

    async fn audit_detection(&self, fp: &Fingerprint, detection: &Detection) {
        let expires_at = match &detection.block {
            Some(BlockEntry {
                tier: BlockTier::Temporary { expires_at },
                ..
            }) => Some(expires_at.to_rfc3339()),
            _ => None,
        };
        self.audit
            .record(
                NewAuditRecord::new(Actor::system(), ActionKind::AbuseDetection)
                    .with_entity(entity_ref(fp))
                    .with_detail(json!({
                        "event_type": fp.event_type,
                        "score": detection.result.score,
                        "severity": detection.result.severity,
                        "decision": detection.result.decision,
                        "matches": detection.result.matches,
                        "blocked": detection.block.is_some(),
                        "expires_at": expires_at,
                    })),
            )
            .await;
    }
}
