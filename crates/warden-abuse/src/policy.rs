//! Scoring policy: signal weights, severity thresholds and decisions.
//!
//! The default numbers are placeholders pending product and security
//! review. Every one of them is overridable from configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_core::Severity;

use crate::fingerprint::SignalHits;

/// Points each matching signal contributes per matching record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalWeights {
    /// Device id match. Rare and strong.
    pub device: u32,
    /// IP match.
    pub ip: u32,
    /// User-Agent match.
    pub user_agent: u32,
    /// Email domain match.
    pub email_domain: u32,
    /// Shared institution. Common and weak.
    pub institution: u32,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            device: 40,
            ip: 25,
            user_agent: 10,
            email_domain: 10,
            institution: 8,
        }
    }
}

/// Minimum score for each severity above `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityThresholds {
    /// Score at which an attempt becomes `Medium`.
    pub medium: u32,
    /// Score at which an attempt becomes `High`.
    pub high: u32,
    /// Score at which an attempt becomes `Critical`.
    pub critical: u32,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            medium: 30,
            high: 60,
            critical: 100,
        }
    }
}

impl SeverityThresholds {
    /// Severity tier of `score`.
    #[must_use]
    pub fn classify(&self, score: u32) -> Severity {
        if score >= self.critical {
            Severity::Critical
        } else if score >= self.high {
            Severity::High
        } else if score >= self.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// What the engine does with an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Proceed.
    Allow,
    /// Proceed, but the attempt is audited and kept out of the corpus.
    SoftFlag,
    /// Reject and temporarily block the IP.
    TempBlock,
    /// Reject, temporarily block, and page for manual review.
    Escalate,
}

impl Decision {
    /// Decision for a severity tier.
    #[must_use]
    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Low => Self::Allow,
            Severity::Medium => Self::SoftFlag,
            Severity::High => Self::TempBlock,
            Severity::Critical => Self::Escalate,
        }
    }

    /// Whether the caller may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow | Self::SoftFlag)
    }

    /// Whether the IP gets blocked.
    #[must_use]
    pub fn blocks(&self) -> bool {
        matches!(self, Self::TempBlock | Self::Escalate)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::SoftFlag => write!(f, "soft_flag"),
            Self::TempBlock => write!(f, "temp_block"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

/// How many prior records matched on each signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMatches {
    /// Records sharing the IP.
    pub ip: u32,
    /// Records sharing the device id.
    pub device: u32,
    /// Records sharing the User-Agent.
    pub user_agent: u32,
    /// Records sharing the email domain.
    pub email_domain: u32,
    /// Records sharing the institution.
    pub institution: u32,
}

impl SignalMatches {
    pub(crate) fn add(&mut self, hits: SignalHits) {
        let bump = |n: &mut u32, hit: bool| {
            if hit {
                *n = n.saturating_add(1);
            }
        };
        bump(&mut self.ip, hits.ip);
        bump(&mut self.device, hits.device);
        bump(&mut self.user_agent, hits.user_agent);
        bump(&mut self.email_domain, hits.email_domain);
        bump(&mut self.institution, hits.institution);
    }

    /// Total matches across all signals.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.ip
            .saturating_add(self.device)
            .saturating_add(self.user_agent)
            .saturating_add(self.email_domain)
            .saturating_add(self.institution)
    }
}

/// Outcome of scoring one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Per-signal match counts.
    pub matches: SignalMatches,
    /// Weighted total.
    pub score: u32,
    /// Tier derived from the score.
    pub severity: Severity,
    /// What happens to the attempt.
    pub decision: Decision,
}

/// Tunable scoring policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringPolicy {
    /// How far back prior records count.
    pub lookback: Duration,
    /// Per-signal weights.
    pub weights: SignalWeights,
    /// Severity thresholds.
    pub thresholds: SeverityThresholds,
    /// TTL of blocks the engine imposes.
    pub temp_block_ttl: Duration,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(2_592_000),
            weights: SignalWeights::default(),
            thresholds: SeverityThresholds::default(),
            temp_block_ttl: Duration::from_secs(86_400),
        }
    }
}

impl ScoringPolicy {
    /// Score a set of match counts.
    #[must_use]
    pub fn score(&self, matches: SignalMatches) -> ScoreResult {
        let w = &self.weights;
        let score = [
            (w.device, matches.device),
            (w.ip, matches.ip),
            (w.user_agent, matches.user_agent),
            (w.email_domain, matches.email_domain),
            (w.institution, matches.institution),
        ]
        .into_iter()
        .fold(0u32, |acc, (weight, count)| {
            acc.saturating_add(weight.saturating_mul(count))
        });
        let severity = self.thresholds.classify(score);
        ScoreResult {
            matches,
            score,
            severity,
            decision: Decision::for_severity(severity),
        }
    }
}
