//! Fingerprints: the hashed signals of one signup or invite attempt.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_crypto::{ContentHash, FingerprintHasher};

use crate::error::{AbuseError, AbuseResult};

/// Kind of attempt being gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Free-trial signup.
    TrialUsage,
    /// Invite redemption.
    InviteAttempt,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrialUsage => write!(f, "trial_usage"),
            Self::InviteAttempt => write!(f, "invite_attempt"),
        }
    }
}

/// Raw signals as received from the request. Never persisted.
#[derive(Clone, Default)]
pub struct FingerprintInput {
    /// Client IP address (required).
    pub ip: String,
    /// User-Agent header.
    pub user_agent: Option<String>,
    /// Client-side device identifier.
    pub device_id: Option<String>,
    /// Email address or bare domain.
    pub email: Option<String>,
    /// Institution the attempt targets.
    pub institution: Option<String>,
}

impl FingerprintInput {
    /// Start from a client IP.
    #[must_use]
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Self::default()
        }
    }

    /// Set the User-Agent.
    #[must_use]
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Set the device identifier.
    #[must_use]
    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.device_id = Some(id.into());
        self
    }

    /// Set the email address or domain.
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the institution reference.
    #[must_use]
    pub fn institution(mut self, institution: impl Into<String>) -> Self {
        self.institution = Some(institution.into());
        self
    }
}

impl fmt::Debug for FingerprintInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintInput")
            .field("has_user_agent", &self.user_agent.is_some())
            .field("has_device_id", &self.device_id.is_some())
            .field("has_email", &self.email.is_some())
            .field("institution", &self.institution)
            .finish_non_exhaustive()
    }
}

/// Hashed signals of one attempt.
///
/// The raw IP is kept (in memory only) because enforcement blocks it.
#[derive(Clone, PartialEq, Eq)]
pub struct Fingerprint {
    ip: IpAddr,
    /// Hashed IP.
    pub ip_hash: ContentHash,
    /// Hashed User-Agent.
    pub user_agent_hash: Option<ContentHash>,
    /// Hashed device id.
    pub device_hash: Option<ContentHash>,
    /// Hashed email domain.
    pub email_domain_hash: Option<ContentHash>,
    /// Institution reference.
    pub institution: Option<String>,
    /// What kind of attempt this is.
    pub event_type: EventType,
}

impl Fingerprint {
    /// Hash raw input into a fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`AbuseError::Validation`] if the IP is empty or malformed.
    pub fn from_input(
        input: &FingerprintInput,
        event_type: EventType,
        hasher: &FingerprintHasher,
    ) -> AbuseResult<Self> {
        let raw_ip = input.ip.trim();
        if raw_ip.is_empty() {
            return Err(AbuseError::Validation("ip is required".into()));
        }
        let ip: IpAddr = raw_ip
            .parse()
            .map_err(|_| AbuseError::Validation("ip is not a valid address".into()))?;

        let institution = input
            .institution
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);

        Ok(Self {
            ip: ip.to_canonical(),
            ip_hash: hasher.hash_ip(ip),
            user_agent_hash: hasher.hash_opt(input.user_agent.as_deref()),
            device_hash: hasher.hash_opt(input.device_id.as_deref()),
            email_domain_hash: input
                .email
                .as_deref()
                .and_then(|e| hasher.hash_email_domain(e)),
            institution,
            event_type,
        })
    }

    /// The client IP.
    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Build the corpus record for a legitimate attempt.
    #[must_use]
    pub fn to_record(&self, user_id: &str, created_at: DateTime<Utc>) -> FingerprintRecord {
        FingerprintRecord {
            user_id: user_id.to_owned(),
            ip_hash: self.ip_hash,
            user_agent_hash: self.user_agent_hash,
            device_hash: self.device_hash,
            email_domain_hash: self.email_domain_hash,
            institution: self.institution.clone(),
            event_type: self.event_type,
            created_at,
        }
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprint")
            .field("ip_hash", &self.ip_hash)
            .field("user_agent_hash", &self.user_agent_hash)
            .field("device_hash", &self.device_hash)
            .field("email_domain_hash", &self.email_domain_hash)
            .field("institution", &self.institution)
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

/// A stored fingerprint of a past legitimate attempt. Holds no raw signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// User the attempt created or belonged to.
    pub user_id: String,
    /// Hashed IP.
    pub ip_hash: ContentHash,
    /// Hashed User-Agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent_hash: Option<ContentHash>,
    /// Hashed device id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_hash: Option<ContentHash>,
    /// Hashed email domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_domain_hash: Option<ContentHash>,
    /// Institution reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    /// Kind of attempt.
    pub event_type: EventType,
    /// When it was recorded.
    pub created_at: DateTime<Utc>,
}

/// Which signals of a fingerprint a record shares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SignalHits {
    pub(crate) ip: bool,
    pub(crate) device: bool,
    pub(crate) user_agent: bool,
    pub(crate) email_domain: bool,
    pub(crate) institution: bool,
}

impl SignalHits {
    pub(crate) fn any(&self) -> bool {
        self.ip || self.device || self.user_agent || self.email_domain || self.institution
    }
}

/// Present on both sides and equal. Two absent values never match.
fn both_eq<T: PartialEq>(a: Option<&T>, b: Option<&T>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

impl FingerprintRecord {
    pub(crate) fn hits(&self, fp: &Fingerprint) -> SignalHits {
        SignalHits {
            ip: self.ip_hash == fp.ip_hash,
            device: both_eq(self.device_hash.as_ref(), fp.device_hash.as_ref()),
            user_agent: both_eq(self.user_agent_hash.as_ref(), fp.user_agent_hash.as_ref()),
            email_domain: both_eq(self.email_domain_hash.as_ref(), fp.email_domain_hash.as_ref()),
            institution: both_eq(self.institution.as_ref(), fp.institution.as_ref()),
        }
    }
}
