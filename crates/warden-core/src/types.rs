//! Common types used throughout warden.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Escalation level driving the intensity of an automated response.
///
/// Ordered: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Nothing notable - proceed.
    Low,
    /// Suspicious but not actionable on its own.
    Medium,
    /// Actionable - temporary blocking applies.
    High,
    /// Reserved for manual escalation review.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl Severity {
    /// Whether this severity should page a human.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// Role of the actor behind an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// The subsystem itself (background jobs, automated enforcement).
    System,
    /// An unauthenticated visitor (signups, invite redemptions).
    Anonymous,
    /// A regular platform member.
    Member,
    /// An institution-level administrator.
    InstitutionAdmin,
    /// A platform operator with full privileges.
    PlatformAdmin,
}

impl ActorRole {
    /// Whether this role may run administrative entrypoints
    /// (retention purge, manual block/unblock).
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::PlatformAdmin)
    }

    /// Stable lowercase name, also used in canonical hashing.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Anonymous => "anonymous",
            Self::Member => "member",
            Self::InstitutionAdmin => "institution_admin",
            Self::PlatformAdmin => "platform_admin",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who performed an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    /// Opaque actor identifier (user id, service name).
    pub id: String,
    /// Role the actor held when acting.
    pub role: ActorRole,
}

impl Actor {
    /// Create a new actor.
    #[must_use]
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// The subsystem acting on its own behalf.
    #[must_use]
    pub fn system() -> Self {
        Self::new("warden", ActorRole::System)
    }

    /// Whether this actor may run administrative entrypoints.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert!(!Severity::Medium.is_actionable());
        assert!(Severity::High.is_actionable());
    }

    #[test]
    fn test_severity_serde() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }

    #[test]
    fn test_only_platform_admin_is_privileged() {
        assert!(Actor::new("ops", ActorRole::PlatformAdmin).is_privileged());
        assert!(!Actor::new("coach", ActorRole::InstitutionAdmin).is_privileged());
        assert!(!Actor::system().is_privileged());
    }

    #[test]
    fn test_actor_display() {
        let actor = Actor::new("u-1", ActorRole::Member);
        assert_eq!(actor.to_string(), "member:u-1");
    }
}
