//! Types for the memory subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a Kwami instance. One identity maps to one memory namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KwamiId(String);

impl KwamiId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KwamiId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for KwamiId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "assistant")]
    Agent,
}

impl Role {
    /// Role name as understood by the memory service.
    pub fn as_service_role(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" | "human" => Ok(Self::User),
            "agent" | "assistant" | "ai" => Ok(Self::Agent),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// One utterance in a conversation. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    /// Position within the session, starting at 0
    pub seq: u64,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Speaker display name, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Turn {
    pub fn new(seq: u64, role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq,
            role,
            text: text.into(),
            timestamp: Utc::now(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }
}

/// A proposition about the human user, extracted and owned by the memory service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub text: String,
    /// Relevance in [0, 1]
    pub relevance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_at: Option<DateTime<Utc>>,
    /// Set once the fact stopped being true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_turn: Option<Uuid>,
}

impl Fact {
    pub fn new(text: impl Into<String>, relevance: f64) -> Self {
        Self {
            text: text.into(),
            relevance: clamp_relevance(relevance),
            valid_at: None,
            invalid_at: None,
            source_turn: None,
        }
    }

    pub fn is_current(&self) -> bool {
        self.invalid_at.is_none()
    }
}

/// Force a score into [0, 1]. Non-finite scores count as irrelevant.
pub fn clamp_relevance(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// A node of the user's knowledge graph (person, place, preference...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub summary: String,
}

/// Raw memory as returned by the store, before filtering and bounding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryBundle {
    /// Rolling summary of past conversations, when the service provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Past turns, oldest first
    #[serde(default)]
    pub history: Vec<Turn>,
}

impl MemoryBundle {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.facts.is_empty()
            && self.entities.is_empty()
            && self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Agent);
        assert_eq!("USER".parse::<Role>().unwrap(), Role::User);
        assert!("narrator".parse::<Role>().is_err());
        assert_eq!(Role::Agent.as_service_role(), "assistant");
    }

    #[test]
    fn test_fact_relevance_is_clamped() {
        assert_eq!(Fact::new("a", 1.7).relevance, 1.0);
        assert_eq!(Fact::new("b", -0.2).relevance, 0.0);
        assert_eq!(Fact::new("c", f64::NAN).relevance, 0.0);
        assert_eq!(Fact::new("d", f64::INFINITY).relevance, 0.0);
    }

    #[test]
    fn test_kwami_id_serializes_transparently() {
        let id = KwamiId::new("k-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"k-42\"");
    }
}
