use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Four-facet causal knowledge unit.
///
/// Immutable after creation except for confidence and validation count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    pub id: String,
    pub subject: String,
    pub action: String,
    pub outcome: String,
    pub consequences: String,
    pub confidence: f64,
    pub validation_count: u32,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Addressable facet of an atom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomField {
    Subject,
    Action,
    Outcome,
    Consequences,
}

impl AtomField {
    pub fn as_str(&self) -> &'static str {
        match self {
            AtomField::Subject => "subject",
            AtomField::Action => "action",
            AtomField::Outcome => "outcome",
            AtomField::Consequences => "consequences",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "subject" => Some(AtomField::Subject),
            "action" => Some(AtomField::Action),
            "outcome" => Some(AtomField::Outcome),
            "consequences" => Some(AtomField::Consequences),
            _ => None,
        }
    }
}

/// Relationship kind between two atoms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Causes,
    Enables,
    Precedes,
    Correlates,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Causes => "causes",
            LinkType::Enables => "enables",
            LinkType::Precedes => "precedes",
            LinkType::Correlates => "correlates",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "causes" => Some(LinkType::Causes),
            "enables" => Some(LinkType::Enables),
            "precedes" => Some(LinkType::Precedes),
            "correlates" => Some(LinkType::Correlates),
            _ => None,
        }
    }
}

/// Directed edge in the causal graph. Edges reference atoms by opaque id,
/// never by back-reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalLink {
    pub from_atom_id: String,
    pub to_atom_id: String,
    pub link_type: LinkType,
    /// Strength in [0, 1]
    pub strength: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_type_round_trip() {
        for lt in [
            LinkType::Causes,
            LinkType::Enables,
            LinkType::Precedes,
            LinkType::Correlates,
        ] {
            assert_eq!(LinkType::parse(lt.as_str()), Some(lt));
        }
    }

    #[test]
    fn test_atom_field_parse() {
        assert_eq!(AtomField::parse("outcome"), Some(AtomField::Outcome));
        assert_eq!(AtomField::parse("unknown"), None);
    }
}
