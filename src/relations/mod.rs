//! Typed relation facts and the fetchers that produce them.
//!
//! The structured fetcher queries Wikidata in batches; the fallback fetcher
//! reads Wikipedia infoboxes for predicates the structured data left empty.

pub mod fallback;
pub mod infobox;
pub mod structured;

pub use fallback::FallbackFetcher;
pub use structured::{StructuredBatch, StructuredFetcher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::WikinetError;
use crate::graph::NodeKind;

/// Broad grouping of predicates; stored on edges as `relation`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationCategory {
    Family,
    Affiliation,
}

impl RelationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationCategory::Family => "family",
            RelationCategory::Affiliation => "affiliation",
        }
    }
}

/// The fixed predicate vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Father,
    Mother,
    Spouse,
    Child,
    Sibling,
    Relative,
    Partner,
    PositionHeld,
    MemberOfParty,
    MemberOf,
    Employer,
    EducatedAt,
    HeadOfGovernment,
    HeadOfState,
    Chairperson,
    Officeholder,
}

impl Predicate {
    pub const FAMILY: [Predicate; 7] = [
        Predicate::Father,
        Predicate::Mother,
        Predicate::Spouse,
        Predicate::Child,
        Predicate::Sibling,
        Predicate::Relative,
        Predicate::Partner,
    ];

    pub const AFFILIATION: [Predicate; 9] = [
        Predicate::PositionHeld,
        Predicate::MemberOfParty,
        Predicate::MemberOf,
        Predicate::Employer,
        Predicate::EducatedAt,
        Predicate::HeadOfGovernment,
        Predicate::HeadOfState,
        Predicate::Chairperson,
        Predicate::Officeholder,
    ];

    /// Stable predicate code used for edge identity and statistics
    pub fn code(&self) -> &'static str {
        match self {
            Predicate::Father => "father",
            Predicate::Mother => "mother",
            Predicate::Spouse => "spouse",
            Predicate::Child => "child",
            Predicate::Sibling => "sibling",
            Predicate::Relative => "relative",
            Predicate::Partner => "partner",
            Predicate::PositionHeld => "position_held",
            Predicate::MemberOfParty => "member_of_party",
            Predicate::MemberOf => "member_of",
            Predicate::Employer => "employer",
            Predicate::EducatedAt => "educated_at",
            Predicate::HeadOfGovernment => "head_of_government",
            Predicate::HeadOfState => "head_of_state",
            Predicate::Chairperson => "chairperson",
            Predicate::Officeholder => "officeholder",
        }
    }

    /// Wikidata property id
    pub fn property(&self) -> &'static str {
        match self {
            Predicate::Father => "P22",
            Predicate::Mother => "P25",
            Predicate::Spouse => "P26",
            Predicate::Child => "P40",
            Predicate::Sibling => "P3373",
            Predicate::Relative => "P1038",
            Predicate::Partner => "P451",
            Predicate::PositionHeld => "P39",
            Predicate::MemberOfParty => "P102",
            Predicate::MemberOf => "P463",
            Predicate::Employer => "P108",
            Predicate::EducatedAt => "P69",
            Predicate::HeadOfGovernment => "P6",
            Predicate::HeadOfState => "P35",
            Predicate::Chairperson => "P488",
            Predicate::Officeholder => "P2388",
        }
    }

    pub fn from_property(pid: &str) -> Option<Predicate> {
        Self::all().find(|p| p.property() == pid)
    }

    pub fn from_code(code: &str) -> Option<Predicate> {
        Self::all().find(|p| p.code() == code)
    }

    pub fn all() -> impl Iterator<Item = Predicate> {
        Self::FAMILY.into_iter().chain(Self::AFFILIATION)
    }

    pub fn category(&self) -> RelationCategory {
        if Self::FAMILY.contains(self) {
            RelationCategory::Family
        } else {
            RelationCategory::Affiliation
        }
    }

    /// What a subject of this predicate is known to be
    pub fn subject_kind(&self) -> NodeKind {
        match self {
            Predicate::HeadOfGovernment
            | Predicate::HeadOfState
            | Predicate::Chairperson
            | Predicate::Officeholder => NodeKind::Organization,
            _ => NodeKind::Person,
        }
    }

    /// What an object of this predicate is known to be
    pub fn object_kind(&self) -> NodeKind {
        match self {
            Predicate::PositionHeld | Predicate::Officeholder => NodeKind::Position,
            Predicate::MemberOfParty
            | Predicate::MemberOf
            | Predicate::Employer
            | Predicate::EducatedAt => NodeKind::Organization,
            _ => NodeKind::Person,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Which predicates a crawl follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationScope {
    Family,
    Political,
    Both,
}

impl RelationScope {
    /// Predicates in this scope, in a fixed order
    pub fn predicates(&self) -> Vec<Predicate> {
        match self {
            RelationScope::Family => Predicate::FAMILY.to_vec(),
            RelationScope::Political => Predicate::AFFILIATION.to_vec(),
            RelationScope::Both => Predicate::all().collect(),
        }
    }

    pub fn contains(&self, predicate: Predicate) -> bool {
        match self {
            RelationScope::Family => predicate.category() == RelationCategory::Family,
            RelationScope::Political => predicate.category() == RelationCategory::Affiliation,
            RelationScope::Both => true,
        }
    }

    pub fn includes_family(&self) -> bool {
        matches!(self, RelationScope::Family | RelationScope::Both)
    }
}

impl FromStr for RelationScope {
    type Err = WikinetError;

    /// Accepts `family`, `political`, `both`, or a comma list such as `family,political`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut family = false;
        let mut political = false;
        for part in s.split(',').map(|p| p.trim().to_lowercase()).filter(|p| !p.is_empty()) {
            match part.as_str() {
                "family" => family = true,
                "political" | "affiliation" => political = true,
                "both" | "all" => {
                    family = true;
                    political = true;
                }
                other => {
                    return Err(WikinetError::Config(format!(
                        "Unknown relation scope '{}' (expected family, political, or both)",
                        other
                    )))
                }
            }
        }
        match (family, political) {
            (true, true) => Ok(RelationScope::Both),
            (true, false) => Ok(RelationScope::Family),
            (false, true) => Ok(RelationScope::Political),
            (false, false) => Err(WikinetError::Config("Relation scope must not be empty".to_string())),
        }
    }
}

/// Where a fact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceSystem {
    #[serde(rename = "structured")]
    Structured,
    #[serde(rename = "text-fallback")]
    TextFallback,
}

impl SourceSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Structured => "structured",
            SourceSystem::TextFallback => "text-fallback",
        }
    }
}

/// Object of a fact: a resolved entity, or a label we could not resolve
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ObjectRef {
    Entity(String),
    Literal(String),
}

impl ObjectRef {
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            ObjectRef::Entity(id) => Some(id),
            ObjectRef::Literal(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_system: SourceSystem,
    pub evidence_reference: String,
    pub retrieved_at: DateTime<Utc>,
}

/// One directed, typed, provenance-tagged assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationFact {
    pub subject_id: String,
    pub predicate: Predicate,
    pub object: ObjectRef,
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_label: Option<String>,
}

/// `Q` followed by a positive integer
pub fn is_entity_id(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some('Q'))
        && matches!(chars.next(), Some('1'..='9'))
        && chars.all(|c| c.is_ascii_digit())
}

/// Last path segment of an entity URI, if it is an entity id
pub fn entity_id_from_uri(uri: &str) -> Option<&str> {
    let id = uri.rsplit('/').next()?;
    is_entity_id(id).then_some(id)
}

pub fn wikidata_evidence(id: &str) -> String {
    format!("https://www.wikidata.org/wiki/{}", id)
}
