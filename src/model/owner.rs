//! Tree owners: outlines, arcs and the instances scoped to an outline

use super::ids::{ArcId, InstanceId, OutlineId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which kind of tree a node lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeKind {
    /// Narrative-beat tree of a story arc
    Arc,
    /// Part/chapter/scene tree of an outline
    Story,
}

impl TreeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arc => "arc",
            Self::Story => "story",
        }
    }
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The entity a tree belongs to. Nodes of different owners never meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum OwnerRef {
    Arc(ArcId),
    Outline(OutlineId),
}

impl OwnerRef {
    pub fn tree_kind(&self) -> TreeKind {
        match self {
            Self::Arc(_) => TreeKind::Arc,
            Self::Outline(_) => TreeKind::Story,
        }
    }

    /// Owner id as stored alongside the tree kind
    pub fn id_string(&self) -> String {
        match self {
            Self::Arc(id) => id.to_string(),
            Self::Outline(id) => id.to_string(),
        }
    }

    /// Rebuild an owner from its stored tree kind and id columns
    pub fn from_parts(kind: &str, id: &str) -> Option<Self> {
        match kind {
            "arc" => id.parse().ok().map(Self::Arc),
            "story" => id.parse().ok().map(Self::Outline),
            _ => None,
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arc(id) => write!(f, "arc {}", id),
            Self::Outline(id) => write!(f, "outline {}", id),
        }
    }
}

/// An outline: the container of one story tree, its arcs and its instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub id: OutlineId,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Outline {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: OutlineId::new(),
            title: title.into(),
            description: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// MACE classification of an arc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaceType {
    Milieu,
    Answer,
    Character,
    Event,
}

impl MaceType {
    pub const ALL: [MaceType; 4] = [Self::Milieu, Self::Answer, Self::Character, Self::Event];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Milieu => "milieu",
            Self::Answer => "answer",
            Self::Character => "character",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for MaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown MACE type '{}'", s))
    }
}

/// A story arc within an outline. Its beat tree is owned by the arc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryArc {
    pub id: ArcId,
    pub outline_id: OutlineId,
    pub name: String,
    pub mace_type: MaceType,
    pub created_at: DateTime<Utc>,
}

impl StoryArc {
    pub fn new(outline_id: OutlineId, name: impl Into<String>, mace_type: MaceType) -> Self {
        Self {
            id: ArcId::new(),
            outline_id,
            name: name.into(),
            mace_type,
            created_at: Utc::now(),
        }
    }
}

/// Character or location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    Character,
    Location,
}

impl InstanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Location => "location",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "character" => Some(Self::Character),
            "location" => Some(Self::Location),
            _ => None,
        }
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A character or location as it appears in one outline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub outline_id: OutlineId,
    pub kind: InstanceKind,
    pub label: String,
}

impl Instance {
    pub fn character(outline_id: OutlineId, label: impl Into<String>) -> Self {
        Self::new(outline_id, InstanceKind::Character, label)
    }

    pub fn location(outline_id: OutlineId, label: impl Into<String>) -> Self {
        Self::new(outline_id, InstanceKind::Location, label)
    }

    fn new(outline_id: OutlineId, kind: InstanceKind, label: impl Into<String>) -> Self {
        Self {
            id: InstanceId::new(),
            outline_id,
            kind,
            label: label.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_round_trips_through_columns() {
        let owner = OwnerRef::Arc(ArcId::new());
        let kind = owner.tree_kind().as_str();
        assert_eq!(OwnerRef::from_parts(kind, &owner.id_string()), Some(owner));
        assert_eq!(OwnerRef::from_parts("table", &owner.id_string()), None);
    }

    #[test]
    fn test_mace_type_parses_case_insensitively() {
        assert_eq!("Character".parse::<MaceType>().unwrap(), MaceType::Character);
        assert!("romance".parse::<MaceType>().is_err());
    }
}
