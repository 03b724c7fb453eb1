//! Graph schema: closed node-label and relation-type sets.
//!
//! Labels and relations are compile-time enumerations; a write outside
//! them cannot be expressed. Labels are partitioned into a life domain
//! and a work domain (plus the shared `Entity` catch-all), and the
//! domain-bound pipelines in [`super::graph`] refuse labels outside
//! their own partition.

use serde::{Deserialize, Serialize};

// ============================================================================
// DOMAINS
// ============================================================================

/// The two label partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphDomain {
    /// Personal life: people, events, emotions, interests
    Life,
    /// Work: projects, tasks, documents, meetings
    Work,
}

impl GraphDomain {
    /// Conventional backend graph name for this domain
    pub fn graph_name(&self) -> &'static str {
        match self {
            GraphDomain::Life => "life_graph",
            GraphDomain::Work => "work_graph",
        }
    }

    /// Labels belonging to this domain (the shared `Entity` label belongs
    /// to both)
    pub fn labels(&self) -> &'static [NodeLabel] {
        match self {
            GraphDomain::Life => &[
                NodeLabel::Person,
                NodeLabel::Event,
                NodeLabel::Emotion,
                NodeLabel::Interest,
                NodeLabel::Location,
                NodeLabel::Memory,
                NodeLabel::Topic,
                NodeLabel::Entity,
            ],
            GraphDomain::Work => &[
                NodeLabel::Project,
                NodeLabel::Task,
                NodeLabel::Document,
                NodeLabel::Meeting,
                NodeLabel::Concept,
                NodeLabel::Milestone,
                NodeLabel::Issue,
                NodeLabel::Entity,
            ],
        }
    }

    /// Whether a label may be written through this domain's pipeline
    pub fn allows(&self, label: NodeLabel) -> bool {
        self.labels().contains(&label)
    }
}

// ============================================================================
// NODE LABELS
// ============================================================================

/// Closed node label set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    // Life domain
    /// A person (family, friend, colleague)
    Person,
    /// An event (gathering, trip, anniversary)
    Event,
    /// An emotion occurrence
    Emotion,
    /// An interest or hobby
    Interest,
    /// A place
    Location,
    /// A memory fragment
    Memory,
    /// A discussion topic
    Topic,

    // Work domain
    /// A project
    Project,
    /// A task or todo
    Task,
    /// A document
    Document,
    /// A meeting
    Meeting,
    /// A technical concept
    Concept,
    /// A milestone
    Milestone,
    /// A problem or bug
    Issue,

    /// Shared catch-all entity
    Entity,
}

impl NodeLabel {
    /// Stable string form (backend label)
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Person => "Person",
            NodeLabel::Event => "Event",
            NodeLabel::Emotion => "Emotion",
            NodeLabel::Interest => "Interest",
            NodeLabel::Location => "Location",
            NodeLabel::Memory => "Memory",
            NodeLabel::Topic => "Topic",
            NodeLabel::Project => "Project",
            NodeLabel::Task => "Task",
            NodeLabel::Document => "Document",
            NodeLabel::Meeting => "Meeting",
            NodeLabel::Concept => "Concept",
            NodeLabel::Milestone => "Milestone",
            NodeLabel::Issue => "Issue",
            NodeLabel::Entity => "Entity",
        }
    }

    /// Parse from the backend string form
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "Person" => Some(NodeLabel::Person),
            "Event" => Some(NodeLabel::Event),
            "Emotion" => Some(NodeLabel::Emotion),
            "Interest" => Some(NodeLabel::Interest),
            "Location" => Some(NodeLabel::Location),
            "Memory" => Some(NodeLabel::Memory),
            "Topic" => Some(NodeLabel::Topic),
            "Project" => Some(NodeLabel::Project),
            "Task" => Some(NodeLabel::Task),
            "Document" => Some(NodeLabel::Document),
            "Meeting" => Some(NodeLabel::Meeting),
            "Concept" => Some(NodeLabel::Concept),
            "Milestone" => Some(NodeLabel::Milestone),
            "Issue" => Some(NodeLabel::Issue),
            "Entity" => Some(NodeLabel::Entity),
            _ => None,
        }
    }

    /// Properties a node of this label must carry
    pub fn required_properties(&self) -> &'static [&'static str] {
        match self {
            NodeLabel::Person => &["name"],
            NodeLabel::Event => &["title", "date"],
            NodeLabel::Emotion => &["type", "intensity"],
            NodeLabel::Interest => &["name"],
            NodeLabel::Location => &["name"],
            NodeLabel::Memory => &["content"],
            NodeLabel::Topic => &["name"],
            NodeLabel::Project => &["name"],
            NodeLabel::Task => &["title", "status"],
            NodeLabel::Document => &["title"],
            NodeLabel::Meeting => &["title", "date"],
            NodeLabel::Concept => &["name"],
            NodeLabel::Milestone => &["title", "target_date"],
            NodeLabel::Issue => &["title", "status"],
            NodeLabel::Entity => &[],
        }
    }

    /// The property that identifies a node of this label in merges
    pub fn primary_key(&self) -> &'static str {
        self.required_properties().first().copied().unwrap_or("name")
    }

    /// Validate a property map against the label's schema
    pub fn validate_properties(
        &self,
        properties: &serde_json::Map<String, serde_json::Value>,
    ) -> crate::error::Result<()> {
        for required in self.required_properties() {
            if !properties.contains_key(*required) {
                return Err(crate::error::CoreError::Validation(format!(
                    "node label {} requires property '{}'",
                    self.as_str(),
                    required
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RELATION TYPES
// ============================================================================

/// Closed relation type set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationType {
    // Life domain
    /// Person -> Person acquaintance
    Knows,
    /// Person -> Person family tie
    Family,
    /// Person -> Person friendship
    Friend,
    /// Person -> Event attendance
    Attends,
    /// Person -> Emotion occurrence
    Feels,
    /// Person -> Interest
    InterestedIn,
    /// Event -> Location
    HappenedAt,
    /// Location -> Location containment
    LocatedIn,
    /// Person -> Memory
    Remembers,
    /// Person -> Topic
    Discusses,
    /// Generic association
    RelatesTo,

    // Work domain
    /// Person -> Project/Task
    WorksOn,
    /// Task -> Task dependency
    DependsOn,
    /// Task -> Project membership
    BelongsTo,
    /// Document -> Document/Concept citation
    References,
    /// Task -> Person assignment
    AssignedTo,
    /// Person -> Meeting/Project participation
    Participates,
    /// Project -> Task containment
    Contains,
    /// Issue -> Task blockage
    Blocks,
    /// Document -> Entity mention
    Mentions,
    /// Task -> Milestone achievement
    Achieves,

    // Shared
    /// Generic link
    LinkedTo,
    /// Provenance
    CreatedBy,
}

impl RelationType {
    /// Stable string form (backend relationship type)
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Knows => "KNOWS",
            RelationType::Family => "FAMILY",
            RelationType::Friend => "FRIEND",
            RelationType::Attends => "ATTENDS",
            RelationType::Feels => "FEELS",
            RelationType::InterestedIn => "INTERESTED_IN",
            RelationType::HappenedAt => "HAPPENED_AT",
            RelationType::LocatedIn => "LOCATED_IN",
            RelationType::Remembers => "REMEMBERS",
            RelationType::Discusses => "DISCUSSES",
            RelationType::RelatesTo => "RELATES_TO",
            RelationType::WorksOn => "WORKS_ON",
            RelationType::DependsOn => "DEPENDS_ON",
            RelationType::BelongsTo => "BELONGS_TO",
            RelationType::References => "REFERENCES",
            RelationType::AssignedTo => "ASSIGNED_TO",
            RelationType::Participates => "PARTICIPATES",
            RelationType::Contains => "CONTAINS",
            RelationType::Blocks => "BLOCKS",
            RelationType::Mentions => "MENTIONS",
            RelationType::Achieves => "ACHIEVES",
            RelationType::LinkedTo => "LINKED_TO",
            RelationType::CreatedBy => "CREATED_BY",
        }
    }

    /// Parse from the backend string form
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "KNOWS" => Some(RelationType::Knows),
            "FAMILY" => Some(RelationType::Family),
            "FRIEND" => Some(RelationType::Friend),
            "ATTENDS" => Some(RelationType::Attends),
            "FEELS" => Some(RelationType::Feels),
            "INTERESTED_IN" => Some(RelationType::InterestedIn),
            "HAPPENED_AT" => Some(RelationType::HappenedAt),
            "LOCATED_IN" => Some(RelationType::LocatedIn),
            "REMEMBERS" => Some(RelationType::Remembers),
            "DISCUSSES" => Some(RelationType::Discusses),
            "RELATES_TO" => Some(RelationType::RelatesTo),
            "WORKS_ON" => Some(RelationType::WorksOn),
            "DEPENDS_ON" => Some(RelationType::DependsOn),
            "BELONGS_TO" => Some(RelationType::BelongsTo),
            "REFERENCES" => Some(RelationType::References),
            "ASSIGNED_TO" => Some(RelationType::AssignedTo),
            "PARTICIPATES" => Some(RelationType::Participates),
            "CONTAINS" => Some(RelationType::Contains),
            "BLOCKS" => Some(RelationType::Blocks),
            "MENTIONS" => Some(RelationType::Mentions),
            "ACHIEVES" => Some(RelationType::Achieves),
            "LINKED_TO" => Some(RelationType::LinkedTo),
            "CREATED_BY" => Some(RelationType::CreatedBy),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_label_roundtrip() {
        for label in [
            NodeLabel::Person,
            NodeLabel::Task,
            NodeLabel::Entity,
            NodeLabel::Milestone,
        ] {
            assert_eq!(NodeLabel::parse_name(label.as_str()), Some(label));
        }
        assert_eq!(NodeLabel::parse_name("Widget"), None);
    }

    #[test]
    fn test_relation_roundtrip() {
        for relation in [
            RelationType::Knows,
            RelationType::DependsOn,
            RelationType::LinkedTo,
        ] {
            assert_eq!(RelationType::parse_name(relation.as_str()), Some(relation));
        }
        assert_eq!(RelationType::parse_name("OWNS"), None);
    }

    #[test]
    fn test_domain_partition() {
        assert!(GraphDomain::Life.allows(NodeLabel::Person));
        assert!(!GraphDomain::Life.allows(NodeLabel::Project));
        assert!(GraphDomain::Work.allows(NodeLabel::Project));
        assert!(!GraphDomain::Work.allows(NodeLabel::Emotion));
        // Entity is shared.
        assert!(GraphDomain::Life.allows(NodeLabel::Entity));
        assert!(GraphDomain::Work.allows(NodeLabel::Entity));
    }

    #[test]
    fn test_required_properties() {
        let mut props = serde_json::Map::new();
        props.insert("title".to_string(), json!("ship v1"));
        assert!(NodeLabel::Task.validate_properties(&props).is_err());

        props.insert("status".to_string(), json!("open"));
        assert!(NodeLabel::Task.validate_properties(&props).is_ok());

        // Entity has no required properties.
        assert!(NodeLabel::Entity
            .validate_properties(&serde_json::Map::new())
            .is_ok());
    }

    #[test]
    fn test_graph_names() {
        assert_eq!(GraphDomain::Life.graph_name(), "life_graph");
        assert_eq!(GraphDomain::Work.graph_name(), "work_graph");
    }
}
