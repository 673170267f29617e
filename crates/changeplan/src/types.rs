//! Resource and state types
//!
//! The persisted state snapshot format is produced and consumed by these
//! types directly, so field names and casing here are part of the on-disk
//! contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A property value in a resource configuration.
///
/// Values form a closed set so structural comparison is always well-defined.
/// JSON `null` is not a member and is rejected when parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Collect every string leaf, descending into lists and nested maps.
    pub fn string_leaves<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::String(s) => out.push(s),
            Self::List(items) => items.iter().for_each(|v| v.string_leaves(out)),
            Self::Map(map) => map.values().for_each(|v| v.string_leaves(out)),
            Self::Bool(_) | Self::Int(_) | Self::Float(_) => {}
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for PropertyValue {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

/// Property map of a resource
pub type Properties = BTreeMap<String, PropertyValue>;

/// Tag map of a resource
pub type Tags = BTreeMap<String, String>;

/// Lifecycle status of a managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Creating,
    Active,
    Updating,
    Deleting,
    Error,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Declared configuration of a resource, identified by its stable key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    /// Stable resource key (never the provider-assigned ARN)
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub tags: Tags,
    /// Keys of resources this one must be created after
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,
}

impl ResourceConfig {
    /// Create a configuration with empty properties and tags.
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            resource_type: resource_type.into(),
            region: region.into(),
            properties: Properties::new(),
            tags: Tags::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Builder-style property setter.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Builder-style tag setter.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Structural comparison of the managed fields.
    ///
    /// Declared dependencies are ordering hints, not configuration, and do not
    /// count as a difference.
    pub fn differs_from(&self, other: &Self) -> bool {
        self.resource_type != other.resource_type
            || self.name != other.name
            || self.region != other.region
            || self.properties != other.properties
            || self.tags != other.tags
    }

    /// Property keys whose values differ between `self` and `other`.
    pub fn changed_properties<'a>(&'a self, other: &'a Self) -> BTreeSet<&'a str> {
        self.properties
            .keys()
            .chain(other.properties.keys())
            .filter(|k| self.properties.get(*k) != other.properties.get(*k))
            .map(String::as_str)
            .collect()
    }
}

/// A managed resource as recorded in a state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    pub region: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub tags: Tags,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// Build an active resource record from a configuration.
    pub fn from_config(config: &ResourceConfig, now: DateTime<Utc>) -> Self {
        Self {
            id: config.id.clone(),
            resource_type: config.resource_type.clone(),
            name: config.name.clone(),
            arn: None,
            region: config.region.clone(),
            properties: config.properties.clone(),
            tags: config.tags.clone(),
            status: ResourceStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Configuration view of this resource.
    pub fn config(&self) -> ResourceConfig {
        ResourceConfig {
            id: self.id.clone(),
            resource_type: self.resource_type.clone(),
            name: self.name.clone(),
            region: self.region.clone(),
            properties: self.properties.clone(),
            tags: self.tags.clone(),
            depends_on: BTreeSet::new(),
        }
    }
}

/// Who changed a state and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMetadata {
    pub last_modified_by: String,
    pub change_description: String,
    pub change_plan_id: Option<String>,
}

/// An immutable, versioned snapshot of a project's resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureState {
    version: u64,
    project_id: String,
    timestamp: DateTime<Utc>,
    metadata: StateMetadata,
    resources: Vec<Resource>,
}

impl InfrastructureState {
    /// Create a snapshot. Resources are ordered by key.
    pub fn new(
        project_id: impl Into<String>,
        version: u64,
        timestamp: DateTime<Utc>,
        metadata: StateMetadata,
        mut resources: Vec<Resource>,
    ) -> Self {
        resources.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            version,
            project_id: project_id.into(),
            timestamp,
            metadata,
            resources,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &StateMetadata {
        &self.metadata
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Look up a resource by key.
    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }
}

/// The declared target configuration of a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DesiredState {
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

impl DesiredState {
    pub fn new(resources: Vec<ResourceConfig>) -> Self {
        Self { resources }
    }
}

impl From<&InfrastructureState> for DesiredState {
    fn from(state: &InfrastructureState) -> Self {
        Self {
            resources: state.resources().iter().map(Resource::config).collect(),
        }
    }
}

/// Summary entry of a stored state version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    /// Where the store keeps this version (path, key, URL)
    pub locator: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_state() -> InfrastructureState {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let web = ResourceConfig::new("web", "compute", "us-east-1")
            .with_property("size", "large")
            .with_property("count", 2)
            .with_tag("env", "prod");
        let mut web = Resource::from_config(&web, at);
        web.arn = Some("arn:compute:web".into());
        let db = Resource::from_config(&ResourceConfig::new("db", "database", "us-east-1"), at);
        InfrastructureState::new(
            "shop",
            4,
            at,
            StateMetadata {
                last_modified_by: "alice".into(),
                change_description: "initial".into(),
                change_plan_id: Some("plan-1".into()),
            },
            vec![web, db],
        )
    }

    #[test]
    fn test_state_sorts_resources_by_key() {
        let state = sample_state();
        let ids: Vec<_> = state.resources().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["db", "web"]);
    }

    #[test]
    fn test_state_round_trips_exactly() {
        let state = sample_state();
        let json = serde_json::to_string_pretty(&state).unwrap();
        let back: InfrastructureState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert_eq!(serde_json::to_string_pretty(&back).unwrap(), json);
    }

    #[test]
    fn test_persisted_field_names() {
        let value = serde_json::to_value(sample_state()).unwrap();
        assert_eq!(value["projectId"], "shop");
        assert_eq!(value["metadata"]["lastModifiedBy"], "alice");
        assert_eq!(value["metadata"]["changePlanId"], "plan-1");
        let db = &value["resources"][0];
        assert_eq!(db["type"], "database");
        assert_eq!(db["status"], "active");
        assert!(db.get("arn").is_none());
        assert!(db.get("createdAt").is_some());
        assert_eq!(value["resources"][1]["arn"], "arn:compute:web");
    }

    #[test]
    fn test_null_property_rejected() {
        let json = r#"{"id":"a","type":"t","name":"a","region":"r","properties":{"x":null}}"#;
        assert!(serde_json::from_str::<ResourceConfig>(json).is_err());
    }

    #[test]
    fn test_unknown_status_rejected() {
        let json = r#""pending""#;
        assert!(serde_json::from_str::<ResourceStatus>(json).is_err());
    }

    #[test]
    fn test_property_values_parse_to_closed_variants() {
        let json = r#"{"a":true,"b":3,"c":1.5,"d":"x","e":[1,"y"],"f":{"g":"z"}}"#;
        let props: Properties = serde_json::from_str(json).unwrap();
        assert_eq!(props["a"], PropertyValue::Bool(true));
        assert_eq!(props["b"], PropertyValue::Int(3));
        assert_eq!(props["c"], PropertyValue::Float(1.5));
        assert!(matches!(props["e"], PropertyValue::List(_)));
        assert!(matches!(props["f"], PropertyValue::Map(_)));
    }

    #[test]
    fn test_string_leaves_descend_into_nested_values() {
        let json = r#"{"subnets":["net-a",{"primary":"net-b"}],"port":80}"#;
        let props: Properties = serde_json::from_str(json).unwrap();
        let mut leaves = Vec::new();
        for value in props.values() {
            value.string_leaves(&mut leaves);
        }
        leaves.sort_unstable();
        assert_eq!(leaves, vec!["net-a", "net-b"]);
    }

    #[test]
    fn test_differs_from_ignores_declared_dependencies() {
        let a = ResourceConfig::new("a", "t", "r").with_property("x", 1);
        let mut b = a.clone();
        b.depends_on.insert("other".into());
        assert!(!a.differs_from(&b));

        let c = a.clone().with_tag("team", "core");
        assert!(a.differs_from(&c));
    }

    #[test]
    fn test_changed_properties() {
        let a = ResourceConfig::new("a", "t", "r")
            .with_property("vpc", "v1")
            .with_property("size", 1);
        let b = ResourceConfig::new("a", "t", "r")
            .with_property("vpc", "v2")
            .with_property("size", 1)
            .with_property("extra", true);
        let changed: Vec<_> = a.changed_properties(&b).into_iter().collect();
        assert_eq!(changed, vec!["extra", "vpc"]);
    }

    #[test]
    fn test_desired_from_state_keeps_configuration() {
        let state = sample_state();
        let desired = DesiredState::from(&state);
        assert_eq!(desired.resources.len(), 2);
        assert!(!desired.resources[1].differs_from(&state.resources()[1].config()));
    }
}
