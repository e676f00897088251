//! Core domain types for catalog synchronization.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SyncRunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one synchronization pass (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncRunId(pub Uuid);

impl SyncRunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SyncRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CategoryId
// ---------------------------------------------------------------------------

/// Source-catalog identifier of a category. Magento sends integers, other
/// catalogs may send strings; both are accepted and echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryId {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for CategoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for CategoryId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<i32> for CategoryId {
    fn from(id: i32) -> Self {
        Self::Int(i64::from(id))
    }
}

impl From<&str> for CategoryId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_string())
    }
}

impl From<String> for CategoryId {
    fn from(id: String) -> Self {
        Self::Str(id)
    }
}

// ---------------------------------------------------------------------------
// CustomAttribute
// ---------------------------------------------------------------------------

/// A `(code, value)` pair from the source record's `custom_attributes` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAttribute {
    pub attribute_code: String,
    pub value: Value,
}

impl CustomAttribute {
    pub fn new(code: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            attribute_code: code.into(),
            value: value.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// CategoryNode
// ---------------------------------------------------------------------------

/// One category at any depth of the catalog tree.
///
/// Fields the pipeline does not interpret (`parent_id`, `is_active`,
/// `position`, ...) are kept in [`CategoryNode::fields`] and serialized back
/// at the document root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub id: CategoryId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,

    /// Present only on raw records; consumed by normalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_attributes: Option<Vec<CustomAttribute>>,

    /// `None` marks a leaf; `Some(vec![])` is a branch with no children.
    #[serde(
        rename = "children_data",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub children: Option<Vec<CategoryNode>>,

    /// Whether the per-node extended record has been merged in.
    #[serde(skip)]
    pub extended: bool,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CategoryNode {
    /// A bare node with just an id and a display name.
    pub fn new(id: impl Into<CategoryId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            url_key: None,
            slug: None,
            custom_attributes: None,
            children: None,
            extended: false,
            fields: Map::new(),
        }
    }

    /// Builder-style helper attaching children.
    pub fn with_children(mut self, children: Vec<CategoryNode>) -> Self {
        self.children = Some(children);
        self
    }

    /// Builder-style helper attaching a raw custom attribute.
    pub fn with_attribute(mut self, code: &str, value: impl Into<Value>) -> Self {
        self.custom_attributes
            .get_or_insert_with(Vec::new)
            .push(CustomAttribute::new(code, value));
        self
    }

    /// `true` when this node has children to recurse into.
    pub fn has_children(&self) -> bool {
        self.children.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Number of nodes below this one, at any depth.
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .flatten()
            .map(|child| 1 + child.descendant_count())
            .sum()
    }

    /// Human-readable label for logs, e.g. `[(5) Shoes]`.
    pub fn label(&self) -> String {
        format!("[({}) {}]", self.id, self.name.as_deref().unwrap_or(""))
    }
}

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

/// Kind of catalog entity referenced by a cache-invalidation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Category,
    Product,
    Attribute,
}

impl EntityKind {
    /// Single-letter prefix used by the storefront's invalidation tags.
    pub fn tag_prefix(&self) -> &'static str {
        match self {
            Self::Category => "C",
            Self::Product => "P",
            Self::Attribute => "A",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Product => "product",
            Self::Attribute => "attribute",
        }
    }
}
