//! Attribute normalization: turns raw catalog records into flat documents.
//!
//! Raw records carry their EAV data as a `custom_attributes` list of
//! `(attribute_code, value)` pairs. Search documents want those as top-level
//! fields, plus a `url_key` and a `slug` that always agree.

use serde_json::Value;
use tracing::debug;

use catalogsync_shared::{CatalogSyncError, CategoryNode, CustomAttribute, Result};

use crate::slug::url_key_for;

/// Normalize `node` in place.
///
/// Custom attributes are lifted to top-level fields and removed. When
/// `generate_url_key` is set the url key is always rebuilt as
/// `<slug(name)>-<id>`; otherwise it is only derived when absent. `slug` is
/// then set to the url key.
///
/// Fails with [`CatalogSyncError::DataIntegrity`] when a url key has to be
/// derived and the node has no name. Attributes are already lifted at that
/// point; callers discard the node.
pub fn normalize(node: &mut CategoryNode, generate_url_key: bool) -> Result<()> {
    if let Some(attributes) = node.custom_attributes.take() {
        for attribute in attributes {
            lift_attribute(node, attribute);
        }
    }

    if generate_url_key || node.url_key.is_none() {
        let name = node
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                CatalogSyncError::data_integrity(&node.id, "a name is required to derive url_key")
            })?;
        node.url_key = Some(url_key_for(name, &node.id));
    }

    node.slug = node.url_key.clone();
    Ok(())
}

/// Merge an already-normalized extended record into `node`.
///
/// Fields present on `fetched` overwrite or extend those on `node`. The
/// children of `node` are left exactly as they are.
pub fn merge_extended(node: &mut CategoryNode, fetched: CategoryNode) {
    let CategoryNode {
        name,
        url_key,
        slug,
        fields,
        ..
    } = fetched;

    if name.is_some() {
        node.name = name;
    }
    if url_key.is_some() {
        node.url_key = url_key;
    }
    if slug.is_some() {
        node.slug = slug;
    }
    node.fields.extend(fields);
    node.extended = true;
}

fn lift_attribute(node: &mut CategoryNode, attribute: CustomAttribute) {
    let CustomAttribute {
        attribute_code,
        value,
    } = attribute;

    match attribute_code.as_str() {
        "name" => node.name = value_text(value),
        "url_key" => node.url_key = value_text(value),
        "slug" => node.slug = value_text(value),
        // Structural fields are owned by the record itself.
        "id" | "children_data" | "custom_attributes" => {
            debug!(
                category_id = %node.id,
                code = %attribute_code,
                "ignoring custom attribute that shadows a structural field"
            );
        }
        _ => {
            node.fields.insert(attribute_code, value);
        }
    }
}

fn value_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}
