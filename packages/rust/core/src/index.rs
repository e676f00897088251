//! Elasticsearch bulk-API rendering of synced categories.

use serde_json::json;

use catalogsync_shared::{CatalogSyncError, CategoryNode, Result};

/// Document type written into each bulk action line.
pub const DOCUMENT_TYPE: &str = "category";

/// Render `categories` as a newline-delimited bulk request body.
///
/// Each category yields an `index` action line followed by the document
/// itself. Every line, the last included, ends with `\n` as the bulk
/// endpoint requires.
pub fn bulk_body(index_name: &str, categories: &[CategoryNode]) -> Result<String> {
    let mut body = String::new();
    for category in categories {
        let action = json!({
            "index": {
                "_index": index_name,
                "_type": DOCUMENT_TYPE,
                "_id": category.id,
            }
        });
        let document = serde_json::to_string(category).map_err(|e| {
            CatalogSyncError::parse(format!("cannot serialize {}: {e}", category.label()))
        })?;
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&document);
        body.push('\n');
    }
    Ok(body)
}
