//! URL-safe identifiers derived from display names.

use catalogsync_shared::CategoryId;

/// Generate a URL-safe slug from a display name.
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Unique url key: `<slug>-<id>`, or just the id when the name has no
/// sluggable characters.
pub fn url_key_for(name: &str, id: &CategoryId) -> String {
    let slug = slugify(name);
    if slug.is_empty() {
        id.to_string()
    } else {
        format!("{slug}-{id}")
    }
}
