//! Recursive walk over a category subtree, planning one enrichment per node.
//!
//! The walk is pure: it only records which node to fetch and where that node
//! sits in the tree. Running the fetches and waiting for them is left to the
//! orchestrator.

use tracing::debug;

use catalogsync_shared::{CategoryId, CategoryNode};

/// One planned per-node enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentTask {
    /// Category to fetch.
    pub id: CategoryId,
    /// Child indexes leading from the root's `children` to the node.
    pub path: Vec<usize>,
}

/// Append a task for every node in `children`, at any depth, to
/// `accumulator`.
///
/// A child's descendants are planned before the child itself. Nodes whose
/// `children` is absent or empty are not descended into. Trees are assumed
/// acyclic, which owned [`CategoryNode`] trees always are.
pub fn extend_children(
    root_id: &CategoryId,
    children: &[CategoryNode],
    accumulator: &mut Vec<EnrichmentTask>,
) {
    let mut path = Vec::new();
    walk(root_id, children, &mut path, accumulator);
}

fn walk(
    root_id: &CategoryId,
    children: &[CategoryNode],
    path: &mut Vec<usize>,
    accumulator: &mut Vec<EnrichmentTask>,
) {
    for (index, child) in children.iter().enumerate() {
        path.push(index);
        debug!(
            %root_id,
            category_id = %child.id,
            name = child.name.as_deref().unwrap_or(""),
            "extending child category"
        );

        if let Some(grandchildren) = child.children.as_deref().filter(|c| !c.is_empty()) {
            walk(root_id, grandchildren, path, accumulator);
        }
        accumulator.push(EnrichmentTask {
            id: child.id.clone(),
            path: path.clone(),
        });

        path.pop();
    }
}

/// Resolve a task path against the children it was planned from.
pub fn locate_mut<'t>(
    children: &'t mut [CategoryNode],
    path: &[usize],
) -> Option<&'t mut CategoryNode> {
    let (first, rest) = path.split_first()?;
    let node = children.get_mut(*first)?;
    if rest.is_empty() {
        Some(node)
    } else {
        locate_mut(node.children.as_deref_mut()?, rest)
    }
}
