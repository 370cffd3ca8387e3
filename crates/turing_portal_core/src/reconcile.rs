//! crates/turing_portal_core/src/reconcile.rs
//!
//! Merges the backend's dataset list with locally optimistic placeholders.

use std::collections::HashSet;

use crate::domain::ProjectDataset;

/// Maximum drift, in milliseconds, between a placeholder and the confirmed
/// record that supersedes it.
pub const MATCH_TOLERANCE_MS: i64 = 10_000;

/// True when `remote` is the confirmed counterpart of `placeholder`.
pub fn supersedes(remote: &ProjectDataset, placeholder: &ProjectDataset) -> bool {
    remote.filename == placeholder.filename
        && remote.size == placeholder.size
        && (remote.uploaded_at - placeholder.uploaded_at)
            .num_milliseconds()
            .abs()
            <= MATCH_TOLERANCE_MS
}

/// Remote records first, in their original order, then every optimistic
/// placeholder without a confirmed counterpart. Ids in `pending_delete_ids`
/// are dropped from both sides. Entries in `optimistic` that lack the
/// optimistic id prefix are ignored.
pub fn reconcile_datasets(
    remote: &[ProjectDataset],
    optimistic: &[ProjectDataset],
    pending_delete_ids: &HashSet<String>,
) -> Vec<ProjectDataset> {
    let visible_remote: Vec<&ProjectDataset> = remote
        .iter()
        .filter(|d| !pending_delete_ids.contains(&d.id))
        .collect();

    let unmatched = optimistic
        .iter()
        .filter(|p| p.is_optimistic())
        .filter(|p| !pending_delete_ids.contains(&p.id))
        .filter(|p| !visible_remote.iter().any(|r| supersedes(r, p)));

    visible_remote
        .iter()
        .map(|d| (*d).clone())
        .chain(unmatched.cloned())
        .collect()
}
