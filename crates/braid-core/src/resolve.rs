//! Conflict resolver: classifies a (local, remote) pair of histories.
//!
//! Given one session's local messages (authoritative) and a candidate
//! remote set for that session, decides whether the remote is identical,
//! a pure extension (fast-forward), or a true divergence, and emits the
//! minimal edit plan the sync engine materializes.
//!
//! The algorithm mirrors a version-control merge performed automatically:
//!
//! 1. Drop remote candidates that already exist locally by id, or that
//!    duplicate an existing sibling (local or already-accepted remote)
//!    within the dedupe window — this makes the merge idempotent under
//!    retried pushes.
//! 2. Nothing left → [`Resolution::NoChange`].
//! 3. No local history → [`Resolution::FastForward`] of everything.
//! 4. Remote head descends from local head → fast-forward along the path.
//! 5. Local head descends from remote head → stale remote prefix, no-op.
//! 6. Otherwise find the common ancestor and emit [`Resolution::Branch`].
//!
//! Path reconstruction can fail on malformed input (missing intermediate,
//! no common ancestor). The fallback is a full resend of the respective
//! set in total order — an empty-but-expected path triggers the fallback
//! and is never collapsed to `NoChange`. Ancestor searches are unbounded
//! in depth but cycle-guarded, so cyclic input degrades to "no common
//! ancestor" rather than looping.

use std::collections::HashSet;

use crate::dag::{MessageIndex, heads, is_ancestor, is_duplicate};
use crate::ids::MessageId;
use crate::types::{Message, order_key, sort_by_order};

/// Outcome of resolving one session's local history against a remote set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Histories are identical (or remote is a stale prefix).
    NoChange,
    /// Remote strictly extends local history; append in place.
    FastForward {
        /// New messages to append, parent-first.
        to_append: Vec<Message>,
    },
    /// Histories diverge from a shared ancestor.
    Branch {
        /// The divergence point, if one was found. `None` means the
        /// histories share no reconstructable ancestor.
        from_ancestor_id: Option<MessageId>,
        /// Remote continuation to append to the original session.
        to_append: Vec<Message>,
        /// Diverging local-only messages to move into the new branch.
        to_branch: Vec<Message>,
    },
}

/// Resolve one session's `local` history against a candidate `remote` set.
///
/// `local` is authoritative; `dedupe_window` bounds the logical-time
/// distance at which same-signature siblings collapse (see
/// [`is_duplicate`]).
#[must_use]
pub fn resolve(local: &[Message], remote: &[Message], dedupe_window: i64) -> Resolution {
    let filtered = filter_remote(local, remote, dedupe_window);
    if filtered.is_empty() {
        return Resolution::NoChange;
    }
    if local.is_empty() {
        // First hydration: everything appends.
        let mut to_append = filtered;
        sort_by_order(&mut to_append);
        return Resolution::FastForward { to_append };
    }

    let local_head = match heads(local).last() {
        Some(head) => (*head).clone(),
        // Local non-empty but fully cyclic: no reconstructable history.
        None => return full_resend(None, local, &filtered),
    };
    let remote_head = match heads(&filtered).last() {
        Some(head) => (*head).clone(),
        None => return full_resend(None, local, &filtered),
    };

    // Ancestry is judged over the union of both sets: a remote message may
    // hang off a local parent and vice versa.
    let index = MessageIndex::build(local.iter().chain(filtered.iter()));
    let filtered_ids: HashSet<&str> = filtered.iter().map(|m| m.id.as_str()).collect();

    if is_ancestor(&local_head.id, &remote_head.id, &index) {
        // Path strictly after local head, up to and including remote head,
        // restricted to messages we actually received.
        let to_append = path_between(&remote_head.id, Some(&local_head.id), &index)
            .map(|path| restrict(path, &filtered_ids))
            .unwrap_or_else(|| in_total_order(&filtered));
        return Resolution::FastForward { to_append };
    }

    if is_ancestor(&remote_head.id, &local_head.id, &index) {
        // Remote is a stale prefix of local history.
        return Resolution::NoChange;
    }

    // True divergence: walk up from the remote head until we hit an
    // ancestor of the local head, or exhaust (independent histories).
    let local_ancestors = ancestor_set(&local_head.id, &index);
    let ancestor = find_common_ancestor(&remote_head.id, &local_ancestors, &index);

    let to_append = ancestor
        .as_ref()
        .and_then(|a| path_between(&remote_head.id, Some(a), &index))
        .map(|path| restrict(path, &filtered_ids))
        .filter(|path| !path.is_empty())
        .unwrap_or_else(|| in_total_order(&filtered));

    let local_ids: HashSet<&str> = local.iter().map(|m| m.id.as_str()).collect();
    let to_branch = ancestor
        .as_ref()
        .and_then(|a| path_between(&local_head.id, Some(a), &index))
        .map(|path| restrict(path, &local_ids))
        .filter(|path| !path.is_empty())
        .unwrap_or_else(|| in_total_order(local));

    Resolution::Branch {
        from_ancestor_id: ancestor,
        to_append,
        to_branch,
    }
}

/// Step 1: drop remote candidates already present locally by id, or that
/// duplicate a sibling among local messages or previously-accepted remote
/// messages in this pass.
fn filter_remote(local: &[Message], remote: &[Message], window: i64) -> Vec<Message> {
    let local_ids: HashSet<&str> = local.iter().map(|m| m.id.as_str()).collect();

    let mut candidates: Vec<&Message> = remote
        .iter()
        .filter(|m| !local_ids.contains(m.id.as_str()))
        .collect();
    candidates.sort_by(|a, b| order_key(a).cmp(&order_key(b)));

    let mut accepted: Vec<Message> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let siblings = local
            .iter()
            .chain(accepted.iter())
            .filter(|m| m.parent_id == candidate.parent_id);
        if !is_duplicate(candidate, siblings, window) {
            accepted.push(candidate.clone());
        }
    }
    accepted
}

/// Ids reachable walking up from `start` (inclusive), cycle-guarded.
fn ancestor_set(start: &MessageId, index: &MessageIndex<'_>) -> HashSet<MessageId> {
    let mut seen: HashSet<MessageId> = HashSet::new();
    let mut cursor = Some(start.clone());
    while let Some(id) = cursor {
        if !seen.insert(id.clone()) {
            break;
        }
        cursor = index.get(&id).and_then(|m| m.parent_id.clone());
    }
    seen
}

/// Walk up from `start` until hitting an id in `targets`. Returns `None`
/// when the walk exhausts or cycles first.
fn find_common_ancestor(
    start: &MessageId,
    targets: &HashSet<MessageId>,
    index: &MessageIndex<'_>,
) -> Option<MessageId> {
    let mut visited: HashSet<MessageId> = HashSet::new();
    let mut cursor = Some(start.clone());
    while let Some(id) = cursor {
        if targets.contains(&id) {
            return Some(id);
        }
        if !visited.insert(id.clone()) {
            return None;
        }
        cursor = index.get(&id).and_then(|m| m.parent_id.clone());
    }
    None
}

/// Root-to-tip path ending at `head` (inclusive), starting strictly after
/// `stop` when given. Returns `None` when `stop` is set but an
/// intermediate is missing from the index or a cycle is hit before
/// reaching it — the unreconstructable-path case.
fn path_between(
    head: &MessageId,
    stop: Option<&MessageId>,
    index: &MessageIndex<'_>,
) -> Option<Vec<Message>> {
    let mut path: Vec<Message> = Vec::new();
    let mut visited: HashSet<MessageId> = HashSet::new();
    let mut cursor = Some(head.clone());
    while let Some(id) = cursor {
        if stop.is_some_and(|s| *s == id) {
            path.reverse();
            return Some(path);
        }
        if !visited.insert(id.clone()) {
            return None;
        }
        let Some(message) = index.get(&id) else {
            // Missing intermediate: reconstructable only if we weren't
            // required to reach a stop node.
            return None;
        };
        path.push(message.clone());
        cursor = message.parent_id.clone();
    }
    if stop.is_some() {
        return None;
    }
    path.reverse();
    Some(path)
}

fn restrict(path: Vec<Message>, keep: &HashSet<&str>) -> Vec<Message> {
    path.into_iter()
        .filter(|m| keep.contains(m.id.as_str()))
        .collect()
}

fn in_total_order(messages: &[Message]) -> Vec<Message> {
    let mut out = messages.to_vec();
    sort_by_order(&mut out);
    out
}

fn full_resend(
    ancestor: Option<MessageId>,
    local: &[Message],
    filtered: &[Message],
) -> Resolution {
    Resolution::Branch {
        from_ancestor_id: ancestor,
        to_append: in_total_order(filtered),
        to_branch: in_total_order(local),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
