//! Pure DAG utilities over a message collection.
//!
//! Messages form a parent-pointer DAG (possibly crossing session
//! boundaries at branch points). These functions derive the structures the
//! resolver and sync engine need: a parent→children map, leaf ("head")
//! detection, ancestry queries, duplicate detection, and a parent-first
//! safe-send ordering.
//!
//! Remote input is untrusted: every walk over parent pointers carries an
//! explicit visited-set guard and degrades to "not an ancestor" on a
//! repeated id instead of looping. All walks are iterative.

use std::collections::{HashMap, HashSet};

use crate::ids::{AttachmentId, MessageId};
use crate::types::{Message, order_key};

/// Id-keyed view over one or more message sets, used for ancestry walks.
pub struct MessageIndex<'a> {
    by_id: HashMap<&'a str, &'a Message>,
}

impl<'a> MessageIndex<'a> {
    /// Build an index over the given messages. Later duplicates of an id
    /// are ignored; ids are globally unique by contract.
    pub fn build<I>(messages: I) -> Self
    where
        I: IntoIterator<Item = &'a Message>,
    {
        let mut by_id = HashMap::new();
        for m in messages {
            let _ = by_id.entry(m.id.as_str()).or_insert(m);
        }
        Self { by_id }
    }

    /// Look a message up by id.
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&'a Message> {
        self.by_id.get(id.as_str()).copied()
    }

    /// Whether the index contains the id.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.by_id.contains_key(id.as_str())
    }
}

/// Group messages by `parent_id`, each bucket sorted by total order.
///
/// The `None` bucket holds branch roots.
#[must_use]
pub fn children_map(messages: &[Message]) -> HashMap<Option<MessageId>, Vec<&Message>> {
    let mut map: HashMap<Option<MessageId>, Vec<&Message>> = HashMap::new();
    for m in messages {
        map.entry(m.parent_id.clone()).or_default().push(m);
    }
    for bucket in map.values_mut() {
        bucket.sort_by(|a, b| order_key(a).cmp(&order_key(b)));
    }
    map
}

/// Messages whose id never appears as another message's `parent_id`,
/// sorted by total order.
///
/// The branch's effective head is the last element. Empty input yields an
/// empty output.
#[must_use]
pub fn heads(messages: &[Message]) -> Vec<&Message> {
    let referenced: HashSet<&str> = messages
        .iter()
        .filter_map(|m| m.parent_id.as_ref().map(MessageId::as_str))
        .collect();
    let mut leaves: Vec<&Message> = messages
        .iter()
        .filter(|m| !referenced.contains(m.id.as_str()))
        .collect();
    leaves.sort_by(|a, b| order_key(a).cmp(&order_key(b)));
    leaves
}

/// Walk the parent chain from `descendant` looking for `ancestor`.
///
/// Reflexive: `is_ancestor(a, a)` is `true`. A repeated id (malformed
/// cyclic input) or a missing/null parent without a match returns `false`.
#[must_use]
pub fn is_ancestor(ancestor: &MessageId, descendant: &MessageId, index: &MessageIndex<'_>) -> bool {
    let mut visited: HashSet<MessageId> = HashSet::new();
    let mut cursor = descendant.clone();
    loop {
        if cursor == *ancestor {
            return true;
        }
        if !visited.insert(cursor.clone()) {
            return false;
        }
        match index.get(&cursor).and_then(|m| m.parent_id.clone()) {
            Some(parent) => cursor = parent,
            None => return false,
        }
    }
}

/// Whether `candidate` duplicates one of `siblings`.
///
/// A duplicate is a sibling with a *different* id sharing the signature
/// (sender, text, attachment-id set) whose `created_at` lies within
/// `window` of the candidate's. Exists so two devices composing "the same"
/// reply near-simultaneously collapse to one node instead of forking.
#[must_use]
pub fn is_duplicate<'a, I>(candidate: &Message, siblings: I, window: i64) -> bool
where
    I: IntoIterator<Item = &'a Message>,
{
    let candidate_atts = attachment_ids(candidate);
    siblings.into_iter().any(|sib| {
        sib.id != candidate.id
            && sib.sender == candidate.sender
            && sib.text == candidate.text
            && attachment_ids(sib) == candidate_atts
            && (sib.created_at - candidate.created_at).abs() <= window
    })
}

fn attachment_ids(message: &Message) -> HashSet<&AttachmentId> {
    message.attachments.iter().map(|a| &a.id).collect()
}

/// Collapse near-simultaneous duplicates within a sibling group.
///
/// Stable-sorts by total order, then greedily keeps a candidate only if it
/// does not duplicate an already-kept sibling.
#[must_use]
pub fn dedupe(children: &[Message], window: i64) -> Vec<Message> {
    let mut sorted: Vec<&Message> = children.iter().collect();
    sorted.sort_by(|a, b| order_key(a).cmp(&order_key(b)));

    let mut kept: Vec<Message> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        if !is_duplicate(candidate, kept.iter(), window) {
            kept.push(candidate.clone());
        }
    }
    kept
}

/// Parent-first ordering of `messages`, excluding blocked subtrees.
///
/// Guarantees a parent is always emitted before its children, so a remote
/// upsert never references a not-yet-durable parent. Any id in `blocked`
/// is skipped along with all of its transitive descendants — nothing that
/// implicitly depends on a pending resource is sent. Messages whose parent
/// lies outside `messages` count as roots (the parent is already durable
/// or lives in another session).
#[must_use]
pub fn sync_order<'a>(messages: &'a [Message], blocked: &HashSet<MessageId>) -> Vec<&'a Message> {
    let index = MessageIndex::build(messages.iter());
    let by_parent = children_map(messages);

    let mut roots: Vec<&Message> = messages
        .iter()
        .filter(|m| match &m.parent_id {
            None => true,
            Some(parent) => !index.contains(parent),
        })
        .collect();
    roots.sort_by(|a, b| order_key(a).cmp(&order_key(b)));

    let mut ordered = Vec::with_capacity(messages.len());
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&Message> = roots.into_iter().rev().collect();

    while let Some(m) = stack.pop() {
        if !visited.insert(m.id.as_str()) {
            continue;
        }
        if blocked.contains(&m.id) {
            // Skip the node; its subtree is only reachable through it.
            continue;
        }
        ordered.push(m);
        if let Some(children) = by_parent.get(&Some(m.id.clone())) {
            for child in children.iter().rev() {
                stack.push(child);
            }
        }
    }
    ordered
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
