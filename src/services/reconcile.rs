//! Merging server snapshots into locally held conversation state.

use std::collections::{HashMap, HashSet};

use crate::models::{Conversation, Message, DEFAULT_TITLE};

/// Merge a freshly fetched room list into the local conversations.
///
/// Rooms known locally keep their `messages` and `is_temp` (the room list
/// carries no messages); every other field comes from the server. Local
/// conversations the server does not know about are appended untouched.
pub fn reconcile(
    server_rooms: Vec<Conversation>,
    local: &[Conversation],
    requested_id: Option<&str>,
    previous_active: Option<&str>,
) -> (Vec<Conversation>, Option<String>) {
    let mut local_by_id: HashMap<&str, &Conversation> =
        local.iter().map(|c| (c.id.as_str(), c)).collect();
    let server_ids: HashSet<String> = server_rooms.iter().map(|c| c.id.clone()).collect();

    let mut merged: Vec<Conversation> = server_rooms
        .into_iter()
        .map(|room| match local_by_id.remove(room.id.as_str()) {
            Some(existing) => Conversation {
                messages: existing.messages.clone(),
                is_temp: existing.is_temp,
                ..room
            },
            None => room,
        })
        .collect();

    merged.extend(
        local
            .iter()
            .filter(|c| !server_ids.contains(&c.id))
            .cloned(),
    );

    let active = resolve_active_id(&merged, requested_id, previous_active);
    (merged, active)
}

/// Requested id, then the previously active id, then the first entry.
pub fn resolve_active_id(
    conversations: &[Conversation],
    requested_id: Option<&str>,
    previous_active: Option<&str>,
) -> Option<String> {
    let present = |id: &&str| conversations.iter().any(|c| c.id == *id);

    requested_id
        .filter(present)
        .or_else(|| previous_active.filter(present))
        .map(str::to_string)
        .or_else(|| conversations.first().map(|c| c.id.clone()))
}

/// State to keep after the room list could not be fetched: the current list
/// as is, or a single fresh conversation if there was nothing to keep.
pub fn recover_after_failure(local: &[Conversation]) -> Vec<Conversation> {
    if local.is_empty() {
        vec![Conversation::placeholder(DEFAULT_TITLE)]
    } else {
        local.to_vec()
    }
}

/// Whichever history is longer wins in full; on a tie the server copy wins.
///
/// This only guards a longer, still-streaming local history against a
/// shorter snapshot fetched concurrently. Messages are not matched by id, so
/// server-side edits or deletions can be lost while the local copy is longer.
pub fn merge_messages(local: Vec<Message>, server: Vec<Message>) -> Vec<Message> {
    if local.len() > server.len() {
        local
    } else {
        server
    }
}
