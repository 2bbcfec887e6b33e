//! Merging server-confirmed messages into a chat's cached list.
//!
//! Live broadcasts, send acknowledgments and resync pages all go through
//! [`merge_confirmed`]. Applying the same confirmed message any number of
//! times leaves the list exactly as after the first application.
//!
//! The content heuristic is a fallback for confirmations that arrive
//! without a usable temp id (resync pages, reconnect races). When a user
//! sends identical content twice in quick succession it can pair a
//! confirmation with the wrong optimistic entry and remove the other one as
//! a ghost; the later acknowledgment for that send re-inserts it.

use chatwave_shared::models::Message;
use chatwave_shared::status::{DeliveryState, FailureReason, MessageStatus};
use chatwave_shared::types::{MessageId, TempId};

use crate::entry::{CacheEntry, CachedMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The server id was already cached; only its status may have moved.
    AlreadyPresent { status_advanced: bool },
    /// An optimistic entry with the same temp id was replaced.
    ReplacedTemp,
    /// An optimistic entry matched on content and was replaced.
    ReplacedByContent { ghosts_removed: Vec<TempId> },
    /// Nothing matched; the message was inserted in order.
    Inserted,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !matches!(
            self,
            MergeOutcome::AlreadyPresent {
                status_advanced: false
            }
        )
    }
}

/// Merge one confirmed message into `entry`.
pub fn merge_confirmed(
    entry: &mut CacheEntry,
    temp_id: Option<&TempId>,
    confirmed: &Message,
) -> MergeOutcome {
    // 1. Already have the server id: advance status, drop stale optimistic copy.
    if let Some(pos) = entry
        .messages
        .iter()
        .position(|m| m.server_id == Some(confirmed.id))
    {
        let status_advanced = entry.messages[pos].advance(confirmed.status);
        let before = entry.messages.len();
        if let Some(temp) = temp_id {
            entry
                .messages
                .retain(|m| !(m.server_id.is_none() && m.has_temp_id(temp)));
        }
        let dropped = before != entry.messages.len();
        return MergeOutcome::AlreadyPresent {
            status_advanced: status_advanced || dropped,
        };
    }

    // 2. Exact temp id.
    if let Some(temp) = temp_id {
        if let Some(pos) = entry
            .messages
            .iter()
            .position(|m| m.server_id.is_none() && m.has_temp_id(temp))
        {
            entry.messages[pos] = CachedMessage::confirmed(confirmed, Some(temp.clone()));
            entry.sort();
            return MergeOutcome::ReplacedTemp;
        }
    }

    // 3. Content heuristic.
    let candidates: Vec<usize> = entry
        .messages
        .iter()
        .enumerate()
        .filter(|(_, m)| {
            m.may_be_stored()
                && m.chat_id == confirmed.chat_id
                && m.sender_id == confirmed.sender_id
                && m.payload == confirmed.payload
        })
        .map(|(i, _)| i)
        .collect();

    if let Some((&first, rest)) = candidates.split_first() {
        let kept_temp = entry.messages[first].temp_id.clone();
        entry.messages[first] = CachedMessage::confirmed(confirmed, kept_temp);

        let ghosts_removed: Vec<TempId> = rest
            .iter()
            .filter_map(|&i| entry.messages[i].temp_id.clone())
            .collect();
        let mut index = 0;
        entry.messages.retain(|_| {
            let keep = !rest.contains(&index);
            index += 1;
            keep
        });
        entry.sort();
        return MergeOutcome::ReplacedByContent { ghosts_removed };
    }

    // 4. Unknown: insert in order.
    entry
        .messages
        .push(CachedMessage::confirmed(confirmed, temp_id.cloned()));
    entry.sort();
    MergeOutcome::Inserted
}

/// Apply a broadcast status change. Returns `true` if anything moved.
pub fn apply_status(entry: &mut CacheEntry, message_id: MessageId, status: MessageStatus) -> bool {
    entry
        .messages
        .iter_mut()
        .find(|m| m.server_id == Some(message_id))
        .is_some_and(|m| m.advance(status))
}

/// Flag an optimistic entry as failed. Confirmed entries are never
/// downgraded. Returns `false` if no unconfirmed entry has `temp_id`.
pub fn mark_failed(entry: &mut CacheEntry, temp_id: &TempId, reason: FailureReason) -> bool {
    match entry
        .messages
        .iter_mut()
        .find(|m| m.server_id.is_none() && m.has_temp_id(temp_id))
    {
        Some(m) => {
            m.state = DeliveryState::Failed(reason);
            true
        }
        None => false,
    }
}
