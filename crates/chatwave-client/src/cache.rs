//! In-memory chat cache.
//!
//! One slot per chat, each behind its own lock so mutations of a chat are
//! serialized while different chats proceed independently. The slot map is
//! bounded; the least recently used chat is evicted (closed chats first)
//! together with its mirror row.
//!
//! Reads never touch the network or the disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use chatwave_shared::models::{ChatSummary, Cursor, Message, Payload};
use chatwave_shared::status::{DeliveryState, FailureReason, MessageStatus};
use chatwave_shared::types::{ChatId, MessageId, TempId, UserId};

use crate::entry::{CacheEntry, CachedMessage, ChatMeta, PresenceInfo};
use crate::mirror::MirrorWriter;
use crate::reconcile::{self, MergeOutcome};

type Slot = Arc<Mutex<CacheEntry>>;

pub struct ClientCache {
    slots: Mutex<HashMap<ChatId, Slot>>,
    capacity: usize,
    clock: AtomicU64,
    mirror: Option<MirrorWriter>,
}

impl ClientCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
            mirror: None,
        }
    }

    pub fn with_mirror(mut self, mirror: MirrorWriter) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn mirror(&self) -> Option<&MirrorWriter> {
        self.mirror.as_ref()
    }

    // -----------------------------------------------------------------------
    // Slot management
    // -----------------------------------------------------------------------

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn existing(&self, chat_id: &ChatId) -> Option<Slot> {
        self.slots.lock().get(chat_id).cloned()
    }

    /// Fetch or create the slot for `chat_id`, evicting if over capacity.
    ///
    /// Chats holding unconfirmed messages are never chosen; the map grows
    /// past capacity instead.
    fn slot(&self, chat_id: ChatId) -> Slot {
        let (slot, evicted) = {
            let mut slots = self.slots.lock();
            if let Some(slot) = slots.get(&chat_id) {
                return slot.clone();
            }
            let slot: Slot = Arc::new(Mutex::new(CacheEntry::default()));
            slots.insert(chat_id, slot.clone());
            let evicted = if slots.len() > self.capacity {
                Self::pick_victim(&slots, chat_id).and_then(|victim| {
                    let removed = slots.remove(&victim)?;
                    removed.lock().detached = true;
                    Some(victim)
                })
            } else {
                None
            };
            (slot, evicted)
        };

        if let Some(victim) = evicted {
            info!(chat = %victim, "Evicted chat from cache");
            if let Some(mirror) = &self.mirror {
                mirror.delete(victim);
            }
        } else if self.slots.lock().len() > self.capacity {
            debug!(chat = %chat_id, "Cache over capacity, remaining chats hold unconfirmed messages");
        }
        slot
    }

    fn pick_victim(slots: &HashMap<ChatId, Slot>, keep: ChatId) -> Option<ChatId> {
        slots
            .iter()
            .filter(|(id, _)| **id != keep)
            .filter_map(|(id, slot)| {
                let entry = slot.lock();
                (!entry.has_unconfirmed()).then_some((entry.open, entry.last_used, *id))
            })
            .min()
            .map(|(_, _, id)| id)
    }

    fn persist(&self, chat_id: ChatId, entry: &CacheEntry) {
        if let Some(mirror) = &self.mirror {
            mirror.save(chat_id, entry);
        }
    }

    /// Run `f` on the chat's entry under its slot lock, then mirror it.
    fn mutate<T>(&self, chat_id: ChatId, f: impl FnOnce(&mut CacheEntry) -> T) -> T {
        loop {
            let slot = self.slot(chat_id);
            let mut entry = slot.lock();
            // Evicted between lookup and lock: retry on the live slot.
            if entry.detached {
                continue;
            }
            entry.last_used = self.tick();
            let out = f(&mut entry);
            self.persist(chat_id, &entry);
            return out;
        }
    }

    /// Like [`mutate`](Self::mutate) but only for chats already cached.
    fn mutate_existing<T>(
        &self,
        chat_id: ChatId,
        f: impl FnOnce(&mut CacheEntry) -> Option<T>,
    ) -> Option<T> {
        let slot = self.existing(&chat_id)?;
        let mut entry = slot.lock();
        if entry.detached {
            return None;
        }
        entry.last_used = self.tick();
        let out = f(&mut entry)?;
        self.persist(chat_id, &entry);
        Some(out)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Cached messages of a chat in display order. Empty if not cached.
    pub fn get_messages(&self, chat_id: ChatId) -> Vec<CachedMessage> {
        match self.existing(&chat_id) {
            Some(slot) => {
                let now = self.tick();
                let mut entry = slot.lock();
                entry.last_used = now;
                entry.messages.clone()
            }
            None => Vec::new(),
        }
    }

    /// Time since the chat was last synced. `None` if never synced or not
    /// cached, which callers treat as stale.
    pub fn age(&self, chat_id: ChatId) -> Option<Duration> {
        let slot = self.existing(&chat_id)?;
        let synced_at = slot.lock().synced_at?;
        Some((Utc::now() - synced_at).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn last_cursor(&self, chat_id: ChatId) -> Option<Cursor> {
        self.existing(&chat_id)?.lock().last_cursor()
    }

    pub fn open_chats(&self) -> Vec<ChatId> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.lock().open)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn contains(&self, chat_id: &ChatId) -> bool {
        self.slots.lock().contains_key(chat_id)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn meta(&self, chat_id: ChatId) -> Option<ChatMeta> {
        self.existing(&chat_id)?.lock().meta.clone()
    }

    /// Whether any entry of the chat, confirmed or not, carries `temp_id`.
    pub fn carries_temp(&self, chat_id: ChatId, temp_id: &TempId) -> bool {
        self.existing(&chat_id)
            .is_some_and(|slot| slot.lock().position_of_temp(temp_id).is_some())
    }

    /// Find the chat holding an unconfirmed entry with `temp_id`.
    pub fn locate_temp(&self, temp_id: &TempId) -> Option<(ChatId, CachedMessage)> {
        let slots: Vec<(ChatId, Slot)> = self
            .slots
            .lock()
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();
        slots.into_iter().find_map(|(id, slot)| {
            let entry = slot.lock();
            entry
                .position_of_unconfirmed(temp_id)
                .map(|pos| (id, entry.messages[pos].clone()))
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Mark a chat open, creating its slot and seeding it from the mirror
    /// if it was not cached.
    pub async fn open_chat(&self, chat_id: ChatId) -> Vec<CachedMessage> {
        let fresh = !self.contains(&chat_id);
        let mut restored = match (&self.mirror, fresh) {
            (Some(mirror), true) => mirror.load(chat_id).await,
            _ => None,
        };

        self.mutate(chat_id, |entry| {
            if let Some(snapshot) = restored.take() {
                if entry.messages.is_empty() {
                    debug!(chat = %chat_id, count = snapshot.messages.len(), "Restored chat from mirror");
                    entry.messages = snapshot.messages;
                    entry.synced_at = snapshot.synced_at;
                    entry.sort();
                }
                if entry.meta.is_none() {
                    entry.meta = snapshot.meta;
                }
            }
            entry.open = true;
            entry.messages.clone()
        })
    }

    pub fn close_chat(&self, chat_id: ChatId) {
        if let Some(slot) = self.existing(&chat_id) {
            slot.lock().open = false;
        }
    }

    /// Drop a chat from memory and from the mirror, unconfirmed messages
    /// included. Sends still pending for it are rebuilt from their pending
    /// record if they fail.
    pub fn evict(&self, chat_id: ChatId) -> bool {
        let removed = self.slots.lock().remove(&chat_id);
        match removed {
            Some(slot) => {
                slot.lock().detached = true;
                if let Some(mirror) = &self.mirror {
                    mirror.delete(chat_id);
                }
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Append a locally-created message in state `Sending`.
    pub fn add_optimistic(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        payload: Payload,
        temp_id: TempId,
    ) -> CachedMessage {
        let message = CachedMessage::optimistic(chat_id, sender_id, payload, temp_id);
        self.mutate(chat_id, |entry| {
            entry.messages.push(message.clone());
            entry.sort();
        });
        message
    }

    /// Merge a confirmed message. See [`reconcile::merge_confirmed`].
    pub fn reconcile(
        &self,
        chat_id: ChatId,
        temp_id: Option<&TempId>,
        confirmed: &Message,
    ) -> MergeOutcome {
        self.mutate(chat_id, |entry| {
            reconcile::merge_confirmed(entry, temp_id, confirmed)
        })
    }

    pub fn apply_status(&self, chat_id: ChatId, message_id: MessageId, status: MessageStatus) -> bool {
        self.mutate_existing(chat_id, |entry| {
            reconcile::apply_status(entry, message_id, status).then_some(())
        })
        .is_some()
    }

    pub fn mark_failed(&self, chat_id: ChatId, temp_id: &TempId, reason: FailureReason) -> bool {
        self.mutate_existing(chat_id, |entry| {
            reconcile::mark_failed(entry, temp_id, reason).then_some(())
        })
        .is_some()
    }

    /// Put back an unconfirmed message that reconciliation removed as a
    /// ghost or paired with the wrong confirmation.
    pub fn restore(&self, message: CachedMessage) {
        self.mutate(message.chat_id, |entry| {
            let duplicate = message
                .temp_id
                .as_ref()
                .is_some_and(|t| entry.position_of_unconfirmed(t).is_some());
            if !duplicate {
                entry.messages.push(message);
                entry.sort();
            }
        });
    }

    /// Move a failed entry to a fresh temp id and back to `Sending` so it
    /// can be sent again. Returns the updated entry.
    pub fn reissue(
        &self,
        chat_id: ChatId,
        old_temp: &TempId,
        new_temp: TempId,
    ) -> Option<CachedMessage> {
        self.mutate_existing(chat_id, |entry| {
            let pos = entry.position_of_unconfirmed(old_temp)?;
            let message = &mut entry.messages[pos];
            if !matches!(message.state, DeliveryState::Failed(_)) {
                return None;
            }
            message.temp_id = Some(new_temp.clone());
            message.state = DeliveryState::Sending;
            message.created_at = Utc::now();
            entry.sort();
            let pos = entry.position_of_unconfirmed(&new_temp)?;
            Some(entry.messages[pos].clone())
        })
    }

    /// Store or refresh the chat's details.
    pub fn set_meta(&self, chat_id: ChatId, summary: &ChatSummary) {
        self.mutate(chat_id, |entry| match &mut entry.meta {
            Some(meta) => meta.refresh(summary),
            None => entry.meta = Some(ChatMeta::from_summary(summary)),
        });
    }

    /// Apply a presence change to every cached chat `user_id` belongs to.
    /// Returns the chats that changed.
    pub fn update_presence(&self, user_id: &UserId, presence: PresenceInfo) -> Vec<ChatId> {
        let slots: Vec<(ChatId, Slot)> = self
            .slots
            .lock()
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        let mut changed = Vec::new();
        for (chat_id, slot) in slots {
            let mut entry = slot.lock();
            if entry.detached {
                continue;
            }
            if entry
                .meta
                .as_mut()
                .is_some_and(|meta| meta.set_presence(user_id, presence))
            {
                self.persist(chat_id, &entry);
                changed.push(chat_id);
            }
        }
        changed
    }

    /// Record that the chat now matches the server.
    pub fn touch_synced(&self, chat_id: ChatId) {
        self.mutate(chat_id, |entry| entry.synced_at = Some(Utc::now()));
    }
}
