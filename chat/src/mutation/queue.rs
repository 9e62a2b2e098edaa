//! Registry of in-flight mutations.

use super::{
    AppliedEffect, MutationId, MutationKind, MutationRequest, MutationResponse, PendingMutation,
    Reconciliation,
};
use crate::conversations::ConversationListStore;
use crate::error::{ChatError, Result};
use crate::thread::{InFlightEffects, MessageThreadStore};
use squadlink_messaging::{ConversationId, Message, MessageId, OutgoingMessage, Participant, UserId};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Applies local effects and tracks the mutations awaiting a server answer.
///
/// At most one mutation per (message, kind) may be in flight; a second one is
/// refused with [`ChatError::MutationInFlight`] rather than raced.
#[derive(Debug, Default)]
pub struct MutationQueue {
    next_id: u64,
    in_flight: HashMap<MutationId, PendingMutation>,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending message and stage the request that confirms it.
    pub fn begin_send(
        &mut self,
        threads: &mut MessageThreadStore,
        conversations: &mut ConversationListStore,
        conversation_id: &ConversationId,
        sender: Participant,
        outgoing: OutgoingMessage,
    ) -> Result<(MutationId, MessageId, MutationRequest)> {
        let outgoing = outgoing.normalized();
        if outgoing.is_empty() {
            return Err(ChatError::validation("message needs text or an attachment"));
        }
        if outgoing.image.is_some() && outgoing.file.is_some() {
            return Err(ChatError::validation("a message carries one attachment at most"));
        }
        if let Some(parent_id) = &outgoing.parent_id {
            let parent = threads
                .find(conversation_id, parent_id)
                .ok_or_else(|| ChatError::NotFound(format!("reply target {parent_id}")))?;
            if parent.is_pending() {
                return Err(ChatError::validation("cannot reply to an unsent message"));
            }
        }

        let pending = Message::pending(
            conversation_id.clone(),
            sender,
            outgoing.content.clone(),
            outgoing.attachment(),
            outgoing.parent_id.clone(),
        );
        let pending_id = pending.id.clone();
        let preview = conversations.record_message(&pending);
        threads.append(pending);

        let id = self.register(
            MutationKind::Send,
            conversation_id,
            pending_id.clone(),
            AppliedEffect::Send {
                parent_id: outgoing.parent_id.clone(),
                preview,
            },
        );
        let request = MutationRequest::Send {
            conversation_id: conversation_id.clone(),
            outgoing,
        };
        Ok((id, pending_id, request))
    }

    /// Stage an edit. Nothing changes locally until the server confirms.
    pub fn begin_edit(
        &mut self,
        threads: &MessageThreadStore,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        editor: &UserId,
        content: &str,
    ) -> Result<(MutationId, MutationRequest)> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::validation("edited message cannot be empty"));
        }
        let message = self.confirmed_target(threads, conversation_id, message_id)?;
        if !message.is_from(editor) {
            return Err(ChatError::validation("only the sender can edit a message"));
        }
        self.ensure_idle(message_id, MutationKind::Edit)?;

        let id = self.register(
            MutationKind::Edit,
            conversation_id,
            message_id.clone(),
            AppliedEffect::Edit,
        );
        let request = MutationRequest::Edit {
            message_id: message_id.clone(),
            content: content.to_string(),
        };
        Ok((id, request))
    }

    /// Remove the message right away and stage the delete.
    pub fn begin_delete(
        &mut self,
        threads: &mut MessageThreadStore,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<(MutationId, MutationRequest)> {
        self.confirmed_target(threads, conversation_id, message_id)?;
        self.ensure_idle(message_id, MutationKind::Delete)?;

        let removed = threads
            .remove(conversation_id, message_id)
            .ok_or_else(|| ChatError::NotFound(format!("message {message_id}")))?;
        let id = self.register(
            MutationKind::Delete,
            conversation_id,
            message_id.clone(),
            AppliedEffect::Delete { removed },
        );
        Ok((id, MutationRequest::Delete {
            message_id: message_id.clone(),
        }))
    }

    /// Set the user's reaction right away and stage the request.
    pub fn begin_react(
        &mut self,
        threads: &mut MessageThreadStore,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        user: &UserId,
        emoji: &str,
    ) -> Result<(MutationId, MutationRequest)> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(ChatError::validation("reaction cannot be empty"));
        }
        self.confirmed_target(threads, conversation_id, message_id)?;
        self.ensure_idle(message_id, MutationKind::React)?;

        let mut previous = None;
        threads.update(conversation_id, message_id, |message| {
            previous = message.react(user.clone(), emoji);
        });
        let id = self.register(
            MutationKind::React,
            conversation_id,
            message_id.clone(),
            AppliedEffect::React {
                user: user.clone(),
                emoji: emoji.to_string(),
                previous,
            },
        );
        Ok((id, MutationRequest::React {
            message_id: message_id.clone(),
            emoji: emoji.to_string(),
        }))
    }

    /// Apply the server's answer to a mutation.
    ///
    /// Returns `None` for ids that are not in flight (already completed).
    pub fn complete(
        &mut self,
        id: MutationId,
        result: Result<MutationResponse>,
        threads: &mut MessageThreadStore,
        conversations: &mut ConversationListStore,
    ) -> Option<Reconciliation> {
        let Some(mutation) = self.in_flight.remove(&id) else {
            warn!(?id, "completion for unknown mutation");
            return None;
        };
        let kind = mutation.kind;
        let conversation_id = mutation.conversation_id.clone();

        let reconciliation = match result {
            Ok(response) => mutation.confirm(response, threads, conversations),
            Err(err) if err.is_benign_for(kind) => {
                debug!(%conversation_id, ?kind, %err, "target already gone; treating as done");
                mutation.converge(threads)
            }
            Err(err) => {
                warn!(%conversation_id, ?kind, %err, "mutation failed; rolling back");
                mutation.rollback(err, threads, conversations)
            }
        };
        Some(reconciliation)
    }

    pub fn is_in_flight(&self, message_id: &MessageId, kind: MutationKind) -> bool {
        self.in_flight
            .values()
            .any(|m| m.kind == kind && &m.target == message_id)
    }

    pub fn has_in_flight(&self, kind: MutationKind) -> bool {
        self.in_flight.values().any(|m| m.kind == kind)
    }

    /// Messages with an edit awaiting confirmation.
    pub fn editing(&self) -> Vec<MessageId> {
        let mut editing: Vec<(MutationId, MessageId)> = self
            .in_flight
            .values()
            .filter(|m| m.kind == MutationKind::Edit)
            .map(|m| (m.id, m.target.clone()))
            .collect();
        editing.sort_by_key(|(id, _)| *id);
        editing.into_iter().map(|(_, target)| target).collect()
    }

    /// Conversations that still expect reconciliation.
    pub fn conversations(&self) -> Vec<ConversationId> {
        let mut ids: Vec<ConversationId> = self
            .in_flight
            .values()
            .map(|m| m.conversation_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Deletes and reactions in `conversation_id` still awaiting an answer,
    /// oldest first, for a refetch of that thread to keep.
    pub fn effects_in(&self, conversation_id: &ConversationId) -> InFlightEffects {
        let mut pending: Vec<&PendingMutation> = self
            .in_flight
            .values()
            .filter(|m| &m.conversation_id == conversation_id)
            .collect();
        pending.sort_by_key(|m| m.id);
        let mut effects = InFlightEffects::default();
        for mutation in pending {
            mutation.carry_into(&mut effects);
        }
        effects
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    fn confirmed_target<'a>(
        &self,
        threads: &'a MessageThreadStore,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<&'a Message> {
        if message_id.is_pending() {
            return Err(ChatError::validation("message has not been sent yet"));
        }
        threads
            .find(conversation_id, message_id)
            .ok_or_else(|| ChatError::NotFound(format!("message {message_id}")))
    }

    fn ensure_idle(&self, message_id: &MessageId, kind: MutationKind) -> Result<()> {
        if self.is_in_flight(message_id, kind) {
            return Err(ChatError::MutationInFlight {
                message_id: message_id.clone(),
                kind,
            });
        }
        Ok(())
    }

    fn register(
        &mut self,
        kind: MutationKind,
        conversation_id: &ConversationId,
        target: MessageId,
        effect: AppliedEffect,
    ) -> MutationId {
        self.next_id += 1;
        let id = MutationId(self.next_id);
        debug!(?id, ?kind, %conversation_id, %target, "mutation applied locally");
        self.in_flight.insert(
            id,
            PendingMutation {
                id,
                kind,
                conversation_id: conversation_id.clone(),
                target,
                effect,
            },
        );
        id
    }
}
