//! Local-first mutations of message state.
//!
//! Every send, edit, delete and reaction goes through three phases: its local
//! effect is applied to the stores right away (edits excepted), the matching
//! [`MutationRequest`] runs against the backend, and the outcome is fed back
//! to [`MutationQueue::complete`], which either reconciles the local state
//! with the server's answer or rolls the local effect back.

mod queue;

pub use queue::MutationQueue;

use crate::backend::ChatBackend;
use crate::conversations::{ConversationListStore, PreviewSnapshot};
use crate::error::{ChatError, Result};
use crate::thread::{InFlightEffects, MessageThreadStore, RemovedMessage};
use squadlink_messaging::{ConversationId, EditState, Message, MessageId, OutgoingMessage, UserId};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Send,
    Edit,
    Delete,
    React,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationKind::Send => "send",
            MutationKind::Edit => "edit",
            MutationKind::Delete => "delete",
            MutationKind::React => "reaction",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(pub u64);

/// The network half of a mutation.
#[derive(Debug, Clone)]
pub enum MutationRequest {
    Send {
        conversation_id: ConversationId,
        outgoing: OutgoingMessage,
    },
    Edit {
        message_id: MessageId,
        content: String,
    },
    Delete {
        message_id: MessageId,
    },
    React {
        message_id: MessageId,
        emoji: String,
    },
}

impl MutationRequest {
    pub async fn execute(self, backend: &dyn ChatBackend) -> Result<MutationResponse> {
        match self {
            MutationRequest::Send {
                conversation_id,
                outgoing,
            } => backend
                .send_message(&conversation_id, outgoing)
                .await
                .map(MutationResponse::Sent),
            MutationRequest::Edit {
                message_id,
                content,
            } => backend
                .edit_message(&message_id, &content)
                .await
                .map(MutationResponse::Edited),
            MutationRequest::Delete { message_id } => backend
                .delete_message(&message_id)
                .await
                .map(|()| MutationResponse::Deleted),
            MutationRequest::React { message_id, emoji } => backend
                .react(&message_id, &emoji)
                .await
                .map(|()| MutationResponse::Reacted),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationResponse {
    Sent(Message),
    Edited(Message),
    Deleted,
    Reacted,
}

/// The local effect already applied, kept for reconciliation or rollback.
#[derive(Debug)]
enum AppliedEffect {
    Send {
        parent_id: Option<MessageId>,
        preview: Option<PreviewSnapshot>,
    },
    /// Edits wait for the server before touching local state.
    Edit,
    Delete {
        removed: RemovedMessage,
    },
    React {
        user: UserId,
        emoji: String,
        previous: Option<String>,
    },
}

/// One mutation whose server call is in flight.
///
/// It carries its own conversation id so reconciliation lands in the right
/// thread whichever conversation is displayed when the response arrives.
#[derive(Debug)]
pub struct PendingMutation {
    pub id: MutationId,
    pub kind: MutationKind,
    pub conversation_id: ConversationId,
    /// For sends, the pending id of the optimistic message.
    pub target: MessageId,
    effect: AppliedEffect,
}

/// What became of a mutation once its response was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The server accepted it. For sends, `message_id` is the server id and
    /// `replaced` the pending id it took over from.
    Confirmed {
        kind: MutationKind,
        conversation_id: ConversationId,
        message_id: MessageId,
        replaced: Option<MessageId>,
    },
    /// The target was already gone on the server; local state now agrees.
    Converged {
        kind: MutationKind,
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    /// The server call failed and the local effect was undone.
    RolledBack {
        kind: MutationKind,
        conversation_id: ConversationId,
        message_id: MessageId,
        error: ChatError,
    },
}

impl Reconciliation {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Reconciliation::Confirmed {
                conversation_id, ..
            }
            | Reconciliation::Converged {
                conversation_id, ..
            }
            | Reconciliation::RolledBack {
                conversation_id, ..
            } => conversation_id,
        }
    }

    pub fn error(&self) -> Option<&ChatError> {
        match self {
            Reconciliation::RolledBack { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl PendingMutation {
    /// Add what this mutation did locally to a refetch's carry-over.
    fn carry_into(&self, effects: &mut InFlightEffects) {
        match &self.effect {
            AppliedEffect::Delete { removed } => effects.deleted.push(removed.message.clone()),
            AppliedEffect::React { user, emoji, .. } => {
                effects
                    .reactions
                    .push((self.target.clone(), user.clone(), emoji.clone()));
            }
            AppliedEffect::Send { .. } | AppliedEffect::Edit => {}
        }
    }

    /// Replace the optimistic state with the server's answer.
    fn confirm(
        self,
        response: MutationResponse,
        threads: &mut MessageThreadStore,
        conversations: &mut ConversationListStore,
    ) -> Reconciliation {
        let PendingMutation {
            kind,
            conversation_id,
            target,
            effect,
            ..
        } = self;

        let mut message_id = target.clone();
        let mut replaced = None;
        match (effect, response) {
            (AppliedEffect::Send { preview, .. }, MutationResponse::Sent(confirmed)) => {
                message_id = confirmed.id.clone();
                if let Some(snapshot) = &preview {
                    conversations.confirm_preview(snapshot, &confirmed);
                }
                if !threads.replace(&conversation_id, &target, confirmed) {
                    debug!(%conversation_id, pending = %target, "confirmed send no longer resident");
                }
                replaced = Some(target);
            }
            (AppliedEffect::Edit, MutationResponse::Edited(edited)) => {
                threads.update(&conversation_id, &target, |message| {
                    message.content = edited.content;
                    message.edit_state = EditState::Edited;
                });
            }
            (AppliedEffect::Delete { .. }, MutationResponse::Deleted)
            | (AppliedEffect::React { .. }, MutationResponse::Reacted) => {}
            (effect, response) => {
                warn!(?kind, ?effect, ?response, "response does not match mutation");
            }
        }

        Reconciliation::Confirmed {
            kind,
            conversation_id,
            message_id,
            replaced,
        }
    }

    /// The server no longer has the target: make local state agree.
    fn converge(self, threads: &mut MessageThreadStore) -> Reconciliation {
        if matches!(self.effect, AppliedEffect::Edit) {
            threads.remove(&self.conversation_id, &self.target);
        }
        Reconciliation::Converged {
            kind: self.kind,
            conversation_id: self.conversation_id,
            message_id: self.target,
        }
    }

    /// Undo the local effect.
    fn rollback(
        self,
        error: ChatError,
        threads: &mut MessageThreadStore,
        conversations: &mut ConversationListStore,
    ) -> Reconciliation {
        let PendingMutation {
            kind,
            conversation_id,
            target,
            effect,
            ..
        } = self;

        match effect {
            AppliedEffect::Send { parent_id, preview } => {
                let removed = threads.remove(&conversation_id, &target);
                if removed.is_none() {
                    // Reply never made it into a loaded set; only its count was bumped.
                    if let Some(parent_id) = &parent_id {
                        threads.adjust_reply_count(&conversation_id, parent_id, -1);
                    }
                }
                if let Some(snapshot) = preview {
                    conversations.revert_preview(&conversation_id, snapshot);
                }
            }
            AppliedEffect::Edit => {}
            AppliedEffect::Delete { removed } => threads.restore(&conversation_id, removed),
            AppliedEffect::React { user, previous, .. } => {
                threads.update(&conversation_id, &target, |message| {
                    message.restore_reaction(&user, previous);
                });
            }
        }

        Reconciliation::RolledBack {
            kind,
            conversation_id,
            message_id: target,
            error,
        }
    }
}
