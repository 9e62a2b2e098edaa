//! The chat session: user intents in, view model out.
//!
//! A session owns every store. Network calls run on spawned tasks that only
//! report back over a channel; their results are applied when the owner
//! calls [`ChatSession::next_event`] or [`ChatSession::drain_events`], so
//! state is only ever touched from one place.

use crate::attachments::{AttachmentPreview, AttachmentStager, StagedAttachment};
use crate::backend::ChatBackend;
use crate::config::SessionConfig;
use crate::conversations::{ConversationListStore, UnreadSummary};
use crate::error::{ChatError, Result};
use crate::mutation::{
    MutationId, MutationKind, MutationQueue, MutationRequest, MutationResponse, Reconciliation,
};
use crate::poller::UnreadPoller;
use crate::search::{Highlight, MessageSearchIndex, SearchOutcome};
use crate::thread::{MessageThreadStore, ReplyState};
use crate::view::{DisplayMessage, Notice, NoticeId, Notices, ViewModel};
use squadlink_messaging::{
    AttachmentUpload, Conversation, ConversationId, Message, MessageId, OutgoingMessage,
    Participant, UserId,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Completions reported by background tasks.
enum Inbound {
    Mutation {
        id: MutationId,
        result: Result<MutationResponse>,
    },
    Poll {
        epoch: u64,
        result: Result<Vec<Conversation>>,
    },
    SearchDue {
        epoch: u64,
        query: String,
    },
}

/// A state change applied by the event pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Mutation(Reconciliation),
    UnreadUpdated(UnreadSummary),
    PollFailed(ChatError),
    Search(SearchOutcome),
}

pub struct ChatSession {
    config: SessionConfig,
    me: Participant,
    backend: Arc<dyn ChatBackend>,
    conversations: ConversationListStore,
    threads: MessageThreadStore,
    mutations: MutationQueue,
    search: MessageSearchIndex,
    attachments: AttachmentStager,
    reply_target: Option<MessageId>,
    notices: Notices,
    has_unread: bool,
    poller: Option<UnreadPoller>,
    poll_epoch: u64,
    search_timer: Option<JoinHandle<()>>,
    search_epoch: u64,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, me: Participant, config: SessionConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            search: MessageSearchIndex::new(config.highlight_duration),
            attachments: AttachmentStager::new(config.image_size_limit, config.file_size_limit),
            config,
            me,
            backend,
            conversations: ConversationListStore::new(),
            threads: MessageThreadStore::new(),
            mutations: MutationQueue::new(),
            reply_target: None,
            notices: Notices::default(),
            has_unread: false,
            poller: None,
            poll_epoch: 0,
            search_timer: None,
            search_epoch: 0,
            inbound_tx,
            inbound_rx,
        }
    }

    /// Replace the conversation list with the server's.
    pub async fn refresh_conversations(&mut self) -> Result<()> {
        if let Err(err) = self.conversations.refresh(self.backend.as_ref()).await {
            return Err(self.surface(err));
        }
        if let Some(active) = self.threads.active() {
            self.conversations.mark_read(active);
        }
        self.has_unread = self.conversations.unread_summary().has_unread;
        Ok(())
    }

    /// Make `id` the active conversation and load its thread.
    ///
    /// Search, staged attachment and reply target are dropped. In-flight
    /// mutations of the previous conversation keep running.
    pub async fn select_conversation(&mut self, id: ConversationId) -> Result<()> {
        self.cancel_search();
        self.attachments.clear();
        self.reply_target = None;

        if !self.conversations.contains(&id) {
            match self.backend.get_conversation(&id).await {
                Ok(conversation) => self.conversations.upsert(conversation),
                Err(err) => return Err(self.surface(err)),
            }
        }

        let keep = self.mutations.conversations();
        self.threads.activate(id.clone(), &keep);
        self.conversations.mark_read(&id);
        self.has_unread = self.conversations.unread_summary().has_unread;

        let in_flight = self.mutations.effects_in(&id);
        if let Err(err) = self
            .threads
            .load(self.backend.as_ref(), &id, &in_flight)
            .await
        {
            return Err(self.surface(err));
        }
        info!(conversation_id = %id, messages = self.threads.messages(&id).len(), "conversation selected");
        Ok(())
    }

    /// Open (or find) the conversation with `participant` and select it.
    pub async fn start_conversation(&mut self, participant: &UserId) -> Result<ConversationId> {
        let conversation = match self.backend.open_conversation(participant).await {
            Ok(conversation) => conversation,
            Err(err) => return Err(self.surface(err)),
        };
        let id = conversation.id.clone();
        self.conversations.upsert(conversation);
        self.select_conversation(id.clone()).await?;
        Ok(id)
    }

    /// Send `content` plus any staged attachment to the active conversation,
    /// as a reply when a reply target is set. Returns the pending id.
    pub fn send(&mut self, content: &str) -> Result<MessageId> {
        self.ensure_unblocked()?;
        let conversation_id = self.active_thread()?;

        let mut outgoing = OutgoingMessage {
            content: Some(content.to_string()),
            parent_id: self.reply_target.clone(),
            ..OutgoingMessage::default()
        };
        match self.attachments.staged() {
            Some(StagedAttachment::Image { upload, .. }) => outgoing.image = Some(upload.clone()),
            Some(StagedAttachment::File { upload }) => outgoing.file = Some(upload.clone()),
            None => {}
        }

        let (id, pending_id, request) = self.mutations.begin_send(
            &mut self.threads,
            &mut self.conversations,
            &conversation_id,
            self.me.clone(),
            outgoing,
        )?;
        self.attachments.clear();
        self.reply_target = None;
        self.dispatch(id, request);
        Ok(pending_id)
    }

    /// Ask the server to replace a message's text. The thread changes once it confirms.
    pub fn edit(&mut self, message_id: &MessageId, content: &str) -> Result<()> {
        self.ensure_unblocked()?;
        let conversation_id = self.active_thread()?;
        let (id, request) =
            self.mutations
                .begin_edit(&self.threads, &conversation_id, message_id, &self.me.id, content)?;
        self.dispatch(id, request);
        Ok(())
    }

    pub fn delete(&mut self, message_id: &MessageId) -> Result<()> {
        self.ensure_unblocked()?;
        let conversation_id = self.active_thread()?;
        let dropped_replies: Vec<MessageId> = self
            .threads
            .reply_set(&conversation_id, message_id)
            .map(|set| set.replies().iter().map(|m| m.id.clone()).collect())
            .unwrap_or_default();
        let (id, request) = self
            .mutations
            .begin_delete(&mut self.threads, &conversation_id, message_id)?;
        self.search.forget(message_id);
        for reply_id in &dropped_replies {
            self.search.forget(reply_id);
        }
        if self.reply_target.as_ref() == Some(message_id) {
            self.reply_target = None;
        }
        self.dispatch(id, request);
        Ok(())
    }

    /// Set the user's reaction on a message, replacing any earlier one.
    pub fn react(&mut self, message_id: &MessageId, emoji: &str) -> Result<()> {
        self.ensure_unblocked()?;
        let conversation_id = self.active_thread()?;
        let (id, request) = self.mutations.begin_react(
            &mut self.threads,
            &conversation_id,
            message_id,
            &self.me.id,
            emoji,
        )?;
        self.dispatch(id, request);
        Ok(())
    }

    fn dispatch(&self, id: MutationId, request: MutationRequest) {
        let backend = Arc::clone(&self.backend);
        let tx = self.inbound_tx.clone();
        debug!(?id, "mutation dispatched");
        tokio::spawn(async move {
            let result = request.execute(backend.as_ref()).await;
            let _ = tx.send(Inbound::Mutation { id, result });
        });
    }

    /// The next send goes out as a reply to `parent_id`.
    pub fn set_reply_target(&mut self, parent_id: MessageId) -> Result<()> {
        let conversation_id = self.active_thread()?;
        let parent = self
            .threads
            .find(&conversation_id, &parent_id)
            .ok_or_else(|| ChatError::NotFound(format!("message {parent_id}")))?;
        if parent.is_pending() {
            return Err(ChatError::validation("cannot reply to an unsent message"));
        }
        if parent.is_reply() {
            return Err(ChatError::validation("replies cannot be replied to"));
        }
        self.reply_target = Some(parent_id);
        Ok(())
    }

    pub fn clear_reply_target(&mut self) {
        self.reply_target = None;
    }

    /// Show a parent's replies, fetching them the first time only.
    pub async fn load_replies(&mut self, parent_id: &MessageId) -> Result<()> {
        let conversation_id = self.active_thread()?;
        if let Err(err) = self
            .threads
            .load_replies(self.backend.as_ref(), &conversation_id, parent_id)
            .await
        {
            return Err(self.surface(err));
        }
        Ok(())
    }

    /// Flip a parent's replies between shown and hidden.
    pub async fn toggle_replies(&mut self, parent_id: &MessageId) -> Result<ReplyState> {
        let conversation_id = self.active_thread()?;
        match self.threads.reply_state(&conversation_id, parent_id) {
            ReplyState::Shown => self.threads.hide_replies(&conversation_id, parent_id),
            ReplyState::Hidden | ReplyState::NotFetched => self.load_replies(parent_id).await?,
        }
        Ok(self.threads.reply_state(&conversation_id, parent_id))
    }

    pub fn hide_replies(&mut self, parent_id: &MessageId) {
        if let Some(conversation_id) = self.threads.active().cloned() {
            self.threads.hide_replies(&conversation_id, parent_id);
        }
    }

    /// Search the visible messages of the active conversation right away.
    pub fn search(&mut self, query: &str) -> SearchOutcome {
        self.cancel_search_timer();
        self.run_search(query)
    }

    /// Search once `query` has been left alone for the debounce period.
    ///
    /// The outcome arrives as [`SessionEvent::Search`]. Each call replaces
    /// the previous pending one.
    pub fn search_debounced(&mut self, query: impl Into<String>) {
        self.cancel_search_timer();
        let epoch = self.search_epoch;
        let query = query.into();
        let delay = self.config.search_debounce;
        let tx = self.inbound_tx.clone();
        self.search_timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(Inbound::SearchDue { epoch, query });
        }));
    }

    pub fn search_next(&mut self) -> Option<Highlight> {
        self.search.next()
    }

    pub fn search_previous(&mut self) -> Option<Highlight> {
        self.search.previous()
    }

    pub fn clear_search(&mut self) {
        self.cancel_search();
    }

    fn run_search(&mut self, query: &str) -> SearchOutcome {
        let visible = match self.threads.active() {
            Some(id) => self.threads.visible(id),
            None => Vec::new(),
        };
        let outcome = self.search.search(query, visible);
        debug!(query, ?outcome, "search");
        outcome
    }

    fn cancel_search_timer(&mut self) {
        self.search_epoch += 1;
        if let Some(timer) = self.search_timer.take() {
            timer.abort();
        }
    }

    fn cancel_search(&mut self) {
        self.cancel_search_timer();
        self.search.clear();
    }

    pub fn stage_image(&mut self, upload: AttachmentUpload) -> Result<AttachmentPreview> {
        self.attachments.stage_image(upload)
    }

    pub fn stage_file(&mut self, upload: AttachmentUpload) -> Result<AttachmentPreview> {
        self.attachments.stage_file(upload)
    }

    pub fn clear_attachment(&mut self) {
        self.attachments.clear();
    }

    /// Take in a message observed outside this session's own sends.
    ///
    /// Returns false when its thread is not loaded or it is already there.
    pub fn receive_message(&mut self, message: Message) -> bool {
        self.conversations.record_message(&message);
        let appended = self.threads.append(message);
        debug!(appended, "external message received");
        appended
    }

    /// Start the unread poller. No-op while it is running.
    pub fn start_polling(&mut self) {
        if self.poller.as_ref().is_some_and(UnreadPoller::is_running) {
            return;
        }
        self.poll_epoch += 1;
        let epoch = self.poll_epoch;
        let tx = self.inbound_tx.clone();
        self.poller = Some(UnreadPoller::spawn(
            Arc::clone(&self.backend),
            self.config.poll_interval,
            move |result| tx.send(Inbound::Poll { epoch, result }).is_ok(),
        ));
        info!(interval = ?self.config.poll_interval, "unread polling started");
    }

    fn stop_polling(&mut self) {
        // Polls already queued belong to the old epoch and are dropped.
        self.poll_epoch += 1;
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
            info!("unread polling stopped");
        }
    }

    /// Stop the poller and any pending search. In-flight mutations still
    /// reconcile if events keep being pumped.
    pub fn teardown(&mut self) {
        self.stop_polling();
        self.cancel_search_timer();
        debug!(in_flight = self.mutations.len(), "session torn down");
    }

    /// Wait for the next background completion and apply it.
    ///
    /// Completions that no longer apply (a stopped poller, a superseded
    /// search) are skipped. Returns `None` only if the channel closed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let inbound = self.inbound_rx.recv().await?;
            if let Some(event) = self.apply(inbound) {
                return Some(event);
            }
        }
    }

    /// Apply every completion already received, without waiting.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(inbound) = self.inbound_rx.try_recv() {
            events.extend(self.apply(inbound));
        }
        events
    }

    fn apply(&mut self, inbound: Inbound) -> Option<SessionEvent> {
        match inbound {
            Inbound::Mutation { id, result } => {
                let reconciliation =
                    self.mutations
                        .complete(id, result, &mut self.threads, &mut self.conversations)?;
                self.follow_reconciliation(&reconciliation);
                Some(SessionEvent::Mutation(reconciliation))
            }
            Inbound::Poll { epoch, result } => {
                if epoch != self.poll_epoch {
                    return None;
                }
                match result {
                    Ok(conversations) => {
                        let summary = self
                            .conversations
                            .merge_unread(conversations, self.threads.active());
                        if summary.has_unread != self.has_unread {
                            info!(total_unread = summary.total_unread, "unread state changed");
                        }
                        self.has_unread = summary.has_unread;
                        Some(SessionEvent::UnreadUpdated(summary))
                    }
                    Err(err) => {
                        warn!(%err, "unread poll failed");
                        if err.is_auth() {
                            self.stop_polling();
                            self.notices.push(err.clone());
                        }
                        Some(SessionEvent::PollFailed(err))
                    }
                }
            }
            Inbound::SearchDue { epoch, query } => {
                if epoch != self.search_epoch {
                    return None;
                }
                self.search_timer = None;
                Some(SessionEvent::Search(self.run_search(&query)))
            }
        }
    }

    /// Keep the search cursor and notices in line with a reconciliation.
    fn follow_reconciliation(&mut self, reconciliation: &Reconciliation) {
        let active = self.threads.active() == Some(reconciliation.conversation_id());
        match reconciliation {
            Reconciliation::Confirmed {
                message_id,
                replaced: Some(pending),
                ..
            } if active => self.search.retarget(pending, message_id),
            Reconciliation::Converged { message_id, .. }
            | Reconciliation::RolledBack {
                kind: MutationKind::Send,
                message_id,
                ..
            } if active => self.search.forget(message_id),
            _ => {}
        }
        if let Some(err) = reconciliation.error() {
            self.notices.push(err.clone());
        }
    }

    pub fn notices(&self) -> &[Notice] {
        self.notices.as_slice()
    }

    pub fn acknowledge_notice(&mut self, id: NoticeId) -> bool {
        self.notices.acknowledge(id)
    }

    fn surface(&mut self, err: ChatError) -> ChatError {
        self.notices.push(err.clone());
        err
    }

    fn ensure_unblocked(&self) -> Result<()> {
        match self.notices.blocking() {
            Some(notice) => Err(ChatError::Auth(format!(
                "acknowledge \"{}\" before continuing",
                notice.error
            ))),
            None => Ok(()),
        }
    }

    fn active_thread(&self) -> Result<ConversationId> {
        match self.threads.active() {
            Some(id) if self.threads.is_resident(id) => Ok(id.clone()),
            Some(_) => Err(ChatError::validation("conversation is not loaded")),
            None => Err(ChatError::validation("no conversation selected")),
        }
    }

    pub fn view(&self) -> ViewModel {
        let active_id = self.threads.active();
        let editing = self.mutations.editing();
        let current_match = self.search.state().and_then(|state| state.current_match().cloned());

        let messages = active_id
            .map(|conversation_id| {
                self.threads
                    .visible(conversation_id)
                    .into_iter()
                    .map(|message| DisplayMessage {
                        depth: u8::from(message.is_reply()),
                        pending: message.is_pending(),
                        editing: editing.contains(&message.id),
                        current_match: current_match.as_ref() == Some(&message.id),
                        replies: (!message.is_reply())
                            .then(|| self.threads.reply_state(conversation_id, &message.id)),
                        message: message.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        ViewModel {
            conversations: self.conversations.conversations().to_vec(),
            active: active_id.and_then(|id| self.conversations.get(id)).cloned(),
            messages,
            attachment: self.attachments.preview(),
            search: self.search.state(),
            reply_target: self.reply_target.clone(),
            sending: self.is_sending(),
            has_unread: self.has_unread,
            notices: self.notices.as_slice().to_vec(),
        }
    }

    pub fn me(&self) -> &Participant {
        &self.me
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn conversations(&self) -> &[Conversation] {
        self.conversations.conversations()
    }

    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.threads.active()
    }

    /// Top-level messages of a resident conversation.
    pub fn messages(&self, conversation_id: &ConversationId) -> &[Message] {
        self.threads.messages(conversation_id)
    }

    pub fn visible_messages(&self) -> Vec<&Message> {
        match self.threads.active() {
            Some(id) => self.threads.visible(id),
            None => Vec::new(),
        }
    }

    pub fn find_message(&self, conversation_id: &ConversationId, id: &MessageId) -> Option<&Message> {
        self.threads.find(conversation_id, id)
    }

    pub fn reply_state(&self, parent_id: &MessageId) -> ReplyState {
        match self.threads.active() {
            Some(id) => self.threads.reply_state(id, parent_id),
            None => ReplyState::NotFetched,
        }
    }

    pub fn reply_target(&self) -> Option<&MessageId> {
        self.reply_target.as_ref()
    }

    pub fn staged_attachment(&self) -> Option<&StagedAttachment> {
        self.attachments.staged()
    }

    pub fn has_unread(&self) -> bool {
        self.has_unread
    }

    pub fn is_sending(&self) -> bool {
        self.mutations.has_in_flight(MutationKind::Send)
    }

    pub fn editing(&self) -> Vec<MessageId> {
        self.mutations.editing()
    }

    pub fn in_flight(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(UnreadPoller::is_running)
    }

    pub fn is_search_pending(&self) -> bool {
        self.search_timer.is_some()
    }
}
