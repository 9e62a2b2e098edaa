use chrono::{DateTime, Duration as ChronoDuration, Utc};
use squadlink_chat::backend::Endpoint;
use squadlink_chat::conversations::UnreadSummary;
use squadlink_chat::mutation::{MutationKind, Reconciliation};
use squadlink_chat::search::SearchOutcome;
use squadlink_chat::thread::ReplyState;
use squadlink_chat::{ChatError, ChatSession, MemoryBackend, SessionConfig, SessionEvent};
use squadlink_messaging::{
    AttachmentKind, AttachmentUpload, Conversation, ConversationId, EditState, Message, MessageId,
    Participant, UserId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn me() -> Participant {
    Participant::new(UserId::new("me"), "Me")
}

fn them() -> Participant {
    Participant::new(UserId::new("them"), "Them")
}

fn base() -> DateTime<Utc> {
    Utc::now() - ChronoDuration::days(1)
}

fn c1() -> ConversationId {
    ConversationId::new("c1")
}

fn c2() -> ConversationId {
    ConversationId::new("c2")
}

fn conversation(id: &str, other: Participant, minute: i64) -> Conversation {
    Conversation {
        id: ConversationId::new(id),
        participants: vec![me(), other],
        last_message: None,
        unread_count: 0,
        last_activity: base() + ChronoDuration::minutes(minute),
    }
}

fn message(conversation: &str, id: &str, sender: Participant, text: &str, minute: i64) -> Message {
    let mut message = Message::pending(
        ConversationId::new(conversation),
        sender,
        Some(text.to_string()),
        None,
        None,
    );
    message.id = MessageId::server(id);
    message.created_at = base() + ChronoDuration::minutes(minute);
    message
}

fn reply(id: &str, parent: &str, minute: i64) -> Message {
    let mut reply = message("c1", id, them(), id, minute);
    reply.parent_id = Some(MessageId::server(parent));
    reply
}

fn seeded() -> MemoryBackend {
    let backend = MemoryBackend::new(me());
    backend.register_user(them());
    backend.insert_conversation(conversation("c1", them(), 10));
    backend.insert_conversation(conversation(
        "c2",
        Participant::new(UserId::new("other"), "Other"),
        5,
    ));
    backend.insert_message(message("c1", "s1", them(), "abc", 1));
    backend.insert_message(message("c1", "s2", me(), "xABCx", 2));
    backend.insert_message(message("c1", "s3", them(), "def", 3));
    backend.insert_message(message("c2", "t1", me(), "elsewhere", 1));
    backend
}

async fn session_with(backend: &MemoryBackend, config: SessionConfig) -> ChatSession {
    let mut session = ChatSession::new(Arc::new(backend.clone()), me(), config);
    session.refresh_conversations().await.unwrap();
    session
}

async fn open(backend: &MemoryBackend) -> ChatSession {
    let mut session = session_with(backend, SessionConfig::default()).await;
    session.select_conversation(c1()).await.unwrap();
    session
}

async fn reconcile(session: &mut ChatSession) -> Reconciliation {
    match session.next_event().await {
        Some(SessionEvent::Mutation(reconciliation)) => reconciliation,
        other => panic!("expected a reconciliation, got {other:?}"),
    }
}

fn visible_ids(session: &ChatSession) -> Vec<String> {
    session
        .visible_messages()
        .iter()
        .map(|m| m.id.to_string())
        .collect()
}

#[tokio::test]
async fn confirmed_send_keeps_its_position() {
    let backend = seeded();
    let mut session = open(&backend).await;

    let pending = session.send("  hello  ").unwrap();
    assert!(session.is_sending());
    assert!(session.receive_message(message("c1", "ext", them(), "meanwhile", 600)));
    let position = visible_ids(&session)
        .iter()
        .position(|id| *id == pending.to_string())
        .unwrap();
    assert_eq!(position, 3);

    let confirmed = match reconcile(&mut session).await {
        Reconciliation::Confirmed {
            message_id,
            replaced: Some(replaced),
            ..
        } => {
            assert_eq!(replaced, pending);
            message_id
        }
        other => panic!("unexpected {other:?}"),
    };

    assert!(!confirmed.is_pending());
    assert_eq!(visible_ids(&session)[position], confirmed.to_string());
    assert_eq!(visible_ids(&session).len(), 5);
    let stored = session.find_message(&c1(), &confirmed).unwrap();
    assert_eq!(stored.content.as_deref(), Some("hello"));
    assert!(!session.is_sending());
    assert!(session.notices().is_empty());
}

#[tokio::test]
async fn failed_send_leaves_no_pending_message() {
    let backend = seeded();
    let mut session = open(&backend).await;
    let before = visible_ids(&session);

    backend.fail_next(Endpoint::SendMessage, ChatError::Network("connection reset".into()));
    let pending = session.send("lost").unwrap();
    assert!(session.find_message(&c1(), &pending).is_some());

    let reconciliation = reconcile(&mut session).await;
    assert!(matches!(
        reconciliation,
        Reconciliation::RolledBack { kind: MutationKind::Send, .. }
    ));
    assert_eq!(visible_ids(&session), before);
    assert!(session.visible_messages().iter().all(|m| !m.is_pending()));

    let notice = &session.notices()[0];
    assert!(notice.retryable);
    assert!(!notice.blocking);
}

#[tokio::test]
async fn server_rejection_also_rolls_back() {
    let backend = seeded();
    let mut session = open(&backend).await;
    backend.fail_next(Endpoint::SendMessage, ChatError::from_status(422, "too long"));
    session.send("rejected").unwrap();

    reconcile(&mut session).await;
    assert_eq!(visible_ids(&session), vec!["s1", "s2", "s3"]);
    assert!(!session.notices()[0].retryable);
}

#[tokio::test]
async fn empty_send_is_rejected_locally() {
    let backend = seeded();
    let mut session = open(&backend).await;
    let err = session.send("   ").unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    assert_eq!(backend.calls(Endpoint::SendMessage), 0);
    assert_eq!(session.in_flight(), 0);
}

#[tokio::test]
async fn delete_with_not_found_matches_successful_delete() {
    let ok_backend = seeded();
    let mut ok = open(&ok_backend).await;
    ok.delete(&MessageId::server("s1")).unwrap();
    reconcile(&mut ok).await;

    let gone_backend = seeded();
    let mut gone = open(&gone_backend).await;
    gone_backend.forget_message(&MessageId::server("s1"));
    gone.delete(&MessageId::server("s1")).unwrap();
    let reconciliation = reconcile(&mut gone).await;

    assert!(matches!(reconciliation, Reconciliation::Converged { .. }));
    assert_eq!(visible_ids(&ok), visible_ids(&gone));
    assert_eq!(visible_ids(&gone), vec!["s2", "s3"]);
    assert!(gone.notices().is_empty());
}

#[tokio::test]
async fn failed_delete_puts_message_back() {
    let backend = seeded();
    let mut session = open(&backend).await;
    backend.fail_next(
        Endpoint::DeleteMessage,
        ChatError::Server {
            status: 503,
            message: "maintenance".into(),
        },
    );

    session.delete(&MessageId::server("s2")).unwrap();
    assert_eq!(visible_ids(&session), vec!["s1", "s3"]);
    reconcile(&mut session).await;
    assert_eq!(visible_ids(&session), vec!["s1", "s2", "s3"]);
    assert_eq!(session.notices().len(), 1);
}

#[tokio::test]
async fn edit_applies_only_after_confirmation() {
    let backend = seeded();
    let mut session = open(&backend).await;
    let target = MessageId::server("s2");

    session.edit(&target, "fixed").unwrap();
    assert_eq!(session.editing(), vec![target.clone()]);
    let view = session.view();
    let shown = view.messages.iter().find(|m| m.message.id == target).unwrap();
    assert!(shown.editing);
    assert_eq!(shown.message.content.as_deref(), Some("xABCx"));

    reconcile(&mut session).await;
    let edited = session.find_message(&c1(), &target).unwrap();
    assert_eq!(edited.content.as_deref(), Some("fixed"));
    assert_eq!(edited.edit_state, EditState::Edited);
    assert!(session.editing().is_empty());
}

#[tokio::test]
async fn edit_of_deleted_message_removes_it() {
    let backend = seeded();
    let mut session = open(&backend).await;
    let target = MessageId::server("s2");
    backend.forget_message(&target);

    session.edit(&target, "too late").unwrap();
    assert!(matches!(
        reconcile(&mut session).await,
        Reconciliation::Converged { kind: MutationKind::Edit, .. }
    ));
    assert_eq!(visible_ids(&session), vec!["s1", "s3"]);
    assert!(session.notices().is_empty());
}

#[tokio::test]
async fn edits_are_limited_to_own_confirmed_messages() {
    let backend = seeded();
    let mut session = open(&backend).await;

    let err = session.edit(&MessageId::server("s1"), "not mine").unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    let pending = session.send("draft").unwrap();
    let err = session.edit(&pending, "changed").unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    session.edit(&MessageId::server("s2"), "one").unwrap();
    let err = session.edit(&MessageId::server("s2"), "two").unwrap_err();
    assert!(matches!(
        err,
        ChatError::MutationInFlight {
            kind: MutationKind::Edit,
            ..
        }
    ));
}

#[tokio::test]
async fn reaction_replaces_and_reverts_on_failure() {
    let backend = seeded();
    let mut session = open(&backend).await;
    let target = MessageId::server("s1");
    let mine = |session: &ChatSession| {
        session
            .find_message(&c1(), &target)
            .and_then(|m| m.reactions.get(&me().id).cloned())
    };

    session.react(&target, "👍").unwrap();
    assert_eq!(mine(&session).as_deref(), Some("👍"));
    reconcile(&mut session).await;

    backend.fail_next(Endpoint::React, ChatError::Network("offline".into()));
    session.react(&target, "🎉").unwrap();
    assert_eq!(mine(&session).as_deref(), Some("🎉"));
    reconcile(&mut session).await;
    assert_eq!(mine(&session).as_deref(), Some("👍"));
    let reactions = &session.find_message(&c1(), &target).unwrap().reactions;
    assert_eq!(reactions.len(), 1);
}

#[tokio::test]
async fn search_walks_matches_in_thread_order() {
    let backend = seeded();
    let mut session = open(&backend).await;

    match session.search("abc") {
        SearchOutcome::Matches { count, first } => {
            assert_eq!(count, 2);
            assert_eq!(first.message_id, MessageId::server("s1"));
            assert_eq!(first.clear_after, Duration::from_secs(2));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(session.search_next().unwrap().message_id, MessageId::server("s2"));
    assert_eq!(session.search_next().unwrap().message_id, MessageId::server("s1"));
    assert_eq!(session.search("nothing"), SearchOutcome::NoResults);

    session.search("abc");
    session.select_conversation(c2()).await.unwrap();
    assert!(session.view().search.is_none());
}

#[tokio::test]
async fn removing_a_reply_keeps_siblings_in_order() {
    let backend = seeded();
    backend.insert_message(reply("r1", "s1", 4));
    backend.insert_message(reply("r2", "s1", 5));
    backend.insert_message(reply("r3", "s1", 6));
    let mut session = open(&backend).await;
    let parent = MessageId::server("s1");
    assert_eq!(session.find_message(&c1(), &parent).unwrap().reply_count, 3);

    session.load_replies(&parent).await.unwrap();
    assert_eq!(
        visible_ids(&session),
        vec!["s1", "r1", "r2", "r3", "s2", "s3"]
    );

    session.delete(&MessageId::server("r2")).unwrap();
    assert_eq!(session.find_message(&c1(), &parent).unwrap().reply_count, 2);
    reconcile(&mut session).await;
    assert_eq!(session.find_message(&c1(), &parent).unwrap().reply_count, 2);
    assert_eq!(visible_ids(&session), vec!["s1", "r1", "r3", "s2", "s3"]);
}

#[tokio::test]
async fn replies_toggle_without_refetching() {
    let backend = seeded();
    backend.insert_message(reply("r1", "s1", 4));
    let mut session = open(&backend).await;
    let parent = MessageId::server("s1");

    assert_eq!(session.reply_state(&parent), ReplyState::NotFetched);
    assert_eq!(session.toggle_replies(&parent).await.unwrap(), ReplyState::Shown);
    assert_eq!(session.toggle_replies(&parent).await.unwrap(), ReplyState::Hidden);
    assert_eq!(visible_ids(&session), vec!["s1", "s2", "s3"]);
    assert_eq!(session.toggle_replies(&parent).await.unwrap(), ReplyState::Shown);
    assert_eq!(backend.calls(Endpoint::ListReplies), 1);

    let view = session.view();
    assert_eq!(view.messages[1].depth, 1);
    assert_eq!(view.messages[1].replies, None);
    assert_eq!(view.messages[0].replies, Some(ReplyState::Shown));
}

#[tokio::test]
async fn reply_goes_into_the_open_reply_set() {
    let backend = seeded();
    backend.insert_message(reply("r1", "s1", 4));
    let mut session = open(&backend).await;
    let parent = MessageId::server("s1");
    session.load_replies(&parent).await.unwrap();

    session.set_reply_target(parent.clone()).unwrap();
    let pending = session.send("agreed").unwrap();
    assert!(session.reply_target().is_none());
    assert_eq!(session.find_message(&c1(), &parent).unwrap().reply_count, 2);
    assert_eq!(visible_ids(&session)[2], pending.to_string());

    let confirmed = match reconcile(&mut session).await {
        Reconciliation::Confirmed { message_id, .. } => message_id,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(visible_ids(&session)[2], confirmed.to_string());
    let stored = backend.stored_message(&confirmed).unwrap();
    assert_eq!(stored.parent_id, Some(parent.clone()));
    assert_eq!(session.find_message(&c1(), &parent).unwrap().reply_count, 2);
}

#[tokio::test]
async fn staging_keeps_exactly_one_attachment() {
    let backend = seeded();
    let mut session = open(&backend).await;

    session
        .stage_file(AttachmentUpload::new("notes.txt", "text/plain", b"notes".to_vec()))
        .unwrap();
    let preview = session
        .stage_image(AttachmentUpload::new("map.png", "image/png", vec![1, 2, 3]))
        .unwrap();
    assert_eq!(preview.kind, AttachmentKind::Image);
    assert_eq!(session.view().attachment.unwrap().name, "map.png");

    let pending = session.send("").unwrap();
    assert!(session.staged_attachment().is_none());
    let attachment = session
        .find_message(&c1(), &pending)
        .and_then(|m| m.attachment.clone())
        .unwrap();
    assert_eq!(attachment.kind, AttachmentKind::Image);

    let confirmed = match reconcile(&mut session).await {
        Reconciliation::Confirmed { message_id, .. } => message_id,
        other => panic!("unexpected {other:?}"),
    };
    let stored = session.find_message(&c1(), &confirmed).unwrap();
    assert_eq!(
        stored.attachment.as_ref().and_then(|a| a.url.as_deref()),
        Some("memory://uploads/map.png")
    );
}

#[tokio::test]
async fn oversized_attachments_are_refused() {
    let backend = seeded();
    let config = SessionConfig::default().with_size_limits(4, 8);
    let mut session = session_with(&backend, config).await;

    let err = session
        .stage_image(AttachmentUpload::new("big.png", "image/png", vec![0; 5]))
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    session
        .stage_file(AttachmentUpload::new("ok.bin", "application/octet-stream", vec![0; 8]))
        .unwrap();
    assert!(session
        .stage_file(AttachmentUpload::new("big.bin", "application/octet-stream", vec![0; 9]))
        .is_err());
    assert_eq!(session.view().attachment.unwrap().name, "ok.bin");
}

#[tokio::test]
async fn switching_conversation_clears_drafts() {
    let backend = seeded();
    let mut session = open(&backend).await;
    session
        .stage_file(AttachmentUpload::new("notes.txt", "text/plain", b"notes".to_vec()))
        .unwrap();
    session.set_reply_target(MessageId::server("s1")).unwrap();
    session.search("abc");

    session.select_conversation(c2()).await.unwrap();
    let view = session.view();
    assert!(view.attachment.is_none());
    assert!(view.reply_target.is_none());
    assert!(view.search.is_none());
    assert_eq!(view.active.unwrap().id, c2());
}

#[tokio::test]
async fn late_send_lands_in_its_own_conversation() {
    let backend = seeded();
    let mut session = open(&backend).await;
    let pending = session.send("for c1").unwrap();

    session.select_conversation(c2()).await.unwrap();
    let c2_before: Vec<MessageId> = session.messages(&c2()).iter().map(|m| m.id.clone()).collect();

    let reconciliation = reconcile(&mut session).await;
    assert_eq!(reconciliation.conversation_id(), &c1());
    let confirmed = match reconciliation {
        Reconciliation::Confirmed { message_id, .. } => message_id,
        other => panic!("unexpected {other:?}"),
    };

    let c2_after: Vec<MessageId> = session.messages(&c2()).iter().map(|m| m.id.clone()).collect();
    assert_eq!(c2_before, c2_after);
    assert!(session.find_message(&c2(), &confirmed).is_none());
    assert!(session.find_message(&c1(), &confirmed).is_some());
    assert!(session.find_message(&c1(), &pending).is_none());

    session.select_conversation(c1()).await.unwrap();
    assert!(visible_ids(&session).contains(&confirmed.to_string()));
}

#[tokio::test]
async fn reselect_during_failed_delete_restores_a_single_copy() {
    let backend = seeded();
    let mut session = open(&backend).await;
    backend.fail_next(Endpoint::DeleteMessage, ChatError::Network("offline".into()));

    session.delete(&MessageId::server("s2")).unwrap();
    session.select_conversation(c1()).await.unwrap();
    assert_eq!(visible_ids(&session), vec!["s1", "s3"]);

    assert!(matches!(
        reconcile(&mut session).await,
        Reconciliation::RolledBack { kind: MutationKind::Delete, .. }
    ));
    assert_eq!(visible_ids(&session), vec!["s1", "s2", "s3"]);
}

#[tokio::test]
async fn reselect_during_delete_keeps_the_message_hidden() {
    let backend = seeded();
    let mut session = open(&backend).await;

    session.delete(&MessageId::server("s2")).unwrap();
    session.select_conversation(c2()).await.unwrap();
    session.select_conversation(c1()).await.unwrap();
    assert_eq!(visible_ids(&session), vec!["s1", "s3"]);

    reconcile(&mut session).await;
    assert_eq!(visible_ids(&session), vec!["s1", "s3"]);
    assert!(backend.stored_message(&MessageId::server("s2")).is_none());
}

#[tokio::test]
async fn reselect_during_send_keeps_the_pending_message() {
    let backend = seeded();
    let mut session = open(&backend).await;

    let pending = session.send("hello").unwrap();
    session.select_conversation(c1()).await.unwrap();
    assert_eq!(
        visible_ids(&session),
        vec!["s1".to_string(), "s2".to_string(), "s3".to_string(), pending.to_string()]
    );

    let confirmed = match reconcile(&mut session).await {
        Reconciliation::Confirmed { message_id, .. } => message_id,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(
        visible_ids(&session),
        vec!["s1".to_string(), "s2".to_string(), "s3".to_string(), confirmed.to_string()]
    );
    assert!(!session.is_sending());
}

#[tokio::test]
async fn returning_during_send_shows_the_confirmed_message_once() {
    let backend = seeded();
    let mut session = open(&backend).await;

    session.send("hello").unwrap();
    session.select_conversation(c2()).await.unwrap();
    session.select_conversation(c1()).await.unwrap();

    let confirmed = match reconcile(&mut session).await {
        Reconciliation::Confirmed { message_id, .. } => message_id,
        other => panic!("unexpected {other:?}"),
    };
    let ids = visible_ids(&session);
    assert_eq!(ids.len(), 4);
    assert_eq!(ids.iter().filter(|id| **id == confirmed.to_string()).count(), 1);

    session.select_conversation(c1()).await.unwrap();
    assert_eq!(visible_ids(&session).len(), 4);
}

#[tokio::test]
async fn reselect_during_reaction_keeps_it_until_rollback() {
    let backend = seeded();
    let mut session = open(&backend).await;
    let target = MessageId::server("s1");
    let mine = |session: &ChatSession| {
        session
            .find_message(&c1(), &target)
            .and_then(|m| m.reactions.get(&me().id).cloned())
    };
    backend.fail_next(Endpoint::React, ChatError::Network("offline".into()));

    session.react(&target, "👍").unwrap();
    session.select_conversation(c1()).await.unwrap();
    assert_eq!(mine(&session).as_deref(), Some("👍"));

    reconcile(&mut session).await;
    assert_eq!(mine(&session), None);
}

#[tokio::test]
async fn deleting_a_parent_drops_its_reply_matches() {
    let backend = seeded();
    backend.insert_message(reply("r1", "s1", 4));
    let mut session = open(&backend).await;
    session.load_replies(&MessageId::server("s1")).await.unwrap();

    assert!(matches!(session.search("r1"), SearchOutcome::Matches { count: 1, .. }));
    session.delete(&MessageId::server("s1")).unwrap();
    assert_eq!(visible_ids(&session), vec!["s2", "s3"]);
    assert_eq!(session.search_next(), None);
}

#[tokio::test]
async fn selecting_an_unlisted_conversation_fetches_it() {
    let backend = seeded();
    let mut session = session_with(&backend, SessionConfig::default()).await;
    let newcomer = Participant::new(UserId::new("new"), "New");
    backend.insert_conversation(conversation("c9", newcomer, 60));

    session.select_conversation(ConversationId::new("c9")).await.unwrap();
    assert_eq!(backend.calls(Endpoint::GetConversation), 1);
    assert_eq!(session.conversations()[0].id, ConversationId::new("c9"));

    let err = session
        .select_conversation(ConversationId::new("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
    assert_eq!(session.notices().len(), 1);
}

#[tokio::test]
async fn starting_a_conversation_reuses_an_existing_one() {
    let backend = seeded();
    let mut session = session_with(&backend, SessionConfig::default()).await;
    let listed = session.conversations().len();

    let id = session.start_conversation(&them().id).await.unwrap();
    assert_eq!(id, c1());
    assert_eq!(session.conversations().len(), listed);
    assert_eq!(session.active_conversation(), Some(&c1()));

    backend.register_user(Participant::new(UserId::new("fresh"), "Fresh"));
    let fresh = session.start_conversation(&UserId::new("fresh")).await.unwrap();
    assert_eq!(session.conversations().len(), listed + 1);
    assert_eq!(session.active_conversation(), Some(&fresh));
    assert!(session.visible_messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn poller_updates_unread_until_teardown() {
    let backend = seeded();
    let config = SessionConfig::default().with_poll_interval(Duration::from_secs(10));
    let mut session = session_with(&backend, config).await;
    session.select_conversation(c1()).await.unwrap();
    session.start_polling();

    backend.set_unread(&c1(), 4);
    backend.set_unread(&c2(), 3);
    sleep(Duration::from_secs(11)).await;
    let events = session.drain_events();
    assert_eq!(
        events,
        vec![SessionEvent::UnreadUpdated(UnreadSummary {
            has_unread: true,
            total_unread: 3,
        })]
    );
    assert!(session.has_unread());
    assert_eq!(session.view().active.unwrap().unread_count, 0);

    session.teardown();
    let polls = backend.calls(Endpoint::ListConversations);
    backend.set_unread(&c2(), 9);
    sleep(Duration::from_secs(120)).await;

    assert!(session.drain_events().is_empty());
    assert_eq!(backend.calls(Endpoint::ListConversations), polls);
    let c2_unread = session
        .conversations()
        .iter()
        .find(|c| c.id == c2())
        .map(|c| c.unread_count);
    assert_eq!(c2_unread, Some(3));
    assert!(!session.is_polling());
}

#[tokio::test(start_paused = true)]
async fn queued_poll_is_ignored_after_teardown() {
    let backend = seeded();
    let config = SessionConfig::default().with_poll_interval(Duration::from_secs(1));
    let mut session = session_with(&backend, config).await;
    session.start_polling();

    backend.set_unread(&c2(), 2);
    sleep(Duration::from_millis(1500)).await;
    session.teardown();
    assert!(session.drain_events().is_empty());
    assert!(!session.has_unread());
}

#[tokio::test(start_paused = true)]
async fn auth_failure_blocks_mutations_until_acknowledged() {
    let backend = seeded();
    let config = SessionConfig::default().with_poll_interval(Duration::from_secs(5));
    let mut session = session_with(&backend, config).await;
    session.select_conversation(c1()).await.unwrap();
    session.start_polling();

    backend.fail_next(Endpoint::ListConversations, ChatError::Auth("token expired".into()));
    sleep(Duration::from_secs(6)).await;
    let events = session.drain_events();
    assert!(matches!(events.as_slice(), [SessionEvent::PollFailed(ChatError::Auth(_))]));
    assert!(!session.is_polling());

    let notice = session.notices()[0].clone();
    assert!(notice.blocking);
    assert!(matches!(session.send("hi"), Err(ChatError::Auth(_))));
    assert_eq!(session.in_flight(), 0);

    assert!(session.acknowledge_notice(notice.id));
    session.send("hi").unwrap();
    assert_eq!(session.in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn debounced_search_runs_once_for_the_last_query() {
    let backend = seeded();
    let mut session = open(&backend).await;

    session.search_debounced("x");
    sleep(Duration::from_millis(100)).await;
    session.search_debounced("abc");
    assert!(session.is_search_pending());
    sleep(Duration::from_millis(400)).await;

    let events = session.drain_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        SessionEvent::Search(SearchOutcome::Matches { count: 2, .. })
    ));
    assert_eq!(session.view().search.unwrap().query, "abc");

    session.search_debounced("def");
    session.select_conversation(c2()).await.unwrap();
    sleep(Duration::from_secs(1)).await;
    assert!(session.drain_events().is_empty());
    assert!(session.view().search.is_none());
}

#[tokio::test]
async fn teardown_lets_in_flight_mutations_finish() {
    let backend = seeded();
    let mut session = open(&backend).await;
    session.start_polling();
    session.send("bye").unwrap();
    session.teardown();

    assert!(matches!(
        reconcile(&mut session).await,
        Reconciliation::Confirmed { kind: MutationKind::Send, .. }
    ));
}
