//! Behaviour every `ConversationStore` backend must share.

use uuid::Uuid;

use super::ConversationStore;
use crate::models::{Attachment, AttachmentKind, Role};
use crate::utils::error::StoreError;

pub async fn idempotent_create(store: &dyn ConversationStore) {
    assert!(store.create("alice", "c1").await.unwrap());
    assert!(!store.create("alice", "c1").await.unwrap());

    let err = store.create("bob", "c1").await.unwrap_err();
    assert!(matches!(err, StoreError::Forbidden(_)));
}

pub async fn ownership_is_enforced(store: &dyn ConversationStore) {
    store.add_message("alice", "c1", Role::User, "secret").await.unwrap();

    assert!(matches!(
        store.full_history("bob", "c1").await,
        Err(StoreError::Forbidden(_))
    ));
    assert!(matches!(
        store.add_message("bob", "c1", Role::User, "hijack").await,
        Err(StoreError::Forbidden(_))
    ));
    assert!(matches!(
        store.clear("bob", "c1").await,
        Err(StoreError::Forbidden(_))
    ));
    assert!(matches!(
        store.summary("alice", "missing").await,
        Err(StoreError::NotFound(_))
    ));
    assert_eq!(store.full_history("alice", "c1").await.unwrap().len(), 1);
}

pub async fn add_message_creates_lazily(store: &dyn ConversationStore) {
    let msg = store.add_message("alice", "lazy", Role::User, "first").await.unwrap();
    assert_eq!(msg.conversation_id, "lazy");
    assert!(!msg.archived);

    let conversations = store.list_for_owner("alice").await.unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].title, "lazy");
    assert!(store.list_for_owner("bob").await.unwrap().is_empty());
}

pub async fn archive_hides_from_active_view(store: &dyn ConversationStore) {
    let m1 = store.add_message("alice", "c1", Role::User, "one").await.unwrap();
    let m2 = store.add_message("alice", "c1", Role::Ai, "two").await.unwrap();
    let m3 = store.add_message("alice", "c1", Role::User, "three").await.unwrap();

    store
        .archive_and_summarize("alice", "c1", &[m1.id, m2.id], "talked about one and two")
        .await
        .unwrap();

    let active = store.active_messages("alice", "c1").await.unwrap();
    assert_eq!(active.iter().map(|m| m.id).collect::<Vec<_>>(), vec![m3.id]);

    let full = store.full_history("alice", "c1").await.unwrap();
    assert_eq!(full.len(), 3);
    assert!(full[0].archived && full[1].archived && !full[2].archived);
    assert_eq!(full[0].text, "one");

    assert_eq!(
        store.summary("alice", "c1").await.unwrap().as_deref(),
        Some("talked about one and two")
    );

    // summary is replaced, never appended
    store
        .archive_and_summarize("alice", "c1", &[m3.id], "everything")
        .await
        .unwrap();
    assert_eq!(
        store.summary("alice", "c1").await.unwrap().as_deref(),
        Some("everything")
    );
}

pub async fn archive_is_all_or_nothing(store: &dyn ConversationStore) {
    let m1 = store.add_message("alice", "c1", Role::User, "one").await.unwrap();
    store.add_message("alice", "c2", Role::User, "elsewhere").await.unwrap();
    let foreign = store.active_messages("alice", "c2").await.unwrap()[0].id;

    for bad in [Uuid::new_v4(), foreign] {
        let err = store
            .archive_and_summarize("alice", "c1", &[m1.id, bad], "should not stick")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Persistence(_)));

        assert_eq!(store.summary("alice", "c1").await.unwrap(), None);
        let active = store.active_messages("alice", "c1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(!active[0].archived);
    }
}

pub async fn attach_to_latest_dedupes(store: &dyn ConversationStore) {
    store.add_message("alice", "c1", Role::User, "old").await.unwrap();
    store.add_message("alice", "c1", Role::Ai, "reply").await.unwrap();
    store.add_message("alice", "c1", Role::User, "look at this").await.unwrap();

    let pdf = Attachment::new(AttachmentKind::Document, "https://h/f.pdf")
        .with_mime_type("application/pdf");
    store
        .attach_to_latest("alice", "c1", Role::User, vec![pdf.clone(), pdf.clone()])
        .await
        .unwrap();
    store
        .attach_to_latest(
            "alice",
            "c1",
            Role::User,
            vec![
                pdf.clone(),
                Attachment::new(AttachmentKind::Link, "https://h/f.pdf"),
            ],
        )
        .await
        .unwrap();

    let full = store.full_history("alice", "c1").await.unwrap();
    assert!(full[0].attachments.is_empty());
    assert!(full[1].attachments.is_empty());
    let kinds: Vec<_> = full[2].attachments.iter().map(|a| a.kind).collect();
    assert_eq!(kinds, vec![AttachmentKind::Document, AttachmentKind::Link]);
    assert_eq!(full[2].attachments[0].mime_type.as_deref(), Some("application/pdf"));
}

pub async fn attach_without_target_is_noop(store: &dyn ConversationStore) {
    store.add_message("alice", "c1", Role::User, "hi").await.unwrap();
    store
        .attach_to_latest(
            "alice",
            "c1",
            Role::Ai,
            vec![Attachment::new(AttachmentKind::Image, "https://img/1.png")],
        )
        .await
        .unwrap();
    store.attach_to_latest("alice", "c1", Role::User, vec![]).await.unwrap();

    let full = store.full_history("alice", "c1").await.unwrap();
    assert!(full[0].attachments.is_empty());
}

pub async fn clear_resets_conversation(store: &dyn ConversationStore) {
    let m1 = store.add_message("alice", "c1", Role::User, "one").await.unwrap();
    store.add_message("alice", "c1", Role::Ai, "two").await.unwrap();
    store
        .archive_and_summarize("alice", "c1", &[m1.id], "sum")
        .await
        .unwrap();

    store.clear("alice", "c1").await.unwrap();

    assert!(store.full_history("alice", "c1").await.unwrap().is_empty());
    assert_eq!(store.summary("alice", "c1").await.unwrap(), None);
    // conversation itself survives, still owned by alice
    assert!(!store.create("alice", "c1").await.unwrap());
}

pub async fn set_title_updates_listing(store: &dyn ConversationStore) {
    store.create("alice", "c1").await.unwrap();
    store.set_title("alice", "c1", "Trip planning").await.unwrap();

    let list = store.list_for_owner("alice").await.unwrap();
    assert_eq!(list[0].title, "Trip planning");
    assert!(matches!(
        store.set_title("alice", "c1", "   ").await,
        Err(StoreError::Validation(_))
    ));
    assert!(matches!(
        store.set_title("bob", "c1", "mine now").await,
        Err(StoreError::Forbidden(_))
    ));
}
