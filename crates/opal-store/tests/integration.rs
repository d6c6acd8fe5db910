//! Integration tests for the opal-store crate.
//!
//! These tests exercise session CRUD, message ordering and round-trips,
//! the attachment ledger, and cancel signal visibility against real SQLite
//! databases (in-memory and on-disk).

use opal_store::{
    Attachment, AttachmentKind, AttachmentOp, Database, NewMessage, SessionStore, StoreError,
};

async fn store() -> SessionStore {
    let db = Database::open_in_memory().expect("in-memory db");
    db.run_migrations().await.expect("migrations");
    SessionStore::new(db)
}

// ═══════════════════════════════════════════════════════════════════════
//  Session lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_get_list_delete() {
    let store = store().await;

    let a = store.create("/tmp/a").await.unwrap();
    let b = store.create("/tmp/b").await.unwrap();

    let got = store.get(&a.id).await.unwrap();
    assert_eq!(got.working_dir, "/tmp/a");

    let all = store.list().await.unwrap();
    assert_eq!(all.len(), 2);

    store.delete(&b.id).await.unwrap();
    assert!(matches!(
        store.get(&b.id).await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn delete_missing_session_is_not_found() {
    let store = store().await;
    assert!(matches!(
        store.delete("nope").await,
        Err(StoreError::NotFound { .. })
    ));
}

// ═══════════════════════════════════════════════════════════════════════
//  Message log
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn messages_round_trip_in_append_order() {
    let store = store().await;
    let session = store.create("/tmp").await.unwrap();

    let mut assistant = NewMessage::new("assistant", "");
    assistant.tool_calls = Some(r#"[{"id":"c1","name":"list_files","arguments":"{}"}]"#.into());

    let mut tool = NewMessage::new("tool", "3 files");
    tool.tool_call_id = Some("c1".into());

    let expected_roles = ["user", "assistant", "tool"];
    store
        .append_message(&session.id, NewMessage::new("user", "list the files"))
        .await
        .unwrap();
    store.append_message(&session.id, assistant).await.unwrap();
    store.append_message(&session.id, tool).await.unwrap();

    let messages = store.messages(&session.id).await.unwrap();
    assert_eq!(messages.len(), 3);
    for (i, m) in messages.iter().enumerate() {
        assert_eq!(m.seq, i as i64);
        assert_eq!(m.role, expected_roles[i]);
    }
    assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
    assert!(messages[1].tool_calls.as_deref().unwrap().contains("c1"));
}

#[tokio::test]
async fn append_to_missing_session_fails() {
    let store = store().await;
    let err = store
        .append_message("ghost", NewMessage::new("user", "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn compressed_message_retains_sources() {
    let store = store().await;
    let session = store.create("/tmp").await.unwrap();

    let mut summary = NewMessage::new("assistant", "Earlier: user asked about files.");
    summary.is_compressed = true;
    summary.source_messages = Some(r#"[{"role":"user","content":"list files"}]"#.into());
    store.append_message(&session.id, summary).await.unwrap();

    let messages = store.messages(&session.id).await.unwrap();
    assert!(messages[0].is_compressed);
    assert!(messages[0].source_messages.as_deref().unwrap().contains("list files"));
}

#[tokio::test]
async fn persisted_log_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("opal.db");

    let session_id = {
        let db = Database::open_and_migrate(path.clone()).await.unwrap();
        let store = SessionStore::new(db);
        let session = store.create("/tmp").await.unwrap();
        store
            .append_message(&session.id, NewMessage::new("user", "persist me"))
            .await
            .unwrap();
        session.id
    };

    let db = Database::open_and_migrate(path).await.unwrap();
    let store = SessionStore::new(db);
    let messages = store.messages(&session_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "persist me");
}

// ═══════════════════════════════════════════════════════════════════════
//  Attachment ledger
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn ledger_folds_into_current_set() {
    let store = store().await;
    let session = store.create("/tmp").await.unwrap();

    let report = Attachment::reference("report.md", "text/markdown")
        .with_data("IyBSZXBvcnQ=")
        .with_kind(AttachmentKind::Artifact);

    store
        .append_attachment_op(&session.id, AttachmentOp::Add { attachment: report })
        .await
        .unwrap();
    store
        .append_attachment_op(
            &session.id,
            AttachmentOp::Remove {
                name: "report.md".into(),
            },
        )
        .await
        .unwrap();
    store
        .append_attachment_op(
            &session.id,
            AttachmentOp::Add {
                attachment: Attachment::reference("report.md", "text/markdown")
                    .with_description("v2"),
            },
        )
        .await
        .unwrap();

    let current = store.attachments(&session.id).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current["report.md"].description, "v2");

    // The ledger itself keeps all three entries.
    let ledger = store.attachment_ledger(&session.id).await.unwrap();
    assert_eq!(ledger.len(), 3);
}

#[tokio::test]
async fn oversized_inline_attachment_is_stored_reference_only() {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    let store = SessionStore::new(db).with_inline_cap(64);
    let session = store.create("/tmp").await.unwrap();

    let big = Attachment::reference("blob.bin", "application/octet-stream")
        .with_data("QUFB".repeat(100))
        .with_uri("https://example.com/blob.bin");
    store
        .append_attachment_op(&session.id, AttachmentOp::Add { attachment: big })
        .await
        .unwrap();

    let current = store.attachments(&session.id).await.unwrap();
    let stored = &current["blob.bin"];
    assert!(stored.data.is_none());
    assert_eq!(stored.uri.as_deref(), Some("https://example.com/blob.bin"));
}

// ═══════════════════════════════════════════════════════════════════════
//  Cancel signal
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn cancel_is_immediately_visible() {
    let store = store().await;
    let session = store.create("/tmp").await.unwrap();

    let rx = store.cancel_signal(&session.id);
    assert!(!*rx.borrow());
    assert!(!store.is_cancelled(&session.id));

    store.set_cancel(&session.id);
    assert!(*rx.borrow());
    assert!(store.is_cancelled(&session.id));

    store.clear_cancel(&session.id);
    assert!(!store.is_cancelled(&session.id));
}

#[tokio::test]
async fn cancel_signal_wakes_waiters() {
    let store = store().await;
    let session = store.create("/tmp").await.unwrap();

    let mut rx = store.cancel_signal(&session.id);
    let waiter = tokio::spawn(async move {
        rx.wait_for(|cancelled| *cancelled).await.is_ok()
    });

    store.set_cancel(&session.id);
    assert!(waiter.await.unwrap());
}
