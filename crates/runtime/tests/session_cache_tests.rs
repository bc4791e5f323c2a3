//! KV session cache save, restore and prefix verification tests

mod common;

use common::*;
use llamaslot_runtime::{CompletionParams, SessionLoad, SessionPersistence, Slot, SlotError};

#[tokio::test]
async fn test_load_without_file_is_nothing_to_load() {
    let fx = fixture();
    fx.runtime.slots().bind(Slot::MainChat, CHAT_A).await.unwrap();

    let outcome = fx.runtime.load_session().await.unwrap();
    assert_eq!(outcome, SessionLoad::NothingToLoad);
    assert!(!fx.runtime.session().is_loaded());
}

#[tokio::test]
async fn test_save_then_verify_prefix() {
    let fx = fixture();
    let binding = fx.runtime.slots().bind(Slot::MainChat, CHAT_A).await.unwrap();
    let session = fx.runtime.session();

    assert!(!session.path().exists());
    let report = session.save(&binding, vec![10, 20, 30]).await.unwrap();
    assert!(session.path().exists());
    assert_eq!(report.recorded_tokens, 3);
    assert!(report.file_size > 0);

    let result = session.verify(&[10, 20, 30, 40]);
    assert!(result.matched);
    assert_eq!(result.match_length, 3);
    assert_eq!(result.cached_length, 3);
    assert_eq!(result.input_length, 4);

    let diverged = session.verify(&[10, 99, 30]);
    assert!(!diverged.matched);
    assert_eq!(diverged.match_length, 1);
}

#[tokio::test]
async fn test_save_then_load_marks_loaded() {
    let fx = fixture();
    fx.runtime.slots().bind(Slot::MainChat, CHAT_A).await.unwrap();

    fx.runtime.save_session(Some("cached prompt")).await.unwrap();
    assert_eq!(fx.runtime.session().record().tokens, tokenize("cached prompt"));

    let outcome = fx.runtime.load_session().await.unwrap();
    assert!(matches!(outcome, SessionLoad::Restored { .. }));
    assert!(fx.runtime.session().is_loaded());

    // A fresh engine starts with an empty KV cache.
    fx.runtime.slots().bind(Slot::MainChat, CHAT_B).await.unwrap();
    assert!(!fx.runtime.session().is_loaded());
}

#[tokio::test]
async fn test_manual_save_without_prompt_keeps_record() {
    let fx = fixture();
    let binding = fx.runtime.slots().bind(Slot::MainChat, CHAT_A).await.unwrap();
    fx.runtime.session().save(&binding, vec![1, 2]).await.unwrap();

    fx.runtime.save_session(None).await.unwrap();
    assert_eq!(fx.runtime.session().record().tokens, vec![1, 2]);
}

#[tokio::test]
async fn test_corrupt_session_file_does_not_block() {
    let fx = fixture();
    fx.runtime.slots().bind(Slot::MainChat, CHAT_A).await.unwrap();
    let path = fx.runtime.session().path().to_path_buf();
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&path, b"garbage").await.unwrap();

    let outcome = fx.runtime.load_session().await.unwrap();
    assert!(matches!(outcome, SessionLoad::Failed { .. }));
    assert!(!fx.runtime.session().is_loaded());

    let result = fx
        .runtime
        .completion()
        .complete(CompletionParams::new("still works"), |_| {})
        .await
        .unwrap();
    assert_eq!(result.text, "Hello, world");
}

#[tokio::test]
async fn test_completion_persists_prompt_tokens() {
    let fx = fixture_with(|config| config.session.persist = true);
    fx.runtime.slots().bind(Slot::MainChat, CHAT_A).await.unwrap();

    let result = fx
        .runtime
        .completion()
        .complete(CompletionParams::new("the quick brown fox"), |_| {})
        .await
        .unwrap();

    match result.session {
        SessionPersistence::Saved(report) => {
            assert_eq!(report.recorded_tokens, 4);
            assert_eq!(report.saved_tokens, 4);
        }
        other => panic!("expected Saved, got {:?}", other),
    }

    // The prompt is recorded, not the generated text.
    let record = fx.runtime.session().record();
    assert_eq!(record.tokens, tokenize("the quick brown fox"));
    assert!(record.persisted);
    assert!(fx
        .runtime
        .session()
        .verify(&tokenize("the quick brown fox jumps"))
        .matched);
}

#[tokio::test]
async fn test_failed_save_is_non_fatal_and_clears_record() {
    let fx = fixture_with(|config| config.session.persist = true);
    fx.runtime.slots().bind(Slot::MainChat, CHAT_A).await.unwrap();
    fx.runtime
        .completion()
        .complete(CompletionParams::new("first prompt"), |_| {})
        .await
        .unwrap();
    assert!(fx.runtime.session().record().persisted);

    fx.loader.set_script(Script {
        fail_session_save: true,
        ..Script::default()
    });
    fx.runtime.slots().bind(Slot::MainChat, CHAT_B).await.unwrap();

    let result = fx
        .runtime
        .completion()
        .complete(CompletionParams::new("second prompt"), |_| {})
        .await
        .unwrap();

    assert_eq!(result.text, "Hello, world");
    assert!(matches!(result.session, SessionPersistence::Failed { .. }));
    let record = fx.runtime.session().record();
    assert!(record.tokens.is_empty());
    assert!(!record.persisted);
}

#[tokio::test]
async fn test_persist_flag_can_be_toggled() {
    let fx = fixture();
    fx.runtime.slots().bind(Slot::MainChat, CHAT_A).await.unwrap();
    let completion = fx.runtime.completion();

    completion.set_persist_session(true);
    let result = completion
        .complete(CompletionParams::new("hello"), |_| {})
        .await
        .unwrap();
    assert!(matches!(result.session, SessionPersistence::Saved(_)));

    completion.set_persist_session(false);
    let result = completion
        .complete(CompletionParams::new("hello again"), |_| {})
        .await
        .unwrap();
    assert_eq!(result.session, SessionPersistence::Disabled);
    assert_eq!(fx.runtime.session().record().tokens, tokenize("hello"));
}

#[tokio::test]
async fn test_session_requires_main_chat() {
    let fx = fixture();
    assert!(matches!(
        fx.runtime.load_session().await,
        Err(SlotError::NoModelLoaded { slot: Slot::MainChat })
    ));

    let binding = fx.runtime.slots().bind(Slot::Embedding, EMBED).await.unwrap();
    assert!(matches!(
        fx.runtime.session().save(&binding, vec![1]).await,
        Err(SlotError::SessionIo { .. })
    ));
}

#[tokio::test]
async fn test_info_and_delete() {
    let fx = fixture();
    let binding = fx.runtime.slots().bind(Slot::MainChat, CHAT_A).await.unwrap();
    let session = fx.runtime.session();
    session.save(&binding, vec![7, 8, 9]).await.unwrap();

    let info = session.info().await;
    assert!(info.exists);
    assert_eq!(info.cached_tokens, 3);
    assert!(info.persisted);
    assert_eq!(info.file_size, session.file_size().await);

    assert!(session.delete().await.unwrap());
    let info = session.info().await;
    assert!(!info.exists);
    assert_eq!(info.cached_tokens, 0);
}

#[tokio::test]
async fn test_record_survives_restart() {
    let fx = fixture();
    let binding = fx.runtime.slots().bind(Slot::MainChat, CHAT_A).await.unwrap();
    fx.runtime.session().save(&binding, vec![10, 20, 30]).await.unwrap();

    let restarted = llamaslot_runtime::InferenceRuntime::new(
        fx.runtime.config().clone(),
        fx.catalog.clone(),
        fx.loader.clone(),
    )
    .unwrap();
    let result = restarted.session().verify(&[10, 20, 30, 40]);
    assert!(result.matched);
    assert_eq!(result.match_length, 3);
    assert!(!restarted.session().is_loaded());
}
