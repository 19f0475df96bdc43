//! Chat history and login state across restarts.

use crate::helpers::{Fakes, eventually, launch, test_config};
use avatar_chat::RuntimeEvent;
use avatar_chat::history::{ChatRole, ConversationHistory};
use avatar_chat::store::{AUTH_TOKEN_KEY, CHAT_HISTORY_KEY, LocalStore, USERNAME_KEY};

fn stored_history(store: &dyn LocalStore) -> Option<ConversationHistory> {
    store
        .get(CHAT_HISTORY_KEY)
        .unwrap()
        .map(|json| serde_json::from_str(&json).unwrap())
}

#[tokio::test(start_paused = true)]
async fn history_is_saved_and_restored_by_the_next_coordinator() {
    let h = launch(test_config(), Fakes::healthy());
    h.start_active().await;
    h.handle.submit("remember me").unwrap();
    eventually(|| stored_history(h.store.as_ref()).is_some()).await;

    let saved = stored_history(h.store.as_ref()).unwrap();
    let roles: Vec<ChatRole> = saved.turns().iter().map(|t| t.role).collect();
    assert_eq!(roles, [ChatRole::System, ChatRole::User, ChatRole::Assistant]);
    assert_eq!(saved.turns()[2].content, "You said remember me.");

    let store = h.store.clone();
    h.handle.dispose().await;

    let restarted = launch(
        test_config(),
        Fakes {
            store,
            ..Fakes::healthy()
        },
    );
    let snapshot = restarted.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.history, saved.turns());

    // The restored system turn is not seeded twice.
    restarted.start_active().await;
    let snapshot = restarted.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.history.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn clear_history_keeps_the_system_prompt() {
    let mut h = launch(test_config(), Fakes::healthy());
    h.start_active().await;
    h.handle.submit("something").unwrap();
    eventually(|| stored_history(h.store.as_ref()).is_some()).await;

    h.handle.clear_history().unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(snapshot.history[0].role, ChatRole::System);
    assert_eq!(stored_history(h.store.as_ref()).unwrap().len(), 1);
    assert!(h.drain_events().contains(&RuntimeEvent::HistoryCleared));
}

#[tokio::test(start_paused = true)]
async fn login_and_logout_manage_stored_credentials() {
    let mut h = launch(test_config(), Fakes::healthy());
    h.handle.login("ada", "token-123").unwrap();
    h.handle.snapshot().await.unwrap();
    assert_eq!(h.store.get(USERNAME_KEY).unwrap().as_deref(), Some("ada"));
    assert_eq!(h.store.get(AUTH_TOKEN_KEY).unwrap().as_deref(), Some("token-123"));

    h.start_active().await;
    h.handle.submit("hello").unwrap();
    eventually(|| stored_history(h.store.as_ref()).is_some()).await;
    h.drain_events();

    h.handle.logout().unwrap();
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(h.store.get(USERNAME_KEY).unwrap(), None);
    assert_eq!(h.store.get(AUTH_TOKEN_KEY).unwrap(), None);
    assert_eq!(h.store.get(CHAT_HISTORY_KEY).unwrap(), None);

    // Session is still live, so the system prompt is seeded again.
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(snapshot.history[0].role, ChatRole::System);
    let notices: Vec<RuntimeEvent> = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, RuntimeEvent::HistoryCleared | RuntimeEvent::AuthChanged { .. }))
        .collect();
    assert_eq!(
        notices,
        [
            RuntimeEvent::HistoryCleared,
            RuntimeEvent::AuthChanged { username: None },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn unreadable_stored_history_starts_fresh() {
    let fakes = Fakes::healthy();
    fakes.store.set(CHAT_HISTORY_KEY, "not json").unwrap();
    let h = launch(test_config(), fakes);
    assert!(h.handle.snapshot().await.unwrap().history.is_empty());
}
