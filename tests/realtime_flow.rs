//! 实时链路集成测试 / Real-time pipeline integration tests
//!
//! 幂等门 → 持久变更 → 已读聚合 → 扇出 → 连接投递
//! Idempotency gate → durable mutation → read aggregation → fan-out →
//! connection delivery

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use v_chat_realtime::config;
use v_chat_realtime::domain::{ChatEvent, MessageStatus, NewMessage, UserId};
use v_chat_realtime::repo::{ChatStore, MemoryChatStore};
use v_chat_realtime::server::ConnectionHandle;
use v_chat_realtime::service::Admission;
use v_chat_realtime::store::{user_channel, EphemeralStore, MemoryStore};
use v_chat_realtime::VChatServer;

struct Fixture {
    store: Arc<MemoryStore>,
    durable: MemoryChatStore,
    server: Arc<VChatServer>,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let durable = MemoryChatStore::new();
    let config = config::load(None).unwrap();
    let server = Arc::new(VChatServer::new(
        &config,
        store.clone(),
        Arc::new(durable.clone()),
    ));
    Fixture {
        store,
        durable,
        server,
    }
}

fn text_message(chat_id: i64, author: UserId) -> NewMessage {
    NewMessage {
        chat_id,
        author_id: Some(author),
        kind: "text".to_string(),
        content: Some("hello".to_string()),
        payload: None,
    }
}

async fn next_event(sub: &mut v_chat_realtime::store::Subscription) -> ChatEvent {
    let payload = tokio::time::timeout(Duration::from_secs(1), sub.next())
        .await
        .expect("event within deadline")
        .expect("subscription alive");
    serde_json::from_str(&payload).expect("valid event envelope")
}

#[tokio::test]
async fn parallel_retries_create_exactly_one_message() {
    let f = fixture();
    let chat = f.durable.create_chat(&[1, 2]);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let server = f.server.clone();
        handles.push(tokio::spawn(async move {
            match server.idempotency.begin("tok-1").await.unwrap() {
                Admission::Admitted => {
                    server
                        .messages
                        .create_message(text_message(chat, 1))
                        .await
                        .unwrap();
                    server.idempotency.complete("tok-1").await.unwrap();
                    true
                }
                Admission::Rejected => false,
            }
        }));
    }
    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap() {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    // 恰好一行消息：用户2的未读集合正好一条 / exactly one row: user 2 sees one unread
    let touched = f.server.receipts.mark_read(chat, 2).await.unwrap();
    assert_eq!(touched.len(), 1);
}

#[tokio::test]
async fn group_read_state_transitions_when_last_reader_acks() {
    let f = fixture();
    let chat = f.durable.create_chat(&[1, 2, 3]);
    let mut sub = f.store.subscribe(&[user_channel(1)]).await.unwrap();

    let message = f
        .server
        .messages
        .create_message(text_message(chat, 1))
        .await
        .unwrap();
    assert_eq!(next_event(&mut sub).await.event, "message.created");

    // B已读：C还没读，状态保持delivered / B reads: C has not, stays delivered
    f.server.receipts.mark_read(chat, 2).await.unwrap();
    assert_eq!(next_event(&mut sub).await.event, "message.read");
    assert_eq!(
        f.durable.get_message(message.id).await.unwrap().unwrap().status,
        MessageStatus::Delivered
    );

    // C已读：除作者外全员已读，状态转为read / C reads: all-but-author done, goes read
    f.server.receipts.mark_read(chat, 3).await.unwrap();
    assert_eq!(next_event(&mut sub).await.event, "message.read");
    let updated = next_event(&mut sub).await;
    assert_eq!(updated.event, "message.updated");
    assert_eq!(updated.data["status"], "read");
    assert_eq!(
        f.durable.get_message(message.id).await.unwrap().unwrap().status,
        MessageStatus::Read
    );
}

#[tokio::test]
async fn events_reach_every_registered_device() {
    let f = fixture();
    let chat = f.durable.create_chat(&[1, 2]);

    let mut receivers = Vec::new();
    for conn_id in ["phone", "laptop"] {
        let (tx, rx) = mpsc::unbounded_channel();
        f.server.registry.register(ConnectionHandle {
            conn_id: conn_id.to_string(),
            user_id: 2,
            addr: "127.0.0.1:4321".parse().unwrap(),
            sender: tx,
            connected_at: Utc::now(),
        });
        receivers.push(rx);
    }
    f.server.ensure_user_subscription(2).await;

    f.server
        .messages
        .create_message(text_message(chat, 1))
        .await
        .unwrap();

    for rx in receivers.iter_mut() {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let Message::Text(text) = frame else {
            panic!("expected text frame");
        };
        let event: ChatEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(event.event, "message.created");
    }
}

#[tokio::test]
async fn disconnected_recipient_misses_events_until_reconciliation() {
    let f = fixture();
    let chat = f.durable.create_chat(&[1, 2]);

    // 无人订阅：事件按契约丢弃 / nobody subscribed: the event is dropped per contract
    f.server
        .messages
        .create_message(text_message(chat, 1))
        .await
        .unwrap();

    // 对账路径仍然看到未读 / the reconciliation path still sees the unread row
    let touched = f.server.receipts.mark_read(chat, 2).await.unwrap();
    assert_eq!(touched.len(), 1);
}

#[tokio::test]
async fn typing_window_closes_on_its_own() {
    let store = Arc::new(MemoryStore::new());
    let durable = MemoryChatStore::new();
    let mut config = config::load(None).unwrap();
    config.presence.typing_ttl_secs = 1;
    let server = VChatServer::new(&config, store, Arc::new(durable.clone()));
    let chat = durable.create_chat(&[5, 6]);

    server.typing.start_typing(chat, 5).await.unwrap();
    assert_eq!(server.typing.list_typing(chat).await.unwrap(), vec![5]);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(server.typing.list_typing(chat).await.unwrap().is_empty());
}
