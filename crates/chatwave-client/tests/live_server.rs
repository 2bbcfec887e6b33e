//! Two clients talking through a real server on a loopback port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chatwave_client::cache::ClientCache;
use chatwave_client::client::ChatClient;
use chatwave_client::config::ClientConfig;
use chatwave_client::connection;
use chatwave_client::error::ClientError;
use chatwave_client::history::HttpHistory;
use chatwave_server::api::{build_router, AppState};
use chatwave_server::auth::TokenTable;
use chatwave_server::config::ServerConfig;
use chatwave_server::gateway::Gateway;
use chatwave_server::rate_limit::RateLimiter;
use chatwave_server::store::SqliteMessageStore;
use chatwave_shared::error::ChatError;
use chatwave_shared::models::Payload;
use chatwave_shared::status::{DeliveryState, MessageStatus};
use chatwave_shared::types::{ChatId, UserId};

struct Server {
    addr: SocketAddr,
    chat: ChatId,
    alice: UserId,
    bob: UserId,
}

async fn start_server() -> Server {
    let store = SqliteMessageStore::open_in_memory().unwrap();
    let (alice, bob) = (UserId::new(), UserId::new());
    let chat = store
        .database()
        .lock()
        .get_or_create_direct_chat(alice, bob)
        .unwrap()
        .id;

    let tokens = TokenTable::new();
    tokens.grant("alice-token", alice, None).await;
    tokens.grant("bob-token", bob, None).await;

    let gateway = Gateway::new(Arc::new(store), Arc::new(tokens), &ServerConfig::default());
    let state = AppState {
        gateway,
        rate_limiter: RateLimiter::default(),
        history_max_limit: 200,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Server {
        addr,
        chat,
        alice,
        bob,
    }
}

fn config(server: &Server, token: &str, user: UserId) -> ClientConfig {
    ClientConfig {
        server_url: format!("http://{}", server.addr),
        token: token.to_string(),
        user_id: Some(user),
        reconnect_initial: Duration::from_millis(50),
        reconnect_max: Duration::from_millis(200),
        ..ClientConfig::default()
    }
}

fn start_client(server: &Server, token: &str, user: UserId) -> ChatClient {
    let config = config(server, token, user);
    let history = Arc::new(HttpHistory::new(config.server_url.clone(), config.token.clone()));
    let (client, outbound) =
        ChatClient::new(config, user, Arc::new(ClientCache::new(8)), history);
    tokio::spawn(connection::run(client.clone(), outbound));
    client
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn message_reaches_peer_and_sender_sees_delivered() {
    let server = start_server().await;
    let alice = start_client(&server, "alice-token", server.alice);
    let bob = start_client(&server, "bob-token", server.bob);
    let chat = server.chat;

    alice.open_chat(chat).await;
    bob.open_chat(chat).await;
    eventually("both connected", || alice.is_connected() && bob.is_connected()).await;

    let temp = alice.send(chat, Payload::text("Hello Bob")).unwrap();

    eventually("bob receives", || bob.messages(chat).len() == 1).await;
    eventually("alice sees delivered", || {
        alice.messages(chat).first().map(|m| m.state)
            == Some(DeliveryState::Confirmed(MessageStatus::Delivered))
    })
    .await;

    let mine = alice.messages(chat);
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].temp_id, Some(temp));
    assert!(mine[0].is_user);
    let theirs = bob.messages(chat);
    assert_eq!(theirs[0].server_id, mine[0].server_id);
    assert_eq!(theirs[0].payload, Payload::text("Hello Bob"));
    assert!(!theirs[0].is_user);

    // Chat details arrive with the first sync.
    eventually("bob has chat details", || bob.chat_meta(chat).is_some()).await;
    assert_eq!(bob.chat_meta(chat).unwrap().title(&server.bob), server.alice.to_string());

    // Bob reads; alice sees it.
    bob.mark_read(chat).unwrap();
    eventually("alice sees read", || {
        alice.messages(chat)[0].state == DeliveryState::Confirmed(MessageStatus::Read)
    })
    .await;
    assert_eq!(alice.pending_count(), 0);
}

#[tokio::test]
async fn late_joiner_catches_up_through_history() {
    let server = start_server().await;
    let alice = start_client(&server, "alice-token", server.alice);
    let chat = server.chat;

    alice.open_chat(chat).await;
    eventually("alice connected", || alice.is_connected()).await;
    for i in 0..3 {
        alice.send(chat, Payload::text(format!("note {i}"))).unwrap();
    }
    eventually("alice confirmed", || {
        let messages = alice.messages(chat);
        messages.len() == 3 && messages.iter().all(|m| m.is_confirmed())
    })
    .await;

    let bob = start_client(&server, "bob-token", server.bob);
    bob.open_chat(chat).await;
    eventually("bob resynced", || bob.messages(chat).len() == 3).await;

    let texts: Vec<_> = bob
        .messages(chat)
        .iter()
        .map(|m| m.payload.content.clone())
        .collect();
    assert_eq!(
        texts,
        vec![
            Some("note 0".to_string()),
            Some("note 1".to_string()),
            Some("note 2".to_string())
        ]
    );
}

#[tokio::test]
async fn bad_token_stops_the_connection_loop() {
    let server = start_server().await;
    let config = config(&server, "stolen", server.alice);
    let history = Arc::new(HttpHistory::new(config.server_url.clone(), config.token.clone()));
    let (client, outbound) =
        ChatClient::new(config, server.alice, Arc::new(ClientCache::new(4)), history);

    let result = tokio::time::timeout(Duration::from_secs(5), connection::run(client, outbound))
        .await
        .expect("loop should give up");
    assert!(matches!(
        result,
        Err(ClientError::Chat(ChatError::Authentication(_)))
    ));
}
