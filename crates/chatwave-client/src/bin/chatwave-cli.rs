//! Line-oriented chat client.
//!
//! ```text
//! CHATWAVE_TOKEN=... CHATWAVE_USER_ID=... chatwave-cli <chat-id>
//! ```
//!
//! Every input line is sent to the chat. `/read` marks the chat read,
//! `/resend <temp-id>` retries a failed message, `/quit` exits.

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chatwave_client::cache::ClientCache;
use chatwave_client::client::ChatClient;
use chatwave_client::config::ClientConfig;
use chatwave_client::connection;
use chatwave_client::entry::CachedMessage;
use chatwave_client::events::ClientNotification;
use chatwave_client::history::HttpHistory;
use chatwave_client::mirror::{MirrorWriter, SqliteMirror};
use chatwave_shared::models::Payload;
use chatwave_shared::status::DeliveryState;
use chatwave_shared::types::{ChatId, TempId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,chatwave_client=info")),
        )
        .with_target(false)
        .init();

    let chat_id: ChatId = std::env::args()
        .nth(1)
        .context("usage: chatwave-cli <chat-id>")?
        .parse::<ChatId>()
        .context("chat id must be a UUID")?;

    let config = ClientConfig::from_env();
    let Some(user_id) = config.user_id else {
        bail!("CHATWAVE_USER_ID is required");
    };
    if config.token.is_empty() {
        bail!("CHATWAVE_TOKEN is required");
    }

    let mirror = Arc::new(SqliteMirror::open_default()?);
    let cache = Arc::new(
        ClientCache::new(config.cache_capacity).with_mirror(MirrorWriter::spawn(mirror)),
    );
    let history = Arc::new(HttpHistory::new(config.server_url.clone(), config.token.clone()));

    let (client, outbound) = ChatClient::new(config.clone(), user_id, cache, history);
    let sweep_interval = config.sweep_interval;
    client.sweeper().clone().spawn(sweep_interval);
    client.spawn_expiry();

    let mut notifications = client.subscribe();
    let printer = client.clone();
    tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            print_notification(&printer, chat_id, notification);
        }
    });

    let connection = tokio::spawn(connection::run(client.clone(), outbound));

    let history = client.open_chat(chat_id).await;
    if let Some(meta) = client.chat_meta(chat_id) {
        println!("== {} ==", meta.title(&client.user_id()));
    }
    for message in history {
        println!("{}", render(&message));
    }
    info!(chat = %chat_id, "Chat open, type to send");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/read", _) => client.mark_read(chat_id)?,
            ("/resend", temp) => match client.resend(&TempId::from(temp.trim())) {
                Ok(fresh) => println!("resent as {fresh}"),
                Err(e) => eprintln!("cannot resend: {e}"),
            },
            _ if line.is_empty() => {}
            _ => {
                if let Err(e) = client.send(chat_id, Payload::text(line)) {
                    eprintln!("not sent: {e}");
                }
            }
        }
    }

    client.close_chat(chat_id);
    if let Some(mirror) = client.cache().mirror() {
        mirror.flush().await;
    }
    connection.abort();
    Ok(())
}

fn render(message: &CachedMessage) -> String {
    let marker = match message.state {
        DeliveryState::Sending => "…".to_string(),
        DeliveryState::Failed(reason) => format!("failed ({reason:?})"),
        DeliveryState::Confirmed(status) => status.as_str().to_string(),
    };
    let label = message
        .temp_id
        .as_ref()
        .map(|t| format!(" [{t}]"))
        .unwrap_or_default();
    let author = if message.is_user {
        "you".to_string()
    } else {
        message.sender_id.short()
    };
    format!(
        "{} {author}: {} ({marker}){label}",
        message.created_at.format("%H:%M:%S"),
        message.payload.summary(),
    )
}

fn print_notification(client: &ChatClient, chat_id: ChatId, notification: ClientNotification) {
    match notification {
        ClientNotification::MessagesChanged { chat_id: changed } if changed == chat_id => {
            if let Some(last) = client.messages(chat_id).last() {
                println!("{}", render(last));
            }
        }
        ClientNotification::MessageFailed { temp_id, reason, .. } => {
            println!("! {temp_id} failed ({reason:?}), /resend {temp_id} to retry");
        }
        ClientNotification::Typing {
            chat_id: typing_in,
            user_id,
            active: true,
        } if typing_in == chat_id => println!("~ {} is typing", user_id.short()),
        ClientNotification::PresenceChanged { user_id, online, .. } => {
            println!("* {} is {}", user_id.short(), if online { "online" } else { "offline" });
        }
        ClientNotification::ConnectionChanged { connected } => {
            println!("* {}", if connected { "connected" } else { "disconnected, retrying" });
        }
        ClientNotification::Error { message, .. } => eprintln!("! {message}"),
        _ => {}
    }
}
