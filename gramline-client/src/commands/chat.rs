//! Interactive chat: the reconciliation engine wired to its three inputs.
//!
//! The loop below is the single writer for the engine, which serializes all
//! per-conversation mutations: live stream events, fetch completions, send
//! staging/rollback, and fallback resolutions all pass through it in turn.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;
use uuid::Uuid;

use shared::models::{MessageContent, WorkspaceStreamEvent};

use crate::api::ApiClient;
use crate::stream;
use crate::sync::cache::InMemoryCache;
use crate::sync::engine::{EventOutcome, SyncEngine};

use super::history::render_line;

const FALLBACK_DELAY: Duration = Duration::from_secs(4);
const HISTORY_WINDOW: usize = 25;

#[derive(Args, Debug)]
#[command(about = "Chat in a conversation with live updates")]
pub struct ChatArgs {
    /// Conversation identifier
    #[arg(long, alias = "conv")]
    pub conversation: Uuid,

    /// Gramline server base URL (default: <http://localhost:8080>)
    #[arg(long, default_value = "http://localhost:8080")]
    pub server: String,

    /// Dashboard session token
    #[arg(long, env = "GRAMLINE_TOKEN")]
    pub token: String,
}

pub async fn handle_chat(args: ChatArgs) -> Result<()> {
    let api = ApiClient::new(&args.server, args.token)?;
    let conversation = args.conversation;
    let mut engine = SyncEngine::new(InMemoryCache::default());

    // Live events flow in from a reconnecting stream task.
    let (event_tx, mut event_rx) = mpsc::channel::<WorkspaceStreamEvent>(64);
    let stream_api = api.clone();
    tokio::spawn(async move {
        stream::follow(stream_api, event_tx).await;
    });

    // Fallback timers report the temp id whose echo may have been dropped.
    let (fallback_tx, mut fallback_rx) = mpsc::channel::<Uuid>(16);

    refetch(&api, &mut engine, conversation).await?;
    for message in engine.messages(conversation) {
        render_line(message);
    }
    println!("-- type a message and press enter; ctrl-c to quit --");

    let mut input_lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match engine.on_live_event(&event) {
                    EventOutcome::Appended | EventOutcome::ConfirmedPending { .. } => {
                        if let Some(message) = engine.messages(conversation).last() {
                            render_line(message);
                        }
                    }
                    EventOutcome::AlreadyKnown => {}
                    EventOutcome::Unroutable => {
                        // The server could not resolve a conversation for
                        // this event; self-heal with a full refetch.
                        debug!("unroutable event, refetching history");
                        refetch(&api, &mut engine, conversation).await?;
                    }
                }
            }

            line = input_lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let draft = line.trim().to_string();
                if draft.is_empty() {
                    continue;
                }

                send_with_rollback(
                    &api,
                    &mut engine,
                    conversation,
                    draft,
                    &fallback_tx,
                ).await;
            }

            Some(temp_id) = fallback_rx.recv() => {
                // Only act if the echo never arrived.
                if engine.is_pending(conversation, temp_id) {
                    debug!(%temp_id, "fallback fetch for unresolved send");
                    let latest = api.latest_messages(conversation, 1).await?;
                    let resolved = engine.resolve_with_latest(conversation, latest.messages);
                    if resolved > 0 {
                        println!("(send confirmed via fallback)");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Generation-guarded history refetch.
async fn refetch(
    api: &ApiClient,
    engine: &mut SyncEngine<InMemoryCache>,
    conversation: Uuid,
) -> Result<()> {
    let generation = engine.begin_fetch(conversation);
    let page = api
        .message_page(conversation, HISTORY_WINDOW, None)
        .await?;

    // The page is newest-first; the engine keeps oldest-first.
    let mut fetched = page.messages;
    fetched.reverse();

    engine.complete_fetch(conversation, generation, fetched);
    Ok(())
}

/// Optimistic send: placeholder first, rollback with restored draft on
/// failure, delayed fallback fetch on success.
async fn send_with_rollback(
    api: &ApiClient,
    engine: &mut SyncEngine<InMemoryCache>,
    conversation: Uuid,
    draft: String,
    fallback_tx: &mpsc::Sender<Uuid>,
) {
    let content = MessageContent::Text { body: draft.clone() };
    let placeholder = engine.stage_send(conversation, content.clone(), draft);

    if let Some(message) = engine.messages(conversation).last() {
        render_line(message);
    }

    match api.send_message(conversation, content).await {
        Ok(_) => {
            let fallback_tx = fallback_tx.clone();
            let temp_id = placeholder.id;
            tokio::spawn(async move {
                sleep(FALLBACK_DELAY).await;
                let _ = fallback_tx.send(temp_id).await;
            });
        }
        Err(err) => {
            let restored = engine.rollback_send(conversation, placeholder.id);
            eprintln!("send failed: {err:#}");
            if let Some(draft) = restored {
                eprintln!("draft restored: {draft}");
            }
        }
    }
}
