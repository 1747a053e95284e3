use anyhow::Result;
use clap::Args;

use crate::api::ApiClient;

#[derive(Args, Debug)]
#[command(about = "List the workspace's conversations")]
pub struct InboxArgs {
    /// Gramline server base URL (default: <http://localhost:8080>)
    #[arg(long, default_value = "http://localhost:8080")]
    pub server: String,

    /// Dashboard session token
    #[arg(long, env = "GRAMLINE_TOKEN")]
    pub token: String,
}

pub async fn handle_inbox(args: InboxArgs) -> Result<()> {
    let api = ApiClient::new(&args.server, args.token)?;
    let listing = api.conversations().await?;

    if listing.conversations.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }

    for conversation in &listing.conversations {
        let name = conversation
            .participant_name
            .as_deref()
            .unwrap_or(&conversation.participant_id);
        let unread = if conversation.unread_count > 0 {
            format!(" [{} unread]", conversation.unread_count)
        } else {
            String::new()
        };

        println!(
            "- {} {}{}  last: {}  ({})",
            conversation.id, name, unread, conversation.last_activity_at, conversation.last_preview,
        );
    }

    Ok(())
}
