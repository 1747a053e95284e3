use anyhow::Result;
use clap::Args;
use uuid::Uuid;

use crate::api::ApiClient;
use shared::models::Message;

#[derive(Args, Debug)]
#[command(about = "Print a conversation's history, oldest first")]
pub struct HistoryArgs {
    /// Conversation identifier
    #[arg(long, alias = "conv")]
    pub conversation: Uuid,

    /// Page size used while walking the cursor chain
    #[arg(long, default_value_t = 25)]
    pub page_size: usize,

    /// Maximum number of pages to fetch
    #[arg(long, default_value_t = 4)]
    pub max_pages: usize,

    /// Gramline server base URL (default: <http://localhost:8080>)
    #[arg(long, default_value = "http://localhost:8080")]
    pub server: String,

    /// Dashboard session token
    #[arg(long, env = "GRAMLINE_TOKEN")]
    pub token: String,
}

pub async fn handle_history(args: HistoryArgs) -> Result<()> {
    let api = ApiClient::new(&args.server, args.token)?;

    // Pages arrive newest first; collect then flip for display.
    let mut collected: Vec<Message> = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..args.max_pages {
        let page = api
            .message_page(args.conversation, args.page_size, cursor.as_deref())
            .await?;
        collected.extend(page.messages);

        if !page.has_more {
            break;
        }
        cursor = page.next_cursor;
    }

    collected.reverse();
    for message in &collected {
        render_line(message);
    }

    Ok(())
}

pub(crate) fn render_line(message: &Message) {
    let who = match message.direction {
        shared::models::MessageDirection::Inbound => "<<",
        shared::models::MessageDirection::Outbound => ">>",
    };
    let marker = match message.state {
        shared::models::DeliveryState::Pending => " (sending...)",
        shared::models::DeliveryState::Confirmed => "",
    };

    println!(
        "{} [{}] {}{}",
        who,
        message.sent_at,
        message.content.preview(),
        marker
    );
}
