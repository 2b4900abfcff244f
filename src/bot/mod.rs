//! Telegram front end: dispatcher, update handlers and background
//! housekeeping around the desk conversation.

pub mod commands;
pub mod conversation;
pub mod flows;
pub mod keyboards;
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use commands::Command;
use conversation::{Conversation, Origin, Outgoing};
use telegram::TelegramClient;

const SESSION_SWEEP: Duration = Duration::from_secs(600);
const FLOW_SWEEP: Duration = Duration::from_secs(300);
/// Unanswered prompts older than this are forgotten.
const FLOW_MAX_AGE: Duration = Duration::from_secs(1800);

struct BotState {
    conversation: Arc<Conversation>,
    telegram: TelegramClient,
}

/// Background tasks of one bot run, aborted when it ends.
struct Housekeeping(Vec<JoinHandle<()>>);

impl Drop for Housekeeping {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

fn spawn_housekeeping(state: Arc<BotState>) -> Housekeeping {
    let sessions = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_SWEEP);
            interval.tick().await;
            loop {
                interval.tick().await;
                match state.conversation.expire_sessions() {
                    Ok(0) => {}
                    Ok(n) => info!("🧹 Expired {n} idle session(s)"),
                    Err(e) => warn!("Session cleanup failed: {e}"),
                }
            }
        })
    };
    let flows = tokio::spawn(async move {
        let mut interval = tokio::time::interval(FLOW_SWEEP);
        interval.tick().await;
        loop {
            interval.tick().await;
            let pruned = state.conversation.prune_flows(FLOW_MAX_AGE);
            if pruned > 0 {
                info!("🧹 Dropped {pruned} stale conversation state(s)");
            }
            let quiet = state.conversation.prune_rate_limits();
            if quiet > 0 {
                info!("🧹 Dropped rate-limit history of {quiet} quiet user(s)");
            }
        }
    });
    Housekeeping(vec![sessions, flows])
}

/// Run the bot until the dispatcher stops. With `handle_ctrlc` the
/// dispatcher shuts down on Ctrl-C; otherwise the caller owns shutdown.
pub async fn run(conversation: Arc<Conversation>, bot: Bot, handle_ctrlc: bool) -> Result<(), String> {
    let me = bot.get_me().await.map_err(|e| format!("Failed to reach Telegram: {e}"))?;
    info!("Bot user ID: {}, username: @{}", me.id, me.username());

    let state = Arc::new(BotState {
        conversation,
        telegram: TelegramClient::new(bot.clone()),
    });
    let _housekeeping = spawn_housekeeping(state.clone());

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .branch(dptree::entry().filter_command::<Command>().endpoint(handle_command))
                .branch(dptree::filter(|msg: Message| msg.document().is_some()).endpoint(handle_document))
                .branch(dptree::endpoint(handle_text)),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    info!("🚀 Bot is polling for updates");
    let mut dispatcher = Dispatcher::builder(bot, handler).dependencies(dptree::deps![state]);
    if handle_ctrlc {
        dispatcher = dispatcher.enable_ctrlc_handler();
    }
    dispatcher.build().dispatch().await;
    info!("Bot dispatcher stopped");
    Ok(())
}

/// Private-chat sender of a message.
fn origin(msg: &Message) -> Option<Origin> {
    if !msg.chat.is_private() {
        return None;
    }
    let user = msg.from.as_ref()?;
    Some(Origin { user_id: user.id.0 as i64, chat_id: msg.chat.id.0 })
}

async fn handle_command(msg: Message, command: Command, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(from) = origin(&msg) else {
        return Ok(());
    };
    info!("📨 {:?} from {}", command, from.user_id);
    let out = state.conversation.command(from, command);
    state.telegram.deliver(out).await;
    Ok(())
}

async fn handle_text(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let (Some(from), Some(text)) = (origin(&msg), msg.text()) else {
        return Ok(());
    };
    let out = state.conversation.text(from, text);
    state.telegram.deliver(out).await;
    Ok(())
}

async fn handle_document(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let (Some(from), Some(document)) = (origin(&msg), msg.document()) else {
        return Ok(());
    };
    let file_name = document.file_name.clone().unwrap_or_default();
    info!("📎 {:?} ({} bytes) from {}", file_name, document.file.size, from.user_id);

    let upload = match state.conversation.accept_document(from, &file_name, document.file.size) {
        Ok(upload) => upload,
        Err(out) => {
            state.telegram.deliver(out).await;
            return Ok(());
        }
    };
    let _ = state.telegram.send_message(from.chat_id, "⏳ Processing your file...", None).await;

    let out = match state.telegram.download(&document.file.id).await {
        Ok(data) => state.conversation.document(from, upload, &data),
        Err(e) => {
            warn!("{e}");
            vec![Outgoing::text(from.chat_id, "❌ Could not download the file. Please send it again.")]
        }
    };
    state.telegram.deliver(out).await;
    Ok(())
}

async fn handle_callback(query: CallbackQuery, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(data) = query.data.as_deref() else {
        return Ok(());
    };
    let Some(message) = query.regular_message() else {
        let _ = state.telegram.answer_callback(&query, Some("This message is too old."), false).await;
        return Ok(());
    };
    let from = Origin { user_id: query.from.id.0 as i64, chat_id: message.chat.id.0 };
    info!("🔘 {data} from {}", from.user_id);

    let reply = state.conversation.callback(from, data);
    let _ = state.telegram.answer_callback(&query, reply.answer.as_deref(), reply.alert).await;
    if let Some(text) = reply.edit {
        let _ = state.telegram.edit_message(message.chat.id.0, message.id.0, &text).await;
    }
    state.telegram.deliver(reply.messages).await;
    Ok(())
}
