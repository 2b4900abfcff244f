//! Tracing layer that mirrors the bot's own log lines into an admin chat.
//! WARN and ERROR go out at once; INFO lines are batched.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BATCH: usize = 50;
const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, PartialEq)]
enum LogMessage {
    Urgent(String),
    Info(String),
}

/// Only events from this crate are forwarded; HTTP and Telegram client
/// internals stay local.
fn is_forwarded(target: &str) -> bool {
    target == env!("CARGO_CRATE_NAME") || target.starts_with(concat!(env!("CARGO_CRATE_NAME"), "::"))
}

fn classify(level: Level, message: String) -> Option<LogMessage> {
    match level {
        Level::ERROR => Some(LogMessage::Urgent(format!("❌ {message}"))),
        Level::WARN => Some(LogMessage::Urgent(format!("⚠️ {message}"))),
        Level::INFO => Some(LogMessage::Info(message)),
        _ => None,
    }
}

/// Pending INFO lines.
#[derive(Default)]
struct InfoBatch {
    lines: Vec<String>,
}

impl InfoBatch {
    /// Add a line; returns the batch text once it is full.
    fn push(&mut self, line: String) -> Option<String> {
        self.lines.push(line);
        if self.lines.len() >= MAX_BATCH { self.take() } else { None }
    }

    fn take(&mut self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        let combined = self.lines.join("\n");
        self.lines.clear();
        Some(combined)
    }
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl TelegramLogLayer {
    /// Spawns the sender task; must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId, environment: &str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();
        let tag = format!("💎 [{environment}]");

        tokio::spawn(async move {
            let mut batch = InfoBatch::default();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                let ready = tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(LogMessage::Urgent(text)) => Some(text),
                        Some(LogMessage::Info(text)) => batch.push(text),
                        None => break,
                    },
                    _ = interval.tick() => batch.take(),
                };
                if let Some(text) = ready {
                    send_log(&bot, chat_id, &format!("{tag}\n{text}")).await;
                }
            }
            if let Some(text) = batch.take() {
                send_log(&bot, chat_id, &format!("{tag}\n{text}")).await;
            }
        });

        Self { tx }
    }
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    let text = if text.chars().count() > MAX_MESSAGE_CHARS {
        let truncated: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    };
    if let Err(e) = bot.send_message(chat_id, text).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !is_forwarded(metadata.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if let Some(msg) = classify(*metadata.level(), visitor.message) {
            if self.tx.send(msg).is_err() {
                eprintln!("Log channel closed, message dropped");
            }
        }
    }
}
