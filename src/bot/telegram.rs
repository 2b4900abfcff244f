//! Telegram client using teloxide.

use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, MessageId};
use tracing::{info, warn};

use super::conversation::Outgoing;
use super::keyboards::Keyboard;

/// Telegram rejects longer message texts.
const MAX_MESSAGE_CHARS: usize = 4000;

fn fit(text: &str) -> String {
    if text.chars().count() > MAX_MESSAGE_CHARS {
        let truncated: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<i64, String> {
        let mut request = self.bot.send_message(ChatId(chat_id), fit(text));
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(keyboard.markup());
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send to chat {chat_id}: {e}");
            warn!("{}", msg);
            msg
        })
    }

    /// Send a file from bytes.
    pub async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        data: Vec<u8>,
        caption: &str,
    ) -> Result<i64, String> {
        info!("📎 Sending {} to chat {} ({} bytes)", file_name, chat_id, data.len());

        let input_file = InputFile::memory(data).file_name(file_name.to_string());
        let mut request = self.bot.send_document(ChatId(chat_id), input_file);
        if !caption.is_empty() {
            request = request.caption(fit(caption));
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send document: {e}");
            warn!("{}", msg);
            msg
        })
    }

    /// Replace the text of a message the bot sent, dropping its buttons.
    pub async fn edit_message(&self, chat_id: i64, message_id: i32, text: &str) -> Result<(), String> {
        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), fit(text))
            .await
            .map_err(|e| {
                let msg = format!("Failed to edit message: {e}");
                warn!("{}", msg);
                msg
            })?;
        Ok(())
    }

    /// Acknowledge a button press, optionally with a toast or alert.
    pub async fn answer_callback(&self, query: &CallbackQuery, text: Option<&str>, alert: bool) -> Result<(), String> {
        let mut request = self.bot.answer_callback_query(query.id.clone());
        if let Some(text) = text {
            request = request.text(text.to_string()).show_alert(alert);
        }
        request.await.map_err(|e| {
            let msg = format!("Failed to answer callback: {e}");
            warn!("{}", msg);
            msg
        })?;
        Ok(())
    }

    /// Download a file by id.
    pub async fn download(&self, file_id: &FileId) -> Result<Vec<u8>, String> {
        let file = self
            .bot
            .get_file(file_id.clone())
            .await
            .map_err(|e| format!("Failed to get file info: {e}"))?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| format!("Failed to download file: {e}"))?;

        info!("📥 Downloaded file ({} bytes)", data.len());
        Ok(data)
    }

    /// Send each message in order. Failures are logged and skipped.
    pub async fn deliver(&self, messages: Vec<Outgoing>) {
        for message in messages {
            let _ = match message {
                Outgoing::Text { chat_id, text, keyboard } => {
                    self.send_message(chat_id, &text, keyboard.as_ref()).await
                }
                Outgoing::Document { chat_id, file_name, bytes, caption } => {
                    self.send_document(chat_id, &file_name, bytes, &caption).await
                }
            };
        }
    }
}
