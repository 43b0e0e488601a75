//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules:
//! - `message_handler`: text, commands and voice notes
//! - `callback_handler`: inline keyboard callback queries
//! - `ui_builder`: keyboards and reply delivery
//!
//! Everything here is transport glue; conversation logic lives in
//! [`crate::conversation`].

pub mod callback_handler;
pub mod message_handler;
pub mod ui_builder;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::BotCommand;

use crate::conversation::Engine;
use crate::dialogue::{Command, ConversationState};
use crate::localization::t_lang;
use crate::scheduler::Notifier;
use crate::speech::SpeechToText;

pub use callback_handler::callback_handler;
pub use message_handler::{download_file, message_handler};

/// Shared application state, injected into every handler
pub struct AppState {
    pub engine: Engine,
    pub speech: Arc<dyn SpeechToText>,
    pub max_voice_seconds: u32,
}

/// Build the teloxide update handler tree
pub fn build_handler() -> UpdateHandler<anyhow::Error> {
    let messages = Update::filter_message()
        .enter_dialogue::<Message, InMemStorage<ConversationState>, ConversationState>()
        .endpoint(message_handler);

    let callbacks = Update::filter_callback_query()
        .enter_dialogue::<CallbackQuery, InMemStorage<ConversationState>, ConversationState>()
        .endpoint(callback_handler);

    dptree::entry().branch(callbacks).branch(messages)
}

/// Command list shown in the Telegram client menu
pub fn bot_commands() -> Vec<BotCommand> {
    Command::ALL
        .into_iter()
        .map(|command| {
            BotCommand::new(
                command.name(),
                t_lang(&format!("command-{}", command.name()), Some("ru")),
            )
        })
        .collect()
}

/// Delivers scheduler messages as plain chat messages
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, user_id: i64, text: String) -> Result<()> {
        self.bot.send_message(ChatId(user_id), text).await?;
        Ok(())
    }
}
