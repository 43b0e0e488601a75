//! Callback Handler module for processing inline keyboard callback queries

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use teloxide::prelude::*;
use tracing::{debug, warn};

// Import localization
use crate::localization::t_lang;

use super::ui_builder::apply_outcome;
use super::AppState;
use crate::conversation::Turn;
use crate::dialogue::{Action, ConversationDialogue, Input};

/// Handle callback queries from inline keyboards
pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    dialogue: ConversationDialogue,
    state: Arc<AppState>,
) -> Result<()> {
    debug!(user_id = %q.from.id, data = ?q.data, "Received callback query from user");

    // Stop the client's loading indicator whatever happens next
    bot.answer_callback_query(q.id.clone()).await?;

    let language_code = q.from.language_code.clone();
    let lang = language_code.as_deref();
    let Some(chat_id) = q.message.as_ref().map(|message| message.chat().id) else {
        debug!(user_id = %q.from.id, "Callback without an accessible message");
        return Ok(());
    };

    let action = match q.data.as_deref().unwrap_or("").parse::<Action>() {
        Ok(action) => action,
        Err(e) => {
            warn!(user_id = %q.from.id, error = %e, "Rejected callback payload");
            bot.send_message(chat_id, t_lang("action-outdated", lang)).await?;
            return Ok(());
        }
    };

    let current = dialogue.get().await?.unwrap_or_default();
    let turn = Turn::new(q.from.id.0 as i64, language_code.clone(), Utc::now());
    let outcome = state.engine.handle(&turn, current, Input::Action(action)).await;
    apply_outcome(&bot, chat_id, &dialogue, outcome, lang).await
}
