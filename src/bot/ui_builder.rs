//! UI Builder module for creating keyboards and delivering engine replies

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, InputFile, KeyboardButton, KeyboardMarkup,
    KeyboardRemove, ParseMode, ReplyMarkup,
};
use teloxide::utils::html;
use tracing::debug;

// Import localization
use crate::localization::t_lang;

use crate::conversation::{Keyboard, Outcome, Reply};
use crate::dialogue::{Action, ConversationDialogue, MenuItem};

/// Persistent reply keyboard with the main menu, two entries per row
pub fn main_menu_keyboard(language_code: Option<&str>) -> KeyboardMarkup {
    let rows: Vec<Vec<KeyboardButton>> = MenuItem::ALL
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|item| KeyboardButton::new(t_lang(item.label_key(), language_code)))
                .collect()
        })
        .collect();
    KeyboardMarkup::new(rows).resize_keyboard()
}

/// Inline keyboard whose buttons carry serialized actions
pub fn inline_keyboard(rows: Vec<Vec<(String, Action)>>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(rows.into_iter().map(|row| {
        row.into_iter()
            .map(|(label, action)| InlineKeyboardButton::callback(label, action.payload()))
            .collect::<Vec<_>>()
    }))
}

fn reply_markup(keyboard: Keyboard, language_code: Option<&str>) -> ReplyMarkup {
    match keyboard {
        Keyboard::Inline(rows) => inline_keyboard(rows).into(),
        Keyboard::MainMenu => main_menu_keyboard(language_code).into(),
        Keyboard::Remove => KeyboardRemove::new().into(),
    }
}

/// Wrap a monospace block for HTML parse mode
pub fn preformatted_html(text: &str) -> String {
    format!("<pre>{}</pre>", html::escape(text))
}

/// Send replies in order
pub async fn send_replies(
    bot: &Bot,
    chat_id: ChatId,
    replies: Vec<Reply>,
    language_code: Option<&str>,
) -> Result<()> {
    for reply in replies {
        match reply {
            Reply::Text { text, keyboard } => {
                let request = bot.send_message(chat_id, text);
                match keyboard {
                    Some(keyboard) => request.reply_markup(reply_markup(keyboard, language_code)).await?,
                    None => request.await?,
                };
            }
            Reply::Preformatted { text } => {
                bot.send_message(chat_id, preformatted_html(&text))
                    .parse_mode(ParseMode::Html)
                    .await?;
            }
            Reply::Photo { png, caption } => {
                bot.send_photo(chat_id, InputFile::memory(png).file_name("chart.png"))
                    .caption(caption)
                    .await?;
            }
        }
    }
    Ok(())
}

/// Store the next conversation state, then deliver the replies
pub async fn apply_outcome(
    bot: &Bot,
    chat_id: ChatId,
    dialogue: &ConversationDialogue,
    outcome: Outcome,
    language_code: Option<&str>,
) -> Result<()> {
    debug!(user_id = %chat_id, next_state = ?outcome.next, replies = outcome.replies.len(), "Applying outcome");
    if outcome.next.is_idle() {
        dialogue.reset().await?;
    } else {
        dialogue.update(outcome.next).await?;
    }
    send_replies(bot, chat_id, outcome.replies, language_code).await
}
