//! Message Handler module for processing incoming Telegram messages

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, FileId};
use tracing::{debug, error, info, warn};

// Import localization
use crate::localization::{t_args_lang, t_lang};

use super::ui_builder::apply_outcome;
use super::AppState;
use crate::conversation::Turn;
use crate::dialogue::{Command, ConversationDialogue, Input};
use crate::errors::SpeechError;
use crate::speech::check_voice_duration;

/// Download a Telegram file into memory
pub async fn download_file(bot: &Bot, file_id: FileId) -> Result<Vec<u8>> {
    let file = bot.get_file(file_id).await?;
    let url = format!(
        "https://api.telegram.org/file/bot{}/{}",
        bot.token(),
        file.path
    );

    let response = reqwest::get(&url).await?.error_for_status()?;
    let bytes = response.bytes().await?;
    Ok(bytes.to_vec())
}

fn speech_error_key(error: &SpeechError) -> &'static str {
    match error {
        SpeechError::TooLong { .. } => "voice-too-long",
        SpeechError::NotConfigured => "voice-disabled",
        SpeechError::Unrecognized => "voice-unrecognized",
        SpeechError::Network(_) => "voice-failed",
    }
}

/// Transcribe a voice note; `None` when the user was already told why it failed
async fn transcribe_voice(
    bot: &Bot,
    msg: &Message,
    state: &AppState,
    language_code: Option<&str>,
) -> Result<Option<String>> {
    let Some(voice) = msg.voice() else {
        return Ok(None);
    };
    let seconds = voice.duration.seconds();
    debug!(user_id = %msg.chat.id, seconds, "Received voice message");

    if let Err(e) = check_voice_duration(seconds, state.max_voice_seconds) {
        info!(user_id = %msg.chat.id, seconds, "Voice message rejected as too long");
        bot.send_message(
            msg.chat.id,
            t_args_lang(
                speech_error_key(&e),
                &[("limit", &state.max_voice_seconds.to_string())],
                language_code,
            ),
        )
        .await?;
        return Ok(None);
    }

    bot.send_chat_action(msg.chat.id, ChatAction::Typing).await?;
    let audio = match download_file(bot, voice.file.id.clone()).await {
        Ok(audio) => audio,
        Err(e) => {
            error!(user_id = %msg.chat.id, error = %e, "Failed to download voice message");
            bot.send_message(msg.chat.id, t_lang("error-download-failed", language_code))
                .await?;
            return Ok(None);
        }
    };

    match state.speech.recognize(audio).await {
        Ok(text) => {
            bot.send_message(
                msg.chat.id,
                t_args_lang("voice-recognized", &[("text", &text)], language_code),
            )
            .await?;
            Ok(Some(text))
        }
        Err(e) => {
            warn!(user_id = %msg.chat.id, error = %e, "Voice transcription failed");
            bot.send_message(msg.chat.id, t_lang(speech_error_key(&e), language_code))
                .await?;
            Ok(None)
        }
    }
}

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    dialogue: ConversationDialogue,
    state: Arc<AppState>,
) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    // Extract user's language code from Telegram
    let language_code = user.language_code.clone();
    let lang = language_code.as_deref();

    let input = if let Some(text) = msg.text() {
        debug!(user_id = %msg.chat.id, message_length = text.len(), "Received text message from user");
        match Command::parse(text) {
            Some(command) => Input::Command(command),
            None => Input::Text(text.to_string()),
        }
    } else if msg.voice().is_some() {
        match transcribe_voice(&bot, &msg, &state, lang).await? {
            Some(text) => Input::Transcript(text),
            None => return Ok(()),
        }
    } else {
        debug!(user_id = %msg.chat.id, "Received unsupported message type from user");
        bot.send_message(msg.chat.id, t_lang("unsupported-message", lang))
            .await?;
        return Ok(());
    };

    let current = dialogue.get().await?.unwrap_or_default();
    if matches!(input, Input::Text(_) | Input::Transcript(_)) {
        bot.send_chat_action(msg.chat.id, ChatAction::Typing).await?;
    }

    let turn = Turn::new(user.id.0 as i64, language_code.clone(), Utc::now());
    let outcome = state.engine.handle(&turn, current, input).await;
    apply_outcome(&bot, msg.chat.id, &dialogue, outcome, lang).await
}
