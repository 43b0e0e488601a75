use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use calorie_bot::bot::{self, AppState, TelegramNotifier};
use calorie_bot::config::{BotConfig, LogFormat};
use calorie_bot::conversation::Engine;
use calorie_bot::db;
use calorie_bot::dialogue::{validate_action_table, ConversationState};
use calorie_bot::localization::init_localization;
use calorie_bot::nutrition::{NutritionClient, YandexGptBackend};
use calorie_bot::rate_limiter::RateLimiter;
use calorie_bot::scheduler::{self, Notifier};
use calorie_bot::speech::{DisabledSpeech, SpeechToText, YandexSpeechKit};

fn init_tracing(config: &BotConfig) {
    // RUST_LOG wins over LOG_LEVEL when both are set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("calorie_bot={},teloxide=warn,sqlx=warn", config.log_level)));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Missing credentials abort startup before anything else happens
    let config = BotConfig::from_env().context("Invalid configuration")?;
    init_tracing(&config);

    info!("Starting calorie bot");

    init_localization().context("Failed to load translations")?;
    let actions = validate_action_table().map_err(|e| anyhow!("Invalid callback table: {e}"))?;
    info!(actions, "Callback table validated");

    info!(path = %config.database_path.display(), "Initializing database");
    let pool = db::connect(&config.database_path).await?;

    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let backend = Arc::new(YandexGptBackend::new(
        config.gpt_api_key.clone(),
        config.gpt_folder_id.clone(),
        config.recovery.clone(),
    ));
    let nutrition = NutritionClient::new(backend, limiter);

    let speech: Arc<dyn SpeechToText> = match &config.speech_api_key {
        Some(key) => Arc::new(YandexSpeechKit::new(key.clone())),
        None => {
            warn!("YANDEX_SPEECH_API_KEY not set, voice input disabled");
            Arc::new(DisabledSpeech)
        }
    };

    let engine = Engine::new(
        pool.clone(),
        nutrition,
        config.menu_cooldown_hours,
        config.scheduler.utc_offset_hours,
    )?;
    let state = Arc::new(AppState {
        engine,
        speech,
        max_voice_seconds: config.max_voice_seconds,
    });

    let bot = Bot::new(config.telegram_token.clone());
    if let Err(e) = bot.set_my_commands(bot::bot_commands()).await {
        warn!(error = %e, "Failed to register bot commands");
    }

    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(bot.clone()));
    let scheduler_config = config.scheduler.clone();
    let scheduler_pool = pool.clone();
    tokio::spawn(async move {
        if let Err(e) = scheduler::run_scheduler(scheduler_pool, notifier, scheduler_config).await {
            error!(error = %e, "Scheduler stopped");
        }
    });

    info!("Bot initialized, starting dispatcher");

    Dispatcher::builder(bot, bot::build_handler())
        .dependencies(dptree::deps![InMemStorage::<ConversationState>::new(), state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Bot stopped");
    Ok(())
}
