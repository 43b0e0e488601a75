//! # Localization Module
//!
//! Fluent message bundles for the bot's user-facing text. Russian and English
//! resources are embedded at compile time; the user's Telegram language code
//! picks the bundle and anything unsupported falls back to English.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource, FluentValue};
use tracing::warn;
use unic_langid::LanguageIdentifier;

pub const DEFAULT_LANGUAGE: &str = "en";
pub const SUPPORTED_LANGUAGES: [&str; 2] = ["ru", "en"];

const EN_RESOURCE: &str = include_str!("../locales/en/main.ftl");
const RU_RESOURCE: &str = include_str!("../locales/ru/main.ftl");

/// Localization manager for the bot
pub struct LocalizationManager {
    bundles: HashMap<&'static str, FluentBundle<FluentResource>>,
}

impl LocalizationManager {
    /// Build bundles for every supported language
    pub fn new() -> Result<Self> {
        let mut bundles = HashMap::new();
        bundles.insert("en", Self::create_bundle("en", EN_RESOURCE)?);
        bundles.insert("ru", Self::create_bundle("ru", RU_RESOURCE)?);
        Ok(Self { bundles })
    }

    fn create_bundle(locale: &str, source: &str) -> Result<FluentBundle<FluentResource>> {
        let langid: LanguageIdentifier = locale.parse()?;
        let mut bundle = FluentBundle::new_concurrent(vec![langid]);
        // Telegram renders the isolation marks as garbage
        bundle.set_use_isolating(false);

        let resource = FluentResource::try_new(source.to_string())
            .map_err(|(_, errors)| anyhow!("Invalid {locale} resource: {errors:?}"))?;
        bundle
            .add_resource(resource)
            .map_err(|errors| anyhow!("Duplicate messages in {locale} resource: {errors:?}"))?;
        Ok(bundle)
    }

    /// Whether `key` exists in the given language's bundle
    pub fn has_message(&self, key: &str, language: &str) -> bool {
        self.bundles
            .get(detect_language(Some(language)))
            .is_some_and(|bundle| bundle.has_message(key))
    }

    /// Get a localized message in a specific language
    pub fn get_message_in_language(
        &self,
        key: &str,
        language: &str,
        args: Option<&HashMap<&str, &str>>,
    ) -> String {
        let language = detect_language(Some(language));
        let Some(bundle) = self.bundles.get(language) else {
            return format!("Missing translation: {key}");
        };

        let Some(pattern) = bundle.get_message(key).and_then(|msg| msg.value()) else {
            return format!("Missing translation: {key}");
        };

        let fluent_args = args.map(|args| {
            let mut fluent_args = FluentArgs::new();
            for (name, value) in args {
                fluent_args.set(*name, FluentValue::from(*value));
            }
            fluent_args
        });

        let mut errors = vec![];
        let value = bundle.format_pattern(pattern, fluent_args.as_ref(), &mut errors);
        if !errors.is_empty() {
            warn!(key, language, ?errors, "Message formatted with errors");
        }
        value.into_owned()
    }
}

/// Map a Telegram language code ("ru", "en-US", ...) to a supported bundle
pub fn detect_language(language_code: Option<&str>) -> &'static str {
    let Some(code) = language_code else {
        return DEFAULT_LANGUAGE;
    };
    let primary = code.split(['-', '_']).next().unwrap_or("").to_lowercase();
    SUPPORTED_LANGUAGES
        .into_iter()
        .find(|supported| *supported == primary)
        .unwrap_or(DEFAULT_LANGUAGE)
}

static LOCALIZATION_MANAGER: OnceLock<LocalizationManager> = OnceLock::new();

/// Initialize the global localization manager
pub fn init_localization() -> Result<()> {
    if LOCALIZATION_MANAGER.get().is_none() {
        let manager = LocalizationManager::new()?;
        // A concurrent initializer may have won; either instance is equivalent
        let _ = LOCALIZATION_MANAGER.set(manager);
    }
    Ok(())
}

fn manager() -> Option<&'static LocalizationManager> {
    if LOCALIZATION_MANAGER.get().is_none() {
        if let Err(e) = init_localization() {
            warn!(error = %e, "Localization unavailable");
        }
    }
    LOCALIZATION_MANAGER.get()
}

/// Localized message in the user's language
pub fn t_lang(key: &str, language_code: Option<&str>) -> String {
    match manager() {
        Some(manager) => manager.get_message_in_language(key, detect_language(language_code), None),
        None => key.to_string(),
    }
}

/// Localized message with arguments in the user's language
pub fn t_args_lang(key: &str, args: &[(&str, &str)], language_code: Option<&str>) -> String {
    let args_map: HashMap<&str, &str> = args.iter().copied().collect();
    match manager() {
        Some(manager) => {
            manager.get_message_in_language(key, detect_language(language_code), Some(&args_map))
        }
        None => key.to_string(),
    }
}
