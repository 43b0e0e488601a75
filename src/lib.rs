//! # Calorie Telegram Bot
//!
//! A Telegram bot that keeps a nutrition diary: it computes calorie and macro
//! targets from body metrics, turns free-text or voice meal descriptions into
//! calories through a hosted language model, stores the meal log in SQLite and
//! renders progress charts.

pub mod bot;
pub mod calculator;
pub mod circuit_breaker;
pub mod config;
pub mod conversation;
pub mod db;
pub mod dialogue;
pub mod errors;
pub mod localization;
pub mod nutrition;
pub mod presentation;
pub mod rate_limiter;
pub mod scheduler;
pub mod speech;
