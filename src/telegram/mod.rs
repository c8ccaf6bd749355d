//! Telegram bot integration: command handling and result delivery

pub mod handlers;
pub mod notifier;

// Re-exports for convenience
pub use handlers::{create_bot, handle_command, setup_bot_commands, Command, HandlerDeps};
pub use notifier::TelegramNotifier;
