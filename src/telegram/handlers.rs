//! Command parsing and user-facing admission feedback

use std::sync::Arc;

use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::core::config;
use crate::core::error::AdmissionError;
use crate::generation::job::{AspectRatio, JobKind};
use crate::generation::service::{GenerationRequest, GenerationService};
use crate::storage::ledger::GenerationLedger;

/// Bot commands enum with descriptions
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "I can:")]
pub enum Command {
    #[command(description = "show the welcome message")]
    Start,
    #[command(description = "show your generation balance")]
    Balance,
    #[command(description = "show your position in the queue")]
    Queue,
    #[command(description = "generate avatar images from a prompt")]
    Generate(String),
    #[command(description = "generate reference images from a prompt")]
    Image(String),
    #[command(description = "generate a video from a prompt")]
    Video(String),
    #[command(description = "generate for another user (admin only)")]
    Genfor(String),
}

/// Shared dependencies for command handlers
pub struct HandlerDeps {
    pub service: Arc<GenerationService>,
    pub ledger: Arc<dyn GenerationLedger>,
}

/// Creates a Bot instance with a request timeout
///
/// # Returns
/// * `Ok(Bot)` - Successfully created bot instance
/// * `Err(anyhow::Error)` - Failed to build the underlying HTTP client
pub fn create_bot() -> anyhow::Result<Bot> {
    let client = ClientBuilder::new().timeout(config::network::provider_timeout()).build()?;
    let bot = if let Ok(bot_api_url) = std::env::var("BOT_API_URL") {
        log::info!("Using custom Bot API URL: {}", bot_api_url);
        let url = url::Url::parse(&bot_api_url).map_err(|e| anyhow::anyhow!("Invalid BOT_API_URL: {}", e))?;
        Bot::with_client(config::BOT_TOKEN.clone(), client).set_api_url(url)
    } else {
        Bot::with_client(config::BOT_TOKEN.clone(), client)
    };
    Ok(bot)
}

/// Sets up bot commands in Telegram UI
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    use teloxide::types::BotCommand;

    bot.set_my_commands(vec![
        BotCommand::new("start", "show the welcome message"),
        BotCommand::new("balance", "show your generation balance"),
        BotCommand::new("queue", "show your position in the queue"),
        BotCommand::new("generate", "generate avatar images from a prompt"),
        BotCommand::new("image", "generate reference images from a prompt"),
        BotCommand::new("video", "generate a video from a prompt"),
    ])
    .await?;

    Ok(())
}

/// Dispatches one parsed command. Replies are best-effort; Telegram errors
/// bubble up to the dispatcher's default error handler.
pub async fn handle_command(bot: Bot, msg: Message, cmd: Command, deps: Arc<HandlerDeps>) -> ResponseResult<()> {
    let user_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(msg.chat.id.0);

    match cmd {
        Command::Start => {
            bot.send_message(
                msg.chat.id,
                "Send /generate <prompt> for avatar images, /image <prompt> for reference images, \
                 or /video <prompt> for a video. /balance shows your remaining units.",
            )
            .await?;
        }
        Command::Balance => {
            match deps.ledger.balance(user_id).await {
                Ok(balance) => {
                    bot.send_message(
                        msg.chat.id,
                        format!(
                            "Image units: {}\nTraining slots: {}",
                            balance.image_units, balance.training_slots
                        ),
                    )
                    .await?;
                }
                Err(e) => {
                    log::error!("Balance lookup failed for user {}: {}", user_id, e);
                    bot.send_message(msg.chat.id, "Could not read your balance right now, try again later.")
                        .await?;
                }
            }
        }
        Command::Queue => {
            let text = match deps.service.queue_position(user_id).await {
                Some(position) => format!("You are #{} in the queue.", position),
                None => "You have no queued jobs.".to_string(),
            };
            bot.send_message(msg.chat.id, text).await?;
        }
        Command::Generate(prompt) => {
            submit(&bot, &msg, &deps, user_id, user_id, JobKind::AvatarImage, prompt, false).await?;
        }
        Command::Image(prompt) => {
            submit(&bot, &msg, &deps, user_id, user_id, JobKind::ReferenceImage, prompt, false).await?;
        }
        Command::Video(prompt) => {
            submit(&bot, &msg, &deps, user_id, user_id, JobKind::Video, prompt, false).await?;
        }
        Command::Genfor(args) => {
            if user_id != *config::admin::ADMIN_USER_ID || *config::admin::ADMIN_USER_ID == 0 {
                bot.send_message(msg.chat.id, "This command is admin-only.").await?;
                return Ok(());
            }
            match parse_genfor(&args) {
                Some((target_user, prompt)) => {
                    submit(&bot, &msg, &deps, user_id, target_user, JobKind::AvatarImage, prompt, true).await?;
                }
                None => {
                    bot.send_message(msg.chat.id, "Usage: /genfor <user_id> <prompt>").await?;
                }
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn submit(
    bot: &Bot,
    msg: &Message,
    deps: &HandlerDeps,
    requester_chat: i64,
    target_user: i64,
    kind: JobKind,
    prompt: String,
    admin_proxy: bool,
) -> ResponseResult<()> {
    let request = GenerationRequest {
        requester_chat,
        target_user,
        kind,
        prompt,
        aspect_ratio: AspectRatio::Square,
        outputs: 1,
        admin_proxy,
    };

    let text = match deps.service.submit_generation(request).await {
        Ok(position) => format!("Queued! You are #{} in line.", position),
        Err(e) => admission_reply(&e),
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Maps an admission rejection to a short user-facing message.
fn admission_reply(error: &AdmissionError) -> String {
    match error {
        AdmissionError::QueueFull => "The queue is full right now, please try again in a minute.".to_string(),
        AdmissionError::CooldownActive { retry_in } => {
            format!("Too fast! Try again in {} seconds.", retry_in.as_secs().max(1))
        }
        AdmissionError::NoActiveModel => {
            "Your avatar model is not ready yet. Train a model first, then try again.".to_string()
        }
        AdmissionError::InsufficientBalance { required, available } => {
            format!("Not enough units: this needs {}, you have {}.", required, available)
        }
        AdmissionError::InvalidParams(reason) => format!("That request won't work: {}", reason),
    }
}

/// Splits "/genfor <user_id> <prompt>" arguments.
fn parse_genfor(args: &str) -> Option<(i64, String)> {
    let mut parts = args.trim().splitn(2, char::is_whitespace);
    let target: i64 = parts.next()?.parse().ok()?;
    let prompt = parts.next()?.trim().to_string();
    if prompt.is_empty() {
        return None;
    }
    Some((target, prompt))
}
