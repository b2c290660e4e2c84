use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::{BotCommandScope, ChatId, InputFile, ParseMode, Recipient};
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};

use crate::apod::ApodClient;
use crate::config::Config;
use crate::message;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    #[command(description = "Picture of the Day")]
    Apod,
}

/// State shared by all invocations. The client is immutable; each invocation
/// owns the content and image it fetches.
struct BotContext {
    apod: ApodClient,
}

/// Connect, register the command, then dispatch until shutdown. Errors out of
/// the startup phase are retried by the supervisor in `main`.
pub async fn run(config: &Config) -> Result<()> {
    let bot = Bot::new(&config.telegram.bot_token);

    let me = bot
        .get_me()
        .await
        .context("Failed to reach the Telegram API")?;
    info!("Connected as @{}", me.username());

    register_commands(&bot, config.telegram.home_chat).await?;

    let ctx = Arc::new(BotContext {
        apod: ApodClient::new(&config.nasa.base_url, &config.nasa.api_key)?,
    });

    let home_chat = config.telegram.home_chat;
    let handler = Update::filter_message()
        .filter_map(move |msg: Message| {
            if chat_allowed(home_chat, msg.chat.id.0) {
                Some(msg)
            } else {
                None
            }
        })
        .filter_command::<Command>()
        .endpoint(handle_command);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("dispatcher"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

/// One-time registration, done before the dispatch loop starts.
async fn register_commands(bot: &Bot, home_chat: Option<i64>) -> Result<()> {
    let request = bot.set_my_commands(Command::bot_commands());
    let request = match home_chat {
        Some(id) => request.scope(BotCommandScope::Chat {
            chat_id: Recipient::Id(ChatId(id)),
        }),
        None => request,
    };
    request
        .await
        .context("Failed to register the /apod command")?;

    match home_chat {
        Some(id) => info!("Registered /apod for chat {}", id),
        None => info!("Registered /apod globally"),
    }
    Ok(())
}

fn chat_allowed(home_chat: Option<i64>, chat_id: i64) -> bool {
    home_chat.map_or(true, |home| home == chat_id)
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    ctx: Arc<BotContext>,
) -> ResponseResult<()> {
    match cmd {
        Command::Apod => {
            // Nothing may propagate out of here: a handler fault must not
            // take down the dispatch loop or touch other invocations.
            if let Err(e) = handle_apod(&bot, &msg, &ctx).await {
                error!("Unexpected error handling /apod: {:#}", e);
                if let Err(e) = bot
                    .send_message(msg.chat.id, "Something went wrong handling the request.")
                    .await
                {
                    warn!("Could not deliver the error response either: {}", e);
                }
            }
        }
    }
    Ok(())
}

/// One invocation: acknowledge, fetch, respond.
async fn handle_apod(bot: &Bot, msg: &Message, ctx: &BotContext) -> Result<()> {
    info!("/apod invoked in chat {}", msg.chat.id);

    // Acknowledge before any upstream I/O begins.
    let ack = match bot
        .send_message(msg.chat.id, "Fetching the Picture of the Day…")
        .await
    {
        Ok(ack) => ack,
        Err(e) => {
            // The invocation is already unreachable; nothing left to do.
            warn!(
                "Invocation in chat {} expired before acknowledgment: {}",
                msg.chat.id, e
            );
            return Ok(());
        }
    };

    match ctx.apod.fetch_today().await {
        Ok((content, image)) => {
            let post = message::compose(&content, Utc::now());
            let photo = InputFile::memory(image.bytes).file_name(message::IMAGE_FILE_NAME);
            bot.send_photo(msg.chat.id, photo)
                .caption(post.caption())
                .parse_mode(ParseMode::Html)
                .await
                .context("Failed to send the photo response")?;
            bot.delete_message(msg.chat.id, ack.id).await.ok();
        }
        Err(e) => {
            warn!("/apod fetch failed: {}", e);
            bot.edit_message_text(msg.chat.id, ack.id, e.user_message())
                .await
                .context("Failed to deliver the fetch error response")?;
        }
    }

    Ok(())
}
