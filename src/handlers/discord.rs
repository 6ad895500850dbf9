use serenity::all::{
    Command, CommandDataOptionValue, CommandInteraction, CommandOptionType,
    Interaction as DiscordInteraction,
};
use serenity::async_trait;
use serenity::builder::{CreateCommand, CreateCommandOption};
use serenity::http::Http;
use serenity::model::gateway::Ready;
use serenity::model::id::ChannelId;
use serenity::prelude::*;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::{CalendarError, SendError};
use crate::handlers::discord_responder::{InteractionResponder, SerenityResponder};
use crate::service::command_service::{self, CalendarCommands};
use crate::service::notification_service::MessageSender;

pub struct DiscordSender {
    http: Arc<Http>,
}

impl DiscordSender {
    pub fn new(token: &str) -> Self {
        Self {
            http: Arc::new(Http::new(token)),
        }
    }
}

#[async_trait]
impl MessageSender for DiscordSender {
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<(), SendError> {
        let channel = channel_id
            .parse::<u64>()
            .map(ChannelId::new)
            .map_err(|_| SendError(format!("invalid channel id {}", channel_id)))?;
        channel
            .say(self.http.as_ref(), content)
            .await
            .map_err(|e| SendError(format!("{:?}", e)))?;
        Ok(())
    }
}

pub struct BotHandler {
    commands: CalendarCommands,
}

impl BotHandler {
    pub fn new(commands: CalendarCommands) -> Self {
        BotHandler { commands }
    }

    /// Acknowledges the command and runs it on its own task so the gateway
    /// loop never waits on the store or a feed. The handle resolves to the
    /// command's completion signal.
    pub async fn handle_command_with<R: InteractionResponder + ?Sized>(
        &self,
        responder: &R,
        name: &str,
        channel_id: &str,
        user_id: &str,
        argument: Option<String>,
    ) -> Option<JoinHandle<Result<(), CalendarError>>> {
        if command_service::usage(name).is_none() {
            responder.reply_ephemeral(&format!("Unknown command /{}", name)).await;
            return None;
        }
        tracing::debug!("/{} from {} in {}", name, user_id, channel_id);
        responder.reply_ephemeral("Got it.").await;

        let commands = self.commands.clone();
        let name = name.to_string();
        let channel_id = channel_id.to_string();
        Some(tokio::spawn(async move {
            let completion = match name.as_str() {
                "cal" => commands.cal(&channel_id, argument.as_deref()).await,
                "delcal" => commands.delcal(&channel_id).await,
                _ => commands.upcoming(&channel_id).await,
            };
            if let Err(err) = &completion {
                tracing::warn!("/{} in {} failed: {}", name, channel_id, err);
            }
            completion
        }))
    }

    async fn handle_command(&self, ctx: &Context, command: CommandInteraction) {
        let argument = command
            .data
            .options
            .iter()
            .find(|opt| opt.name == "url")
            .and_then(|opt| match &opt.value {
                CommandDataOptionValue::String(s) => Some(s.clone()),
                _ => None,
            });
        let responder = SerenityResponder::for_command(ctx, &command);
        let _ = self
            .handle_command_with(
                &responder,
                &command.data.name,
                &command.channel_id.to_string(),
                &command.user.id.to_string(),
                argument,
            )
            .await;
    }
}

fn command_builders() -> Vec<CreateCommand> {
    command_service::COMMANDS
        .iter()
        .filter_map(|name| {
            let description = command_service::usage(name)?;
            let builder = CreateCommand::new(*name).description(description);
            Some(if *name == "cal" {
                builder.add_option(
                    CreateCommandOption::new(
                        CommandOptionType::String,
                        "url",
                        "Calendar feed URL to use for this channel",
                    )
                    .required(false),
                )
            } else {
                builder
            })
        })
        .collect()
}

#[async_trait]
impl EventHandler for BotHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!("{} is connected!", ready.user.name);
        for builder in command_builders() {
            if let Err(err) = Command::create_global_command(&ctx.http, builder).await {
                tracing::error!("Failed to register command: {:?}", err);
            }
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: DiscordInteraction) {
        if let DiscordInteraction::Command(command) = interaction {
            self.handle_command(&ctx, command).await;
        }
    }
}
