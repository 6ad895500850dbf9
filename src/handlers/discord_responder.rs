use serenity::all::CommandInteraction;
use serenity::async_trait;
use serenity::builder::{CreateInteractionResponse, CreateInteractionResponseMessage};
use serenity::prelude::Context;

/// Acknowledges a slash command to the user who issued it.
#[async_trait]
pub trait InteractionResponder: Send + Sync {
    async fn reply_ephemeral(&self, content: &str);
}

pub struct SerenityResponder<'a> {
    ctx: &'a Context,
    command: &'a CommandInteraction,
}

impl<'a> SerenityResponder<'a> {
    pub fn for_command(ctx: &'a Context, command: &'a CommandInteraction) -> Self {
        Self { ctx, command }
    }
}

#[async_trait]
impl InteractionResponder for SerenityResponder<'_> {
    async fn reply_ephemeral(&self, content: &str) {
        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(content)
                .ephemeral(true),
        );
        if let Err(err) = self.command.create_response(&self.ctx.http, response).await {
            tracing::warn!("Failed to acknowledge /{}: {:?}", self.command.data.name, err);
        }
    }
}
