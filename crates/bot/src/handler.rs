use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use relay_core::moderation::{send_blocked_notice, send_flagged_notice};
use relay_core::split::split_into_shorter_messages;
use relay_core::{
    AuditLog, CompletionOutcome, Message, Notice, NoticeLevel, OutagePolicy,
    PlatformError, Relay, TurnContext, Verdict,
};
use serenity::all::{
    Channel, ChannelId, ChannelType, Command, CommandInteraction,
    CommandOptionType, Context, CreateCommand, CreateCommandOption,
    CreateInteractionResponse, CreateInteractionResponseFollowup,
    CreateInteractionResponseMessage, CreateThread, EventHandler, GuildId, Http,
    Interaction, Ready, UserId,
};
use serenity::async_trait;
use serenity::model::channel::Message as DiscordMessage;

use crate::config::Settings;
use crate::discord::{
    DiscordAudit, DiscordThread, delete_message, notice_embed, thread_info,
    to_thread_message,
};

const CHAT_COMMAND: &str = "chat";
const ASK_COMMAND: &str = "ask";
const DELETE_COMMAND: &str = "delete";
const MESSAGE_OPTION: &str = "message";
const MESSAGE_ID_OPTION: &str = "message_id";
const COMMANDS: [&str; 3] = [CHAT_COMMAND, ASK_COMMAND, DELETE_COMMAND];

const BLOCKED_PROMPT: &str = "Your prompt has been blocked by moderation.";
const FLAGGED_PROMPT: &str = "⚠️ This prompt was flagged by moderation.";
const BLOCKED_ANSWER: &str =
    "❌ **The response has been blocked by moderation.**";
const NOT_ALLOWED: &str = "You are not allowed to use this command.";

/// Routes Discord events to the relay.
pub struct Handler {
    relay: Relay,
    allowed_guilds: HashSet<u64>,
    audit_channels: HashMap<u64, u64>,
    admin_users: HashSet<u64>,
    bot_id: OnceLock<UserId>,
}

impl Handler {
    pub fn new(relay: Relay, settings: &Settings) -> Self {
        Self {
            relay,
            allowed_guilds: settings.allowed_guilds.clone(),
            audit_channels: settings.audit_channels.clone(),
            admin_users: settings.admin_users.clone(),
            bot_id: OnceLock::new(),
        }
    }

    fn is_allowed(&self, guild_id: Option<GuildId>) -> bool {
        match guild_id {
            Some(id) => {
                self.allowed_guilds.is_empty()
                    || self.allowed_guilds.contains(&id.get())
            }
            None => false,
        }
    }

    fn audit(
        &self,
        http: &Arc<Http>,
        guild_id: Option<GuildId>,
    ) -> Option<DiscordAudit> {
        let channel_id = self.audit_channels.get(&guild_id?.get())?;
        Some(DiscordAudit::new(http.clone(), ChannelId::new(*channel_id)))
    }

    async fn handle_message(
        &self,
        ctx: &Context,
        msg: &DiscordMessage,
    ) -> Result<(), PlatformError> {
        let Some(&bot_id) = self.bot_id.get() else {
            return Ok(());
        };
        if !self.is_allowed(msg.guild_id) || msg.author.id == bot_id {
            return Ok(());
        }

        let channel = msg
            .channel_id
            .to_channel(ctx)
            .await
            .map_err(PlatformError::new)?;
        let Channel::Guild(channel) = channel else {
            return Ok(());
        };
        if channel.thread_metadata.is_none() {
            return Ok(());
        }

        let info = thread_info(&channel, bot_id);
        let thread = DiscordThread::new(
            ctx.http.clone(),
            channel.id,
            channel.name.clone(),
            bot_id,
            self.relay.config(),
        );
        let audit = self.audit(&ctx.http, msg.guild_id);
        let bot_id = bot_id.to_string();
        let turn = TurnContext {
            bot_id: &bot_id,
            thread: &thread,
            audit: audit.as_ref().map(|a| a as &dyn AuditLog),
        };

        let outcome = self
            .relay
            .handle_thread_message(turn, &info, &to_thread_message(msg))
            .await?;
        debug!("thread {} message {}: {outcome:?}", channel.name, msg.id);
        Ok(())
    }

    async fn moderate_prompt(
        &self,
        prompt: &str,
        user: &str,
    ) -> Result<Verdict, PlatformError> {
        match self.relay.moderate_message(prompt, user).await {
            Ok(verdict) => Ok(verdict),
            Err(err) => match self.relay.config().outage_policy() {
                OutagePolicy::FailClosed => Err(PlatformError::new(err)),
                OutagePolicy::FailOpen => {
                    warn!("starting an unmoderated chat: {err}");
                    Ok(Verdict::default())
                }
            },
        }
    }

    async fn start_chat(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
        prompt: &str,
    ) -> Result<(), PlatformError> {
        let user = &command.user;
        let audit = self.audit(&ctx.http, command.guild_id);
        let audit = audit.as_ref().map(|a| a as &dyn AuditLog);

        let verdict = self.moderate_prompt(prompt, &user.name).await?;
        if verdict.is_blocked() {
            let blocked = Some(prompt);
            send_blocked_notice(audit, &user.name, &verdict.blocked, blocked)
                .await?;
            let text = format!("{BLOCKED_PROMPT}\n{prompt}");
            return respond_ephemeral(ctx, command, &text).await;
        }

        let started = chat_started_notice(user.id, verdict.is_flagged());
        let embed =
            notice_embed(started).field(user.name.clone(), prompt, false);
        let response = CreateInteractionResponseMessage::new().embed(embed);
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(response),
            )
            .await
            .map_err(PlatformError::new)?;
        let starter = command
            .get_response(&ctx.http)
            .await
            .map_err(PlatformError::new)?;

        let link = starter.link();
        send_flagged_notice(
            audit,
            &user.name,
            &verdict.flagged,
            Some(prompt),
            Some(link.as_str()),
        )
        .await?;

        let config = self.relay.config();
        let name = format!(
            "{} {} - {}",
            config.active_thread_prefix(),
            truncate(&user.name, 20),
            truncate(prompt, 30)
        );
        let channel = command
            .channel_id
            .create_thread_from_message(
                &ctx.http,
                starter.id,
                CreateThread::new(name),
            )
            .await
            .map_err(PlatformError::new)?;
        info!("started chat {} for {}", channel.name, user.name);

        let bot_id = self
            .bot_id
            .get()
            .copied()
            .unwrap_or_else(|| ctx.cache.current_user().id);
        let thread = DiscordThread::new(
            ctx.http.clone(),
            channel.id,
            channel.name.clone(),
            bot_id,
            config,
        );
        let _typing = channel.id.start_typing(&ctx.http);
        let outcome = self
            .relay
            .generate_completion_response(
                vec![Message::new(user.name.clone(), prompt)],
                &user.name,
            )
            .await;
        self.relay
            .process_response(&user.name, &thread, audit, outcome)
            .await
    }

    async fn ask(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
        question: &str,
    ) -> Result<(), PlatformError> {
        let user = &command.user;
        command.defer(&ctx.http).await.map_err(PlatformError::new)?;

        let outcome = self
            .relay
            .generate_completion_response(
                vec![Message::new(user.name.clone(), question)],
                &user.name,
            )
            .await;

        let audit = self.audit(&ctx.http, command.guild_id);
        let audit = audit.as_ref().map(|a| a as &dyn AuditLog);
        let reply = match &outcome {
            CompletionOutcome::Ok { reply } => reply.clone(),
            CompletionOutcome::ModerationFlagged { reply, status } => {
                let text = Some(reply.as_str());
                send_flagged_notice(audit, &user.name, status, text, None)
                    .await?;
                reply.clone()
            }
            CompletionOutcome::ModerationBlocked { reply, status } => {
                let text = Some(reply.as_str());
                send_blocked_notice(audit, &user.name, status, text).await?;
                BLOCKED_ANSWER.to_owned()
            }
            other => {
                let status = other.status_text().unwrap_or_default();
                format!("**Error** - {status}")
            }
        };

        let text = format!("> {question}\n\n{reply}");
        let max_chars = self.relay.config().max_chars_per_message();
        for chunk in split_into_shorter_messages(&text, max_chars) {
            command
                .create_followup(
                    &ctx.http,
                    CreateInteractionResponseFollowup::new().content(chunk),
                )
                .await
                .map_err(PlatformError::new)?;
        }
        Ok(())
    }

    async fn delete(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
    ) -> Result<(), PlatformError> {
        if !self.admin_users.contains(&command.user.id.get()) {
            warn!("{} is not allowed to delete messages", command.user.name);
            return respond_ephemeral(ctx, command, NOT_ALLOWED).await;
        }
        let Some(message_id) = string_option(command, MESSAGE_ID_OPTION) else {
            return respond_ephemeral(ctx, command, "A message id is required.")
                .await;
        };

        delete_message(&ctx.http, command.channel_id, message_id).await?;
        info!("{} deleted message {message_id}", command.user.name);
        let embed = notice_embed(Notice::error("Message deleted"));
        let message = CreateInteractionResponseMessage::new()
            .embed(embed)
            .ephemeral(true);
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(message),
            )
            .await
            .map_err(PlatformError::new)
    }

    async fn handle_command(
        &self,
        ctx: &Context,
        command: &CommandInteraction,
    ) -> Result<(), PlatformError> {
        let name = command.data.name.as_str();
        if !COMMANDS.contains(&name) || !self.is_allowed(command.guild_id) {
            return Ok(());
        }
        if name == DELETE_COMMAND {
            return self.delete(ctx, command).await;
        }
        let in_text_channel = command
            .channel
            .as_ref()
            .is_none_or(|channel| channel.kind == ChannelType::Text);
        if !in_text_channel {
            return respond_ephemeral(
                ctx,
                command,
                "This command can only be used in a text channel.",
            )
            .await;
        }
        let Some(prompt) = string_option(command, MESSAGE_OPTION) else {
            return respond_ephemeral(ctx, command, "A message is required.")
                .await;
        };
        let user = &command.user.name;
        debug!("{name} command by {user} {}", truncate(prompt, 20));

        if name == CHAT_COMMAND {
            self.start_chat(ctx, command, prompt).await
        } else {
            self.ask(ctx, command, prompt).await
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("logged in as {}", ready.user.name);
        self.bot_id.set(ready.user.id).ok();

        let registered =
            Command::set_global_commands(&ctx.http, commands()).await;
        if let Err(err) = registered {
            error!("cannot register commands: {err}");
        }
    }

    async fn message(&self, ctx: Context, msg: DiscordMessage) {
        if let Err(err) = self.handle_message(&ctx, &msg).await {
            error!("failed to handle message {}: {err}", msg.id);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        if let Err(err) = self.handle_command(&ctx, &command).await {
            error!("/{} failed: {err}", command.data.name);
            let text = format!("Failed to reply. {err}");
            // The interaction may have been answered already.
            if respond_ephemeral(&ctx, &command, &text).await.is_err() {
                let followup = CreateInteractionResponseFollowup::new()
                    .content(text)
                    .ephemeral(true);
                command.create_followup(&ctx.http, followup).await.ok();
            }
        }
    }
}

fn chat_started_notice(user_id: UserId, flagged: bool) -> Notice {
    let started = format!("<@{user_id}> started a chat.");
    if flagged {
        Notice::warning(started).with_title(FLAGGED_PROMPT)
    } else {
        Notice::new(NoticeLevel::Success, started)
    }
}

fn commands() -> Vec<CreateCommand> {
    let text = |name: &str, description: &str| {
        CreateCommandOption::new(CommandOptionType::String, name, description)
            .required(true)
    };
    vec![
        CreateCommand::new(CHAT_COMMAND)
            .description("Create a new thread for conversation")
            .add_option(text(
                MESSAGE_OPTION,
                "The first prompt to start the chat with",
            )),
        CreateCommand::new(ASK_COMMAND)
            .description("Replies a single message")
            .add_option(text(MESSAGE_OPTION, "The question to ask")),
        CreateCommand::new(DELETE_COMMAND)
            .description("Delete a message")
            .add_option(text(MESSAGE_ID_OPTION, "The id of the message")),
    ]
}

fn string_option<'a>(
    command: &'a CommandInteraction,
    name: &str,
) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| option.value.as_str())
}

async fn respond_ephemeral(
    ctx: &Context,
    command: &CommandInteraction,
    text: &str,
) -> Result<(), PlatformError> {
    let message = CreateInteractionResponseMessage::new()
        .content(text)
        .ephemeral(true);
    command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await
        .map_err(PlatformError::new)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
