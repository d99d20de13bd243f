//! Discord implementations of the relay's platform traits.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{
    AuditLog, BotConfig, Message, Notice, NoticeLevel, PlatformError,
    SentMessage, Thread, ThreadInfo, ThreadMessage,
};
use serenity::all::{
    ChannelId, Colour, CreateEmbed, CreateMessage, EditThread, GetMessages,
    GuildChannel, Http, MessageId, MessageType, UserId,
};
use serenity::model::channel::Message as DiscordMessage;

// Discord caps one page of history at this many messages.
const HISTORY_PAGE: usize = 100;

pub fn notice_colour(level: NoticeLevel) -> Colour {
    match level {
        NoticeLevel::Success => Colour::DARK_GREEN,
        NoticeLevel::Warning => Colour::GOLD,
        NoticeLevel::Error => Colour::RED,
    }
}

pub fn notice_embed(notice: Notice) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .description(notice.description)
        .colour(notice_colour(notice.level));
    if let Some(title) = notice.title {
        embed = embed.title(title);
    }
    embed
}

/// Converts a Discord message to a transcript entry.
///
/// The message that started a thread carries the opening prompt in the
/// first field of its embed, under the name of the user who wrote it.
/// Messages without text are skipped.
pub fn to_relay_message(
    message: &DiscordMessage,
    bot_id: UserId,
    bot_name: &str,
) -> Option<Message> {
    if message.kind == MessageType::ThreadStarterMessage {
        let starter = message.referenced_message.as_deref()?;
        let field = starter.embeds.first()?.fields.first()?;
        return Some(Message::new(field.name.clone(), field.value.clone()));
    }
    if message.content.is_empty() {
        return None;
    }
    let user = if message.author.id == bot_id {
        bot_name.to_owned()
    } else {
        message.author.name.clone()
    };
    Some(Message::new(user, message.content.clone()))
}

pub fn to_thread_message(message: &DiscordMessage) -> ThreadMessage {
    ThreadMessage {
        id: message.id.to_string(),
        author_id: message.author.id.to_string(),
        author_name: message.author.name.clone(),
        text: message.content.clone(),
        url: Some(message.link()),
    }
}

pub fn thread_info(channel: &GuildChannel, bot_id: UserId) -> ThreadInfo {
    let metadata = channel.thread_metadata.as_ref();
    ThreadInfo {
        owned_by_bot: channel.owner_id == Some(bot_id),
        name: channel.name.clone(),
        archived: metadata.is_some_and(|m| m.archived),
        locked: metadata.is_some_and(|m| m.locked),
        message_count: channel.message_count.unwrap_or_default() as usize,
    }
}

fn parse_message_id(message_id: &str) -> Result<MessageId, PlatformError> {
    message_id
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(MessageId::new)
        .ok_or_else(|| {
            PlatformError::msg(format!("bad message id {message_id}"))
        })
}

/// Deletes a message by its id, given as text.
pub async fn delete_message(
    http: &Http,
    channel_id: ChannelId,
    message_id: &str,
) -> Result<(), PlatformError> {
    let message_id = parse_message_id(message_id)?;
    channel_id
        .delete_message(http, message_id)
        .await
        .map_err(PlatformError::new)
}

fn sent(message: &DiscordMessage) -> SentMessage {
    SentMessage {
        id: message.id.to_string(),
        url: Some(message.link()),
    }
}

/// A Discord thread the relay converses in.
pub struct DiscordThread {
    http: Arc<Http>,
    channel_id: ChannelId,
    name: String,
    bot_id: UserId,
    bot_name: String,
    active_prefix: String,
    inactive_prefix: String,
}

impl DiscordThread {
    pub fn new(
        http: Arc<Http>,
        channel_id: ChannelId,
        name: String,
        bot_id: UserId,
        config: &BotConfig,
    ) -> Self {
        Self {
            http,
            channel_id,
            name,
            bot_id,
            bot_name: config.bot_name().to_owned(),
            active_prefix: config.active_thread_prefix().to_owned(),
            inactive_prefix: config.inactive_thread_prefix().to_owned(),
        }
    }

    fn closed_name(&self) -> String {
        match self.name.strip_prefix(&self.active_prefix) {
            Some(rest) => format!("{}{rest}", self.inactive_prefix),
            None => format!("{} {}", self.inactive_prefix, self.name),
        }
    }
}

#[async_trait]
impl Thread for DiscordThread {
    async fn send_text(
        &self,
        text: &str,
    ) -> Result<SentMessage, PlatformError> {
        let message = self
            .channel_id
            .say(&self.http, text)
            .await
            .map_err(PlatformError::new)?;
        Ok(sent(&message))
    }

    async fn send_notice(
        &self,
        notice: Notice,
    ) -> Result<SentMessage, PlatformError> {
        let message = CreateMessage::new().embed(notice_embed(notice));
        let message = self
            .channel_id
            .send_message(&self.http, message)
            .await
            .map_err(PlatformError::new)?;
        Ok(sent(&message))
    }

    async fn delete_message(
        &self,
        message_id: &str,
    ) -> Result<(), PlatformError> {
        delete_message(&self.http, self.channel_id, message_id).await
    }

    async fn close(&self) -> Result<(), PlatformError> {
        let edit = EditThread::new()
            .name(self.closed_name())
            .archived(true)
            .locked(true);
        self.channel_id
            .edit_thread(&self.http, edit)
            .await
            .map_err(PlatformError::new)?;
        Ok(())
    }

    async fn latest_message(
        &self,
    ) -> Result<Option<ThreadMessage>, PlatformError> {
        let messages = self
            .channel_id
            .messages(&self.http, GetMessages::new().limit(1))
            .await
            .map_err(PlatformError::new)?;
        Ok(messages.first().map(to_thread_message))
    }

    async fn history(
        &self,
        limit: usize,
    ) -> Result<Vec<Message>, PlatformError> {
        // Pages come newest first.
        let mut fetched: Vec<DiscordMessage> = Vec::with_capacity(limit);
        while fetched.len() < limit {
            let page_size = (limit - fetched.len()).min(HISTORY_PAGE) as u8;
            let mut request = GetMessages::new().limit(page_size);
            if let Some(oldest) = fetched.last() {
                request = request.before(oldest.id);
            }
            let page = self
                .channel_id
                .messages(&self.http, request)
                .await
                .map_err(PlatformError::new)?;
            let exhausted = page.len() < page_size as usize;
            fetched.extend(page);
            if exhausted {
                break;
            }
        }

        Ok(fetched
            .iter()
            .rev()
            .filter_map(|m| to_relay_message(m, self.bot_id, &self.bot_name))
            .collect())
    }
}

/// A guild's moderation audit channel.
pub struct DiscordAudit {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl DiscordAudit {
    #[inline]
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl AuditLog for DiscordAudit {
    async fn post(&self, text: &str) -> Result<(), PlatformError> {
        self.channel_id
            .say(&self.http, text)
            .await
            .map_err(PlatformError::new)?;
        Ok(())
    }
}
