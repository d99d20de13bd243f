//! Startup configuration, read from the environment and an optional
//! persona file.

use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs};

use relay_core::{BotConfig, BotConfigBuilder, Message, OutagePolicy};
use relay_openai_model::{OpenAIConfig, OpenAIConfigBuilder};
use serde::Deserialize;

const DEFAULT_BOT_NAME: &str = "GPT";
const DEFAULT_LIVENESS_ADDR: &str = "0.0.0.0:1234";

/// A configuration value is missing or malformed.
#[derive(Debug)]
pub struct ConfigError {
    key: String,
    reason: String,
}

impl ConfigError {
    fn missing(key: &str) -> Self {
        Self {
            key: key.to_owned(),
            reason: "is not set".to_owned(),
        }
    }

    fn invalid<R: Display>(key: &str, reason: R) -> Self {
        Self {
            key: key.to_owned(),
            reason: reason.to_string(),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.reason)
    }
}

impl StdError for ConfigError {}

/// The bot's personality, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Persona {
    /// Overrides `BOT_NAME`.
    pub name: Option<String>,
    /// The system instruction.
    pub instructions: Option<String>,
    /// Few-shot example conversations.
    #[serde(default)]
    pub example_conversations: Vec<ExampleConversation>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExampleConversation {
    pub messages: Vec<Message>,
}

impl Persona {
    pub fn parse(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}

/// Everything the binary needs to start.
pub struct Settings {
    pub discord_token: String,
    pub openai: OpenAIConfig,
    /// Guilds the bot serves. Empty means every guild.
    pub allowed_guilds: HashSet<u64>,
    /// Guild id to moderation audit channel id.
    pub audit_channels: HashMap<u64, u64>,
    /// Users allowed to run admin commands.
    pub admin_users: HashSet<u64>,
    pub liveness_addr: String,
    pub bot: BotConfig,
}

impl Settings {
    /// Reads the settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required =
            |key: &str| lookup(key).ok_or_else(|| ConfigError::missing(key));

        let discord_token = required("DISCORD_BOT_TOKEN")?;

        let mut openai =
            OpenAIConfigBuilder::with_api_key(required("OPENAI_API_KEY")?);
        if let Some(base_url) = lookup("OPENAI_BASE_URL") {
            openai = openai.with_base_url(base_url);
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            openai = openai.with_model(model);
        }

        let allowed_guilds = id_set(&lookup, "ALLOWED_SERVER_IDS")?;
        let admin_users = id_set(&lookup, "ADMIN_USER_IDS")?;
        let audit_channels = match lookup("SERVER_TO_MODERATION_CHANNEL") {
            Some(pairs) => parse_channel_map(&pairs).map_err(|err| {
                ConfigError::invalid("SERVER_TO_MODERATION_CHANNEL", err)
            })?,
            None => HashMap::new(),
        };

        let persona = match lookup("PERSONA_FILE") {
            Some(path) => {
                let source = fs::read_to_string(&path)
                    .map_err(|err| ConfigError::invalid("PERSONA_FILE", err))?;
                Persona::parse(&source)
                    .map_err(|err| ConfigError::invalid("PERSONA_FILE", err))?
            }
            None => Persona::default(),
        };

        let bot_name = persona
            .name
            .clone()
            .or_else(|| lookup("BOT_NAME"))
            .unwrap_or_else(|| DEFAULT_BOT_NAME.to_owned());

        let mut bot = BotConfigBuilder::with_bot_name(bot_name);
        if let Some(instructions) = persona.instructions {
            bot = bot.with_instructions(instructions);
        }
        for example in persona.example_conversations {
            bot = bot.with_example_conversation(example.messages);
        }
        if let Some(seconds) = number(&lookup, "SECONDS_DELAY_RECEIVING_MSG")? {
            bot = bot.with_receive_delay(Duration::from_secs(seconds));
        }
        if let Some(max_messages) = number(&lookup, "MAX_THREAD_MESSAGES")? {
            bot = bot.with_max_thread_messages(max_messages);
        }
        if let Some(max_chars) = number(&lookup, "MAX_CHARS_PER_REPLY_MSG")? {
            bot = bot.with_max_chars_per_message(max_chars);
        }
        if let Some(policy) = lookup("MODERATION_OUTAGE_POLICY") {
            let policy = parse_outage_policy(&policy).map_err(|err| {
                ConfigError::invalid("MODERATION_OUTAGE_POLICY", err)
            })?;
            bot = bot.with_outage_policy(policy);
        }

        Ok(Self {
            discord_token,
            openai: openai.build(),
            allowed_guilds,
            audit_channels,
            admin_users,
            liveness_addr: lookup("LIVENESS_ADDR")
                .unwrap_or_else(|| DEFAULT_LIVENESS_ADDR.to_owned()),
            bot: bot.build(),
        })
    }
}

fn id_set<F>(lookup: &F, key: &str) -> Result<HashSet<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(ids) => {
            parse_ids(&ids).map_err(|err| ConfigError::invalid(key, err))
        }
        None => Ok(HashSet::new()),
    }
}

fn number<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .map(|value| {
            value.trim().parse().map_err(|_| {
                ConfigError::invalid(key, format!("is not a number: {value:?}"))
            })
        })
        .transpose()
}

fn parse_outage_policy(source: &str) -> Result<OutagePolicy, String> {
    match source.trim() {
        "fail-closed" => Ok(OutagePolicy::FailClosed),
        "fail-open" => Ok(OutagePolicy::FailOpen),
        other => {
            Err(format!("must be fail-closed or fail-open, got {other:?}"))
        }
    }
}

fn parse_ids(source: &str) -> Result<HashSet<u64>, String> {
    source
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| id.parse().map_err(|_| format!("has a bad id {id:?}")))
        .collect()
}

// "guild:channel,guild:channel"
fn parse_channel_map(source: &str) -> Result<HashMap<u64, u64>, String> {
    source
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let bad_pair = || format!("has a bad pair {pair:?}");
            let (guild, channel) = pair.split_once(':').ok_or_else(bad_pair)?;
            let guild = guild.trim().parse().map_err(|_| bad_pair())?;
            let channel = channel.trim().parse().map_err(|_| bad_pair())?;
            Ok((guild, channel))
        })
        .collect()
}
