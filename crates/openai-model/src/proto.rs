use std::fmt;

use relay_model::{ChatMessage, CompletionRequest, ModerationRequest, Role};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::OpenAIConfig;

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct Choice {
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ModerationResponse {
    pub results: Vec<ModerationResult>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ModerationResult {
    /// Scores in the order the server listed them.
    #[serde(default, deserialize_with = "ordered_scores")]
    pub category_scores: Vec<(String, f64)>,
}

fn ordered_scores<'de, D>(
    deserializer: D,
) -> Result<Vec<(String, f64)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ScoresVisitor;

    impl<'de> Visitor<'de> for ScoresVisitor {
        type Value = Vec<(String, f64)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of category scores")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut scores =
                Vec::with_capacity(map.size_hint().unwrap_or_default());
            while let Some(entry) = map.next_entry::<String, f64>()? {
                scores.push(entry);
            }
            Ok(scores)
        }
    }

    deserializer.deserialize_map(ScoresVisitor)
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ErrorResponse {
    pub error: ApiError,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ApiError {
    pub message: String,
    pub r#type: Option<String>,
    pub code: Option<String>,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Message {
    role: Role,
    content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    n: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    user: String,
    stream: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CreateModerationRequest {
    model: String,
    input: String,
}

// -----------
// Conversions
// -----------

#[inline]
pub fn create_request(
    req: &CompletionRequest,
    config: &OpenAIConfig,
) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: config.model.clone(),
        messages: req.messages.iter().map(create_message).collect(),
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        n: req.n,
        stop: req.stop.clone(),
        user: req.user.clone(),
        stream: true,
    }
}

#[inline]
pub fn create_moderation_request(
    req: &ModerationRequest,
    config: &OpenAIConfig,
) -> CreateModerationRequest {
    CreateModerationRequest {
        model: config.moderation_model.clone(),
        input: req.input.clone(),
    }
}

#[inline]
fn create_message(msg: &ChatMessage) -> Message {
    Message {
        role: msg.role,
        content: msg.content.clone(),
    }
}
