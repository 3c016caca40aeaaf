//! Request and response shapes for the two OpenAI-style APIs the gateway speaks.
//!
//! The API flavor is picked once when the gateway is built; every request and
//! reply then goes through the matching variant instead of probing fields at
//! runtime.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFlavor {
    /// `POST /chat/completions` with `messages`
    ChatCompletions,
    /// `POST /responses` with `instructions` + `input`
    Responses,
}

impl ApiFlavor {
    /// Pick the flavor: forced by configuration, or the Responses API for
    /// project-scoped keys (`sk-proj-...`).
    pub fn select(force_responses: bool, api_key: &str) -> Self {
        if force_responses || api_key.starts_with("sk-proj-") {
            ApiFlavor::Responses
        } else {
            ApiFlavor::ChatCompletions
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            ApiFlavor::ChatCompletions => "chat/completions",
            ApiFlavor::Responses => "responses",
        }
    }
}

/// Check if a model is a reasoning model that doesn't support temperature
pub fn is_reasoning_model(model: &str) -> bool {
    let name = model.rsplit('/').next().unwrap_or(model);
    name.starts_with("gpt-5")
        || name.starts_with("o1")
        || name.starts_with("o3")
        || name.starts_with("o4")
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

const JSON_OBJECT: ResponseFormat = ResponseFormat {
    kind: "json_object",
};

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct TextConfig {
    format: ResponseFormat,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponsesRequest<'a> {
    model: &'a str,
    instructions: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    text: TextConfig,
}

/// Body of one request, serialized as the matching API expects.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum ModelRequest<'a> {
    Chat(ChatRequest<'a>),
    Responses(ResponsesRequest<'a>),
}

pub(crate) fn build_request<'a>(
    flavor: ApiFlavor,
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    temperature: Option<f32>,
) -> ModelRequest<'a> {
    match flavor {
        ApiFlavor::ChatCompletions => ModelRequest::Chat(ChatRequest {
            model,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature,
            response_format: JSON_OBJECT,
        }),
        ApiFlavor::Responses => ModelRequest::Responses(ResponsesRequest {
            model,
            instructions: system,
            input: prompt,
            temperature,
            text: TextConfig {
                format: JSON_OBJECT,
            },
        }),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponsesResponse {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<ResponsesOutputItem>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponsesOutputItem {
    #[serde(default)]
    content: Vec<ResponsesContent>,
}

#[derive(Debug, Deserialize)]
struct ResponsesContent {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponsesUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

/// Token usage reported by the endpoint, when it reports any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// A decoded reply, tagged by the API it came from.
#[derive(Debug)]
pub(crate) enum ModelReply {
    Chat(ChatResponse),
    Responses(ResponsesResponse),
}

impl ModelReply {
    pub fn parse(flavor: ApiFlavor, body: &str) -> Result<Self, serde_json::Error> {
        Ok(match flavor {
            ApiFlavor::ChatCompletions => ModelReply::Chat(serde_json::from_str(body)?),
            ApiFlavor::Responses => ModelReply::Responses(serde_json::from_str(body)?),
        })
    }

    /// The model's text output, trimmed. `None` if the reply carries no text.
    pub fn text(&self) -> Option<String> {
        let text = match self {
            ModelReply::Chat(reply) => reply
                .choices
                .first()
                .and_then(|c| c.message.content.as_deref()),
            ModelReply::Responses(reply) => reply
                .output_text
                .as_deref()
                .filter(|t| !t.is_empty())
                .or_else(|| {
                    reply
                        .output
                        .iter()
                        .flat_map(|item| item.content.iter())
                        .find_map(|c| c.text.as_deref())
                }),
        };
        text.map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    pub fn usage(&self) -> TokenUsage {
        match self {
            ModelReply::Chat(reply) => reply
                .usage
                .as_ref()
                .map(|u| TokenUsage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                })
                .unwrap_or_default(),
            ModelReply::Responses(reply) => reply
                .usage
                .as_ref()
                .map(|u| TokenUsage {
                    input_tokens: u.input_tokens,
                    output_tokens: u.output_tokens,
                })
                .unwrap_or_default(),
        }
    }
}
