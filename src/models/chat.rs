use chrono::Utc;
use serde::{ Serialize, Deserialize };
use serde_json::{ Map, Value as JsonValue };
use uuid::Uuid;

use crate::error::{ ApiError, ApiResult };

/// Envelope code the backend uses to signal success.
pub const SUCCESS_CODE: i64 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub memory_id: String,
    pub user_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_send_time: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    User,
    Ai,
    ToolCall,
    ToolResult,
    System,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub completion: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tokens_input: u64,
    #[serde(default)]
    pub tokens_output: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub memory_id: String,
    pub turn_index: i64,
    pub message_type: MessageType,
    #[serde(default)]
    pub content: Content,
    #[serde(default)]
    pub send_time: String,
    #[serde(default)]
    pub model: ModelInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, JsonValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    fn local(memory_id: &str, turn_index: i64, message_type: MessageType, content: Content) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            memory_id: memory_id.to_string(),
            turn_index,
            message_type,
            content,
            send_time: Utc::now().to_rfc3339(),
            model: ModelInfo::default(),
            metadata: None,
            tool_calls: None,
        }
    }

    /// A user turn built on the client before the backend has stored it.
    pub fn local_user(memory_id: &str, turn_index: i64, text: &str) -> Self {
        Self::local(memory_id, turn_index, MessageType::User, Content {
            prompt: text.to_string(),
            completion: String::new(),
        })
    }

    /// An assistant turn assembled from a consumed response stream.
    pub fn local_ai(memory_id: &str, turn_index: i64, text: &str) -> Self {
        Self::local(memory_id, turn_index, MessageType::Ai, Content {
            prompt: String::new(),
            completion: text.to_string(),
        })
    }

    /// The text worth showing for this turn.
    pub fn display_text(&self) -> &str {
        match self.message_type {
            MessageType::User => &self.content.prompt,
            _ if !self.content.completion.is_empty() => &self.content.completion,
            _ => &self.content.prompt,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationsRes {
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub total_count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNewConversationRes {
    pub memory_id: String,
    #[serde(default)]
    pub message: String,
}

/// The backend has answered title requests both as a bare string and as an
/// object carrying a `title` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerateTitleRes {
    Plain(String),
    Titled { title: String },
    Other(JsonValue),
}

impl GenerateTitleRes {
    pub fn title(&self) -> Option<&str> {
        match self {
            GenerateTitleRes::Plain(title) => Some(title),
            GenerateTitleRes::Titled { title } => Some(title),
            GenerateTitleRes::Other(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesRes {
    #[serde(default)]
    pub memory_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub total_count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReq {
    pub memory_id: String,
    pub message: String,
}

/// `{code, data, msg}` wrapper present on every buffered backend response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    pub data: Option<T>,
    pub msg: Option<String>,
}

impl<T> Envelope<T> {
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// Successful payload, or `ApiError::Rejected` for any other code.
    ///
    /// A success envelope without `data` is also rejected since there is
    /// nothing to hand back.
    pub fn into_data(self) -> ApiResult<T> {
        match (self.code, self.data) {
            (SUCCESS_CODE, Some(data)) => Ok(data),
            (code, _) =>
                Err(ApiError::Rejected {
                    code,
                    msg: self.msg.unwrap_or_default(),
                }),
        }
    }

    pub fn success_data(&self) -> Option<&T> {
        if self.is_success() { self.data.as_ref() } else { None }
    }
}
