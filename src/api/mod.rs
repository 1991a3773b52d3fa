pub mod request;
pub mod stream;

use async_trait::async_trait;
use log::info;

use crate::config::ClientConfig;
use crate::error::ApiResult;
use crate::models::chat::{
    ChatReq,
    ConversationsRes,
    CreateNewConversationRes,
    Envelope,
    GenerateTitleRes,
    MessagesRes,
};
use self::request::RequestClient;
use self::stream::{ ChatStream, StreamClient };

/// Application actions mapped onto backend calls.
///
/// The four buffered operations return the envelope as-is so callers decide
/// what a non-success code means; the streaming send returns the open body.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_conversations(&self) -> ApiResult<Envelope<ConversationsRes>>;

    async fn create_conversation(&self) -> ApiResult<Envelope<CreateNewConversationRes>>;

    async fn generate_title(
        &self,
        memory_id: &str,
        message: &str
    ) -> ApiResult<Envelope<GenerateTitleRes>>;

    async fn get_messages(&self, memory_id: &str) -> ApiResult<Envelope<MessagesRes>>;

    async fn send_chat_message(&self, req: &ChatReq) -> ApiResult<ChatStream>;
}

/// [`ChatApi`] over HTTP: buffered calls go through [`RequestClient`], the
/// streaming send through [`StreamClient`].
#[derive(Clone)]
pub struct HttpChatApi {
    request: RequestClient,
    stream: StreamClient,
}

impl HttpChatApi {
    pub fn new(config: &ClientConfig) -> ApiResult<Self> {
        let request = RequestClient::new(config)?;
        let stream = StreamClient::new(config)?;
        info!("Chat API configured: base={}, stream={}", request.base_url(), stream.url());
        Ok(Self { request, stream })
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_conversations(&self) -> ApiResult<Envelope<ConversationsRes>> {
        self.request.get("/conversation/getConversationsByIp", &[]).await
    }

    async fn create_conversation(&self) -> ApiResult<Envelope<CreateNewConversationRes>> {
        self.request.post("/conversation/createNew").await
    }

    async fn generate_title(
        &self,
        memory_id: &str,
        message: &str
    ) -> ApiResult<Envelope<GenerateTitleRes>> {
        let body = ChatReq {
            memory_id: memory_id.to_string(),
            message: message.to_string(),
        };
        self.request.post_json("/conversation/generateTitle", &body).await
    }

    async fn get_messages(&self, memory_id: &str) -> ApiResult<Envelope<MessagesRes>> {
        self.request.get("/message/getMessagesById", &[("memoryId", memory_id)]).await
    }

    async fn send_chat_message(&self, req: &ChatReq) -> ApiResult<ChatStream> {
        self.stream.send(req).await
    }
}
