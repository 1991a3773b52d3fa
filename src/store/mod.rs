use log::{ debug, error, info, warn };
use std::sync::Arc;
use std::sync::atomic::{ AtomicU64, AtomicUsize, Ordering };
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::api::{ ChatApi, HttpChatApi };
use crate::config::ClientConfig;
use crate::error::ApiResult;
use crate::models::chat::{ Conversation, Message };

/// Everything the UI reads. Derived values are methods, never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub conversations: Vec<Conversation>,
    pub current_memory_id: String,
    pub current_messages: Vec<Message>,
    pub is_loading: bool,
    pub is_creating_conversation: bool,
}

impl ChatState {
    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.memory_id == self.current_memory_id)
    }

    pub fn has_conversations(&self) -> bool {
        !self.conversations.is_empty()
    }

    /// Turn index one past the highest seen in the current message list.
    pub fn next_turn_index(&self) -> i64 {
        self.current_messages
            .iter()
            .map(|m| m.turn_index)
            .max()
            .map_or(0, |max| max + 1)
    }
}

#[derive(Clone, Copy)]
enum Flag {
    Loading,
    Creating,
}

/// Clears its flag when dropped, whatever way the action ended.
struct FlagGuard<'a> {
    store: &'a ChatStore,
    flag: Flag,
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.store.leave(self.flag);
    }
}

/// Observable conversation/message state with async actions.
///
/// Action failures are logged and never returned: transport errors at
/// `error`, non-success envelopes at `warn`. Overlapping loads of the same
/// kind are ordered by sequence tokens, so a response from a superseded
/// call is dropped instead of overwriting newer state.
pub struct ChatStore {
    api: Arc<dyn ChatApi>,
    state: watch::Sender<ChatState>,
    conversations_seq: AtomicU64,
    messages_seq: AtomicU64,
    loads_in_flight: AtomicUsize,
    creates_in_flight: AtomicUsize,
}

impl ChatStore {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        let (state, _) = watch::channel(ChatState::default());
        Self {
            api,
            state,
            conversations_seq: AtomicU64::new(0),
            messages_seq: AtomicU64::new(0),
            loads_in_flight: AtomicUsize::new(0),
            creates_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &ClientConfig) -> ApiResult<Self> {
        let api = HttpChatApi::new(config)?;
        Ok(Self::new(Arc::new(api)))
    }

    pub fn api(&self) -> Arc<dyn ChatApi> {
        Arc::clone(&self.api)
    }

    pub fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    /// Snapshots of the state, starting with the current one.
    pub fn changes(&self) -> WatchStream<ChatState> {
        WatchStream::new(self.subscribe())
    }

    fn enter(&self, flag: Flag) -> FlagGuard<'_> {
        self.state.send_modify(|s| {
            match flag {
                Flag::Loading => {
                    self.loads_in_flight.fetch_add(1, Ordering::SeqCst);
                    s.is_loading = true;
                }
                Flag::Creating => {
                    self.creates_in_flight.fetch_add(1, Ordering::SeqCst);
                    s.is_creating_conversation = true;
                }
            }
        });
        FlagGuard { store: self, flag }
    }

    fn leave(&self, flag: Flag) {
        self.state.send_modify(|s| {
            match flag {
                Flag::Loading => {
                    let remaining = self.loads_in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
                    s.is_loading = remaining > 0;
                }
                Flag::Creating => {
                    let remaining = self.creates_in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
                    s.is_creating_conversation = remaining > 0;
                }
            }
        });
    }

    fn next_token(seq: &AtomicU64) -> u64 {
        seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replaces the conversation list with the backend's.
    pub async fn load_conversations(&self) {
        let token = Self::next_token(&self.conversations_seq);
        let _loading = self.enter(Flag::Loading);

        let response = match self.api.list_conversations().await {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to load conversations: {}", e);
                return;
            }
        };
        debug!("API Response: code={}, msg={:?}", response.code, response.msg);

        if !response.is_success() {
            warn!("API returned non-success code: {}", response.code);
            return;
        }
        let Some(data) = response.data else {
            warn!("Conversation list response carried no data");
            return;
        };

        let applied = self.state.send_if_modified(|s| {
            if self.conversations_seq.load(Ordering::SeqCst) != token {
                return false;
            }
            s.conversations = data.conversations;
            true
        });
        if applied {
            info!("Conversations loaded: {}", self.state.borrow().conversations.len());
        } else {
            warn!("Discarding superseded conversation list response");
        }
    }

    /// Replaces the current messages and memory id in a single update.
    ///
    /// Messages are kept in backend order (newest turn first).
    pub async fn load_messages(&self, memory_id: &str) {
        let token = Self::next_token(&self.messages_seq);
        let _loading = self.enter(Flag::Loading);

        let response = match self.api.get_messages(memory_id).await {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to load messages: {}", e);
                return;
            }
        };

        if !response.is_success() {
            warn!("API returned non-success code {} for messages of '{}'", response.code, memory_id);
            return;
        }
        let Some(data) = response.data else {
            warn!("Message list response for '{}' carried no data", memory_id);
            return;
        };

        let count = data.messages.len();
        let applied = self.state.send_if_modified(|s| {
            if self.messages_seq.load(Ordering::SeqCst) != token {
                return false;
            }
            s.current_messages = data.messages;
            s.current_memory_id = memory_id.to_string();
            true
        });
        if applied {
            info!("Loaded {} messages for '{}'", count, memory_id);
        } else {
            warn!("Discarding superseded message list response for '{}'", memory_id);
        }
    }

    /// Creates a conversation, makes it current and refreshes the list.
    pub async fn create_conversation(&self) -> Option<String> {
        let _creating = self.enter(Flag::Creating);

        let response = match self.api.create_conversation().await {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to create conversation: {}", e);
                return None;
            }
        };

        if !response.is_success() {
            warn!("API returned non-success code: {}", response.code);
            return None;
        }
        let Some(data) = response.data else {
            warn!("Create conversation response carried no data");
            return None;
        };

        // a message load still in flight belongs to the previous conversation
        Self::next_token(&self.messages_seq);
        self.state.send_modify(|s| {
            s.current_memory_id = data.memory_id.clone();
            s.current_messages.clear();
        });
        info!("Created conversation '{}'", data.memory_id);

        self.load_conversations().await;
        Some(data.memory_id)
    }

    /// Asks the backend for a title from the first message, then refreshes
    /// the list so the stored title shows up.
    pub async fn generate_title(&self, memory_id: &str, first_message: &str) -> Option<String> {
        let response = match self.api.generate_title(memory_id, first_message).await {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to generate title for '{}': {}", memory_id, e);
                return None;
            }
        };

        if !response.is_success() {
            warn!("API returned non-success code: {}", response.code);
            return None;
        }
        let title = response.data
            .as_ref()
            .and_then(|d| d.title())
            .map(str::to_string);

        self.load_conversations().await;
        title
    }

    /// Also invalidates message loads still in flight for another conversation.
    pub fn set_current_memory_id(&self, memory_id: &str) {
        Self::next_token(&self.messages_seq);
        self.state.send_modify(|s| {
            s.current_memory_id = memory_id.to_string();
        });
    }

    pub fn clear_current_conversation(&self) {
        Self::next_token(&self.messages_seq);
        self.state.send_modify(|s| {
            s.current_memory_id.clear();
            s.current_messages.clear();
        });
    }

    /// Appends to the end of the current list; no ordering, no dedup.
    pub fn add_message(&self, message: Message) {
        self.state.send_modify(|s| s.current_messages.push(message));
    }
}
