use async_trait::async_trait;
use futures::StreamExt;
use memchat::api::stream::ChatStream;
use memchat::api::ChatApi;
use memchat::config::ClientConfig;
use memchat::error::ApiResult;
use memchat::models::chat::{
    ChatReq,
    ConversationsRes,
    CreateNewConversationRes,
    Envelope,
    GenerateTitleRes,
    Message,
    MessagesRes,
};
use memchat::store::ChatStore;
use serde_json::{ json, Value };
use std::collections::HashMap;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };
use tokio::sync::oneshot;
use wiremock::matchers::{ method, path, query_param };
use wiremock::{ Mock, MockServer, ResponseTemplate };

const LIST_PATH: &str = "/api/conversation/getConversationsByIp";
const CREATE_PATH: &str = "/api/conversation/createNew";
const MESSAGES_PATH: &str = "/api/message/getMessagesById";
const TITLE_PATH: &str = "/api/conversation/generateTitle";

fn store_for(server: &MockServer) -> ChatStore {
    ChatStore::from_config(&ClientConfig::new(&server.uri()).unwrap()).unwrap()
}

fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "code": 1, "msg": "success", "data": data }))
}

fn rejected() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "msg": "failed", "data": null }))
}

fn conversations_json() -> Value {
    json!({
        "conversations": [
            { "id": "3", "memoryId": "m3", "userIp": "10.0.0.9", "lastSendTime": "2025-02-01T09:00:00" },
            { "id": "1", "memoryId": "m1", "userIp": "10.0.0.9" },
            { "id": "2", "memoryId": "m2", "userIp": "10.0.0.9" }
        ],
        "totalCount": 3
    })
}

fn message_json(memory_id: &str, turn: i64, kind: &str, text: &str) -> Value {
    let (prompt, completion) = if kind == "USER" { (text, "") } else { ("", text) };
    json!({
        "id": format!("{}-{}", memory_id, turn),
        "memoryId": memory_id,
        "turnIndex": turn,
        "messageType": kind,
        "content": { "prompt": prompt, "completion": completion },
        "sendTime": "2025-02-01T09:00:00",
        "model": { "name": "qwen", "tokensInput": 5, "tokensOutput": 9 }
    })
}

async fn mount_list(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .respond_with(ok(conversations_json()))
        .expect(expected_calls)
        .mount(server).await;
}

#[tokio::test]
async fn load_conversations_replaces_list_in_order() {
    let server = MockServer::start().await;
    mount_list(&server, 1).await;

    let store = store_for(&server);
    store.load_conversations().await;

    let state = store.snapshot();
    let ids: Vec<&str> = state.conversations
        .iter()
        .map(|c| c.memory_id.as_str())
        .collect();
    assert_eq!(ids, vec!["m3", "m1", "m2"]);
    assert!(state.has_conversations());
    assert!(!state.is_loading);
}

#[tokio::test]
async fn load_conversations_twice_is_idempotent() {
    let server = MockServer::start().await;
    mount_list(&server, 3).await;

    let once = store_for(&server);
    once.load_conversations().await;

    let twice = store_for(&server);
    twice.load_conversations().await;
    twice.load_conversations().await;

    assert_eq!(once.snapshot(), twice.snapshot());
}

#[tokio::test]
async fn load_messages_sets_messages_and_memory_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MESSAGES_PATH))
        .and(query_param("memoryId", "m1"))
        .respond_with(
            ok(
                json!({
            "memoryId": "m1",
            "messages": [
                message_json("m1", 1, "AI", "hi, how can I help?"),
                message_json("m1", 0, "USER", "hello")
            ],
            "totalCount": 2
        })
            )
        )
        .expect(1)
        .mount(&server).await;

    let store = store_for(&server);
    store.load_messages("m1").await;

    let state = store.snapshot();
    assert_eq!(state.current_memory_id, "m1");
    let turns: Vec<i64> = state.current_messages
        .iter()
        .map(|m| m.turn_index)
        .collect();
    assert_eq!(turns, vec![1, 0]);
    assert_eq!(state.current_messages[0].display_text(), "hi, how can I help?");
    assert!(!state.is_loading);
}

#[tokio::test]
async fn create_conversation_resets_messages_and_reloads_list_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CREATE_PATH))
        .respond_with(ok(json!({ "memoryId": "m3", "message": "created" })))
        .expect(1)
        .mount(&server).await;
    mount_list(&server, 1).await;

    let store = store_for(&server);
    store.set_current_memory_id("old");
    store.add_message(Message::local_user("old", 0, "left over"));

    let created = store.create_conversation().await;

    assert_eq!(created.as_deref(), Some("m3"));
    let state = store.snapshot();
    assert_eq!(state.current_memory_id, "m3");
    assert!(state.current_messages.is_empty());
    assert_eq!(state.conversations.len(), 3);
    assert_eq!(state.current_conversation().map(|c| c.id.as_str()), Some("3"));
    assert!(!state.is_creating_conversation);
}

#[tokio::test]
async fn rejected_envelopes_leave_state_untouched() {
    let server = MockServer::start().await;
    for p in [LIST_PATH, MESSAGES_PATH] {
        Mock::given(method("GET")).and(path(p)).respond_with(rejected()).mount(&server).await;
    }
    for p in [CREATE_PATH, TITLE_PATH] {
        Mock::given(method("POST")).and(path(p)).respond_with(rejected()).mount(&server).await;
    }

    let store = store_for(&server);
    store.set_current_memory_id("keep");
    store.add_message(Message::local_user("keep", 0, "still here"));
    let before = store.snapshot();

    store.load_conversations().await;
    store.load_messages("other").await;
    assert_eq!(store.create_conversation().await, None);
    assert_eq!(store.generate_title("keep", "still here").await, None);

    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn transport_errors_are_logged_not_raised() {
    let store = ChatStore::from_config(&ClientConfig::new("http://127.0.0.1:1").unwrap()).unwrap();
    let before = store.snapshot();

    store.load_conversations().await;
    store.load_messages("m1").await;
    assert_eq!(store.create_conversation().await, None);

    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn generate_title_refreshes_conversations() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TITLE_PATH))
        .respond_with(ok(json!({ "title": "Greetings" })))
        .expect(1)
        .mount(&server).await;
    mount_list(&server, 1).await;

    let store = store_for(&server);
    assert_eq!(store.generate_title("m1", "hello").await.as_deref(), Some("Greetings"));
    assert_eq!(store.snapshot().conversations.len(), 3);
}

#[tokio::test]
async fn local_mutations_need_no_backend() {
    let store = ChatStore::from_config(&ClientConfig::default()).unwrap();

    store.set_current_memory_id("m1");
    store.add_message(Message::local_user("m1", 0, "first"));
    store.add_message(Message::local_user("m1", 0, "duplicate turn is kept"));
    let state = store.snapshot();
    assert_eq!(state.current_memory_id, "m1");
    assert_eq!(state.current_messages.len(), 2);
    assert_eq!(state.current_messages[1].display_text(), "duplicate turn is kept");

    store.clear_current_conversation();
    let state = store.snapshot();
    assert_eq!(state.current_memory_id, "");
    assert!(state.current_messages.is_empty());
}

#[tokio::test]
async fn changes_stream_sees_loaded_list() {
    let server = MockServer::start().await;
    mount_list(&server, 1).await;

    let store = store_for(&server);
    let mut changes = store.changes();
    let initial = changes.next().await.unwrap();
    assert!(!initial.has_conversations());

    store.load_conversations().await;
    let latest = changes.next().await.unwrap();
    assert_eq!(latest.conversations.len(), 3);
    assert!(!latest.is_loading);
}

/// Holds every `get_messages` call until the test releases it.
#[derive(Default)]
struct ScriptedApi {
    pending: Mutex<HashMap<String, oneshot::Receiver<Envelope<MessagesRes>>>>,
    pending_create: Mutex<Option<oneshot::Receiver<Envelope<CreateNewConversationRes>>>>,
    started: AtomicUsize,
}

impl ScriptedApi {
    fn hold(&self, memory_id: &str) -> oneshot::Sender<Envelope<MessagesRes>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(memory_id.to_string(), rx);
        tx
    }

    fn hold_create(&self) -> oneshot::Sender<Envelope<CreateNewConversationRes>> {
        let (tx, rx) = oneshot::channel();
        *self.pending_create.lock().unwrap() = Some(rx);
        tx
    }
}

#[async_trait]
impl ChatApi for ScriptedApi {
    async fn list_conversations(&self) -> ApiResult<Envelope<ConversationsRes>> {
        Ok(Envelope {
            code: 0,
            data: None,
            msg: Some("not scripted".to_string()),
        })
    }

    async fn create_conversation(&self) -> ApiResult<Envelope<CreateNewConversationRes>> {
        let rx = self.pending_create.lock().unwrap().take().expect("no scripted create");
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(rx.await.expect("script dropped"))
    }

    async fn generate_title(&self, _: &str, _: &str) -> ApiResult<Envelope<GenerateTitleRes>> {
        unimplemented!()
    }

    async fn get_messages(&self, memory_id: &str) -> ApiResult<Envelope<MessagesRes>> {
        let rx = self.pending.lock().unwrap().remove(memory_id).expect("no scripted response");
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(rx.await.expect("script dropped"))
    }

    async fn send_chat_message(&self, _: &ChatReq) -> ApiResult<ChatStream> {
        unimplemented!()
    }
}

fn messages_envelope(memory_id: &str) -> Envelope<MessagesRes> {
    let messages = vec![serde_json::from_value(message_json(memory_id, 0, "USER", memory_id)).unwrap()];
    Envelope {
        code: 1,
        data: Some(MessagesRes {
            memory_id: memory_id.to_string(),
            messages,
            total_count: 1,
        }),
        msg: Some("success".to_string()),
    }
}

#[tokio::test]
async fn superseded_message_load_is_discarded() {
    let api = Arc::new(ScriptedApi::default());
    let release_a = api.hold("a");
    let release_b = api.hold("b");
    let store = Arc::new(ChatStore::new(api.clone()));

    let first = tokio::spawn({
        let store = Arc::clone(&store);
        async move { store.load_messages("a").await }
    });
    while api.started.load(Ordering::SeqCst) < 1 {
        tokio::task::yield_now().await;
    }
    let second = tokio::spawn({
        let store = Arc::clone(&store);
        async move { store.load_messages("b").await }
    });
    while api.started.load(Ordering::SeqCst) < 2 {
        tokio::task::yield_now().await;
    }
    assert!(store.snapshot().is_loading);

    // the newer call resolves first, the older one afterwards
    release_b.send(messages_envelope("b")).unwrap();
    second.await.unwrap();
    assert_eq!(store.snapshot().current_memory_id, "b");
    assert!(store.snapshot().is_loading);

    release_a.send(messages_envelope("a")).unwrap();
    first.await.unwrap();

    let state = store.snapshot();
    assert_eq!(state.current_memory_id, "b");
    assert_eq!(state.current_messages[0].display_text(), "b");
    assert!(!state.is_loading);
}

#[tokio::test]
async fn selecting_another_conversation_discards_pending_load() {
    let api = Arc::new(ScriptedApi::default());
    let release_a = api.hold("a");
    let store = Arc::new(ChatStore::new(api.clone()));

    let load = tokio::spawn({
        let store = Arc::clone(&store);
        async move { store.load_messages("a").await }
    });
    while api.started.load(Ordering::SeqCst) < 1 {
        tokio::task::yield_now().await;
    }

    store.set_current_memory_id("b");
    release_a.send(messages_envelope("a")).unwrap();
    load.await.unwrap();

    let state = store.snapshot();
    assert_eq!(state.current_memory_id, "b");
    assert!(state.current_messages.is_empty());
    assert!(!state.is_loading);
}

#[tokio::test]
async fn creating_flag_is_set_while_create_is_in_flight() {
    let api = Arc::new(ScriptedApi::default());
    let release = api.hold_create();
    let store = Arc::new(ChatStore::new(api.clone()));
    assert!(!store.snapshot().is_creating_conversation);

    let create = tokio::spawn({
        let store = Arc::clone(&store);
        async move { store.create_conversation().await }
    });
    while api.started.load(Ordering::SeqCst) < 1 {
        tokio::task::yield_now().await;
    }
    assert!(store.snapshot().is_creating_conversation);

    release
        .send(Envelope {
            code: 1,
            data: Some(CreateNewConversationRes {
                memory_id: "fresh".to_string(),
                message: "created".to_string(),
            }),
            msg: None,
        })
        .unwrap();
    assert_eq!(create.await.unwrap().as_deref(), Some("fresh"));

    let state = store.snapshot();
    assert_eq!(state.current_memory_id, "fresh");
    assert!(!state.is_creating_conversation);
    assert!(!state.is_loading);
}
