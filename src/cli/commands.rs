use futures::StreamExt;
use log::{ info, warn };
use std::error::Error;
use tokio::io::{ AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader };

use crate::api::ChatApi;
use crate::cli::Command;
use crate::models::chat::{ ChatReq, Message };
use crate::store::ChatStore;

type CommandResult<T = ()> = Result<T, Box<dyn Error + Send + Sync>>;

pub async fn execute(store: &ChatStore, command: Command) -> CommandResult {
    match command {
        Command::List => list(store).await,
        Command::New => {
            let memory_id = store
                .create_conversation().await
                .ok_or("Failed to create conversation")?;
            println!("{}", memory_id);
            Ok(())
        }
        Command::Messages { memory_id } => messages(store, &memory_id).await,
        Command::Title { memory_id, message } => {
            let title = store
                .generate_title(&memory_id, &message).await
                .ok_or("Failed to generate title")?;
            println!("{}", title);
            Ok(())
        }
        Command::Send { memory_id, message } => {
            let req = ChatReq { memory_id, message };
            let mut stdout = tokio::io::stdout();
            let (resolved, _) = stream_reply(store.api().as_ref(), &req, &mut stdout).await?;
            eprintln!("memory id: {}", resolved);
            Ok(())
        }
        Command::Chat { memory_id } => chat(store, memory_id).await,
    }
}

async fn list(store: &ChatStore) -> CommandResult {
    store.load_conversations().await;
    let state = store.snapshot();
    if !state.has_conversations() {
        println!("No conversations.");
        return Ok(());
    }
    for conv in &state.conversations {
        let last = conv.last_send_time.as_deref().or(conv.created_time.as_deref()).unwrap_or("-");
        println!("{}\t{}\t{}", conv.memory_id, last, conv.user_ip);
    }
    Ok(())
}

async fn messages(store: &ChatStore, memory_id: &str) -> CommandResult {
    store.load_messages(memory_id).await;
    let state = store.snapshot();
    if state.current_memory_id != memory_id {
        return Err(format!("Failed to load messages for '{}'", memory_id).into());
    }
    print_history(&state.current_messages);
    Ok(())
}

/// Backend order is newest turn first; a terminal reads top to bottom.
fn print_history(messages: &[Message]) {
    for msg in messages.iter().rev() {
        println!("[{}] {:?}: {}", msg.turn_index, msg.message_type, msg.display_text());
    }
}

/// Sends `req` and copies the decoded reply into `out` as it arrives.
///
/// Returns the resolved memory id and the full reply text.
pub async fn stream_reply<W>(api: &dyn ChatApi, req: &ChatReq, out: &mut W) -> CommandResult<(String, String)>
    where W: AsyncWrite + Unpin
{
    let chat = api.send_chat_message(req).await?;
    let memory_id = chat.memory_id.clone();
    let mut text = chat.into_text();
    let mut reply = String::new();

    while let Some(chunk) = text.next().await {
        let chunk = chunk?;
        out.write_all(chunk.as_bytes()).await?;
        out.flush().await?;
        reply.push_str(&chunk);
    }
    out.write_all(b"\n").await?;
    out.flush().await?;

    Ok((memory_id, reply))
}

async fn chat(store: &ChatStore, memory_id: Option<String>) -> CommandResult {
    let mut memory_id = match memory_id {
        Some(id) => {
            store.load_messages(&id).await;
            store.set_current_memory_id(&id);
            print_history(&store.snapshot().current_messages);
            id
        }
        None => store.create_conversation().await.ok_or("Failed to create conversation")?,
    };
    let mut needs_title = store.snapshot().current_messages.is_empty();
    info!("Chatting in conversation '{}'", memory_id);
    eprintln!("conversation {} (/new starts another, /quit exits)", memory_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                match store.create_conversation().await {
                    Some(id) => {
                        memory_id = id;
                        needs_title = true;
                        eprintln!("conversation {}", memory_id);
                    }
                    None => eprintln!("could not create a conversation"),
                }
                continue;
            }
            _ => {}
        }

        let turn = store.snapshot().next_turn_index();
        store.add_message(Message::local_user(&memory_id, turn, line));

        let req = ChatReq {
            memory_id: memory_id.clone(),
            message: line.to_string(),
        };
        match stream_reply(store.api().as_ref(), &req, &mut stdout).await {
            Ok((resolved, reply)) => {
                if resolved != memory_id {
                    info!("Backend moved conversation '{}' to '{}'", memory_id, resolved);
                    memory_id = resolved;
                    store.set_current_memory_id(&memory_id);
                }
                store.add_message(Message::local_ai(&memory_id, turn + 1, &reply));
            }
            Err(e) => {
                warn!("Reply failed: {}", e);
                eprintln!("error: {}", e);
                continue;
            }
        }

        if needs_title {
            needs_title = false;
            if let Some(title) = store.generate_title(&memory_id, line).await {
                eprintln!("title: {}", title);
            }
        }
    }

    Ok(())
}
