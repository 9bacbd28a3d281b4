use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use chatroom::api::{ChatApi, HttpChatApi};
use chatroom::config::Config;
use chatroom::models::Role;
use chatroom::services::{
    spawn_cache_writer, ChatState, ChatStore, ConversationCache, Database, RoomService,
    SendCoordinator, SendOutcome, SessionService, SessionStatus,
};

const HELP: &str = "\
/list             show conversations
/open <id>        open a conversation
/new              start a new conversation
/rename <title>   rename the open conversation
/delete <id>      delete a conversation
/search <text>    filter conversations by title
/stop             stop the current answer
/logout           end the session
/quit             exit
anything else is sent as a message";

struct App {
    store: ChatStore,
    cache: ConversationCache,
    rooms: RoomService,
    sender: Arc<SendCoordinator>,
    session: SessionService,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;

    let db = match Database::open(&config.db_path()) {
        Ok(db) => db,
        Err(e) => {
            tracing::warn!("Falling back to an in-memory cache: {:#}", e);
            Database::new_in_memory()?
        }
    };
    let cache = ConversationCache::new(db);
    let store = ChatStore::new(ChatState::from_cache(cache.load().await));
    let _writer = spawn_cache_writer(&store, cache.clone());

    let api: Arc<dyn ChatApi> =
        Arc::new(HttpChatApi::new(&config).context("Failed to build HTTP client")?);

    let app = App {
        rooms: RoomService::new(api.clone(), store.clone()),
        sender: Arc::new(SendCoordinator::new(api.clone(), store.clone())),
        session: SessionService::new(api, config.login_url.clone()),
        store,
        cache,
    };

    if let SessionStatus::LoginRequired { login_url } = app.session.probe().await {
        println!("Not signed in. Log in at {} and set CHATROOM_SESSION_COOKIE.", login_url);
    }
    if let Err(e) = app.rooms.load_chat_rooms().await {
        if e.is_unauthorized() {
            println!("Session expired. Log in at {}", app.session.login_url());
        } else {
            println!("Offline, showing cached conversations ({})", e);
        }
    }
    print_list(&app.store.snapshot());
    println!("Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !app.handle(line.trim()).await {
            break;
        }
    }
    Ok(())
}

impl App {
    /// Returns false once the user asked to quit.
    async fn handle(&self, line: &str) -> bool {
        let (command, arg) = match line.split_once(' ') {
            Some((command, arg)) => (command, arg.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "/quit" => return false,
            "/help" => println!("{}", HELP),
            "/list" => print_list(&self.store.snapshot()),
            "/open" => match self.rooms.select_chat(arg).await {
                Ok(_) => print_conversation(&self.store.snapshot()),
                Err(e) if e.is_unauthorized() => {
                    println!("Session expired. Log in at {}", self.session.login_url())
                }
                Err(e) => println!("Could not open {}: {}", arg, e),
            },
            "/new" => {
                self.rooms.new_chat();
                println!("New conversation. Type a message to start.");
            }
            "/rename" => {
                let active = self.store.read(|s| s.route.chat_id().map(str::to_string));
                match active {
                    Some(id) if self.rooms.rename(&id, arg) => println!("Renamed to {}", arg),
                    _ => println!("Nothing to rename."),
                }
            }
            "/delete" => {
                if !self.rooms.delete_chat(arg) {
                    println!("No conversation {}", arg);
                }
            }
            "/search" => {
                let state = self.store.snapshot();
                for conv in state.search(arg) {
                    println!("  {}  {}", conv.id, conv.title);
                }
            }
            "/stop" => {
                if !self.sender.stop() {
                    println!("Nothing to stop.");
                }
            }
            "/logout" => {
                if let Err(e) = self.session.logout().await {
                    println!("Logout failed: {}", e);
                } else {
                    if let Err(e) = self.cache.clear().await {
                        tracing::warn!("Failed to clear cache: {}", e);
                    }
                    println!("Logged out. Log in again at {}", self.session.login_url());
                }
            }
            _ => {
                let sender = self.sender.clone();
                let store = self.store.clone();
                let text = line.to_string();
                tokio::spawn(async move { send_and_render(&sender, &store, &text).await });
            }
        }
        true
    }
}

/// Send `text` and echo the reply as it streams in.
async fn send_and_render(sender: &SendCoordinator, store: &ChatStore, text: &str) {
    let mut rx = store.subscribe();
    let send = sender.send(text);
    tokio::pin!(send);

    let mut printer = ReplyPrinter::default();
    let outcome = loop {
        tokio::select! {
            biased;
            outcome = &mut send => break outcome,
            Ok(()) = rx.changed() => {
                if !printer.announced && sender.is_thinking() {
                    print!("... ");
                    printer.announced = true;
                }
                printer.print(&rx.borrow_and_update());
            }
        }
    };
    printer.print(&store.snapshot());
    if printer.message_id.is_some() {
        println!();
    }

    match outcome {
        SendOutcome::Busy => println!("Still answering, use /stop first."),
        SendOutcome::Failed { error, .. } => tracing::debug!("Send failed: {}", error),
        SendOutcome::Empty | SendOutcome::Completed { .. } => {}
    }
}

#[derive(Default)]
struct ReplyPrinter {
    message_id: Option<String>,
    printed: usize,
    announced: bool,
}

impl ReplyPrinter {
    fn print(&mut self, state: &ChatState) {
        let message = match &self.message_id {
            Some(id) => state
                .conversations
                .iter()
                .flat_map(|c| c.messages.iter())
                .find(|m| &m.id == id),
            None => state
                .active_conversation()
                .and_then(|c| c.messages.last())
                .filter(|m| m.role == Role::Assistant),
        };
        let Some(message) = message else {
            return;
        };
        if self.message_id.is_none() {
            self.message_id = Some(message.id.clone());
            self.printed = 0;
        }
        if let Some(fresh) = message.content.get(self.printed..) {
            print!("{}", fresh);
            if let Err(e) = std::io::stdout().flush() {
                tracing::debug!("Failed to flush stdout: {}", e);
            }
            self.printed = message.content.len();
        }
    }
}

fn print_list(state: &ChatState) {
    let active = state.active_id.as_deref();
    for conv in &state.conversations {
        let marker = if Some(conv.id.as_str()) == active { '>' } else { ' ' };
        let star = if conv.is_favorited { "*" } else { "" };
        println!("{} {}  {}{}", marker, conv.id, conv.title, star);
    }
}

fn print_conversation(state: &ChatState) {
    let Some(conv) = state.active_conversation() else {
        return;
    };
    println!("== {} ==", conv.title);
    for message in &conv.messages {
        println!("[{}] {}", message.role.as_str(), message.content);
    }
}
