//! mia: terminal chat client.
//!
//! Drives the chat store end to end: replies stream to stdout, logs go to
//! stderr.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use mia_chats::{Character, ChatStore, SettingsStore, StoreError};
use mia_core::{ChatId, MessageId, MiaConfig};
use mia_stream::{ChatCompletionMessage, ChatCompletionRequest, Role, SessionEnd};

mod printer;

use printer::DeltaPrinter;

#[derive(Parser)]
#[command(name = "mia")]
#[command(version)]
#[command(about = "Chat with an OpenAI-compatible model from the terminal")]
struct Args {
    /// Config file (default: $MIA_CONFIG, then ~/.mia/mia.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Profile to use instead of the configured one
    #[arg(short, long, global = true)]
    profile: Option<String>,

    /// Model to use instead of the configured one
    #[arg(short, long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one message and print the reply
    Chat {
        message: String,
        /// Wait for the whole reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },

    /// Interactive chat; /regen redoes the last reply, /quit exits
    Repl,

    /// Check whether the profile's API key is accepted
    CheckKey,

    /// List configured profiles
    Profiles,
}

/// One streamed exchange in a chat.
enum Turn {
    Send(String),
    Regenerate(MessageId),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // warn by default; stdout is reserved for replies
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let config_path = args.config.clone().or_else(|| std::env::var("MIA_CONFIG").ok());
    let mut config = MiaConfig::load(config_path.as_deref()).context("loading config")?;
    if let Some(model) = &args.model {
        config.client.model.clone_from(model);
    }

    let settings = SettingsStore::from_config(&config);
    if let Some(profile) = &args.profile {
        settings.set_profile(profile)?;
    }

    match args.command {
        Command::Profiles => {
            let used = settings.used_profile()?.name;
            for profile in settings.profiles() {
                let mark = if profile.name == used { "*" } else { " " };
                let desc = profile.desc.as_deref().unwrap_or("");
                println!("{mark} {:<20} {:<45} {desc}", profile.name, profile.endpoint);
            }
        }
        Command::CheckKey => {
            let profile = settings.used_profile()?;
            let valid = settings.build_client()?.check_api_key_valid().await?;
            if valid {
                println!("{}: key accepted", profile.name);
            } else {
                bail!("{}: key rejected", profile.name);
            }
        }
        Command::Chat {
            message,
            no_stream: true,
        } => {
            let client = settings.build_client()?;
            let request = ChatCompletionRequest::new(
                config.client.model.clone(),
                vec![ChatCompletionMessage::new(Role::User, message)],
            );
            let reply = client.create_chat_completions(&request).await?;
            println!("{}", reply.content());
        }
        Command::Chat { message, .. } => {
            let client = Arc::new(settings.build_client()?);
            let store = ChatStore::new(client, config.client.model.clone());
            let chat = store.create_chat(None, Character::mia());
            if !stream_turn(&store, &chat.id, Turn::Send(message)).await? {
                bail!("reply failed");
            }
        }
        Command::Repl => {
            let client = Arc::new(settings.build_client()?);
            let store = ChatStore::new(client, config.client.model.clone());
            repl(&store).await?;
        }
    }

    Ok(())
}

async fn repl(store: &ChatStore) -> anyhow::Result<()> {
    let chat = store.create_chat(None, Character::mia());
    eprintln!("{} ({}) - /regen, /quit, Ctrl-C stops a reply", chat.name, store.model());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            return Ok(());
        };

        let turn = match line.trim() {
            "" => continue,
            "/quit" => return Ok(()),
            "/regen" => match last_reply(store, &chat.id) {
                Some(id) => Turn::Regenerate(id),
                None => {
                    eprintln!("nothing to regenerate");
                    continue;
                }
            },
            text => Turn::Send(text.to_string()),
        };
        stream_turn(store, &chat.id, turn).await?;
    }
}

/// Run one turn, printing the reply as it streams. Ctrl-C abandons it.
///
/// Returns whether the reply completed. Store errors other than a failed
/// stream are returned as `Err`.
async fn stream_turn(store: &ChatStore, chat_id: &ChatId, turn: Turn) -> anyhow::Result<bool> {
    let mut printer = DeltaPrinter::new(io::stdout());

    let result = {
        let session = async {
            match &turn {
                Turn::Send(text) => {
                    store
                        .send_new_message_stream(chat_id, text, &mut printer)
                        .await
                }
                Turn::Regenerate(id) => {
                    store
                        .regenerate_message_stream(chat_id, id, &mut printer)
                        .await
                }
            }
        };
        tokio::pin!(session);

        loop {
            tokio::select! {
                result = &mut session => break result,
                _ = tokio::signal::ctrl_c() => cancel_reply(store, chat_id),
            }
        }
    };
    printer.finish()?;

    match result {
        Ok(report) => match report.end {
            SessionEnd::Completed => {
                println!();
                Ok(true)
            }
            SessionEnd::Abandoned => {
                println!();
                eprintln!("[stopped]");
                Ok(false)
            }
            SessionEnd::Failed(e) => {
                println!();
                eprintln!("error: {e}");
                Ok(false)
            }
        },
        Err(StoreError::Stream(e)) => {
            println!();
            eprintln!("error: {e}");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Cancel whichever reply in the chat is still being written.
fn cancel_reply(store: &ChatStore, chat_id: &ChatId) {
    let Some(chat) = store.get_chat(chat_id) else {
        return;
    };
    for message in chat.messages.iter().rev() {
        if store.cancel(&message.id) {
            return;
        }
    }
}

/// Most recent assistant reply that can be regenerated.
fn last_reply(store: &ChatStore, chat_id: &ChatId) -> Option<MessageId> {
    store
        .get_chat(chat_id)?
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant && m.deleted_at.is_none() && m.hidden_at.is_none())
        .map(|m| m.id.clone())
}
