//! Terminal chat client for a chatline endpoint.

mod render;

use std::io::Write as _;

use anyhow::Result;
use chatline_protocol::{ChatClient, ConversationStore, SessionEvent, StreamFailure};
use clap::Parser;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::render::Renderer;

#[derive(Parser, Debug)]
#[command(name = "chatline")]
#[command(about = "Chat with a streaming chat endpoint from the terminal")]
#[command(version)]
struct Args {
    /// Chat endpoint URL
    #[arg(short, long, default_value = "http://127.0.0.1:8000/api/chat")]
    endpoint: String,

    /// Send one message and exit
    #[arg(short, long)]
    message: Option<String>,

    /// Print the session snapshot after every record
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let client = ChatClient::new(args.endpoint.clone())?;
    let mut store = ConversationStore::new();

    if let Some(message) = args.message {
        return turn(&client, &mut store, message, args.debug).await;
    }

    eprintln!("chatting with {} (empty line or Ctrl-D to quit)", client.endpoint());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            break;
        }
        if let Err(e) = turn(&client, &mut store, line, args.debug).await {
            eprintln!("[request failed] {e}");
        }
    }
    Ok(())
}

/// Sends one user message and prints the reply as it streams in.
async fn turn(
    client: &ChatClient,
    store: &mut ConversationStore,
    content: String,
    debug: bool,
) -> Result<()> {
    store.push_user(content);
    let mut session = client.send(&store.request()).await?;
    let mut renderer = Renderer::default();
    let mut stdout = std::io::stdout();

    while let Some(event) = session.next_event().await {
        if debug {
            eprintln!("{}", serde_json::to_string(event.snapshot())?);
        }
        match &event {
            SessionEvent::Updated { snapshot, .. } | SessionEvent::Finished(snapshot) => {
                write!(stdout, "{}", renderer.render(snapshot))?;
                stdout.flush()?;
            }
            SessionEvent::Failed {
                failure: StreamFailure::Remote { message },
                ..
            } => eprintln!("\n[error] {message}"),
            SessionEvent::Failed { failure, .. } => eprintln!("\n[{failure}]"),
        }
    }
    writeln!(stdout)?;

    let outcome = session.finish().await;
    store.absorb(&outcome.snapshot);
    if let Some(reply) = outcome.snapshot.assistant() {
        for file in store.files_for(&reply.id) {
            eprintln!("[file] {} ({} bytes)", file.filename, file.size);
        }
    }
    if let Ok(finish) = &outcome.result {
        info!(
            reason = %finish.finish_reason,
            usage = ?finish.usage,
            messages = store.messages().len(),
            "reply finished"
        );
    }
    Ok(())
}
