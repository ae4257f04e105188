mod logging;
mod render;

use std::io::{Read, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use coral_core::errors::{classify, find_chat_error, ChatError, ErrorKind, FinishReason};
use coral_core::llm::{ChatClient as _, ChatRequest, ChatResponse, StreamEvent};
use coral_providers::coral::{config::CoralConfig, CoralClient};
use futures::StreamExt;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "coral")]
#[command(about = "Stream one chat answer from a Coral backend and print it with its citations")]
struct Cli {
    /// Message to send; read from stdin when omitted
    message: Vec<String>,

    /// Continue an existing conversation
    #[arg(long)]
    conversation_id: Option<String>,

    /// Model override
    #[arg(long)]
    model: Option<String>,

    /// Print the answer with raw :cite directives
    #[arg(long)]
    directives: bool,

    /// Reject overlapping or out-of-range citations instead of splicing them
    #[arg(long)]
    strict: bool,

    /// Print text as it streams; sources follow at the end
    #[arg(long)]
    live: bool,

    /// Wrap width for plain output
    #[arg(long, default_value = "100")]
    width: usize,
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let message = if cli.message.is_empty() {
        let mut s = String::new();
        std::io::stdin()
            .read_to_string(&mut s)
            .context("read message from stdin")?;
        s
    } else {
        cli.message.join(" ")
    };
    if message.trim().is_empty() {
        anyhow::bail!("empty message");
    }

    let cfg = CoralConfig::from_env_and_file().context("load config")?;
    let client = CoralClient::new(cfg).context("build http client")?;
    let mut req = ChatRequest::new(message.trim());
    req.conversation_id = cli.conversation_id.clone();
    if cli.model.is_some() {
        req.model = cli.model.clone();
    }
    info!(
        target: "cli",
        "submit: input_len={} conversation={:?}",
        req.message.len(),
        req.conversation_id
    );

    let mut stream = client.stream_chat(req).await?;
    let mut resp = ChatResponse::default();
    let mut failure: Option<ChatError> = None;
    let stdout = std::io::stdout();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            item = stream.next() => {
                match item {
                    Some(Ok(ev)) => {
                        if cli.live && !cli.directives {
                            if let StreamEvent::TextGeneration(t) = &ev {
                                let mut out = stdout.lock();
                                let _ = out.write_all(t.as_bytes());
                                let _ = out.flush();
                            }
                        }
                        resp.apply(&ev);
                    }
                    Some(Err(e)) => { failure = Some(e); break; }
                    None => break,
                }
            }
            _ = &mut ctrl_c => {
                failure = Some(ChatError::FinishStream {
                    reason: FinishReason::UserCancel,
                    detail: None,
                });
                break;
            }
        }
    }

    match failure {
        None => {
            print_answer(&cli, &resp);
            Ok(())
        }
        // Token-limit endings still carry a usable answer.
        Some(e @ ChatError::FinishStream { reason: FinishReason::MaxTokens, .. }) => {
            print_answer(&cli, &resp);
            eprintln!("note: {}", e.user_message());
            Ok(())
        }
        Some(e) => {
            if !resp.text.is_empty() && !cli.live {
                print_answer(&cli, &resp);
            }
            Err(e.into())
        }
    }
}

fn print_answer(cli: &Cli, resp: &ChatResponse) {
    if cli.directives {
        println!("{}", render::spliced(resp, cli.strict));
    } else if cli.live {
        println!();
        let src = render::sources(resp);
        if !src.is_empty() {
            println!("\n{}", src.join("\n"));
        }
    } else {
        println!("{}", render::plain(resp, cli.strict, cli.width));
    }
}

fn report(e: &anyhow::Error) {
    let root: &(dyn std::error::Error + 'static) = e.as_ref();
    let kind = classify(root);
    match find_chat_error(root) {
        Some(ChatError::FinishStream {
            reason: FinishReason::UserCancel,
            ..
        }) => {
            info!(target: "cli", "canceled by user");
            eprintln!("canceled");
        }
        Some(chat) => {
            if chat.is_finished_with_unexpected_error() {
                error!(target: "cli", "generation failed: {}", chat);
            } else {
                warn!(target: "cli", "{:?} error: {}", kind, chat);
            }
            eprintln!("error: {}", chat.user_message());
        }
        None => {
            debug_assert_eq!(kind, ErrorKind::Unknown);
            error!(target: "cli", "{:#}", e);
            eprintln!("error: {:#}", e);
        }
    }
}
