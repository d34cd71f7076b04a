//! Replays a proof script against a real prover.
//!
//! Run with: `cargo run -p coqide-replay -- [config.json] [prover args...] < script.v`
//!
//! Each input line is one command. Lines starting with `:` are directives:
//! `:undo [n]`, `:query <text>`, `:goals`, `:status`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use coqide_core::{Response, SessionConfig, Value};
use coqide_session::Coqtop;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config = match args.first() {
        Some(first) if Path::new(first).extension().is_some_and(|e| e == "json") => {
            let path = args.remove(0);
            let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?
        }
        _ => SessionConfig::default(),
    };

    let mut coqtop = Coqtop::from_config(config);
    coqtop.try_launch(&args).await.context("launching prover")?;

    let mut feedback = coqtop.feedback().messages_stream();
    tokio::spawn(async move {
        while let Some(message) = feedback.next().await {
            tracing::debug!(level = ?message.level, "{}", message.text);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match line.strip_prefix(':') {
            Some(directive) => run_directive(&mut coqtop, directive).await?,
            None => coqtop.advance(line).await?,
        };
        report(line, &response);
    }

    println!("depth {}", coqtop.history_depth());
    coqtop.shutdown().await;
    Ok(())
}

async fn run_directive(
    coqtop: &mut Coqtop<coqide_protocol::CoqtopLauncher>,
    directive: &str,
) -> Result<Response> {
    let (name, rest) = directive.split_once(' ').unwrap_or((directive, ""));
    let response = match name {
        "undo" => {
            let steps = if rest.is_empty() { 1 } else { rest.trim().parse()? };
            coqtop.rewind(steps).await?
        }
        "query" => coqtop.query(rest).await?,
        "goals" => coqtop.goals().await?,
        "status" => coqtop.status(false).await?,
        other => bail!("unknown directive :{other}"),
    };
    Ok(response)
}

fn report(line: &str, response: &Response) {
    match response {
        Response::Success { value, messages } => {
            println!("ok   {line}");
            if let Some(messages) = messages {
                println!("{messages}");
            }
            if let Some(goals) = value.as_goals() {
                for goal in &goals.foreground {
                    println!("{}\n", goal.render());
                }
            }
            if let Value::Status(status) = value {
                println!("proof {:?} in {}", status.proof_name, status.path.join("."));
            }
        }
        Response::Failure(failure) => {
            println!("FAIL {line}");
            println!("{failure}");
        }
    }
}
