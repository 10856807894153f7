//! OpenAgent client CLI
//!
//! Talks to a running gateway: raw calls, one-shot chat turns and an
//! interactive exec approval prompt.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{theme::ColorfulTheme, Select};
use openagent_client::approvals::{
    format_remaining, ApprovalDecision, ExecApprovalCoordinator, ExecApprovalRequest,
};
use openagent_client::chat::{Attachment, ChatCoordinator, ChatHandle, RunPhase, SendOutcome};
use openagent_client::config::{load_config, load_config_with_path, validate_config};
use openagent_client::{logging, Config, GatewayClient, VERSION};
use serde_json::Value;
use tracing::warn;

#[derive(Parser)]
#[command(
    name = "openagent-client",
    author = "OpenAgent Contributors",
    version = VERSION,
    about = "OpenAgent gateway client",
    long_about = None
)]
struct Cli {
    /// Configuration file (json5 or toml)
    #[arg(long, global = true, env = "OPENAGENT_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// Gateway WebSocket URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// Seconds to wait for the gateway connection
    #[arg(long, global = true, default_value_t = 10)]
    connect_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print the gateway's hello payload
    Status,

    /// Call a gateway method and print the response payload
    Call {
        /// Method name, e.g. chat.history
        method: String,
        /// JSON params
        params: Option<String>,
    },

    /// Send one chat message and stream the reply
    Chat {
        /// Message text
        message: String,
        /// Session key (defaults to the configured one)
        #[arg(short, long)]
        session: Option<String>,
        /// Files to attach
        #[arg(short, long)]
        attach: Vec<PathBuf>,
    },

    /// Print the session history
    History {
        /// Session key (defaults to the configured one)
        #[arg(short, long)]
        session: Option<String>,
        /// Maximum number of messages
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Answer exec approval prompts as they arrive
    Approvals,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config_with_path(path)?,
        None => load_config()?,
    };
    if let Some(url) = &cli.url {
        config.gateway.url = url.clone();
    }

    logging::init(&config.log);

    for issue in validate_config(&config).into_result()? {
        warn!(path = %issue.path, "{}", issue.message);
    }

    let client = GatewayClient::connect(config.gateway.clone())?;
    tokio::time::timeout(
        Duration::from_secs(cli.connect_timeout),
        client.wait_until_open(),
    )
    .await
    .with_context(|| format!("Timed out connecting to {}", config.gateway.url))??;

    let outcome = match cli.command {
        Commands::Status => status(&client),
        Commands::Call { method, params } => call(&client, &method, params.as_deref()).await,
        Commands::Chat {
            message,
            session,
            attach,
        } => chat(&client, &config, session, &message, &attach).await,
        Commands::History { session, limit } => history(&client, &config, session, limit).await,
        Commands::Approvals => approvals(&client, &config).await,
    };

    client.shutdown().await;
    outcome
}

fn status(client: &GatewayClient) -> Result<()> {
    println!("{} {}", style("✓").green(), style("Gateway connected").bold());
    if let Some(hello) = client.hello() {
        println!("{}", serde_json::to_string_pretty(&hello)?);
    }
    Ok(())
}

async fn call(client: &GatewayClient, method: &str, params: Option<&str>) -> Result<()> {
    let params = params
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("params must be valid JSON")?;
    let payload = client.call(method, params).await?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn chat_handle(
    client: &GatewayClient,
    config: &Config,
    session: Option<String>,
    limit: Option<u32>,
) -> ChatHandle {
    let mut chat_config = config.chat.clone();
    if let Some(session) = session {
        chat_config.session_key = session;
    }
    if let Some(limit) = limit {
        chat_config.history_limit = limit;
    }
    ChatCoordinator::spawn(client.clone(), &chat_config)
}

async fn chat(
    client: &GatewayClient,
    config: &Config,
    session: Option<String>,
    message: &str,
    attach: &[PathBuf],
) -> Result<()> {
    let handle = chat_handle(client, config, session, None);

    let mut attachments = Vec::with_capacity(attach.len());
    for path in attach {
        attachments.push(
            Attachment::from_path(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        );
    }

    let mut snapshots = handle.watch();
    let run_id = match handle.send(message, attachments).await? {
        SendOutcome::Sent { run_id } => run_id,
        SendOutcome::Aborted => {
            println!("{}", style("Abort requested").yellow());
            return Ok(());
        }
        other => bail!("Message was not sent: {:?}", other),
    };

    let mut printed = String::new();
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        if let Some(stream) = snapshot.stream.as_deref() {
            if let Some(rest) = stream.strip_prefix(printed.as_str()) {
                print!("{}", rest);
                printed = stream.to_string();
            }
        }

        if snapshot.phase == RunPhase::Idle || snapshot.run_id.as_deref() != Some(run_id.as_str()) {
            let reply = snapshot
                .history
                .iter()
                .rev()
                .find(|m| m.role == "assistant")
                .map(|m| m.text())
                .unwrap_or_default();
            if let Some(rest) = reply.strip_prefix(printed.as_str()) {
                print!("{}", rest);
            }
            println!();
            if let Some(error) = snapshot.last_error {
                bail!("Chat run failed: {}", error);
            }
            return Ok(());
        }

        snapshots
            .changed()
            .await
            .context("Chat coordinator stopped")?;
    }
}

async fn history(
    client: &GatewayClient,
    config: &Config,
    session: Option<String>,
    limit: Option<u32>,
) -> Result<()> {
    let handle = chat_handle(client, config, session, limit);
    handle.load_history().await?;

    let snapshot = handle.snapshot();
    if let Some(level) = &snapshot.thinking_level {
        println!("{} {}", style("thinking:").dim(), level);
    }
    for message in &snapshot.history {
        let role = match message.role.as_str() {
            "user" => style(message.role.as_str()).cyan().bold(),
            "assistant" => style(message.role.as_str()).green().bold(),
            _ => style(message.role.as_str()).dim(),
        };
        println!("{}: {}", role, message.text());
    }
    Ok(())
}

async fn approvals(client: &GatewayClient, config: &Config) -> Result<()> {
    let coordinator = ExecApprovalCoordinator::spawn(client.clone(), config.approvals.clone());
    let mut snapshots = coordinator.watch();
    println!("{}", style("Waiting for exec approval requests (Ctrl-C to quit)").dim());

    loop {
        let head = snapshots.borrow_and_update().head.clone();
        let Some(request) = head else {
            tokio::select! {
                changed = snapshots.changed() => changed.context("Approval coordinator stopped")?,
                _ = tokio::signal::ctrl_c() => return Ok(()),
            }
            continue;
        };

        let pending = coordinator.snapshot().pending;
        print_request(&request, pending);

        let choice = tokio::task::spawn_blocking(|| {
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Decision")
                .items(&["Allow once", "Allow always", "Deny", "Quit"])
                .default(0)
                .interact_opt()
        })
        .await??;

        let decision = match choice {
            Some(0) => ApprovalDecision::AllowOnce,
            Some(1) => ApprovalDecision::AllowAlways,
            Some(2) => ApprovalDecision::Deny,
            _ => return Ok(()),
        };

        match coordinator.resolve(decision).await {
            Ok(resolved) => println!("{} {} {}", style("✓").green(), decision, resolved.id),
            Err(err) => {
                let error = coordinator.snapshot().error.unwrap_or_else(|| err.to_string());
                println!("{} {}", style("✗").red(), error);
            }
        }
    }
}

fn print_request(request: &ExecApprovalRequest, pending: usize) {
    let remaining = request.remaining_ms(Utc::now());
    let expiry = if remaining > 0 {
        format!("expires in {}", format_remaining(remaining))
    } else {
        "expired".to_string()
    };

    println!();
    println!("{} {}", style("Exec approval needed").yellow().bold(), style(expiry).dim());
    if pending > 1 {
        println!("{}", style(format!("{} pending", pending)).dim());
    }
    println!("  {}", style(&request.command).bold());
    let rows = [
        ("Host", &request.host),
        ("Agent", &request.agent_id),
        ("Session", &request.session_key),
        ("CWD", &request.cwd),
        ("Resolved", &request.resolved_path),
        ("Security", &request.security),
        ("Ask", &request.ask),
    ];
    for (label, value) in rows {
        if let Some(value) = value {
            println!("  {:<9} {}", style(label).dim(), value);
        }
    }
}
