//! cloisterd — the guardian sandbox-enforcement daemon.
//!
//! Quick start:
//!   cloisterd serve                 # start the four servers
//!   cloisterd token register …      # register a cloister's token
//!   cloisterd token revoke <token>  # revoke it
//!
//! For more info: cloisterd --help

use anyhow::Context;
use clap::{Parser, Subcommand};
use cloisterd::audit::AuditSink;
use cloisterd::command::CommandMatcherRegistry;
use cloisterd::config::{
    default_root_dir, load_config, load_decisions, ConfigPersister, FsProjectLoader, ProjectLoader,
    YamlConfigPersister,
};
use cloisterd::events::EventHub;
use cloisterd::executor::TcpCommandExecutor;
use cloisterd::policy::PolicyEngine;
use cloisterd::queue::{CommandQueue, DomainQueue};
use cloisterd::server::state::GuardianState;
use cloisterd::server::supervisor::{Supervisor, SupervisorAddrs};
use cloisterd::token::{TokenInfo, TokenRegistry, TokenStore};
use cloisterd::utils::duration::parse_duration;
use colored::Colorize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "cloisterd",
    version,
    about = "Sandbox enforcement plane for AI coding agents",
    long_about = "cloisterd sits between a cloistered agent container and the\n\
                  outside world: it proxies network egress, gates host commands,\n\
                  and routes anything not pre-approved to a human.\n\n\
                  Quick start:\n  \
                  cloisterd serve                 # start the four servers\n  \
                  cloisterd token register …      # register a cloister's token\n  \
                  cloisterd token revoke <token>  # revoke it"
)]
struct Cli {
    /// Root directory for on-disk state (tokens, global + per-project config).
    #[arg(long, env = "CLOISTER_ROOT", global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy, admin, request, and approval servers.
    Serve {
        #[arg(long, env = "CLOISTER_PROXY_ADDR", default_value = "127.0.0.1:8443")]
        proxy_addr: SocketAddr,

        /// Loopback-only; nothing inside a container should reach this.
        #[arg(long, env = "CLOISTER_ADMIN_ADDR", default_value = "127.0.0.1:8090")]
        admin_addr: SocketAddr,

        #[arg(long, env = "CLOISTER_REQUEST_ADDR", default_value = "127.0.0.1:8081")]
        request_addr: SocketAddr,

        #[arg(long, env = "CLOISTER_APPROVAL_ADDR", default_value = "127.0.0.1:8082")]
        approval_addr: SocketAddr,
    },

    /// Register or revoke a cloister's token.
    Token {
        #[command(subcommand)]
        action: TokenCommands,
    },

    /// Show the guardian's on-disk state at a glance.
    Status,
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Generate a token, save it to the token store, and register it with a
    /// running guardian's admin API.
    Register {
        #[arg(long)]
        cloister: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        worktree: String,
        #[arg(long, env = "CLOISTER_ADMIN_ADDR", default_value = "127.0.0.1:8090")]
        admin_addr: SocketAddr,
    },

    /// Revoke a token: remove it from the store and the running guardian.
    Revoke {
        token: String,
        #[arg(long, env = "CLOISTER_ADMIN_ADDR", default_value = "127.0.0.1:8090")]
        admin_addr: SocketAddr,
    },

    /// List tokens recorded in the on-disk store.
    List,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cloisterd=info")),
        )
        .init();

    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => match default_root_dir() {
            Ok(root) => root,
            Err(err) => fail(err),
        },
    };

    let result = match cli.command {
        Commands::Serve { proxy_addr, admin_addr, request_addr, approval_addr } => {
            let addrs = SupervisorAddrs { proxy: proxy_addr, admin: admin_addr, request: request_addr, approval: approval_addr };
            run_serve(&root, addrs).await
        }
        Commands::Token { action } => run_token(&root, action).await,
        Commands::Status => run_status(&root),
    };

    if let Err(err) = result {
        fail(err);
    }
}

fn fail(err: anyhow::Error) -> ! {
    eprintln!();
    eprintln!("  {} {}", "✗".red().bold(), err);
    for cause in err.chain().skip(1) {
        eprintln!("  {} {}", "caused by:".dimmed(), cause);
    }
    eprintln!();
    std::process::exit(1);
}

/// Build every leaf component and start the supervisor. Blocks until a
/// shutdown signal arrives, then tears everything down in reverse order.
async fn run_serve(root: &std::path::Path, addrs: SupervisorAddrs) -> anyhow::Result<()> {
    let global_config = load_config(&root.join("config.yaml"))?;
    let global_decisions = load_decisions(&root.join("decisions.yaml"))?;

    let token_store = Arc::new(TokenStore::new(root.join("tokens")));
    let tokens = Arc::new(TokenRegistry::new());
    tokens.reconcile_with_store(&token_store)?;

    let loader: Arc<dyn ProjectLoader> = Arc::new(FsProjectLoader::new(root));
    let persister: Arc<dyn ConfigPersister> = Arc::new(YamlConfigPersister::new(root));

    let mut merged_config = global_config.clone();
    merged_config.proxy.allow.extend(global_decisions.allow.clone());
    merged_config.proxy.deny.extend(global_decisions.deny.clone());
    let policy = Arc::new(PolicyEngine::new(&merged_config, loader.clone(), Some(persister.clone())));

    let command_matchers = Arc::new(CommandMatcherRegistry::new(
        global_config.hostexec.auto_approve.iter().map(|p| p.pattern.clone()).collect(),
        global_config.hostexec.manual_approve.iter().map(|p| p.pattern.clone()).collect(),
        loader,
    ));

    let command_timeout = global_config
        .hostexec
        .approval_timeout
        .as_deref()
        .and_then(parse_duration)
        .unwrap_or(Duration::from_secs(5 * 60));
    let domain_timeout = global_config
        .proxy
        .approval_timeout
        .as_deref()
        .and_then(parse_duration)
        .unwrap_or(Duration::from_secs(60));

    let audit = Arc::new(match &global_config.log.file {
        Some(path) => AuditSink::to_file(path)?,
        None => AuditSink::disabled(),
    });

    let executor = Arc::new(TcpCommandExecutor::from_env().context(
        "configuring the host executor client (CLOISTER_EXECUTOR_PORT / CLOISTER_SHARED_SECRET)",
    )?);

    let state = Arc::new(GuardianState {
        tokens,
        policy,
        command_matchers,
        command_queue: CommandQueue::new(command_timeout),
        domain_queue: DomainQueue::new(domain_timeout),
        events: Arc::new(EventHub::new()),
        audit: Some(audit),
        executor,
        persister: Some(persister),
    });

    let supervisor = Supervisor::start(state, addrs, Some(token_store)).await?;
    let bound = supervisor.addrs();

    println!();
    println!("  {}  {}", "cloisterd".bold(), "— guardian is up".green());
    println!("  {}", "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".dimmed());
    println!("  proxy:    {}", bound.proxy.to_string().cyan());
    println!("  admin:    {}", bound.admin.to_string().cyan());
    println!("  request:  {}", bound.request.to_string().cyan());
    println!("  approval: {}", bound.approval.to_string().cyan());
    println!();

    supervisor.wait_for_shutdown_signal().await;
    supervisor.shutdown().await;
    println!("  {} guardian stopped", "✓".green());
    Ok(())
}

async fn run_token(root: &std::path::Path, action: TokenCommands) -> anyhow::Result<()> {
    match action {
        TokenCommands::Register { cloister, project, worktree, admin_addr } => {
            let token = TokenRegistry::generate_token();
            let info = TokenInfo { cloister: cloister.clone(), project: project.clone(), worktree };
            let store = TokenStore::new(root.join("tokens"));
            store.save(&token, &info)?;

            let client = reqwest::Client::new();
            let resp = client
                .post(format!("http://{admin_addr}/token"))
                .json(&serde_json::json!({
                    "token": token,
                    "cloister": cloister,
                    "project": project,
                    "worktree": info.worktree,
                }))
                .send()
                .await
                .with_context(|| format!("calling admin API at {admin_addr} — is `cloisterd serve` running?"))?;
            if !resp.status().is_success() {
                anyhow::bail!("admin API rejected registration: {}", resp.status());
            }

            println!();
            println!("  {} registered {}", "✓".green().bold(), cloister.bold());
            println!("  token: {}", token.cyan());
            println!();
        }
        TokenCommands::Revoke { token, admin_addr } => {
            let store = TokenStore::new(root.join("tokens"));
            store.remove(&token)?;

            let client = reqwest::Client::new();
            let resp = client
                .delete(format!("http://{admin_addr}/token/{token}"))
                .send()
                .await
                .with_context(|| format!("calling admin API at {admin_addr} — is `cloisterd serve` running?"))?;
            if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
                anyhow::bail!("admin API rejected revocation: {}", resp.status());
            }

            println!();
            println!("  {} revoked {}", "✓".green().bold(), token.cyan());
            println!();
        }
        TokenCommands::List => {
            let store = TokenStore::new(root.join("tokens"));
            let tokens = store.load_all()?;
            if tokens.is_empty() {
                println!("  {}", "no tokens registered".dimmed());
                return Ok(());
            }
            println!();
            for (token, info) in tokens {
                println!(
                    "  {}  {}  {}",
                    format!("{}…", &token[..token.len().min(16)]).dimmed(),
                    info.cloister.bold(),
                    info.project.cyan()
                );
            }
            println!();
        }
    }
    Ok(())
}

fn run_status(root: &std::path::Path) -> anyhow::Result<()> {
    let config = load_config(&root.join("config.yaml"))?;
    let store = TokenStore::new(root.join("tokens"));
    let tokens = store.load_all()?;

    println!();
    println!("  {}  {}", "cloisterd".bold(), "— on-disk state".green());
    println!("  {}", "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".dimmed());
    println!("  root:  {}", root.display().to_string().dimmed());
    println!(
        "  proxy: {} allow entries, {} deny entries, unlisted → {:?}",
        config.proxy.allow.len(),
        config.proxy.deny.len(),
        config.proxy.unlisted_domain_behavior
    );
    println!(
        "  hostexec: {} auto patterns, {} manual patterns",
        config.hostexec.auto_approve.len(),
        config.hostexec.manual_approve.len()
    );
    println!("  tokens: {}", tokens.len().to_string().bold());
    println!();
    Ok(())
}
