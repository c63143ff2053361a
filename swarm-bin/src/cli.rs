use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use swarm_autonomy::{ApprovalKind, ApprovalService};
use swarm_config::{ConfigLoader, LoggingConfig, SwarmConfig, WarningSeverity};
use swarm_core::{StreamEvent, StreamSink, StreamType, Tier, ToolRegistry};
use swarm_llm::ModelRouter;
use swarm_runtime::{AgentRuntime, Completion, RunOptions};

/// Swarm: run a goal through a tiered, tool-using agent
#[derive(Parser)]
#[command(name = "swarm", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to swarm.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one goal to completion and print the answer
    Run {
        /// What the agent should accomplish
        goal: String,
        /// Session to run in
        #[arg(short, long, default_value = "cli")]
        session: String,
        /// Tier of the top-level agent: architect, manager or worker
        #[arg(short, long, default_value = "architect")]
        tier: String,
        /// Extra context handed to the agent, repeatable
        #[arg(long = "memory")]
        memory: Vec<String>,
        /// Approve every gated tool without asking
        #[arg(long)]
        yes: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration
    Config {
        /// Output as JSON instead of TOML-like text
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and report problems
    Doctor,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        // Config first so logging can follow it
        let loader = ConfigLoader::load(self.config.as_deref())?;
        let config = loader.get();

        let level = if self.verbose {
            "debug".to_string()
        } else if self.quiet {
            "error".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| config.logging.level.clone())
        };
        init_tracing(&config.logging, &level);

        match self.command {
            Commands::Run {
                goal,
                session,
                tier,
                memory,
                yes,
                json,
            } => {
                let tier: Tier = tier.parse().map_err(anyhow::Error::msg)?;
                cmd_run(&loader, config, goal, session, tier, memory, yes, json).await
            }
            Commands::Config { json } => cmd_config(&config, json),
            Commands::Doctor => cmd_doctor(&config),
        }
    }
}

fn init_tracing(logging: &LoggingConfig, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format.as_str() {
        "json" => builder.json().with_target(true).init(),
        "compact" => builder.compact().with_target(false).init(),
        _ => builder.with_target(false).init(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    loader: &ConfigLoader,
    config: SwarmConfig,
    goal: String,
    session: String,
    tier: Tier,
    memory: Vec<String>,
    auto_approve: bool,
    json: bool,
) -> anyhow::Result<()> {
    let router = ModelRouter::new(
        config.routing.clone(),
        config.proxy.clone(),
        config.providers.clone(),
    )
    .with_defaults(config.agent.temperature, config.agent.max_tokens);
    let mode = router.initialize().await;
    info!(?mode, "model backend selected");

    // Routing changes apply to the next model call; the rest needs a restart.
    let _watcher = if loader.path().exists() {
        let hot = router.clone();
        match loader.watch(Box::new(move |c: &SwarmConfig| {
            hot.update_routing(c.routing.clone())
        })) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(error = %e, "config watcher not started");
                None
            }
        }
    } else {
        None
    };

    let approval = ApprovalService::new(&config.approval);
    spawn_approval_prompt(&approval, auto_approve);

    let runtime = AgentRuntime::builder(router)
        .tools(ToolRegistry::new())
        .config(config.agent.clone())
        .approval(approval)
        .tier(tier)
        .spawning(true)
        .sink(std::sync::Arc::new(ConsoleSink))
        .build();

    let abort = runtime.clone();
    let abort_session = session.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let stopped = abort.registry().abort_hierarchy(&abort_session);
            warn!(sessions = stopped.len(), "interrupted, cancelling run");
        }
    });

    let opts = RunOptions {
        context: memory,
        ..Default::default()
    };
    let result = runtime.run(&goal, &session, opts).await?;

    if json {
        let usage = runtime.tracker().session(&session);
        let out = serde_json::json!({
            "response": result.response,
            "completion": result.completion,
            "iterations": result.iterations,
            "trace_id": result.trace.id,
            "tool_calls": result.tool_calls,
            "usage": usage,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", result.response);
        match result.completion {
            Completion::Final => {}
            Completion::IterationLimit => {
                eprintln!("(stopped after {} iterations)", result.iterations)
            }
            Completion::Cancelled => eprintln!("(cancelled)"),
        }
    }
    Ok(())
}

/// Answers approval requests from the terminal, or approves everything
/// when `auto_approve` is set.
fn spawn_approval_prompt(approval: &ApprovalService, auto_approve: bool) {
    let Some(mut requests) = approval.take_receiver() else {
        return;
    };
    let service = approval.clone();
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        while let Some(req) = requests.recv().await {
            if auto_approve && req.kind == ApprovalKind::YesNo {
                service.resolve(req.id, true);
                continue;
            }
            match req.kind {
                ApprovalKind::YesNo => eprint!("\n{} [y/N] ", req.description),
                ApprovalKind::FreeText => eprint!("\n{}\n> ", req.description),
            }
            let _ = std::io::stderr().flush();
            let Ok(Some(line)) = stdin.next_line().await else {
                // No terminal input left; anything still pending times out.
                break;
            };
            match req.kind {
                ApprovalKind::YesNo => {
                    let yes = matches!(line.trim().to_lowercase().as_str(), "y" | "yes");
                    service.resolve(req.id, yes);
                }
                ApprovalKind::FreeText => {
                    service.respond(req.id, line.trim());
                }
            }
        }
    });
}

/// Prints tool activity to stderr so stdout carries only the answer.
struct ConsoleSink;

impl StreamSink for ConsoleSink {
    fn emit(&self, event: StreamEvent) {
        let nested = event
            .metadata
            .get("child_session_id")
            .and_then(|v| v.as_str())
            .map(|s| format!("[{s}] "))
            .unwrap_or_default();
        match event.stream_type {
            StreamType::ToolCall => eprintln!("{nested}-> {}", event.delta),
            StreamType::ToolResult => {
                let first = event.delta.lines().next().unwrap_or_default();
                eprintln!("{nested}<- {}", truncate(first, 120));
            }
            _ => {}
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}…")
    }
}

fn cmd_config(config: &SwarmConfig, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }
    println!("agent:");
    println!("  max_iterations        {}", config.agent.max_iterations);
    println!("  soft_token_limit      {}", config.agent.soft_token_limit);
    println!("  keep_trailing         {}", config.agent.keep_trailing_messages);
    println!("  temperature           {}", config.agent.temperature);
    println!("  max_tokens            {}", config.agent.max_tokens);
    println!("routing:");
    let chain = |c: &[swarm_config::ModelConfig]| {
        c.iter().map(|m| m.qualified()).collect::<Vec<_>>().join(" -> ")
    };
    println!("  thinking              {}", chain(&config.routing.roles.thinking));
    println!("  fast                  {}", chain(&config.routing.roles.fast));
    println!("  local                 {}", chain(&config.routing.roles.local));
    println!("  max_retries           {}", config.routing.max_retries);
    println!(
        "proxy:                  {} ({})",
        config.proxy.base_url,
        if config.proxy.enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn cmd_doctor(config: &SwarmConfig) -> anyhow::Result<()> {
    let warnings = config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("configuration has errors")?;
    if warnings.is_empty() {
        println!("configuration looks good");
        return Ok(());
    }
    for w in &warnings {
        println!("{w}");
    }
    if warnings.iter().any(|w| w.severity == WarningSeverity::Error) {
        bail!("configuration has errors");
    }
    Ok(())
}
