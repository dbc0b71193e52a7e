use anyhow::Result;
use clap::{Parser, Subcommand};
use scanfleet_agent::{with_signals, Agent, AgentConfig, Controls, ModuleRegistry};
use scanfleet_planner::Planner;
use scanfleet_scheduler::{http, Scheduler};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod admin;
mod config;

#[derive(Debug, Parser)]
#[command(name = "scanfleet", version, about = "Distributed scan orchestration: scheduler, planner and agents")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./scanfleet.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Show debug output
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Args)]
struct AgentArgs {
    /// Scheduler url
    #[arg(long)]
    server: Option<String>,
    /// Request assignments from this queue only (id or name)
    #[arg(long)]
    queue: Option<String>,
    /// Capability tags of this agent
    #[arg(long, num_args = 1..)]
    caps: Option<Vec<String>>,
    /// Process a single assignment and exit
    #[arg(long, default_value_t = false)]
    oneshot: bool,
    /// Directory for job directories and archives
    #[arg(long, value_name = "DIR")]
    workdir: Option<PathBuf>,
    /// Execute this assignment (JSON) locally instead of asking the scheduler
    #[arg(long, value_name = "JSON", conflicts_with_all = ["shutdown", "terminate"])]
    assignment: Option<String>,
    /// Ask the agent with this PID to finish its current job and exit
    #[arg(long, value_name = "PID", conflicts_with = "terminate")]
    shutdown: Option<i32>,
    /// Ask the agent with this PID to stop immediately
    #[arg(long, value_name = "PID")]
    terminate: Option<i32>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Serve the scheduler HTTP API
    Server {
        /// Listen address (host:port)
        #[arg(long)]
        listen: Option<String>,
        #[arg(long, value_name = "FILE")]
        db: Option<PathBuf>,
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// Run a scan agent
    Agent(AgentArgs),
    /// Run the planner loop
    Planner {
        /// Run every stage once and exit
        #[arg(long, default_value_t = false)]
        oneshot: bool,
    },
    /// Queue and job administration
    Scheduler {
        #[command(subcommand)]
        cmd: admin::SchedulerCmd,
    },
}

fn init_tracing(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

/// Command line flags win over the config file.
fn merge_agent_config(mut cfg: AgentConfig, args: &AgentArgs) -> AgentConfig {
    if let Some(server) = &args.server {
        cfg.server = server.clone();
    }
    if let Some(queue) = &args.queue {
        cfg.queue = Some(queue.clone());
    }
    if let Some(caps) = &args.caps {
        cfg.caps = caps.clone();
    }
    if args.oneshot {
        cfg.oneshot = true;
    }
    if let Some(workdir) = &args.workdir {
        cfg.workdir = workdir.clone();
    }
    cfg
}

/// Process exit status for a job return code; codes outside 0..=255 become 1.
fn exit_status(retval: i32) -> u8 {
    u8::try_from(retval).unwrap_or(1)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Version => {
            println!("scanfleet {}", scanfleet_core::version());
        }
        Commands::Server { listen, db, output_dir } => {
            let mut sched_cfg = cfg.scheduler;
            if let Some(db) = db {
                sched_cfg.db = db;
            }
            if let Some(dir) = output_dir {
                sched_cfg.output_dir = dir;
            }
            let listen = listen.unwrap_or(cfg.server.listen);
            let scheduler = Arc::new(Scheduler::new(sched_cfg)?);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::bind(&listen).await?;
                let controls = Controls::new();
                let stop = controls.shutdown.clone().cancelled_owned();
                with_signals(&controls, http::serve(listener, scheduler, stop)).await??;
                Ok::<(), anyhow::Error>(())
            })?;
        }
        Commands::Agent(args) => {
            if let Some(pid) = args.shutdown {
                scanfleet_agent::send_signal(pid, libc::SIGUSR1)?;
                return Ok(ExitCode::SUCCESS);
            }
            if let Some(pid) = args.terminate {
                scanfleet_agent::send_signal(pid, libc::SIGTERM)?;
                return Ok(ExitCode::SUCCESS);
            }
            let agent_cfg = merge_agent_config(cfg.agent, &args);
            let agent = Agent::new(agent_cfg, ModuleRegistry::default())?;
            let rt = tokio::runtime::Runtime::new()?;
            let retval = rt.block_on(async {
                let retval = match &args.assignment {
                    Some(text) => with_signals(agent.controls(), agent.run_assignment(text)).await??,
                    None => with_signals(agent.controls(), agent.run()).await?,
                };
                Ok::<i32, anyhow::Error>(retval)
            })?;
            return Ok(ExitCode::from(exit_status(retval)));
        }
        Commands::Planner { oneshot } => {
            let scheduler = Arc::new(Scheduler::new(cfg.scheduler)?);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async move {
                let planner = Planner::new(scheduler, &cfg.planner)?;
                let controls = Controls::new();
                let shutdown = controls.shutdown.clone();
                with_signals(&controls, planner.run(oneshot, shutdown)).await??;
                Ok::<(), anyhow::Error>(())
            })?;
        }
        Commands::Scheduler { cmd } => {
            let sched_cfg = cfg.scheduler;
            let mut stdout = std::io::stdout().lock();
            admin::run(|| Ok(Scheduler::new(sched_cfg)?), cmd, &mut stdout)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
