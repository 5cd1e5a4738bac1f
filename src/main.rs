//! VIVARIUM - CLI entry point.
//!
//! `serve` runs the environment coordinator plus the control server;
//! `agent` is the hidden child-process entry the supervisor spawns;
//! `init` writes a default configuration file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vivarium::agent::process::{run as run_agent, AgentOpts};
use vivarium::agent::Position;
use vivarium::config::Config;
use vivarium::coordinator::handle::CoordinatorHandle;
use vivarium::server;

#[derive(Parser)]
#[command(name = "vivarium")]
#[command(version)]
#[command(about = "Multi-process predator-prey ecosystem simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the environment coordinator and control server
    Serve {
        /// Configuration file (YAML)
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,

        /// Override the control server bind address
        #[arg(long)]
        bind: Option<String>,

        /// Random seed for reproducible placement
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Generate default configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },

    /// Run one agent process (spawned by the coordinator)
    #[command(hide = true)]
    Agent {
        #[arg(long)]
        agent_id: u64,
        #[arg(long)]
        kind: String,
        #[arg(long)]
        x: u8,
        #[arg(long)]
        y: u8,
        #[arg(long)]
        energy: u32,
        #[arg(long)]
        radius: u8,
        #[arg(long)]
        bus: String,
        #[arg(long)]
        world_slot: String,
        #[arg(long)]
        tick_ms: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind, seed } => serve(config, bind, seed),

        Commands::Init { output } => generate_config(output),

        Commands::Agent {
            agent_id,
            kind,
            x,
            y,
            energy,
            radius,
            bus,
            world_slot,
            tick_ms,
        } => {
            let opts = AgentOpts {
                agent_id,
                kind: kind.parse()?,
                position: Position::new(x, y),
                energy,
                sensing_radius: radius,
                bus_addr: bus,
                world_slot,
                tick_interval_ms: tick_ms,
            };
            match run_agent(&opts) {
                Ok(()) => Ok(()),
                Err(e) => {
                    // Nonzero exit: the coordinator observes this as an
                    // internal fault and reaps the record.
                    log::error!("agent {} failed: {}", opts.agent_id, e);
                    std::process::exit(1);
                }
            }
        }
    }
}

fn serve(
    config_path: PathBuf,
    bind: Option<String>,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = if config_path.exists() {
        println!("Loading config from: {:?}", config_path);
        Config::from_file(&config_path)?
    } else {
        println!("Using default configuration");
        Config::default()
    };
    if let Some(bind) = bind {
        config.control.bind = bind;
    }

    let seed = seed.unwrap_or_else(|| {
        use rand::Rng;
        rand::thread_rng().gen()
    });

    println!("Starting coordinator");
    println!(
        "  Grid: {0}x{0}",
        config.world.grid_size
    );
    println!("  Bus: {}", config.runtime.bus_bind);
    println!("  Control: http://{}", config.control.bind);
    println!("  Seed: {}", seed);

    let handle = CoordinatorHandle::spawn(config.clone(), seed)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server::run_server(config, handle))
}

fn generate_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    config.save(&output)?;
    println!("Configuration saved to: {:?}", output);
    Ok(())
}
