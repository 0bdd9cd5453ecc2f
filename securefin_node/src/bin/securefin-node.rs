// src/bin/securefin-node.rs
use clap::{Parser, Subcommand};
use securefin_node::config::{generate_secret, validate_config, Config};
use securefin_node::ledger::LedgerMode;
use securefin_node::storage::StorageMode;
use std::net::SocketAddr;
use yansi::Paint;

#[derive(Parser)]
#[command(name = "securefin-node", about = "SecureFin transaction API and ledger anchoring node", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Start {
        /// API port (overrides the port of API_ADDR)
        #[arg(long)]
        api_port: Option<u16>,

        /// Storage backend: sled or memory
        #[arg(long)]
        store: Option<String>,

        /// Sled data directory
        #[arg(long)]
        data_dir: Option<String>,

        /// Ledger backend: rpc or simulated
        #[arg(long)]
        ledger: Option<String>,

        /// Ethereum JSON-RPC endpoint
        #[arg(long)]
        rpc_url: Option<String>,
    },

    /// Load and validate configuration, then exit
    CheckConfig,

    /// Print a random secret suitable for JWT_SECRET
    GenSecret,
}

fn banner() {
    let name = r#"
  ____                           _____ _
 / ___|  ___  ___ _   _ _ __ ___|  ___(_)_ __
 \___ \ / _ \/ __| | | | '__/ _ \ |_  | | '_ \
  ___) |  __/ (__| |_| | | |  __/  _| | | | | |
 |____/ \___|\___|\__,_|_|  \___|_|   |_|_| |_|
"#;
    println!("{}", Paint::cyan(name).bold());
    println!(
        "{} {}",
        Paint::green("SecureFin Node").bold(),
        Paint::white("- transaction API with on-chain anchoring").dimmed()
    );
    println!();
}

fn apply_overrides(
    cfg: &mut Config,
    api_port: Option<u16>,
    store: Option<String>,
    data_dir: Option<String>,
    ledger: Option<String>,
    rpc_url: Option<String>,
) -> anyhow::Result<()> {
    if let Some(port) = api_port {
        cfg.api_addr = SocketAddr::new(cfg.api_addr.ip(), port);
    }
    if let Some(s) = store {
        cfg.storage_mode = StorageMode::parse(&s).ok_or_else(|| anyhow::anyhow!("unknown --store '{}'", s))?;
    }
    if let Some(dir) = data_dir {
        cfg.sled_path = dir;
    }
    if let Some(l) = ledger {
        cfg.ledger_mode = LedgerMode::parse(&l).ok_or_else(|| anyhow::anyhow!("unknown --ledger '{}'", l))?;
    }
    if let Some(url) = rpc_url {
        cfg.ledger.rpc_url = url;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // load .env for local development (if present)
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            api_port,
            store,
            data_dir,
            ledger,
            rpc_url,
        } => {
            banner();
            let mut cfg = Config::from_env()?;
            apply_overrides(&mut cfg, api_port, store, data_dir, ledger, rpc_url)?;
            securefin_node::init_tracing(cfg.log_format);
            println!(
                "{} API -> http://{}   storage -> {}   ledger -> {}",
                Paint::blue("[starting]").bold(),
                cfg.api_addr,
                cfg.storage_mode.as_str(),
                cfg.ledger_mode.as_str()
            );
            securefin_node::run(cfg).await?;
        }

        Commands::CheckConfig => {
            let cfg = Config::from_env()?;
            securefin_node::init_tracing(cfg.log_format);
            let validation = validate_config(&cfg);
            validation.print_summary();
            if validation.valid {
                println!("{}", Paint::green("[ok] configuration is valid"));
            } else {
                println!("{}", Paint::red("[err] configuration has errors"));
                std::process::exit(1);
            }
        }

        Commands::GenSecret => {
            println!("JWT_SECRET={}", generate_secret());
        }
    }

    Ok(())
}
