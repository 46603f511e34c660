//! Ferry CLI
//!
//! Send a file to another computer with a short codephrase.

mod config;
mod progress;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use console::style;
use ferry_core::{ClientConfig, Offer, Transfer, TransferSummary};
use ferry_crypto::codephrase;
use ferry_relay::{Broker, LaneRelay};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{TransferProgress, average_speed, format_bytes, format_duration, format_speed};

/// Ferry - send files with a codephrase
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relay host (overrides the config file)
    #[arg(long, global = true)]
    relay: Option<String>,

    /// Relay ports, comma separated (overrides the config file)
    #[arg(long, global = true, value_delimiter = ',')]
    ports: Option<Vec<u16>>,

    /// Run transfers over this WebSocket broker (ws:// or wss:// URL)
    /// instead of the lane ports
    #[arg(long, global = true)]
    ws_broker: Option<String>,

    /// PAKE curve: ristretto255 or p256
    #[arg(long, global = true)]
    curve: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file
    Send {
        /// File to send
        #[arg(required = true)]
        file: PathBuf,

        /// Codephrase to use instead of a generated one
        #[arg(long)]
        code: Option<String>,

        /// Offer the file under another name
        #[arg(long)]
        name: Option<String>,

        /// Parallel data lanes
        #[arg(long)]
        lanes: Option<usize>,

        /// Disable block compression
        #[arg(long)]
        no_compress: bool,
    },

    /// Receive a file
    Receive {
        /// Codephrase (prompted for when omitted)
        code: Option<String>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Accept without asking
        #[arg(short, long)]
        yes: bool,

        /// Keep files that fail verification
        #[arg(long)]
        debug: bool,
    },

    /// Run a relay
    Relay {
        /// Listen host
        #[arg(long)]
        host: Option<String>,

        /// Also run the WebSocket broker on this address
        #[arg(long)]
        broker: Option<SocketAddr>,
    },

    /// Check that a relay is reachable
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => Config::load_or_default()?,
    };
    if let Some(relay) = &cli.relay {
        config.relay.address.clone_from(relay);
    }
    if let Some(ports) = &cli.ports {
        config.relay.ports.clone_from(ports);
        config.server.ports.clone_from(ports);
    }
    if let Some(url) = &cli.ws_broker {
        config.relay.broker_url = Some(url.clone());
    }
    if let Some(curve) = &cli.curve {
        config.transfer.curve.clone_from(curve);
    }

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    config.validate()?;

    match cli.command {
        Commands::Send {
            file,
            code,
            name,
            lanes,
            no_compress,
        } => {
            let mut client = config.client_config()?;
            client.send_as = name;
            if let Some(lanes) = lanes {
                client.lanes = lanes;
            }
            if no_compress {
                client.compress = false;
            }
            send_file(file, code, client).await?;
        }
        Commands::Receive {
            code,
            output,
            yes,
            debug,
        } => {
            let mut client = config.client_config()?;
            if let Some(output) = output {
                client.out_dir = output;
            }
            client.debug = debug;
            receive_file(code, yes, client).await?;
        }
        Commands::Relay { host, broker } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let broker = match broker {
                Some(addr) => Some(addr),
                None => config
                    .server
                    .broker_addr
                    .as_deref()
                    .map(str::parse)
                    .transpose()?,
            };
            run_relay(&host, broker, &config).await?;
        }
        Commands::Ping => {
            ping_relay(&config.client_config()?).await?;
        }
    }

    Ok(())
}

/// Wire Ctrl-C to the transfer's cancel token.
fn cancel_on_ctrl_c(transfer: &Transfer) {
    let cancel = transfer.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", style("Cancelling...").yellow());
            cancel.cancel();
        }
    });
}

/// Send a file
async fn send_file(file: PathBuf, code: Option<String>, client: ClientConfig) -> anyhow::Result<()> {
    if !file.is_file() {
        anyhow::bail!("File not found: {}", file.display());
    }
    let code = match code {
        Some(code) => code,
        None => codephrase::generate(codephrase::DEFAULT_WORDS)?,
    };
    let size = std::fs::metadata(&file)?.len();
    let shown = client.send_as.clone().unwrap_or_else(|| {
        file.file_name()
            .map_or_else(|| file.display().to_string(), |n| n.to_string_lossy().into_owned())
    });

    println!("Sending '{}' ({})", shown, format_bytes(size));
    println!("Code is: {}", style(&code).bold().green());
    println!("On the other computer run\n\n    ferry receive {code}\n");

    let transfer = Transfer::new(client);
    cancel_on_ctrl_c(&transfer);
    let progress = TransferProgress::follow(transfer.status());
    match transfer.send(&file, &code).await {
        Ok(summary) => {
            progress.finish(done_line("Sent", &summary));
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            Err(e.into())
        }
    }
}

/// Receive a file
async fn receive_file(code: Option<String>, yes: bool, client: ClientConfig) -> anyhow::Result<()> {
    let code = match code {
        Some(code) => code,
        None => rpassword::prompt_password("Enter receive code: ")?,
    };
    let code = code.trim().to_string();
    std::fs::create_dir_all(&client.out_dir)
        .with_context(|| format!("creating {}", client.out_dir.display()))?;

    let transfer = Transfer::new(client).with_accept(move |offer| yes || confirm(offer));
    cancel_on_ctrl_c(&transfer);
    let progress = TransferProgress::follow(transfer.status());
    match transfer.receive(&code).await {
        Ok(summary) => {
            progress.finish(done_line("Received", &summary));
            println!("Saved to {}", summary.path.display());
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            Err(e.into())
        }
    }
}

/// Ask on the terminal whether to take the offered file.
fn confirm(offer: &Offer) -> bool {
    let mut question = format!("Accept '{}' ({})?", offer.file_name, format_bytes(offer.size));
    if offer.resuming {
        question.push_str(&format!(
            " Resuming, {} already here.",
            format_bytes(offer.already_have)
        ));
    } else if offer.exists {
        question.push_str(" It will overwrite the existing file.");
    }
    let term = console::Term::stderr();
    if term.write_str(&format!("{question} (Y/n) ")).is_err() {
        return false;
    }
    match term.read_line() {
        Ok(answer) => {
            let answer = answer.trim().to_lowercase();
            answer.is_empty() || answer == "y" || answer == "yes"
        }
        Err(_) => false,
    }
}

fn done_line(verb: &str, summary: &TransferSummary) -> String {
    let speed = average_speed(summary.transferred, summary.elapsed);
    format!(
        "{} {} ({}) in {} at {} over {} lane(s)",
        style(verb).green(),
        summary.file_name,
        format_bytes(summary.size),
        format_duration(summary.elapsed),
        format_speed(speed),
        summary.lanes
    )
}

/// Run the lane relay and, optionally, the WebSocket broker.
async fn run_relay(host: &str, broker: Option<SocketAddr>, config: &Config) -> anyhow::Result<()> {
    let lanes = LaneRelay::bind_with_config(host, &config.server.ports, config.lane_relay_config())
        .await?;
    for addr in lanes.local_addrs()? {
        println!("Relay listening on {addr}");
    }

    let broker = match broker {
        Some(addr) => {
            let broker = Broker::bind_with_config(addr, config.broker_config()).await?;
            println!("Broker listening on ws://{}", broker.local_addr()?);
            Some(broker)
        }
        None => None,
    };

    tokio::select! {
        res = lanes.run() => res?,
        res = async {
            match broker {
                Some(broker) => broker.run().await,
                None => std::future::pending().await,
            }
        } => res?,
        _ = tokio::signal::ctrl_c() => {
            println!("Shutting down relay");
        }
    }
    Ok(())
}

/// Ping every configured relay port.
async fn ping_relay(client: &ClientConfig) -> anyhow::Result<()> {
    let mut failures = 0;
    for &port in &client.ports {
        let addr = client.relay_addr(port);
        match ferry_relay::ping(&addr, Duration::from_secs(5)).await {
            Ok(rtt) => println!("{addr}: {} ({} ms)", style("ok").green(), rtt.as_millis()),
            Err(e) => {
                failures += 1;
                println!("{addr}: {} ({e})", style("unreachable").red());
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} of {} relay ports unreachable", client.ports.len());
    }
    Ok(())
}
