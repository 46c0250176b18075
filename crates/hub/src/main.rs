//! Virtual Serial Hub - Main Entry Point

use anyhow::Context;
use clap::{Parser, Subcommand};
use hub::command::{DEFAULT_LOOPBACK_PORT, HELP};
use hub::{init_logging, system_ports, BridgeManager, Command, HubConfig, RelaySettings, SerialEndpoint};
use null_modem::{NullModem, PortId};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "vserial-hub", version, about = "Virtual serial port hub")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Expose the virtual pair on two consecutive TCP ports
    Pair {
        #[arg(default_value_t = 7000)]
        base_port: u16,
    },
    /// Relay between two serial ports
    Bridge { first: String, second: String },
    /// TCP loopback server
    Loopback {
        #[arg(default_value_t = DEFAULT_LOOPBACK_PORT)]
        port: u16,
    },
    /// Expose a serial port over TCP
    Tcpserial { device: String, port: u16 },
    /// List serial ports
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = HubConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(&config.log_level, config.json_logs)?;

    info!("=== Virtual Serial Hub v{} ===", env!("CARGO_PKG_VERSION"));

    let modem = Arc::new(NullModem::load(config.pair.clone())?);
    let mut manager = BridgeManager::new(RelaySettings::from(&config));

    match cli.command {
        None => interactive(&modem, &mut manager).await?,
        Some(Mode::List) => list_ports(),
        Some(mode) => {
            start_mode(mode, &modem, &mut manager).await?;
            print_status(&manager);
            println!("Press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
        }
    }

    manager.stop_all();
    info!("Hub stopped");
    Ok(())
}

async fn start_mode(
    mode: Mode,
    modem: &Arc<NullModem>,
    manager: &mut BridgeManager,
) -> anyhow::Result<()> {
    match mode {
        Mode::Pair { base_port } => {
            for (offset, id) in (0u16..).zip(PortId::ALL) {
                let port = base_port
                    .checked_add(offset)
                    .context("TCP port out of range")?;
                let endpoint = SerialEndpoint::Virtual {
                    modem: Arc::clone(modem),
                    port: id,
                };
                manager.start_tcp_serial(endpoint, port).await?;
            }
        }
        Mode::Bridge { first, second } => {
            manager.start_serial_bridge(
                SerialEndpoint::resolve(&first, modem),
                SerialEndpoint::resolve(&second, modem),
            )?;
        }
        Mode::Loopback { port } => {
            manager.start_loopback(port).await?;
        }
        Mode::Tcpserial { device, port } => {
            manager
                .start_tcp_serial(SerialEndpoint::resolve(&device, modem), port)
                .await?;
        }
        Mode::List => list_ports(),
    }
    Ok(())
}

async fn interactive(modem: &Arc<NullModem>, manager: &mut BridgeManager) -> anyhow::Result<()> {
    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        let mode = match command {
            Command::Quit => break,
            Command::Help => {
                println!("{}", HELP);
                continue;
            }
            Command::Status => {
                print_status(manager);
                continue;
            }
            Command::Stop { id } => {
                if let Err(e) = manager.stop(id) {
                    println!("{}", e);
                }
                continue;
            }
            Command::List => Mode::List,
            Command::Bridge { first, second } => Mode::Bridge { first, second },
            Command::Loopback { port } => Mode::Loopback { port },
            Command::TcpSerial { device, port } => Mode::Tcpserial { device, port },
        };

        if let Err(e) = start_mode(mode, modem, manager).await {
            error!("{:#}", e);
        }
    }

    Ok(())
}

fn list_ports() {
    match system_ports() {
        Ok(ports) if ports.is_empty() => println!("No system serial ports found"),
        Ok(ports) => ports.iter().for_each(|name| println!("  {}", name)),
        Err(e) => error!("Failed to enumerate serial ports: {}", e),
    }
    for id in PortId::ALL {
        println!("  {} (virtual, peer {})", id, id.peer());
    }
}

fn print_status(manager: &BridgeManager) {
    if manager.is_empty() {
        println!("No bridges running");
        return;
    }
    for line in manager.status_lines() {
        println!("{}", line);
    }
}
