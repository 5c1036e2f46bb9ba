//! pandactl
//!
//! Command-line front end for the USB CAN/LIN adapter: list adapters, read
//! health, dump and send CAN traffic, and talk to the serial ports.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use common::{CancellationToken, RecvOutcome, create_session_bridge, setup_logging};
use driver::{DeviceRegistry, DriverConfig, Session, format_health, spawn_session_worker};
use protocol::{CanBus, CanMessage, SerialPort};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "pandactl")]
#[command(author, version, about = "Control a USB CAN/LIN adapter")]
#[command(long_about = "
Talks to a USB CAN/LIN adapter: configuration, CAN traffic and the
debug, ESP and LIN serial ports.

EXAMPLES:
    # List attached adapters
    pandactl list

    # Print health as JSON
    pandactl health --json

    # Dump CAN traffic for ten seconds (Ctrl+C stops early)
    pandactl dump --seconds 10

    # Send 0x11 0x22 to address 0x123 on the first bus
    pandactl send --bus 0 --address 0x123 --data 1122

    # Write to LIN1 and read the echo back
    pandactl serial write --port lin1 hello
    pandactl serial read --port lin1

CONFIGURATION:
    Settings are read from the path given with --config, then
    ~/.config/panda-usb/driver.toml, then built-in defaults.
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Serial number of the adapter to open (default: first available)
    #[arg(short, long, value_name = "SERIAL", global = true)]
    serial: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached adapters that are not in use
    List,

    /// Show firmware version, hardware serial and health
    Info,

    /// Read a health snapshot
    Health {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print received CAN messages until interrupted
    Dump {
        /// Stop after this many seconds
        #[arg(long, value_name = "N")]
        seconds: Option<u64>,
    },

    /// Send one CAN message
    Send {
        /// Bus number (0-2)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2))]
        bus: u8,

        /// Arbitration id, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_address)]
        address: u32,

        /// Use a 29-bit identifier
        #[arg(long)]
        extended: bool,

        /// Payload as hex, up to 8 bytes
        #[arg(long, default_value = "")]
        data: String,
    },

    /// Serial port access
    Serial {
        #[command(subcommand)]
        action: SerialAction,
    },

    /// Reboot the adapter into its bootloader
    Bootloader,

    /// Write the current configuration to the config path and exit
    SaveConfig,
}

#[derive(Subcommand, Debug)]
enum SerialAction {
    /// Drain and print buffered input
    Read {
        #[arg(long, value_enum)]
        port: PortArg,
    },

    /// Write data to a port
    Write {
        #[arg(long, value_enum)]
        port: PortArg,

        /// Treat DATA as hex
        #[arg(long)]
        hex: bool,

        data: String,
    },

    /// Discard buffered input
    Clear {
        #[arg(long, value_enum)]
        port: PortArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PortArg {
    Debug,
    Esp,
    Lin1,
    Lin2,
}

impl From<PortArg> for SerialPort {
    fn from(port: PortArg) -> Self {
        match port {
            PortArg::Debug => SerialPort::Debug,
            PortArg::Esp => SerialPort::Esp,
            PortArg::Lin1 => SerialPort::Lin1,
            PortArg::Lin2 => SerialPort::Lin2,
        }
    }
}

fn parse_address(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config =
        DriverConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    if let Command::SaveConfig = args.command {
        let path = match &args.config {
            Some(p) => PathBuf::from(shellexpand::tilde(p).as_ref()),
            None => DriverConfig::default_path(),
        };
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let registry = DeviceRegistry::usb()
        .context("Failed to initialize USB")?
        .with_timeouts(config.timeouts.to_timeouts());

    if let Command::List = args.command {
        return list_adapters(&registry);
    }

    let serial = args
        .serial
        .clone()
        .unwrap_or_else(|| config.adapter.serial.clone());
    let mut session = registry
        .open(&serial)
        .with_context(|| match serial.as_str() {
            "" => "Failed to open adapter".to_string(),
            s => format!("Failed to open adapter {}", s),
        })?;
    info!("Using adapter {}", session.serial_number());

    match args.command {
        Command::Info => {
            let version = session.control().get_version()?;
            let hw_serial = session.control().get_serial()?;
            let health = session.health()?;
            println!("serial:   {}", session.serial_number());
            println!("hardware: {}", hw_serial);
            println!("firmware: {}", version);
            print!("{}", format_health(&health));
        }
        Command::Health { json } => {
            let health = session.health()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                print!("{}", format_health(&health));
            }
        }
        Command::Dump { seconds } => {
            config.apply(&mut session)?;
            run_dump(session, seconds).await?;
        }
        Command::Send {
            bus,
            address,
            extended,
            data,
        } => {
            let payload = hex::decode(&data).context("Payload must be hex")?;
            config.apply(&mut session)?;
            session
                .can()
                .send(address, extended, &payload, CanBus::from_code(bus))?;
            println!("Sent {} byte(s) to {:#x} on bus {}", payload.len(), address, bus);
        }
        Command::Serial { action } => run_serial(&mut session, action)?,
        Command::Bootloader => {
            session.control().enter_bootloader()?;
            println!("Adapter is rebooting into its bootloader");
        }
        Command::List | Command::SaveConfig => {}
    }

    Ok(())
}

fn list_adapters(registry: &DeviceRegistry) -> Result<()> {
    let adapters = registry.list_available()?;
    if adapters.is_empty() {
        println!("No adapters found.");
    } else {
        println!("Found {} adapter(s):", adapters.len());
        for adapter in adapters {
            println!("  {}", adapter);
        }
    }
    Ok(())
}

fn run_serial(session: &mut Session, action: SerialAction) -> Result<()> {
    match action {
        SerialAction::Read { port } => {
            let data = session.serial().read(port.into())?;
            println!("{}", String::from_utf8_lossy(&data));
        }
        SerialAction::Write { port, hex, data } => {
            let bytes = if hex {
                hex::decode(&data).context("Data must be hex")?
            } else {
                data.into_bytes()
            };
            let timeout = session.timeouts().bulk_write;
            session.serial().write_all(port.into(), &bytes, timeout)?;
            println!("Wrote {} byte(s)", bytes.len());
        }
        SerialAction::Clear { port } => session.serial().clear(port.into())?,
    }
    Ok(())
}

/// Stream CAN traffic through a worker thread until Ctrl+C or the deadline
async fn run_dump(session: Session, seconds: Option<u64>) -> Result<()> {
    let (bridge, worker) = create_session_bridge();
    let worker_handle = spawn_session_worker(session, worker)?;

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    info!("Dumping CAN traffic, press Ctrl+C to stop");
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut count = 0usize;

    loop {
        let remaining = match deadline {
            Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                Some(left) if !left.is_zero() => Some(left),
                _ => break,
            },
            None => None,
        };

        match bridge.can_recv(remaining, cancel.clone()).await? {
            RecvOutcome::Messages(messages) => {
                for msg in &messages {
                    println!("{}", format_message(msg));
                }
                count += messages.len();
            }
            RecvOutcome::Cancelled => {
                info!("Interrupted");
                break;
            }
            RecvOutcome::TimedOut => break,
        }
    }

    ctrl_c.abort();
    bridge.shutdown().await?;
    drop(bridge);
    worker_handle
        .join()
        .map_err(|_| anyhow!("Session worker panicked"))?;

    eprintln!("{} message(s)", count);
    Ok(())
}

fn format_message(msg: &CanMessage) -> String {
    let id = if msg.extended {
        format!("{:08X}", msg.address)
    } else {
        format!("{:03X}", msg.address)
    };
    format!(
        "{:5} {} {} {} [{}] {}",
        msg.recv_time,
        msg.bus,
        if msg.is_receipt { "TX" } else { "RX" },
        id,
        msg.len,
        hex::encode_upper(msg.payload())
    )
}
