//! Operator console for the breadboard 6502.
//!
//! `run` opens the serial link and hosts the dashboard, the other
//! subcommands work without hardware.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use common::Config;
use core_lib::driver::{Driver, DriverSettings, EventLoop, Frame, Hub, Key, RedrawQueue, Screen};
use core_lib::memory::Memory;
use core_lib::microcode::OpCodeTable;
use core_lib::notify::{History, LogLevelControl};
use core_lib::serial::{available_ports, SerialLink, SerialPortOpener};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

mod logging;
mod terminal;

#[derive(Parser)]
#[command(author, version, about = "Microcode console for a breadboard 6502", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,
    /// Log at trace level
    #[arg(long, global = true)]
    verbose: bool,
    /// JSON configuration file
    #[arg(long, global = true, env = "L1_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the board and open the dashboard
    Run {
        /// Program image served to the board
        #[arg(long, env = "L1_ROM", value_name = "PATH")]
        rom: Option<PathBuf>,
        /// Serial device the board is attached to
        #[arg(long, env = "L1_PORT", value_name = "NAME")]
        port: Option<String>,
        #[arg(long, env = "L1_BAUD", value_name = "N")]
        baud: Option<u32>,
        /// Saved opcode table
        #[arg(long, env = "L1_TABLE", value_name = "FILE")]
        table: Option<PathBuf>,
    },
    /// List the serial ports on this machine
    Ports,
    /// Write the three EPROM images
    Export {
        #[arg(long, env = "L1_TABLE", value_name = "FILE")]
        table: Option<PathBuf>,
        /// Output directory
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// Write the built-in opcode table as JSON
    Dump {
        #[arg(long, value_name = "FILE", default_value = "microcode.json")]
        out: PathBuf,
    },
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
struct Overrides {
    rom: Option<PathBuf>,
    port: Option<String>,
    baud: Option<u32>,
    table: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, mut config: Config) -> anyhow::Result<Config> {
        if let Some(rom) = self.rom {
            config.rom_file = Some(rom);
        }
        if let Some(port) = self.port {
            config.serial.port_name = port;
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
        if let Some(table) = self.table {
            config.microcode_file = table;
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let directive = logging::directive(cli.debug, cli.verbose);
    let config = Config::load_or_default(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            rom,
            port,
            baud,
            table,
        } => {
            let overrides = Overrides {
                rom,
                port,
                baud,
                table,
            };
            run(overrides.apply(config)?, directive)
        }
        Commands::Ports => {
            logging::init_stderr(directive);
            ports()
        }
        Commands::Export { table, out } => {
            logging::init_stderr(directive);
            export(&config, table.as_deref(), out.as_deref())
        }
        Commands::Dump { out } => {
            logging::init_stderr(directive);
            OpCodeTable::builtin()
                .save(&out)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!("{}", out.display());
            Ok(())
        }
    }
}

fn ports() -> anyhow::Result<()> {
    let ports = available_ports().context("Failed to list serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

fn export(config: &Config, table: Option<&Path>, out: Option<&Path>) -> anyhow::Result<()> {
    let table = match table {
        Some(path) => OpCodeTable::load(path).with_context(|| format!("Failed to load opcode table {}", path.display()))?,
        None => OpCodeTable::load_or_builtin(&config.microcode_file),
    };
    let dir = out.unwrap_or(&config.export_dir);
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    for path in table.export_eproms(dir).context("Failed to export EPROM images")? {
        println!("{}", path.display());
    }
    Ok(())
}

fn run(config: Config, directive: &str) -> anyhow::Result<()> {
    let Some(rom) = config.rom_file.clone() else {
        bail!("No ROM file given (use --rom or set rom_file in the config)");
    };
    if config.serial.port_name.is_empty() {
        bail!("No serial port configured (use --port or set serial.port_name in the config)");
    }

    let redraw = Arc::new(RedrawQueue::new());
    let history = Arc::new(History::default());
    let log_control = logging::init_session(&config.log_file, directive, Arc::clone(&history), redraw.clone())?;

    let mut memory = Memory::new();
    memory
        .load_rom(&rom, config.rom_origin)
        .with_context(|| format!("Failed to load ROM {}", rom.display()))?;
    let table = OpCodeTable::load_or_builtin(&config.microcode_file);
    if let Err(err) = memory.load_breakpoints(&table) {
        warn!(%err, "Break points not loaded");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(session(config, memory, table, history, redraw, log_control))
}

async fn session(
    config: Config,
    memory: Memory,
    table: OpCodeTable,
    history: Arc<History>,
    redraw: Arc<RedrawQueue>,
    log_control: Arc<dyn LogLevelControl>,
) -> anyhow::Result<()> {
    let (hub, receivers) = Hub::new();
    let opener = SerialPortOpener::new(config.serial.clone(), config.timing.read_poll());
    let link = Arc::new(SerialLink::new(Box::new(opener), Arc::new(hub), config.timing.clone()));
    // A failed first attempt is logged by the link; the event loop keeps polling.
    let _ = link.connect(false).await;

    let settings = DriverSettings {
        tick_settle: config.timing.tick_settle(),
        table_path: config.microcode_file.clone(),
        export_dir: config.export_dir.clone(),
    };
    let mut driver = Driver::new(Arc::clone(&link), table, memory, redraw.clone(), settings)
        .with_history(history)
        .with_log_control(log_control);

    let screen = terminal::Terminal::enter().context("Terminal unavailable")?;
    let (cols, rows) = screen.size();
    driver.process(Key::Resize(cols, rows));

    let (keys, input) = mpsc::channel(16);
    terminal::spawn_keyboard(keys).context("Failed to start the keyboard reader")?;
    let (frames, frames_rx) = watch::channel(Frame::default());
    let renderer = terminal::spawn_renderer(screen, frames_rx);

    let reconnect_every = config.timing.reconnect_interval();
    EventLoop::new(driver, receivers, input, redraw, frames, reconnect_every)
        .run()
        .await;

    renderer
        .await
        .context("Renderer task failed")?
        .context("Failed to draw the dashboard")?;
    link.reset_channels().await;
    info!("Session closed");
    Ok(())
}
