mod banner;
mod config;
mod replay;
mod status_server;

use clap::{Parser, Subcommand};
use config::Config;
use snoopreplay_core::{Emulator, Frame, ReplayTable};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "snoopreplay", version, about = "Replay captured NFC exchanges")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the normalized exchanges of a capture as JSON
    Parse {
        /// Path to the capture (JSON snoop log)
        file: PathBuf,
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Summarize the replay table a capture builds
    Inspect {
        /// Path to the capture
        file: PathBuf,
    },
    /// Answer hex APDUs, in order, against a freshly loaded capture
    Answer {
        file: PathBuf,
        /// Hex APDUs, e.g. 00A40400
        #[arg(num_args = 1..)]
        apdus: Vec<String>,
    },
    /// Run the emulator: answer inbound APDUs over TCP or stdin
    Replay {
        file: PathBuf,
        /// Port for the frame listener
        #[arg(short, long)]
        port: Option<u16>,
        /// Read APDUs from stdin instead of listening
        #[arg(long)]
        stdin: bool,
    },
    /// Health check
    Doctor,
    /// Config management
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Show current config
    Show,
    /// Set a config value
    Set { key: String, value: String },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn port_in_use(port: u16) -> bool {
    std::net::TcpStream::connect(("127.0.0.1", port)).is_ok()
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { file, output } => {
            let raw = std::fs::read_to_string(&file)?;
            let (capture, report) = snoopreplay_core::parse_with_report(&raw)?;
            let count = capture.len();
            let json = serde_json::to_string_pretty(&serde_json::json!({
                "report": report,
                "exchanges": capture.exchanges,
            }))?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &json)?;
                    println!("Wrote {} exchanges → {}", count, path.display());
                }
                None => println!("{}", json),
            }
        }
        Commands::Inspect { file } => {
            let raw = std::fs::read_to_string(&file)?;
            let (capture, report) = snoopreplay_core::parse_with_report(&raw)?;
            let cfg = Config::load_or_default();
            let table = ReplayTable::build_with_policy(capture, cfg.emulator.policy);
            let stats = table.stats();
            println!("Capture:     {}", file.display());
            println!("Sessions:    {} ({} skipped)", report.sessions, report.skipped.len());
            for (index, reason) in &report.skipped {
                println!("  - session {}: {}", index, reason);
            }
            println!("Exchanges:   {}", report.exchanges);
            println!("Commands:    {}", stats.commands);
            println!("Policy:      {:?}", table.policy());
            for command in table.commands() {
                let responses = table.responses(command).unwrap_or_default();
                let listed: Vec<&str> = responses.iter().map(Frame::as_str).collect();
                println!("  {} → {}", command, listed.join(", "));
            }
        }
        Commands::Answer { file, apdus } => {
            let cfg = Config::load_or_default();
            let emu = Emulator::new(cfg.emulator.policy, cfg.log.capacity);
            replay::load_file(&emu, &file)?;
            let default_response = cfg.default_response_bytes()?;
            for apdu in apdus {
                match replay::handle_line(&emu, &apdu, &default_response) {
                    replay::Outcome::Frame {
                        command,
                        response,
                        reply,
                        ..
                    } => {
                        let note = if response.is_some() { "" } else { " (default)" };
                        println!("{} → {}{}", command, reply, note);
                    }
                    replay::Outcome::Control(text) => println!("{}", text),
                    replay::Outcome::Ignore => {}
                }
            }
        }
        Commands::Replay { file, port, stdin } => {
            let cfg = Config::load_or_default();
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(replay::run_replay(&cfg, &file, port, stdin))?;
        }
        Commands::Doctor => {
            println!("snoopreplay doctor\n");

            let cfg_path = Config::config_path();
            if cfg_path.exists() {
                match Config::load(&cfg_path) {
                    Ok(_) => println!("  ✓ Config found at {}", cfg_path.display()),
                    Err(e) => println!("  ✗ Config at {} is invalid: {}", cfg_path.display(), e),
                }
            } else {
                println!("  - No config file, using defaults");
            }

            let cfg = Config::load_or_default();
            match cfg.default_response_bytes() {
                Ok(_) => println!("  ✓ Default response {}", cfg.emulator.default_response),
                Err(e) => println!("  ✗ Default response is not hex: {}", e),
            }

            let mark = |used| if used { "● (in use)" } else { "○ (free)" };
            println!("  {} Frame port {}", mark(port_in_use(cfg.emulator.port)), cfg.emulator.port);
            println!("  {} Status port {}", mark(port_in_use(cfg.status.port)), cfg.status.port);
        }
        Commands::Config { action } => match action {
            ConfigCommand::Show => {
                let cfg = Config::load_or_default();
                let toml_str = toml::to_string_pretty(&cfg)?;
                println!("{}", toml_str);
            }
            ConfigCommand::Set { key, value } => {
                let mut cfg = Config::load_or_default();
                cfg.set(&key, &value)?;
                cfg.save(&Config::config_path())?;
                println!("Set {} = {}", key, value);
            }
        },
    }

    Ok(())
}
