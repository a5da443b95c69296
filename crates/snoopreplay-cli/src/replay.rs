use snoopreplay_core::{Emulator, Frame, LogEntry, ParseReport};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::banner;
use crate::config::Config;
use crate::status_server;

/// One line of the frame protocol.
#[derive(Debug, PartialEq, Eq)]
pub enum Request {
    Apdu(Vec<u8>),
    Load(PathBuf),
    Reset,
    Status,
    Ignore,
    /// Unparseable line; the text is the error reply.
    Invalid(String),
}

/// Result of handling one input line.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// An inbound frame was answered; `reply` is the hex sent back.
    Frame {
        seq: u64,
        command: Frame,
        /// `None` when the default response was sent.
        response: Option<Frame>,
        reply: String,
    },
    /// A `:` control command; the text is sent back as-is.
    Control(String),
    Ignore,
}

fn capture_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read a capture file and install it, naming it after the file.
pub fn load_file(emu: &Emulator, path: &Path) -> anyhow::Result<ParseReport> {
    let raw = std::fs::read_to_string(path)?;
    Ok(emu.load(capture_name(path), &raw)?)
}

pub async fn load_file_async(emu: &Emulator, path: &Path) -> anyhow::Result<ParseReport> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(emu.load(capture_name(path), &raw)?)
}

fn load_reply(result: anyhow::Result<ParseReport>) -> Outcome {
    Outcome::Control(match result {
        Ok(report) => format!(
            "OK {} exchanges, {} sessions skipped",
            report.exchanges,
            report.skipped.len()
        ),
        Err(e) => format!("ERR {}", e),
    })
}

pub fn parse_line(line: &str) -> Request {
    let line = line.trim();
    if line.is_empty() {
        return Request::Ignore;
    }

    if let Some(control) = line.strip_prefix(':') {
        let (cmd, arg) = control
            .split_once(char::is_whitespace)
            .map(|(c, a)| (c, a.trim()))
            .unwrap_or((control, ""));
        return match cmd {
            "reset" => Request::Reset,
            "status" => Request::Status,
            "load" if !arg.is_empty() => Request::Load(PathBuf::from(arg)),
            "load" => Request::Invalid("ERR usage: :load <path>".to_string()),
            other => Request::Invalid(format!("ERR unknown command :{}", other)),
        };
    }

    match hex::decode(Frame::new(line).as_str()) {
        Ok(bytes) => Request::Apdu(bytes),
        Err(e) => Request::Invalid(format!("ERR invalid APDU: {}", e)),
    }
}

/// Answer everything except `:load`, whose file read the caller owns.
fn respond(emu: &Emulator, request: Request, default_response: &[u8]) -> Outcome {
    match request {
        Request::Apdu(apdu) => answer(emu, &apdu, default_response),
        Request::Reset => {
            emu.reset();
            Outcome::Control("OK reset".to_string())
        }
        Request::Status => Outcome::Control(
            serde_json::to_string(&emu.snapshot()).unwrap_or_else(|e| format!("ERR {}", e)),
        ),
        Request::Invalid(text) => Outcome::Control(text),
        Request::Ignore => Outcome::Ignore,
        Request::Load(path) => load_reply(load_file(emu, &path)),
    }
}

fn answer(emu: &Emulator, apdu: &[u8], default_response: &[u8]) -> Outcome {
    let LogEntry {
        seq,
        command,
        response,
    } = emu.exchange_apdu(apdu);
    let served = response.and_then(|r| match r.to_bytes() {
        Ok(bytes) => Some((r, hex::encode_upper(bytes))),
        Err(_) => {
            tracing::error!(%command, response = %r, "recorded response is not hex; sending default");
            None
        }
    });
    let (response, reply) = match served {
        Some((r, hex)) => (Some(r), hex),
        None => (None, hex::encode_upper(default_response)),
    };
    Outcome::Frame {
        seq,
        command,
        response,
        reply,
    }
}

/// Handle one line of the frame protocol: a hex APDU or a `:` command.
pub fn handle_line(emu: &Emulator, line: &str, default_response: &[u8]) -> Outcome {
    respond(emu, parse_line(line), default_response)
}

/// Serve lines from `reader`, writing one reply line per input line to
/// `writer` and one display line per answered frame to `echo`.
async fn serve_lines<R, W>(
    emu: &Emulator,
    reader: R,
    mut writer: W,
    echo: &mut (dyn Write + Send),
    default_response: &[u8],
    colors: bool,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let outcome = match parse_line(&line) {
            Request::Load(path) => load_reply(load_file_async(emu, &path).await),
            request => respond(emu, request, default_response),
        };
        let reply = match outcome {
            Outcome::Frame {
                seq,
                command,
                response,
                reply,
            } => {
                banner::write_exchange(&mut *echo, seq, &command, response.as_ref(), colors)?;
                reply
            }
            Outcome::Control(text) => text,
            Outcome::Ignore => continue,
        };
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

pub async fn run_replay(cfg: &Config, file: &Path, port: Option<u16>, stdin: bool) -> anyhow::Result<()> {
    let default_response = cfg.default_response_bytes()?;
    let emu = Arc::new(Emulator::new(cfg.emulator.policy, cfg.log.capacity));
    let report = load_file_async(&emu, file).await?;

    let status_port = cfg.status.enabled.then_some(cfg.status.port);
    if let Some(port) = status_port {
        let status_emu = emu.clone();
        tokio::spawn(async move {
            if let Err(e) = status_server::start(status_emu, port).await {
                eprintln!("Status server error: {}", e);
            }
        });
    }

    let port = port.unwrap_or(cfg.emulator.port);
    let colors = cfg.display.colors;
    let capture = file.display().to_string();

    if stdin {
        // stdout carries replies only
        let mut echo = std::io::stderr();
        banner::write_startup(&mut echo, &capture, &report, None, status_port)?;
        let reader = BufReader::new(tokio::io::stdin());
        return serve_lines(&emu, reader, tokio::io::stdout(), &mut echo, &default_response, colors)
            .await;
    }

    banner::write_startup(&mut std::io::stdout(), &capture, &report, Some(port), status_port)?;

    // Bind to localhost only
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::info!(%peer, "reader connected");
        let emu = emu.clone();
        let default_response = default_response.clone();
        tokio::spawn(async move {
            let (rd, wr) = socket.into_split();
            let mut echo = std::io::stdout();
            let served =
                serve_lines(&emu, BufReader::new(rd), wr, &mut echo, &default_response, colors).await;
            if let Err(e) = served {
                tracing::warn!(%peer, error = %e, "connection closed with error");
            }
            tracing::info!(%peer, "reader disconnected");
        });
    }
}
