use snoopreplay_core::{Frame, ParseReport};
use std::io::{self, Write};

pub fn write_startup(
    out: &mut dyn Write,
    capture: &str,
    report: &ParseReport,
    listen: Option<u16>,
    status: Option<u16>,
) -> io::Result<()> {
    writeln!(out, "\n  snoopreplay — NFC snoop log replay\n")?;
    writeln!(out, "  ✓ Capture   {}", capture)?;
    writeln!(
        out,
        "  ✓ Sessions  {} accepted, {} skipped ({} exchanges)",
        report.accepted,
        report.skipped.len(),
        report.exchanges
    )?;
    for (index, reason) in &report.skipped {
        writeln!(out, "      - session {}: {}", index, reason)?;
    }
    match listen {
        Some(port) => writeln!(out, "  ✓ Frames    tcp://127.0.0.1:{} (one hex APDU per line)", port)?,
        None => writeln!(out, "  ✓ Frames    stdin (one hex APDU per line)")?,
    }
    if let Some(port) = status {
        writeln!(out, "  ✓ Status    http://localhost:{}/api/status", port)?;
    }
    writeln!(out, "\n  Line commands: :load <path>  :reset  :status\n")
}

/// One line per answered frame; `response` is `None` when the default was sent.
pub fn write_exchange(
    out: &mut dyn Write,
    seq: u64,
    command: &Frame,
    response: Option<&Frame>,
    colors: bool,
) -> io::Result<()> {
    let now = chrono::Local::now().format("%H:%M:%S");
    let (mark, response) = match response {
        Some(r) if colors => ("\x1b[32m●\x1b[0m", r.to_string()),
        Some(r) => ("●", r.to_string()),
        None if colors => ("\x1b[31m○\x1b[0m", "(default)".to_string()),
        None => ("○", "(default)".to_string()),
    };
    writeln!(out, "[{}] {} #{} | {} → {}", now, mark, seq, command, response)
}
