pub mod capture;
pub mod emulator;
pub mod error;
pub mod frame;
pub mod table;

pub use capture::{parse, parse_with_report, Capture, ParseReport, SkipReason};
pub use emulator::{Emulator, LogEntry, StatusSnapshot};
pub use error::{Error, Result};
pub use frame::{normalize, Exchange, Frame};
pub use table::{ExhaustionPolicy, ReplayTable, TableStats};
