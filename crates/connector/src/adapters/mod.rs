//! Typed facades over [`Connector`](crate::Connector).
//!
//! Each adapter owns one connector and exposes domain operations, all of
//! which go through [`Connector::execute`](crate::Connector::execute) so that
//! fatal errors are always seen by the broken predicate.

pub mod device;
#[cfg(feature = "tcp")]
pub mod tcp;

use std::io;
use std::sync::LazyLock;

use regex::Regex;

pub use device::{ControlLine, Port, PortOpener, PortSettings, SerialDevice};
#[cfg(feature = "tcp")]
pub use tcp::{SelfHealingTcp, TcpFactory};

static FAILED_MESSAGE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new("(?i)failed").ok());

/// Whether an I/O error message reports a failure (`"... failed ..."`).
///
/// Drivers that surface disconnection only through error text (serial
/// bridges, some USB stacks) are caught by this.
pub fn message_reports_failure(error: &io::Error) -> bool {
    FAILED_MESSAGE
        .as_ref()
        .is_some_and(|regex| regex.is_match(&error.to_string()))
}
