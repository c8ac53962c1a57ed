//! Self-healing serial-style device.
//!
//! The byte-level driver is supplied through [`Port`] and [`PortOpener`];
//! this module only adds reconnection. USB-to-serial adapters often come
//! back under a different device path after being replugged, so the path is
//! looked up again through a [`PathLocator`] on every (re)open.

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigBuilder, Settings};
use crate::connector::Connector;
use crate::error::{ConfigError, ListenerError, Result};
use crate::factory::Factory;
use crate::notifier::{StateChange, Subscription};
use crate::state::ConnectorState;

/// Whether an I/O error means the device is gone.
pub fn is_device_broken(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected
    ) || super::message_reports_failure(error)
}

// ---------------------------------------------------------------------------
// Port contract
// ---------------------------------------------------------------------------

/// Modem control lines that can be driven on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ControlLine {
    /// Request To Send
    Rts,
    /// Data Terminal Ready
    Dtr,
    /// Break condition on TX
    Break,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Line settings applied on every open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PortSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: u8,
    /// Stop bits
    pub stop_bits: u8,
    /// Parity
    pub parity: Parity,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

/// An open port.
pub trait Port: Send + Sync + 'static {
    /// Read into `buf`, returning the number of bytes read.
    fn read(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Write all of `data`.
    fn write(&self, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Drive a control line.
    fn set_control_line(
        &self,
        line: ControlLine,
        on: bool,
    ) -> impl Future<Output = io::Result<()>> + Send;

    /// Release the port.
    fn close(&self) -> impl Future<Output = io::Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Opens ports by path.
pub trait PortOpener: Send + Sync + 'static {
    /// The port type produced.
    type Port: Port;

    /// Open the port at `path` with `settings`.
    fn open(
        &self,
        path: &str,
        settings: &PortSettings,
    ) -> impl Future<Output = io::Result<Self::Port>> + Send;
}

/// Resolves the device path to open.
#[derive(Clone)]
pub struct PathLocator(Arc<dyn Fn() -> io::Result<String> + Send + Sync>);

impl PathLocator {
    /// Always the same path.
    pub fn fixed(path: impl Into<String>) -> Self {
        let path = path.into();
        Self(Arc::new(move || Ok(path.clone())))
    }

    /// Path computed on each open, e.g. by scanning for a USB serial number.
    pub fn from_fn<L>(locate: L) -> Self
    where
        L: Fn() -> io::Result<String> + Send + Sync + 'static,
    {
        Self(Arc::new(locate))
    }

    fn locate(&self) -> io::Result<String> {
        (self.0)()
    }
}

impl fmt::Debug for PathLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathLocator").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// DeviceFactory
// ---------------------------------------------------------------------------

/// An open port together with the path it was opened at.
#[derive(Debug)]
pub struct OpenPort<P> {
    port: P,
    path: String,
}

impl<P> OpenPort<P> {
    /// Path the port was opened at.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// [`Factory`] that locates and opens a port.
#[derive(Debug)]
pub struct DeviceFactory<O> {
    opener: O,
    locator: PathLocator,
    settings: PortSettings,
}

impl<O: PortOpener> Factory for DeviceFactory<O> {
    type Resource = OpenPort<O::Port>;
    type Error = io::Error;

    async fn connect(&self) -> io::Result<OpenPort<O::Port>> {
        let path = self.locator.locate()?;
        let port = self.opener.open(&path, &self.settings).await?;
        Ok(OpenPort { port, path })
    }

    async fn disconnect(&self, resource: Arc<OpenPort<O::Port>>) -> io::Result<()> {
        resource.port.close().await
    }

    fn describe(&self, resource: &OpenPort<O::Port>) -> String {
        resource.path.clone()
    }
}

// ---------------------------------------------------------------------------
// SerialDevice
// ---------------------------------------------------------------------------

/// Builder for [`SerialDevice`].
pub struct DeviceBuilder<O> {
    factory: DeviceFactory<O>,
    config: ConfigBuilder<io::Error>,
}

impl<O: PortOpener> DeviceBuilder<O> {
    /// Line settings applied on each open.
    pub fn port_settings(mut self, settings: PortSettings) -> Self {
        self.factory.settings = settings;
        self
    }

    /// Wait between reopen attempts.
    pub fn fix_retry_delay(mut self, delay: Duration) -> Self {
        self.config = self.config.fix_retry_delay(delay);
        self
    }

    /// Wait before the first reopen attempt.
    pub fn recovery_delay(mut self, delay: Duration) -> Self {
        self.config = self.config.recovery_delay(delay);
        self
    }

    /// Replace the default [`is_device_broken`] predicate.
    pub fn broken_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&io::Error) -> bool + Send + Sync + 'static,
    {
        self.config = self.config.broken_predicate(predicate);
        self
    }

    /// Apply externally loaded delay settings.
    pub fn settings(mut self, settings: &Settings) -> std::result::Result<Self, ConfigError> {
        self.config = self.config.apply(settings)?;
        Ok(self)
    }

    /// Create the device. Must be called inside a tokio runtime.
    pub fn build(self) -> SerialDevice<O> {
        SerialDevice {
            connector: Connector::new(self.factory, self.config.build()),
        }
    }
}

/// Serial-style device that reopens itself after being unplugged.
pub struct SerialDevice<O: PortOpener> {
    connector: Connector<DeviceFactory<O>>,
}

impl<O: PortOpener> SerialDevice<O> {
    /// Start building a device opened by `opener` at the path `locator` yields.
    pub fn builder(opener: O, locator: PathLocator) -> DeviceBuilder<O> {
        DeviceBuilder {
            factory: DeviceFactory {
                opener,
                locator,
                settings: PortSettings::default(),
            },
            config: Config::builder().broken_predicate(is_device_broken),
        }
    }

    /// Open for the first time; on failure reopening continues in the
    /// background.
    pub async fn connect(&self) -> Result<(), io::Error> {
        self.connector.connect().await
    }

    /// Read into `buf`, returning the number of bytes read.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, io::Error> {
        self.connector
            .execute(|open| async move { open.port.read(buf).await })
            .await
    }

    /// Write all of `data`.
    pub async fn write(&self, data: &[u8]) -> Result<(), io::Error> {
        self.connector
            .run(|open| async move { open.port.write(data).await })
            .await
    }

    /// Drive a control line.
    pub async fn set_control_line(&self, line: ControlLine, on: bool) -> Result<(), io::Error> {
        self.connector
            .run(|open| async move { open.port.set_control_line(line, on).await })
            .await
    }

    /// Set or clear RTS.
    pub async fn set_rts(&self, on: bool) -> Result<(), io::Error> {
        self.set_control_line(ControlLine::Rts, on).await
    }

    /// Set or clear DTR.
    pub async fn set_dtr(&self, on: bool) -> Result<(), io::Error> {
        self.set_control_line(ControlLine::Dtr, on).await
    }

    /// Start or stop a break condition.
    pub async fn set_break(&self, on: bool) -> Result<(), io::Error> {
        self.set_control_line(ControlLine::Break, on).await
    }

    /// Path of the currently open port.
    pub async fn path(&self) -> Result<String, io::Error> {
        self.connector
            .execute(|open| async move { Ok(open.path().to_string()) })
            .await
    }

    /// Force a reopen.
    pub async fn mark_broken(&self) -> Result<(), io::Error> {
        self.connector.mark_broken().await
    }

    /// Register a state-change listener. Listeners must not block; see
    /// [`Connector::subscribe`].
    pub fn subscribe<L>(&self, listener: L) -> Result<Subscription, io::Error>
    where
        L: Fn(StateChange) -> std::result::Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.connector.subscribe(listener)
    }

    /// Current connector state.
    pub fn state(&self) -> ConnectorState {
        self.connector.state()
    }

    /// Close the device and stop reopening.
    pub async fn close(&self) {
        self.connector.close().await;
    }

    /// The underlying connector.
    pub fn connector(&self) -> &Connector<DeviceFactory<O>> {
        &self.connector
    }
}

impl<O: PortOpener> fmt::Debug for SerialDevice<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialDevice")
            .field("connector", &self.connector)
            .finish()
    }
}
