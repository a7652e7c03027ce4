//! Serial port byte channel.
//!
//! [`SerialChannel`] implements [`ByteChannel`] over a host serial port
//! (the UART side of the bridge). A dedicated reader thread polls the port
//! and pushes every chunk to the link layer's data callback; read failures
//! are reported through the status callback as
//! [`StatusEvent::IoResourcesUnavailable`](crate::core::StatusEvent::IoResourcesUnavailable).

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_SERIAL_READ_TIMEOUT, SERIAL_READ_CHUNK,
};
use crate::core::{
    ByteChannel, ChannelError, DataHandler, LogHandler, LogSeverity, StatusEvent, StatusHandler,
};

/// Flow control modes supported by the peer firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// RTS/CTS hardware flow control.
    Hardware,
}

/// Parity modes supported by the peer firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Even parity.
    Even,
}

/// Stop bit settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// One stop bit.
    #[default]
    One,
    /// Two stop bits.
    Two,
}

/// Serial line parameters. Data bits are fixed at eight.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    /// Device path (`/dev/ttyACM0`, `COM3`, ...).
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Flow control mode.
    pub flow_control: FlowControl,
    /// Parity mode.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Blocking-read timeout of the reader thread; bounds close latency.
    pub read_timeout: Duration,
}

impl SerialSettings {
    /// Settings for `port_name` at `baud_rate`, defaults everywhere else.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            flow_control: FlowControl::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            read_timeout: DEFAULT_SERIAL_READ_TIMEOUT,
        }
    }

    /// Set the flow control mode.
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    /// Set the parity mode.
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set the stop bits.
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    /// Set the reader thread's blocking-read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self::new("/dev/ttyACM0", DEFAULT_BAUD_RATE)
    }
}

fn map_flow_control(flow_control: FlowControl) -> serialport::FlowControl {
    match flow_control {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::Hardware => serialport::FlowControl::Hardware,
    }
}

fn map_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
    }
}

fn map_stop_bits(stop_bits: StopBits) -> serialport::StopBits {
    match stop_bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

/// A [`ByteChannel`] over a host serial port.
pub struct SerialChannel {
    settings: SerialSettings,
    port: Option<Box<dyn serialport::SerialPort>>,
    reader: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl SerialChannel {
    /// Create a channel for `settings`. The port is opened by
    /// [`ByteChannel::open`].
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
            reader: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The configured settings.
    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }
}

impl ByteChannel for SerialChannel {
    fn open(
        &mut self,
        mut on_data: DataHandler,
        on_status: StatusHandler,
        on_log: LogHandler,
    ) -> Result<(), ChannelError> {
        if self.port.is_some() {
            return Err(ChannelError::AlreadyOpen);
        }

        let port = serialport::new(&self.settings.port_name, self.settings.baud_rate)
            .flow_control(map_flow_control(self.settings.flow_control))
            .parity(map_parity(self.settings.parity))
            .stop_bits(map_stop_bits(self.settings.stop_bits))
            .timeout(self.settings.read_timeout)
            .open()
            .map_err(|open_error| ChannelError::Endpoint(open_error.to_string()))?;

        let mut reader_port = port
            .try_clone()
            .map_err(|clone_error| ChannelError::Endpoint(clone_error.to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = Arc::clone(&stop);
        let port_name = self.settings.port_name.clone();
        let reader_on_log = Arc::clone(&on_log);

        let reader = thread::Builder::new()
            .name("sdrpc-serial".into())
            .spawn(move || {
                let mut buffer = [0u8; SERIAL_READ_CHUNK];
                while !reader_stop.load(Ordering::Relaxed) {
                    match reader_port.read(&mut buffer) {
                        Ok(0) => {}
                        Ok(n) => on_data(&buffer[..n]),
                        Err(read_error)
                            if matches!(
                                read_error.kind(),
                                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
                            ) => {}
                        Err(read_error) => {
                            reader_on_log(
                                LogSeverity::Error,
                                &format!("read from {port_name} failed: {read_error}"),
                            );
                            on_status(
                                StatusEvent::IoResourcesUnavailable,
                                &format!("serial port {port_name} unavailable"),
                            );
                            break;
                        }
                    }
                }
            })
            .map_err(ChannelError::Io)?;

        on_log(
            LogSeverity::Info,
            &format!(
                "opened {} at {} baud",
                self.settings.port_name, self.settings.baud_rate
            ),
        );

        self.port = Some(port);
        self.reader = Some(reader);
        self.stop = stop;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let port = self.port.as_mut().ok_or(ChannelError::NotOpen)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        self.port = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = SerialSettings::new("/dev/ttyUSB0", 115_200);
        assert_eq!(settings.port_name, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.flow_control, FlowControl::None);
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.stop_bits, StopBits::One);
    }

    #[test]
    fn test_settings_builder() {
        let settings = SerialSettings::new("COM3", 1_000_000)
            .flow_control(FlowControl::Hardware)
            .parity(Parity::Even)
            .stop_bits(StopBits::Two)
            .read_timeout(Duration::from_millis(50));
        assert_eq!(settings.flow_control, FlowControl::Hardware);
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.stop_bits, StopBits::Two);
        assert_eq!(settings.read_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_send_requires_open_port() {
        let mut channel = SerialChannel::new(SerialSettings::default());
        assert!(matches!(
            channel.send(&[1, 2, 3]),
            Err(ChannelError::NotOpen)
        ));
    }

    #[test]
    fn test_close_without_open_is_harmless() {
        let mut channel = SerialChannel::new(SerialSettings::default());
        channel.close().unwrap();
    }
}
