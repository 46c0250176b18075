//! Serial endpoints: real devices or a port of the in-process pair

use super::RelaySettings;
use crate::error::HubError;
use null_modem::{NullModem, PortId, ReadStatus};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::Instant;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info, warn};

/// Line speed used for real devices (8N1, no flow control)
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Something a bridge can read from and write to
#[derive(Clone)]
pub enum SerialEndpoint {
    /// Real serial device by path, e.g. `/dev/ttyUSB0` or `COM3`
    Device(String),
    /// One port of the virtual null-modem pair
    Virtual { modem: Arc<NullModem>, port: PortId },
}

impl SerialEndpoint {
    /// Map a user-supplied name to an endpoint
    ///
    /// `VCOM0` and `VCOM1` (any case) name the virtual pair; everything
    /// else is treated as a device path.
    pub fn resolve(name: &str, modem: &Arc<NullModem>) -> Self {
        PortId::ALL
            .into_iter()
            .find(|id| name.eq_ignore_ascii_case(&id.to_string()))
            .map(|port| SerialEndpoint::Virtual {
                modem: Arc::clone(modem),
                port,
            })
            .unwrap_or_else(|| SerialEndpoint::Device(name.to_string()))
    }

    /// Open the endpoint and split it into its two directions
    pub fn open(&self, relay: &RelaySettings) -> Result<(SerialReader, SerialWriter), HubError> {
        match self {
            SerialEndpoint::Device(path) => {
                let stream = tokio_serial::new(path.as_str(), DEFAULT_BAUD_RATE)
                    .data_bits(DataBits::Eight)
                    .parity(Parity::None)
                    .stop_bits(StopBits::One)
                    .flow_control(FlowControl::None)
                    .open_native_async()?;
                info!("Opened {} at {} baud", path, DEFAULT_BAUD_RATE);

                let (reader, writer) = tokio::io::split(stream);
                Ok((SerialReader::Device(reader), SerialWriter::Device(writer)))
            }
            SerialEndpoint::Virtual { modem, port } => {
                modem.open(*port)?;
                Ok((
                    SerialReader::Virtual {
                        modem: Arc::clone(modem),
                        port: *port,
                    },
                    SerialWriter::Virtual {
                        modem: Arc::clone(modem),
                        port: *port,
                        poll_interval: relay.poll_interval,
                        stall_timeout: relay.stall_timeout,
                    },
                ))
            }
        }
    }
}

impl fmt::Display for SerialEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialEndpoint::Device(path) => f.write_str(path),
            SerialEndpoint::Virtual { port, .. } => write!(f, "{}", port),
        }
    }
}

impl fmt::Debug for SerialEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialEndpoint::Device(path) => f.debug_tuple("Device").field(path).finish(),
            SerialEndpoint::Virtual { port, .. } => f.debug_tuple("Virtual").field(port).finish(),
        }
    }
}

/// Receive direction of an open endpoint
pub enum SerialReader {
    Device(ReadHalf<SerialStream>),
    Virtual { modem: Arc<NullModem>, port: PortId },
}

impl SerialReader {
    /// Read at least one byte; `Ok(0)` means the endpoint closed
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, HubError> {
        if buf.is_empty() {
            return Ok(0);
        }

        match self {
            SerialReader::Device(half) => Ok(half.read(buf).await?),
            SerialReader::Virtual { modem, port } => loop {
                let completion = modem.read_async(*port, buf.len()).await?;
                match completion.status {
                    ReadStatus::Cancelled => {
                        debug!("Read on {} cancelled, closing relay", port);
                        return Ok(0);
                    }
                    // Timed out with nothing queued; wait again.
                    ReadStatus::Success if completion.data.is_empty() => continue,
                    ReadStatus::Success => {
                        let n = completion.data.len();
                        buf[..n].copy_from_slice(&completion.data);
                        return Ok(n);
                    }
                }
            },
        }
    }
}

/// Transmit direction of an open endpoint
pub enum SerialWriter {
    Device(WriteHalf<SerialStream>),
    Virtual {
        modem: Arc<NullModem>,
        port: PortId,
        poll_interval: Duration,
        stall_timeout: Duration,
    },
}

impl SerialWriter {
    /// Write all of `data`
    ///
    /// A virtual port accepts only what fits in its peer's queue; the rest
    /// is retried every `poll_interval` while the peer drains it. After
    /// `stall_timeout` without progress the remainder is dropped, the same
    /// way the port itself truncates an overflowing write.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), HubError> {
        match self {
            SerialWriter::Device(half) => {
                half.write_all(data).await?;
                half.flush().await?;
            }
            SerialWriter::Virtual {
                modem,
                port,
                poll_interval,
                stall_timeout,
            } => {
                let mut rest = data;
                let mut deadline = Instant::now() + *stall_timeout;
                loop {
                    let n = modem.write(*port, rest)?;
                    rest = &rest[n..];
                    if rest.is_empty() {
                        break;
                    }
                    if n > 0 {
                        deadline = Instant::now() + *stall_timeout;
                    } else if Instant::now() >= deadline {
                        warn!(
                            "{} peer not draining, dropped {} bytes",
                            port,
                            rest.len()
                        );
                        break;
                    }
                    tokio::time::sleep(*poll_interval).await;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use null_modem::PairConfig;

    fn relay() -> RelaySettings {
        RelaySettings {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resolve_virtual_names() {
        let modem = Arc::new(NullModem::load(PairConfig::default()).unwrap());

        match SerialEndpoint::resolve("vcom1", &modem) {
            SerialEndpoint::Virtual { port, .. } => assert_eq!(port, PortId::B),
            other => panic!("expected virtual endpoint, got {:?}", other),
        }
        assert_eq!(
            SerialEndpoint::resolve("/dev/ttyUSB0", &modem).to_string(),
            "/dev/ttyUSB0"
        );
    }

    #[tokio::test]
    async fn test_virtual_endpoints_cross_wired() {
        let modem = Arc::new(NullModem::load(PairConfig::default()).unwrap());
        let a = SerialEndpoint::resolve("VCOM0", &modem);
        let b = SerialEndpoint::resolve("VCOM1", &modem);
        let (_, mut a_tx) = a.open(&relay()).unwrap();
        let (mut b_rx, _) = b.open(&relay()).unwrap();

        a_tx.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 16];
        let n = b_rx.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[tokio::test(start_paused = true)]
    async fn test_virtual_write_waits_for_room() {
        let config = PairConfig {
            buffer_capacity: 4,
            ..Default::default()
        };
        let modem = Arc::new(NullModem::load(config).unwrap());
        let (_, mut a_tx) = SerialEndpoint::resolve("VCOM0", &modem)
            .open(&relay())
            .unwrap();
        let (mut b_rx, _) = SerialEndpoint::resolve("VCOM1", &modem)
            .open(&relay())
            .unwrap();

        let writer = tokio::spawn(async move { a_tx.write_all(b"abcdefgh").await });

        let mut received = Vec::new();
        let mut buf = [0u8; 4];
        while received.len() < 8 {
            let n = b_rx.read(&mut buf).await.unwrap();
            received.extend_from_slice(&buf[..n]);
        }

        writer.await.unwrap().unwrap();
        assert_eq!(received, b"abcdefgh");
    }

    #[tokio::test(start_paused = true)]
    async fn test_virtual_write_gives_up_when_peer_stalls() {
        let config = PairConfig {
            buffer_capacity: 4,
            ..Default::default()
        };
        let modem = Arc::new(NullModem::load(config).unwrap());
        let settings = RelaySettings {
            poll_interval: Duration::from_millis(10),
            stall_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let (_, mut a_tx) = SerialEndpoint::resolve("VCOM0", &modem)
            .open(&settings)
            .unwrap();

        let started = Instant::now();
        a_tx.write_all(b"abcdefgh").await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(modem.port(PortId::B).unwrap().rx().available(), 4);
        assert_eq!(modem.stats(PortId::A).unwrap().bytes_written, 4);
    }
}
