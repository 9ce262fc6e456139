//! Register-level access to an SPI sensor.

use std::{
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};
use thiserror::Error;

/// Full-duplex register bus. Owned by exactly one driver at a time.
pub trait RegisterBus: Send + 'static {
    /// Clocks out `tx` and returns the bytes clocked in, same length.
    fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>, BusError>;

    fn write(&mut self, tx: &[u8]) -> Result<(), BusError>;
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("pigpio daemon is not running at {address}")]
    DaemonNotRunning { address: String },
    #[error("failed to connect to pigpio daemon at {address}")]
    ConnectionFailed {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to open SPI channel {channel} (pigpio error {code})")]
    SpiOpenFailed { channel: u32, code: i32 },
    #[error("SPI transfer failed (pigpio error {code})")]
    Transfer { code: i32 },
    #[error("short SPI transfer: sent {sent} bytes, got {received}")]
    ShortTransfer { sent: usize, received: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

// pigpio socket command numbers
const CMD_SPIO: u32 = 71;
const CMD_SPIC: u32 = 72;
const CMD_SPIW: u32 = 74;
const CMD_SPIX: u32 = 75;

/// SPI mode 3, the ADXL345's clock polarity and phase.
const SPI_MODE_3: u32 = 3;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(2);

/// SPI through the pigpio daemon's socket interface.
///
/// Every request is four little-endian `u32`s (`cmd`, `p1`, `p2`, `p3`)
/// optionally followed by `p3` bytes of payload; the reply echoes the
/// header with the result in place of `p3`, followed by any read data.
pub struct PigpioBus {
    stream: TcpStream,
    handle: u32,
}

impl PigpioBus {
    pub fn open(address: &str, channel: u32, baud: u32) -> Result<Self, BusError> {
        let addr = address
            .to_socket_addrs()
            .map_err(|source| BusError::ConnectionFailed {
                address: address.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| BusError::ConnectionFailed {
                address: address.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "address did not resolve"),
            })?;

        let stream = match TcpStream::connect_timeout(&addr, SOCKET_TIMEOUT) {
            Ok(stream) => stream,
            Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
                return Err(BusError::DaemonNotRunning {
                    address: address.to_string(),
                });
            }
            Err(source) => {
                return Err(BusError::ConnectionFailed {
                    address: address.to_string(),
                    source,
                });
            }
        };
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;

        let mut bus = Self { stream, handle: 0 };
        let code = bus.command(CMD_SPIO, channel, baud, &SPI_MODE_3.to_le_bytes())?;
        if code < 0 {
            return Err(BusError::SpiOpenFailed { channel, code });
        }
        bus.handle = code as u32;
        tracing::debug!(channel, baud, handle = bus.handle, "opened SPI through pigpio");
        Ok(bus)
    }

    fn command(&mut self, cmd: u32, p1: u32, p2: u32, payload: &[u8]) -> Result<i32, BusError> {
        let mut request = Vec::with_capacity(16 + payload.len());
        for word in [cmd, p1, p2, payload.len() as u32] {
            request.extend_from_slice(&word.to_le_bytes());
        }
        request.extend_from_slice(payload);
        self.stream.write_all(&request)?;

        let mut reply = [0u8; 16];
        self.stream.read_exact(&mut reply)?;
        Ok(i32::from_le_bytes([reply[12], reply[13], reply[14], reply[15]]))
    }
}

impl RegisterBus for PigpioBus {
    fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>, BusError> {
        let code = self.command(CMD_SPIX, self.handle, 0, tx)?;
        if code < 0 {
            return Err(BusError::Transfer { code });
        }
        let mut rx = vec![0u8; code as usize];
        self.stream.read_exact(&mut rx)?;
        if rx.len() != tx.len() {
            return Err(BusError::ShortTransfer {
                sent: tx.len(),
                received: rx.len(),
            });
        }
        Ok(rx)
    }

    fn write(&mut self, tx: &[u8]) -> Result<(), BusError> {
        let code = self.command(CMD_SPIW, self.handle, 0, tx)?;
        if code < 0 {
            return Err(BusError::Transfer { code });
        }
        Ok(())
    }
}

impl Drop for PigpioBus {
    fn drop(&mut self) {
        if let Err(err) = self.command(CMD_SPIC, self.handle, 0, &[]) {
            tracing::debug!(%err, "failed to close SPI handle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{net::TcpListener, thread};

    fn read_request(stream: &mut TcpStream) -> ([u32; 4], Vec<u8>) {
        let mut header = [0u8; 16];
        stream.read_exact(&mut header).unwrap();
        let word = |i: usize| u32::from_le_bytes(header[i * 4..i * 4 + 4].try_into().unwrap());
        let words = [word(0), word(1), word(2), word(3)];
        let mut payload = vec![0u8; words[3] as usize];
        stream.read_exact(&mut payload).unwrap();
        (words, payload)
    }

    fn reply(stream: &mut TcpStream, words: [u32; 4], result: i32, data: &[u8]) {
        let mut out = Vec::new();
        for w in &words[..3] {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out.extend_from_slice(&result.to_le_bytes());
        out.extend_from_slice(data);
        stream.write_all(&out).unwrap();
    }

    #[test]
    fn speaks_the_daemon_socket_protocol() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let daemon = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let (open, flags) = read_request(&mut stream);
            assert_eq!(open[..3], [CMD_SPIO, 0, 4_000_000]);
            assert_eq!(flags, 3u32.to_le_bytes());
            reply(&mut stream, open, 7, &[]);

            let (xfer, tx) = read_request(&mut stream);
            assert_eq!(xfer[..2], [CMD_SPIX, 7]);
            assert_eq!(tx, [0xB9, 0xFF]);
            reply(&mut stream, xfer, 2, &[0x00, 0x10]);

            let (write, tx) = read_request(&mut stream);
            assert_eq!(write[0], CMD_SPIW);
            assert_eq!(tx, [0x2D, 0x08]);
            reply(&mut stream, write, 0, &[]);

            let (close, _) = read_request(&mut stream);
            assert_eq!(close[..2], [CMD_SPIC, 7]);
            reply(&mut stream, close, 0, &[]);
        });

        let mut bus = PigpioBus::open(&address, 0, 4_000_000).unwrap();
        assert_eq!(bus.transfer(&[0xB9, 0xFF]).unwrap(), vec![0x00, 0x10]);
        bus.write(&[0x2D, 0x08]).unwrap();
        drop(bus);
        daemon.join().unwrap();
    }

    #[test]
    fn refused_connection_means_no_daemon() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(matches!(
            PigpioBus::open(&address, 0, 4_000_000),
            Err(BusError::DaemonNotRunning { .. })
        ));
    }
}
