//! Telnet transport for instance consoles.
//!
//! The orchestration system exposes each instance's serial console as a
//! telnet port on the hypervisor. We do not negotiate any option: every
//! `DO`/`WILL` is refused, which leaves a plain byte stream in both
//! directions. Command sequences are stripped from the received data.

use super::Transport;
use crate::error::{HarnessError, Result};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;
const NUL: u8 = 0;
const XON: u8 = 0x11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DecodeState {
    #[default]
    Data,
    Iac,
    /// Saw `IAC <verb>`, the option byte comes next.
    Negotiate(u8),
    Subnegotiation,
    SubnegotiationIac,
}

/// Incremental telnet stream decoder.
///
/// Sequences may be split across reads, so state carries over between
/// calls to [`TelnetDecoder::feed`].
#[derive(Debug, Default)]
pub struct TelnetDecoder {
    state: DecodeState,
}

impl TelnetDecoder {
    /// Decode `input`, appending payload bytes to `data` and any refusals we
    /// owe the peer to `replies`.
    pub fn feed(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            self.state = match self.state {
                DecodeState::Data => match byte {
                    IAC => DecodeState::Iac,
                    NUL | XON => DecodeState::Data,
                    _ => {
                        data.push(byte);
                        DecodeState::Data
                    }
                },
                DecodeState::Iac => match byte {
                    IAC => {
                        data.push(IAC);
                        DecodeState::Data
                    }
                    DO | DONT | WILL | WONT => DecodeState::Negotiate(byte),
                    SB => DecodeState::Subnegotiation,
                    // NOP, GA, AYT and friends carry nothing for us
                    _ => DecodeState::Data,
                },
                DecodeState::Negotiate(verb) => {
                    let answer = if verb == DO || verb == DONT { WONT } else { DONT };
                    replies.extend_from_slice(&[IAC, answer, byte]);
                    DecodeState::Data
                }
                DecodeState::Subnegotiation => match byte {
                    IAC => DecodeState::SubnegotiationIac,
                    _ => DecodeState::Subnegotiation,
                },
                DecodeState::SubnegotiationIac => match byte {
                    SE => DecodeState::Data,
                    _ => DecodeState::Subnegotiation,
                },
            };
        }
    }
}

/// Double every 0xFF so the peer reads it as data.
pub fn escape_iac(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
    out
}

/// A connected telnet console.
///
/// A background thread reads the socket, answers negotiation and forwards
/// decoded data over a channel, so [`Transport::read_eager`] never blocks.
/// Both directions of writes go through one lock, so a refusal never lands
/// in the middle of typed input.
pub struct TelnetTransport {
    stream: TcpStream,
    writer: Arc<Mutex<TcpStream>>,
    rx: Receiver<Vec<u8>>,
    peer: String,
}

impl TelnetTransport {
    /// Connect to `host:port`, trying every resolved address.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let candidates = (host, port)
            .to_socket_addrs()
            .map_err(|source| HarnessError::Connection {
                addr: addr.clone(),
                source,
            })?;

        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => return Self::from_stream(stream, addr),
                Err(e) => {
                    debug!(%candidate, error = %e, "console connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(HarnessError::Connection {
            addr,
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")),
        })
    }

    /// Wrap an already connected socket.
    pub fn from_stream(stream: TcpStream, peer: String) -> Result<Self> {
        let reader = stream.try_clone()?;
        let writer = Arc::new(Mutex::new(stream.try_clone()?));
        let replies = Arc::clone(&writer);

        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name(format!("console-{}", peer))
            .spawn(move || Self::reader_thread(reader, replies, tx))?;

        debug!(%peer, "console connected");
        Ok(Self {
            stream,
            writer,
            rx,
            peer,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn reader_thread(mut reader: TcpStream, replies: Arc<Mutex<TcpStream>>, tx: Sender<Vec<u8>>) {
        let mut decoder = TelnetDecoder::default();
        let mut buf = [0u8; 4096];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "console read failed");
                    break;
                }
            };

            let mut data = Vec::with_capacity(n);
            let mut reply = Vec::new();
            decoder.feed(&buf[..n], &mut data, &mut reply);

            if !reply.is_empty() {
                let mut out = replies.lock().unwrap_or_else(PoisonError::into_inner);
                if out.write_all(&reply).is_err() {
                    break;
                }
            }
            if !data.is_empty() && tx.send(data).is_err() {
                break;
            }
        }
    }
}

impl Transport for TelnetTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let escaped = escape_iac(bytes);
        let mut out = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(&escaped)?;
        out.flush()?;
        Ok(())
    }

    fn read_eager(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => out.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => return Ok(out),
                Err(TryRecvError::Disconnected) => {
                    if out.is_empty() {
                        return Err(HarnessError::Transport(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("console {} closed the connection", self.peer),
                        )));
                    }
                    return Ok(out);
                }
            }
        }
    }
}

impl Drop for TelnetTransport {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Instant;

    fn decode(input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut decoder = TelnetDecoder::default();
        let (mut data, mut replies) = (Vec::new(), Vec::new());
        decoder.feed(input, &mut data, &mut replies);
        (data, replies)
    }

    #[test]
    fn plain_data_passes_through() {
        let (data, replies) = decode(b"ubuntu login: ");
        assert_eq!(data, b"ubuntu login: ");
        assert!(replies.is_empty());
    }

    #[test]
    fn refuses_every_option() {
        let (data, replies) = decode(&[IAC, DO, 24, b'a', IAC, WILL, 1, IAC, DONT, 3, IAC, WONT, 5]);
        assert_eq!(data, b"a");
        assert_eq!(
            replies,
            vec![IAC, WONT, 24, IAC, DONT, 1, IAC, WONT, 3, IAC, DONT, 5]
        );
    }

    #[test]
    fn escaped_iac_and_dropped_bytes() {
        let (data, _) = decode(&[b'x', IAC, IAC, NUL, XON, b'y']);
        assert_eq!(data, vec![b'x', IAC, b'y']);
    }

    #[test]
    fn subnegotiation_is_skipped() {
        let (data, replies) = decode(&[b'a', IAC, SB, 24, 1, IAC, IAC, IAC, SE, b'b']);
        assert_eq!(data, b"ab");
        assert!(replies.is_empty());
    }

    #[test]
    fn sequences_split_across_reads() {
        let mut decoder = TelnetDecoder::default();
        let (mut data, mut replies) = (Vec::new(), Vec::new());
        decoder.feed(&[b'a', IAC], &mut data, &mut replies);
        decoder.feed(&[DO], &mut data, &mut replies);
        decoder.feed(&[31, b'b'], &mut data, &mut replies);
        assert_eq!(data, b"ab");
        assert_eq!(replies, vec![IAC, WONT, 31]);
    }

    #[test]
    fn escape_doubles_iac() {
        assert_eq!(escape_iac(&[1, IAC, 2]), vec![1, IAC, IAC, 2]);
        assert_eq!(escape_iac(b"ls\n"), b"ls\n");
    }

    fn read_until(transport: &mut TelnetTransport, want: usize) -> Vec<u8> {
        let start = Instant::now();
        let mut got = Vec::new();
        while got.len() < want && start.elapsed() < Duration::from_secs(5) {
            got.extend(transport.read_eager().unwrap());
            std::thread::sleep(Duration::from_millis(10));
        }
        got
    }

    #[test]
    fn loopback_session() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(&[IAC, DO, 24]).unwrap();
            sock.write_all(b"cirros login: ").unwrap();

            let mut refusal = [0u8; 3];
            sock.read_exact(&mut refusal).unwrap();
            let mut typed = [0u8; 7];
            sock.read_exact(&mut typed).unwrap();
            (refusal, typed)
        });

        let mut transport = TelnetTransport::connect("127.0.0.1", port, Duration::from_secs(5)).unwrap();
        assert_eq!(transport.peer(), format!("127.0.0.1:{}", port));

        let got = read_until(&mut transport, 14);
        assert_eq!(got, b"cirros login: ");

        transport.write_all(b"cirros\n").unwrap();
        let (refusal, typed) = server.join().unwrap();
        assert_eq!(refusal, [IAC, WONT, 24]);
        assert_eq!(&typed, b"cirros\n");

        // server side is gone now
        let start = Instant::now();
        let closed = loop {
            match transport.read_eager() {
                Err(e) => break Some(e),
                Ok(_) if start.elapsed() > Duration::from_secs(5) => break None,
                Ok(_) => std::thread::sleep(Duration::from_millis(10)),
            }
        };
        assert!(matches!(closed, Some(HarnessError::Transport(_))));
    }

    #[test]
    fn refusals_never_split_typed_input() {
        const TYPED: usize = 256 * 1024;
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            for option in 1..=64u8 {
                sock.write_all(&[IAC, DO, option]).unwrap();
            }
            let mut got = vec![0u8; TYPED + 64 * 3];
            sock.read_exact(&mut got).unwrap();
            got
        });

        let mut transport = TelnetTransport::connect("127.0.0.1", port, Duration::from_secs(5)).unwrap();
        transport.write_all(&vec![b'a'; TYPED]).unwrap();
        let got = server.join().unwrap();

        let first = got.iter().position(|&b| b == b'a').unwrap();
        let last = got.iter().rposition(|&b| b == b'a').unwrap();
        assert_eq!(last - first + 1, TYPED, "typed input was interleaved");

        let refusals: Vec<u8> = got[..first].iter().chain(&got[last + 1..]).copied().collect();
        assert_eq!(refusals.len(), 64 * 3);
        for chunk in refusals.chunks(3) {
            assert_eq!(&chunk[..2], &[IAC, WONT]);
        }
    }

    #[test]
    fn refused_connection_is_connection_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = TelnetTransport::connect("127.0.0.1", port, Duration::from_secs(2)).err();
        assert!(matches!(err, Some(HarnessError::Connection { .. })));
    }
}
