//! TLS I/O layer: wraps a transport with a `rustls`-backed handshake state
//! machine. Certificate parsing/validation is delegated entirely to
//! `rustls` (verification) and `x509-parser` (human-readable introspection)
//! — this module never parses X.509 itself.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::{ClientConfig, ClientConnection, Connection, RootCertStore, ServerConfig, ServerConnection};
use rustls_pki_types::ServerName;

use crate::layer::{EventDisposition, IoLayer, LayerContext, LayerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsError {
    VerificationFailed,
    Timeout,
    ProtocolDowngrade,
    AlpnMismatch,
    Handshake,
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsError::VerificationFailed => write!(f, "peer certificate verification failed"),
            TlsError::Timeout => write!(f, "handshake timed out"),
            TlsError::ProtocolDowngrade => write!(f, "negotiated protocol version below floor"),
            TlsError::AlpnMismatch => write!(f, "no acceptable ALPN protocol negotiated"),
            TlsError::Handshake => write!(f, "TLS handshake error"),
        }
    }
}

impl std::error::Error for TlsError {}

#[derive(Debug, Clone)]
pub struct TlsClientConfig {
    pub root_store: RootCertStore,
    pub alpn: Vec<Vec<u8>>,
    pub server_name: String,
    /// Floor below which a negotiated protocol version is rejected as a
    /// downgrade attack.
    pub min_version_floor: Option<&'static rustls::SupportedProtocolVersion>,
}

impl TlsClientConfig {
    pub fn with_webpki_roots(server_name: impl Into<String>) -> Self {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        TlsClientConfig {
            root_store,
            alpn: Vec::new(),
            server_name: server_name.into(),
            min_version_floor: None,
        }
    }

    fn build(&self) -> Result<ClientConnection, TlsError> {
        let mut config = ClientConfig::builder()
            .with_root_certificates(self.root_store.clone())
            .with_no_client_auth();
        config.alpn_protocols = self.alpn.clone();
        let name = ServerName::try_from(self.server_name.clone())
            .map_err(|_| TlsError::Handshake)?;
        ClientConnection::new(Arc::new(config), name).map_err(|_| TlsError::Handshake)
    }
}

pub struct TlsServerConfig {
    pub sni_contexts: HashMap<String, Arc<ServerConfig>>,
    pub default: Arc<ServerConfig>,
}

impl TlsServerConfig {
    fn build(&self, sni: Option<&str>) -> Result<ServerConnection, TlsError> {
        let config = sni
            .and_then(|name| self.sni_contexts.get(name))
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        ServerConnection::new(config).map_err(|_| TlsError::Handshake)
    }
}

#[derive(Debug, Clone)]
pub struct TlsInfo {
    pub protocol_version: Option<rustls::ProtocolVersion>,
    pub cipher_suite: Option<String>,
    pub peer_cert_der: Vec<Vec<u8>>,
    pub peer_cert_subject: Option<String>,
    pub peer_cert_issuer: Option<String>,
    pub alpn_protocol: Option<Vec<u8>>,
    pub was_resumed: bool,
    pub handshake: Duration,
}

enum Side {
    Client(Connection, TlsClientConfig),
    Server(Connection),
}

impl Side {
    fn conn_mut(&mut self) -> &mut Connection {
        match self {
            Side::Client(c, _) => c,
            Side::Server(s) => s,
        }
    }

    fn conn(&self) -> &Connection {
        match self {
            Side::Client(c, _) => c,
            Side::Server(s) => s,
        }
    }
}

/// A `Read` adapter over a byte slice that reports `WouldBlock` instead of
/// `Ok(0)` once exhausted — rustls treats `Ok(0)` from `read_tls` as the
/// transport having closed, which is not what "no more buffered ciphertext
/// yet" means here.
struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Read for SliceReader<'a> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.buf[self.pos..];
        if remaining.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no buffered ciphertext"));
        }
        let n = remaining.len().min(out.len());
        out[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// A `Write` adapter that appends to a `Vec`, used to collect whatever
/// ciphertext rustls wants sent without needing a real transport handle.
struct VecWriter<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> Write for VecWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An `IoLayer` that drives a rustls handshake and, once complete, passes
/// decrypted/encrypted bytes through to the layer above/below.
pub struct TlsLayer {
    side: Side,
    handshake_started: Instant,
    info: Option<TlsInfo>,
    /// Ciphertext received from the layer below, not yet consumed by rustls.
    read_buf: Vec<u8>,
    /// Ciphertext rustls wants written out; drained by `write`/`process_event`
    /// callers (and by [`Self::pending_handshake_bytes`] directly, since the
    /// layer stack's own write path only ever reaches the top layer).
    pending_out: Vec<u8>,
    /// Plaintext rustls has already decrypted but that didn't fit in the
    /// caller's buffer on a previous `read`; drained from the front on the
    /// next call.
    plain_buf: VecDeque<u8>,
}

impl TlsLayer {
    pub fn client(config: TlsClientConfig) -> Result<Self, TlsError> {
        let conn = config.build()?;
        Ok(TlsLayer {
            side: Side::Client(Connection::Client(conn), config),
            handshake_started: Instant::now(),
            info: None,
            read_buf: Vec::new(),
            pending_out: Vec::new(),
            plain_buf: VecDeque::new(),
        })
    }

    pub fn server(config: &TlsServerConfig, sni: Option<&str>) -> Result<Self, TlsError> {
        let conn = config.build(sni)?;
        Ok(TlsLayer {
            side: Side::Server(Connection::Server(conn)),
            handshake_started: Instant::now(),
            info: None,
            read_buf: Vec::new(),
            pending_out: Vec::new(),
            plain_buf: VecDeque::new(),
        })
    }

    pub fn info(&self) -> Option<&TlsInfo> {
        self.info.as_ref()
    }

    pub fn is_handshaking(&self) -> bool {
        self.side.conn().is_handshaking()
    }

    /// Ciphertext rustls has produced (handshake records, or encrypted
    /// application data queued by `write`) that the caller should push to
    /// the real transport. Takes ownership of whatever is pending.
    pub fn pending_handshake_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending_out)
    }

    /// Feeds buffered incoming ciphertext (`self.read_buf`) to rustls and
    /// collects whatever ciphertext it wants written out into `outgoing`, as
    /// far as it can go without blocking. Returns `Ok(true)` once the
    /// handshake is complete. Consumed bytes are drained from `read_buf`.
    fn pump(&mut self, outgoing: &mut Vec<u8>) -> io::Result<bool> {
        let mut reader = SliceReader { buf: &self.read_buf, pos: 0 };
        let conn = self.side.conn_mut();
        loop {
            if conn.wants_write() {
                let mut writer = VecWriter { out: outgoing };
                conn.write_tls(&mut writer)?;
                continue;
            }
            if conn.wants_read() {
                match conn.read_tls(&mut reader) {
                    Ok(0) => break,
                    Ok(_) => {
                        conn.process_new_packets().map_err(|e| {
                            io::Error::new(io::ErrorKind::InvalidData, e.to_string())
                        })?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            } else {
                break;
            }
        }
        let consumed = reader.pos;
        let handshake_done = !conn.is_handshaking();
        self.read_buf.drain(0..consumed);
        Ok(handshake_done)
    }

    /// Runs [`Self::pump`] against `self.pending_out`, taking it out first so
    /// the call doesn't need two overlapping mutable borrows of `self`.
    fn drive_pump(&mut self) -> io::Result<bool> {
        let mut outgoing = std::mem::take(&mut self.pending_out);
        let result = self.pump(&mut outgoing);
        self.pending_out = outgoing;
        result
    }

    fn finalize_info(&mut self) {
        let conn = self.side.conn();
        let peer_certs: Vec<Vec<u8>> = conn
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.as_ref().to_vec()).collect())
            .unwrap_or_default();

        let (subject, issuer) = peer_certs
            .first()
            .and_then(|der| x509_parser::parse_x509_certificate(der).ok())
            .map(|(_, cert)| {
                (
                    cert.subject().to_string(),
                    cert.issuer().to_string(),
                )
            })
            .unzip();

        self.info = Some(TlsInfo {
            protocol_version: conn.protocol_version(),
            cipher_suite: conn.negotiated_cipher_suite().map(|cs| format!("{:?}", cs.suite())),
            peer_cert_der: peer_certs,
            peer_cert_subject: subject,
            peer_cert_issuer: issuer,
            alpn_protocol: conn.alpn_protocol().map(|p| p.to_vec()),
            was_resumed: false,
            handshake: self.handshake_started.elapsed(),
        });
    }
}

impl IoLayer for TlsLayer {
    fn init(&mut self, _ctx: &mut LayerContext) -> io::Result<()> {
        self.handshake_started = Instant::now();
        Ok(())
    }

    fn process_event(
        &mut self,
        _ctx: &mut LayerContext,
        event: LayerEvent,
    ) -> io::Result<EventDisposition> {
        match event {
            LayerEvent::Readable | LayerEvent::Writable if self.is_handshaking() => {
                // Drives the handshake forward from whatever ciphertext is
                // already buffered (there may be none yet, e.g. the very
                // first `Writable` that kicks off a client's ClientHello).
                // Produced ciphertext lands in `pending_out` for the caller
                // to push to the real transport.
                let done = self.drive_pump()?;
                if done {
                    self.finalize_info();
                }
                Ok(EventDisposition::Consumed)
            }
            _ => Ok(EventDisposition::PassUp),
        }
    }

    fn read(&mut self, _ctx: &mut LayerContext, buf: &mut [u8]) -> io::Result<usize> {
        self.read_buf.extend_from_slice(buf);
        let was_handshaking = self.is_handshaking();
        let done = self.drive_pump()?;
        if was_handshaking && done {
            self.finalize_info();
        }
        if self.is_handshaking() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "handshake in progress"));
        }

        let conn = self.side.conn_mut();
        let mut chunk = [0u8; 4096];
        loop {
            match conn.reader().read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.plain_buf.extend(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        let n = self.plain_buf.len().min(buf.len());
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no plaintext available"));
        }
        for (i, b) in self.plain_buf.drain(..n).enumerate() {
            buf[i] = b;
        }
        Ok(n)
    }

    fn write(&mut self, _ctx: &mut LayerContext, buf: &[u8]) -> io::Result<usize> {
        if self.is_handshaking() {
            self.drive_pump()?;
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "handshake in progress"));
        }
        let conn = self.side.conn_mut();
        let n = conn.writer().write(buf)?;
        self.drive_pump()?;
        Ok(n)
    }

    fn destroy(self: Box<Self>, _ctx: &mut LayerContext) {}
}
