//! `coreio`: the event-driven core of a portable systems programming
//! standard library — a reactor-backed event loop with drift-corrected
//! timers, a stackable `IoLayer` transport model (bandwidth shaping, TLS),
//! an HTTP/2 frame reader with an RFC 7541 HPACK decoder, a
//! format-independent HTTP/1 message reader, and a bounded-queue
//! asynchronous log writer.
//!
//! Byte-level building blocks ([`buffer`], [`parser`]) are reusable outside
//! the I/O stack; everything else is built on top of them.

pub mod buffer;
pub mod parser;

#[cfg(feature = "os-poll")]
pub mod reactor;
#[cfg(feature = "os-poll")]
pub mod layer;
#[cfg(feature = "os-poll")]
pub mod io_handle;
#[cfg(feature = "os-poll")]
pub mod timer;
#[cfg(feature = "os-poll")]
pub mod event_loop;
#[cfg(feature = "os-poll")]
pub mod bwshaping;

#[cfg(all(feature = "os-poll", feature = "tls"))]
pub mod tls;

pub mod huffman;
pub mod hpack;
pub mod http2;
pub mod http_message;

pub mod async_writer;

#[cfg(feature = "pattern")]
pub mod pattern;

/// Documents the crate's Cargo features; carries no code of its own.
///
/// - `os-poll` (default): the reactor, event loop, `IoHandle`/`IoLayer`
///   stack, timers, and bandwidth shaper. Disable it to use only the
///   transport-independent byte/parsing/HTTP/logging pieces.
/// - `tls` (default): the `rustls`-backed `TlsLayer`. Requires `os-poll`.
/// - `pattern` (default): the `regex`-backed `pattern::Matcher` boundary.
/// - `log`: forwards diagnostic events through the `log` crate's facade.
pub mod features {}
