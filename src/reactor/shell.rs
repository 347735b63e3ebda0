//! Reactor backend for platforms with no supported poller, mirroring the
//! upstream project's own "shell" fallback: it compiles and type-checks so
//! the rest of the crate builds everywhere, but every operation fails at
//! runtime with [`io::ErrorKind::Unsupported`].

use std::io;
use std::time::Duration;

use super::{Events, Interest, Token};

#[derive(Debug)]
pub struct Selector {
    _private: (),
}

fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "no reactor backend available on this platform",
    )
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        Ok(Selector { _private: () })
    }

    pub fn select(&self, events: &mut Events, _timeout: Option<Duration>) -> io::Result<()> {
        events.clear();
        Err(unsupported())
    }

    pub fn register(&self, _fd: i32, _token: Token, _interests: Interest) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn reregister(&self, _fd: i32, _token: Token, _interests: Interest) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn deregister(&self, _fd: i32) -> io::Result<()> {
        Err(unsupported())
    }
}
