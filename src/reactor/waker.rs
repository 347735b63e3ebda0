//! Cross-thread wakeup for a blocked reactor poll.
//!
//! On Linux this is backed by an eventfd registered with the reactor under
//! [`super::WAKE_TOKEN`]; `wake()` is safe to call from any thread and from
//! a signal handler is not attempted (eventfd's `write` is not
//! async-signal-safe enough to promise that here).

use std::io;

#[cfg(unix)]
use std::fs::File;
#[cfg(unix)]
use std::io::{Read, Write};
#[cfg(unix)]
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

use super::{Interest, Selector, Token};

#[cfg(unix)]
pub struct Waker {
    fd: File,
}

#[cfg(unix)]
impl Waker {
    pub fn new(selector: &Selector, token: Token) -> io::Result<Waker> {
        let raw = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if raw == -1 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { File::from_raw_fd(raw) };
        selector.register(fd.as_raw_fd(), token, Interest::READABLE)?;
        Ok(Waker { fd })
    }

    pub fn wake(&self) -> io::Result<()> {
        let buf: [u8; 8] = 1u64.to_ne_bytes();
        match (&self.fd).write(&buf) {
            Ok(_) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.reset()?;
                self.wake()
            }
            Err(e) => Err(e),
        }
    }

    /// Drains the counter; called after observing readiness on the waker's
    /// token so the next real `wake()` is not immediately re-observed.
    pub fn ack(&self) {
        let _ = self.reset();
    }

    fn reset(&self) -> io::Result<()> {
        let mut buf = [0u8; 8];
        match (&self.fd).read(&mut buf) {
            Ok(_) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(not(unix))]
pub struct Waker;

#[cfg(not(unix))]
impl Waker {
    pub fn new(_selector: &Selector, _token: Token) -> io::Result<Waker> {
        Ok(Waker)
    }

    pub fn wake(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "no reactor backend available on this platform",
        ))
    }

    pub fn ack(&self) {}
}
