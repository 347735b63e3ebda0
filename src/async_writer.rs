//! Bounded-queue asynchronous log writer: a single worker thread drains a
//! FIFO of formatted lines into a [`LogSink`], evicting the oldest entries
//! (and reporting the eviction as a synthetic line) when the queue would
//! otherwise exceed its configured byte budget.

use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write as _};
use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncWriterError {
    AlreadyDestroying,
    ThreadSpawnFailed,
}

impl fmt::Display for AsyncWriterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncWriterError::AlreadyDestroying => write!(f, "writer is flushing or destroying"),
            AsyncWriterError::ThreadSpawnFailed => write!(f, "failed to spawn worker thread"),
        }
    }
}

impl std::error::Error for AsyncWriterError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Unix,
    Windows,
    Native,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Unix => "\n",
            LineEnding::Windows => "\r\n",
            LineEnding::Native => {
                if cfg!(windows) {
                    "\r\n"
                } else {
                    "\n"
                }
            }
        }
    }
}

/// A destination for formatted log lines. Sinks signal acceptance with a
/// plain `bool` rather than an error type: rejecting a line is purely a
/// "try again later" signal to the queue, never a diagnosable failure.
pub trait LogSink: Send {
    fn write(&mut self, line: &str) -> bool;
    fn command(&mut self, bits: u32) {
        let _ = bits;
    }
}

pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FileSink { file })
    }
}

impl LogSink for FileSink {
    fn write(&mut self, line: &str) -> bool {
        self.file.write_all(line.as_bytes()).is_ok()
    }
}

pub struct StderrSink;

impl LogSink for StderrSink {
    fn write(&mut self, line: &str) -> bool {
        eprint!("{line}");
        true
    }
}

/// Forwards every accepted line to an `mpsc` channel; used by tests to
/// observe worker output without a real file descriptor.
pub struct ChannelSink {
    tx: Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: Sender<String>) -> Self {
        ChannelSink { tx }
    }
}

impl LogSink for ChannelSink {
    fn write(&mut self, line: &str) -> bool {
        self.tx.send(line.to_string()).is_ok()
    }
}

pub struct AsyncWriterConfig {
    pub max_bytes: usize,
    pub sink: Box<dyn LogSink>,
    pub line_ending: LineEnding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Stopped,
    Running,
    FlushingToStop,
    FlushingToDestroy,
    Destroying,
}

fn in_flush(state: WriterState) -> bool {
    matches!(state, WriterState::FlushingToStop | WriterState::FlushingToDestroy)
}

struct Shared {
    state: WriterState,
    msgs: VecDeque<String>,
    stored_bytes: usize,
    num_dropped: u64,
    write_command: u32,
    force_command: bool,
    command_done: bool,
    thread_done: bool,
    alive_generation: u64,
    seen_generation: u64,
}

/// A single worker-thread bounded-queue writer, mirroring the teacher's
/// lock/condvar discipline for background I/O threads.
pub struct AsyncWriter {
    max_bytes: Mutex<usize>,
    line_ending: LineEnding,
    shared: Arc<Mutex<Shared>>,
    cond_updated: Arc<Condvar>,
    cond_done: Arc<Condvar>,
    cond_alive: Arc<Condvar>,
    block_cmd_lock: Mutex<()>,
    sink: Arc<Mutex<Box<dyn LogSink>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncWriter {
    pub fn new(config: AsyncWriterConfig) -> Self {
        AsyncWriter {
            max_bytes: Mutex::new(config.max_bytes),
            line_ending: config.line_ending,
            shared: Arc::new(Mutex::new(Shared {
                state: WriterState::Stopped,
                msgs: VecDeque::new(),
                stored_bytes: 0,
                num_dropped: 0,
                write_command: 0,
                force_command: false,
                command_done: true,
                thread_done: true,
                alive_generation: 0,
                seen_generation: 0,
            })),
            cond_updated: Arc::new(Condvar::new()),
            cond_done: Arc::new(Condvar::new()),
            cond_alive: Arc::new(Condvar::new()),
            block_cmd_lock: Mutex::new(()),
            sink: Arc::new(Mutex::new(config.sink)),
            handle: Mutex::new(None),
        }
    }

    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().unwrap().state == WriterState::Running
    }

    pub fn start(&self) -> Result<bool, AsyncWriterError> {
        let mut guard = self.shared.lock().unwrap();
        if guard.state != WriterState::Stopped {
            return Ok(guard.state == WriterState::Running);
        }
        guard.thread_done = false;
        guard.command_done = true;
        drop(guard);

        let shared = Arc::clone(&self.shared);
        let cond_updated = Arc::clone(&self.cond_updated);
        let cond_done = Arc::clone(&self.cond_done);
        let cond_alive = Arc::clone(&self.cond_alive);
        let sink = Arc::clone(&self.sink);
        let line_end = self.line_ending.as_str();

        let builder = std::thread::Builder::new().name("async-writer".into());
        let join = builder
            .spawn(move || worker_loop(shared, cond_updated, cond_done, cond_alive, sink, line_end))
            .map_err(|_| AsyncWriterError::ThreadSpawnFailed)?;

        *self.handle.lock().unwrap() = Some(join);
        self.shared.lock().unwrap().state = WriterState::Running;
        #[cfg(feature = "log")]
        log::debug!("async writer started");
        Ok(true)
    }

    /// Blocking stop: signals the worker and waits for it to drain.
    pub fn stop(&self) {
        {
            let mut guard = self.shared.lock().unwrap();
            if guard.state != WriterState::Running {
                return;
            }
            guard.state = WriterState::Stopped;
            self.cond_updated.notify_all();
            while !guard.thread_done {
                guard = self.cond_done.wait(guard).unwrap();
            }
        }
        if let Some(h) = self.handle.lock().unwrap().take() {
            let _ = h.join();
        }
    }

    pub fn destroy(&self, flush: bool) {
        let mut guard = self.shared.lock().unwrap();
        if matches!(guard.state, WriterState::FlushingToDestroy | WriterState::Destroying) {
            return;
        }
        if guard.state == WriterState::Stopped {
            return;
        }
        guard.state = if flush {
            WriterState::FlushingToDestroy
        } else {
            WriterState::Destroying
        };
        self.cond_updated.notify_all();
    }

    /// Blocking destroy with a timeout; if the worker hasn't drained by the
    /// deadline, hands off asynchronous destruction and returns `false`.
    pub fn destroy_blocking(&self, flush: bool, timeout: Duration) -> bool {
        let mut guard = self.shared.lock().unwrap();
        if matches!(guard.state, WriterState::Destroying) || in_flush(guard.state) {
            return true;
        }
        if guard.state == WriterState::Stopped {
            return true;
        }
        guard.state = if flush {
            WriterState::FlushingToStop
        } else {
            WriterState::Stopped
        };
        self.cond_updated.notify_all();

        let deadline = Instant::now() + timeout;
        while !guard.thread_done {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (g, timed_out) = self
                .cond_done
                .wait_timeout(guard, deadline - now)
                .unwrap();
            guard = g;
            if timed_out.timed_out() && !guard.thread_done {
                break;
            }
        }

        let done = guard.thread_done;
        if !done {
            guard.state = WriterState::Destroying;
            self.cond_updated.notify_all();
        }
        drop(guard);
        if done {
            if let Some(h) = self.handle.lock().unwrap().take() {
                let _ = h.join();
            }
        }
        done
    }

    /// Enqueues `msg`, evicting the oldest queued lines first if needed to
    /// stay within `max_bytes`. Returns `false` if the message itself was
    /// too large, or the writer is flushing.
    pub fn write(&self, msg: impl Into<String>) -> bool {
        let msg = msg.into();
        if msg.is_empty() {
            return false;
        }
        let max_bytes = *self.max_bytes.lock().unwrap();
        let mut guard = self.shared.lock().unwrap();
        if in_flush(guard.state) {
            return false;
        }
        if msg.len() > max_bytes {
            guard.num_dropped = guard.num_dropped.saturating_add(1);
            return false;
        }
        guard.stored_bytes += msg.len();
        guard.msgs.push_back(msg);
        while guard.stored_bytes > max_bytes {
            if let Some(old) = guard.msgs.pop_front() {
                guard.stored_bytes -= old.len();
                guard.num_dropped = guard.num_dropped.saturating_add(1);
            } else {
                break;
            }
        }
        self.cond_updated.notify_all();
        true
    }

    pub fn set_max_bytes(&self, max_bytes: usize) {
        *self.max_bytes.lock().unwrap() = max_bytes;
    }

    pub fn set_command(&self, bits: u32, force: bool) -> bool {
        let mut guard = self.shared.lock().unwrap();
        if in_flush(guard.state) {
            return false;
        }
        guard.write_command |= bits;
        guard.force_command |= force;
        if force {
            self.cond_updated.notify_all();
        }
        true
    }

    /// Sets a command and blocks until the worker has acknowledged it,
    /// serialized through `block_cmd_lock` so overlapping blocking
    /// commands from different threads cannot interleave their waits.
    pub fn set_command_block(&self, bits: u32) -> bool {
        let _block_guard = self.block_cmd_lock.lock().unwrap();
        let mut guard = self.shared.lock().unwrap();
        if in_flush(guard.state) {
            return false;
        }
        guard.write_command |= bits;
        guard.force_command = true;
        self.cond_updated.notify_all();

        guard.command_done = false;
        while !guard.command_done {
            guard = self.cond_done.wait(guard).unwrap();
        }
        true
    }

    /// Flips a generation counter and waits for the worker's loop to
    /// observe and echo it back; a timeout means the worker is stuck.
    pub fn is_alive(&self, timeout: Duration) -> bool {
        let mut guard = self.shared.lock().unwrap();
        if guard.state != WriterState::Running {
            return false;
        }
        guard.alive_generation += 1;
        let target = guard.alive_generation;
        self.cond_updated.notify_all();

        let deadline = Instant::now() + timeout;
        while guard.seen_generation < target {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (g, timed_out) = self
                .cond_alive
                .wait_timeout(guard, deadline - now)
                .unwrap();
            guard = g;
            if timed_out.timed_out() && guard.seen_generation < target {
                break;
            }
        }
        guard.seen_generation >= target
    }
}

fn worker_loop(
    shared: Arc<Mutex<Shared>>,
    cond_updated: Arc<Condvar>,
    cond_done: Arc<Condvar>,
    cond_alive: Arc<Condvar>,
    sink: Arc<Mutex<Box<dyn LogSink>>>,
    line_end: &str,
) {
    loop {
        let popped = pop_one(&shared, &cond_updated, &cond_alive);
        let (msg, cmd, num_dropped) = match popped {
            Some(v) => v,
            None => break,
        };

        let mut msg_consumed = true;
        if num_dropped > 0 {
            let cause = if msg.is_none() && cmd == 0 {
                "shutdown"
            } else {
                "buffer full"
            };
            let line = format!("{num_dropped} messages were dropped ({cause}){line_end}");
            msg_consumed = sink.lock().unwrap().write(&line);
        }

        if msg.is_none() && cmd == 0 {
            break;
        }

        if msg_consumed {
            if let Some(m) = &msg {
                msg_consumed = sink.lock().unwrap().write(m);
            }
            if cmd != 0 {
                sink.lock().unwrap().command(cmd);
                let mut guard = shared.lock().unwrap();
                guard.command_done = true;
                cond_done.notify_all();
            }
        }

        if !msg_consumed {
            if let Some(m) = msg {
                replace_one(&shared, m, num_dropped);
            }
        }
    }

    let mut guard = shared.lock().unwrap();
    guard.command_done = true;
    guard.thread_done = true;
    if guard.state == WriterState::FlushingToDestroy {
        guard.state = WriterState::Destroying;
    } else if guard.state == WriterState::FlushingToStop {
        guard.state = WriterState::Stopped;
    }
    cond_done.notify_all();
}

/// Blocks until a message, a forced command, or a stop/destroy request is
/// available. Returns `None` to mean "stop the worker"; `Some` carries the
/// popped message (if any), the pending command bits, and the number of
/// drops to report before it.
fn pop_one(
    shared: &Arc<Mutex<Shared>>,
    cond_updated: &Condvar,
    cond_alive: &Condvar,
) -> Option<(Option<String>, u32, u64)> {
    let mut guard = shared.lock().unwrap();

    if guard.seen_generation < guard.alive_generation {
        guard.seen_generation = guard.alive_generation;
        cond_alive.notify_all();
    }

    while guard.msgs.is_empty()
        && guard.state == WriterState::Running
        && !(guard.force_command && guard.write_command != 0)
    {
        guard = cond_updated.wait(guard).unwrap();
        if guard.seen_generation < guard.alive_generation {
            guard.seen_generation = guard.alive_generation;
            cond_alive.notify_all();
        }
    }

    let stopping = guard.state == WriterState::Destroying
        || guard.state == WriterState::Stopped
        || (in_flush(guard.state) && guard.msgs.is_empty());

    if stopping {
        let dropped = if guard.state == WriterState::Stopped {
            0
        } else {
            guard.num_dropped + guard.msgs.len() as u64
        };
        return if dropped > 0 { Some((None, 0, dropped)) } else { None };
    }

    let msg = guard.msgs.pop_front();
    if let Some(m) = &msg {
        guard.stored_bytes -= m.len();
    }
    let num_dropped = guard.num_dropped;
    guard.num_dropped = 0;

    let cmd = guard.write_command;
    guard.write_command = 0;
    guard.force_command = false;

    Some((msg, cmd, num_dropped))
}

/// Restores a message the sink rejected back onto the queue tail, folding
/// in any drops that happened while the write was in flight.
fn replace_one(shared: &Arc<Mutex<Shared>>, msg: String, num_dropped: u64) {
    if msg.is_empty() {
        return;
    }
    let mut guard = shared.lock().unwrap();
    let max_bytes_fits = guard.num_dropped == 0;
    if max_bytes_fits {
        guard.stored_bytes += msg.len();
        guard.msgs.push_back(msg);
    } else {
        guard.num_dropped = guard.num_dropped.saturating_add(1);
    }
    guard.num_dropped = guard.num_dropped.saturating_add(num_dropped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn writer_with_channel(max_bytes: usize) -> (AsyncWriter, std::sync::mpsc::Receiver<String>) {
        let (tx, rx) = channel();
        let writer = AsyncWriter::new(AsyncWriterConfig {
            max_bytes,
            sink: Box::new(ChannelSink::new(tx)),
            line_ending: LineEnding::Unix,
        });
        (writer, rx)
    }

    #[test]
    fn start_stop_round_trip() {
        let (writer, _rx) = writer_with_channel(1024);
        assert!(!writer.is_running());
        writer.start().unwrap();
        assert!(writer.is_running());
        writer.stop();
        assert!(!writer.is_running());
    }

    #[test]
    fn fifo_delivery() {
        let (writer, rx) = writer_with_channel(1024);
        writer.start().unwrap();
        writer.write("first");
        writer.write("second");
        writer.write("third");
        assert_eq!(rx.recv().unwrap(), "first");
        assert_eq!(rx.recv().unwrap(), "second");
        assert_eq!(rx.recv().unwrap(), "third");
        writer.stop();
    }

    #[test]
    fn eviction_reports_drop_before_next_message() {
        let (writer, rx) = writer_with_channel(10);
        // Each of these exceeds 10 bytes combined, forcing eviction.
        writer.write("0123456789"); // fills queue exactly
        writer.write("abcdefghij"); // evicts the first message
        writer.start().unwrap();
        let first = rx.recv().unwrap();
        assert!(first.contains("dropped"), "expected a drop notice, got {first:?}");
        let second = rx.recv().unwrap();
        assert_eq!(second, "abcdefghij");
        writer.stop();
    }

    #[test]
    fn is_alive_detects_running_worker() {
        let (writer, _rx) = writer_with_channel(1024);
        writer.start().unwrap();
        assert!(writer.is_alive(Duration::from_secs(1)));
        writer.stop();
    }

    #[test]
    fn is_alive_false_when_stopped() {
        let (writer, _rx) = writer_with_channel(1024);
        assert!(!writer.is_alive(Duration::from_millis(50)));
    }

    #[test]
    fn set_command_block_waits_for_ack() {
        struct CountingSink {
            tx: Sender<String>,
            commands: Arc<Mutex<Vec<u32>>>,
        }
        impl LogSink for CountingSink {
            fn write(&mut self, line: &str) -> bool {
                self.tx.send(line.to_string()).is_ok()
            }
            fn command(&mut self, bits: u32) {
                self.commands.lock().unwrap().push(bits);
            }
        }
        let (tx, _rx) = channel();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let writer = AsyncWriter::new(AsyncWriterConfig {
            max_bytes: 1024,
            sink: Box::new(CountingSink {
                tx,
                commands: Arc::clone(&commands),
            }),
            line_ending: LineEnding::Unix,
        });
        writer.start().unwrap();
        assert!(writer.set_command_block(7));
        assert_eq!(commands.lock().unwrap().as_slice(), &[7]);
        writer.stop();
    }

    #[test]
    fn destroy_blocking_flush_drains_queue() {
        let (writer, rx) = writer_with_channel(1024);
        writer.start().unwrap();
        writer.write("a");
        writer.write("b");
        assert!(writer.destroy_blocking(true, Duration::from_secs(1)));
        let mut seen = Vec::new();
        while let Ok(m) = rx.try_recv() {
            seen.push(m);
        }
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn line_ending_variants() {
        assert_eq!(LineEnding::Unix.as_str(), "\n");
        assert_eq!(LineEnding::Windows.as_str(), "\r\n");
    }
}
