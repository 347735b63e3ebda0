//! I/O layer enforcing byte-rate caps and latency injection: a token bucket
//! per direction, refilled at `peak_bps`, plus an optional due-time queue
//! that delays delivery to simulate network latency.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use crate::layer::{EventDisposition, IoLayer, LayerContext, LayerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeMode {
    DropExcess,
    Trickle,
}

#[derive(Debug, Clone)]
pub struct BandwidthShaperConfig {
    pub peak_bps: u64,
    pub latency: Option<Duration>,
    pub mode: ShapeMode,
    /// Burst window used to size the token bucket: capacity = `peak_bps *
    /// burst_window.as_secs_f64()`.
    pub burst_window: Duration,
}

impl Default for BandwidthShaperConfig {
    fn default() -> Self {
        BandwidthShaperConfig {
            peak_bps: u64::MAX,
            latency: None,
            mode: ShapeMode::Trickle,
            burst_window: Duration::from_secs(1),
        }
    }
}

struct TokenBucket {
    peak_bps: u64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(peak_bps: u64, burst_window: Duration) -> Self {
        let capacity = peak_bps as f64 * burst_window.as_secs_f64();
        TokenBucket {
            peak_bps,
            capacity,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.peak_bps as f64).min(self.capacity);
        self.last_refill = now;
    }

    /// Attempts to consume `n` bytes worth of tokens; returns how many bytes
    /// were actually admitted.
    fn try_consume(&mut self, n: usize) -> usize {
        self.refill(Instant::now());
        let allowed = self.tokens.min(n as f64).max(0.0) as usize;
        self.tokens -= allowed as f64;
        allowed
    }

    fn set_throttle_period(&mut self, window: Duration, pct_of_peak: f64) {
        self.capacity = self.peak_bps as f64 * window.as_secs_f64() * pct_of_peak;
        self.tokens = self.tokens.min(self.capacity);
    }
}

/// Ring of recent `(when, bytes)` samples covering the last 50ms, used to
/// compute instantaneous throughput without storing unbounded history.
struct RateWindow {
    samples: VecDeque<(Instant, usize)>,
    window: Duration,
}

impl RateWindow {
    fn new() -> Self {
        RateWindow {
            samples: VecDeque::new(),
            window: Duration::from_millis(50),
        }
    }

    fn record(&mut self, n: usize) {
        let now = Instant::now();
        self.samples.push_back((now, n));
        while let Some(&(t, _)) = self.samples.front() {
            if now.saturating_duration_since(t) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn instantaneous_bps(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: usize = self.samples.iter().map(|(_, n)| n).sum();
        let span = self
            .samples
            .back()
            .unwrap()
            .0
            .saturating_duration_since(self.samples.front().unwrap().0)
            .as_secs_f64()
            .max(0.001);
        total as f64 / span
    }
}

#[derive(Default)]
pub struct DirectionCounters {
    pub total_bytes: u64,
    pub total_wall: Duration,
}

struct DirState {
    bucket: TokenBucket,
    latency_queue: VecDeque<(Instant, Vec<u8>)>,
    window: RateWindow,
    counters: DirectionCounters,
    /// When the most recent `shape()` call on this direction last touched
    /// state; `None` before the first call. Used to accrue wall-clock time
    /// into `counters.total_wall` between consecutive calls.
    activity_start: Option<Instant>,
}

impl DirState {
    fn new(cfg: &BandwidthShaperConfig) -> Self {
        DirState {
            bucket: TokenBucket::new(cfg.peak_bps, cfg.burst_window),
            latency_queue: VecDeque::new(),
            window: RateWindow::new(),
            counters: DirectionCounters::default(),
            activity_start: None,
        }
    }
}

pub struct BandwidthShaper {
    config: BandwidthShaperConfig,
    inbound: DirState,
    outbound: DirState,
}

impl BandwidthShaper {
    pub fn new(config: BandwidthShaperConfig) -> Self {
        BandwidthShaper {
            inbound: DirState::new(&config),
            outbound: DirState::new(&config),
            config,
        }
    }

    pub fn set_throttle_period(&mut self, dir: Direction, window: Duration, pct_of_peak: f64) {
        self.dir_mut(dir).bucket.set_throttle_period(window, pct_of_peak);
    }

    pub fn instantaneous_bps(&self, dir: Direction) -> f64 {
        self.dir(dir).window.instantaneous_bps()
    }

    pub fn counters(&self, dir: Direction) -> &DirectionCounters {
        &self.dir(dir).counters
    }

    fn dir(&self, dir: Direction) -> &DirState {
        match dir {
            Direction::In => &self.inbound,
            Direction::Out => &self.outbound,
        }
    }

    fn dir_mut(&mut self, dir: Direction) -> &mut DirState {
        match dir {
            Direction::In => &mut self.inbound,
            Direction::Out => &mut self.outbound,
        }
    }

    /// Releases any latency-queued entries whose due time has passed,
    /// returning the concatenation of their bytes. Callers running
    /// `Trickle` mode poll this from their own timer to re-deliver bytes
    /// that were queued for pacing rather than dropped.
    pub fn drain_due(&mut self, dir: Direction) -> Vec<u8> {
        let now = Instant::now();
        let state = self.dir_mut(dir);
        let mut out = Vec::new();
        while let Some((due, _)) = state.latency_queue.front() {
            if *due > now {
                break;
            }
            let (_, bytes) = state.latency_queue.pop_front().unwrap();
            out.extend_from_slice(&bytes);
        }
        out
    }

    /// Applies shaping to `data` traveling in `dir`: consumes tokens
    /// (dropping or trickling excess per `mode`), stamps the admitted bytes
    /// with a due time if latency injection is configured, and returns
    /// bytes that are now due for delivery.
    fn shape(&mut self, dir: Direction, data: &[u8]) -> io::Result<Vec<u8>> {
        let mode = self.config.mode;
        let latency = self.config.latency;
        let state = self.dir_mut(dir);
        let admitted = state.bucket.try_consume(data.len());
        let (admitted_bytes, dropped) = data.split_at(admitted);

        match mode {
            ShapeMode::DropExcess => {
                // Dropped bytes vanish silently; only admitted bytes proceed.
                let _ = dropped;
            }
            ShapeMode::Trickle => {
                if !dropped.is_empty() {
                    return Err(io::Error::new(io::ErrorKind::WouldBlock, "bandwidth cap reached"));
                }
            }
        }

        let now = Instant::now();
        if let Some(prev) = state.activity_start {
            state.counters.total_wall += now.saturating_duration_since(prev);
        }
        state.activity_start = Some(now);

        state.counters.total_bytes += admitted_bytes.len() as u64;
        state.window.record(admitted_bytes.len());

        match latency {
            Some(delay) => {
                let due = Instant::now() + delay;
                state.latency_queue.push_back((due, admitted_bytes.to_vec()));
                Ok(self.drain_due(dir))
            }
            None => Ok(admitted_bytes.to_vec()),
        }
    }
}

/// Wraps [`BandwidthShaper`] as an `IoLayer` sitting above the transport,
/// shaping writes going down (`Out`) and bytes read up from below (`In`).
pub struct BandwidthShaperLayer {
    shaper: BandwidthShaper,
}

impl BandwidthShaperLayer {
    pub fn new(config: BandwidthShaperConfig) -> Self {
        BandwidthShaperLayer {
            shaper: BandwidthShaper::new(config),
        }
    }

    pub fn shaper(&self) -> &BandwidthShaper {
        &self.shaper
    }
}

impl IoLayer for BandwidthShaperLayer {
    fn init(&mut self, _ctx: &mut LayerContext) -> io::Result<()> {
        Ok(())
    }

    fn process_event(
        &mut self,
        _ctx: &mut LayerContext,
        event: LayerEvent,
    ) -> io::Result<EventDisposition> {
        match event {
            LayerEvent::Readable => Ok(EventDisposition::PassUp),
            _ => Ok(EventDisposition::PassUp),
        }
    }

    fn read(&mut self, _ctx: &mut LayerContext, buf: &mut [u8]) -> io::Result<usize> {
        match self.shaper.shape(Direction::In, &buf[..]) {
            Ok(admitted) => {
                let n = admitted.len();
                buf[..n].copy_from_slice(&admitted);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(e),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, _ctx: &mut LayerContext, buf: &[u8]) -> io::Result<usize> {
        match self.shaper.shape(Direction::Out, buf) {
            Ok(admitted) => Ok(admitted.len()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(e),
            Err(e) => Err(e),
        }
    }

    fn destroy(self: Box<Self>, _ctx: &mut LayerContext) {}
}
