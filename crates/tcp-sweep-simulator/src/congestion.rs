//! Pluggable congestion control and the registry sockets draw it from.

use std::time::Duration;
use tcp_sweep_abstract::{EngineError, EngineResult, VariantHandle};

/// Sender-side window state shared with the congestion-control algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CongestionWindow {
    /// Congestion window in bytes.
    pub cwnd: u32,
    /// Slow-start threshold in bytes.
    pub ssthresh: u32,
    pub mss: u32,
}

impl CongestionWindow {
    pub fn new(mss: u32, initial_segments: u32) -> Self {
        Self {
            cwnd: mss * initial_segments,
            ssthresh: u32::MAX,
            mss,
        }
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// Grow by one segment per acked segment while below ssthresh; returns leftovers.
    fn slow_start(&mut self, segments_acked: u32) -> u32 {
        let mut remaining = segments_acked;
        while remaining > 0 && self.in_slow_start() {
            self.cwnd = self.cwnd.saturating_add(self.mss);
            remaining -= 1;
        }
        remaining
    }
}

/// The interface a congestion-control variant implements.
pub trait CongestionOps {
    fn name(&self) -> &'static str;

    /// Called for every ACK that advances the window outside of loss recovery.
    fn increase_window(&mut self, window: &mut CongestionWindow, segments_acked: u32, now: Duration);

    /// New slow-start threshold after a loss event.
    fn ssthresh(&mut self, window: &CongestionWindow, bytes_in_flight: u32, now: Duration) -> u32;

    /// Called when the retransmission timer fires.
    fn on_timeout(&mut self) {}
}

#[derive(Debug, Default)]
pub struct NewReno;

impl CongestionOps for NewReno {
    fn name(&self) -> &'static str {
        "TcpNewReno"
    }

    fn increase_window(&mut self, window: &mut CongestionWindow, segments_acked: u32, _now: Duration) {
        let remaining = if window.in_slow_start() {
            window.slow_start(segments_acked)
        } else {
            segments_acked
        };
        if remaining > 0 && !window.in_slow_start() {
            let mss = window.mss as u64;
            let adder = (mss * mss / window.cwnd.max(1) as u64).max(1);
            window.cwnd = window.cwnd.saturating_add(adder as u32);
        }
    }

    fn ssthresh(&mut self, window: &CongestionWindow, bytes_in_flight: u32, _now: Duration) -> u32 {
        (bytes_in_flight / 2).max(2 * window.mss)
    }
}

const CUBIC_C: f64 = 0.4;
const CUBIC_BETA: f64 = 0.7;

/// CUBIC window growth (RFC 8312) with fast convergence and the TCP-friendly region.
#[derive(Debug, Default)]
pub struct Cubic {
    epoch_start: Option<Duration>,
    /// Window (segments) just before the last reduction.
    w_max: f64,
    /// Window (segments) the cubic curve plateaus at.
    origin: f64,
    /// Time (seconds) from the epoch start to the plateau.
    k: f64,
    /// Reno-equivalent window estimate (segments).
    w_est: f64,
    /// Fractional bytes not yet applied to cwnd.
    carry: f64,
}

impl Cubic {
    fn begin_epoch(&mut self, cwnd_segments: f64, now: Duration) {
        self.epoch_start = Some(now);
        if cwnd_segments < self.w_max {
            self.k = ((self.w_max - cwnd_segments) / CUBIC_C).cbrt();
            self.origin = self.w_max;
        } else {
            self.k = 0.0;
            self.origin = cwnd_segments;
        }
        self.w_est = cwnd_segments;
    }

    fn grow(&mut self, window: &mut CongestionWindow, bytes: f64) {
        self.carry += bytes;
        let whole = self.carry.floor();
        if whole >= 1.0 {
            window.cwnd = window.cwnd.saturating_add(whole as u32);
            self.carry -= whole;
        }
    }
}

impl CongestionOps for Cubic {
    fn name(&self) -> &'static str {
        "TcpCubic"
    }

    fn increase_window(&mut self, window: &mut CongestionWindow, segments_acked: u32, now: Duration) {
        let remaining = if window.in_slow_start() {
            window.slow_start(segments_acked)
        } else {
            segments_acked
        };
        if remaining == 0 || window.in_slow_start() {
            return;
        }

        let mss = window.mss as f64;
        let cwnd_segments = window.cwnd as f64 / mss;
        if self.epoch_start.is_none() {
            self.begin_epoch(cwnd_segments, now);
        }
        let epoch_start = self.epoch_start.unwrap_or(now);
        let t = now.saturating_sub(epoch_start).as_secs_f64();
        let target = (self.origin + CUBIC_C * (t - self.k).powi(3)).min(1.5 * cwnd_segments);

        let acked = remaining as f64;
        self.w_est += 3.0 * (1.0 - CUBIC_BETA) / (1.0 + CUBIC_BETA) * acked / cwnd_segments;

        let per_segment = if self.w_est > target && self.w_est > cwnd_segments {
            (self.w_est - cwnd_segments) / cwnd_segments
        } else if target > cwnd_segments {
            (target - cwnd_segments) / cwnd_segments
        } else {
            0.01 / cwnd_segments
        };
        self.grow(window, per_segment * acked * mss);
    }

    fn ssthresh(&mut self, window: &CongestionWindow, _bytes_in_flight: u32, _now: Duration) -> u32 {
        let mss = window.mss as f64;
        let cwnd_segments = window.cwnd as f64 / mss;
        self.epoch_start = None;
        self.carry = 0.0;
        self.w_max = if cwnd_segments < self.w_max {
            cwnd_segments * (1.0 + CUBIC_BETA) / 2.0
        } else {
            cwnd_segments
        };
        ((window.cwnd as f64 * CUBIC_BETA) as u32).max(2 * window.mss)
    }

    fn on_timeout(&mut self) {
        self.epoch_start = None;
        self.carry = 0.0;
    }
}

pub fn new_reno() -> Box<dyn CongestionOps> {
    Box::new(NewReno)
}

pub fn cubic() -> Box<dyn CongestionOps> {
    Box::new(Cubic::default())
}

pub type CongestionFactory = fn() -> Box<dyn CongestionOps>;

/// Type registry mapping congestion-control names to constructors.
#[derive(Clone)]
pub struct CongestionRegistry {
    entries: Vec<(&'static str, CongestionFactory)>,
}

impl Default for CongestionRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("TcpNewReno", new_reno);
        registry.register("TcpCubic", cubic);
        registry
    }
}

impl CongestionRegistry {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register (or replace) an implementation under `name`.
    pub fn register(&mut self, name: &'static str, factory: CongestionFactory) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = factory,
            None => self.entries.push((name, factory)),
        }
    }

    pub fn lookup(&self, name: &str) -> EngineResult<VariantHandle> {
        self.entries
            .iter()
            .position(|(n, _)| *n == name)
            .map(|idx| VariantHandle::new(idx as u32, name))
            .ok_or_else(|| EngineError::UnknownTypeId(name.to_string()))
    }

    pub fn instantiate(&self, handle: &VariantHandle) -> EngineResult<Box<dyn CongestionOps>> {
        match self.entries.get(handle.type_id() as usize) {
            Some((name, factory)) if *name == handle.name() => Ok(factory()),
            _ => Err(EngineError::UnknownTypeId(handle.name().to_string())),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(n, _)| *n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: u32 = 1000;

    #[test]
    fn newreno_slow_start_then_linear() {
        let mut cc = NewReno;
        let mut window = CongestionWindow::new(MSS, 2);
        window.ssthresh = 4 * MSS;
        cc.increase_window(&mut window, 1, Duration::ZERO);
        assert_eq!(window.cwnd, 3 * MSS);
        cc.increase_window(&mut window, 1, Duration::ZERO);
        assert_eq!(window.cwnd, 4 * MSS);
        cc.increase_window(&mut window, 1, Duration::ZERO);
        assert_eq!(window.cwnd, 4 * MSS + MSS / 4);
    }

    #[test]
    fn newreno_halves_flight_with_floor() {
        let mut cc = NewReno;
        let window = CongestionWindow::new(MSS, 10);
        assert_eq!(cc.ssthresh(&window, 10 * MSS, Duration::ZERO), 5 * MSS);
        assert_eq!(cc.ssthresh(&window, MSS, Duration::ZERO), 2 * MSS);
    }

    #[test]
    fn cubic_backs_off_by_beta_and_regrows() {
        let mut cc = Cubic::default();
        let mut window = CongestionWindow::new(MSS, 100);
        let ssthresh = cc.ssthresh(&window, window.cwnd, Duration::from_secs(1));
        assert_eq!(ssthresh, 70 * MSS);
        window.ssthresh = ssthresh;
        window.cwnd = ssthresh;

        let before = window.cwnd;
        for ms in 0..2000u64 {
            cc.increase_window(&mut window, 1, Duration::from_secs(1) + Duration::from_millis(ms));
        }
        assert!(window.cwnd > before);
    }

    #[test]
    fn registry_resolves_builtins_only() {
        let registry = CongestionRegistry::default();
        let handle = registry.lookup("TcpCubic").unwrap();
        assert_eq!(registry.instantiate(&handle).unwrap().name(), "TcpCubic");
        assert!(matches!(
            registry.lookup("TcpBbr"),
            Err(EngineError::UnknownTypeId(name)) if name == "TcpBbr"
        ));
        assert_eq!(registry.names().collect::<Vec<_>>(), ["TcpNewReno", "TcpCubic"]);
    }
}
