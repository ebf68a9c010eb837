//! A compact TCP: handshake, cumulative ACKs, fast retransmit with NewReno
//! recovery, and an RFC 6298 retransmission timer.

use crate::congestion::{CongestionOps, CongestionWindow};
use crate::packet::{TcpHeader, flags};
use std::collections::BTreeMap;
use std::net::SocketAddrV4;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MSS: u32 = 1448;
pub const INITIAL_WINDOW_SEGMENTS: u32 = 10;
pub const SEND_BUFFER_BYTES: u32 = 128 * 1024;
const DUP_ACK_THRESHOLD: u32 = 3;
const INITIAL_RTO: Duration = Duration::from_secs(1);
const MIN_RTO: Duration = Duration::from_millis(200);
const MAX_RTO: Duration = Duration::from_secs(60);
const CLOCK_GRANULARITY: Duration = Duration::from_millis(1);

// Sequence-space comparisons modulo 2^32 (RFC 1982 serial numbers).
fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

fn seq_le(a: u32, b: u32) -> bool {
    a == b || seq_lt(a, b)
}

fn seq_gt(a: u32, b: u32) -> bool {
    seq_lt(b, a)
}

fn seq_ge(a: u32, b: u32) -> bool {
    seq_le(b, a)
}

fn seq_max(a: u32, b: u32) -> u32 {
    if seq_lt(a, b) { b } else { a }
}

/// Side effects requested while handling one socket event.
#[derive(Debug, Default)]
pub struct SocketActions {
    pub outgoing: Vec<(TcpHeader, u32)>,
    /// (delay, generation) of a freshly armed retransmission timer.
    pub arm_timer: Option<(Duration, u64)>,
}

#[derive(Debug, Clone, Copy)]
struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
}

impl RttEstimator {
    fn new() -> Self {
        Self {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: INITIAL_RTO,
        }
    }

    fn sample(&mut self, rtt: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(rtt);
                self.rttvar = rtt / 2;
            }
            Some(srtt) => {
                let err = srtt.abs_diff(rtt);
                self.rttvar = (self.rttvar * 3 + err) / 4;
                self.srtt = Some((srtt * 7 + rtt) / 8);
            }
        }
        let srtt = self.srtt.unwrap_or(rtt);
        self.rto = (srtt + (self.rttvar * 4).max(CLOCK_GRANULARITY)).clamp(MIN_RTO, MAX_RTO);
    }

    fn backoff(&mut self) {
        self.rto = (self.rto * 2).min(MAX_RTO);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SenderState {
    SynSent,
    Established,
}

/// The active-open side of a connection, fed by an application.
pub struct TcpSender {
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
    state: SenderState,
    /// Initial send sequence number, carried by the SYN.
    iss: u32,
    cc: Box<dyn CongestionOps>,
    window: CongestionWindow,
    snd_una: u32,
    snd_nxt: u32,
    /// Highest sequence ever sent; `snd_nxt` rewinds below it after a timeout.
    high_tx: u32,
    /// Sequence number one past the last byte the application has written.
    write_end: u32,
    dup_acks: u32,
    /// `Some(recover)` while in fast recovery.
    recover: Option<u32>,
    rtt: RttEstimator,
    /// (sequence that must be acked, send time) of the segment being timed.
    rtt_probe: Option<(u32, Duration)>,
    timer_generation: u64,
    timer_armed: bool,
    retransmissions: u64,
}

impl TcpSender {
    pub fn new(local: SocketAddrV4, remote: SocketAddrV4, cc: Box<dyn CongestionOps>) -> Self {
        Self::with_initial_sequence(local, remote, cc, 0)
    }

    pub fn with_initial_sequence(
        local: SocketAddrV4,
        remote: SocketAddrV4,
        cc: Box<dyn CongestionOps>,
        iss: u32,
    ) -> Self {
        let first = iss.wrapping_add(1);
        Self {
            local,
            remote,
            state: SenderState::SynSent,
            iss,
            cc,
            window: CongestionWindow::new(DEFAULT_MSS, INITIAL_WINDOW_SEGMENTS),
            snd_una: iss,
            snd_nxt: iss,
            high_tx: iss,
            write_end: first,
            dup_acks: 0,
            recover: None,
            rtt: RttEstimator::new(),
            rtt_probe: None,
            timer_generation: 0,
            timer_armed: false,
            retransmissions: 0,
        }
    }

    pub fn congestion_control(&self) -> &str {
        self.cc.name()
    }

    pub fn window(&self) -> CongestionWindow {
        self.window
    }

    pub fn timer_generation(&self) -> u64 {
        self.timer_generation
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    pub fn is_established(&self) -> bool {
        self.state == SenderState::Established
    }

    fn bytes_in_flight(&self) -> u32 {
        self.snd_nxt.wrapping_sub(self.snd_una)
    }

    /// Send the SYN carrying the initial sequence number.
    pub fn connect(&mut self, now: Duration, actions: &mut SocketActions) {
        let first = self.iss.wrapping_add(1);
        actions.outgoing.push((TcpHeader::new(self.iss, 0, flags::SYN), 0));
        self.snd_nxt = first;
        self.high_tx = first;
        self.rtt_probe = Some((first, now));
        self.arm_timer(actions);
    }

    /// Queue `len` application bytes; returns false if the send buffer cannot hold them.
    pub fn write(&mut self, len: u32) -> bool {
        let buffered = self.write_end.wrapping_sub(self.snd_una);
        if buffered.saturating_add(len) > SEND_BUFFER_BYTES {
            return false;
        }
        self.write_end = self.write_end.wrapping_add(len);
        true
    }

    pub fn on_segment(&mut self, header: &TcpHeader, now: Duration, actions: &mut SocketActions) {
        if !header.is_ack() {
            return;
        }
        match self.state {
            SenderState::SynSent => {
                let first = self.iss.wrapping_add(1);
                if header.is_syn() && header.ack_num == first {
                    self.state = SenderState::Established;
                    self.snd_una = first;
                    self.take_rtt_sample(first, now);
                    self.cancel_timer();
                    actions.outgoing.push((
                        TcpHeader::new(first, header.seq_num.wrapping_add(1), flags::ACK),
                        0,
                    ));
                    self.try_send(now, actions);
                }
            }
            SenderState::Established => {
                if header.is_syn() {
                    return;
                }
                let ack = header.ack_num;
                if seq_gt(ack, self.snd_una) && seq_le(ack, self.high_tx) {
                    self.on_new_ack(ack, now, actions);
                } else if ack == self.snd_una && self.snd_nxt != self.snd_una {
                    self.on_duplicate_ack(now, actions);
                }
            }
        }
    }

    fn on_new_ack(&mut self, ack: u32, now: Duration, actions: &mut SocketActions) {
        let newly_acked = ack.wrapping_sub(self.snd_una);
        self.snd_una = ack;
        self.snd_nxt = seq_max(self.snd_nxt, ack);
        self.dup_acks = 0;
        self.take_rtt_sample(ack, now);

        match self.recover {
            Some(recover) if seq_ge(ack, recover) => {
                self.recover = None;
                self.window.cwnd = self.window.ssthresh.max(self.window.mss);
            }
            Some(_) => {
                // Partial ACK: the next hole is lost too.
                self.retransmit_head(actions);
                self.window.cwnd = self
                    .window
                    .cwnd
                    .saturating_sub(newly_acked)
                    .saturating_add(self.window.mss)
                    .max(self.window.mss);
            }
            None => {
                let segments = newly_acked.div_ceil(self.window.mss);
                self.cc.increase_window(&mut self.window, segments, now);
            }
        }

        if self.snd_una == self.snd_nxt {
            self.cancel_timer();
        } else {
            self.arm_timer(actions);
        }
        self.try_send(now, actions);
    }

    fn on_duplicate_ack(&mut self, now: Duration, actions: &mut SocketActions) {
        self.dup_acks += 1;
        if self.recover.is_some() {
            self.window.cwnd = self.window.cwnd.saturating_add(self.window.mss);
            self.try_send(now, actions);
        } else if self.dup_acks == DUP_ACK_THRESHOLD {
            let flight = self.bytes_in_flight();
            self.window.ssthresh = self.cc.ssthresh(&self.window, flight, now);
            self.window.cwnd = self.window.ssthresh + DUP_ACK_THRESHOLD * self.window.mss;
            self.recover = Some(self.snd_nxt);
            debug!(
                "{} -> {}: fast retransmit of seq {}, ssthresh={}",
                self.local, self.remote, self.snd_una, self.window.ssthresh
            );
            self.retransmit_head(actions);
            self.arm_timer(actions);
        }
    }

    pub fn on_retransmit_timeout(&mut self, now: Duration, actions: &mut SocketActions) {
        self.timer_armed = false;
        self.rtt.backoff();
        self.rtt_probe = None;

        if self.state == SenderState::SynSent {
            self.retransmissions += 1;
            actions
                .outgoing
                .push((TcpHeader::new(self.iss, 0, flags::SYN), 0));
            self.arm_timer(actions);
            return;
        }
        if self.snd_una == self.snd_nxt {
            return;
        }
        self.retransmissions += 1;

        let flight = self.bytes_in_flight();
        self.window.ssthresh = self.cc.ssthresh(&self.window, flight, now);
        self.window.cwnd = self.window.mss;
        self.cc.on_timeout();
        self.recover = None;
        self.dup_acks = 0;
        self.snd_nxt = self.snd_una;
        debug!(
            "{} -> {}: retransmission timeout, rewinding to seq {} (rto={:?})",
            self.local, self.remote, self.snd_una, self.rtt.rto
        );
        self.try_send(now, actions);
        self.arm_timer(actions);
    }

    /// Emit as many new segments as the congestion window allows.
    pub fn try_send(&mut self, now: Duration, actions: &mut SocketActions) {
        if self.state != SenderState::Established {
            return;
        }
        while seq_lt(self.snd_nxt, self.write_end) {
            let len = self.write_end.wrapping_sub(self.snd_nxt).min(self.window.mss);
            let flight = self.bytes_in_flight();
            if flight > 0 && flight + len > self.window.cwnd {
                break;
            }
            actions
                .outgoing
                .push((TcpHeader::new(self.snd_nxt, 0, flags::ACK), len));
            self.snd_nxt = self.snd_nxt.wrapping_add(len);
            self.high_tx = seq_max(self.high_tx, self.snd_nxt);
            if self.rtt_probe.is_none() {
                self.rtt_probe = Some((self.snd_nxt, now));
            }
            if !self.timer_armed {
                self.arm_timer(actions);
            }
        }
    }

    fn retransmit_head(&mut self, actions: &mut SocketActions) {
        let len = self.bytes_in_flight().min(self.window.mss);
        if len == 0 {
            return;
        }
        self.retransmissions += 1;
        // Karn: never time a retransmitted segment.
        self.rtt_probe = None;
        actions
            .outgoing
            .push((TcpHeader::new(self.snd_una, 0, flags::ACK), len));
    }

    fn take_rtt_sample(&mut self, ack: u32, now: Duration) {
        if let Some((end, sent_at)) = self.rtt_probe
            && seq_ge(ack, end)
        {
            self.rtt.sample(now.saturating_sub(sent_at));
            self.rtt_probe = None;
        }
    }

    fn arm_timer(&mut self, actions: &mut SocketActions) {
        self.timer_generation += 1;
        self.timer_armed = true;
        actions.arm_timer = Some((self.rtt.rto, self.timer_generation));
    }

    fn cancel_timer(&mut self) {
        self.timer_generation += 1;
        self.timer_armed = false;
    }
}

/// The passive side of one connection accepted by a sink.
#[derive(Debug, Default)]
pub struct TcpReceiver {
    synchronized: bool,
    rcv_nxt: u32,
    /// Out-of-order segments keyed by start sequence, valued by length.
    out_of_order: BTreeMap<u32, u32>,
    delivered_bytes: u64,
}

impl TcpReceiver {
    pub fn delivered_bytes(&self) -> u64 {
        self.delivered_bytes
    }

    /// Process one incoming segment and return the reply, if any.
    pub fn on_segment(&mut self, header: &TcpHeader, payload_len: u32) -> Option<TcpHeader> {
        if header.is_syn() {
            // A retransmitted SYN must not rewind an open connection.
            if !self.synchronized {
                self.synchronized = true;
                self.rcv_nxt = header.seq_num.wrapping_add(1);
            }
            let ack = header.seq_num.wrapping_add(1);
            return Some(TcpHeader::new(0, ack, flags::SYN | flags::ACK));
        }
        if payload_len == 0 || !self.synchronized {
            return None;
        }

        let seq = header.seq_num;
        if seq == self.rcv_nxt {
            self.advance(payload_len);
            // Map keys are raw sequence numbers, so order is lost across the wrap.
            while let Some((start, len)) = self
                .out_of_order
                .iter()
                .map(|(&start, &len)| (start, len))
                .find(|&(start, _)| seq_le(start, self.rcv_nxt))
            {
                self.out_of_order.remove(&start);
                let end = start.wrapping_add(len);
                if seq_gt(end, self.rcv_nxt) {
                    self.advance(end.wrapping_sub(self.rcv_nxt));
                }
            }
        } else if seq_gt(seq, self.rcv_nxt) {
            let entry = self.out_of_order.entry(seq).or_insert(0);
            *entry = (*entry).max(payload_len);
        }
        Some(TcpHeader::new(1, self.rcv_nxt, flags::ACK))
    }

    fn advance(&mut self, len: u32) {
        self.rcv_nxt = self.rcv_nxt.wrapping_add(len);
        self.delivered_bytes += len as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::NewReno;
    use std::net::Ipv4Addr;

    fn sender() -> TcpSender {
        TcpSender::new(
            SocketAddrV4::new(Ipv4Addr::new(10, 2, 1, 1), 49153),
            SocketAddrV4::new(Ipv4Addr::new(10, 3, 1, 2), 9),
            Box::new(NewReno),
        )
    }

    fn established(now: Duration) -> (TcpSender, SocketActions) {
        let mut tx = sender();
        let mut actions = SocketActions::default();
        tx.connect(Duration::ZERO, &mut actions);
        let syn_ack = TcpHeader::new(0, 1, flags::SYN | flags::ACK);
        let mut actions = SocketActions::default();
        tx.on_segment(&syn_ack, now, &mut actions);
        (tx, actions)
    }

    fn ack(n: u32) -> TcpHeader {
        TcpHeader::new(1, n, flags::ACK)
    }

    #[test]
    fn handshake_then_initial_window() {
        let (mut tx, actions) = established(Duration::from_millis(20));
        assert!(tx.is_established());
        assert_eq!(actions.outgoing.len(), 1, "only the handshake ACK");

        assert!(tx.write(20 * DEFAULT_MSS));
        let mut actions = SocketActions::default();
        tx.try_send(Duration::from_millis(20), &mut actions);
        assert_eq!(actions.outgoing.len(), INITIAL_WINDOW_SEGMENTS as usize);
        assert!(actions.outgoing.iter().all(|(_, len)| *len == DEFAULT_MSS));
        assert!(actions.arm_timer.is_some());
    }

    #[test]
    fn send_buffer_rejects_overflow() {
        let mut tx = sender();
        assert!(tx.write(SEND_BUFFER_BYTES - 1));
        assert!(!tx.write(2));
    }

    #[test]
    fn three_dup_acks_trigger_fast_retransmit() {
        let (mut tx, _) = established(Duration::from_millis(20));
        tx.write(10 * DEFAULT_MSS);
        let mut actions = SocketActions::default();
        tx.try_send(Duration::from_millis(20), &mut actions);

        let mut actions = SocketActions::default();
        for _ in 0..3 {
            tx.on_segment(&ack(1), Duration::from_millis(40), &mut actions);
        }
        assert_eq!(actions.outgoing.len(), 1);
        assert_eq!(actions.outgoing[0].0.seq_num, 1);
        assert_eq!(tx.window().ssthresh, 5 * DEFAULT_MSS);
        assert_eq!(tx.retransmissions(), 1);
    }

    #[test]
    fn timeout_collapses_window() {
        let (mut tx, _) = established(Duration::from_millis(20));
        tx.write(4 * DEFAULT_MSS);
        let mut actions = SocketActions::default();
        tx.try_send(Duration::from_millis(20), &mut actions);

        let mut actions = SocketActions::default();
        tx.on_retransmit_timeout(Duration::from_secs(2), &mut actions);
        assert_eq!(tx.window().cwnd, DEFAULT_MSS);
        assert_eq!(actions.outgoing.len(), 1);
        assert_eq!(actions.outgoing[0].0.seq_num, 1);
    }

    #[test]
    fn receiver_reassembles_out_of_order() {
        let mut rx = TcpReceiver::default();
        let syn_ack = rx.on_segment(&TcpHeader::new(0, 0, flags::SYN), 0).unwrap();
        assert_eq!(syn_ack.ack_num, 1);

        let reply = rx.on_segment(&TcpHeader::new(101, 0, flags::ACK), 100).unwrap();
        assert_eq!(reply.ack_num, 1, "gap keeps the cumulative ACK");
        let reply = rx.on_segment(&TcpHeader::new(1, 0, flags::ACK), 100).unwrap();
        assert_eq!(reply.ack_num, 201);
        assert_eq!(rx.delivered_bytes(), 200);
        assert!(rx.on_segment(&ack(1), 0).is_none());
    }

    #[test]
    fn sequence_numbers_wrap_around() {
        let iss = u32::MAX - 100;
        let mut tx = TcpSender::with_initial_sequence(
            SocketAddrV4::new(Ipv4Addr::new(10, 2, 1, 1), 49153),
            SocketAddrV4::new(Ipv4Addr::new(10, 3, 1, 2), 9),
            Box::new(NewReno),
            iss,
        );
        let mut rx = TcpReceiver::default();

        let mut actions = SocketActions::default();
        tx.connect(Duration::ZERO, &mut actions);
        let (syn, _) = actions.outgoing[0];
        assert_eq!(syn.seq_num, iss);
        let syn_ack = rx.on_segment(&syn, 0).unwrap();
        let mut actions = SocketActions::default();
        tx.on_segment(&syn_ack, Duration::from_millis(20), &mut actions);
        assert!(tx.is_established());

        assert!(tx.write(512));
        let mut actions = SocketActions::default();
        tx.try_send(Duration::from_millis(20), &mut actions);
        assert_eq!(actions.outgoing.len(), 1);
        let (segment, len) = actions.outgoing[0];
        assert_eq!((segment.seq_num, len), (iss.wrapping_add(1), 512));

        let reply = rx.on_segment(&segment, len).unwrap();
        assert_eq!(reply.ack_num, iss.wrapping_add(513));
        assert!(reply.ack_num < iss, "ack wrapped past zero");
        let mut actions = SocketActions::default();
        tx.on_segment(&reply, Duration::from_millis(40), &mut actions);
        assert_eq!(tx.bytes_in_flight(), 0);
        assert_eq!(tx.retransmissions(), 0);
        assert_eq!(rx.delivered_bytes(), 512);
    }

    #[test]
    fn receiver_reassembles_across_wrap() {
        let iss = u32::MAX - 50;
        let mut rx = TcpReceiver::default();
        rx.on_segment(&TcpHeader::new(iss, 0, flags::SYN), 0).unwrap();
        let first = iss.wrapping_add(1);

        // Second segment lands past zero before the one that straddles the wrap.
        let second = first.wrapping_add(100);
        let reply = rx.on_segment(&TcpHeader::new(second, 0, flags::ACK), 100).unwrap();
        assert_eq!(reply.ack_num, first);
        let reply = rx.on_segment(&TcpHeader::new(first, 0, flags::ACK), 100).unwrap();
        assert_eq!(reply.ack_num, first.wrapping_add(200));
        assert_eq!(rx.delivered_bytes(), 200);

        // A stale retransmission from before the wrap is not buffered.
        let reply = rx.on_segment(&TcpHeader::new(first, 0, flags::ACK), 100).unwrap();
        assert_eq!(reply.ack_num, first.wrapping_add(200));
        assert_eq!(rx.delivered_bytes(), 200);
    }
}
