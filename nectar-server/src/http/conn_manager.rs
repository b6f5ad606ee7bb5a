//! HTTP/2 connection lifecycle coordination.
//!
//! [`ConnectionManager`] tracks the open streams of one HTTP/2
//! connection and sequences graceful shutdown: an initial GOAWAY with
//! no last-stream-id, a PING carrying a fresh opaque payload, and —
//! once the peer acknowledges that PING — the authoritative GOAWAY
//! with the highest stream id actually seen. The two-step sequence
//! lets streams the peer already started reach the server before the
//! final GOAWAY.
//!
//! The manager is a pure state machine: events in, at most one
//! [`Action`] out. The h2 driver owns the wire side.

use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

/// An opaque 64-bit PING payload.
pub type PingData = [u8; 8];

const PING_FLOOD_WINDOW: Duration = Duration::from_secs(1);
const PING_FLOOD_MAX: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    /// Shutdown initiated; `Some` until the PING round-trip confirms
    /// the peer saw the initial GOAWAY.
    Draining(Option<PingData>),
    Closed,
}

/// What the wire side must do in reaction to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The open-stream set became empty; start the connection idle
    /// timer.
    StartIdleTimer,
    /// Send a GOAWAY advertising no last stream id, followed by a
    /// PING with this payload.
    SendGoAwayAndPing(PingData),
    /// Send the authoritative GOAWAY; `close` when no stream remains.
    SendGoAway { last_stream_id: u32, close: bool },
    /// The last in-flight stream finished after the final GOAWAY.
    Close,
    /// PING flood detected; send ENHANCE_YOUR_CALM and close.
    EnhanceYourCalmAndClose { last_stream_id: u32 },
}

pub struct ConnectionManager {
    state: State,
    open_streams: HashSet<u32>,
    max_seen_stream_id: u32,
    recent_pings: Vec<Instant>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            state: State::Active,
            open_streams: HashSet::new(),
            max_seen_stream_id: 0,
            recent_pings: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    pub fn is_draining(&self) -> bool {
        matches!(self.state, State::Draining(_))
    }

    pub fn open_stream_count(&self) -> usize {
        self.open_streams.len()
    }

    pub fn max_seen_stream_id(&self) -> u32 {
        self.max_seen_stream_id
    }

    pub fn stream_opened(&mut self, id: u32) -> Option<Action> {
        if self.state == State::Closed {
            return None;
        }
        self.recent_pings.clear();
        self.open_streams.insert(id);
        if id > self.max_seen_stream_id {
            self.max_seen_stream_id = id;
        }
        None
    }

    pub fn stream_closed(&mut self, id: u32) -> Option<Action> {
        if self.state == State::Closed {
            return None;
        }
        self.recent_pings.clear();
        self.open_streams.remove(&id);
        if !self.open_streams.is_empty() {
            return None;
        }
        match self.state {
            State::Active => Some(Action::StartIdleTimer),
            // Final GOAWAY already went out; nothing is left to wait for.
            State::Draining(None) => {
                self.state = State::Closed;
                Some(Action::Close)
            }
            State::Draining(Some(_)) => None,
            State::Closed => unreachable!(),
        }
    }

    pub fn trigger_graceful_shutdown(&mut self) -> Option<Action> {
        match self.state {
            State::Active => {
                let ping: PingData = rand::random();
                self.state = State::Draining(Some(ping));
                Some(Action::SendGoAwayAndPing(ping))
            }
            _ => None,
        }
    }

    pub fn received_ping_ack(&mut self, data: PingData) -> Option<Action> {
        match self.state {
            State::Draining(Some(expected)) if expected == data => {
                let close = self.open_streams.is_empty();
                self.state = if close {
                    State::Closed
                } else {
                    State::Draining(None)
                };
                Some(Action::SendGoAway {
                    last_stream_id: self.max_seen_stream_id,
                    close,
                })
            }
            _ => None,
        }
    }

    /// A PING (not an ack) arrived. More than two within a second with
    /// no stream activity in between reads as a flood.
    pub fn received_ping(&mut self, now: Instant) -> Option<Action> {
        if self.state == State::Closed {
            return None;
        }
        self.recent_pings
            .retain(|t| now.duration_since(*t) < PING_FLOOD_WINDOW);
        self.recent_pings.push(now);
        if self.recent_pings.len() > PING_FLOOD_MAX {
            self.state = State::Closed;
            return Some(Action::EnhanceYourCalmAndClose {
                last_stream_id: self.max_seen_stream_id,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graceful_shutdown_round_trip() {
        let mut mgr = ConnectionManager::new();
        assert_eq!(mgr.stream_opened(2), None);
        assert_eq!(mgr.stream_closed(2), Some(Action::StartIdleTimer));

        let ping = match mgr.trigger_graceful_shutdown() {
            Some(Action::SendGoAwayAndPing(ping)) => ping,
            other => panic!("unexpected action: {other:?}"),
        };
        assert_eq!(
            mgr.received_ping_ack(ping),
            Some(Action::SendGoAway {
                last_stream_id: 2,
                close: true
            })
        );
        assert!(mgr.is_closed());

        // Everything after close is a no-op.
        assert_eq!(mgr.stream_opened(4), None);
        assert_eq!(mgr.stream_closed(4), None);
        assert_eq!(mgr.trigger_graceful_shutdown(), None);
        assert_eq!(mgr.received_ping_ack(ping), None);
    }

    #[test]
    fn draining_waits_for_open_streams() {
        let mut mgr = ConnectionManager::new();
        mgr.stream_opened(1);
        mgr.stream_opened(3);
        mgr.stream_closed(1);

        let ping = match mgr.trigger_graceful_shutdown() {
            Some(Action::SendGoAwayAndPing(ping)) => ping,
            other => panic!("unexpected action: {other:?}"),
        };
        // A stream the peer started before our GOAWAY may still arrive.
        assert_eq!(mgr.stream_opened(5), None);
        assert_eq!(
            mgr.received_ping_ack(ping),
            Some(Action::SendGoAway {
                last_stream_id: 5,
                close: false
            })
        );
        assert!(!mgr.is_closed());

        assert_eq!(mgr.stream_closed(3), None);
        assert_eq!(mgr.stream_closed(5), Some(Action::Close));
        assert!(mgr.is_closed());
    }

    #[test]
    fn mismatched_ping_ack_is_ignored() {
        let mut mgr = ConnectionManager::new();
        mgr.stream_opened(2);
        let ping = match mgr.trigger_graceful_shutdown() {
            Some(Action::SendGoAwayAndPing(ping)) => ping,
            other => panic!("unexpected action: {other:?}"),
        };
        let mut wrong = ping;
        wrong[0] = wrong[0].wrapping_add(1);
        assert_eq!(mgr.received_ping_ack(wrong), None);
        assert!(mgr.is_draining());
        assert!(mgr.received_ping_ack(ping).is_some());
    }

    #[test]
    fn repeated_trigger_sends_one_goaway_sequence() {
        let mut mgr = ConnectionManager::new();
        assert!(mgr.trigger_graceful_shutdown().is_some());
        assert_eq!(mgr.trigger_graceful_shutdown(), None);
    }

    #[test]
    fn ping_flood_trips_enhance_your_calm() {
        let mut mgr = ConnectionManager::new();
        mgr.stream_opened(7);
        let t0 = Instant::now();
        assert_eq!(mgr.received_ping(t0), None);
        assert_eq!(mgr.received_ping(t0 + Duration::from_millis(100)), None);
        assert_eq!(
            mgr.received_ping(t0 + Duration::from_millis(200)),
            Some(Action::EnhanceYourCalmAndClose { last_stream_id: 7 })
        );
        assert!(mgr.is_closed());
    }

    #[test]
    fn stream_activity_resets_ping_flood_window() {
        let mut mgr = ConnectionManager::new();
        let t0 = Instant::now();
        mgr.received_ping(t0);
        mgr.received_ping(t0 + Duration::from_millis(100));
        mgr.stream_opened(1);
        assert_eq!(mgr.received_ping(t0 + Duration::from_millis(200)), None);
    }

    #[test]
    fn spaced_pings_are_fine() {
        let mut mgr = ConnectionManager::new();
        let t0 = Instant::now();
        for i in 0..10 {
            assert_eq!(mgr.received_ping(t0 + Duration::from_secs(i * 2)), None);
        }
    }
}
