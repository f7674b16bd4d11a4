/*!
 # Status notification parser

 After a command the device first sends an acknowledgement (`F0 02 01`) and
 then, if asked, a status frame. Frames carry no request id, so a status frame
 is only trusted when it follows an acknowledgement within a fixed window:

 ```text
 Idle --ACK--> AwaitingStatus --status (within window)--> Idle (apply)
                              --any frame (window expired)--> Idle (discard)
 ```

 Frames that decode to nothing are logged and ignored in every state.
*/

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::codec::{self, Frame, PowerStatus};

/// How long a received acknowledgement stays valid
pub const DEFAULT_ACK_WINDOW: Duration = Duration::from_secs(10);

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Idle,
    /// An acknowledgement arrived at the given instant
    AwaitingStatus(Instant),
}

/// Turns raw notifications into power/brightness updates
#[derive(Debug)]
pub struct StatusParser {
    address: String,
    window: Duration,
    state: ParserState,
}

impl StatusParser {
    pub fn new(address: impl Into<String>, window: Duration) -> Self {
        Self {
            address: address.into(),
            window,
            state: ParserState::Idle,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Forgets any pending acknowledgement before a new query
    pub fn reset(&mut self) {
        if self.state != ParserState::Idle {
            debug!("{}: Dropping unanswered acknowledgement", self.address);
        }
        self.state = ParserState::Idle;
    }

    /// Feeds one notification received at `now`.
    ///
    /// Returns the status to apply, if this frame completes an
    /// acknowledgement/status pair.
    pub fn feed(&mut self, data: &[u8], now: Instant) -> Option<PowerStatus> {
        let frame = codec::decode_frame(data);
        trace!("{}: Notification {} -> {:?}", self.address, hex::encode(data), frame);

        if frame == Frame::Unrecognized {
            debug!(
                "{}: Ignoring unrecognized notification {}",
                self.address,
                hex::encode(data)
            );
            return None;
        }

        if let ParserState::AwaitingStatus(acked_at) = self.state {
            if now.saturating_duration_since(acked_at) > self.window {
                debug!(
                    "{}: Message received outside of acceptable time range. Ignoring.",
                    self.address
                );
                self.state = ParserState::Idle;
                return None;
            }
        }

        match (self.state, frame) {
            (_, Frame::Ack) => {
                debug!(
                    "{}: Received status message preamble. Waiting for status message...",
                    self.address
                );
                self.state = ParserState::AwaitingStatus(now);
                None
            }
            (ParserState::AwaitingStatus(_), Frame::Status { status, .. }) => {
                debug!(
                    "{}: Device status reported as {}. On: {}, Brightness: {}",
                    self.address,
                    hex::encode(data),
                    status.on,
                    status.brightness
                );
                self.state = ParserState::Idle;
                Some(status)
            }
            (ParserState::Idle, Frame::Status { .. }) => {
                debug!(
                    "{}: Status message without preamble. Ignoring.",
                    self.address
                );
                None
            }
            (_, Frame::Unrecognized) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ACK_FRAME;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    const STATUS: [u8; 5] = [0x0f, 0x01, 0x7f, 0x00, 0x00];

    fn parser() -> StatusParser {
        StatusParser::new("AA:BB", DEFAULT_ACK_WINDOW)
    }

    #[test]
    fn status_within_window_is_applied() {
        let mut parser = parser();
        let t0 = Instant::now();
        assert_eq!(None, parser.feed(&ACK_FRAME, t0));
        assert_eq!(ParserState::AwaitingStatus(t0), parser.state());

        assert_eq!(
            Some(PowerStatus {
                on: true,
                brightness: 127
            }),
            parser.feed(&STATUS, t0 + Duration::from_secs(9))
        );
        assert_eq!(ParserState::Idle, parser.state());
    }

    #[test]
    fn status_after_window_is_discarded() {
        let mut parser = parser();
        let t0 = Instant::now();
        parser.feed(&ACK_FRAME, t0);
        assert_eq!(None, parser.feed(&STATUS, t0 + Duration::from_secs(11)));
        assert_eq!(ParserState::Idle, parser.state());
    }

    #[test]
    fn window_edge_is_inclusive() {
        let mut parser = parser();
        let t0 = Instant::now();
        parser.feed(&ACK_FRAME, t0);
        assert!(parser.feed(&STATUS, t0 + DEFAULT_ACK_WINDOW).is_some());
    }

    #[test]
    fn status_without_ack_is_ignored() {
        let mut parser = parser();
        assert_eq!(None, parser.feed(&STATUS, Instant::now()));
        assert_eq!(ParserState::Idle, parser.state());
    }

    #[test]
    fn status_is_consumed_once() {
        let mut parser = parser();
        let t0 = Instant::now();
        parser.feed(&ACK_FRAME, t0);
        assert!(parser.feed(&STATUS, t0).is_some());
        assert_eq!(None, parser.feed(&STATUS, t0));
    }

    #[test]
    fn expired_window_swallows_the_next_ack_too() {
        let mut parser = parser();
        let t0 = Instant::now();
        parser.feed(&ACK_FRAME, t0);

        let late = t0 + Duration::from_secs(30);
        assert_eq!(None, parser.feed(&ACK_FRAME, late));
        assert_eq!(ParserState::Idle, parser.state());

        parser.feed(&ACK_FRAME, late);
        assert_matches!(parser.state(), ParserState::AwaitingStatus(at) if at == late);
    }

    #[test]
    fn reset_clears_a_stale_window() {
        let mut parser = parser();
        let t0 = Instant::now();
        parser.feed(&ACK_FRAME, t0);

        let later = t0 + Duration::from_secs(30);
        parser.reset();
        assert_eq!(ParserState::Idle, parser.state());
        assert_eq!(None, parser.feed(&ACK_FRAME, later));
        assert!(parser.feed(&STATUS, later).is_some());
    }

    #[test]
    fn garbage_leaves_state_alone() {
        let mut parser = parser();
        let t0 = Instant::now();
        parser.feed(&ACK_FRAME, t0);
        assert_eq!(None, parser.feed(&[0xde, 0xad], t0 + Duration::from_secs(60)));
        assert_eq!(ParserState::AwaitingStatus(t0), parser.state());
    }

    #[test]
    fn repeated_ack_rearms_the_window() {
        let mut parser = parser();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(8);
        parser.feed(&ACK_FRAME, t0);
        parser.feed(&ACK_FRAME, t1);
        assert!(parser.feed(&STATUS, t1 + Duration::from_secs(9)).is_some());
    }
}
