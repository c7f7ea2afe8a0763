//! Request/response engine: the owner drives it with `send_*`, `receive` and `tick`.

use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::registry::Registry;
use crate::status::{EngineError, Status};
use crate::transport::Transport;
use crate::wire::{self, Direction, Header, Id, Payload};

/// Engine state. The expected id only exists while a response is awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    AwaitingResponse { id: Id, elapsed: u32 },
}

/// Single-link protocol engine. At most one request is outstanding at a time.
pub struct Engine<T> {
    handlers: Registry,
    transport: T,
    round_trip_budget: u32,
    state: State,
}

impl<T: Transport> Engine<T> {
    pub fn new(config: Config, transport: T) -> Self {
        Self::with_handlers(config, transport, Registry::new())
    }

    pub fn with_handlers(config: Config, transport: T, handlers: Registry) -> Self {
        Self {
            handlers,
            transport,
            round_trip_budget: config.round_trip_budget,
            state: State::Idle,
        }
    }

    /// Replace the handler table. Call during setup.
    pub fn set_handlers(&mut self, handlers: Registry) {
        self.handlers = handlers;
    }

    pub fn handlers_mut(&mut self) -> &mut Registry {
        &mut self.handlers
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_awaiting_response(&self) -> bool {
        matches!(self.state, State::AwaitingResponse { .. })
    }

    pub fn expected_id(&self) -> Option<Id> {
        match self.state {
            State::AwaitingResponse { id, .. } => Some(id),
            State::Idle => None,
        }
    }

    pub fn round_trip_budget(&self) -> u32 {
        self.round_trip_budget
    }

    /// Send a request. With `want_response`, the engine waits for the matching
    /// response (or the round-trip budget) once the transport accepted the frame.
    ///
    /// Fails with `Busy` while a previous request is still awaiting its response,
    /// whatever `want_response` is.
    pub fn send_request(
        &mut self,
        id: u8,
        payload: &[u8],
        want_response: bool,
    ) -> Result<(), EngineError> {
        let id = Id::new(id)?;
        let frame = wire::encode_frame(Header::request(id, want_response), payload)?;
        if let State::AwaitingResponse { id: pending, .. } = self.state {
            debug!(id = %id, pending = %pending, "request rejected, response outstanding");
            return Err(EngineError::Busy);
        }
        trace!(id = %id, len = frame.len(), want_response, "sending request");
        self.transport.send(&frame)?;
        if want_response {
            self.state = State::AwaitingResponse { id, elapsed: 0 };
            debug!(id = %id, budget = self.round_trip_budget, "awaiting response");
        }
        Ok(())
    }

    /// Send a response. Not gated by the engine state.
    pub fn send_response(&mut self, id: u8, ack: bool, payload: &[u8]) -> Result<(), EngineError> {
        let id = Id::new(id)?;
        self.send_frame(Header::response(id, ack), payload)
    }

    fn send_frame(&mut self, header: Header, payload: &[u8]) -> Result<(), EngineError> {
        let frame = wire::encode_frame(header, payload)?;
        trace!(header = frame[0], len = frame.len(), "sending frame");
        self.transport.send(&frame)?;
        Ok(())
    }

    /// Process one inbound frame.
    pub fn receive(&mut self, bytes: &[u8]) {
        let Some((header, payload)) = wire::decode_frame(bytes) else {
            warn!("dropping empty frame");
            return;
        };
        match header.direction {
            Direction::Request => self.on_request(header, payload),
            Direction::Response => self.on_response(header, payload),
        }
    }

    fn on_request(&mut self, header: Header, payload: &[u8]) {
        let mut output = Payload::new();
        let status = self
            .handlers
            .lookup(header.id)
            .and_then(|e| e.handler_mut().handle_request(payload, &mut output));

        // Unknown ids are always reported; known ids only when the peer asked.
        let nack = match status {
            None => {
                debug!(id = %header.id, "request for unknown id");
                Some(Status::UnknownId)
            }
            Some(_) if !header.flag => return,
            Some(Status::NoError) => None,
            Some(s) => {
                debug!(id = %header.id, status = %s, "request handler failed");
                Some(s)
            }
        };
        let sent = match nack {
            None => self.send_frame(Header::response(header.id, true), &output),
            Some(s) => self.send_frame(Header::response(header.id, false), &[s.code()]),
        };
        if let Err(e) = sent {
            warn!(id = %header.id, error = %e, "failed to send reply");
        }
    }

    fn on_response(&mut self, header: Header, payload: &[u8]) {
        match self.state {
            State::AwaitingResponse { id, .. } if id == header.id => {}
            State::AwaitingResponse { id, .. } => {
                trace!(expected = %id, got = %header.id, "dropping response for another id");
                return;
            }
            State::Idle => {
                trace!(id = %header.id, "dropping unsolicited response");
                return;
            }
        }
        self.state = State::Idle;
        let status = if header.flag {
            Status::NoError
        } else {
            Status::NackReceived
        };
        debug!(id = %header.id, status = %status, "response received");
        self.notify(header.id, status, payload);
    }

    /// Advance the response timer by `elapsed` (same unit as the round-trip budget).
    pub fn tick(&mut self, elapsed: u32) {
        let State::AwaitingResponse { id, elapsed: waited } = &mut self.state else {
            return;
        };
        *waited = waited.saturating_add(elapsed);
        if *waited <= self.round_trip_budget {
            return;
        }
        let id = *id;
        self.state = State::Idle;
        debug!(id = %id, budget = self.round_trip_budget, "request timed out");
        self.notify(id, Status::Timeout, &[]);
    }

    fn notify(&mut self, id: Id, status: Status, payload: &[u8]) {
        if let Some(entry) = self.handlers.lookup(id) {
            entry.handler_mut().handle_response(status, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FnHandler, HandlerEntry};
    use crate::status::TransportError;
    use rand::Rng;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        frames: Vec<Vec<u8>>,
        fail_with: Option<i32>,
    }

    impl Transport for Recorder {
        fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            if let Some(code) = self.fail_with {
                return Err(TransportError::Code(code));
            }
            self.frames.push(frame.to_vec());
            Ok(())
        }
    }

    type Calls = Rc<RefCell<Vec<(Status, Vec<u8>)>>>;

    fn id(n: u8) -> Id {
        Id::new(n).unwrap()
    }

    fn response_recorder(n: u8, calls: &Calls) -> HandlerEntry {
        let calls = calls.clone();
        HandlerEntry::new(
            id(n),
            FnHandler::new().on_response(move |s, p| calls.borrow_mut().push((s, p.to_vec()))),
        )
    }

    fn engine(budget: u32, entries: Vec<HandlerEntry>) -> Engine<Recorder> {
        Engine::with_handlers(
            Config::with_round_trip_budget(budget),
            Recorder::default(),
            Registry::with_entries(entries),
        )
    }

    #[test]
    fn second_request_rejected_while_awaiting() {
        for n in 0..=wire::MAX_ID {
            let mut e = engine(100, vec![]);
            e.send_request(n, &[1], true).unwrap();
            assert_eq!(e.expected_id(), Some(id(n)));
            let other = (n + 1) % 64;
            assert!(matches!(
                e.send_request(other, &[2], true),
                Err(EngineError::Busy)
            ));
            assert!(matches!(
                e.send_request(other, &[], false),
                Err(EngineError::Busy)
            ));
            assert_eq!(e.transport().frames.len(), 1);
        }
    }

    #[test]
    fn request_frame_layout() {
        let mut e = engine(100, vec![]);
        e.send_request(5, &[1, 2], true).unwrap();
        assert_eq!(e.transport().frames[0], vec![0xC5, 1, 2]);
    }

    #[test]
    fn request_without_response_stays_idle() {
        let mut e = engine(100, vec![]);
        e.send_request(5, &[1], false).unwrap();
        e.send_request(6, &[2], false).unwrap();
        assert_eq!(e.state(), State::Idle);
        assert_eq!(e.transport().frames, vec![vec![0x85, 1], vec![0x86, 2]]);
    }

    #[test]
    fn round_trip_ack() {
        let calls = Calls::default();
        let mut e = engine(100, vec![response_recorder(5, &calls)]);
        e.send_request(5, &[1, 2], true).unwrap();
        e.receive(&[0x45, 9]);
        assert_eq!(*calls.borrow(), vec![(Status::NoError, vec![9])]);
        assert_eq!(e.state(), State::Idle);
        assert!(e.send_request(5, &[3], true).is_ok());
    }

    #[test]
    fn round_trip_nack() {
        let calls = Calls::default();
        let mut e = engine(100, vec![response_recorder(12, &calls)]);
        e.send_request(12, &[], true).unwrap();
        e.receive(&[0x0C, Status::UnknownPayload.code()]);
        assert_eq!(
            *calls.borrow(),
            vec![(Status::NackReceived, vec![Status::UnknownPayload.code()])]
        );
        assert!(!e.is_awaiting_response());
    }

    #[test]
    fn matched_response_without_handler_returns_idle() {
        let mut e = engine(100, vec![]);
        e.send_request(3, &[], true).unwrap();
        e.receive(&[0x43]);
        assert_eq!(e.state(), State::Idle);
    }

    #[test]
    fn timeout_fires_once() {
        let calls = Calls::default();
        let mut e = engine(100, vec![response_recorder(5, &calls)]);
        e.send_request(5, &[1, 2], true).unwrap();
        e.tick(60);
        assert!(calls.borrow().is_empty());
        assert_eq!(
            e.state(),
            State::AwaitingResponse {
                id: id(5),
                elapsed: 60
            }
        );
        e.tick(41);
        assert_eq!(*calls.borrow(), vec![(Status::Timeout, vec![])]);
        assert_eq!(e.expected_id(), None);
        e.tick(1000);
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn budget_reached_is_not_exceeded() {
        let calls = Calls::default();
        let mut e = engine(100, vec![response_recorder(1, &calls)]);
        e.send_request(1, &[], true).unwrap();
        e.tick(100);
        assert!(calls.borrow().is_empty());
        assert!(e.is_awaiting_response());
        e.tick(1);
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn tick_saturates() {
        let calls = Calls::default();
        let mut e = engine(u32::MAX, vec![response_recorder(1, &calls)]);
        e.send_request(1, &[], true).unwrap();
        e.tick(u32::MAX);
        e.tick(u32::MAX);
        assert!(calls.borrow().is_empty());
        assert!(e.is_awaiting_response());
    }

    #[test]
    fn tick_while_idle_is_noop() {
        let calls = Calls::default();
        let mut e = engine(10, vec![response_recorder(1, &calls)]);
        e.tick(1000);
        assert!(calls.borrow().is_empty());
        assert_eq!(e.state(), State::Idle);
    }

    #[test]
    fn late_response_after_timeout_dropped() {
        let calls = Calls::default();
        let mut e = engine(10, vec![response_recorder(4, &calls)]);
        e.send_request(4, &[], true).unwrap();
        e.tick(11);
        e.receive(&[0x44, 1]);
        assert_eq!(*calls.borrow(), vec![(Status::Timeout, vec![])]);
    }

    #[test]
    fn unknown_id_always_nacked() {
        let mut e = engine(100, vec![]);
        e.receive(&[0x80 | 10, 1, 2]);
        e.receive(&[0xC0 | 10]);
        let nack = vec![10, Status::UnknownId.code()];
        assert_eq!(e.transport().frames, vec![nack.clone(), nack]);
    }

    #[test]
    fn entry_without_request_capability_is_unknown() {
        let calls = Calls::default();
        let mut e = engine(100, vec![response_recorder(10, &calls)]);
        e.receive(&[0x80 | 10]);
        assert_eq!(e.transport().frames, vec![vec![10, Status::UnknownId.code()]]);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn known_request_acked_with_output() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let mut e = engine(
            100,
            vec![HandlerEntry::new(
                id(2),
                FnHandler::new().on_request(move |input, out| {
                    s.borrow_mut().push(input.to_vec());
                    out.extend_from_slice(&[7, 8]).unwrap();
                    Status::NoError
                }),
            )],
        );
        e.receive(&[0xC2, 1]);
        assert_eq!(*seen.borrow(), vec![vec![1]]);
        assert_eq!(e.transport().frames, vec![vec![0x42, 7, 8]]);
    }

    #[test]
    fn known_request_without_enable_bit_gets_no_reply() {
        let count = Rc::new(RefCell::new(0));
        let c = count.clone();
        let mut e = engine(
            100,
            vec![HandlerEntry::new(
                id(2),
                FnHandler::new().on_request(move |_, _| {
                    *c.borrow_mut() += 1;
                    Status::UnknownPayload
                }),
            )],
        );
        e.receive(&[0x82]);
        assert_eq!(*count.borrow(), 1);
        assert!(e.transport().frames.is_empty());
    }

    #[test]
    fn failing_handler_nacked_with_status() {
        let mut e = engine(
            100,
            vec![HandlerEntry::new(
                id(2),
                FnHandler::new().on_request(|_, out| {
                    out.push(0xEE).unwrap();
                    Status::Other(42)
                }),
            )],
        );
        e.receive(&[0xC2]);
        assert_eq!(e.transport().frames, vec![vec![0x02, 42]]);
    }

    #[test]
    fn nack_carries_only_the_status_byte() {
        let mut e = engine(
            100,
            vec![HandlerEntry::new(
                id(2),
                FnHandler::new().on_request(|_, out| {
                    out.extend_from_slice(&[0xAA; wire::MAX_PAYLOAD]).unwrap();
                    Status::Other(0xff)
                }),
            )],
        );
        e.receive(&[0xC2, 1, 2, 3]);
        e.receive(&[0xC0 | 40]);
        assert_eq!(
            e.transport().frames,
            vec![vec![0x02, 0xff], vec![40, Status::UnknownId.code()]]
        );
    }

    #[test]
    fn id_out_of_range_rejected() {
        let mut e = engine(100, vec![]);
        assert!(matches!(
            e.send_request(70, &[1], true),
            Err(EngineError::InvalidId(70))
        ));
        assert!(matches!(
            e.send_response(64, true, &[]),
            Err(EngineError::InvalidId(64))
        ));
        assert!(e.transport().frames.is_empty());
        assert_eq!(e.state(), State::Idle);
    }

    #[test]
    fn oversized_payload_rejected() {
        let mut e = engine(100, vec![]);
        let big = [0u8; wire::MAX_PAYLOAD + 1];
        assert!(matches!(
            e.send_request(1, &big, true),
            Err(EngineError::PayloadTooLarge { .. })
        ));
        assert!(matches!(
            e.send_response(1, true, &big),
            Err(EngineError::PayloadTooLarge { .. })
        ));
        assert!(e.transport().frames.is_empty());
        assert!(!e.is_awaiting_response());
    }

    #[test]
    fn unsolicited_response_ignored() {
        let calls = Calls::default();
        let mut e = engine(100, vec![response_recorder(5, &calls)]);
        e.receive(&[0x45, 9]);
        e.receive(&[0x05]);
        assert!(calls.borrow().is_empty());
        assert_eq!(e.state(), State::Idle);
        assert!(e.transport().frames.is_empty());
    }

    #[test]
    fn response_for_other_id_ignored() {
        let calls = Calls::default();
        let mut e = engine(
            100,
            vec![response_recorder(5, &calls), response_recorder(6, &calls)],
        );
        e.send_request(5, &[], true).unwrap();
        e.receive(&[0x46, 1]);
        assert!(calls.borrow().is_empty());
        assert_eq!(e.expected_id(), Some(id(5)));
    }

    #[test]
    fn failed_send_does_not_arm_timer() {
        let calls = Calls::default();
        let mut e = engine(10, vec![response_recorder(1, &calls)]);
        e.transport_mut().fail_with = Some(-5);
        assert!(matches!(
            e.send_request(1, &[], true),
            Err(EngineError::Transport(TransportError::Code(-5)))
        ));
        assert_eq!(e.state(), State::Idle);
        e.tick(100);
        assert!(calls.borrow().is_empty());

        e.transport_mut().fail_with = None;
        assert!(e.send_request(1, &[], true).is_ok());
    }

    #[test]
    fn response_allowed_while_awaiting() {
        let mut e = engine(100, vec![]);
        e.send_request(1, &[], true).unwrap();
        e.send_response(9, false, &[3]).unwrap();
        assert_eq!(e.transport().frames[1], vec![0x09, 3]);
        assert_eq!(e.expected_id(), Some(id(1)));
    }

    #[test]
    fn reply_send_failure_is_swallowed() {
        let mut e = engine(100, vec![]);
        e.transport_mut().fail_with = Some(1);
        e.receive(&[0xC0 | 20]);
        assert_eq!(e.state(), State::Idle);
    }

    #[test]
    fn empty_frame_ignored() {
        let mut e = engine(100, vec![]);
        e.send_request(1, &[], true).unwrap();
        e.receive(&[]);
        assert_eq!(e.expected_id(), Some(id(1)));
        assert_eq!(e.transport().frames.len(), 1);
    }

    #[test]
    fn two_peers_back_to_back() {
        let calls = Calls::default();
        let mut host = engine(100, vec![response_recorder(3, &calls)]);
        let mut device = engine(
            100,
            vec![HandlerEntry::new(
                id(3),
                FnHandler::new().on_request(|input, out| {
                    for b in input {
                        out.push(b.wrapping_mul(2)).unwrap();
                    }
                    Status::NoError
                }),
            )],
        );

        host.send_request(3, &[1, 2, 3], true).unwrap();
        for f in host.transport_mut().frames.drain(..) {
            device.receive(&f);
        }
        for f in device.transport_mut().frames.drain(..) {
            host.receive(&f);
        }
        assert_eq!(*calls.borrow(), vec![(Status::NoError, vec![2, 4, 6])]);
        assert_eq!(host.state(), State::Idle);
    }

    #[test]
    fn random_frames_never_leave_idle() {
        let calls = Calls::default();
        let mut e = engine(100, vec![response_recorder(0, &calls)]);
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let len = rng.gen_range(0..=wire::MAX_FRAME + 8);
            let frame: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            e.receive(&frame);
            assert_eq!(e.state(), State::Idle);
        }
        assert!(calls.borrow().is_empty());
        // Every inbound request is for an unregistered-request id, so each one is nacked.
        for f in &e.transport().frames {
            assert_eq!(f.len(), 2);
            assert_eq!(f[0] & 0xC0, 0);
            assert_eq!(f[1], Status::UnknownId.code());
        }
    }
}
