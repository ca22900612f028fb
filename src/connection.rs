//! Per-connection protocol state machine.
//!
//! One `Connection` exists per accepted transport stream and owns all of
//! its mutable state: handshake progress, fragment accumulation and
//! keepalive bookkeeping. It is single-writer: the host delivers one
//! inbound event at a time (a byte chunk, a keepalive tick, a peer
//! disconnect) and each is processed to completion before the next.

use std::mem;
use std::time::Duration;

use log::{debug, info, warn};

use crate::assembly::{AssemblyState, FrameAssembly, MessageAssembly, MessageKind};
use crate::close_code::CloseCode;
use crate::error::ProtocolViolation;
use crate::frame::{self, Frame};
use crate::handshake;
use crate::opcode::Opcode;

/// Outbound half of the transport boundary. Writes are fire-and-forget;
/// the connection never blocks on their completion.
pub trait Transport {
    fn write(&mut self, bytes: Vec<u8>);
    fn close(&mut self);
}

/// Application callbacks invoked for each completed message. The default
/// implementations only log, so an embedding application overrides what
/// it cares about.
pub trait Handler {
    fn on_text(&mut self, message: &str) {
        info!("received a text message: {}", message);
    }

    fn on_bytes(&mut self, message: &[u8]) {
        info!("received a binary message of {} bytes", message.len());
    }
}

/// What to do with a pong that no ping asked for. RFC 6455 permits
/// unsolicited pongs, so `Ignore` is the default; `AnswerWithPing`
/// mirrors them back and `Close` treats them as a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PongPolicy {
    Ignore,
    AnswerWithPing,
    Close,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Cadence at which the host calls [`Connection::keepalive_tick`].
    pub ping_interval: Duration,
    pub unsolicited_pong: PongPolicy,
    /// Mask outgoing frames. A server must leave this off: RFC 6455
    /// requires server-to-client frames to be unmasked.
    pub mask_frames: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ping_interval: Duration::from_secs(30),
            unsolicited_pong: PongPolicy::Ignore,
            mask_frames: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingHandshake,
    Open,
    Closed,
}

pub struct Connection<T, H> {
    transport: T,
    handler: H,
    config: Config,
    state: ConnectionState,
    assembly: AssemblyState,
    expecting_pong: bool,
}

impl<T: Transport, H: Handler> Connection<T, H> {
    pub fn new(transport: T, handler: H, config: Config) -> Self {
        Connection {
            transport,
            handler,
            config,
            state: ConnectionState::AwaitingHandshake,
            assembly: AssemblyState::Idle,
            expecting_pong: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Feeds one in-order transport delivery into the state machine.
    pub fn feed(&mut self, chunk: &[u8]) {
        match self.state {
            ConnectionState::AwaitingHandshake => self.try_handshake(chunk),
            ConnectionState::Open => self.ingest(chunk),
            ConnectionState::Closed => {}
        }
    }

    /// The keepalive timer fired. Sends a ping, or closes the connection
    /// if the previous ping is still unanswered.
    pub fn keepalive_tick(&mut self) {
        if self.state != ConnectionState::Open {
            return;
        }
        if self.expecting_pong {
            warn!("no pong within the ping interval, closing");
            self.close_with(CloseCode::ProtocolError);
            return;
        }
        let ping = frame::encode(&[], Opcode::Ping, true, self.config.mask_frames);
        self.transport.write(ping);
        self.expecting_pong = true;
    }

    /// The peer disconnected abruptly; release state without attempting
    /// any further writes.
    pub fn peer_closed(&mut self) {
        debug!("peer closed the stream");
        self.state = ConnectionState::Closed;
        self.assembly = AssemblyState::Idle;
        self.expecting_pong = false;
    }

    /// Frames `message` as a single text frame and hands it to the
    /// transport. No-op unless the connection is open.
    pub fn send_text(&mut self, message: &str) {
        if self.state != ConnectionState::Open {
            return;
        }
        let raw = frame::encode(
            message.as_bytes(),
            Opcode::Text,
            true,
            self.config.mask_frames,
        );
        self.transport.write(raw);
    }

    /// Frames `message` as a single binary frame and hands it to the
    /// transport. No-op unless the connection is open.
    pub fn send_binary(&mut self, message: &[u8]) {
        if self.state != ConnectionState::Open {
            return;
        }
        let raw = frame::encode(message, Opcode::Binary, true, self.config.mask_frames);
        self.transport.write(raw);
    }

    // No frame decoding happens before the upgrade completes. Chunks
    // without a key line are ignored until the peer either sends one or
    // goes away.
    fn try_handshake(&mut self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        match handshake::extract_key(&text) {
            Some(key) => {
                debug!("handshake key received, upgrading");
                let response = handshake::build_accept_response(key);
                self.transport.write(response.into_bytes());
                self.state = ConnectionState::Open;
            }
            None => debug!("awaiting handshake, no Sec-WebSocket-Key yet"),
        }
    }

    fn ingest(&mut self, chunk: &[u8]) {
        match mem::replace(&mut self.assembly, AssemblyState::Idle) {
            AssemblyState::Frame(mut partial) => match partial.push(chunk) {
                Some(full) => {
                    // the frame is whole again; resume any fragmented
                    // series it interrupted, then decode as one unit
                    self.assembly = match partial.into_suspended() {
                        Some(message) => AssemblyState::Message(message),
                        None => AssemblyState::Idle,
                    };
                    self.process(full);
                }
                None => match frame::check_prefix(partial.prefix()) {
                    Ok(()) => self.assembly = AssemblyState::Frame(partial),
                    // the header that just grew already condemns the frame
                    Err(violation) => self.protocol_error(violation),
                },
            },
            other => {
                self.assembly = other;
                self.process(chunk.to_vec());
            }
        }
    }

    /// Slices complete frames off the front of `buf` until it is empty
    /// or only a partial frame remains.
    fn process(&mut self, mut buf: Vec<u8>) {
        while !buf.is_empty() && self.state == ConnectionState::Open {
            // refuse what the header alone already proves invalid, so an
            // oversized or malformed declaration never buffers a payload
            if let Err(violation) = frame::check_prefix(&buf) {
                self.protocol_error(violation);
                return;
            }
            match frame::total_frame_length(&buf) {
                Ok(total) if (buf.len() as u64) >= total => {
                    let rest = buf.split_off(total as usize);
                    self.handle_frame(&buf);
                    buf = rest;
                }
                _ => {
                    // partial frame, or too few bytes to even declare a
                    // length; park it and suspend any active series
                    let suspended = match mem::replace(&mut self.assembly, AssemblyState::Idle) {
                        AssemblyState::Message(message) => Some(message),
                        _ => None,
                    };
                    self.assembly = AssemblyState::Frame(FrameAssembly::new(buf, suspended));
                    return;
                }
            }
        }
    }

    fn handle_frame(&mut self, raw: &[u8]) {
        if let Err(violation) = frame::check(raw) {
            self.protocol_error(violation);
            return;
        }
        let frame = match frame::decode(raw) {
            Ok(frame) => frame,
            Err(violation) => {
                self.protocol_error(violation);
                return;
            }
        };
        match frame.opcode {
            Opcode::Text | Opcode::Binary => self.on_data_frame(frame),
            Opcode::Continuation => self.on_continuation_frame(frame),
            Opcode::Ping => self.on_ping(frame),
            Opcode::Pong => self.on_pong(),
            Opcode::Close => self.on_close(),
            // check() already rejected reserved opcodes
            Opcode::Invalid => self.protocol_error(ProtocolViolation::InvalidOpcode(raw[0] & 0xF)),
        }
    }

    fn on_data_frame(&mut self, frame: Frame) {
        if !self.assembly.is_idle() {
            self.protocol_error(ProtocolViolation::InterleavedDataFrame);
            return;
        }
        let kind = match MessageKind::from_opcode(frame.opcode) {
            Some(kind) => kind,
            None => return,
        };
        if frame.fin {
            self.deliver(kind, frame.payload);
        } else {
            // first frame of a continuation series
            self.assembly = AssemblyState::Message(MessageAssembly::new(kind, frame.payload));
        }
    }

    fn on_continuation_frame(&mut self, frame: Frame) {
        match mem::replace(&mut self.assembly, AssemblyState::Idle) {
            AssemblyState::Message(mut message) => {
                message.push(&frame.payload);
                if frame.fin {
                    let kind = message.kind();
                    self.deliver(kind, message.into_payload());
                } else {
                    self.assembly = AssemblyState::Message(message);
                }
            }
            _ => self.protocol_error(ProtocolViolation::UnexpectedContinuation),
        }
    }

    fn deliver(&mut self, kind: MessageKind, payload: Vec<u8>) {
        match kind {
            MessageKind::Text => match String::from_utf8(payload) {
                Ok(text) => self.handler.on_text(&text),
                Err(_) => self.protocol_error(ProtocolViolation::InvalidUtf8Payload),
            },
            MessageKind::Binary => self.handler.on_bytes(&payload),
        }
    }

    fn on_ping(&mut self, frame: Frame) {
        debug!("received a ping of {} bytes", frame.payload.len());
        let pong = frame::encode(
            &frame.payload,
            Opcode::Pong,
            true,
            self.config.mask_frames,
        );
        self.transport.write(pong);
    }

    fn on_pong(&mut self) {
        if self.expecting_pong {
            debug!("keepalive pong received");
            self.expecting_pong = false;
            return;
        }
        match self.config.unsolicited_pong {
            PongPolicy::Ignore => debug!("ignoring an unsolicited pong"),
            PongPolicy::AnswerWithPing => {
                let ping = frame::encode(&[], Opcode::Ping, true, self.config.mask_frames);
                self.transport.write(ping);
            }
            PongPolicy::Close => self.protocol_error(ProtocolViolation::UnexpectedPong),
        }
    }

    fn on_close(&mut self) {
        info!("received a connection close");
        self.close_with(CloseCode::NormalClosure);
    }

    fn protocol_error(&mut self, violation: ProtocolViolation) {
        warn!("protocol violation: {}", violation);
        self.close_with(violation.close_code());
    }

    /// Writes a close frame, asks the transport to tear the stream down
    /// and reaches the terminal state. Buffers and keepalive bookkeeping
    /// are released here; the host cancels its timer once it observes
    /// `is_closed()`.
    fn close_with(&mut self, code: CloseCode) {
        self.transport.write(frame::close_message(code));
        self.transport.close();
        self.state = ConnectionState::Closed;
        self.assembly = AssemblyState::Idle;
        self.expecting_pong = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const UPGRADE_REQUEST: &[u8] = b"GET /ws HTTP/1.1\r\n\
        Host: localhost\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[derive(Default)]
    struct FakeTransport {
        written: Rc<RefCell<Vec<Vec<u8>>>>,
        closed: Rc<RefCell<bool>>,
    }

    impl Transport for FakeTransport {
        fn write(&mut self, bytes: Vec<u8>) {
            self.written.borrow_mut().push(bytes);
        }
        fn close(&mut self) {
            *self.closed.borrow_mut() = true;
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        texts: Rc<RefCell<Vec<String>>>,
        binaries: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl Handler for RecordingHandler {
        fn on_text(&mut self, message: &str) {
            self.texts.borrow_mut().push(message.to_string());
        }
        fn on_bytes(&mut self, message: &[u8]) {
            self.binaries.borrow_mut().push(message.to_vec());
        }
    }

    struct Fixture {
        connection: Connection<FakeTransport, RecordingHandler>,
        written: Rc<RefCell<Vec<Vec<u8>>>>,
        closed: Rc<RefCell<bool>>,
        texts: Rc<RefCell<Vec<String>>>,
        binaries: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    fn open_connection(config: Config) -> Fixture {
        let transport = FakeTransport::default();
        let handler = RecordingHandler::default();
        let written = transport.written.clone();
        let closed = transport.closed.clone();
        let texts = handler.texts.clone();
        let binaries = handler.binaries.clone();
        let mut connection = Connection::new(transport, handler, config);
        connection.feed(UPGRADE_REQUEST);
        assert_eq!(connection.state(), ConnectionState::Open);
        // drop the accept response so tests see only frames
        written.borrow_mut().clear();
        Fixture {
            connection,
            written,
            closed,
            texts,
            binaries,
        }
    }

    #[test]
    fn handshake_sends_rfc_accept_response() {
        let transport = FakeTransport::default();
        let written = transport.written.clone();
        let mut connection =
            Connection::new(transport, RecordingHandler::default(), Config::default());

        // noise before the upgrade request is ignored, not decoded
        connection.feed(b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(connection.state(), ConnectionState::AwaitingHandshake);
        assert!(written.borrow().is_empty());

        connection.feed(UPGRADE_REQUEST);
        assert_eq!(connection.state(), ConnectionState::Open);
        let response = String::from_utf8(written.borrow()[0].clone()).unwrap();
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[test]
    fn masked_text_frame_reaches_handler_exactly_once() {
        let mut fx = open_connection(Config::default());
        let raw = frame::encode(b"Oh hai world", Opcode::Text, true, true);
        fx.connection.feed(&raw);
        assert_eq!(&*fx.texts.borrow(), &["Oh hai world".to_string()]);
        assert_eq!(fx.connection.state(), ConnectionState::Open);
    }

    #[test]
    fn binary_frame_reaches_bytes_handler() {
        let mut fx = open_connection(Config::default());
        let raw = frame::encode(&[1, 2, 3], Opcode::Binary, true, true);
        fx.connection.feed(&raw);
        assert_eq!(&*fx.binaries.borrow(), &[vec![1, 2, 3]]);
    }

    #[test]
    fn fragmented_text_message_reassembles() {
        let mut fx = open_connection(Config::default());
        fx.connection
            .feed(&frame::encode(b"Hel", Opcode::Text, false, true));
        assert!(fx.texts.borrow().is_empty());
        fx.connection
            .feed(&frame::encode(b"lo", Opcode::Continuation, true, true));
        assert_eq!(&*fx.texts.borrow(), &["Hello".to_string()]);
    }

    #[test]
    fn partial_frame_delivery_decodes_like_a_whole_one() {
        let raw = frame::encode(b"Oh hai world", Opcode::Text, true, true);
        for split in 1..raw.len() {
            let mut fx = open_connection(Config::default());
            fx.connection.feed(&raw[..split]);
            assert!(fx.texts.borrow().is_empty(), "split at {}", split);
            fx.connection.feed(&raw[split..]);
            assert_eq!(&*fx.texts.borrow(), &["Oh hai world".to_string()]);
        }
    }

    #[test]
    fn partial_frame_inside_fragmented_series() {
        let mut fx = open_connection(Config::default());
        let first = frame::encode(b"Hel", Opcode::Text, false, true);
        let last = frame::encode(b"lo", Opcode::Continuation, true, true);
        fx.connection.feed(&first);
        // the closing continuation frame arrives in three pieces
        fx.connection.feed(&last[..2]);
        fx.connection.feed(&last[2..5]);
        fx.connection.feed(&last[5..]);
        assert_eq!(&*fx.texts.borrow(), &["Hello".to_string()]);
    }

    #[test]
    fn concatenated_frames_in_one_chunk() {
        let mut fx = open_connection(Config::default());
        let chunk = [
            frame::encode(b"one", Opcode::Text, true, true),
            frame::encode(b"two", Opcode::Text, true, true),
        ]
        .concat();
        fx.connection.feed(&chunk);
        assert_eq!(
            &*fx.texts.borrow(),
            &["one".to_string(), "two".to_string()]
        );
    }

    #[test]
    fn ping_is_answered_with_matching_pong() {
        let mut fx = open_connection(Config::default());
        fx.connection
            .feed(&frame::encode(b"Hello", Opcode::Ping, true, true));
        let written = fx.written.borrow();
        assert_eq!(written.len(), 1);
        // unmasked pong echoing the ping payload
        assert_eq!(written[0], frame::pong_message(b"Hello"));
    }

    #[test]
    fn close_frame_gets_normal_closure_reply() {
        let mut fx = open_connection(Config::default());
        fx.connection
            .feed(&frame::encode(&1000u16.to_be_bytes(), Opcode::Close, true, true));
        assert_eq!(fx.connection.state(), ConnectionState::Closed);
        assert!(*fx.closed.borrow());
        let written = fx.written.borrow();
        assert_eq!(written[0], frame::close_message(CloseCode::NormalClosure));
    }

    #[test]
    fn closed_connection_ignores_further_frames() {
        let mut fx = open_connection(Config::default());
        fx.connection
            .feed(&frame::encode(&[], Opcode::Close, true, true));
        fx.connection
            .feed(&frame::encode(b"late", Opcode::Text, true, true));
        assert!(fx.texts.borrow().is_empty());
    }

    #[test]
    fn invalid_opcode_closes_with_protocol_error() {
        let mut fx = open_connection(Config::default());
        fx.connection.feed(&[0x83, 0x00]);
        assert_eq!(fx.connection.state(), ConnectionState::Closed);
        let written = fx.written.borrow();
        assert_eq!(written[0], frame::close_message(CloseCode::ProtocolError));
    }

    #[test]
    fn reserved_bits_close_with_protocol_error() {
        let mut fx = open_connection(Config::default());
        fx.connection.feed(&[0b1101_0001, 0x00]);
        assert_eq!(fx.connection.state(), ConnectionState::Closed);
    }

    #[test]
    fn oversized_ping_closes_with_protocol_error() {
        let mut fx = open_connection(Config::default());
        // ping declaring 126 bytes through the 16-bit length tier
        let mut raw = vec![0x89, 126, 0, 126];
        raw.extend_from_slice(&[0u8; 126]);
        fx.connection.feed(&raw);
        assert_eq!(fx.connection.state(), ConnectionState::Closed);
        let written = fx.written.borrow();
        assert_eq!(written[0], frame::close_message(CloseCode::ProtocolError));
    }

    #[test]
    fn overflowing_declared_length_closes_with_protocol_error() {
        let mut fx = open_connection(Config::default());
        // binary frame declaring a u64::MAX payload in one delivery
        let mut raw = vec![0x82, 127];
        raw.extend_from_slice(&[0xFF; 8]);
        fx.connection.feed(&raw);
        assert_eq!(fx.connection.state(), ConnectionState::Closed);
        let written = fx.written.borrow();
        assert_eq!(written[0], frame::close_message(CloseCode::ProtocolError));
    }

    #[test]
    fn overflowing_length_split_across_chunks_closes() {
        let mut fx = open_connection(Config::default());
        fx.connection.feed(&[0x82, 127]);
        assert_eq!(fx.connection.state(), ConnectionState::Open);
        // the first extended-length byte proves the header malformed
        fx.connection.feed(&[0xFF]);
        assert_eq!(fx.connection.state(), ConnectionState::Closed);
    }

    #[test]
    fn oversized_ping_refused_at_header_time() {
        let mut fx = open_connection(Config::default());
        // header only; none of the declared 126 payload bytes follow
        fx.connection.feed(&[0x89, 126, 0, 126]);
        assert_eq!(fx.connection.state(), ConnectionState::Closed);
        let written = fx.written.borrow();
        assert_eq!(written[0], frame::close_message(CloseCode::ProtocolError));
    }

    #[test]
    fn continuation_without_series_closes() {
        let mut fx = open_connection(Config::default());
        fx.connection
            .feed(&frame::encode(b"stray", Opcode::Continuation, true, true));
        assert_eq!(fx.connection.state(), ConnectionState::Closed);
    }

    #[test]
    fn interleaved_data_frame_closes() {
        let mut fx = open_connection(Config::default());
        fx.connection
            .feed(&frame::encode(b"Hel", Opcode::Text, false, true));
        fx.connection
            .feed(&frame::encode(b"new", Opcode::Text, true, true));
        assert_eq!(fx.connection.state(), ConnectionState::Closed);
    }

    #[test]
    fn invalid_utf8_text_closes_with_1007() {
        let mut fx = open_connection(Config::default());
        fx.connection
            .feed(&frame::encode(&[0xFF, 0xFE], Opcode::Text, true, true));
        assert_eq!(fx.connection.state(), ConnectionState::Closed);
        let written = fx.written.borrow();
        assert_eq!(
            written[0],
            frame::close_message(CloseCode::InvalidFramePayload)
        );
    }

    #[test]
    fn keepalive_sends_ping_then_closes_without_pong() {
        let mut fx = open_connection(Config::default());
        fx.connection.keepalive_tick();
        {
            let written = fx.written.borrow();
            assert_eq!(written[0], frame::ping_message(&[]));
        }
        // a second interval without a pong tears the connection down
        fx.connection.keepalive_tick();
        assert_eq!(fx.connection.state(), ConnectionState::Closed);
    }

    #[test]
    fn pong_clears_keepalive_expectation() {
        let mut fx = open_connection(Config::default());
        fx.connection.keepalive_tick();
        fx.connection
            .feed(&frame::encode(&[], Opcode::Pong, true, true));
        fx.connection.keepalive_tick();
        assert_eq!(fx.connection.state(), ConnectionState::Open);
    }

    #[test]
    fn unsolicited_pong_ignored_by_default() {
        let mut fx = open_connection(Config::default());
        fx.connection
            .feed(&frame::encode(&[], Opcode::Pong, true, true));
        assert_eq!(fx.connection.state(), ConnectionState::Open);
        assert!(fx.written.borrow().is_empty());
    }

    #[test]
    fn unsolicited_pong_answered_under_ping_policy() {
        let config = Config {
            unsolicited_pong: PongPolicy::AnswerWithPing,
            ..Config::default()
        };
        let mut fx = open_connection(config);
        fx.connection
            .feed(&frame::encode(&[], Opcode::Pong, true, true));
        let written = fx.written.borrow();
        assert_eq!(written[0], frame::ping_message(&[]));
    }

    #[test]
    fn unsolicited_pong_closes_under_close_policy() {
        let config = Config {
            unsolicited_pong: PongPolicy::Close,
            ..Config::default()
        };
        let mut fx = open_connection(config);
        fx.connection
            .feed(&frame::encode(&[], Opcode::Pong, true, true));
        assert_eq!(fx.connection.state(), ConnectionState::Closed);
    }

    #[test]
    fn peer_close_releases_state_without_writes() {
        let mut fx = open_connection(Config::default());
        fx.connection
            .feed(&frame::encode(b"Hel", Opcode::Text, false, true));
        fx.connection.peer_closed();
        assert_eq!(fx.connection.state(), ConnectionState::Closed);
        assert!(fx.written.borrow().is_empty());
        assert!(!*fx.closed.borrow());
    }

    #[test]
    fn echo_via_send_text() {
        let mut fx = open_connection(Config::default());
        fx.connection.send_text("Hello from the server");
        let written = fx.written.borrow();
        assert_eq!(
            written[0],
            frame::encode(b"Hello from the server", Opcode::Text, true, false)
        );
    }
}
