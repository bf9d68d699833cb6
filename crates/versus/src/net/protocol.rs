use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::event::{Attack, EventKind, GameEvent};

pub const DEFAULT_PORT: u16 = 12345;
pub const PROTOCOL_VERSION: &str = "1.0.0";
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

pub const HOST_PLAYER_ID: PlayerId = 1;
pub const GUEST_PLAYER_ID: PlayerId = 2;

pub const FRAME_HEADER_SIZE: usize = 4;

pub type PlayerId = u32;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum GameMode {
    Normal,
    Item,
}

impl GameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Normal => "normal",
            GameMode::Item => "item",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum ControlType {
    ModeSelect,
    ModeChanged,
    VersionCheck,
    Ready,
    ReadyCancel,
    StartRequest,
    StartGame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Heartbeat,
    GameEvent,
    Attack,
    GameControl,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ControlMessage {
    pub control: ControlType,
    pub mode: Option<GameMode>,
    pub player_id: PlayerId,
    pub info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum Payload {
    /// `echo` is false for a probe and true for the peer's answer to one.
    Heartbeat {
        echo: bool,
    },
    GameEvent {
        kind: EventKind,
        player_id: PlayerId,
        data: Vec<u8>,
    },
    Attack {
        attack: Attack,
        player_id: PlayerId,
    },
    GameControl(ControlMessage),
}

/// One frame on the wire. Built once, encoded once, never mutated.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Message {
    timestamp_ms: u64,
    payload: Payload,
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
}

impl Message {
    fn new(payload: Payload) -> Self {
        Self {
            timestamp_ms: now_ms(),
            payload,
        }
    }

    pub fn heartbeat() -> Self {
        Self::new(Payload::Heartbeat { echo: false })
    }

    pub fn heartbeat_echo() -> Self {
        Self::new(Payload::Heartbeat { echo: true })
    }

    pub fn game_event(player_id: PlayerId, event: &GameEvent) -> Result<Self, MessageError> {
        Ok(Self::new(Payload::GameEvent {
            kind: event.kind(),
            player_id,
            data: event.to_bytes()?,
        }))
    }

    pub fn attack(player_id: PlayerId, attack: Attack) -> Self {
        Self::new(Payload::Attack { attack, player_id })
    }

    pub fn control(player_id: PlayerId, control: ControlType) -> Self {
        Self::control_with(player_id, control, None, None)
    }

    pub fn control_with(
        player_id: PlayerId,
        control: ControlType,
        mode: Option<GameMode>,
        info: Option<String>,
    ) -> Self {
        Self::new(Payload::GameControl(ControlMessage {
            control,
            mode,
            player_id,
            info,
        }))
    }

    pub fn kind(&self) -> MessageKind {
        match self.payload {
            Payload::Heartbeat { .. } => MessageKind::Heartbeat,
            Payload::GameEvent { .. } => MessageKind::GameEvent,
            Payload::Attack { .. } => MessageKind::Attack,
            Payload::GameControl(_) => MessageKind::GameControl,
        }
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn as_control(&self) -> Option<&ControlMessage> {
        match &self.payload {
            Payload::GameControl(control) => Some(control),
            _ => None,
        }
    }

    pub fn is_heartbeat_echo(&self) -> bool {
        matches!(self.payload, Payload::Heartbeat { echo: true })
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(MessageError::Serialize)
    }

    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let aligned = aligned_copy(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(MessageError::Deserialize)
    }
}

/// Copies a received body into a buffer aligned for archive access.
pub(crate) fn aligned_copy(data: &[u8]) -> AlignedVec {
    let mut aligned = AlignedVec::with_capacity(data.len());
    aligned.extend_from_slice(data);
    aligned
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Writes one length-prefixed frame. The caller flushes.
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> io::Result<()> {
    let len = u32::try_from(body.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(body)
}

/// Reads one length-prefixed frame into `body`.
///
/// Returns `Ok(false)` when the read timeout expires before the first byte
/// of a frame arrives, so the caller can check whether it should keep going.
/// A timeout after a frame has started is an error: the stream is no longer
/// aligned on a frame boundary.
pub fn read_frame<R: Read>(reader: &mut R, body: &mut Vec<u8>, max_size: usize) -> io::Result<bool> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    let mut filled = 0;

    while filled < FRAME_HEADER_SIZE {
        match reader.read(&mut header[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed the stream",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if is_timeout(&e) && filled == 0 => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            MessageError::FrameTooLarge(len),
        ));
    }

    body.clear();
    body.resize(len, 0);
    reader.read_exact(body)?;
    Ok(true)
}

pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BlockType, PlacedBlock};
    use std::io::Cursor;

    #[test]
    fn test_message_kinds() {
        assert_eq!(Message::heartbeat().kind(), MessageKind::Heartbeat);
        assert_eq!(
            Message::attack(1, Attack::new(2, vec![vec![1]], 0)).kind(),
            MessageKind::Attack
        );
        assert_eq!(
            Message::control(2, ControlType::Ready).kind(),
            MessageKind::GameControl
        );
    }

    #[test]
    fn test_heartbeat_echo_flag() {
        assert!(!Message::heartbeat().is_heartbeat_echo());
        assert!(Message::heartbeat_echo().is_heartbeat_echo());
    }

    #[test]
    fn test_game_event_message_carries_kind_and_player() {
        let event = GameEvent::BlockPlaced(PlacedBlock {
            block: BlockType::L,
            pattern: vec![vec![1, 1, 1], vec![1, 0, 0]],
            x: 2,
            y: 10,
        });
        let message = Message::game_event(HOST_PLAYER_ID, &event).unwrap();

        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        match decoded.payload() {
            Payload::GameEvent {
                kind,
                player_id,
                data,
            } => {
                assert_eq!(*kind, EventKind::BlockPlaced);
                assert_eq!(*player_id, HOST_PLAYER_ID);
                assert_eq!(GameEvent::from_bytes(data).unwrap(), event);
            }
            other => panic!("Expected GameEvent, got {:?}", other),
        }
        assert_eq!(decoded.timestamp_ms(), message.timestamp_ms());
    }

    #[test]
    fn test_control_message_fields() {
        let message = Message::control_with(
            GUEST_PLAYER_ID,
            ControlType::VersionCheck,
            None,
            Some(PROTOCOL_VERSION.to_string()),
        );
        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        let control = decoded.as_control().unwrap();

        assert_eq!(control.control, ControlType::VersionCheck);
        assert_eq!(control.mode, None);
        assert_eq!(control.info.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_frames_preserve_order() {
        let mut wire = Vec::new();
        for body in [&b"first"[..], b"second", b""] {
            write_frame(&mut wire, body).unwrap();
        }

        let mut cursor = Cursor::new(wire);
        let mut body = Vec::new();
        let mut seen = Vec::new();
        for _ in 0..3 {
            assert!(read_frame(&mut cursor, &mut body, MAX_FRAME_SIZE).unwrap());
            seen.push(body.clone());
        }
        assert_eq!(seen, vec![b"first".to_vec(), b"second".to_vec(), Vec::new()]);

        let err = read_frame(&mut cursor, &mut body, MAX_FRAME_SIZE).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[0u8; 32]).unwrap();

        let mut body = Vec::new();
        let err = read_frame(&mut Cursor::new(wire), &mut body, 16).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"complete body").unwrap();
        wire.truncate(8);

        let mut body = Vec::new();
        assert!(read_frame(&mut Cursor::new(wire), &mut body, MAX_FRAME_SIZE).is_err());
    }
}
