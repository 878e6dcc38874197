use crate::utils::{P2pError, Result};

/// Size of the frame header: one type byte plus a little-endian u32 body length.
pub const HEADER_SIZE: usize = 5;

/// Largest body a single frame may carry (1 MiB).
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Typed tags carried in the first byte of every frame.
///
/// Values 5-9 and 16+ are reserved; receiving one is fatal to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Application traffic
    Handshake = 0,
    Data = 1,
    Ping = 2,
    Pong = 3,
    Disconnect = 4,

    // DHT control
    DhtFindNode = 10,
    DhtFindNodeReply = 11,
    DhtFindValue = 12,
    DhtFindValueReply = 13,
    DhtStore = 14,
    DhtStoreReply = 15,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageType::Handshake),
            1 => Ok(MessageType::Data),
            2 => Ok(MessageType::Ping),
            3 => Ok(MessageType::Pong),
            4 => Ok(MessageType::Disconnect),
            10 => Ok(MessageType::DhtFindNode),
            11 => Ok(MessageType::DhtFindNodeReply),
            12 => Ok(MessageType::DhtFindValue),
            13 => Ok(MessageType::DhtFindValueReply),
            14 => Ok(MessageType::DhtStore),
            15 => Ok(MessageType::DhtStoreReply),
            other => Err(P2pError::UnknownType(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for the six DHT control tags (10-15).
    pub fn is_dht(self) -> bool {
        matches!(
            self,
            MessageType::DhtFindNode
                | MessageType::DhtFindNodeReply
                | MessageType::DhtFindValue
                | MessageType::DhtFindValueReply
                | MessageType::DhtStore
                | MessageType::DhtStoreReply
        )
    }
}

/// One type-tagged, length-prefixed unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    msg_type: MessageType,
    payload: Vec<u8>,
}

impl Message {
    pub fn new(msg_type: MessageType, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_BODY_SIZE {
            return Err(P2pError::TooLarge(payload.len()));
        }
        Ok(Self { msg_type, payload })
    }

    pub fn from_text(msg_type: MessageType, text: &str) -> Result<Self> {
        Self::new(msg_type, text.as_bytes().to_vec())
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Encode into header + body bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_BODY_SIZE {
            return Err(P2pError::TooLarge(self.payload.len()));
        }

        let mut result = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        result.push(self.msg_type.as_u8());
        result.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        result.extend_from_slice(&self.payload);
        Ok(result)
    }

    /// Decode a full frame from a buffer that must contain exactly header + body.
    pub fn deserialize(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(P2pError::ShortBuffer {
                needed: HEADER_SIZE,
                got: buffer.len(),
            });
        }

        let msg_type = Self::read_type(buffer)?;
        let size = Self::read_size(buffer)? as usize;

        if size > MAX_BODY_SIZE {
            return Err(P2pError::TooLarge(size));
        }

        if buffer.len() < HEADER_SIZE + size {
            return Err(P2pError::ShortBuffer {
                needed: HEADER_SIZE + size,
                got: buffer.len(),
            });
        }

        Self::new(msg_type, buffer[HEADER_SIZE..HEADER_SIZE + size].to_vec())
    }

    /// Read the type tag out of a header buffer.
    pub fn read_type(header: &[u8]) -> Result<MessageType> {
        if header.is_empty() {
            return Err(P2pError::ShortBuffer { needed: 1, got: 0 });
        }
        MessageType::from_u8(header[0])
    }

    /// Read the little-endian body length out of a header buffer.
    pub fn read_size(header: &[u8]) -> Result<u32> {
        if header.len() < HEADER_SIZE {
            return Err(P2pError::ShortBuffer {
                needed: HEADER_SIZE,
                got: header.len(),
            });
        }
        Ok(u32::from_le_bytes([header[1], header[2], header[3], header[4]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let msg = Message::new(MessageType::Data, b"hello mesh".to_vec()).unwrap();
        let bytes = msg.serialize().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 10);
        assert_eq!(bytes[0], 1);

        let decoded = Message::deserialize(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_empty_body_round_trip() {
        let msg = Message::new(MessageType::Ping, Vec::new()).unwrap();
        let bytes = msg.serialize().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let decoded = Message::deserialize(&bytes).unwrap();
        assert_eq!(decoded.msg_type(), MessageType::Ping);
        assert!(decoded.payload().is_empty());
    }

    #[test]
    fn test_length_is_little_endian() {
        let msg = Message::new(MessageType::Data, vec![0u8; 0x0102]).unwrap();
        let bytes = msg.serialize().unwrap();
        assert_eq!(&bytes[1..5], &[0x02, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_body_too_large() {
        let err = Message::new(MessageType::Data, vec![0u8; MAX_BODY_SIZE + 1]).unwrap_err();
        assert!(matches!(err, P2pError::TooLarge(_)));
    }

    #[test]
    fn test_max_body_accepted() {
        let msg = Message::new(MessageType::Data, vec![0xAB; MAX_BODY_SIZE]).unwrap();
        let bytes = msg.serialize().unwrap();
        let decoded = Message::deserialize(&bytes).unwrap();
        assert_eq!(decoded.payload().len(), MAX_BODY_SIZE);
    }

    #[test]
    fn test_unknown_type_rejected() {
        for tag in [5u8, 6, 7, 8, 9, 16, 42, 255] {
            let mut bytes = vec![tag];
            bytes.extend_from_slice(&0u32.to_le_bytes());
            let err = Message::deserialize(&bytes).unwrap_err();
            assert!(matches!(err, P2pError::UnknownType(t) if t == tag));
        }
    }

    #[test]
    fn test_all_defined_tags_round_trip() {
        for tag in [0u8, 1, 2, 3, 4, 10, 11, 12, 13, 14, 15] {
            let msg_type = MessageType::from_u8(tag).unwrap();
            assert_eq!(msg_type.as_u8(), tag);
        }
        assert!(MessageType::DhtStore.is_dht());
        assert!(!MessageType::Data.is_dht());
    }

    #[test]
    fn test_short_buffer() {
        let err = Message::deserialize(&[1, 0, 0]).unwrap_err();
        assert!(matches!(err, P2pError::ShortBuffer { .. }));

        // Header declares more body than is present.
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(b"abc");
        let err = Message::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, P2pError::ShortBuffer { needed: 13, got: 8 }));
    }

    #[test]
    fn test_declared_size_too_large() {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&2_000_000u32.to_le_bytes());
        let err = Message::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, P2pError::TooLarge(2_000_000)));
    }
}
