//! Probe datagram layout.
//!
//! Every datagram starts with a 16 byte big-endian header: the sender's wall
//! clock in epoch milliseconds followed by the sequence number. The rest of
//! the datagram is zero padding up to the requested size.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::traffic::TrafficError;

pub const HEADER_LEN: usize = 16;

/// Largest payload a single IPv4 UDP datagram can carry.
pub const MAX_DATAGRAM_LEN: usize = 65_507;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeHeader {
    pub send_time_ms: i64,
    pub sequence: u64,
}

impl ProbeHeader {
    pub fn new(send_time_ms: i64, sequence: u64) -> Self {
        Self { send_time_ms, sequence }
    }

    pub fn encode_into(&self, buf: &mut [u8]) -> Result<(), TrafficError> {
        if buf.len() < HEADER_LEN {
            return Err(TrafficError::BufferTooSmall(buf.len()));
        }

        buf[..8].copy_from_slice(&self.send_time_ms.to_be_bytes());
        buf[8..HEADER_LEN].copy_from_slice(&self.sequence.to_be_bytes());
        Ok(())
    }

    /// Returns `None` for datagrams too short to carry a header.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }

        let mut time = [0u8; 8];
        let mut seq = [0u8; 8];
        time.copy_from_slice(&buf[..8]);
        seq.copy_from_slice(&buf[8..HEADER_LEN]);

        Some(Self {
            send_time_ms: i64::from_be_bytes(time),
            sequence: u64::from_be_bytes(seq),
        })
    }

    /// Signed one-way delay relative to `receive_time_ms`.
    pub fn delay_ms(&self, receive_time_ms: i64) -> i64 {
        receive_time_ms.saturating_sub(self.send_time_ms)
    }
}

/// Actual datagram size for a requested packet size.
pub fn payload_len(requested: usize) -> Result<usize, TrafficError> {
    let len = requested.max(HEADER_LEN);
    if len > MAX_DATAGRAM_LEN {
        return Err(TrafficError::PayloadTooLarge(len, MAX_DATAGRAM_LEN));
    }
    Ok(len)
}

pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_is_big_endian() {
        let mut buf = [0xffu8; 20];
        ProbeHeader::new(0x0102030405060708, 42).encode_into(&mut buf).unwrap();

        assert_eq!(&buf[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&buf[8..16], &[0, 0, 0, 0, 0, 0, 0, 42]);
        // padding past the header is left untouched
        assert_eq!(&buf[16..], &[0xff; 4]);
    }

    #[test]
    fn test_decode_reads_header_from_padded_datagram() {
        let mut buf = vec![0u8; 1024];
        ProbeHeader::new(1_700_000_000_000, 7).encode_into(&mut buf).unwrap();

        let header = ProbeHeader::decode(&buf).unwrap();
        assert_eq!(header.send_time_ms, 1_700_000_000_000);
        assert_eq!(header.sequence, 7);
    }

    #[test]
    fn test_short_datagrams() {
        assert!(ProbeHeader::decode(&[0u8; 15]).is_none());
        assert!(matches!(
            ProbeHeader::new(1, 1).encode_into(&mut [0u8; 8]),
            Err(TrafficError::BufferTooSmall(8))
        ));
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(payload_len(0).unwrap(), HEADER_LEN);
        assert_eq!(payload_len(10).unwrap(), HEADER_LEN);
        assert_eq!(payload_len(1024).unwrap(), 1024);
        assert_eq!(payload_len(MAX_DATAGRAM_LEN).unwrap(), MAX_DATAGRAM_LEN);
        assert!(payload_len(MAX_DATAGRAM_LEN + 1).is_err());
    }

    #[test]
    fn test_delay_can_be_negative() {
        let header = ProbeHeader::new(1_000, 1);
        assert_eq!(header.delay_ms(1_025), 25);
        assert_eq!(header.delay_ms(990), -10);
    }
}
