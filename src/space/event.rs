use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::codec::BlockReader;
use crate::encoding::varint::{
    get_uvarint, get_varint, put_uvarint, put_varint, uvarint_len, zigzag,
};
use crate::error::Result;
use crate::Error;

/// Frame length that ends a grouping chain.
pub const TERMINATOR: [u8; 4] = [0; 4];

/// Encoded size of an event body.
pub(crate) fn body_len(ordering: i64, payload_len: usize) -> usize {
    uvarint_len(zigzag(ordering)) + uvarint_len(payload_len as u64) + payload_len
}

/// Event bodies are framed by a u32 length, and a zero frame ends a chain.
pub(crate) fn check_body_len(len: usize) -> Result<()> {
    if len as u64 > u32::MAX as u64 {
        return Err(Error::InvalidArgument(format!(
            "event of {} bytes does not fit a u32 record frame",
            len
        )));
    }
    Ok(())
}

/// An opaque payload with the key it is ordered by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub ordering: i64,
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(ordering: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            ordering,
            payload: payload.into(),
        }
    }

    /// Appends `[zigzag varint ordering][varint len][payload]`.
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        put_varint(buf, self.ordering);
        put_uvarint(buf, self.payload.len() as u64);
        buf.extend_from_slice(&self.payload);
    }

    /// Appends the event framed by its u32 LE length, as stored in a
    /// grouping chain.
    pub fn encode_record(&self, buf: &mut Vec<u8>) {
        let body_len = self.encoded_len();
        debug_assert!(check_body_len(body_len).is_ok());
        let mut frame = [0u8; 4];
        LittleEndian::write_u32(&mut frame, body_len as u32);
        buf.extend_from_slice(&frame);
        self.encode_to(buf);
    }

    pub fn encoded_len(&self) -> usize {
        body_len(self.ordering, self.payload.len())
    }

    /// Decodes an event body that must span all of `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (ordering, n) =
            get_varint(data).ok_or_else(|| Error::corruption("truncated event ordering key"))?;
        let (len, m) = get_uvarint(&data[n..])
            .ok_or_else(|| Error::corruption("truncated event payload length"))?;
        let payload = &data[n + m..];
        if payload.len() as u64 != len {
            return Err(Error::corruption(format!(
                "event payload is {} bytes, header says {}",
                payload.len(),
                len
            )));
        }
        Ok(Self {
            ordering,
            payload: payload.to_vec(),
        })
    }
}

/// Chain order: most recent first, ties broken by payload bytes. Callers sort
/// stably so fully equal events keep their insertion order.
pub fn chain_order(a: &Event, b: &Event) -> Ordering {
    b.ordering
        .cmp(&a.ordering)
        .then_with(|| a.payload.cmp(&b.payload))
}

/// Reads one framed event. `None` at the chain terminator.
pub(crate) fn read_record(reader: &mut BlockReader) -> Result<Option<(Event, u64)>> {
    let mut frame = [0u8; 4];
    reader.read_exact(&mut frame)?;
    let body_len = LittleEndian::read_u32(&frame) as usize;
    if body_len == 0 {
        return Ok(None);
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body)?;
    Ok(Some((Event::decode(&body)?, (frame.len() + body_len) as u64)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let mut buf = Vec::new();
        Event::new(-1, b"abc".to_vec()).encode_record(&mut buf);
        // zigzag(-1) = 1, then length 3.
        assert_eq!(buf, vec![5, 0, 0, 0, 1, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_encoded_len_matches_encoding() {
        for ordering in [0, 1, -1, 63, -64, 64, i64::MAX, i64::MIN] {
            let event = Event::new(ordering, vec![7u8; 200]);
            let mut buf = Vec::new();
            event.encode_to(&mut buf);
            assert_eq!(buf.len(), event.encoded_len());
            assert_eq!(Event::decode(&buf).unwrap(), event);
        }
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let mut buf = Vec::new();
        Event::new(5, b"payload".to_vec()).encode_to(&mut buf);
        assert!(Event::decode(&buf[..buf.len() - 1]).unwrap_err().is_corruption());
        buf.push(0);
        assert!(Event::decode(&buf).unwrap_err().is_corruption());
        assert!(Event::decode(&[]).unwrap_err().is_corruption());
    }

    #[test]
    fn test_chain_order() {
        let mut events = vec![
            Event::new(1, b"b".to_vec()),
            Event::new(3, b"z".to_vec()),
            Event::new(1, b"a".to_vec()),
            Event::new(2, b"m".to_vec()),
        ];
        events.sort_by(chain_order);
        let payloads: Vec<_> = events.iter().map(|e| e.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec![b"z".to_vec(), b"m".to_vec(), b"a".to_vec(), b"b".to_vec()]
        );
    }

    #[test]
    fn test_body_len_must_fit_frame() {
        assert_eq!(body_len(1, 3), Event::new(1, b"abc".to_vec()).encoded_len());
        assert!(check_body_len(0).is_ok());
        assert!(check_body_len(u32::MAX as usize).is_ok());
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            check_body_len(u32::MAX as usize + 1),
            Err(Error::InvalidArgument(_))
        ));
    }
}
