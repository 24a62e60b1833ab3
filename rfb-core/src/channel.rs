//! Growable, compacting receive/send queues on top of a [`Transport`].
//!
//! The receive side is a single byte buffer with a read cursor and a
//! logical end:
//!
//! ```text
//!  0        cursor            end            capacity
//!  |consumed|  unread bytes   |  free space   |
//! ```
//!
//! Invariant: `0 <= cursor <= end <= capacity`. New chunks are appended at
//! `end`; when they do not fit, unread data is either moved to offset 0 or
//! copied into a larger buffer (at least twice as large, capped at the
//! configured ceiling).
//!
//! Readers call [`ByteChannel::wait_for`] before consuming. A reader that has
//! already consumed a header may pass a `backtrack` so the cursor is rewound
//! and the whole unit is re-read once more bytes arrive.

use tracing::debug;

use crate::config::ChannelConfig;
use crate::error::RfbError;
use crate::transport::Transport;

/// Bidirectional byte queue owned by one session.
pub struct ByteChannel {
    transport: Box<dyn Transport>,

    inbound: Vec<u8>,
    cursor: usize,
    end: usize,
    max_capacity: usize,

    outbound: Vec<u8>,
    send_capacity: usize,
}

impl ByteChannel {
    pub fn new(transport: Box<dyn Transport>, config: &ChannelConfig) -> Self {
        Self {
            transport,
            inbound: vec![0u8; config.receive_buffer_size],
            cursor: 0,
            end: 0,
            max_capacity: config.max_receive_buffer_size,
            outbound: Vec::with_capacity(config.send_buffer_size),
            send_capacity: config.send_buffer_size,
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    /// Unread bytes currently buffered.
    pub fn available(&self) -> usize {
        self.end - self.cursor
    }

    /// Read position inside the receive buffer.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Current receive buffer size.
    pub fn capacity(&self) -> usize {
        self.inbound.len()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    // ── Receive queue ────────────────────────────────────────────

    /// Returns `true` ("must wait") when fewer than `n` unread bytes are
    /// buffered. In that case the cursor is first moved back by `backtrack`
    /// bytes. Rewinding past the start of the buffer is an error.
    pub fn wait_for(&mut self, n: usize, backtrack: usize) -> Result<bool, RfbError> {
        if self.available() >= n {
            return Ok(false);
        }
        if backtrack > 0 {
            if self.cursor < backtrack {
                return Err(RfbError::Backtrack {
                    requested: backtrack,
                    available: self.cursor,
                });
            }
            self.cursor -= backtrack;
        }
        Ok(true)
    }

    pub fn peek_u8(&self) -> Result<u8, RfbError> {
        self.peek_at(0)
    }

    /// Byte `offset` positions past the cursor, without consuming anything.
    pub fn peek_at(&self, offset: usize) -> Result<u8, RfbError> {
        self.check(offset + 1)?;
        Ok(self.inbound[self.cursor + offset])
    }

    /// Unread bytes in `start..end` relative to the cursor.
    pub fn peek_slice(&self, start: usize, end: usize) -> Result<&[u8], RfbError> {
        self.check(end)?;
        Ok(&self.inbound[self.cursor + start..self.cursor + end])
    }

    pub fn shift_u8(&mut self) -> Result<u8, RfbError> {
        Ok(self.shift_array::<1>()?[0])
    }

    pub fn shift_u16(&mut self) -> Result<u16, RfbError> {
        Ok(u16::from_be_bytes(self.shift_array()?))
    }

    pub fn shift_u32(&mut self) -> Result<u32, RfbError> {
        Ok(u32::from_be_bytes(self.shift_array()?))
    }

    pub fn shift_i32(&mut self) -> Result<i32, RfbError> {
        Ok(i32::from_be_bytes(self.shift_array()?))
    }

    pub fn shift_array<const N: usize>(&mut self) -> Result<[u8; N], RfbError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.shift_bytes(N)?);
        Ok(out)
    }

    /// View of the next `n` bytes; the cursor moves past them.
    pub fn shift_bytes(&mut self, n: usize) -> Result<&[u8], RfbError> {
        self.check(n)?;
        let start = self.cursor;
        self.cursor += n;
        Ok(&self.inbound[start..start + n])
    }

    /// Next `n` bytes as a string, one char per byte (Latin-1).
    pub fn shift_string(&mut self, n: usize) -> Result<String, RfbError> {
        Ok(self.shift_bytes(n)?.iter().map(|&b| b as char).collect())
    }

    /// Next `n` bytes decoded as UTF-8, replacing invalid sequences.
    pub fn shift_utf8(&mut self, n: usize) -> Result<String, RfbError> {
        Ok(String::from_utf8_lossy(self.shift_bytes(n)?).into_owned())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), RfbError> {
        self.check(n)?;
        self.cursor += n;
        Ok(())
    }

    /// Append a newly arrived chunk after the logical end.
    pub fn enqueue(&mut self, data: &[u8]) -> Result<(), RfbError> {
        if data.len() > self.inbound.len() - self.end {
            self.expand_compact(data.len())?;
        }
        self.inbound[self.end..self.end + data.len()].copy_from_slice(data);
        self.end += data.len();
        Ok(())
    }

    /// Once everything has been consumed, start over at offset 0.
    pub fn reset_if_drained(&mut self) {
        if self.cursor == self.end {
            self.cursor = 0;
            self.end = 0;
        }
    }

    /// Drop all unread data.
    pub fn clear(&mut self) {
        self.cursor = 0;
        self.end = 0;
        self.outbound.clear();
    }

    fn check(&self, n: usize) -> Result<(), RfbError> {
        if n > self.available() {
            return Err(RfbError::Underflow {
                requested: n,
                available: self.available(),
            });
        }
        Ok(())
    }

    /// Move unread data to the front, growing the buffer first when less
    /// than an eighth of it would remain free.
    fn expand_compact(&mut self, min_fit: usize) -> Result<(), RfbError> {
        let unread = self.available();
        let required = (unread + min_fit) * 8;
        let capacity = self.inbound.len();

        let mut new_capacity = capacity;
        if capacity < required {
            new_capacity = (capacity * 2).max(required);
        }
        if new_capacity > self.max_capacity {
            new_capacity = self.max_capacity;
            if new_capacity - unread < min_fit {
                return Err(RfbError::BufferOverflow {
                    size: unread + min_fit,
                    max: self.max_capacity,
                });
            }
        }

        if new_capacity != capacity {
            debug!(from = capacity, to = new_capacity, "growing receive queue");
            let mut grown = vec![0u8; new_capacity];
            grown[..unread].copy_from_slice(&self.inbound[self.cursor..self.end]);
            self.inbound = grown;
        } else {
            self.inbound.copy_within(self.cursor..self.end, 0);
        }
        self.end = unread;
        self.cursor = 0;
        Ok(())
    }

    // ── Send queue ───────────────────────────────────────────────

    /// Append bytes without flushing, except when the send buffer fills up.
    pub fn queue(&mut self, mut data: &[u8]) -> Result<(), RfbError> {
        while !data.is_empty() {
            let room = self.send_capacity - self.outbound.len();
            if room == 0 {
                self.flush()?;
                if self.outbound.len() == self.send_capacity {
                    return Err(RfbError::TransportClosed);
                }
                continue;
            }
            let n = room.min(data.len());
            self.outbound.extend_from_slice(&data[..n]);
            data = &data[n..];
        }
        Ok(())
    }

    /// Queue and flush.
    pub fn send(&mut self, data: &[u8]) -> Result<(), RfbError> {
        self.queue(data)?;
        self.flush()
    }

    /// Hand everything queued to the transport as one write.
    pub fn flush(&mut self) -> Result<(), RfbError> {
        if self.outbound.is_empty() || !self.transport.is_open() {
            return Ok(());
        }
        self.transport.send(&self.outbound)?;
        self.outbound.clear();
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn channel(recv: usize, max: usize, send: usize) -> (ByteChannel, MemoryTransport) {
        let handle = MemoryTransport::new();
        let mut t = handle.clone();
        t.open("test").unwrap();
        let cfg = ChannelConfig {
            receive_buffer_size: recv,
            max_receive_buffer_size: max,
            send_buffer_size: send,
        };
        (ByteChannel::new(Box::new(t), &cfg), handle)
    }

    #[test]
    fn shifts_are_big_endian() {
        let (mut ch, _) = channel(64, 64, 16);
        ch.enqueue(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0xff, 0xff, 0xff, 0xfe])
            .unwrap();
        assert_eq!(ch.peek_u8().unwrap(), 0x01);
        assert_eq!(ch.shift_u8().unwrap(), 0x01);
        assert_eq!(ch.shift_u16().unwrap(), 0x0203);
        assert_eq!(ch.shift_u32().unwrap(), 0x0405_0607);
        assert_eq!(ch.shift_i32().unwrap(), -2);
        assert_eq!(ch.available(), 0);
    }

    #[test]
    fn wait_for_with_backtrack_rewinds() {
        let (mut ch, _) = channel(64, 64, 16);
        ch.enqueue(&[3, 1, 2]).unwrap();
        let count = ch.shift_u8().unwrap() as usize;
        assert!(ch.wait_for(count, 1).unwrap());
        assert_eq!(ch.cursor(), 0);

        // Repeating the failed wait loses nothing.
        ch.shift_u8().unwrap();
        assert!(ch.wait_for(count, 1).unwrap());
        assert_eq!(ch.available(), 3);

        ch.enqueue(&[3]).unwrap();
        assert_eq!(ch.shift_u8().unwrap(), 3);
        assert!(!ch.wait_for(count, 1).unwrap());
        assert_eq!(ch.shift_bytes(3).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn backtrack_past_zero_is_fatal() {
        let (mut ch, _) = channel(64, 64, 16);
        ch.enqueue(&[1]).unwrap();
        let err = ch.wait_for(4, 2).unwrap_err();
        assert!(matches!(err, RfbError::Backtrack { requested: 2, available: 0 }));
        assert_eq!(ch.cursor(), 0);
    }

    #[test]
    fn reads_past_end_are_errors_not_panics() {
        let (mut ch, _) = channel(16, 16, 16);
        ch.enqueue(&[1, 2]).unwrap();
        assert!(matches!(ch.shift_u32(), Err(RfbError::Underflow { .. })));
        assert!(ch.peek_at(2).is_err());
        assert_eq!(ch.available(), 2);
    }

    #[test]
    fn compacts_in_place_when_space_suffices() {
        let (mut ch, _) = channel(64, 64, 16);
        ch.enqueue(&[0u8; 60]).unwrap();
        ch.skip(58).unwrap();
        ch.enqueue(&[7, 8, 9, 10]).unwrap();
        assert_eq!(ch.capacity(), 64);
        assert_eq!(ch.cursor(), 0);
        assert_eq!(ch.available(), 6);
        assert_eq!(ch.peek_slice(2, 6).unwrap(), &[7, 8, 9, 10]);
    }

    #[test]
    fn grows_at_least_double() {
        let (mut ch, _) = channel(16, 1024, 16);
        ch.enqueue(&[1u8; 10]).unwrap();
        ch.enqueue(&[2u8; 10]).unwrap();
        assert!(ch.capacity() >= 32);
        assert_eq!(ch.available(), 20);
        assert_eq!(ch.shift_bytes(11).unwrap()[10], 2);
    }

    #[test]
    fn growth_is_capped() {
        let (mut ch, _) = channel(16, 64, 16);
        ch.enqueue(&[0u8; 16]).unwrap();
        ch.enqueue(&[0u8; 40]).unwrap();
        assert_eq!(ch.capacity(), 64);
        assert_eq!(ch.available(), 56);
    }

    #[test]
    fn overflow_beyond_ceiling_is_fatal() {
        let (mut ch, _) = channel(16, 64, 16);
        ch.enqueue(&[0u8; 16]).unwrap();
        let err = ch.enqueue(&[0u8; 60]).unwrap_err();
        assert!(matches!(err, RfbError::BufferOverflow { max: 64, .. }));
    }

    #[test]
    fn drained_queue_resets() {
        let (mut ch, _) = channel(16, 16, 16);
        ch.enqueue(&[1, 2]).unwrap();
        ch.skip(2).unwrap();
        ch.reset_if_drained();
        assert_eq!(ch.cursor(), 0);
        assert_eq!(ch.available(), 0);
    }

    #[test]
    fn queued_writes_coalesce() {
        let (mut ch, t) = channel(16, 16, 64);
        ch.queue(&[1, 2]).unwrap();
        ch.queue(&[3]).unwrap();
        ch.flush().unwrap();
        assert_eq!(t.write_count(), 1);
        assert_eq!(t.take_written(), vec![1, 2, 3]);
    }

    #[test]
    fn large_sends_are_split_to_buffer_size() {
        let (mut ch, t) = channel(16, 16, 8);
        let payload: Vec<u8> = (0..20).collect();
        ch.send(&payload).unwrap();
        assert_eq!(t.write_count(), 3);
        assert_eq!(t.take_written(), payload);
    }

    #[test]
    fn flush_waits_for_open_transport() {
        let handle = MemoryTransport::new();
        let mut ch = ByteChannel::new(Box::new(handle.clone()), &ChannelConfig::default());
        ch.send(b"early").unwrap();
        assert_eq!(handle.write_count(), 0);
        ch.transport_mut().open("later").unwrap();
        ch.flush().unwrap();
        assert_eq!(handle.take_written(), b"early");
    }
}
