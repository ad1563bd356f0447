/// Growable consume-buffer for inbound socket bytes.
///
/// Bytes are appended at the tail; the decoder consumes prefixes by moving a
/// read offset forward. The consumed prefix is dropped once it grows past
/// half the buffer, which keeps memory proportional to the pending packet.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    buf: Vec<u8>,
    offset: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.buf.extend_from_slice(data);
    }

    /// Advance the readable window by `size` bytes, compacting when the
    /// consumed prefix dominates.
    pub fn consume(&mut self, size: usize) {
        if size == 0 {
            return;
        }
        self.offset = (self.offset + size).min(self.buf.len());
        if self.offset > 0 && self.offset == self.buf.len() {
            self.buf.clear();
            self.offset = 0;
        }
        if self.offset > 0 && self.offset >= self.buf.len() / 2 {
            self.buf.drain(..self.offset);
            self.offset = 0;
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.offset..]
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_consume() {
        let mut buf = ByteBuffer::new();
        buf.append(b"hello world");
        assert_eq!(buf.len(), 11);

        buf.consume(6);
        assert_eq!(buf.as_slice(), b"world");

        buf.consume(5);
        assert!(buf.is_empty());
    }

    #[test]
    fn consume_past_end_is_clamped() {
        let mut buf = ByteBuffer::new();
        buf.append(b"abc");
        buf.consume(100);
        assert!(buf.is_empty());

        buf.append(b"xyz");
        assert_eq!(buf.as_slice(), b"xyz");
    }

    #[test]
    fn compaction_drops_consumed_prefix() {
        let mut buf = ByteBuffer::new();
        buf.append(&[7u8; 1024]);
        buf.consume(600);
        // More than half consumed: storage shrinks to the live window.
        assert_eq!(buf.len(), 424);
        assert_eq!(buf.as_slice(), &[7u8; 424][..]);

        buf.append(&[9u8; 4]);
        assert_eq!(buf.len(), 428);
        assert_eq!(&buf.as_slice()[424..], &[9u8; 4]);
    }

    #[test]
    fn small_consume_keeps_window_intact() {
        let mut buf = ByteBuffer::new();
        buf.append(b"0123456789");
        buf.consume(2);
        assert_eq!(buf.as_slice(), b"23456789");
        buf.consume(3);
        assert_eq!(buf.as_slice(), b"56789");
    }
}
