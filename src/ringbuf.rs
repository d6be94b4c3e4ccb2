/// Fixed-capacity byte ring used to stage inbound transport bytes.
///
/// `head` is the write index and `tail` the read index. Because the two
/// indices alone can't distinguish a completely full ring from an empty one
/// (both have `head == tail`), fullness is tracked with an explicit flag.
///
/// The peek/commit and peek/consume pairs expose the largest contiguous
/// region on each side so callers can read from a socket straight into the
/// storage and hand out borrowed slices without copying. `write_copy` and
/// `read_copy` loop over the up-to-two regions a wrapped window produces.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    head: usize,
    tail: usize,
    full: bool,
}

impl RingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        RingBuffer {
            buf: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            full: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of readable bytes currently stored.
    pub fn len(&self) -> usize {
        if self.full {
            self.capacity()
        } else if self.head >= self.tail {
            self.head - self.tail
        } else {
            self.capacity() - (self.tail - self.head)
        }
    }

    /// Free space left for writes.
    pub fn available(&self) -> usize {
        self.capacity() - self.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.full = false;
    }

    /// Largest contiguous readable region, starting at the oldest byte.
    pub fn peek_read(&self) -> &[u8] {
        let readable = self.len();
        let run = if self.full || self.tail > self.head {
            self.capacity() - self.tail
        } else {
            self.head - self.tail
        };
        &self.buf[self.tail..self.tail + run.min(readable)]
    }

    /// Drops up to `n` bytes from the read side.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.len());
        if n > 0 {
            self.tail = wrap(self.tail, n, self.capacity());
            self.full = false;
        }
    }

    /// Largest contiguous writable region. Empty when the ring is full.
    pub fn peek_write(&mut self) -> &mut [u8] {
        if self.full {
            return &mut [];
        }
        let writable = self.available();
        let run = if self.head < self.tail {
            self.tail - self.head
        } else {
            self.capacity() - self.head
        };
        let head = self.head;
        &mut self.buf[head..head + run.min(writable)]
    }

    /// Acknowledges `n` bytes written into the region from `peek_write`.
    pub fn commit(&mut self, n: usize) {
        let n = n.min(self.available());
        if n > 0 {
            self.head = wrap(self.head, n, self.capacity());
            if self.head == self.tail {
                self.full = true;
            }
        }
    }

    /// Copies as much of `data` in as fits, returning the amount written.
    pub fn write_copy(&mut self, data: &[u8]) -> usize {
        let mut written = 0;
        while written < data.len() {
            let region = self.peek_write();
            if region.is_empty() {
                break;
            }
            let n = region.len().min(data.len() - written);
            region[..n].copy_from_slice(&data[written..written + n]);
            self.commit(n);
            written += n;
        }
        written
    }

    /// Copies up to `out.len()` bytes out in FIFO order, returning the count.
    pub fn read_copy(&mut self, out: &mut [u8]) -> usize {
        let mut read = 0;
        while read < out.len() {
            let region = self.peek_read();
            if region.is_empty() {
                break;
            }
            let n = region.len().min(out.len() - read);
            out[read..read + n].copy_from_slice(&region[..n]);
            self.consume(n);
            read += n;
        }
        read
    }

    /// Rotates the stored window so it starts at offset zero, after which
    /// `peek_read` covers every stored byte in one region. The connection
    /// relies on this to keep whole frames addressable as a single slice.
    pub fn make_contiguous(&mut self) {
        if self.tail == 0 {
            return;
        }
        let len = self.len();
        self.buf.rotate_left(self.tail);
        self.tail = 0;
        self.head = if len == self.capacity() { 0 } else { len };
    }
}

fn wrap(idx: usize, n: usize, capacity: usize) -> usize {
    let idx = idx + n;
    if idx >= capacity {
        idx - capacity
    } else {
        idx
    }
}
