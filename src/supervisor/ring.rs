//! Bounded diagnostic buffer for one process's combined stdout/stderr
//! (spec.md §4.4 "buffer at most 16 KiB per process (ring-truncate
//! oldest)").

pub struct RingBuffer {
    cap: usize,
    buf: String,
}

impl RingBuffer {
    pub fn new(cap: usize) -> Self {
        Self { cap, buf: String::new() }
    }

    pub fn push_line(&mut self, line: &str) {
        self.buf.push_str(line);
        self.buf.push('\n');
        if self.buf.len() > self.cap {
            let excess = self.buf.len() - self.cap;
            let mut boundary = excess;
            while boundary < self.buf.len() && !self.buf.is_char_boundary(boundary) {
                boundary += 1;
            }
            self.buf.drain(..boundary);
        }
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}
