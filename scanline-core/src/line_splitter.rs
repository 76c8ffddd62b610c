//! Logical line framing for scanner output.
//!
//! Progress bars redraw themselves with carriage returns, so one
//! newline-terminated chunk can hold many frames. Every frame is handed to
//! the parsers, but only the final frame of a chunk is worth keeping in the
//! scan's output log.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Default upper bound for a chunk that has not seen a newline yet.
pub const DEFAULT_MAX_CHUNK_LEN: usize = 64 * 1024;

/// Carriage-return separated frames of one output chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineGroup {
    segments: Vec<String>,
}

impl LineGroup {
    /// Splits a raw chunk on `\r`, dropping segments that are empty once
    /// trimmed. Returns `None` when nothing is left.
    pub fn from_chunk(chunk: &str) -> Option<Self> {
        let segments: Vec<String> = chunk
            .split('\r')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();

        if segments.is_empty() {
            None
        } else {
            Some(Self { segments })
        }
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Self::from_chunk(&String::from_utf8_lossy(bytes))
    }

    /// Every logical line in arrival order.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }

    /// The line that belongs in the durable output log.
    pub fn durable(&self) -> &str {
        // non-empty by construction
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when the chunk was a carriage-return redraw sequence.
    pub fn is_redraw(&self) -> bool {
        self.segments.len() > 1
    }
}

/// Codec turning a byte stream into [`LineGroup`]s.
#[derive(Debug, Clone)]
pub struct LineSplitter {
    max_chunk_len: usize,
    // Index already scanned for a newline, so partial reads are not rescanned.
    next_index: usize,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::with_max_chunk_len(DEFAULT_MAX_CHUNK_LEN)
    }

    pub fn with_max_chunk_len(max_chunk_len: usize) -> Self {
        Self {
            max_chunk_len: max_chunk_len.max(1),
            next_index: 0,
        }
    }

    pub fn max_chunk_len(&self) -> usize {
        self.max_chunk_len
    }

    fn take(&mut self, buf: &mut BytesMut, at: usize) -> BytesMut {
        self.next_index = 0;
        buf.split_to(at)
    }
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineSplitter {
    type Item = LineGroup;
    type Error = std::io::Error;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<LineGroup>, Self::Error> {
        loop {
            let newline = buf[self.next_index..]
                .iter()
                .position(|byte| *byte == b'\n')
                .map(|offset| self.next_index + offset);

            if let Some(end) = newline {
                let chunk = self.take(buf, end + 1);
                match LineGroup::from_bytes(&chunk[..end]) {
                    Some(group) => return Ok(Some(group)),
                    None => continue,
                }
            }

            if buf.len() > self.max_chunk_len {
                // Flush complete redraw frames, keep the one still being drawn.
                let cut = buf
                    .iter()
                    .rposition(|byte| *byte == b'\r')
                    .map(|idx| idx + 1)
                    .unwrap_or(buf.len());
                let chunk = self.take(buf, cut);
                match LineGroup::from_bytes(&chunk) {
                    Some(group) => return Ok(Some(group)),
                    None => continue,
                }
            }

            self.next_index = buf.len();
            return Ok(None);
        }
    }

    fn decode_eof(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<LineGroup>, Self::Error> {
        if let Some(group) = self.decode(buf)? {
            return Ok(Some(group));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let len = buf.len();
        let chunk = self.take(buf, len);
        Ok(LineGroup::from_bytes(&chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(splitter: &mut LineSplitter, input: &[u8]) -> Vec<LineGroup> {
        let mut buf = BytesMut::from(input);
        let mut groups = Vec::new();
        while let Some(group) = splitter.decode(&mut buf).unwrap() {
            groups.push(group);
        }
        while let Some(group) = splitter.decode_eof(&mut buf).unwrap() {
            groups.push(group);
        }
        groups
    }

    #[test]
    fn carriage_return_frames_are_all_parsed_but_only_last_is_durable() {
        let mut splitter = LineSplitter::new();
        let groups = decode_all(
            &mut splitter,
            b"probes.dan.Dan_11_0: 10%\rprobes.dan.Dan_11_0: 20%\r  \rprobes.dan.Dan_11_0: 30%\n",
        );
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.len(), 3);
        assert!(group.is_redraw());
        assert_eq!(group.durable(), "probes.dan.Dan_11_0: 30%");
        assert_eq!(
            group.lines().collect::<Vec<_>>(),
            vec![
                "probes.dan.Dan_11_0: 10%",
                "probes.dan.Dan_11_0: 20%",
                "probes.dan.Dan_11_0: 30%",
            ]
        );
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut splitter = LineSplitter::new();
        let groups = decode_all(&mut splitter, b"first\n\n   \r\nsecond\n");
        let durable: Vec<_> = groups.iter().map(|g| g.durable().to_string()).collect();
        assert_eq!(durable, vec!["first", "second"]);
    }

    #[test]
    fn trailing_chunk_is_flushed_at_eof() {
        let mut splitter = LineSplitter::new();
        let groups = decode_all(&mut splitter, b"one\ntwo without newline");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].durable(), "two without newline");
    }

    #[test]
    fn partial_reads_resume_where_they_stopped() {
        let mut splitter = LineSplitter::new();
        let mut buf = BytesMut::from(&b"hello "[..]);
        assert!(splitter.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"world\n");
        let group = splitter.decode(&mut buf).unwrap().unwrap();
        assert_eq!(group.durable(), "hello world");
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_redraw_stream_is_flushed_at_last_carriage_return() {
        let mut splitter = LineSplitter::with_max_chunk_len(16);
        let mut buf = BytesMut::from(&b"frame-1\rframe-2\rframe-3"[..]);
        let group = splitter.decode(&mut buf).unwrap().unwrap();
        assert_eq!(group.lines().collect::<Vec<_>>(), vec!["frame-1", "frame-2"]);
        assert_eq!(&buf[..], b"frame-3");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut splitter = LineSplitter::new();
        let groups = decode_all(&mut splitter, b"bad \xff byte\n");
        assert_eq!(groups[0].durable(), "bad \u{fffd} byte");
    }
}
