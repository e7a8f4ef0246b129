use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// A type for reading server-sent events from a chunk stream.
///
/// Only the `data` field is surfaced. Comment lines (used by some routers
/// as keep-alives) and the `event`, `id` and `retry` fields are skipped.
pub struct Sse {
    buf: Vec<u8>,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: Vec::new(),
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // Drain complete frames in the buffer before reading more, a
            // single chunk may carry several events.
            while let Some(frame) = self.take_frame() {
                if let Some(data) = parse_frame(&frame)? {
                    return Ok(Some(data));
                }
            }

            match self.chunks.next_chunk().await.map_err(Error::ChunksError)? {
                Some(bytes) => self.buf.extend_from_slice(&bytes),
                // Abort if no more data available, a trailing partial frame
                // is dropped.
                None => return Ok(None),
            }
        }
    }

    /// Removes the next blank-line terminated frame from the buffer.
    fn take_frame(&mut self) -> Option<String> {
        let (end, sep_len) = find_frame_end(&self.buf)?;
        let frame = self.buf.drain(..end + sep_len).collect::<Vec<_>>();
        // Multi-byte characters never straddle a frame boundary, so lossy
        // decoding only replaces bytes that were invalid to begin with.
        Some(String::from_utf8_lossy(&frame[..end]).into_owned())
    }
}

fn find_frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

// event = *( comment / field ) end-of-line
// field = 1*name-char [ colon [ space ] *any-char ] end-of-line
fn parse_frame(frame: &str) -> Result<Option<String>, Error> {
    let mut data: Option<String> = None;
    for line in frame.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::InvalidPayload);
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match name {
            "data" => {
                let data = data.get_or_insert_with(String::new);
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(value);
            }
            "event" | "id" | "retry" => {}
            _ => return Err(Error::InvalidPayload),
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn sse_from(chunks: &[&'static [u8]]) -> Sse {
        Sse::new(Chunks::from_vec_deque(
            chunks.iter().map(|c| Bytes::from_static(*c)).collect(),
        ))
    }

    #[tokio::test]
    async fn test_normal_events() {
        let mut sse = sse_from(&[b"data: hello\n\ndata: bye\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "bye");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quirk_streaming() {
        let mut sse = sse_from(&[b"data:", b" hel", b"lo\r\n", b"\r\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_comments_are_skipped() {
        let mut sse =
            sse_from(&[b": keep-alive\n\n", b"event: chunk\ndata: {}\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_invalid_data() {
        let mut sse = sse_from(&[b"xxxxxx\n\n"]);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);

        let mut sse = sse_from(&[b"xxxxxx\n"]);
        assert_eq!(sse.next_event().await.unwrap(), None);

        let mut sse = sse_from(&[b"data: hello\n", b"data: bye\n"]);
        assert_eq!(sse.next_event().await.unwrap(), None);
    }
}
