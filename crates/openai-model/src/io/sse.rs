use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// A type for reading the `data` payloads of server-sent events from a
/// chunk stream.
pub struct Sse {
    // Raw bytes are kept until a full event arrives, since a chunk may end
    // in the middle of a multi-byte character.
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
            // Events already buffered are drained before reading more.
            if let Some(event) = self.try_parse_event()? {
                return Ok(Some(event));
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::ChunksError)?
            else {
                return Ok(None);
            };
            self.buf.extend_from_slice(&bytes);
        }
    }

    fn try_parse_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // event         = *( comment / field ) end-of-line
            // field         = 1*name-char [ colon [ space ] *any-char ] end-of-line
            // comment       = colon *any-char end-of-line
            //
            // Only line feed is handled as `end-of-line`.
            let Some(eol_idx) = self.buf.windows(2).position(|w| w == b"\n\n")
            else {
                return Ok(None);
            };
            let block: Vec<u8> = self.buf.drain(0..eol_idx + 2).collect();
            let Ok(block) = str::from_utf8(&block[..eol_idx]) else {
                return Err(Error::InvalidPayload);
            };

            let mut data: Option<String> = None;
            for line in block.split('\n') {
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let Some((name, value)) = line.split_once(':') else {
                    return Err(Error::InvalidPayload);
                };
                if name != "data" {
                    // `event`, `id` and `retry` carry nothing we use.
                    continue;
                }
                let value = value.strip_prefix(' ').unwrap_or(value);
                match &mut data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => data = Some(value.to_owned()),
                }
            }

            // A block of comments only (keep-alive), try the next one.
            if let Some(data) = data {
                return Ok(Some(data));
            }
        }
    }
}
