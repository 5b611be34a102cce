use pool_async::bytes::{Buf, BufMut, BytesMut};
use pool_async::tokio_util::codec::{Decoder, Encoder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::marker::PhantomData;

/// A line is rejected past this length rather than buffered forever; a
/// miner that never sends `\n` would otherwise grow `src` without bound.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Newline-delimited JSON codec: one JSON value per line in, one JSON value
/// per line out. This is the Stratum V1 wire format — unlike the
/// null-terminated framing CGMiner's API uses, every message here is
/// terminated by `\n` and multiple messages can be pipelined back to back.
pub struct NdjsonCodec<Rx, Tx> {
    _marker: PhantomData<(Rx, Tx)>,
}

impl<Rx, Tx> Default for NdjsonCodec<Rx, Tx> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Rx, Tx> Decoder for NdjsonCodec<Rx, Tx>
where
    Rx: DeserializeOwned,
{
    type Item = Rx;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let newline_pos = src.iter().position(|b| *b == b'\n');
        let Some(pos) = newline_pos else {
            if src.len() > MAX_LINE_BYTES {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "line exceeds maximum frame length",
                ));
            }
            return Ok(None);
        };

        let line = src.split_to(pos);
        src.advance(1); // consume the '\n' itself

        let trimmed = trim_trailing_cr(&line);
        if trimmed.is_empty() {
            // blank lines are a no-op heartbeat some miners send
            return self.decode(src);
        }

        let value = serde_json::from_slice(trimmed)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(value))
    }
}

fn trim_trailing_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

impl<Rx, Tx> Encoder<Tx> for NdjsonCodec<Rx, Tx>
where
    Tx: Serialize,
{
    type Error = io::Error;

    fn encode(&mut self, item: Tx, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
