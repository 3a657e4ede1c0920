use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Incremental UTF-8 decoder for piped process output.
///
/// Multi-byte sequences split across read boundaries stay buffered until
/// the remaining bytes arrive. Invalid sequences decode to U+FFFD so a
/// worker writing binary garbage cannot stall the text stream.
pub struct Utf8Codec;

impl Decoder for Utf8Codec {
    type Item = String;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut out = String::new();
        loop {
            match std::str::from_utf8(src) {
                Ok(text) => {
                    out.push_str(text);
                    src.clear();
                    break;
                }
                Err(e) if e.error_len().is_none() => {
                    // Incomplete trailing sequence; keep it for the next read.
                    let valid = e.valid_up_to();
                    if valid > 0 {
                        if let Ok(text) = std::str::from_utf8(&src[..valid]) {
                            out.push_str(text);
                        }
                        src.advance(valid);
                    }
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&src[..valid]) {
                        out.push_str(text);
                    }
                    out.push('\u{FFFD}');
                    src.advance(valid + e.error_len().unwrap_or(1));
                }
            }
        }

        if out.is_empty() { Ok(None) } else { Ok(Some(out)) }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut out = self.decode(src)?.unwrap_or_default();
        if !src.is_empty() {
            // A sequence left dangling at end of stream can never complete.
            out.push('\u{FFFD}');
            src.clear();
        }
        if out.is_empty() { Ok(None) } else { Ok(Some(out)) }
    }
}
