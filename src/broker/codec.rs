//! STOMP 1.2 frame codec.
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! \n
//! body\0
//! ```
//!
//! Bare EOLs between frames are heart-beats and are skipped. A body is
//! either `content-length` bytes long or runs to the first NUL.

use super::{Command, Frame};
use crate::error::BenchError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Largest header block accepted before the frame is rejected.
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Largest body accepted.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct StompCodec;

impl StompCodec {
    pub fn new() -> Self {
        Self
    }
}

/// Locate the blank line that ends the header block.
///
/// Returns `(head_len, body_offset)` where `head_len` excludes the
/// terminating EOLs.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while let Some(pos) = buf[i..].iter().position(|&b| b == b'\n') {
        let nl = i + pos;
        let next = nl + 1;
        if buf.get(next) == Some(&b'\n') {
            return Some((nl, next + 1));
        }
        if buf.get(next) == Some(&b'\r') && buf.get(next + 1) == Some(&b'\n') {
            return Some((nl, next + 2));
        }
        i = next;
    }
    None
}

fn escapes_headers(command: &Command) -> bool {
    !matches!(command, Command::Connect | Command::Connected)
}

fn unescape(value: &str) -> Result<String, BenchError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(BenchError::Protocol(format!(
                    "invalid header escape sequence \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

fn escape_into(value: &str, dst: &mut BytesMut) {
    for c in value.chars() {
        match c {
            '\\' => dst.put_slice(b"\\\\"),
            '\n' => dst.put_slice(b"\\n"),
            '\r' => dst.put_slice(b"\\r"),
            ':' => dst.put_slice(b"\\c"),
            _ => {
                let mut utf8 = [0u8; 4];
                dst.put_slice(c.encode_utf8(&mut utf8).as_bytes());
            }
        }
    }
}

fn parse_head(head: &[u8]) -> Result<(Command, Vec<(String, String)>), BenchError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| BenchError::Protocol("frame header is not valid UTF-8".to_string()))?;

    let mut lines = text.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));
    let command: Command = lines
        .next()
        .ok_or_else(|| BenchError::Protocol("missing command".to_string()))?
        .parse()?;

    let escaped = escapes_headers(&command);
    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| BenchError::Protocol(format!("malformed header line '{}'", line)))?;
        let (name, value) = if escaped {
            (unescape(name)?, unescape(value)?)
        } else {
            (name.to_string(), value.to_string())
        };
        headers.push((name, value));
    }

    Ok((command, headers))
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = BenchError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, BenchError> {
        // heart-beats
        let eols = src.iter().take_while(|&&b| b == b'\n' || b == b'\r').count();
        src.advance(eols);
        if src.is_empty() {
            return Ok(None);
        }

        let Some((head_len, body_offset)) = find_header_end(src) else {
            if src.len() > MAX_HEADER_BYTES {
                return Err(BenchError::Protocol("frame header too large".to_string()));
            }
            return Ok(None);
        };
        if head_len > MAX_HEADER_BYTES {
            return Err(BenchError::Protocol("frame header too large".to_string()));
        }

        let (command, headers) = parse_head(&src[..head_len])?;

        let content_length = headers
            .iter()
            .find(|(name, _)| name == "content-length")
            .map(|(_, value)| {
                value.trim().parse::<usize>().map_err(|_| {
                    BenchError::Protocol(format!("invalid content-length '{}'", value))
                })
            })
            .transpose()?;

        let body_len = match content_length {
            Some(len) => {
                if len > MAX_BODY_BYTES {
                    return Err(BenchError::Protocol(format!("body of {} bytes too large", len)));
                }
                if src.len() < body_offset + len + 1 {
                    src.reserve(body_offset + len + 1 - src.len());
                    return Ok(None);
                }
                if src[body_offset + len] != 0 {
                    return Err(BenchError::Protocol(
                        "frame body not terminated by NUL".to_string(),
                    ));
                }
                len
            }
            None => match src[body_offset..].iter().position(|&b| b == 0) {
                Some(len) => len,
                None => {
                    if src.len() - body_offset > MAX_BODY_BYTES {
                        return Err(BenchError::Protocol("frame body too large".to_string()));
                    }
                    return Ok(None);
                }
            },
        };

        let mut frame_bytes = src.split_to(body_offset + body_len + 1);
        frame_bytes.advance(body_offset);
        frame_bytes.truncate(body_len);
        let body: Bytes = frame_bytes.freeze();

        Ok(Some(Frame {
            command,
            headers,
            body,
        }))
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = BenchError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), BenchError> {
        let escaped = escapes_headers(&frame.command);

        dst.reserve(frame.command.as_str().len() + frame.body.len() + 64);
        dst.put_slice(frame.command.as_str().as_bytes());
        dst.put_u8(b'\n');

        for (name, value) in &frame.headers {
            if escaped {
                escape_into(name, dst);
                dst.put_u8(b':');
                escape_into(value, dst);
            } else {
                dst.put_slice(name.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(value.as_bytes());
            }
            dst.put_u8(b'\n');
        }

        if !frame.body.is_empty() && frame.header("content-length").is_none() {
            dst.put_slice(format!("content-length:{}\n", frame.body.len()).as_bytes());
        }

        dst.put_u8(b'\n');
        dst.put_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}
