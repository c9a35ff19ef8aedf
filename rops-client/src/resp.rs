//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode requests as arrays of bulk strings and decode replies into
//! the five-variant `Reply` value, identically for blocking and suspending
//! readers.
//!
//! ## Design Principles
//! 1. **One Decoder, Two Drivers**: `ReplyDecoder` is a small state machine fed
//!    with header lines and bulk payloads. The blocking and async drivers only
//!    differ in how they fetch those pieces.
//! 2. **Exact Reads**: Bulk payloads are read with `read_exact`, so a reply is
//!    never truncated by short reads or by the reader's buffer size.
//! 3. **Binary-Safe, Latin-1 Text**: Payloads stay raw bytes. Text views map
//!    one byte to one `char` so byte and character counts agree.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::io::{BufRead, Read};

use bytes::BufMut;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{ClientError, ClientResult};

/// Upper bound for a declared bulk length (matches the server's proto limit).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Longest accepted header or status line, terminator included.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Caps up-front allocation for declared array lengths.
const MAX_PREALLOCATED_ITEMS: usize = 1024;

/// Decoded RESP2 reply.
///
/// Null bulk strings and null arrays are distinct from empty ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK` style status line.
    SimpleString(String),
    /// `-ERR ...` error line.
    Error(String),
    /// `:123` integer.
    Integer(i64),
    /// `$<len>` bulk string, `None` for `$-1`.
    BulkString(Option<Vec<u8>>),
    /// `*<len>` array, `None` for `*-1`.
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Returns the text of a simple or non-null bulk string.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Reply::SimpleString(text) => Some(text.clone()),
            Reply::BulkString(Some(data)) => Some(latin1_decode(data)),
            _ => None,
        }
    }

    /// Short description used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::SimpleString(_) => "simple string",
            Reply::Error(_) => "error",
            Reply::Integer(_) => "integer",
            Reply::BulkString(None) => "null bulk string",
            Reply::BulkString(Some(_)) => "bulk string",
            Reply::Array(None) => "null array",
            Reply::Array(Some(_)) => "array",
        }
    }
}

/// A command name followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    args: Vec<Vec<u8>>,
}

impl Request {
    /// Starts a request with the given wire token.
    pub fn new(name: &str) -> Self {
        Request {
            args: vec![latin1_encode(name)],
        }
    }

    /// Appends a binary argument.
    pub fn arg(mut self, value: impl AsRef<[u8]>) -> Self {
        self.args.push(value.as_ref().to_vec());
        self
    }

    /// Appends a text argument, encoded as Latin-1.
    pub fn text(mut self, value: &str) -> Self {
        self.args.push(latin1_encode(value));
        self
    }

    /// Appends a number in decimal form.
    pub fn number(self, value: impl ToString) -> Self {
        let digits = value.to_string();
        self.text(&digits)
    }

    /// Appends several text arguments in order.
    pub fn texts<'a>(mut self, values: impl IntoIterator<Item = &'a str>) -> Self {
        self.args.extend(values.into_iter().map(latin1_encode));
        self
    }

    /// Command token as text (for logging).
    pub fn name(&self) -> String {
        self.args.first().map(|name| latin1_decode(name)).unwrap_or_default()
    }

    /// All elements including the command token.
    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Number of elements declared in the array header.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Encodes a request as a RESP2 array of bulk strings.
pub fn encode_request<B: BufMut>(request: &Request, out: &mut B) {
    out.put_u8(b'*');
    push_usize(out, request.len());
    out.put_slice(b"\r\n");
    for arg in request.args() {
        out.put_u8(b'$');
        push_usize(out, arg.len());
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
}

/// What the decoder needs next.
#[derive(Debug)]
pub enum Step {
    /// A header line (`+`, `-`, `:`, `$` or `*`).
    NeedLine,
    /// Exactly this many payload bytes, followed by CRLF.
    NeedBulk(usize),
    /// The reply is complete.
    Done(Reply),
}

struct PendingArray {
    expected: usize,
    items: Vec<Reply>,
}

/// Incremental reply decoder shared by the blocking and async drivers.
///
/// Nested arrays are tracked on an explicit stack, so decoding depth does not
/// consume call stack and the async driver needs no boxed recursion.
#[derive(Default)]
pub struct ReplyDecoder {
    stack: Vec<PendingArray>,
}

impl ReplyDecoder {
    pub fn new() -> Self {
        ReplyDecoder { stack: Vec::new() }
    }

    /// Feeds one header line without its CRLF terminator.
    pub fn on_line(&mut self, line: &[u8]) -> ClientResult<Step> {
        let (prefix, body) = match line.split_first() {
            Some(parts) => parts,
            None => return Err(ClientError::protocol("empty reply line")),
        };

        match prefix {
            b'+' => Ok(self.complete(Reply::SimpleString(latin1_decode(body)))),
            b'-' => Ok(self.complete(Reply::Error(latin1_decode(body)))),
            b':' => Ok(self.complete(Reply::Integer(parse_i64(body)?))),
            b'$' => match parse_i64(body)? {
                -1 => Ok(self.complete(Reply::BulkString(None))),
                len if len < 0 => Err(ClientError::protocol(format!("invalid bulk length {len}"))),
                len if len as u64 > MAX_BULK_LEN as u64 => {
                    Err(ClientError::protocol(format!("bulk length {len} exceeds limit")))
                }
                len => Ok(Step::NeedBulk(len as usize)),
            },
            b'*' => match parse_i64(body)? {
                -1 => Ok(self.complete(Reply::Array(None))),
                0 => Ok(self.complete(Reply::Array(Some(Vec::new())))),
                len if len < 0 => Err(ClientError::protocol(format!("invalid array length {len}"))),
                len => {
                    let expected = len as usize;
                    self.stack.push(PendingArray {
                        expected,
                        items: Vec::with_capacity(expected.min(MAX_PREALLOCATED_ITEMS)),
                    });
                    Ok(Step::NeedLine)
                }
            },
            other => Err(ClientError::protocol(format!(
                "unrecognized frame prefix 0x{other:02x}"
            ))),
        }
    }

    /// Feeds the payload requested by `Step::NeedBulk`.
    pub fn on_bulk(&mut self, data: Vec<u8>) -> Step {
        self.complete(Reply::BulkString(Some(data)))
    }

    fn complete(&mut self, mut reply: Reply) -> Step {
        while let Some(mut array) = self.stack.pop() {
            array.items.push(reply);
            if array.items.len() < array.expected {
                self.stack.push(array);
                return Step::NeedLine;
            }
            reply = Reply::Array(Some(array.items));
        }
        Step::Done(reply)
    }
}

/// Reads one complete reply from a buffered reader.
pub fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<Reply> {
    let mut decoder = ReplyDecoder::new();
    let mut step = Step::NeedLine;
    loop {
        step = match step {
            Step::NeedLine => {
                read_header_line(reader, line_buf)?;
                decoder.on_line(line_buf)?
            }
            Step::NeedBulk(len) => decoder.on_bulk(read_bulk(reader, len)?),
            Step::Done(reply) => return Ok(reply),
        };
    }
}

/// Async twin of `read_reply`.
pub async fn read_reply_async<R>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<Reply>
where
    R: AsyncBufRead + Unpin,
{
    let mut decoder = ReplyDecoder::new();
    let mut step = Step::NeedLine;
    loop {
        step = match step {
            Step::NeedLine => {
                read_header_line_async(reader, line_buf).await?;
                decoder.on_line(line_buf)?
            }
            Step::NeedBulk(len) => decoder.on_bulk(read_bulk_async(reader, len).await?),
            Step::Done(reply) => return Ok(reply),
        };
    }
}

/// Reads the next non-blank line, stripping CRLF.
///
/// Blank lines are keep-alive filler between replies and are skipped.
pub fn read_header_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    loop {
        read_line(reader, buf)?;
        if !buf.is_empty() {
            return Ok(());
        }
    }
}

/// Reads one CRLF-terminated line, stripping the terminator.
///
/// A bare `\n` is accepted only for an otherwise empty line.
pub fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = Read::take(&mut *reader, MAX_LINE_LEN as u64).read_until(b'\n', buf)?;
    strip_terminator(bytes, buf)
}

/// Reads exactly `len` payload bytes and the trailing CRLF.
pub fn read_bulk<R: BufRead>(reader: &mut R, len: usize) -> ClientResult<Vec<u8>> {
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    check_crlf(crlf)?;
    Ok(data)
}

pub async fn read_header_line_async<R>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        read_line_async(reader, buf).await?;
        if !buf.is_empty() {
            return Ok(());
        }
    }
}

pub async fn read_line_async<R>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let bytes = AsyncReadExt::take(&mut *reader, MAX_LINE_LEN as u64)
        .read_until(b'\n', buf)
        .await?;
    strip_terminator(bytes, buf)
}

pub async fn read_bulk_async<R>(reader: &mut R, len: usize) -> ClientResult<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await?;
    check_crlf(crlf)?;
    Ok(data)
}

fn strip_terminator(bytes: usize, buf: &mut Vec<u8>) -> ClientResult<()> {
    if bytes == 0 {
        return Err(ClientError::Closed);
    }
    if buf.last() != Some(&b'\n') {
        if buf.len() >= MAX_LINE_LEN {
            return Err(ClientError::protocol("line exceeds maximum length"));
        }
        // EOF in the middle of a line.
        return Err(ClientError::Closed);
    }
    if buf.len() >= 2 && buf[buf.len() - 2] == b'\r' {
        buf.truncate(buf.len() - 2);
        return Ok(());
    }
    if buf.len() == 1 {
        buf.clear();
        return Ok(());
    }
    Err(ClientError::protocol("line not terminated by CRLF"))
}

fn check_crlf(crlf: [u8; 2]) -> ClientResult<()> {
    if crlf != [b'\r', b'\n'] {
        return Err(ClientError::protocol("bulk string missing CRLF terminator"));
    }
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    if data.is_empty() {
        return Err(ClientError::protocol("empty integer"));
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(ClientError::protocol("empty integer"));
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ClientError::protocol("invalid integer"));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as i64))
            .ok_or_else(|| ClientError::protocol("integer overflow"))?;
    }

    Ok(if negative { -value } else { value })
}

fn push_usize<B: BufMut>(out: &mut B, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.put_u8(buf[idx]);
    }
}

/// Maps each byte to the `char` with the same code point.
pub fn latin1_decode(data: &[u8]) -> String {
    data.iter().map(|&b| char::from(b)).collect()
}

/// Maps each `char` to one byte; code points above 0xFF become `?`.
pub fn latin1_encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}
