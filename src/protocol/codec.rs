//! Wire codec for agent messages.
//!
//! A message on the wire is:
//!
//! ```text
//! COMMAND URI\r\n
//! Header-Name: value\r\n
//! ...
//! \r\n
//! [ Content-Length bytes | (hex-size\r\n bytes \r\n)* 0\r\n\r\n ]
//! ```
//!
//! The decoder yields a [`MessageFrame::Head`], zero or more
//! [`MessageFrame::Content`] slices and always a closing
//! [`MessageFrame::LastContent`], even for header-only messages. On any parse
//! error it switches to a sink state which swallows the rest of the stream
//! and emits a synthetic `BAD_REQUEST`/`BAD_RESPONSE` head plus the terminal
//! marker. The connection is expected to close afterwards.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use crate::{AppError, AppResult};

use super::{Command, DecodeResult, Message, ResponseCode};

/// A piece of a message as it flows through the codec.
#[derive(Debug)]
pub enum MessageFrame {
    Head(Message),
    Content(Bytes),
    LastContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    SkipControlChars,
    ReadInitial,
    ReadHeader,
    ReadFixedLengthContent,
    ReadChunkSize,
    ReadChunkedContent,
    ReadChunkedDelimiter,
    ReadChunkFooter,
    BadMessage,
}

/// Which kind of message this codec decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Requests,
    Responses,
}

#[derive(Debug, Clone)]
pub struct CodecLimits {
    pub max_initial_line_length: usize,
    pub max_header_size: usize,
    pub max_chunk_size: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        CodecLimits {
            max_initial_line_length: 4096,
            max_header_size: 8192,
            max_chunk_size: 64 * 1024,
        }
    }
}

const MAX_CHUNK_SIZE_LINE: usize = 128;

#[derive(Debug)]
pub struct MessageCodec {
    inbound: Inbound,
    limits: CodecLimits,
    state: DecoderState,
    head: Option<Message>,
    last_header: Option<String>,
    header_size: usize,
    remaining: u64,
    queued: VecDeque<MessageFrame>,
    encoding_chunked: bool,
}

impl MessageCodec {
    pub fn new(inbound: Inbound, limits: CodecLimits) -> Self {
        MessageCodec {
            inbound,
            limits,
            state: DecoderState::SkipControlChars,
            head: None,
            last_header: None,
            header_size: 0,
            remaining: 0,
            queued: VecDeque::new(),
            encoding_chunked: false,
        }
    }

    /// Codec for the passive side: decodes requests, encodes responses.
    pub fn for_server(limits: CodecLimits) -> Self {
        Self::new(Inbound::Requests, limits)
    }

    /// Codec for the active side: decodes responses, encodes requests.
    pub fn for_client(limits: CodecLimits) -> Self {
        Self::new(Inbound::Responses, limits)
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Moves to the sink state and produces the synthetic error head.
    fn fail(&mut self, src: &mut BytesMut, reason: String) -> MessageFrame {
        warn!("discarding connection input after decode error: {}", reason);
        src.clear();
        self.state = DecoderState::BadMessage;
        let uri = self
            .head
            .take()
            .map(|head| head.uri)
            .unwrap_or_else(|| "/".to_string());
        let code = match self.inbound {
            Inbound::Requests => ResponseCode::BadRequest,
            Inbound::Responses => ResponseCode::BadResponse,
        };
        let mut message = Message::response(code, uri);
        message.add_reason(&reason);
        message.decode_result = DecodeResult::Failure(reason);
        self.queued.push_back(MessageFrame::LastContent);
        MessageFrame::Head(message)
    }

    fn parse_initial(line: &str) -> Result<Message, String> {
        let mut parts = line.split(' ').filter(|p| !p.is_empty());
        let (command, uri) = match (parts.next(), parts.next(), parts.next()) {
            (Some(command), Some(uri), None) => (command, uri),
            _ => return Err(format!("invalid initial line: {:?}", line)),
        };
        let command = command.parse::<Command>().map_err(|e| e.to_string())?;
        Ok(Message::new(command, uri))
    }

    fn parse_header_line(&mut self, line: &str) -> Result<(), String> {
        let head = self
            .head
            .as_mut()
            .ok_or_else(|| "header line without initial line".to_string())?;
        if line.starts_with(' ') || line.starts_with('\t') {
            let appended = match &self.last_header {
                Some(name) => head.headers.append_to_last(name, line.trim()),
                None => false,
            };
            if !appended {
                return Err(format!("continuation line without header: {:?}", line));
            }
            return Ok(());
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("invalid header line: {:?}", line))?;
        head.headers
            .add(name, value.trim())
            .map_err(|e| e.to_string())?;
        self.last_header = Some(name.to_string());
        Ok(())
    }

    /// Decides how the body of `head` is framed.
    fn enter_body(&mut self, head: &Message) -> Result<(), String> {
        if head.is_chunked() {
            self.state = DecoderState::ReadChunkSize;
            return Ok(());
        }
        match head.content_length() {
            Ok(Some(length)) => {
                self.remaining = length;
                self.state = DecoderState::ReadFixedLengthContent;
            }
            Ok(None) => {
                self.queued.push_back(MessageFrame::LastContent);
                self.state = DecoderState::SkipControlChars;
            }
            Err(e) => return Err(e.to_string()),
        }
        Ok(())
    }

    fn take_content(&mut self, src: &mut BytesMut) -> Bytes {
        let n = (self.remaining.min(src.len() as u64) as usize).min(self.limits.max_chunk_size);
        self.remaining -= n as u64;
        src.split_to(n).freeze()
    }
}

/// Takes one line off `src`, without its terminator. `Ok(None)` means the
/// line is not complete yet.
fn take_line(src: &mut BytesMut, limit: usize) -> Result<Option<String>, String> {
    match src.iter().position(|b| *b == b'\n') {
        None if src.len() > limit => Err(format!("line exceeds {} bytes", limit)),
        None => Ok(None),
        Some(pos) if pos > limit => Err(format!("line exceeds {} bytes", limit)),
        Some(pos) => {
            let mut line = src.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            String::from_utf8(line.to_vec())
                .map(Some)
                .map_err(|_| "line is not valid utf-8".to_string())
        }
    }
}

impl Decoder for MessageCodec {
    type Item = MessageFrame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> AppResult<Option<MessageFrame>> {
        loop {
            if let Some(frame) = self.queued.pop_front() {
                return Ok(Some(frame));
            }
            match self.state {
                DecoderState::SkipControlChars => {
                    let skip = src
                        .iter()
                        .take_while(|b| b.is_ascii_control() || b.is_ascii_whitespace())
                        .count();
                    src.advance(skip);
                    if src.is_empty() {
                        return Ok(None);
                    }
                    self.state = DecoderState::ReadInitial;
                }
                DecoderState::ReadInitial => {
                    let line = match take_line(src, self.limits.max_initial_line_length) {
                        Ok(Some(line)) => line,
                        Ok(None) => return Ok(None),
                        Err(e) => return Ok(Some(self.fail(src, e))),
                    };
                    match Self::parse_initial(&line) {
                        Ok(head) => {
                            trace!("decoding {} {}", head.command, head.uri);
                            self.head = Some(head);
                            self.last_header = None;
                            self.header_size = 0;
                            self.state = DecoderState::ReadHeader;
                        }
                        Err(e) => return Ok(Some(self.fail(src, e))),
                    }
                }
                DecoderState::ReadHeader => {
                    let budget = self
                        .limits
                        .max_header_size
                        .saturating_sub(self.header_size);
                    // the blank line ending the block is not counted
                    let line = match take_line(src, budget + 2) {
                        Ok(Some(line)) => line,
                        Ok(None) => return Ok(None),
                        Err(_) => {
                            let reason =
                                format!("headers exceed {} bytes", self.limits.max_header_size);
                            return Ok(Some(self.fail(src, reason)));
                        }
                    };
                    if !line.is_empty() {
                        self.header_size += line.len() + 2;
                        if self.header_size > self.limits.max_header_size {
                            let reason =
                                format!("headers exceed {} bytes", self.limits.max_header_size);
                            return Ok(Some(self.fail(src, reason)));
                        }
                        if let Err(e) = self.parse_header_line(&line) {
                            return Ok(Some(self.fail(src, e)));
                        }
                        continue;
                    }
                    let head = match self.head.take() {
                        Some(head) => head,
                        None => {
                            return Err(AppError::IllegalState(
                                "decoder lost message head".to_string(),
                            ))
                        }
                    };
                    if let Err(e) = self.enter_body(&head) {
                        self.head = Some(head);
                        return Ok(Some(self.fail(src, e)));
                    }
                    return Ok(Some(MessageFrame::Head(head)));
                }
                DecoderState::ReadFixedLengthContent => {
                    if self.remaining == 0 {
                        self.state = DecoderState::SkipControlChars;
                        return Ok(Some(MessageFrame::LastContent));
                    }
                    if src.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(MessageFrame::Content(self.take_content(src))));
                }
                DecoderState::ReadChunkSize => {
                    let line = match take_line(src, MAX_CHUNK_SIZE_LINE) {
                        Ok(Some(line)) => line,
                        Ok(None) => return Ok(None),
                        Err(e) => return Ok(Some(self.fail(src, e))),
                    };
                    let hex = line.split(';').next().unwrap_or_default().trim();
                    let size = match u64::from_str_radix(hex, 16) {
                        Ok(size) => size,
                        Err(_) => {
                            let reason = format!("invalid chunk size: {:?}", line);
                            return Ok(Some(self.fail(src, reason)));
                        }
                    };
                    if size == 0 {
                        self.state = DecoderState::ReadChunkFooter;
                    } else {
                        self.remaining = size;
                        self.state = DecoderState::ReadChunkedContent;
                    }
                }
                DecoderState::ReadChunkedContent => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let content = self.take_content(src);
                    if self.remaining == 0 {
                        self.state = DecoderState::ReadChunkedDelimiter;
                    }
                    return Ok(Some(MessageFrame::Content(content)));
                }
                DecoderState::ReadChunkedDelimiter => match take_line(src, 2) {
                    Ok(Some(line)) if line.is_empty() => {
                        self.state = DecoderState::ReadChunkSize;
                    }
                    Ok(Some(_)) | Err(_) => {
                        let reason = "missing CRLF after chunk data".to_string();
                        return Ok(Some(self.fail(src, reason)));
                    }
                    Ok(None) => return Ok(None),
                },
                DecoderState::ReadChunkFooter => {
                    match take_line(src, self.limits.max_header_size) {
                        Ok(Some(line)) if line.is_empty() => {
                            self.state = DecoderState::SkipControlChars;
                            return Ok(Some(MessageFrame::LastContent));
                        }
                        // trailer lines are not used by the protocol
                        Ok(Some(_)) => {}
                        Ok(None) => return Ok(None),
                        Err(e) => return Ok(Some(self.fail(src, e))),
                    }
                }
                DecoderState::BadMessage => {
                    src.clear();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> AppResult<Option<MessageFrame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        match self.state {
            DecoderState::SkipControlChars | DecoderState::BadMessage if src.is_empty() => {
                Ok(None)
            }
            state => Err(AppError::DetailedIoError(format!(
                "connection closed in the middle of a message (state {:?})",
                state
            ))),
        }
    }
}

fn validate_uri(uri: &str) -> AppResult<()> {
    if uri.is_empty() || uri.bytes().any(|b| b.is_ascii_control() || b == b' ') {
        return Err(AppError::MalformedProtocol(format!(
            "uri {:?} cannot be written on the initial line",
            uri
        )));
    }
    Ok(())
}

impl Encoder<MessageFrame> for MessageCodec {
    type Error = AppError;

    fn encode(&mut self, item: MessageFrame, dst: &mut BytesMut) -> AppResult<()> {
        match item {
            MessageFrame::Head(message) => {
                validate_uri(&message.uri)?;
                dst.put_slice(message.command.as_str().as_bytes());
                dst.put_u8(b' ');
                dst.put_slice(message.uri.as_bytes());
                dst.put_slice(b"\r\n");
                for (name, value) in message.headers.iter() {
                    dst.put_slice(name.as_bytes());
                    dst.put_slice(b": ");
                    dst.put_slice(value.as_bytes());
                    dst.put_slice(b"\r\n");
                }
                dst.put_slice(b"\r\n");
                self.encoding_chunked = message.is_chunked();
            }
            MessageFrame::Content(bytes) => {
                // an empty chunk would read as the terminator
                if bytes.is_empty() {
                    return Ok(());
                }
                if self.encoding_chunked {
                    dst.put_slice(format!("{:x}\r\n", bytes.len()).as_bytes());
                    dst.put_slice(&bytes);
                    dst.put_slice(b"\r\n");
                } else {
                    dst.put_slice(&bytes);
                }
            }
            MessageFrame::LastContent => {
                if self.encoding_chunked {
                    dst.put_slice(b"0\r\n\r\n");
                }
                self.encoding_chunked = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::headers;
    use rstest::rstest;

    fn server_codec() -> MessageCodec {
        MessageCodec::for_server(CodecLimits::default())
    }

    fn decode_all(codec: &mut MessageCodec, src: &mut BytesMut) -> Vec<MessageFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(src).unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn body_of(frames: &[MessageFrame]) -> Vec<u8> {
        let mut body = Vec::new();
        for frame in frames {
            if let MessageFrame::Content(bytes) = frame {
                body.extend_from_slice(bytes);
            }
        }
        body
    }

    #[test]
    fn test_header_only_message() {
        let mut codec = server_codec();
        let mut src = BytesMut::from(&b"\r\n\r\nGET /data/a.txt\r\nAgent: a1\r\n\r\n"[..]);
        let frames = decode_all(&mut codec, &mut src);

        assert_eq!(frames.len(), 2);
        match &frames[0] {
            MessageFrame::Head(head) => {
                assert_eq!(head.command, Command::Get);
                assert_eq!(head.uri, "/data/a.txt");
                assert_eq!(head.header("agent"), Some("a1"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
        assert!(matches!(frames[1], MessageFrame::LastContent));
        assert_eq!(codec.state(), DecoderState::SkipControlChars);
    }

    #[test]
    fn test_fixed_length_body_split_across_reads() {
        let mut codec = server_codec();
        let mut src = BytesMut::from(&b"PUT /a\r\nContent-Length: 10\r\n\r\n0123"[..]);
        let mut frames = decode_all(&mut codec, &mut src);
        assert_eq!(codec.state(), DecoderState::ReadFixedLengthContent);

        src.extend_from_slice(b"456789PUT /b\r\n\r\n");
        frames.extend(decode_all(&mut codec, &mut src));

        assert_eq!(body_of(&frames), b"0123456789");
        let heads: Vec<&str> = frames
            .iter()
            .filter_map(|f| match f {
                MessageFrame::Head(h) => Some(h.uri.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(heads, vec!["/a", "/b"]);
        let lasts = frames
            .iter()
            .filter(|f| matches!(f, MessageFrame::LastContent))
            .count();
        assert_eq!(lasts, 2);
    }

    #[test]
    fn test_chunked_body_with_trailer() {
        let mut codec = server_codec();
        let raw = b"PUT /a\r\nTransfer-Encoding: chunked\r\n\r\n5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Trailer: t\r\n\r\n";
        let mut src = BytesMut::from(&raw[..]);
        let frames = decode_all(&mut codec, &mut src);

        assert_eq!(body_of(&frames), b"hello world");
        assert!(matches!(frames.last(), Some(MessageFrame::LastContent)));
        assert_eq!(codec.state(), DecoderState::SkipControlChars);
    }

    #[test]
    fn test_folded_header_value() {
        let mut codec = server_codec();
        let mut src = BytesMut::from(&b"INFO /health\r\nReason: first\r\n  second\r\n\r\n"[..]);
        let frames = decode_all(&mut codec, &mut src);
        match &frames[0] {
            MessageFrame::Head(head) => assert_eq!(head.reasons(), vec!["first second"]),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[rstest]
    #[case::unknown_command(&b"FETCH /a\r\n\r\n"[..])]
    #[case::missing_uri(&b"GET\r\n\r\n"[..])]
    #[case::bad_header(&b"GET /a\r\nno-colon-here\r\n\r\n"[..])]
    #[case::bad_length(&b"PUT /a\r\nContent-Length: ten\r\n\r\n"[..])]
    #[case::bad_chunk_size(&b"PUT /a\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n"[..])]
    #[case::missing_chunk_delimiter(&b"PUT /a\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nabXY\r\n"[..])]
    fn test_parse_errors_emit_synthetic_bad_request(#[case] raw: &[u8]) {
        let mut codec = server_codec();
        let mut src = BytesMut::from(raw);
        let frames = decode_all(&mut codec, &mut src);

        let synthetic = frames
            .iter()
            .find_map(|f| match f {
                MessageFrame::Head(h) if h.decode_result.is_failure() => Some(h),
                _ => None,
            })
            .expect("synthetic head");
        assert_eq!(synthetic.response_code(), Some(ResponseCode::BadRequest));
        assert!(matches!(frames.last(), Some(MessageFrame::LastContent)));
        assert_eq!(codec.state(), DecoderState::BadMessage);

        // everything after the error is swallowed
        src.extend_from_slice(b"GET /b\r\n\r\n");
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert!(src.is_empty());
    }

    #[test]
    fn test_response_side_reports_bad_response() {
        let mut codec = MessageCodec::for_client(CodecLimits::default());
        let mut src = BytesMut::from(&b"RESPONSE /a\r\nbroken\r\n\r\n"[..]);
        let frames = decode_all(&mut codec, &mut src);
        match &frames[0] {
            MessageFrame::Head(h) => {
                assert_eq!(h.response_code(), Some(ResponseCode::BadResponse));
                assert_eq!(h.uri, "/a");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_limits_are_enforced() {
        let limits = CodecLimits {
            max_initial_line_length: 16,
            max_header_size: 32,
            max_chunk_size: 4,
        };
        let mut codec = MessageCodec::for_server(limits.clone());
        let mut src = BytesMut::from(&b"GET /a/very/long/path/that/never/ends"[..]);
        let frames = decode_all(&mut codec, &mut src);
        assert!(matches!(&frames[0], MessageFrame::Head(h) if h.decode_result.is_failure()));

        let mut codec = MessageCodec::for_server(limits.clone());
        let mut src =
            BytesMut::from(&b"GET /a\r\nReason: 0123456789\r\nReason: 0123456789\r\n\r\n"[..]);
        let frames = decode_all(&mut codec, &mut src);
        assert!(matches!(&frames[0], MessageFrame::Head(h) if h.decode_result.is_failure()));

        let mut codec = MessageCodec::for_server(limits);
        let mut src = BytesMut::from(&b"PUT /a\r\nContent-Length: 10\r\n\r\n0123456789"[..]);
        let frames = decode_all(&mut codec, &mut src);
        let sizes: Vec<usize> = frames
            .iter()
            .filter_map(|f| match f {
                MessageFrame::Content(b) => Some(b.len()),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_header_block_may_fill_the_limit() {
        let limits = CodecLimits {
            max_initial_line_length: 64,
            max_header_size: 32,
            max_chunk_size: 1024,
        };
        // 30 bytes of header line plus its CRLF
        let mut codec = MessageCodec::for_server(limits.clone());
        let mut src = BytesMut::from(&b"GET /a\r\nReason: 0123456789012345678901\r\n\r\n"[..]);
        let frames = decode_all(&mut codec, &mut src);
        match &frames[0] {
            MessageFrame::Head(h) => {
                assert!(!h.decode_result.is_failure());
                assert_eq!(h.reasons(), vec!["0123456789012345678901"]);
            }
            other => panic!("unexpected frame {:?}", other),
        }

        let mut codec = MessageCodec::for_server(limits);
        let mut src = BytesMut::from(&b"GET /a\r\nReason: 01234567890123456789012\r\n\r\n"[..]);
        let frames = decode_all(&mut codec, &mut src);
        assert!(matches!(&frames[0], MessageFrame::Head(h) if h.decode_result.is_failure()));
    }

    #[test]
    fn test_padded_and_folded_values_survive_the_wire() -> AppResult<()> {
        let head = Message::new(Command::Info, "/health")
            .with_header("X-Pad", " padded ")?
            .with_header("X-Fold", "a\r\n b")?
            .with_header("x-fold", "\tsecond\r\n\tline")?;
        let sent: Vec<(String, String)> = head
            .headers
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();

        let mut encoder = MessageCodec::for_client(CodecLimits::default());
        let mut wire = BytesMut::new();
        encoder.encode(MessageFrame::Head(head), &mut wire)?;
        encoder.encode(MessageFrame::LastContent, &mut wire)?;

        let frames = decode_all(&mut server_codec(), &mut wire);
        match &frames[0] {
            MessageFrame::Head(h) => {
                let received: Vec<(String, String)> = h
                    .headers
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect();
                assert_eq!(received, sent);
                assert_eq!(h.headers.get_all("X-FOLD"), vec!["a b", "second line"]);
            }
            other => panic!("unexpected frame {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_eof_inside_message_is_an_error() {
        let mut codec = server_codec();
        let mut src = BytesMut::from(&b"PUT /a\r\nContent-Length: 10\r\n\r\n012"[..]);
        let _ = decode_all(&mut codec, &mut src);
        assert!(codec.decode_eof(&mut src).is_err());

        let mut codec = server_codec();
        let mut src = BytesMut::from(&b"GET /a\r\n\r\n"[..]);
        let frames = decode_all(&mut codec, &mut src);
        assert_eq!(frames.len(), 2);
        assert!(codec.decode_eof(&mut src).unwrap().is_none());
    }

    #[test]
    fn test_encoder_mirrors_decoder() -> AppResult<()> {
        let mut encoder = MessageCodec::for_client(CodecLimits::default());
        let mut wire = BytesMut::new();
        let head = Message::new(Command::Put, "/x%20y")
            .with_header(headers::TRANSFER_ENCODING, headers::CHUNKED)?
            .with_header("Merge-Resource", "a.split0")?
            .with_header("Merge-Resource", "a.split1")?;
        encoder.encode(MessageFrame::Head(head), &mut wire)?;
        encoder.encode(MessageFrame::Content(Bytes::from_static(b"abc")), &mut wire)?;
        encoder.encode(MessageFrame::Content(Bytes::new()), &mut wire)?;
        encoder.encode(MessageFrame::Content(Bytes::from_static(b"0123456789abcdef")), &mut wire)?;
        encoder.encode(MessageFrame::LastContent, &mut wire)?;

        assert!(wire.ends_with(b"3\r\nabc\r\n10\r\n0123456789abcdef\r\n0\r\n\r\n"));

        let mut decoder = server_codec();
        let frames = decode_all(&mut decoder, &mut wire);
        match &frames[0] {
            MessageFrame::Head(h) => {
                assert_eq!(h.uri, "/x%20y");
                assert_eq!(h.headers.get_all("merge-resource"), vec!["a.split0", "a.split1"]);
            }
            other => panic!("unexpected frame {:?}", other),
        }
        assert_eq!(body_of(&frames), b"abc0123456789abcdef");
        Ok(())
    }

    #[test]
    fn test_encoder_rejects_unwritable_uri() {
        let mut encoder = server_codec();
        let mut wire = BytesMut::new();
        let head = Message::new(Command::Get, "/has space");
        assert!(encoder.encode(MessageFrame::Head(head), &mut wire).is_err());
    }
}
