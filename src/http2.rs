//! HTTP/2 frame reader (RFC 7540): reconstructs per-stream request/response
//! messages from framed, HPACK-compressed input without buffering whole
//! messages, dispatching through the same [`crate::http_message::HttpCallbacks`]
//! surface used by the format-independent reader.

use std::collections::HashMap;
use std::fmt;

use crate::hpack::{HpackDecoder, HpackError};
use crate::http_message::{HttpCallbacks, StartLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Http2Error {
    FrameTruncated,
    Hpack(HpackError),
    UserFailure,
}

impl fmt::Display for Http2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Http2Error::FrameTruncated => write!(f, "frame header or payload truncated"),
            Http2Error::Hpack(e) => write!(f, "HPACK error: {e}"),
            Http2Error::UserFailure => write!(f, "callback requested abort"),
        }
    }
}

impl std::error::Error for Http2Error {}

impl From<HpackError> for Http2Error {
    fn from(e: HpackError) -> Self {
        Http2Error::Hpack(e)
    }
}

pub type Result<T> = std::result::Result<T, Http2Error>;

const FRAME_DATA: u8 = 0x0;
const FRAME_HEADERS: u8 = 0x1;
const FRAME_CONTINUATION: u8 = 0x9;

const FLAG_END_STREAM: u8 = 0x1;
const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;

struct StreamState {
    header_fragment: Vec<u8>,
    is_response: Option<bool>,
    seen_any_data: bool,
}

impl StreamState {
    fn new() -> Self {
        StreamState {
            header_fragment: Vec::new(),
            is_response: None,
            seen_any_data: false,
        }
    }
}

/// Streaming reader for one HTTP/2 connection. `feed` may be called
/// repeatedly with arbitrarily chunked bytes; frames spanning calls are
/// buffered internally.
pub struct Http2Reader {
    hpack: HpackDecoder,
    streams: HashMap<u32, StreamState>,
    buf: Vec<u8>,
}

impl Http2Reader {
    pub fn new(hpack_max_capacity: usize) -> Self {
        Http2Reader {
            hpack: HpackDecoder::new(hpack_max_capacity),
            streams: HashMap::new(),
            buf: Vec::new(),
        }
    }

    pub fn feed(&mut self, data: &[u8], callbacks: &mut dyn HttpCallbacks) -> Result<()> {
        self.buf.extend_from_slice(data);
        loop {
            if self.buf.len() < 9 {
                break;
            }
            let length = u32::from_be_bytes([0, self.buf[0], self.buf[1], self.buf[2]]) as usize;
            let frame_type = self.buf[3];
            let flags = self.buf[4];
            let stream_id = u32::from_be_bytes([
                self.buf[5] & 0x7f,
                self.buf[6],
                self.buf[7],
                self.buf[8],
            ]);

            if self.buf.len() < 9 + length {
                break;
            }
            let payload: Vec<u8> = self.buf[9..9 + length].to_vec();
            self.buf.drain(0..9 + length);

            if stream_id == 0 {
                continue;
            }

            self.handle_frame(frame_type, flags, stream_id, &payload, callbacks)?;
        }
        Ok(())
    }

    fn handle_frame(
        &mut self,
        frame_type: u8,
        flags: u8,
        stream_id: u32,
        payload: &[u8],
        callbacks: &mut dyn HttpCallbacks,
    ) -> Result<()> {
        match frame_type {
            FRAME_HEADERS => {
                let body = strip_padding_and_priority(payload, flags)?;
                let state = self.streams.entry(stream_id).or_insert_with(StreamState::new);
                state.header_fragment.extend_from_slice(body);
                if flags & FLAG_END_HEADERS != 0 {
                    self.finish_headers(stream_id, callbacks)?;
                }
                if flags & FLAG_END_STREAM != 0 {
                    callbacks.on_body_done();
                }
            }
            FRAME_CONTINUATION => {
                let state = self.streams.entry(stream_id).or_insert_with(StreamState::new);
                state.header_fragment.extend_from_slice(payload);
                if flags & FLAG_END_HEADERS != 0 {
                    self.finish_headers(stream_id, callbacks)?;
                }
            }
            FRAME_DATA => {
                let body = strip_padding_and_priority(payload, flags & FLAG_PADDED)?;
                if let Some(state) = self.streams.get_mut(&stream_id) {
                    state.seen_any_data = true;
                }
                if !body.is_empty() && callbacks.on_body(body).is_break() {
                    return Err(Http2Error::UserFailure);
                }
                if flags & FLAG_END_STREAM != 0 {
                    callbacks.on_body_done();
                }
            }
            _ => {
                // Unrecognized frame type: already skipped by length in `feed`.
            }
        }
        Ok(())
    }

    fn finish_headers(&mut self, stream_id: u32, callbacks: &mut dyn HttpCallbacks) -> Result<()> {
        let fragment = {
            let state = self
                .streams
                .get_mut(&stream_id)
                .expect("stream entered before finish_headers is called");
            std::mem::take(&mut state.header_fragment)
        };
        let headers = self.hpack.decode_block(&fragment)?;

        let mut status: Option<String> = None;
        let mut method: Option<String> = None;
        let mut scheme: Option<String> = None;
        let mut authority: Option<String> = None;
        let mut path: Option<String> = None;
        let mut regular = Vec::new();

        let mut chunk_extensions = Vec::new();
        for (name, value) in headers {
            match name.as_str() {
                ":status" => status = Some(value),
                ":method" => method = Some(value),
                ":scheme" => scheme = Some(value),
                ":authority" => authority = Some(value),
                ":path" => path = Some(value),
                _ => {
                    if let Some(ext_name) = name.strip_prefix("chunk-extension-") {
                        chunk_extensions.push((ext_name.to_string(), value));
                    } else {
                        regular.push((name, value));
                    }
                }
            }
        }

        let is_response = status.is_some();
        if let Some(state) = self.streams.get_mut(&stream_id) {
            state.is_response = Some(is_response);
        }

        let start = if is_response {
            let code: u16 = status.as_deref().unwrap_or("0").parse().unwrap_or(0);
            StartLine::Response {
                status: code,
                reason: reason_phrase(code).to_string(),
            }
        } else {
            let uri = format!(
                "{}://{} {}",
                scheme.unwrap_or_default(),
                authority.unwrap_or_default(),
                path.unwrap_or_default()
            );
            StartLine::Request {
                method: method.unwrap_or_default(),
                uri,
            }
        };
        if callbacks.on_start(start).is_break() {
            return Err(Http2Error::UserFailure);
        }
        for (name, value) in &regular {
            if callbacks.on_header_full(name, value).is_break() {
                return Err(Http2Error::UserFailure);
            }
            if name != "date" {
                for part in value.split(',') {
                    if callbacks.on_header(name, part.trim()).is_break() {
                        return Err(Http2Error::UserFailure);
                    }
                }
            } else if callbacks.on_header(name, value).is_break() {
                return Err(Http2Error::UserFailure);
            }
        }
        if !chunk_extensions.is_empty() {
            for (name, value) in &chunk_extensions {
                callbacks.on_chunk_extensions(name, value, stream_id as u64);
            }
            callbacks.on_chunk_extensions_done(stream_id as u64);
        }
        if callbacks
            .on_header_done(crate::http_message::BodyFormat::UnknownLength)
            .is_break()
        {
            return Err(Http2Error::UserFailure);
        }
        Ok(())
    }
}

/// Trims the optional pad-length byte (when `PADDED` is set) and the 5-byte
/// priority field (when `PRIORITY` is set, HEADERS only) from the front and
/// the padding bytes from the back.
fn strip_padding_and_priority(payload: &[u8], flags: u8) -> Result<&[u8]> {
    let mut rest = payload;
    let mut pad_len = 0usize;
    if flags & FLAG_PADDED != 0 {
        let (&len_byte, tail) = rest.split_first().ok_or(Http2Error::FrameTruncated)?;
        pad_len = len_byte as usize;
        rest = tail;
    }
    if flags & FLAG_PRIORITY != 0 {
        if rest.len() < 5 {
            return Err(Http2Error::FrameTruncated);
        }
        rest = &rest[5..];
    }
    if rest.len() < pad_len {
        return Err(Http2Error::FrameTruncated);
    }
    Ok(&rest[..rest.len() - pad_len])
}

fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        204 => "No Content",
        206 => "Partial Content",
        304 => "Not Modified",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_message::BodyFormat;

    #[derive(Default)]
    struct Recorder {
        starts: Vec<StartLine>,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        body_done: u32,
        chunk_extensions: Vec<(String, String, u64)>,
        chunk_extensions_done: Vec<u64>,
    }

    impl HttpCallbacks for Recorder {
        fn on_start(&mut self, start: StartLine) -> crate::http_message::Flow {
            self.starts.push(start);
            std::ops::ControlFlow::Continue(())
        }
        fn on_header_full(&mut self, key: &str, value: &str) -> crate::http_message::Flow {
            self.headers.push((key.to_string(), value.to_string()));
            std::ops::ControlFlow::Continue(())
        }
        fn on_header_done(&mut self, _format: BodyFormat) -> crate::http_message::Flow {
            std::ops::ControlFlow::Continue(())
        }
        fn on_body(&mut self, data: &[u8]) -> crate::http_message::Flow {
            self.body.extend_from_slice(data);
            std::ops::ControlFlow::Continue(())
        }
        fn on_body_done(&mut self) {
            self.body_done += 1;
        }
        fn on_chunk_extensions(&mut self, key: &str, value: &str, idx: u64) {
            self.chunk_extensions.push((key.to_string(), value.to_string(), idx));
        }
        fn on_chunk_extensions_done(&mut self, idx: u64) {
            self.chunk_extensions_done.push(idx);
        }
    }

    fn frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let len = payload.len() as u32;
        out.extend_from_slice(&len.to_be_bytes()[1..]);
        out.push(frame_type);
        out.push(flags);
        out.extend_from_slice(&stream_id.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn simple_response_with_body() {
        let mut reader = Http2Reader::new(4096);

        // :status: 200 (static index 8), plus a literal-without-indexing
        // "content-length: 44" header (literal name, literal value).
        let mut lit = vec![0x00u8]; // 0000xxxx, name index 0 (literal name)
        lit.push(14);
        lit.extend_from_slice(b"content-length");
        lit.push(2);
        lit.extend_from_slice(b"44");
        let mut block = vec![0x88u8];
        block.extend_from_slice(&lit);

        let headers_frame = frame(FRAME_HEADERS, FLAG_END_HEADERS, 1, &block);
        let body = vec![b'a'; 44];
        let data_frame = frame(FRAME_DATA, FLAG_END_STREAM, 1, &body);

        let mut rec = Recorder::default();
        reader.feed(&headers_frame, &mut rec).unwrap();
        reader.feed(&data_frame, &mut rec).unwrap();

        assert_eq!(rec.starts.len(), 1);
        match &rec.starts[0] {
            StartLine::Response { status, .. } => assert_eq!(*status, 200),
            _ => panic!("expected response start line"),
        }
        assert_eq!(rec.body.len(), 44);
        assert_eq!(rec.body_done, 1);
    }

    #[test]
    fn stream_zero_is_skipped() {
        let mut reader = Http2Reader::new(4096);
        let mut rec = Recorder::default();
        let f = frame(FRAME_HEADERS, FLAG_END_HEADERS, 0, &[0x82]);
        reader.feed(&f, &mut rec).unwrap();
        assert!(rec.starts.is_empty());
    }

    #[test]
    fn chunk_extension_prefixed_header_is_rewritten_into_callback_pair() {
        let mut reader = Http2Reader::new(4096);
        let mut rec = Recorder::default();

        let mut lit = vec![0x00u8]; // literal without indexing, new name
        lit.push(21);
        lit.extend_from_slice(b"chunk-extension-part");
        lit.push(1);
        lit.extend_from_slice(b"1");
        let mut block = vec![0x82u8]; // :method GET
        block.extend_from_slice(&lit);

        let f = frame(FRAME_HEADERS, FLAG_END_HEADERS, 7, &block);
        reader.feed(&f, &mut rec).unwrap();

        assert!(
            rec.headers.is_empty(),
            "chunk-extension-prefixed headers must not leak through as plain headers: {:?}",
            rec.headers
        );
        assert_eq!(rec.chunk_extensions, vec![("part".to_string(), "1".to_string(), 7)]);
        assert_eq!(rec.chunk_extensions_done, vec![7]);
    }

    #[test]
    fn interleaved_streams_assemble_independently() {
        let mut reader = Http2Reader::new(4096);
        let mut rec = Recorder::default();
        for &stream_id in &[1u32, 3, 5] {
            let f = frame(FRAME_HEADERS, FLAG_END_HEADERS, stream_id, &[0x88]);
            reader.feed(&f, &mut rec).unwrap();
        }
        assert_eq!(rec.starts.len(), 3);
    }
}
