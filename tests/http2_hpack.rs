use std::ops::ControlFlow;

use coreio::http2::Http2Reader;
use coreio::http_message::{BodyFormat, Flow, HttpCallbacks, StartLine};

#[derive(Default)]
struct Recorder {
    starts: Vec<StartLine>,
    headers: Vec<(String, String)>,
}

impl HttpCallbacks for Recorder {
    fn on_start(&mut self, start: StartLine) -> Flow {
        self.starts.push(start);
        ControlFlow::Continue(())
    }
    fn on_header_full(&mut self, key: &str, value: &str) -> Flow {
        self.headers.push((key.to_string(), value.to_string()));
        ControlFlow::Continue(())
    }
    fn on_header_done(&mut self, _format: BodyFormat) -> Flow {
        ControlFlow::Continue(())
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

const FRAME_HEADERS: u8 = 0x1;
const FLAG_END_HEADERS: u8 = 0x4;

/// Two HEADERS frames on separate streams over one connection share the
/// same HPACK dynamic table: the first frame inserts a literal header with
/// incremental indexing, and the second frame references it purely by
/// index, exercising the cross-stream, single-connection table state that
/// `Http2Reader` threads through `HpackDecoder`.
#[test]
fn dynamic_table_entry_is_reusable_across_streams() {
    let mut reader = Http2Reader::new(4096);
    let mut rec = Recorder::default();

    // Stream 1: :method GET (idx 2), :path / (idx 4), :scheme http (idx 6),
    // then a literal-with-incremental-indexing "x-request-id: abc123".
    let mut block1 = vec![0x82u8, 0x84, 0x86];
    block1.push(0x40); // literal w/ incremental indexing, new name
    block1.push(12);
    block1.extend_from_slice(b"x-request-id");
    block1.push(6);
    block1.extend_from_slice(b"abc123");
    let f1 = frame(FRAME_HEADERS, FLAG_END_HEADERS, 1, &block1);
    reader.feed(&f1, &mut rec).unwrap();

    assert_eq!(rec.starts.len(), 1);
    assert!(rec
        .headers
        .iter()
        .any(|(k, v)| k == "x-request-id" && v == "abc123"));

    // Stream 3: :method GET, :path /, and index 62 (61 static entries + the
    // one dynamic entry just inserted) referencing "x-request-id" by index
    // alone, with no literal bytes at all.
    rec.headers.clear();
    let block2 = vec![0x82u8, 0x84, 0xbe];
    let f2 = frame(FRAME_HEADERS, FLAG_END_HEADERS, 3, &block2);
    reader.feed(&f2, &mut rec).unwrap();

    assert_eq!(rec.starts.len(), 2);
    assert!(
        rec.headers
            .iter()
            .any(|(k, v)| k == "x-request-id" && v == "abc123"),
        "second stream should resolve index 62 against the shared dynamic table: {:?}",
        rec.headers
    );
}
