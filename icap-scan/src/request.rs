//! Wire encoder for the two ICAP requests the scanner sends.
//!
//! - `OPTIONS` carries no body and no port in its URI.
//! - `RESPMOD` wraps the payload in a synthetic HTTP exchange:
//!
//! ```text
//! RESPMOD icap://{host}:{port}/{service} ICAP/1.0
//! Host:{host}:{port}
//! Allow:204
//! Encapsulated: req-hdr=0, res-hdr={n}, res-body={m}
//!
//! GET /{display_name} HTTP/1.1
//!
//! HTTP/1.1 200 OK
//! Transfer-Encoding: chunked
//!
//! {HEX len}
//! {base64 payload}
//! 0
//! ```
//!
//! The payload is always base64-encoded (MIME layout) and sent as a single
//! chunk followed by the zero-length terminator.
//!
//! # Example
//! ```rust
//! use icap_scan::{Endpoint, ScanRequest};
//! use icap_scan::request::{encode_options, encode_respmod};
//!
//! let ep = Endpoint::new("127.0.0.1", 1344, "av/respmod").unwrap();
//! assert_eq!(
//!     encode_options(&ep),
//!     b"OPTIONS icap://127.0.0.1/av/respmod ICAP/1.0\r\n\r\n".to_vec()
//! );
//!
//! let wire = encode_respmod(&ep, &ScanRequest::new(b"hello".to_vec(), "hello.txt"));
//! assert!(wire.starts_with(b"RESPMOD icap://127.0.0.1:1344/av/respmod ICAP/1.0\r\n"));
//! ```

use crate::ICAP_VERSION;
use crate::endpoint::Endpoint;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::trace;

/// Name used when the caller has none.
pub const DEFAULT_DISPLAY_NAME: &str = "filetoscan";

/// Synthetic HTTP response head announcing the chunked payload.
const RES_HDR_BLOCK: &[u8] = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";

/// Input bytes per base64 line (57 bytes -> 76 characters).
const BASE64_LINE_INPUT: usize = 57;

/// One payload to scan. Consumed by a single exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    payload: Vec<u8>,
    display_name: String,
}

impl ScanRequest {
    /// `display_name` only ends up in the synthetic `GET` line; CR and LF are
    /// replaced by `_`, an empty name becomes [`DEFAULT_DISPLAY_NAME`].
    pub fn new(payload: impl Into<Vec<u8>>, display_name: &str) -> Self {
        Self {
            payload: payload.into(),
            display_name: sanitize_display_name(display_name),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// Replace line terminators so the name cannot inject header lines.
pub fn sanitize_display_name(name: &str) -> String {
    if name.is_empty() {
        return DEFAULT_DISPLAY_NAME.to_string();
    }
    name.replace(['\r', '\n'], "_")
}

/// Offsets of the `Encapsulated` header, relative to the end of the ICAP head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncapsulatedOffsets {
    pub res_hdr: usize,
    pub res_body: usize,
}

impl EncapsulatedOffsets {
    fn from_blocks(req_hdr: &[u8], res_hdr: &[u8]) -> Self {
        let res_hdr_offset = req_hdr.len();
        Self {
            res_hdr: res_hdr_offset,
            res_body: res_hdr_offset + res_hdr.len(),
        }
    }

    /// Value of the `Encapsulated` header.
    pub fn header_value(&self) -> String {
        format!(
            "req-hdr=0, res-hdr={}, res-body={}",
            self.res_hdr, self.res_body
        )
    }
}

/// `OPTIONS icap://{host}/{service} ICAP/1.0\r\n\r\n`
pub fn encode_options(endpoint: &Endpoint) -> Vec<u8> {
    format!(
        "OPTIONS icap://{}/{} {ICAP_VERSION}\r\n\r\n",
        endpoint.host(),
        endpoint.service()
    )
    .into_bytes()
}

/// Offsets that [`encode_respmod`] writes for a given display name.
pub fn respmod_offsets(display_name: &str) -> EncapsulatedOffsets {
    EncapsulatedOffsets::from_blocks(&req_hdr_block(display_name), RES_HDR_BLOCK)
}

/// Build the complete RESPMOD request for `req`.
pub fn encode_respmod(endpoint: &Endpoint, req: &ScanRequest) -> Vec<u8> {
    let req_hdr = req_hdr_block(&req.display_name);
    let offsets = EncapsulatedOffsets::from_blocks(&req_hdr, RES_HDR_BLOCK);
    let encoded = encode_payload(&req.payload);

    let icap_hdr = format!(
        "RESPMOD icap://{host}:{port}/{service} {ICAP_VERSION}\r\n\
         Host:{host}:{port}\r\n\
         Allow:204\r\n\
         Encapsulated: {enc}\r\n\
         \r\n",
        host = endpoint.host(),
        port = endpoint.port(),
        service = endpoint.service(),
        enc = offsets.header_value(),
    );

    let mut out = Vec::with_capacity(
        icap_hdr.len() + req_hdr.len() + RES_HDR_BLOCK.len() + encoded.len() + 32,
    );
    out.extend_from_slice(icap_hdr.as_bytes());
    out.extend_from_slice(&req_hdr);
    out.extend_from_slice(RES_HDR_BLOCK);
    write_chunk_into(&mut out, &encoded);
    out.extend_from_slice(b"0\r\n\r\n");

    trace!(
        "encode_respmod: name={} payload_len={} encoded_len={} total={}",
        req.display_name,
        req.payload.len(),
        encoded.len(),
        out.len()
    );
    out
}

fn req_hdr_block(display_name: &str) -> Vec<u8> {
    format!("GET /{display_name} HTTP/1.1\r\n\r\n").into_bytes()
}

/// Base64 in MIME layout: 76-character lines, each ended by `\n`.
pub fn encode_payload(payload: &[u8]) -> Vec<u8> {
    let lines = payload.len().div_ceil(BASE64_LINE_INPUT);
    let mut out = Vec::with_capacity(lines * 77);
    for chunk in payload.chunks(BASE64_LINE_INPUT) {
        out.extend_from_slice(STANDARD.encode(chunk).as_bytes());
        out.push(b'\n');
    }
    out
}

/// Write one chunk (uppercase hex size line, data, CRLF) into `out`.
fn write_chunk_into(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(format!("{:X}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn endpoint() -> Endpoint {
        Endpoint::new("192.168.122.99", 1344, "av/respmod").unwrap()
    }

    fn split_head(wire: &[u8]) -> (&[u8], &[u8]) {
        let end = memchr::memmem::find(wire, b"\r\n\r\n").expect("icap head") + 4;
        wire.split_at(end)
    }

    /// Strip the single data chunk framing and base64-decode it.
    fn decode_body(wire: &[u8], offsets: EncapsulatedOffsets) -> Vec<u8> {
        let (_, encapsulated) = split_head(wire);
        let body = &encapsulated[offsets.res_body..];
        let size_end = memchr::memmem::find(body, b"\r\n").unwrap();
        let size = usize::from_str_radix(std::str::from_utf8(&body[..size_end]).unwrap(), 16)
            .unwrap();
        let data_start = size_end + 2;
        let data = &body[data_start..data_start + size];
        assert_eq!(&body[data_start + size..], b"\r\n0\r\n\r\n");

        let compact: Vec<u8> = data.iter().copied().filter(|&b| b != b'\n').collect();
        STANDARD.decode(compact).unwrap()
    }

    #[test]
    fn options_request_is_exact() {
        assert_eq!(
            encode_options(&endpoint()),
            b"OPTIONS icap://192.168.122.99/av/respmod ICAP/1.0\r\n\r\n"
        );
    }

    #[test]
    fn respmod_request_is_exact() {
        let req = ScanRequest::new(b"hello".to_vec(), "testfile");
        let wire = encode_respmod(&endpoint(), &req);
        let expected = "RESPMOD icap://192.168.122.99:1344/av/respmod ICAP/1.0\r\n\
                        Host:192.168.122.99:1344\r\n\
                        Allow:204\r\n\
                        Encapsulated: req-hdr=0, res-hdr=26, res-body=73\r\n\
                        \r\n\
                        GET /testfile HTTP/1.1\r\n\
                        \r\n\
                        HTTP/1.1 200 OK\r\n\
                        Transfer-Encoding: chunked\r\n\
                        \r\n\
                        9\r\n\
                        aGVsbG8=\n\r\n\
                        0\r\n\
                        \r\n";
        assert_eq!(String::from_utf8(wire).unwrap(), expected);
    }

    #[test]
    fn offsets_point_at_the_emitted_blocks() {
        let req = ScanRequest::new(vec![1, 2, 3], "dir/sample.exe");
        let wire = encode_respmod(&endpoint(), &req);
        let offsets = respmod_offsets(req.display_name());
        let (head, encapsulated) = split_head(&wire);

        let head = std::str::from_utf8(head).unwrap();
        assert!(head.contains(&format!("Encapsulated: {}\r\n", offsets.header_value())));
        assert!(encapsulated[offsets.res_hdr..].starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(encapsulated[..offsets.res_hdr].ends_with(b"\r\n\r\n"));
        assert!(encapsulated[offsets.res_body..].starts_with(b"5\r\nAQID\n\r\n"));
    }

    #[rstest]
    #[case("a")]
    #[case("filetoscan")]
    #[case("dadc624d4454e10293dbd1b701b9ee9f99ef83b4cd07b695111d37eb95abcff8")]
    #[case("путь/файл.bin")]
    fn offsets_follow_name_length(#[case] name: &str) {
        let offsets = respmod_offsets(name);
        let req_hdr = format!("GET /{name} HTTP/1.1\r\n\r\n");
        let res_hdr = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        assert_eq!(offsets.res_hdr, req_hdr.len());
        assert_eq!(offsets.res_body, req_hdr.len() + res_hdr.len());
    }

    #[rstest]
    #[case(Vec::new())]
    #[case(b"MZ\x90\x00\x03\x00\x00\x00\x04\x00\x00\x00\xff\xff".to_vec())]
    #[case((0..=255u8).collect::<Vec<u8>>())]
    #[case((0..5000u32).map(|i| (i * 7 % 251) as u8).collect::<Vec<u8>>())]
    fn payload_survives_chunk_and_base64(#[case] payload: Vec<u8>) {
        let req = ScanRequest::new(payload.clone(), "sample");
        let wire = encode_respmod(&endpoint(), &req);
        let offsets = respmod_offsets(req.display_name());
        assert_eq!(decode_body(&wire, offsets), payload);
    }

    #[test]
    fn payload_is_one_chunk_whatever_its_size() {
        let req = ScanRequest::new(vec![0xAB; 200_000], "big");
        let wire = encode_respmod(&endpoint(), &req);
        let (_, encapsulated) = split_head(&wire);
        let body = &encapsulated[respmod_offsets("big").res_body..];
        let encoded_len = encode_payload(req.payload()).len();
        assert!(body.starts_with(format!("{encoded_len:X}\r\n").as_bytes()));
        assert!(body.ends_with(b"\r\n0\r\n\r\n"));
        // only the size line and the terminator carry CRLF framing
        assert_eq!(memchr::memmem::find_iter(body, b"\r\n").count(), 4);
    }

    #[test]
    fn encode_payload_wraps_lines_at_76() {
        let encoded = encode_payload(&[0u8; 58]);
        let text = std::str::from_utf8(&encoded).unwrap();
        let lines: Vec<&str> = text.split_terminator('\n').collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 76);
        assert_eq!(lines[1], "AA==");
        assert!(encode_payload(b"").is_empty());
    }

    #[test]
    fn empty_payload_still_sends_a_data_chunk() {
        let wire = encode_respmod(&endpoint(), &ScanRequest::new(Vec::new(), "empty"));
        assert!(wire.ends_with(b"chunked\r\n\r\n0\r\n\r\n0\r\n\r\n"));
    }

    #[rstest]
    #[case("evil\r\nX-Virus-ID: none", "evil__X-Virus-ID: none")]
    #[case("line\nbreak", "line_break")]
    #[case("", DEFAULT_DISPLAY_NAME)]
    #[case("plain.txt", "plain.txt")]
    fn display_name_is_sanitized(#[case] raw: &str, #[case] expected: &str) {
        let req = ScanRequest::new(Vec::new(), raw);
        assert_eq!(req.display_name(), expected);
    }

    #[test]
    fn sanitized_name_cannot_add_header_lines() {
        let req = ScanRequest::new(b"x".to_vec(), "a\r\nHost: attacker\r\n\r\n");
        let wire = encode_respmod(&endpoint(), &req);
        let (_, encapsulated) = split_head(&wire);
        let offsets = respmod_offsets(req.display_name());
        let req_hdr = std::str::from_utf8(&encapsulated[..offsets.res_hdr]).unwrap();
        assert_eq!(req_hdr.matches("\r\n").count(), 2);
        assert!(req_hdr.starts_with("GET /a__Host: attacker____ HTTP/1.1"));
    }
}
