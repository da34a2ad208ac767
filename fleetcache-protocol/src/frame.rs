//! Wire framing: big-endian length-prefixed requests and T-L-V responses.
//!
//! Request frame: `[u32 total_len][u32 argc][u32 len, bytes]*argc`, where
//! `total_len` covers everything after itself (the argc field and all
//! arguments). Response frame: `[u32 total_len][tag byte + type-specific
//! body]`, where an `ARR` body recursively nests more tagged values.

use fleetcache_core::{CacheError, Reply};

use crate::error::{FrameError, MAX_ARGS, MAX_MSG};

const LEN_PREFIX: usize = 4;

const TAG_NIL: u8 = 0;
const TAG_ERR: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_DBL: u8 = 4;
const TAG_ARR: u8 = 5;

/// Attempts to parse one request frame from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` doesn't yet contain a complete frame (the
/// caller should read more bytes off the socket and retry). On success,
/// returns the number of bytes the frame occupied (so the caller can drain
/// them from its read buffer) and the parsed argument vector. On a
/// [`FrameError`], the connection must be closed — the byte stream can no
/// longer be trusted to resynchronize.
pub fn try_parse_request(buf: &[u8]) -> Result<Option<(usize, Vec<Vec<u8>>)>, FrameError> {
    if buf.len() < LEN_PREFIX {
        return Ok(None);
    }
    let total_len = read_u32(buf) as usize;
    if total_len > MAX_MSG {
        return Err(FrameError::TooBig {
            len: total_len,
            max: MAX_MSG,
        });
    }
    if buf.len() < LEN_PREFIX + total_len {
        return Ok(None);
    }
    let body = &buf[LEN_PREFIX..LEN_PREFIX + total_len];

    if body.len() < 4 {
        return Err(FrameError::Malformed("frame too short for argument count"));
    }
    let argc = read_u32(body) as usize;
    if argc == 0 {
        return Err(FrameError::Malformed("request declares zero arguments"));
    }
    if argc > MAX_ARGS {
        return Err(FrameError::TooManyArgs {
            n: argc,
            max: MAX_ARGS,
        });
    }

    let mut pos = 4;
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        if body.len() < pos + 4 {
            return Err(FrameError::Malformed("truncated argument length"));
        }
        let len = read_u32(&body[pos..]) as usize;
        pos += 4;
        if body.len() < pos + len {
            return Err(FrameError::Malformed(
                "declared data length exceeds packet size",
            ));
        }
        args.push(body[pos..pos + len].to_vec());
        pos += len;
    }
    if pos != body.len() {
        return Err(FrameError::Malformed("trailing bytes after declared arguments"));
    }

    Ok(Some((LEN_PREFIX + total_len, args)))
}

/// Encodes a complete response frame (length prefix included) and appends
/// it to `out`.
pub fn encode_response(reply: &Reply, out: &mut Vec<u8>) {
    let len_at = out.len();
    out.extend_from_slice(&[0, 0, 0, 0]);
    encode_value(reply, out);
    let body_len = (out.len() - len_at - LEN_PREFIX) as u32;
    out[len_at..len_at + LEN_PREFIX].copy_from_slice(&body_len.to_be_bytes());
}

fn encode_value(reply: &Reply, out: &mut Vec<u8>) {
    match reply {
        Reply::Nil => out.push(TAG_NIL),
        Reply::Err(e) => encode_error(e, out),
        Reply::Str(s) => {
            out.push(TAG_STR);
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s);
        }
        Reply::Int(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_be_bytes());
        }
        Reply::Dbl(d) => {
            out.push(TAG_DBL);
            out.extend_from_slice(&d.to_be_bytes());
        }
        Reply::Arr(items) => {
            out.push(TAG_ARR);
            out.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                encode_value(item, out);
            }
        }
    }
}

fn encode_error(err: &CacheError, out: &mut Vec<u8>) {
    out.push(TAG_ERR);
    out.extend_from_slice(&err.code.code().to_be_bytes());
    let msg = err.message.as_bytes();
    out.extend_from_slice(&(msg.len() as u32).to_be_bytes());
    out.extend_from_slice(msg);
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetcache_core::ErrorCode;

    fn encode_request(args: &[&[u8]]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(args.len() as u32).to_be_bytes());
        for a in args {
            body.extend_from_slice(&(a.len() as u32).to_be_bytes());
            body.extend_from_slice(a);
        }
        let mut out = Vec::new();
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn parses_a_complete_request() {
        let buf = encode_request(&[b"SET", b"k", b"v"]);
        let (consumed, args) = try_parse_request(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(args, vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()]);
    }

    #[test]
    fn returns_none_on_partial_frame() {
        let buf = encode_request(&[b"SET", b"k", b"v"]);
        for cut in 0..buf.len() {
            assert_eq!(try_parse_request(&buf[..cut]).unwrap(), None);
        }
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_MSG as u32) + 1).to_be_bytes());
        assert!(matches!(
            try_parse_request(&buf),
            Err(FrameError::TooBig { .. })
        ));
    }

    #[test]
    fn rejects_zero_argument_count() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_be_bytes());
        let mut buf = Vec::new();
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(&body);
        assert!(matches!(
            try_parse_request(&buf),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_too_many_args() {
        let mut body = Vec::new();
        body.extend_from_slice(&((MAX_ARGS as u32) + 1).to_be_bytes());
        let mut buf = Vec::new();
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(&body);
        assert!(matches!(
            try_parse_request(&buf),
            Err(FrameError::TooManyArgs { .. })
        ));
    }

    #[test]
    fn rejects_trailing_bytes_after_arguments() {
        let mut buf = encode_request(&[b"GET", b"k"]);
        // declare a larger total_len than the body actually needs, leaving
        // trailing junk inside the declared frame
        let extra_len = (read_u32(&buf) + 3) as u32;
        buf[0..4].copy_from_slice(&extra_len.to_be_bytes());
        buf.extend_from_slice(&[0, 0, 0]);
        assert!(matches!(
            try_parse_request(&buf),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn round_trips_every_reply_variant() {
        for reply in [
            Reply::Nil,
            Reply::str(b"hello".to_vec()),
            Reply::Int(-42),
            Reply::Dbl(3.5),
            Reply::Arr(vec![Reply::Int(1), Reply::str(b"x".to_vec())]),
            Reply::Err(CacheError::new(ErrorCode::Arg, "bad arg")),
        ] {
            let mut out = Vec::new();
            encode_response(&reply, &mut out);
            let len = read_u32(&out) as usize;
            assert_eq!(out.len(), LEN_PREFIX + len);
        }
    }

    #[test]
    fn pipelined_requests_parse_one_at_a_time() {
        let mut buf = encode_request(&[b"GET", b"a"]);
        buf.extend(encode_request(&[b"GET", b"b"]));

        let (consumed1, args1) = try_parse_request(&buf).unwrap().unwrap();
        assert_eq!(args1, vec![b"GET".to_vec(), b"a".to_vec()]);
        let (consumed2, args2) = try_parse_request(&buf[consumed1..]).unwrap().unwrap();
        assert_eq!(args2, vec![b"GET".to_vec(), b"b".to_vec()]);
        assert_eq!(consumed1 + consumed2, buf.len());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Encoding then parsing any legal request frame must hand back
            /// the exact argument vector that went in, having consumed
            /// exactly the bytes that were written.
            #[test]
            fn request_round_trips_for_arbitrary_legal_args(
                args in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..16), 1..8)
            ) {
                let arg_refs: Vec<&[u8]> = args.iter().map(|a| a.as_slice()).collect();
                let buf = encode_request(&arg_refs);
                let (consumed, parsed) = try_parse_request(&buf).unwrap().unwrap();
                prop_assert_eq!(consumed, buf.len());
                prop_assert_eq!(parsed, args);
            }
        }
    }
}
