//! Black-box tests that drive a real `fleetcache-server` instance over a
//! real `TcpStream`, the same way the retained `test/raw.py` and
//! `test_cmds_extra.py` clients exercised the original implementation.
//!
//! Each test binds to an ephemeral port (`--port 0`), spawns the reactor on
//! a background thread, and speaks the wire protocol directly — there is no
//! client crate in this workspace to exercise instead.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use fleetcache_server::config::{LogFormat, Options};
use fleetcache_server::eventloop;

fn spawn_server() -> std::net::SocketAddr {
    let options = Options {
        bind_addr: "127.0.0.1".parse().unwrap(),
        port: 0,
        idle_timeout_ms: 60_000,
        max_connections: 1_000,
        reap_batch: 256,
        write_watermark_bytes: 8 * 1024 * 1024,
        shutdown_grace_ms: 1_000,
        log_format: LogFormat::Text,
        log_filter: None,
    };
    let listener = eventloop::bind(&options).expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    thread::spawn(move || {
        eventloop::serve(options, listener).expect("serve");
    });
    addr
}

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

/// A decoded response value, mirroring the five wire tags plus `ERR`.
#[derive(Debug, Clone, PartialEq)]
enum Wire {
    Nil,
    Err(u32, String),
    Str(Vec<u8>),
    Int(i64),
    Dbl(f64),
    Arr(Vec<Wire>),
}

fn read_exact(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).expect("read_exact");
    buf
}

fn read_u32(stream: &mut TcpStream) -> u32 {
    u32::from_be_bytes(read_exact(stream, 4).try_into().unwrap())
}

/// Like [`read_u32`], but returns `None` on a clean EOF instead of
/// panicking, so a test can poll "is there another frame, or did the
/// server close the connection?" without tripping `read_exact`'s panic.
fn try_read_u32(stream: &mut TcpStream) -> Option<u32> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return None,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => panic!("read error: {e}"),
        }
    }
    Some(u32::from_be_bytes(buf))
}

fn read_response(stream: &mut TcpStream) -> Wire {
    let total_len = read_u32(stream) as usize;
    let body = read_exact(stream, total_len);
    decode_value(&body, &mut 0)
}

fn decode_value(body: &[u8], pos: &mut usize) -> Wire {
    let tag = body[*pos];
    *pos += 1;
    match tag {
        0 => Wire::Nil,
        1 => {
            let code = u32::from_be_bytes(body[*pos..*pos + 4].try_into().unwrap());
            *pos += 4;
            let len = u32::from_be_bytes(body[*pos..*pos + 4].try_into().unwrap()) as usize;
            *pos += 4;
            let msg = String::from_utf8_lossy(&body[*pos..*pos + len]).into_owned();
            *pos += len;
            Wire::Err(code, msg)
        }
        2 => {
            let len = u32::from_be_bytes(body[*pos..*pos + 4].try_into().unwrap()) as usize;
            *pos += 4;
            let s = body[*pos..*pos + len].to_vec();
            *pos += len;
            Wire::Str(s)
        }
        3 => {
            let v = i64::from_be_bytes(body[*pos..*pos + 8].try_into().unwrap());
            *pos += 8;
            Wire::Int(v)
        }
        4 => {
            let v = f64::from_be_bytes(body[*pos..*pos + 8].try_into().unwrap());
            *pos += 8;
            Wire::Dbl(v)
        }
        5 => {
            let count = u32::from_be_bytes(body[*pos..*pos + 4].try_into().unwrap()) as usize;
            *pos += 4;
            let items = (0..count).map(|_| decode_value(body, pos)).collect();
            Wire::Arr(items)
        }
        other => panic!("unknown wire tag {other}"),
    }
}

fn roundtrip(stream: &mut TcpStream, args: &[&[u8]]) -> Wire {
    stream.write_all(&encode_request(args)).expect("write");
    read_response(stream)
}

#[test]
fn scenario_set_then_get() {
    let addr = spawn_server();
    let mut s = TcpStream::connect(addr).expect("connect");
    assert_eq!(roundtrip(&mut s, &[b"SET", b"a", b"hello_world"]), Wire::Str(b"OK".to_vec()));
    assert_eq!(roundtrip(&mut s, &[b"GET", b"a"]), Wire::Str(b"hello_world".to_vec()));
}

#[test]
fn scenario_zadd_and_zquery_pagination() {
    let addr = spawn_server();
    let mut s = TcpStream::connect(addr).expect("connect");
    assert_eq!(roundtrip(&mut s, &[b"ZADD", b"z", b"1", b"n1"]), Wire::Int(1));
    assert_eq!(roundtrip(&mut s, &[b"ZADD", b"z", b"2", b"n2"]), Wire::Int(1));
    assert_eq!(roundtrip(&mut s, &[b"ZADD", b"z", b"1.1", b"n1"]), Wire::Int(0));
    assert_eq!(
        roundtrip(&mut s, &[b"ZQUERY", b"z", b"1", b"", b"0", b"10"]),
        Wire::Arr(vec![
            Wire::Str(b"n1".to_vec()),
            Wire::Dbl(1.1),
            Wire::Str(b"n2".to_vec()),
            Wire::Dbl(2.0),
        ])
    );
}

#[test]
fn scenario_wrongtype_leaves_value_untouched() {
    let addr = spawn_server();
    let mut s = TcpStream::connect(addr).expect("connect");
    assert_eq!(roundtrip(&mut s, &[b"SET", b"s", b"hello"]), Wire::Str(b"OK".to_vec()));
    match roundtrip(&mut s, &[b"HSET", b"s", b"f", b"v"]) {
        Wire::Err(3, msg) => assert!(msg.contains("WRONGTYPE")),
        other => panic!("expected WRONGTYPE error, got {other:?}"),
    }
    assert_eq!(roundtrip(&mut s, &[b"GET", b"s"]), Wire::Str(b"hello".to_vec()));
}

#[test]
fn scenario_incr_decr_family() {
    let addr = spawn_server();
    let mut s = TcpStream::connect(addr).expect("connect");
    assert_eq!(roundtrip(&mut s, &[b"SET", b"c", b"10"]), Wire::Str(b"OK".to_vec()));
    assert_eq!(roundtrip(&mut s, &[b"INCR", b"c"]), Wire::Int(11));
    assert_eq!(roundtrip(&mut s, &[b"INCRBY", b"c", b"5"]), Wire::Int(16));
    assert_eq!(roundtrip(&mut s, &[b"DECR", b"c"]), Wire::Int(15));
}

#[test]
fn scenario_pexpire_then_nil_and_pttl_minus_two() {
    let addr = spawn_server();
    let mut s = TcpStream::connect(addr).expect("connect");
    assert_eq!(roundtrip(&mut s, &[b"SET", b"k", b"v"]), Wire::Str(b"OK".to_vec()));
    assert_eq!(roundtrip(&mut s, &[b"PEXPIRE", b"k", b"100"]), Wire::Int(1));
    thread::sleep(Duration::from_millis(250));
    assert_eq!(roundtrip(&mut s, &[b"GET", b"k"]), Wire::Nil);
    assert_eq!(roundtrip(&mut s, &[b"PTTL", b"k"]), Wire::Int(-2));
}

#[test]
fn scenario_malformed_frame_closes_connection() {
    let addr = spawn_server();
    let mut s = TcpStream::connect(addr).expect("connect");

    // declares one argument of length 1000 but sends only one byte of body
    let mut body = Vec::new();
    body.extend_from_slice(&1u32.to_be_bytes()); // argc = 1
    body.extend_from_slice(&1000u32.to_be_bytes()); // declared arg len
    body.push(b'x');
    let mut buf = Vec::new();
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    s.write_all(&buf).expect("write");

    match read_response(&mut s) {
        Wire::Err(5, msg) => assert!(msg.to_lowercase().contains("data length") || msg.to_lowercase().contains("exceed")),
        other => panic!("expected MALFORMED error, got {other:?}"),
    }

    // the connection should close once the error has flushed
    let mut trailing = [0u8; 8];
    let n = s.read(&mut trailing).unwrap_or(0);
    assert_eq!(n, 0, "connection should be closed after a malformed frame");
}

#[test]
fn pipeline_ordering_is_preserved() {
    let addr = spawn_server();
    let mut s = TcpStream::connect(addr).expect("connect");

    let mut batch = Vec::new();
    for i in 0..20 {
        batch.extend_from_slice(&encode_request(&[b"SET", format!("k{i}").as_bytes(), format!("v{i}").as_bytes()]));
    }
    s.write_all(&batch).expect("write");
    for i in 0..20 {
        let reply = read_response(&mut s);
        assert_eq!(reply, Wire::Str(b"OK".to_vec()), "response {i}");
    }

    let mut batch = Vec::new();
    for i in 0..20 {
        batch.extend_from_slice(&encode_request(&[b"GET", format!("k{i}").as_bytes()]));
    }
    s.write_all(&batch).expect("write");
    for i in 0..20 {
        let reply = read_response(&mut s);
        assert_eq!(reply, Wire::Str(format!("v{i}").into_bytes()), "response {i}");
    }
}

#[test]
fn idempotent_delete() {
    let addr = spawn_server();
    let mut s = TcpStream::connect(addr).expect("connect");
    assert_eq!(roundtrip(&mut s, &[b"SET", b"k", b"v"]), Wire::Str(b"OK".to_vec()));
    assert_eq!(roundtrip(&mut s, &[b"DEL", b"k"]), Wire::Int(1));
    assert_eq!(roundtrip(&mut s, &[b"DEL", b"k"]), Wire::Int(0));
}

#[test]
fn write_buffer_watermark_terminates_an_unread_pipeline() {
    let options = Options {
        bind_addr: "127.0.0.1".parse().unwrap(),
        port: 0,
        idle_timeout_ms: 60_000,
        max_connections: 1_000,
        reap_batch: 256,
        write_watermark_bytes: 4096,
        shutdown_grace_ms: 1_000,
        log_format: LogFormat::Text,
        log_filter: None,
    };
    let listener = eventloop::bind(&options).expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    thread::spawn(move || {
        eventloop::serve(options, listener).expect("serve");
    });

    let mut s = TcpStream::connect(addr).expect("connect");
    // queue far more GETs than the client drains, to exceed the watermark
    // before this test ever reads a single response.
    let big_value = vec![b'x'; 4096];
    roundtrip(&mut s, &[b"SET", b"big", &big_value]);
    let mut batch = Vec::new();
    for _ in 0..64 {
        batch.extend_from_slice(&encode_request(&[b"GET", b"big"]));
    }
    s.write_all(&batch).expect("write");

    // somewhere in the responses we should see a TOO_BIG error, and the
    // connection should close once it's been flushed.
    let mut saw_too_big = false;
    while let Some(total_len) = try_read_u32(&mut s) {
        let body = read_exact(&mut s, total_len as usize);
        if let Wire::Err(2, _) = decode_value(&body, &mut 0) {
            saw_too_big = true;
            break;
        }
    }
    assert!(saw_too_big, "expected a TOO_BIG error once the write watermark was exceeded");
}
