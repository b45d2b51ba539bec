use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use memcc::{ClientError, Client, ConnectOptions, DeleteOutcome};

/// One scripted exchange: the exact request expected and the raw bytes sent back.
type Exchange = (&'static str, &'static str);

fn spawn_server(script: Vec<Exchange>) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for (expected, response) in script {
            let request = read_request(&mut reader).expect("read request");
            assert_eq!(String::from_utf8_lossy(&request), expected);
            stream.write_all(response.as_bytes()).expect("write response");
            stream.flush().expect("flush");
        }
        // Hold the socket until the client hangs up.
        let mut rest = Vec::new();
        let _ = reader.read_to_end(&mut rest);
    });

    (port, handle)
}

/// Accepts one connection, reads a single request and hangs up without replying.
fn spawn_hangup_server() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(stream);
        let _ = read_request(&mut reader);
    });

    (port, handle)
}

fn read_request(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<u8>> {
    let mut request = Vec::new();
    reader.read_until(b'\n', &mut request)?;
    if request.starts_with(b"set ") {
        let line = String::from_utf8_lossy(&request).into_owned();
        let len: usize = line
            .split_whitespace()
            .last()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "length"))?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        request.extend_from_slice(&data);
    }
    Ok(request)
}

fn connect(port: u16) -> Client {
    let options = ConnectOptions {
        connect_timeout: Duration::from_secs(1),
        read_timeout: Some(Duration::from_secs(2)),
        write_timeout: Some(Duration::from_secs(2)),
    };
    Client::connect_with("127.0.0.1", port, &options).expect("connect")
}

#[test]
fn client_set_get_roundtrip() {
    let (port, server) = spawn_server(vec![
        ("set greeting 0 0 5\r\nhello\r\n", "STORED\r\n"),
        ("get greeting\r\n", "VALUE greeting 0 5\r\nhello\r\nEND\r\n"),
    ]);

    let mut client = connect(port);
    client.set("greeting", b"hello", 0).expect("set");
    let value = client.get("greeting").expect("get");
    assert_eq!(value.as_deref(), Some(&b"hello"[..]));

    client.close();
    server.join().expect("server");
}

#[test]
fn client_binary_value_roundtrip() {
    let (port, server) = spawn_server(vec![
        ("set blob 0 60 9\r\n\r\nEND\r\n\x00\x7f\r\n", "STORED\r\n"),
        ("get blob\r\n", "VALUE blob 0 9\r\n\r\nEND\r\n\x00\x7f\r\nEND\r\n"),
    ]);

    let mut client = connect(port);
    client.set("blob", b"\r\nEND\r\n\x00\x7f", 60).expect("set");
    let value = client.get("blob").expect("get").expect("present");
    assert_eq!(&value[..], b"\r\nEND\r\n\x00\x7f");

    client.close();
    server.join().expect("server");
}

#[test]
fn client_get_miss_is_not_an_error() {
    let (port, server) = spawn_server(vec![("get missing\r\n", "END\r\n")]);

    let mut client = connect(port);
    assert_eq!(client.get("missing").expect("get"), None);

    client.close();
    server.join().expect("server");
}

#[test]
fn client_set_failure_carries_server_text() {
    let (port, server) = spawn_server(vec![(
        "set big 0 0 3\r\nabc\r\n",
        "SERVER_ERROR object too large for cache\r\n",
    )]);

    let mut client = connect(port);
    match client.set("big", b"abc", 0) {
        Err(ClientError::SetFailed { response }) => {
            assert_eq!(response, "SERVER_ERROR object too large for cache")
        }
        other => panic!("Expected SetFailed, got {:?}", other),
    }
    assert!(client.is_connected());

    client.close();
    server.join().expect("server");
}

#[test]
fn client_delete_outcomes() {
    let (port, server) = spawn_server(vec![
        ("delete present\r\n", "DELETED\r\n"),
        ("delete present\r\n", "NOT_FOUND\r\n"),
        ("delete odd\r\n", "SERVER_ERROR busy\r\n"),
    ]);

    let mut client = connect(port);
    assert_eq!(client.delete("present").expect("delete"), DeleteOutcome::Deleted);
    assert_eq!(client.delete("present").expect("delete"), DeleteOutcome::NotFound);
    assert!(matches!(
        client.delete("odd"),
        Err(ClientError::DeleteFailed { .. })
    ));

    client.close();
    server.join().expect("server");
}

#[test]
fn client_stats_rejoins_multi_word_values() {
    let (port, server) = spawn_server(vec![
        (
            "stats\r\n",
            "STAT pid 4242\r\nSTAT uptime 3600\r\nSTAT version 1.6.21 extra words\r\nEND\r\n",
        ),
        ("stats slabs\r\n", "STAT 1:chunk_size 96\r\nSTAT active_slabs 1\r\nEND\r\n"),
    ]);

    let mut client = connect(port);
    let stats = client.stats(None).expect("stats");
    assert_eq!(stats.get("pid").map(String::as_str), Some("4242"));
    assert_eq!(stats.get("uptime").map(String::as_str), Some("3600"));
    assert_eq!(
        stats.get("version").map(String::as_str),
        Some("1.6.21 extra words")
    );

    let slabs = client.stats(Some("slabs")).expect("stats slabs");
    assert_eq!(slabs.get("1:chunk_size").map(String::as_str), Some("96"));

    client.close();
    server.join().expect("server");
}

#[test]
fn client_cache_dump() {
    let (port, server) = spawn_server(vec![(
        "stats cachedump 1 10\r\n",
        "ITEM alpha [5 b; 0 s]\r\nITEM beta [7 b; 1700000000 s]\r\nEND\r\n",
    )]);

    let mut client = connect(port);
    let items = client.cache_dump("1", 10).expect("cachedump");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].key, "alpha");
    assert_eq!(items[0].size, "5");
    assert_eq!(items[1].expiry, "1700000000");
    assert!(items[1].expires_at().is_some());

    client.close();
    server.join().expect("server");
}

#[test]
fn client_slabs_sorted_as_strings() {
    let (port, server) = spawn_server(vec![(
        "stats items\r\n",
        "STAT items:5:number 1\r\nSTAT items:12:number 2\r\nSTAT items:1:number 3\r\nSTAT items:1:age 9\r\nEND\r\n",
    )]);

    let mut client = connect(port);
    assert_eq!(client.slabs().expect("slabs"), vec!["1", "12", "5"]);

    client.close();
    server.join().expect("server");
}

#[test]
fn client_keys_enumerates_every_slab() {
    let (port, server) = spawn_server(vec![
        (
            "stats items\r\n",
            "STAT items:2:number 2\r\nSTAT items:10:number 1\r\nEND\r\n",
        ),
        (
            "stats cachedump 10 0\r\n",
            "ITEM user:9 [900 b; 0 s]\r\nEND\r\n",
        ),
        (
            "stats cachedump 2 0\r\n",
            "ITEM user:2 [10 b; 0 s]\r\nITEM config [12 b; 0 s]\r\nEND\r\n",
        ),
    ]);

    let mut client = connect(port);
    assert_eq!(
        client.keys("*").expect("keys"),
        vec!["config", "user:2", "user:9"]
    );

    client.close();
    server.join().expect("server");
}

#[test]
fn client_keys_substring_filter() {
    let (port, server) = spawn_server(vec![
        ("stats items\r\n", "STAT items:1:number 3\r\nEND\r\n"),
        (
            "stats cachedump 1 0\r\n",
            "ITEM user:1:session [1 b; 0 s]\r\nITEM user::session [1 b; 0 s]\r\nITEM order:1 [1 b; 0 s]\r\nEND\r\n",
        ),
    ]);

    let mut client = connect(port);
    assert_eq!(
        client.keys("user:*:session").expect("keys"),
        vec!["user::session"]
    );

    client.close();
    server.join().expect("server");
}

#[test]
fn client_keys_include_items_without_expiry() {
    let (port, server) = spawn_server(vec![
        ("stats items\r\n", "STAT items:1:number 2\r\nEND\r\n"),
        (
            "stats cachedump 1 0\r\n",
            "ITEM foo [5]\r\nITEM bar [3 b; 0 s]\r\nEND\r\n",
        ),
    ]);

    let mut client = connect(port);
    assert_eq!(client.keys("*").expect("keys"), vec!["bar", "foo"]);

    client.close();
    server.join().expect("server");
}

#[test]
fn client_oversized_value_length_is_malformed() {
    let (port, server) = spawn_server(vec![(
        "get k\r\n",
        "VALUE k 0 18446744073709551615\r\nabc",
    )]);

    let mut client = connect(port);
    match client.get("k") {
        Err(ClientError::MalformedResponse { line }) => {
            assert_eq!(line, "VALUE k 0 18446744073709551615")
        }
        other => panic!("Expected MalformedResponse, got {:?}", other),
    }

    client.close();
    server.join().expect("server");
}

#[test]
fn client_keys_on_empty_cache() {
    let (port, server) = spawn_server(vec![("stats items\r\n", "END\r\n")]);

    let mut client = connect(port);
    assert!(client.keys("*").expect("keys").is_empty());

    client.close();
    server.join().expect("server");
}

#[test]
fn client_reader_keeps_bytes_buffered_past_a_response() {
    // The second reply arrives together with the first one.
    let (port, server) = spawn_server(vec![
        ("get a\r\n", "VALUE a 0 1\r\n1\r\nEND\r\nSTORED\r\n"),
        ("set b 0 0 1\r\n2\r\n", ""),
        ("delete a\r\n", "DELETED\r\n"),
    ]);

    let mut client = connect(port);
    assert_eq!(client.get("a").expect("get").as_deref(), Some(&b"1"[..]));
    client.set("b", b"2", 0).expect("set");
    assert_eq!(client.delete("a").expect("delete"), DeleteOutcome::Deleted);

    client.close();
    server.join().expect("server");
}

#[test]
fn client_malformed_value_header() {
    let (port, server) = spawn_server(vec![("get k\r\n", "VALUE k 0\r\n")]);

    let mut client = connect(port);
    match client.get("k") {
        Err(ClientError::MalformedResponse { line }) => assert_eq!(line, "VALUE k 0"),
        other => panic!("Expected MalformedResponse, got {:?}", other),
    }

    client.close();
    server.join().expect("server");
}

#[test]
fn client_missing_end_marker() {
    let (port, server) = spawn_server(vec![(
        "get k\r\n",
        "VALUE k 0 2\r\nhi\r\nSTORED\r\n",
    )]);

    let mut client = connect(port);
    let err = client.get("k").expect_err("violation");
    assert!(matches!(err, ClientError::ProtocolViolation { .. }));
    assert!(err.is_desync());

    client.close();
    server.join().expect("server");
}

#[test]
fn client_stats_error_reply_does_not_hang() {
    let (port, server) = spawn_server(vec![
        ("stats bogus\r\n", "ERROR\r\n"),
        ("get k\r\n", "END\r\n"),
    ]);

    let mut client = connect(port);
    match client.stats(Some("bogus")) {
        Err(ClientError::Server { message }) => assert_eq!(message, "ERROR"),
        other => panic!("Expected Server error, got {:?}", other),
    }
    assert_eq!(client.get("k").expect("get"), None);

    client.close();
    server.join().expect("server");
}

#[test]
fn client_rejects_unsafe_arguments_before_sending() {
    let (port, server) = spawn_server(vec![("get ok\r\n", "END\r\n")]);

    let mut client = connect(port);
    assert!(matches!(
        client.get("bad key"),
        Err(ClientError::InvalidKey { .. })
    ));
    assert!(matches!(
        client.set("x\r\nflush_all", b"v", 0),
        Err(ClientError::InvalidKey { .. })
    ));
    assert!(matches!(
        client.cache_dump("1 0", 0),
        Err(ClientError::InvalidArgument { .. })
    ));
    // Nothing above reached the wire.
    assert_eq!(client.get("ok").expect("get"), None);

    client.close();
    server.join().expect("server");
}

#[test]
fn client_operations_after_close_fail() {
    let (port, server) = spawn_server(vec![]);

    let mut client = connect(port);
    assert!(client.is_connected());
    client.close();
    client.close();
    assert!(!client.is_connected());

    assert!(matches!(client.get("k"), Err(ClientError::NotConnected)));
    assert!(matches!(
        client.set("k", b"v", 0),
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(client.delete("k"), Err(ClientError::NotConnected)));
    assert!(matches!(client.stats(None), Err(ClientError::NotConnected)));
    assert!(matches!(client.slabs(), Err(ClientError::NotConnected)));
    assert!(matches!(client.keys("*"), Err(ClientError::NotConnected)));
    assert!(matches!(
        client.cache_dump("1", 0),
        Err(ClientError::NotConnected)
    ));

    server.join().expect("server");
}

#[test]
fn client_io_error_closes_connection() {
    let (port, server) = spawn_hangup_server();

    let mut client = connect(port);
    assert!(matches!(client.get("k"), Err(ClientError::Io(_))));
    assert!(!client.is_connected());
    assert!(matches!(client.get("k"), Err(ClientError::NotConnected)));

    server.join().expect("server");
}

#[test]
fn client_connect_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };

    match Client::connect("127.0.0.1", port) {
        Err(ClientError::Connect { addr, .. }) => assert_eq!(addr, format!("127.0.0.1:{}", port)),
        Err(other) => panic!("Expected Connect error, got {:?}", other),
        Ok(_) => panic!("Expected Connect error"),
    }
}
