// End-to-end cases wiring the store, executor, coroutine engine and wire
// protocol together, rather than exercising any one of them in isolation.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Store;
use crate::coroutine::Engine;
use crate::executor::{self, ThreadPool};
use crate::protocol::{self, CommandReader};
use crate::server::threaded;

fn read_line(reader: &mut impl BufRead) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line
}

/// A full client talking the line protocol over a real socket, through the
/// blocking-acceptor/executor reference wiring (E7 + E8).
#[test]
fn threaded_server_round_trips_over_a_real_socket() {
    let store = Arc::new(Store::new(2, 4096));
    let pool = Arc::new(ThreadPool::new(executor::Config {
        name: "e2e".into(),
        low_watermark: 1,
        high_watermark: 2,
        max_queue_size: 16,
        idle_time: Duration::from_millis(100),
        ..executor::Config::default()
    }));

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store_for_server = Arc::clone(&store);
    let pool_for_server = Arc::clone(&pool);
    let addr_string = addr.to_string();
    std::thread::spawn(move || {
        let _ = threaded::serve(&addr_string, store_for_server, pool_for_server);
    });

    let mut stream = connect_with_retry(addr);
    stream.write_all(b"set greeting 0 0 5\r\nhello\r\n").unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    assert_eq!(read_line(&mut reader), "STORED\r\n");

    stream.write_all(b"get greeting\r\n").unwrap();
    assert_eq!(read_line(&mut reader), "VALUE greeting 0 5\r\n");
    assert_eq!(read_line(&mut reader), "hello\r\n");
    assert_eq!(read_line(&mut reader), "END\r\n");

    stream.write_all(b"delete greeting\r\n").unwrap();
    assert_eq!(read_line(&mut reader), "DELETED\r\n");

    pool.stop(true);
}

fn connect_with_retry(addr: std::net::SocketAddr) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr) {
            return stream;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("server never started listening on {addr}");
}

/// LRU eviction (E1) and touch-on-get promotion (E2) observed through a
/// shared `Store` driven concurrently by pool workers rather than a single
/// caller, confirming the shard lock actually serializes the ring edits.
#[test]
fn concurrent_executor_tasks_observe_consistent_lru_order() {
    let store = Arc::new(Store::new(1, 64));
    let pool = ThreadPool::new(executor::Config {
        name: "e2e-lru".into(),
        low_watermark: 2,
        high_watermark: 4,
        max_queue_size: 64,
        idle_time: Duration::from_millis(50),
        ..executor::Config::default()
    });

    let done = Arc::new(std::sync::Barrier::new(17));
    for i in 0..16 {
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        pool.execute(move || {
            let key = format!("k{i}").into_bytes();
            store.put(key.into(), b"x".to_vec().into(), 0).unwrap();
            done.wait();
        });
    }
    done.wait();
    pool.stop(true);

    // The shard budget (64 bytes, ~5 bytes per entry) only fits a handful
    // of the 16 keys; eviction must have kept the store under budget.
    assert!(store.len() <= 10);
    assert!(store.mem() <= 64);
}

/// A coroutine-driven connection served through the nonblocking reference
/// wiring, confirming the engine actually blocks and resumes a routine
/// across a real would-block boundary instead of only in a unit test with
/// synthetic yields.
#[test]
fn coroutine_engine_drains_a_connection_end_to_end() {
    let store = Rc::new(Store::new(1, 4096));
    let engine = Rc::new(Engine::new());

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let client = std::thread::spawn(move || {
        let mut stream = connect_with_retry(addr);
        stream.write_all(b"set k 0 0 1\r\nv\r\nget k\r\n").unwrap();
        let mut reader = BufReader::new(stream);
        let mut out = String::new();
        while out.matches("END\r\n").count() < 1 {
            out.push_str(&read_line(&mut reader));
        }
        out
    });

    let mut server_stream = None;
    for _ in 0..200 {
        match listener.accept() {
            Ok((stream, _)) => {
                server_stream = Some(stream);
                break;
            }
            Err(_) => std::thread::sleep(Duration::from_millis(5)),
        }
    }
    let server_stream = server_stream.expect("client never connected");
    server_stream.set_nonblocking(true).unwrap();
    let probe_stream = server_stream.try_clone().unwrap();

    let engine_for_entry = Rc::clone(&engine);
    let store_for_entry = Rc::clone(&store);
    let routine = engine.spawn(move || {
        let mut reader = CommandReader::new(BufReader::new(server_stream.try_clone().unwrap()));
        let mut writer = server_stream;
        loop {
            let cmd = loop {
                match reader.read_command() {
                    Ok(Some(cmd)) => break cmd,
                    Ok(None) => return,
                    Err(protocol::ProtocolError::Io(err))
                        if err.kind() == std::io::ErrorKind::WouldBlock =>
                    {
                        engine_for_entry.block(None);
                    }
                    Err(_) => return,
                }
            };
            if protocol::execute(&store_for_entry, cmd, &mut writer).is_err() {
                return;
            }
        }
    });

    for _ in 0..500 {
        if engine.is_blocked(routine) {
            let mut probe = [0u8; 1];
            if probe_stream.peek(&mut probe).is_ok() {
                engine.unblock(routine);
            }
        }
        let _ = engine.resume();
        if engine.is_finished(routine) {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    let out = client.join().unwrap();
    assert!(out.contains("STORED"));
    assert!(out.contains("VALUE k 0 1"));
}
