// Reference wiring for the coroutine variant: each connection's request
// loop runs as one routine; on a would-block read it calls `block(self)`,
// handing control back to a driver loop that polls the raw socket and
// `unblock`s the routine once it can make progress again. A production
// loop would learn readiness from an epoll/kqueue wait instead of this
// reference's short-interval poll. The per-routine `CommandReader` carries
// its own partial line/payload state across those would-block boundaries,
// so a request split across several non-blocking reads still frames
// correctly once the routine resumes.

use std::cell::RefCell;
use std::io::{self, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::rc::Rc;
use std::time::Duration;

use tracing::info;

use crate::cache::Store;
use crate::coroutine::{Engine, RoutineId};
use crate::protocol::{self, CommandReader, ProtocolError};

struct PendingConnection {
    id: RoutineId,
    stream: TcpStream,
}

/// Runs a single-threaded coroutine-driven accept loop on the calling
/// thread. `max_connections` bounds how many connections get their own
/// routine; beyond that, new connections are refused (a production
/// reactor would instead scale listeners or shed load some other way).
pub fn serve(
    bind_addr: &str,
    store: Rc<Store>,
    max_connections: usize,
    poll_interval: Duration,
) -> io::Result<()> {
    let listener = TcpListener::bind(bind_addr)?;
    listener.set_nonblocking(true)?;
    info!(component = "server", event = "listening", addr = %bind_addr, variant = "coroutine");

    let engine = Rc::new(Engine::new());
    let pending: Rc<RefCell<Vec<PendingConnection>>> = Rc::new(RefCell::new(Vec::new()));

    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                if pending.borrow().len() >= max_connections {
                    continue;
                }
                stream.set_nonblocking(true)?;
                info!(component = "server", event = "connection_accepted", peer = %peer, variant = "coroutine");
                let peer_for_routine = stream.try_clone()?;
                let id = spawn_connection(&engine, peer_for_routine, Rc::clone(&store));
                pending.borrow_mut().push(PendingConnection { id, stream });
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => return Err(err),
        }

        poll_ready(&engine, &pending);
        engine.resume();

        if !engine.has_work() && pending.borrow().is_empty() {
            std::thread::sleep(poll_interval);
        }
    }
}

fn spawn_connection(engine: &Rc<Engine>, stream: TcpStream, store: Rc<Store>) -> RoutineId {
    let engine_for_entry = Rc::clone(engine);
    engine.spawn(move || {
        let mut reader =
            CommandReader::new(BufReader::new(stream.try_clone().expect("clone connection socket")));
        let mut writer = stream;
        loop {
            let cmd = loop {
                match reader.read_command() {
                    Ok(Some(cmd)) => break cmd,
                    Ok(None) => return,
                    Err(ProtocolError::Io(err)) if err.kind() == ErrorKind::WouldBlock => {
                        engine_for_entry.block(None);
                    }
                    Err(ProtocolError::Malformed(_)) => {
                        let _ = writer.write_all(b"ERROR\r\n");
                        return;
                    }
                    Err(_) => return,
                }
            };
            if protocol::execute(&store, cmd, &mut writer).is_err() {
                return;
            }
        }
    })
}

fn poll_ready(engine: &Rc<Engine>, pending: &Rc<RefCell<Vec<PendingConnection>>>) {
    let mut still_pending = Vec::new();
    for conn in pending.borrow_mut().drain(..) {
        if engine.is_finished(conn.id) {
            continue;
        }
        if engine.is_blocked(conn.id) {
            let mut probe = [0u8; 1];
            match conn.stream.peek(&mut probe) {
                Ok(_) => engine.unblock(conn.id),
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(_) => engine.unblock(conn.id),
            }
        }
        still_pending.push(conn);
    }
    *pending.borrow_mut() = still_pending;
}
