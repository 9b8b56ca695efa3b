// Reference acceptor for the multithreaded non-blocking variant: each
// accepted connection is handed to the executor as a single task, and the
// connection's read/write state is owned behind the same per-connection
// mutex the original's `MTnonblock::Connection` wraps around the
// single-threaded connection, so two pool workers can never run a given
// connection's DoRead/DoWrite concurrently.

use std::io::{self, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::cache::Store;
use crate::executor::ThreadPool;
use crate::protocol::{self, Command, CommandReader, ProtocolError};

use super::Connection;

/// One line-protocol connection, serialized behind a mutex so the
/// contract matches the multithreaded non-blocking variant even though
/// this reference implementation runs a connection to completion on a
/// single worker. `do_read` parses the next command off the wire and
/// stashes it; `do_write` executes the stashed command and writes its
/// reply, mirroring the original's split read/write edges.
struct LineConnection {
    reader: CommandReader<BufReader<TcpStream>>,
    writer: TcpStream,
    store: Arc<Store>,
    pending: Option<Command>,
    alive: bool,
}

impl Connection for LineConnection {
    fn do_read(&mut self) -> io::Result<()> {
        match self.reader.read_command() {
            Ok(Some(cmd)) => {
                self.pending = Some(cmd);
                Ok(())
            }
            Ok(None) => {
                self.on_close();
                Ok(())
            }
            Err(ProtocolError::Malformed(_)) => {
                let _ = self.writer.write_all(b"ERROR\r\n");
                self.on_close();
                Ok(())
            }
            Err(ProtocolError::Io(err)) => Err(err),
        }
    }

    fn do_write(&mut self) -> io::Result<()> {
        if let Some(cmd) = self.pending.take() {
            protocol::execute(&self.store, cmd, &mut self.writer)?;
        }
        Ok(())
    }

    fn on_close(&mut self) {
        self.alive = false;
    }

    fn on_error(&mut self, err: &io::Error) {
        warn!(component = "server", event = "connection_error", error = %err);
        self.alive = false;
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}

fn serve_connection(conn: Arc<Mutex<LineConnection>>) {
    loop {
        let mut guard = conn.lock().unwrap();
        if !guard.is_alive() {
            return;
        }
        if let Err(err) = guard.do_read() {
            guard.on_error(&err);
            return;
        }
        if !guard.is_alive() {
            return;
        }
        if let Err(err) = guard.do_write() {
            guard.on_error(&err);
            return;
        }
    }
}

/// Runs a blocking TCP accept loop, handing each accepted connection to
/// `pool` as a single task. Returns once the listener errors or `pool`
/// stops accepting new work.
pub fn serve(bind_addr: &str, store: Arc<Store>, pool: Arc<ThreadPool>) -> io::Result<()> {
    let listener = TcpListener::bind(bind_addr)?;
    info!(component = "server", event = "listening", addr = %bind_addr);

    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(s) => s,
            Err(err) => {
                warn!(component = "server", event = "accept_failed", error = %err);
                continue;
            }
        };
        let peer = stream.peer_addr().ok();
        info!(component = "server", event = "connection_accepted", peer = ?peer);

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(err) => {
                warn!(component = "server", event = "accept_failed", error = %err);
                continue;
            }
        };
        let conn = Arc::new(Mutex::new(LineConnection {
            reader: CommandReader::new(BufReader::new(reader_stream)),
            writer: stream,
            store: Arc::clone(&store),
            pending: None,
            alive: true,
        }));
        let accepted = pool.execute(move || {
            serve_connection(conn);
        });
        if !accepted.is_accepted() {
            error!(component = "server", event = "connection_dropped", reason = "executor rejected task");
        }
    }
    Ok(())
}
