//! The line-oriented wire protocol: `set/add/replace/append/prepend/get/delete`.
//!
//! No teacher analogue exists (the teacher speaks HTTP); the read-header,
//! read-exact-payload, then-dispatch shape is styled after a hand-rolled
//! line/frame server read loop from the broader example pack.

use std::io::{self, BufRead, Read, Write};

use bytes::Bytes;
use thiserror::Error;

use crate::cache::{CacheError, Store};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed request line: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug)]
pub enum Command {
    Set { key: Bytes, flags: u32, bytes: Bytes },
    Add { key: Bytes, flags: u32, bytes: Bytes },
    Replace { key: Bytes, flags: u32, bytes: Bytes },
    Append { key: Bytes, bytes: Bytes },
    Prepend { key: Bytes, bytes: Bytes },
    Get { key: Bytes },
    Delete { key: Bytes },
}

#[derive(Debug, Clone, Copy)]
enum StorageVerb {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
}

/// Header already parsed off a storage verb's request line, waiting on its
/// payload bytes plus the trailing CRLF.
struct PendingPayload {
    verb: StorageVerb,
    key: Bytes,
    flags: u32,
    want: usize, // payload length + 2 (trailing CRLF)
}

/// Parses the line-oriented wire protocol off a reader, one request at a
/// time. Unlike a bare free function, this holds the in-progress line or
/// payload buffer as state on `self`, so a `WouldBlock` partway through a
/// header line or a payload does not drop the bytes already read: the next
/// call to `read_command` resumes exactly where the last one left off.
pub struct CommandReader<R> {
    reader: R,
    line: Vec<u8>,
    pending: Option<(PendingPayload, Vec<u8>)>,
}

impl<R: BufRead> CommandReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            pending: None,
        }
    }

    /// Reads one request (header line plus payload, if the verb carries
    /// one) off the underlying reader. Returns `Ok(None)` on a clean EOF
    /// between requests. On `io::ErrorKind::WouldBlock`, whatever partial
    /// line or payload had already been read is retained internally;
    /// calling this again (after the socket becomes readable) continues
    /// from there rather than re-reading from scratch.
    pub fn read_command(&mut self) -> Result<Option<Command>, ProtocolError> {
        if self.pending.is_none() {
            match self.read_header_line()? {
                None => return Ok(None),
                Some(PendingHeader::Immediate(cmd)) => return Ok(Some(cmd)),
                Some(PendingHeader::Storage(pending)) => {
                    self.pending = Some((pending, Vec::new()));
                }
            }
        }
        self.read_payload()
    }

    /// Parses one header line. `Ok(None)` means a clean EOF before any
    /// header bytes were read (no request in flight). A storage verb's
    /// header yields a `PendingPayload` for `read_payload` to fill in;
    /// `get`/`delete` have no payload and resolve to a `Command` directly.
    fn read_header_line(&mut self) -> Result<Option<PendingHeader>, ProtocolError> {
        while !self.line.ends_with(b"\n") {
            let n = self.reader.read_until(b'\n', &mut self.line)?;
            if n == 0 {
                if self.line.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::Malformed("connection closed mid-line".into()));
            }
        }
        let line = std::mem::take(&mut self.line);
        let line = String::from_utf8_lossy(&line).into_owned();
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Ok(None);
        }

        let mut parts = line.split(' ').filter(|s| !s.is_empty());
        let verb = parts.next().ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;

        let storage_verb = match verb {
            "set" => Some(StorageVerb::Set),
            "add" => Some(StorageVerb::Add),
            "replace" => Some(StorageVerb::Replace),
            "append" => Some(StorageVerb::Append),
            "prepend" => Some(StorageVerb::Prepend),
            _ => None,
        };

        if let Some(verb) = storage_verb {
            let key = parts.next().ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
            let flags: u32 = parts
                .next()
                .ok_or_else(|| ProtocolError::Malformed(line.to_string()))?
                .parse()
                .map_err(|_| ProtocolError::Malformed(line.to_string()))?;
            let _exptime: i64 = parts
                .next()
                .ok_or_else(|| ProtocolError::Malformed(line.to_string()))?
                .parse()
                .map_err(|_| ProtocolError::Malformed(line.to_string()))?;
            let len: usize = parts
                .next()
                .ok_or_else(|| ProtocolError::Malformed(line.to_string()))?
                .parse()
                .map_err(|_| ProtocolError::Malformed(line.to_string()))?;
            let key = Bytes::copy_from_slice(key.as_bytes());
            return Ok(Some(PendingHeader::Storage(PendingPayload {
                verb,
                key,
                flags,
                want: len + 2,
            })));
        }

        let key = parts.next().ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
        let key = Bytes::copy_from_slice(key.as_bytes());
        match verb {
            "get" => Ok(Some(PendingHeader::Immediate(Command::Get { key }))),
            "delete" => Ok(Some(PendingHeader::Immediate(Command::Delete { key }))),
            other => Err(ProtocolError::Malformed(format!("unknown command {other}"))),
        }
    }

    fn read_payload(&mut self) -> Result<Option<Command>, ProtocolError> {
        let (pending, buf) = self.pending.as_mut().expect("read_payload without a pending header");
        let mut chunk = [0u8; 4096];
        while buf.len() < pending.want {
            let max = (pending.want - buf.len()).min(chunk.len());
            let n = self.reader.read(&mut chunk[..max])?;
            if n == 0 {
                return Err(ProtocolError::Malformed("connection closed mid-payload".into()));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let (pending, mut buf) = self.pending.take().expect("pending checked above");
        buf.truncate(pending.want - 2);
        let bytes = Bytes::from(buf);
        let key = pending.key;
        let flags = pending.flags;
        Ok(Some(match pending.verb {
            StorageVerb::Set => Command::Set { key, flags, bytes },
            StorageVerb::Add => Command::Add { key, flags, bytes },
            StorageVerb::Replace => Command::Replace { key, flags, bytes },
            StorageVerb::Append => Command::Append { key, bytes },
            StorageVerb::Prepend => Command::Prepend { key, bytes },
        }))
    }
}

enum PendingHeader {
    Storage(PendingPayload),
    Immediate(Command),
}

/// Executes one parsed command against `store` and writes the reply.
pub fn execute<W: Write>(store: &Store, cmd: Command, out: &mut W) -> io::Result<()> {
    match cmd {
        Command::Set { key, flags, bytes } => match store.put(key, bytes, flags) {
            Ok(()) => out.write_all(b"STORED\r\n"),
            Err(CacheError::TooLarge { .. }) => {
                out.write_all(b"SERVER_ERROR object too large for cache\r\n")
            }
        },
        Command::Add { key, flags, bytes } => match store.put_if_absent(key, bytes, flags) {
            Ok(true) => out.write_all(b"STORED\r\n"),
            Ok(false) => out.write_all(b"NOT_STORED\r\n"),
            Err(CacheError::TooLarge { .. }) => {
                out.write_all(b"SERVER_ERROR object too large for cache\r\n")
            }
        },
        Command::Replace { key, flags, bytes } => match store.set(&key, bytes, flags) {
            Ok(true) => out.write_all(b"STORED\r\n"),
            Ok(false) => out.write_all(b"NOT_STORED\r\n"),
            Err(CacheError::TooLarge { .. }) => {
                out.write_all(b"SERVER_ERROR object too large for cache\r\n")
            }
        },
        Command::Append { key, bytes } => append_or_prepend(store, &key, bytes, true, out),
        Command::Prepend { key, bytes } => append_or_prepend(store, &key, bytes, false, out),
        Command::Get { key } => match store.get(&key) {
            Some((value, flags)) => {
                write!(
                    out,
                    "VALUE {} {} {}\r\n",
                    String::from_utf8_lossy(&key),
                    flags,
                    value.len()
                )?;
                out.write_all(&value)?;
                out.write_all(b"\r\n")?;
                out.write_all(b"END\r\n")
            }
            None => out.write_all(b"END\r\n"),
        },
        Command::Delete { key } => {
            if store.delete(&key) {
                out.write_all(b"DELETED\r\n")
            } else {
                out.write_all(b"NOT_FOUND\r\n")
            }
        }
    }
}

/// Appends/prepends `addition` to the existing value, keeping that value's
/// stored flags untouched (memcached's own append/prepend ignore the flags
/// field on the request).
fn append_or_prepend<W: Write>(
    store: &Store,
    key: &[u8],
    addition: Bytes,
    append: bool,
    out: &mut W,
) -> io::Result<()> {
    let Some((existing, flags)) = store.get(key) else {
        return out.write_all(b"NOT_STORED\r\n");
    };
    let mut combined = Vec::with_capacity(existing.len() + addition.len());
    if append {
        combined.extend_from_slice(&existing);
        combined.extend_from_slice(&addition);
    } else {
        combined.extend_from_slice(&addition);
        combined.extend_from_slice(&existing);
    }
    match store.set(key, Bytes::from(combined), flags) {
        Ok(true) => out.write_all(b"STORED\r\n"),
        Ok(false) => out.write_all(b"NOT_STORED\r\n"),
        Err(CacheError::TooLarge { .. }) => {
            out.write_all(b"SERVER_ERROR object too large for cache\r\n")
        }
    }
}
