//! Batch log framing.
//!
//! Every write batch is serialized into one or more frames appended to the
//! log:
//!
//! ```text
//! [frame_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! Body: `[seq: u64][flags: u8][op_count: u32]` followed by `op_count`
//! operations:
//!
//! ```text
//! Put: [op=0: u8][key_len: u32][key][val_len: u32][value]
//! Del: [op=1: u8][key_len: u32][key]
//! ```
//!
//! `frame_len` includes the 4-byte CRC but not itself. A batch too large for
//! one frame is split; every frame but the last carries [`FLAG_CONTINUED`].
//! Replay applies a batch only once its final frame has been read, so a
//! batch is applied whole or not at all however many frames it spans.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use tracing::{error, warn};

use crate::batch::BatchOp;
use crate::StoreError;

/// Hard upper bound on a single frame.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// More frames of the same batch follow this one.
const FLAG_CONTINUED: u8 = 1;

const OP_PUT: u8 = 0;
const OP_DEL: u8 = 1;

/// `[frame_len][crc]`
const FRAME_HEADER: usize = 8;
/// `[seq][flags][op_count]`
const BODY_HEADER: usize = 13;

/// Append-only writer for batch frames.
pub(crate) struct LogWriter {
    file: File,
    sync: bool,
    max_frame: u32,
    /// Length of the log up to the end of the last batch written in full.
    len: u64,
    /// Set when a failed append could not be rolled back.
    poisoned: bool,
    buf: Vec<u8>,
    /// Makes the next append write only this many bytes, then fail.
    #[cfg(test)]
    pub(crate) fail_after: Option<usize>,
}

impl LogWriter {
    /// Opens (or creates) the log in append mode.
    pub(crate) fn open<P: AsRef<Path>>(path: P, sync: bool, max_frame: u32) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            sync,
            max_frame: max_frame.min(MAX_FRAME_SIZE),
            len,
            poisoned: false,
            buf: Vec::with_capacity(512),
            #[cfg(test)]
            fail_after: None,
        })
    }

    pub(crate) fn set_sync(&mut self, sync: bool) {
        self.sync = sync;
    }

    /// Writes every op of the batch, in as many frames as needed. Returns
    /// the number of bytes appended.
    ///
    /// On failure nothing of the batch remains in the log: bytes that did
    /// reach the file are truncated away before the error is returned.
    pub(crate) fn append(&mut self, seq: u64, ops: &[BatchOp]) -> Result<u64, StoreError> {
        if self.poisoned {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "log has a torn write that could not be rolled back; reopen the store",
            )));
        }

        self.encode(seq, ops)?;

        if let Err(e) = self.write_out() {
            if let Err(rollback) = self.file.set_len(self.len) {
                error!(error = %rollback, len = self.len, "unable to roll back torn log append");
                self.poisoned = true;
            } else {
                warn!(error = %e, len = self.len, "rolled back failed log append");
            }
            return Err(e.into());
        }

        let written = self.buf.len() as u64;
        self.len += written;
        Ok(written)
    }

    /// Serializes `ops` into `self.buf` as a chain of frames.
    fn encode(&mut self, seq: u64, ops: &[BatchOp]) -> Result<(), StoreError> {
        let max_body = (self.max_frame as usize).saturating_sub(4);
        self.buf.clear();

        let mut start = begin_frame(&mut self.buf, seq)?;
        let mut count = 0u32;
        for op in ops {
            let size = op_size(op);
            if BODY_HEADER + size > max_body {
                return Err(StoreError::RecordTooLarge {
                    size: (BODY_HEADER + size + 4) as u64,
                });
            }
            if count > 0 && self.buf.len() - start - FRAME_HEADER + size > max_body {
                finish_frame(&mut self.buf, start, count, true);
                start = begin_frame(&mut self.buf, seq)?;
                count = 0;
            }
            encode_op(&mut self.buf, op)?;
            count += 1;
        }
        finish_frame(&mut self.buf, start, count, false);
        Ok(())
    }

    fn write_out(&mut self) -> io::Result<()> {
        self.write_buf()?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn write_buf(&mut self) -> io::Result<()> {
        self.file.write_all(&self.buf)
    }

    #[cfg(test)]
    fn write_buf(&mut self) -> io::Result<()> {
        match self.fail_after.take() {
            Some(n) => {
                self.file.write_all(&self.buf[..n.min(self.buf.len())])?;
                Err(io::Error::new(io::ErrorKind::Other, "simulated write failure"))
            }
            None => self.file.write_all(&self.buf),
        }
    }

    pub(crate) fn sync_to_disk(&mut self) -> Result<(), StoreError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn op_size(op: &BatchOp) -> usize {
    match op {
        BatchOp::Put { key, value } => 1 + 4 + key.len() + 4 + value.len(),
        BatchOp::Delete { key } => 1 + 4 + key.len(),
    }
}

/// Reserves the frame and body headers; returns the frame's start offset.
fn begin_frame(buf: &mut Vec<u8>, seq: u64) -> io::Result<usize> {
    let start = buf.len();
    buf.extend_from_slice(&[0u8; FRAME_HEADER]);
    buf.write_u64::<LittleEndian>(seq)?;
    buf.write_u8(0)?;
    buf.write_u32::<LittleEndian>(0)?;
    Ok(start)
}

/// Fills in flags, op count, length and CRC of the frame at `start`.
fn finish_frame(buf: &mut [u8], start: usize, count: u32, continued: bool) {
    let body_start = start + FRAME_HEADER;
    buf[body_start + 8] = if continued { FLAG_CONTINUED } else { 0 };
    buf[body_start + 9..body_start + 13].copy_from_slice(&count.to_le_bytes());

    let body = &buf[body_start..];
    let mut hasher = Crc32::new();
    hasher.update(body);
    let crc = hasher.finalize();
    let frame_len = body.len() as u32 + 4;

    buf[start..start + 4].copy_from_slice(&frame_len.to_le_bytes());
    buf[start + 4..start + 8].copy_from_slice(&crc.to_le_bytes());
}

fn encode_op(buf: &mut Vec<u8>, op: &BatchOp) -> io::Result<()> {
    match op {
        BatchOp::Put { key, value } => {
            buf.write_u8(OP_PUT)?;
            buf.write_u32::<LittleEndian>(key.len() as u32)?;
            buf.extend_from_slice(key);
            buf.write_u32::<LittleEndian>(value.len() as u32)?;
            buf.extend_from_slice(value);
        }
        BatchOp::Delete { key } => {
            buf.write_u8(OP_DEL)?;
            buf.write_u32::<LittleEndian>(key.len() as u32)?;
            buf.extend_from_slice(key);
        }
    }
    Ok(())
}

/// Sequential reader over batch frames.
pub(crate) struct LogReader<R: Read> {
    rdr: BufReader<R>,
}

impl LogReader<File> {
    pub(crate) fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let f = File::open(path)?;
        Ok(Self {
            rdr: BufReader::new(f),
        })
    }
}

impl<R: Read> LogReader<R> {
    #[cfg(test)]
    pub(crate) fn from_reader(reader: R) -> Self {
        Self {
            rdr: BufReader::new(reader),
        }
    }

    /// Replays every complete batch, calling `apply(seq, ops)` for each.
    ///
    /// Returns the byte length of the committed prefix of the log: the end
    /// of the last batch whose final frame was read. A truncated tail frame
    /// ends the replay cleanly and drops the batch it belongs to. A CRC
    /// mismatch, a malformed body or a continuation frame of a different
    /// batch is reported as [`StoreError::Corrupt`] with the frame's offset.
    pub(crate) fn replay<F>(&mut self, mut apply: F) -> Result<u64, StoreError>
    where
        F: FnMut(u64, Vec<BatchOp>),
    {
        let mut body = Vec::with_capacity(512);
        let mut offset = 0u64;
        let mut committed = 0u64;
        let mut pending: Vec<BatchOp> = Vec::new();
        let mut pending_seq: Option<u64> = None;

        loop {
            let frame_len = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(committed),
                Err(e) => return Err(StoreError::Io(e)),
            };
            if frame_len <= 4 || frame_len > MAX_FRAME_SIZE {
                return Err(StoreError::Corrupt { offset });
            }

            let crc = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(committed),
                Err(e) => return Err(StoreError::Io(e)),
            };

            let body_len = (frame_len - 4) as usize;
            body.clear();
            body.resize(body_len, 0);
            match self.rdr.read_exact(&mut body) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(committed),
                Err(e) => return Err(StoreError::Io(e)),
            }

            let mut hasher = Crc32::new();
            hasher.update(&body);
            if hasher.finalize() != crc {
                return Err(StoreError::Corrupt { offset });
            }

            let (seq, flags, ops) =
                decode_body(&body).map_err(|_| StoreError::Corrupt { offset })?;
            if pending_seq.is_some_and(|s| s != seq) {
                return Err(StoreError::Corrupt { offset });
            }
            pending.extend(ops);
            offset += 4 + frame_len as u64;

            if flags & FLAG_CONTINUED != 0 {
                pending_seq = Some(seq);
            } else {
                apply(seq, std::mem::take(&mut pending));
                pending_seq = None;
                committed = offset;
            }
        }
    }
}

fn decode_body(body: &[u8]) -> io::Result<(u64, u8, Vec<BatchOp>)> {
    let mut br = body;
    let seq = br.read_u64::<LittleEndian>()?;
    let flags = br.read_u8()?;
    if flags & !FLAG_CONTINUED != 0 {
        return Err(io::ErrorKind::InvalidData.into());
    }
    let count = br.read_u32::<LittleEndian>()? as usize;
    if count > body.len() {
        return Err(io::ErrorKind::InvalidData.into());
    }

    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        let op = br.read_u8()?;
        let key = read_bytes(&mut br)?;
        match op {
            OP_PUT => {
                let value = read_bytes(&mut br)?;
                ops.push(BatchOp::Put { key, value });
            }
            OP_DEL => ops.push(BatchOp::Delete { key }),
            _ => return Err(io::ErrorKind::InvalidData.into()),
        }
    }
    if !br.is_empty() {
        return Err(io::ErrorKind::InvalidData.into());
    }
    Ok((seq, flags, ops))
}

fn read_bytes(br: &mut &[u8]) -> io::Result<Vec<u8>> {
    let len = br.read_u32::<LittleEndian>()? as usize;
    if len > br.len() {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    let mut out = vec![0u8; len];
    br.read_exact(&mut out)?;
    Ok(out)
}
