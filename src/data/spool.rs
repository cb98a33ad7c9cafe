//! Chunked, append-only disk spool for raw frames.
//!
//! Frames that cannot stay in memory while recording are appended to chunk
//! files in the session directory (`chunk-1`, `chunk-2`, ...). Each record is
//!
//! ```text
//! [i32 LE frame index][i32 LE payload length][payload bytes]
//! ```
//!
//! # Chunk stack
//!
//! [`SpoolStore`] keeps the chunk list as a stack. The writer always appends
//! to the top chunk and pushes a new one once the top grows past the byte
//! limit; a chunk that has been rolled over is never written again. During
//! processing the stack is drained top-first, so the most recently spooled
//! frames come back first. Inside a chunk records are read back in the order
//! they were written.
//!
//! Every chunk remembers the indices of the records that went into it. If a
//! chunk turns out to be unreadable part-way through, the reader knows exactly
//! which frames were lost with it.

use crate::data::frame::FrameRecord;
use crate::error::{RecorderError, RecorderResult};
use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Bytes in a record header (index + length).
pub const RECORD_HEADER_LEN: usize = 8;

/// Spool store shared between the spool worker and session teardown.
pub type SharedSpool = Arc<Mutex<SpoolStore>>;

/// One chunk file on the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolChunk {
    /// Location of the chunk file.
    pub path: PathBuf,
    /// Bytes appended so far.
    pub bytes: u64,
    /// Indices of the frames appended so far, in write order.
    pub indices: Vec<i32>,
}

impl SpoolChunk {
    /// Number of frame records in the chunk.
    pub fn records(&self) -> usize {
        self.indices.len()
    }
}

/// LIFO list of spool chunks for one session.
#[derive(Debug)]
pub struct SpoolStore {
    dir: PathBuf,
    chunks: Vec<SpoolChunk>,
    next_seq: u32,
}

impl SpoolStore {
    /// Create an empty store rooted at `dir`. No files are touched.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            chunks: Vec::new(),
            next_seq: 1,
        }
    }

    /// Wrap the store for sharing with a worker thread.
    pub fn shared(self) -> SharedSpool {
        Arc::new(Mutex::new(self))
    }

    /// Directory holding the chunk files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Push a fresh chunk name and return its path. Names are never reused.
    pub fn push_chunk(&mut self) -> PathBuf {
        let path = self.dir.join(format!("chunk-{}", self.next_seq));
        self.next_seq += 1;
        self.chunks.push(SpoolChunk {
            path: path.clone(),
            bytes: 0,
            indices: Vec::new(),
        });
        path
    }

    /// Chunk currently on top of the stack.
    pub fn top(&self) -> Option<&SpoolChunk> {
        self.chunks.last()
    }

    /// Account for frame `index` appended to the top chunk.
    pub fn record_appended(&mut self, index: i32, bytes: u64) {
        if let Some(top) = self.chunks.last_mut() {
            top.bytes += bytes;
            top.indices.push(index);
        }
    }

    /// Remove the top chunk from the stack (the file is left alone).
    pub fn pop_chunk(&mut self) -> Option<SpoolChunk> {
        self.chunks.pop()
    }

    /// Number of chunks on the stack.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True if the stack holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Frame records held across all chunks.
    pub fn pending_records(&self) -> u64 {
        self.chunks.iter().map(|c| c.records() as u64).sum()
    }

    /// Delete every chunk file still on the stack and empty it.
    ///
    /// Missing files are fine; the stack is cleared either way. Returns the
    /// number of files actually removed.
    pub fn purge(&mut self) -> usize {
        let mut removed = 0;
        for chunk in self.chunks.drain(..) {
            match fs::remove_file(&chunk.path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(chunk = %chunk.path.display(), error = %e, "Failed to delete spool chunk"),
            }
        }
        removed
    }
}

/// Append-only writer for the top chunk.
#[derive(Debug)]
pub struct ChunkWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl ChunkWriter {
    /// Open (creating if needed) a chunk for appending.
    pub fn open(path: &Path) -> RecorderResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| RecorderError::SpoolIo {
                chunk: path.to_path_buf(),
                source,
            })?;
        debug!(chunk = %path.display(), "Opened spool chunk for writing");
        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
        })
    }

    /// Path of the chunk being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, returning the bytes it occupies on disk.
    pub fn append(&mut self, record: &FrameRecord) -> RecorderResult<u64> {
        encode_record(&mut self.file, record).map_err(|source| RecorderError::SpoolIo {
            chunk: self.path.clone(),
            source,
        })
    }

    /// Flush and close the chunk.
    pub fn finish(mut self) -> RecorderResult<()> {
        self.file.flush().map_err(|source| RecorderError::SpoolIo {
            chunk: self.path.clone(),
            source,
        })
    }
}

/// Sequential reader over one chunk.
#[derive(Debug)]
pub struct ChunkReader {
    path: PathBuf,
    file: BufReader<File>,
    max_payload: usize,
}

impl ChunkReader {
    /// Open a chunk for reading. Payloads longer than `max_payload` are
    /// treated as corruption.
    pub fn open(path: &Path, max_payload: usize) -> RecorderResult<Self> {
        let file = File::open(path).map_err(|source| RecorderError::SpoolIo {
            chunk: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: BufReader::new(file),
            max_payload,
        })
    }

    /// Path of the chunk being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the next record; `Ok(None)` at a clean end of chunk.
    pub fn next_record(&mut self) -> RecorderResult<Option<FrameRecord>> {
        decode_record(&mut self.file, self.max_payload).map_err(|err| match err {
            RecorderError::Io(source) => RecorderError::SpoolIo {
                chunk: self.path.clone(),
                source,
            },
            other => other,
        })
    }
}

/// Write one record in spool format.
pub fn encode_record<W: Write>(writer: &mut W, record: &FrameRecord) -> io::Result<u64> {
    let len = i32::try_from(record.payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {} bytes is too large", record.payload.len()),
        )
    })?;
    let mut header = BytesMut::with_capacity(RECORD_HEADER_LEN);
    header.put_i32_le(record.index);
    header.put_i32_le(len);
    writer.write_all(&header)?;
    writer.write_all(&record.payload)?;
    Ok((RECORD_HEADER_LEN + record.payload.len()) as u64)
}

/// Read one record in spool format; `Ok(None)` if the reader is at a record boundary and empty.
pub fn decode_record<R: Read>(
    reader: &mut R,
    max_payload: usize,
) -> RecorderResult<Option<FrameRecord>> {
    let mut header = [0u8; RECORD_HEADER_LEN];
    let mut filled = 0;
    while filled < RECORD_HEADER_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    if filled == 0 {
        return Ok(None);
    }
    if filled < RECORD_HEADER_LEN {
        return Err(RecorderError::CorruptRecord(format!(
            "truncated header ({filled} of {RECORD_HEADER_LEN} bytes)"
        )));
    }

    let mut buf = &header[..];
    let index = buf.get_i32_le();
    let len = buf.get_i32_le();
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= max_payload)
        .ok_or_else(|| {
            RecorderError::CorruptRecord(format!("frame {index} has invalid length {len}"))
        })?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            RecorderError::CorruptRecord(format!("frame {index} payload truncated"))
        } else {
            RecorderError::Io(e)
        }
    })?;
    Ok(Some(FrameRecord::new(index, payload)))
}
