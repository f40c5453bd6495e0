//! Append-only CSV logs
//!
//! Each log has exactly one writer. A batch is serialized in memory and
//! handed to the OS in one write followed by `fdatasync`, so a batch is
//! either fully durable or, after a forced kill, leaves a torn trailing line
//! that the next [`AppendLog::open`] truncates.

use super::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

const TAIL_CHUNK: usize = 8 * 1024;

/// Writer for one append-only CSV file of `R` records
pub struct AppendLog<R> {
    path: PathBuf,
    file: File,
    write_header: bool,
    _record: PhantomData<fn(&R)>,
}

impl<R: Serialize> AppendLog<R> {
    /// Open (creating if needed) the log at `path`, repairing a torn tail
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let removed = truncate_torn_tail(&mut file)?;
        if removed > 0 {
            tracing::warn!(
                path = ?path,
                bytes = removed,
                "Truncated partial record left by an interrupted write"
            );
        }

        let write_header = file.metadata()?.len() == 0;

        Ok(Self {
            path,
            file,
            write_header,
            _record: PhantomData,
        })
    }

    /// Append `records` as one durable batch; returns the number written
    pub fn append(&mut self, records: &[R]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(self.write_header)
            .from_writer(Vec::with_capacity(records.len() * 128));
        for record in records {
            writer.serialize(record)?;
        }
        let buf = writer
            .into_inner()
            .map_err(|e| StorageError::Io(e.into_error()))?;

        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        self.write_header = false;

        Ok(records.len())
    }

    /// Append a single record
    pub fn append_one(&mut self, record: &R) -> Result<(), StorageError> {
        self.append(std::slice::from_ref(record)).map(|_| ())
    }

    /// Remove the last `n` records
    pub fn pop_records(&mut self, n: usize) -> Result<(), StorageError> {
        if n == 0 {
            return Ok(());
        }
        let header_end = header_len(&self.file)?;
        let start = start_of_last_lines(&mut self.file, n)?.max(header_end);
        self.file.set_len(start)?;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the file in bytes
    pub fn size_bytes(&self) -> Result<u64, StorageError> {
        Ok(self.file.metadata()?.len())
    }
}

/// Read the last `n` complete records of the log at `path`.
///
/// Safe to call while another process appends: a trailing partial line is
/// ignored. A missing file yields no records.
pub fn last_records<R: DeserializeOwned>(path: &Path, n: usize) -> Result<Vec<R>, StorageError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if n == 0 || file.metadata()?.len() == 0 {
        return Ok(Vec::new());
    }

    let mut header = Vec::new();
    BufReader::new(&file).read_until(b'\n', &mut header)?;
    if header.last() != Some(&b'\n') {
        return Ok(Vec::new());
    }

    // One extra line covers a partial line still being written.
    let start = start_of_last_lines(&mut file, n + 1)?.max(header.len() as u64);
    file.seek(SeekFrom::Start(start))?;
    let mut body = Vec::new();
    file.read_to_end(&mut body)?;
    match body.iter().rposition(|b| *b == b'\n') {
        Some(last_newline) => body.truncate(last_newline + 1),
        None => body.clear(),
    }

    let mut input = header;
    input.extend_from_slice(&body);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(input.as_slice());
    let mut records = reader
        .deserialize()
        .collect::<Result<Vec<R>, csv::Error>>()?;

    let excess = records.len().saturating_sub(n);
    records.drain(..excess);
    Ok(records)
}

/// Read the last complete record of the log at `path`
pub fn last_record<R: DeserializeOwned>(path: &Path) -> Result<Option<R>, StorageError> {
    Ok(last_records(path, 1)?.pop())
}

/// Reader over every complete line of the log at `path`.
///
/// Like [`last_records`], a trailing line still being written by another
/// process is left out.
pub fn complete_lines(path: &Path) -> Result<io::Take<File>, StorageError> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let keep = if len == 0 {
        0
    } else {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] == b'\n' {
            len
        } else {
            last_newline_before(&mut file, len)?.map_or(0, |pos| pos + 1)
        }
    };
    file.seek(SeekFrom::Start(0))?;
    Ok(file.take(keep))
}

/// Length of the header line including its newline
fn header_len(file: &File) -> io::Result<u64> {
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(0))?;
    let mut header = Vec::new();
    reader.read_until(b'\n', &mut header)?;
    Ok(header.len() as u64)
}

/// Truncate bytes after the last newline; returns how many were removed
fn truncate_torn_tail(file: &mut File) -> io::Result<u64> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(0);
    }

    let keep = last_newline_before(file, len)?.map_or(0, |pos| pos + 1);
    file.set_len(keep)?;
    file.sync_data()?;
    Ok(len - keep)
}

/// Offset of the last newline strictly before `end`
fn last_newline_before(file: &mut File, end: u64) -> io::Result<Option<u64>> {
    let mut pos = end;
    let mut buf = vec![0u8; TAIL_CHUNK];
    while pos > 0 {
        let read = (pos as usize).min(TAIL_CHUNK);
        pos -= read as u64;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut buf[..read])?;
        if let Some(i) = buf[..read].iter().rposition(|b| *b == b'\n') {
            return Ok(Some(pos + i as u64));
        }
    }
    Ok(None)
}

/// Byte offset where the last `n` lines of `file` begin, or 0 if it has fewer
fn start_of_last_lines(file: &mut File, n: usize) -> io::Result<u64> {
    let len = file.metadata()?.len();
    let mut pos = len;
    let mut seen = 0usize;
    let mut buf = vec![0u8; TAIL_CHUNK];

    while pos > 0 {
        let read = (pos as usize).min(TAIL_CHUNK);
        pos -= read as u64;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut buf[..read])?;

        for i in (0..read).rev() {
            if buf[i] != b'\n' {
                continue;
            }
            let offset = pos + i as u64;
            // The newline ending the final line does not start a new one.
            if offset + 1 == len {
                continue;
            }
            seen += 1;
            if seen == n {
                return Ok(offset + 1);
            }
        }
    }

    Ok(0)
}
