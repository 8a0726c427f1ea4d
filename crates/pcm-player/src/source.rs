//! Byte sources feeding a player.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// Readable and seekable stream, object safe.
pub trait SeekableRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekableRead for T {}

enum SourceKind {
    Sequential(Box<dyn Read + Send>),
    Seekable(Box<dyn SeekableRead>),
}

/// Raw interleaved s16le PCM at the context sample rate.
///
/// Only sources built with [`Source::from_seekable`] (or from a [`File`]) support seeking.
pub struct Source {
    kind: SourceKind,
}

impl Source {
    /// Wrap a sequential reader; seeking it is a contract violation.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self {
            kind: SourceKind::Sequential(Box::new(reader)),
        }
    }

    /// Wrap a reader that can reposition to byte offsets.
    pub fn from_seekable<R>(reader: R) -> Self
    where
        R: Read + Seek + Send + 'static,
    {
        Self {
            kind: SourceKind::Seekable(Box::new(reader)),
        }
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self.kind, SourceKind::Seekable(_))
    }

    /// Reposition to `offset` bytes from the start and return the new position.
    pub(crate) fn seek_to(&mut self, offset: u64) -> io::Result<u64> {
        match &mut self.kind {
            SourceKind::Seekable(r) => r.seek(SeekFrom::Start(offset)),
            SourceKind::Sequential(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "source is not seekable",
            )),
        }
    }

    /// Read once, retrying reads interrupted by a signal.
    pub(crate) fn read_retrying(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.kind {
            SourceKind::Sequential(r) => r.read(buf),
            SourceKind::Seekable(r) => r.read(buf),
        }
    }
}

impl From<File> for Source {
    fn from(file: File) -> Self {
        Self::from_seekable(file)
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("seekable", &self.is_seekable())
            .finish()
    }
}
