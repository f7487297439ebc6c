use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use hoard_types::ContentHash;

/// Streaming BLAKE3 content hasher.
///
/// File content is folded into the digest in bounded chunks, so memory use is
/// independent of file size. The result for a stream always equals
/// [`ContentHash::of`] over the same bytes.
#[derive(Clone, Copy, Debug)]
pub struct ContentHasher {
    chunk_size: usize,
}

impl ContentHasher {
    /// Default read chunk (64 KiB).
    pub const CHUNK_SIZE: usize = 64 * 1024;

    pub const fn new() -> Self {
        Self {
            chunk_size: Self::CHUNK_SIZE,
        }
    }

    /// Hasher that reads in chunks of `chunk_size` bytes (minimum 1).
    pub const fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: if chunk_size == 0 { 1 } else { chunk_size },
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Hash an in-memory buffer.
    pub fn hash(&self, data: &[u8]) -> ContentHash {
        ContentHash::of(data)
    }

    /// Hash everything `reader` yields until EOF.
    ///
    /// Any read error aborts the computation; no partial digest is returned.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> io::Result<ContentHash> {
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buf[..n]);
        }
        Ok(ContentHash::from_digest(*hasher.finalize().as_bytes()))
    }

    /// Hash the file at `path`.
    pub fn hash_file(&self, path: &Path) -> Result<ContentHash, HasherError> {
        let file = File::open(path).map_err(|source| HasherError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        self.hash_reader(file).map_err(|source| HasherError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Verify that `data` hashes to `expected`.
    pub fn verify(&self, data: &[u8], expected: &ContentHash) -> bool {
        self.hash(data) == *expected
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader adapter that hashes bytes as they pass through.
///
/// Used when content is copied and fingerprinted in the same pass, e.g. to
/// check that bytes written into the store still match the key they are
/// stored under.
pub struct HashingReader<R> {
    inner: R,
    hasher: blake3::Hasher,
    bytes: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            bytes: 0,
        }
    }

    /// Number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    /// Digest of everything read so far.
    pub fn finalize(&self) -> ContentHash {
        ContentHash::from_digest(*self.hasher.finalize().as_bytes())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

/// Errors from hashing a file.
#[derive(Debug, thiserror::Error)]
pub enum HasherError {
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read failed for {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
