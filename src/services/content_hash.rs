use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

const READ_BUFFER: usize = 8192;

#[derive(Debug, Error)]
pub enum ContentHashError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// SHA-256 content keys, used as path-independent identities.
pub struct ContentHasher;

impl ContentHasher {
    pub fn new() -> Self {
        Self
    }

    pub fn content_key(&self, path: &Path) -> Result<String, ContentHashError> {
        let io_error = |source| ContentHashError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(io_error)?;
        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; READ_BUFFER];

        loop {
            let read = reader.read(&mut buffer).map_err(io_error)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Hash many files on the rayon pool. Output order follows `paths`.
    pub fn content_keys(&self, paths: &[PathBuf]) -> Vec<Result<String, ContentHashError>> {
        paths.par_iter().map(|path| self.content_key(path)).collect()
    }

    pub fn same_content(&self, first: &Path, second: &Path) -> Result<bool, ContentHashError> {
        Ok(self.content_key(first)? == self.content_key(second)?)
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}
