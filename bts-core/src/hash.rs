//! Document digests

use bts_types::Digest;
use sha2::{Digest as _, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

const READ_CHUNK: usize = 64 * 1024;

/// SHA-256 of an in-memory document
pub fn hash_bytes(data: &[u8]) -> Digest {
    Digest::sha256(data)
}

/// SHA-256 of everything `reader` yields
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<Digest> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(Digest::new(hasher.finalize().into()))
}

/// SHA-256 of a file's contents, streamed
pub fn hash_file(path: &Path) -> io::Result<Digest> {
    let file = File::open(path)?;
    hash_reader(BufReader::new(file))
}
