// src/hash.rs

//! Checksums for source integrity
//!
//! Recipes declare the digest of every remote input as `algorithm:hex`
//! (for example `sha256:19fd9d75...`). This module parses those strings,
//! hashes byte streams incrementally and compares the results.
//!
//! Only cryptographic algorithms are accepted: a mismatch may indicate
//! tampering, so content addressing shortcuts have no place here.

use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::str::FromStr;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-256 (the default for upstream tarballs)
    #[default]
    Sha256,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// Get the algorithm name as a string
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Checksum parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Unknown hash algorithm name
    UnknownAlgorithm(String),
    /// Checksum is not in `algorithm:hex` form
    MissingAlgorithm(String),
    /// Digest has wrong length for algorithm
    InvalidLength { expected: usize, got: usize },
    /// Digest contains invalid hex characters
    InvalidHex(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAlgorithm(name) => write!(
                f,
                "unsupported checksum algorithm: {} (supported: sha256, sha512)",
                name
            ),
            Self::MissingAlgorithm(s) => {
                write!(f, "checksum '{}' must be written as algorithm:digest", s)
            }
            Self::InvalidLength { expected, got } => {
                write!(f, "invalid digest length: expected {}, got {}", expected, got)
            }
            Self::InvalidHex(s) => write!(f, "invalid hex in digest: {}", s),
        }
    }
}

impl std::error::Error for HashError {}

/// A declared checksum: algorithm plus lowercase hex digest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    algorithm: HashAlgorithm,
    digest: String,
}

impl Checksum {
    /// Create a checksum, validating the digest against the algorithm
    pub fn new(algorithm: HashAlgorithm, digest: impl Into<String>) -> Result<Self, HashError> {
        let digest = digest.into();
        let expected_len = algorithm.hex_len();

        if digest.len() != expected_len {
            return Err(HashError::InvalidLength {
                expected: expected_len,
                got: digest.len(),
            });
        }

        if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(digest));
        }

        Ok(Self {
            algorithm,
            digest: digest.to_lowercase(),
        })
    }

    /// Parse a prefixed checksum string (`sha256:abc123...`)
    pub fn parse(s: &str) -> Result<Self, HashError> {
        let (algo, digest) = s
            .split_once(':')
            .ok_or_else(|| HashError::MissingAlgorithm(s.to_string()))?;
        Self::new(algo.parse()?, digest.trim())
    }

    #[inline]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    #[inline]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Compare against a hex digest computed with the same algorithm
    pub fn matches(&self, actual: &str) -> bool {
        self.digest.eq_ignore_ascii_case(actual)
    }

    /// File name used for this checksum in the download cache
    pub fn cache_key(&self) -> String {
        format!("{}_{}", self.algorithm.name(), self.digest)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.name(), self.digest)
    }
}

impl FromStr for Checksum {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Incremental hasher for any supported algorithm
pub struct Hasher {
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => HasherState::Sha512(Sha512::new()),
        };
        Self { state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(hasher) => hasher.update(data),
            HasherState::Sha512(hasher) => hasher.update(data),
        }
    }

    /// Finalize and return the lowercase hex digest
    pub fn finalize(self) -> String {
        match self.state {
            HasherState::Sha256(hasher) => hex::encode(hasher.finalize()),
            HasherState::Sha512(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

/// Writer adapter that hashes everything passing through it
pub struct HashingWriter<W> {
    inner: W,
    hasher: Hasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W, algorithm: HashAlgorithm) -> Self {
        Self {
            inner,
            hasher: Hasher::new(algorithm),
            written: 0,
        }
    }

    /// Flush the inner writer and return (digest, bytes written, inner writer)
    pub fn finish(mut self) -> io::Result<(String, u64, W)> {
        self.inner.flush()?;
        Ok((self.hasher.finalize(), self.written, self.inner))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Compute the hex digest of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Compute the hex digest of data from a reader
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<String> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Compute the hex digest of a file, streaming its content
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    hash_reader(algorithm, &mut file)
}
