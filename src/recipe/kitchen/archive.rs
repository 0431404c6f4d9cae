// src/recipe/kitchen/archive.rs

//! Source archive extraction for the Kitchen
//!
//! Tarballs are decoded in process with the `tar` crate and the gzip, xz
//! and zstd decoders. The compression is chosen from the file extension,
//! falling back to magic bytes for archives with unhelpful names.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Compression wrapped around a tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    None,
    Gzip,
    Xz,
    Zstd,
}

impl CompressionFormat {
    /// Detect compression from a file name
    ///
    /// Returns `None` when the name does not look like a tarball at all.
    pub fn from_extension(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::Gzip)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::Xz)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Self::Zstd)
        } else if name.ends_with(".tar") {
            Some(Self::None)
        } else {
            None
        }
    }

    /// Detect compression from the leading bytes of a file
    ///
    /// - Gzip: `1f 8b`
    /// - XZ: `fd 37 7a 58 5a 00`
    /// - Zstd: `28 b5 2f fd`
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0x1f, 0x8b]) {
            Some(Self::Gzip)
        } else if data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
            Some(Self::Xz)
        } else if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Some(Self::Zstd)
        } else if data.len() >= 262 && &data[257..262] == b"ustar" {
            Some(Self::None)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "tar",
            Self::Gzip => "gzip",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        }
    }

    fn decoder<'a, R: Read + 'a>(&self, reader: R) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Self::None => Box::new(reader),
            Self::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
            Self::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
            Self::Zstd => Box::new(zstd::stream::read::Decoder::new(reader).map_err(|e| {
                Error::IoError(format!("Failed to create zstd decoder: {}", e))
            })?),
        })
    }
}

/// Detect the compression of an archive on disk
pub fn detect_format(archive: &Path) -> Result<CompressionFormat> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(format) = CompressionFormat::from_extension(&name) {
        return Ok(format);
    }

    let mut head = Vec::with_capacity(512);
    File::open(archive)?.take(512).read_to_end(&mut head)?;
    CompressionFormat::from_magic_bytes(&head)
        .ok_or_else(|| Error::ParseError(format!("Unknown archive format: {}", name)))
}

/// Extract a tar archive into `dest`
///
/// Entries with absolute paths or `..` components are rejected before
/// anything is written for them. Returns the number of entries unpacked.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<usize> {
    let format = detect_format(archive)?;
    debug!("Extracting {} ({}) to {}", archive.display(), format.name(), dest.display());

    fs::create_dir_all(dest)?;
    let file = File::open(archive)?;
    let decoder = format.decoder(BufReader::new(file))?;
    let mut tar = tar::Archive::new(decoder);
    tar.set_preserve_permissions(true);
    tar.set_preserve_mtime(true);
    tar.set_overwrite(true);

    let corrupt = |e: std::io::Error| {
        Error::IoError(format!("Failed to read archive {}: {}", archive.display(), e))
    };

    let mut count = 0;
    for entry in tar.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?.into_owned();

        if !is_contained(&path) {
            return Err(Error::IoError(format!(
                "Archive entry {} escapes the extraction directory",
                path.display()
            )));
        }

        if !entry.unpack_in(dest).map_err(corrupt)? {
            return Err(Error::IoError(format!(
                "Archive entry {} escapes the extraction directory",
                path.display()
            )));
        }
        count += 1;
    }

    Ok(count)
}

/// Whether a relative path stays inside the directory it is joined to
pub fn is_contained(path: &Path) -> bool {
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// Locate the source root inside an extraction directory
///
/// An explicit `extract_dir` wins. Otherwise a lone top-level directory is
/// the root, and anything else means the archive was flat.
pub fn source_root(extracted: &Path, extract_dir: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = extract_dir {
        let root = extracted.join(dir);
        if !root.is_dir() {
            return Err(Error::NotFound(format!(
                "extract_dir '{}' not present in archive",
                dir
            )));
        }
        return Ok(root);
    }

    let entries: Vec<PathBuf> = fs::read_dir(extracted)?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;

    match entries.as_slice() {
        [single] if single.is_dir() => Ok(single.clone()),
        _ => Ok(extracted.to_path_buf()),
    }
}
