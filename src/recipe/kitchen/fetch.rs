// src/recipe/kitchen/fetch.rs

//! Source retrieval and verification
//!
//! A [`SourceFetcher`] moves bytes from a URL into a writer and nothing
//! else. [`fetch_verified`] layers the rest on top: the download cache,
//! mirrors, retries for transient network errors, hashing while streaming
//! and the checksum comparison. Bytes land in a `.part` file that is only
//! renamed into place after the checksum matches.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::hash::{Checksum, HashingWriter, hash_file};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const CHUNK_SIZE: usize = 8192;

/// How often a download waiting on the network looks at the cancel token
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Chunks buffered between a download thread and its writer
const CHANNEL_DEPTH: usize = 16;

/// Moves the bytes behind a URL into a writer
pub trait SourceFetcher: Send + Sync {
    /// Stream `url` into `dest`, returning the number of bytes written
    ///
    /// Implementations check `cancel` between chunks. Transient network
    /// failures are reported as [`Error::DownloadError`]; anything else
    /// is not retried.
    fn fetch(&self, url: &str, dest: &mut dyn Write, cancel: &CancelToken) -> Result<u64>;
}

/// Copy `reader` into `dest` in chunks, stopping when cancelled
pub fn copy_cancellable(
    reader: &mut dyn Read,
    dest: &mut dyn Write,
    cancel: &CancelToken,
    url: &str,
) -> Result<u64> {
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut written = 0u64;

    loop {
        cancel.check(&format!("download of {}", url))?;

        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(Error::DownloadError(format!("Failed to read {}: {}", url, e)));
            }
        };

        dest.write_all(&buffer[..n])?;
        written += n as u64;
    }

    Ok(written)
}

/// Write chunks from a download thread into `dest` until the sender hangs up
///
/// The wait for each chunk is bounded by [`CANCEL_POLL`], so a stalled
/// connection cannot hold off cancellation. Dropping `rx` on return tells
/// the download thread to stop after its current read.
pub fn receive_cancellable(
    rx: &Receiver<Result<Vec<u8>>>,
    dest: &mut dyn Write,
    cancel: &CancelToken,
    url: &str,
) -> Result<u64> {
    let mut written = 0u64;

    loop {
        cancel.check(&format!("download of {}", url))?;

        match rx.recv_timeout(CANCEL_POLL) {
            Ok(Ok(chunk)) => {
                dest.write_all(&chunk)?;
                written += chunk.len() as u64;
            }
            Ok(Err(e)) => return Err(e),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(written)
}

/// Fetches `http://` and `https://` URLs
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sous/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

/// Send the response body for `url` down `tx`, one chunk at a time
fn download(client: &Client, url: &str, tx: &mpsc::SyncSender<Result<Vec<u8>>>) -> Result<()> {
    let mut response = client
        .get(url)
        .send()
        .map_err(|e| Error::DownloadError(format!("{}: {}", url, e)))?;

    let status = response.status();
    if status.is_server_error() || status.as_u16() == 429 {
        return Err(Error::DownloadError(format!("HTTP {} from {}", status, url)));
    }
    if !status.is_success() {
        return Err(Error::NotFound(format!("HTTP {} from {}", status, url)));
    }

    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        let n = match response.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(Error::DownloadError(format!("Failed to read {}: {}", url, e)));
            }
        };
        if tx.send(Ok(buffer[..n].to_vec())).is_err() {
            // receiver gone: the download was cancelled
            return Ok(());
        }
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write, cancel: &CancelToken) -> Result<u64> {
        let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
        let client = self.client.clone();
        let target = url.to_string();
        thread::spawn(move || {
            if let Err(e) = download(&client, &target, &tx) {
                let _ = tx.send(Err(e));
            }
        });

        receive_cancellable(&rx, dest, cancel, url)
    }
}

/// Fetches `file://` URLs and plain filesystem paths
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFetcher;

impl SourceFetcher for LocalFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write, cancel: &CancelToken) -> Result<u64> {
        let path = local_path(url)
            .ok_or_else(|| Error::NotFound(format!("{} is not a local path", url)))?;
        let mut file = File::open(&path)
            .map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))?;
        copy_cancellable(&mut file, dest, cancel, url)
    }
}

/// Resolve a `file://` URL or bare path to a filesystem path
pub fn local_path(url: &str) -> Option<PathBuf> {
    match Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "file" => parsed.to_file_path().ok(),
        Ok(_) => None,
        Err(_) => Some(PathBuf::from(url)),
    }
}

/// Dispatches on the URL scheme
pub struct DefaultFetcher {
    http: HttpFetcher,
    local: LocalFetcher,
}

impl DefaultFetcher {
    pub fn new(http_timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(http_timeout)?,
            local: LocalFetcher,
        })
    }
}

impl SourceFetcher for DefaultFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write, cancel: &CancelToken) -> Result<u64> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.http.fetch(url, dest, cancel)
        } else if local_path(url).is_some() {
            self.local.fetch(url, dest, cancel)
        } else {
            Err(Error::NotFound(format!("Unsupported URL scheme: {}", url)))
        }
    }
}

/// Retry and cache settings for [`fetch_verified`]
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Attempts per URL for transient failures
    pub retries: u32,
    /// Base backoff, multiplied by the attempt number
    pub retry_delay: Duration,
    /// Verified download cache
    pub cache_dir: Option<PathBuf>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_millis(1000),
            cache_dir: None,
        }
    }
}

/// A downloaded and verified file
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub bytes: u64,
    /// URL the bytes came from, or `None` for a cache hit
    pub url: Option<String>,
    pub from_cache: bool,
}

/// Fetch the first of `urls` that yields content matching `checksum`
///
/// A checksum mismatch stops immediately with [`Error::Integrity`]: it is
/// never retried and no mirror is consulted. A URL that fails with anything
/// other than a transient error moves on to the next mirror.
pub fn fetch_verified(
    fetcher: &dyn SourceFetcher,
    urls: &[String],
    checksum: &Checksum,
    dest: &Path,
    options: &FetchOptions,
    cancel: &CancelToken,
) -> Result<FetchedFile> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    if let Some(cached) = from_cache(checksum, dest, options)? {
        return Ok(cached);
    }

    let mut last_error = Error::NotFound("no source URLs".to_string());

    for url in urls {
        let retries = options.retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            cancel.check(&format!("download of {}", url))?;
            info!("Fetching {}", url);

            match download_verified(fetcher, url, checksum, dest, cancel) {
                Ok(bytes) => {
                    info!("Verified {} ({} bytes)", url, bytes);
                    store_in_cache(checksum, dest, options);
                    return Ok(FetchedFile {
                        path: dest.to_path_buf(),
                        bytes,
                        url: Some(url.clone()),
                        from_cache: false,
                    });
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e @ Error::Integrity { .. }) => return Err(e),
                Err(e) if e.is_retryable() && attempt < retries => {
                    warn!("Download attempt {} of {} failed: {}, retrying...", attempt, url, e);
                    cancel.sleep(options.retry_delay * attempt, "download backoff")?;
                }
                Err(e) => {
                    warn!("Giving up on {}: {}", url, e);
                    last_error = e;
                    break;
                }
            }
        }
    }

    Err(last_error)
}

/// Download into `<dest>.part`, verify, then rename
fn download_verified(
    fetcher: &dyn SourceFetcher,
    url: &str,
    checksum: &Checksum,
    dest: &Path,
    cancel: &CancelToken,
) -> Result<u64> {
    let part = part_path(dest);
    let result = download_to_part(fetcher, url, checksum, &part, cancel);

    match result {
        Ok(bytes) => {
            fs::rename(&part, dest)?;
            Ok(bytes)
        }
        Err(e) => {
            let _ = fs::remove_file(&part);
            Err(e)
        }
    }
}

fn download_to_part(
    fetcher: &dyn SourceFetcher,
    url: &str,
    checksum: &Checksum,
    part: &Path,
    cancel: &CancelToken,
) -> Result<u64> {
    let file = File::create(part)?;
    let mut writer = HashingWriter::new(BufWriter::new(file), checksum.algorithm());

    fetcher.fetch(url, &mut writer, cancel)?;

    let (actual, bytes, inner) = writer.finish()?;
    inner.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    if !checksum.matches(&actual) {
        return Err(Error::Integrity {
            url: url.to_string(),
            expected: checksum.to_string(),
            actual: format!("{}:{}", checksum.algorithm(), actual),
        });
    }

    Ok(bytes)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn cache_entry(checksum: &Checksum, options: &FetchOptions) -> Option<PathBuf> {
    options
        .cache_dir
        .as_ref()
        .map(|dir| dir.join(checksum.cache_key()))
}

/// Use a cached copy if it still hashes correctly
fn from_cache(
    checksum: &Checksum,
    dest: &Path,
    options: &FetchOptions,
) -> Result<Option<FetchedFile>> {
    let Some(entry) = cache_entry(checksum, options) else {
        return Ok(None);
    };
    if !entry.is_file() {
        return Ok(None);
    }

    let actual = hash_file(checksum.algorithm(), &entry)?;
    if !checksum.matches(&actual) {
        warn!("Discarding corrupt cache entry {}", entry.display());
        let _ = fs::remove_file(&entry);
        return Ok(None);
    }

    debug!("Using cached source {}", entry.display());
    let bytes = fs::copy(&entry, dest)?;
    Ok(Some(FetchedFile {
        path: dest.to_path_buf(),
        bytes,
        url: None,
        from_cache: true,
    }))
}

/// Copy a verified file into the cache; failures only warn
fn store_in_cache(checksum: &Checksum, verified: &Path, options: &FetchOptions) {
    let Some(entry) = cache_entry(checksum, options) else {
        return;
    };

    let result = (|| -> io::Result<()> {
        if let Some(parent) = entry.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = part_path(&entry);
        fs::copy(verified, &tmp)?;
        fs::rename(&tmp, &entry)
    })();

    if let Err(e) = result {
        warn!("Failed to cache {}: {}", entry.display(), e);
    }
}

/// Fetch a small text resource (livecheck pages) without verification
pub fn fetch_text(fetcher: &dyn SourceFetcher, url: &str, cancel: &CancelToken) -> Result<String> {
    let mut body = Vec::new();
    fetcher.fetch(url, &mut body, cancel)?;
    String::from_utf8(body).map_err(|e| Error::ParseError(format!("{} is not UTF-8: {}", url, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashAlgorithm, hash_bytes};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_receive_stops_on_cancel_while_stalled() {
        let (tx, rx) = mpsc::sync_channel::<Result<Vec<u8>>>(1);
        tx.send(Ok(b"head".to_vec())).unwrap();

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            trigger.cancel();
        });

        // `tx` stays alive, like a connection that stopped sending
        let started = std::time::Instant::now();
        let mut sink = Vec::new();
        let err = receive_cancellable(&rx, &mut sink, &cancel, "https://example.org/x").unwrap_err();
        canceller.join().unwrap();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(sink, b"head");
        drop(tx);
    }

    #[test]
    fn test_receive_until_sender_hangs_up() {
        let (tx, rx) = mpsc::sync_channel(4);
        tx.send(Ok(b"abc".to_vec())).unwrap();
        tx.send(Ok(b"de".to_vec())).unwrap();
        drop(tx);

        let mut sink = Vec::new();
        let written = receive_cancellable(&rx, &mut sink, &CancelToken::new(), "u").unwrap();
        assert_eq!(written, 5);
        assert_eq!(sink, b"abcde");
    }

    #[test]
    fn test_receive_forwards_download_error() {
        let (tx, rx) = mpsc::sync_channel(4);
        tx.send(Ok(b"abc".to_vec())).unwrap();
        tx.send(Err(Error::DownloadError("reset".into()))).unwrap();

        let err = receive_cancellable(&rx, &mut Vec::new(), &CancelToken::new(), "u").unwrap_err();
        assert!(err.is_retryable());
    }

    /// Serves canned bodies; `failures` transient errors come first
    #[derive(Default)]
    struct CannedFetcher {
        bodies: HashMap<String, Vec<u8>>,
        failures: Mutex<HashMap<String, u32>>,
        calls: Mutex<Vec<String>>,
    }

    impl CannedFetcher {
        fn serve(mut self, url: &str, body: &[u8]) -> Self {
            self.bodies.insert(url.to_string(), body.to_vec());
            self
        }

        fn failing(self, url: &str, times: u32) -> Self {
            self.failures.lock().unwrap().insert(url.to_string(), times);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SourceFetcher for CannedFetcher {
        fn fetch(&self, url: &str, dest: &mut dyn Write, cancel: &CancelToken) -> Result<u64> {
            self.calls.lock().unwrap().push(url.to_string());
            if let Some(left) = self.failures.lock().unwrap().get_mut(url)
                && *left > 0
            {
                *left -= 1;
                return Err(Error::DownloadError("connection reset".into()));
            }
            let body = self
                .bodies
                .get(url)
                .ok_or_else(|| Error::NotFound(format!("HTTP 404 from {}", url)))?;
            copy_cancellable(&mut body.as_slice(), dest, cancel, url)
        }
    }

    const BODY: &[u8] = b"pretend this is a tarball";

    fn checksum() -> Checksum {
        Checksum::new(HashAlgorithm::Sha256, hash_bytes(HashAlgorithm::Sha256, BODY)).unwrap()
    }

    fn options() -> FetchOptions {
        FetchOptions {
            retries: 3,
            retry_delay: Duration::from_millis(1),
            cache_dir: None,
        }
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fetch_and_verify() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("pkg-1.0.tar.gz");
        let fetcher = CannedFetcher::default().serve("https://a/pkg", BODY);

        let fetched = fetch_verified(
            &fetcher,
            &urls(&["https://a/pkg"]),
            &checksum(),
            &dest,
            &options(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(fetched.bytes, BODY.len() as u64);
        assert_eq!(fs::read(&dest).unwrap(), BODY);
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn test_mismatch_is_integrity_error_and_not_retried() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("pkg.tar.gz");
        let fetcher = CannedFetcher::default()
            .serve("https://a/pkg", b"tampered")
            .serve("https://mirror/pkg", BODY);

        let err = fetch_verified(
            &fetcher,
            &urls(&["https://a/pkg", "https://mirror/pkg"]),
            &checksum(),
            &dest,
            &options(),
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Integrity { .. }));
        assert_eq!(err.exit_code(), 4);
        assert_eq!(fetcher.calls(), vec!["https://a/pkg"]);
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("pkg.tar.gz");
        let fetcher = CannedFetcher::default()
            .serve("https://a/pkg", BODY)
            .failing("https://a/pkg", 2);

        fetch_verified(
            &fetcher,
            &urls(&["https://a/pkg"]),
            &checksum(),
            &dest,
            &options(),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(fetcher.calls().len(), 3);
    }

    #[test]
    fn test_retries_are_bounded() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("pkg.tar.gz");
        let fetcher = CannedFetcher::default()
            .serve("https://a/pkg", BODY)
            .failing("https://a/pkg", 10);

        let err = fetch_verified(
            &fetcher,
            &urls(&["https://a/pkg"]),
            &checksum(),
            &dest,
            &options(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DownloadError(_)));
        assert_eq!(fetcher.calls().len(), 3);
    }

    #[test]
    fn test_mirror_fallback() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("pkg.tar.gz");
        let fetcher = CannedFetcher::default().serve("https://mirror/pkg", BODY);

        let fetched = fetch_verified(
            &fetcher,
            &urls(&["https://gone/pkg", "https://mirror/pkg"]),
            &checksum(),
            &dest,
            &options(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(fetched.url.as_deref(), Some("https://mirror/pkg"));
        // not-found is not transient, so the primary is tried once
        assert_eq!(fetcher.calls(), vec!["https://gone/pkg", "https://mirror/pkg"]);
    }

    #[test]
    fn test_cache_hit_is_reverified() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        let opts = FetchOptions {
            cache_dir: Some(cache.clone()),
            ..options()
        };
        let fetcher = CannedFetcher::default().serve("https://a/pkg", BODY);
        let list = urls(&["https://a/pkg"]);

        let first = dir.path().join("one.tar.gz");
        fetch_verified(&fetcher, &list, &checksum(), &first, &opts, &CancelToken::new()).unwrap();
        assert!(cache.join(checksum().cache_key()).is_file());

        let second = dir.path().join("two.tar.gz");
        let hit =
            fetch_verified(&fetcher, &list, &checksum(), &second, &opts, &CancelToken::new())
                .unwrap();
        assert!(hit.from_cache);
        assert_eq!(fetcher.calls().len(), 1);

        // corrupt the cache entry: it is discarded and the source re-fetched
        fs::write(cache.join(checksum().cache_key()), b"rot").unwrap();
        let third = dir.path().join("three.tar.gz");
        let fresh =
            fetch_verified(&fetcher, &list, &checksum(), &third, &opts, &CancelToken::new())
                .unwrap();
        assert!(!fresh.from_cache);
        assert_eq!(fetcher.calls().len(), 2);
        assert_eq!(fs::read(&third).unwrap(), BODY);
    }

    #[test]
    fn test_cancelled_fetch_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("pkg.tar.gz");
        let fetcher = CannedFetcher::default().serve("https://a/pkg", BODY);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = fetch_verified(
            &fetcher,
            &urls(&["https://a/pkg"]),
            &checksum(),
            &dest,
            &options(),
            &cancel,
        )
        .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn test_local_fetcher() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.tar.gz");
        fs::write(&src, BODY).unwrap();

        let mut out = Vec::new();
        let url = Url::from_file_path(&src).unwrap().to_string();
        LocalFetcher.fetch(&url, &mut out, &CancelToken::new()).unwrap();
        assert_eq!(out, BODY);

        let mut out = Vec::new();
        LocalFetcher
            .fetch(src.to_str().unwrap(), &mut out, &CancelToken::new())
            .unwrap();
        assert_eq!(out, BODY);
    }

    #[test]
    fn test_local_path() {
        assert_eq!(local_path("file:///tmp/x.tar"), Some(PathBuf::from("/tmp/x.tar")));
        assert_eq!(local_path("/srv/x.tar"), Some(PathBuf::from("/srv/x.tar")));
        assert_eq!(local_path("https://example.org/x.tar"), None);
    }
}
