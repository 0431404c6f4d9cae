// tests/common/mod.rs

//! Shared helpers for integration tests

#![allow(dead_code)]

use sous::hash::{hash_bytes, HashAlgorithm};
use sous::recipe::kitchen::fetch::copy_cancellable;
use sous::recipe::kitchen::{BuildObserver, BuildState, SourceFetcher};
use sous::{CancelToken, CpuFamily, HostInfo, HostOs, Kitchen, KitchenConfig, Result};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Build an in-memory `.tar.xz`; entries are (path, content, mode)
pub fn tar_xz(entries: &[(&str, &str, u32)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(*mode);
        header.set_mtime(1_700_000_000);
        header.set_cksum();
        builder.append_data(&mut header, path, data.as_bytes()).unwrap();
    }
    let tar = builder.into_inner().unwrap();

    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

/// `sha256:<hex>` for `data`
pub fn checksum_of(data: &[u8]) -> String {
    format!("sha256:{}", hash_bytes(HashAlgorithm::Sha256, data))
}

/// Serves canned bodies by URL and counts requests
#[derive(Default)]
pub struct FakeFetcher {
    bodies: BTreeMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), body);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl SourceFetcher for FakeFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write, cancel: &CancelToken) -> Result<u64> {
        self.requests.lock().unwrap().push(url.to_string());
        match self.bodies.get(url) {
            Some(body) => copy_cancellable(&mut body.as_slice(), dest, cancel, url),
            None => Err(sous::Error::NotFound(url.to_string())),
        }
    }
}

/// A reader that yields one small chunk every `delay`, forever
pub struct TrickleReader {
    pub delay: Duration,
}

impl Read for TrickleReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        thread::sleep(self.delay);
        let n = buf.len().min(16);
        buf[..n].fill(b'x');
        Ok(n)
    }
}

/// Never finishes a download on its own; only cancellation stops it
pub struct SlowFetcher;

impl SourceFetcher for SlowFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write, cancel: &CancelToken) -> Result<u64> {
        let mut reader = TrickleReader {
            delay: Duration::from_millis(10),
        };
        copy_cancellable(&mut reader, dest, cancel, url)
    }
}

/// Records every transition of every recipe, in order
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<(String, BuildState)>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<(String, BuildState)> {
        self.events.lock().unwrap().clone()
    }

    pub fn position(&self, recipe: &str, state: BuildState) -> Option<usize> {
        self.events()
            .iter()
            .position(|(r, s)| r == recipe && *s == state)
    }

    pub fn states(&self, recipe: &str) -> Vec<BuildState> {
        self.events()
            .into_iter()
            .filter(|(r, _)| r == recipe)
            .map(|(_, s)| s)
            .collect()
    }
}

impl BuildObserver for EventLog {
    fn on_transition(&self, recipe: &str, _from: BuildState, to: BuildState) {
        self.events.lock().unwrap().push((recipe.to_string(), to));
    }
}

/// Config rooted in `dir` with caching disabled and fast retries
pub fn kitchen_config(dir: &Path) -> KitchenConfig {
    KitchenConfig::default()
        .with_prefix(dir.join("prefix"))
        .with_work_dir(dir.join("work"))
        .with_source_cache(None)
        .with_jobs(2)
        .with_retry_delay(Duration::from_millis(1))
}

/// A kitchen for `config` on an Intel Linux host
pub fn kitchen_with(config: KitchenConfig, fetcher: Arc<dyn SourceFetcher>, log: Arc<EventLog>) -> Kitchen {
    Kitchen::with_fetcher(
        config,
        HostInfo::new(CpuFamily::Intel, HostOs::Linux, "cc"),
        fetcher,
    )
    .with_observer(log)
}

/// A kitchen rooted in `dir` with the default test config
pub fn kitchen(dir: &Path, fetcher: Arc<dyn SourceFetcher>, log: Arc<EventLog>) -> Kitchen {
    kitchen_with(kitchen_config(dir), fetcher, log)
}
