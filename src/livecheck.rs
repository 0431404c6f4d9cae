// src/livecheck.rs

//! Upstream version discovery
//!
//! A recipe's livecheck names a page and a regex whose first capture group
//! is a version. The page is scanned and the highest version found is
//! compared with the recipe's own. Purely informational: nothing is built.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::recipe::kitchen::SourceFetcher;
use crate::recipe::kitchen::fetch::fetch_text;
use crate::recipe::model::Recipe;
use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LivecheckResult {
    pub recipe: String,
    pub current: String,
    /// Highest version found upstream, if any matched
    pub latest: Option<String>,
    pub outdated: bool,
}

/// Every distinct version captured by `pattern` in `page`, in page order
///
/// The first capture group is the version; a pattern without groups
/// yields the whole match.
pub fn scan_versions(page: &str, pattern: &Regex) -> Vec<String> {
    let mut versions: Vec<String> = Vec::new();
    for captures in pattern.captures_iter(page) {
        let Some(found) = captures.get(1).or_else(|| captures.get(0)) else {
            continue;
        };
        let version = found.as_str().to_string();
        if !versions.contains(&version) {
            versions.push(version);
        }
    }
    versions
}

/// Compare two version strings numerically component by component
///
/// Non-numeric components compare as text and a missing component counts
/// as zero. Exact ties fall back to plain text order.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<&str> = a.split(['.', '-', '_']).collect();
    let b_parts: Vec<&str> = b.split(['.', '-', '_']).collect();

    for i in 0..a_parts.len().max(b_parts.len()) {
        let a_part = a_parts.get(i).copied().unwrap_or("0");
        let b_part = b_parts.get(i).copied().unwrap_or("0");

        let ordering = match (a_part.parse::<u64>(), b_part.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            // a release sorts after its pre-releases: 9.1.0 > 9.1.0-rc1
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Ok(_)) => Ordering::Less,
            (Err(_), Err(_)) => a_part.cmp(b_part),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    a.cmp(b)
}

/// The highest of `versions`
pub fn latest_version(versions: &[String]) -> Option<&str> {
    versions
        .iter()
        .max_by(|a, b| compare_versions(a, b))
        .map(String::as_str)
}

/// Fetch a recipe's livecheck page and report the newest upstream version
pub fn check(
    recipe: &Recipe,
    fetcher: &dyn SourceFetcher,
    cancel: &CancelToken,
) -> Result<LivecheckResult> {
    let livecheck = recipe.livecheck().ok_or_else(|| {
        Error::NotFound(format!("recipe '{}' has no livecheck", recipe.name()))
    })?;

    debug!("Checking {} for {}", livecheck.url(), recipe.name());
    let page = fetch_text(fetcher, livecheck.url(), cancel)?;
    let versions = scan_versions(&page, livecheck.pattern());
    debug!("Found {} candidate version(s)", versions.len());

    let latest = latest_version(&versions).map(str::to_string);
    let outdated = latest
        .as_deref()
        .is_some_and(|v| compare_versions(v, recipe.version()) == Ordering::Greater);

    Ok(LivecheckResult {
        recipe: recipe.name().to_string(),
        current: recipe.version().to_string(),
        latest,
        outdated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::parser::parse_recipe;
    use std::io::Write;
    use std::path::Path;

    const DOWNLOAD_PAGE: &str = r#"
<a href="qemu-9.0.2.tar.xz">qemu-9.0.2.tar.xz</a>
<a href="qemu-9.1.2.tar.xz">qemu-9.1.2.tar.xz</a>
<a href="qemu-9.1.2.tar.xz.sig">qemu-9.1.2.tar.xz.sig</a>
<a href="qemu-10.0.0-rc1.tar.xz">qemu-10.0.0-rc1.tar.xz</a>
<a href="qemu-9.10.0.tar.xz">qemu-9.10.0.tar.xz</a>
"#;

    struct Page(&'static str);

    impl SourceFetcher for Page {
        fn fetch(&self, _url: &str, dest: &mut dyn Write, _cancel: &CancelToken) -> Result<u64> {
            dest.write_all(self.0.as_bytes())?;
            Ok(self.0.len() as u64)
        }
    }

    #[test]
    fn test_scan_versions_dedups() {
        let pattern = Regex::new(r#"href="qemu-(\d+(?:\.\d+)+)\.tar\.xz""#).unwrap();
        assert_eq!(
            scan_versions(DOWNLOAD_PAGE, &pattern),
            vec!["9.0.2", "9.1.2", "9.10.0"]
        );
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("9.10.0", "9.9.1"), Ordering::Greater);
        assert_eq!(compare_versions("9.1", "9.1.0"), Ordering::Less);
        assert_eq!(compare_versions("10.0.0", "10.0.0-rc1"), Ordering::Greater);
        assert_eq!(compare_versions("10.0.1", "10.0.0-rc1"), Ordering::Greater);
        assert_eq!(compare_versions("1.2.3", "1.2.3"), Ordering::Equal);
    }

    #[test]
    fn test_check_reports_outdated() {
        let recipe = parse_recipe(
            r#"
name = "qemu"
version = "9.1.2"

[livecheck]
url = "https://download.qemu.org/"
regex = 'href="qemu-(\d+(?:\.\d+)+)\.tar\.xz"'
"#,
            Path::new("."),
        )
        .unwrap();

        let result = check(&recipe, &Page(DOWNLOAD_PAGE), &CancelToken::new()).unwrap();
        assert_eq!(result.latest.as_deref(), Some("9.10.0"));
        assert!(result.outdated);
    }

    #[test]
    fn test_missing_livecheck() {
        let recipe = parse_recipe("name = \"x\"\nversion = \"1\"\n", Path::new(".")).unwrap();
        let err = check(&recipe, &Page(""), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
