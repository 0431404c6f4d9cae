// src/recipe/kitchen/patch.rs

//! Unified diff application
//!
//! A patch may touch several files. It is split into per-file sections by
//! walking the `---`/`+++` headers and counting hunk lines, so removed lines
//! that happen to start with `-- ` never open a bogus section. Each section
//! is handed to `diffy`, which applies hunks exactly: there is no fuzz
//! factor, and a hunk whose context is missing fails the whole patch.
//!
//! New contents for every file are computed before anything is written, so
//! a patch either applies completely or leaves the tree untouched.
//!
//! A patch whose result is already present (its reverse applies cleanly) is
//! rejected, so applying the same patch twice fails.

use crate::error::{Error, Result};
use crate::recipe::kitchen::archive::is_contained;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEV_NULL: &str = "/dev/null";

/// One file's worth of a unified diff
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileSection {
    old_path: Option<String>,
    new_path: Option<String>,
    forward: String,
    reverse: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileChange {
    Create,
    Delete,
    Modify,
}

/// Parse `@@ -a,b +c,d @@` into (old count, new count)
fn hunk_counts(line: &str) -> Option<(usize, usize)> {
    let rest = line.strip_prefix("@@ -")?;
    let (ranges, _) = rest.split_once(" @@")?;
    let (old, new) = ranges.split_once(" +")?;

    let count = |range: &str| -> Option<usize> {
        match range.split_once(',') {
            Some((_, n)) => n.parse().ok(),
            None => range.parse::<usize>().ok().map(|_| 1),
        }
    };

    Some((count(old)?, count(new)?))
}

/// Swap the ranges of a hunk header for the reversed patch
fn reverse_hunk_header(line: &str) -> String {
    let Some(rest) = line.strip_prefix("@@ -") else {
        return line.to_string();
    };
    let Some((ranges, tail)) = rest.split_once(" @@") else {
        return line.to_string();
    };
    let Some((old, new)) = ranges.split_once(" +") else {
        return line.to_string();
    };
    format!("@@ -{} +{} @@{}", new, old, tail)
}

/// Path named by a `---`/`+++` header line, without any timestamp
fn header_path(line: &str, prefix: &str) -> Option<String> {
    let rest = line.strip_prefix(prefix)?;
    let path = rest.split('\t').next().unwrap_or(rest).trim_end();
    if path == DEV_NULL {
        None
    } else {
        Some(path.to_string())
    }
}

/// Split a unified diff into file sections
fn split_sections(text: &str) -> std::result::Result<Vec<FileSection>, String> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut sections = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let is_header = lines[i].starts_with("--- ")
            && lines.get(i + 1).is_some_and(|next| next.starts_with("+++ "));
        if !is_header {
            i += 1;
            continue;
        }

        let old_line = lines[i];
        let new_line = lines[i + 1];
        let mut section = FileSection {
            old_path: header_path(old_line, "--- "),
            new_path: header_path(new_line, "+++ "),
            forward: format!("{}{}", old_line, new_line),
            reverse: format!(
                "--- {}+++ {}",
                &new_line[4..],
                &old_line[4..]
            ),
        };
        if section.old_path.is_none() && section.new_path.is_none() {
            return Err("both sides of a file header are /dev/null".to_string());
        }
        i += 2;

        let mut hunks = 0;
        while let Some(line) = lines.get(i).filter(|l| l.starts_with("@@ ")) {
            let (mut old_left, mut new_left) =
                hunk_counts(line).ok_or_else(|| format!("malformed hunk header: {}", line.trim_end()))?;
            section.forward.push_str(line);
            section.reverse.push_str(&reverse_hunk_header(line));
            hunks += 1;
            i += 1;

            while old_left > 0 || new_left > 0 {
                let Some(line) = lines.get(i) else {
                    return Err(format!("hunk #{} is truncated", hunks));
                };
                let (forward_marker, reverse_marker) = match line.as_bytes().first() {
                    Some(b' ') | Some(b'\n') | Some(b'\r') => {
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                        (None, None)
                    }
                    Some(b'-') => {
                        old_left = old_left.saturating_sub(1);
                        (Some('-'), Some('+'))
                    }
                    Some(b'+') => {
                        new_left = new_left.saturating_sub(1);
                        (Some('+'), Some('-'))
                    }
                    Some(b'\\') => (None, None),
                    _ => return Err(format!("unexpected line in hunk #{}: {}", hunks, line.trim_end())),
                };

                if line.starts_with(['\n', '\r']) {
                    section.forward.push(' ');
                    section.reverse.push(' ');
                }
                section.forward.push_str(line);
                match (forward_marker, reverse_marker) {
                    (Some(_), Some(rev)) => {
                        section.reverse.push(rev);
                        section.reverse.push_str(&line[1..]);
                    }
                    _ => section.reverse.push_str(line),
                }
                i += 1;
            }

            if let Some(marker) = lines.get(i).filter(|l| l.starts_with('\\')) {
                section.forward.push_str(marker);
                section.reverse.push_str(marker);
                i += 1;
            }
        }

        if hunks == 0 {
            return Err(format!(
                "no hunks for {}",
                section.new_path.as_deref().or(section.old_path.as_deref()).unwrap_or(DEV_NULL)
            ));
        }
        sections.push(section);
    }

    Ok(sections)
}

/// Drop `strip` leading components from a patch path
fn strip_path(path: &str, strip: u32) -> Option<PathBuf> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let strip = strip as usize;
    if parts.len() <= strip {
        return None;
    }
    let relative: PathBuf = parts[strip..].iter().collect();
    if path.starts_with('/') && strip == 0 {
        return None;
    }
    Some(relative)
}

/// Apply a unified diff to `source_dir`
///
/// Returns the files created, modified or removed, relative to the source root.
pub fn apply_patch(source_dir: &Path, name: &str, text: &str, strip: u32) -> Result<Vec<PathBuf>> {
    let fail = |file: &str, hunk: String| Error::Patch {
        patch: name.to_string(),
        file: file.to_string(),
        hunk,
    };

    let sections = split_sections(text).map_err(|e| fail("-", e))?;
    if sections.is_empty() {
        return Err(fail("-", "no file sections found".to_string()));
    }

    let mut planned: Vec<(PathBuf, Option<String>)> = Vec::with_capacity(sections.len());

    for section in &sections {
        let (raw, change) = match (&section.old_path, &section.new_path) {
            (None, Some(new)) => (new, FileChange::Create),
            (Some(old), None) => (old, FileChange::Delete),
            (Some(_), Some(new)) => (new, FileChange::Modify),
            (None, None) => return Err(fail(DEV_NULL, "no file named".to_string())),
        };

        let relative = strip_path(raw, strip)
            .filter(|p| is_contained(p))
            .ok_or_else(|| fail(raw, format!("path cannot be used with strip level {}", strip)))?;
        let shown = relative.display().to_string();
        let target = source_dir.join(&relative);

        let patch = diffy::Patch::from_str(&section.forward)
            .map_err(|e| fail(&shown, format!("malformed patch: {}", e)))?;

        let current = match change {
            FileChange::Create => {
                if target.exists() || planned.iter().any(|(p, c)| p == &relative && c.is_some()) {
                    return Err(fail(&shown, "file to be created already exists".to_string()));
                }
                String::new()
            }
            FileChange::Delete | FileChange::Modify => {
                match planned.iter().rev().find(|(p, _)| p == &relative) {
                    Some((_, Some(content))) => content.clone(),
                    Some((_, None)) => {
                        return Err(fail(&shown, "file was removed earlier in this patch".to_string()));
                    }
                    None => {
                        let bytes = fs::read(&target)
                            .map_err(|e| fail(&shown, format!("cannot read file: {}", e)))?;
                        String::from_utf8(bytes).map_err(|_| {
                            fail(
                                &shown,
                                format!("binary or non-UTF-8 target {}", target.display()),
                            )
                        })?
                    }
                }
            }
        };

        let forward = diffy::apply(&current, &patch);
        if change == FileChange::Modify {
            let reverse = diffy::Patch::from_str(&section.reverse)
                .map_err(|e| fail(&shown, format!("malformed patch: {}", e)))?;
            let reverse_applies = diffy::apply(&current, &reverse).is_ok();
            if reverse_applies && (forward.is_err() || section.is_pure_addition()) {
                return Err(fail(&shown, "patch already applied".to_string()));
            }
        }
        let patched = forward.map_err(|e| fail(&shown, e.to_string()))?;

        let outcome = match change {
            FileChange::Delete => {
                if !patched.is_empty() {
                    return Err(fail(&shown, "file to be removed has extra content".to_string()));
                }
                None
            }
            FileChange::Create | FileChange::Modify => Some(patched),
        };

        debug!("{}: {} {:?}", name, shown, change);
        planned.push((relative, outcome));
    }

    let mut touched = Vec::with_capacity(planned.len());
    for (relative, outcome) in planned {
        let target = source_dir.join(&relative);
        match outcome {
            Some(content) => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, content)?;
            }
            None => {
                if target.exists() {
                    fs::remove_file(&target)?;
                }
            }
        }
        if !touched.contains(&relative) {
            touched.push(relative);
        }
    }

    Ok(touched)
}

impl FileSection {
    /// Whether every hunk only adds lines
    fn is_pure_addition(&self) -> bool {
        !self
            .forward
            .split_inclusive('\n')
            .skip(2)
            .any(|line| line.starts_with('-'))
    }
}
