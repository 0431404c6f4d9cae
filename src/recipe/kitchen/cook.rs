// src/recipe/kitchen/cook.rs

//! Cook: the build execution for a single recipe

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::recipe::format::StepPhase;
use crate::recipe::interpolate::interpolate;
use crate::recipe::kitchen::archive::{extract_archive, source_root};
use crate::recipe::kitchen::fetch::{FetchOptions, fetch_verified};
use crate::recipe::kitchen::patch::apply_patch;
use crate::recipe::kitchen::state::{BuildState, BuildTracker};
use crate::recipe::model::{InstallStep, PatchOrigin, Recipe};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;
use walkdir::WalkDir;

use super::Kitchen;

/// Lines of step output kept for error reports
const OUTPUT_TAIL_LINES: usize = 20;

/// How often a running step is checked for cancellation and timeout
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long output readers may drain after a step ends
const READER_GRACE: Duration = Duration::from_secs(2);

/// Everything a single build needs to run its steps
#[derive(Debug, Clone, Serialize)]
pub struct BuildContext {
    pub work_dir: PathBuf,
    pub source_dir: PathBuf,
    pub prefix: PathBuf,
    pub log_dir: PathBuf,
    /// Variables available to `$VAR` interpolation
    pub variables: BTreeMap<String, String>,
    /// Environment set on top of the inherited one
    pub env: BTreeMap<String, String>,
}

impl BuildContext {
    pub fn new(kitchen: &Kitchen, recipe: &Recipe, work_dir: &Path, source_dir: &Path) -> Result<Self> {
        let config = kitchen.config();
        let host = kitchen.host();
        let prefix = config.prefix.clone();

        let mut variables = BTreeMap::new();
        variables.insert("PREFIX".to_string(), prefix.display().to_string());
        variables.insert("CC".to_string(), host.cc.clone());
        variables.insert("ARCH".to_string(), host.target().as_str().to_string());
        variables.insert("JOBS".to_string(), config.jobs.to_string());
        variables.insert("NAME".to_string(), recipe.name().to_string());
        variables.insert("VERSION".to_string(), recipe.version().to_string());
        variables.insert("SOURCE_DIR".to_string(), source_dir.display().to_string());

        for (key, template) in recipe.variables() {
            let value = interpolate(template, &variables)
                .map_err(|e| Error::validation(recipe.name(), format!("variable {}: {}", key, e)))?;
            variables.insert(key.clone(), value);
        }

        let mut env = BTreeMap::new();
        env.insert("PREFIX".to_string(), variables["PREFIX"].clone());
        env.insert("CC".to_string(), host.cc.clone());
        env.insert("MAKEFLAGS".to_string(), format!("-j{}", config.jobs));
        env.insert(
            "PATH".to_string(),
            prepend_path(&prefix.join("bin"), std::env::var_os("PATH")),
        );
        env.insert(
            "PKG_CONFIG_PATH".to_string(),
            prepend_path(
                &prefix.join("lib").join("pkgconfig"),
                std::env::var_os("PKG_CONFIG_PATH"),
            ),
        );

        for (key, template) in recipe.env() {
            let value = interpolate(template, &variables)
                .map_err(|e| Error::validation(recipe.name(), format!("env {}: {}", key, e)))?;
            env.insert(key.clone(), value);
        }

        Ok(Self {
            work_dir: work_dir.to_path_buf(),
            source_dir: source_dir.to_path_buf(),
            prefix,
            log_dir: work_dir.join("logs"),
            variables,
            env,
        })
    }

    /// Interpolate a step's program and arguments
    pub fn resolve_step(&self, recipe: &str, step: &InstallStep) -> Result<ResolvedStep> {
        let expand = |template: &str| {
            interpolate(template, &self.variables).map_err(|e| Error::validation(recipe, e))
        };

        Ok(ResolvedStep {
            phase: step.phase(),
            program: expand(step.program())?,
            args: step
                .args()
                .iter()
                .map(|arg| expand(arg.as_str()))
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

fn prepend_path(dir: &Path, existing: Option<OsString>) -> String {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(existing) = existing {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths)
        .map(|joined| joined.to_string_lossy().into_owned())
        .unwrap_or_else(|_| dir.display().to_string())
}

/// A step with every variable substituted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedStep {
    pub phase: StepPhase,
    pub program: String,
    pub args: Vec<String>,
}

impl ResolvedStep {
    /// Command line for logs and error messages
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn log_name(&self, index: usize) -> String {
        let base: String = Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "step".to_string())
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{:02}-{}.log", index + 1, base)
    }
}

/// Output captured from a running step
struct StepOutput {
    log: File,
    tail: VecDeque<String>,
}

impl StepOutput {
    fn push(&mut self, line: String) {
        let _ = writeln!(self.log, "{}", line);
        if self.tail.len() == OUTPUT_TAIL_LINES {
            self.tail.pop_front();
        }
        self.tail.push_back(line);
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    output: Arc<Mutex<StepOutput>>,
    recipe: String,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    debug!("[{}] {}", recipe, line);
                    if let Ok(mut output) = output.lock() {
                        output.push(line);
                    }
                }
            }
        }
    })
}

/// Kill a step and every process in its group, then reap it
fn kill_step(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Ok(pid) = i32::try_from(child.id())
            && let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL)
        {
            debug!("killpg {} failed: {}", pid, e);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Wait for the output readers, but no longer than `grace`
///
/// A process that escaped the step's group can hold the pipes open
/// indefinitely; its reader is detached instead of joined.
fn join_readers(readers: Vec<thread::JoinHandle<()>>, grace: Duration) {
    let deadline = Instant::now() + grace;
    for reader in readers {
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            warn!("step output still open after {:?}; detaching reader", grace);
        }
    }
}

enum StepEnd {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// A single cook operation
pub struct Cook<'a> {
    kitchen: &'a Kitchen,
    recipe: &'a Recipe,
    cancel: &'a CancelToken,
    work_dir: PathBuf,
    download_dir: PathBuf,
    extract_dir: PathBuf,
    source_dir: PathBuf,
    context: Option<BuildContext>,
    steps_run: usize,
    pub(super) from_cache: bool,
    pub(super) installed_files: usize,
}

impl<'a> Cook<'a> {
    /// Prepare a fresh working directory for `recipe`
    pub(super) fn new(kitchen: &'a Kitchen, recipe: &'a Recipe, cancel: &'a CancelToken) -> Result<Self> {
        let work_dir = kitchen.work_dir_for(recipe);
        if work_dir.exists() {
            debug!("Removing stale work directory {}", work_dir.display());
            fs::remove_dir_all(&work_dir)?;
        }

        let download_dir = work_dir.join("download");
        let extract_dir = work_dir.join("src");
        fs::create_dir_all(&download_dir)?;
        fs::create_dir_all(&extract_dir)?;
        fs::create_dir_all(work_dir.join("logs"))?;

        Ok(Self {
            kitchen,
            recipe,
            cancel,
            source_dir: extract_dir.clone(),
            work_dir,
            download_dir,
            extract_dir,
            context: None,
            steps_run: 0,
            from_cache: false,
            installed_files: 0,
        })
    }

    pub(super) fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub(super) fn log_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }

    /// Drive the recipe from `Pending` to `Done`
    pub(super) fn run(&mut self, tracker: &mut BuildTracker) -> Result<()> {
        self.prep(tracker)?;
        self.unpack()?;
        tracker.advance(BuildState::Fetched)?;

        self.patch()?;
        tracker.advance(BuildState::Patched)?;

        self.context = Some(BuildContext::new(
            self.kitchen,
            self.recipe,
            &self.work_dir,
            &self.source_dir,
        )?);

        tracker.advance(BuildState::Configuring)?;
        self.simmer(StepPhase::Configure)?;

        tracker.advance(BuildState::Building)?;
        self.simmer(StepPhase::Build)?;

        tracker.advance(BuildState::Installing)?;
        let before = prefix_files(&self.kitchen.config().prefix);
        self.simmer(StepPhase::Install)?;
        let after = prefix_files(&self.kitchen.config().prefix);
        self.installed_files = after.difference(&before).count();
        tracker.note(&format!("{} new file(s) in prefix", self.installed_files));

        tracker.advance(BuildState::Done)
    }

    /// Fetch the source archive and any remote patches
    fn prep(&mut self, tracker: &BuildTracker) -> Result<()> {
        let config = self.kitchen.config();
        let options = FetchOptions {
            retries: config.fetch_retries,
            retry_delay: config.retry_delay,
            cache_dir: config.source_cache.clone(),
        };

        if let Some(source) = self.recipe.source() {
            let dest = self.download_dir.join(source.filename());
            let fetched = fetch_verified(
                self.kitchen.fetcher(),
                source.urls(),
                source.checksum(),
                &dest,
                &options,
                self.cancel,
            )?;
            self.from_cache = fetched.from_cache;
            tracker.note(&format!(
                "fetched {} bytes{}",
                fetched.bytes,
                if fetched.from_cache { " from cache" } else { "" }
            ));
        }

        for (index, patch) in self.recipe.patches().iter().enumerate() {
            if let PatchOrigin::Remote { url, checksum } = patch.origin() {
                let dest = self.fetched_patch_path(index, patch.name());
                fetch_verified(
                    self.kitchen.fetcher(),
                    std::slice::from_ref(url),
                    checksum,
                    &dest,
                    &options,
                    self.cancel,
                )?;
                debug!("Fetched patch {}", patch.name());
            }
        }

        Ok(())
    }

    /// Where a remote patch is stored; the index keeps equal names apart
    fn fetched_patch_path(&self, index: usize, name: &str) -> PathBuf {
        self.work_dir
            .join("patches")
            .join(format!("{:02}-{}", index + 1, name))
    }

    /// Extract the verified archive into the working directory
    fn unpack(&mut self) -> Result<()> {
        self.cancel.check("extraction")?;
        let Some(source) = self.recipe.source() else {
            return Ok(());
        };

        let archive = self.download_dir.join(source.filename());
        let entries = extract_archive(&archive, &self.extract_dir)?;
        self.source_dir = source_root(&self.extract_dir, source.extract_dir())?;
        debug!(
            "Extracted {} entries; source root {}",
            entries,
            self.source_dir.display()
        );
        Ok(())
    }

    /// Apply patches in order, then transforms for this host
    fn patch(&mut self) -> Result<()> {
        for (index, patch) in self.recipe.patches().iter().enumerate() {
            self.cancel.check("patching")?;

            let text = match patch.origin() {
                PatchOrigin::Inline(text) => text.clone(),
                PatchOrigin::File(path) => fs::read_to_string(path).map_err(|e| {
                    Error::IoError(format!("Failed to read patch {}: {}", path.display(), e))
                })?,
                PatchOrigin::Remote { .. } => {
                    fs::read_to_string(self.fetched_patch_path(index, patch.name()))?
                }
            };

            info!("Applying patch: {}", patch.name());
            let touched = apply_patch(&self.source_dir, patch.name(), &text, patch.strip())?;
            debug!("{} touched {} file(s)", patch.name(), touched.len());
        }

        let cpu = self.kitchen.host().cpu;
        for transform in self.recipe.transforms() {
            if !transform.applies_to(cpu) {
                debug!(
                    "Skipping {} transform on {} for {} host",
                    transform.hook(),
                    transform.file(),
                    cpu
                );
                continue;
            }
            self.kitchen.transforms().apply(&self.source_dir, transform)?;
        }

        Ok(())
    }

    /// Run every step of one phase, in order
    fn simmer(&mut self, phase: StepPhase) -> Result<()> {
        let Some(context) = self.context.clone() else {
            return Err(Error::IoError("build context not prepared".to_string()));
        };

        for step in self.recipe.steps().iter().filter(|s| s.phase() == phase) {
            self.cancel.check(&format!("{} phase", phase))?;
            let resolved = context.resolve_step(self.recipe.name(), step)?;
            self.run_step(&context, &resolved)?;
        }

        Ok(())
    }

    /// Run one process to completion, streaming output to its log
    fn run_step(&mut self, context: &BuildContext, step: &ResolvedStep) -> Result<()> {
        let index = self.steps_run;
        self.steps_run += 1;

        let command_line = step.command_line();
        info!("[{}] {}", self.recipe.name(), command_line);

        let program = if step.program.contains('/') && Path::new(&step.program).is_relative() {
            context.source_dir.join(&step.program)
        } else {
            PathBuf::from(&step.program)
        };

        let log_path = context.log_dir.join(step.log_name(index));
        let mut log = File::create(&log_path)?;
        writeln!(log, "$ {}", command_line)?;
        let output = Arc::new(Mutex::new(StepOutput {
            log,
            tail: VecDeque::with_capacity(OUTPUT_TAIL_LINES),
        }));

        let mut command = Command::new(&program);
        command
            .args(&step.args)
            .current_dir(&context.source_dir)
            .envs(&context.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // own process group, so a kill reaches everything the step started
            command.process_group(0);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Err(Error::Build {
                    command: command_line,
                    exit_code: None,
                    output: vec![format!("failed to start {}: {}", program.display(), e)],
                });
            }
        };

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, Arc::clone(&output), self.recipe.name().to_string()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, Arc::clone(&output), self.recipe.name().to_string()));
        }

        let timeout = self.kitchen.config().step_timeout;
        let started = Instant::now();
        let end = loop {
            if self.cancel.is_cancelled() {
                kill_step(&mut child);
                break StepEnd::Cancelled;
            }
            if started.elapsed() >= timeout {
                kill_step(&mut child);
                break StepEnd::TimedOut;
            }
            if let Some(status) = child.wait_timeout(POLL_INTERVAL)? {
                break StepEnd::Exited(status);
            }
        };

        join_readers(readers, READER_GRACE);

        let mut tail: Vec<String> = output
            .lock()
            .map(|o| o.tail.iter().cloned().collect())
            .unwrap_or_default();

        match end {
            StepEnd::Exited(status) if status.success() => {
                debug!("{} finished in {:?}", command_line, started.elapsed());
                Ok(())
            }
            StepEnd::Exited(status) => {
                warn!("[{}] {} failed: {}", self.recipe.name(), command_line, status);
                Err(Error::Build {
                    command: command_line,
                    exit_code: status.code(),
                    output: tail,
                })
            }
            StepEnd::TimedOut => {
                tail.push(format!("timed out after {:?}", timeout));
                Err(Error::Build {
                    command: command_line,
                    exit_code: None,
                    output: tail,
                })
            }
            StepEnd::Cancelled => Err(Error::Cancelled(format!("`{}`", command_line))),
        }
    }
}

/// Regular files under the prefix, relative to it
fn prefix_files(prefix: &Path) -> BTreeSet<PathBuf> {
    WalkDir::new(prefix)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.path().strip_prefix(prefix).ok().map(Path::to_path_buf))
        .collect()
}
