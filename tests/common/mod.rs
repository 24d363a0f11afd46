//! Shared test utilities for integration tests.
//!
//! The centerpiece is [`FixtureInterface`], an in-memory backend whose
//! members come from a JSON file in `tests/data/`. It lets the job layer and
//! the facade be tested without external tools.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use archivist::{
    ArchiveInterface, CallbackPasswordProvider, Capabilities, CompressionOptions, Entry, Error,
    ExtractionOptions, InterfaceState, JobContext, JobEvent, Password, PasswordProvider, PasswordQuery, Result,
    validate_extract_path,
};
use async_trait::async_trait;
use serde::Deserialize;

/// Directory holding the fixture files.
pub fn data_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data")
}

/// One member of a fixture archive.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureEntry {
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl FixtureEntry {
    fn to_entry(&self) -> Entry {
        let mut entry = Entry::new(&self.path);
        entry.size = self.content.as_ref().map_or(self.size, |c| c.len() as u64);
        entry.is_password_protected = self.encrypted;
        entry.link = self.link.clone();
        entry
    }
}

/// The contents of a fixture file.
#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub comment: String,
    /// Password the encrypted members (or the member list) open with.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub header_encrypted: bool,
    #[serde(default)]
    pub corrupt: bool,
    pub entries: Vec<FixtureEntry>,
}

/// Loads `tests/data/<name>`.
pub fn load_fixture(name: &str) -> Fixture {
    let text = fs::read_to_string(data_dir().join(name)).expect("fixture exists");
    serde_json::from_str(&text).expect("fixture is valid JSON")
}

/// Calls made on a [`FixtureInterface`], shared with the test.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// An in-memory backend.
pub struct FixtureInterface {
    state: InterfaceState,
    fixture: Fixture,
    read_only: bool,
    calls: CallLog,
}

impl FixtureInterface {
    /// A read-write backend for `fixture`, pretending to live at `filename`.
    pub fn new(filename: impl Into<PathBuf>, fixture: Fixture) -> Self {
        Self {
            state: InterfaceState::new(filename),
            fixture,
            read_only: false,
            calls: Arc::default(),
        }
    }

    /// Loads the fixture `name` from `tests/data/`.
    pub fn from_data(name: &str) -> Self {
        Self::new(data_dir().join(name), load_fixture(name))
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// The call log, to inspect after the interface was handed to a job.
    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    /// Asks until the configured password matches the fixture's.
    async fn unlock(&mut self, ctx: &JobContext) -> Result<()> {
        let Some(expected) = self.fixture.password.clone() else {
            return Ok(());
        };
        loop {
            let retry = match &self.state.password {
                Some(given) if given.as_str() == expected => return Ok(()),
                Some(_) => true,
                None => false,
            };
            let answer = ctx.query_password(&self.state.filename, retry).await?;
            self.state.password = Some(answer);
        }
    }

    fn position(&self, full_path: &str) -> Option<usize> {
        let wanted = full_path.trim_end_matches('/');
        self.fixture
            .entries
            .iter()
            .position(|e| e.path.trim_end_matches('/') == wanted)
    }
}

fn is_below(path: &str, dir: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    let path = path.trim_end_matches('/');
    path == dir || path.starts_with(&format!("{dir}/"))
}

fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

#[async_trait]
impl ArchiveInterface for FixtureInterface {
    fn name(&self) -> &str {
        "fixture"
    }

    fn capabilities(&self) -> Capabilities {
        if self.read_only {
            Capabilities::read_only()
        } else {
            Capabilities::read_write()
        }
    }

    fn state(&self) -> &InterfaceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut InterfaceState {
        &mut self.state
    }

    fn is_read_only(&self) -> bool {
        self.read_only || self.is_corrupt()
    }

    async fn list(&mut self, ctx: &JobContext) -> Result<()> {
        self.record("list");
        if self.fixture.header_encrypted {
            self.unlock(ctx).await?;
            self.state.header_encryption = true;
        }
        self.state.comment = self.fixture.comment.clone();
        let total = self.fixture.entries.len().max(1) as f64;
        for (i, entry) in self.fixture.entries.iter().enumerate() {
            ctx.check_cancelled()?;
            ctx.entry(entry.to_entry());
            ctx.progress((i + 1) as f64 / total);
        }
        if self.fixture.corrupt {
            self.state.corrupt = true;
            ctx.error("The archive is damaged", None);
        }
        Ok(())
    }

    async fn copy_files(
        &mut self,
        files: &[Entry],
        destination: &Path,
        options: &ExtractionOptions,
        ctx: &JobContext,
    ) -> Result<()> {
        self.record(format!("copy {}", files.len()));
        let selected: Vec<FixtureEntry> = self
            .fixture
            .entries
            .iter()
            .filter(|e| files.is_empty() || files.iter().any(|f| is_below(&e.path, f.full_path())))
            .cloned()
            .collect();
        if selected.iter().any(|e| e.encrypted) || self.fixture.header_encrypted {
            self.unlock(ctx).await?;
        }

        for entry in &selected {
            ctx.check_cancelled()?;
            let relative = if options.preserve_paths {
                entry.path.as_str()
            } else {
                base_name(&entry.path)
            };
            let target = validate_extract_path(relative, destination, options.path_safety)?;
            if entry.path.ends_with('/') {
                if options.preserve_paths {
                    fs::create_dir_all(&target)?;
                }
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let content = entry
                .content
                .clone()
                .unwrap_or_else(|| "x".repeat(entry.size as usize));
            fs::write(&target, content)?;
        }
        Ok(())
    }

    async fn add_files(
        &mut self,
        files: &[Entry],
        destination: Option<&Entry>,
        options: &CompressionOptions,
        ctx: &JobContext,
    ) -> Result<()> {
        self.record(format!("add {}", files.len()));
        let prefix = destination.map(|d| d.full_path().to_string()).unwrap_or_default();
        for file in files {
            let source = options.resolve_source(file.full_path());
            let mut path = format!("{prefix}{}", base_name(file.full_path()));
            if file.is_dir() {
                path.push('/');
            }
            let size = fs::metadata(&source).map(|m| m.len()).unwrap_or(0);
            let added = FixtureEntry {
                path: path.clone(),
                size,
                encrypted: self.state.password.is_some(),
                link: None,
                content: fs::read_to_string(&source).ok(),
            };
            ctx.entry(added.to_entry());
            match self.position(&path) {
                Some(i) => self.fixture.entries[i] = added,
                None => self.fixture.entries.push(added),
            }
        }
        Ok(())
    }

    async fn delete_files(&mut self, files: &[Entry], ctx: &JobContext) -> Result<()> {
        self.record(format!("delete {}", files.len()));
        for file in files {
            if self.position(file.full_path()).is_none() {
                return Err(Error::EntryNotFound {
                    path: file.full_path().to_string(),
                });
            }
        }
        let mut kept = Vec::new();
        for entry in self.fixture.entries.drain(..) {
            if files.iter().any(|f| is_below(&entry.path, f.full_path())) {
                ctx.entry_removed(entry.path.clone());
            } else {
                kept.push(entry);
            }
        }
        self.fixture.entries = kept;
        Ok(())
    }

    async fn move_files(
        &mut self,
        files: &[Entry],
        destination: &Entry,
        _options: &CompressionOptions,
        ctx: &JobContext,
    ) -> Result<()> {
        self.record(format!("move {}", files.len()));
        let rename = files.len() == 1 && !destination.is_dir();
        for file in files {
            let from = file.full_path_without_trailing_slash().to_string();
            let to = if rename {
                destination.full_path_without_trailing_slash().to_string()
            } else {
                format!("{}{}", destination.full_path(), base_name(&from))
            };
            for entry in &mut self.fixture.entries {
                if is_below(&entry.path, &from) {
                    let renamed = format!("{to}{}", &entry.path[from.len()..]);
                    ctx.entry_removed(entry.path.clone());
                    entry.path = renamed;
                    ctx.entry(entry.to_entry());
                }
            }
        }
        Ok(())
    }
}

/// Writes `files` (relative path, content) below `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let target = root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(target, content).unwrap();
    }
}

/// Writes an uncompressed tar with raw member names, bypassing the tar
/// crate's path checks so hostile names can be stored.
pub fn write_raw_tar(path: &Path, members: &[(&str, &[u8])]) {
    let file = fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(file);
    for (name, data) in members {
        let mut header = tar::Header::new_old();
        let raw = name.as_bytes();
        header.as_old_mut().name[..raw.len()].copy_from_slice(raw);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, *data).unwrap();
    }
    builder.finish().unwrap();
}

/// A provider answering from a fixed list, then declining.
pub fn scripted_passwords(answers: &[&str]) -> Arc<dyn PasswordProvider> {
    let answers: Mutex<Vec<Password>> =
        Mutex::new(answers.iter().rev().map(|a| Password::new(*a)).collect());
    Arc::new(CallbackPasswordProvider::new(move |_query: &PasswordQuery| {
        answers.lock().unwrap().pop()
    }))
}

/// Names of the entries reported in `events`.
pub fn entry_paths(events: &[JobEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Entry(entry) => Some(entry.full_path().to_string()),
            _ => None,
        })
        .collect()
}
