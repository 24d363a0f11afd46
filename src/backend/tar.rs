//! Native tar backend.
//!
//! Reads and writes plain, gzip, bzip2 and xz compressed tarballs with the
//! `tar` crate. All work runs on the blocking thread pool and reports through
//! an [`EventSink`].
//!
//! Tar has no random access, so every mutation rewrites the archive: the new
//! archive is streamed into a temporary file next to the original and
//! atomically renamed over it once complete. A failed mutation leaves the
//! original untouched.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::DateTime;
use tar::EntryType;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::entry::Entry;
use crate::interface::{ArchiveInterface, Capabilities, EventSink, InterfaceState, JobContext};
use crate::options::{CompressionOptions, ExtractionOptions};
use crate::paths::{
    entries_without_children, entry_paths_from_destination, is_same_or_descendant,
    join_archive_path,
};
use crate::safety::{self, PathSafety};
use crate::{Error, Result};

use super::{Compression, stored_name};

/// Backend for tarballs.
#[derive(Debug)]
pub struct TarInterface {
    state: InterfaceState,
}

impl TarInterface {
    /// Creates a backend for `filename`, which need not exist yet.
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            state: InterfaceState::new(filename),
        }
    }

    fn compression(&self) -> Compression {
        if self.state.filename.exists() {
            Compression::detect(&self.state.filename)
        } else {
            Compression::from_path(&self.state.filename)
        }
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path, Compression) -> Result<T> + Send + 'static,
    {
        let path = self.state.filename.clone();
        let compression = self.compression();
        tokio::task::spawn_blocking(move || work(&path, compression))
            .await
            .map_err(|e| Error::failed_with_details("Archive worker failed", e.to_string()))?
    }
}

fn open_archive(path: &Path, compression: Compression) -> Result<tar::Archive<Box<dyn Read>>> {
    let file = BufReader::new(File::open(path)?);
    Ok(tar::Archive::new(compression.decoder(file)?))
}

/// The member's archive path: no `./` prefix, a trailing slash for
/// directories only.
fn member_path<R: Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let raw = entry.path()?;
    let mut path = raw.to_string_lossy().replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    if entry.header().entry_type().is_dir() {
        if !path.is_empty() && !path.ends_with('/') {
            path.push('/');
        }
    } else {
        path = path.trim_end_matches('/').to_string();
    }
    Ok(path)
}

/// Normalized name of the member a link points to.
fn link_target<R: Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let raw = entry
        .link_name()?
        .map(|l| l.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();
    let mut target = raw.as_str();
    while let Some(rest) = target.strip_prefix("./") {
        target = rest;
    }
    Ok(target.trim_end_matches('/').to_string())
}

/// Every member some hard link in the archive points to.
fn hard_link_targets(path: &Path, compression: Compression) -> Result<HashSet<String>> {
    let mut archive = open_archive(path, compression)?;
    let mut targets = HashSet::new();
    for item in archive.entries()? {
        let item = item?;
        if item.header().entry_type().is_hard_link() {
            targets.insert(link_target(&item)?);
        }
    }
    Ok(targets)
}

fn is_metadata(kind: EntryType) -> bool {
    matches!(
        kind,
        EntryType::XGlobalHeader | EntryType::XHeader | EntryType::GNULongName | EntryType::GNULongLink
    )
}

fn to_entry<R: Read>(entry: &tar::Entry<'_, R>) -> Result<Option<Entry>> {
    let header = entry.header();
    let kind = header.entry_type();
    if is_metadata(kind) {
        return Ok(None);
    }
    let path = member_path(entry)?;
    if path.is_empty() {
        return Ok(None);
    }

    let mut result = Entry::new(path);
    if !kind.is_dir() {
        result.size = entry.size();
    }
    result.timestamp = header
        .mtime()
        .ok()
        .and_then(|t| DateTime::from_timestamp(t as i64, 0))
        .map(|d| d.naive_utc());
    if kind.is_symlink() || kind.is_hard_link() {
        result.link = entry.link_name()?.map(|l| l.to_string_lossy().into_owned());
    }
    if let Ok(mode) = header.mode() {
        result.set_property("permissions", format!("{:o}", mode & 0o7777));
    }
    if let Ok(Some(user)) = header.username() {
        if !user.is_empty() {
            result.set_property("owner", user);
        }
    }
    Ok(Some(result))
}

/// Streams every member to `sink`.
///
/// Returns the read error if the archive ended abnormally after at least one
/// member.
fn read_members(path: &Path, compression: Compression, sink: &EventSink) -> Result<Option<String>> {
    let mut archive = open_archive(path, compression)?;
    let mut seen = 0usize;
    let damaged = |seen: usize, e: io::Error| -> Result<Option<String>> {
        if seen == 0 {
            Err(Error::ArchiveCorrupt {
                reason: e.to_string(),
            })
        } else {
            Ok(Some(e.to_string()))
        }
    };

    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(e) => return damaged(0, e),
    };
    for item in entries {
        sink.check_cancelled()?;
        let item = match item {
            Ok(item) => item,
            Err(e) => return damaged(seen, e),
        };
        if let Some(entry) = to_entry(&item)? {
            seen += 1;
            sink.entry(entry);
        }
    }
    Ok(None)
}

/// Every member path, plus the directories implied by them.
fn member_paths(path: &Path, compression: Compression) -> Result<(Vec<Entry>, HashSet<String>)> {
    let mut archive = open_archive(path, compression)?;
    let mut entries = Vec::new();
    let mut known = HashSet::new();
    for item in archive.entries()? {
        let item = item?;
        if let Some(entry) = to_entry(&item)? {
            let mut path = entry.full_path_without_trailing_slash();
            known.insert(path.to_string());
            while let Some((parent, _)) = path.rsplit_once('/') {
                known.insert(parent.to_string());
                path = parent;
            }
            entries.push(entry);
        }
    }
    Ok((entries, known))
}

fn ensure_exist(files: &[Entry], known: &HashSet<String>) -> Result<()> {
    for file in files {
        if !known.contains(file.full_path_without_trailing_slash()) {
            return Err(Error::EntryNotFound {
                path: file.full_path().to_string(),
            });
        }
    }
    Ok(())
}

/// Finds the requested member `path` belongs to, if any.
fn requested_by<'a>(path: &str, files: &'a [Entry]) -> Option<&'a Entry> {
    files.iter().find(|f| {
        if f.is_dir() {
            is_same_or_descendant(path, f.full_path())
        } else {
            path.trim_end_matches('/') == f.full_path()
        }
    })
}

fn remove_existing(target: &Path) -> io::Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() && !meta.file_type().is_symlink() => Ok(()),
        Ok(_) => fs::remove_file(target),
        Err(_) => Ok(()),
    }
}

fn extract(
    path: &Path,
    compression: Compression,
    files: &[Entry],
    destination: &Path,
    options: &ExtractionOptions,
    sink: &EventSink,
) -> Result<()> {
    let mut archive = open_archive(path, compression)?;
    archive.set_preserve_permissions(false);
    let mut extracted: HashMap<String, PathBuf> = HashMap::new();
    let mut matched: HashSet<String> = HashSet::new();

    for item in archive.entries()? {
        sink.check_cancelled()?;
        let mut item = item?;
        let kind = item.header().entry_type();
        if is_metadata(kind) {
            continue;
        }
        let member = member_path(&item)?;
        if member.is_empty() {
            continue;
        }

        let requested = if files.is_empty() {
            None
        } else {
            match requested_by(&member, files) {
                Some(f) => Some(f),
                None => continue,
            }
        };
        if let Some(f) = requested {
            matched.insert(f.full_path().to_string());
        }

        let relative = if !options.preserve_paths {
            if kind.is_dir() {
                continue;
            }
            member.rsplit('/').next().unwrap_or(&member).to_string()
        } else {
            match requested.and_then(|f| f.root_node.as_deref()).filter(|r| !r.is_empty()) {
                Some(root) if is_same_or_descendant(&member, root) => {
                    let root = root.trim_end_matches('/');
                    member[root.len()..].trim_start_matches('/').to_string()
                }
                _ => member.clone(),
            }
        };
        if relative.trim_end_matches('/').is_empty() {
            continue;
        }

        let target = safety::validate_extract_path(&relative, destination, options.path_safety)?;
        if kind.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        remove_existing(&target)?;

        if kind.is_symlink() {
            let link = item
                .link_name()?
                .map(|l| l.to_string_lossy().into_owned())
                .unwrap_or_default();
            if options.path_safety != PathSafety::Disabled {
                safety::validate_symlink_target(&relative, &link)?;
            }
            safety::create_symlink(&target, &link)?;
        } else if kind.is_hard_link() {
            let link = item
                .link_name()?
                .map(|l| l.to_string_lossy().trim_start_matches("./").to_string())
                .unwrap_or_default();
            match extracted.get(&link) {
                Some(original) => {
                    fs::copy(original, &target)?;
                }
                None => log::warn!("hard link {member} points to unextracted {link}"),
            }
        } else {
            item.unpack(&target)?;
        }
        extracted.insert(member, target);
    }

    if let Some(missing) = files.iter().find(|f| !matched.contains(f.full_path())) {
        return Err(Error::EntryNotFound {
            path: missing.full_path().to_string(),
        });
    }
    sink.progress(1.0);
    Ok(())
}

/// A new member taken from the filesystem.
struct NewMember {
    name: String,
    source: PathBuf,
    is_dir: bool,
}

fn collect_new_members(
    files: &[Entry],
    destination: &str,
    options: &CompressionOptions,
) -> Result<Vec<NewMember>> {
    let mut members = Vec::new();
    for file in files {
        let source = options.resolve_source(file.full_path());
        let base = join_archive_path(destination, stored_name(file.full_path()).trim_end_matches('/'));
        if base.is_empty() {
            return Err(Error::InvalidEntry(format!("cannot add {}", file.full_path())));
        }
        let meta = fs::symlink_metadata(&source)?;
        if !meta.is_dir() {
            members.push(NewMember {
                name: base,
                source,
                is_dir: false,
            });
            continue;
        }
        for item in WalkDir::new(&source).follow_links(false).sort_by_file_name() {
            let item = item.map_err(io::Error::from)?;
            let relative = item
                .path()
                .strip_prefix(&source)
                .map_err(io::Error::other)?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let name = if relative.is_empty() {
                base.clone()
            } else {
                format!("{base}/{relative}")
            };
            let is_dir = item.file_type().is_dir();
            members.push(NewMember {
                name: if is_dir { format!("{name}/") } else { name },
                source: item.path().to_path_buf(),
                is_dir,
            });
        }
    }
    Ok(members)
}

/// Streams the existing members through `rename` into a fresh archive,
/// appends `additions`, and replaces the original.
///
/// `rename` returns the new path of a member, or `None` to drop it.
fn rewrite(
    path: &Path,
    compression: Compression,
    level: Option<u32>,
    mut rename: impl FnMut(&str) -> Option<String>,
    additions: &[NewMember],
    sink: &EventSink,
) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let tmp = NamedTempFile::new_in(&dir)?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions())?;
    }
    let writer = compression.encoder(BufWriter::new(tmp.reopen()?), level)?;
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    if path.exists() {
        let link_targets = hard_link_targets(path, compression)?;
        // Contents of dropped members that surviving hard links still need.
        let mut orphaned: HashMap<String, (tar::Header, Vec<u8>)> = HashMap::new();
        // The member now holding the contents of a dropped link target.
        let mut relinked: HashMap<String, String> = HashMap::new();

        let mut archive = open_archive(path, compression)?;
        for item in archive.entries()? {
            sink.check_cancelled()?;
            let mut item = item?;
            let kind = item.header().entry_type();
            if is_metadata(kind) {
                continue;
            }
            let member = member_path(&item)?;
            let Some(new_path) = rename(&member) else {
                if kind.is_file() && link_targets.contains(&member) {
                    let header = item.header().clone();
                    let mut data = Vec::new();
                    item.read_to_end(&mut data)?;
                    orphaned.insert(member, (header, data));
                }
                continue;
            };
            let mut header = item.header().clone();
            if kind.is_hard_link() {
                let target = link_target(&item)?;
                if let Some(first) = relinked.get(&target) {
                    builder.append_link(&mut header, &new_path, first)?;
                } else if let Some((mut data_header, data)) = orphaned.remove(&target) {
                    // The first surviving link takes over the contents.
                    builder.append_data(&mut data_header, &new_path, data.as_slice())?;
                    relinked.insert(target, new_path);
                } else if let Some(moved) = rename(&target) {
                    builder.append_link(&mut header, &new_path, &moved)?;
                } else {
                    log::warn!("dropping hard link {member}: {target} is not in the archive");
                }
            } else if kind.is_symlink() {
                let target = item.link_name()?.map(|l| l.into_owned()).unwrap_or_default();
                builder.append_link(&mut header, &new_path, &target)?;
            } else {
                builder.append_data(&mut header, &new_path, item)?;
            }
        }
    }

    for member in additions {
        sink.check_cancelled()?;
        if member.is_dir {
            builder.append_dir(member.name.trim_end_matches('/'), &member.source)?;
        } else {
            builder.append_path_with_name(&member.source, &member.name)?;
        }
    }

    let writer = builder.into_inner()?;
    let mut file = writer.finish()?;
    io::Write::flush(&mut file)?;
    drop(file);
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    sink.progress(1.0);
    Ok(())
}

#[async_trait]
impl ArchiveInterface for TarInterface {
    fn name(&self) -> &str {
        "tar"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::read_write()
    }

    fn state(&self) -> &InterfaceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut InterfaceState {
        &mut self.state
    }

    async fn list(&mut self, ctx: &JobContext) -> Result<()> {
        if !self.state.filename.exists() {
            return Ok(());
        }
        let sink = ctx.sink();
        let damage = self
            .blocking(move |path, compression| read_members(path, compression, &sink))
            .await?;
        if let Some(reason) = damage {
            self.state.corrupt = true;
            ctx.error("The archive is damaged and was opened read-only", Some(reason));
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
        let files = files.to_vec();
        let destination = destination.to_path_buf();
        let options = options.clone();
        let sink = ctx.sink();
        self.blocking(move |path, compression| {
            extract(path, compression, &files, &destination, &options, &sink)
        })
        .await
    }

    async fn add_files(
        &mut self,
        files: &[Entry],
        destination: Option<&Entry>,
        options: &CompressionOptions,
        ctx: &JobContext,
    ) -> Result<()> {
        let destination = destination.map(|d| d.full_path().to_string()).unwrap_or_default();
        let additions = collect_new_members(files, &destination, options)?;
        let level = options.compression_level;
        let sink = ctx.sink();
        self.blocking(move |path, compression| {
            let replaced: HashSet<&str> = additions
                .iter()
                .map(|m| m.name.trim_end_matches('/'))
                .collect();
            rewrite(
                path,
                compression,
                level,
                |member| (!replaced.contains(member.trim_end_matches('/'))).then(|| member.to_string()),
                &additions,
                &sink,
            )
        })
        .await
    }

    async fn delete_files(&mut self, files: &[Entry], ctx: &JobContext) -> Result<()> {
        let files = files.to_vec();
        let sink = ctx.sink();
        self.blocking(move |path, compression| {
            let (_, known) = member_paths(path, compression)?;
            ensure_exist(&files, &known)?;
            rewrite(
                path,
                compression,
                None,
                |member| requested_by(member, &files).is_none().then(|| member.to_string()),
                &[],
                &sink,
            )
        })
        .await
    }

    async fn move_files(
        &mut self,
        files: &[Entry],
        destination: &Entry,
        _options: &CompressionOptions,
        ctx: &JobContext,
    ) -> Result<()> {
        let files = files.to_vec();
        let destination = destination.full_path().to_string();
        let sink = ctx.sink();
        self.blocking(move |path, compression| {
            let (entries, known) = member_paths(path, compression)?;
            ensure_exist(&files, &known)?;

            let mut affected: Vec<String> = files.iter().map(|f| f.full_path().to_string()).collect();
            affected.extend(
                entries
                    .iter()
                    .filter(|e| requested_by(e.full_path(), &files).is_some())
                    .map(|e| e.full_path().to_string()),
            );
            affected.sort();
            affected.dedup();

            let top_level = entries_without_children(&files);
            let new_paths = entry_paths_from_destination(&affected, &destination, top_level.len());
            let renames: HashMap<String, String> = affected
                .into_iter()
                .zip(new_paths)
                .map(|(old, new)| (old.trim_end_matches('/').to_string(), new))
                .collect();
            let targets: HashSet<String> = renames
                .values()
                .map(|n| n.trim_end_matches('/').to_string())
                .collect();

            rewrite(
                path,
                compression,
                None,
                |member| {
                    let key = member.trim_end_matches('/');
                    match renames.get(key) {
                        Some(new) => Some(new.clone()),
                        // Members overwritten by the move are dropped.
                        None if targets.contains(key) => None,
                        None => Some(member.to_string()),
                    }
                },
                &[],
                &sink,
            )
        })
        .await
    }
}
