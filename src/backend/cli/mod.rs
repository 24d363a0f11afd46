//! Adapter for command-line archivers.
//!
//! A [`CliInterface`] is configured by a [`ParameterList`] (programs,
//! argument templates, output patterns) and a [`ListParser`] that turns the
//! tool's listing output into entries, one line at a time.
//!
//! Every operation spawns one process (a synthesized move spawns three) and
//! classifies its output:
//!
//! - a password prompt stops the process, asks the job's password provider
//!   and runs the operation again with the answer,
//! - a rejected password asks again, flagged as a retry,
//! - damage marks the archive corrupt (and read-only) but keeps the entries
//!   listed so far,
//! - a non-zero exit fails the operation with the output tail as details.
//!
//! Operations that rewrite the archive snapshot it first and put the
//! snapshot back when the tool fails.

pub mod params;
mod process;
mod rar;
mod sevenzip;
mod unarchiver;

pub use params::{ExitCodes, ParameterList};
pub use rar::RarParser;
pub use sevenzip::SevenZipParser;
pub use unarchiver::UnarchiverParser;

use std::collections::{BTreeSet, HashSet};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::entry::Entry;
use crate::interface::{ArchiveInterface, Capabilities, InterfaceState, JobContext};
use crate::options::{CompressionOptions, ExtractionOptions};
use crate::paths::{
    entries_without_children, entry_paths_from_destination, is_same_or_descendant,
    join_archive_path,
};
use crate::safety::{self, PathSafety};
use crate::{Error, Result};

use super::{ArchiveBackup, copy_recursively, move_file, stored_name};
use process::{Patterns, ProcessOutput};

/// Turns a tool's listing output into entries.
///
/// The parser is a state machine fed one line at a time; it is reset before
/// every listing.
pub trait ListParser: Send + Sync {
    /// Forgets everything from a previous listing.
    fn reset(&mut self);

    /// Consumes one output line, pushing completed entries to `entries`.
    ///
    /// Returns `false` if the output cannot be parsed at all, which aborts
    /// the listing.
    fn read_line(&mut self, line: &str, entries: &mut Vec<Entry>) -> bool;

    /// Called after the last line. Pushes any pending entry.
    fn finish(&mut self, _entries: &mut Vec<Entry>) -> bool {
        true
    }

    /// The archive comment seen in the output.
    fn comment(&self) -> &str {
        ""
    }

    /// Whether the output reported damage.
    fn is_corrupt(&self) -> bool {
        false
    }

    /// Whether the output reported an encrypted member list.
    fn is_header_encrypted(&self) -> bool {
        false
    }
}

/// Feeds a complete listing to `parser` and returns the entries.
///
/// ```rust
/// use archivist::backend::cli::{parse_listing, SevenZipParser};
///
/// let output = "7-Zip 16.02\n\nListing archive: a.7z\n\n--\nPath = a.7z\nType = 7z\n\n\
///               ----------\nPath = a.txt\nSize = 3\n\n";
/// let entries = parse_listing(&mut SevenZipParser::new(), output).unwrap();
/// assert_eq!(entries[0].full_path(), "a.txt");
/// ```
pub fn parse_listing(parser: &mut dyn ListParser, output: &str) -> Result<Vec<Entry>> {
    parser.reset();
    let mut entries = Vec::new();
    for line in output.lines() {
        if !parser.read_line(line, &mut entries) {
            return Err(Error::failed_with_details(
                "Could not parse the archive listing",
                line,
            ));
        }
    }
    if !parser.finish(&mut entries) {
        return Err(Error::failed("Could not parse the archive listing"));
    }
    Ok(entries)
}

/// Where parsed entries go.
enum Sink<'a> {
    Job(&'a JobContext),
    Collect(&'a mut Vec<Entry>),
}

impl Sink<'_> {
    fn deliver(&mut self, batch: Vec<Entry>) {
        match self {
            Sink::Job(ctx) => batch.into_iter().for_each(|e| ctx.entry(e)),
            Sink::Collect(all) => all.extend(batch),
        }
    }
}

/// Backend driving an external archiver.
pub struct CliInterface {
    name: String,
    state: InterfaceState,
    params: ParameterList,
    patterns: Patterns,
    parser: Box<dyn ListParser>,
    search_path: Option<OsString>,
}

impl CliInterface {
    /// Creates an adapter for `filename` from a tool description.
    ///
    /// Fails if one of the output patterns is not a valid regex.
    pub fn new(
        name: impl Into<String>,
        filename: impl Into<PathBuf>,
        params: ParameterList,
        parser: Box<dyn ListParser>,
    ) -> Result<Self> {
        let patterns = Patterns::compile(&params)?;
        Ok(Self {
            name: name.into(),
            state: InterfaceState::new(filename),
            params,
            patterns,
            parser,
            search_path: None,
        })
    }

    /// RAR archives through `unrar`/`rar`.
    pub fn rar(filename: impl Into<PathBuf>) -> Result<Self> {
        Self::new("clirar", filename, rar::parameters(), Box::new(RarParser::new()))
    }

    /// 7z (and the formats 7-Zip handles) through `7z`.
    pub fn seven_zip(filename: impl Into<PathBuf>) -> Result<Self> {
        Self::new(
            "cli7z",
            filename,
            sevenzip::parameters(),
            Box::new(SevenZipParser::new()),
        )
    }

    /// Read-only access through `lsar`/`unar`.
    pub fn unarchiver(filename: impl Into<PathBuf>) -> Result<Self> {
        Self::new(
            "cliunarchiver",
            filename,
            unarchiver::parameters(),
            Box::new(UnarchiverParser::new()),
        )
    }

    /// Looks up programs in `path` (a `PATH`-style list) instead of `PATH`.
    pub fn search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// Drops write support, leaving list and extract.
    pub fn read_only(mut self) -> Self {
        self.params.add_programs.clear();
        self
    }

    /// The tool description.
    pub fn parameters(&self) -> &ParameterList {
        &self.params
    }

    fn program(&self, candidates: &[String]) -> Result<PathBuf> {
        candidates
            .iter()
            .find_map(|name| match &self.search_path {
                Some(path) => crate::plugin::find_executable_in(name, path),
                None => crate::plugin::find_executable(name),
            })
            .ok_or_else(|| Error::PluginLoadFailed {
                plugin: self.name.clone(),
                reason: format!("none of {candidates:?} found"),
            })
    }

    fn has_password(&self) -> bool {
        self.state.password.as_ref().is_some_and(|p| !p.is_empty())
    }

    async fn ask_password(&mut self, ctx: &JobContext, incorrect_try_again: bool) -> Result<()> {
        self.state.password = None;
        let password = ctx
            .query_password(&self.state.filename, incorrect_try_again)
            .await?;
        self.state.password = Some(password);
        Ok(())
    }

    /// Lists the archive, asking for a password as often as needed.
    async fn run_listing(&mut self, ctx: &JobContext, mut sink: Sink<'_>) -> Result<()> {
        let program = self.program(&self.params.list_programs)?;
        loop {
            self.parser.reset();
            let args = self
                .params
                .substitute_list_variables(&self.state.filename, self.state.password.as_ref());
            let mut emitted = 0usize;

            let output = {
                let parser = &mut self.parser;
                let sink = &mut sink;
                let emitted = &mut emitted;
                process::run(&program, &args, None, &self.patterns, ctx, |line| {
                    let mut batch = Vec::new();
                    if !parser.read_line(line, &mut batch) {
                        return Err(Error::failed_with_details(
                            "Could not parse the archive listing",
                            line,
                        ));
                    }
                    *emitted += batch.len();
                    sink.deliver(batch);
                    Ok(())
                })
                .await?
            };

            let mut batch = Vec::new();
            let parsed = self.parser.finish(&mut batch);
            emitted += batch.len();
            sink.deliver(batch);

            let code = output.exit_code;
            let codes = self.params.list_exit_codes;
            let coded = |c: Option<i32>| c.is_some() && code == c;
            let has_password = self.has_password();
            let needs_password = output.password_prompt
                || coded(codes.password_required)
                || (!has_password && output.wrong_password);
            let wrong_password =
                has_password && (output.wrong_password || coded(codes.wrong_password));

            if (needs_password || wrong_password) && emitted == 0 {
                log::debug!(
                    "{}: listing needs a password (retry: {wrong_password})",
                    self.name
                );
                self.ask_password(ctx, wrong_password).await?;
                self.state.header_encryption = true;
                continue;
            }
            if !parsed {
                return Err(Error::failed_with_details(
                    "Could not parse the archive listing",
                    output.details(),
                ));
            }

            self.state.comment = self.parser.comment().to_string();
            if self.parser.is_header_encrypted() {
                self.state.header_encryption = true;
            }
            let corrupt = output.corrupt || self.parser.is_corrupt();
            if corrupt {
                self.state.corrupt = true;
                ctx.error(
                    "The archive is damaged and was opened read-only",
                    Some(output.details()),
                );
            }
            if !output.success() {
                if corrupt && emitted > 0 {
                    return Ok(());
                }
                if corrupt {
                    return Err(Error::ArchiveCorrupt {
                        reason: output.details(),
                    });
                }
                return Err(Error::failed_with_details(
                    "Listing the archive failed",
                    output.details(),
                ));
            }
            return Ok(());
        }
    }

    async fn listed_entries(&mut self, ctx: &JobContext) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        self.run_listing(ctx, Sink::Collect(&mut entries)).await?;
        Ok(entries)
    }

    async fn run_checked(
        &self,
        program: &Path,
        args: &[String],
        working_dir: Option<&Path>,
        ctx: &JobContext,
        what: &str,
    ) -> Result<ProcessOutput> {
        let output = process::run(program, args, working_dir, &self.patterns, ctx, |_| Ok(())).await?;
        if output.failure.is_some() || !output.success() {
            return Err(Error::failed_with_details(
                format!("{what} failed"),
                output.details(),
            ));
        }
        Ok(output)
    }

    async fn add_inner(
        &mut self,
        files: &[Entry],
        destination: Option<&Entry>,
        options: &CompressionOptions,
        ctx: &JobContext,
    ) -> Result<()> {
        let program = self.program(&self.params.add_programs)?;
        let trim = |name: String| {
            if self.params.no_trailing_slashes {
                name.trim_end_matches('/').to_string()
            } else {
                name
            }
        };

        for file in files {
            let source = options.resolve_source(file.full_path());
            if fs::symlink_metadata(&source).is_err() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} does not exist", source.display()),
                )));
            }
        }

        let mut staging = None;
        let mut names = Vec::with_capacity(files.len());
        let work_dir = match destination.map(Entry::full_path).filter(|d| !d.is_empty()) {
            Some(dest) => {
                // Tools store paths relative to their working directory, so
                // the sources are laid out below the destination first.
                fs::create_dir_all(ctx.scratch_dir())?;
                let dir = tempfile::Builder::new()
                    .prefix("add-")
                    .tempdir_in(ctx.scratch_dir())?;
                for file in files {
                    let stored = join_archive_path(dest, &stored_name(file.full_path()));
                    let target = dir.path().join(stored.trim_end_matches('/'));
                    copy_recursively(&options.resolve_source(file.full_path()), &target)?;
                    names.push(trim(stored));
                }
                let path = dir.path().to_path_buf();
                staging = Some(dir);
                Some(path)
            }
            None => {
                names.extend(files.iter().map(|f| trim(f.full_path().to_string())));
                options.global_work_dir.clone()
            }
        };

        let encrypt_header = self.state.header_encryption && self.has_password();
        let args = self.params.substitute_add_variables(
            &self.state.filename,
            &names,
            self.state.password.as_ref(),
            encrypt_header,
            options.compression_level,
        );
        self.run_checked(&program, &args, work_dir.as_deref(), ctx, "Adding files")
            .await?;
        drop(staging);
        ctx.progress(1.0);
        Ok(())
    }

    /// Verifies that every requested member exists and returns the
    /// requested members plus everything listed below them.
    async fn affected_paths(&mut self, files: &[Entry], ctx: &JobContext) -> Result<(Vec<String>, HashSet<String>)> {
        let listed = self.listed_entries(ctx).await?;
        let mut known: HashSet<String> = HashSet::new();
        let mut listed_paths: HashSet<String> = HashSet::new();
        for entry in &listed {
            let path = entry.full_path_without_trailing_slash();
            listed_paths.insert(path.to_string());
            let mut ancestor = path;
            while let Some((parent, _)) = ancestor.rsplit_once('/') {
                known.insert(parent.to_string());
                ancestor = parent;
            }
            known.insert(path.to_string());
        }
        for file in files {
            if !known.contains(file.full_path_without_trailing_slash()) {
                return Err(Error::EntryNotFound {
                    path: file.full_path().to_string(),
                });
            }
        }

        let mut affected: BTreeSet<String> = files.iter().map(|f| f.full_path().to_string()).collect();
        for entry in &listed {
            if files
                .iter()
                .any(|f| f.is_dir() && is_same_or_descendant(entry.full_path(), f.full_path()))
            {
                affected.insert(entry.full_path().to_string());
            }
        }
        Ok((affected.into_iter().collect(), listed_paths))
    }

    async fn synthesized_move(
        &mut self,
        top_level: &[Entry],
        pairs: &[(String, String)],
        options: &CompressionOptions,
        ctx: &JobContext,
    ) -> Result<()> {
        fs::create_dir_all(ctx.scratch_dir())?;
        let extracted = tempfile::Builder::new()
            .prefix("move-")
            .tempdir_in(ctx.scratch_dir())?;
        let extract_options = ExtractionOptions::new()
            .preserve_paths(true)
            .path_safety(PathSafety::Strict);
        ArchiveInterface::copy_files(self, top_level, extracted.path(), &extract_options, ctx)
            .await?;
        ctx.step_finished();

        let staged = tempfile::Builder::new()
            .prefix("stage-")
            .tempdir_in(ctx.scratch_dir())?;
        for (old, new) in pairs {
            let target = safety::validate_extract_path(new, staged.path(), PathSafety::Strict)?;
            if old.ends_with('/') {
                fs::create_dir_all(&target)?;
                continue;
            }
            let source = extracted.path().join(old);
            if fs::symlink_metadata(&source).is_ok() {
                move_file(&source, &target)?;
            }
        }

        self.delete_inner(top_level, ctx).await?;
        ctx.step_finished();

        let moved: Vec<Entry> = top_level
            .iter()
            .filter_map(|e| {
                pairs
                    .iter()
                    .find(|(old, _)| old == e.full_path())
                    .map(|(_, new)| Entry::new(new.clone()))
            })
            .collect();
        let mut add_options = CompressionOptions::new().global_work_dir(staged.path());
        add_options.compression_level = options.compression_level;
        self.add_inner(&moved, None, &add_options, ctx).await
    }

    /// Runs the tool's delete command. The caller holds the backup.
    async fn delete_inner(&mut self, files: &[Entry], ctx: &JobContext) -> Result<()> {
        let program = self.program(&self.params.add_programs)?;
        let args = self.params.substitute_delete_variables(
            &self.state.filename,
            files,
            self.state.password.as_ref(),
        );
        self.run_checked(&program, &args, None, ctx, "Deleting files")
            .await
            .map(|_| ())
    }
}

impl std::fmt::Debug for CliInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliInterface")
            .field("name", &self.name)
            .field("filename", &self.state.filename)
            .finish_non_exhaustive()
    }
}

/// Places files extracted to a scratch directory at their final location.
///
/// With `preserve_paths` unset every file lands directly in `destination`;
/// otherwise root nodes are stripped from the relative paths.
fn move_extracted(
    scratch: &Path,
    destination: &Path,
    files: &[Entry],
    options: &ExtractionOptions,
) -> Result<()> {
    let roots: Vec<&str> = files
        .iter()
        .filter_map(|f| f.root_node.as_deref())
        .map(|r| r.trim_end_matches('/'))
        .filter(|r| !r.is_empty())
        .collect();

    let items = WalkDir::new(scratch)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(io::Error::from)?;

    for item in items {
        let relative = item
            .path()
            .strip_prefix(scratch)
            .map_err(io::Error::other)?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let is_dir = item.file_type().is_dir();

        let target = if !options.preserve_paths {
            if is_dir {
                continue;
            }
            item.file_name().to_string_lossy().into_owned()
        } else {
            match roots.iter().find(|r| is_same_or_descendant(&relative, r)) {
                Some(root) => relative[root.len()..].trim_start_matches('/').to_string(),
                None => relative,
            }
        };
        if target.is_empty() {
            continue;
        }

        let target = safety::validate_extract_path(&target, destination, options.path_safety)?;
        if is_dir {
            fs::create_dir_all(&target)?;
        } else {
            move_file(item.path(), &target)?;
        }
    }
    Ok(())
}

#[async_trait]
impl ArchiveInterface for CliInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        if self.params.add_programs.is_empty() {
            Capabilities::read_only().cli()
        } else {
            Capabilities::read_write().cli()
        }
    }

    fn state(&self) -> &InterfaceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut InterfaceState {
        &mut self.state
    }

    fn move_required_signals(&self) -> usize {
        if self.params.move_args.is_some() { 1 } else { 3 }
    }

    async fn list(&mut self, ctx: &JobContext) -> Result<()> {
        if !self.state.filename.exists() {
            // A new archive, created by the first add.
            return Ok(());
        }
        self.run_listing(ctx, Sink::Job(ctx)).await
    }

    async fn copy_files(
        &mut self,
        files: &[Entry],
        destination: &Path,
        options: &ExtractionOptions,
        ctx: &JobContext,
    ) -> Result<()> {
        let program = self.program(&self.params.extract_programs)?;
        if options.password_protected_hint && !self.has_password() {
            self.ask_password(ctx, false).await?;
        }

        let has_root_nodes = files
            .iter()
            .any(|f| f.root_node.as_deref().is_some_and(|r| !r.is_empty()));
        let manual_flatten = !options.preserve_paths && self.params.preserve_path_switch.is_none();
        let staged = options.always_use_tmp_dir
            || self.params.extract_in_tmp_dir
            || has_root_nodes
            || manual_flatten;
        let tool_preserves = options.preserve_paths || manual_flatten;

        let scratch = if staged {
            fs::create_dir_all(ctx.scratch_dir())?;
            Some(
                tempfile::Builder::new()
                    .prefix("extract-")
                    .tempdir_in(ctx.scratch_dir())?,
            )
        } else {
            None
        };
        let work_dir = scratch.as_ref().map_or(destination, |d| d.path());

        loop {
            let args = self.params.substitute_copy_variables(
                &self.state.filename,
                files,
                tool_preserves,
                self.state.password.as_ref(),
            );
            let output =
                process::run(&program, &args, Some(work_dir), &self.patterns, ctx, |_| Ok(())).await?;
            if output.password_prompt || output.wrong_password {
                let retry = self.has_password();
                self.ask_password(ctx, retry).await?;
                continue;
            }
            if output.corrupt {
                self.state.corrupt = true;
            }
            if output.failure.is_some() || !output.success() {
                return Err(Error::failed_with_details(
                    "Extraction failed",
                    output.details(),
                ));
            }
            break;
        }

        if let Some(scratch) = scratch {
            move_extracted(scratch.path(), destination, files, options)?;
        }
        ctx.progress(1.0);
        Ok(())
    }

    async fn add_files(
        &mut self,
        files: &[Entry],
        destination: Option<&Entry>,
        options: &CompressionOptions,
        ctx: &JobContext,
    ) -> Result<()> {
        let backup = ArchiveBackup::take(&self.state.filename, ctx.scratch_dir())?;
        let result = self.add_inner(files, destination, options, ctx).await;
        backup.settle(result)
    }

    async fn delete_files(&mut self, files: &[Entry], ctx: &JobContext) -> Result<()> {
        self.program(&self.params.add_programs)?;
        self.affected_paths(files, ctx).await?;

        let backup = ArchiveBackup::take(&self.state.filename, ctx.scratch_dir())?;
        let result = self.delete_inner(files, ctx).await;
        backup.settle(result)
    }

    async fn move_files(
        &mut self,
        files: &[Entry],
        destination: &Entry,
        options: &CompressionOptions,
        ctx: &JobContext,
    ) -> Result<()> {
        let program = self.program(&self.params.add_programs)?;
        let (affected, listed) = self.affected_paths(files, ctx).await?;
        let top_level = entries_without_children(files);
        let new_paths =
            entry_paths_from_destination(&affected, destination.full_path(), top_level.len());
        let pairs: Vec<(String, String)> = affected.into_iter().zip(new_paths).collect();

        // Native renames only apply to members that exist as records.
        let renames: Vec<(String, String)> = pairs
            .iter()
            .filter(|(old, _)| listed.contains(old.trim_end_matches('/')))
            .cloned()
            .collect();
        let native = self.params.substitute_move_variables(
            &self.state.filename,
            &renames,
            self.state.password.as_ref(),
        );

        let backup = ArchiveBackup::take(&self.state.filename, ctx.scratch_dir())?;
        let result = match native {
            Some(args) => self
                .run_checked(&program, &args, None, ctx, "Moving files")
                .await
                .map(|_| ()),
            None => self.synthesized_move(&top_level, &pairs, options, ctx).await,
        };
        backup.settle(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, root: Option<&str>) -> Entry {
        let mut e = Entry::new(path);
        e.root_node = root.map(str::to_string);
        e
    }

    #[test]
    fn test_capabilities_follow_programs() {
        let rar = CliInterface::rar("/tmp/a.rar").unwrap();
        assert!(!rar.capabilities().read_only);
        assert!(rar.capabilities().cli_based);
        assert_eq!(rar.move_required_signals(), 3);

        let seven = CliInterface::seven_zip("/tmp/a.7z").unwrap();
        assert_eq!(seven.move_required_signals(), 1);

        let unar = CliInterface::unarchiver("/tmp/a.rar").unwrap();
        assert!(unar.capabilities().read_only);
        assert!(unar.is_read_only());
    }

    #[test]
    fn test_missing_program_is_plugin_error() {
        let rar = CliInterface::rar("/tmp/a.rar")
            .unwrap()
            .search_path("/nonexistent-dir");
        let err = rar.program(&rar.params.list_programs).unwrap_err();
        assert!(err.is_plugin_error());
    }

    #[test]
    fn test_move_extracted_flattens() {
        let scratch = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::create_dir_all(scratch.path().join("aDir/sub")).unwrap();
        fs::write(scratch.path().join("aDir/b.txt"), b"b").unwrap();
        fs::write(scratch.path().join("aDir/sub/c.txt"), b"c").unwrap();

        move_extracted(scratch.path(), dest.path(), &[], &ExtractionOptions::new()).unwrap();
        assert!(dest.path().join("b.txt").is_file());
        assert!(dest.path().join("c.txt").is_file());
        assert!(!dest.path().join("aDir").exists());
    }

    #[test]
    fn test_move_extracted_strips_root_node() {
        let scratch = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::create_dir_all(scratch.path().join("aDir/sub")).unwrap();
        fs::write(scratch.path().join("aDir/sub/c.txt"), b"c").unwrap();

        let files = vec![entry("aDir/sub/", Some("aDir"))];
        let options = ExtractionOptions::new().preserve_paths(true);
        move_extracted(scratch.path(), dest.path(), &files, &options).unwrap();
        assert_eq!(fs::read(dest.path().join("sub/c.txt")).unwrap(), b"c");
        assert!(!dest.path().join("aDir").exists());
    }

    #[tokio::test]
    async fn test_list_of_missing_archive_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut rar = CliInterface::rar(dir.path().join("new.rar")).unwrap();
        let (ctx, mut rx) = JobContext::detached();
        rar.list(&ctx).await.unwrap();
        drop(ctx);
        assert!(rx.recv().await.is_none());
    }
}
