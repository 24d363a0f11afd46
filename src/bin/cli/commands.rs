//! Command implementations for the CLI tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use archivist::paths::entries_without_children;
use archivist::{
    AddToArchive, Archive, CompressionOptions, Entry, Error, ExtractionOptions, JobHandle,
    ListSummary, PathSafety, Session, SessionConfig,
};

use crate::exit_codes::{ExitCode, error_to_exit_code};
use crate::file_selector::FileSelector;
use crate::output::{
    ArchiveReport, OperationReport, OutputFormatter, PluginRow, create_formatter,
};
use crate::password::{PromptPassword, get_or_prompt_password};
use crate::progress::{JobProgress, Outcome};
use crate::{GlobalOptions, OutputFormat};

/// Configuration for the extract command.
pub struct ExtractConfig<'a> {
    pub archive_path: &'a Path,
    pub output_dir: &'a Path,
    pub include: &'a [String],
    pub exclude: &'a [String],
    pub preserve_paths: bool,
    pub path_safety: PathSafety,
}

/// Configuration for the add command.
pub struct AddConfig<'a> {
    pub archive_path: &'a Path,
    pub files: &'a [PathBuf],
    pub destination: Option<&'a str>,
    pub level: Option<u32>,
    pub encrypt_headers: bool,
}

/// Configuration for the compress command.
pub struct CompressConfig<'a> {
    pub inputs: &'a [PathBuf],
    pub output: Option<&'a Path>,
    pub suffix: &'a str,
    pub change_to_first_path: bool,
    pub level: Option<u32>,
    pub encrypt: bool,
    pub encrypt_headers: bool,
}

/// List command implementation
pub async fn list(global: &GlobalOptions, archive_path: &Path, technical: bool) -> ExitCode {
    let formatter = create_formatter(global.format);
    let progress = JobProgress::new("Listing...", global.quiet);
    let (_session, archive) = match open_existing(global, archive_path, &progress) {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let (summary, warnings) = match list_members(global, &archive, &progress).await {
        Ok(listed) => listed,
        Err(code) => return code,
    };
    progress.finish();

    print!("{}", formatter.format_list(&summary, technical));
    warnings_code(&warnings)
}

/// Info command implementation
pub async fn info(global: &GlobalOptions, archive_path: &Path) -> ExitCode {
    let formatter = create_formatter(global.format);
    let progress = JobProgress::new("Reading archive...", global.quiet);
    let (_session, archive) = match open_existing(global, archive_path, &progress) {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let (summary, warnings) = match list_members(global, &archive, &progress).await {
        Ok(listed) => listed,
        Err(code) => return code,
    };
    progress.finish();

    let encryption = match archive.encryption_type().await {
        Ok(encryption) => encryption,
        Err(e) => return report_error(&e),
    };
    let report = ArchiveReport {
        path: archive.file_name().to_path_buf(),
        mime_type: archive.mime_type().to_string(),
        plugin: archive.plugin().map(|p| p.id.clone()),
        read_only: archive.is_read_only().await,
        encryption,
        number_of_files: summary.number_of_files,
        number_of_dirs: summary.number_of_dirs,
        unpacked_size: summary.extracted_files_size,
        packed_size: archive.packed_size(),
        single_folder: summary.is_single_folder_archive,
        subfolder_name: summary.subfolder_name,
        corrupt: summary.is_corrupt,
        comment: summary.comment,
    };

    print!("{}", formatter.format_info(&report));
    warnings_code(&warnings)
}

/// Extract command implementation
pub async fn extract(global: &GlobalOptions, config: &ExtractConfig<'_>) -> ExitCode {
    let formatter = create_formatter(global.format);

    let selector = match FileSelector::new(config.include, config.exclude) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::BadArgs;
        }
    };

    if let Err(e) = std::fs::create_dir_all(config.output_dir) {
        eprintln!("Error creating output directory: {}", e);
        return ExitCode::IoError;
    }

    let progress = JobProgress::new("Extracting...", global.quiet);
    let (_session, archive) = match open_existing(global, config.archive_path, &progress) {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    // An empty list extracts everything.
    let files = if selector.is_empty() {
        Vec::new()
    } else {
        let (summary, _) = match list_members(global, &archive, &progress).await {
            Ok(listed) => listed,
            Err(code) => return code,
        };
        let files = selector.select(&summary.tree, true);
        if files.is_empty() {
            progress.finish();
            eprintln!("No members match the given patterns");
            return ExitCode::Warning;
        }
        files
    };
    let selected = files.len();

    let options = ExtractionOptions::new()
        .preserve_paths(config.preserve_paths)
        .path_safety(config.path_safety);
    let job = match archive.copy_files(files, config.output_dir, options).await {
        Ok(job) => job,
        Err(e) => return report_error(&e),
    };
    let outcome = run_job(global, &progress, "Extracting...", job.start()).await;
    finish_operation(
        global,
        &progress,
        outcome,
        OperationReport {
            operation: "extract",
            archive: archive.file_name().to_path_buf(),
            members: selected,
            destination: Some(config.output_dir.display().to_string()),
            warnings: Vec::new(),
        },
        formatter.as_ref(),
    )
}

/// Add command implementation
pub async fn add(global: &GlobalOptions, config: &AddConfig<'_>) -> ExitCode {
    let formatter = create_formatter(global.format);
    let progress = JobProgress::new("Adding...", global.quiet);
    let session = match open_session(global) {
        Ok(session) => session,
        Err(code) => return code,
    };
    let archive = match open_archive(global, &session, config.archive_path, &progress) {
        Ok(archive) => archive,
        Err(code) => return code,
    };

    if global.password.is_some() || config.encrypt_headers {
        let provided = global.password.clone();
        let Some(password) = progress.bar().suspend(|| get_or_prompt_password(provided)) else {
            eprintln!("Error: a password is needed to encrypt the archive");
            return ExitCode::BadArgs;
        };
        if let Err(e) = archive.encrypt(password, config.encrypt_headers).await {
            return report_error(&e);
        }
    }

    let mut entries = Vec::with_capacity(config.files.len());
    for file in config.files {
        if !file.exists() {
            eprintln!("Error: {} does not exist", file.display());
            return ExitCode::IoError;
        }
        let absolute = std::path::absolute(file).unwrap_or_else(|_| file.clone());
        let full_path = absolute.to_string_lossy().into_owned();
        entries.push(if absolute.is_dir() {
            Entry::directory(full_path)
        } else {
            Entry::new(full_path)
        });
    }
    let added = entries.len();

    let mut options = CompressionOptions::new();
    if let Some(level) = config.level {
        options = options.compression_level(level);
    }
    let destination = config
        .destination
        .filter(|d| !d.trim_matches('/').is_empty())
        .map(Entry::directory);
    let job = match archive.add_files(entries, destination, options) {
        Ok(job) => job,
        Err(e) => return report_error(&e),
    };
    let outcome = run_job(global, &progress, "Adding...", job.start()).await;
    finish_operation(
        global,
        &progress,
        outcome,
        OperationReport {
            operation: "add",
            archive: archive.file_name().to_path_buf(),
            members: added,
            destination: config.destination.map(str::to_string),
            warnings: Vec::new(),
        },
        formatter.as_ref(),
    )
}

/// Delete command implementation
pub async fn delete(global: &GlobalOptions, archive_path: &Path, members: &[String]) -> ExitCode {
    let formatter = create_formatter(global.format);
    let progress = JobProgress::new("Deleting...", global.quiet);
    let (_session, archive) = match open_existing(global, archive_path, &progress) {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let files = match select_members(global, &archive, &progress, members).await {
        Ok(files) => files,
        Err(code) => return code,
    };
    let selected = files.len();

    let job = match archive.delete_files(files) {
        Ok(job) => job,
        Err(e) => return report_error(&e),
    };
    let outcome = run_job(global, &progress, "Deleting...", job.start()).await;
    finish_operation(
        global,
        &progress,
        outcome,
        OperationReport {
            operation: "delete",
            archive: archive.file_name().to_path_buf(),
            members: selected,
            destination: None,
            warnings: Vec::new(),
        },
        formatter.as_ref(),
    )
}

/// Move command implementation
pub async fn move_members(
    global: &GlobalOptions,
    archive_path: &Path,
    members: &[String],
    to: &str,
) -> ExitCode {
    let formatter = create_formatter(global.format);
    let progress = JobProgress::new("Moving...", global.quiet);
    let (_session, archive) = match open_existing(global, archive_path, &progress) {
        Ok(opened) => opened,
        Err(code) => return code,
    };

    let files = match select_members(global, &archive, &progress, members).await {
        Ok(files) => files,
        Err(code) => return code,
    };
    let selected = files.len();

    // Several members always go below a directory.
    let destination = if selected > 1 || to.ends_with('/') {
        Entry::directory(to)
    } else {
        Entry::new(to)
    };
    let job = match archive.move_files(files, destination, CompressionOptions::new()) {
        Ok(job) => job,
        Err(e) => return report_error(&e),
    };
    let outcome = run_job(global, &progress, "Moving...", job.start()).await;
    finish_operation(
        global,
        &progress,
        outcome,
        OperationReport {
            operation: "move",
            archive: archive.file_name().to_path_buf(),
            members: selected,
            destination: Some(to.to_string()),
            warnings: Vec::new(),
        },
        formatter.as_ref(),
    )
}

/// Compress command implementation
pub async fn compress(global: &GlobalOptions, config: &CompressConfig<'_>) -> ExitCode {
    let formatter = create_formatter(global.format);

    for input in config.inputs {
        if !input.exists() {
            eprintln!("Error: {} does not exist", input.display());
            return ExitCode::IoError;
        }
    }

    let mut batch = config
        .inputs
        .iter()
        .fold(AddToArchive::new(), |batch, input| batch.add_input(input))
        .change_to_first_path(config.change_to_first_path);
    batch = match config.output {
        Some(output) => batch.filename(output),
        None => batch.auto_filename_suffix(config.suffix),
    };
    if let Some(level) = config.level {
        batch = batch.compression_level(level);
    }
    if config.encrypt {
        let Some(password) = get_or_prompt_password(global.password.clone()) else {
            return ExitCode::BadArgs;
        };
        batch = batch
            .password(password)
            .header_encryption(config.encrypt_headers);
    }

    let session = match open_session(global) {
        Ok(session) => session,
        Err(code) => return code,
    };
    let progress = JobProgress::new("Compressing...", global.quiet);
    let (archive, job) = match batch.prepare(&session).await {
        Ok(prepared) => prepared,
        Err(e) => return report_error(&e),
    };
    let outcome = run_job(global, &progress, "Compressing...", job.start()).await;
    finish_operation(
        global,
        &progress,
        outcome,
        OperationReport {
            operation: "compress",
            archive: archive.file_name().to_path_buf(),
            members: config.inputs.len(),
            destination: None,
            warnings: Vec::new(),
        },
        formatter.as_ref(),
    )
}

/// Plugins command implementation
pub fn plugins(global: &GlobalOptions) -> ExitCode {
    let formatter = create_formatter(global.format);
    let session = match open_session(global) {
        Ok(session) => session,
        Err(code) => return code,
    };
    let registry = session.registry();
    let search_path = registry.search_path();

    let mut rows: Vec<PluginRow> = registry
        .plugins()
        .iter()
        .map(|plugin| PluginRow {
            id: plugin.metadata().id.clone(),
            priority: plugin.priority(),
            enabled: plugin.is_enabled(),
            available: plugin.is_valid(search_path),
            read_write: plugin.is_read_write(search_path),
            mime_types: plugin.metadata().mime_types.clone(),
        })
        .collect();
    rows.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

    print!("{}", formatter.format_plugins(&rows));
    ExitCode::Success
}

fn open_session(global: &GlobalOptions) -> Result<Session, ExitCode> {
    let mut config = SessionConfig::new();
    if let Some(dir) = &global.tmpdir {
        config = config.temp_root(dir);
    }
    for id in &global.disabled_plugins {
        config = config.disable_plugin(id);
    }
    Session::with_config(config).map_err(|e| report_error(&e))
}

/// Opens an archive that may not exist yet.
fn open_archive(
    global: &GlobalOptions,
    session: &Session,
    path: &Path,
    progress: &JobProgress,
) -> Result<Archive, ExitCode> {
    let mut archive = session.open(path);
    if !archive.is_valid() {
        return Err(match archive.interface() {
            Err(e) => report_error(&e),
            Ok(_) => ExitCode::FatalError,
        });
    }
    log::debug!(
        "{} opened with plugin {}",
        path.display(),
        archive.plugin().map(|p| p.id.as_str()).unwrap_or("-")
    );

    let interactive = console::Term::stderr().is_term();
    archive.set_password_provider(Arc::new(PromptPassword::new(
        global.password.clone(),
        interactive,
        progress.bar(),
    )));
    Ok(archive)
}

fn open_existing(
    global: &GlobalOptions,
    path: &Path,
    progress: &JobProgress,
) -> Result<(Session, Archive), ExitCode> {
    if !path.is_file() {
        eprintln!("Error: {} is not a file", path.display());
        return Err(ExitCode::IoError);
    }
    let session = open_session(global)?;
    let archive = open_archive(global, &session, path, progress)?;
    Ok((session, archive))
}

async fn list_members(
    global: &GlobalOptions,
    archive: &Archive,
    progress: &JobProgress,
) -> Result<(ListSummary, Vec<String>), ExitCode> {
    let job = archive.list().map_err(|e| report_error(&e))?;
    let outcome = run_job(global, progress, "Listing...", job.start()).await;
    match outcome.result {
        Ok(summary) => Ok((summary, outcome.warnings)),
        Err(e) => Err(report_error(&e)),
    }
}

/// Lists the archive and picks the members matching `patterns`.
async fn select_members(
    global: &GlobalOptions,
    archive: &Archive,
    progress: &JobProgress,
    patterns: &[String],
) -> Result<Vec<Entry>, ExitCode> {
    let selector = FileSelector::new(patterns, &[]).map_err(|e| {
        eprintln!("Error: {}", e);
        ExitCode::BadArgs
    })?;
    let (summary, _) = list_members(global, archive, progress).await?;
    let files = entries_without_children(&selector.select(&summary.tree, false));
    if files.is_empty() {
        progress.finish();
        return Err(report_error(&Error::EntryNotFound {
            path: patterns.join(", "),
        }));
    }
    Ok(files)
}

async fn run_job<T>(
    global: &GlobalOptions,
    progress: &JobProgress,
    message: &str,
    handle: JobHandle<T>,
) -> Outcome<T> {
    progress.restart(message);
    progress.run(handle, &global.running).await
}

fn finish_operation(
    global: &GlobalOptions,
    progress: &JobProgress,
    outcome: Outcome<()>,
    mut report: OperationReport,
    formatter: &dyn OutputFormatter,
) -> ExitCode {
    if let Err(e) = outcome.result {
        return report_error(&e);
    }
    progress.finish();
    report.warnings = outcome.warnings;
    let code = warnings_code(&report.warnings);
    if !global.quiet || global.format == OutputFormat::Json {
        print!("{}", formatter.format_operation(&report));
    }
    code
}

fn warnings_code(warnings: &[String]) -> ExitCode {
    if warnings.is_empty() {
        ExitCode::Success
    } else {
        ExitCode::Warning
    }
}

fn report_error(error: &Error) -> ExitCode {
    eprintln!("Error: {}", error);
    if let Some(details) = error.details() {
        eprintln!("{}", details);
    }
    error_to_exit_code(error)
}
