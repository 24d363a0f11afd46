//! Listing job and the statistics derived from a listing.

use crate::entry::{Entry, EntryTree};
use crate::interface::SharedInterface;
use crate::paths::complete_base_name;

use super::{FinishHook, JobConfig, JobEvent, JobHandle, JobKind, job_settings, launch};

/// Running statistics over a stream of listed entries.
///
/// An archive is a single-folder archive when every entry shares one
/// top-level component and that component is a directory.
#[derive(Debug, Clone)]
pub struct ListStats {
    extracted_files_size: u64,
    is_password_protected: bool,
    single_folder: bool,
    base_path: String,
    base_is_dir: bool,
    number_of_files: usize,
    number_of_dirs: usize,
}

impl Default for ListStats {
    fn default() -> Self {
        Self {
            extracted_files_size: 0,
            is_password_protected: false,
            single_folder: true,
            base_path: String::new(),
            base_is_dir: false,
            number_of_files: 0,
            number_of_dirs: 0,
        }
    }
}

impl ListStats {
    /// Creates empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts for one listed entry.
    pub fn add(&mut self, entry: &Entry) {
        if entry.is_dir() {
            self.number_of_dirs += 1;
        } else {
            self.number_of_files += 1;
            self.extracted_files_size += entry.size;
        }
        self.is_password_protected |= entry.is_password_protected;

        if !self.single_folder {
            return;
        }
        // Some formats (RPM) prefix every path with "./".
        let full_path = entry.full_path().strip_prefix("./").unwrap_or(entry.full_path());
        let (base_path, rest) = match full_path.split_once('/') {
            Some((base, rest)) => (base, Some(rest)),
            None => (full_path, None),
        };
        if self.base_path.is_empty() {
            self.base_path = base_path.to_string();
        } else if self.base_path != base_path {
            self.single_folder = false;
            return;
        }
        if rest.is_some() {
            self.base_is_dir = true;
        }
    }

    /// Total uncompressed size of non-directory entries.
    pub fn extracted_files_size(&self) -> u64 {
        self.extracted_files_size
    }

    /// Whether any entry is encrypted.
    pub fn is_password_protected(&self) -> bool {
        self.is_password_protected
    }

    /// Whether all entries live under one top-level directory.
    pub fn is_single_folder_archive(&self) -> bool {
        self.single_folder && self.base_is_dir && !self.base_path.is_empty()
    }

    /// The common top-level directory, if this is a single-folder archive.
    pub fn subfolder_name(&self) -> Option<&str> {
        self.is_single_folder_archive()
            .then_some(self.base_path.as_str())
    }

    /// Number of non-directory entries.
    pub fn number_of_files(&self) -> usize {
        self.number_of_files
    }

    /// Number of directory entries.
    pub fn number_of_dirs(&self) -> usize {
        self.number_of_dirs
    }
}

/// Everything a listing produced.
#[derive(Debug, Clone, Default)]
pub struct ListSummary {
    /// The member tree.
    pub tree: EntryTree,
    /// Total uncompressed size of files.
    pub extracted_files_size: u64,
    /// Whether any member is encrypted.
    pub is_password_protected: bool,
    /// Whether the member list itself needed a password.
    pub is_header_encrypted: bool,
    /// Whether a password was configured when listing finished.
    pub has_password: bool,
    /// Whether all members share one top-level directory.
    pub is_single_folder_archive: bool,
    /// The common top-level directory, or the archive base name.
    pub subfolder_name: String,
    /// Number of files.
    pub number_of_files: usize,
    /// Number of directories reported by the backend.
    pub number_of_dirs: usize,
    /// Whether the backend detected damage.
    pub is_corrupt: bool,
    /// The archive comment.
    pub comment: String,
}

/// Lists an archive and aggregates the entry stream.
pub struct ListJob {
    config: JobConfig,
    hook: Option<FinishHook<ListSummary>>,
}

job_settings!(ListJob);

impl ListJob {
    /// Creates a listing job.
    pub fn new(interface: SharedInterface) -> Self {
        Self {
            config: JobConfig::new(interface),
            hook: None,
        }
    }

    pub(crate) fn with_hook(mut self, hook: FinishHook<ListSummary>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Starts listing.
    pub fn start(self) -> JobHandle<ListSummary> {
        launch(JobKind::List, self.config, self.hook, move |runner| async move {
            let interface = runner.interface().clone();
            let mut stats = ListStats::new();
            let mut tree = EntryTree::new();

            let status = {
                let mut guard = interface.lock().await;
                let result = runner
                    .run(
                        |ctx| async move {
                            guard.open(&ctx).await?;
                            guard.list(&ctx).await?;
                            Ok(guard)
                        },
                        |event| {
                            if let JobEvent::Entry(entry) = event {
                                stats.add(entry);
                                tree.insert(entry.clone());
                            }
                        },
                    )
                    .await;
                result.map(|guard| {
                    (
                        guard.is_header_encryption_enabled(),
                        guard.password().is_some_and(|p| !p.is_empty()),
                        guard.is_corrupt(),
                        guard.comment().to_string(),
                        complete_base_name(guard.filename()),
                    )
                })
            };
            let (header_encrypted, has_password, corrupt, comment, base_name) = status?;

            Ok(summarize(
                tree,
                &stats,
                header_encrypted,
                has_password,
                corrupt,
                comment,
                base_name,
            ))
        })
    }
}

fn summarize(
    tree: EntryTree,
    stats: &ListStats,
    header_encrypted: bool,
    has_password: bool,
    corrupt: bool,
    comment: String,
    base_name: String,
) -> ListSummary {
    ListSummary {
        tree,
        extracted_files_size: stats.extracted_files_size(),
        is_password_protected: stats.is_password_protected(),
        is_header_encrypted: header_encrypted,
        has_password,
        is_single_folder_archive: stats.is_single_folder_archive(),
        subfolder_name: stats
            .subfolder_name()
            .map(str::to_string)
            .unwrap_or(base_name),
        number_of_files: stats.number_of_files(),
        number_of_dirs: stats.number_of_dirs(),
        is_corrupt: corrupt,
        comment,
    }
}
