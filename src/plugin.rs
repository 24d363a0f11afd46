//! Backend selection.
//!
//! Every backend is described by a [`PluginMetadata`] record: the MIME types
//! it handles, a priority, whether it can write, and the executables it
//! needs. A [`PluginRegistry`] holds the known plugins and picks one for an
//! archive file:
//!
//! 1. The MIME type is detected from the file name and, for existing files,
//!    from the first bytes of content ([`detect_mime_type`]).
//! 2. Plugins declaring that type are sorted by priority, highest first.
//! 3. The first enabled plugin whose read-only executables are installed
//!    wins. A read-write plugin missing its read-write executables still
//!    opens the archive, read-only.
//!
//! ```rust
//! use archivist::plugin::PluginRegistry;
//!
//! let registry = PluginRegistry::builtin();
//! let offers = registry.preferred_plugins_for("application/x-compressed-tar");
//! assert_eq!(offers[0].metadata().id, "tar");
//! ```

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::cli::CliInterface;
use crate::backend::single_file::SingleFileInterface;
use crate::backend::tar::TarInterface;
use crate::interface::ArchiveInterface;
use crate::{Error, Result};

/// MIME type of uncompressed tarballs.
pub const MIME_TAR: &str = "application/x-tar";
/// MIME type of gzip-compressed tarballs.
pub const MIME_TAR_GZ: &str = "application/x-compressed-tar";
/// MIME type of bzip2-compressed tarballs.
pub const MIME_TAR_BZ2: &str = "application/x-bzip-compressed-tar";
/// MIME type of xz-compressed tarballs.
pub const MIME_TAR_XZ: &str = "application/x-xz-compressed-tar";
/// MIME type of a gzip-compressed file.
pub const MIME_GZIP: &str = "application/gzip";
/// MIME type of a bzip2-compressed file.
pub const MIME_BZIP2: &str = "application/x-bzip";
/// MIME type of an xz-compressed file.
pub const MIME_XZ: &str = "application/x-xz";
/// MIME type of compressed SVG images.
pub const MIME_SVGZ: &str = "image/svg+xml-compressed";
/// MIME type of 7z archives.
pub const MIME_7Z: &str = "application/x-7z-compressed";
/// MIME type of RAR archives.
pub const MIME_RAR: &str = "application/vnd.rar";
/// MIME type of zip archives.
pub const MIME_ZIP: &str = "application/zip";

/// Creates a backend for one archive.
pub type PluginFactory = Arc<dyn Fn(&FactoryArgs<'_>) -> Result<Box<dyn ArchiveInterface>> + Send + Sync>;

/// Arguments handed to a [`PluginFactory`].
#[derive(Debug, Clone, Copy)]
pub struct FactoryArgs<'a> {
    /// The archive file, absolute.
    pub path: &'a Path,
    /// Where executables are looked up (`PATH` when `None`).
    pub search_path: Option<&'a OsStr>,
    /// The backend must not offer write support.
    pub read_only: bool,
}

/// Declarative description of a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMetadata {
    /// Unique identifier (`"cli7z"`, `"tar"`).
    pub id: String,
    /// MIME types the backend can open.
    pub mime_types: Vec<String>,
    /// Higher priorities are tried first.
    pub priority: u32,
    /// Whether the backend can write.
    pub read_write: bool,
    /// Executables needed to list and extract. Each group lists
    /// alternatives, one of which must be installed.
    pub read_only_executables: Vec<Vec<String>>,
    /// Executables needed to write, in the same form.
    pub read_write_executables: Vec<Vec<String>>,
}

impl PluginMetadata {
    /// Creates metadata without executables.
    pub fn new(id: impl Into<String>, priority: u32, read_write: bool) -> Self {
        Self {
            id: id.into(),
            mime_types: Vec::new(),
            priority,
            read_write,
            read_only_executables: Vec::new(),
            read_write_executables: Vec::new(),
        }
    }

    /// Adds handled MIME types.
    pub fn mime_types<I, S>(mut self, mimes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mime_types.extend(mimes.into_iter().map(Into::into));
        self
    }

    /// Adds a group of alternative read-only executables.
    pub fn read_only_executable(mut self, alternatives: &[&str]) -> Self {
        self.read_only_executables
            .push(alternatives.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Adds a group of alternative read-write executables.
    pub fn read_write_executable(mut self, alternatives: &[&str]) -> Self {
        self.read_write_executables
            .push(alternatives.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Whether the backend drives external programs.
    pub fn is_cli_based(&self) -> bool {
        !self.read_only_executables.is_empty() || !self.read_write_executables.is_empty()
    }

    /// Whether `mime` is handled.
    pub fn supports(&self, mime: &str) -> bool {
        self.mime_types.iter().any(|m| m == mime)
    }
}

/// A registered backend.
#[derive(Clone)]
pub struct Plugin {
    metadata: PluginMetadata,
    enabled: bool,
    factory: PluginFactory,
}

impl Plugin {
    /// Creates an enabled plugin.
    pub fn new<F>(metadata: PluginMetadata, factory: F) -> Self
    where
        F: Fn(&FactoryArgs<'_>) -> Result<Box<dyn ArchiveInterface>> + Send + Sync + 'static,
    {
        Self {
            metadata,
            enabled: true,
            factory: Arc::new(factory),
        }
    }

    /// The plugin description.
    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    /// Selection priority.
    pub fn priority(&self) -> u32 {
        self.metadata.priority
    }

    /// Whether the plugin takes part in selection.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enables or disables the plugin.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the plugin is enabled and can at least list and extract.
    pub fn is_valid(&self, search_path: Option<&OsStr>) -> bool {
        self.enabled && find_executables(&self.metadata.read_only_executables, search_path)
    }

    /// Whether the plugin is declared read-write and its write executables
    /// are installed.
    pub fn is_read_write(&self, search_path: Option<&OsStr>) -> bool {
        self.metadata.read_write
            && find_executables(&self.metadata.read_write_executables, search_path)
    }

    /// Instantiates the backend.
    pub fn create(&self, args: &FactoryArgs<'_>) -> Result<Box<dyn ArchiveInterface>> {
        (self.factory)(args)
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("metadata", &self.metadata)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// A backend chosen for one archive.
pub struct Selection {
    /// The plugin that created the backend.
    pub metadata: PluginMetadata,
    /// The backend.
    pub interface: Box<dyn ArchiveInterface>,
    /// The archive must be opened read-only.
    pub read_only: bool,
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("plugin", &self.metadata.id)
            .field("backend", &self.interface.name())
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// The set of known plugins.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Plugin>,
    search_path: Option<OsString>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in backends.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for plugin in builtin_plugins() {
            registry.register(plugin);
        }
        registry
    }

    /// Adds a plugin, replacing one with the same id.
    pub fn register(&mut self, plugin: Plugin) {
        self.plugins.retain(|p| p.metadata.id != plugin.metadata.id);
        self.plugins.push(plugin);
    }

    /// Looks up executables in `path` (a `PATH`-style list) instead of `PATH`.
    pub fn set_search_path(&mut self, path: Option<OsString>) {
        self.search_path = path;
    }

    /// The executable search path override.
    pub fn search_path(&self) -> Option<&OsStr> {
        self.search_path.as_deref()
    }

    /// Enables or disables a plugin. Returns `false` for unknown ids.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.plugins.iter_mut().find(|p| p.metadata.id == id) {
            Some(plugin) => {
                plugin.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Every registered plugin.
    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    /// Looks up a plugin by id.
    pub fn get(&self, id: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|p| p.metadata.id == id)
    }

    /// Plugins handling `mime`, highest priority first.
    pub fn preferred_plugins_for(&self, mime: &str) -> Vec<&Plugin> {
        let mut offers: Vec<&Plugin> = self
            .plugins
            .iter()
            .filter(|p| p.metadata.supports(mime))
            .collect();
        offers.sort_by(|a, b| b.priority().cmp(&a.priority()));
        offers
    }

    /// Every MIME type some plugin handles.
    pub fn supported_mime_types(&self) -> Vec<&str> {
        let mut mimes: Vec<&str> = self
            .plugins
            .iter()
            .filter(|p| p.enabled)
            .flat_map(|p| p.metadata.mime_types.iter().map(String::as_str))
            .collect();
        mimes.sort_unstable();
        mimes.dedup();
        mimes
    }

    /// Picks and instantiates a backend for `path`.
    ///
    /// `fixed_mime` skips detection. Fails with [`Error::PluginNotFound`]
    /// when no plugin declares the type and with
    /// [`Error::PluginLoadFailed`] when none of them is usable.
    pub fn select(&self, path: &Path, fixed_mime: Option<&str>) -> Result<Selection> {
        let mime = match fixed_mime {
            Some(mime) => mime.to_string(),
            None => detect_mime_type(path),
        };
        let offers = self.preferred_plugins_for(&mime);
        log::debug!(
            "{} offers for {} ({mime})",
            offers.len(),
            path.display()
        );
        if offers.is_empty() {
            return Err(Error::PluginNotFound { mime });
        }

        let search_path = self.search_path();
        let mut last_error = None;
        for plugin in offers {
            let id = &plugin.metadata.id;
            if !plugin.is_valid(search_path) {
                log::debug!("skipping plugin {id}: disabled or executables missing");
                last_error = Some(Error::PluginLoadFailed {
                    plugin: id.clone(),
                    reason: if plugin.enabled {
                        "required executables not found".into()
                    } else {
                        "plugin is disabled".into()
                    },
                });
                continue;
            }
            let read_only = !plugin.is_read_write(search_path);
            if plugin.metadata.read_write && read_only {
                log::warn!("read-write executables of {id} not found, falling back to read-only mode");
            }
            let args = FactoryArgs {
                path,
                search_path,
                read_only,
            };
            match plugin.create(&args) {
                Ok(interface) => {
                    return Ok(Selection {
                        metadata: plugin.metadata.clone(),
                        interface,
                        read_only,
                    });
                }
                Err(e) => {
                    log::warn!("could not create plugin {id}: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(match last_error {
            Some(e @ Error::PluginLoadFailed { .. }) => e,
            Some(e) => Error::PluginLoadFailed {
                plugin: mime,
                reason: e.to_string(),
            },
            None => Error::PluginLoadFailed {
                plugin: mime,
                reason: "no usable plugin".into(),
            },
        })
    }
}

fn tar_mime_types() -> Vec<&'static str> {
    let mut mimes = vec![MIME_TAR];
    if cfg!(feature = "gzip") {
        mimes.push(MIME_TAR_GZ);
    }
    if cfg!(feature = "bzip2") {
        mimes.push(MIME_TAR_BZ2);
    }
    if cfg!(feature = "xz") {
        mimes.push(MIME_TAR_XZ);
    }
    mimes
}

fn single_file_mime_types() -> Vec<&'static str> {
    let mut mimes = Vec::new();
    if cfg!(feature = "gzip") {
        mimes.extend([MIME_GZIP, MIME_SVGZ]);
    }
    if cfg!(feature = "bzip2") {
        mimes.push(MIME_BZIP2);
    }
    if cfg!(feature = "xz") {
        mimes.push(MIME_XZ);
    }
    mimes
}

fn cli<F>(args: &FactoryArgs<'_>, make: F) -> Result<Box<dyn ArchiveInterface>>
where
    F: FnOnce(PathBuf) -> Result<CliInterface>,
{
    let mut iface = make(args.path.to_path_buf())?;
    if let Some(path) = args.search_path {
        iface = iface.search_path(path);
    }
    if args.read_only {
        iface = iface.read_only();
    }
    Ok(Box::new(iface))
}

fn builtin_plugins() -> Vec<Plugin> {
    vec![
        Plugin::new(
            PluginMetadata::new("tar", 200, true).mime_types(tar_mime_types()),
            |args| Ok(Box::new(TarInterface::new(args.path))),
        ),
        Plugin::new(
            PluginMetadata::new("cli7z", 180, true)
                .mime_types([MIME_7Z, MIME_ZIP, MIME_TAR, MIME_TAR_GZ, MIME_TAR_BZ2, MIME_TAR_XZ])
                .read_only_executable(&["7z", "7za", "7zz"])
                .read_write_executable(&["7z", "7za", "7zz"]),
            |args| cli(args, CliInterface::seven_zip),
        ),
        Plugin::new(
            PluginMetadata::new("clirar", 120, true)
                .mime_types([MIME_RAR, "application/x-rar"])
                .read_only_executable(&["unrar", "rar"])
                .read_write_executable(&["rar"]),
            |args| cli(args, CliInterface::rar),
        ),
        Plugin::new(
            PluginMetadata::new("cliunarchiver", 100, false)
                .mime_types([MIME_RAR, "application/x-rar", MIME_7Z, MIME_ZIP, "application/x-cpio"])
                .read_only_executable(&["lsar"])
                .read_only_executable(&["unar"]),
            |args| cli(args, CliInterface::unarchiver),
        ),
        Plugin::new(
            PluginMetadata::new("singlefile", 100, false).mime_types(single_file_mime_types()),
            |args| Ok(Box::new(SingleFileInterface::new(args.path))),
        ),
    ]
}

// ============================================================================
// Executable discovery
// ============================================================================

/// Returns `true` if every group has one installed alternative.
pub fn find_executables(groups: &[Vec<String>], search_path: Option<&OsStr>) -> bool {
    groups.iter().all(|alternatives| {
        alternatives.iter().any(|name| {
            let found = match search_path {
                Some(path) => find_executable_in(name, path),
                None => find_executable(name),
            };
            if found.is_none() {
                log::debug!("could not find executable {name}");
            }
            found.is_some()
        })
    })
}

/// Looks up `name` in `PATH`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    find_executable_in(name, &path)
}

/// Looks up `name` in a `PATH`-style list of directories.
///
/// A name containing a path separator is checked as given.
pub fn find_executable_in(name: &str, paths: impl AsRef<OsStr>) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    std::env::split_paths(paths.as_ref())
        .map(|dir| dir.join(name))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

// ============================================================================
// MIME detection
// ============================================================================

/// Compound and archive-specific extensions `mime_guess` does not know.
const EXTENSIONS: &[(&str, &str)] = &[
    (".tar.gz", MIME_TAR_GZ),
    (".tgz", MIME_TAR_GZ),
    (".tar.bz2", MIME_TAR_BZ2),
    (".tbz2", MIME_TAR_BZ2),
    (".tbz", MIME_TAR_BZ2),
    (".tar.xz", MIME_TAR_XZ),
    (".txz", MIME_TAR_XZ),
    (".tar", MIME_TAR),
    (".gz", MIME_GZIP),
    (".bz2", MIME_BZIP2),
    (".xz", MIME_XZ),
    (".svgz", MIME_SVGZ),
    (".7z", MIME_7Z),
    (".rar", MIME_RAR),
    (".zip", MIME_ZIP),
    (".cpio", "application/x-cpio"),
];

/// Detects a MIME type from the file name alone.
pub fn mime_type_from_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
    for (ext, mime) in EXTENSIONS {
        if name.len() > ext.len() && name.ends_with(ext) {
            return Some(mime.to_string());
        }
    }
    mime_guess::from_path(path).first().map(|m| m.essence_str().to_string())
}

/// Detects a MIME type from the first bytes of a file.
pub fn mime_type_from_content(header: &[u8]) -> Option<&'static str> {
    if header.starts_with(b"Rar!\x1a\x07") {
        Some(MIME_RAR)
    } else if header.starts_with(b"7z\xbc\xaf\x27\x1c") {
        Some(MIME_7Z)
    } else if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
        Some(MIME_ZIP)
    } else if header.starts_with(&[0x1f, 0x8b]) {
        Some(MIME_GZIP)
    } else if header.starts_with(b"BZh") {
        Some(MIME_BZIP2)
    } else if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        Some(MIME_XZ)
    } else if header.len() >= 262 && &header[257..262] == b"ustar" {
        Some(MIME_TAR)
    } else {
        None
    }
}

/// The compression a compressed tarball type is wrapped in.
fn compressed_tar_wrapper(mime: &str) -> Option<&'static str> {
    match mime {
        MIME_TAR_GZ => Some(MIME_GZIP),
        MIME_TAR_BZ2 => Some(MIME_BZIP2),
        MIME_TAR_XZ => Some(MIME_XZ),
        _ => None,
    }
}

/// Detects the MIME type of an archive file.
///
/// The name decides unless the file exists and its content says otherwise;
/// a compressed tarball whose content matches the compression keeps its
/// tarball type.
pub fn detect_mime_type(path: &Path) -> String {
    let by_name = mime_type_from_name(path);
    let by_content = read_header(path).and_then(|h| mime_type_from_content(&h));

    match (by_name, by_content) {
        (Some(name), Some(content)) => {
            let wrapped = compressed_tar_wrapper(&name) == Some(content)
                || (name == MIME_SVGZ && content == MIME_GZIP);
            if name == content || wrapped {
                name
            } else {
                log::debug!(
                    "{}: content type {content} overrides name type {name}",
                    path.display()
                );
                content.to_string()
            }
        }
        (Some(name), None) => name,
        (None, Some(content)) => content.to_string(),
        (None, None) => "application/octet-stream".to_string(),
    }
}

fn read_header(path: &Path) -> Option<Vec<u8>> {
    let mut file = File::open(path).ok()?;
    let mut header = Vec::with_capacity(512);
    file.by_ref().take(512).read_to_end(&mut header).ok()?;
    (!header.is_empty()).then_some(header)
}
