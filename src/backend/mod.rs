//! Concrete [`ArchiveInterface`](crate::ArchiveInterface) implementations.
//!
//! - [`cli`]: drives external tools (`rar`/`unrar`, `7z`, `lsar`/`unar`)
//!   through argument templates and a line-parsing state machine per tool.
//! - [`tar`]: native tar reader and writer, optionally gzip, bzip2 or xz
//!   compressed.
//! - [`single_file`]: read-only access to a single compressed file such as
//!   `notes.txt.gz`.
//!
//! The helpers here move files between scratch directories and their final
//! location, and protect an archive while an external tool rewrites it.

pub mod cli;
pub mod single_file;
pub mod tar;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use walkdir::WalkDir;

use crate::Result;

/// Compression wrapped around a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression.
    None,
    /// gzip (`.gz`, `.tgz`).
    Gzip,
    /// bzip2 (`.bz2`, `.tbz2`).
    Bzip2,
    /// xz (`.xz`, `.txz`).
    Xz,
}

impl Compression {
    /// Detects the compression from a file name.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".gz") || name.ends_with(".tgz") || name.ends_with(".svgz") {
            Self::Gzip
        } else if name.ends_with(".bz2") || name.ends_with(".tbz2") || name.ends_with(".tbz") {
            Self::Bzip2
        } else if name.ends_with(".xz") || name.ends_with(".txz") {
            Self::Xz
        } else {
            Self::None
        }
    }

    /// Detects the compression from the first bytes of a file.
    pub fn from_magic(header: &[u8]) -> Option<Self> {
        match header {
            [0x1f, 0x8b, ..] => Some(Self::Gzip),
            [b'B', b'Z', b'h', ..] => Some(Self::Bzip2),
            [0xfd, b'7', b'z', b'X', b'Z', 0x00, ..] => Some(Self::Xz),
            _ => None,
        }
    }

    /// Detects the compression of an existing file, falling back to its name.
    pub fn detect(path: &Path) -> Self {
        let mut header = [0u8; 6];
        let sniffed = fs::File::open(path).and_then(|mut f| {
            use std::io::Read;
            let n = f.read(&mut header)?;
            Ok(Self::from_magic(&header[..n]))
        });
        match sniffed {
            Ok(Some(c)) => c,
            _ => Self::from_path(path),
        }
    }

    /// Wraps `reader` in the matching decoder.
    pub fn decoder<'a, R: io::Read + 'a>(self, reader: R) -> Result<Box<dyn io::Read + 'a>> {
        Ok(match self {
            Self::None => Box::new(reader),
            #[cfg(feature = "gzip")]
            Self::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            #[cfg(feature = "bzip2")]
            Self::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
            #[cfg(feature = "xz")]
            Self::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
            #[allow(unreachable_patterns)]
            other => return Err(unsupported_compression(other)),
        })
    }

    /// Wraps `writer` in the matching encoder. `level` is clamped to 0..=9.
    pub fn encoder<W: io::Write>(self, writer: W, level: Option<u32>) -> Result<Encoder<W>> {
        #[allow(unused_variables)]
        let level = level.unwrap_or(6).min(9);
        Ok(match self {
            Self::None => Encoder::Plain(writer),
            #[cfg(feature = "gzip")]
            Self::Gzip => Encoder::Gzip(flate2::write::GzEncoder::new(
                writer,
                flate2::Compression::new(level),
            )),
            #[cfg(feature = "bzip2")]
            Self::Bzip2 => Encoder::Bzip2(bzip2::write::BzEncoder::new(
                writer,
                bzip2::Compression::new(level.max(1)),
            )),
            #[cfg(feature = "xz")]
            Self::Xz => Encoder::Xz(xz2::write::XzEncoder::new(writer, level)),
            #[allow(unreachable_patterns)]
            other => return Err(unsupported_compression(other)),
        })
    }
}

#[allow(dead_code)]
fn unsupported_compression(compression: Compression) -> crate::Error {
    crate::Error::Unsupported {
        operation: "compression",
        backend: format!("{compression:?} (feature disabled)"),
    }
}

/// A compressing writer whose trailer is written by [`finish`](Self::finish).
pub enum Encoder<W: io::Write> {
    /// Pass-through.
    Plain(W),
    /// gzip.
    #[cfg(feature = "gzip")]
    Gzip(flate2::write::GzEncoder<W>),
    /// bzip2.
    #[cfg(feature = "bzip2")]
    Bzip2(bzip2::write::BzEncoder<W>),
    /// xz.
    #[cfg(feature = "xz")]
    Xz(xz2::write::XzEncoder<W>),
}

impl<W: io::Write> Encoder<W> {
    /// Writes the trailer and returns the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            #[cfg(feature = "gzip")]
            Self::Gzip(e) => e.finish(),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(e) => e.finish(),
            #[cfg(feature = "xz")]
            Self::Xz(e) => e.finish(),
        }
    }
}

impl<W: io::Write> io::Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            #[cfg(feature = "gzip")]
            Self::Gzip(e) => e.write(buf),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(e) => e.write(buf),
            #[cfg(feature = "xz")]
            Self::Xz(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            #[cfg(feature = "gzip")]
            Self::Gzip(e) => e.flush(),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(e) => e.flush(),
            #[cfg(feature = "xz")]
            Self::Xz(e) => e.flush(),
        }
    }
}

/// Moves `src` to `dst`, replacing `dst`; falls back to copying across
/// filesystems.
pub(crate) fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Ok(meta) = fs::symlink_metadata(dst) {
        if meta.is_dir() {
            fs::remove_dir_all(dst)?;
        } else {
            fs::remove_file(dst)?;
        }
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            let meta = fs::symlink_metadata(src)?;
            if meta.file_type().is_symlink() {
                let target = fs::read_link(src)?;
                crate::safety::create_symlink(dst, &target.to_string_lossy())?;
            } else {
                fs::copy(src, dst)?;
            }
            fs::remove_file(src)?;
            Ok(())
        }
    }
}

/// Copies a file, symlink or directory tree to `dst`.
pub(crate) fn copy_recursively(src: &Path, dst: &Path) -> Result<()> {
    for item in WalkDir::new(src).follow_links(false) {
        let item = item.map_err(io::Error::other)?;
        let relative = item.path().strip_prefix(src).map_err(io::Error::other)?;
        let target = if relative.as_os_str().is_empty() {
            dst.to_path_buf()
        } else {
            dst.join(relative)
        };
        let file_type = item.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            if file_type.is_symlink() {
                let link = fs::read_link(item.path())?;
                crate::safety::create_symlink(&target, &link.to_string_lossy())?;
            } else {
                fs::copy(item.path(), &target)?;
            }
        }
    }
    Ok(())
}

/// The archive path a filesystem source is stored under.
///
/// Relative sources keep their path; absolute ones are stored by base name.
pub(crate) fn stored_name(source: &str) -> String {
    let is_dir = source.ends_with('/');
    let trimmed = source.trim_end_matches('/');
    let mut name = if Path::new(trimmed).is_absolute() {
        Path::new(trimmed)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        trimmed.trim_start_matches("./").to_string()
    };
    if is_dir && !name.is_empty() {
        name.push('/');
    }
    name
}

/// A copy of an archive taken before an external tool rewrites it.
///
/// Dropping the backup puts the original back unless
/// [`commit`](Self::commit) was called, so a failed or killed rewrite leaves
/// the archive as it was.
pub(crate) struct ArchiveBackup {
    _dir: TempDir,
    copy: Option<PathBuf>,
    original: PathBuf,
    committed: bool,
}

impl ArchiveBackup {
    /// Snapshots `archive` (which may not exist yet) into `scratch_dir`.
    pub(crate) fn take(archive: &Path, scratch_dir: &Path) -> Result<Self> {
        fs::create_dir_all(scratch_dir)?;
        let dir = tempfile::Builder::new()
            .prefix("backup-")
            .tempdir_in(scratch_dir)?;
        let copy = if archive.exists() {
            let copy = dir.path().join("archive");
            fs::copy(archive, &copy)?;
            Some(copy)
        } else {
            None
        };
        Ok(Self {
            _dir: dir,
            copy,
            original: archive.to_path_buf(),
            committed: false,
        })
    }

    /// Keeps the rewritten archive and discards the copy.
    pub(crate) fn commit(mut self) {
        self.committed = true;
    }

    /// Finishes the rewrite: commits on success, restores otherwise.
    pub(crate) fn settle<T>(self, result: Result<T>) -> Result<T> {
        if result.is_ok() {
            self.commit();
        }
        result
    }

    fn restore(&self) {
        let restored = match &self.copy {
            Some(copy) => fs::copy(copy, &self.original).map(|_| ()),
            None => match fs::remove_file(&self.original) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        match restored {
            Ok(()) => log::debug!("restored {}", self.original.display()),
            Err(e) => log::warn!("failed to restore {}: {e}", self.original.display()),
        }
    }
}

impl Drop for ArchiveBackup {
    fn drop(&mut self) {
        if !self.committed {
            self.restore();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_from_path() {
        assert_eq!(Compression::from_path(Path::new("a.tar.gz")), Compression::Gzip);
        assert_eq!(Compression::from_path(Path::new("a.TGZ")), Compression::Gzip);
        assert_eq!(Compression::from_path(Path::new("a.tar.bz2")), Compression::Bzip2);
        assert_eq!(Compression::from_path(Path::new("a.txz")), Compression::Xz);
        assert_eq!(Compression::from_path(Path::new("a.tar")), Compression::None);
    }

    #[test]
    fn test_compression_from_magic() {
        assert_eq!(Compression::from_magic(&[0x1f, 0x8b, 8]), Some(Compression::Gzip));
        assert_eq!(Compression::from_magic(b"BZh9"), Some(Compression::Bzip2));
        assert_eq!(
            Compression::from_magic(&[0xfd, b'7', b'z', b'X', b'Z', 0]),
            Some(Compression::Xz)
        );
        assert_eq!(Compression::from_magic(b"ustar"), None);
    }

    #[test]
    fn test_stored_name() {
        assert_eq!(stored_name("dir/a.txt"), "dir/a.txt");
        assert_eq!(stored_name("./a.txt"), "a.txt");
        assert_eq!(stored_name("/home/user/docs/"), "docs/");
        assert_eq!(stored_name("/home/user/a.txt"), "a.txt");
    }

    #[test]
    fn test_move_file_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("nested/dst.txt");
        fs::write(&src, b"new").unwrap();
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::write(&dst, b"old").unwrap();

        move_file(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"new");
        assert!(!src.exists());
    }

    #[test]
    fn test_copy_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tree");
        fs::create_dir_all(src.join("sub/empty")).unwrap();
        fs::write(src.join("sub/a.txt"), b"a").unwrap();

        let dst = dir.path().join("copy");
        copy_recursively(&src, &dst).unwrap();
        assert_eq!(fs::read(dst.join("sub/a.txt")).unwrap(), b"a");
        assert!(dst.join("sub/empty").is_dir());
    }

    #[test]
    fn test_backup_restores_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.rar");
        fs::write(&archive, b"original").unwrap();

        let backup = ArchiveBackup::take(&archive, dir.path()).unwrap();
        fs::write(&archive, b"half-written").unwrap();
        drop(backup);
        assert_eq!(fs::read(&archive).unwrap(), b"original");

        let fresh = dir.path().join("new.rar");
        let backup = ArchiveBackup::take(&fresh, dir.path()).unwrap();
        fs::write(&fresh, b"partial").unwrap();
        drop(backup);
        assert!(!fresh.exists());
    }

    #[test]
    fn test_backup_commit_keeps_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.rar");
        fs::write(&archive, b"original").unwrap();

        let backup = ArchiveBackup::take(&archive, dir.path()).unwrap();
        fs::write(&archive, b"rewritten").unwrap();
        backup.commit();
        assert_eq!(fs::read(&archive).unwrap(), b"rewritten");
    }

    #[test]
    fn test_backup_settle() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.rar");
        fs::write(&archive, b"original").unwrap();

        let backup = ArchiveBackup::take(&archive, dir.path()).unwrap();
        fs::write(&archive, b"broken").unwrap();
        let result: Result<()> = backup.settle(Err(crate::Error::Cancelled));
        assert!(result.is_err());
        assert_eq!(fs::read(&archive).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_backup_restores_when_future_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.rar");
        fs::write(&archive, b"original").unwrap();

        let work = {
            let archive = archive.clone();
            let scratch = dir.path().to_path_buf();
            async move {
                let backup = ArchiveBackup::take(&archive, &scratch)?;
                fs::write(&archive, b"gutted")?;
                std::future::pending::<()>().await;
                backup.settle(Ok(()))
            }
        };
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), work).await;
        assert!(timed_out.is_err());
        assert_eq!(fs::read(&archive).unwrap(), b"original");
    }
}
