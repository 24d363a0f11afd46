//! Read-only backend for a single compressed file (`notes.txt.gz`).
//!
//! The archive holds exactly one member, named after the archive without its
//! compression extension.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};

use crate::entry::Entry;
use crate::interface::{ArchiveInterface, Capabilities, InterfaceState, JobContext};
use crate::options::ExtractionOptions;
use crate::{Error, Result};

use super::Compression;

/// Backend for `.gz`, `.bz2` and `.xz` files that are not tarballs.
#[derive(Debug)]
pub struct SingleFileInterface {
    state: InterfaceState,
}

impl SingleFileInterface {
    /// Creates a backend for `filename`.
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            state: InterfaceState::new(filename),
        }
    }

    /// Name of the single member.
    pub fn uncompressed_name(&self) -> String {
        uncompressed_name(&self.state.filename)
    }
}

/// Strips the compression extension; unknown extensions get `.uncompressed`
/// appended instead.
///
/// ```rust
/// use std::path::Path;
/// use archivist::backend::single_file::uncompressed_name;
///
/// assert_eq!(uncompressed_name(Path::new("/tmp/notes.txt.gz")), "notes.txt");
/// assert_eq!(uncompressed_name(Path::new("drawing.svgz")), "drawing.svg");
/// assert_eq!(uncompressed_name(Path::new("blob")), "blob.uncompressed");
/// ```
pub fn uncompressed_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".svgz") {
        return format!("{}.svg", &name[..name.len() - 5]);
    }
    for ext in [".gz", ".bz2", ".xz"] {
        if lower.ends_with(ext) && name.len() > ext.len() {
            return name[..name.len() - ext.len()].to_string();
        }
    }
    format!("{name}.uncompressed")
}

fn decompressed_size(path: &Path) -> Result<u64> {
    let file = BufReader::new(File::open(path)?);
    let mut decoder = Compression::detect(path).decoder(file)?;
    io::copy(&mut decoder, &mut io::sink()).map_err(|e| Error::ArchiveCorrupt {
        reason: e.to_string(),
    })
}

fn decompress(path: &Path, target: &Path) -> Result<()> {
    let file = BufReader::new(File::open(path)?);
    let mut decoder = Compression::detect(path).decoder(file)?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(target)?);
    io::copy(&mut decoder, &mut out)?;
    io::Write::flush(&mut out)?;
    Ok(())
}

#[async_trait]
impl ArchiveInterface for SingleFileInterface {
    fn name(&self) -> &str {
        "singlefile"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::read_only()
    }

    fn state(&self) -> &InterfaceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut InterfaceState {
        &mut self.state
    }

    async fn list(&mut self, ctx: &JobContext) -> Result<()> {
        let path = self.state.filename.clone();
        let meta = fs::metadata(&path)?;
        let size = tokio::task::spawn_blocking(move || decompressed_size(&path))
            .await
            .map_err(|e| Error::failed_with_details("Archive worker failed", e.to_string()))??;

        let mut entry = Entry::new(self.uncompressed_name());
        entry.size = size;
        entry.compressed_size = Some(meta.len());
        entry.timestamp = meta
            .modified()
            .ok()
            .map(|t| DateTime::<Local>::from(t).naive_local());
        ctx.entry(entry);
        Ok(())
    }

    async fn copy_files(
        &mut self,
        _files: &[Entry],
        destination: &Path,
        _options: &ExtractionOptions,
        ctx: &JobContext,
    ) -> Result<()> {
        let path = self.state.filename.clone();
        let target = destination.join(self.uncompressed_name());
        tokio::task::spawn_blocking(move || decompress(&path, &target))
            .await
            .map_err(|e| Error::failed_with_details("Archive worker failed", e.to_string()))??;
        ctx.progress(1.0);
        Ok(())
    }
}
