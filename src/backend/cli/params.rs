//! Argument templates for CLI tools.
//!
//! A [`ParameterList`] describes one tool: which programs to run, the
//! argument template for every operation, the switches substituted into
//! those templates, and the output patterns that signal passwords, damage
//! and failures.
//!
//! Templates are lists of arguments. An argument that is exactly one of the
//! tokens below is replaced by zero or more arguments; everything else is
//! passed through verbatim. Optional switches whose option is unset are
//! dropped entirely, never substituted by an empty string.
//!
//! | Token | Replaced by |
//! |-------|-------------|
//! | `$Archive` | the archive path |
//! | `$Files` | one argument per requested file |
//! | `$PathPairs` | `old new` pairs for renames |
//! | `$PasswordSwitch` | the password switch, or the header switch when adding with header encryption |
//! | `$PreservePathSwitch` | the preserve or flatten switch |
//! | `$CompressionLevelSwitch` | the compression level switch |

use std::path::Path;

use crate::entry::Entry;
use crate::password::Password;

const ARCHIVE: &str = "$Archive";
const FILES: &str = "$Files";
const PATH_PAIRS: &str = "$PathPairs";
const PASSWORD_SWITCH: &str = "$PasswordSwitch";
const PRESERVE_PATH_SWITCH: &str = "$PreservePathSwitch";
const COMPRESSION_LEVEL_SWITCH: &str = "$CompressionLevelSwitch";
const PASSWORD: &str = "$Password";
const COMPRESSION_LEVEL: &str = "$CompressionLevel";

/// Exit codes that carry meaning for a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitCodes {
    /// The tool exits with this code when the password is wrong.
    pub wrong_password: Option<i32>,
    /// The tool exits with this code when a password is needed.
    pub password_required: Option<i32>,
}

/// Description of one CLI tool.
#[derive(Debug, Clone, Default)]
pub struct ParameterList {
    /// Candidate programs for listing, first installed one wins.
    pub list_programs: Vec<String>,
    /// Template for listing.
    pub list_args: Vec<String>,
    /// Candidate programs for extraction.
    pub extract_programs: Vec<String>,
    /// Template for extraction.
    pub extract_args: Vec<String>,
    /// Candidate programs for add, delete and move.
    pub add_programs: Vec<String>,
    /// Template for adding.
    pub add_args: Vec<String>,
    /// Template for deleting.
    pub delete_args: Vec<String>,
    /// Template for native renames. Without it moves are synthesized.
    pub move_args: Option<Vec<String>>,
    /// Switches used to (preserve, flatten) paths on extraction. Without
    /// them the tool always preserves paths and flattening is done after
    /// extracting to a scratch directory.
    pub preserve_path_switch: Option<(Vec<String>, Vec<String>)>,
    /// Password switch; `$Password` is replaced inside each argument.
    pub password_switch: Vec<String>,
    /// Password switch that also encrypts the member list.
    pub password_header_switch: Vec<String>,
    /// Compression level switch; `$CompressionLevel` is replaced.
    pub compression_level_switch: Option<String>,
    /// Output that means the tool is asking for a password.
    pub password_prompt_patterns: Vec<String>,
    /// Output that means the password was rejected.
    pub wrong_password_patterns: Vec<String>,
    /// Output that means the archive is damaged.
    pub corrupt_archive_patterns: Vec<String>,
    /// Output that means extraction failed.
    pub extraction_failed_patterns: Vec<String>,
    /// Exit codes with a special meaning when listing.
    pub list_exit_codes: ExitCodes,
    /// Pass directories without their trailing slash.
    pub no_trailing_slashes: bool,
    /// Always extract into a scratch directory first.
    pub extract_in_tmp_dir: bool,
}

fn expand(template: &[String], mut token: impl FnMut(&str) -> Option<Vec<String>>) -> Vec<String> {
    let mut args = Vec::with_capacity(template.len());
    for arg in template {
        match token(arg) {
            Some(replacement) => args.extend(replacement),
            None => args.push(arg.clone()),
        }
    }
    args
}

impl ParameterList {
    fn archive_arg(archive: &Path) -> Vec<String> {
        vec![archive.to_string_lossy().into_owned()]
    }

    fn file_args(&self, files: &[Entry]) -> Vec<String> {
        files
            .iter()
            .map(|f| {
                if self.no_trailing_slashes {
                    f.full_path_without_trailing_slash().to_string()
                } else {
                    f.full_path().to_string()
                }
            })
            .collect()
    }

    /// The password switch for `password`, or nothing without a password.
    pub fn password_switch(&self, password: Option<&Password>, encrypt_header: bool) -> Vec<String> {
        let Some(password) = password.filter(|p| !p.is_empty()) else {
            return Vec::new();
        };
        let switch = if encrypt_header && !self.password_header_switch.is_empty() {
            &self.password_header_switch
        } else {
            &self.password_switch
        };
        switch
            .iter()
            .map(|s| s.replace(PASSWORD, password.as_str()))
            .collect()
    }

    /// The compression level switch, or nothing without a level.
    pub fn compression_level_switch(&self, level: Option<u32>) -> Vec<String> {
        match (&self.compression_level_switch, level) {
            (Some(switch), Some(level)) => {
                vec![switch.replace(COMPRESSION_LEVEL, &level.to_string())]
            }
            _ => Vec::new(),
        }
    }

    /// The preserve-path switch for the requested mode.
    pub fn preserve_path_switch(&self, preserve_paths: bool) -> Vec<String> {
        match &self.preserve_path_switch {
            Some((preserve, _)) if preserve_paths => preserve.clone(),
            Some((_, flatten)) => flatten.clone(),
            None => Vec::new(),
        }
    }

    /// Arguments for listing.
    pub fn substitute_list_variables(&self, archive: &Path, password: Option<&Password>) -> Vec<String> {
        expand(&self.list_args, |arg| match arg {
            ARCHIVE => Some(Self::archive_arg(archive)),
            PASSWORD_SWITCH => Some(self.password_switch(password, false)),
            _ => None,
        })
    }

    /// Arguments for extracting `files` (everything when empty).
    pub fn substitute_copy_variables(
        &self,
        archive: &Path,
        files: &[Entry],
        preserve_paths: bool,
        password: Option<&Password>,
    ) -> Vec<String> {
        expand(&self.extract_args, |arg| match arg {
            ARCHIVE => Some(Self::archive_arg(archive)),
            FILES => Some(self.file_args(files)),
            PASSWORD_SWITCH => Some(self.password_switch(password, false)),
            PRESERVE_PATH_SWITCH => Some(self.preserve_path_switch(preserve_paths)),
            _ => None,
        })
    }

    /// Arguments for adding `files`, given as paths relative to the working
    /// directory of the process.
    pub fn substitute_add_variables(
        &self,
        archive: &Path,
        files: &[String],
        password: Option<&Password>,
        encrypt_header: bool,
        compression_level: Option<u32>,
    ) -> Vec<String> {
        expand(&self.add_args, |arg| match arg {
            ARCHIVE => Some(Self::archive_arg(archive)),
            FILES => Some(files.to_vec()),
            PASSWORD_SWITCH => Some(self.password_switch(password, encrypt_header)),
            COMPRESSION_LEVEL_SWITCH => Some(self.compression_level_switch(compression_level)),
            _ => None,
        })
    }

    /// Arguments for deleting `files`.
    pub fn substitute_delete_variables(
        &self,
        archive: &Path,
        files: &[Entry],
        password: Option<&Password>,
    ) -> Vec<String> {
        expand(&self.delete_args, |arg| match arg {
            ARCHIVE => Some(Self::archive_arg(archive)),
            FILES => Some(self.file_args(files)),
            PASSWORD_SWITCH => Some(self.password_switch(password, false)),
            _ => None,
        })
    }

    /// Arguments for renaming each `(old, new)` pair, or `None` if the tool
    /// cannot rename.
    pub fn substitute_move_variables(
        &self,
        archive: &Path,
        pairs: &[(String, String)],
        password: Option<&Password>,
    ) -> Option<Vec<String>> {
        let template = self.move_args.as_ref()?;
        Some(expand(template, |arg| match arg {
            ARCHIVE => Some(Self::archive_arg(archive)),
            PATH_PAIRS => Some(
                pairs
                    .iter()
                    .flat_map(|(old, new)| {
                        [
                            old.trim_end_matches('/').to_string(),
                            new.trim_end_matches('/').to_string(),
                        ]
                    })
                    .collect(),
            ),
            PASSWORD_SWITCH => Some(self.password_switch(password, false)),
            _ => None,
        }))
    }
}

/// Builds a `Vec<String>` from string literals.
pub(crate) fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
