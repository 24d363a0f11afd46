//! `lsar -json` output.
//!
//! The whole output is one JSON document, so lines are collected and parsed
//! when the listing ends.

use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;

use crate::entry::Entry;

use super::ListParser;
use super::params::{ExitCodes, ParameterList, strings};

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(rename = "lsarContents", default)]
    contents: Vec<Member>,
    #[serde(rename = "lsarProperties", default)]
    properties: Option<Properties>,
    #[serde(rename = "lsarError", default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Properties {
    #[serde(rename = "XADComment", default)]
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Member {
    #[serde(rename = "XADFileName")]
    name: String,
    #[serde(rename = "XADIsDirectory", default)]
    is_directory: Option<Value>,
    #[serde(rename = "XADFileSize", default)]
    size: Option<u64>,
    #[serde(rename = "XADCompressedSize", default)]
    compressed_size: Option<u64>,
    #[serde(rename = "XADLastModificationDate", default)]
    modified: Option<String>,
    #[serde(rename = "XADIsEncrypted", default)]
    is_encrypted: Option<Value>,
    #[serde(rename = "XADLinkDestination", default)]
    link: Option<String>,
    #[serde(rename = "XADPosixPermissions", default)]
    permissions: Option<u32>,
}

/// lsar writes flags as `0`/`1` or as booleans depending on the version.
fn truthy(value: &Option<Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_u64().is_some_and(|n| n != 0),
        _ => false,
    }
}

fn parse_date(value: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S %z")
        .map(|d| d.naive_local())
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

impl Member {
    fn into_entry(self) -> Entry {
        let mut entry = Entry::new(self.name);
        if truthy(&self.is_directory) {
            entry.set_is_directory(true);
        }
        entry.size = self.size.unwrap_or(0);
        entry.compressed_size = self.compressed_size;
        entry.timestamp = self.modified.as_deref().and_then(parse_date);
        entry.is_password_protected = truthy(&self.is_encrypted);
        entry.link = self.link;
        if let Some(mode) = self.permissions {
            entry.set_property("permissions", format!("{mode:o}"));
        }
        entry
    }
}

/// Parser for `lsar -json`.
#[derive(Debug, Default)]
pub struct UnarchiverParser {
    buffer: String,
    comment: String,
    corrupt: bool,
}

impl UnarchiverParser {
    /// Creates an empty parser.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ListParser for UnarchiverParser {
    fn reset(&mut self) {
        *self = Self::new();
    }

    fn read_line(&mut self, line: &str, _entries: &mut Vec<Entry>) -> bool {
        self.buffer.push_str(line);
        self.buffer.push('\n');
        true
    }

    fn finish(&mut self, entries: &mut Vec<Entry>) -> bool {
        if self.buffer.trim().is_empty() {
            // Nothing printed: the exit code tells what happened.
            return true;
        }
        let listing: Listing = match serde_json::from_str(&self.buffer) {
            Ok(listing) => listing,
            Err(e) => {
                log::warn!("unparseable lsar output: {e}");
                return false;
            }
        };
        if listing.error.is_some_and(|e| !e.is_null() && e != Value::from(0)) {
            self.corrupt = true;
        }
        if let Some(comment) = listing.properties.and_then(|p| p.comment) {
            self.comment = comment;
        }
        entries.extend(listing.contents.into_iter().map(Member::into_entry));
        true
    }

    fn comment(&self) -> &str {
        &self.comment
    }

    fn is_corrupt(&self) -> bool {
        self.corrupt
    }
}

/// Tool description for `lsar` and `unar`.
pub(crate) fn parameters() -> ParameterList {
    ParameterList {
        list_programs: strings(&["lsar"]),
        list_args: strings(&["-json", "$PasswordSwitch", "$Archive"]),
        extract_programs: strings(&["unar"]),
        extract_args: strings(&[
            "-D",
            "-q",
            "-f",
            "$PasswordSwitch",
            "$Archive",
            "$Files",
        ]),
        password_switch: strings(&["-password", "$Password"]),
        password_prompt_patterns: strings(&[r"This archive requires a password to unpack"]),
        wrong_password_patterns: strings(&[r"Incorrect password", r"Wrong password"]),
        corrupt_archive_patterns: strings(&[r"Archive parsing failed", r"Unexpected end of file"]),
        extraction_failed_patterns: strings(&[r"Failed! \(", r"Extraction to current directory failed"]),
        list_exit_codes: ExitCodes {
            wrong_password: Some(1),
            password_required: Some(2),
        },
        extract_in_tmp_dir: true,
        ..ParameterList::default()
    }
}
