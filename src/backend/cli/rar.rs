//! `unrar vt` output (RAR 5 technical listing).
//!
//! ```text
//! UNRAR 5.30 freeware      Copyright (c) 1993-2015 Alexander Roshal
//!
//! Archive: /tmp/archive.rar
//! Details: RAR 5
//!
//!         Name: dir1/file1.txt
//!         Type: File
//!         Size: 6
//!  Packed size: 6
//!        mtime: 2016-03-21 08:57:36,000000000
//!   Attributes: -rw-r--r--
//!        CRC32: 1F6CE1A5
//! ```
//!
//! Each member is a block of `key: value` lines ended by a blank line. Lines
//! between the banner and `Archive:` form the archive comment.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::entry::Entry;

use super::ListParser;
use super::params::{ExitCodes, ParameterList, strings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Title,
    Comment,
    Header,
    Entries,
}

/// Line parser for `unrar vt`.
#[derive(Debug)]
pub struct RarParser {
    state: State,
    comment: String,
    record: HashMap<String, String>,
    corrupt: bool,
    header_encrypted: bool,
    locked: bool,
}

impl Default for RarParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RarParser {
    /// Creates a parser in its initial state.
    pub fn new() -> Self {
        Self {
            state: State::Title,
            comment: String::new(),
            record: HashMap::new(),
            corrupt: false,
            header_encrypted: false,
            locked: false,
        }
    }

    /// Whether the archive is locked against modification.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    fn flush(&mut self, entries: &mut Vec<Entry>) {
        let record = std::mem::take(&mut self.record);
        if let Some(entry) = entry_from_record(record) {
            entries.push(entry);
        }
    }

    fn read_details(&mut self, details: &str) {
        let details = details.to_ascii_lowercase();
        if details.contains("encrypted headers") {
            self.header_encrypted = true;
        }
        if details.contains("lock") {
            self.locked = true;
        }
    }
}

fn is_corruption(line: &str) -> bool {
    line.contains("Unexpected end of archive") || line.contains("is corrupt") || line.contains("checksum error")
}

fn parse_mtime(value: &str) -> Option<NaiveDateTime> {
    let value = value.split(',').next().unwrap_or(value).trim();
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").ok()
}

fn entry_from_record(mut record: HashMap<String, String>) -> Option<Entry> {
    let name = record.remove("name")?;
    if name.is_empty() {
        return None;
    }
    let mut entry = Entry::new(name);
    let kind = record.remove("type").unwrap_or_default();
    if kind.eq_ignore_ascii_case("directory") {
        entry.set_is_directory(true);
    }
    if let Some(size) = record.remove("size").and_then(|s| s.parse().ok()) {
        entry.size = size;
    }
    entry.compressed_size = record.remove("packed size").and_then(|s| s.parse().ok());
    entry.timestamp = record.remove("mtime").as_deref().and_then(parse_mtime);
    if let Some(flags) = record.remove("flags") {
        entry.is_password_protected = flags.contains("encrypted");
    }
    if let Some(target) = record.remove("target") {
        entry.link = Some(target);
    }
    for (key, property) in [
        ("attributes", "permissions"),
        ("crc32", "crc"),
        ("compression", "method"),
        ("ratio", "ratio"),
        ("host os", "host_os"),
    ] {
        if let Some(value) = record.remove(key) {
            entry.set_property(property, value);
        }
    }
    Some(entry)
}

impl ListParser for RarParser {
    fn reset(&mut self) {
        *self = Self::new();
    }

    fn read_line(&mut self, line: &str, entries: &mut Vec<Entry>) -> bool {
        if is_corruption(line) {
            self.corrupt = true;
            // A half-read record is dropped rather than reported malformed.
            self.record.clear();
            return true;
        }
        match self.state {
            State::Title => {
                if line.starts_with("UNRAR ") || line.starts_with("RAR ") {
                    self.state = State::Comment;
                }
            }
            State::Comment => {
                if line.starts_with("Archive: ") {
                    self.state = State::Header;
                } else {
                    self.comment.push_str(line);
                    self.comment.push('\n');
                }
            }
            State::Header => {
                if let Some(details) = line.strip_prefix("Details: ") {
                    self.read_details(details);
                    self.state = State::Entries;
                }
            }
            State::Entries => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    self.flush(entries);
                } else if let Some((key, value)) = trimmed.split_once(':') {
                    let key = key.trim().to_ascii_lowercase();
                    if key == "name" && self.record.contains_key("name") {
                        self.flush(entries);
                    }
                    self.record.insert(key, value.trim().to_string());
                } else {
                    log::warn!("unrecognized rar listing line: {line}");
                }
            }
        }
        true
    }

    fn finish(&mut self, entries: &mut Vec<Entry>) -> bool {
        self.flush(entries);
        // Output that never got past the banner is not a listing.
        self.state != State::Title || self.corrupt
    }

    fn comment(&self) -> &str {
        // Blank lines surround the comment block.
        self.comment.trim()
    }

    fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    fn is_header_encrypted(&self) -> bool {
        self.header_encrypted
    }
}

/// Tool description for `unrar` and `rar`.
pub(crate) fn parameters() -> ParameterList {
    ParameterList {
        list_programs: strings(&["unrar", "rar"]),
        list_args: strings(&["vt", "-v", "$PasswordSwitch", "$Archive"]),
        extract_programs: strings(&["unrar", "rar"]),
        extract_args: strings(&[
            "-kb",
            "-p-",
            "$PreservePathSwitch",
            "$PasswordSwitch",
            "$Archive",
            "$Files",
        ]),
        add_programs: strings(&["rar"]),
        add_args: strings(&[
            "a",
            "$Archive",
            "$PasswordSwitch",
            "$CompressionLevelSwitch",
            "$Files",
        ]),
        delete_args: strings(&["d", "$PasswordSwitch", "$Archive", "$Files"]),
        move_args: None,
        preserve_path_switch: Some((strings(&["x"]), strings(&["e"]))),
        password_switch: strings(&["-p$Password"]),
        password_header_switch: strings(&["-hp$Password"]),
        compression_level_switch: Some("-m$CompressionLevel".into()),
        password_prompt_patterns: strings(&[r"^Enter password \(will not be echoed\)"]),
        wrong_password_patterns: strings(&[
            r"password is incorrect",
            r"^Incorrect password for",
            r"wrong password",
        ]),
        corrupt_archive_patterns: strings(&[r"Unexpected end of archive", r"the file header is corrupt"]),
        extraction_failed_patterns: strings(&[r"CRC failed", r"Cannot create", r"^ERROR: "]),
        list_exit_codes: ExitCodes::default(),
        no_trailing_slashes: true,
        extract_in_tmp_dir: false,
    }
}
