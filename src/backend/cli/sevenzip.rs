//! `7z l -slt` output.
//!
//! ```text
//! 7-Zip [64] 16.02 : Copyright (c) 1999-2016 Igor Pavlov : 2016-05-21
//!
//! Listing archive: /tmp/archive.7z
//!
//! --
//! Path = /tmp/archive.7z
//! Type = 7z
//! Physical Size = 420
//!
//! ----------
//! Path = dir1/a.txt
//! Size = 6
//! Packed Size = 176
//! Modified = 2016-03-21 08:57:36
//! Attributes = A -rw-r--r--
//! CRC = 1F6CE1A5
//! Encrypted = -
//! Method = LZMA2:12
//! ```
//!
//! The block before `----------` describes the archive, every block after it
//! one member.

use chrono::NaiveDateTime;

use crate::entry::Entry;

use super::ListParser;
use super::params::{ExitCodes, ParameterList, strings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Title,
    Header,
    ArchiveInformation,
    Comment,
    Entries,
}

/// Line parser for `7z l -slt`.
#[derive(Debug)]
pub struct SevenZipParser {
    state: State,
    archive_type: String,
    comment: String,
    current: Option<Entry>,
    corrupt: bool,
}

impl Default for SevenZipParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SevenZipParser {
    /// Creates a parser in its initial state.
    pub fn new() -> Self {
        Self {
            state: State::Title,
            archive_type: String::new(),
            comment: String::new(),
            current: None,
            corrupt: false,
        }
    }

    /// The archive type 7-Zip detected (`7z`, `zip`, ...).
    pub fn archive_type(&self) -> &str {
        &self.archive_type
    }

    fn flush(&mut self, entries: &mut Vec<Entry>) {
        if let Some(entry) = self.current.take() {
            entries.push(entry);
        }
    }

    fn read_archive_information(&mut self, line: &str) {
        if line.starts_with("----------") {
            self.state = State::Entries;
        } else if let Some(kind) = line.strip_prefix("Type = ") {
            self.archive_type = kind.trim().to_string();
        } else if let Some(comment) = line.strip_prefix("Comment = ") {
            self.comment.push_str(comment);
            self.comment.push('\n');
            self.state = State::Comment;
        } else if line.starts_with("Warnings:") || line.contains("Unexpected end of archive") {
            self.corrupt = true;
        }
    }

    fn read_entry_line(&mut self, line: &str, entries: &mut Vec<Entry>) {
        if line.trim().is_empty() {
            self.flush(entries);
            return;
        }
        let Some((key, value)) = line.split_once(" = ").or_else(|| {
            line.strip_suffix(" =").map(|key| (key, ""))
        }) else {
            if line.contains("ERROR") || line.contains("Unexpected end") {
                self.corrupt = true;
                self.current = None;
            }
            return;
        };

        if key == "Path" {
            self.flush(entries);
            self.current = Some(Entry::new(value.replace('\\', "/")));
            return;
        }
        let Some(entry) = self.current.as_mut() else {
            return;
        };
        match key {
            "Size" => entry.size = value.parse().unwrap_or(0),
            "Packed Size" => {
                // Solid 7z blocks report the whole block on the first member.
                if self.archive_type != "7z" {
                    entry.compressed_size = value.parse().ok();
                }
            }
            "Modified" => {
                let stamp = value.get(..19).unwrap_or(value);
                entry.timestamp = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S").ok();
            }
            "Attributes" => {
                if value.split(' ').next().is_some_and(|a| a.contains('D')) {
                    entry.set_is_directory(true);
                }
                if let Some(perms) = value.split(' ').nth(1) {
                    entry.set_property("permissions", perms);
                }
            }
            "Folder" => {
                if value == "+" {
                    entry.set_is_directory(true);
                }
            }
            "Encrypted" => entry.is_password_protected = value == "+",
            "CRC" if !value.is_empty() => entry.set_property("crc", value),
            "Method" if !value.is_empty() => entry.set_property("method", value),
            "Symbolic Link" | "Link" if !value.is_empty() => entry.link = Some(value.to_string()),
            _ => {}
        }
    }
}

impl ListParser for SevenZipParser {
    fn reset(&mut self) {
        *self = Self::new();
    }

    fn read_line(&mut self, line: &str, entries: &mut Vec<Entry>) -> bool {
        match self.state {
            State::Title => {
                if line.starts_with("7-Zip") || line.starts_with("p7zip") {
                    self.state = State::Header;
                }
            }
            State::Header => {
                if line.starts_with("Listing archive:") {
                    self.state = State::ArchiveInformation;
                } else if line.contains("Can not open the file as archive")
                    || line.contains("Can not open the file as [")
                {
                    return false;
                }
            }
            State::ArchiveInformation => self.read_archive_information(line),
            State::Comment => {
                if line.starts_with("----------") {
                    self.state = State::Entries;
                } else if line.contains(" = ") && !line.starts_with(' ') {
                    self.state = State::ArchiveInformation;
                    self.read_archive_information(line);
                } else {
                    self.comment.push_str(line);
                    self.comment.push('\n');
                }
            }
            State::Entries => self.read_entry_line(line, entries),
        }
        true
    }

    fn finish(&mut self, entries: &mut Vec<Entry>) -> bool {
        self.flush(entries);
        self.state != State::Title || self.corrupt
    }

    fn comment(&self) -> &str {
        self.comment.trim()
    }

    fn is_corrupt(&self) -> bool {
        self.corrupt
    }
}

/// Tool description for `7z`.
pub(crate) fn parameters() -> ParameterList {
    ParameterList {
        list_programs: strings(&["7z", "7za", "7zz"]),
        list_args: strings(&["l", "-slt", "$PasswordSwitch", "$Archive"]),
        extract_programs: strings(&["7z", "7za", "7zz"]),
        extract_args: strings(&[
            "$PreservePathSwitch",
            "-y",
            "$PasswordSwitch",
            "$Archive",
            "$Files",
        ]),
        add_programs: strings(&["7z", "7za", "7zz"]),
        add_args: strings(&[
            "a",
            "-l",
            "$Archive",
            "$PasswordSwitch",
            "$CompressionLevelSwitch",
            "$Files",
        ]),
        delete_args: strings(&["d", "$PasswordSwitch", "$Archive", "$Files"]),
        move_args: Some(strings(&["rn", "$PasswordSwitch", "$Archive", "$PathPairs"])),
        preserve_path_switch: Some((strings(&["x"]), strings(&["e"]))),
        password_switch: strings(&["-p$Password"]),
        password_header_switch: strings(&["-p$Password", "-mhe=on"]),
        compression_level_switch: Some("-mx=$CompressionLevel".into()),
        password_prompt_patterns: strings(&[r"^Enter password \(will not be echoed\)"]),
        wrong_password_patterns: strings(&[
            r"Wrong password",
            r"Can not open encrypted archive\. Wrong password\?",
        ]),
        corrupt_archive_patterns: strings(&[r"Unexpected end of archive", r"Headers Error"]),
        extraction_failed_patterns: strings(&[r"^ERROR: ", r"Can't open as archive", r"CRC Failed"]),
        list_exit_codes: ExitCodes::default(),
        no_trailing_slashes: true,
        extract_in_tmp_dir: false,
    }
}
