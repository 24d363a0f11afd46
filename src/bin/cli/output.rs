//! Output formatting for CLI operations.

use std::path::PathBuf;

use archivist::{EncryptionType, Entry, ListSummary};
use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::json;

/// What `info` reports about an archive.
#[derive(Debug, Serialize)]
pub struct ArchiveReport {
    pub path: PathBuf,
    pub mime_type: String,
    pub plugin: Option<String>,
    pub read_only: bool,
    pub encryption: EncryptionType,
    pub number_of_files: usize,
    pub number_of_dirs: usize,
    pub unpacked_size: u64,
    pub packed_size: u64,
    pub single_folder: bool,
    pub subfolder_name: String,
    pub corrupt: bool,
    pub comment: String,
}

impl ArchiveReport {
    /// Packed size as a fraction of the unpacked size.
    pub fn compression_ratio(&self) -> f64 {
        if self.unpacked_size == 0 {
            0.0
        } else {
            self.packed_size as f64 / self.unpacked_size as f64
        }
    }
}

/// One row of `plugins`.
#[derive(Debug, Serialize)]
pub struct PluginRow {
    pub id: String,
    pub priority: u32,
    pub enabled: bool,
    pub available: bool,
    pub read_write: bool,
    pub mime_types: Vec<String>,
}

/// The result of a job that changes files.
#[derive(Debug, Serialize)]
pub struct OperationReport {
    pub operation: &'static str,
    pub archive: PathBuf,
    pub members: usize,
    pub destination: Option<String>,
    pub warnings: Vec<String>,
}

/// Trait for output formatting
pub trait OutputFormatter {
    /// Formats a listing
    fn format_list(&self, summary: &ListSummary, technical: bool) -> String;

    /// Formats archive information
    fn format_info(&self, report: &ArchiveReport) -> String;

    /// Formats the plugin table
    fn format_plugins(&self, plugins: &[PluginRow]) -> String;

    /// Formats the result of extract, add, delete, move or compress
    fn format_operation(&self, report: &OperationReport) -> String;
}

/// Human-readable output formatter
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn format_list(&self, summary: &ListSummary, technical: bool) -> String {
        let mut output = String::new();

        // Header
        if technical {
            output.push_str(&format!(
                "{:>12} {:>12} {:>19} {:>4} {}\n",
                "Size", "Packed", "Modified", "Attr", "Name"
            ));
        } else {
            output.push_str(&format!("{:>12} {:>19} {}\n", "Size", "Modified", "Name"));
        }
        output.push_str(&"-".repeat(70));
        output.push('\n');

        for (_, entry) in summary.tree.iter() {
            let size_str = if entry.is_dir() {
                String::new()
            } else {
                humanize_bytes(entry.size)
            };
            let mtime_str = entry
                .timestamp
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string());
            let name = match &entry.link {
                Some(target) => format!("{} -> {}", entry.full_path(), target),
                None => entry.full_path().to_string(),
            };

            if technical {
                let packed_str = entry
                    .compressed_size
                    .map(humanize_bytes)
                    .unwrap_or_else(|| "-".to_string());
                output.push_str(&format!(
                    "{:>12} {:>12} {:>19} {:>4} {}\n",
                    size_str,
                    packed_str,
                    mtime_str,
                    attributes(entry),
                    name
                ));
                for (key, value) in &entry.properties {
                    output.push_str(&format!("{:>51}{key}: {value}\n", ""));
                }
            } else {
                output.push_str(&format!("{:>12} {:>19} {}\n", size_str, mtime_str, name));
            }
        }

        // Footer
        output.push_str(&"-".repeat(70));
        output.push('\n');
        output.push_str(&format!(
            "{} files, {} directories, {} total\n",
            summary.number_of_files,
            summary.number_of_dirs,
            humanize_bytes(summary.extracted_files_size)
        ));
        if !summary.comment.is_empty() {
            output.push_str(&format!("Comment: {}\n", summary.comment));
        }
        if summary.is_corrupt {
            output.push_str("Warning: the archive is damaged, the listing may be incomplete\n");
        }

        output
    }

    fn format_info(&self, report: &ArchiveReport) -> String {
        let mut output = String::new();

        output.push_str("Archive Information:\n");
        output.push_str(&"-".repeat(40));
        output.push('\n');
        output.push_str(&format!("  Path:           {}\n", report.path.display()));
        output.push_str(&format!("  Type:           {}\n", report.mime_type));
        output.push_str(&format!(
            "  Plugin:         {}\n",
            report.plugin.as_deref().unwrap_or("-")
        ));
        output.push_str(&format!(
            "  Read-only:      {}\n",
            if report.read_only { "Yes" } else { "No" }
        ));
        output.push_str(&format!("  Files:          {}\n", report.number_of_files));
        output.push_str(&format!("  Directories:    {}\n", report.number_of_dirs));
        output.push_str(&format!(
            "  Total size:     {}\n",
            humanize_bytes(report.unpacked_size)
        ));
        output.push_str(&format!(
            "  Packed size:    {}\n",
            humanize_bytes(report.packed_size)
        ));
        output.push_str(&format!(
            "  Ratio:          {:.1}%\n",
            report.compression_ratio() * 100.0
        ));
        let encryption = match report.encryption {
            EncryptionType::Unencrypted => "No",
            EncryptionType::Encrypted => "Yes",
            EncryptionType::HeaderEncrypted => "Yes, including the member list",
        };
        output.push_str(&format!("  Encrypted:      {encryption}\n"));
        if report.single_folder {
            output.push_str(&format!("  Single folder:  {}\n", report.subfolder_name));
        }
        if report.corrupt {
            output.push_str("  Damaged:        Yes\n");
        }
        if !report.comment.is_empty() {
            output.push_str(&format!("  Comment:        {}\n", report.comment));
        }

        output
    }

    fn format_plugins(&self, plugins: &[PluginRow]) -> String {
        let mut output = format!(
            "{:<16} {:>8} {:<10} {}\n",
            "Plugin", "Priority", "Status", "Types"
        );
        output.push_str(&"-".repeat(70));
        output.push('\n');
        for plugin in plugins {
            let status = match (plugin.enabled, plugin.available, plugin.read_write) {
                (false, _, _) => "disabled",
                (true, false, _) => "missing",
                (true, true, true) => "rw",
                (true, true, false) => "ro",
            };
            output.push_str(&format!(
                "{:<16} {:>8} {:<10} {}\n",
                plugin.id,
                plugin.priority,
                status,
                plugin.mime_types.join(", ")
            ));
        }
        output
    }

    fn format_operation(&self, report: &OperationReport) -> String {
        let mut output = match (report.operation, &report.destination) {
            ("extract", Some(dest)) => format!("Extracted {} into {dest}\n", members(report.members)),
            ("extract", None) => format!("Extracted {}\n", members(report.members)),
            ("add", _) => format!(
                "Added {} to {}\n",
                members(report.members),
                report.archive.display()
            ),
            ("delete", _) => format!(
                "Deleted {} from {}\n",
                members(report.members),
                report.archive.display()
            ),
            ("move", Some(dest)) => format!("Moved {} to {dest}\n", members(report.members)),
            ("compress", _) => format!(
                "Created {} with {}\n",
                report.archive.display(),
                members(report.members)
            ),
            (op, _) => format!("{op}: {}\n", members(report.members)),
        };
        if !report.warnings.is_empty() {
            output.push_str(&format!("Completed with {} warning(s)\n", report.warnings.len()));
        }
        output
    }
}

/// JSON output formatter
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format_list(&self, summary: &ListSummary, _technical: bool) -> String {
        let items: Vec<_> = summary
            .tree
            .iter()
            .map(|(_, e)| {
                json!({
                    "path": e.full_path(),
                    "is_directory": e.is_dir(),
                    "size": e.size,
                    "compressed_size": e.compressed_size,
                    "modified": e.timestamp.map(format_timestamp),
                    "encrypted": e.is_password_protected,
                    "link": e.link,
                    "properties": e.properties,
                })
            })
            .collect();
        let obj = json!({
            "entries": items,
            "number_of_files": summary.number_of_files,
            "number_of_dirs": summary.number_of_dirs,
            "extracted_files_size": summary.extracted_files_size,
            "is_password_protected": summary.is_password_protected,
            "is_header_encrypted": summary.is_header_encrypted,
            "is_corrupt": summary.is_corrupt,
            "comment": summary.comment,
        });

        serde_json::to_string_pretty(&obj).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_info(&self, report: &ArchiveReport) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_plugins(&self, plugins: &[PluginRow]) -> String {
        serde_json::to_string_pretty(plugins).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_operation(&self, report: &OperationReport) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Creates the appropriate formatter based on output format
pub fn create_formatter(format: super::OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        super::OutputFormat::Human => Box::new(HumanFormatter),
        super::OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Converts bytes to a human-readable string
pub fn humanize_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Formats an archive timestamp
pub fn format_timestamp(time: NaiveDateTime) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Short attribute column: directory, link, encrypted.
fn attributes(entry: &Entry) -> String {
    let mut attrs = String::new();
    attrs.push(if entry.is_dir() { 'D' } else { '.' });
    attrs.push(if entry.link.is_some() { 'L' } else { '.' });
    attrs.push(if entry.is_password_protected { '*' } else { '.' });
    attrs
}

fn members(count: usize) -> String {
    match count {
        0 => "all members".to_string(),
        1 => "1 member".to_string(),
        n => format!("{n} members"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_humanize_bytes() {
        assert_eq!(humanize_bytes(512), "512 B");
        assert_eq!(humanize_bytes(1536), "1.5 KB");
        assert_eq!(humanize_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_timestamp() {
        let ts = chrono::NaiveDate::from_ymd_opt(2016, 3, 18)
            .and_then(|d| d.and_hms_opt(9, 5, 7))
            .unwrap();
        assert_eq!(format_timestamp(ts), "2016-03-18 09:05:07");
    }

    fn summary() -> ListSummary {
        let mut summary = ListSummary::default();
        let mut file = Entry::new("docs/readme.txt");
        file.size = 2048;
        file.is_password_protected = true;
        summary.tree.insert(file);
        summary.number_of_files = 1;
        summary.number_of_dirs = 1;
        summary.extracted_files_size = 2048;
        summary
    }

    #[test]
    fn test_human_list() {
        let out = HumanFormatter.format_list(&summary(), true);
        assert!(out.contains("docs/readme.txt"));
        assert!(out.contains("2.0 KB"));
        assert!(out.contains("..*"));
        assert!(out.contains("1 files, 1 directories"));
    }

    #[test]
    fn test_json_list() {
        let out = JsonFormatter.format_list(&summary(), false);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["number_of_files"], 1);
        let paths: Vec<_> = value["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["path"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(paths, ["docs/", "docs/readme.txt"]);
        assert_eq!(value["entries"][1]["encrypted"], true);
    }

    #[test]
    fn test_operation_messages() {
        let report = OperationReport {
            operation: "delete",
            archive: PathBuf::from("a.tar"),
            members: 2,
            destination: None,
            warnings: vec!["skipped x".into()],
        };
        let out = HumanFormatter.format_operation(&report);
        assert!(out.starts_with("Deleted 2 members from a.tar"));
        assert!(out.contains("1 warning"));
    }
}
