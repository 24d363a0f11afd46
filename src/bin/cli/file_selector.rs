//! Member selection using glob patterns.

use archivist::{Entry, EntryTree};
use glob::{MatchOptions, Pattern};

/// Error type for file selector operations
#[derive(Debug)]
pub struct PatternError(pub String);

impl std::fmt::Display for PatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid glob pattern: {}", self.0)
    }
}

impl std::error::Error for PatternError {}

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Member selector based on include and exclude glob patterns
pub struct FileSelector {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl FileSelector {
    /// Creates a new file selector from pattern strings
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, PatternError> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p.trim_end_matches('/')).map_err(|e| PatternError(e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Whether no pattern was given, i.e. everything is selected.
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Checks if an archive path matches the selection criteria
    pub fn matches(&self, path: &str) -> bool {
        let path = path.trim_end_matches('/');

        // If include patterns specified, at least one must match
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches_with(path, OPTIONS))
        {
            return false;
        }

        // None of the exclude patterns should match
        !self.exclude.iter().any(|p| p.matches_with(path, OPTIONS))
    }

    /// The matching members of `tree`, in tree order.
    ///
    /// With `files_only`, directories are left out so a directory pattern
    /// does not pull in members an exclude pattern dropped.
    pub fn select(&self, tree: &EntryTree, files_only: bool) -> Vec<Entry> {
        tree.iter()
            .map(|(_, entry)| entry)
            .filter(|entry| !(files_only && entry.is_dir()))
            .filter(|entry| self.matches(entry.full_path()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_patterns() {
        let selector =
            FileSelector::new(&["*.txt".to_string(), "docs/*".to_string()], &[]).unwrap();

        assert!(selector.matches("readme.txt"));
        assert!(selector.matches("docs/manual.pdf"));
        assert!(!selector.matches("image.png"));
    }

    #[test]
    fn test_exclude_patterns() {
        let selector = FileSelector::new(&[], &["*.log".to_string(), "tmp/*".to_string()]).unwrap();

        assert!(selector.matches("readme.txt"));
        assert!(!selector.matches("debug.log"));
        assert!(!selector.matches("tmp/cache.dat"));
    }

    #[test]
    fn test_directory_pattern_ignores_trailing_slash() {
        let selector = FileSelector::new(&["docs/".to_string()], &[]).unwrap();
        assert!(selector.matches("docs/"));
        assert!(selector.matches("docs"));
        assert!(!selector.matches("docs/a.txt"));
    }

    #[test]
    fn test_select_from_tree() {
        let mut tree = EntryTree::new();
        tree.insert(Entry::new("src/main.rs"));
        tree.insert(Entry::new("src/lib.rs"));
        tree.insert(Entry::new("README.md"));

        let selector = FileSelector::new(&["src/*".to_string()], &["*/lib.rs".to_string()]).unwrap();
        let picked: Vec<_> = selector
            .select(&tree, true)
            .iter()
            .map(|e| e.full_path().to_string())
            .collect();
        assert_eq!(picked, ["src/main.rs"]);

        let everything = FileSelector::new(&[], &[]).unwrap();
        assert!(everything.is_empty());
        // The synthesized "src/" directory is selected too.
        assert_eq!(everything.select(&tree, false).len(), 4);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(FileSelector::new(&["[".to_string()], &[]).is_err());
    }
}
