//! File-name wildcard patterns (`*` and `?`).

use regex::Regex;

/// A compiled capture-file name pattern.
///
/// `*` matches any run of characters (including none) except `/`, `?`
/// matches exactly one character; everything else is literal. Patterns
/// match whole file names, never paths.
#[derive(Debug, Clone)]
pub struct FilePattern {
    original: String,
    regex: Regex,
}

impl FilePattern {
    pub fn new(glob: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            original: glob.to_string(),
            regex: Regex::new(&glob_to_regex(glob))?,
        })
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }
}

/// Convert a glob pattern to an anchored regex.
fn glob_to_regex(glob: &str) -> String {
    let mut regex_str = String::from("^");
    let mut literal = String::new();
    for c in glob.chars() {
        match c {
            '*' | '?' => {
                regex_str.push_str(&regex::escape(&literal));
                literal.clear();
                regex_str.push_str(if c == '*' { "[^/]*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    regex_str.push_str(&regex::escape(&literal));
    regex_str.push('$');
    regex_str
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, name: &str) -> bool {
        FilePattern::new(pattern).unwrap().is_match(name)
    }

    #[test]
    fn test_glob_to_regex() {
        assert_eq!(glob_to_regex("*.pcap"), r"^[^/]*\.pcap$");
        assert_eq!(glob_to_regex("cap?.pcap"), r"^cap.\.pcap$");
    }

    #[test]
    fn test_literal() {
        assert!(matches("current.pcap", "current.pcap"));
        assert!(!matches("current.pcap", "current.pcapng"));
        assert!(!matches("current.pcap", "currentXpcap"));
    }

    #[test]
    fn test_star() {
        assert!(matches("*.pcap", "a.pcap"));
        assert!(matches("*.pcap", ".pcap"));
        assert!(matches("capture-*.pcap", "capture-2024-01-01.pcap"));
        assert!(!matches("*.pcap", "a.pcap.tmp"));
        assert!(matches("*", "anything"));
        assert!(matches("a*b*c", "aXXbYYc"));
        assert!(!matches("a*b*c", "aXXbYY"));
    }

    #[test]
    fn test_question_mark() {
        assert!(matches("cap?.pcap", "cap1.pcap"));
        assert!(!matches("cap?.pcap", "cap12.pcap"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        assert!(matches("cap(1)+.pcap", "cap(1)+.pcap"));
        assert!(!matches("cap(1)+.pcap", "cap11.pcap"));
        assert!(matches("[a].pcap", "[a].pcap"));
    }

    #[test]
    fn test_empty() {
        assert!(matches("", ""));
        assert!(!matches("", "a"));
        assert!(matches("*", ""));
    }

    #[test]
    fn test_keeps_original() {
        assert_eq!(FilePattern::new("*.pcap").unwrap().as_str(), "*.pcap");
    }
}
