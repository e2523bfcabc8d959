//! CTF flag detection and deduplicating capture store
//!
//! Detection is a pure scan over a swappable pattern list; the store keys
//! captures by token content so the first finder wins and later identical
//! submissions are rejected rather than overwritten.

use log::info;
use regex::RegexBuilder;
use serde::Serialize;
use shared::unix_timestamp;
use std::collections::HashMap;

/// Default pattern list, ordered more-specific first so platform-prefixed
/// tokens are not shadowed by the generic forms; bare hash patterns come
/// last because they false-positive the most.
const DEFAULT_PATTERNS: &[&str] = &[
    // Specific platforms
    r"INTIGRITI\{[^}]*\}",
    r"BUGCROWD\{[^}]*\}",
    r"picoCTF\{[^}]*\}",
    r"HTB\{[^}]*\}",
    r"THM\{[^}]*\}",
    // Standard brace formats
    r"flag\{[^}]*\}",
    r"CTF\{[^}]*\}",
    r"flg\{[^}]*\}",
    // Alternative delimiters
    r"flag\[[^\]]*\]",
    r"CTF\[[^\]]*\]",
    r"flag\([^)]*\)",
    r"flag<[^>]*>",
    // Separator formats
    r"flag:[A-Za-z0-9_\-=+/]+",
    r"CTF:[A-Za-z0-9_\-=+/]+",
    r"flag=[A-Za-z0-9_\-=+/]{3,}",
    // Prefix format
    r"_flag_[A-Za-z0-9_\-]{3,}",
    // Crypto hashes
    r"\b[a-f0-9]{32}\b",
    r"\b[a-f0-9]{40}\b",
    r"\b[a-f0-9]{64}\b",
    r"\b[a-f0-9]{128}\b",
];

/// Scans text for flag-shaped tokens. Matching is case-insensitive but the
/// captured token preserves the original casing.
pub struct FlagDetector {
    patterns: Vec<regex::Regex>,
}

impl FlagDetector {
    pub fn new() -> Self {
        Self::with_patterns(DEFAULT_PATTERNS)
    }

    /// Builds a detector from a custom pattern list. Invalid patterns are
    /// skipped; the core state machine never depends on the list contents.
    pub fn with_patterns(patterns: &[&str]) -> Self {
        let compiled = patterns
            .iter()
            .filter_map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .ok()
            })
            .collect();
        FlagDetector { patterns: compiled }
    }

    /// Returns the unique tokens found in `content`, in first-seen order.
    pub fn detect(&self, content: &str) -> Vec<String> {
        let mut found = Vec::new();
        for pattern in &self.patterns {
            for capture in pattern.find_iter(content) {
                let token = capture.as_str().to_string();
                if !found.contains(&token) {
                    found.push(token);
                }
            }
        }
        found
    }
}

impl Default for FlagDetector {
    fn default() -> Self {
        FlagDetector::new()
    }
}

/// A captured flag with finder attribution.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedFlag {
    pub content: String,
    pub finder: String,
    pub room: String,
    pub timestamp: f64,
    pub message_preview: String,
}

/// Deduplicating archive of captured flags, keyed by token content.
#[derive(Default)]
pub struct FlagStore {
    flags: HashMap<String, CapturedFlag>,
}

impl FlagStore {
    pub fn new() -> Self {
        FlagStore {
            flags: HashMap::new(),
        }
    }

    /// First-writer-wins insert. Returns false when the token is already
    /// recorded; the existing record is never overwritten.
    pub fn store(&mut self, content: &str, finder: &str, room: &str, preview: &str) -> bool {
        if self.flags.contains_key(content) {
            return false;
        }
        self.flags.insert(
            content.to_string(),
            CapturedFlag {
                content: content.to_string(),
                finder: finder.to_string(),
                room: room.to_string(),
                timestamp: unix_timestamp(),
                message_preview: preview.to_string(),
            },
        );
        info!("Flag captured: {} by {}", content, finder);
        true
    }

    /// Snapshot of every captured flag.
    pub fn all(&self) -> Vec<CapturedFlag> {
        let mut flags: Vec<CapturedFlag> = self.flags.values().cloned().collect();
        flags.sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap_or(std::cmp::Ordering::Equal));
        flags
    }

    pub fn get(&self, content: &str) -> Option<&CapturedFlag> {
        self.flags.get(content)
    }

    pub fn count(&self) -> usize {
        self.flags.len()
    }

    pub fn clear(&mut self) {
        self.flags.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_standard_brace_flags() {
        let detector = FlagDetector::new();
        let found = detector.detect("the answer is flag{abc_123} obviously");
        assert_eq!(found, vec!["flag{abc_123}".to_string()]);
    }

    #[test]
    fn detection_is_case_insensitive_but_case_preserving() {
        let detector = FlagDetector::new();
        let found = detector.detect("FLAG{LoUd} and ctf{quiet}");
        assert!(found.contains(&"FLAG{LoUd}".to_string()));
        assert!(found.contains(&"ctf{quiet}".to_string()));
    }

    #[test]
    fn detects_platform_and_separator_formats() {
        let detector = FlagDetector::new();
        assert_eq!(
            detector.detect("got HTB{root_dance} today"),
            vec!["HTB{root_dance}".to_string()]
        );
        assert_eq!(
            detector.detect("submit flag:aGVsbG8= now"),
            vec!["flag:aGVsbG8=".to_string()]
        );
        assert_eq!(
            detector.detect("picoCTF{tiny}"),
            vec!["picoCTF{tiny}".to_string()]
        );
    }

    #[test]
    fn detects_bare_md5_hash() {
        let detector = FlagDetector::new();
        let found = detector.detect("hash d41d8cd98f00b204e9800998ecf8427e here");
        assert_eq!(found, vec!["d41d8cd98f00b204e9800998ecf8427e".to_string()]);
    }

    #[test]
    fn plain_chatter_yields_nothing() {
        let detector = FlagDetector::new();
        assert!(detector.detect("lunch at noon?").is_empty());
    }

    #[test]
    fn duplicate_token_in_one_message_reported_once() {
        let detector = FlagDetector::new();
        let found = detector.detect("flag{dup} flag{dup}");
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn custom_pattern_list_is_swappable() {
        let detector = FlagDetector::with_patterns(&[r"secret-[0-9]+"]);
        assert_eq!(
            detector.detect("found secret-42 but not flag{x}"),
            vec!["secret-42".to_string()]
        );
    }

    #[test]
    fn store_is_first_writer_wins() {
        let mut store = FlagStore::new();
        assert!(store.store("flag{one}", "alice", "general", "flag{one} hi"));
        assert!(!store.store("flag{one}", "bob", "vault", "stolen"));

        let flags = store.all();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].finder, "alice");
        assert_eq!(flags[0].room, "general");
        assert_eq!(store.get("flag{one}").unwrap().finder, "alice");
        assert!(store.get("flag{two}").is_none());
    }

    #[test]
    fn store_count_and_clear() {
        let mut store = FlagStore::new();
        store.store("flag{a}", "alice", "general", "");
        store.store("flag{b}", "bob", "general", "");
        assert_eq!(store.count(), 2);

        store.clear();
        assert_eq!(store.count(), 0);
    }
}
