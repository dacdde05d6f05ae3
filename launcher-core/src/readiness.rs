//! Streaming detection of the Storybook "started" banner and its local URL.
//!
//! Output arrives as raw chunks with arbitrary boundaries. The scanner keeps a
//! bounded tail of recent text so a banner split across two chunks is still
//! matched, and it fires at most once.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{LaunchPreferences, DEFAULT_READY_PATTERN, DEFAULT_URL_PATTERN};
use crate::error::{LaunchError, Result};

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("valid ANSI pattern"));

/// Tail kept while waiting for the banner.
const SEARCH_TAIL: usize = 4 * 1024;
/// Upper bound on text kept after the banner while waiting for the URL.
const ARMED_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ReadinessScanner {
    ready: Regex,
    url: Regex,
    buffer: String,
    armed_at: Option<usize>,
    fired: bool,
}

impl Default for ReadinessScanner {
    fn default() -> Self {
        Self::new(DEFAULT_READY_PATTERN, DEFAULT_URL_PATTERN).expect("default readiness patterns are valid")
    }
}

impl ReadinessScanner {
    pub fn new(ready_pattern: &str, url_pattern: &str) -> Result<Self> {
        let ready = Regex::new(ready_pattern).map_err(|error| LaunchError::InvalidPattern(error.to_string()))?;
        let url = Regex::new(url_pattern).map_err(|error| LaunchError::InvalidPattern(error.to_string()))?;
        if url.captures_len() < 2 {
            return Err(LaunchError::InvalidPattern(format!(
                "{url_pattern:?} has no capture group for the URL"
            )));
        }

        Ok(Self {
            ready,
            url,
            buffer: String::new(),
            armed_at: None,
            fired: false,
        })
    }

    pub fn from_preferences(preferences: &LaunchPreferences) -> Result<Self> {
        Self::new(&preferences.ready_pattern, &preferences.url_pattern)
    }

    /// The banner has been seen but no URL yet.
    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some() && !self.fired
    }

    #[cfg(test)]
    fn has_fired(&self) -> bool {
        self.fired
    }

    /// Feeds one chunk of output. Returns the URL the first time the banner
    /// and a URL have both been seen, `None` otherwise.
    pub fn feed(&mut self, chunk: &str) -> Option<String> {
        if self.fired {
            return None;
        }

        let cleaned = ANSI_ESCAPE.replace_all(chunk, "");
        self.buffer.push_str(&cleaned);

        let armed_at = match self.armed_at {
            Some(position) => position,
            None => match self.ready.find(&self.buffer) {
                Some(found) => {
                    self.armed_at = Some(found.start());
                    found.start()
                }
                None => {
                    trim_front(&mut self.buffer, SEARCH_TAIL);
                    return None;
                }
            },
        };

        let url = self
            .url
            .captures(&self.buffer[armed_at..])
            .and_then(|captures| captures.get(1))
            .map(|found| found.as_str().to_string());

        match url {
            Some(url) => {
                self.fired = true;
                self.buffer = String::new();
                Some(url)
            }
            None => {
                if self.buffer.len() > ARMED_LIMIT {
                    trim_front(&mut self.buffer, SEARCH_TAIL);
                    self.armed_at = Some(0);
                }
                None
            }
        }
    }
}

/// Drops text from the front of `buffer` so at most `keep` bytes remain,
/// cutting on a char boundary.
fn trim_front(buffer: &mut String, keep: usize) {
    if buffer.len() <= keep {
        return;
    }
    let mut cut = buffer.len() - keep;
    while !buffer.is_char_boundary(cut) {
        cut += 1;
    }
    buffer.drain(..cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(scanner: &mut ReadinessScanner, chunks: &[&str]) -> Vec<String> {
        chunks.iter().filter_map(|chunk| scanner.feed(chunk)).collect()
    }

    #[test]
    fn url_extracted_once_across_chunks() {
        let mut scanner = ReadinessScanner::default();
        let urls = feed_all(
            &mut scanner,
            &[
                "Building...",
                "Storybook 6.0.0 started\n",
                "Local: http://localhost:6006/\n",
                "Storybook 6.0.0 started\nLocal: http://localhost:7007/\n",
            ],
        );
        assert_eq!(urls, vec!["http://localhost:6006/".to_string()]);
        assert!(scanner.has_fired());
    }

    #[test]
    fn banner_and_url_in_one_chunk() {
        let mut scanner = ReadinessScanner::default();
        let chunk = "╭──────╮\n│ Storybook 5.3.19 started │\n│ 8.2 s for manager │\n│ Local:            http://localhost:9009/ │\n│ On your network:  http://192.168.1.4:9009/ │\n";
        assert_eq!(scanner.feed(chunk), Some("http://localhost:9009/".into()));
    }

    #[test]
    fn banner_split_across_chunk_boundary() {
        let mut scanner = ReadinessScanner::default();
        assert_eq!(scanner.feed("info => Story"), None);
        assert!(!scanner.is_armed());
        assert_eq!(scanner.feed("book 6.1.0 sta"), None);
        assert_eq!(scanner.feed("rted\nLocal:  http://localhost:6006/\n"), Some("http://localhost:6006/".into()));
    }

    #[test]
    fn url_before_banner_is_ignored() {
        let mut scanner = ReadinessScanner::default();
        assert_eq!(scanner.feed("Local: http://stale:1/\nStorybook 6 started\n"), None);
        assert!(scanner.is_armed());
        assert_eq!(scanner.feed("Local: http://localhost:6006/\n"), Some("http://localhost:6006/".into()));
    }

    #[test]
    fn ansi_colours_are_stripped() {
        let mut scanner = ReadinessScanner::default();
        let chunk = "\x1b[1mStorybook 6.0.0\x1b[22m started\nLocal:  \x1b[36mhttp://localhost:6006/\x1b[39m\n";
        assert_eq!(scanner.feed(chunk), Some("http://localhost:6006/".into()));
    }

    #[test]
    fn noise_without_banner_never_fires() {
        let mut scanner = ReadinessScanner::default();
        for _ in 0..2_000 {
            assert_eq!(scanner.feed("webpack building... Local: http://localhost:1/\n"), None);
        }
        assert!(!scanner.is_armed());
        assert!(scanner.buffer.len() <= SEARCH_TAIL);
    }

    #[test]
    fn trimming_respects_char_boundaries() {
        let mut buffer = "ééééé".to_string();
        trim_front(&mut buffer, 3);
        assert_eq!(buffer, "é");
    }

    #[test]
    fn url_pattern_needs_a_capture_group() {
        let error = ReadinessScanner::new(DEFAULT_READY_PATTERN, r"Local:\s+\S+").unwrap_err();
        assert!(matches!(error, LaunchError::InvalidPattern(_)));
        assert!(ReadinessScanner::new("(", DEFAULT_URL_PATTERN).is_err());
    }
}
