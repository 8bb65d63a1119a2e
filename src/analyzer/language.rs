//! Language guessing through the `aspell` spell-checker binary.
//!
//! The guess runs each candidate dictionary over the text and picks
//! the one producing the fewest unknown words. The dictionary list is
//! probed once, lazily, and owned by the guesser instance — shared via
//! `Arc` where needed, never process-global. Every `aspell` invocation
//! has a bounded wait and a failed or slow invocation simply
//! contributes no guess.

use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Bounded wait for one aspell invocation.
const ASPELL_TIMEOUT: Duration = Duration::from_secs(10);

/// Guesses the language of text samples via aspell dictionaries.
pub struct LanguageGuesser {
    binary: String,
    timeout: Duration,
    dictionaries: Mutex<Option<Vec<String>>>,
}

impl LanguageGuesser {
    /// Creates a guesser using `aspell` from the search path.
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary("aspell")
    }

    /// Creates a guesser with an explicit binary (tests substitute a
    /// stub).
    #[must_use]
    pub fn with_binary(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
            timeout: ASPELL_TIMEOUT,
            dictionaries: Mutex::new(None),
        }
    }

    /// Guesses the language of `text`, returning a dictionary code
    /// like `en` or `sv`, or `None` when no dictionary produced a
    /// usable result.
    pub async fn guess_language(&self, text: &str) -> Option<String> {
        if text.trim().is_empty() {
            return None;
        }

        let dictionaries = self.dictionaries().await;
        let mut best: Option<(usize, String)> = None;
        for dictionary in dictionaries {
            let unknown_words = self.count_unknown_words(text, &dictionary).await;
            // Zero unknown words is indistinguishable from a failed
            // run, so only positive counts compete
            if let Some(count) = unknown_words.filter(|count| *count > 0) {
                if best.as_ref().is_none_or(|(best_count, _)| count < *best_count) {
                    best = Some((count, dictionary));
                }
            }
        }
        best.map(|(_, dictionary)| dictionary)
    }

    /// Returns the cached dictionary list, probing `aspell dicts` on
    /// first use.
    async fn dictionaries(&self) -> Vec<String> {
        let mut cache = self.dictionaries.lock().await;
        if let Some(dictionaries) = cache.as_ref() {
            return dictionaries.clone();
        }

        #[allow(clippy::unwrap_used)] // pattern is a literal, compile cannot fail
        let code_pattern = Regex::new(r"^[a-z]{2}(_[A-Z]{2})?$").unwrap();
        let output = self.run(&["dicts"], None).await.unwrap_or_default();
        let mut dictionaries: Vec<String> = output
            .lines()
            .map(str::trim)
            .filter(|line| code_pattern.is_match(line))
            .map(str::to_string)
            .collect();
        dictionaries.sort();
        dictionaries.dedup();

        if dictionaries.is_empty() {
            debug!(binary = %self.binary, "no aspell dictionaries available");
        }
        *cache = Some(dictionaries.clone());
        dictionaries
    }

    async fn count_unknown_words(&self, text: &str, dictionary: &str) -> Option<usize> {
        let output = self.run(&["-d", dictionary, "list"], Some(text)).await?;
        Some(output.lines().filter(|line| !line.trim().is_empty()).count())
    }

    /// Runs the binary with a bounded wait, returning its stdout. A
    /// process that does not start or finish within the bound is
    /// treated as having failed.
    async fn run(&self, args: &[&str], input: Option<&str>) -> Option<String> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                debug!(binary = %self.binary, %error, "cannot start spell checker");
                return None;
            }
        };

        if let (Some(text), Some(mut stdin)) = (input, child.stdin.take()) {
            let text = text.to_string();
            tokio::spawn(async move {
                let _ = stdin.write_all(text.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Ok(output)) => {
                debug!(binary = %self.binary, status = ?output.status, "spell checker failed");
                None
            }
            Ok(Err(error)) => {
                debug!(binary = %self.binary, %error, "spell checker I/O error");
                None
            }
            Err(_elapsed) => {
                warn!(binary = %self.binary, timeout_secs = self.timeout.as_secs(), "spell checker timed out");
                None
            }
        }
    }
}

impl Default for LanguageGuesser {
    fn default() -> Self {
        Self::new()
    }
}
