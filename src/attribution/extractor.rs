// Fee extraction - re-derives the fee an activity event paid to the fee
// destination, straight from the raw transaction data.
//
// Strategies run in order and the first positive, sanity-checked amount wins:
// 1. Structured: an amount within a few words of a marker or the destination
// 2. Heuristic: the destination appears in the logs, take the first run of 6+ digits
// 3. Balance delta: post - pre balance of the destination account

use std::ops::Range;
use tracing::debug;

use crate::chain::EventDetail;

/// A single extraction strategy. Pure: same event in, same answer out.
type Strategy = fn(&FeeExtractor, &EventDetail) -> Option<u64>;

const STRATEGIES: [(&str, Strategy); 3] = [
    ("structured", FeeExtractor::structured_log),
    ("heuristic", FeeExtractor::heuristic_log),
    ("balance_delta", FeeExtractor::balance_delta),
];

/// Minimum digit count for the heuristic pattern
const HEURISTIC_MIN_DIGITS: usize = 6;

/// Whitespace gaps allowed between an amount and its marker ("4200000 lamports to <marker>")
const MARKER_ADJACENCY: usize = 3;

/// Extraction settings for one fee destination
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Literal tags that mark a fee transfer, matched anywhere in a log line
    pub markers: Vec<String>,
    /// Lower bound for heuristic matches (inclusive)
    pub min_plausible_fee: u64,
    /// Upper bound for any extracted amount (inclusive)
    pub max_plausible_fee: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            markers: vec![
                "creator-vault".to_string(),
                "creator_vault".to_string(),
                "Creator fee".to_string(),
            ],
            min_plausible_fee: 100_000,
            max_plausible_fee: 10_000_000_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeeExtractor {
    destination: String,
    config: ExtractorConfig,
}

impl FeeExtractor {
    pub fn new(destination: impl Into<String>, config: ExtractorConfig) -> Self {
        Self {
            destination: destination.into(),
            config,
        }
    }

    /// Attributed fee for `event`, or 0 when no strategy is confident.
    pub fn extract(&self, event: &EventDetail) -> u64 {
        self.extract_with_source(event)
            .map(|(amount, _)| amount)
            .unwrap_or(0)
    }

    /// Like [`extract`](Self::extract) but also names the strategy that matched.
    pub fn extract_with_source(&self, event: &EventDetail) -> Option<(u64, &'static str)> {
        for (name, strategy) in STRATEGIES.iter() {
            if let Some(amount) = strategy(self, event) {
                if amount > 0 && amount <= self.config.max_plausible_fee {
                    debug!("💡 {} fee {} lamports via {}", event.id, amount, name);
                    return Some((amount, *name));
                }
            }
        }
        debug!("No fee attributed to {}", event.id);
        None
    }

    fn structured_log(&self, event: &EventDetail) -> Option<u64> {
        event
            .log_lines
            .iter()
            .find_map(|line| self.amount_next_to_marker(line))
    }

    fn heuristic_log(&self, event: &EventDetail) -> Option<u64> {
        if !event.log_lines.iter().any(|l| l.contains(&self.destination)) {
            return None;
        }

        // Raw run length, so leading zeros still count toward the minimum
        let digits = event
            .log_lines
            .iter()
            .flat_map(|line| {
                digit_runs(line)
                    .into_iter()
                    .filter(|run| run.len() >= HEURISTIC_MIN_DIGITS)
                    .map(move |run| &line[run])
            })
            .next()?;
        let amount: u64 = digits.parse().unwrap_or(u64::MAX);

        let plausible = self.config.min_plausible_fee..=self.config.max_plausible_fee;
        plausible.contains(&amount).then_some(amount)
    }

    fn balance_delta(&self, event: &EventDetail) -> Option<u64> {
        let index = event
            .account_keys
            .iter()
            .position(|key| key == &self.destination)?;

        let pre = *event.pre_balances.get(index)?;
        let post = *event.post_balances.get(index)?;

        post.checked_sub(pre).filter(|delta| *delta > 0)
    }

    /// First amount within `MARKER_ADJACENCY` words of a marker occurrence.
    fn amount_next_to_marker(&self, line: &str) -> Option<u64> {
        let markers = self.marker_spans(line);
        if markers.is_empty() {
            return None;
        }

        digit_runs(line)
            .into_iter()
            .filter(|run| !is_invocation_depth(line, run) && !follows_letter(line, run))
            .filter(|run| !markers.iter().any(|m| m.start < run.end && run.start < m.end))
            .find(|run| {
                markers
                    .iter()
                    .any(|m| word_distance(line, m, run) <= MARKER_ADJACENCY)
            })
            .and_then(|run| line[run].parse().ok())
    }

    /// Byte spans of every occurrence of the destination or a configured marker
    fn marker_spans(&self, line: &str) -> Vec<Range<usize>> {
        std::iter::once(self.destination.as_str())
            .chain(self.config.markers.iter().map(String::as_str))
            .filter(|marker| !marker.is_empty())
            .flat_map(move |marker| {
                line.match_indices(marker)
                    .map(|(start, found)| start..start + found.len())
            })
            .collect()
    }
}

/// Maximal runs of ASCII digits in `line`, as byte ranges
fn digit_runs(line: &str) -> Vec<Range<usize>> {
    let bytes = line.as_bytes();
    let mut runs = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        runs.push(start..i);
    }
    runs
}

/// `[2]` in "invoke [2]" is a call depth, not an amount
fn is_invocation_depth(line: &str, run: &Range<usize>) -> bool {
    line[..run.start].ends_with('[') && line[run.end..].starts_with(']')
}

/// Digits inside an identifier or address ("v3", "9Vs2ce")
fn follows_letter(line: &str, run: &Range<usize>) -> bool {
    line[..run.start]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_ascii_alphabetic())
}

/// Whitespace gaps between two non-overlapping spans: 0 inside one word,
/// 1 for neighbouring words and so on.
fn word_distance(line: &str, a: &Range<usize>, b: &Range<usize>) -> usize {
    let gap = if a.end <= b.start {
        &line[a.end..b.start]
    } else {
        &line[b.end..a.start]
    };

    let mut gaps = 0;
    let mut in_space = false;
    for c in gap.chars() {
        let space = c.is_whitespace();
        if space && !in_space {
            gaps += 1;
        }
        in_space = space;
    }
    gaps
}
