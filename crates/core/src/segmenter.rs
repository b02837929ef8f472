//! Transcript segmentation.
//!
//! Turns a raw lesson transcript into an ordered sequence of [`Utterance`]s.
//! Lines may carry markers from the upstream transcription service:
//!
//! ```text
//! [00:12] 교사: 오늘은 광합성을 배웁니다.
//! [00:01:05 --> 00:01:09] Student 3: Because plants need light?
//! ```
//!
//! A marked line opens a new speaker turn, unmarked lines continue the
//! current one. A leading `label:` only counts as a speaker when it follows a
//! timestamp, names a classroom role (`Teacher`, `Student 3`, `교사`, `학생2`)
//! or is listed in [`SegmenterOptions::speaker_labels`]; otherwise it stays in
//! the utterance text (`Remember: ...`). Each turn is split into sentences and fragments below the
//! minimum token count are folded into their neighbours.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::Utterance;

pub const DEFAULT_MIN_UTTERANCE_TOKENS: usize = 2;

static TIMESTAMP_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[\s*(?P<start>\d{1,2}(?::\d{1,2}){1,2}(?:[.,]\d+)?)\s*(?:(?:-->|-|–)\s*(?P<end>\d{1,2}(?::\d{1,2}){1,2}(?:[.,]\d+)?)\s*)?\]\s*",
    )
    .expect("timestamp marker regex is valid")
});

static SPEAKER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<speaker>[^\s:：.?!\[\]][^:：.?!\[\]]{0,23}?)\s*[:：](?:\s+|$)")
        .expect("speaker marker regex is valid")
});

static ROLE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:teacher|student|instructor|tutor|t|s|교사|선생님|학생)(?:\s*\d{1,3})?$")
        .expect("role label regex is valid")
});

const SENTENCE_TERMINATORS: &[char] = &['.', '?', '!', '…', '。', '？', '！'];
const CLOSING_MARKS: &[char] = &['"', '\'', ')', '”', '’', '」', '』'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterOptions {
    /// Fragments with fewer whitespace-separated tokens are merged into a
    /// neighbouring utterance of the same turn.
    pub min_utterance_tokens: usize,
    /// Extra speaker names accepted without a timestamp, compared
    /// case-insensitively.
    pub speaker_labels: Vec<String>,
}

impl Default for SegmenterOptions {
    fn default() -> Self {
        Self {
            min_utterance_tokens: DEFAULT_MIN_UTTERANCE_TOKENS,
            speaker_labels: Vec::new(),
        }
    }
}

impl SegmenterOptions {
    fn is_speaker_label(&self, label: &str) -> bool {
        ROLE_LABEL.is_match(label)
            || self
                .speaker_labels
                .iter()
                .any(|known| known.trim().to_lowercase() == label.to_lowercase())
    }
}

#[derive(Debug)]
struct Turn {
    speaker: Option<String>,
    start: Option<f64>,
    end: Option<f64>,
    text: String,
}

/// Split a transcript into utterances with dense 0-based indices.
///
/// Empty or whitespace-only input yields an empty sequence.
pub fn segment(transcript: &str, options: &SegmenterOptions) -> Vec<Utterance> {
    if transcript.trim().is_empty() {
        return Vec::new();
    }

    let mut turns = split_turns(transcript, options);
    resolve_turn_ends(&mut turns);

    let mut utterances = Vec::new();
    for turn in &turns {
        let pieces = merge_short_fragments(split_sentences(&turn.text), options.min_utterance_tokens);
        let times = distribute_times(turn.start, turn.end, &pieces);

        for (text, (start_time, end_time)) in pieces.into_iter().zip(times) {
            utterances.push(Utterance {
                index: utterances.len(),
                text,
                start_time,
                end_time,
                speaker: turn.speaker.clone(),
            });
        }
    }

    debug!(
        turns = turns.len(),
        utterances = utterances.len(),
        "transcript segmented"
    );

    utterances
}

fn split_turns(transcript: &str, options: &SegmenterOptions) -> Vec<Turn> {
    let mut turns: Vec<Turn> = Vec::new();

    for line in transcript.lines() {
        let mut rest = line.trim();
        if rest.is_empty() {
            continue;
        }

        let mut start = None;
        let mut end = None;
        let mut marked = false;

        if let Some(caps) = TIMESTAMP_MARKER.captures(rest) {
            start = caps.name("start").and_then(|m| parse_timestamp(m.as_str()));
            end = caps.name("end").and_then(|m| parse_timestamp(m.as_str()));
            marked = true;
            rest = &rest[caps.get(0).map_or(0, |m| m.end())..];
        }

        let mut speaker = None;
        if let Some(caps) = SPEAKER_MARKER.captures(rest) {
            let label = caps.name("speaker").map_or("", |m| m.as_str().trim());
            if marked || options.is_speaker_label(label) {
                speaker = Some(label.to_string());
                marked = true;
                rest = &rest[caps.get(0).map_or(0, |m| m.end())..];
            }
        }

        let rest = rest.trim();
        if !marked {
            if let Some(current) = turns.last_mut() {
                if !current.text.is_empty() {
                    current.text.push(' ');
                }
                current.text.push_str(rest);
                continue;
            }
        }

        turns.push(Turn {
            speaker,
            start,
            end,
            text: rest.to_string(),
        });
    }

    turns
}

/// A turn without an explicit end runs until the next turn starts.
fn resolve_turn_ends(turns: &mut [Turn]) {
    for i in 0..turns.len().saturating_sub(1) {
        if turns[i].end.is_none() && turns[i].start.is_some() {
            turns[i].end = turns[i + 1].start;
        }
    }
}

/// Accepts `MM:SS` and `HH:MM:SS`, with optional fractional seconds.
fn parse_timestamp(raw: &str) -> Option<f64> {
    let normalized = raw.replace(',', ".");
    let parts: Vec<&str> = normalized.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [m, s] => (0.0, m.parse::<f64>().ok()?, s.parse::<f64>().ok()?),
        [h, m, s] => (
            h.parse::<f64>().ok()?,
            m.parse::<f64>().ok()?,
            s.parse::<f64>().ok()?,
        ),
        _ => return None,
    };
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut sentence_start = 0;

    while let Some((_, c)) = chars.next() {
        if !SENTENCE_TERMINATORS.contains(&c) {
            continue;
        }
        while let Some(&(_, next)) = chars.peek() {
            if SENTENCE_TERMINATORS.contains(&next) || CLOSING_MARKS.contains(&next) {
                chars.next();
            } else {
                break;
            }
        }
        match chars.peek() {
            Some(&(pos, next)) if next.is_whitespace() => {
                push_trimmed(&mut sentences, &text[sentence_start..pos]);
                sentence_start = pos;
            }
            None => {
                push_trimmed(&mut sentences, &text[sentence_start..]);
                sentence_start = text.len();
            }
            _ => {}
        }
    }

    if sentence_start < text.len() {
        push_trimmed(&mut sentences, &text[sentence_start..]);
    }

    sentences
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
}

fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn merge_short_fragments(pieces: Vec<String>, min_tokens: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(pieces.len());
    let mut carry: Option<String> = None;

    for piece in pieces {
        let piece = match carry.take() {
            Some(prefix) => format!("{prefix} {piece}"),
            None => piece,
        };
        if token_count(&piece) < min_tokens {
            carry = Some(piece);
        } else {
            merged.push(piece);
        }
    }

    if let Some(rest) = carry {
        match merged.last_mut() {
            Some(last) => {
                last.push(' ');
                last.push_str(&rest);
            }
            None => merged.push(rest),
        }
    }

    merged
}

/// Divide a turn's time span among its utterances proportionally to their
/// length so that utterance spans never overlap.
fn distribute_times(
    start: Option<f64>,
    end: Option<f64>,
    pieces: &[String],
) -> Vec<(Option<f64>, Option<f64>)> {
    match (start, end) {
        (Some(start), Some(end)) if end >= start => {
            let lengths: Vec<usize> = pieces.iter().map(|p| p.chars().count()).collect();
            let total = lengths.iter().sum::<usize>().max(1) as f64;
            let span = end - start;
            let mut consumed = 0usize;
            lengths
                .iter()
                .enumerate()
                .map(|(i, len)| {
                    let from = start + span * consumed as f64 / total;
                    consumed += len;
                    let to = if i + 1 == lengths.len() {
                        end
                    } else {
                        start + span * consumed as f64 / total
                    };
                    (Some(from), Some(to))
                })
                .collect()
        }
        _ => pieces
            .iter()
            .enumerate()
            .map(|(i, _)| (if i == 0 { start } else { None }, None))
            .collect(),
    }
}
