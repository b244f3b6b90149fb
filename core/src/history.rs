//! Movement history encoding.
//!
//! A history is a ':'-terminated list of `location,minute` records, oldest
//! first, e.g. `3,05:7,05:2,06:`. The trailing delimiter is part of the
//! format: cohort detection compares last-6 windows byte for byte.

use crate::types::{LocationId, Timestamp};
use chrono::{DateTime, Timelike};

const RECORD_SEPARATOR: char = ':';
const FIELD_SEPARATOR: char = ',';

pub const DEFAULT_MAX_LIST_LENGTH: usize = 12;

#[derive(Debug, Clone, Copy)]
pub struct HistoryCodec {
    max_list_length: usize,
}

impl Default for HistoryCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LIST_LENGTH)
    }
}

impl HistoryCodec {
    pub fn new(max_list_length: usize) -> Self {
        Self {
            max_list_length: max_list_length.max(1),
        }
    }

    pub fn max_list_length(&self) -> usize {
        self.max_list_length
    }

    /// Append a move to `location` at `event_time`, dropping the oldest
    /// records first if the list would grow past the maximum.
    pub fn append(&self, history: Option<&str>, location: LocationId, event_time: Timestamp) -> String {
        let current = history.unwrap_or("");
        let mut out = if record_count(current) + 1 > self.max_list_length {
            last_n(current, self.max_list_length - 1)
        } else {
            current.to_string()
        };
        out.push_str(&location.to_string());
        out.push(FIELD_SEPARATOR);
        out.push_str(&minute_of(event_time));
        out.push(RECORD_SEPARATOR);
        out
    }
}

/// Append with the default maximum list length.
pub fn append(history: Option<&str>, location: LocationId, event_time: Timestamp) -> String {
    HistoryCodec::default().append(history, location, event_time)
}

/// The last `n` records, in original order. Returns the input unchanged
/// if it already holds `n` records or fewer.
pub fn last_n(history: &str, n: usize) -> String {
    if history.is_empty() {
        return String::new();
    }
    let records = records(history);
    if records.len() <= n {
        return history.to_string();
    }
    let mut out = String::with_capacity(history.len());
    for record in &records[records.len() - n..] {
        out.push_str(record);
        out.push(RECORD_SEPARATOR);
    }
    out
}

pub fn record_count(history: &str) -> usize {
    records(history).len()
}

/// Records split on ':'. Interior empty records count; trailing ones do
/// not, so `a::b:` holds three records and `:::` none.
fn records(history: &str) -> Vec<&str> {
    let mut records: Vec<&str> = history.split(RECORD_SEPARATOR).collect();
    while records.last().is_some_and(|r| r.is_empty()) {
        records.pop();
    }
    records
}

/// Two-digit minute of the hour, UTC.
fn minute_of(event_time: Timestamp) -> String {
    let minute = DateTime::from_timestamp_millis(event_time)
        .map(|dt| dt.minute() as i64)
        .unwrap_or_else(|| event_time.div_euclid(60_000).rem_euclid(60));
    format!("{minute:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000;

    #[test]
    fn append_to_empty_yields_one_record() {
        assert_eq!(append(None, 3, 5 * MINUTE), "3,05:");
        assert_eq!(append(Some(""), 3, 5 * MINUTE), "3,05:");
    }

    #[test]
    fn append_keeps_order_and_trailing_delimiter() {
        let h = append(Some("3,05:"), 7, 65 * MINUTE);
        assert_eq!(h, "3,05:7,05:");
    }

    #[test]
    fn append_drops_oldest_at_capacity() {
        let codec = HistoryCodec::new(3);
        let mut h = String::new();
        for loc in 1..=5 {
            h = codec.append(Some(&h), loc, loc * MINUTE);
        }
        assert_eq!(h, "3,03:4,04:5,05:");
    }

    #[test]
    fn history_never_exceeds_maximum() {
        let mut h = String::new();
        for i in 0..100 {
            h = append(Some(&h), i % 17, i * 7 * MINUTE);
            assert!(record_count(&h) <= DEFAULT_MAX_LIST_LENGTH);
        }
        assert_eq!(record_count(&h), DEFAULT_MAX_LIST_LENGTH);
    }

    #[test]
    fn last_n_returns_suffix() {
        let h = "1,00:2,01:3,02:4,03:";
        assert_eq!(last_n(h, 2), "3,02:4,03:");
        assert_eq!(last_n(h, 4), h);
        assert_eq!(last_n(h, 9), h);
        assert_eq!(last_n("", 3), "");
    }

    #[test]
    fn last_n_is_idempotent() {
        let samples = ["", "1,00:", "1,00:2,01:3,02:4,03:5,04:6,05:7,06:", "garbage", "a::b:"];
        for s in samples {
            for n in 0..8 {
                let once = last_n(s, n);
                assert_eq!(last_n(&once, n), once, "s={s:?} n={n}");
            }
        }
    }

    #[test]
    fn minute_is_zero_padded_minute_of_hour() {
        assert_eq!(minute_of(0), "00");
        assert_eq!(minute_of(59 * MINUTE + 59_999), "59");
        assert_eq!(minute_of(61 * MINUTE), "01");
    }

    #[test]
    fn six_move_signature_builds_byte_for_byte() {
        let moves = [(3, 5), (7, 65), (2, 6), (9, 66), (1, 127), (4, 7)];
        let mut h = String::new();
        for (loc, minute) in moves {
            h = append(Some(&h), loc, minute * MINUTE);
        }
        let signature = "3,05:7,05:2,06:9,06:1,07:4,07:";
        assert_eq!(h, signature);
        assert_eq!(record_count(signature), 6);
        assert_eq!(last_n(signature, 6), signature);
        assert_eq!(last_n(signature, 3), "9,06:1,07:4,07:");
        assert_eq!(append(Some(signature), 8, 8 * MINUTE), format!("{signature}8,08:"));
    }

    #[test]
    fn interior_empty_records_are_counted() {
        assert_eq!(record_count("a::b:"), 3);
        assert_eq!(record_count(":::"), 0);
        assert_eq!(last_n("a::b:", 2), ":b:");
        assert_eq!(last_n("a::b:", 1), "b:");
    }
}
