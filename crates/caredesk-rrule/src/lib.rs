//! # CareDesk Recurrence Engine
//!
//! Parses recurrence expressions (`DTSTART=20250101T060000Z;FREQ=DAILY;
//! INTERVAL=1`) and produces lazy, strictly increasing sequences of
//! occurrence timestamps in epoch milliseconds.
//!
//! Supports the subset the scheduler actually needs: `DTSTART`, `FREQ`,
//! `INTERVAL`, `COUNT`, `UNTIL`, `BYDAY`, `TZID`. Unknown tags are ignored
//! by the interpreter but survive re-serialization, so rules can be rebased
//! (`DTSTART` swapped out) without losing anything.
//!
//! Designed for scheduler-level simplicity — no rrule crate dependency.

pub mod iter;
pub mod rule;

pub use iter::OccurrenceIter;
pub use rule::{Freq, Rule, RuleMap, RuleParseError};

/// Parse `expression` and return a fresh occurrence iterator anchored at its
/// `DTSTART`.
pub fn iterate(expression: &str) -> Result<OccurrenceIter, RuleParseError> {
    Ok(Rule::parse(expression)?.occurrences())
}

/// First occurrence of `expression` strictly greater than `after`.
pub fn find_next(expression: &str, after: i64) -> Result<Option<i64>, RuleParseError> {
    let rule = Rule::parse(expression)?;
    Ok(rule.occurrences().find(|ts| *ts > after))
}

/// Last occurrence of `expression` strictly less than `before`.
pub fn find_previous(expression: &str, before: i64) -> Result<Option<i64>, RuleParseError> {
    let rule = Rule::parse(expression)?;
    let mut recent = None;
    for ts in rule.occurrences() {
        if ts < before {
            recent = Some(ts);
        } else {
            break;
        }
    }
    Ok(recent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use caredesk_core::time::parse_utc_compact;

    #[test]
    fn test_find_next_is_strictly_greater() {
        let expr = "DTSTART=20250101T060000Z;FREQ=DAILY;INTERVAL=1";
        let start = parse_utc_compact("20250101T060000Z").unwrap();

        // Exactly on an occurrence: next one is a day later.
        assert_eq!(find_next(expr, start).unwrap(), Some(start + 86_400_000));
        // Just before: the occurrence itself.
        assert_eq!(find_next(expr, start - 1).unwrap(), Some(start));
    }

    #[test]
    fn test_find_next_exhausted_rule() {
        let expr = "DTSTART=20250101T060000Z;FREQ=DAILY;INTERVAL=1;COUNT=3";
        let start = parse_utc_compact("20250101T060000Z").unwrap();
        assert_eq!(find_next(expr, start + 10 * 86_400_000).unwrap(), None);
    }

    #[test]
    fn test_find_previous() {
        let expr = "DTSTART=20250101T060000Z;FREQ=DAILY;INTERVAL=1";
        let start = parse_utc_compact("20250101T060000Z").unwrap();

        assert_eq!(find_previous(expr, start).unwrap(), None);
        assert_eq!(
            find_previous(expr, start + 86_400_000 + 1).unwrap(),
            Some(start + 86_400_000)
        );
    }

    #[test]
    fn test_find_previous_on_exhausted_rule_keeps_latest() {
        // COUNT runs out before `before` is reached; the most recent
        // occurrence still counts.
        let expr = "DTSTART=20250101T060000Z;FREQ=DAILY;INTERVAL=1;COUNT=2";
        let start = parse_utc_compact("20250101T060000Z").unwrap();
        assert_eq!(
            find_previous(expr, start + 30 * 86_400_000).unwrap(),
            Some(start + 86_400_000)
        );
    }

    #[test]
    fn test_malformed_rule_propagates() {
        assert!(find_next("FREQ=DAILY", 0).is_err());
        assert!(iterate("DTSTART=;FREQ=DAILY").is_err());
    }
}
