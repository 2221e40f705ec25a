//! Recurrence expression parsing.
//!
//! An expression is a `;`-separated list of `KEY=VALUE` tags. Parsing is
//! lenient at the token level (malformed tokens are dropped) and strict about
//! the tags the engine interprets.

use chrono::Weekday;
use chrono_tz::Tz;
use indexmap::IndexMap;

use caredesk_core::time::parse_utc_compact;

use crate::iter::OccurrenceIter;

/// Recurrence parse failure — the engine's only error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleParseError {
    #[error("DTSTART can not be empty")]
    MissingDtStart,
    #[error("invalid DTSTART value [{0}]")]
    InvalidDtStart(String),
    #[error("missing FREQ tag")]
    MissingFreq,
    #[error("invalid FREQ value [{0}]")]
    InvalidFreq(String),
    #[error("invalid INTERVAL value [{0}]")]
    InvalidInterval(String),
    #[error("invalid COUNT value [{0}]")]
    InvalidCount(String),
    #[error("invalid UNTIL value [{0}]")]
    InvalidUntil(String),
    #[error("invalid BYDAY value [{0}]")]
    InvalidByDay(String),
    #[error("unknown TZID [{0}]")]
    UnknownTimeZone(String),
}

/// Ordered tag → value view of a recurrence expression.
///
/// Keys are unique (last write wins), insertion order is preserved so a
/// rebased rule re-serializes with its tags where the author put them,
/// unknown tags included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleMap {
    entries: IndexMap<String, String>,
}

impl RuleMap {
    /// Split `expression` on `;`, then each token on `=`. Tokens without
    /// exactly one `=` are dropped silently.
    pub fn parse(expression: &str) -> Self {
        let mut entries = IndexMap::new();
        for token in expression.split(';') {
            let parts: Vec<&str> = token.split('=').collect();
            if parts.len() == 2 {
                entries.insert(parts[0].to_string(), parts[1].to_string());
            }
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Insert or overwrite a tag. An existing tag keeps its position.
    pub fn set(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-serialize as `KEY=VALUE;...` in insertion order.
    pub fn to_expression(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Recurrence frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freq {
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Freq {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "MINUTELY" => Some(Freq::Minutely),
            "HOURLY" => Some(Freq::Hourly),
            "DAILY" => Some(Freq::Daily),
            "WEEKLY" => Some(Freq::Weekly),
            "MONTHLY" => Some(Freq::Monthly),
            "YEARLY" => Some(Freq::Yearly),
            _ => None,
        }
    }
}

/// A validated recurrence rule, ready to iterate.
#[derive(Debug, Clone)]
pub struct Rule {
    map: RuleMap,
    /// Anchor instant, epoch ms UTC.
    pub dtstart: i64,
    pub freq: Freq,
    pub interval: u32,
    pub count: Option<u64>,
    /// Inclusive upper bound, epoch ms.
    pub until: Option<i64>,
    /// Weekday expansion (WEEKLY) or filter (DAILY). Empty means unused.
    pub by_day: Vec<Weekday>,
    pub tz: Tz,
}

impl Rule {
    /// Parse and validate an expression. `DTSTART` and `FREQ` are required;
    /// everything else defaults (`INTERVAL=1`, timezone UTC, unbounded).
    pub fn parse(expression: &str) -> Result<Self, RuleParseError> {
        let map = RuleMap::parse(expression);

        let dtstart_raw = map.get("DTSTART").map(str::trim).unwrap_or("");
        if dtstart_raw.is_empty() {
            return Err(RuleParseError::MissingDtStart);
        }
        let dtstart = parse_utc_compact(dtstart_raw)
            .ok_or_else(|| RuleParseError::InvalidDtStart(dtstart_raw.to_string()))?;

        let freq_raw = map.get("FREQ").ok_or(RuleParseError::MissingFreq)?;
        let freq = Freq::from_tag(freq_raw)
            .ok_or_else(|| RuleParseError::InvalidFreq(freq_raw.to_string()))?;

        let interval = match map.get("INTERVAL") {
            None => 1,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => return Err(RuleParseError::InvalidInterval(raw.to_string())),
            },
        };

        let count = match map.get("COUNT") {
            None => None,
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .map_err(|_| RuleParseError::InvalidCount(raw.to_string()))?,
            ),
        };

        let until = match map.get("UNTIL") {
            None => None,
            Some(raw) => Some(
                parse_utc_compact(raw)
                    .ok_or_else(|| RuleParseError::InvalidUntil(raw.to_string()))?,
            ),
        };

        let by_day = match map.get("BYDAY") {
            None => Vec::new(),
            Some(raw) => parse_by_day(raw)?,
        };

        let tz = match map.get("TZID") {
            None => Tz::UTC,
            Some(raw) => raw
                .trim()
                .parse::<Tz>()
                .map_err(|_| RuleParseError::UnknownTimeZone(raw.to_string()))?,
        };

        Ok(Self { map, dtstart, freq, interval, count, until, by_day, tz })
    }

    /// The underlying tag map (unknown tags included).
    pub fn map(&self) -> &RuleMap {
        &self.map
    }

    /// Fresh iterator over the rule's occurrences, starting at `DTSTART`.
    pub fn occurrences(&self) -> OccurrenceIter {
        OccurrenceIter::new(self)
    }
}

fn parse_by_day(raw: &str) -> Result<Vec<Weekday>, RuleParseError> {
    let mut days = Vec::new();
    for token in raw.split(',') {
        let day = match token.trim().to_ascii_uppercase().as_str() {
            "MO" => Weekday::Mon,
            "TU" => Weekday::Tue,
            "WE" => Weekday::Wed,
            "TH" => Weekday::Thu,
            "FR" => Weekday::Fri,
            "SA" => Weekday::Sat,
            "SU" => Weekday::Sun,
            _ => return Err(RuleParseError::InvalidByDay(raw.to_string())),
        };
        if !days.contains(&day) {
            days.push(day);
        }
    }
    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_token_split() {
        let map = RuleMap::parse("DTSTART=20250101T060000Z;garbage;FREQ=DAILY;A=B=C;=");
        assert_eq!(map.get("DTSTART"), Some("20250101T060000Z"));
        assert_eq!(map.get("FREQ"), Some("DAILY"));
        // "garbage" has no '=', "A=B=C" has two — both dropped.
        assert_eq!(map.get("A"), None);
    }

    #[test]
    fn test_unknown_tags_survive_reserialization() {
        let mut map = RuleMap::parse("DTSTART=20250101T060000Z;FREQ=DAILY;X-CLINIC=front-desk");
        map.set("DTSTART", "20250301T080000Z".to_string());
        assert_eq!(
            map.to_expression(),
            "DTSTART=20250301T080000Z;FREQ=DAILY;X-CLINIC=front-desk"
        );
    }

    #[test]
    fn test_missing_dtstart_is_an_error() {
        assert!(matches!(
            Rule::parse("FREQ=DAILY"),
            Err(RuleParseError::MissingDtStart)
        ));
        assert!(matches!(
            Rule::parse("DTSTART= ;FREQ=DAILY"),
            Err(RuleParseError::MissingDtStart)
        ));
    }

    #[test]
    fn test_dtstart_must_parse() {
        let err = Rule::parse("DTSTART=tomorrow;FREQ=DAILY").unwrap_err();
        assert_eq!(err, RuleParseError::InvalidDtStart("tomorrow".into()));
    }

    #[test]
    fn test_defaults() {
        let rule = Rule::parse("DTSTART=20250101T060000Z;FREQ=WEEKLY").unwrap();
        assert_eq!(rule.interval, 1);
        assert_eq!(rule.count, None);
        assert_eq!(rule.tz, Tz::UTC);
        assert!(rule.by_day.is_empty());
    }

    #[test]
    fn test_byday_parsing() {
        let rule = Rule::parse("DTSTART=20250101T060000Z;FREQ=WEEKLY;BYDAY=MO,WE,FR").unwrap();
        assert_eq!(rule.by_day, vec![Weekday::Mon, Weekday::Wed, Weekday::Fri]);
        assert!(Rule::parse("DTSTART=20250101T060000Z;FREQ=WEEKLY;BYDAY=XX").is_err());
    }

    #[test]
    fn test_tzid() {
        let rule =
            Rule::parse("DTSTART=20250101T060000Z;FREQ=DAILY;TZID=Europe/Berlin").unwrap();
        assert_eq!(rule.tz, chrono_tz::Europe::Berlin);
        assert!(Rule::parse("DTSTART=20250101T060000Z;FREQ=DAILY;TZID=Mars/Olympus").is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(Rule::parse("DTSTART=20250101T060000Z;FREQ=DAILY;INTERVAL=0").is_err());
    }
}
