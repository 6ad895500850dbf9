use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;
use std::collections::HashSet;
use std::str::FromStr;

/// One event as read from a feed. Recomputed on every poll, never stored.
#[derive(Debug, Clone)]
pub enum RawEvent {
    OneOff {
        title: String,
        start: DateTime<Utc>,
    },
    Recurring {
        title: String,
        rule: RecurrenceRule,
    },
}

impl RawEvent {
    pub fn title(&self) -> &str {
        match self {
            RawEvent::OneOff { title, .. } | RawEvent::Recurring { title, .. } => title,
        }
    }
}

/// A concrete future instant of an event, bound to the channel it is announced in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOccurrence {
    pub channel_id: String,
    pub title: String,
    pub occurs_at: DateTime<Utc>,
}

/// Repetition rule of a recurring event, seeded at its first start.
///
/// Zoned rules expand in their own zone, so local wall-clock times and
/// weekdays hold across DST changes.
#[derive(Debug, Clone)]
pub struct RecurrenceRule {
    set: RRuleSet,
}

impl RecurrenceRule {
    /// Builds a rule from an RRULE value (with or without the `RRULE:` prefix),
    /// the event's start, the zone it was written in and any excluded instants.
    pub fn new(
        dtstart: DateTime<Utc>,
        zone: Option<Tz>,
        rule: &str,
        exdates: &[DateTime<Utc>],
    ) -> Result<Self, rrule::RRuleError> {
        let trimmed = rule.trim();
        let mut rule_part = if trimmed.to_uppercase().starts_with("RRULE:") {
            trimmed[6..].to_string()
        } else {
            trimmed.to_string()
        };

        // UNTIL has to be a UTC date-time. Local values are read in the event's zone.
        if let Some(idx) = rule_part.find("UNTIL=") {
            let value_start = idx + 6;
            let value_end = rule_part[value_start..]
                .find(';')
                .map(|i| value_start + i)
                .unwrap_or(rule_part.len());
            let until = rule_part[value_start..value_end].to_string();
            if let Some(utc) = until_as_utc(&until, zone) {
                rule_part.replace_range(value_start..value_end, &utc);
            }
        }

        let stamp = |instant: &DateTime<Utc>| match zone {
            Some(tz) => format!(
                ";TZID={}:{}",
                tz.name(),
                instant.with_timezone(&tz).format("%Y%m%dT%H%M%S")
            ),
            None => format!(":{}", instant.format("%Y%m%dT%H%M%SZ")),
        };

        let mut source = format!("DTSTART{}\nRRULE:{}\n", stamp(&dtstart), rule_part);
        let mut seen = HashSet::new();
        for exdate in exdates {
            let line = format!("EXDATE{}\n", stamp(exdate));
            if seen.insert(line.clone()) {
                source.push_str(&line);
            }
        }

        let set = RRuleSet::from_str(&source)?;
        Ok(Self { set })
    }

    /// First instant strictly after `now`, or `None` once the rule has run out.
    pub fn first_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // Two results cover an `after` bound that lands exactly on `now`.
        self.set
            .clone()
            .after(now.with_timezone(&rrule::Tz::UTC))
            .all(2)
            .dates
            .into_iter()
            .map(|instant| instant.with_timezone(&Utc))
            .find(|instant| *instant > now)
    }
}

/// `YYYYMMDD` widens to the end of that local day; `YYYYMMDDTHHMMSS` is read
/// as local time. Values already in UTC are left alone.
fn until_as_utc(value: &str, zone: Option<Tz>) -> Option<String> {
    let local = if value.len() == 8 && !value.contains('T') {
        NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()?
            .and_hms_opt(23, 59, 59)?
    } else if value.ends_with('Z') {
        return None;
    } else {
        NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?
    };
    let utc = match zone {
        Some(tz) => tz.from_local_datetime(&local).latest()?.with_timezone(&Utc),
        None => local.and_utc(),
    };
    Some(utc.format("%Y%m%dT%H%M%SZ").to_string())
}
