//! Linear recency decay and lenient timeframe parsing.

use chrono::NaiveDate;

/// Records older than this many months score 0.
pub const RECENCY_WINDOW_MONTHS: f32 = 60.0;
/// Score for records without a usable timestamp.
pub const NEUTRAL_RECENCY: f32 = 0.5;

const DAYS_PER_MONTH: f32 = 30.4375;

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Recency in `[0, 1]`: 1.0 at or after `today`, decaying linearly to 0.0
/// over [`RECENCY_WINDOW_MONTHS`].
#[must_use]
pub fn recency_score(date: Option<NaiveDate>, today: NaiveDate) -> f32 {
    let Some(date) = date else {
        return NEUTRAL_RECENCY;
    };
    let days = (today - date).num_days();
    if days <= 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let months = days as f32 / DAYS_PER_MONTH;
    (1.0 - months / RECENCY_WINDOW_MONTHS).clamp(0.0, 1.0)
}

/// Parse a timeframe endpoint such as `2023-04-01`, `2023-04`, `2023`,
/// `Apr 2023` or `April 2023`. Ongoing markers (`present`, `current`, `now`,
/// `ongoing`) resolve to `today`. Partial dates resolve to the first day of
/// the period.
#[must_use]
pub fn parse_date(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    let value = raw.trim().to_lowercase();
    if value.is_empty() {
        return None;
    }
    if is_ongoing(&value) {
        return Some(today);
    }
    if let Ok(date) = NaiveDate::parse_from_str(&value, "%Y-%m-%d") {
        return Some(date);
    }

    let parts: Vec<&str> = value
        .split(|c: char| c == '-' || c == '/' || c == ' ' || c == ',')
        .filter(|p| !p.is_empty())
        .collect();
    match parts.as_slice() {
        [year] => NaiveDate::from_ymd_opt(parse_year(year)?, 1, 1),
        [a, b] => {
            if let Some(year) = parse_year(a) {
                // compact range such as `2019-2021` or `2021-present`
                if is_ongoing(b) {
                    return Some(today);
                }
                if let Some(end) = parse_year(b) {
                    return NaiveDate::from_ymd_opt(end, 1, 1);
                }
                let month = b.parse::<u32>().ok()?;
                NaiveDate::from_ymd_opt(year, month, 1)
            } else {
                NaiveDate::from_ymd_opt(parse_year(b)?, month_index(a)?, 1)
            }
        }
        _ => None,
    }
}

/// End of a `start - end` style timeframe, or its only endpoint.
#[must_use]
pub fn timeframe_end(timeframe: &str, today: NaiveDate) -> Option<NaiveDate> {
    let parts: Vec<&str> = timeframe
        .split(['–', '—'])
        .flat_map(|p| p.split(" - "))
        .flat_map(|p| p.split(" to "))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    parts.iter().rev().find_map(|p| parse_date(p, today))
}

fn is_ongoing(s: &str) -> bool {
    matches!(s, "present" | "current" | "now" | "ongoing")
}

fn parse_year(s: &str) -> Option<i32> {
    if s.len() != 4 {
        return None;
    }
    let year = s.parse::<i32>().ok()?;
    (1900..=2200).contains(&year).then_some(year)
}

fn month_index(s: &str) -> Option<u32> {
    let prefix: String = s.chars().take(3).collect();
    let idx = MONTHS.iter().position(|m| *m == prefix)?;
    u32::try_from(idx + 1).ok()
}
