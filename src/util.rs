//! Small shared helpers: duration grammar and human-readable ages.

const SECONDS_MINUTE: i64 = 60;
const SECONDS_HOUR: i64 = SECONDS_MINUTE * 60;
const SECONDS_DAY: i64 = SECONDS_HOUR * 24;
const SECONDS_WEEK: i64 = SECONDS_DAY * 7;

const UNITS: [(char, i64); 4] = [
    ('w', SECONDS_WEEK),
    ('d', SECONDS_DAY),
    ('h', SECONDS_HOUR),
    ('m', SECONDS_MINUTE),
];

/// Parse a `(\d+w)?(\d+d)?(\d+h)?(\d+m)?` duration into seconds.
///
/// Units must appear in descending order and at most once each. Returns
/// `None` for the empty string or anything with leftover input.
pub fn parse_duration(input: &str) -> Option<i64> {
    let mut total = 0i64;
    let mut next_unit = 0;
    let mut rest = input;

    if input.is_empty() {
        return None;
    }

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 || digits_end == rest.len() {
            return None;
        }
        let (digits, tail) = rest.split_at(digits_end);
        let unit = tail.chars().next()?;
        let offset = UNITS[next_unit..].iter().position(|(c, _)| *c == unit)?;
        let scale = UNITS[next_unit + offset].1;
        total = total.checked_add(digits.parse::<i64>().ok()?.checked_mul(scale)?)?;
        next_unit += offset + 1;
        rest = &tail[1..];
    }

    Some(total)
}

/// Render an age in seconds using its two most significant units.
pub fn to_pretty_time(total_seconds: i64) -> String {
    let weeks = total_seconds / SECONDS_WEEK;
    let days = (total_seconds % SECONDS_WEEK) / SECONDS_DAY;
    let hours = (total_seconds % SECONDS_DAY) / SECONDS_HOUR;
    let minutes = (total_seconds % SECONDS_HOUR) / SECONDS_MINUTE;
    let seconds = total_seconds % SECONDS_MINUTE;

    [
        (weeks, "w"),
        (days, "d"),
        (hours, "h"),
        (minutes, "m"),
        (seconds, "s"),
    ]
    .iter()
    .filter(|(count, _)| *count > 0)
    .take(2)
    .map(|(count, unit)| format!("{count}{unit}"))
    .collect()
}
