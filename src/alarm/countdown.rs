const MINUTES_PER_HOUR: i64 = 60;
const MINUTES_PER_DAY: i64 = 24 * MINUTES_PER_HOUR;

pub fn format_minutes(total_minutes: i64) -> String {
    let total = total_minutes.max(0);
    if total == 0 {
        return String::new();
    }

    let days = total / MINUTES_PER_DAY;
    let hours = (total / MINUTES_PER_HOUR) % 24;
    let minutes = total % MINUTES_PER_HOUR;

    if days > 0 {
        format!("{days}d {hours:02}h {minutes:02}m")
    } else if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else {
        format!("{minutes}m")
    }
}

pub fn format_minutes_lenient(raw: &str) -> String {
    format_minutes(coerce_integer(raw))
}

// Leading whitespace, an optional sign, then the longest run of digits.
// Input without digits is 0; out-of-range values saturate.
pub fn coerce_integer(raw: &str) -> i64 {
    let trimmed = raw.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let digits_end = rest
        .bytes()
        .position(|byte| !byte.is_ascii_digit())
        .unwrap_or(rest.len());
    let digits = &rest[..digits_end];
    if digits.is_empty() {
        return 0;
    }

    let mut value = 0_i64;
    for byte in digits.bytes() {
        let digit = i64::from(byte - b'0');
        value = value.saturating_mul(10);
        value = if negative {
            value.saturating_sub(digit)
        } else {
            value.saturating_add(digit)
        };
    }
    value
}
