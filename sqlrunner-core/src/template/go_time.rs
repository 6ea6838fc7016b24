//! Formatting with Go reference-time layouts (`2006-01-02 15:04:05`).
//!
//! Existing playbooks pass Go layouts to `nowWithFormat`, so the layout is
//! scanned for Go's standard chunks and each chunk is rendered with chrono.

use chrono::{DateTime, FixedOffset, Offset, Timelike};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    LongMonth,
    Month,
    NumMonth,
    ZeroMonth,
    LongWeekDay,
    WeekDay,
    Day,
    UnderDay,
    ZeroDay,
    ZeroYearDay,
    Hour,
    Hour12,
    ZeroHour12,
    Minute,
    ZeroMinute,
    Second,
    ZeroSecond,
    LongYear,
    Year,
    PM,
    Pm,
    TZ,
    NumSecondsTz,
    NumTz,
    NumColonTz,
    NumShortTz,
    NumColonSecondsTz,
    IsoSecondsTz,
    IsoTz,
    IsoColonTz,
    IsoShortTz,
    IsoColonSecondsTz,
    Fraction { digits: usize, trim: bool },
}

/// Splits `layout` into the literal prefix, the chunk, and the rest.
fn next_chunk(layout: &str) -> (&str, Option<Chunk>, &str) {
    let b = layout.as_bytes();
    let mut i = 0;
    while i < b.len() {
        let rest = &layout[i..];
        let found: Option<(Chunk, usize)> = match b[i] {
            b'J' => {
                if rest.starts_with("January") {
                    Some((Chunk::LongMonth, 7))
                } else if rest.starts_with("Jan") {
                    Some((Chunk::Month, 3))
                } else {
                    None
                }
            }
            b'M' => {
                if rest.starts_with("Monday") {
                    Some((Chunk::LongWeekDay, 6))
                } else if rest.starts_with("Mon") {
                    Some((Chunk::WeekDay, 3))
                } else if rest.starts_with("MST") {
                    Some((Chunk::TZ, 3))
                } else {
                    None
                }
            }
            b'0' => {
                if rest.starts_with("002") {
                    Some((Chunk::ZeroYearDay, 3))
                } else if rest.len() >= 2 && (b'1'..=b'6').contains(&b[i + 1]) {
                    let chunk = match b[i + 1] {
                        b'1' => Chunk::ZeroMonth,
                        b'2' => Chunk::ZeroDay,
                        b'3' => Chunk::ZeroHour12,
                        b'4' => Chunk::ZeroMinute,
                        b'5' => Chunk::ZeroSecond,
                        _ => Chunk::Year,
                    };
                    Some((chunk, 2))
                } else {
                    None
                }
            }
            b'1' => {
                if rest.starts_with("15") {
                    Some((Chunk::Hour, 2))
                } else {
                    Some((Chunk::NumMonth, 1))
                }
            }
            b'2' => {
                if rest.starts_with("2006") {
                    Some((Chunk::LongYear, 4))
                } else {
                    Some((Chunk::Day, 1))
                }
            }
            b'_' => {
                if rest.starts_with("_2") && !rest.starts_with("_2006") {
                    Some((Chunk::UnderDay, 2))
                } else {
                    None
                }
            }
            b'3' => Some((Chunk::Hour12, 1)),
            b'4' => Some((Chunk::Minute, 1)),
            b'5' => Some((Chunk::Second, 1)),
            b'P' if rest.starts_with("PM") => Some((Chunk::PM, 2)),
            b'p' if rest.starts_with("pm") => Some((Chunk::Pm, 2)),
            b'-' => {
                if rest.starts_with("-07:00:00") {
                    Some((Chunk::NumColonSecondsTz, 9))
                } else if rest.starts_with("-070000") {
                    Some((Chunk::NumSecondsTz, 7))
                } else if rest.starts_with("-07:00") {
                    Some((Chunk::NumColonTz, 6))
                } else if rest.starts_with("-0700") {
                    Some((Chunk::NumTz, 5))
                } else if rest.starts_with("-07") {
                    Some((Chunk::NumShortTz, 3))
                } else {
                    None
                }
            }
            b'Z' => {
                if rest.starts_with("Z07:00:00") {
                    Some((Chunk::IsoColonSecondsTz, 9))
                } else if rest.starts_with("Z070000") {
                    Some((Chunk::IsoSecondsTz, 7))
                } else if rest.starts_with("Z07:00") {
                    Some((Chunk::IsoColonTz, 6))
                } else if rest.starts_with("Z0700") {
                    Some((Chunk::IsoTz, 5))
                } else if rest.starts_with("Z07") {
                    Some((Chunk::IsoShortTz, 3))
                } else {
                    None
                }
            }
            b'.' | b',' if i + 1 < b.len() && (b[i + 1] == b'0' || b[i + 1] == b'9') => {
                let digit = b[i + 1];
                let mut j = i + 1;
                while j < b.len() && b[j] == digit {
                    j += 1;
                }
                if j < b.len() && b[j].is_ascii_digit() {
                    None
                } else {
                    Some((
                        Chunk::Fraction {
                            digits: j - i - 1,
                            trim: digit == b'9',
                        },
                        j - i,
                    ))
                }
            }
            _ => None,
        };

        if let Some((chunk, len)) = found {
            return (&layout[..i], Some(chunk), &layout[i + len..]);
        }
        i += layout[i..].chars().next().map(char::len_utf8).unwrap_or(1);
    }
    (layout, None, "")
}

fn offset_string(seconds: i32, colon: bool, with_seconds: bool, hours_only: bool) -> String {
    let sign = if seconds < 0 { '-' } else { '+' };
    let abs = seconds.abs();
    let (h, m, s) = (abs / 3600, (abs / 60) % 60, abs % 60);
    let sep = if colon { ":" } else { "" };
    if hours_only {
        format!("{}{:02}", sign, h)
    } else if with_seconds {
        format!("{}{:02}{}{:02}{}{:02}", sign, h, sep, m, sep, s)
    } else {
        format!("{}{:02}{}{:02}", sign, h, sep, m)
    }
}

fn render_chunk(out: &mut String, chunk: Chunk, dt: &DateTime<FixedOffset>) {
    let offset = dt.offset().fix().local_minus_utc();
    let piece = match chunk {
        Chunk::LongMonth => dt.format("%B").to_string(),
        Chunk::Month => dt.format("%b").to_string(),
        Chunk::NumMonth => dt.format("%-m").to_string(),
        Chunk::ZeroMonth => dt.format("%m").to_string(),
        Chunk::LongWeekDay => dt.format("%A").to_string(),
        Chunk::WeekDay => dt.format("%a").to_string(),
        Chunk::Day => dt.format("%-d").to_string(),
        Chunk::UnderDay => dt.format("%e").to_string(),
        Chunk::ZeroDay => dt.format("%d").to_string(),
        Chunk::ZeroYearDay => dt.format("%j").to_string(),
        Chunk::Hour => dt.format("%H").to_string(),
        Chunk::Hour12 => dt.format("%-I").to_string(),
        Chunk::ZeroHour12 => dt.format("%I").to_string(),
        Chunk::Minute => dt.format("%-M").to_string(),
        Chunk::ZeroMinute => dt.format("%M").to_string(),
        Chunk::Second => dt.format("%-S").to_string(),
        Chunk::ZeroSecond => dt.format("%S").to_string(),
        Chunk::LongYear => dt.format("%Y").to_string(),
        Chunk::Year => dt.format("%y").to_string(),
        Chunk::PM => dt.format("%p").to_string(),
        Chunk::Pm => dt.format("%P").to_string(),
        Chunk::TZ => {
            if offset == 0 {
                "UTC".to_string()
            } else {
                offset_string(offset, false, false, false)
            }
        }
        Chunk::NumTz => offset_string(offset, false, false, false),
        Chunk::NumColonTz => offset_string(offset, true, false, false),
        Chunk::NumShortTz => offset_string(offset, false, false, true),
        Chunk::NumSecondsTz => offset_string(offset, false, true, false),
        Chunk::NumColonSecondsTz => offset_string(offset, true, true, false),
        Chunk::IsoTz | Chunk::IsoColonTz | Chunk::IsoShortTz | Chunk::IsoSecondsTz
        | Chunk::IsoColonSecondsTz
            if offset == 0 =>
        {
            "Z".to_string()
        }
        Chunk::IsoTz => offset_string(offset, false, false, false),
        Chunk::IsoColonTz => offset_string(offset, true, false, false),
        Chunk::IsoShortTz => offset_string(offset, false, false, true),
        Chunk::IsoSecondsTz => offset_string(offset, false, true, false),
        Chunk::IsoColonSecondsTz => offset_string(offset, true, true, false),
        Chunk::Fraction { digits, trim } => {
            let nanos = format!("{:09}", dt.nanosecond() % 1_000_000_000);
            let mut frac = nanos[..digits.min(9)].to_string();
            if trim {
                frac = frac.trim_end_matches('0').to_string();
                if frac.is_empty() {
                    return;
                }
            }
            format!(".{}", frac)
        }
    };
    out.push_str(&piece);
}

/// Formats `dt` using a Go time layout.
pub fn format(dt: &DateTime<FixedOffset>, layout: &str) -> String {
    let mut out = String::with_capacity(layout.len() + 10);
    let mut rest = layout;
    loop {
        let (prefix, chunk, suffix) = next_chunk(rest);
        out.push_str(prefix);
        match chunk {
            Some(chunk) => render_chunk(&mut out, chunk, dt),
            None => break,
        }
        rest = suffix;
    }
    out
}
