// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ISO 8601 duration encoding for `duration` properties.
//!
//! Durations are published as `P<days>DT<seconds>S`. Parsing accepts the
//! week form (`P2W`) and the day/time form (`P1DT2H3M4.5S`). Years and
//! months are rejected because their length is not fixed.

use chrono::TimeDelta;

const NANOS_PER_MILLI: i32 = 1_000_000;

/// Formats a duration as `P<days>DT<seconds>S`.
pub(crate) fn format_duration(duration: TimeDelta) -> String {
    let sign = if duration < TimeDelta::zero() { "-" } else { "" };
    let duration = duration.abs();
    let days = duration.num_days();
    let rest = duration - TimeDelta::seconds(days * 86_400);
    let seconds = rest.num_seconds();
    let millis = rest.subsec_nanos() / NANOS_PER_MILLI;
    if millis == 0 {
        format!("{sign}P{days}DT{seconds}S")
    } else {
        format!("{sign}P{days}DT{seconds}.{millis:03}S")
    }
}

/// Parses an ISO 8601 duration.
pub(crate) fn parse_duration(text: &str) -> Option<TimeDelta> {
    let body = text.strip_prefix('P')?;
    let (date, time) = match body.split_once('T') {
        Some((_, "")) => return None,
        Some((date, time)) => (date, Some(time)),
        None if body.is_empty() => return None,
        None => (body, None),
    };

    let mut total = TimeDelta::zero();
    for (number, unit) in components(date)? {
        let part = match unit {
            'W' => TimeDelta::try_weeks(number.parse().ok()?)?,
            'D' => TimeDelta::try_days(number.parse().ok()?)?,
            _ => return None,
        };
        total = total.checked_add(&part)?;
    }

    if let Some(time) = time {
        for (number, unit) in components(time)? {
            let part = match unit {
                'H' => TimeDelta::try_hours(number.parse().ok()?)?,
                'M' => TimeDelta::try_minutes(number.parse().ok()?)?,
                'S' => seconds(number)?,
                _ => return None,
            };
            total = total.checked_add(&part)?;
        }
    }

    Some(total)
}

/// Splits `1D2H` style text into `(number, unit)` pairs.
fn components(text: &str) -> Option<Vec<(&str, char)>> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c.is_ascii_digit() || c == '.' {
            continue;
        }
        if i == start {
            return None;
        }
        parts.push((&text[start..i], c));
        start = i + c.len_utf8();
    }
    (start == text.len()).then_some(parts)
}

fn seconds(number: &str) -> Option<TimeDelta> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let mut delta = TimeDelta::try_seconds(whole.parse().ok()?)?;
    if !fraction.is_empty() {
        if fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let scale = 10_i64.pow(9 - u32::try_from(fraction.len()).ok()?);
        let nanos = fraction.parse::<i64>().ok()? * scale;
        delta = delta.checked_add(&TimeDelta::nanoseconds(nanos))?;
    }
    Some(delta)
}
