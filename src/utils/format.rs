use chrono::{DateTime, TimeDelta, Utc};

/// Format an amount of base units with `exponent` decimal places, rounded to `precision` places.
pub fn format_coin_amount(amount: i64, exponent: u32, precision: u32) -> String {
	let precision = precision.min(exponent);
	let unit = 10u128.pow(exponent);
	let step = 10u128.pow(exponent - precision);
	let magnitude = amount.unsigned_abs() as u128;
	let rounded = (magnitude + step / 2) / step * step;

	let whole = rounded / unit;
	let fraction = (rounded % unit) / step;
	let sign = if amount < 0 && rounded > 0 { "-" } else { "" };

	if precision == 0 {
		format!("{sign}{whole}")
	} else {
		format!("{sign}{whole}.{fraction:0width$}", width = precision as usize)
	}
}

fn plural(count: i64, unit: &str) -> String {
	if count == 1 {
		format!("1 {unit}")
	} else {
		format!("{count} {unit}s")
	}
}

fn span(delta: TimeDelta) -> String {
	let minutes = delta.num_minutes();
	if minutes < 60 {
		return plural(minutes, "minute");
	}
	let hours = delta.num_hours();
	if hours < 24 {
		return plural(hours, "hour");
	}
	plural(delta.num_days(), "day")
}

/// Human readable distance between `then` and `now`, at minute resolution.
pub fn format_relative_time(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
	let delta = now - then;
	if delta.num_minutes().abs() < 1 {
		return "just now".to_string();
	}
	if delta < TimeDelta::zero() {
		format!("in {}", span(-delta))
	} else {
		format!("{} ago", span(delta))
	}
}
