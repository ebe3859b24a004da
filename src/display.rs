//! Text adapters for a table view: headers, cell strings, filtering, sorting.

use std::cmp::Ordering;

use chrono::DateTime;

use crate::config::{APP_NAME, APP_VERSION};
use crate::record::CountryRecord;
use crate::sanitize::{Column, COLUMN_COUNT, NOT_AVAILABLE};

pub const TABLE_HEADERS: [&str; COLUMN_COUNT] = [
    "#",
    "Country",
    "Total Cases",
    "New Cases",
    "Total Deaths",
    "New Deaths",
    "Total Recovered",
    "New Recovered",
    "Active Cases",
    "Serious Cases",
    "Total Cases / 1M",
    "Deaths / 1M",
    "Total Tests",
    "Tests / 1M",
    "Population",
];

const LAST_FETCHED_FORMAT: &str = "%d %B %Y, %H:%M";

pub fn cell_text_values(record: &CountryRecord) -> Vec<String> {
    Column::ALL
        .iter()
        .map(|column| match column {
            Column::Rank if record.is_aggregate() => String::new(),
            Column::Rank => record.rank.to_string(),
            Column::Country => record.country.clone(),
            stat => match record.stat(*stat) {
                None => NOT_AVAILABLE.to_string(),
                Some(value) if stat.is_delta() && value > 0 => format!("+{}", group_digits(value)),
                Some(value) => group_digits(value),
            },
        })
        .collect()
}

// Empty query keeps all.
pub fn filter_by_country<'a>(records: &'a [CountryRecord], query: &str) -> Vec<&'a CountryRecord> {
    let needle = query.trim().to_lowercase();
    records
        .iter()
        .filter(|record| needle.is_empty() || record.country.to_lowercase().contains(&needle))
        .collect()
}

/// Stable; absent statistics sort last in either direction.
pub fn sort_records(records: &mut [CountryRecord], column: Column, descending: bool) {
    records.sort_by(|a, b| {
        let ordering = match column {
            Column::Rank => a.rank.cmp(&b.rank),
            Column::Country => a.country.to_lowercase().cmp(&b.country.to_lowercase()),
            stat => match (a.stat(stat), b.stat(stat)) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => return Ordering::Less,
                (None, Some(_)) => return Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
}

pub fn last_fetched_label(last_fetched: &str) -> String {
    match DateTime::parse_from_rfc3339(last_fetched.trim()) {
        Ok(ts) => format!("Last fetched: {}", ts.format(LAST_FETCHED_FORMAT)),
        Err(_) => format!("{APP_NAME} {APP_VERSION}"),
    }
}

fn group_digits(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
