//! Row parsing for the "today" statistics table body.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::record::CountryRecord;
use crate::sanitize::{sanitize_with, CellValue, Column, SignPolicy, COLUMN_COUNT};

/// Header and continent rows at the top of the source table body. Tied to the
/// page layout; revalidate when the source changes.
pub const LEADING_ROWS_SKIPPED: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLayout {
    pub skip_rows: usize,
    pub sign_policy: SignPolicy,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            skip_rows: LEADING_ROWS_SKIPPED,
            sign_policy: SignPolicy::Preserve,
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("row {row} has {found} cells, expected at least {expected}")]
    ShortRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("row {row}: rank '{value}' is not a non-negative integer")]
    InvalidRank { row: usize, value: String },
    #[error("row {row} has no country name")]
    EmptyCountry { row: usize },
    #[error("row {row}: {field} value '{value}' is not a number")]
    NonNumeric {
        row: usize,
        field: &'static str,
        value: String,
    },
    #[error("country '{country}' appears more than once")]
    DuplicateCountry { country: String },
}

pub fn parse_rows(fragment: &str) -> Result<Vec<CountryRecord>, ParseError> {
    parse_rows_with(fragment, &TableLayout::default())
}

/// Any malformed row fails the whole fragment.
pub fn parse_rows_with(
    fragment: &str,
    layout: &TableLayout,
) -> Result<Vec<CountryRecord>, ParseError> {
    // Bare <tr>/<tbody> markup is dropped by the HTML parser outside a table.
    let document = Html::parse_fragment(&format!("<table>{fragment}</table>"));
    let row_selector = Selector::parse("tr").expect("static row selector should parse");

    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for (row, element) in document
        .select(&row_selector)
        .enumerate()
        .skip(layout.skip_rows)
    {
        let cells = row_cells(element);
        let record = match parse_row(row, &cells, layout.sign_policy) {
            Ok(record) => record,
            Err(err) => {
                warn!(
                    component = "table",
                    event = "table.parse.failed",
                    row,
                    cells = cells.len(),
                    error = %err
                );
                return Err(err);
            }
        };

        if !seen.insert(record.country.clone()) {
            warn!(
                component = "table",
                event = "table.parse.failed",
                row,
                country = %record.country,
                error = "duplicate country"
            );
            return Err(ParseError::DuplicateCountry {
                country: record.country,
            });
        }
        records.push(record);
    }

    debug!(
        component = "table",
        event = "table.parse.finish",
        skipped_rows = layout.skip_rows,
        rows = records.len()
    );

    Ok(records)
}

fn row_cells(row: ElementRef<'_>) -> Vec<String> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| cell.value().name() == "td")
        .map(|cell| {
            cell.text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

fn parse_row(row: usize, cells: &[String], policy: SignPolicy) -> Result<CountryRecord, ParseError> {
    if cells.len() < COLUMN_COUNT {
        return Err(ParseError::ShortRow {
            row,
            found: cells.len(),
            expected: COLUMN_COUNT,
        });
    }

    let rank = match sanitize_with(&cells[0], Column::Rank.index(), policy) {
        CellValue::Absent => 0,
        CellValue::Int(value) => u32::try_from(value).map_err(|_| ParseError::InvalidRank {
            row,
            value: cells[0].clone(),
        })?,
        CellValue::Text(value) => return Err(ParseError::InvalidRank { row, value }),
    };

    let country = match sanitize_with(&cells[1], Column::Country.index(), policy) {
        CellValue::Text(name) if !name.is_empty() => name,
        _ => return Err(ParseError::EmptyCountry { row }),
    };

    let mut record = CountryRecord::unreported(rank, country);
    for column in Column::ALL.into_iter().skip(2) {
        let value = match sanitize_with(&cells[column.index()], column.index(), policy) {
            CellValue::Int(value) => Some(value),
            CellValue::Absent => None,
            CellValue::Text(value) => {
                return Err(ParseError::NonNumeric {
                    row,
                    field: column.field_name(),
                    value,
                })
            }
        };
        if let Some(slot) = record.stat_mut(column) {
            *slot = value;
        }
    }

    Ok(record)
}
