//! Cell text normalization for the statistics table.

use serde::{Deserialize, Serialize};

pub const NOT_AVAILABLE: &str = "N/A";

pub const COLUMN_COUNT: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Int(i64),
    Text(String),
    Absent,
}

impl CellValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Text(_) | Self::Absent => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignPolicy {
    #[default]
    Preserve,
    Strip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Rank,
    Country,
    TotalCases,
    NewCases,
    TotalDeaths,
    NewDeaths,
    TotalRecovered,
    NewRecovered,
    ActiveCases,
    SeriousCases,
    TotalCasesPer1m,
    DeathsPer1m,
    TotalTests,
    TestsPer1m,
    Population,
}

impl Column {
    pub const ALL: [Column; COLUMN_COUNT] = [
        Column::Rank,
        Column::Country,
        Column::TotalCases,
        Column::NewCases,
        Column::TotalDeaths,
        Column::NewDeaths,
        Column::TotalRecovered,
        Column::NewRecovered,
        Column::ActiveCases,
        Column::SeriousCases,
        Column::TotalCasesPer1m,
        Column::DeathsPer1m,
        Column::TotalTests,
        Column::TestsPer1m,
        Column::Population,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn field_name(self) -> &'static str {
        match self {
            Self::Rank => "rank",
            Self::Country => "country",
            Self::TotalCases => "total_cases",
            Self::NewCases => "new_cases",
            Self::TotalDeaths => "total_deaths",
            Self::NewDeaths => "new_deaths",
            Self::TotalRecovered => "total_recovered",
            Self::NewRecovered => "new_recovered",
            Self::ActiveCases => "active_cases",
            Self::SeriousCases => "serious_cases",
            Self::TotalCasesPer1m => "total_cases_per_1m",
            Self::DeathsPer1m => "deaths_per_1m",
            Self::TotalTests => "total_tests",
            Self::TestsPer1m => "tests_per_1m",
            Self::Population => "population",
        }
    }

    pub fn is_delta(self) -> bool {
        matches!(self, Self::NewCases | Self::NewDeaths | Self::NewRecovered)
    }
}

pub fn sanitize(raw: &str, column: usize) -> CellValue {
    sanitize_with(raw, column, SignPolicy::Preserve)
}

/// `N/A` is absent in every column and an empty numeric cell is `0`. One
/// leading sign is consumed; decimals truncate toward zero. Anything still
/// not a number comes back as [`CellValue::Text`].
pub fn sanitize_with(raw: &str, column: usize, policy: SignPolicy) -> CellValue {
    let cleaned: String = raw.trim().chars().filter(|ch| *ch != ',').collect();
    let cleaned = cleaned.trim();

    if cleaned == NOT_AVAILABLE {
        return CellValue::Absent;
    }
    if Column::from_index(column) == Some(Column::Country) {
        return CellValue::Text(cleaned.to_string());
    }
    if cleaned.is_empty() {
        return CellValue::Int(0);
    }

    let (negative, unsigned) = match cleaned.as_bytes()[0] {
        b'-' => (true, &cleaned[1..]),
        b'+' => (false, &cleaned[1..]),
        _ => (false, cleaned),
    };

    // A bare sign is an empty delta.
    if unsigned.trim().is_empty() {
        return CellValue::Int(0);
    }

    match parse_magnitude(unsigned) {
        Some(magnitude) if negative && policy == SignPolicy::Preserve => CellValue::Int(-magnitude),
        Some(magnitude) => CellValue::Int(magnitude),
        None => CellValue::Text(cleaned.to_string()),
    }
}

fn parse_magnitude(text: &str) -> Option<i64> {
    if is_ascii_digits(text) {
        return text.parse::<i64>().ok();
    }

    let (whole, fraction) = text.split_once('.')?;
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !(whole.is_empty() || is_ascii_digits(whole))
        || !(fraction.is_empty() || is_ascii_digits(fraction))
    {
        return None;
    }
    if whole.is_empty() {
        return Some(0);
    }
    whole.parse::<i64>().ok()
}

fn is_ascii_digits(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|byte| byte.is_ascii_digit())
}
