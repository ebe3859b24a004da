//! Typed rows and the per-fetch dataset.

use serde::{Deserialize, Serialize};

use crate::sanitize::Column;

/// One row of the "today" table. `rank == 0` marks the aggregate row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryRecord {
    pub rank: u32,
    pub country: String,
    pub total_cases: Option<i64>,
    pub new_cases: Option<i64>,
    pub total_deaths: Option<i64>,
    pub new_deaths: Option<i64>,
    pub total_recovered: Option<i64>,
    pub new_recovered: Option<i64>,
    pub active_cases: Option<i64>,
    pub serious_cases: Option<i64>,
    pub total_cases_per_1m: Option<i64>,
    pub deaths_per_1m: Option<i64>,
    pub total_tests: Option<i64>,
    pub tests_per_1m: Option<i64>,
    pub population: Option<i64>,
}

impl CountryRecord {
    pub fn unreported(rank: u32, country: impl Into<String>) -> Self {
        Self {
            rank,
            country: country.into(),
            total_cases: None,
            new_cases: None,
            total_deaths: None,
            new_deaths: None,
            total_recovered: None,
            new_recovered: None,
            active_cases: None,
            serious_cases: None,
            total_cases_per_1m: None,
            deaths_per_1m: None,
            total_tests: None,
            tests_per_1m: None,
            population: None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.rank == 0
    }

    pub fn stat(&self, column: Column) -> Option<i64> {
        match column {
            Column::Rank | Column::Country => None,
            Column::TotalCases => self.total_cases,
            Column::NewCases => self.new_cases,
            Column::TotalDeaths => self.total_deaths,
            Column::NewDeaths => self.new_deaths,
            Column::TotalRecovered => self.total_recovered,
            Column::NewRecovered => self.new_recovered,
            Column::ActiveCases => self.active_cases,
            Column::SeriousCases => self.serious_cases,
            Column::TotalCasesPer1m => self.total_cases_per_1m,
            Column::DeathsPer1m => self.deaths_per_1m,
            Column::TotalTests => self.total_tests,
            Column::TestsPer1m => self.tests_per_1m,
            Column::Population => self.population,
        }
    }

    pub(crate) fn stat_mut(&mut self, column: Column) -> Option<&mut Option<i64>> {
        match column {
            Column::Rank | Column::Country => None,
            Column::TotalCases => Some(&mut self.total_cases),
            Column::NewCases => Some(&mut self.new_cases),
            Column::TotalDeaths => Some(&mut self.total_deaths),
            Column::NewDeaths => Some(&mut self.new_deaths),
            Column::TotalRecovered => Some(&mut self.total_recovered),
            Column::NewRecovered => Some(&mut self.new_recovered),
            Column::ActiveCases => Some(&mut self.active_cases),
            Column::SeriousCases => Some(&mut self.serious_cases),
            Column::TotalCasesPer1m => Some(&mut self.total_cases_per_1m),
            Column::DeathsPer1m => Some(&mut self.deaths_per_1m),
            Column::TotalTests => Some(&mut self.total_tests),
            Column::TestsPer1m => Some(&mut self.tests_per_1m),
            Column::Population => Some(&mut self.population),
        }
    }
}

/// Records from one successful fetch plus its ISO-8601 fetch time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub records: Vec<CountryRecord>,
    pub last_fetched: String,
}

impl Dataset {
    pub fn new(records: Vec<CountryRecord>, last_fetched: impl Into<String>) -> Self {
        Self {
            records,
            last_fetched: last_fetched.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, country: &str) -> Option<&CountryRecord> {
        self.records
            .iter()
            .find(|record| record.country.eq_ignore_ascii_case(country))
    }
}
