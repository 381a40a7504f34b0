//! Core domain model for the YH late-application monitor.

use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "yhmon-core";

/// Column order of persisted snapshots. Must match the field order of [`ListingRecord`].
pub const SNAPSHOT_COLUMNS: [&str; 9] = [
    "identifier",
    "title",
    "provider",
    "start",
    "scope",
    "pace",
    "location",
    "status",
    "url",
];

/// Listing partition tracked as an independent snapshot series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "on-site")]
    OnSite,
    #[serde(rename = "remote")]
    Remote,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::OnSite, Category::Remote];

    pub fn slug(self) -> &'static str {
        match self {
            Category::OnSite => "on-site",
            Category::Remote => "remote",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown category `{0}` (expected one of: on-site, remote)")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.slug() == s.trim())
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Calendar day a snapshot was captured on, rendered as `YYYYMMDD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotDate(NaiveDate);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid snapshot date `{0}` (expected YYYYMMDD)")]
pub struct InvalidSnapshotDate(pub String);

impl SnapshotDate {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    pub fn today() -> Self {
        Self(Local::now().date_naive())
    }

    pub fn file_stem(self) -> String {
        self.0.format("%Y%m%d").to_string()
    }
}

impl fmt::Display for SnapshotDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d"))
    }
}

impl FromStr for SnapshotDate {
    type Err = InvalidSnapshotDate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // chrono accepts variable-width fields; filenames must be exactly eight digits.
        if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidSnapshotDate(s.to_string()));
        }
        NaiveDate::parse_from_str(s, "%Y%m%d")
            .map(Self)
            .map_err(|_| InvalidSnapshotDate(s.to_string()))
    }
}

/// One program listing as extracted from a search result page.
///
/// Every field is free-form text. `identifier` is derived by
/// [`ListingRecord::derive_identifier`] and is unique within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ListingRecord {
    pub identifier: String,
    pub title: String,
    pub provider: String,
    pub start: String,
    pub scope: String,
    pub pace: String,
    pub location: String,
    pub status: String,
    pub url: String,
}

/// Non-identifier fields of a [`ListingRecord`], in column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingField {
    Title,
    Provider,
    Start,
    Scope,
    Pace,
    Location,
    Status,
    Url,
}

impl ListingField {
    pub const ALL: [ListingField; 8] = [
        ListingField::Title,
        ListingField::Provider,
        ListingField::Start,
        ListingField::Scope,
        ListingField::Pace,
        ListingField::Location,
        ListingField::Status,
        ListingField::Url,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ListingField::Title => "title",
            ListingField::Provider => "provider",
            ListingField::Start => "start",
            ListingField::Scope => "scope",
            ListingField::Pace => "pace",
            ListingField::Location => "location",
            ListingField::Status => "status",
            ListingField::Url => "url",
        }
    }
}

impl fmt::Display for ListingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ListingRecord {
    /// Stable key for a listing: the upstream program code when the listing link
    /// carries one, otherwise normalized `title:provider:location`.
    ///
    /// Composite keys always contain two `:` separators and codes never do, so
    /// the two forms cannot collide.
    pub fn derive_identifier(
        program_code: Option<&str>,
        title: &str,
        provider: &str,
        location: &str,
    ) -> String {
        if let Some(code) = program_code
            .map(normalize_key_fragment)
            .filter(|code| !code.is_empty())
        {
            return code;
        }
        [title, provider, location]
            .iter()
            .map(|part| normalize_key_fragment(part))
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn field(&self, field: ListingField) -> &str {
        match field {
            ListingField::Title => &self.title,
            ListingField::Provider => &self.provider,
            ListingField::Start => &self.start,
            ListingField::Scope => &self.scope,
            ListingField::Pace => &self.pace,
            ListingField::Location => &self.location,
            ListingField::Status => &self.status,
            ListingField::Url => &self.url,
        }
    }
}

/// Lower-case, collapse every run of separator characters into `-`, trim dashes.
///
/// Alphanumerics plus `+` and `#` are significant, so `C#` and `C++` stay distinct.
pub fn normalize_key_fragment(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if is_key_char(c) { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || c == '+' || c == '#'
}

/// Collapse runs of whitespace (including non-breaking space) into single spaces.
pub fn normalize_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One category's record set captured on one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub category: Category,
    pub date: SnapshotDate,
    pub records: Vec<ListingRecord>,
}

impl Snapshot {
    pub fn new(category: Category, date: SnapshotDate, records: Vec<ListingRecord>) -> Self {
        Self {
            category,
            date,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
