//! Movie catalog records.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Maximum title length in bytes.
const MAX_TITLE_BYTES: usize = 500;

/// Year of the first motion picture; nothing older is accepted.
const EARLIEST_YEAR: i32 = 1888;

/// A catalog record. `version` starts at 1 and is bumped on every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movie {
    pub id: i64,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub year: i32,
    pub runtime: i32,
    pub genres: Vec<String>,
    pub version: i32,
}

/// Field-keyed validation failures. Only the first failure per field is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(pub BTreeMap<String, String>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Record `message` for `field` unless `ok` holds or the field already failed.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok && !self.0.contains_key(field) {
            self.0.insert(field.to_string(), message.to_string());
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k} {v}")).collect();
        f.write_str(&parts.join(", "))
    }
}

impl Movie {
    /// Validate the user-editable fields.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = ValidationErrors::default();
        let current_year = Utc::now().year();

        v.check(!self.title.is_empty(), "title", "must be provided");
        v.check(
            self.title.len() <= MAX_TITLE_BYTES,
            "title",
            "must not be more than 500 bytes long",
        );

        v.check(self.year != 0, "year", "must be provided");
        v.check(self.year >= EARLIEST_YEAR, "year", "must be greater than 1888");
        v.check(self.year <= current_year, "year", "must not be in the future");

        v.check(self.runtime != 0, "runtime", "must be provided");
        v.check(self.runtime > 0, "runtime", "must be a positive integer");

        v.check(!self.genres.is_empty(), "genres", "must contain at least 1 genre");
        v.check(self.genres.len() <= 5, "genres", "must not contain more than 5 genres");
        let unique: HashSet<&String> = self.genres.iter().collect();
        v.check(
            unique.len() == self.genres.len(),
            "genres",
            "must not contain duplicate values",
        );

        if v.is_empty() { Ok(()) } else { Err(v) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn casablanca() -> Movie {
        Movie {
            id: 0,
            created_at: Utc::now(),
            title: "Casablanca".into(),
            year: 1942,
            runtime: 102,
            genres: vec!["drama".into(), "romance".into(), "war".into()],
            version: 1,
        }
    }

    #[test]
    fn valid_movie_passes() {
        assert!(casablanca().validate().is_ok());
    }

    #[test]
    fn first_failure_per_field_wins() {
        let mut movie = casablanca();
        movie.year = 0;
        let errors = movie.validate().unwrap_err();
        assert_eq!(errors.0.get("year").map(String::as_str), Some("must be provided"));
    }

    #[test]
    fn rejects_duplicate_and_excess_genres() {
        let mut movie = casablanca();
        movie.genres = vec!["drama".into(), "drama".into()];
        let errors = movie.validate().unwrap_err();
        assert_eq!(
            errors.0.get("genres").map(String::as_str),
            Some("must not contain duplicate values")
        );

        movie.genres = (0..6).map(|i| format!("g{i}")).collect();
        let errors = movie.validate().unwrap_err();
        assert_eq!(
            errors.0.get("genres").map(String::as_str),
            Some("must not contain more than 5 genres")
        );
    }

    #[test]
    fn rejects_future_year_and_negative_runtime() {
        let mut movie = casablanca();
        movie.year = Utc::now().year() + 1;
        movie.runtime = -5;
        let errors = movie.validate().unwrap_err();
        assert!(errors.0.contains_key("year"));
        assert_eq!(
            errors.0.get("runtime").map(String::as_str),
            Some("must be a positive integer")
        );
    }
}
