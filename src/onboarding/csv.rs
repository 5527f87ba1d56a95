/*
 * This file is part of the Tanoda LMS.
 *
 * Copyright (C) 2025 Kovács Dávid <kapcsolat@kovacsdavid.dev>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use crate::common::types::Email;
use crate::onboarding::types::UserRole;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// A validated roster row; this is the task payload the workers process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterRow {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub student_id: Option<String>,
    pub department: Option<String>,
    #[serde(default)]
    pub course_codes: Vec<String>,
    pub graduation_year: Option<i32>,
    pub phone: Option<String>,
    pub preferred_language: Option<String>,
}

/// A row refused during ingest, reported back to the caller by its
/// 1-based data row index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRow {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub accepted: Vec<RosterRow>,
    pub rejected: Vec<RejectedRow>,
}

#[derive(Debug, Error)]
pub enum CsvIngestError {
    #[error("A fájl nem dolgozható fel: {0}")]
    Malformed(String),

    #[error("Hiányzó kötelező oszlop: {0}")]
    MissingColumn(&'static str),

    #[error("A fájl legfeljebb {0} sort tartalmazhat")]
    TooManyRows(usize),
}

struct ColumnMap {
    email: usize,
    first_name: usize,
    last_name: usize,
    role: usize,
    student_id: Option<usize>,
    department: Option<usize>,
    course_codes: Option<usize>,
    graduation_year: Option<usize>,
    phone: Option<usize>,
    preferred_language: Option<usize>,
}

impl ColumnMap {
    fn resolve(headers: &StringRecord) -> Result<Self, CsvIngestError> {
        let position = |name: &str| {
            headers
                .iter()
                .position(|header| header.trim().eq_ignore_ascii_case(name))
        };
        Ok(Self {
            email: position("email").ok_or(CsvIngestError::MissingColumn("email"))?,
            first_name: position("first_name")
                .ok_or(CsvIngestError::MissingColumn("first_name"))?,
            last_name: position("last_name")
                .ok_or(CsvIngestError::MissingColumn("last_name"))?,
            role: position("role").ok_or(CsvIngestError::MissingColumn("role"))?,
            student_id: position("student_id"),
            department: position("department"),
            course_codes: position("course_codes"),
            graduation_year: position("graduation_year"),
            phone: position("phone"),
            preferred_language: position("preferred_language"),
        })
    }
}

fn cell(record: &StringRecord, index: Option<usize>) -> Option<String> {
    let value = record.get(index?)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Streaming parse and per-row validation of bulk roster payloads.
///
/// Rows are read one by one off the underlying reader, so a 100k-row file
/// never sits in memory twice. Invalid rows are collected with their index
/// and reason; valid rows become tasks. Within one file the first
/// occurrence of an email wins and later duplicates are rejected.
pub struct RosterCsvIngestor;

impl RosterCsvIngestor {
    pub fn ingest(bytes: &[u8], max_rows: usize) -> Result<IngestReport, CsvIngestError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);
        let headers = reader
            .headers()
            .map_err(|e| CsvIngestError::Malformed(e.to_string()))?
            .clone();
        let columns = ColumnMap::resolve(&headers)?;

        let mut report = IngestReport::default();
        let mut seen_emails: HashSet<String> = HashSet::new();

        for (offset, record) in reader.records().enumerate() {
            let index = offset + 1;
            if index > max_rows {
                return Err(CsvIngestError::TooManyRows(max_rows));
            }

            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    report.rejected.push(RejectedRow {
                        index,
                        reason: format!("hibás sor: {e}"),
                    });
                    continue;
                }
            };

            match Self::validate_row(&columns, &record, &mut seen_emails) {
                Ok(row) => report.accepted.push(row),
                Err(reason) => report.rejected.push(RejectedRow { index, reason }),
            }
        }

        Ok(report)
    }

    fn validate_row(
        columns: &ColumnMap,
        record: &StringRecord,
        seen_emails: &mut HashSet<String>,
    ) -> Result<RosterRow, String> {
        let email = cell(record, Some(columns.email))
            .ok_or_else(|| String::from("hiányzó e-mail cím"))?
            .parse::<Email>()?;
        if !seen_emails.insert(email.as_str().to_string()) {
            return Err(format!("ismétlődő e-mail cím: {email}"));
        }

        let first_name = cell(record, Some(columns.first_name))
            .ok_or_else(|| String::from("hiányzó keresztnév"))?;
        let last_name = cell(record, Some(columns.last_name))
            .ok_or_else(|| String::from("hiányzó vezetéknév"))?;
        let role = cell(record, Some(columns.role))
            .ok_or_else(|| String::from("hiányzó szerepkör"))?
            .parse::<UserRole>()?;

        let graduation_year = match cell(record, columns.graduation_year) {
            Some(raw) => Some(
                raw.parse::<i32>()
                    .map_err(|_| format!("érvénytelen évszám: '{raw}'"))?,
            ),
            None => None,
        };

        let course_codes = cell(record, columns.course_codes)
            .map(|raw| {
                raw.split(',')
                    .map(|code| code.trim().to_string())
                    .filter(|code| !code.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(RosterRow {
            email: email.as_str().to_string(),
            first_name,
            last_name,
            role,
            student_id: cell(record, columns.student_id),
            department: cell(record, columns.department),
            course_codes,
            graduation_year,
            phone: cell(record, columns.phone),
            preferred_language: cell(record, columns.preferred_language),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HEADER: &str =
        "email,first_name,last_name,role,student_id,department,course_codes,graduation_year,phone,preferred_language";

    #[test]
    fn ten_rows_with_two_invalid_emails() {
        let mut csv = String::from(HEADER);
        csv.push('\n');
        for i in 0..8 {
            csv.push_str(&format!(
                "user{i}@example.com,Keresztnév,Vezetéknév,student,S-{i},,\"MATH-101,PHYS-102\",2028,,hu\n"
            ));
        }
        csv.push_str("not-an-email,Hibás,Sor,student,,,,,,\n");
        csv.push_str("also bad@@x,Hibás,Sor,student,,,,,,\n");

        let report = RosterCsvIngestor::ingest(csv.as_bytes(), 100_000).unwrap();
        assert_eq!(report.accepted.len(), 8);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].index, 9);
        assert_eq!(report.rejected[1].index, 10);
        assert_eq!(
            report.accepted[0].course_codes,
            vec!["MATH-101".to_string(), "PHYS-102".to_string()]
        );
    }

    #[test]
    fn duplicate_emails_keep_the_first_occurrence() {
        let csv = format!(
            "{HEADER}\n\
             dup@example.com,Első,Sor,student,,,,,,\n\
             dup@example.com,Második,Sor,student,,,,,,\n"
        );
        let report = RosterCsvIngestor::ingest(csv.as_bytes(), 100_000).unwrap();
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.accepted[0].first_name, "Első");
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].index, 2);
    }

    #[test]
    fn unknown_roles_are_rejected_per_row() {
        let csv = format!("{HEADER}\nuser@example.com,A,B,teacher,,,,,,\n");
        let report = RosterCsvIngestor::ingest(csv.as_bytes(), 100_000).unwrap();
        assert!(report.accepted.is_empty());
        assert!(report.rejected[0].reason.contains("szerepkör"));
    }

    #[test]
    fn missing_required_column_fails_the_whole_file() {
        let csv = "email,first_name,role\nuser@example.com,A,student\n";
        let error = RosterCsvIngestor::ingest(csv.as_bytes(), 100_000).unwrap_err();
        assert!(matches!(error, CsvIngestError::MissingColumn("last_name")));
    }

    #[test]
    fn the_row_cap_is_enforced() {
        let mut csv = String::from(HEADER);
        csv.push('\n');
        for i in 0..4 {
            csv.push_str(&format!("user{i}@example.com,A,B,student,,,,,,\n"));
        }
        let error = RosterCsvIngestor::ingest(csv.as_bytes(), 3).unwrap_err();
        assert!(matches!(error, CsvIngestError::TooManyRows(3)));
    }

    #[test]
    fn emails_are_normalized_before_dedup() {
        let csv = format!(
            "{HEADER}\n\
             User@Example.com,A,B,student,,,,,,\n\
             user@example.com,C,D,student,,,,,,\n"
        );
        let report = RosterCsvIngestor::ingest(csv.as_bytes(), 100_000).unwrap();
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.rejected.len(), 1);
    }
}
