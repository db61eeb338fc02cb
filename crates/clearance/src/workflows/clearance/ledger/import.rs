use std::io::Read;

use serde::{Deserialize, Deserializer, Serialize};

use super::NewObligation;
use crate::workflows::clearance::domain::{Department, Obligation, ObligationKind, StudentId};

/// Raw CSV row (`student_id,department,kind,description,amount`) with its line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    pub line: u64,
    pub student_id: String,
    pub department: String,
    pub kind: String,
    pub description: String,
    pub amount: Option<String>,
}

impl ImportRow {
    pub(crate) fn into_obligation(self) -> Result<NewObligation, String> {
        if self.student_id.is_empty() {
            return Err("missing student_id".to_string());
        }
        let department: Department = self.department.parse().map_err(|e| format!("{e}"))?;
        let kind: ObligationKind = self.kind.parse().map_err(|e| format!("{e}"))?;
        let amount = match self.amount.as_deref() {
            None => 0,
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| format!("amount '{raw}' must be a non-negative whole number"))?,
        };

        Ok(NewObligation {
            student_id: StudentId(self.student_id),
            department,
            kind,
            description: self.description,
            amount,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSkip {
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ObligationImportSummary {
    pub created: Vec<Obligation>,
    pub skipped: Vec<ImportSkip>,
}

#[derive(Debug)]
pub enum ObligationImportError {
    Io(std::io::Error),
    Csv(csv::Error),
}

impl std::fmt::Display for ObligationImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObligationImportError::Io(err) => write!(f, "failed to read obligation export: {}", err),
            ObligationImportError::Csv(err) => write!(f, "invalid obligation CSV data: {}", err),
        }
    }
}

impl std::error::Error for ObligationImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ObligationImportError::Io(err) => Some(err),
            ObligationImportError::Csv(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ObligationImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ObligationImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    student_id: String,
    department: String,
    kind: String,
    #[serde(default)]
    description: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    amount: Option<String>,
}

pub(crate) fn parse_rows<R: Read>(reader: R) -> Result<Vec<ImportRow>, ObligationImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let mut rows = Vec::new();

    for record in csv_reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |position| position.line());
        let row: CsvRow = record.deserialize(Some(&headers))?;
        rows.push(ImportRow {
            line,
            student_id: row.student_id,
            department: row.department,
            kind: row.kind,
            description: row.description,
            amount: row.amount,
        });
    }

    Ok(rows)
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_rows_with_line_numbers() {
        let csv = "student_id,department,kind,description,amount\n\
U1,finance,fee,Tuition balance,5000\n\
U2,library,lost item,Lost atlas,\n";
        let rows = parse_rows(Cursor::new(csv)).expect("parse");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[1].line, 3);
        assert_eq!(rows[1].amount, None);

        let second = rows[1].clone().into_obligation().expect("valid row");
        assert_eq!(second.kind, ObligationKind::LostItem);
        assert_eq!(second.amount, 0);
    }

    #[test]
    fn invalid_values_are_reported_per_row() {
        let row = ImportRow {
            line: 4,
            student_id: "U1".to_string(),
            department: "canteen".to_string(),
            kind: "fee".to_string(),
            description: "Meal plan".to_string(),
            amount: Some("12".to_string()),
        };
        let reason = row.into_obligation().expect_err("unknown department");
        assert!(reason.contains("canteen"));

        let row = ImportRow {
            line: 5,
            student_id: "U1".to_string(),
            department: "finance".to_string(),
            kind: "fee".to_string(),
            description: "Refund".to_string(),
            amount: Some("-3".to_string()),
        };
        assert!(row.into_obligation().is_err());
    }

    #[test]
    fn missing_columns_fail_the_import() {
        let csv = "student_id,department\nU1,finance\n";
        assert!(matches!(
            parse_rows(Cursor::new(csv)),
            Err(ObligationImportError::Csv(_))
        ));
    }
}
