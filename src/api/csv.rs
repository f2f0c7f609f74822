//! CSV intake: maps uploaded rows to provider records.
//!
//! Columns follow a fixed mapping: `provider_id`, `given_name`,
//! `family_name`, `identifier`, `phone_primary`, `email`, `address_street`,
//! `license_number`, `license_state`, `document_reference`. Unknown columns
//! are ignored. A row without a `provider_id` gets a synthetic UUID; rows
//! with no populated field at all are skipped.

use csv::{ReaderBuilder, StringRecord, Trim};
use thiserror::Error;
use uuid::Uuid;

use crate::model::ProviderRecord;

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("CSV parse error: {0}")]
    Parse(#[from] csv::Error),

    #[error("CSV contains no usable provider rows")]
    NoRows,
}

pub fn parse_providers(bytes: &[u8]) -> Result<Vec<ProviderRecord>, CsvError> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();

    let mut providers = Vec::new();
    for row in reader.records() {
        let row = row?;
        let column = |name: &str| field(&headers, &row, name);

        let record = ProviderRecord {
            provider_id: column("provider_id").unwrap_or_else(|| Uuid::new_v4().to_string()),
            given_name: column("given_name"),
            family_name: column("family_name"),
            identifier: column("identifier"),
            phone_primary: column("phone_primary"),
            email: column("email"),
            address_street: column("address_street"),
            license_number: column("license_number"),
            license_state: column("license_state"),
            document_reference: column("document_reference"),
            ..ProviderRecord::default()
        };

        if record.is_empty() {
            continue;
        }
        providers.push(record);
    }

    if providers.is_empty() {
        return Err(CsvError::NoRows);
    }
    Ok(providers)
}

fn field(headers: &StringRecord, row: &StringRecord, name: &str) -> Option<String> {
    let index = headers.iter().position(|h| h == name)?;
    row.get(index)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
}
