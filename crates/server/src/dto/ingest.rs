use headway::{prelude::*, service};
use serde::{Deserialize, Serialize};

/// Body of `POST /fixes`: a single fix or an array of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FixBatch {
    Many(Vec<Fix>),
    One(Fix),
}

impl FixBatch {
    pub fn into_vec(self) -> Vec<Fix> {
        match self {
            Self::Many(fixes) => fixes,
            Self::One(fix) => vec![fix],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestDto {
    pub records: Vec<TrackingRecord>,
    pub rejected: Vec<String>,
}

impl From<Vec<Result<FixOutcome, service::Error>>> for IngestDto {
    fn from(results: Vec<Result<FixOutcome, service::Error>>) -> Self {
        let mut dto = Self::default();
        for result in results {
            match result {
                Ok(outcome) => dto.records.push(outcome.record),
                Err(err) => dto.rejected.push(err.to_string()),
            }
        }
        dto
    }
}
