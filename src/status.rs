use serde::{Deserialize, Serialize};
use tabled::{builder::Builder, settings::Style};

use crate::upsert::BatchOutcome;

/// The payload a job prints when it finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub status_code: u16,
    pub body: String,
}

impl RunStatus {
    pub fn ok(body: impl Into<String>) -> RunStatus {
        RunStatus {
            status_code: 200,
            body: body.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"statusCode":{},"body":""}}"#, self.status_code)
        })
    }
}

/// Per-source bookkeeping for a job run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<(String, BatchOutcome)>,
    /// sources (or sub-ranges) that were skipped entirely, with the reason
    pub failed_sources: Vec<(String, String)>,
}

impl RunSummary {
    pub fn new() -> RunSummary {
        RunSummary::default()
    }

    pub fn record(&mut self, source: impl Into<String>, outcome: BatchOutcome) {
        self.outcomes.push((source.into(), outcome));
    }

    pub fn record_failure(&mut self, source: impl Into<String>, reason: impl ToString) {
        self.failed_sources.push((source.into(), reason.to_string()));
    }

    pub fn total(&self) -> BatchOutcome {
        let mut total = BatchOutcome::default();
        for (_, outcome) in &self.outcomes {
            total.merge(outcome.clone());
        }
        total
    }

    /// True if every row was applied and no source was skipped.
    pub fn is_clean(&self) -> bool {
        self.failed_sources.is_empty() && self.outcomes.iter().all(|(_, o)| o.is_clean())
    }

    pub fn to_status(&self, job: &str) -> RunStatus {
        let total = self.total();
        RunStatus::ok(format!(
            "{}: {} rows applied, {} skipped, {} failed, {} sources failed{}",
            job,
            total.applied,
            total.skipped,
            total.failed.len(),
            self.failed_sources.len(),
            if self.is_clean() { "" } else { " (partial)" }
        ))
    }

    /// Make an ASCII table from the outcomes
    pub fn ascii_table(&self) -> tabled::Table {
        let mut builder = Builder::new();
        builder.push_record(vec!["Source", "Applied", "Skipped", "Failed", "Error"]);
        for (source, outcome) in &self.outcomes {
            builder.push_record(vec![
                source.clone(),
                outcome.applied.to_string(),
                outcome.skipped.to_string(),
                outcome.failed.len().to_string(),
                String::new(),
            ]);
        }
        for (source, reason) in &self.failed_sources {
            builder.push_record(vec![
                source.clone(),
                "0".to_string(),
                "0".to_string(),
                "0".to_string(),
                reason.clone(),
            ]);
        }
        let mut table = builder.build();
        table.with(Style::empty());
        table
    }
}
