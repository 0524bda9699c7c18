//! End-of-run summary.

use serde::Serialize;

use crate::types::{Candidate, CandidateStatus, Stage};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRow {
    pub url: String,
    pub stage: Option<Stage>,
    pub status: String,
    pub reason: Option<String>,
    pub manual_intervention: bool,
}

impl RunRow {
    pub fn from_candidate(candidate: &Candidate) -> Self {
        let (stage, reason, manual_intervention) = match &candidate.status {
            CandidateStatus::Failed {
                stage,
                reason,
                manual_intervention,
            } => (Some(*stage), Some(reason.clone()), *manual_intervention),
            CandidateStatus::Duplicate { existing_id } => (
                Some(Stage::Resolve),
                Some(format!("already catalogued as {existing_id}")),
                false,
            ),
            CandidateStatus::HandedOff => (Some(Stage::Handoff), None, false),
            other => (other.next_stage(), None, false),
        };
        Self {
            url: candidate.source_url.clone(),
            stage,
            status: candidate.status.to_string(),
            reason,
            manual_intervention,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub rows: Vec<RunRow>,
    /// Set when a fatal error stopped the run before every URL was seen.
    pub aborted: Option<String>,
}

impl RunSummary {
    pub fn record(&mut self, candidate: &Candidate) {
        self.rows.push(RunRow::from_candidate(candidate));
    }

    pub fn processed(&self) -> usize {
        self.rows.len()
    }

    pub fn handed_off(&self) -> usize {
        self.count_status("handed_off")
    }

    pub fn duplicates(&self) -> usize {
        self.count_status("duplicate")
    }

    pub fn failed(&self) -> usize {
        self.count_status("failed")
    }

    pub fn manual_intervention(&self) -> usize {
        self.rows.iter().filter(|r| r.manual_intervention).count()
    }

    fn count_status(&self, status: &str) -> usize {
        self.rows.iter().filter(|r| r.status == status).count()
    }

    /// Plain-text report for the console and the report log.
    pub fn render(&self) -> String {
        let mut out = String::from("Processing summary\n");
        out.push_str(&format!(
            "  processed: {}  handed off: {}  duplicates: {}  failed: {}  manual: {}\n",
            self.processed(),
            self.handed_off(),
            self.duplicates(),
            self.failed(),
            self.manual_intervention()
        ));
        for row in &self.rows {
            let stage = row.stage.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
            out.push_str(&format!("  [{}] {} ({stage})", row.status, row.url));
            if let Some(reason) = &row.reason {
                out.push_str(&format!(": {reason}"));
            }
            if row.manual_intervention {
                out.push_str(" [manual intervention required]");
            }
            out.push('\n');
        }
        if let Some(reason) = &self.aborted {
            out.push_str(&format!("  aborted: {reason}\n"));
        }
        out
    }
}
