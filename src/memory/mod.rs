//! Pipeline transcript
//!
//! Ordered record of what happened to one application, returned with the
//! outcome and reusable as display context.

use crate::models::{TranscriptEntry, TranscriptRole};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    entries: VecDeque<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from entries returned with an earlier outcome.
    pub fn from_entries(entries: Vec<TranscriptEntry>) -> Self {
        Self {
            entries: entries.into(),
        }
    }

    pub fn push(&mut self, role: TranscriptRole, content: impl Into<String>) {
        self.entries.push_back(TranscriptEntry {
            role,
            content: content.into(),
            recorded_at: Utc::now(),
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<TranscriptEntry> {
        self.entries.into()
    }

    /// Markdown rendering for display next to the report.
    pub fn formatted(&self) -> String {
        let mut out = String::from("## Transcript\n\n");
        for entry in &self.entries {
            let role = match entry.role {
                TranscriptRole::Applicant => "**Applicant**",
                TranscriptRole::Agent => "**Agent**",
                TranscriptRole::System => "**System**",
            };
            out.push_str(&format!(
                "{}: {} ({})\n\n",
                role,
                entry.content,
                entry.recorded_at.format("%H:%M:%S")
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_keep_order() {
        let mut transcript = Transcript::new();
        transcript.push(TranscriptRole::Applicant, "Application submitted");
        transcript.push(TranscriptRole::Agent, "Decision: accepted");
        transcript.push(TranscriptRole::System, "Report produced");

        let contents: Vec<_> = transcript.entries().map(|e| e.content.as_str()).collect();
        assert_eq!(
            contents,
            ["Application submitted", "Decision: accepted", "Report produced"]
        );

        assert_eq!(transcript.entries().last().unwrap().role, TranscriptRole::System);
    }

    #[test]
    fn test_resume_and_format() {
        let mut transcript = Transcript::new();
        transcript.push(TranscriptRole::Agent, "Decision: rejected");

        let mut resumed = Transcript::from_entries(transcript.into_entries());
        resumed.push(TranscriptRole::System, "Report regenerated");

        assert_eq!(resumed.len(), 2);
        let text = resumed.formatted();
        assert!(text.contains("**Agent**: Decision: rejected"));
        assert!(text.contains("**System**: Report regenerated"));
    }
}
