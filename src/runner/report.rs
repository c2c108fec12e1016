//! Batch error aggregation.
//!
//! The reporter is the only sanctioned exit point for failures: stages feed
//! it [`ErrorRecord`]s and the coordinator keeps going. `flush` produces the
//! aggregated per-plugin view handed back to whatever triggered the batch.

use std::collections::BTreeMap;

use super::{ErrorRecord, Phase};

/// Collects error records for one batch of plugin runs.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    records: Vec<ErrorRecord>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure and log it.
    pub fn report(&mut self, record: ErrorRecord) {
        tracing::warn!(
            plugin = %record.plugin_id,
            phase = %record.phase,
            "{}",
            record.message
        );
        self.records.push(record);
    }

    /// Record a batch of failures (e.g. everything one unload produced).
    pub fn report_all(&mut self, records: impl IntoIterator<Item = ErrorRecord>) {
        for record in records {
            self.report(record);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Consume the reporter and produce the aggregated view.
    pub fn flush(self) -> ErrorReport {
        ErrorReport { records: self.records }
    }
}

/// Aggregated failures of one batch, in reporting order.
#[derive(Debug, Default)]
pub struct ErrorReport {
    records: Vec<ErrorRecord>,
}

impl ErrorReport {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// All records in the order they were reported.
    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    /// Records grouped by plugin id, groups ordered by first occurrence.
    pub fn by_plugin(&self) -> Vec<(&str, Vec<&ErrorRecord>)> {
        let mut order: Vec<&str> = Vec::new();
        let mut groups: BTreeMap<&str, Vec<&ErrorRecord>> = BTreeMap::new();

        for record in &self.records {
            let id = record.plugin_id.as_str();
            if !groups.contains_key(id) {
                order.push(id);
            }
            groups.entry(id).or_default().push(record);
        }

        order
            .into_iter()
            .filter_map(|id| groups.remove(id).map(|records| (id, records)))
            .collect()
    }

    /// Records for one plugin and phase.
    pub fn for_plugin_phase(&self, plugin_id: &str, phase: Phase) -> Vec<&ErrorRecord> {
        self.records
            .iter()
            .filter(|r| r.plugin_id == plugin_id && r.phase == phase)
            .collect()
    }
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.records.is_empty() {
            return write!(f, "no errors");
        }
        for (plugin_id, records) in self.by_plugin() {
            writeln!(f, "plugin '{plugin_id}':")?;
            for record in records {
                writeln!(f, "  - {record}")?;
            }
        }
        Ok(())
    }
}
