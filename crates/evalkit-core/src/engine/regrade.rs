use crate::grader_api::Grader;
use crate::storage::store::Store;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegradeSummary {
    pub outputs: usize,
    /// Existing score rows overwritten in place.
    pub updated: usize,
    /// Outputs that had no score yet.
    pub inserted: usize,
    pub changed_labels: usize,
}

/// Re-score every output of `run_id` from the stored text, expected value and
/// case metadata.
pub fn regrade_run(store: &Store, run_id: &str, grader: &dyn Grader) -> anyhow::Result<RegradeSummary> {
    if store.get_run(run_id)?.is_none() {
        anyhow::bail!("unknown run: {}", run_id);
    }

    let mut summary = RegradeSummary::default();
    for row in store.outputs_for_run(run_id)? {
        let grade = grader.grade(&row.raw_text, row.expected.as_deref(), &row.metadata);
        if grade.label != row.label {
            summary.changed_labels += 1;
        }

        if store.regrade_score(&row.output_id, &grade)? {
            summary.updated += 1;
        } else {
            store.append_score(&row.output_id, &grade)?;
            summary.inserted += 1;
        }
        summary.outputs += 1;
    }

    tracing::info!(
        event = "regrade.finished",
        run_id = %run_id,
        grader = grader.name(),
        outputs = summary.outputs,
        updated = summary.updated,
        inserted = summary.inserted,
        changed_labels = summary.changed_labels
    );
    Ok(summary)
}
