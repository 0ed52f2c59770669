use crate::process::ProcessRecord;

/// Load score of a record: cpu/100 plus the share of its memory budget in use.
///
/// A non-positive `max_memory` contributes nothing for memory.
pub fn load_score(record: &ProcessRecord) -> f64 {
    let memory_share = if record.max_memory > 0.0 {
        record.memory / record.max_memory
    } else {
        0.0
    };

    record.cpu / 100.0 + memory_share
}

/// Order records from least to most loaded. Ties keep their input order.
pub fn rank_by_load(records: &[ProcessRecord]) -> Vec<ProcessRecord> {
    let mut ranked = records.to_vec();
    ranked.sort_by(|a, b| load_score(a).total_cmp(&load_score(b)));
    ranked
}
