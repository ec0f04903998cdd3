//! Shared helpers for rag-eval integration tests.

#![allow(dead_code)]

use rag_eval::{EvaluationExample, RunReport, ScoreRecord, Status};
use rag_eval_core::RetryPolicy;
use std::path::{Path, PathBuf};

/// Retries fast enough for tests.
pub fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new()
        .with_max_retries(max_retries)
        .with_base_delay_ms(1)
}

/// `count` questions with reference answers and no generated answer.
pub fn questions(count: usize) -> Vec<EvaluationExample> {
    (0..count)
        .map(|i| {
            EvaluationExample::new(i, format!("question {}", i))
                .with_reference(format!("Answer: question {}", i))
        })
        .collect()
}

/// Records for one example, in metric order.
pub fn records_for(report: &RunReport, index: usize) -> Vec<&ScoreRecord> {
    report
        .records
        .iter()
        .filter(|r| r.example_index == index)
        .collect()
}

/// Count records with `status`.
pub fn count_status(report: &RunReport, status: Status) -> usize {
    report.records.iter().filter(|r| r.status == status).count()
}

/// Write an executable shell script into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
