use planloom::planner::ExecutionPlan;
use planloom::types::{JobId, NodeId};

/// Job id of an unlooped producer.
#[allow(dead_code)]
pub fn producer_job(path: &str) -> JobId {
    JobId::of(&NodeId::producer(path))
}

/// Job id of one looped producer instance.
#[allow(dead_code)]
pub fn producer_job_at(path: &str, indices: &[usize]) -> JobId {
    JobId::of(&NodeId::producer(path).indexed(indices.iter().copied()))
}

/// Asserts the plan schedules exactly `expected`, in layer order.
#[allow(dead_code)]
pub fn assert_planned_jobs(plan: &ExecutionPlan, expected: &[JobId]) {
    let planned: Vec<JobId> = plan.jobs().map(|job| job.job_id.clone()).collect();
    assert_eq!(
        planned, expected,
        "planned jobs differ: got {planned:?}, expected {expected:?}"
    );
}

/// Asserts one layer holds exactly `expected`, in order.
#[allow(dead_code)]
pub fn assert_layer(plan: &ExecutionPlan, layer: usize, expected: &[JobId]) {
    let actual: Vec<JobId> = plan.layers[layer]
        .iter()
        .map(|job| job.job_id.clone())
        .collect();
    assert_eq!(actual, expected, "layer {layer} membership mismatch");
}
