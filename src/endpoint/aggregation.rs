//! Aggregate status resolution.
//!
//! Folds the statuses of every owned endpoint into one subsystem-wide
//! aggregate. The resolution is table-driven: `RESOLUTION_ORDER` lists the
//! aggregate-relevant statuses from most to least severe, and the fold keeps
//! the most severe status seen. That makes the result independent of the
//! order endpoints are visited in.
//!
//! Precedence: any `Failed` endpoint fails the aggregate; otherwise any
//! `Suspect` makes it suspect; otherwise any `Started` keeps it started;
//! only a set that is entirely `Operational` resolves operational. Statuses
//! outside the lifecycle set (probe-derived ones) are not tolerated in an
//! owned endpoint and resolve as `Failed` — a closed-world default.

use super::types::EndpointStatus;

/// Aggregate-relevant statuses, most severe first.
pub const RESOLUTION_ORDER: [EndpointStatus; 4] = [
    EndpointStatus::Failed,
    EndpointStatus::Suspect,
    EndpointStatus::Started,
    EndpointStatus::Operational,
];

/// Severity rank: position in [`RESOLUTION_ORDER`]. Lower wins the fold.
fn severity_rank(status: EndpointStatus) -> usize {
    RESOLUTION_ORDER
        .iter()
        .position(|candidate| *candidate == status)
        // Anything outside the lifecycle set is as bad as Failed.
        .unwrap_or(0)
}

/// Maps a raw endpoint status onto the aggregate-relevant set.
fn normalize(status: EndpointStatus) -> EndpointStatus {
    match status {
        EndpointStatus::Started
        | EndpointStatus::Operational
        | EndpointStatus::Suspect
        | EndpointStatus::Failed => status,
        EndpointStatus::Detected | EndpointStatus::Reachable | EndpointStatus::Unreachable => {
            EndpointStatus::Failed
        }
    }
}

/// Pairwise resolution: the more severe of the two normalized statuses.
pub fn merge_status(current: EndpointStatus, candidate: EndpointStatus) -> EndpointStatus {
    let current = normalize(current);
    let candidate = normalize(candidate);
    if severity_rank(candidate) < severity_rank(current) {
        candidate
    } else {
        current
    }
}

/// Folds any number of endpoint statuses into the aggregate.
///
/// An empty set resolves to `Started`: a subsystem with nothing configured
/// yet is still warming up, not operational.
pub fn aggregate_status<I>(statuses: I) -> EndpointStatus
where
    I: IntoIterator<Item = EndpointStatus>,
{
    let mut aggregate: Option<EndpointStatus> = None;
    for status in statuses {
        aggregate = Some(match aggregate {
            Some(current) => merge_status(current, status),
            None => normalize(status),
        });
    }
    aggregate.unwrap_or(EndpointStatus::Started)
}
