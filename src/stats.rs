use crate::project::{Project, ProjectStatus};
use crate::request::{Request, RequestStatus};

/// Requests tallied by status.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Tally {
    pub pending: usize,
    pub confirmed: usize,
    pub rejected: usize,
}

pub fn tally(requests: &[Request]) -> Tally {
    let mut counts = Tally::default();
    for request in requests {
        match request.status {
            RequestStatus::Pending => counts.pending += 1,
            RequestStatus::Confirmed => counts.confirmed += 1,
            RequestStatus::Rejected => counts.rejected += 1,
        }
    }
    counts
}

/// Number of pending requests at each priority rank (index 0 is rank 1).
pub fn priority_histogram(requests: &[Request]) -> Vec<usize> {
    let mut ranks = Vec::new();
    for request in requests.iter().filter(|r| r.is_pending()) {
        let rank = request.priority as usize - 1;
        if ranks.len() <= rank {
            ranks.resize(rank + 1, 0);
        }
        ranks[rank] += 1;
    }
    ranks
}

/// Filled and total seats over opened projects.
pub fn occupancy(projects: &[Project]) -> (usize, usize) {
    projects
        .iter()
        .filter(|p| p.status == ProjectStatus::Opened)
        .fold((0, 0), |(filled, seats), p| {
            (filled + p.team.len(), seats + p.max_members as usize)
        })
}
