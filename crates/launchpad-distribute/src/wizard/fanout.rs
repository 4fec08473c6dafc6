//! Parallel distribution to every destination of a release

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::error::DistributeError;
use crate::traits::DistributionService;
use crate::types::{AppRef, Destination, DistributeOptions, ReleaseId};

/// Aggregated result of a fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutOutcome {
    pub succeeded: Vec<Destination>,
    /// Failed destinations with the reason each failed
    pub failed: Vec<(Destination, String)>,
}

impl FanOutOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Error naming only the failed destinations
    pub fn error(&self) -> Option<DistributeError> {
        if self.failed.is_empty() {
            return None;
        }
        Some(DistributeError::PartialFailure {
            failed: self.failed.iter().map(|(d, _)| d.to_string()).collect(),
        })
    }
}

/// Counts outstanding requests; the outcome exists only once every
/// request has reported
#[derive(Debug, Clone)]
pub struct FanOutTracker {
    pending: usize,
    succeeded: Vec<Destination>,
    failed: Vec<(Destination, String)>,
}

impl FanOutTracker {
    pub fn new(total: usize) -> Self {
        Self {
            pending: total,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Record one request, returning the outcome when it was the last one
    pub fn record(
        &mut self,
        destination: Destination,
        result: Result<(), String>,
    ) -> Option<FanOutOutcome> {
        if self.pending == 0 {
            return None;
        }
        self.pending -= 1;

        match result {
            Ok(()) => self.succeeded.push(destination),
            Err(reason) => self.failed.push((destination, reason)),
        }

        if self.pending == 0 {
            Some(FanOutOutcome {
                succeeded: std::mem::take(&mut self.succeeded),
                failed: std::mem::take(&mut self.failed),
            })
        } else {
            None
        }
    }
}

/// Distribute a release to every destination concurrently
#[instrument(skip(service, destinations, options), fields(app = %app, count = destinations.len()))]
pub async fn distribute_all(
    service: Arc<dyn DistributionService>,
    app: &AppRef,
    release_id: ReleaseId,
    destinations: &[Destination],
    options: DistributeOptions,
) -> FanOutOutcome {
    let mut tracker = FanOutTracker::new(destinations.len());
    if destinations.is_empty() {
        return FanOutOutcome {
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
    }

    let mut handles = Vec::new();
    for destination in destinations {
        let service = service.clone();
        let app = app.clone();
        let target = destination.clone();

        let handle = tokio::spawn(async move {
            service
                .distribute_release(&app, release_id, &target, &options)
                .await
        });
        handles.push((destination.clone(), handle));
    }

    let mut outcome = None;
    for (destination, handle) in handles {
        let result = match handle.await {
            Ok(Ok(())) => {
                debug!(destination = %destination, "Distributed");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(destination = %destination, error = %e, "Distribution failed");
                Err(e.to_string())
            }
            Err(e) => Err(format!("Task panicked: {}", e)),
        };
        outcome = tracker.record(destination, result).or(outcome);
    }

    outcome.unwrap_or_else(|| FanOutOutcome {
        succeeded: Vec::new(),
        failed: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    #[test]
    fn test_tracker_reports_only_when_done() {
        let mut tracker = FanOutTracker::new(3);
        assert!(tracker
            .record(Destination::group("g-1", "Beta"), Ok(()))
            .is_none());
        assert!(tracker
            .record(Destination::tester("ann@example.com"), Err("boom".to_string()))
            .is_none());
        assert_eq!(tracker.pending(), 1);

        let outcome = tracker
            .record(Destination::store("s-1", "Store"), Ok(()))
            .unwrap();
        assert_eq!(outcome.succeeded.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert!(!outcome.is_success());

        // Late reports after completion are ignored
        assert!(tracker
            .record(Destination::group("g-2", "Late"), Ok(()))
            .is_none());
    }

    #[tokio::test]
    async fn test_partial_failure_names_only_failed() {
        let harness = Harness::new();
        harness.api.fail_destination("qa@example.com");

        let destinations = vec![
            Destination::group("g-1", "Beta"),
            Destination::tester("qa@example.com"),
            Destination::store("s-1", "Store"),
        ];
        let outcome = distribute_all(
            harness.ctx.distribution.clone(),
            &harness.ctx.app,
            SAMPLE_RELEASE_ID,
            &destinations,
            DistributeOptions {
                mandatory_update: false,
                notify_testers: true,
            },
        )
        .await;

        assert_eq!(outcome.succeeded.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(
            outcome.error().unwrap().to_string(),
            "Distribution failed for: qa@example.com"
        );
        assert_eq!(harness.api.distributed().len(), 3);
    }
}
