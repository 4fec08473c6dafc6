//! Destination selection

use std::collections::HashSet;

use tracing::warn;

use crate::types::{Destination, DestinationKey};

/// Result of adding destinations to a selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddDestinationsOutcome {
    pub added: Vec<Destination>,
    /// Names every destination skipped because it was already selected
    pub duplicate_message: Option<String>,
    /// Testers skipped because the tester limit was reached
    pub rejected_testers: Vec<String>,
}

/// Destinations selected in the wizard, in insertion order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSelection {
    destinations: Vec<Destination>,
    max_testers: usize,
    estimated_user_soft_limit: u32,
}

impl DestinationSelection {
    pub fn new(max_testers: usize, estimated_user_soft_limit: u32) -> Self {
        Self {
            destinations: Vec::new(),
            max_testers,
            estimated_user_soft_limit,
        }
    }

    /// Add destinations, skipping duplicates and testers over the limit
    pub fn add_destinations(
        &mut self,
        destinations: impl IntoIterator<Item = Destination>,
    ) -> AddDestinationsOutcome {
        let mut outcome = AddDestinationsOutcome::default();
        let mut keys: HashSet<DestinationKey> =
            self.destinations.iter().map(Destination::key).collect();
        let mut duplicates = Vec::new();
        let mut testers = self.tester_count();

        for destination in destinations {
            if !keys.insert(destination.key()) {
                duplicates.push(destination.to_string());
                continue;
            }

            if let Destination::Tester { email } = &destination {
                if testers >= self.max_testers {
                    keys.remove(&destination.key());
                    outcome.rejected_testers.push(email.clone());
                    continue;
                }
                testers += 1;
            }

            self.destinations.push(destination.clone());
            outcome.added.push(destination);
        }

        if !outcome.rejected_testers.is_empty() {
            warn!(
                limit = self.max_testers,
                rejected = outcome.rejected_testers.len(),
                "Tester limit reached"
            );
        }

        outcome.duplicate_message = match duplicates.as_slice() {
            [] => None,
            [one] => Some(format!("{} has already been added", one)),
            many => Some(format!("{} have already been added", many.join(", "))),
        };
        outcome
    }

    pub fn remove_destination(&mut self, key: &DestinationKey) -> Option<Destination> {
        let index = self.destinations.iter().position(|d| &d.key() == key)?;
        Some(self.destinations.remove(index))
    }

    /// Keep only the given destinations, preserving order
    pub fn retain(&mut self, keys: &HashSet<DestinationKey>) {
        self.destinations.retain(|d| keys.contains(&d.key()));
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    pub fn groups(&self) -> impl Iterator<Item = &Destination> {
        self.destinations.iter().filter(|d| d.is_group())
    }

    pub fn tester_count(&self) -> usize {
        self.destinations.iter().filter(|d| d.is_tester()).count()
    }

    /// Group member counts plus individual testers
    pub fn estimated_users(&self) -> u32 {
        self.destinations
            .iter()
            .map(|d| match d {
                Destination::Group { member_count, .. } => member_count.unwrap_or(0),
                Destination::Tester { .. } => 1,
                Destination::Store { .. } => 0,
            })
            .fold(0, u32::saturating_add)
    }

    /// Soft check; distribution is never blocked by it
    pub fn exceeds_estimated_user_limit(&self) -> bool {
        self.estimated_users() > self.estimated_user_soft_limit
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }
}
