//! Group membership lists edited ahead of server confirmation

use tracing::{debug, warn};

use crate::error::Result;
use crate::traits::DistributionGroups;
use crate::types::AppRef;

/// Whether a member has been confirmed by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Committed,
    PendingAdd,
    PendingRemove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedMember {
    pub value: String,
    pub state: MemberState,
}

/// Membership list with pending edits that are either committed or rolled
/// back once the server answers.
///
/// Values compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedMembers {
    members: Vec<TrackedMember>,
}

impl TrackedMembers {
    pub fn new() -> Self {
        Self::default()
    }

    /// List of members already known to the server
    pub fn committed<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut members = Self::new();
        for value in values {
            let value = value.into();
            if members.position(&value).is_none() {
                members.members.push(TrackedMember {
                    value,
                    state: MemberState::Committed,
                });
            }
        }
        members
    }

    fn position(&self, value: &str) -> Option<usize> {
        let value = value.trim();
        self.members
            .iter()
            .position(|m| m.value.eq_ignore_ascii_case(value))
    }

    /// Stage an addition. Returns false when the member is already visible.
    pub fn add(&mut self, value: impl Into<String>) -> bool {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return false;
        }

        match self.position(&value) {
            Some(i) if self.members[i].state == MemberState::PendingRemove => {
                self.members[i].state = MemberState::Committed;
                true
            }
            Some(_) => false,
            None => {
                self.members.push(TrackedMember {
                    value,
                    state: MemberState::PendingAdd,
                });
                true
            }
        }
    }

    /// Stage a removal. Returns false when the member is not visible.
    pub fn remove(&mut self, value: &str) -> bool {
        match self.position(value) {
            Some(i) => match self.members[i].state {
                MemberState::PendingAdd => {
                    self.members.remove(i);
                    true
                }
                MemberState::Committed => {
                    self.members[i].state = MemberState::PendingRemove;
                    true
                }
                MemberState::PendingRemove => false,
            },
            None => false,
        }
    }

    fn with_state(&self, state: MemberState) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| m.state == state)
            .map(|m| m.value.clone())
            .collect()
    }

    pub fn pending_adds(&self) -> Vec<String> {
        self.with_state(MemberState::PendingAdd)
    }

    pub fn pending_removes(&self) -> Vec<String> {
        self.with_state(MemberState::PendingRemove)
    }

    pub fn has_pending(&self) -> bool {
        self.members.iter().any(|m| m.state != MemberState::Committed)
    }

    /// The server accepted every pending edit
    pub fn commit(&mut self) {
        self.members.retain(|m| m.state != MemberState::PendingRemove);
        for member in &mut self.members {
            member.state = MemberState::Committed;
        }
    }

    /// The server rejected the pending edits
    pub fn rollback(&mut self) {
        self.members.retain(|m| m.state != MemberState::PendingAdd);
        for member in &mut self.members {
            member.state = MemberState::Committed;
        }
    }

    /// Members as currently shown, pending additions included
    pub fn visible(&self) -> impl Iterator<Item = &str> {
        self.members
            .iter()
            .filter(|m| m.state != MemberState::PendingRemove)
            .map(|m| m.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.visible().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedMember> {
        self.members.iter()
    }

    fn confirm(&mut self, state: MemberState) {
        match state {
            MemberState::PendingRemove => {
                self.members.retain(|m| m.state != MemberState::PendingRemove)
            }
            _ => {
                for member in self.members.iter_mut().filter(|m| m.state == state) {
                    member.state = MemberState::Committed;
                }
            }
        }
    }
}

/// Send the pending edits of `members` to `group_name`.
///
/// Additions are sent before removals. Each batch is confirmed locally once
/// the server accepts it; a rejected batch rolls back whatever is still
/// pending.
pub async fn sync_members(
    groups: &dyn DistributionGroups,
    app: &AppRef,
    group_name: &str,
    members: &mut TrackedMembers,
) -> Result<()> {
    let adds = members.pending_adds();
    if !adds.is_empty() {
        if let Err(e) = groups.add_members(app, group_name, &adds).await {
            warn!(group = group_name, error = %e, "Could not add group members");
            members.rollback();
            return Err(e);
        }
        members.confirm(MemberState::PendingAdd);
    }

    let removes = members.pending_removes();
    if !removes.is_empty() {
        if let Err(e) = groups.remove_members(app, group_name, &removes).await {
            warn!(group = group_name, error = %e, "Could not remove group members");
            members.rollback();
            return Err(e);
        }
        members.confirm(MemberState::PendingRemove);
    }

    debug!(
        group = group_name,
        added = adds.len(),
        removed = removes.len(),
        "Group members updated"
    );
    Ok(())
}
