// src/app/checkpoints.rs
use chrono::{DateTime, Utc};
use std::fmt;

use crate::crd::{Condition, ConditionStatus};

/// The persisted rotation checkpoints, in the order a rotation completes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Checkpoint {
    GeneratePki,
    PropagatePki,
    GenerateCertificates,
    PropagateCertificates,
    Ready,
}

impl Checkpoint {
    pub const ALL: [Checkpoint; 5] = [
        Checkpoint::GeneratePki,
        Checkpoint::PropagatePki,
        Checkpoint::GenerateCertificates,
        Checkpoint::PropagateCertificates,
        Checkpoint::Ready,
    ];

    /// Condition type on the cluster status.
    pub fn condition_type(&self) -> &'static str {
        match self {
            Checkpoint::GeneratePki => "GeneratePKI",
            Checkpoint::PropagatePki => "PropagatePKI",
            Checkpoint::GenerateCertificates => "GenerateCertificates",
            Checkpoint::PropagateCertificates => "PropagateCertificates",
            Checkpoint::Ready => "Ready",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }

    /// The checkpoint completed just before this one.
    pub fn previous(&self) -> Option<Checkpoint> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.condition_type())
    }
}

pub const REASON_INITIALIZING: &str = "Initializing";

/// Working copy of the five checkpoint conditions for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoints {
    conditions: [Condition; 5],
}

impl Checkpoints {
    /// Picks the checkpoint conditions out of a status. Missing ones start as
    /// `Unknown`.
    pub fn from_conditions(conditions: &[Condition], now: DateTime<Utc>) -> Self {
        let pick = |checkpoint: Checkpoint| {
            conditions
                .iter()
                .find(|c| c.type_ == checkpoint.condition_type())
                .cloned()
                .unwrap_or_else(|| {
                    Condition::new(
                        checkpoint.condition_type(),
                        ConditionStatus::Unknown,
                        REASON_INITIALIZING,
                        "",
                        now,
                    )
                })
        };
        Self {
            conditions: Checkpoint::ALL.map(pick),
        }
    }

    pub fn get(&self, checkpoint: Checkpoint) -> &Condition {
        &self.conditions[checkpoint.index()]
    }

    pub fn is_true(&self, checkpoint: Checkpoint) -> bool {
        self.get(checkpoint).is_true()
    }

    #[cfg(test)]
    pub fn all_true(&self) -> bool {
        self.conditions.iter().all(Condition::is_true)
    }

    pub fn any_true(&self) -> bool {
        self.conditions.iter().any(Condition::is_true)
    }

    /// First checkpoint that is not `True`.
    pub fn first_pending(&self) -> Option<Checkpoint> {
        Checkpoint::ALL.into_iter().find(|c| !self.is_true(*c))
    }

    pub fn transitioned_at(&self, checkpoint: Checkpoint) -> DateTime<Utc> {
        self.get(checkpoint).last_transition_time
    }

    /// Updates one condition. The transition time only moves when the status
    /// changes.
    pub fn set(
        &mut self,
        checkpoint: Checkpoint,
        status: bool,
        reason: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let status = ConditionStatus::from(status);
        let condition = &mut self.conditions[checkpoint.index()];
        if condition.status != status {
            condition.status = status;
            condition.last_transition_time = now;
        }
        condition.reason = reason.to_string();
        condition.message = message.into();
    }

    pub fn reset_all(&mut self, reason: &str, now: DateTime<Utc>) {
        for checkpoint in Checkpoint::ALL {
            self.set(checkpoint, false, reason, "", now);
        }
    }

    /// Writes the checkpoints into a status condition list, keeping conditions
    /// of other types in place.
    pub fn merge_into(&self, conditions: &mut Vec<Condition>) {
        for condition in &self.conditions {
            match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
                Some(existing) => *existing = condition.clone(),
                None => conditions.push(condition.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn missing_conditions_start_unknown() {
        let now = Utc::now();
        let checkpoints = Checkpoints::from_conditions(&[], now);

        assert_eq!(checkpoints.first_pending(), Some(Checkpoint::GeneratePki));
        assert!(!checkpoints.any_true());
        let ready = checkpoints.get(Checkpoint::Ready);
        assert_eq!(ready.status, ConditionStatus::Unknown);
        assert_eq!(ready.reason, REASON_INITIALIZING);
    }

    #[test]
    fn transition_time_moves_only_on_status_change() {
        let start = Utc::now();
        let later = start + Duration::minutes(5);
        let mut checkpoints = Checkpoints::from_conditions(&[], start);

        checkpoints.set(Checkpoint::GeneratePki, true, "Generated", "", start);
        checkpoints.set(Checkpoint::GeneratePki, true, "Generated", "again", later);
        assert_eq!(checkpoints.transitioned_at(Checkpoint::GeneratePki), start);
        assert_eq!(checkpoints.get(Checkpoint::GeneratePki).message, "again");

        checkpoints.set(Checkpoint::GeneratePki, false, "Reset", "", later);
        assert_eq!(checkpoints.transitioned_at(Checkpoint::GeneratePki), later);
    }

    #[test]
    fn first_pending_follows_rotation_order() {
        let now = Utc::now();
        let mut checkpoints = Checkpoints::from_conditions(&[], now);
        for checkpoint in Checkpoint::ALL {
            checkpoints.set(checkpoint, true, "Done", "", now);
        }
        assert!(checkpoints.all_true());
        assert_eq!(checkpoints.first_pending(), None);

        checkpoints.set(Checkpoint::PropagateCertificates, false, "AwaitingRollout", "", now);
        assert_eq!(
            checkpoints.first_pending(),
            Some(Checkpoint::PropagateCertificates)
        );
        assert_eq!(
            Checkpoint::PropagateCertificates.previous(),
            Some(Checkpoint::GenerateCertificates)
        );
        assert_eq!(Checkpoint::GeneratePki.previous(), None);
    }

    #[test]
    fn merge_keeps_foreign_conditions() {
        let now = Utc::now();
        let mut conditions = vec![
            Condition::new("Available", ConditionStatus::True, "Up", "", now),
            Condition::new("Ready", ConditionStatus::False, "Failed", "boom", now),
        ];
        let mut checkpoints = Checkpoints::from_conditions(&conditions, now);
        checkpoints.set(Checkpoint::Ready, true, "Bootstrapped", "", now);
        checkpoints.merge_into(&mut conditions);

        assert_eq!(conditions.len(), 6);
        assert_eq!(conditions[0].type_, "Available");
        assert!(conditions[1].is_true());
        assert_eq!(conditions[1].reason, "Bootstrapped");
    }
}
