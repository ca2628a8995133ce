use std::fmt;

use super::checkpoints::{Checkpoint, Checkpoints};

/// Where a cluster stands in the certificate lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Create,
    RenewPki,
    PropagatePki,
    RenewCertificates,
    PropagateCertificates,
    CleanAuthority,
    Steady,
}

impl Phase {
    /// Node certificates may be added or removed. Before PropagatePKI is true
    /// the current authority may still be changing.
    pub fn allows_membership_changes(&self) -> bool {
        matches!(
            self,
            Phase::PropagateCertificates | Phase::CleanAuthority | Phase::Steady
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Create => "Create",
            Phase::RenewPki => "RenewPKI",
            Phase::PropagatePki => "PropagatePKI",
            Phase::RenewCertificates => "RenewCertificates",
            Phase::PropagateCertificates => "PropagateCertificates",
            Phase::CleanAuthority => "CleanAuthority",
            Phase::Steady => "Steady",
        };
        f.write_str(name)
    }
}

/// What the store holds, reduced to the facts phase inference needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inventory {
    pub transport_leaf_set_present: bool,
    pub renewal_due: bool,
    /// Each bundle holds exactly its current authority and every leaf verifies
    /// against it.
    pub trust_consistent: bool,
}

pub fn infer_phase(checkpoints: &Checkpoints, inventory: &Inventory) -> Phase {
    if !inventory.transport_leaf_set_present {
        return Phase::Create;
    }
    match checkpoints.first_pending() {
        Some(Checkpoint::GeneratePki) => Phase::RenewPki,
        Some(Checkpoint::PropagatePki) => Phase::PropagatePki,
        Some(Checkpoint::GenerateCertificates) => Phase::RenewCertificates,
        Some(Checkpoint::PropagateCertificates) => Phase::PropagateCertificates,
        Some(Checkpoint::Ready) => Phase::CleanAuthority,
        None if inventory.renewal_due || !inventory.trust_consistent => Phase::RenewPki,
        None => Phase::Steady,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const HEALTHY: Inventory = Inventory {
        transport_leaf_set_present: true,
        renewal_due: false,
        trust_consistent: true,
    };

    fn checkpoints_until(pending: Option<Checkpoint>) -> Checkpoints {
        let now = Utc::now();
        let mut checkpoints = Checkpoints::from_conditions(&[], now);
        for checkpoint in Checkpoint::ALL {
            if Some(checkpoint) == pending {
                checkpoints.set(checkpoint, false, "Pending", "", now);
                break;
            }
            checkpoints.set(checkpoint, true, "Done", "", now);
        }
        checkpoints
    }

    #[test]
    fn missing_transport_set_means_create() {
        let inventory = Inventory {
            transport_leaf_set_present: false,
            ..HEALTHY
        };
        assert_eq!(infer_phase(&checkpoints_until(None), &inventory), Phase::Create);
        assert_eq!(
            infer_phase(&checkpoints_until(Some(Checkpoint::PropagatePki)), &inventory),
            Phase::Create
        );
    }

    #[test]
    fn first_false_checkpoint_selects_phase() {
        let cases = [
            (Checkpoint::GeneratePki, Phase::RenewPki),
            (Checkpoint::PropagatePki, Phase::PropagatePki),
            (Checkpoint::GenerateCertificates, Phase::RenewCertificates),
            (Checkpoint::PropagateCertificates, Phase::PropagateCertificates),
            (Checkpoint::Ready, Phase::CleanAuthority),
        ];
        for (pending, phase) in cases {
            assert_eq!(infer_phase(&checkpoints_until(Some(pending)), &HEALTHY), phase);
        }
    }

    #[test]
    fn unknown_checkpoints_resume_rotation() {
        let checkpoints = Checkpoints::from_conditions(&[], Utc::now());
        assert_eq!(infer_phase(&checkpoints, &HEALTHY), Phase::RenewPki);
    }

    #[test]
    fn steady_until_renewal_or_inconsistency() {
        let done = checkpoints_until(None);
        assert_eq!(infer_phase(&done, &HEALTHY), Phase::Steady);

        let due = Inventory {
            renewal_due: true,
            ..HEALTHY
        };
        assert_eq!(infer_phase(&done, &due), Phase::RenewPki);

        let inconsistent = Inventory {
            trust_consistent: false,
            ..HEALTHY
        };
        assert_eq!(infer_phase(&done, &inconsistent), Phase::RenewPki);
    }

    #[test]
    fn membership_waits_for_authority_propagation() {
        assert!(!Phase::Create.allows_membership_changes());
        assert!(!Phase::RenewPki.allows_membership_changes());
        assert!(!Phase::PropagatePki.allows_membership_changes());
        assert!(!Phase::RenewCertificates.allows_membership_changes());
        assert!(Phase::PropagateCertificates.allows_membership_changes());
        assert!(Phase::Steady.allows_membership_changes());
    }
}
