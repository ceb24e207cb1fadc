//! Per-user credential and OVK state, including the migration machine.
//!
//! Every registered credential is bound to an OVK: normally the trusted
//! one, during a migration possibly a candidate. An update message rebinds
//! the sender's credential to its candidate; the first candidate opens a
//! migration window. The window closes in one of two ways:
//!
//! - **quorum**: a strict majority of credentials bound to one candidate
//!   commits it immediately;
//! - **timeout**: after [`MIGRATION_WINDOW_MS`], the next observer call
//!   adopts the most-bound candidate OVK, breaking ties toward the
//!   earliest-seen one; the incumbent stays only when it strictly
//!   out-counts every candidate.
//!
//! Either way, credentials bound to a losing OVK are pruned.

use keymesh_common::jwk::EcPublicJwk;
use keymesh_common::views::{Ovkm, OvkmWithNext};
use tracing::debug;

/// How long update messages are aggregated before timeout resolution.
pub const MIGRATION_WINDOW_MS: u64 = 3 * 60 * 1000;

#[derive(Debug, Clone)]
struct BoundCredential {
    jwk: EcPublicJwk,
    ovk: EcPublicJwk,
}

#[derive(Debug, Clone)]
struct Candidate {
    ovkm: Ovkm,
    first_seen_ms: u64,
}

#[derive(Debug, Clone)]
struct Migration {
    started_ms: u64,
    candidates: Vec<Candidate>,
}

pub struct CredManager {
    creds: Vec<BoundCredential>,
    ovkm: Ovkm,
    next: Option<Migration>,
}

impl CredManager {
    /// State for a user's first registration: one credential, bound to the
    /// OVK material the registering device supplied.
    pub fn init(cred: EcPublicJwk, ovkm: Ovkm) -> Self {
        Self {
            creds: vec![BoundCredential {
                jwk: cred,
                ovk: ovkm.ovk.clone(),
            }],
            ovkm,
            next: None,
        }
    }

    pub fn ovkm(&self) -> &Ovkm {
        &self.ovkm
    }

    pub fn cred_count(&self) -> usize {
        self.creds.len()
    }

    pub fn contains_credential(&self, jwk: &EcPublicJwk) -> bool {
        self.creds.iter().any(|c| c.jwk == *jwk)
    }

    pub fn credential_jwks(&self) -> Vec<EcPublicJwk> {
        self.creds.iter().map(|c| c.jwk.clone()).collect()
    }

    /// Add a further credential bound to the trusted OVK. Refused while a
    /// migration is open.
    pub fn add(&mut self, cred: EcPublicJwk) -> bool {
        if self.next.is_some() {
            return false;
        }
        self.creds.push(BoundCredential {
            jwk: cred,
            ovk: self.ovkm.ovk.clone(),
        });
        true
    }

    /// Record an update message: rebind `cred` to the proposed OVK, track
    /// the candidate, and commit immediately on strict majority. Returns
    /// `false` when `cred` is not registered.
    pub fn add_updating(&mut self, cred: &EcPublicJwk, proposed: &Ovkm, now_ms: u64) -> bool {
        let Some(entry) = self.creds.iter_mut().find(|c| c.jwk == *cred) else {
            return false;
        };
        entry.ovk = proposed.ovk.clone();

        let migration = self.next.get_or_insert_with(|| Migration {
            started_ms: now_ms,
            candidates: Vec::new(),
        });
        if !migration
            .candidates
            .iter()
            .any(|c| c.ovkm.ovk == proposed.ovk)
        {
            migration.candidates.push(Candidate {
                ovkm: proposed.clone(),
                first_seen_ms: now_ms,
            });
        }

        let supporters = self.creds.iter().filter(|c| c.ovk == proposed.ovk).count();
        if supporters * 2 > self.creds.len() {
            debug!(
                supporters,
                total = self.creds.len(),
                "migration quorum reached"
            );
            self.commit(proposed.clone());
        }
        true
    }

    /// Whether a migration window is open right now. A window past
    /// [`MIGRATION_WINDOW_MS`] is resolved on the spot (the most-bound
    /// candidate wins, ties go to the earliest-seen one, the incumbent
    /// survives only a strict lead) and `false` is returned.
    pub fn is_updating(&mut self, now_ms: u64) -> bool {
        let Some(migration) = &self.next else {
            return false;
        };
        if now_ms.saturating_sub(migration.started_ms) <= MIGRATION_WINDOW_MS {
            return true;
        }

        // Pick the candidate with the most bound credentials, ties going
        // to the earliest-seen one. The incumbent OVK survives only when
        // it strictly out-counts every candidate.
        let mut best: Option<(&Candidate, usize)> = None;
        for candidate in &migration.candidates {
            let count = self
                .creds
                .iter()
                .filter(|c| c.ovk == candidate.ovkm.ovk)
                .count();
            let better = match best {
                None => true,
                Some((leader, leader_count)) => {
                    count > leader_count
                        || (count == leader_count
                            && candidate.first_seen_ms < leader.first_seen_ms)
                }
            };
            if better {
                best = Some((candidate, count));
            }
        }

        let incumbent_count = self
            .creds
            .iter()
            .filter(|c| c.ovk == self.ovkm.ovk)
            .count();
        let chosen = match best {
            Some((leader, count)) if incumbent_count <= count => leader.ovkm.clone(),
            _ => self.ovkm.clone(),
        };
        debug!("migration window expired; resolving to most-bound OVK");
        self.commit(chosen);
        false
    }

    fn commit(&mut self, chosen: Ovkm) {
        self.creds.retain(|c| c.ovk == chosen.ovk);
        self.ovkm = chosen;
        self.next = None;
    }

    /// The user's view for `startAuthn`: credential list and OVK material,
    /// with the candidate list attached (timing fields stripped) while a
    /// migration is open.
    pub fn snapshot(&mut self, now_ms: u64) -> (Vec<EcPublicJwk>, OvkmWithNext) {
        let next = if self.is_updating(now_ms) {
            self.next
                .as_ref()
                .map(|m| m.candidates.iter().map(|c| c.ovkm.clone()).collect())
        } else {
            None
        };
        (
            self.credential_jwks(),
            OvkmWithNext {
                ovkm: self.ovkm.clone(),
                next,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keymesh_common::jwk::{CRV_P256, KTY_EC};

    fn jwk(tag: &str) -> EcPublicJwk {
        EcPublicJwk {
            kty: KTY_EC.into(),
            crv: CRV_P256.into(),
            x: format!("x-{tag}"),
            y: format!("y-{tag}"),
            kid: None,
        }
    }

    fn ovkm(tag: &str) -> Ovkm {
        Ovkm {
            ovk: jwk(&format!("ovk-{tag}")),
            r: vec![0x11; 16],
            mac: vec![0x22; 32],
        }
    }

    /// Manager with `n` credentials bound to OVK "1".
    fn manager(n: usize) -> CredManager {
        let mut cm = CredManager::init(jwk("cred0"), ovkm("1"));
        for i in 1..n {
            assert!(cm.add(jwk(&format!("cred{i}"))));
        }
        cm
    }

    #[test]
    fn test_add_refused_during_migration() {
        let mut cm = manager(2);
        assert!(cm.add_updating(&jwk("cred0"), &ovkm("2"), 0));
        assert!(!cm.add(jwk("late")), "no additions while migrating");
    }

    #[test]
    fn test_add_updating_unknown_credential() {
        let mut cm = manager(1);
        assert!(!cm.add_updating(&jwk("ghost"), &ovkm("2"), 0));
        assert!(!cm.is_updating(0), "failed rebind must not open a window");
    }

    #[test]
    fn test_single_update_does_not_commit() {
        let mut cm = manager(3);
        cm.add_updating(&jwk("cred0"), &ovkm("2"), 0);
        assert!(cm.is_updating(0));
        assert_eq!(cm.ovkm(), &ovkm("1"), "1 of 3 is no majority");
        assert_eq!(cm.cred_count(), 3);
    }

    #[test]
    fn test_strict_majority_commits_and_prunes() {
        let mut cm = manager(3);
        cm.add_updating(&jwk("cred0"), &ovkm("2"), 0);
        cm.add_updating(&jwk("cred1"), &ovkm("2"), 10);

        assert_eq!(cm.ovkm(), &ovkm("2"), "2 of 3 commits");
        assert!(!cm.is_updating(10));
        assert_eq!(cm.cred_count(), 2, "credential on the old OVK is pruned");
        assert!(cm.contains_credential(&jwk("cred0")));
        assert!(cm.contains_credential(&jwk("cred1")));
        assert!(!cm.contains_credential(&jwk("cred2")));
    }

    #[test]
    fn test_two_device_group_needs_both() {
        let mut cm = manager(2);
        cm.add_updating(&jwk("cred0"), &ovkm("2"), 0);
        assert!(cm.is_updating(0), "1 of 2 is not a strict majority");

        cm.add_updating(&jwk("cred1"), &ovkm("2"), 10);
        assert!(!cm.is_updating(10));
        assert_eq!(cm.ovkm(), &ovkm("2"));
        assert_eq!(cm.cred_count(), 2);
    }

    #[test]
    fn test_window_stays_open_until_expiry() {
        let mut cm = manager(3);
        cm.add_updating(&jwk("cred0"), &ovkm("2"), 1000);
        assert!(cm.is_updating(1000 + MIGRATION_WINDOW_MS));
        assert!(!cm.is_updating(1000 + MIGRATION_WINDOW_MS + 1));
    }

    #[test]
    fn test_timeout_resolves_to_most_bound_candidate() {
        let mut cm = manager(4);
        // Two credentials rebind to OVK 2, one to OVK 3.
        cm.add_updating(&jwk("cred0"), &ovkm("2"), 0);
        cm.add_updating(&jwk("cred1"), &ovkm("2"), 5);
        cm.add_updating(&jwk("cred2"), &ovkm("3"), 10);

        assert!(!cm.is_updating(MIGRATION_WINDOW_MS + 1));
        assert_eq!(cm.ovkm(), &ovkm("2"));
        assert_eq!(cm.cred_count(), 2);
        assert!(!cm.contains_credential(&jwk("cred3")), "incumbent-bound pruned");
    }

    #[test]
    fn test_timeout_tie_breaks_to_earliest_candidate() {
        let mut cm = manager(3);
        cm.add_updating(&jwk("cred0"), &ovkm("2"), 100);
        cm.add_updating(&jwk("cred1"), &ovkm("3"), 200);

        // 1-1-1 across incumbent, OVK 2, OVK 3: the earliest-seen
        // candidate wins, and even the incumbent-bound credential is
        // pruned.
        assert!(!cm.is_updating(100 + MIGRATION_WINDOW_MS + 1));
        assert_eq!(cm.ovkm(), &ovkm("2"));
        assert_eq!(cm.cred_count(), 1);
        assert!(cm.contains_credential(&jwk("cred0")));
    }

    #[test]
    fn test_timeout_keeps_incumbent_on_strict_lead() {
        let mut cm = manager(3);
        cm.add_updating(&jwk("cred0"), &ovkm("2"), 100);

        // Incumbent still holds 2 of 3 bindings and out-counts the lone
        // candidate, so the rotation attempt is discarded.
        assert!(!cm.is_updating(100 + MIGRATION_WINDOW_MS + 1));
        assert_eq!(cm.ovkm(), &ovkm("1"));
        assert_eq!(cm.cred_count(), 2);
        assert!(!cm.contains_credential(&jwk("cred0")));
    }

    #[test]
    fn test_timeout_tie_between_candidates_only() {
        // All credentials leave the incumbent: 1-1 tie between candidates.
        let mut cm = manager(2);
        cm.add_updating(&jwk("cred0"), &ovkm("2"), 100);
        cm.add_updating(&jwk("cred1"), &ovkm("3"), 200);

        assert!(!cm.is_updating(100 + MIGRATION_WINDOW_MS + 1));
        assert_eq!(cm.ovkm(), &ovkm("2"), "earliest-seen candidate wins the tie");
        assert_eq!(cm.cred_count(), 1);
        assert!(cm.contains_credential(&jwk("cred0")));
    }

    #[test]
    fn test_snapshot_carries_candidates_only_while_open() {
        let mut cm = manager(3);
        let (creds, view) = cm.snapshot(0);
        assert_eq!(creds.len(), 3);
        assert!(view.next.is_none());

        cm.add_updating(&jwk("cred0"), &ovkm("2"), 0);
        let (_, view) = cm.snapshot(1);
        let next = view.next.expect("open migration must expose candidates");
        assert_eq!(next, vec![ovkm("2")]);

        let (_, view) = cm.snapshot(MIGRATION_WINDOW_MS + 1);
        assert!(view.next.is_none(), "snapshot after expiry resolves first");
    }

    #[test]
    fn test_duplicate_candidate_not_recorded_twice() {
        let mut cm = manager(3);
        cm.add_updating(&jwk("cred0"), &ovkm("2"), 0);
        cm.add_updating(&jwk("cred0"), &ovkm("2"), 5);
        let (_, view) = cm.snapshot(10);
        assert_eq!(view.next.unwrap().len(), 1);
    }
}
