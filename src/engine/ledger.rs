//! Vote Ledger: the authoritative per-voter choice for each target.
//!
//! A row exists only while the voter's choice is Up or Down. Re-selecting the
//! current direction removes the row; selecting the other direction flips it.

use std::sync::Arc;
use tracing::debug;

use crate::core::{ActorId, Direction, TargetRef, Timestamp, Vote};
use crate::error::{AppError, AppResult};
use crate::infrastructure::database::{DatabaseInterface, DatabaseTransaction};

/// Counter adjustments produced by one ledger mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteDelta {
    pub upvotes: i64,
    pub downvotes: i64,
}

impl VoteDelta {
    fn add(direction: Direction) -> Self {
        match direction {
            Direction::Up => Self { upvotes: 1, downvotes: 0 },
            Direction::Down => Self { upvotes: 0, downvotes: 1 },
        }
    }

    fn remove(direction: Direction) -> Self {
        let added = Self::add(direction);
        Self {
            upvotes: -added.upvotes,
            downvotes: -added.downvotes,
        }
    }

    pub fn score(&self) -> i64 {
        self.upvotes - self.downvotes
    }
}

/// Outcome of the toggle state machine for one cast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTransition {
    /// No prior vote; a row was inserted
    Cast(Direction),
    /// Same direction selected again; the row was deleted
    Retract(Direction),
    /// Opposite direction selected; the row was flipped
    Switch { from: Direction, to: Direction },
}

impl VoteTransition {
    pub fn resolve(existing: Option<Direction>, requested: Direction) -> Self {
        match existing {
            None => VoteTransition::Cast(requested),
            Some(current) if current == requested => VoteTransition::Retract(current),
            Some(current) => VoteTransition::Switch {
                from: current,
                to: current.opposite(),
            },
        }
    }

    pub fn previous(&self) -> Option<Direction> {
        match *self {
            VoteTransition::Cast(_) => None,
            VoteTransition::Retract(direction) => Some(direction),
            VoteTransition::Switch { from, .. } => Some(from),
        }
    }

    /// The voter's choice after the transition; `None` means no row.
    pub fn current(&self) -> Option<Direction> {
        match *self {
            VoteTransition::Cast(direction) => Some(direction),
            VoteTransition::Retract(_) => None,
            VoteTransition::Switch { to, .. } => Some(to),
        }
    }

    /// The voter's contribution to the target's score after the transition.
    pub fn effective_score(&self) -> i64 {
        self.current().map(Direction::value).unwrap_or(0)
    }

    pub fn delta(&self) -> VoteDelta {
        match *self {
            VoteTransition::Cast(direction) => VoteDelta::add(direction),
            VoteTransition::Retract(direction) => VoteDelta::remove(direction),
            VoteTransition::Switch { from, to } => {
                let removed = VoteDelta::remove(from);
                let added = VoteDelta::add(to);
                VoteDelta {
                    upvotes: removed.upvotes + added.upvotes,
                    downvotes: removed.downvotes + added.downvotes,
                }
            }
        }
    }
}

pub struct VoteLedger {
    db: Arc<dyn DatabaseInterface>,
}

impl VoteLedger {
    pub fn new(db: Arc<dyn DatabaseInterface>) -> Self {
        Self { db }
    }

    /// Apply the toggle state machine for `(voter, target)` inside `tx`.
    /// Existence of voter and target is the caller's check.
    pub async fn record_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        voter: ActorId,
        target: TargetRef,
        direction: Direction,
        now: Timestamp,
    ) -> AppResult<VoteTransition> {
        let existing = self.db.get_vote_tx(tx, voter, target).await?;
        let transition = VoteTransition::resolve(existing.map(|v| v.direction), direction);

        let applied = match transition {
            VoteTransition::Cast(direction) => {
                let vote = Vote {
                    voter_id: voter,
                    target,
                    direction,
                    cast_at: now,
                };
                self.db.insert_vote_tx(tx, &vote).await?;
                true
            }
            VoteTransition::Retract(_) => self.db.delete_vote_tx(tx, voter, target).await?,
            VoteTransition::Switch { to, .. } => {
                self.db.update_vote_tx(tx, voter, target, to, now).await?
            }
        };

        // The row we just read vanished or changed under us
        if !applied {
            return Err(AppError::Conflict(format!(
                "vote row for voter {} on {} changed concurrently",
                voter, target
            )));
        }

        debug!(%voter, %target, ?transition, "ledger updated");
        Ok(transition)
    }

    pub async fn current_vote(&self, voter: ActorId, target: TargetRef) -> AppResult<Option<Direction>> {
        Ok(self.db.get_vote(voter, target).await?.map(|v| v.direction))
    }

    /// Remove every vote on a target that is being deleted.
    pub async fn purge_target_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        target: TargetRef,
    ) -> AppResult<u64> {
        self.db.delete_votes_for_target_tx(tx, target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Direction::{Down, Up};

    #[test]
    fn test_transitions() {
        assert_eq!(VoteTransition::resolve(None, Up), VoteTransition::Cast(Up));
        assert_eq!(VoteTransition::resolve(Some(Up), Up), VoteTransition::Retract(Up));
        assert_eq!(
            VoteTransition::resolve(Some(Down), Up),
            VoteTransition::Switch { from: Down, to: Up }
        );
        assert_eq!(
            VoteTransition::resolve(Some(Up), Down),
            VoteTransition::Switch { from: Up, to: Down }
        );
    }

    #[test]
    fn test_effective_scores() {
        assert_eq!(VoteTransition::Cast(Up).effective_score(), 1);
        assert_eq!(VoteTransition::Cast(Down).effective_score(), -1);
        assert_eq!(VoteTransition::Retract(Down).effective_score(), 0);
        assert_eq!(VoteTransition::Switch { from: Up, to: Down }.effective_score(), -1);
    }

    #[test]
    fn test_deltas_move_counters_by_one() {
        assert_eq!(VoteTransition::Cast(Up).delta(), VoteDelta { upvotes: 1, downvotes: 0 });
        assert_eq!(VoteTransition::Retract(Down).delta(), VoteDelta { upvotes: 0, downvotes: -1 });
        let switch = VoteTransition::Switch { from: Up, to: Down }.delta();
        assert_eq!(switch, VoteDelta { upvotes: -1, downvotes: 1 });
        assert_eq!(switch.score(), -2);
    }

    #[test]
    fn test_toggle_cycle_returns_to_baseline() {
        // Up, Up again, Down, Down again: every state reachable and net zero
        let mut state = None;
        let mut net = VoteDelta::default();
        for requested in [Up, Up, Down, Down, Up, Down, Down] {
            let transition = VoteTransition::resolve(state, requested);
            let delta = transition.delta();
            net.upvotes += delta.upvotes;
            net.downvotes += delta.downvotes;
            state = transition.current();
            assert_eq!(net.upvotes, i64::from(state == Some(Up)));
            assert_eq!(net.downvotes, i64::from(state == Some(Down)));
        }
        assert_eq!(state, None);
    }
}
