//! Aggregate Store: one denormalized counter row per votable target.
//!
//! Every mutation runs inside the caller's transaction and is written with a
//! version compare-and-swap. Losing the race yields `Conflict`, which makes the
//! whole unit of work roll back and retry.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::{ActorId, Aggregate, Comment, TargetInfo, TargetRef, Timestamp};
use crate::engine::ledger::VoteDelta;
use crate::engine::rank;
use crate::error::{AppError, AppResult};
use crate::infrastructure::database::{DatabaseInterface, DatabaseTransaction};

pub struct AggregateStore {
    db: Arc<dyn DatabaseInterface>,
}

impl AggregateStore {
    pub fn new(db: Arc<dyn DatabaseInterface>) -> Self {
        Self { db }
    }

    /// Read an aggregate. Targets without a row yet read as zeroed.
    pub async fn get(&self, target: TargetRef) -> AppResult<Aggregate> {
        if let Some(aggregate) = self.db.get_aggregate(target).await? {
            return Ok(aggregate);
        }
        match self.db.get_target(target).await? {
            Some(info) => Ok(Aggregate::empty(target, info.created_at)),
            None => Err(AppError::NotFound(format!("Target {} not found", target))),
        }
    }

    /// Apply the counter change of one ledger mutation and refresh ranks.
    pub async fn apply_vote_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        target: &TargetInfo,
        delta: VoteDelta,
        now: Timestamp,
    ) -> AppResult<Aggregate> {
        self.mutate_tx(tx, target.target, target.created_at, now, |aggregate| {
            aggregate.upvotes += delta.upvotes;
            aggregate.downvotes += delta.downvotes;
        })
        .await
    }

    /// Comment write hook: creates the comment's own row and bumps the parent's
    /// reply count and the post's comment count.
    pub async fn on_comment_created(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        comment: &Comment,
    ) -> AppResult<()> {
        let post = TargetRef::post(comment.post_id);
        let post_info = self
            .db
            .get_target_tx(tx, post)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found", comment.post_id)))?;
        self.mutate_tx(tx, post, post_info.created_at, comment.created_at, |aggregate| {
            aggregate.comment_count += 1;
        })
        .await?;

        if let Some(parent_id) = comment.parent_id {
            let parent = TargetRef::comment(parent_id);
            match self.db.get_target_tx(tx, parent).await? {
                Some(parent_info) => {
                    self.mutate_tx(tx, parent, parent_info.created_at, comment.created_at, |aggregate| {
                        aggregate.child_count += 1;
                    })
                    .await?;
                }
                None => warn!(comment = %comment.id, parent = %parent_id, "parent comment missing, no reply count to bump"),
            }
        }

        let mut own = Aggregate::empty(TargetRef::comment(comment.id), comment.created_at);
        rank::refresh_ranks(&mut own, comment.created_at);
        self.db.insert_aggregate_tx(tx, &own).await?;

        self.db
            .adjust_profile_counts_tx(tx, comment.creator_id, 0, 1, comment.created_at)
            .await?;

        debug!(comment = %comment.id, post = %comment.post_id, "comment aggregates created");
        Ok(())
    }

    /// Comment delete hook: the inverse of [`AggregateStore::on_comment_created`].
    /// The comment's own row goes away with it.
    pub async fn on_comment_deleted(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        comment: &Comment,
        now: Timestamp,
    ) -> AppResult<()> {
        let post = TargetRef::post(comment.post_id);
        if let Some(post_info) = self.db.get_target_tx(tx, post).await? {
            self.mutate_tx(tx, post, post_info.created_at, now, |aggregate| {
                aggregate.comment_count -= 1;
            })
            .await?;
        }

        if let Some(parent_id) = comment.parent_id {
            let parent = TargetRef::comment(parent_id);
            if let Some(parent_info) = self.db.get_target_tx(tx, parent).await? {
                self.mutate_tx(tx, parent, parent_info.created_at, now, |aggregate| {
                    aggregate.child_count -= 1;
                })
                .await?;
            }
        }

        self.db.delete_aggregate_tx(tx, TargetRef::comment(comment.id)).await?;
        self.db
            .adjust_profile_counts_tx(tx, comment.creator_id, 0, -1, now)
            .await?;

        debug!(comment = %comment.id, post = %comment.post_id, "comment aggregates removed");
        Ok(())
    }

    /// Post delete hook: drops the aggregate rows of the post and of every
    /// comment on it, and takes the removed content off each creator's profile.
    pub async fn on_post_deleted(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        post: &TargetInfo,
        comments: &[Comment],
        now: Timestamp,
    ) -> AppResult<()> {
        for comment in comments {
            self.db.delete_aggregate_tx(tx, TargetRef::comment(comment.id)).await?;
        }
        self.db.delete_aggregate_tx(tx, post.target).await?;

        let mut removed_comments: HashMap<ActorId, i64> = HashMap::new();
        for comment in comments {
            *removed_comments.entry(comment.creator_id).or_default() += 1;
        }
        for (creator, count) in removed_comments {
            self.db.adjust_profile_counts_tx(tx, creator, 0, -count, now).await?;
        }
        self.db
            .adjust_profile_counts_tx(tx, post.creator_id, -1, 0, now)
            .await?;

        debug!(post = %post.post_id, comments = comments.len(), "post aggregates removed");
        Ok(())
    }

    /// Load-modify-CAS on one aggregate row, creating it lazily.
    async fn mutate_tx<F>(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        target: TargetRef,
        target_created_at: Timestamp,
        now: Timestamp,
        change: F,
    ) -> AppResult<Aggregate>
    where
        F: FnOnce(&mut Aggregate) + Send,
    {
        let existing = self.db.get_aggregate_tx(tx, target).await?;
        let is_new = existing.is_none();
        let mut aggregate =
            existing.unwrap_or_else(|| Aggregate::empty(target, target_created_at));
        let expected_version = aggregate.version;

        change(&mut aggregate);
        aggregate.score = aggregate.upvotes - aggregate.downvotes;
        aggregate.updated_at = now;
        aggregate.version = expected_version + 1;
        rank::refresh_ranks(&mut aggregate, now);

        if !aggregate.is_consistent() {
            return Err(AppError::Internal(format!(
                "aggregate for {} would become inconsistent: up={} down={} children={} comments={}",
                target,
                aggregate.upvotes,
                aggregate.downvotes,
                aggregate.child_count,
                aggregate.comment_count
            )));
        }

        if is_new {
            // A concurrent first writer surfaces as a primary-key Conflict
            self.db.insert_aggregate_tx(tx, &aggregate).await?;
        } else if !self
            .db
            .update_aggregate_tx(tx, &aggregate, expected_version)
            .await?
        {
            return Err(AppError::Conflict(format!(
                "aggregate for {} moved past version {}",
                target, expected_version
            )));
        }

        Ok(aggregate)
    }
}
