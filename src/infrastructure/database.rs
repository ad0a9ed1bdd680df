// Database Interface - Low-level storage operations for the voting engine
// This layer handles direct SQL for the registry, vote ledger and aggregate tables

use crate::core::{
    Actor, ActorId, Aggregate, Comment, CommentId, Direction, Post, PostId, ProfileAggregate,
    TargetInfo, TargetRef, TargetType, Timestamp, Vote,
};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use sqlx::{Sqlite, SqliteConnection, Transaction};

/// Transaction wrapper for database operations
pub struct DatabaseTransaction<'a> {
    tx: Transaction<'a, Sqlite>,
}

impl<'a> DatabaseTransaction<'a> {
    pub fn new_sqlite(tx: Transaction<'a, Sqlite>) -> Self {
        Self { tx }
    }

    pub(crate) fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Commit the transaction
    pub async fn commit(self) -> AppResult<()> {
        self.tx.commit().await.map_err(|e| match AppError::from(e) {
            AppError::DatabaseError(msg) => {
                AppError::DatabaseError(format!("Failed to commit transaction: {}", msg))
            }
            other => other,
        })
    }

    /// Rollback the transaction
    pub async fn rollback(self) -> AppResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to rollback transaction: {}", e)))
    }
}

/// Database interface trait for the voting engine.
/// Everything that mutates state runs inside a caller-supplied transaction so a
/// ledger write and its aggregate maintenance commit or roll back together.
#[async_trait]
pub trait DatabaseInterface: Send + Sync {
    // Transaction management. Transactions hold the write lock from the start.
    async fn begin_transaction(&self) -> AppResult<DatabaseTransaction<'static>>;

    // Registry operations - actors, posts and comments
    async fn insert_actor_tx(&self, tx: &mut DatabaseTransaction<'_>, actor: &Actor) -> AppResult<()>;
    async fn actor_exists_tx(&self, tx: &mut DatabaseTransaction<'_>, id: ActorId) -> AppResult<bool>;
    async fn insert_post_tx(&self, tx: &mut DatabaseTransaction<'_>, post: &Post) -> AppResult<()>;
    async fn insert_comment_tx(&self, tx: &mut DatabaseTransaction<'_>, comment: &Comment) -> AppResult<()>;
    async fn get_comment_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        id: CommentId,
    ) -> AppResult<Option<Comment>>;
    async fn delete_comment_tx(&self, tx: &mut DatabaseTransaction<'_>, id: CommentId) -> AppResult<bool>;
    async fn list_comments_for_post_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        post_id: PostId,
    ) -> AppResult<Vec<Comment>>;
    async fn delete_comments_for_post_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        post_id: PostId,
    ) -> AppResult<u64>;
    async fn delete_post_tx(&self, tx: &mut DatabaseTransaction<'_>, id: PostId) -> AppResult<bool>;
    async fn get_target_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        target: TargetRef,
    ) -> AppResult<Option<TargetInfo>>;

    // Vote ledger operations
    async fn get_vote_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        voter: ActorId,
        target: TargetRef,
    ) -> AppResult<Option<Vote>>;
    async fn insert_vote_tx(&self, tx: &mut DatabaseTransaction<'_>, vote: &Vote) -> AppResult<()>;
    async fn update_vote_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        voter: ActorId,
        target: TargetRef,
        direction: Direction,
        cast_at: Timestamp,
    ) -> AppResult<bool>;
    async fn delete_vote_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        voter: ActorId,
        target: TargetRef,
    ) -> AppResult<bool>;
    async fn delete_votes_for_target_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        target: TargetRef,
    ) -> AppResult<u64>;

    // Aggregate operations
    async fn get_aggregate_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        target: TargetRef,
    ) -> AppResult<Option<Aggregate>>;
    async fn insert_aggregate_tx(&self, tx: &mut DatabaseTransaction<'_>, aggregate: &Aggregate) -> AppResult<()>;
    /// Compare-and-swap write: applies only when the stored version equals
    /// `expected_version`. Returns false when another writer got there first.
    async fn update_aggregate_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        aggregate: &Aggregate,
        expected_version: i64,
    ) -> AppResult<bool>;
    async fn delete_aggregate_tx(&self, tx: &mut DatabaseTransaction<'_>, target: TargetRef) -> AppResult<bool>;
    async fn adjust_profile_counts_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        actor: ActorId,
        post_delta: i64,
        comment_delta: i64,
        now: Timestamp,
    ) -> AppResult<()>;

    // Read-only lookups outside any unit of work
    async fn get_target(&self, target: TargetRef) -> AppResult<Option<TargetInfo>>;
    async fn get_vote(&self, voter: ActorId, target: TargetRef) -> AppResult<Option<Vote>>;
    async fn get_aggregate(&self, target: TargetRef) -> AppResult<Option<Aggregate>>;
    async fn get_aggregates(&self, target_type: TargetType, ids: &[i64]) -> AppResult<Vec<Aggregate>>;
    async fn list_comments_for_post(&self, post_id: PostId) -> AppResult<Vec<Comment>>;
    async fn get_profile_aggregate(&self, actor: ActorId) -> AppResult<Option<ProfileAggregate>>;
}
