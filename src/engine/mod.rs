// Voting engine - ledger, aggregate maintenance, ranking and comment trees
//
// Every write is one unit of work: a transaction that either commits the
// ledger/registry change together with all aggregate maintenance, or nothing.

pub mod aggregate_store;
pub mod comment_tree;
pub mod ledger;
pub mod rank;
pub mod retry;

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, EngineConfig};
use crate::core::{
    Actor, ActorId, Aggregate, Comment, CommentId, Direction, NewComment, NewPost, Post, PostId,
    ProfileAggregate, TargetRef, TargetType, Timestamp,
};
use crate::error::{AppError, AppResult};
use crate::infrastructure::database::{DatabaseInterface, DatabaseTransaction};
use crate::infrastructure::id_generator::IdGenerator;
use crate::infrastructure::monitoring::{EngineEvent, EngineMetrics, MetricsSnapshot};
use crate::infrastructure::sqlite_database::SqliteDatabase;

pub use aggregate_store::AggregateStore;
pub use comment_tree::{build_comment_tree, CommentNode, CommentSort};
pub use ledger::{VoteDelta, VoteLedger, VoteTransition};
pub use retry::RetryPolicy;

/// Result of one `cast_vote`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteOutcome {
    /// The voter's contribution after the toggle: -1, 0 or +1
    pub effective_score: i64,
    pub previous: Option<Direction>,
    pub current: Option<Direction>,
    pub aggregate: Aggregate,
}

/// Result of one `delete_post`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PostRemoval {
    pub post_id: PostId,
    pub comments_removed: u64,
    pub votes_removed: u64,
}

pub struct VotingEngine {
    db: Arc<dyn DatabaseInterface>,
    ledger: VoteLedger,
    aggregates: AggregateStore,
    retry: RetryPolicy,
    ids: IdGenerator,
    metrics: EngineMetrics,
}

impl VotingEngine {
    pub fn new(db: Arc<dyn DatabaseInterface>, config: &EngineConfig) -> Self {
        Self {
            ledger: VoteLedger::new(db.clone()),
            aggregates: AggregateStore::new(db.clone()),
            retry: RetryPolicy::from_config(config),
            ids: IdGenerator::new(config.node_id),
            metrics: EngineMetrics::new(),
            db,
        }
    }

    /// Connect to the configured database and build an engine on top of it.
    pub async fn from_config(config: &Config) -> AppResult<Self> {
        let db = SqliteDatabase::connect(&config.database).await?;
        db.health_check().await?;
        info!(node_id = config.engine.node_id, max_attempts = config.engine.max_attempts, "voting engine ready");
        Ok(Self::new(Arc::new(db), &config.engine))
    }

    pub async fn in_memory() -> AppResult<Self> {
        let db = SqliteDatabase::new_in_memory().await?;
        Ok(Self::new(Arc::new(db), &EngineConfig::default()))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The store behind the comment write hooks, for callers that create or
    /// delete comments inside their own transaction.
    pub fn aggregate_store(&self) -> &AggregateStore {
        &self.aggregates
    }

    pub fn database(&self) -> &Arc<dyn DatabaseInterface> {
        &self.db
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Fresh id plus the creation time embedded in it, so ids and
    /// `created_at` order the same way.
    fn allocate_id(&self) -> (i64, Timestamp) {
        let id = self.ids.next_id();
        (id, Timestamp(IdGenerator::extract_timestamp(id) as i64))
    }

    /// Toggle `voter`'s vote on `target` and update the target's aggregate
    /// atomically. Re-casting the current direction retracts it.
    #[instrument(skip(self))]
    pub async fn cast_vote(
        &self,
        voter: ActorId,
        target: TargetRef,
        direction: Direction,
    ) -> AppResult<VoteOutcome> {
        let (transition, aggregate) = self
            .with_retry("cast_vote", || self.cast_vote_once(voter, target, direction))
            .await?;

        self.metrics.record(match transition {
            VoteTransition::Cast(_) => EngineEvent::VoteCast,
            VoteTransition::Retract(_) => EngineEvent::VoteRetracted,
            VoteTransition::Switch { .. } => EngineEvent::VoteSwitched,
        });

        Ok(VoteOutcome {
            effective_score: transition.effective_score(),
            previous: transition.previous(),
            current: transition.current(),
            aggregate,
        })
    }

    async fn cast_vote_once(
        &self,
        voter: ActorId,
        target: TargetRef,
        direction: Direction,
    ) -> AppResult<(VoteTransition, Aggregate)> {
        let mut tx = self.db.begin_transaction().await?;
        let result = async {
            if !self.db.actor_exists_tx(&mut tx, voter).await? {
                return Err(AppError::NotFound(format!("Actor {} not found", voter)));
            }
            let info = self
                .db
                .get_target_tx(&mut tx, target)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Target {} not found", target)))?;

            let now = Timestamp::now();
            let transition = self.ledger.record_tx(&mut tx, voter, target, direction, now).await?;
            let aggregate = self
                .aggregates
                .apply_vote_tx(&mut tx, &info, transition.delta(), now)
                .await?;
            Ok((transition, aggregate))
        }
        .await;
        finish(tx, result).await
    }

    /// Current aggregate of a target; zeroed when nothing has touched it yet.
    pub async fn get_aggregate(&self, target: TargetRef) -> AppResult<Aggregate> {
        self.aggregates.get(target).await
    }

    pub async fn get_vote(&self, voter: ActorId, target: TargetRef) -> AppResult<Option<Direction>> {
        self.ledger.current_vote(voter, target).await
    }

    #[instrument(skip(self))]
    pub async fn register_actor(&self, name: &str) -> AppResult<Actor> {
        let (id, created_at) = self.allocate_id();
        let actor = Actor {
            id: ActorId(id),
            name: name.to_string(),
            created_at,
        };
        self.with_retry("register_actor", || async {
            let mut tx = self.db.begin_transaction().await?;
            let result = self.db.insert_actor_tx(&mut tx, &actor).await;
            finish(tx, result).await
        })
        .await?;
        debug!(actor = %actor.id, "actor registered");
        Ok(actor)
    }

    #[instrument(skip(self, new_post), fields(creator = %new_post.creator_id))]
    pub async fn create_post(&self, new_post: NewPost) -> AppResult<Post> {
        let (id, created_at) = self.allocate_id();
        let post = Post {
            id: PostId(id),
            creator_id: new_post.creator_id,
            title: new_post.title,
            body: new_post.body,
            created_at,
        };
        self.with_retry("create_post", || async {
            let mut tx = self.db.begin_transaction().await?;
            let result = async {
                if !self.db.actor_exists_tx(&mut tx, post.creator_id).await? {
                    return Err(AppError::NotFound(format!("Actor {} not found", post.creator_id)));
                }
                self.db.insert_post_tx(&mut tx, &post).await?;
                self.db
                    .adjust_profile_counts_tx(&mut tx, post.creator_id, 1, 0, post.created_at)
                    .await
            }
            .await;
            finish(tx, result).await
        })
        .await?;
        debug!(post = %post.id, "post created");
        Ok(post)
    }

    /// Create a comment and maintain the post, parent and profile counters
    /// in the same transaction.
    #[instrument(skip(self, new_comment), fields(post = %new_comment.post_id, parent = ?new_comment.parent_id))]
    pub async fn create_comment(&self, new_comment: NewComment) -> AppResult<Comment> {
        let (id, created_at) = self.allocate_id();
        let comment = Comment {
            id: CommentId(id),
            post_id: new_comment.post_id,
            parent_id: new_comment.parent_id,
            creator_id: new_comment.creator_id,
            content: new_comment.content,
            created_at,
        };
        self.with_retry("create_comment", || async {
            let mut tx = self.db.begin_transaction().await?;
            let result = async {
                self.validate_comment_tx(&mut tx, &comment).await?;
                self.db.insert_comment_tx(&mut tx, &comment).await?;
                self.aggregates.on_comment_created(&mut tx, &comment).await
            }
            .await;
            finish(tx, result).await
        })
        .await?;
        self.metrics.record(EngineEvent::CommentCreated);
        Ok(comment)
    }

    async fn validate_comment_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        comment: &Comment,
    ) -> AppResult<()> {
        if !self.db.actor_exists_tx(tx, comment.creator_id).await? {
            return Err(AppError::NotFound(format!("Actor {} not found", comment.creator_id)));
        }
        if self.db.get_target_tx(tx, TargetRef::post(comment.post_id)).await?.is_none() {
            return Err(AppError::NotFound(format!("Post {} not found", comment.post_id)));
        }
        if let Some(parent_id) = comment.parent_id {
            let parent = self
                .db
                .get_target_tx(tx, TargetRef::comment(parent_id))
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Parent comment {} not found", parent_id)))?;
            if parent.post_id != comment.post_id {
                return Err(AppError::InvalidState(format!(
                    "Parent comment {} belongs to post {}, not {}",
                    parent_id, parent.post_id, comment.post_id
                )));
            }
        }
        Ok(())
    }

    /// Hard-delete a comment with its votes and aggregate row. Replies stay
    /// and surface as roots in later trees.
    #[instrument(skip(self))]
    pub async fn delete_comment(&self, id: CommentId) -> AppResult<Comment> {
        let comment = self
            .with_retry("delete_comment", || async {
                let mut tx = self.db.begin_transaction().await?;
                let result = async {
                    let comment = self
                        .db
                        .get_comment_tx(&mut tx, id)
                        .await?
                        .ok_or_else(|| AppError::NotFound(format!("Comment {} not found", id)))?;
                    if !self.db.delete_comment_tx(&mut tx, id).await? {
                        return Err(AppError::Conflict(format!("Comment {} vanished mid-delete", id)));
                    }
                    let purged = self.ledger.purge_target_tx(&mut tx, TargetRef::comment(id)).await?;
                    self.aggregates
                        .on_comment_deleted(&mut tx, &comment, Timestamp::now())
                        .await?;
                    debug!(comment = %id, purged_votes = purged, "comment removed");
                    Ok(comment)
                }
                .await;
                finish(tx, result).await
            })
            .await?;
        self.metrics.record(EngineEvent::CommentDeleted);
        Ok(comment)
    }

    /// Hard-delete a post with every comment on it, their votes and their
    /// aggregate rows. Creators' profile counters drop accordingly.
    #[instrument(skip(self))]
    pub async fn delete_post(&self, id: PostId) -> AppResult<PostRemoval> {
        let removal = self
            .with_retry("delete_post", || async {
                let mut tx = self.db.begin_transaction().await?;
                let result = async {
                    let target = TargetRef::post(id);
                    let info = self
                        .db
                        .get_target_tx(&mut tx, target)
                        .await?
                        .ok_or_else(|| AppError::NotFound(format!("Post {} not found", id)))?;
                    let comments = self.db.list_comments_for_post_tx(&mut tx, id).await?;

                    let mut votes_removed = self.ledger.purge_target_tx(&mut tx, target).await?;
                    for comment in &comments {
                        votes_removed += self
                            .ledger
                            .purge_target_tx(&mut tx, TargetRef::comment(comment.id))
                            .await?;
                    }
                    let comments_removed = self.db.delete_comments_for_post_tx(&mut tx, id).await?;
                    if !self.db.delete_post_tx(&mut tx, id).await? {
                        return Err(AppError::Conflict(format!("Post {} vanished mid-delete", id)));
                    }
                    self.aggregates
                        .on_post_deleted(&mut tx, &info, &comments, Timestamp::now())
                        .await?;

                    Ok(PostRemoval {
                        post_id: id,
                        comments_removed,
                        votes_removed,
                    })
                }
                .await;
                finish(tx, result).await
            })
            .await?;
        self.metrics.record(EngineEvent::PostDeleted);
        debug!(post = %id, comments = removal.comments_removed, votes = removal.votes_removed, "post removed");
        Ok(removal)
    }

    pub async fn profile_aggregate(&self, actor: ActorId) -> AppResult<ProfileAggregate> {
        Ok(self
            .db
            .get_profile_aggregate(actor)
            .await?
            .unwrap_or_else(|| ProfileAggregate::empty(actor)))
    }

    /// Fetch a post's comments and their aggregates, then build the forest.
    #[instrument(skip(self))]
    pub async fn comment_tree(&self, post_id: PostId, sort: CommentSort) -> AppResult<Vec<CommentNode>> {
        if self.db.get_target(TargetRef::post(post_id)).await?.is_none() {
            return Err(AppError::NotFound(format!("Post {} not found", post_id)));
        }

        let comments = self.db.list_comments_for_post(post_id).await?;
        let ids: Vec<i64> = comments.iter().map(|c| c.id.value()).collect();
        let aggregates = comment_tree::index_aggregates(
            self.db.get_aggregates(TargetType::Comment, &ids).await?,
        );

        let forest = build_comment_tree(&comments, &aggregates, sort, Timestamp::now())?;
        debug!(comments = comments.len(), roots = forest.len(), "comment tree built");
        Ok(forest)
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = AppResult<T>>,
    {
        let result = self
            .retry
            .run(operation, op, || self.metrics.record(EngineEvent::ConflictRetried))
            .await;
        if let Err(AppError::Unavailable(_)) = &result {
            self.metrics.record(EngineEvent::Unavailable);
        }
        result
    }
}

/// Commit on success, roll back on failure. The original error wins over a
/// failed rollback.
async fn finish<T>(tx: DatabaseTransaction<'static>, result: AppResult<T>) -> AppResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_error) = tx.rollback().await {
                warn!(error = %rollback_error, "rollback failed");
            }
            Err(e)
        }
    }
}
