use async_trait::async_trait;
use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Executor, QueryBuilder, Row};
use std::str::FromStr;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::core::{
    Actor, ActorId, Aggregate, Comment, CommentId, Direction, Post, PostId, ProfileAggregate,
    TargetInfo, TargetRef, TargetType, Timestamp, Vote,
};
use crate::error::{AppError, AppResult};
use crate::infrastructure::database::{DatabaseInterface, DatabaseTransaction};

// Write units take the database write lock up front. A deferred transaction
// that reads first fails with BUSY_SNAPSHOT instead of waiting on busy_timeout
// once another writer commits.
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

// Keeps IN (...) lists well below SQLite's bound-parameter limit
const AGGREGATE_LOOKUP_CHUNK: usize = 500;

const AGGREGATE_COLUMNS: &str = "target_type, target_id, upvotes, downvotes, score, child_count, \
     comment_count, hot_rank, controversy_rank, created_at, updated_at, version";

/// SQLite implementation of database interface
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Single-connection in-memory database, used by tests and demos.
    /// The one connection is never recycled, otherwise its data would vanish.
    pub async fn new_in_memory() -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to connect to in-memory SQLite: {}", e))
            })?;

        let db = Self { pool };
        db.initialize().await?;
        Ok(db)
    }

    /// File-backed database in WAL mode. Writers that find the database locked
    /// wait up to the busy timeout before the engine treats it as a conflict.
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        if config.is_in_memory() {
            return Self::new_in_memory().await;
        }

        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to connect to {}: {}", config.url, e))
            })?;

        let db = Self { pool };
        db.initialize().await?;
        info!(url = %config.url, max_connections = config.max_connections, "SQLite database ready");
        Ok(db)
    }

    /// Health check to verify database connectivity
    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Database health check failed: {}", e)))?;
        Ok(())
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn initialize(&self) -> AppResult<()> {
        let statements = [
            (
                "actors table",
                r#"
                CREATE TABLE IF NOT EXISTS actors (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                )
                "#,
            ),
            (
                "posts table",
                r#"
                CREATE TABLE IF NOT EXISTS posts (
                    id INTEGER PRIMARY KEY,
                    creator_id INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    body TEXT,
                    created_at INTEGER NOT NULL
                )
                "#,
            ),
            (
                "comments table",
                r#"
                CREATE TABLE IF NOT EXISTS comments (
                    id INTEGER PRIMARY KEY,
                    post_id INTEGER NOT NULL,
                    parent_id INTEGER,
                    creator_id INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                )
                "#,
            ),
            (
                "votes table",
                r#"
                CREATE TABLE IF NOT EXISTS votes (
                    voter_id INTEGER NOT NULL,
                    target_type TEXT NOT NULL,
                    target_id INTEGER NOT NULL,
                    direction INTEGER NOT NULL CHECK (direction IN (-1, 1)),
                    cast_at INTEGER NOT NULL,
                    PRIMARY KEY (voter_id, target_type, target_id)
                )
                "#,
            ),
            (
                "aggregates table",
                r#"
                CREATE TABLE IF NOT EXISTS aggregates (
                    target_type TEXT NOT NULL,
                    target_id INTEGER NOT NULL,
                    upvotes INTEGER NOT NULL DEFAULT 0,
                    downvotes INTEGER NOT NULL DEFAULT 0,
                    score INTEGER NOT NULL DEFAULT 0,
                    child_count INTEGER NOT NULL DEFAULT 0,
                    comment_count INTEGER NOT NULL DEFAULT 0,
                    hot_rank REAL NOT NULL DEFAULT 0,
                    controversy_rank REAL NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    version INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (target_type, target_id),
                    CHECK (score = upvotes - downvotes),
                    CHECK (upvotes >= 0 AND downvotes >= 0),
                    CHECK (child_count >= 0 AND comment_count >= 0)
                )
                "#,
            ),
            (
                "profile aggregates table",
                r#"
                CREATE TABLE IF NOT EXISTS profile_aggregates (
                    actor_id INTEGER PRIMARY KEY,
                    post_count INTEGER NOT NULL DEFAULT 0,
                    comment_count INTEGER NOT NULL DEFAULT 0,
                    updated_at INTEGER NOT NULL,
                    CHECK (post_count >= 0 AND comment_count >= 0)
                )
                "#,
            ),
            (
                "comments post index",
                "CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id, created_at DESC)",
            ),
            (
                "votes target index",
                "CREATE INDEX IF NOT EXISTS idx_votes_target ON votes(target_type, target_id)",
            ),
        ];

        for (label, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to create {}: {}", label, e)))?;
        }

        Ok(())
    }
}

fn comment_from_row(row: &SqliteRow) -> AppResult<Comment> {
    Ok(Comment {
        id: CommentId(row.try_get("id")?),
        post_id: PostId(row.try_get("post_id")?),
        parent_id: row.try_get::<Option<i64>, _>("parent_id")?.map(CommentId),
        creator_id: ActorId(row.try_get("creator_id")?),
        content: row.try_get("content")?,
        created_at: Timestamp(row.try_get("created_at")?),
    })
}

fn vote_from_row(row: &SqliteRow) -> AppResult<Vote> {
    let target_type: String = row.try_get("target_type")?;
    Ok(Vote {
        voter_id: ActorId(row.try_get("voter_id")?),
        target: TargetRef::new(target_type.parse()?, row.try_get("target_id")?),
        direction: Direction::try_from(row.try_get::<i64, _>("direction")?)?,
        cast_at: Timestamp(row.try_get("cast_at")?),
    })
}

fn aggregate_from_row(row: &SqliteRow) -> AppResult<Aggregate> {
    let target_type: String = row.try_get("target_type")?;
    Ok(Aggregate {
        target: TargetRef::new(target_type.parse()?, row.try_get("target_id")?),
        upvotes: row.try_get("upvotes")?,
        downvotes: row.try_get("downvotes")?,
        score: row.try_get("score")?,
        child_count: row.try_get("child_count")?,
        comment_count: row.try_get("comment_count")?,
        hot_rank: row.try_get("hot_rank")?,
        controversy_rank: row.try_get("controversy_rank")?,
        created_at: Timestamp(row.try_get("created_at")?),
        updated_at: Timestamp(row.try_get("updated_at")?),
        version: row.try_get("version")?,
    })
}

async fn fetch_target<'e, E>(executor: E, target: TargetRef) -> AppResult<Option<TargetInfo>>
where
    E: Executor<'e, Database = Sqlite>,
{
    match target.target_type {
        TargetType::Post => {
            let row = sqlx::query("SELECT id, creator_id, created_at FROM posts WHERE id = ?")
                .bind(target.target_id)
                .fetch_optional(executor)
                .await?;
            row.map(|row| -> AppResult<TargetInfo> {
                Ok(TargetInfo {
                    target,
                    creator_id: ActorId(row.try_get("creator_id")?),
                    created_at: Timestamp(row.try_get("created_at")?),
                    post_id: PostId(row.try_get("id")?),
                })
            })
            .transpose()
        }
        TargetType::Comment => {
            let row = sqlx::query(
                "SELECT post_id, creator_id, created_at FROM comments WHERE id = ?",
            )
            .bind(target.target_id)
            .fetch_optional(executor)
            .await?;
            row.map(|row| -> AppResult<TargetInfo> {
                Ok(TargetInfo {
                    target,
                    creator_id: ActorId(row.try_get("creator_id")?),
                    created_at: Timestamp(row.try_get("created_at")?),
                    post_id: PostId(row.try_get("post_id")?),
                })
            })
            .transpose()
        }
    }
}

async fn fetch_vote<'e, E>(executor: E, voter: ActorId, target: TargetRef) -> AppResult<Option<Vote>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT voter_id, target_type, target_id, direction, cast_at FROM votes \
         WHERE voter_id = ? AND target_type = ? AND target_id = ?",
    )
    .bind(voter.value())
    .bind(target.target_type.as_str())
    .bind(target.target_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(vote_from_row).transpose()
}

async fn fetch_aggregate<'e, E>(executor: E, target: TargetRef) -> AppResult<Option<Aggregate>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM aggregates WHERE target_type = ? AND target_id = ?",
        AGGREGATE_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(target.target_type.as_str())
        .bind(target.target_id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(aggregate_from_row).transpose()
}

async fn fetch_comments_for_post<'e, E>(executor: E, post_id: PostId) -> AppResult<Vec<Comment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT id, post_id, parent_id, creator_id, content, created_at FROM comments \
         WHERE post_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(post_id.value())
    .fetch_all(executor)
    .await?;

    rows.iter().map(comment_from_row).collect()
}

#[async_trait]
impl DatabaseInterface for SqliteDatabase {
    async fn begin_transaction(&self) -> AppResult<DatabaseTransaction<'static>> {
        let tx = self.pool.begin_with(BEGIN_WRITE).await.map_err(|e| match AppError::from(e) {
            AppError::DatabaseError(msg) => {
                AppError::DatabaseError(format!("Failed to begin transaction: {}", msg))
            }
            other => other,
        })?;
        Ok(DatabaseTransaction::new_sqlite(tx))
    }

    async fn insert_actor_tx(&self, tx: &mut DatabaseTransaction<'_>, actor: &Actor) -> AppResult<()> {
        sqlx::query("INSERT INTO actors (id, name, created_at) VALUES (?, ?, ?)")
            .bind(actor.id.value())
            .bind(&actor.name)
            .bind(actor.created_at.value())
            .execute(tx.connection())
            .await?;
        Ok(())
    }

    async fn actor_exists_tx(&self, tx: &mut DatabaseTransaction<'_>, id: ActorId) -> AppResult<bool> {
        let row = sqlx::query("SELECT 1 FROM actors WHERE id = ?")
            .bind(id.value())
            .fetch_optional(tx.connection())
            .await?;
        Ok(row.is_some())
    }

    async fn insert_post_tx(&self, tx: &mut DatabaseTransaction<'_>, post: &Post) -> AppResult<()> {
        sqlx::query("INSERT INTO posts (id, creator_id, title, body, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(post.id.value())
            .bind(post.creator_id.value())
            .bind(&post.title)
            .bind(&post.body)
            .bind(post.created_at.value())
            .execute(tx.connection())
            .await?;
        Ok(())
    }

    async fn insert_comment_tx(&self, tx: &mut DatabaseTransaction<'_>, comment: &Comment) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO comments (id, post_id, parent_id, creator_id, content, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(comment.id.value())
        .bind(comment.post_id.value())
        .bind(comment.parent_id.map(CommentId::value))
        .bind(comment.creator_id.value())
        .bind(&comment.content)
        .bind(comment.created_at.value())
        .execute(tx.connection())
        .await?;
        Ok(())
    }

    async fn get_comment_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        id: CommentId,
    ) -> AppResult<Option<Comment>> {
        let row = sqlx::query(
            "SELECT id, post_id, parent_id, creator_id, content, created_at FROM comments WHERE id = ?",
        )
        .bind(id.value())
        .fetch_optional(tx.connection())
        .await?;

        row.as_ref().map(comment_from_row).transpose()
    }

    async fn delete_comment_tx(&self, tx: &mut DatabaseTransaction<'_>, id: CommentId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(id.value())
            .execute(tx.connection())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_comments_for_post_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        post_id: PostId,
    ) -> AppResult<Vec<Comment>> {
        fetch_comments_for_post(tx.connection(), post_id).await
    }

    async fn delete_comments_for_post_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        post_id: PostId,
    ) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM comments WHERE post_id = ?")
            .bind(post_id.value())
            .execute(tx.connection())
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_post_tx(&self, tx: &mut DatabaseTransaction<'_>, id: PostId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id.value())
            .execute(tx.connection())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_target_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        target: TargetRef,
    ) -> AppResult<Option<TargetInfo>> {
        fetch_target(tx.connection(), target).await
    }

    async fn get_vote_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        voter: ActorId,
        target: TargetRef,
    ) -> AppResult<Option<Vote>> {
        fetch_vote(tx.connection(), voter, target).await
    }

    async fn insert_vote_tx(&self, tx: &mut DatabaseTransaction<'_>, vote: &Vote) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO votes (voter_id, target_type, target_id, direction, cast_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(vote.voter_id.value())
        .bind(vote.target.target_type.as_str())
        .bind(vote.target.target_id)
        .bind(vote.direction.value())
        .bind(vote.cast_at.value())
        .execute(tx.connection())
        .await?;
        Ok(())
    }

    async fn update_vote_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        voter: ActorId,
        target: TargetRef,
        direction: Direction,
        cast_at: Timestamp,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE votes SET direction = ?, cast_at = ? \
             WHERE voter_id = ? AND target_type = ? AND target_id = ?",
        )
        .bind(direction.value())
        .bind(cast_at.value())
        .bind(voter.value())
        .bind(target.target_type.as_str())
        .bind(target.target_id)
        .execute(tx.connection())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_vote_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        voter: ActorId,
        target: TargetRef,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "DELETE FROM votes WHERE voter_id = ? AND target_type = ? AND target_id = ?",
        )
        .bind(voter.value())
        .bind(target.target_type.as_str())
        .bind(target.target_id)
        .execute(tx.connection())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_votes_for_target_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        target: TargetRef,
    ) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM votes WHERE target_type = ? AND target_id = ?")
            .bind(target.target_type.as_str())
            .bind(target.target_id)
            .execute(tx.connection())
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_aggregate_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        target: TargetRef,
    ) -> AppResult<Option<Aggregate>> {
        fetch_aggregate(tx.connection(), target).await
    }

    async fn insert_aggregate_tx(&self, tx: &mut DatabaseTransaction<'_>, aggregate: &Aggregate) -> AppResult<()> {
        let sql = format!(
            "INSERT INTO aggregates ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            AGGREGATE_COLUMNS
        );
        sqlx::query(&sql)
            .bind(aggregate.target.target_type.as_str())
            .bind(aggregate.target.target_id)
            .bind(aggregate.upvotes)
            .bind(aggregate.downvotes)
            .bind(aggregate.score)
            .bind(aggregate.child_count)
            .bind(aggregate.comment_count)
            .bind(aggregate.hot_rank)
            .bind(aggregate.controversy_rank)
            .bind(aggregate.created_at.value())
            .bind(aggregate.updated_at.value())
            .bind(aggregate.version)
            .execute(tx.connection())
            .await?;
        Ok(())
    }

    async fn update_aggregate_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        aggregate: &Aggregate,
        expected_version: i64,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE aggregates SET upvotes = ?, downvotes = ?, score = ?, child_count = ?, \
             comment_count = ?, hot_rank = ?, controversy_rank = ?, updated_at = ?, version = ? \
             WHERE target_type = ? AND target_id = ? AND version = ?",
        )
        .bind(aggregate.upvotes)
        .bind(aggregate.downvotes)
        .bind(aggregate.score)
        .bind(aggregate.child_count)
        .bind(aggregate.comment_count)
        .bind(aggregate.hot_rank)
        .bind(aggregate.controversy_rank)
        .bind(aggregate.updated_at.value())
        .bind(aggregate.version)
        .bind(aggregate.target.target_type.as_str())
        .bind(aggregate.target.target_id)
        .bind(expected_version)
        .execute(tx.connection())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_aggregate_tx(&self, tx: &mut DatabaseTransaction<'_>, target: TargetRef) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM aggregates WHERE target_type = ? AND target_id = ?")
            .bind(target.target_type.as_str())
            .bind(target.target_id)
            .execute(tx.connection())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn adjust_profile_counts_tx(
        &self,
        tx: &mut DatabaseTransaction<'_>,
        actor: ActorId,
        post_delta: i64,
        comment_delta: i64,
        now: Timestamp,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO profile_aggregates (actor_id, post_count, comment_count, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (actor_id) DO UPDATE SET \
                 post_count = post_count + excluded.post_count, \
                 comment_count = comment_count + excluded.comment_count, \
                 updated_at = excluded.updated_at",
        )
        .bind(actor.value())
        .bind(post_delta)
        .bind(comment_delta)
        .bind(now.value())
        .execute(tx.connection())
        .await?;
        Ok(())
    }

    async fn get_target(&self, target: TargetRef) -> AppResult<Option<TargetInfo>> {
        fetch_target(&self.pool, target).await
    }

    async fn get_vote(&self, voter: ActorId, target: TargetRef) -> AppResult<Option<Vote>> {
        fetch_vote(&self.pool, voter, target).await
    }

    async fn get_aggregate(&self, target: TargetRef) -> AppResult<Option<Aggregate>> {
        fetch_aggregate(&self.pool, target).await
    }

    async fn get_aggregates(&self, target_type: TargetType, ids: &[i64]) -> AppResult<Vec<Aggregate>> {
        let mut aggregates = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(AGGREGATE_LOOKUP_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(format!(
                "SELECT {} FROM aggregates WHERE target_type = ",
                AGGREGATE_COLUMNS
            ));
            qb.push_bind(target_type.as_str());
            qb.push(" AND target_id IN (");
            let mut separated = qb.separated(",");
            for id in chunk {
                separated.push_bind(*id);
            }
            qb.push(")");

            let rows = qb.build().fetch_all(&self.pool).await?;
            for row in &rows {
                aggregates.push(aggregate_from_row(row)?);
            }
        }

        Ok(aggregates)
    }

    async fn list_comments_for_post(&self, post_id: PostId) -> AppResult<Vec<Comment>> {
        fetch_comments_for_post(&self.pool, post_id).await
    }

    async fn get_profile_aggregate(&self, actor: ActorId) -> AppResult<Option<ProfileAggregate>> {
        let row = sqlx::query(
            "SELECT actor_id, post_count, comment_count, updated_at FROM profile_aggregates \
             WHERE actor_id = ?",
        )
        .bind(actor.value())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> AppResult<ProfileAggregate> {
            Ok(ProfileAggregate {
                actor_id: ActorId(row.try_get("actor_id")?),
                post_count: row.try_get("post_count")?,
                comment_count: row.try_get("comment_count")?,
                updated_at: Timestamp(row.try_get("updated_at")?),
            })
        })
        .transpose()
    }
}
