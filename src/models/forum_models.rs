// Forum models - the rows the voting engine reads and writes

use serde::{Deserialize, Serialize};

use crate::core::strong_types::{
    ActorId, CommentId, Direction, PostId, TargetRef, TargetType, Timestamp,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub creator_id: ActorId,
    pub title: String,
    pub body: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub creator_id: ActorId,
    pub title: String,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    pub creator_id: ActorId,
    pub content: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewComment {
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    pub creator_id: ActorId,
    pub content: String,
}

/// Ledger row: one per `(voter, target)` with a non-neutral choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub voter_id: ActorId,
    pub target: TargetRef,
    pub direction: Direction,
    pub cast_at: Timestamp,
}

/// What the engine needs to know about a votable entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetInfo {
    pub target: TargetRef,
    pub creator_id: ActorId,
    pub created_at: Timestamp,
    /// Owning post for comments, the post itself for posts
    pub post_id: PostId,
}

/// Denormalized counters and rank scores for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub target: TargetRef,
    pub upvotes: i64,
    pub downvotes: i64,
    pub score: i64,
    /// Direct replies; comments only
    pub child_count: i64,
    /// Comments on the post; posts only
    pub comment_count: i64,
    pub hot_rank: f64,
    pub controversy_rank: f64,
    /// Creation time of the target itself
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub version: i64,
}

impl Aggregate {
    /// Zeroed aggregate for a target that has not seen any event yet.
    pub fn empty(target: TargetRef, created_at: Timestamp) -> Self {
        Self {
            target,
            upvotes: 0,
            downvotes: 0,
            score: 0,
            child_count: 0,
            comment_count: 0,
            hot_rank: 0.0,
            controversy_rank: 0.0,
            created_at,
            updated_at: created_at,
            version: 0,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.score == self.upvotes - self.downvotes
            && self.upvotes >= 0
            && self.downvotes >= 0
            && self.child_count >= 0
            && self.comment_count >= 0
    }

    pub fn comment_id(&self) -> Option<CommentId> {
        match self.target.target_type {
            TargetType::Comment => Some(CommentId(self.target.target_id)),
            TargetType::Post => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileAggregate {
    pub actor_id: ActorId,
    pub post_count: i64,
    pub comment_count: i64,
    pub updated_at: Timestamp,
}

impl ProfileAggregate {
    pub fn empty(actor_id: ActorId) -> Self {
        Self {
            actor_id,
            post_count: 0,
            comment_count: 0,
            updated_at: Timestamp(0),
        }
    }
}
