pub mod strong_types;

pub use crate::models::{
    Actor, Aggregate, Comment, NewComment, NewPost, Post, ProfileAggregate, TargetInfo, Vote,
};
pub use strong_types::{
    current_time_millis, ActorId, CommentId, Direction, PostId, TargetRef, TargetType, Timestamp,
};
