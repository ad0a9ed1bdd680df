// Strong Types - identifiers, timestamps and vote directions
// Newtypes keep actor, post and comment ids from being mixed up at call sites

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, AppResult};

/// Current time in milliseconds since Unix epoch
pub fn current_time_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            pub fn value(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> AppResult<Self> {
                s.trim().parse::<i64>().map(Self).map_err(|_| {
                    AppError::InvalidState(format!("Malformed {} id: {:?}", $label, s))
                })
            }
        }
    };
}

id_newtype!(
    /// Identifier of a voting / posting actor (profile)
    ActorId,
    "actor"
);
id_newtype!(PostId, "post");
id_newtype!(CommentId, "comment");

/// Milliseconds since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn new(millis: i64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        Self(current_time_millis())
    }

    pub fn value(self) -> i64 {
        self.0
    }

    /// Seconds elapsed from `earlier` to `self`, never negative.
    pub fn seconds_since(self, earlier: Timestamp) -> f64 {
        ((self.0 - earlier.0).max(0) as f64) / 1000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

/// Kind of votable entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Post,
    Comment,
}

impl TargetType {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetType::Post => "post",
            TargetType::Comment => "comment",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetType {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "post" => Ok(TargetType::Post),
            "comment" => Ok(TargetType::Comment),
            other => Err(AppError::InvalidState(format!("Unknown target type: {:?}", other))),
        }
    }
}

/// A votable entity, keyed by `(target_type, target_id)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetRef {
    pub target_type: TargetType,
    pub target_id: i64,
}

impl TargetRef {
    pub fn new(target_type: TargetType, target_id: i64) -> Self {
        Self {
            target_type,
            target_id,
        }
    }

    pub fn post(id: PostId) -> Self {
        Self::new(TargetType::Post, id.value())
    }

    pub fn comment(id: CommentId) -> Self {
        Self::new(TargetType::Comment, id.value())
    }

    /// Parse a target from the raw strings a transport layer hands over.
    pub fn parse(target_type: &str, target_id: &str) -> AppResult<Self> {
        let target_type = target_type.parse::<TargetType>()?;
        let target_id = target_id.trim().parse::<i64>().map_err(|_| {
            AppError::InvalidState(format!("Malformed {} id: {:?}", target_type, target_id))
        })?;
        Ok(Self::new(target_type, target_id))
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target_type, self.target_id)
    }
}

/// Vote direction. There is no neutral variant: "no vote" is the absence of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Signed score contribution, `+1` or `-1`.
    pub fn value(self) -> i64 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

impl TryFrom<i64> for Direction {
    type Error = AppError;

    fn try_from(value: i64) -> AppResult<Self> {
        match value {
            1 => Ok(Direction::Up),
            -1 => Ok(Direction::Down),
            other => Err(AppError::InvalidState(format!(
                "Vote direction must be 1 or -1, got {}",
                other
            ))),
        }
    }
}

impl FromStr for Direction {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "upvote" | "1" | "+1" => Ok(Direction::Up),
            "down" | "downvote" | "-1" => Ok(Direction::Down),
            other => Err(AppError::InvalidState(format!("Malformed vote direction: {:?}", other))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parsing() {
        assert_eq!(Direction::try_from(1i64).unwrap(), Direction::Up);
        assert_eq!(Direction::try_from(-1i64).unwrap(), Direction::Down);
        assert!(matches!(Direction::try_from(0i64), Err(AppError::InvalidState(_))));
        assert!(matches!(Direction::try_from(5i64), Err(AppError::InvalidState(_))));

        assert_eq!("UP".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!("-1".parse::<Direction>().unwrap(), Direction::Down);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(Direction::Up.opposite(), Direction::Down);
    }

    #[test]
    fn test_malformed_ids_are_invalid_state() {
        assert_eq!("17".parse::<CommentId>().unwrap(), CommentId(17));
        assert!(matches!("abc".parse::<CommentId>(), Err(AppError::InvalidState(_))));
        assert!(matches!(TargetRef::parse("post", "1.5"), Err(AppError::InvalidState(_))));
        assert!(matches!(TargetRef::parse("forum", "1"), Err(AppError::InvalidState(_))));
        assert_eq!(
            TargetRef::parse("Comment", " 9 ").unwrap(),
            TargetRef::comment(CommentId(9))
        );
    }

    #[test]
    fn test_seconds_since_clamps() {
        let created = Timestamp(10_000);
        assert_eq!(Timestamp(12_500).seconds_since(created), 2.5);
        assert_eq!(Timestamp(9_000).seconds_since(created), 0.0);
    }
}
