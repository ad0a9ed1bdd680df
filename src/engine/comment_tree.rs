//! Comment Tree Builder: turns a flat comment list into a reply forest.
//!
//! Construction is map-and-link over indices, so thread depth never touches
//! the call stack. Dropping a finished tree is iterative too.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

use crate::core::{ActorId, Aggregate, Comment, CommentId, PostId, TargetRef, Timestamp};
use crate::engine::rank;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize)]
pub struct CommentNode {
    pub id: CommentId,
    pub post_id: PostId,
    pub parent_id: Option<CommentId>,
    pub creator_id: ActorId,
    pub content: String,
    pub created_at: Timestamp,
    /// Zero for roots, including orphans promoted to root
    pub depth: usize,
    pub aggregate: Aggregate,
    pub children: Vec<CommentNode>,
}

impl Drop for CommentNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// Sibling order for comment listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentSort {
    #[default]
    New,
    Old,
    Top,
    Hot,
    Controversial,
}

impl FromStr for CommentSort {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(CommentSort::New),
            "old" => Ok(CommentSort::Old),
            "top" => Ok(CommentSort::Top),
            "hot" => Ok(CommentSort::Hot),
            "controversial" => Ok(CommentSort::Controversial),
            other => Err(AppError::InvalidState(format!("Unknown comment sort {:?}", other))),
        }
    }
}

/// Key aggregates by comment id, skipping post rows.
pub fn index_aggregates(aggregates: Vec<Aggregate>) -> HashMap<CommentId, Aggregate> {
    aggregates
        .into_iter()
        .filter_map(|aggregate| aggregate.comment_id().map(|id| (id, aggregate)))
        .collect()
}

fn snapshot_for(comment: &Comment, aggregates: &HashMap<CommentId, Aggregate>) -> Aggregate {
    aggregates
        .get(&comment.id)
        .cloned()
        .unwrap_or_else(|| Aggregate::empty(TargetRef::comment(comment.id), comment.created_at))
}

/// Sort a flat list in place. Ties go to the newer comment, then the larger id.
pub fn sort_comments(
    comments: &mut [Comment],
    aggregates: &HashMap<CommentId, Aggregate>,
    sort: CommentSort,
    now: Timestamp,
) {
    let rank_of: fn(&Aggregate, Timestamp) -> f64 = match sort {
        CommentSort::New => {
            comments.sort_by(newest_first);
            return;
        }
        CommentSort::Old => {
            comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            return;
        }
        CommentSort::Top => |aggregate, _| aggregate.score as f64,
        CommentSort::Hot => rank::hot_rank_at,
        CommentSort::Controversial => |aggregate, _| aggregate.controversy_rank,
    };

    let ranks: HashMap<CommentId, f64> = comments
        .iter()
        .map(|c| (c.id, rank_of(&snapshot_for(c, aggregates), now)))
        .collect();
    let rank = |c: &Comment| ranks.get(&c.id).copied().unwrap_or(0.0);
    comments.sort_by(|a, b| rank(b).total_cmp(&rank(a)).then_with(|| newest_first(a, b)));
}

fn newest_first(a: &Comment, b: &Comment) -> Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

/// Sort a copy of `comments` by `sort`, then build the forest.
pub fn build_comment_tree(
    comments: &[Comment],
    aggregates: &HashMap<CommentId, Aggregate>,
    sort: CommentSort,
    now: Timestamp,
) -> AppResult<Vec<CommentNode>> {
    let mut ordered = comments.to_vec();
    sort_comments(&mut ordered, aggregates, sort, now);
    build(&ordered, aggregates)
}

/// Build the forest, keeping input order within every sibling group.
///
/// A comment whose parent is absent from `comments` becomes a root. A comment
/// that is its own parent, or whose parent link closes a cycle, is promoted to
/// root as well. Duplicate ids are rejected with `InvalidState`.
pub fn build(
    comments: &[Comment],
    aggregates: &HashMap<CommentId, Aggregate>,
) -> AppResult<Vec<CommentNode>> {
    let n = comments.len();

    let mut index: HashMap<CommentId, usize> = HashMap::with_capacity(n);
    for (i, comment) in comments.iter().enumerate() {
        if index.insert(comment.id, i).is_some() {
            return Err(AppError::InvalidState(format!(
                "Comment {} appears more than once",
                comment.id
            )));
        }
    }

    let mut parent: Vec<Option<usize>> = comments
        .iter()
        .enumerate()
        .map(|(i, comment)| {
            comment
                .parent_id
                .and_then(|p| index.get(&p).copied())
                .filter(|&p| p != i)
        })
        .collect();

    break_cycles(&mut parent);

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut roots = Vec::new();
    for (i, p) in parent.iter().enumerate() {
        match p {
            Some(p) => children[*p].push(i),
            None => roots.push(i),
        }
    }

    // Pre-order walk assigns depth; every child lands after its parent
    let mut depth = vec![0usize; n];
    let mut order = Vec::with_capacity(n);
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    while let Some(i) = stack.pop() {
        order.push(i);
        for &c in children[i].iter().rev() {
            depth[c] = depth[i] + 1;
            stack.push(c);
        }
    }

    // Reverse pre-order: children are finished before their parent
    let mut built: Vec<Option<CommentNode>> = (0..n).map(|_| None).collect();
    for &i in order.iter().rev() {
        let comment = &comments[i];
        let kids = children[i]
            .iter()
            .filter_map(|&c| built[c].take())
            .collect();
        built[i] = Some(CommentNode {
            id: comment.id,
            post_id: comment.post_id,
            parent_id: comment.parent_id,
            creator_id: comment.creator_id,
            content: comment.content.clone(),
            created_at: comment.created_at,
            depth: depth[i],
            aggregate: snapshot_for(comment, aggregates),
            children: kids,
        });
    }

    Ok(roots.iter().filter_map(|&r| built[r].take()).collect())
}

/// Cut the link that closes each parent cycle, making that node a root.
fn break_cycles(parent: &mut [Option<usize>]) {
    const UNSEEN: u8 = 0;
    const ON_PATH: u8 = 1;
    const DONE: u8 = 2;

    let mut state = vec![UNSEEN; parent.len()];
    let mut path = Vec::new();
    for start in 0..parent.len() {
        let mut current = start;
        while state[current] == UNSEEN {
            state[current] = ON_PATH;
            path.push(current);
            match parent[current] {
                Some(p) if state[p] == ON_PATH => {
                    parent[current] = None;
                    break;
                }
                Some(p) => current = p,
                None => break,
            }
        }
        for i in path.drain(..) {
            state[i] = DONE;
        }
    }
}

/// Total nodes in a forest.
pub fn count_nodes(forest: &[CommentNode]) -> usize {
    let mut count = 0;
    let mut stack: Vec<&CommentNode> = forest.iter().collect();
    while let Some(node) = stack.pop() {
        count += 1;
        stack.extend(node.children.iter());
    }
    count
}
