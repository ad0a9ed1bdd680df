use forum_ranking::core::{
    Actor, Comment, CommentId, Direction, NewComment, NewPost, Post, PostId, TargetRef,
};
use forum_ranking::engine::comment_tree::count_nodes;
use forum_ranking::{AppError, CommentNode, CommentSort, VotingEngine};

struct Thread {
    engine: VotingEngine,
    author: Actor,
    post: Post,
}

impl Thread {
    async fn new() -> Self {
        let engine = VotingEngine::in_memory().await.unwrap();
        let author = engine.register_actor("author").await.unwrap();
        let post = engine
            .create_post(NewPost {
                creator_id: author.id,
                title: "Threaded".into(),
                body: None,
            })
            .await
            .unwrap();
        Self { engine, author, post }
    }

    async fn reply(&self, parent: Option<&Comment>, content: &str) -> Comment {
        self.engine
            .create_comment(NewComment {
                post_id: self.post.id,
                parent_id: parent.map(|c| c.id),
                creator_id: self.author.id,
                content: content.into(),
            })
            .await
            .unwrap()
    }

    async fn child_count(&self, comment: &Comment) -> i64 {
        self.engine
            .get_aggregate(TargetRef::comment(comment.id))
            .await
            .unwrap()
            .child_count
    }

    async fn comment_count(&self) -> i64 {
        self.engine
            .get_aggregate(TargetRef::post(self.post.id))
            .await
            .unwrap()
            .comment_count
    }
}

fn contents(nodes: &[CommentNode]) -> Vec<&str> {
    nodes.iter().map(|n| n.content.as_str()).collect()
}

#[tokio::test]
async fn test_counters_follow_creation_and_deletion() {
    let thread = Thread::new().await;
    let root = thread.reply(None, "root").await;
    let a = thread.reply(Some(&root), "a").await;
    let b = thread.reply(Some(&root), "b").await;
    let _nested = thread.reply(Some(&a), "nested").await;

    assert_eq!(thread.child_count(&root).await, 2);
    assert_eq!(thread.child_count(&a).await, 1);
    assert_eq!(thread.child_count(&b).await, 0);
    assert_eq!(thread.comment_count().await, 4);

    let deleted = thread.engine.delete_comment(b.id).await.unwrap();
    assert_eq!(deleted.id, b.id);
    assert_eq!(thread.child_count(&root).await, 1);
    assert_eq!(thread.comment_count().await, 3);
    assert!(matches!(
        thread.engine.get_aggregate(TargetRef::comment(b.id)).await,
        Err(AppError::NotFound(_))
    ));

    let metrics = thread.engine.metrics();
    assert_eq!((metrics.comments_created, metrics.comments_deleted), (4, 1));
}

#[tokio::test]
async fn test_profile_counts() {
    let thread = Thread::new().await;
    let root = thread.reply(None, "root").await;
    thread.reply(Some(&root), "reply").await;

    let profile = thread.engine.profile_aggregate(thread.author.id).await.unwrap();
    assert_eq!((profile.post_count, profile.comment_count), (1, 2));

    thread.engine.delete_comment(root.id).await.unwrap();
    let profile = thread.engine.profile_aggregate(thread.author.id).await.unwrap();
    assert_eq!(profile.comment_count, 1);

    let stranger = thread.engine.register_actor("lurker").await.unwrap();
    let empty = thread.engine.profile_aggregate(stranger.id).await.unwrap();
    assert_eq!((empty.post_count, empty.comment_count), (0, 0));
}

#[tokio::test]
async fn test_comment_validation() {
    let thread = Thread::new().await;
    let other_post = thread
        .engine
        .create_post(NewPost {
            creator_id: thread.author.id,
            title: "Elsewhere".into(),
            body: None,
        })
        .await
        .unwrap();
    let root = thread.reply(None, "root").await;

    let wrong_post = thread
        .engine
        .create_comment(NewComment {
            post_id: other_post.id,
            parent_id: Some(root.id),
            creator_id: thread.author.id,
            content: "misplaced".into(),
        })
        .await;
    assert!(matches!(wrong_post, Err(AppError::InvalidState(_))));

    let missing_parent = thread
        .engine
        .create_comment(NewComment {
            post_id: thread.post.id,
            parent_id: Some(CommentId(404)),
            creator_id: thread.author.id,
            content: "lost".into(),
        })
        .await;
    assert!(matches!(missing_parent, Err(AppError::NotFound(_))));

    let missing_post = thread
        .engine
        .create_comment(NewComment {
            post_id: PostId(404),
            parent_id: None,
            creator_id: thread.author.id,
            content: "nowhere".into(),
        })
        .await;
    assert!(matches!(missing_post, Err(AppError::NotFound(_))));

    // Rejected writes leave no trace
    assert_eq!(thread.comment_count().await, 1);
    assert_eq!(thread.child_count(&root).await, 0);
    assert!(matches!(
        thread.engine.delete_comment(CommentId(404)).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_tree_for_post() {
    let thread = Thread::new().await;
    let first = thread.reply(None, "first").await;
    let second = thread.reply(None, "second").await;
    let reply = thread.reply(Some(&first), "reply").await;
    thread.reply(Some(&reply), "deep").await;

    let voter = thread.engine.register_actor("voter").await.unwrap();
    thread
        .engine
        .cast_vote(voter.id, TargetRef::comment(second.id), Direction::Up)
        .await
        .unwrap();

    let oldest = thread.engine.comment_tree(thread.post.id, CommentSort::Old).await.unwrap();
    assert_eq!(contents(&oldest), vec!["first", "second"]);
    assert_eq!(contents(&oldest[0].children), vec!["reply"]);
    assert_eq!(contents(&oldest[0].children[0].children), vec!["deep"]);
    assert_eq!(oldest[0].children[0].children[0].depth, 2);
    assert_eq!(count_nodes(&oldest), 4);

    let top = thread.engine.comment_tree(thread.post.id, CommentSort::Top).await.unwrap();
    assert_eq!(contents(&top), vec!["second", "first"]);
    assert_eq!(top[0].aggregate.score, 1);
    assert_eq!(top[1].aggregate.child_count, 1);

    assert!(matches!(
        thread.engine.comment_tree(PostId(404), CommentSort::New).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_deleted_parent_leaves_orphan_root() {
    let thread = Thread::new().await;
    let parent = thread.reply(None, "parent").await;
    let child = thread.reply(Some(&parent), "child").await;

    let voter = thread.engine.register_actor("voter").await.unwrap();
    let parent_target = TargetRef::comment(parent.id);
    thread.engine.cast_vote(voter.id, parent_target, Direction::Down).await.unwrap();

    thread.engine.delete_comment(parent.id).await.unwrap();
    assert_eq!(thread.engine.get_vote(voter.id, parent_target).await.unwrap(), None);

    let forest = thread.engine.comment_tree(thread.post.id, CommentSort::New).await.unwrap();
    assert_eq!(forest.len(), 1);
    assert_eq!(forest[0].id, child.id);
    assert_eq!(forest[0].parent_id, Some(parent.id));
    assert_eq!(forest[0].depth, 0);
}

#[tokio::test]
async fn test_voting_on_comment_keeps_child_count() {
    let thread = Thread::new().await;
    let root = thread.reply(None, "root").await;
    thread.reply(Some(&root), "reply").await;

    let outcome = thread
        .engine
        .cast_vote(thread.author.id, TargetRef::comment(root.id), Direction::Up)
        .await
        .unwrap();
    assert_eq!(outcome.aggregate.child_count, 1);
    assert_eq!(outcome.aggregate.upvotes, 1);
    assert!(outcome.aggregate.hot_rank > 0.0);
    assert_eq!(outcome.aggregate.controversy_rank, 0.0);
}

#[tokio::test]
async fn test_delete_post_cascades_to_comments_and_counters() {
    let thread = Thread::new().await;
    let commenter = thread.engine.register_actor("commenter").await.unwrap();
    let root = thread.reply(None, "root").await;
    let theirs = thread
        .engine
        .create_comment(NewComment {
            post_id: thread.post.id,
            parent_id: Some(root.id),
            creator_id: commenter.id,
            content: "reply".into(),
        })
        .await
        .unwrap();

    let post_target = TargetRef::post(thread.post.id);
    let reply_target = TargetRef::comment(theirs.id);
    thread.engine.cast_vote(commenter.id, post_target, Direction::Up).await.unwrap();
    thread.engine.cast_vote(thread.author.id, reply_target, Direction::Down).await.unwrap();

    // A comment elsewhere by the same commenter stays counted
    let survivor = thread
        .engine
        .create_post(NewPost {
            creator_id: thread.author.id,
            title: "Survivor".into(),
            body: None,
        })
        .await
        .unwrap();
    thread
        .engine
        .create_comment(NewComment {
            post_id: survivor.id,
            parent_id: None,
            creator_id: commenter.id,
            content: "still here".into(),
        })
        .await
        .unwrap();

    let author_before = thread.engine.profile_aggregate(thread.author.id).await.unwrap();
    assert_eq!((author_before.post_count, author_before.comment_count), (2, 1));
    let commenter_before = thread.engine.profile_aggregate(commenter.id).await.unwrap();
    assert_eq!((commenter_before.post_count, commenter_before.comment_count), (0, 2));

    let removal = thread.engine.delete_post(thread.post.id).await.unwrap();
    assert_eq!(removal.post_id, thread.post.id);
    assert_eq!((removal.comments_removed, removal.votes_removed), (2, 2));

    let author = thread.engine.profile_aggregate(thread.author.id).await.unwrap();
    assert_eq!((author.post_count, author.comment_count), (1, 0));
    let commenter_after = thread.engine.profile_aggregate(commenter.id).await.unwrap();
    assert_eq!((commenter_after.post_count, commenter_after.comment_count), (0, 1));

    for target in [post_target, reply_target, TargetRef::comment(root.id)] {
        assert!(matches!(
            thread.engine.get_aggregate(target).await,
            Err(AppError::NotFound(_))
        ));
    }
    assert_eq!(thread.engine.get_vote(commenter.id, post_target).await.unwrap(), None);
    assert_eq!(thread.engine.get_vote(thread.author.id, reply_target).await.unwrap(), None);
    assert!(matches!(
        thread.engine.comment_tree(thread.post.id, CommentSort::New).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        thread.engine.create_comment(NewComment {
            post_id: thread.post.id,
            parent_id: None,
            creator_id: commenter.id,
            content: "too late".into(),
        })
        .await,
        Err(AppError::NotFound(_))
    ));

    let survivor_aggregate = thread.engine.get_aggregate(TargetRef::post(survivor.id)).await.unwrap();
    assert_eq!(survivor_aggregate.comment_count, 1);

    assert!(matches!(
        thread.engine.delete_post(thread.post.id).await,
        Err(AppError::NotFound(_))
    ));
    assert_eq!(thread.engine.metrics().posts_deleted, 1);
}
