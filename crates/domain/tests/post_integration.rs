//! Integration tests for the post service.
//!
//! These tests drive the service end to end on the in-memory store,
//! covering ownership, pagination and the max-apply capacity invariant.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{
    ApplyPostId, NewApplyPost, NewPost, Post, PostFilter, PostId, PostUpdate, SortBy, UserId,
};
use domain::{DomainError, MAX_PAGE_SIZE, PostError, PostService, ServiceConfig, page_token};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use storage::{ApplyPostStore, FailPoint, InMemoryStore, PostStore, Store, Transaction};

const OWNER: i64 = 7;

fn create_service() -> PostService<InMemoryStore> {
    PostService::new(InMemoryStore::new(), ServiceConfig::default())
}

fn new_post(max_apply: i64) -> NewPost {
    NewPost {
        title: "Sea bream from the rocks".to_string(),
        content: "Meet at the parking lot".to_string(),
        fishing_spot_type_id: 1,
        prefecture_id: 22,
        meeting_place_id: "lot-b".to_string(),
        meeting_at: Utc::now() + chrono::Duration::days(2),
        max_apply,
        user_id: UserId::new(OWNER),
        fish_type_ids: vec![3, 5],
    }
}

async fn seed_post(store: &InMemoryStore, max_apply: i64) -> Post {
    let mut tx = store.begin().await.unwrap();
    let post = tx.create_post(new_post(max_apply), Utc::now()).await.unwrap();
    tx.commit().await.unwrap();
    post
}

fn update_of(post: &Post, user_id: i64) -> PostUpdate {
    PostUpdate {
        id: post.id,
        user_id: UserId::new(user_id),
        title: "Sea bream, revised".to_string(),
        content: post.content.clone(),
        fishing_spot_type_id: post.fishing_spot_type_id,
        prefecture_id: post.prefecture_id,
        meeting_place_id: post.meeting_place_id.clone(),
        meeting_at: post.meeting_at,
        max_apply: post.max_apply,
        fish_type_ids: vec![5, 5, 8],
    }
}

/// Records metrics on the current thread until the guard is dropped.
fn local_metrics(recorder: &PrometheusRecorder) -> metrics::LocalRecorderGuard<'_> {
    metrics::set_default_local_recorder(recorder)
}

fn counter(handle: &PrometheusHandle, name: &str) -> Option<u64> {
    handle.render().lines().find_map(|line| {
        let value = line.strip_prefix(name)?.strip_prefix(' ')?;
        value.trim().parse().ok()
    })
}

fn apply(post_id: PostId, user_id: i64) -> NewApplyPost {
    NewApplyPost {
        post_id,
        user_id: UserId::new(user_id),
    }
}

mod posts {
    use super::*;

    #[tokio::test]
    async fn get_missing_post_is_not_found() {
        let service = create_service();
        let err = service.get_post(PostId::new(1)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn owner_can_update_post() {
        let service = create_service();
        let post = seed_post(service.store(), 3).await;

        let updated = service.update_post(update_of(&post, OWNER)).await.unwrap();
        assert_eq!(updated.title, "Sea bream, revised");
        assert_eq!(updated.fish_type_ids, vec![5, 8]);
        assert_eq!(updated.created_at, post.created_at);

        let loaded = service.get_post(post.id).await.unwrap();
        assert_eq!(loaded, updated);
    }

    #[tokio::test]
    async fn stranger_cannot_update_post() {
        let service = create_service();
        let post = seed_post(service.store(), 3).await;

        let err = service.update_post(update_of(&post, 99)).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::Post(PostError::PermissionDenied { .. })
        ));
        assert_eq!(service.get_post(post.id).await.unwrap(), post);
    }

    #[tokio::test]
    async fn update_validates_input() {
        let service = create_service();
        let post = seed_post(service.store(), 3).await;

        let mut update = update_of(&post, OWNER);
        update.title.clear();
        let err = service.update_post(update).await.unwrap_err();
        assert!(matches!(err, DomainError::Post(PostError::EmptyTitle)));
    }

    #[tokio::test]
    async fn max_apply_cannot_drop_below_applicants() {
        let service = create_service();
        let post = seed_post(service.store(), 3).await;
        service.create_apply_post(apply(post.id, 1)).await.unwrap();
        service.create_apply_post(apply(post.id, 2)).await.unwrap();

        let mut update = update_of(&post, OWNER);
        update.max_apply = 1;
        let err = service.update_post(update).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::Post(PostError::MaxApplyBelowApplicants {
                max_apply: 1,
                applicants: 2
            })
        ));

        let mut update = update_of(&post, OWNER);
        update.max_apply = 2;
        assert_eq!(service.update_post(update).await.unwrap().max_apply, 2);
    }

    #[tokio::test]
    async fn update_racing_with_application_is_reverted() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _metrics = local_metrics(&recorder);

        let service = create_service();
        let post = seed_post(service.store(), 3).await;
        service.create_apply_post(apply(post.id, 100)).await.unwrap();

        // Another user applies right after the update commits.
        let racer = service.store().clone();
        service.store().after_next_commit(async move {
            let mut tx = racer.begin().await.unwrap();
            tx.create_apply_post(apply(post.id, 101), Utc::now())
                .await
                .unwrap();
            tx.commit().await.unwrap();
        });

        let mut update = update_of(&post, OWNER);
        update.max_apply = 1;
        let err = service.update_post(update).await.unwrap_err();
        assert!(matches!(
            err,
            DomainError::Post(PostError::MaxApplyBelowApplicants {
                max_apply: 1,
                applicants: 2
            })
        ));

        let loaded = service.get_post(post.id).await.unwrap();
        assert_eq!(loaded.max_apply, 3);
        assert_eq!(loaded.title, post.title);
        assert_eq!(counter(&handle, "post_update_compensations_total"), Some(1));
    }

    #[tokio::test]
    async fn failed_update_leaves_post_untouched() {
        let service = create_service();
        let post = seed_post(service.store(), 3).await;

        service.store().fail_on(FailPoint::Commit);
        let err = service.update_post(update_of(&post, OWNER)).await.unwrap_err();
        assert!(matches!(err, DomainError::Store(_)));
        assert_eq!(service.get_post(post.id).await.unwrap(), post);
    }

    #[tokio::test]
    async fn only_owner_can_delete_post() {
        let service = create_service();
        let post = seed_post(service.store(), 3).await;
        service.create_apply_post(apply(post.id, 1)).await.unwrap();

        let err = service
            .delete_post(post.id, UserId::new(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Post(PostError::PermissionDenied { .. })
        ));

        service
            .delete_post(post.id, UserId::new(OWNER))
            .await
            .unwrap();
        assert!(service.get_post(post.id).await.unwrap_err().is_not_found());
        assert!(
            service
                .list_apply_posts_by_post_id(post.id)
                .await
                .unwrap()
                .is_empty()
        );
    }
}

mod listing {
    use super::*;

    #[tokio::test]
    async fn pages_follow_next_token_until_exhausted() {
        let service = create_service();
        for _ in 0..5 {
            seed_post(service.store(), 3).await;
        }
        let filter = PostFilter::default();

        let page = service.list_posts(&filter, Some(2), None).await.unwrap();
        let ids: Vec<i64> = page.posts.iter().map(|p| p.id.as_i64()).collect();
        assert_eq!(ids, vec![5, 4]);
        let token = page.next_page_token.unwrap();
        assert_eq!(page_token::decode(&token).unwrap(), PostId::new(4));

        let page = service
            .list_posts(&filter, Some(2), Some(&token))
            .await
            .unwrap();
        let ids: Vec<i64> = page.posts.iter().map(|p| p.id.as_i64()).collect();
        assert_eq!(ids, vec![3, 2]);

        let token = page.next_page_token.unwrap();
        let page = service
            .list_posts(&filter, Some(2), Some(&token))
            .await
            .unwrap();
        let ids: Vec<i64> = page.posts.iter().map(|p| p.id.as_i64()).collect();
        assert_eq!(ids, vec![1]);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn exact_page_has_no_next_token() {
        let service = create_service();
        seed_post(service.store(), 3).await;
        seed_post(service.store(), 3).await;

        let page = service
            .list_posts(&PostFilter::default(), Some(2), None)
            .await
            .unwrap();
        assert_eq!(page.posts.len(), 2);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn default_page_size_comes_from_config() {
        let config = ServiceConfig {
            default_page_size: 3,
            ..ServiceConfig::default()
        };
        let service = PostService::new(InMemoryStore::new(), config);
        for _ in 0..4 {
            seed_post(service.store(), 3).await;
        }

        let page = service
            .list_posts(&PostFilter::default(), None, Some(""))
            .await
            .unwrap();
        assert_eq!(page.posts.len(), 3);
        assert!(page.next_page_token.is_some());
    }

    #[tokio::test]
    async fn bad_page_requests_are_rejected() {
        let service = create_service();
        seed_post(service.store(), 3).await;
        let filter = PostFilter::default();

        let err = service
            .list_posts(&filter, Some(-1), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Post(PostError::InvalidPageSize { page_size: -1 })
        ));

        let err = service
            .list_posts(&filter, None, Some("!!"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidPageToken(_)));

        let stale = page_token::encode(PostId::new(42));
        let by_meeting_at = PostFilter {
            sort_by: SortBy::MeetingAt,
            ..PostFilter::default()
        };
        let err = service
            .list_posts(&by_meeting_at, None, Some(&stale))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidPageToken(_)));
    }

    #[tokio::test]
    async fn oversized_page_is_rejected() {
        let service = create_service();
        seed_post(service.store(), 3).await;
        let filter = PostFilter::default();

        for page_size in [MAX_PAGE_SIZE + 1, i64::MAX] {
            let err = service
                .list_posts(&filter, Some(page_size), None)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                DomainError::Post(PostError::InvalidPageSize { page_size: n }) if n == page_size
            ));
        }

        let page = service
            .list_posts(&filter, Some(MAX_PAGE_SIZE), None)
            .await
            .unwrap();
        assert_eq!(page.posts.len(), 1);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn next_page_survives_deleted_cursor_post() {
        let service = create_service();
        for _ in 0..3 {
            seed_post(service.store(), 3).await;
        }
        let filter = PostFilter::default();

        let page = service.list_posts(&filter, Some(1), None).await.unwrap();
        let last = page.posts[0].clone();
        let token = page.next_page_token.unwrap();
        service
            .delete_post(last.id, last.user_id)
            .await
            .unwrap();

        let page = service
            .list_posts(&filter, Some(1), Some(&token))
            .await
            .unwrap();
        let ids: Vec<i64> = page.posts.iter().map(|p| p.id.as_i64()).collect();
        assert_eq!(ids, vec![2]);
        assert!(page.next_page_token.is_some());
    }
}

mod apply_posts {
    use super::*;

    #[tokio::test]
    async fn owner_cannot_apply_to_own_post() {
        let service = create_service();
        let post = seed_post(service.store(), 3).await;

        let err = service
            .create_apply_post(apply(post.id, OWNER))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Post(PostError::SelfApplication { .. })
        ));
        assert_eq!(service.store().apply_post_count().await, 0);
    }

    #[tokio::test]
    async fn full_post_refuses_applications() {
        let service = create_service();
        let post = seed_post(service.store(), 1).await;
        service.create_apply_post(apply(post.id, 1)).await.unwrap();

        let err = service
            .create_apply_post(apply(post.id, 2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Post(PostError::MaxApplyReached { max_apply: 1, .. })
        ));
    }

    #[tokio::test]
    async fn applying_to_missing_post_is_not_found() {
        let service = create_service();
        let err = service
            .create_apply_post(apply(PostId::new(9), 1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn concurrent_applications_never_exceed_max_apply() {
        let service = Arc::new(create_service());
        let post = seed_post(service.store(), 3).await;

        let mut handles = Vec::new();
        for user in 100..110 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service.create_apply_post(apply(post.id, user)).await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(DomainError::Post(PostError::MaxApplyReached { .. })) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(accepted, 3);
        let remaining = service.list_apply_posts_by_post_id(post.id).await.unwrap();
        assert_eq!(remaining.len(), 3);
    }

    #[tokio::test]
    async fn application_over_capacity_after_commit_is_removed() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _metrics = local_metrics(&recorder);

        let service = create_service();
        let post = seed_post(service.store(), 2).await;
        service.create_apply_post(apply(post.id, 100)).await.unwrap();

        // The owner shrinks the post right after this application commits.
        let racer = service.store().clone();
        service.store().after_next_commit(async move {
            let mut tx = racer.begin().await.unwrap();
            let mut post = tx.get_post(post.id).await.unwrap();
            post.max_apply = 1;
            tx.update_post(&post).await.unwrap();
            tx.commit().await.unwrap();
        });

        let err = service
            .create_apply_post(apply(post.id, 101))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Post(PostError::MaxApplyReached { max_apply: 1, .. })
        ));

        let remaining = service.list_apply_posts_by_post_id(post.id).await.unwrap();
        let users: Vec<i64> = remaining.iter().map(|a| a.user_id.as_i64()).collect();
        assert_eq!(users, vec![100]);
        assert_eq!(counter(&handle, "apply_post_compensations_total"), Some(1));
        assert_eq!(counter(&handle, "apply_posts_created_total"), Some(1));
    }

    #[tokio::test]
    async fn queries_by_user_post_and_batch() {
        let service = create_service();
        let first = seed_post(service.store(), 3).await;
        let second = seed_post(service.store(), 3).await;
        service.create_apply_post(apply(first.id, 1)).await.unwrap();
        service.create_apply_post(apply(first.id, 2)).await.unwrap();
        let mine = service.create_apply_post(apply(second.id, 1)).await.unwrap();

        assert_eq!(service.get_apply_post(mine.id).await.unwrap(), mine);
        assert_eq!(
            service
                .list_apply_posts_by_user_id(UserId::new(1))
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            service
                .list_apply_posts_by_post_id(first.id)
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            service
                .batch_get_apply_posts_by_post_ids(&[first.id, second.id])
                .await
                .unwrap()
                .len(),
            3
        );
        assert!(
            service
                .batch_get_apply_posts_by_post_ids(&[])
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn only_applicant_can_withdraw() {
        let service = create_service();
        let post = seed_post(service.store(), 3).await;
        let application = service.create_apply_post(apply(post.id, 1)).await.unwrap();

        let err = service
            .delete_apply_post(application.id, UserId::new(OWNER))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Post(PostError::PermissionDenied { .. })
        ));

        service
            .delete_apply_post(application.id, UserId::new(1))
            .await
            .unwrap();
        let err = service
            .get_apply_post(application.id)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn deleting_missing_application_is_not_found() {
        let service = create_service();
        let err = service
            .delete_apply_post(ApplyPostId::new(3), UserId::new(1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}

mod timeouts {
    use super::*;

    #[tokio::test]
    async fn operation_times_out_while_store_is_busy() {
        let config = ServiceConfig {
            timeout: Duration::from_millis(50),
            ..ServiceConfig::default()
        };
        let service = PostService::new(InMemoryStore::new(), config);
        let post = seed_post(service.store(), 3).await;

        let held = service.store().begin().await.unwrap();
        let err = service.get_post(post.id).await.unwrap_err();
        assert!(matches!(err, DomainError::Timeout(_)));

        drop(held);
        assert_eq!(service.get_post(post.id).await.unwrap(), post);
    }
}
