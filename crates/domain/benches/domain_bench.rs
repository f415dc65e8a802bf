use chrono::Utc;
use common::{NewApplyPost, NewPost, PostFilter, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{PostService, ServiceConfig};
use storage::{InMemoryStore, PostStore, Store, Transaction};

fn new_post() -> NewPost {
    NewPost {
        title: "Bench trip".to_string(),
        content: "Benchmark content".to_string(),
        fishing_spot_type_id: 1,
        prefecture_id: 1,
        meeting_place_id: "bench".to_string(),
        meeting_at: Utc::now(),
        max_apply: 1_000_000,
        user_id: UserId::new(1),
        fish_type_ids: vec![1, 2, 3],
    }
}

async fn seeded_service(posts: usize) -> PostService<InMemoryStore> {
    let store = InMemoryStore::new();
    let mut tx = store.begin().await.unwrap();
    for _ in 0..posts {
        tx.create_post(new_post(), Utc::now()).await.unwrap();
    }
    tx.commit().await.unwrap();
    PostService::new(store, ServiceConfig::default())
}

fn bench_list_posts(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = rt.block_on(seeded_service(1_000));
    let filter = PostFilter::default();

    c.bench_function("domain/list_posts_first_page", |b| {
        b.iter(|| {
            rt.block_on(async {
                service.list_posts(&filter, Some(20), None).await.unwrap();
            });
        });
    });
}

fn bench_create_apply_post(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = rt.block_on(seeded_service(1));
    let post_id = rt.block_on(async {
        service
            .list_posts(&PostFilter::default(), None, None)
            .await
            .unwrap()
            .posts[0]
            .id
    });
    let mut user = 1_000;

    c.bench_function("domain/create_apply_post", |b| {
        b.iter(|| {
            user += 1;
            rt.block_on(async {
                service
                    .create_apply_post(NewApplyPost {
                        post_id,
                        user_id: UserId::new(user),
                    })
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_list_posts, bench_create_apply_post);
criterion_main!(benches);
