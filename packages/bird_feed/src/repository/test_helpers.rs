use sqlx::sqlite::SqlitePoolOptions;

/// Create a fresh FeedRepository backed by an in-memory SQLite database.
/// Each call returns an isolated database with all migrations applied.
pub async fn test_repository() -> super::FeedRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    crate::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    super::FeedRepository::new(pool)
}

/// Index a post with fixed metadata.
pub async fn seed_post(repo: &super::FeedRepository, did: &str, rkey: &str) {
    let uri = format!("https://bsky.app/profile/{}/post/{}", did, rkey);
    repo.insert_post(did, rkey, &uri, false, 0.9)
        .await
        .expect("Failed to seed post");
}
