use anyhow::Result;
use futures_util::StreamExt;
use moka::future::Cache;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::time::Duration;

use super::login_filter::normalize;

/// true  => login name is TAKEN
/// Only taken names are stored.
pub static LOGIN_CACHE: Lazy<Cache<String, bool>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(50_000)
        .time_to_live(Duration::from_secs(86400)) // 24h TTL
        .build()
});

pub async fn mark_taken(login_name: &str) {
    LOGIN_CACHE.insert(normalize(login_name), true).await;
}

pub async fn forget(login_name: &str) {
    LOGIN_CACHE.invalidate(&normalize(login_name)).await;
}

pub async fn is_taken(login_name: &str) -> bool {
    LOGIN_CACHE
        .get(&normalize(login_name))
        .await
        .unwrap_or(false)
}

async fn batch_mark(login_names: &[String]) {
    let futures: Vec<_> = login_names
        .iter()
        .map(|u| LOGIN_CACHE.insert(normalize(u), true))
        .collect();

    futures::future::join_all(futures).await;
}

/// Loads the login names of recently active users into the cache.
pub async fn warmup_login_cache(pool: &MySqlPool, days: u32, batch_size: usize) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (String,)>(
        r#"
        SELECT login_name
        FROM users
        WHERE last_login_at >= NOW() - INTERVAL ? DAY
        ORDER BY last_login_at DESC
        "#,
    )
    .bind(days)
    .fetch(pool);

    let mut batch = Vec::with_capacity(batch_size);
    let mut total_count = 0usize;

    while let Some(row) = stream.next().await {
        let (login_name,) = row?;
        batch.push(login_name);
        total_count += 1;

        if batch.len() >= batch_size {
            batch_mark(&batch).await;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        batch_mark(&batch).await;
    }

    log::info!(
        "Login cache warmup complete: {} recent users (last {} days)",
        total_count,
        days
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn marks_and_forgets() {
        assert!(!is_taken("cache.test.user").await);
        mark_taken("Cache.Test.User").await;
        assert!(is_taken("cache.test.user").await);
        forget("cache.test.user").await;
        assert!(!is_taken("cache.test.user").await);
    }
}
