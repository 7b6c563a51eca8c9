use anyhow::{Result, anyhow};
use autoscale_cuckoo_filter::CuckooFilter;
use futures::StreamExt;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::sync::RwLock;

/// Expected number of accounts and false-positive rate.
const FILTER_CAPACITY: usize = 20_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

static LOGIN_FILTER: Lazy<RwLock<CuckooFilter<String>>> =
    Lazy::new(|| RwLock::new(CuckooFilter::new(FILTER_CAPACITY, FALSE_POSITIVE_RATE)));

#[inline]
pub fn normalize(login_name: &str) -> String {
    login_name.trim().to_lowercase()
}

/// Whether a login name might be taken (false positives possible).
pub fn might_exist(login_name: &str) -> bool {
    let login_name = normalize(login_name);
    match LOGIN_FILTER.read() {
        Ok(filter) => filter.contains(&login_name),
        // a poisoned filter cannot rule anything out
        Err(_) => true,
    }
}

pub fn insert(login_name: &str) {
    let login_name = normalize(login_name);
    if let Ok(mut filter) = LOGIN_FILTER.write() {
        filter.add(&login_name);
    }
}

pub fn remove(login_name: &str) {
    let login_name = normalize(login_name);
    if let Ok(mut filter) = LOGIN_FILTER.write() {
        filter.remove(&login_name);
    }
}

/// Loads every login name into the filter, streaming in batches.
pub async fn warmup_login_filter(pool: &MySqlPool, batch_size: usize) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (String,)>("SELECT login_name FROM users").fetch(pool);

    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0usize;

    while let Some(row) = stream.next().await {
        let (login_name,) = row.map_err(|e| anyhow!("DB row fetch failed: {}", e))?;

        batch.push(normalize(&login_name));
        total += 1;

        if batch.len() == batch_size {
            insert_batch(&batch)?;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        insert_batch(&batch)?;
    }

    log::info!("Login filter warmup complete: {} users", total);
    Ok(())
}

fn insert_batch(login_names: &[String]) -> Result<()> {
    let mut filter = LOGIN_FILTER
        .write()
        .map_err(|_| anyhow!("login filter poisoned"))?;

    for login_name in login_names {
        filter.add(login_name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_names_are_found_case_insensitively() {
        insert("Filter.Test.User");
        assert!(might_exist("filter.test.user"));
        assert!(might_exist("  FILTER.TEST.USER "));
        remove("filter.test.user");
        assert!(!might_exist("filter.test.user"));
    }

    #[test]
    fn unseen_name_is_a_fast_negative() {
        assert!(!might_exist("never-registered-7f3a"));
    }
}
