//! TokenCache behavior through the public API

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use authgate::auth::{AuthResult, TokenCache};

async fn verify(cache: &TokenCache<AuthResult>, key: &str, calls: &AtomicUsize) -> AuthResult {
    let group = key.to_string();
    cache
        .get_or_verify(key, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            AuthResult::success(Some(group), None)
        })
        .await
}

#[tokio::test]
async fn least_recently_used_entry_is_evicted() {
    let cache = TokenCache::new(Duration::from_secs(300), 2).unwrap();
    let calls = AtomicUsize::new(0);

    verify(&cache, "A", &calls).await;
    verify(&cache, "B", &calls).await;
    verify(&cache, "A", &calls).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    verify(&cache, "C", &calls).await;
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.stats().evictions, 1);

    // A and C are still cached
    let a = verify(&cache, "A", &calls).await;
    verify(&cache, "C", &calls).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(a.group_id(), Some("A"));

    // B was evicted and must be revalidated
    verify(&cache, "B", &calls).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn failures_are_never_cached() {
    let cache = TokenCache::new(Duration::from_secs(300), 10).unwrap();
    let calls = AtomicUsize::new(0);
    let counter = &calls;

    for _ in 0..3 {
        let result = cache
            .get_or_verify("bad", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                AuthResult::failure("Invalid token")
            })
            .await;
        assert!(!result.is_valid());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(cache.is_empty());
}

#[test]
fn keys_are_digests_not_credentials() {
    let key = TokenCache::<AuthResult>::cache_key("super-secret-token");
    assert_eq!(key.len(), 44);
    assert!(!key.contains("super-secret-token"));
    assert_eq!(key, TokenCache::<AuthResult>::cache_key("super-secret-token"));
    assert_ne!(key, TokenCache::<AuthResult>::cache_key("super-secret-token2"));
}
