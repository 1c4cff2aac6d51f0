/// Read-through caching over [`Cache`](crate::db::Cache).
///
/// Returns the cached value for `$key` when present. Otherwise awaits `$block` and returns its
/// result. `$ttl` is called with that result and yields the seconds it may live in the cache;
/// `None` skips the write. Errors from the cache lookup or the block are propagated with `?`.
///
/// ```rust,ignore
/// let issued: AppResult<IssuedToken> = cached!(
///     cache,
///     CacheKey::AccessToken(user_id.clone()),
///     |issued: &IssuedToken| issued.cache_ttl,
///     load_token(&user_id)
/// );
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        let key = $key;
        if let Some(cached) = $cache.get_from_cache(&key).await? {
            Ok(cached)
        } else {
            let value = $block.await?;
            if let Some(ttl) = ($ttl)(&value) {
                $cache.set_in_background(&key, &value, ttl);
            }
            Ok(value)
        }
    }};
}
