//! Deterministic, order-independent cache key construction.
//!
//! Two semantically equivalent requests must map to the same key — filter
//! maps are sorted by field name before they're folded into the key so
//! that JSON map iteration order never leaks through.

use std::collections::BTreeMap;

const PREFIX: &str = "search-api";

/// Builds the full `prefix:namespace:...` key for a search request.
///
/// `filters` is any iterable of `(field, value)` pairs; it is sorted by
/// field name internally, so callers may pass a `HashMap` without losing
/// determinism.
pub fn search_key<'a, I>(query: &str, page: u32, limit: u32, sort: &str, filters: I) -> String
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let sorted: BTreeMap<&str, String> = filters.into_iter().collect();
    let mut parts = vec![
        "search".to_string(),
        format!("q:{}", normalize_query(query)),
        format!("p:{page}"),
        format!("l:{limit}"),
        format!("sort:{}", if sort.is_empty() { "default" } else { sort }),
    ];
    for (field, value) in sorted {
        parts.push(format!("{field}:{value}"));
    }
    format!("{PREFIX}:{}", parts.join(":"))
}

pub fn trending_key(period: &str, limit: u32) -> String {
    format!("{PREFIX}:trending:{period}:limit:{limit}")
}

pub fn suggestions_key(query: &str, limit: u32) -> String {
    format!("{PREFIX}:suggestions:q:{}:limit:{limit}", normalize_query(query))
}

pub fn crypto_key(id: &str) -> String {
    format!("{PREFIX}:crypto:{id}")
}

pub fn filters_key() -> String {
    format!("{PREFIX}:filters:all")
}

fn normalize_query(query: &str) -> String {
    if query.trim().is_empty() {
        "*".to_string()
    } else {
        query.trim().to_lowercase()
    }
}

/// The epoch-invalidation namespace a full cache key belongs to: the
/// segment naming its namespace (`search`, `trending`, `crypto`, …),
/// including the `search-api` prefix when the key carries one. This is
/// exactly the string `invalidate_pattern`'s `prefix` argument reduces to
/// once its trailing `:` is trimmed, so a key built here and the
/// namespace bumped by an invalidation always agree.
pub fn namespace_of(full_key: &str) -> String {
    let with_prefix = format!("{PREFIX}:");
    match full_key.strip_prefix(&with_prefix) {
        Some(rest) => {
            let first = rest.split(':').next().unwrap_or(rest);
            format!("{PREFIX}:{first}")
        }
        None => full_key.split(':').next().unwrap_or(full_key).to_string(),
    }
}

/// Stamps `namespace`'s current epoch into `full_key`, right after the
/// namespace segment (`{namespace}:ep{epoch}:{rest}`) — the distributed
/// tier's actual key, so that bumping the epoch makes every previously
/// written key for that namespace unreachable without needing a native
/// prefix-delete.
pub fn distributed_key(full_key: &str, namespace: &str, epoch: u64) -> String {
    let remainder = full_key.strip_prefix(namespace).unwrap_or(full_key);
    format!("{namespace}:ep{epoch}{remainder}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn equal_filter_sets_produce_equal_keys_regardless_of_order() {
        let mut a: HashMap<&str, String> = HashMap::new();
        a.insert("status", "executed".into());
        a.insert("type", "buy".into());

        let mut b: HashMap<&str, String> = HashMap::new();
        b.insert("type", "buy".into());
        b.insert("status", "executed".into());

        let key_a = search_key("bitcoin", 1, 20, "market_cap_desc", a);
        let key_b = search_key("bitcoin", 1, 20, "market_cap_desc", b);
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn empty_query_is_stable() {
        let k1 = search_key("", 1, 20, "", std::iter::empty());
        let k2 = search_key("   ", 1, 20, "", std::iter::empty());
        assert_eq!(k1, k2);
    }

    #[test]
    fn namespace_formats_are_stable() {
        assert_eq!(trending_key("24h", 10), "search-api:trending:24h:limit:10");
        assert_eq!(crypto_key("BTC"), "search-api:crypto:BTC");
        assert_eq!(filters_key(), "search-api:filters:all");
    }

    #[test]
    fn namespace_of_matches_invalidate_pattern_prefix_trimming() {
        let key = search_key("bitcoin", 1, 20, "", std::iter::empty());
        assert_eq!(namespace_of(&key), "search-api:search");
        assert_eq!(namespace_of(&key), "search-api:search:".trim_end_matches(':'));

        assert_eq!(namespace_of("search:a"), "search:".trim_end_matches(':'));
        assert_eq!(namespace_of("crypto:b"), "crypto");
    }

    #[test]
    fn distributed_key_changes_when_epoch_bumps() {
        let key = crypto_key("BTC");
        let namespace = namespace_of(&key);
        let k0 = distributed_key(&key, &namespace, 0);
        let k1 = distributed_key(&key, &namespace, 1);
        assert_ne!(k0, k1);
        assert_eq!(k0, "search-api:crypto:ep0:BTC");
    }
}
