//! Translation from a validated `SearchRequest` into index query
//! parameters: field-weighted edismax main query, filter queries, sort
//! tag, highlighting, facets, pagination.

use crate::index::ParamMap;
use crate::search::request::SearchRequest;

/// `(field, boost)` weights for the edismax `qf` parameter. A name match
/// outranks a symbol match, which outranks a hit buried in the free-text
/// search blob.
const QUERY_FIELDS: &[(&str, f64)] = &[
    ("crypto_name", 10.0),
    ("crypto_symbol", 8.0),
    ("search_text", 2.0),
];

/// `(field, boost)` weights for the edismax `pf` (phrase-match boost)
/// parameter. Phrase boosts run hotter than the `qf` weights since an
/// exact phrase hit is a much stronger relevance signal than a bag-of-
/// words match.
const PHRASE_FIELDS: &[(&str, f64)] = &[("crypto_name", 20.0), ("crypto_symbol", 15.0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Maps a client-facing sort key to the index's internal sort tag.
/// Unrecognised keys fall back to relevance order rather than erroring,
/// since sort is advisory and a typo shouldn't fail the whole search.
fn sort_tag(sort: &str) -> Option<(&'static str, SortOrder)> {
    match sort {
        "price_asc" => Some(("price", SortOrder::Asc)),
        "price_desc" => Some(("price", SortOrder::Desc)),
        "market_cap_asc" => Some(("market_cap", SortOrder::Asc)),
        "market_cap_desc" => Some(("market_cap", SortOrder::Desc)),
        "created_at_asc" => Some(("created_at", SortOrder::Asc)),
        "created_at_desc" => Some(("created_at", SortOrder::Desc)),
        "trending_score_desc" => Some(("trending_score", SortOrder::Desc)),
        _ => None,
    }
}

/// Escapes characters edismax treats as special query syntax. Used only
/// when building phrase/wildcard constructions out of filter values —
/// never on the raw user query handed to the parser, which edismax is
/// expected to interpret on its own terms.
fn escape_reserved(raw: &str) -> String {
    const RESERVED: &[char] = &[
        '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\',
        '/',
    ];
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if RESERVED.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Wraps a filter value in a phrase match, escaping the reserved-character
/// set first so a value containing e.g. a stray `"` or `:` can't break out
/// of the phrase construction.
fn quote_phrase(value: &str) -> String {
    format!("\"{}\"", escape_reserved(value))
}

pub fn translate_search(req: &SearchRequest) -> ParamMap {
    let mut params = ParamMap::new();

    let query_text = req.q.trim();
    if query_text.is_empty() {
        params.set("q", "*:*");
    } else {
        let qf = QUERY_FIELDS
            .iter()
            .map(|(field, boost)| format!("{field}^{boost}"))
            .collect::<Vec<_>>()
            .join(" ");
        params
            .set("q", query_text)
            .set("defType", "edismax")
            .set("qf", qf)
            .set("pf", phrase_fields());
    }

    for fq in build_filter_queries(req) {
        params.push("fq", fq);
    }

    if let Some((tag, order)) = sort_tag(&req.sort) {
        let direction = match order {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        };
        params.set("sort", format!("{tag} {direction}"));
    }

    let rows = req.limit;
    let start = (req.page.saturating_sub(1)) * rows;
    params
        .set("start", start.to_string())
        .set("rows", rows.to_string())
        .set("wt", "json");

    if req.highlight {
        params
            .set("hl", "true")
            .set("hl.fl", "search_text,crypto_name,description")
            .set("hl.simple.pre", "<em>")
            .set("hl.simple.post", "</em>");
    }

    if req.facets {
        params
            .set("facet", "true")
            .push("facet.field", "status")
            .push("facet.field", "order_type")
            .push("facet.field", "order_kind")
            .push("facet.field", "categories")
            .push("facet.field", "tags");
    }

    params
}

fn phrase_fields() -> String {
    PHRASE_FIELDS
        .iter()
        .map(|(field, boost)| format!("{field}^{boost}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn build_filter_queries(req: &SearchRequest) -> Vec<String> {
    let mut fqs = Vec::new();

    if let Some(status) = &req.status {
        fqs.push(format!("status:{status}"));
    }
    if let Some(order_type) = &req.order_type {
        fqs.push(format!("order_type:{order_type}"));
    }
    if let Some(order_kind) = &req.order_kind {
        fqs.push(format!("order_kind:{order_kind}"));
    }
    if let Some(symbol) = &req.crypto_symbol {
        fqs.push(format!("crypto_symbol:{}", quote_phrase(symbol)));
    }
    if !req.categories.is_empty() {
        let or_list = req.categories.iter().map(|c| quote_phrase(c)).collect::<Vec<_>>().join(" OR ");
        fqs.push(format!("categories:({or_list})"));
    }
    if !req.tags.is_empty() {
        let or_list = req.tags.iter().map(|t| quote_phrase(t)).collect::<Vec<_>>().join(" OR ");
        fqs.push(format!("tags:({or_list})"));
    }

    if req.price_min.is_some() || req.price_max.is_some() {
        fqs.push(range_query("price", req.price_min, req.price_max));
    }
    if req.market_cap_min.is_some() || req.market_cap_max.is_some() {
        fqs.push(range_query("market_cap", req.market_cap_min, req.market_cap_max));
    }
    if req.date_from.is_some() || req.date_to.is_some() {
        let from = req.date_from.as_deref().unwrap_or("*");
        let to = req.date_to.as_deref().unwrap_or("*");
        fqs.push(format!("created_at:[{from} TO {to}]"));
    }

    if let Some(user_id) = &req.user_id {
        fqs.push(format!("user_id:{}", quote_phrase(user_id)));
    }
    if let Some(platform) = &req.platform {
        fqs.push(format!("platform:{}", quote_phrase(platform)));
    }
    if req.amount_min.is_some() || req.amount_max.is_some() {
        fqs.push(range_query("amount", req.amount_min, req.amount_max));
    }
    if let Some(trending) = req.trending {
        fqs.push(format!("is_trending:{trending}"));
    }
    if let Some(active) = req.active {
        fqs.push(format!("is_active:{active}"));
    }
    if let Some(direction) = &req.price_change_24h {
        fqs.push(match direction.as_str() {
            "positive" => "price_change_24h:[0 TO *]".to_string(),
            "negative" => "price_change_24h:[* TO 0]".to_string(),
            other => format!("price_change_24h:{other}"),
        });
    }

    fqs
}

fn range_query(field: &str, min: Option<f64>, max: Option<f64>) -> String {
    let lower = min.map(|v| v.to_string()).unwrap_or_else(|| "*".to_string());
    let upper = max.map(|v| v.to_string()).unwrap_or_else(|| "*".to_string());
    format!("{field}:[{lower} TO {upper}]")
}

/// Suggestion requests only need the raw prefix and a count, no filters.
pub fn translate_suggest(query: &str, limit: u32) -> ParamMap {
    let mut params = ParamMap::new();
    params
        .set("suggest.q", query.trim())
        .set("suggest.count", limit.to_string());
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(q: &str) -> SearchRequest {
        SearchRequest {
            q: q.to_string(),
            page: 1,
            limit: 20,
            ..Default::default()
        }
    }

    #[test]
    fn empty_query_becomes_match_all() {
        let params = translate_search(&request(""));
        assert_eq!(params.get("q"), Some("*:*"));
        assert_eq!(params.get("defType"), None);
    }

    #[test]
    fn non_empty_query_uses_edismax_with_weighted_fields() {
        let params = translate_search(&request("bitcoin"));
        assert_eq!(params.get("defType"), Some("edismax"));
        assert!(params.get("qf").unwrap().contains("crypto_name^10"));
        assert!(params.get("pf").unwrap().contains("crypto_name^20"));
    }

    #[test]
    fn every_search_always_carries_the_core_params() {
        let params = translate_search(&request(""));
        assert_eq!(params.get("wt"), Some("json"));
        assert!(params.get("q").is_some());
        assert!(params.get("start").is_some());
        assert!(params.get("rows").is_some());
    }

    #[test]
    fn price_change_direction_filters_map_to_range_queries() {
        let req = SearchRequest { price_change_24h: Some("positive".to_string()), ..request("") };
        let params = translate_search(&req);
        let fqs = params.to_pairs();
        assert!(fqs.iter().any(|(k, v)| k == "fq" && v == "price_change_24h:[0 TO *]"));
    }

    #[test]
    fn raw_query_text_is_left_unescaped_for_edismax_to_parse() {
        let params = translate_search(&request("BTC+ETH"));
        assert_eq!(params.get("q"), Some("BTC+ETH"));
    }

    #[test]
    fn phrase_quoted_filter_values_escape_the_full_reserved_set() {
        let req = SearchRequest { crypto_symbol: Some("BTC:USD+ETH".to_string()), ..request("") };
        let params = translate_search(&req);
        let fqs = params.to_pairs();
        let symbol_fq = fqs.iter().find(|(k, v)| k == "fq" && v.starts_with("crypto_symbol:"));
        assert_eq!(symbol_fq.unwrap().1, "crypto_symbol:\"BTC\\:USD\\+ETH\"");
    }

    #[test]
    fn pagination_computes_start_from_page() {
        let req = SearchRequest {
            page: 3,
            limit: 20,
            ..request("")
        };
        let params = translate_search(&req);
        assert_eq!(params.get("start"), Some("40"));
        assert_eq!(params.get("rows"), Some("20"));
    }

    #[test]
    fn unknown_sort_key_omits_sort_param() {
        let req = SearchRequest { sort: "bogus".to_string(), ..request("") };
        let params = translate_search(&req);
        assert_eq!(params.get("sort"), None);
    }

    #[test]
    fn known_sort_key_maps_to_index_tag() {
        let req = SearchRequest { sort: "price_desc".to_string(), ..request("") };
        let params = translate_search(&req);
        assert_eq!(params.get("sort"), Some("price desc"));
    }

    #[test]
    fn categories_filter_builds_an_or_list() {
        let req = SearchRequest {
            categories: vec!["defi".to_string(), "layer2".to_string()],
            ..request("")
        };
        let params = translate_search(&req);
        let fqs = params.to_pairs();
        let categories_fq = fqs.iter().find(|(k, v)| k == "fq" && v.starts_with("categories:"));
        assert_eq!(categories_fq.unwrap().1, "categories:(\"defi\" OR \"layer2\")");
    }

    #[test]
    fn price_range_with_only_a_floor_leaves_the_ceiling_open() {
        let req = SearchRequest { price_min: Some(10.0), ..request("") };
        let params = translate_search(&req);
        let fqs = params.to_pairs();
        let price_fq = fqs.iter().find(|(k, v)| k == "fq" && v.starts_with("price:"));
        assert_eq!(price_fq.unwrap().1, "price:[10 TO *]");
    }
}
