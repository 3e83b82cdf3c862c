//! Facet and highlight extraction from the raw index response body.
//!
//! The index returns facet counts as a flat array of alternating
//! `[value, count, value, count, ...]` pairs rather than a map (legacy
//! wire format), and range facets nested one level deeper under
//! `facet_ranges`. Both need permissive numeric coercion since counts can
//! arrive as JSON numbers or numeric strings depending on the core.

use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FacetCount {
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FacetResults {
    pub fields: BTreeMap<String, Vec<FacetCount>>,
    pub ranges: BTreeMap<String, Vec<FacetCount>>,
}

/// Parses `facet_counts.facet_fields.<name> = [v1, c1, v2, c2, ...]`.
pub fn extract_field_facets(raw: &Value) -> BTreeMap<String, Vec<FacetCount>> {
    let mut out = BTreeMap::new();
    let Some(fields) = raw.pointer("/facet_counts/facet_fields").and_then(Value::as_object) else {
        return out;
    };
    for (name, pairs) in fields {
        out.insert(name.clone(), parse_pair_array(pairs));
    }
    out
}

/// Parses `facet_counts.facet_ranges.<name>.counts = [v1, c1, v2, c2, ...]`.
pub fn extract_range_facets(raw: &Value) -> BTreeMap<String, Vec<FacetCount>> {
    let mut out = BTreeMap::new();
    let Some(ranges) = raw.pointer("/facet_counts/facet_ranges").and_then(Value::as_object) else {
        return out;
    };
    for (name, entry) in ranges {
        let Some(counts) = entry.get("counts") else {
            continue;
        };
        out.insert(name.clone(), parse_pair_array(counts));
    }
    out
}

pub fn extract_facets(raw: &Value) -> FacetResults {
    FacetResults {
        fields: extract_field_facets(raw),
        ranges: extract_range_facets(raw),
    }
}

fn parse_pair_array(value: &Value) -> Vec<FacetCount> {
    let Some(arr) = value.as_array() else {
        return Vec::new();
    };
    arr.chunks(2)
        .filter_map(|pair| {
            let [value, count] = pair else { return None };
            Some(FacetCount {
                value: value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string()),
                count: coerce_u64(count),
            })
        })
        .collect()
}

fn coerce_u64(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Flattens `highlighting.<doc_id>.<field> = [snippet, ...]` into a single
/// joined string per field, the shape the search coordinator forwards to
/// clients.
pub fn flatten_highlight_snippets(raw: &Value, doc_id: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(fields) = raw.get(doc_id).and_then(Value::as_object) else {
        return out;
    };
    for (field, snippets) in fields {
        let joined = snippets
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" ... ")
            })
            .unwrap_or_default();
        if !joined.is_empty() {
            out.insert(field.clone(), joined);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_facets_pair_value_with_count() {
        let raw = json!({
            "facet_counts": {
                "facet_fields": {
                    "status": ["executed", 12, "pending", 3]
                }
            }
        });
        let facets = extract_field_facets(&raw);
        assert_eq!(
            facets["status"],
            vec![
                FacetCount { value: "executed".into(), count: 12 },
                FacetCount { value: "pending".into(), count: 3 },
            ]
        );
    }

    #[test]
    fn numeric_counts_as_strings_are_coerced() {
        let raw = json!({
            "facet_counts": {
                "facet_fields": {
                    "type": ["buy", "7"]
                }
            }
        });
        let facets = extract_field_facets(&raw);
        assert_eq!(facets["type"][0].count, 7);
    }

    #[test]
    fn range_facets_read_from_nested_counts_array() {
        let raw = json!({
            "facet_counts": {
                "facet_ranges": {
                    "price": { "counts": ["0-100", 5, "100-200", 2] }
                }
            }
        });
        let ranges = extract_range_facets(&raw);
        assert_eq!(ranges["price"][1], FacetCount { value: "100-200".into(), count: 2 });
    }

    #[test]
    fn highlight_snippets_join_multiple_fragments() {
        let raw = json!({
            "doc-1": { "search_text": ["foo <em>bar</em>", "baz"] }
        });
        let snippets = flatten_highlight_snippets(&raw, "doc-1");
        assert_eq!(snippets["search_text"], "foo <em>bar</em> ... baz");
    }

    #[test]
    fn missing_doc_id_yields_empty_map() {
        let raw = json!({});
        assert!(flatten_highlight_snippets(&raw, "missing").is_empty());
    }
}
