//! Shared query-parameter map, built by `query::translate` and consumed
//! verbatim by `index::client`.

use std::collections::BTreeMap;

/// An ordered multimap of query-string parameters. `BTreeMap` keeps
/// iteration deterministic, which matters for both cache-key construction
/// upstream and for tests that assert on the exact request sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamMap {
    single: BTreeMap<String, String>,
    multi: BTreeMap<String, Vec<String>>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.single.insert(key.into(), value.into());
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.multi.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Flattens into `(key, value)` pairs suitable for `reqwest`'s
    /// `.query(&pairs)`, repeating the key for every multi-value entry.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .single
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, values) in &self.multi {
            for value in values {
                pairs.push((key.clone(), value.clone()));
            }
        }
        pairs
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.single.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_values_repeat_the_key() {
        let mut params = ParamMap::new();
        params.push("fq", "status:executed");
        params.push("fq", "type:buy");
        let pairs = params.to_pairs();
        assert_eq!(
            pairs,
            vec![
                ("fq".to_string(), "status:executed".to_string()),
                ("fq".to_string(), "type:buy".to_string()),
            ]
        );
    }

    #[test]
    fn single_values_are_deterministically_ordered() {
        let mut params = ParamMap::new();
        params.set("rows", "20");
        params.set("start", "0");
        let pairs = params.to_pairs();
        assert_eq!(pairs[0].0, "rows");
        assert_eq!(pairs[1].0, "start");
    }
}
