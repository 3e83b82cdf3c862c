use crate::error::{AppError, AppResult};
use crate::models::crypto::CATEGORIES;
use serde::Deserialize;

/// Inbound search request, as deserialized from the HTTP query string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    pub q: String,
    pub page: u32,
    pub limit: u32,
    pub sort: String,

    pub status: Option<String>,
    pub order_type: Option<String>,
    pub order_kind: Option<String>,
    pub crypto_symbol: Option<String>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,

    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub market_cap_min: Option<f64>,
    pub market_cap_max: Option<f64>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,

    pub user_id: Option<String>,
    pub amount_min: Option<f64>,
    pub amount_max: Option<f64>,
    pub platform: Option<String>,
    pub trending: Option<bool>,
    pub active: Option<bool>,
    /// `"positive"` or `"negative"`; anything else is rejected at
    /// validation.
    pub price_change_24h: Option<String>,

    pub facets: bool,
    pub highlight: bool,
}

const VALID_STATUSES: &[&str] = &["pending", "executed", "cancelled", "failed"];
const VALID_ORDER_TYPES: &[&str] = &["buy", "sell"];
const VALID_ORDER_KINDS: &[&str] = &["market", "limit"];
const VALID_PRICE_CHANGE_DIRECTIONS: &[&str] = &["positive", "negative"];

impl SearchRequest {
    /// Normalizes pagination defaults and rejects out-of-range values.
    /// `page` defaults to 1, `limit` to 20 and is clamped to `[1, 100]`.
    pub fn validate(mut self) -> AppResult<Self> {
        if self.page == 0 {
            self.page = 1;
        }
        if self.limit == 0 {
            self.limit = 20;
        }
        if self.limit > 100 {
            return Err(AppError::Validation(format!(
                "limit {} exceeds maximum of 100",
                self.limit
            )));
        }

        if let Some(status) = &self.status {
            if !VALID_STATUSES.contains(&status.as_str()) {
                return Err(AppError::Validation(format!("invalid status: {status}")));
            }
        }
        if let Some(order_type) = &self.order_type {
            if !VALID_ORDER_TYPES.contains(&order_type.as_str()) {
                return Err(AppError::Validation(format!("invalid order_type: {order_type}")));
            }
        }
        if let Some(order_kind) = &self.order_kind {
            if !VALID_ORDER_KINDS.contains(&order_kind.as_str()) {
                return Err(AppError::Validation(format!("invalid order_kind: {order_kind}")));
            }
        }

        if let (Some(min), Some(max)) = (self.price_min, self.price_max) {
            if min > max {
                return Err(AppError::Validation(
                    "price_min must not exceed price_max".to_string(),
                ));
            }
        }
        if let (Some(min), Some(max)) = (self.market_cap_min, self.market_cap_max) {
            if min > max {
                return Err(AppError::Validation(
                    "market_cap_min must not exceed market_cap_max".to_string(),
                ));
            }
        }
        if let (Some(min), Some(max)) = (self.amount_min, self.amount_max) {
            if min > max {
                return Err(AppError::Validation(
                    "amount_min must not exceed amount_max".to_string(),
                ));
            }
        }

        for category in &self.categories {
            if !CATEGORIES.contains(&category.as_str()) {
                return Err(AppError::Validation(format!("invalid category: {category}")));
            }
        }

        if let Some(direction) = &self.price_change_24h {
            if !VALID_PRICE_CHANGE_DIRECTIONS.contains(&direction.as_str()) {
                return Err(AppError::Validation(format!(
                    "invalid price_change_24h: {direction}"
                )));
            }
        }

        Ok(self)
    }

    pub fn has_filters(&self) -> bool {
        self.status.is_some()
            || self.order_type.is_some()
            || self.order_kind.is_some()
            || self.crypto_symbol.is_some()
            || !self.categories.is_empty()
            || !self.tags.is_empty()
            || self.price_min.is_some()
            || self.price_max.is_some()
            || self.market_cap_min.is_some()
            || self.market_cap_max.is_some()
            || self.date_from.is_some()
            || self.date_to.is_some()
            || self.user_id.is_some()
            || self.amount_min.is_some()
            || self.amount_max.is_some()
            || self.platform.is_some()
            || self.trending.is_some()
            || self.active.is_some()
            || self.price_change_24h.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> SearchRequest {
        SearchRequest {
            limit: 20,
            page: 1,
            ..Default::default()
        }
    }

    #[test]
    fn zero_page_and_limit_default() {
        let req = SearchRequest::default().validate().unwrap();
        assert_eq!(req.page, 1);
        assert_eq!(req.limit, 20);
    }

    #[test]
    fn limit_above_hundred_is_rejected() {
        let req = SearchRequest { limit: 101, ..base() };
        assert!(req.validate().is_err());
    }

    #[test]
    fn inverted_price_range_is_rejected() {
        let req = SearchRequest {
            price_min: Some(100.0),
            price_max: Some(50.0),
            ..base()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn unknown_status_is_rejected() {
        let req = SearchRequest {
            status: Some("archived".to_string()),
            ..base()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn category_outside_the_fixed_set_is_rejected() {
        let req = SearchRequest {
            categories: vec!["not-a-real-category".to_string()],
            ..base()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn known_category_passes_validation() {
        let req = SearchRequest {
            categories: vec!["defi".to_string()],
            ..base()
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn unknown_price_change_direction_is_rejected() {
        let req = SearchRequest {
            price_change_24h: Some("sideways".to_string()),
            ..base()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn inverted_amount_range_is_rejected() {
        let req = SearchRequest {
            amount_min: Some(100.0),
            amount_max: Some(50.0),
            ..base()
        };
        assert!(req.validate().is_err());
    }
}
