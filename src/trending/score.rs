//! Component score formulas and weighted fusion.

use crate::models::TrendingRecord;
use crate::trending::EngineConfig;
use chrono::{DateTime, Utc};

/// `log(searchCount + 1) * 10` — natural log, so a single viral burst of
/// searches doesn't dwarf everything else.
fn search_score(count: u64) -> f64 {
    ((count as f64) + 1.0).ln() * 10.0
}

/// `min(volumeIncrease, 1000) / 10`; non-positive accumulation scores 0.
fn volume_score(volume_increase: f64) -> f64 {
    if volume_increase <= 0.0 {
        0.0
    } else {
        volume_increase.min(1000.0) / 10.0
    }
}

fn price_score(change_pct: f64) -> f64 {
    change_pct.abs().sqrt() * 5.0
}

/// `log(mentionsCount + 1) * 5`; zero mentions scores 0.
fn mention_score(count: u64) -> f64 {
    ((count as f64) + 1.0).ln() * 5.0
}

fn fuse(record: &TrendingRecord, config: &EngineConfig) -> f64 {
    record.search_score * config.weight_search
        + record.volume_score * config.weight_volume
        + record.price_score * config.weight_price
        + record.mention_score * config.weight_mention
}

fn age_hours(record: &TrendingRecord, now: DateTime<Utc>) -> f64 {
    (now - record.last_updated).num_seconds() as f64 / 3600.0
}

/// Time decay applied to the fused raw score: beyond a 1h grace window,
/// `raw *= exp(-age_hours / 24)` — a roughly 24-hour half-life.
fn time_decay(raw: f64, age_hours: f64) -> f64 {
    if age_hours > 1.0 {
        raw * (-age_hours / 24.0).exp()
    } else {
        raw
    }
}

/// Recomputes every component score fresh from the raw counters, fuses
/// them, and applies time decay. Called on every event input, so the
/// scores always reflect the latest counters as of `now`.
pub fn recompute(record: &mut TrendingRecord, config: &EngineConfig, now: DateTime<Utc>) {
    record.search_score = search_score(record.search_count);
    record.volume_score = volume_score(record.volume_increase);
    record.price_score = price_score(record.price_change_24h);
    record.mention_score = mention_score(record.mentions_count);

    let raw = fuse(record, config);
    record.final_score = time_decay(raw, age_hours(record, now));
}

/// The background loop's decay pass: for a record untouched for over an
/// hour, the search/volume/mention components (price is a point-in-time
/// reading, not accumulated, so it isn't decayed) are multiplicatively
/// aged by `score_decay_rate` in place, and `final_score` is rebuilt from
/// the decayed components plus the usual time-decay factor. Unlike
/// `recompute`, this does not re-derive the components from the raw
/// counters — it is what lets a quiet asset keep fading tick over tick.
pub fn decay_tick(record: &mut TrendingRecord, config: &EngineConfig, now: DateTime<Utc>) {
    let age = age_hours(record, now);
    if age <= 1.0 {
        return;
    }
    record.search_score *= config.score_decay_rate;
    record.volume_score *= config.score_decay_rate;
    record.mention_score *= config.score_decay_rate;

    let raw = fuse(record, config);
    record.final_score = time_decay(raw, age);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_score_grows_sublinearly() {
        assert!(search_score(100) < search_score(10) * 10.0);
        assert_eq!(search_score(0), 0.0);
    }

    #[test]
    fn mention_score_is_zero_with_no_mentions() {
        assert_eq!(mention_score(0), 0.0);
    }

    #[test]
    fn volume_score_is_zero_for_non_positive_increase() {
        assert_eq!(volume_score(0.0), 0.0);
        assert_eq!(volume_score(-5.0), 0.0);
    }

    #[test]
    fn volume_score_caps_at_one_thousand() {
        assert_eq!(volume_score(5000.0), 100.0);
    }

    #[test]
    fn fresh_record_is_not_time_decayed() {
        let mut record = TrendingRecord::new("btc".into(), "BTC".into(), "Bitcoin".into());
        record.search_count = 10;
        let config = EngineConfig::default();
        let now = record.last_updated;
        recompute(&mut record, &config, now);
        let undecayed = record.final_score;

        recompute(&mut record, &config, now + chrono::Duration::minutes(30));
        assert_eq!(record.final_score, undecayed);
    }

    #[test]
    fn stale_record_time_decays_below_fresh_score() {
        let mut record = TrendingRecord::new("btc".into(), "BTC".into(), "Bitcoin".into());
        record.search_count = 1000;
        let config = EngineConfig::default();
        let now = record.last_updated;
        recompute(&mut record, &config, now);
        let fresh_score = record.final_score;

        recompute(&mut record, &config, now + chrono::Duration::hours(48));
        assert!(record.final_score < fresh_score);
    }

    #[test]
    fn decay_tick_fades_a_quiet_record_further() {
        let mut record = TrendingRecord::new("btc".into(), "BTC".into(), "Bitcoin".into());
        record.search_count = 1000;
        let config = EngineConfig::default();
        let now = record.last_updated;
        recompute(&mut record, &config, now + chrono::Duration::hours(48));
        let before = record.final_score;

        decay_tick(&mut record, &config, now + chrono::Duration::hours(48));
        assert!(record.final_score < before);
    }

    #[test]
    fn decay_tick_is_a_no_op_within_the_one_hour_grace_window() {
        let mut record = TrendingRecord::new("btc".into(), "BTC".into(), "Bitcoin".into());
        record.search_count = 10;
        let config = EngineConfig::default();
        let now = record.last_updated;
        recompute(&mut record, &config, now);
        let before = record.final_score;

        decay_tick(&mut record, &config, now + chrono::Duration::minutes(30));
        assert_eq!(record.final_score, before);
    }
}
