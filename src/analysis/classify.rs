//! Classification policies.
//!
//! A policy only ever sees payloads of scoring-relevant analyzers, and only
//! once all of them succeeded. The aggregator decides `Undetermined` before
//! a policy is consulted.

use crate::config::ClassificationConfig;
use crate::models::Classification;
use serde_json::Value;

/// Turns scoring-relevant payloads into a tier.
pub trait ClassificationPolicy: Send + Sync {
    /// `payloads` are (analyzer name, payload) in registration order.
    fn classify(&self, payloads: &[(&str, &Value)]) -> Classification;
}

/// Sums `points` across payloads; any `disqualifying: true` excludes the site.
#[derive(Debug, Clone, PartialEq)]
pub struct TieredPolicy {
    pub tier_1_min: f64,
    pub tier_2_min: f64,
}

impl Default for TieredPolicy {
    fn default() -> Self {
        Self::from(&ClassificationConfig::default())
    }
}

impl From<&ClassificationConfig> for TieredPolicy {
    fn from(config: &ClassificationConfig) -> Self {
        Self {
            tier_1_min: config.tier_1_min,
            tier_2_min: config.tier_2_min,
        }
    }
}

impl TieredPolicy {
    /// Total points over all payloads.
    pub fn points(payloads: &[(&str, &Value)]) -> f64 {
        payloads
            .iter()
            .filter_map(|(_, p)| p.get("points").and_then(Value::as_f64))
            .sum()
    }
}

impl ClassificationPolicy for TieredPolicy {
    fn classify(&self, payloads: &[(&str, &Value)]) -> Classification {
        let disqualified = payloads
            .iter()
            .any(|(_, p)| p.get("disqualifying").and_then(Value::as_bool) == Some(true));
        if disqualified {
            return Classification::Excluded;
        }

        let points = Self::points(payloads);
        if points >= self.tier_1_min {
            Classification::Tier1
        } else if points >= self.tier_2_min {
            Classification::Tier2
        } else {
            Classification::Tier3
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tiers_by_points() {
        let policy = TieredPolicy::default();
        let high = json!({ "points": 18 });
        let mid = json!({ "points": 8 });
        let low = json!({ "points": 2 });

        assert_eq!(
            policy.classify(&[("a", &high), ("b", &mid)]),
            Classification::Tier1
        );
        assert_eq!(
            policy.classify(&[("a", &mid), ("b", &mid)]),
            Classification::Tier2
        );
        assert_eq!(policy.classify(&[("a", &low)]), Classification::Tier3);
    }

    #[test]
    fn test_disqualifying_payload_excludes() {
        let policy = TieredPolicy::default();
        let rich = json!({ "points": 100 });
        let flood = json!({ "points": 0, "disqualifying": true });
        assert_eq!(
            policy.classify(&[("a", &rich), ("flood_risk", &flood)]),
            Classification::Excluded
        );
    }

    #[test]
    fn test_payloads_without_points_count_as_zero() {
        let empty = json!({ "note": "no score" });
        assert_eq!(TieredPolicy::points(&[("a", &empty)]), 0.0);
    }
}
