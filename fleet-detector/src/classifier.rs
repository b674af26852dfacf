//! Platform classification from collected evidence.
//!
//! `confidence(platform) = min(100, Σ weights)`. Specific platforms are
//! evaluated in [`PlatformType::priority_order`]; the first one at or above
//! the acceptance threshold wins. Otherwise the generic fallback scores
//! `min(100, floor + Σ hygiene weights)`.

use fleet_core::{ClassificationResult, DetectorConfig, Indicator, PlatformType};

use crate::collector::Evidence;

/// Aggregate confidence for one platform's indicators, capped at 100.
pub fn confidence(indicators: &[Indicator]) -> u8 {
    let total: u64 = indicators.iter().map(|i| u64::from(i.weight)).sum();
    total.min(100) as u8
}

/// Pick the winning platform for `evidence`. Pure and deterministic.
pub fn classify(evidence: &Evidence, config: &DetectorConfig) -> ClassificationResult {
    let mut metadata = evidence.metadata.clone();
    metadata.insert(
        "acceptance_threshold".to_string(),
        config.acceptance_threshold.to_string(),
    );

    let mut winner = None;
    for platform in PlatformType::priority_order() {
        if *platform == PlatformType::Generic {
            continue;
        }
        let score = confidence(evidence.indicators(*platform));
        metadata.insert(format!("score.{platform}"), score.to_string());
        if winner.is_none() && u32::from(score) >= config.acceptance_threshold {
            winner = Some((*platform, score));
        }
    }

    if let Some((platform_type, confidence)) = winner {
        return ClassificationResult {
            platform_type,
            confidence,
            indicators: evidence.indicators(platform_type).to_vec(),
            metadata,
        };
    }

    let hygiene = evidence.indicators(PlatformType::Generic);
    let floor = config.weights.generic_floor;
    let total: u64 = u64::from(floor) + hygiene.iter().map(|i| u64::from(i.weight)).sum::<u64>();
    metadata.insert("generic.floor".to_string(), floor.to_string());

    ClassificationResult {
        platform_type: PlatformType::Generic,
        confidence: total.min(100) as u8,
        indicators: hygiene.to_vec(),
        metadata,
    }
}
