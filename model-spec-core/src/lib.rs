//! Shared provider/model limit types.
//!
//! Kept as its own crate (mirrors the split between `loom`'s internal
//! `model_spec` resolver chain and a shared `model-spec-core`) so both
//! `gateway-core` and `config` can depend on the plain data type without
//! pulling in the resolver machinery.

use serde::{Deserialize, Serialize};

/// Context/output token limits for one model, plus the compression thresholds
/// derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub context_window: u32,
    pub reserved_output: u32,
    /// Fraction of the usable window (context_window - reserved_output) at
    /// which compression should trigger.
    pub trigger_ratio: f64,
    /// Fraction of the usable window compression must bring usage below.
    pub target_ratio: f64,
}

impl ModelSpec {
    pub fn new(context_window: u32, reserved_output: u32) -> Self {
        Self {
            context_window,
            reserved_output,
            trigger_ratio: 0.90,
            target_ratio: 0.70,
        }
    }

    pub fn with_ratios(mut self, trigger_ratio: f64, target_ratio: f64) -> Self {
        self.trigger_ratio = trigger_ratio;
        self.target_ratio = target_ratio;
        self
    }

    fn usable_window(&self) -> u32 {
        self.context_window.saturating_sub(self.reserved_output)
    }

    pub fn trigger_limit(&self) -> u32 {
        (self.usable_window() as f64 * self.trigger_ratio) as u32
    }

    pub fn target_limit(&self) -> u32 {
        (self.usable_window() as f64 * self.target_ratio) as u32
    }

    /// The conservative fallback used when no CRD override or built-in table
    /// entry matches a model id.
    pub fn conservative_default() -> Self {
        Self {
            context_window: 128_000,
            reserved_output: 4_096,
            trigger_ratio: 0.85,
            target_ratio: 0.65,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_and_target_limits() {
        let spec = ModelSpec::new(8_192, 4_096);
        assert_eq!(spec.usable_window(), 4_096);
        assert_eq!(spec.trigger_limit(), (4_096.0 * 0.90) as u32);
        assert_eq!(spec.target_limit(), (4_096.0 * 0.70) as u32);
    }

    #[test]
    fn conservative_default_matches_spec() {
        let spec = ModelSpec::conservative_default();
        assert_eq!(spec.context_window, 128_000);
        assert_eq!(spec.reserved_output, 4_096);
        assert_eq!(spec.trigger_ratio, 0.85);
        assert_eq!(spec.target_ratio, 0.65);
    }

    #[test]
    fn serde_roundtrip() {
        let spec = ModelSpec::new(32_000, 2_000);
        let json = serde_json::to_string(&spec).unwrap();
        let back: ModelSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
