//! Model limit resolution: CRD override table -> built-in prefix table ->
//! conservative default (SPEC_FULL §4.2).

use std::collections::HashMap;

use model_spec_core::ModelSpec;

/// Operator-supplied overrides, analogous to `loom`'s `ConfigOverride`
/// resolver stage but collapsed into a plain lookup table since this system
/// has no live remote resolver to chain it with.
#[derive(Debug, Clone, Default)]
pub struct ModelLimitOverrides {
    by_model_id: HashMap<String, ModelSpec>,
}

impl ModelLimitOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model_id: impl Into<String>, spec: ModelSpec) -> &mut Self {
        self.by_model_id.insert(model_id.into(), spec);
        self
    }
}

fn built_in_table() -> &'static [(&'static str, ModelSpec)] {
    const GPT4O: ModelSpec = ModelSpec {
        context_window: 128_000,
        reserved_output: 16_384,
        trigger_ratio: 0.90,
        target_ratio: 0.70,
    };
    const GPT4: ModelSpec = ModelSpec {
        context_window: 8_192,
        reserved_output: 4_096,
        trigger_ratio: 0.90,
        target_ratio: 0.70,
    };
    const CLAUDE3: ModelSpec = ModelSpec {
        context_window: 200_000,
        reserved_output: 8_192,
        trigger_ratio: 0.90,
        target_ratio: 0.70,
    };
    const GEMINI15: ModelSpec = ModelSpec {
        context_window: 1_000_000,
        reserved_output: 8_192,
        trigger_ratio: 0.90,
        target_ratio: 0.70,
    };
    &[
        ("gpt-4o", GPT4O),
        ("gpt-4", GPT4),
        ("claude-3", CLAUDE3),
        ("gemini-1.5", GEMINI15),
    ]
}

/// Resolves a model's limits: exact-match override, then longest matching
/// built-in prefix, then the conservative default.
pub fn resolve(model_id: &str, overrides: &ModelLimitOverrides) -> ModelSpec {
    if let Some(spec) = overrides.by_model_id.get(model_id) {
        return *spec;
    }

    built_in_table()
        .iter()
        .filter(|(prefix, _)| model_id.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, spec)| *spec)
        .unwrap_or_else(ModelSpec::conservative_default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_override_wins() {
        let mut overrides = ModelLimitOverrides::new();
        overrides.insert("my-custom-model", ModelSpec::new(1_000, 100));
        let spec = resolve("my-custom-model", &overrides);
        assert_eq!(spec.context_window, 1_000);
    }

    #[test]
    fn builtin_prefix_match() {
        let spec = resolve("gpt-4o-mini", &ModelLimitOverrides::new());
        assert_eq!(spec.context_window, 128_000);
    }

    #[test]
    fn longest_prefix_wins() {
        let spec = resolve("gpt-4o", &ModelLimitOverrides::new());
        assert_eq!(spec.context_window, 128_000);
        let spec2 = resolve("gpt-4-turbo", &ModelLimitOverrides::new());
        assert_eq!(spec2.context_window, 8_192);
    }

    #[test]
    fn unknown_model_falls_back_to_default() {
        let spec = resolve("some-unknown-model", &ModelLimitOverrides::new());
        assert_eq!(spec, ModelSpec::conservative_default());
    }
}
