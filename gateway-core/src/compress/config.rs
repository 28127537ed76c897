//! Compression configuration (SPEC_FULL §4.2), shaped after `loom`'s
//! `CompactionConfig`.

#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Mirrors `CompactionConfig.auto`: when false, `compress_if_needed`
    /// always passes input through verbatim.
    pub enabled: bool,
    pub first_messages: usize,
    pub last_messages: usize,
    /// Strategy 2/3 skip blocks shorter than this (already-short blocks
    /// would just be noise-truncated).
    pub min_attachment_block_len: usize,
    pub history_weight: f64,
    pub attachment_weight: f64,
    pub tool_result_weight: f64,
    pub floor_retention_ratio: f64,
    pub binary_search_max_iterations: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            first_messages: 2,
            last_messages: 10,
            min_attachment_block_len: 500,
            history_weight: 2.0,
            attachment_weight: 3.0,
            tool_result_weight: 1.0,
            floor_retention_ratio: 0.02,
            binary_search_max_iterations: 15,
        }
    }
}

impl CompressionConfig {
    /// Applies the `MESSAGE_COMPRESSION_{ENABLED,FIRST_MESSAGES,LAST_MESSAGES,
    /// ATTACHMENT_LENGTH}` knobs (SPEC_FULL §6) on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("MESSAGE_COMPRESSION_ENABLED") {
            if let Ok(b) = v.parse() {
                config.enabled = b;
            }
        }
        if let Ok(v) = std::env::var("MESSAGE_COMPRESSION_FIRST_MESSAGES") {
            if let Ok(n) = v.parse() {
                config.first_messages = n;
            }
        }
        if let Ok(v) = std::env::var("MESSAGE_COMPRESSION_LAST_MESSAGES") {
            if let Ok(n) = v.parse() {
                config.last_messages = n;
            }
        }
        if let Ok(v) = std::env::var("MESSAGE_COMPRESSION_ATTACHMENT_LENGTH") {
            if let Ok(n) = v.parse() {
                config.min_attachment_block_len = n;
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = CompressionConfig::default();
        assert!(c.enabled);
        assert_eq!(c.first_messages, 2);
        assert_eq!(c.last_messages, 10);
        assert_eq!(c.history_weight, 2.0);
        assert_eq!(c.attachment_weight, 3.0);
        assert_eq!(c.tool_result_weight, 1.0);
    }

    #[test]
    fn from_env_overrides_defaults() {
        std::env::set_var("MESSAGE_COMPRESSION_FIRST_MESSAGES", "4");
        let c = CompressionConfig::from_env();
        std::env::remove_var("MESSAGE_COMPRESSION_FIRST_MESSAGES");
        assert_eq!(c.first_messages, 4);
    }
}
