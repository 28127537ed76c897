//! Message-history compressor (SPEC_FULL §4.2): guarantees that, when the
//! trigger limit is exceeded, the compressed result fits the target limit.

pub mod config;
pub mod strategies;

use tracing::warn;

use crate::message::{Message, Role};
use crate::model_spec::{self, ModelLimitOverrides};
use crate::token_counter::count_messages;

pub use config::CompressionConfig;
use strategies::{AttachmentTruncation, HistoryTruncation, Strategy, ToolResultTruncation};

pub struct Compressor {
    config: CompressionConfig,
    overrides: ModelLimitOverrides,
}

impl Compressor {
    pub fn new(config: CompressionConfig, overrides: ModelLimitOverrides) -> Self {
        Self { config, overrides }
    }

    /// Returns `messages` verbatim if under the trigger limit; otherwise a
    /// compressed copy guaranteed to be at or below the target limit.
    pub fn compress_if_needed(&self, messages: &[Message], model_id: &str) -> Vec<Message> {
        if !self.config.enabled {
            return messages.to_vec();
        }
        let spec = model_spec::resolve(model_id, &self.overrides);
        let trigger_limit = spec.trigger_limit();
        let target_limit = spec.target_limit();

        let current = count_messages(messages, model_id);
        if current <= trigger_limit {
            return messages.to_vec();
        }

        let mut working = messages.to_vec();
        self.run_phase1(&mut working, model_id, target_limit);
        if count_messages(&working, model_id) <= target_limit {
            return working;
        }

        self.run_phase2(&mut working, model_id, target_limit);
        if count_messages(&working, model_id) <= target_limit {
            return working;
        }

        self.run_phase3(&mut working, model_id, target_limit);
        let after = count_messages(&working, model_id);
        if after > target_limit {
            warn!(
                after,
                target_limit, "compressor Phase 3 could not reach target limit"
            );
        }
        working
    }

    fn strategies(&self) -> Vec<(Box<dyn Strategy>, f64)> {
        vec![
            (Box::new(HistoryTruncation), self.config.history_weight),
            (Box::new(AttachmentTruncation), self.config.attachment_weight),
            (Box::new(ToolResultTruncation), self.config.tool_result_weight),
        ]
    }

    /// Phase 1: run each strategy sequentially at full strength; stop as
    /// soon as the target is reached.
    fn run_phase1(&self, messages: &mut Vec<Message>, model_id: &str, target_limit: u32) {
        for (strategy, _weight) in self.strategies() {
            let current = count_messages(messages, model_id);
            if current <= target_limit {
                return;
            }
            let deficit = current - target_limit;
            strategy.compress(messages, deficit, model_id, &self.config);
        }
    }

    /// Phase 2: up to two rounds of weighted proportional allocation across
    /// strategies, sized by remaining compressible potential.
    fn run_phase2(&self, messages: &mut Vec<Message>, model_id: &str, target_limit: u32) {
        for _round in 0..2 {
            let current = count_messages(messages, model_id);
            if current <= target_limit {
                return;
            }
            let deficit = current - target_limit;

            let strategies = self.strategies();
            let potentials: Vec<(f64, u32)> = strategies
                .iter()
                .map(|(s, weight)| {
                    let (potential, _) = s.estimate_potential(messages, model_id, &self.config);
                    (*weight, potential)
                })
                .collect();
            let total_weighted: f64 = potentials
                .iter()
                .map(|(w, p)| w * (*p as f64))
                .sum();
            if total_weighted <= 0.0 {
                return;
            }

            for (i, (strategy, weight)) in strategies.into_iter().enumerate() {
                let (_w, potential) = potentials[i];
                if potential == 0 {
                    continue;
                }
                let share = (weight * potential as f64 / total_weighted) * deficit as f64;
                let allocation = (share.round() as u32).min(potential);
                if allocation == 0 {
                    continue;
                }
                strategy.compress(messages, allocation, model_id, &self.config);
                if count_messages(messages, model_id) <= target_limit {
                    return;
                }
            }
        }
    }

    /// Phase 3: forced compression, guaranteed to reach the target (absent
    /// pathological single-message inputs that are themselves over budget).
    fn run_phase3(&self, messages: &mut Vec<Message>, model_id: &str, target_limit: u32) {
        // (a) aggressively shrink any non-system content over 500 chars.
        for m in messages.iter_mut() {
            if m.role == Role::System {
                continue;
            }
            let text = m.text();
            if text.chars().count() > 500 {
                *m = m.clone().with_text(force_truncate(&text, 300, 100));
            }
        }
        if count_messages(messages, model_id) <= target_limit {
            return;
        }

        // (b) drop middle messages one at a time, preserving >= 2 first and >= 3 last.
        while messages.len() > 5 && count_messages(messages, model_id) > target_limit {
            let mid = messages.len() / 2;
            messages.remove(mid);
        }
        if count_messages(messages, model_id) <= target_limit {
            return;
        }

        // (c) shrink further to head[150] + tail[50].
        for m in messages.iter_mut() {
            if m.role == Role::System {
                continue;
            }
            let text = m.text();
            if text.chars().count() > 200 {
                *m = m.clone().with_text(force_truncate(&text, 150, 50));
            }
        }
        if count_messages(messages, model_id) <= target_limit {
            return;
        }

        // (d) truncate system messages too.
        for m in messages.iter_mut() {
            if m.role == Role::System {
                let text = m.text();
                if text.chars().count() > 200 {
                    *m = m.clone().with_text(force_truncate(&text, 150, 50));
                }
            }
        }
        if count_messages(messages, model_id) <= target_limit {
            return;
        }

        // (e) last resort: keep only the first and last conversation messages.
        if messages.len() > 2 {
            let first = messages.first().cloned();
            let last = messages.last().cloned();
            let mut kept = Vec::new();
            if let Some(f) = first {
                kept.push(f);
            }
            if let Some(l) = last {
                kept.push(l);
            }
            *messages = kept;
        }
    }
}

fn force_truncate(text: &str, head: usize, tail: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= head + tail {
        return text.to_string();
    }
    let head_part: String = chars[..head].iter().collect();
    let tail_part: String = chars[chars.len() - tail..].iter().collect();
    format!("{head_part}\n...[truncated]...\n{tail_part}")
}
