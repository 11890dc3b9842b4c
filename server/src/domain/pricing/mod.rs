//! Cost model for delegation-graph enrichment
//!
//! Maps `(participant kind, model identifier, token counts)` to USD cost via a
//! pluggable pricing table. The table itself is an external collaborator: a
//! JSON file keyed by model name, with an embedded default compiled in. The
//! same model is consulted by the live query path and the scheduled
//! aggregation job, so cost sums stay consistent between the two.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::data::types::ParticipantKind;

/// Embedded pricing data (compile-time default table)
const EMBEDDED_PRICING_JSON: &str = include_str!("../../../data/model_prices.json");

// ============================================================================
// ERROR TYPE
// ============================================================================

#[derive(Error, Debug)]
pub enum PricingError {
    #[error("Failed to parse pricing data: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// PRICING TABLE
// ============================================================================

/// Per-token USD rates for one model
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModelPricing {
    pub input_cost_per_token: f64,
    pub output_cost_per_token: f64,
}

/// Parsed and indexed pricing table
///
/// Keys are lowercase for case-insensitive matching.
#[derive(Debug, Default)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
    pub model_count: usize,
}

impl PricingTable {
    /// Parse pricing data from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self, PricingError> {
        let raw: serde_json::Value =
            serde_json::from_str(json).map_err(|e| PricingError::ParseError(e.to_string()))?;

        let obj = raw
            .as_object()
            .ok_or_else(|| PricingError::ParseError("Expected JSON object".into()))?;

        let mut models = HashMap::new();
        for (key, value) in obj {
            let Some(entry) = value.as_object() else {
                continue;
            };

            let input_cost = entry
                .get("input_cost_per_token")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            let output_cost = entry
                .get("output_cost_per_token")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);

            // Negative values indicate corrupted data, zero rows price nothing
            if input_cost < 0.0 || output_cost < 0.0 {
                tracing::warn!(model = key, "Skipping model with negative pricing");
                continue;
            }
            if input_cost == 0.0 && output_cost == 0.0 {
                continue;
            }

            models.insert(
                key.to_lowercase(),
                ModelPricing {
                    input_cost_per_token: input_cost,
                    output_cost_per_token: output_cost,
                },
            );
        }

        let model_count = models.len();
        Ok(Self {
            models,
            model_count,
        })
    }

    /// Look up pricing for a model with fallback strategies
    ///
    /// Lookup order:
    /// 1. Exact match on the lowercased model name
    /// 2. `-latest` / `:latest` suffix stripped
    /// 3. Trailing version date stripped (`claude-3-5-sonnet-20241022`,
    ///    `gpt-4o-2024-11-20`)
    pub fn lookup(&self, model: &str) -> Option<ModelPricing> {
        let model_lower = model.to_lowercase();

        if let Some(pricing) = self.models.get(&model_lower) {
            return Some(*pricing);
        }

        let normalized = normalize_model_name(&model_lower);
        if normalized != model_lower
            && let Some(pricing) = self.models.get(normalized)
        {
            return Some(*pricing);
        }

        let base = strip_date_suffix(&model_lower);
        if base != model_lower
            && let Some(pricing) = self.models.get(&base)
        {
            return Some(*pricing);
        }

        None
    }
}

/// Strip `-latest` / `:latest` suffixes added by some frameworks.
///
/// Assumes input is already lowercased.
fn normalize_model_name(model: &str) -> &str {
    model
        .trim_end_matches("-latest")
        .trim_end_matches(":latest")
}

/// Strip trailing version dates from model names (last-resort fallback)
///
/// - `claude-3-5-sonnet-20241022` → `claude-3-5-sonnet`
/// - `gpt-4o-2024-11-20` → `gpt-4o`
fn strip_date_suffix(model: &str) -> String {
    use std::sync::OnceLock;

    static RE_COMPACT: OnceLock<regex::Regex> = OnceLock::new();
    static RE_DASHED: OnceLock<regex::Regex> = OnceLock::new();

    let re_compact =
        RE_COMPACT.get_or_init(|| regex::Regex::new(r"-\d{8}$").expect("Invalid regex"));
    let re_dashed =
        RE_DASHED.get_or_init(|| regex::Regex::new(r"-\d{4}-\d{2}-\d{2}$").expect("Invalid regex"));

    let result = re_compact.replace(model, "");
    let result = re_dashed.replace(&result, "");
    result.to_string()
}

// ============================================================================
// COST MODEL
// ============================================================================

/// Pure cost function over a pricing table
///
/// Fail-safe: returns 0.0 for non-model participants and unknown models, so a
/// missing table entry never fails an aggregation pass.
pub struct CostModel {
    table: PricingTable,
}

impl CostModel {
    /// Load the cost model: file override if configured, embedded table otherwise
    pub fn load(table_path: Option<&Path>) -> Result<Self, PricingError> {
        let table = match table_path {
            Some(path) => {
                let json = std::fs::read_to_string(path)?;
                let table = PricingTable::from_json_str(&json)?;
                tracing::debug!(path = %path.display(), models = table.model_count, "Loaded pricing table from file");
                table
            }
            None => {
                let table = PricingTable::from_json_str(EMBEDDED_PRICING_JSON)?;
                tracing::debug!(models = table.model_count, "Loaded embedded pricing table");
                table
            }
        };
        Ok(Self { table })
    }

    /// Compute USD cost for one span's token usage.
    ///
    /// Non-model participants cost nothing regardless of token counts.
    /// Negative token counts are clamped to zero.
    pub fn cost(
        &self,
        kind: ParticipantKind,
        model_identifier: Option<&str>,
        input_tokens: i64,
        output_tokens: i64,
    ) -> f64 {
        if kind != ParticipantKind::Model {
            return 0.0;
        }
        let Some(model) = model_identifier.filter(|m| !m.is_empty()) else {
            return 0.0;
        };
        let Some(pricing) = self.table.lookup(model) else {
            tracing::trace!(model, "No pricing found for model");
            return 0.0;
        };

        let input_tokens = input_tokens.max(0) as f64;
        let output_tokens = output_tokens.max(0) as f64;
        input_tokens * pricing.input_cost_per_token + output_tokens * pricing.output_cost_per_token
    }
}

impl Default for CostModel {
    fn default() -> Self {
        let table = PricingTable::from_json_str(EMBEDDED_PRICING_JSON)
            .expect("Failed to parse embedded pricing data");
        Self { table }
    }
}
