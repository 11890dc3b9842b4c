//! Delegation-graph derivation from raw spans
//!
//! Collapses one execution's span tree into logical delegation hops: for every
//! significant span, a bounded depth-first search over its descendants finds
//! the first significant span on each branch, traversing PassThrough spans
//! transparently. Each (source, first-significant-descendant) pair yields one
//! [`DelegationObservation`]; every significant span also yields one
//! [`NodeObservation`] whether or not it delegates further.

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::data::types::{ParticipantKind, SpanRecord};
use crate::domain::pricing::CostModel;

/// Default hop budget for the descendant search
pub const DEFAULT_MAX_HOPS: usize = 5;

/// One observed hop between two significant participants in one execution.
///
/// The edge carries the target span's own duration/tokens/error/cost, not
/// cumulative path totals, and is stamped with the target span's start time
/// (the hop happens when the delegatee starts).
#[derive(Debug, Clone, PartialEq)]
pub struct DelegationObservation {
    pub execution_id: String,
    pub source_label: String,
    pub source_kind: ParticipantKind,
    pub target_label: String,
    pub target_kind: ParticipantKind,
    pub duration_ms: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub is_error: bool,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

/// One touch of a significant participant in one execution.
///
/// Emitted even when the span has no reachable significant descendant, so a
/// leaf participant is still call-counted.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeObservation {
    pub execution_id: String,
    pub label: String,
    pub kind: ParticipantKind,
    pub duration_ms: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub is_error: bool,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

/// Result of collapsing one execution's spans
#[derive(Debug, Clone, Default)]
pub struct CollapseOutput {
    pub observations: Vec<DelegationObservation>,
    pub nodes: Vec<NodeObservation>,
    /// Spans skipped for missing required fields or duplicate ids
    pub malformed_spans: u32,
}

impl CollapseOutput {
    pub fn merge(&mut self, other: CollapseOutput) {
        self.observations.extend(other.observations);
        self.nodes.extend(other.nodes);
        self.malformed_spans += other.malformed_spans;
    }
}

/// Collapse one execution's spans into delegation and node observations.
///
/// Hop accounting follows the collapse contract: stepping into a significant
/// span consumes one hop, stepping through a PassThrough span is free. A
/// per-traversal visited set guards against cyclic parent references in
/// malformed input; this is a correctness requirement, not an optimization.
pub fn collapse(spans: &[SpanRecord], max_hops: usize, costs: &CostModel) -> CollapseOutput {
    let mut out = CollapseOutput::default();

    // Index well-formed spans; first occurrence wins on duplicate ids
    let mut by_id: FxHashMap<&str, usize> = FxHashMap::default();
    for (i, span) in spans.iter().enumerate() {
        if span.span_id.is_empty() || span.participant_label.is_empty() {
            tracing::warn!(
                execution_id = %span.execution_id,
                span_id = %span.span_id,
                "Skipping malformed span"
            );
            out.malformed_spans += 1;
            continue;
        }
        if by_id.contains_key(span.span_id.as_str()) {
            tracing::warn!(
                execution_id = %span.execution_id,
                span_id = %span.span_id,
                "Skipping duplicate span id"
            );
            out.malformed_spans += 1;
            continue;
        }
        by_id.insert(span.span_id.as_str(), i);
    }

    // Adjacency: parent span id -> child span indices
    let mut children: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
    for &i in by_id.values() {
        if let Some(parent_id) = spans[i].parent_id.as_deref()
            && !parent_id.is_empty()
        {
            children.entry(parent_id).or_default().push(i);
        }
    }

    for &i in by_id.values() {
        let source = &spans[i];
        if !source.participant_kind.is_significant() {
            continue;
        }

        out.nodes.push(NodeObservation {
            execution_id: source.execution_id.clone(),
            label: source.participant_label.clone(),
            kind: source.participant_kind,
            duration_ms: source.duration_ms,
            input_tokens: source.input_tokens,
            output_tokens: source.output_tokens,
            is_error: source.is_error,
            cost: costs.cost(
                source.participant_kind,
                source.model_identifier.as_deref(),
                source.input_tokens,
                source.output_tokens,
            ),
            timestamp: source.start_time,
        });

        // Depth-limited DFS to each branch's first significant descendant
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        visited.insert(source.span_id.as_str());

        let mut stack: Vec<(usize, usize)> = Vec::new();
        push_children(&mut stack, &children, spans, source.span_id.as_str(), 0);

        while let Some((idx, hops)) = stack.pop() {
            let span = &spans[idx];
            if !visited.insert(span.span_id.as_str()) {
                tracing::warn!(
                    execution_id = %span.execution_id,
                    span_id = %span.span_id,
                    "Cyclic parent reference detected, stopping branch"
                );
                continue;
            }

            if span.participant_kind.is_significant() {
                // The first significant span terminates this branch; deeper
                // descendants are that span's own delegations.
                if hops <= max_hops && span.participant_label != source.participant_label {
                    out.observations.push(DelegationObservation {
                        execution_id: span.execution_id.clone(),
                        source_label: source.participant_label.clone(),
                        source_kind: source.participant_kind,
                        target_label: span.participant_label.clone(),
                        target_kind: span.participant_kind,
                        duration_ms: span.duration_ms,
                        input_tokens: span.input_tokens,
                        output_tokens: span.output_tokens,
                        is_error: span.is_error,
                        cost: costs.cost(
                            span.participant_kind,
                            span.model_identifier.as_deref(),
                            span.input_tokens,
                            span.output_tokens,
                        ),
                        timestamp: span.start_time,
                    });
                }
            } else {
                push_children(&mut stack, &children, spans, span.span_id.as_str(), hops);
            }
        }
    }

    out
}

fn push_children(
    stack: &mut Vec<(usize, usize)>,
    children: &FxHashMap<&str, Vec<usize>>,
    spans: &[SpanRecord],
    parent_id: &str,
    hops: usize,
) {
    if let Some(child_indices) = children.get(parent_id) {
        for &child in child_indices {
            let step = if spans[child].participant_kind.is_significant() {
                1
            } else {
                0
            };
            stack.push((child, hops + step));
        }
    }
}
