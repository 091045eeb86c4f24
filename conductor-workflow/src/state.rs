//! Per-run, in-memory engine state (spec §3).

use std::collections::HashMap;

use serde_json::Value;

use crate::ids::McpName;
use crate::step::WorkflowStep;

/// Semantic keys the Executor's argument-inference heuristics read from,
/// in addition to indexed step results (spec §4.3).
pub const KEY_LAST_RESULT: &str = "lastResult";
pub const KEY_LAST_SUCCESSFUL_TOOL: &str = "lastSuccessfulTool";

/// Mapping from step index and semantic key to the raw value produced by a
/// step. Semantic keys (`lastResult`, `lastSuccessfulTool`) always reference
/// the most recently completed step, never a stale one (spec §3 invariant c).
#[derive(Debug, Clone, Default)]
pub struct DataStore {
    by_step: HashMap<usize, Value>,
    semantic: HashMap<&'static str, Value>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, step_index: usize, tool_name: &str, raw: Value) {
        self.by_step.insert(step_index, raw.clone());
        self.semantic.insert(KEY_LAST_RESULT, raw);
        self.semantic
            .insert(KEY_LAST_SUCCESSFUL_TOOL, Value::String(tool_name.to_string()));
    }

    pub fn step_result(&self, step_index: usize) -> Option<&Value> {
        self.by_step.get(&step_index)
    }

    pub fn last_result(&self) -> Option<&Value> {
        self.semantic.get(KEY_LAST_RESULT)
    }

    pub fn last_successful_tool(&self) -> Option<&str> {
        self.semantic.get(KEY_LAST_SUCCESSFUL_TOOL).and_then(|v| v.as_str())
    }
}

/// Tracks consecutive failures, per-(tool, mcp) repetition, and stagnation
/// for the loop's termination policy (spec §3, §4.1).
#[derive(Debug, Clone, Default)]
pub struct ProgressMonitor {
    pub last_progress_at: usize,
    pub consecutive_failures: u32,
    pub repeated_actions: HashMap<(String, Option<String>), u32>,
}

impl ProgressMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(&mut self, iteration: usize) {
        self.last_progress_at = iteration;
        self.consecutive_failures = 0;
    }

    pub fn on_failure(&mut self) {
        self.consecutive_failures += 1;
    }

    pub fn record_action(&mut self, tool: &str, mcp: Option<&McpName>) -> u32 {
        let key = (tool.to_string(), mcp.map(|m| m.0.clone()));
        let count = self.repeated_actions.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    pub fn stagnation_count(&self, iteration: usize) -> usize {
        iteration.saturating_sub(self.last_progress_at)
    }

    pub fn max_action_repetition(&self) -> u32 {
        self.repeated_actions.values().copied().max().unwrap_or(0)
    }
}

/// Why a run stopped looping (spec §4.1 termination policy, in priority order).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    ObserverComplete,
    HardCapReached,
    ConsecutiveFailures,
    Stagnation,
    ActionRepeated,
    Cancelled,
    PlannerFailure,
    AuthRequired,
}

impl TerminationReason {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminationReason::ObserverComplete)
    }
}

/// The full per-run state threaded through the Plan-Act-Observe loop.
///
/// Owned exclusively by the Engine Loop; the Planner, Executor, and Observer
/// only ever see immutable snapshots or narrow read views (spec §9).
#[derive(Debug, Clone)]
pub struct EngineState {
    pub original_query: String,
    pub user_language: String,
    pub history: Vec<WorkflowStep>,
    pub data_store: DataStore,
    pub iteration: usize,
    pub progress: ProgressMonitor,
    pub termination: Option<TerminationReason>,
}

impl EngineState {
    pub fn new(original_query: impl Into<String>, user_language: impl Into<String>) -> Self {
        Self {
            original_query: original_query.into(),
            user_language: user_language.into(),
            history: Vec::new(),
            data_store: DataStore::new(),
            iteration: 0,
            progress: ProgressMonitor::new(),
            termination: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.termination.is_some()
    }

    /// Invariant (a): `history.len() == iteration` at the top of each loop.
    pub fn assert_invariants(&self) {
        debug_assert_eq!(self.history.len(), self.iteration);
    }

    pub fn push_completed(&mut self, step: WorkflowStep) {
        self.push_completed_inner(step, true);
    }

    /// Same bookkeeping as `push_completed`, but the success does not reset
    /// the stagnation clock (spec §4.2's anti-repetition rule: a step that
    /// repeats the last successful `(tool, mcp)` is still executed and
    /// recorded, but the engine records a stagnation tick for it rather than
    /// crediting it as progress).
    pub fn push_completed_without_progress(&mut self, step: WorkflowStep) {
        self.push_completed_inner(step, false);
    }

    fn push_completed_inner(&mut self, step: WorkflowStep, counts_as_progress: bool) {
        debug_assert!(step.is_success());
        let tool = step.kind.tool_name().to_string();
        if let Some(raw) = step.raw_result.clone() {
            self.data_store.record_success(step.index, &tool, raw);
        }
        if counts_as_progress {
            self.progress.on_success(self.iteration);
        } else {
            self.progress.consecutive_failures = 0;
        }
        self.history.push(step);
        self.iteration += 1;
    }

    pub fn push_failed(&mut self, step: WorkflowStep) {
        self.progress.on_failure();
        self.history.push(step);
        self.iteration += 1;
    }

    pub fn successful_steps(&self) -> impl Iterator<Item = &WorkflowStep> {
        self.history.iter().filter(|s| s.is_success())
    }

    pub fn success_count(&self) -> usize {
        self.successful_steps().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{StepKind, StepStatus};

    fn step(index: usize, status: StepStatus) -> WorkflowStep {
        let mut s = WorkflowStep::new(
            index,
            StepKind::Mcp { mcp_name: "coingecko-mcp".into(), tool: "get_price".into() },
            serde_json::json!({}),
            "price".into(),
            "r".into(),
        );
        s.status = status;
        if status == StepStatus::Completed {
            s.raw_result = Some(serde_json::json!({"price": 1}));
        }
        s
    }

    #[test]
    fn data_store_points_at_most_recent_success() {
        let mut state = EngineState::new("q", "en");
        state.push_completed(step(0, StepStatus::Completed));
        assert_eq!(state.data_store.last_result().unwrap()["price"], 1);
        assert_eq!(state.iteration, 1);
        assert_eq!(state.history.len(), state.iteration);
    }

    #[test]
    fn stagnation_count_tracks_iterations_since_progress() {
        let mut state = EngineState::new("q", "en");
        state.push_completed(step(0, StepStatus::Completed));
        state.push_failed(step(1, StepStatus::Failed));
        state.push_failed(step(2, StepStatus::Failed));
        assert_eq!(state.progress.stagnation_count(state.iteration), 2);
    }

    #[test]
    fn repeated_success_without_progress_does_not_reset_stagnation_clock() {
        let mut state = EngineState::new("q", "en");
        state.push_completed(step(0, StepStatus::Completed));
        state.push_completed(step(1, StepStatus::Completed));
        state.push_completed_without_progress(step(2, StepStatus::Completed));
        // Progress last advanced at iteration 1 (the second push_completed);
        // the third step succeeded but must not move the clock forward.
        assert_eq!(state.progress.last_progress_at, 1);
        assert_eq!(state.progress.stagnation_count(state.iteration), 2);
        assert_eq!(state.success_count(), 3);
    }

    #[test]
    fn repeated_action_counter_keys_on_tool_and_mcp() {
        let mut monitor = ProgressMonitor::new();
        let mcp: McpName = "coingecko-mcp".into();
        assert_eq!(monitor.record_action("get_price", Some(&mcp)), 1);
        assert_eq!(monitor.record_action("get_price", Some(&mcp)), 2);
        assert_eq!(monitor.record_action("get_fng", Some(&mcp)), 1);
        assert_eq!(monitor.max_action_repetition(), 2);
    }
}
