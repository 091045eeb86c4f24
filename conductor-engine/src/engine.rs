//! Wires Planner, Executor, Observer, Result Formatter, and Language
//! Resolver into the public Plan-Act-Observe run (spec §4.1, §6).

use std::sync::Arc;

use conductor_llm::{single_turn, CompletionRequest, LlmClient};
use conductor_mcp::SessionManager;
use conductor_workflow::{
    AgentDescriptor, ContentType, ConversationRepository, EngineState, Event, ExecutionDetails, ExecutionSummary,
    FormattingDetails, Progress, ProcessingInfo, RunId, StepKind, StepRecord, TerminationReason, ToolDetails, UserId,
    WorkflowInfo, WorkflowStep,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::executor::{ExecutionOutcome, Executor};
use crate::formatter::ResultFormatter;
use crate::language::{LanguageContext, LanguageResolver};
use crate::observer::Observer;
use crate::planner::{ConcludeReason, PlanDecision, Planner};

/// Termination policy constants, in the priority order applied each
/// iteration (spec §4.1): observer completion beats the hard cap, which
/// beats consecutive-failure/stagnation/repetition guards.
const HARD_ITERATION_CAP: usize = 20;
const MAX_CONSECUTIVE_FAILURES: u32 = 5;
const STAGNATION_LIMIT: usize = 8;
const MAX_ACTION_REPETITION: u32 = 5;
const EVENT_CHANNEL_CAPACITY: usize = 64;

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn tool_type(kind: &StepKind) -> &'static str {
    match kind {
        StepKind::Mcp { .. } => "mcp",
        StepKind::Llm { .. } => "llm",
    }
}

pub struct EngineLoop {
    planner: Planner,
    executor: Executor,
    observer: Observer,
    formatter: ResultFormatter,
    language: LanguageResolver,
    repository: Arc<dyn ConversationRepository>,
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl EngineLoop {
    pub fn new(
        sessions: Arc<SessionManager>,
        llm: Arc<dyn LlmClient>,
        repository: Arc<dyn ConversationRepository>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        Self {
            planner: Planner::new(llm.clone(), model.clone()),
            executor: Executor::new(sessions, llm.clone(), model.clone()),
            observer: Observer::new(llm.clone(), model.clone()),
            formatter: ResultFormatter::new(llm.clone(), model.clone()),
            language: LanguageResolver::new(llm.clone(), model.clone()),
            repository,
            llm,
            model,
        }
    }

    /// Starts a run in the background and returns its event stream. The run
    /// keeps going even if the caller drops the stream early; `cancel` is
    /// the only way to stop it short of natural termination.
    pub fn run(
        self: Arc<Self>,
        user: UserId,
        query: String,
        agent: AgentDescriptor,
        cancel: CancellationToken,
    ) -> ReceiverStream<Event> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            self.drive(user, query, agent, cancel, tx).await;
        });
        ReceiverStream::new(rx)
    }

    async fn drive(
        &self,
        user: UserId,
        query: String,
        agent: AgentDescriptor,
        cancel: CancellationToken,
        tx: mpsc::Sender<Event>,
    ) {
        let run_id = RunId::new();
        let lang_ctx =
            LanguageContext { query: query.clone(), agent_default: agent.default_language.clone(), ..Default::default() };
        let language = self.language.resolve(&lang_ctx).await;
        let mut state = EngineState::new(query, language);

        send(
            &tx,
            Event::ExecutionStart {
                task_id: run_id.to_string(),
                mode: "agent".to_string(),
                workflow_info: WorkflowInfo { total_steps: 0, mcps: agent.mcp_servers.iter().map(|m| m.name.0.clone()).collect() },
            },
        )
        .await;

        loop {
            state.assert_invariants();

            if cancel.is_cancelled() {
                state.termination = Some(TerminationReason::Cancelled);
                break;
            }
            if state.iteration >= HARD_ITERATION_CAP {
                info!(iteration = state.iteration, "hard iteration cap reached");
                state.termination = Some(TerminationReason::HardCapReached);
                break;
            }
            if state.progress.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                warn!(failures = state.progress.consecutive_failures, "too many consecutive failures");
                state.termination = Some(TerminationReason::ConsecutiveFailures);
                break;
            }
            if state.progress.stagnation_count(state.iteration) >= STAGNATION_LIMIT {
                warn!("run stagnated, no progress for too long");
                state.termination = Some(TerminationReason::Stagnation);
                break;
            }
            if state.progress.max_action_repetition() >= MAX_ACTION_REPETITION {
                warn!("the same action was repeated too many times");
                state.termination = Some(TerminationReason::ActionRepeated);
                break;
            }

            let decision = match self.planner.plan(&state, &agent).await {
                Ok(decision) => decision,
                Err(e) => {
                    send(&tx, Event::Error { message: e.to_string(), details: None }).await;
                    state.termination = Some(TerminationReason::PlannerFailure);
                    break;
                }
            };

            match decision {
                PlanDecision::Conclude { reason, summary } => {
                    state.termination = Some(match reason {
                        ConcludeReason::ObserverComplete => TerminationReason::ObserverComplete,
                        ConcludeReason::PlannerFailure => TerminationReason::PlannerFailure,
                    });
                    if let Some(text) = summary {
                        send(&tx, Event::FinalResultChunk { chunk: text, agent_name: agent.name.clone() }).await;
                    }
                    break;
                }
                PlanDecision::Execute { kind, args, expected_output, reasoning } => {
                    self.run_step(&run_id, &user, &agent, &mut state, kind, args, expected_output, reasoning, &tx).await;

                    if state.termination.is_none() {
                        match self.observer.is_complete(&state).await {
                            Ok(true) => state.termination = Some(TerminationReason::ObserverComplete),
                            Ok(false) => {}
                            Err(e) => warn!(error = %e, "observer judgement failed, continuing run"),
                        }
                    }
                }
            }

            if state.termination.is_some() {
                break;
            }
        }

        self.finish(&run_id, &state, &tx).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        run_id: &RunId,
        user: &UserId,
        agent: &AgentDescriptor,
        state: &mut EngineState,
        kind: StepKind,
        args: serde_json::Value,
        expected_output: String,
        reasoning: String,
        tx: &mpsc::Sender<Event>,
    ) {
        let mut step = WorkflowStep::new(state.iteration, kind, args, expected_output, reasoning);
        let mcp_name = step.kind.mcp_name().cloned();

        if let Some(mcp) = &mcp_name {
            if let Some(missing_params) = self.executor.precheck_auth(user, mcp).await {
                send(
                    tx,
                    Event::mcp_connection_error(
                        mcp,
                        Some(step.index),
                        &agent.name,
                        "auth_required",
                        "Additional credentials required",
                        &format!("{mcp} needs {} before this step can run", missing_params.join(", ")),
                        vec!["Provide the missing credentials and retry".to_string()],
                        missing_params,
                        false,
                        "auth_required",
                    ),
                )
                .await;
                state.termination = Some(TerminationReason::AuthRequired);
                return;
            }
        }

        send(
            tx,
            Event::StepExecuting {
                step: step.index,
                tool: step.kind.tool_name().to_string(),
                agent_name: agent.name.clone(),
                message: step.reasoning.clone(),
                tool_details: ToolDetails {
                    tool_type: tool_type(&step.kind).to_string(),
                    tool_name: step.kind.tool_name().to_string(),
                    mcp_name: mcp_name.as_ref().map(|m| m.0.clone()),
                    args: step.args.clone(),
                    expected_output: step.expected_output.clone(),
                    reasoning: step.reasoning.clone(),
                    timestamp: now(),
                },
            },
        )
        .await;

        // Spec §4.2 anti-repetition rule: a step that proposes the exact same
        // tool on the exact same MCP as the last successful step is still
        // executed — the engine doesn't second-guess the planner's decision —
        // but it is recorded as a stagnation tick rather than progress.
        let repeats_last_successful_action = state
            .successful_steps()
            .last()
            .is_some_and(|last| last.kind.tool_name() == step.kind.tool_name() && last.kind.mcp_name() == step.kind.mcp_name());

        let outcome = self.executor.execute(user, &mut step, &state.data_store).await;
        state.progress.record_action(step.kind.tool_name(), mcp_name.as_ref());
        let attempts = step.attempts;

        let success = match outcome {
            ExecutionOutcome::Success(raw) => {
                step.succeed(raw.clone());
                self.persist_and_format(run_id, agent, &mut step, raw, &state.user_language, tx).await;
                if repeats_last_successful_action {
                    warn!(tool = step.kind.tool_name(), "action repeats the last successful step, ticking stagnation");
                    state.push_completed_without_progress(step);
                } else {
                    state.push_completed(step);
                }
                true
            }
            ExecutionOutcome::AuthRequired { mcp_name, missing_params } => {
                send(
                    tx,
                    Event::mcp_connection_error(
                        &mcp_name,
                        Some(step.index),
                        &agent.name,
                        "auth_required",
                        "Additional credentials required",
                        &format!("{mcp_name} needs {} before this step can run", missing_params.join(", ")),
                        vec!["Provide the missing credentials and retry".to_string()],
                        missing_params,
                        false,
                        "auth_required",
                    ),
                )
                .await;
                step.fail("auth required".to_string());
                state.push_failed(step);
                state.termination = Some(TerminationReason::AuthRequired);
                false
            }
            ExecutionOutcome::Failed { error, .. } => {
                send(
                    tx,
                    Event::StepError {
                        step: step.index,
                        error: error.clone(),
                        mcp_name: mcp_name.as_ref().map(|m| m.0.clone()),
                        action: step.kind.tool_name().to_string(),
                        attempts,
                    },
                )
                .await;
                step.fail(error);
                state.push_failed(step);
                false
            }
        };

        let progress = Progress {
            completed: state.success_count(),
            total: state.history.len(),
            percentage: if state.history.is_empty() { 0.0 } else { state.success_count() as f32 / state.history.len() as f32 * 100.0 },
        };
        send(tx, Event::StepComplete { step: state.iteration.saturating_sub(1), success, progress }).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_and_format(
        &self,
        run_id: &RunId,
        agent: &AgentDescriptor,
        step: &mut WorkflowStep,
        raw: serde_json::Value,
        language: &str,
        tx: &mpsc::Sender<Event>,
    ) {
        let mcp_name = step.kind.mcp_name().cloned();

        self.repository
            .record_step(StepRecord {
                run_id: run_id.to_string(),
                step_index: step.index,
                content_type: ContentType::RawResult,
                payload: raw.clone(),
            })
            .await;
        send(
            tx,
            Event::StepRawResult {
                step: step.index,
                success: true,
                result: raw.clone(),
                agent_name: agent.name.clone(),
                execution_details: ExecutionDetails {
                    tool_type: tool_type(&step.kind).to_string(),
                    tool_name: step.kind.tool_name().to_string(),
                    mcp_name: mcp_name.as_ref().map(|m| m.0.clone()),
                    raw_result: raw.clone(),
                    args: step.args.clone(),
                    expected_output: step.expected_output.clone(),
                    timestamp: now(),
                },
            },
        )
        .await;

        let start = std::time::Instant::now();
        let original_size = raw.to_string().len();
        let mut formatted = String::new();
        match self.formatter.format(&step.kind, &step.expected_output, &raw, language).await {
            Ok(mut chunks) => {
                while let Some(chunk) = chunks.next().await {
                    formatted.push_str(&chunk);
                    send(tx, Event::StepResultChunk { step: step.index, chunk, agent_name: agent.name.clone() }).await;
                }
            }
            Err(e) => {
                warn!(error = %e, step = step.index, "formatting failed, falling back to the raw result");
                formatted = raw.to_string();
            }
        }
        step.formatted_result = Some(formatted.clone());

        self.repository
            .record_step(StepRecord {
                run_id: run_id.to_string(),
                step_index: step.index,
                content_type: ContentType::FormattedResult,
                payload: serde_json::Value::String(formatted.clone()),
            })
            .await;
        send(
            tx,
            Event::StepFormattedResult {
                step: step.index,
                success: true,
                formatted_result: formatted.clone(),
                agent_name: agent.name.clone(),
                formatting_details: FormattingDetails {
                    tool_type: tool_type(&step.kind).to_string(),
                    tool_name: step.kind.tool_name().to_string(),
                    mcp_name: mcp_name.as_ref().map(|m| m.0.clone()),
                    original_result: raw,
                    formatted_result: formatted.clone(),
                    processing_info: ProcessingInfo {
                        original_data_size: original_size,
                        formatted_data_size: formatted.len(),
                        processing_time_ms: start.elapsed().as_millis() as u64,
                        needs_formatting: !matches!(step.kind, StepKind::Llm { .. }),
                    },
                    timestamp: now(),
                },
            },
        )
        .await;
    }

    async fn finish(&self, run_id: &RunId, state: &EngineState, tx: &mpsc::Sender<Event>) {
        let reason = state.termination.unwrap_or(TerminationReason::HardCapReached);
        info!(run = %run_id, ?reason, iterations = state.iteration, "run finished");

        if reason == TerminationReason::Cancelled {
            send(tx, Event::Cancelled { reason: "run was cancelled".to_string() }).await;
            return;
        }

        let completed = state.success_count();
        let total = state.history.len();
        let final_result = if completed > 0 { self.synthesize_final_answer(state).await } else { fallback_final_result(state) };

        send(
            tx,
            Event::FinalResult {
                final_result,
                success: reason.is_success(),
                execution_summary: ExecutionSummary {
                    total_steps: total,
                    completed_steps: completed,
                    failed_steps: total - completed,
                    success_rate: if total == 0 { 0.0 } else { completed as f32 / total as f32 * 100.0 },
                },
            },
        )
        .await;
    }

    /// Spec §4.1 step 3 / §7: the final result is a direct, LLM-generated
    /// answer to the original query, grounded only in the raw payloads of
    /// steps that actually succeeded, written in the run's resolved
    /// language. Falls back to the last step's formatted result if the
    /// synthesis call itself fails.
    async fn synthesize_final_answer(&self, state: &EngineState) -> String {
        let mut grounding = String::new();
        for step in state.successful_steps() {
            if let Some(raw) = &step.raw_result {
                let serialized = raw.to_string();
                let trimmed: String = serialized.chars().take(2000).collect();
                grounding.push_str(&format!("- {}: {trimmed}\n", step.kind.tool_name()));
            }
        }

        let prompt = format!(
            "User's original request: {}\n\nResults gathered while handling it:\n{grounding}",
            state.original_query
        );
        let request = CompletionRequest::new(
            &self.model,
            single_turn(
                format!(
                    "Write a direct, complete answer to the user's original request, using only \
                     the information in the results below. Do not invent data that isn't \
                     present. Write the answer in {} (ISO 639-1).",
                    state.user_language
                ),
                prompt,
            ),
        );

        match self.llm.complete(request).await {
            Ok(response) => response.content,
            Err(e) => {
                warn!(error = %e, "final answer synthesis failed, falling back to the last step's formatted result");
                fallback_final_result(state)
            }
        }
    }
}

fn fallback_final_result(state: &EngineState) -> String {
    state.history.iter().rev().find_map(|s| s.formatted_result.clone()).unwrap_or_else(|| "No result produced.".to_string())
}

async fn send(tx: &mpsc::Sender<Event>, event: Event) {
    if tx.send(event).await.is_err() {
        warn!("event receiver dropped, run continues without a listener");
    }
}
