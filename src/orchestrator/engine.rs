//! Orchestrator engine: drives the pipeline through the state machine.
//!
//! One control loop owns the task context, the decision tracker, and the
//! resource meter. Interrupt requests land in a single-slot mailbox and are
//! honoured at safe points: between phases and between per-function
//! generations. Pausing parks the loop until resume or cancel; cancelling
//! abandons the task at the next safe point and returns the state to idle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::VoteConfig;
use crate::decision::{Decomposer, Expander, Generator, Validator};
use crate::error::{Error, Result};
use crate::llm::LLMClient;
use crate::tools::ToolRegistry;
use crate::types::{ExecutionResult, Language, Step, TaskContext};

use super::interrupt::{InterruptKind, InterruptMailbox, InterruptRequest, InterruptSource};
use super::resources::{BudgetStatus, MeteredClient, ResourceBudget, ResourceMeter, ResourceUsage};
use super::state::{OrchestratorState, PipelineState};
use super::tracker::{DecisionPhase, DecisionRecord, DecisionTracker, VotingDetails};

/// One entry in the engine's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub data: serde_json::Value,
}

/// Per-task counters included in the final metrics block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub steps_total: u32,
    pub steps_expand: u32,
    pub steps_decompose: u32,
    pub steps_generate: u32,
    pub steps_validate: u32,
    pub votes_total: u32,
    pub samples_total: u32,
    pub red_flags: u32,
    pub errors: u32,
    pub validation_passed: bool,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub api_calls: u64,
    pub duration_seconds: f64,
    pub estimated_cost_usd: f64,
}

/// Planned-function entry in the final artefact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSummary {
    pub id: String,
    pub signature: String,
    pub description: String,
}

/// Serialisable final artefact for a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub task: String,
    pub language: Language,
    pub requirements: Vec<String>,
    pub functions: Vec<FunctionSummary>,
    pub code: HashMap<String, String>,
    pub metrics: PipelineMetrics,
    pub log: Vec<PipelineEvent>,
}

/// Outcome of one `run_task` invocation.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Terminal state the loop ended in
    pub state: PipelineState,
    /// Present only when the pipeline completed
    pub result: Option<FinalResult>,
    pub error: Option<String>,
    pub elapsed_seconds: f64,
    pub decisions_made: usize,
}

impl PipelineOutcome {
    pub fn completed(&self) -> bool {
        self.state == PipelineState::Completed
    }
}

/// Live status view assembled for display.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorStatus {
    pub state: PipelineState,
    pub state_name: &'static str,
    pub task: String,
    pub phase_detail: String,
    pub progress_percent: f64,
    pub elapsed_seconds: f64,
    pub requirements_count: usize,
    pub functions_count: usize,
    pub code_count: usize,
    pub is_running: bool,
    pub is_paused: bool,
    pub can_resume: bool,
}

/// Internal shared progress counters for status assembly.
#[derive(Debug, Default)]
struct Progress {
    requirements: usize,
    functions: usize,
    generated: usize,
    validated: bool,
}

/// Cloneable control-and-observation handle for a running orchestrator.
///
/// Callers never mutate orchestrator state directly; pause/resume/cancel
/// enqueue requests which the control loop honours at the next safe point.
#[derive(Clone)]
pub struct OrchestratorHandle {
    mailbox: InterruptMailbox,
    cancel: CancelToken,
    state: Arc<Mutex<OrchestratorState>>,
    progress: Arc<Mutex<Progress>>,
}

impl OrchestratorHandle {
    /// Request a pause at the next safe point.
    pub fn pause(&self) {
        self.mailbox.post(InterruptRequest::pause(InterruptSource::User));
    }

    /// Request a resume from pause.
    pub fn resume(&self) {
        self.mailbox.post(InterruptRequest::resume());
    }

    /// Cancel the task; any in-flight LLM call is abandoned.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.mailbox.post(InterruptRequest::cancel());
    }

    /// Current pipeline state.
    pub fn state(&self) -> PipelineState {
        self.state.lock().expect("state poisoned").current()
    }

    /// Assemble the status view.
    pub fn status(&self) -> OrchestratorStatus {
        let state = self.state.lock().expect("state poisoned");
        let progress = self.progress.lock().expect("progress poisoned");

        let mut completed_steps = 0u32;
        if progress.requirements > 0 {
            completed_steps += 1;
        }
        if progress.functions > 0 {
            completed_steps += 1;
        }
        if progress.generated > 0 {
            completed_steps += 1;
        }
        if progress.validated {
            completed_steps += 1;
        }

        OrchestratorStatus {
            state: state.current(),
            state_name: state.current().phase_name(),
            task: state.task.clone(),
            phase_detail: state.phase_detail.clone(),
            progress_percent: completed_steps as f64 / 4.0 * 100.0,
            elapsed_seconds: state.elapsed_seconds(),
            requirements_count: progress.requirements,
            functions_count: progress.functions,
            code_count: progress.generated,
            is_running: state.is_running(),
            is_paused: state.current() == PipelineState::Paused,
            can_resume: state.resume_state().is_some(),
        }
    }
}

/// Flow decision taken at a safe point.
enum Flow {
    Continue,
    Stop,
}

/// The pipeline engine.
pub struct Orchestrator {
    config: VoteConfig,
    state: Arc<Mutex<OrchestratorState>>,
    progress: Arc<Mutex<Progress>>,
    tracker: DecisionTracker,
    meter: Arc<Mutex<ResourceMeter>>,
    mailbox: InterruptMailbox,
    cancel: CancelToken,
    expander: Expander,
    decomposer: Decomposer,
    generator: Generator,
    validator: Validator,
    tools: ToolRegistry,
    use_vote: bool,
    auto_pause_on_exceeded: bool,
    budget_warned: bool,
    events: Vec<PipelineEvent>,
    metrics: PipelineMetrics,
}

impl Orchestrator {
    /// Build an engine around an injected client and configuration.
    ///
    /// The client is wrapped so every LLM call is metered; no global
    /// singletons are involved.
    pub fn new(client: Arc<dyn LLMClient>, config: VoteConfig) -> Self {
        Self::with_budget(client, config, ResourceBudget::default())
    }

    /// Build with resource ceilings.
    pub fn with_budget(
        client: Arc<dyn LLMClient>,
        config: VoteConfig,
        budget: ResourceBudget,
    ) -> Self {
        let meter = Arc::new(Mutex::new(ResourceMeter::new(budget, config.cost_rates)));
        let metered: Arc<dyn LLMClient> = Arc::new(MeteredClient::new(client, meter.clone()));
        let cancel = CancelToken::new();

        Self {
            expander: Expander::new(metered.clone(), config.clone()).with_cancel(cancel.clone()),
            decomposer: Decomposer::new(metered.clone(), config.clone())
                .with_cancel(cancel.clone()),
            generator: Generator::new(metered.clone(), config.clone()).with_cancel(cancel.clone()),
            validator: Validator::new(metered, config.clone()).with_cancel(cancel.clone()),
            tools: ToolRegistry::with_execution_timeout(std::time::Duration::from_secs(
                config.execution_timeout_seconds,
            )),
            config,
            state: Arc::new(Mutex::new(OrchestratorState::new())),
            progress: Arc::new(Mutex::new(Progress::default())),
            tracker: DecisionTracker::new(),
            meter,
            mailbox: InterruptMailbox::new(),
            cancel,
            use_vote: true,
            auto_pause_on_exceeded: false,
            budget_warned: false,
            events: Vec::new(),
            metrics: PipelineMetrics::default(),
        }
    }

    /// Disable voting: each decision takes a single sample.
    pub fn with_use_vote(mut self, use_vote: bool) -> Self {
        self.use_vote = use_vote;
        self
    }

    /// Pause automatically when the budget is exceeded.
    pub fn with_auto_pause_on_exceeded(mut self, auto_pause: bool) -> Self {
        self.auto_pause_on_exceeded = auto_pause;
        self
    }

    /// Replace the tool registry.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Control-and-observation handle; cloneable and usable while a task
    /// runs on another tokio task.
    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            mailbox: self.mailbox.clone(),
            cancel: self.cancel.clone(),
            state: self.state.clone(),
            progress: self.progress.clone(),
        }
    }

    /// Decision log accessor.
    pub fn tracker(&self) -> &DecisionTracker {
        &self.tracker
    }

    /// Resource meter accessor.
    pub fn meter(&self) -> Arc<Mutex<ResourceMeter>> {
        self.meter.clone()
    }

    /// Dispatch a deterministic tool step (`Read`/`Search`/`Test`/`Apply`)
    /// through the registry. Tool failures come back as failed results,
    /// never as errors, and land in the event log either way.
    pub async fn dispatch_tool(&mut self, step: &Step) -> ExecutionResult {
        if !step.kind.is_tool() {
            return ExecutionResult::failed(format!(
                "Step kind '{}' is not a tool step",
                step.kind
            ));
        }

        let result = self.tools.execute_step(step).await;
        self.emit(
            "tool_executed",
            serde_json::json!({
                "step_id": step.id,
                "action": step.action,
                "success": result.success,
            }),
        );
        result
    }

    /// Run a full task through the pipeline.
    pub async fn run_task(&mut self, task: &str, language: Language) -> Result<PipelineOutcome> {
        {
            let state = self.state.lock().expect("state poisoned");
            if state.is_running() || state.current() == PipelineState::Paused {
                return Err(Error::PipelineBusy(
                    "a task is already in flight; pause or cancel it first".to_string(),
                ));
            }
        }

        // Fresh state for the new task; no leakage from the prior one
        self.cancel.reset();
        self.mailbox.clear();
        self.budget_warned = false;
        self.events.clear();
        self.metrics = PipelineMetrics::default();
        {
            let mut state = self.state.lock().expect("state poisoned");
            state.reset();
            state.task = task.to_string();
        }
        *self.progress.lock().expect("progress poisoned") = Progress::default();
        {
            let mut meter = self.meter.lock().expect("meter poisoned");
            meter.reset();
            meter.start_tracking();
        }

        let mut context = TaskContext::new(task, language);
        self.emit("task_started", serde_json::json!({ "task": task }));

        let run = self.drive(&mut context).await;

        let (state, elapsed) = {
            let state = self.state.lock().expect("state poisoned");
            (state.current(), state.elapsed_seconds())
        };

        match run {
            Ok(()) if state == PipelineState::Completed => {
                self.emit("task_complete", serde_json::json!({}));
                let result = self.final_result(&context, elapsed);
                Ok(PipelineOutcome {
                    state,
                    result: Some(result),
                    error: None,
                    elapsed_seconds: elapsed,
                    decisions_made: self.tracker.count(),
                })
            }
            Ok(()) => Ok(PipelineOutcome {
                state,
                result: None,
                error: self.state.lock().expect("state poisoned").error_message.clone(),
                elapsed_seconds: elapsed,
                decisions_made: self.tracker.count(),
            }),
            Err(e) => {
                warn!("pipeline failed: {}", e);
                self.metrics.errors += 1;
                let message = e.to_string();
                {
                    let mut state = self.state.lock().expect("state poisoned");
                    state.error_message = Some(message.clone());
                    // Only execution phases can fail into Error
                    if state.current().is_execution_phase() {
                        state.transition(PipelineState::Error, format!("Error: {}", message))?;
                    }
                }
                self.emit("task_error", serde_json::json!({ "error": message.clone() }));
                Ok(PipelineOutcome {
                    state: self.state.lock().expect("state poisoned").current(),
                    result: None,
                    error: Some(message),
                    elapsed_seconds: elapsed,
                    decisions_made: self.tracker.count(),
                })
            }
        }
    }

    /// Linear phase progression with safe points between units of work.
    async fn drive(&mut self, context: &mut TaskContext) -> Result<()> {
        // EXPAND
        self.transition(PipelineState::Expanding, "Expanding requirements")?;
        self.expand_phase(context).await?;
        if matches!(self.safe_point().await?, Flow::Stop) {
            return Ok(());
        }

        // DECOMPOSE
        self.transition(PipelineState::Decomposing, "Planning functions")?;
        self.decompose_phase(context).await?;
        if matches!(self.safe_point().await?, Flow::Stop) {
            return Ok(());
        }

        // GENERATE (per function)
        self.transition(PipelineState::Generating, "Generating code")?;
        let plan: Vec<Step> = context.functions().to_vec();
        let total = plan.len();
        for (index, step) in plan.iter().enumerate() {
            if matches!(self.safe_point().await?, Flow::Stop) {
                return Ok(());
            }
            self.set_phase_detail(format!(
                "function {}/{}: {}",
                index + 1,
                total,
                truncate(&step.signature, 40)
            ));
            self.generate_one(context, step).await?;
        }

        if total == 0 {
            // Nothing to validate
            self.transition(PipelineState::Completed, "No functions to generate")?;
            return Ok(());
        }

        if matches!(self.safe_point().await?, Flow::Stop) {
            return Ok(());
        }

        // VALIDATE, with a bounded retry loop back into GENERATING
        self.transition(PipelineState::Validating, "Validating code")?;
        let mut retries_left = self.config.max_validate_retries;
        loop {
            let failing = self.validate_phase(context).await?;
            if failing.is_empty() {
                self.metrics.validation_passed = true;
                break;
            }
            if retries_left == 0 {
                self.emit(
                    "validation_failed",
                    serde_json::json!({ "failing": failing.len() }),
                );
                break;
            }
            retries_left -= 1;

            self.transition(PipelineState::Generating, "Regenerating failing functions")?;
            for step in &failing {
                if matches!(self.safe_point().await?, Flow::Stop) {
                    return Ok(());
                }
                self.generate_one(context, step).await?;
            }
            self.transition(PipelineState::Validating, "Re-validating")?;
        }

        context.mark_complete();
        self.transition(PipelineState::Completed, "Pipeline complete")?;
        Ok(())
    }

    async fn expand_phase(&mut self, context: &mut TaskContext) -> Result<()> {
        let snapshot = context.snapshot();
        let task = context.task.clone();
        let outcome = self
            .expander
            .expand(&task, Some(&snapshot), self.use_vote)
            .await?;

        for requirement in &outcome.value {
            context.add_requirement(requirement.clone());
        }
        self.progress.lock().expect("progress poisoned").requirements =
            context.requirements().len();
        self.metrics.steps_expand += 1;
        self.metrics.steps_total += 1;

        let mut record = DecisionRecord::new(
            DecisionPhase::Expand,
            format!("Expanded task into {} requirements", outcome.value.len()),
        )
        .with_input(truncate(&task, 200))
        .with_output(outcome.value.join("; "));
        record = self.attach_voting(record, outcome.vote.as_ref());
        self.tracker.record(record);

        self.set_phase_detail(format!("{} requirements", context.requirements().len()));
        self.emit(
            "requirements_added",
            serde_json::json!({ "count": context.requirements().len() }),
        );
        Ok(())
    }

    async fn decompose_phase(&mut self, context: &mut TaskContext) -> Result<()> {
        let snapshot = context.snapshot();
        let requirements = context.requirements().to_vec();
        let outcome = self
            .decomposer
            .decompose(&requirements, context.language, Some(&snapshot), self.use_vote)
            .await?;

        for step in &outcome.value {
            context.add_function(step.clone());
        }
        self.progress.lock().expect("progress poisoned").functions = context.functions().len();
        self.metrics.steps_decompose += 1;
        self.metrics.steps_total += 1;

        let signatures: Vec<&str> = outcome.value.iter().map(|s| s.signature.as_str()).collect();
        let mut record = DecisionRecord::new(
            DecisionPhase::Decompose,
            format!("Planned {} functions", outcome.value.len()),
        )
        .with_input(format!("{} requirements", requirements.len()))
        .with_output(signatures.join("; "));
        record = self.attach_voting(record, outcome.vote.as_ref());
        self.tracker.record(record);

        self.set_phase_detail(format!("{} functions", context.functions().len()));
        self.emit(
            "functions_added",
            serde_json::json!({ "count": context.functions().len() }),
        );
        Ok(())
    }

    async fn generate_one(&mut self, context: &mut TaskContext, step: &Step) -> Result<()> {
        let snapshot = context.snapshot();
        let outcome = self
            .generator
            .generate(step, Some(&snapshot), context.language, self.use_vote)
            .await?;

        context.add_code(step.id.clone(), outcome.value.clone());
        self.progress.lock().expect("progress poisoned").generated =
            context.generated_code().len();
        self.metrics.steps_generate += 1;
        self.metrics.steps_total += 1;

        let mut record = DecisionRecord::new(
            DecisionPhase::Generate,
            format!("Implemented {}", step.signature),
        )
        .with_input(truncate(&step.description, 200))
        .with_output(truncate(&outcome.value, 200));
        record = self.attach_voting(record, outcome.vote.as_ref());
        self.tracker.record(record);

        self.emit(
            "code_generated",
            serde_json::json!({
                "step_id": step.id,
                "signature": step.signature,
                "code_length": outcome.value.len(),
            }),
        );
        Ok(())
    }

    /// Validate all generated code; returns the steps whose code failed.
    async fn validate_phase(&mut self, context: &mut TaskContext) -> Result<Vec<Step>> {
        let snapshot = context.snapshot();
        let mut failing = Vec::new();

        for step in context.functions().to_vec() {
            let Some(code) = context.code_for(&step.id).map(str::to_string) else {
                continue;
            };

            let report = self
                .validator
                .validate(&code, &step, Some(&snapshot), context.language)
                .await?;

            self.metrics.steps_validate += 1;
            self.metrics.steps_total += 1;

            self.tracker.record(
                DecisionRecord::new(
                    DecisionPhase::Validate,
                    format!("Reviewed {}", step.signature),
                )
                .with_input(truncate(&code, 200))
                .with_output(if report.passed() {
                    "passed".to_string()
                } else {
                    format!("failed: {}", report.errors.join("; "))
                })
                .with_rationale(if report.passed() {
                    "static pass and reviewer both clean".to_string()
                } else {
                    "reviewer flagged errors".to_string()
                }),
            );

            if !report.passed() {
                failing.push(step);
            }
        }

        self.set_phase_detail(format!(
            "{} implementations checked, {} failing",
            context.generated_code().len(),
            failing.len()
        ));
        self.progress.lock().expect("progress poisoned").validated = failing.is_empty();
        Ok(failing)
    }

    /// Honour pending interrupts and budget findings. Called between
    /// phases and between per-function generations.
    async fn safe_point(&mut self) -> Result<Flow> {
        if self.cancel.is_cancelled() {
            self.do_cancel()?;
            return Ok(Flow::Stop);
        }

        // Budget is advisory: emit once, optionally auto-pause
        let check = self.meter.lock().expect("meter poisoned").check_budget();
        if check.status == BudgetStatus::Exceeded && !self.budget_warned {
            self.budget_warned = true;
            warn!("{}", check.message);
            self.emit("budget_exceeded", serde_json::json!({ "message": check.message }));
            if self.auto_pause_on_exceeded {
                self.mailbox
                    .post(InterruptRequest::pause(InterruptSource::Budget));
            }
        }

        let Some(request) = self.mailbox.take() else {
            return Ok(Flow::Continue);
        };

        match request.kind {
            InterruptKind::Cancel => {
                self.do_cancel()?;
                Ok(Flow::Stop)
            }
            InterruptKind::Resume => Ok(Flow::Continue), // not paused: no-op
            InterruptKind::Pause => self.park().await,
        }
    }

    /// Enter `Paused`, then wait for resume or cancel.
    async fn park(&mut self) -> Result<Flow> {
        {
            let mut state = self.state.lock().expect("state poisoned");
            if !state.is_pausable() {
                return Ok(Flow::Continue);
            }
            state.transition(PipelineState::Paused, "Paused by request")?;
        }
        info!("pipeline paused");
        self.emit("paused", serde_json::json!({}));

        loop {
            self.mailbox.wait().await;
            let Some(request) = self.mailbox.take() else {
                continue;
            };

            match request.kind {
                // A second pause while paused is a no-op
                InterruptKind::Pause => continue,
                InterruptKind::Cancel => {
                    self.do_cancel()?;
                    return Ok(Flow::Stop);
                }
                InterruptKind::Resume => {
                    let resumed_to = {
                        let mut state = self.state.lock().expect("state poisoned");
                        let Some(prior) = state.resume_state() else {
                            continue;
                        };
                        state.transition(prior, "Resumed")?;
                        prior
                    };
                    info!("pipeline resumed to {}", resumed_to);
                    self.emit("resumed", serde_json::json!({ "state": resumed_to.to_string() }));
                    return Ok(Flow::Continue);
                }
            }
        }
    }

    /// Move to `Idle` through table edges: an execution phase routes
    /// through `Paused` first.
    fn do_cancel(&mut self) -> Result<()> {
        let mut state = self.state.lock().expect("state poisoned");
        if state.current().is_execution_phase() {
            state.transition(PipelineState::Paused, "Cancelling")?;
        }
        if state.current() != PipelineState::Idle {
            state.transition(PipelineState::Idle, "Cancelled by request")?;
        }
        drop(state);
        info!("pipeline cancelled");
        self.emit("cancelled", serde_json::json!({}));
        Ok(())
    }

    fn transition(&mut self, to: PipelineState, reason: &str) -> Result<()> {
        {
            let mut state = self.state.lock().expect("state poisoned");
            state.transition(to, reason)?;
        }
        self.emit(
            "state_change",
            serde_json::json!({ "state": to.to_string(), "reason": reason }),
        );
        Ok(())
    }

    fn set_phase_detail(&mut self, detail: String) {
        self.state.lock().expect("state poisoned").phase_detail = detail;
    }

    fn attach_voting(
        &mut self,
        record: DecisionRecord,
        vote: Option<&crate::types::VoteResult>,
    ) -> DecisionRecord {
        match vote {
            Some(vote) => {
                self.metrics.votes_total += 1;
                self.metrics.samples_total += vote.total_samples;
                let valid: u32 = vote.votes_per_group.values().sum();
                self.metrics.red_flags += vote.total_samples.saturating_sub(valid);

                let mut record = record.with_voting(VotingDetails::from_vote(
                    vote,
                    self.config.k,
                    self.config.max_samples,
                ));
                if vote.winning_margin < self.config.k {
                    record.rationale = format!(
                        "Plurality win without k-margin ({} < {})",
                        vote.winning_margin, self.config.k
                    );
                }
                record
            }
            None => record.with_rationale("Single sample, voting disabled"),
        }
    }

    fn emit(&mut self, event: &str, data: serde_json::Value) {
        self.events.push(PipelineEvent {
            timestamp: Utc::now(),
            event: event.to_string(),
            data,
        });
    }

    fn final_result(&mut self, context: &TaskContext, elapsed: f64) -> FinalResult {
        let usage: ResourceUsage = self.meter.lock().expect("meter poisoned").usage();
        self.metrics.tokens_input = usage.tokens_input;
        self.metrics.tokens_output = usage.tokens_output;
        self.metrics.api_calls = usage.api_calls;
        self.metrics.duration_seconds = elapsed;
        self.metrics.estimated_cost_usd = usage.estimated_cost_usd(&self.config.cost_rates);

        FinalResult {
            task: context.task.clone(),
            language: context.language,
            requirements: context.requirements().to_vec(),
            functions: context
                .functions()
                .iter()
                .map(|f| FunctionSummary {
                    id: f.id.clone(),
                    signature: f.signature.clone(),
                    description: f.description.clone(),
                })
                .collect(),
            code: context
                .generated_code()
                .iter()
                .cloned()
                .collect::<HashMap<String, String>>(),
            metrics: self.metrics.clone(),
            log: self.events.clone(),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
