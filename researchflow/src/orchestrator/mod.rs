//! The research pipeline orchestrator.
//!
//! One [`Orchestrator::run`] call walks
//! `Idle -> Searching -> Selecting -> Extracting -> Aggregating -> Done`.
//! Contract violations are rejected before any service call. A search
//! failure ends the run as `Failed`; extract failures never do, they are
//! recorded per URL.

mod state;


use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregator::{aggregate, Aggregation};
use crate::cancellation::CancellationToken;
use crate::config::PipelineConfig;
use crate::domain::SourcePolicy;
use crate::errors::Result;
use crate::models::{SearchResult, Usage, Warning, WarningSource};
use crate::observability::{BatchReport, NoOpRunObserver, RunObserver, RunTimer};
use crate::rate_limit::RateLimiter;
use crate::run::{request_fingerprint, PipelineRun, RunFailure, RunRequest, RunState, RunStatus};
use crate::services::{ExtractService, SearchService};
use crate::stages::{plan_batches, ExtractParams, ExtractStage, SearchInput, SearchStage};

use state::RunStateMachine;

/// Mutable record of a run under construction.
struct RunDraft {
    run_id: Uuid,
    fingerprint: String,
    source_policy: Option<SourcePolicy>,
    started_at: chrono::DateTime<Utc>,
    search_results: Vec<SearchResult>,
    warnings: Vec<Warning>,
    usage: Usage,
    timings: BTreeMap<String, f64>,
}

impl RunDraft {
    fn record(&mut self, timer: RunTimer) {
        let (name, ms) = timer.finish();
        self.timings.insert(name.to_string(), ms);
    }

    fn finish(
        mut self,
        request: RunRequest,
        status: RunStatus,
        history: Vec<RunState>,
        aggregation: Aggregation,
        failure: Option<RunFailure>,
    ) -> PipelineRun {
        self.warnings.extend(aggregation.warnings);
        PipelineRun {
            run_id: self.run_id,
            request_fingerprint: self.fingerprint,
            objective: request.objective,
            queries: request.queries,
            source_policy: self.source_policy,
            status,
            state_history: history,
            search_results: self.search_results,
            results: aggregation.results,
            errors: aggregation.errors,
            warnings: self.warnings,
            usage: self.usage,
            stage_timings_ms: self.timings,
            started_at: self.started_at,
            ended_at: Utc::now(),
            failure,
        }
    }
}

/// Runs search then batched extraction against a pair of services.
#[derive(Clone)]
pub struct Orchestrator {
    config: PipelineConfig,
    search: SearchStage,
    extract: ExtractStage,
    observer: Arc<dyn RunObserver>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("search", &self.search)
            .field("extract", &self.extract)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator after validating `config`.
    ///
    /// When the config carries a rate limit, each service gets its own
    /// limiter. Use [`Orchestrator::with_search_limiter`] and
    /// [`Orchestrator::with_extract_limiter`] to share limiters between
    /// orchestrators instead.
    pub fn new(
        config: PipelineConfig,
        search_service: Arc<dyn SearchService>,
        extract_service: Arc<dyn ExtractService>,
    ) -> Result<Self> {
        config.validate()?;

        let mut search = SearchStage::new(search_service)
            .with_budget(config.search_budget)
            .with_fetch_policy(config.search_fetch.clone())
            .with_retry(config.search_retry.clone())
            .with_max_results_ceiling(config.limits.max_results_ceiling);
        let mut extract = ExtractStage::new(extract_service).with_retry(config.extract_retry.clone());

        if let Some(rate_limit) = config.rate_limit {
            search = search.with_rate_limiter(Arc::new(RateLimiter::new(rate_limit)));
            extract = extract.with_rate_limiter(Arc::new(RateLimiter::new(rate_limit)));
        }

        Ok(Self {
            config,
            search,
            extract,
            observer: Arc::new(NoOpRunObserver),
        })
    }

    /// Sets the run observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Shares a rate limiter for search calls.
    #[must_use]
    pub fn with_search_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.search = self.search.with_rate_limiter(limiter);
        self
    }

    /// Shares a rate limiter for extract calls.
    #[must_use]
    pub fn with_extract_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.extract = self.extract.with_rate_limiter(limiter);
        self
    }

    /// Returns the validated configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the pipeline to completion.
    ///
    /// Returns `Err` only for contract violations, which are detected before
    /// any service call. Every other outcome is a [`PipelineRun`].
    pub async fn run(&self, request: RunRequest) -> Result<PipelineRun> {
        self.run_with_cancellation(request, &CancellationToken::new())
            .await
    }

    /// Runs the pipeline, stopping before any new extract batch once
    /// `token` is cancelled. Batches already in flight complete.
    pub async fn run_with_cancellation(
        &self,
        request: RunRequest,
        token: &CancellationToken,
    ) -> Result<PipelineRun> {
        let limits = self.config.limits;
        request.validate(limits.max_results_ceiling)?;
        let (source_policy, normalization_warnings) = match &request.source_policy {
            Some(policy) => {
                let (normalized, warnings) = policy.normalized(limits.max_domains)?;
                (Some(normalized).filter(|p| !p.is_empty()), warnings)
            }
            None => (None, Vec::new()),
        };

        let total = RunTimer::start("total");
        let mut draft = RunDraft {
            run_id: Uuid::new_v4(),
            fingerprint: request_fingerprint(&request),
            source_policy,
            started_at: Utc::now(),
            search_results: Vec::new(),
            warnings: normalization_warnings,
            usage: Usage::new(),
            timings: BTreeMap::new(),
        };
        let run_id = draft.run_id.to_string();
        let observer = &*self.observer;
        let mut machine = RunStateMachine::new(&run_id, observer);

        tracing::info!(
            run_id = %run_id,
            fingerprint = %draft.fingerprint,
            queries = request.queries.len(),
            top_n = request.top_n,
            "Research run started"
        );

        if let Err(cancelled) = token.check() {
            tracing::info!(run_id = %run_id, error = %cancelled, "Run cancelled before search");
            machine.transition(RunState::Cancelled)?;
            draft.warnings.push(Warning::new(
                WarningSource::Pipeline,
                format!("run cancelled before search started: {}", cancel_reason(token)),
            ));
            draft.record(total);
            let history = machine.into_history();
            return Ok(draft.finish(
                request,
                RunStatus::Cancelled,
                history,
                Aggregation::default(),
                None,
            ));
        }

        // Searching
        machine.transition(RunState::Searching)?;
        let timer = RunTimer::start("search");
        let input = SearchInput {
            objective: request.objective.clone(),
            queries: request.queries.clone(),
            max_results: request.effective_max_results(limits.max_results_ceiling),
            source_policy: draft.source_policy.clone(),
            max_age_seconds: request.freshness_max_age_seconds,
        };
        let searched = self
            .search
            .run(input, |attempt| observer.on_retry(&run_id, attempt))
            .await;
        draft.record(timer);

        let output = match searched {
            Ok(output) => output,
            Err(error) => {
                tracing::error!(run_id = %run_id, error = %error, "Search failed, run failed");
                machine.transition(RunState::Failed)?;
                draft.record(total);
                let history = machine.into_history();
                return Ok(draft.finish(
                    request,
                    RunStatus::Failed,
                    history,
                    Aggregation::default(),
                    Some(RunFailure::from(&error)),
                ));
            }
        };
        draft.usage.merge(&output.usage);
        draft.warnings.extend(output.warnings);
        draft.search_results = output.results;

        // Selecting
        machine.transition(RunState::Selecting)?;
        let k = request.top_n.min(draft.search_results.len());
        let selection: Vec<String> = draft.search_results[..k]
            .iter()
            .map(|r| r.url.clone())
            .collect();
        tracing::debug!(run_id = %run_id, selected = k, available = draft.search_results.len(), "Selected URLs");

        // Extracting
        machine.transition(RunState::Extracting)?;
        let plan = match plan_batches(&selection, limits.batch_cap) {
            Ok(plan) => plan,
            Err(error) => {
                tracing::error!(run_id = %run_id, error = %error, "Batch planning failed");
                machine.transition(RunState::Failed)?;
                draft.record(total);
                let history = machine.into_history();
                return Ok(draft.finish(
                    request,
                    RunStatus::Failed,
                    history,
                    Aggregation::default(),
                    Some(RunFailure::from(&error)),
                ));
            }
        };

        let timer = RunTimer::start("extract");
        let params = ExtractParams {
            objective: Some(request.objective.clone()),
            queries: request.queries.clone(),
            excerpts: request.extract.excerpts,
            full_content: request.extract.full_content,
            fetch_policy: request
                .extract
                .fetch_policy
                .clone()
                .unwrap_or_else(|| self.config.extract_fetch.clone()),
        };
        let concurrency = self.config.max_concurrent_batches.min(plan.batches.len()).max(1);
        let params = &params;
        let run_id_ref = run_id.as_str();
        let outcomes: Vec<_> = stream::iter(plan.batches.iter())
            .map(|batch| async move {
                if let Err(cancelled) = token.check() {
                    tracing::debug!(
                        run_id = run_id_ref,
                        batch = batch.index,
                        error = %cancelled,
                        "Batch skipped after cancellation"
                    );
                    return None;
                }
                let outcome = self
                    .extract
                    .run_batch(batch, params, |attempt| observer.on_retry(run_id_ref, attempt))
                    .await;
                observer.on_batch_complete(
                    run_id_ref,
                    &BatchReport {
                        index: outcome.index,
                        size: batch.len(),
                        succeeded: outcome.results.len(),
                        failed: outcome.errors.len(),
                        attempts: outcome.attempts,
                        duration_ms: outcome.duration_ms,
                    },
                );
                Some(outcome)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        draft.record(timer);

        let skipped_batches = outcomes.iter().filter(|o| o.is_none()).count();
        let outcomes: Vec<_> = outcomes.into_iter().flatten().collect();
        for outcome in &outcomes {
            draft.usage.merge(&outcome.usage);
        }

        // Aggregating
        machine.transition(RunState::Aggregating)?;
        let timer = RunTimer::start("aggregate");
        let aggregation = aggregate(
            &draft.search_results[..k],
            &plan,
            outcomes,
            self.config.extract_budget,
        );
        draft.record(timer);

        let status = if skipped_batches > 0 {
            draft.warnings.push(Warning::new(
                WarningSource::Pipeline,
                format!(
                    "run cancelled ({}): {} of {} selected URLs were not extracted",
                    cancel_reason(token),
                    aggregation.unresolved,
                    plan.unique_urls().len()
                ),
            ));
            machine.transition(RunState::Cancelled)?;
            RunStatus::Cancelled
        } else {
            machine.transition(RunState::Done)?;
            RunStatus::Done
        };
        draft.record(total);

        tracing::info!(
            run_id = %run_id,
            state = %machine.state(),
            results = aggregation.results.len(),
            errors = aggregation.errors.len(),
            "Research run finished"
        );

        let history = machine.into_history();
        Ok(draft.finish(request, status, history, aggregation, None))
    }
}

fn cancel_reason(token: &CancellationToken) -> String {
    token.reason().unwrap_or_else(|| "no reason given".to_string())
}
