//! First-to-ahead-by-k voting over stochastic LLM output.
//!
//! The voter draws candidates from a generator, rejects obvious garbage
//! through the red-flag filter, groups the survivors by semantic
//! equivalence, and declares a winner as soon as one group leads the
//! runner-up by `k` votes. On exhaustion the plurality group wins.

use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::VoteConfig;
use crate::error::{Error, Result};
use crate::llm::{LLMClient, LLMResponse};
use crate::types::{Candidate, Language, Step, VoteResult};

use super::discriminator::Discriminator;
use super::red_flag::RedFlagFilter;

/// Runs first-to-ahead-by-k voting sessions.
pub struct Voter {
    config: VoteConfig,
    discriminator: Discriminator,
    red_flag: RedFlagFilter,
    cancel: CancelToken,
}

/// Internal accumulator for one session.
struct Session {
    samples: u32,
    invalid: Vec<Candidate>,
    winner_group: Option<String>,
}

impl Voter {
    pub fn new(client: Arc<dyn LLMClient>, config: VoteConfig) -> Self {
        Self {
            discriminator: Discriminator::new(client),
            red_flag: RedFlagFilter::new(config.clone()),
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Share a cancellation token with the caller.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run a sequential voting session for a step.
    ///
    /// The generator is invoked once per sample. Generator failures are
    /// logged and skipped without consuming a sample; red-flagged candidates
    /// consume a sample but are never classified. Terminates on a k-margin
    /// winner, on `max_samples`, on cancellation, or on the session
    /// timeout (`vote_timeout_seconds`).
    pub async fn vote<G, F>(
        &mut self,
        step: &Step,
        context: &str,
        language: Language,
        generator: G,
    ) -> Result<VoteResult>
    where
        G: Fn(Step, String) -> F,
        F: Future<Output = Result<LLMResponse>> + Send,
    {
        let timeout = Duration::from_secs(self.config.vote_timeout_seconds);
        match tokio::time::timeout(timeout, self.vote_inner(step, context, language, generator))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(timeout.as_millis() as u64)),
        }
    }

    async fn vote_inner<G, F>(
        &mut self,
        step: &Step,
        context: &str,
        language: Language,
        generator: G,
    ) -> Result<VoteResult>
    where
        G: Fn(Step, String) -> F,
        F: Future<Output = Result<LLMResponse>> + Send,
    {
        let k = self.config.k;
        let max_samples = self.config.max_samples;

        self.discriminator.reset();
        let mut session = Session {
            samples: 0,
            invalid: Vec::new(),
            winner_group: None,
        };

        info!(step_id = %step.id, %k, %max_samples, "starting vote: {}", step.description);

        // Transport failures do not consume samples; this bound keeps a
        // permanently failing generator from looping forever.
        let mut failures_left = max_samples;
        let mut cancelled = false;

        while session.samples < max_samples && session.winner_group.is_none() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let response = match generator(step.clone(), context.to_string()).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(step_id = %step.id, "generation failed: {}", e);
                    failures_left = failures_left.saturating_sub(1);
                    if failures_left == 0 {
                        break;
                    }
                    continue;
                }
            };

            session.samples += 1;
            let mut candidate = Candidate::new(response.content, response.tokens_output);

            let flag = self.red_flag.check(&candidate, language);
            if !flag.passed {
                debug!(step_id = %step.id, "red-flagged: {:?}", flag.reason);
                candidate.is_valid = false;
                candidate.rejection = flag.reason;
                session.invalid.push(candidate);
                continue;
            }

            self.discriminator.classify(&mut candidate, context).await?;

            if let Some(winner) = self.discriminator.winner(k) {
                info!(
                    step_id = %step.id,
                    "winner after {} samples: {} with {} votes",
                    session.samples, winner.id, winner.votes()
                );
                session.winner_group = Some(winner.id.clone());
            }
        }

        self.build_result(step, session, !cancelled)
    }

    /// Run a voting session with parallel generation in bounded batches.
    ///
    /// Generation for a batch is issued concurrently; completions are
    /// collected in issue order and classified sequentially so group
    /// identity stays reproducible for a fixed schedule.
    pub async fn vote_parallel<G, F>(
        &mut self,
        step: &Step,
        context: &str,
        language: Language,
        generator: G,
    ) -> Result<VoteResult>
    where
        G: Fn(Step, String) -> F,
        F: Future<Output = Result<LLMResponse>> + Send,
    {
        let timeout = Duration::from_secs(self.config.vote_timeout_seconds);
        match tokio::time::timeout(
            timeout,
            self.vote_parallel_inner(step, context, language, generator),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(timeout.as_millis() as u64)),
        }
    }

    async fn vote_parallel_inner<G, F>(
        &mut self,
        step: &Step,
        context: &str,
        language: Language,
        generator: G,
    ) -> Result<VoteResult>
    where
        G: Fn(Step, String) -> F,
        F: Future<Output = Result<LLMResponse>> + Send,
    {
        let k = self.config.k;
        let max_samples = self.config.max_samples;
        let batch_size = self.config.effective_batch_size();

        self.discriminator.reset();
        let mut session = Session {
            samples: 0,
            invalid: Vec::new(),
            winner_group: None,
        };

        info!(step_id = %step.id, %batch_size, "starting parallel vote");

        let mut failures_left = max_samples;
        let mut cancelled = false;

        while session.samples < max_samples && session.winner_group.is_none() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let batch = batch_size.min(max_samples - session.samples) as usize;
            let responses = join_all(
                (0..batch).map(|_| generator(step.clone(), context.to_string())),
            )
            .await;

            let mut made_progress = false;
            for response in responses {
                let response = match response {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(step_id = %step.id, "batch generation failed: {}", e);
                        failures_left = failures_left.saturating_sub(1);
                        continue;
                    }
                };

                made_progress = true;
                session.samples += 1;
                let mut candidate = Candidate::new(response.content, response.tokens_output);

                let flag = self.red_flag.check(&candidate, language);
                if !flag.passed {
                    candidate.is_valid = false;
                    candidate.rejection = flag.reason;
                    session.invalid.push(candidate);
                    continue;
                }

                self.discriminator.classify(&mut candidate, context).await?;
            }

            if let Some(winner) = self.discriminator.winner(k) {
                session.winner_group = Some(winner.id.clone());
            }

            if !made_progress && failures_left == 0 {
                break;
            }
        }

        self.build_result(step, session, !cancelled)
    }

    fn build_result(&self, step: &Step, session: Session, complete: bool) -> Result<VoteResult> {
        if !session.invalid.is_empty() {
            debug!(
                step_id = %step.id,
                "{} of {} samples were red-flagged",
                session.invalid.len(),
                session.samples
            );
        }

        let winner_group = match session.winner_group {
            Some(id) => self
                .discriminator
                .groups()
                .iter()
                .find(|g| g.id == id)
                .expect("winner group exists"),
            None => {
                // No k-margin winner: plurality wins. Recorded upstream in
                // the decision log with a no-margin note.
                match self.discriminator.plurality() {
                    Some(group) => {
                        debug!(step_id = %step.id, "no k-margin, plurality group {}", group.id);
                        group
                    }
                    None => return Err(Error::no_valid_candidates(step.id.clone())),
                }
            }
        };

        let mut groups = HashMap::new();
        let mut votes_per_group = HashMap::new();
        for group in self.discriminator.groups() {
            groups.insert(group.id.clone(), group.members.clone());
            votes_per_group.insert(group.id.clone(), group.votes());
        }

        Ok(VoteResult {
            winner: winner_group.representative.clone(),
            groups,
            votes_per_group,
            total_samples: session.samples,
            winning_margin: self.discriminator.leading_margin(),
            complete,
        })
    }
}
