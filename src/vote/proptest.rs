//! Property-based tests for the crate's quantified invariants.
//!
//! These validate properties that must hold for arbitrary inputs:
//!
//! - The red-flag filter is pure and idempotent
//! - Resource accounting is commutative and monotone
//! - Budget status is consistent with ceiling percentages
//! - Every accepted state transition is in the transition table

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::config::{CostRates, VoteConfig};
    use crate::orchestrator::{
        BudgetStatus, OrchestratorState, PipelineState, ResourceBudget, ResourceMeter,
        ResourceUsage,
    };
    use crate::types::{Candidate, Language};
    use crate::vote::RedFlagFilter;

    fn any_state() -> impl Strategy<Value = PipelineState> {
        prop_oneof![
            Just(PipelineState::Idle),
            Just(PipelineState::Expanding),
            Just(PipelineState::Decomposing),
            Just(PipelineState::Generating),
            Just(PipelineState::Validating),
            Just(PipelineState::Paused),
            Just(PipelineState::AwaitingDecision),
            Just(PipelineState::Completed),
            Just(PipelineState::Error),
        ]
    }

    fn usage(tokens_in: u64, tokens_out: u64, calls: u64) -> ResourceUsage {
        ResourceUsage {
            tokens_input: tokens_in,
            tokens_output: tokens_out,
            api_calls: calls,
            elapsed_seconds: 0.0,
        }
    }

    proptest! {
        #[test]
        fn red_flag_filter_is_idempotent(
            content in ".{0,400}",
            tokens in 0u64..2000,
        ) {
            let filter = RedFlagFilter::new(VoteConfig::default());
            let candidate = Candidate::new(content, tokens);

            let first = filter.check(&candidate, Language::Python);
            let second = filter.check(&candidate, Language::Python);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn resource_addition_is_commutative(
            a_in in 0u64..1_000_000, a_out in 0u64..1_000_000, a_calls in 0u64..10_000,
            b_in in 0u64..1_000_000, b_out in 0u64..1_000_000, b_calls in 0u64..10_000,
        ) {
            let a = usage(a_in, a_out, a_calls);
            let b = usage(b_in, b_out, b_calls);
            prop_assert_eq!(a + b, b + a);
            prop_assert_eq!((a + b).tokens_total(), a.tokens_total() + b.tokens_total());
        }

        #[test]
        fn tracking_is_monotone_non_decreasing(
            increments in proptest::collection::vec((0u64..10_000, 0u64..10_000, 0u64..10), 0..20),
        ) {
            let mut meter = ResourceMeter::new(ResourceBudget::default(), CostRates::default());
            let mut previous = meter.usage();

            for (tokens_in, tokens_out, calls) in increments {
                meter.track(tokens_in, tokens_out, calls);
                let current = meter.usage();
                prop_assert!(current.tokens_input >= previous.tokens_input);
                prop_assert!(current.tokens_output >= previous.tokens_output);
                prop_assert!(current.api_calls >= previous.api_calls);
                previous = current;
            }
        }

        #[test]
        fn budget_status_matches_worst_percentage(
            tokens in 0u64..2_000,
            max_tokens in 1u64..2_000,
            calls in 0u64..50,
            max_calls in 1u64..50,
        ) {
            let budget = ResourceBudget::default()
                .with_max_tokens(max_tokens)
                .with_max_api_calls(max_calls);
            let mut meter = ResourceMeter::new(budget, CostRates::default());
            meter.track(tokens, 0, calls);

            let check = meter.check_budget();
            let worst = (tokens as f64 / max_tokens as f64)
                .max(calls as f64 / max_calls as f64) * 100.0;

            let expected = if worst >= 100.0 {
                BudgetStatus::Exceeded
            } else if worst >= 80.0 {
                BudgetStatus::Warning
            } else {
                BudgetStatus::Ok
            };
            prop_assert_eq!(check.status, expected);
        }

        #[test]
        fn accepted_transitions_are_always_in_the_table(
            targets in proptest::collection::vec(any_state(), 0..30),
        ) {
            let mut state = OrchestratorState::new();

            for to in targets {
                let before = state.current();
                match state.transition(to, "walk") {
                    Ok(()) => prop_assert!(before.can_transition(to)),
                    Err(_) => {
                        // Rejected transitions leave the state untouched
                        prop_assert!(!before.can_transition(to));
                        prop_assert_eq!(state.current(), before);
                    }
                }
            }

            for t in state.history() {
                prop_assert!(t.from.can_transition(t.to));
            }
        }
    }
}
