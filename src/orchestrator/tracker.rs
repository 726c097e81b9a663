//! Decision tracker: append-only log of pipeline decisions.
//!
//! Every decision is recorded with its input context, outcome, rationale,
//! and (for voted decisions) the full voting detail block. Records are
//! never mutated after append; the introspector renders them on demand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{short_id, VoteResult};

/// Phase a decision belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionPhase {
    Expand,
    Decompose,
    Generate,
    Validate,
}

impl DecisionPhase {
    pub const ALL: [DecisionPhase; 4] = [
        DecisionPhase::Expand,
        DecisionPhase::Decompose,
        DecisionPhase::Generate,
        DecisionPhase::Validate,
    ];
}

impl std::fmt::Display for DecisionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Expand => "expand",
            Self::Decompose => "decompose",
            Self::Generate => "generate",
            Self::Validate => "validate",
        };
        write!(f, "{}", s)
    }
}

/// Voting detail block attached to voted decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingDetails {
    pub candidates_total: u32,
    /// Candidates that survived the red-flag filter
    pub candidates_valid: u32,
    pub groups_formed: u32,
    pub votes_per_group: Vec<(String, u32)>,
    pub winning_group: String,
    pub winning_margin: u32,
    pub k_threshold: u32,
    pub max_samples: u32,
    pub samples_used: u32,
}

impl VotingDetails {
    /// Build from a finished voting session.
    pub fn from_vote(vote: &VoteResult, k: u32, max_samples: u32) -> Self {
        let mut votes_per_group: Vec<(String, u32)> = vote
            .votes_per_group
            .iter()
            .map(|(id, votes)| (id.clone(), *votes))
            .collect();
        votes_per_group.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Self {
            candidates_total: vote.total_samples,
            candidates_valid: vote.votes_per_group.values().sum(),
            groups_formed: vote.groups.len() as u32,
            votes_per_group,
            winning_group: vote.winner.group_id.clone().unwrap_or_default(),
            winning_margin: vote.winning_margin,
            k_threshold: k,
            max_samples,
            samples_used: vote.total_samples,
        }
    }

    /// Confidence bucket derived from the winning margin.
    pub fn confidence_level(&self) -> &'static str {
        if self.winning_margin >= 5 {
            "high"
        } else if self.winning_margin >= 3 {
            "medium"
        } else {
            "low"
        }
    }

    /// Render a textual explanation of the vote.
    pub fn to_explanation(&self) -> String {
        let mut lines = vec![
            format!("Candidates generated: {}", self.candidates_total),
            format!("Valid candidates (post red-flag): {}", self.candidates_valid),
            format!("Semantic groups formed: {}", self.groups_formed),
        ];

        if !self.votes_per_group.is_empty() {
            lines.push("Votes per group:".to_string());
            for (group, votes) in &self.votes_per_group {
                let marker = if *group == self.winning_group {
                    " <-- WINNER"
                } else {
                    ""
                };
                lines.push(format!("  {}: {} votes{}", group, votes, marker));
            }
        }

        lines.push(format!(
            "Winning margin: {} (threshold k={})",
            self.winning_margin, self.k_threshold
        ));
        lines.push(format!("Confidence: {}", self.confidence_level()));
        lines.push(format!(
            "Samples used: {}/{}",
            self.samples_used, self.max_samples
        ));

        lines.join("\n")
    }
}

/// One recorded decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub phase: DecisionPhase,
    pub description: String,
    pub input_context: String,
    pub output_result: String,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting: Option<VotingDetails>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives_considered: Vec<String>,
}

impl DecisionRecord {
    pub fn new(phase: DecisionPhase, description: impl Into<String>) -> Self {
        Self {
            id: short_id(),
            timestamp: Utc::now(),
            phase,
            description: description.into(),
            input_context: String::new(),
            output_result: String::new(),
            rationale: String::new(),
            voting: None,
            alternatives_considered: Vec::new(),
        }
    }

    pub fn with_input(mut self, input_context: impl Into<String>) -> Self {
        self.input_context = input_context.into();
        self
    }

    pub fn with_output(mut self, output_result: impl Into<String>) -> Self {
        self.output_result = output_result.into();
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_voting(mut self, voting: VotingDetails) -> Self {
        if self.rationale.is_empty() {
            self.rationale = format!("Won by a margin of {}", voting.winning_margin);
        }
        self.voting = Some(voting);
        self
    }

    pub fn with_alternatives(mut self, alternatives: Vec<String>) -> Self {
        self.alternatives_considered = alternatives;
        self
    }

    /// One-line summary.
    pub fn to_summary(&self) -> String {
        let description: String = self.description.chars().take(50).collect();
        format!("[{}] {}: {}", self.id, self.phase, description)
    }

    /// Full explanation for `/explain <id>`.
    pub fn to_explanation(&self) -> String {
        fn preview(text: &str) -> String {
            let mut p: String = text.chars().take(200).collect();
            if text.chars().count() > 200 {
                p.push_str("...");
            }
            p
        }

        let mut lines = vec![
            format!("Decision: {}", self.id),
            format!("Timestamp: {}", self.timestamp.format("%H:%M:%S")),
            format!("Phase: {}", self.phase.to_string().to_uppercase()),
            String::new(),
            format!("Description: {}", self.description),
            String::new(),
            "Input context:".to_string(),
            format!("  {}", preview(&self.input_context)),
            String::new(),
            "Result:".to_string(),
            format!("  {}", preview(&self.output_result)),
            String::new(),
            format!("Rationale: {}", self.rationale),
        ];

        if let Some(voting) = &self.voting {
            lines.push(String::new());
            lines.push("Voting details:".to_string());
            lines.push(voting.to_explanation());
        }

        if !self.alternatives_considered.is_empty() {
            lines.push(String::new());
            lines.push("Alternatives considered:".to_string());
            for alt in self.alternatives_considered.iter().take(5) {
                let preview: String = alt.chars().take(80).collect();
                lines.push(format!("  - {}...", preview));
            }
        }

        lines.join("\n")
    }
}

/// Append-only log of decisions with phase indexing.
#[derive(Debug, Default)]
pub struct DecisionTracker {
    decisions: Vec<DecisionRecord>,
}

impl DecisionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record; returns its id.
    pub fn record(&mut self, decision: DecisionRecord) -> String {
        let id = decision.id.clone();
        self.decisions.push(decision);
        id
    }

    pub fn get_by_id(&self, decision_id: &str) -> Option<&DecisionRecord> {
        self.decisions.iter().find(|d| d.id == decision_id)
    }

    /// Last `limit` decisions, oldest first.
    pub fn history(&self, limit: usize) -> &[DecisionRecord] {
        let start = self.decisions.len().saturating_sub(limit);
        &self.decisions[start..]
    }

    pub fn by_phase(&self, phase: DecisionPhase) -> Vec<&DecisionRecord> {
        self.decisions.iter().filter(|d| d.phase == phase).collect()
    }

    pub fn all(&self) -> &[DecisionRecord] {
        &self.decisions
    }

    pub fn count(&self) -> usize {
        self.decisions.len()
    }

    pub fn clear(&mut self) {
        self.decisions.clear();
    }

    /// Mean winning margin across voted decisions, if any.
    pub fn average_margin(&self) -> Option<f64> {
        let margins: Vec<u32> = self
            .decisions
            .iter()
            .filter_map(|d| d.voting.as_ref())
            .map(|v| v.winning_margin)
            .collect();
        if margins.is_empty() {
            None
        } else {
            Some(margins.iter().sum::<u32>() as f64 / margins.len() as f64)
        }
    }

    /// Textual summary across all decisions.
    pub fn summarize(&self) -> String {
        if self.decisions.is_empty() {
            return "No decisions recorded yet.".to_string();
        }

        let mut lines = vec![
            format!("Total decisions: {}", self.decisions.len()),
            String::new(),
            "By phase:".to_string(),
        ];

        for phase in DecisionPhase::ALL {
            let count = self.by_phase(phase).len();
            if count > 0 {
                lines.push(format!("  {}: {}", phase.to_string().to_uppercase(), count));
            }
        }

        lines.push(String::new());
        lines.push("Recent decisions:".to_string());
        for decision in self.history(3) {
            lines.push(format!("  - {}", decision.to_summary()));
        }

        if let Some(average) = self.average_margin() {
            lines.push(String::new());
            lines.push(format!("Average winning margin: {:.1}", average));
        }

        lines.join("\n")
    }

    /// Explanation of all decisions in one phase.
    pub fn explain_phase(&self, phase: DecisionPhase) -> String {
        let decisions = self.by_phase(phase);
        if decisions.is_empty() {
            return format!("No decisions in phase {}.", phase);
        }

        let mut lines = vec![
            format!(
                "Phase {}: {} decisions",
                phase.to_string().to_uppercase(),
                decisions.len()
            ),
            String::new(),
        ];

        for (i, decision) in decisions.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, decision.to_summary()));
            if let Some(voting) = &decision.voting {
                lines.push(format!(
                    "   Confidence: {} (margin {})",
                    voting.confidence_level(),
                    voting.winning_margin
                ));
            }
        }

        lines.join("\n")
    }
}
