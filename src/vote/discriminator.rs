//! Semantic discriminator: groups candidates by behavioural equivalence.
//!
//! Equivalence between two snippets is decided by the LLM through
//! [`LLMClient::compare_semantic`]. A candidate is compared against the
//! representative of each existing group in insertion order; the first YES
//! wins. The memo cache makes the relation reflexive and symmetric for the
//! duration of one vote. It is NOT transitive - the LLM may rule A=B and
//! B=C but A!=C - and nothing here assumes it is: groups are never
//! rebalanced when contradictions arise.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::llm::LLMClient;
use crate::types::Candidate;

/// Upper bound on memoised comparisons per session. One vote rarely exceeds
/// a few dozen candidates, so this is never hit in practice.
const MEMO_CAP: usize = 1024;

/// A cluster of candidates judged behaviourally equivalent.
#[derive(Debug, Clone)]
pub struct SemanticGroup {
    /// Identifier assigned in insertion order: `group_0`, `group_1`, ...
    pub id: String,
    /// First candidate inserted; all comparisons use this
    pub representative: Candidate,
    /// Members in classification order
    pub members: Vec<Candidate>,
}

impl SemanticGroup {
    /// Vote count = member count.
    pub fn votes(&self) -> u32 {
        self.members.len() as u32
    }
}

/// Memo key: digest of the unordered pair of trimmed contents.
fn memo_key(code_a: &str, code_b: &str) -> [u8; 32] {
    let a = code_a.trim();
    let b = code_b.trim();
    let (first, second) = if a <= b { (a, b) } else { (b, a) };

    let mut hasher = Sha256::new();
    hasher.update(first.as_bytes());
    hasher.update([0u8]);
    hasher.update(second.as_bytes());
    hasher.finalize().into()
}

/// Groups candidates by semantic equivalence via LLM comparison.
pub struct Discriminator {
    client: Arc<dyn LLMClient>,
    groups: Vec<SemanticGroup>,
    memo: HashMap<[u8; 32], bool>,
}

impl Discriminator {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            groups: Vec::new(),
            memo: HashMap::new(),
        }
    }

    /// Compare two snippets, memoised. Symmetric by construction of the key.
    pub async fn compare(&mut self, code_a: &str, code_b: &str, context: &str) -> Result<bool> {
        let key = memo_key(code_a, code_b);
        if let Some(&cached) = self.memo.get(&key) {
            debug!("discriminator cache hit");
            return Ok(cached);
        }

        let equivalent = self.client.compare_semantic(code_a, code_b, context).await?;

        if self.memo.len() < MEMO_CAP {
            self.memo.insert(key, equivalent);
        }

        Ok(equivalent)
    }

    /// Classify a candidate into an existing group or create a new one.
    ///
    /// Returns the id of the group the candidate joined.
    pub async fn classify(&mut self, candidate: &mut Candidate, context: &str) -> Result<String> {
        let mut matched: Option<usize> = None;
        for i in 0..self.groups.len() {
            let representative = self.groups[i].representative.content.clone();
            if self
                .compare(&candidate.content, &representative, context)
                .await?
            {
                matched = Some(i);
                break;
            }
        }

        let group_id = match matched {
            Some(i) => {
                let group = &mut self.groups[i];
                candidate.group_id = Some(group.id.clone());
                group.members.push(candidate.clone());
                group.id.clone()
            }
            None => {
                let id = format!("group_{}", self.groups.len());
                candidate.group_id = Some(id.clone());
                self.groups.push(SemanticGroup {
                    id: id.clone(),
                    representative: candidate.clone(),
                    members: vec![candidate.clone()],
                });
                id
            }
        };

        Ok(group_id)
    }

    /// Group leading the runner-up by at least `k` votes, if any.
    ///
    /// A single group trivially wins once its vote count reaches `k`.
    pub fn winner(&self, k: u32) -> Option<&SemanticGroup> {
        if self.groups.is_empty() {
            return None;
        }

        let mut sorted: Vec<&SemanticGroup> = self.groups.iter().collect();
        sorted.sort_by(|a, b| b.votes().cmp(&a.votes()));

        let leader = sorted[0];
        let runner_up_votes = sorted.get(1).map(|g| g.votes()).unwrap_or(0);

        if leader.votes().saturating_sub(runner_up_votes) >= k {
            Some(leader)
        } else {
            None
        }
    }

    /// Group with the most votes (plurality), if any.
    ///
    /// Ties go to the earliest-created group, keeping the pick stable
    /// across runs with the same candidate prefix.
    pub fn plurality(&self) -> Option<&SemanticGroup> {
        self.groups
            .iter()
            .fold(None, |best: Option<&SemanticGroup>, g| match best {
                Some(b) if b.votes() >= g.votes() => Some(b),
                _ => Some(g),
            })
    }

    /// Current leader margin: leader votes minus runner-up votes.
    pub fn leading_margin(&self) -> u32 {
        let mut votes: Vec<u32> = self.groups.iter().map(|g| g.votes()).collect();
        votes.sort_unstable_by(|a, b| b.cmp(a));
        match votes.as_slice() {
            [] => 0,
            [only] => *only,
            [first, second, ..] => first - second,
        }
    }

    /// Groups in insertion order.
    pub fn groups(&self) -> &[SemanticGroup] {
        &self.groups
    }

    /// Clear groups and cache for a new voting session.
    pub fn reset(&mut self) {
        self.groups.clear();
        self.memo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationRequest, LLMResponse, StopReason};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stub that answers equivalence by comparing first characters and
    /// counts how many comparisons reached the "LLM".
    struct PrefixClient {
        calls: AtomicUsize,
    }

    impl PrefixClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LLMClient for PrefixClient {
        async fn generate(&self, _request: GenerationRequest) -> crate::error::Result<LLMResponse> {
            unreachable!("stub compares directly")
        }

        async fn compare_semantic(
            &self,
            code_a: &str,
            code_b: &str,
            _context: &str,
        ) -> crate::error::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(code_a.chars().next() == code_b.chars().next())
        }
    }

    #[tokio::test]
    async fn test_classify_creates_groups_in_order() {
        let mut disc = Discriminator::new(PrefixClient::new());

        let mut a = Candidate::new("alpha implementation", 5);
        let mut b = Candidate::new("beta implementation", 5);
        let mut a2 = Candidate::new("alpha variant", 5);

        assert_eq!(disc.classify(&mut a, "").await.unwrap(), "group_0");
        assert_eq!(disc.classify(&mut b, "").await.unwrap(), "group_1");
        assert_eq!(disc.classify(&mut a2, "").await.unwrap(), "group_0");

        assert_eq!(disc.groups().len(), 2);
        assert_eq!(disc.groups()[0].votes(), 2);
        assert_eq!(disc.groups()[1].votes(), 1);
        assert_eq!(a.group_id.as_deref(), Some("group_0"));
        assert_eq!(a2.group_id.as_deref(), Some("group_0"));
    }

    #[tokio::test]
    async fn test_every_group_votes_equals_members() {
        let mut disc = Discriminator::new(PrefixClient::new());
        for content in ["a1 code", "b1 code", "a2 code", "c1 code", "a3 code"] {
            let mut candidate = Candidate::new(content, 5);
            disc.classify(&mut candidate, "").await.unwrap();
        }
        for group in disc.groups() {
            assert_eq!(group.votes() as usize, group.members.len());
        }
    }

    #[tokio::test]
    async fn test_memo_symmetric_and_stable() {
        let client = PrefixClient::new();
        let mut disc = Discriminator::new(client.clone());

        let first = disc.compare("abc", "abd", "").await.unwrap();
        // Interleave an unrelated comparison
        disc.compare("xyz", "qrs", "").await.unwrap();
        let reversed = disc.compare("abd", "abc", "").await.unwrap();

        assert_eq!(first, reversed);
        // Only two distinct pairs ever reached the client
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_group_wins_at_k_votes() {
        let mut disc = Discriminator::new(PrefixClient::new());

        let mut a = Candidate::new("alpha one", 5);
        disc.classify(&mut a, "").await.unwrap();
        assert!(disc.winner(2).is_none());

        let mut b = Candidate::new("alpha two", 5);
        disc.classify(&mut b, "").await.unwrap();
        let winner = disc.winner(2).expect("2 votes, no rival");
        assert_eq!(winner.id, "group_0");
    }

    #[tokio::test]
    async fn test_no_winner_when_margin_below_k() {
        let mut disc = Discriminator::new(PrefixClient::new());
        for content in ["alpha 1", "alpha 2", "beta 1", "beta 2"] {
            let mut candidate = Candidate::new(content, 5);
            disc.classify(&mut candidate, "").await.unwrap();
        }
        // 2 vs 2: margin 0
        assert!(disc.winner(1).is_none());
        assert_eq!(disc.leading_margin(), 0);
    }

    #[tokio::test]
    async fn test_reset_clears_groups_and_cache() {
        let client = PrefixClient::new();
        let mut disc = Discriminator::new(client.clone());

        let mut a = Candidate::new("alpha", 5);
        let mut b = Candidate::new("beta", 5);
        disc.classify(&mut a, "").await.unwrap();
        disc.classify(&mut b, "").await.unwrap();
        disc.reset();

        assert!(disc.groups().is_empty());
        // Same comparison hits the client again after reset
        let before = client.calls.load(Ordering::SeqCst);
        disc.compare("alpha", "beta", "").await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn test_memo_key_unordered() {
        assert_eq!(memo_key(" a ", "b"), memo_key("b", "a"));
        assert_ne!(memo_key("a", "b"), memo_key("a", "c"));
    }
}
