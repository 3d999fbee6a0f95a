//! Policy-driven proposal: an agent edits sequences inside a simulated environment
//! built on the surrogate model, and every finished episode yields one candidate.

use crate::explorer::{ExplorerError, ProposalContext, ProposalStrategy, check_exhaustion};
use crate::model::{Model, ModelError};
use crate::selection::{CumulativeSelector, boltzmann_weights};
use crate::sequence::{Alphabet, Sequence};
use log::debug;
use rand::Rng;
use rand_core::RngCore;
use std::collections::VecDeque;

/// Environment steps spent pretraining, per sequence of batch size.
pub const PRETRAIN_STEPS_PER_BATCH_ITEM: usize = 50;

/// Set `position` to `symbol`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationAction {
    pub position: usize,
    pub symbol: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub observation: Sequence,
    pub action: MutationAction,
    pub reward: f64,
}

/// One episode, from reset to the finished candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    pub transitions: Vec<Transition>,
}

impl Trajectory {
    pub fn total_return(&self) -> f64 {
        self.transitions.iter().map(|t| t.reward).sum()
    }
}

/// A trainable agent choosing mutation actions.
pub trait Policy {
    fn name(&self) -> String;

    fn act(&mut self, observation: &Sequence, alphabet: &Alphabet, rng: &mut dyn RngCore) -> MutationAction;

    /// Updates the policy from collected episodes and returns its training loss.
    fn train(&mut self, trajectories: &[Trajectory]) -> f64;

    fn reset(&mut self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub reward: f64,
    pub done: bool,
}

/// Fixed-length editing episodes over the surrogate model. The terminal step is
/// rewarded with the model's fitness of the final state; earlier steps earn nothing.
#[derive(Debug, Clone)]
pub struct MutationEnvironment {
    start: Sequence,
    state: Sequence,
    max_num_steps: usize,
    steps: usize,
}

impl MutationEnvironment {
    pub fn new(start: Sequence, max_num_steps: usize) -> Self {
        Self {
            state: start.clone(),
            start,
            max_num_steps: max_num_steps.max(1),
            steps: 0,
        }
    }

    pub fn start(&self) -> &Sequence {
        &self.start
    }

    /// Sequence the next episode starts from.
    pub fn set_start(&mut self, start: Sequence) {
        self.start = start;
    }

    pub fn state(&self) -> &Sequence {
        &self.state
    }

    pub fn reset(&mut self) -> &Sequence {
        self.state = self.start.clone();
        self.steps = 0;
        &self.state
    }

    pub fn step(&mut self, action: MutationAction, model: &mut dyn Model) -> Result<StepOutcome, ModelError> {
        if action.position < self.state.len() {
            let mut symbols = self.state.as_bytes().to_vec();
            symbols[action.position] = action.symbol;
            self.state = Sequence::from_bytes(symbols);
        }
        self.steps += 1;
        let done = self.steps >= self.max_num_steps;
        let reward = if done { model.get_fitness(&self.state)? } else { 0.0 };
        Ok(StepOutcome { reward, done })
    }
}

/// A sequence with the model's score and the measurement cost when it was scored.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSequence {
    pub score: f64,
    pub sequence: Sequence,
    pub cost: u64,
}

fn sort_best_first(scored: &mut [ScoredSequence]) {
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.sequence.cmp(&b.sequence))
    });
}

/// Explorer driven by a [`Policy`].
///
/// The first proposal pretrains the policy for `50 * batch_size` environment steps.
/// Episodes start from the scored sequences in round-robin order, best first.
pub struct PolicyExplorer<P: Policy> {
    policy: P,
    meas_seqs: Vec<ScoredSequence>,
    meas_seqs_it: usize,
    top_seqs: VecDeque<ScoredSequence>,
    env: Option<MutationEnvironment>,
    env_steps: usize,
    has_pretrained_agent: bool,
}

impl<P: Policy> PolicyExplorer<P> {
    pub fn new(policy: P) -> Self {
        Self {
            policy,
            meas_seqs: Vec::new(),
            meas_seqs_it: 0,
            top_seqs: VecDeque::new(),
            env: None,
            env_steps: 0,
            has_pretrained_agent: false,
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Best-so-far leaders, oldest first, capped at `batch_size`.
    ///
    /// Pretraining seeds the deque with the best `batch_size` measured sequences in
    /// ascending order, so the newest entry is the best one rather than the worst of
    /// the measured tail. Afterwards a leader is pushed only when it beats the newest
    /// entry, which keeps scores non-decreasing from front to back.
    pub fn top_seqs(&self) -> &VecDeque<ScoredSequence> {
        &self.top_seqs
    }

    pub fn has_pretrained_agent(&self) -> bool {
        self.has_pretrained_agent
    }

    pub fn env_steps(&self) -> usize {
        self.env_steps
    }

    /// Plays one episode. On its boundary the round-robin counter advances and the
    /// environment's next start becomes `meas_seqs[counter]`.
    fn run_episode(&mut self, ctx: &mut ProposalContext<'_>) -> Result<(Sequence, Trajectory), ExplorerError> {
        let env = self.env.as_mut().ok_or(ExplorerError::EmptyPopulation)?;
        env.reset();
        let mut trajectory = Trajectory::default();
        loop {
            let observation = env.state().clone();
            let action = self.policy.act(&observation, ctx.alphabet, ctx.rng);
            let outcome = env.step(action, ctx.model)?;
            self.env_steps += 1;
            trajectory.transitions.push(Transition {
                observation,
                action,
                reward: outcome.reward,
            });
            if outcome.done {
                break;
            }
        }
        let finished = env.state().clone();

        if !self.meas_seqs.is_empty() {
            self.meas_seqs_it = (self.meas_seqs_it + 1) % self.meas_seqs.len();
            env.set_start(self.meas_seqs[self.meas_seqs_it].sequence.clone());
        }
        Ok((finished, trajectory))
    }

    fn merge_scored(&mut self, sequences: &[Sequence], ctx: &mut ProposalContext<'_>) -> Result<(), ExplorerError> {
        for seq in sequences {
            let score = ctx.model.get_fitness(seq)?;
            self.meas_seqs.push(ScoredSequence {
                score,
                sequence: seq.clone(),
                cost: ctx.model.cost(),
            });
        }
        sort_best_first(&mut self.meas_seqs);
        Ok(())
    }

    fn pretrain_agent(&mut self, ctx: &mut ProposalContext<'_>) -> Result<(), ExplorerError> {
        let batch_size = ctx.batch_size;
        let measured: Vec<Sequence> = ctx.model.measured_sequences().keys().cloned().collect();
        if measured.is_empty() {
            return Err(ExplorerError::EmptyPopulation);
        }
        self.meas_seqs.clear();
        self.merge_scored(&measured, ctx)?;

        // Ascending seed: the back holds the best measured sequence.
        self.top_seqs = self.meas_seqs.iter().take(batch_size).rev().cloned().collect();
        self.meas_seqs_it = 0;
        self.env = Some(MutationEnvironment::new(
            self.meas_seqs[0].sequence.clone(),
            ctx.virtual_screen,
        ));

        let max_env_steps = PRETRAIN_STEPS_PER_BATCH_ITEM * batch_size;
        let start_steps = self.env_steps;
        let mut all_seqs = ctx.novelty_filter();

        while self.env_steps - start_steps < max_env_steps {
            let mut proposed = Vec::with_capacity(batch_size);
            let mut trajectories = Vec::with_capacity(batch_size);
            for _ in 0..batch_size {
                let (seq, trajectory) = self.run_episode(ctx)?;
                proposed.push(seq);
                trajectories.push(trajectory);
            }

            let new_seqs: Vec<Sequence> = proposed
                .into_iter()
                .filter(|s| all_seqs.report_interesting(s))
                .collect();
            self.merge_scored(&new_seqs, ctx)?;
            debug!(
                "Pretraining: {}/{} env steps, {} scored sequences",
                self.env_steps - start_steps,
                max_env_steps,
                self.meas_seqs.len()
            );

            let leader = &self.meas_seqs[0];
            if self.top_seqs.back().is_none_or(|top| leader.score > top.score) {
                debug!("New top sequence {} ({})", leader.sequence, leader.score);
                self.top_seqs.push_back(leader.clone());
                while self.top_seqs.len() > batch_size {
                    self.top_seqs.pop_front();
                }
            }

            self.meas_seqs_it = 0;
            let loss = self.policy.train(&trajectories);
            debug!("Policy training loss {}", loss);
        }
        self.has_pretrained_agent = true;
        Ok(())
    }
}

impl<P: Policy> ProposalStrategy for PolicyExplorer<P> {
    fn name(&self) -> String {
        format!("Policy_{}", self.policy.name())
    }

    fn propose(&mut self, ctx: &mut ProposalContext<'_>) -> Result<Vec<Sequence>, ExplorerError> {
        if ctx.batch_size == 0 {
            return Ok(Vec::new());
        }
        if !self.has_pretrained_agent {
            self.pretrain_agent(ctx)?;
        }

        let mut filter = ctx.novelty_filter();
        let mut new_seqs = Vec::with_capacity(ctx.batch_size);
        let mut trajectories = Vec::new();
        let mut episodes = 0;
        while new_seqs.len() < ctx.batch_size && episodes < ctx.max_proposal_attempts {
            episodes += 1;
            let (seq, trajectory) = self.run_episode(ctx)?;
            trajectories.push(trajectory);
            if filter.report_interesting(&seq) {
                new_seqs.push(seq);
            }
        }
        let new_seqs = check_exhaustion(new_seqs, ctx.batch_size, episodes)?;

        self.merge_scored(&new_seqs, ctx)?;
        let loss = self.policy.train(&trajectories);
        debug!("Policy training loss {} over {} episodes", loss, episodes);
        Ok(new_seqs)
    }

    fn reset(&mut self) {
        self.meas_seqs.clear();
        self.meas_seqs_it = 0;
        self.top_seqs.clear();
        self.env = None;
        self.has_pretrained_agent = false;
        self.policy.reset();
    }
}

/// Tabular softmax policy: a uniformly chosen position, then a symbol drawn from that
/// position's learned preferences. Trained with REINFORCE against the batch-mean
/// return.
#[derive(Debug, Clone)]
pub struct SitePreferencePolicy {
    learning_rate: f64,
    symbols: Vec<u8>,
    logits: Vec<Vec<f64>>,
}

impl SitePreferencePolicy {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            symbols: Vec::new(),
            logits: Vec::new(),
        }
    }

    pub fn preferences(&self, position: usize) -> Option<Vec<f64>> {
        self.logits.get(position).map(|row| boltzmann_weights(row, 1.0))
    }

    fn ensure_shape(&mut self, len: usize, alphabet: &Alphabet) {
        if self.symbols != alphabet.symbols() || self.logits.len() != len {
            self.symbols = alphabet.symbols().to_vec();
            self.logits = vec![vec![0.0; alphabet.len()]; len];
        }
    }
}

impl Default for SitePreferencePolicy {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl Policy for SitePreferencePolicy {
    fn name(&self) -> String {
        format!("SitePreference_lr{}", self.learning_rate)
    }

    fn act(&mut self, observation: &Sequence, alphabet: &Alphabet, rng: &mut dyn RngCore) -> MutationAction {
        self.ensure_shape(observation.len(), alphabet);
        if observation.is_empty() {
            return MutationAction {
                position: 0,
                symbol: alphabet.symbols()[0],
            };
        }
        let position = rng.random_range(0..observation.len());
        let probabilities = boltzmann_weights(&self.logits[position], 1.0);
        let u = rng.random::<f64>();
        let index = CumulativeSelector::new(&probabilities)
            .map(|s| s.index_for(u))
            .unwrap_or(0);
        MutationAction {
            position,
            symbol: self.symbols[index],
        }
    }

    fn train(&mut self, trajectories: &[Trajectory]) -> f64 {
        if trajectories.is_empty() || self.logits.is_empty() {
            return 0.0;
        }
        let returns: Vec<f64> = trajectories.iter().map(Trajectory::total_return).collect();
        let baseline = returns.iter().sum::<f64>() / returns.len() as f64;
        let mut total_advantage = 0.0;

        for (trajectory, &ret) in trajectories.iter().zip(&returns) {
            let advantage = ret - baseline;
            total_advantage += advantage.abs();
            for transition in &trajectory.transitions {
                let Some(row) = self.logits.get_mut(transition.action.position) else {
                    continue;
                };
                let Some(chosen) = self.symbols.iter().position(|&s| s == transition.action.symbol)
                else {
                    continue;
                };
                let probabilities = boltzmann_weights(row, 1.0);
                for (k, logit) in row.iter_mut().enumerate() {
                    let indicator = if k == chosen { 1.0 } else { 0.0 };
                    *logit += self.learning_rate * advantage * (indicator - probabilities[k]);
                }
            }
        }
        total_advantage / trajectories.len() as f64
    }

    fn reset(&mut self) {
        self.symbols.clear();
        self.logits.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explorer::Explorer;
    use crate::explorer::test_utils::{debug_settings, g_count_model, seqs};
    use crate::history::BatchHistory;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    /// Always writes `G` at position 0.
    struct WriteG {
        trained: usize,
    }

    impl Policy for WriteG {
        fn name(&self) -> String {
            "WriteG".to_string()
        }

        fn act(&mut self, _observation: &Sequence, _alphabet: &Alphabet, _rng: &mut dyn RngCore) -> MutationAction {
            MutationAction {
                position: 0,
                symbol: b'G',
            }
        }

        fn train(&mut self, _trajectories: &[Trajectory]) -> f64 {
            self.trained += 1;
            0.0
        }
    }

    #[test]
    fn environment_rewards_terminal_state() {
        let mut model = g_count_model(&["AAAA"], 0.0);
        let mut env = MutationEnvironment::new(Sequence::from("AAAA"), 2);
        let first = env
            .step(MutationAction { position: 1, symbol: b'G' }, model.as_mut())
            .unwrap();
        assert_eq!(first, StepOutcome { reward: 0.0, done: false });
        let second = env
            .step(MutationAction { position: 2, symbol: b'G' }, model.as_mut())
            .unwrap();
        assert_eq!(second, StepOutcome { reward: 2.0, done: true });
        assert_eq!(env.state(), &Sequence::from("AGGA"));

        env.reset();
        assert_eq!(env.state(), &Sequence::from("AAAA"));
    }

    #[test]
    fn out_of_range_action_is_a_no_op() {
        let mut model = g_count_model(&["AA"], 0.0);
        let mut env = MutationEnvironment::new(Sequence::from("AA"), 1);
        env.step(MutationAction { position: 9, symbol: b'G' }, model.as_mut())
            .unwrap();
        assert_eq!(env.state(), &Sequence::from("AA"));
    }

    #[test]
    fn episode_boundary_advances_round_robin_start() {
        let mut explorer = PolicyExplorer::new(WriteG { trained: 0 });
        explorer.meas_seqs = seqs(&["UUUU", "CCCC", "AAAA"])
            .into_iter()
            .map(|sequence| ScoredSequence {
                score: 0.0,
                sequence,
                cost: 0,
            })
            .collect();
        explorer.env = Some(MutationEnvironment::new(Sequence::from("UUUU"), 1));

        let mut model = g_count_model(&["UUUU"], 0.0);
        let alphabet = Alphabet::rna();
        let batches = BatchHistory::new();
        let mut rng = ChaCha8Rng::from_seed([0; 32]);
        let mut ctx = ProposalContext {
            alphabet: &alphabet,
            batch_size: 2,
            virtual_screen: 1,
            max_proposal_attempts: 10,
            batches: &batches,
            model: model.as_mut(),
            rng: &mut rng,
        };

        let (first, trajectory) = explorer.run_episode(&mut ctx).unwrap();
        assert_eq!(first, Sequence::from("GUUU"));
        assert_eq!(trajectory.total_return(), 1.0);
        assert_eq!(explorer.meas_seqs_it, 1);
        assert_eq!(explorer.env.as_ref().unwrap().start(), &Sequence::from("CCCC"));

        let (second, _) = explorer.run_episode(&mut ctx).unwrap();
        assert_eq!(second, Sequence::from("GCCC"));
        explorer.run_episode(&mut ctx).unwrap();
        assert_eq!(explorer.meas_seqs_it, 0, "Counter wraps around");
        assert_eq!(explorer.env.as_ref().unwrap().start(), &Sequence::from("UUUU"));
    }

    #[test]
    fn policy_explorer_pretrains_then_proposes_novel_sequences() {
        let mut explorer = Explorer::new(
            PolicyExplorer::new(SitePreferencePolicy::new(0.5)),
            crate::explorer::ExplorerSettings {
                virtual_screen: 2,
                ..debug_settings(4)
            },
        );
        explorer
            .set_model(g_count_model(&["UCGAUCGA", "AAAAUUUU"], 0.1), true)
            .unwrap();
        let proposals = explorer.propose_samples().unwrap();
        assert!(!proposals.is_empty() && proposals.len() <= 4);
        let measured = explorer.model().unwrap().measured_sequences();
        assert!(proposals.iter().all(|s| !measured.contains_key(s)));

        let strategy = explorer.strategy();
        assert!(strategy.has_pretrained_agent());
        assert!(strategy.env_steps() >= PRETRAIN_STEPS_PER_BATCH_ITEM * 4);
        assert!(strategy.top_seqs().len() <= 4);
        assert!(explorer.explorer_type().starts_with("Policy_SitePreference"));
    }

    #[test]
    fn reset_forgets_pretraining() {
        let mut strategy = PolicyExplorer::new(WriteG { trained: 0 });
        strategy.has_pretrained_agent = true;
        strategy.env = Some(MutationEnvironment::new(Sequence::from("A"), 1));
        strategy.reset();
        assert!(!strategy.has_pretrained_agent());
        assert!(strategy.env.is_none());
    }

    #[test]
    fn site_preference_policy_reinforces_rewarded_symbols() {
        let mut policy = SitePreferencePolicy::new(1.0);
        let alphabet = Alphabet::rna();
        let mut rng = ChaCha8Rng::from_seed([1; 32]);
        policy.act(&Sequence::from("AA"), &alphabet, &mut rng);

        let episode = |symbol: u8, reward: f64| Trajectory {
            transitions: vec![Transition {
                observation: Sequence::from("AA"),
                action: MutationAction { position: 0, symbol },
                reward,
            }],
        };
        let loss = policy.train(&[episode(b'G', 1.0), episode(b'A', 0.0)]);
        assert!((loss - 0.5).abs() < 1e-12);

        let prefs = policy.preferences(0).unwrap();
        let g = alphabet.index_of(b'G').unwrap();
        let a = alphabet.index_of(b'A').unwrap();
        assert!(prefs[g] > prefs[a], "Rewarded symbol should become more likely");
        assert_eq!(
            policy.preferences(1).unwrap(),
            vec![0.25; 4],
            "Untouched positions stay uniform"
        );
    }

    #[test]
    fn top_seqs_are_seeded_best_last_and_stay_ascending() {
        let mut explorer = Explorer::new(
            PolicyExplorer::new(SitePreferencePolicy::new(0.5)),
            crate::explorer::ExplorerSettings {
                virtual_screen: 2,
                ..debug_settings(2)
            },
        );
        explorer
            .set_model(g_count_model(&["AAAAAAAA", "GAAAAAAA", "GGGAAAAA"], 0.0), true)
            .unwrap();
        explorer.propose_samples().unwrap();

        let top: Vec<f64> = explorer.strategy().top_seqs().iter().map(|t| t.score).collect();
        assert!(!top.is_empty() && top.len() <= 2);
        assert!(
            top.windows(2).all(|w| w[0] <= w[1]),
            "Leaders must be ordered worst to best: {:?}",
            top
        );
        assert!(
            *top.last().unwrap() >= 3.0,
            "The newest leader is at least the best measured sequence: {:?}",
            top
        );
        assert!(
            top.iter().all(|&score| score >= 1.0),
            "The worst measured sequence is never seeded: {:?}",
            top
        );
    }
}
