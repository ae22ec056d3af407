//! # Beam Search
//!
//! Keeps the `num_beams` best partial translations at every step instead of
//! committing to the single most likely token.
//!
//! ## Algorithm:
//! 1. Ask the model for next-token log-probabilities of every live hypothesis
//! 2. Extend each hypothesis with its best candidates and rank all extensions
//! 3. Extensions ending in EOS are finished and scored with a length penalty;
//!    the best `num_beams` others stay alive
//! 4. Stop once `num_beams` hypotheses have finished (early stopping), nothing
//!    is alive, or the length limit is reached
//!
//! Ranking is a total order (score, then beam index, then token id), so the same
//! log-probabilities always produce the same output.

use anyhow::{anyhow, Result};
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct BeamSearch {
    pub num_beams: usize,
    /// Maximum number of generated tokens, EOS included
    pub max_len: usize,
    pub eos_token: u32,
    /// Exponent applied to the hypothesis length when normalising scores
    pub length_penalty: f32,
}

#[derive(Debug, Clone)]
struct Hypothesis {
    tokens: Vec<u32>,
    score: f32,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    beam: usize,
    token: u32,
    score: f32,
}

impl BeamSearch {
    /// Run the search.
    ///
    /// `step` receives the live sequences (all the same length, each starting
    /// with `start_token`) and must return one log-probability row per sequence.
    /// The returned tokens exclude `start_token` and the final EOS.
    pub fn search<F>(&self, start_token: u32, mut step: F) -> Result<Vec<u32>>
    where
        F: FnMut(&[Vec<u32>]) -> Result<Vec<Vec<f32>>>,
    {
        let num_beams = self.num_beams.max(1);
        let mut alive = vec![Hypothesis {
            tokens: vec![start_token],
            score: 0.0,
        }];
        let mut finished: Vec<Hypothesis> = Vec::new();

        for _ in 0..self.max_len {
            let sequences: Vec<Vec<u32>> = alive.iter().map(|h| h.tokens.clone()).collect();
            let log_probs = step(&sequences)?;
            if log_probs.len() != alive.len() {
                return Err(anyhow!(
                    "expected {} rows of log-probabilities, got {}",
                    alive.len(),
                    log_probs.len()
                ));
            }

            let mut candidates = Vec::new();
            for (beam, (hypothesis, row)) in alive.iter().zip(&log_probs).enumerate() {
                for (token, lp) in top_k(row, 2 * num_beams) {
                    candidates.push(Candidate {
                        beam,
                        token,
                        score: hypothesis.score + lp,
                    });
                }
            }
            candidates.sort_by(rank);

            let mut next = Vec::with_capacity(num_beams);
            for candidate in candidates {
                if next.len() == num_beams {
                    break;
                }
                let mut tokens = alive[candidate.beam].tokens.clone();
                tokens.push(candidate.token);
                let hypothesis = Hypothesis {
                    tokens,
                    score: candidate.score,
                };

                if candidate.token == self.eos_token {
                    finished.push(hypothesis);
                } else {
                    next.push(hypothesis);
                }
            }

            alive = next;
            if finished.len() >= num_beams || alive.is_empty() {
                break;
            }
        }

        let best = finished
            .iter()
            .chain(alive.iter())
            .map(|h| (self.normalized(h), h))
            .fold(None::<(f32, &Hypothesis)>, |best, (score, h)| match best {
                Some((best_score, _)) if best_score.total_cmp(&score) != Ordering::Less => best,
                _ => Some((score, h)),
            })
            .map(|(_, h)| h)
            .ok_or_else(|| anyhow!("beam search produced no hypotheses"))?;

        let generated = &best.tokens[1..];
        let generated = match generated.last() {
            Some(&token) if token == self.eos_token => &generated[..generated.len() - 1],
            _ => generated,
        };
        Ok(generated.to_vec())
    }

    fn normalized(&self, hypothesis: &Hypothesis) -> f32 {
        let len = (hypothesis.tokens.len() - 1).max(1) as f32;
        hypothesis.score / len.powf(self.length_penalty)
    }
}

/// Higher score first; ties by beam, then token, so ordering never depends on
/// sort stability or input order.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.beam.cmp(&b.beam))
        .then(a.token.cmp(&b.token))
}

/// The `k` highest finite entries of `row` as `(token, log_prob)`.
fn top_k(row: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut entries: Vec<(u32, f32)> = row
        .iter()
        .enumerate()
        .filter(|(_, lp)| lp.is_finite())
        .map(|(i, lp)| (i as u32, *lp))
        .collect();

    let order = |a: &(u32, f32), b: &(u32, f32)| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0));
    if entries.len() > k {
        entries.select_nth_unstable_by(k, order);
        entries.truncate(k);
    }
    entries.sort_by(order);
    entries
}
