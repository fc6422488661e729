// Randomized retry draw generator.
//
// Each attempt shuffles the receiver pool and walks the givers in input order,
// handing each one a random receiver that is neither themselves nor on their
// blacklist. An attempt that strands a giver is thrown away whole; there is no
// backtracking. The attempt budget is the only termination bound, so a
// feasible but tightly constrained list can still come back empty.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::num::NonZeroU32;

use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, trace};

/// Per-giver exclusions: `blacklist[giver]` holds the participants that giver
/// must never be assigned to. A missing key means no exclusions.
pub type Blacklist<T> = HashMap<T, HashSet<T>>;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Caller-contract violations. Failing to find a draw is not an error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DrawError {
    #[error("draw attempt budget must be greater than 0")]
    ZeroAttempts,

    #[error("participant {participant} appears more than once")]
    DuplicateParticipant { participant: String },
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// A complete draw: every participant gives to exactly one other participant
/// and receives from exactly one other participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment<T> {
    /// (giver, receiver) pairs, in the participant order handed to the generator.
    pairs: Vec<(T, T)>,
    /// 1-based index of the attempt that produced this draw.
    attempt: u32,
}

impl<T> Assignment<T> {
    pub fn pairs(&self) -> &[(T, T)] {
        &self.pairs
    }

    pub fn into_pairs(self) -> Vec<(T, T)> {
        self.pairs
    }

    /// Which attempt (starting at 1) succeeded.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl<T: Eq> Assignment<T> {
    /// The participant `giver` was assigned to, if `giver` took part.
    pub fn receiver_of(&self, giver: &T) -> Option<&T> {
        self.pairs
            .iter()
            .find(|(g, _)| g == giver)
            .map(|(_, receiver)| receiver)
    }
}

impl<T: Eq + Hash> Assignment<T> {
    pub fn into_map(self) -> HashMap<T, T> {
        self.pairs.into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Draw generator with a fixed attempt budget.
///
/// The generator holds no state besides its budget: it can be shared freely
/// and called concurrently with independent inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawGenerator {
    max_attempts: NonZeroU32,
}

impl DrawGenerator {
    pub fn new(max_attempts: NonZeroU32) -> Self {
        Self { max_attempts }
    }

    /// Build a generator from a raw budget, rejecting zero.
    pub fn try_new(max_attempts: u32) -> Result<Self, DrawError> {
        NonZeroU32::new(max_attempts)
            .map(Self::new)
            .ok_or(DrawError::ZeroAttempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }

    /// Draw with the thread-local random source.
    ///
    /// See [`DrawGenerator::generate_with_rng`].
    pub fn generate<T>(
        &self,
        participants: &[T],
        blacklist: &Blacklist<T>,
    ) -> Result<Option<Assignment<T>>, DrawError>
    where
        T: Eq + Hash + Clone + Debug,
    {
        self.generate_with_rng(participants, blacklist, &mut rand::rng())
    }

    /// Try to assign every participant a receiver.
    ///
    /// Returns `Ok(None)` when fewer than two participants are given, or when
    /// no attempt within the budget produced a complete draw. The two cases
    /// of an impossible list and an unlucky run are not told apart.
    ///
    /// Blacklist keys and entries that are not participants are ignored.
    /// Duplicate participants are rejected before any attempt is made.
    pub fn generate_with_rng<T, R>(
        &self,
        participants: &[T],
        blacklist: &Blacklist<T>,
        rng: &mut R,
    ) -> Result<Option<Assignment<T>>, DrawError>
    where
        T: Eq + Hash + Clone + Debug,
        R: Rng + ?Sized,
    {
        ensure_unique(participants)?;

        if participants.len() < 2 {
            debug!(
                participants = participants.len(),
                "not enough participants for a draw"
            );
            return Ok(None);
        }

        for attempt in 1..=self.max_attempts.get() {
            match try_assign(participants, blacklist, rng) {
                Some(pairs) => {
                    debug!(attempt, participants = participants.len(), "draw found");
                    return Ok(Some(Assignment { pairs, attempt }));
                }
                None => trace!(attempt, "draw attempt abandoned"),
            }
        }

        debug!(
            max_attempts = self.max_attempts.get(),
            participants = participants.len(),
            "no draw found within attempt budget"
        );
        Ok(None)
    }
}

fn ensure_unique<T>(participants: &[T]) -> Result<(), DrawError>
where
    T: Eq + Hash + Debug,
{
    let mut seen = HashSet::with_capacity(participants.len());
    for participant in participants {
        if !seen.insert(participant) {
            return Err(DrawError::DuplicateParticipant {
                participant: format!("{participant:?}"),
            });
        }
    }
    Ok(())
}

/// One greedy pass over the givers. Returns `None` as soon as a giver is left
/// with no acceptable receiver in the pool.
fn try_assign<T, R>(
    participants: &[T],
    blacklist: &Blacklist<T>,
    rng: &mut R,
) -> Option<Vec<(T, T)>>
where
    T: Eq + Hash + Clone,
    R: Rng + ?Sized,
{
    let mut pool: Vec<&T> = participants.iter().collect();
    pool.shuffle(rng);

    let mut pairs = Vec::with_capacity(participants.len());
    for giver in participants {
        let excluded = blacklist.get(giver);
        let possibilities: Vec<usize> = pool
            .iter()
            .enumerate()
            .filter(|&(_, &candidate)| {
                candidate != giver && !excluded.is_some_and(|set| set.contains(candidate))
            })
            .map(|(index, _)| index)
            .collect();

        let &index = possibilities.choose(rng)?;
        let receiver = pool.remove(index);
        pairs.push((giver.clone(), receiver.clone()));
    }

    Some(pairs)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
