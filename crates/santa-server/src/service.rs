// Draw service: request validation, draw generation, and persistence.
//
// Sits between the HTTP routes and the storage layer. Knows nothing about
// status codes; routes map `ServiceError::kind` onto them.

use anyhow::Context;
use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use santa_core::config::Config;
use santa_core::db::Database;
use santa_core::draw::{DrawError, DrawGenerator};
use santa_core::model::{DrawRecord, Participant, SantaList};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("List not found")]
    ListNotFound { list_id: i64 },

    #[error("Participant not found")]
    ParticipantNotFound { participant_id: i64 },

    #[error("Blacklisted participant not found")]
    BlacklistTargetNotFound { participant_id: i64 },

    #[error("A participant can't be in their own blacklist")]
    SelfBlacklist,

    #[error("Participants are not in the same list")]
    DifferentLists,

    #[error("Participant already in blacklist")]
    AlreadyBlacklisted,

    #[error("No draw can be generated for this list")]
    NoDrawPossible,

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("invalid draw input: {0}")]
    InvalidDrawInput(#[from] DrawError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Coarse classification used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Internal,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::ListNotFound { .. }
            | ServiceError::ParticipantNotFound { .. }
            | ServiceError::BlacklistTargetNotFound { .. } => ErrorKind::NotFound,
            ServiceError::SelfBlacklist
            | ServiceError::DifferentLists
            | ServiceError::AlreadyBlacklisted
            | ServiceError::NoDrawPossible
            | ServiceError::EmptyField { .. } => ErrorKind::BadRequest,
            ServiceError::InvalidDrawInput(_) | ServiceError::Storage(_) => ErrorKind::Internal,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct SantaService {
    db: Database,
    generator: DrawGenerator,
    latest_draws_limit: usize,
}

impl SantaService {
    pub fn new(db: Database, generator: DrawGenerator, latest_draws_limit: usize) -> Self {
        Self {
            db,
            generator,
            latest_draws_limit,
        }
    }

    /// Open the configured database and build the generator from the
    /// configured attempt budget.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let db = Database::open(&config.db_path).context("failed to open database")?;
        let generator = config
            .draw
            .generator()
            .context("invalid draw configuration")?;
        Ok(Self::new(db, generator, config.draw.latest_draws_limit))
    }

    // ------------------------------------------------------------------
    // Lists and participants
    // ------------------------------------------------------------------

    pub fn lists(&self) -> ServiceResult<Vec<SantaList>> {
        Ok(self.db.lists()?)
    }

    pub fn create_list(&self, name: &str) -> ServiceResult<SantaList> {
        let name = non_empty(name, "name")?;
        let list = self.db.create_list(name, Utc::now())?;
        info!(list_id = list.id, "created list {:?}", list.name);
        Ok(list)
    }

    pub fn participants(&self, list_id: i64) -> ServiceResult<Vec<Participant>> {
        self.require_list(list_id)?;
        Ok(self.db.participants(list_id)?)
    }

    pub fn add_participant(&self, list_id: i64, name: &str) -> ServiceResult<Participant> {
        self.require_list(list_id)?;
        let name = non_empty(name, "name")?;
        let participant = self.db.add_participant(list_id, name)?;
        info!(
            list_id,
            participant_id = participant.id,
            "added participant {:?}",
            participant.name
        );
        Ok(participant)
    }

    // ------------------------------------------------------------------
    // Draws
    // ------------------------------------------------------------------

    /// Draw the list with the thread-local random source.
    pub fn create_draw(&self, list_id: i64) -> ServiceResult<DrawRecord> {
        self.create_draw_with_rng(list_id, &mut rand::rng())
    }

    /// Generate and store a new draw for the list. Nothing is stored when the
    /// generator finds no draw.
    pub fn create_draw_with_rng<R>(&self, list_id: i64, rng: &mut R) -> ServiceResult<DrawRecord>
    where
        R: Rng + ?Sized,
    {
        self.require_list(list_id)?;

        let (participants, blacklist) = self.db.draw_constraints(list_id)?;
        debug!(
            list_id,
            participants = participants.len(),
            blacklisted_givers = blacklist.len(),
            "generating draw"
        );

        let Some(assignment) = self
            .generator
            .generate_with_rng(&participants, &blacklist, rng)?
        else {
            warn!(
                list_id,
                participants = participants.len(),
                max_attempts = self.generator.max_attempts(),
                "no draw could be generated"
            );
            return Err(ServiceError::NoDrawPossible);
        };

        let attempt = assignment.attempt();
        let draw = self
            .db
            .record_draw(list_id, Utc::now(), assignment.pairs())?;
        info!(list_id, draw_id = draw.id, attempt, "stored new draw");
        Ok(draw)
    }

    /// Most recent draws of a list, newest first. Unknown lists have none.
    pub fn latest_draws(&self, list_id: i64) -> ServiceResult<Vec<DrawRecord>> {
        Ok(self.db.latest_draws(list_id, self.latest_draws_limit)?)
    }

    // ------------------------------------------------------------------
    // Blacklists
    // ------------------------------------------------------------------

    pub fn blacklist(&self, participant_id: i64) -> ServiceResult<Vec<Participant>> {
        self.require_participant(participant_id)?;
        Ok(self.db.blacklist(participant_id)?)
    }

    /// Forbid `participant_id` from giving to `target_id`, returning the
    /// owner's updated blacklist.
    pub fn add_to_blacklist(
        &self,
        participant_id: i64,
        target_id: i64,
    ) -> ServiceResult<Vec<Participant>> {
        let owner = self.require_participant(participant_id)?;
        let target = self
            .db
            .get_participant(target_id)?
            .ok_or(ServiceError::BlacklistTargetNotFound {
                participant_id: target_id,
            })?;

        if owner.id == target.id {
            return Err(ServiceError::SelfBlacklist);
        }
        if owner.list_id != target.list_id {
            return Err(ServiceError::DifferentLists);
        }
        if self.db.has_blacklist_link(owner.id, target.id)? {
            return Err(ServiceError::AlreadyBlacklisted);
        }

        self.db.add_blacklist_link(owner.id, target.id)?;
        info!(
            owner_id = owner.id,
            target_id = target.id,
            "added blacklist entry"
        );
        Ok(self.db.blacklist(owner.id)?)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn require_list(&self, list_id: i64) -> ServiceResult<SantaList> {
        self.db
            .get_list(list_id)?
            .ok_or(ServiceError::ListNotFound { list_id })
    }

    fn require_participant(&self, participant_id: i64) -> ServiceResult<Participant> {
        self.db
            .get_participant(participant_id)?
            .ok_or(ServiceError::ParticipantNotFound { participant_id })
    }
}

fn non_empty<'a>(value: &'a str, field: &'static str) -> ServiceResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::EmptyField { field });
    }
    Ok(trimmed)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
