//! Dynamic chain mutation
//!
//! Filters are resolved through the module registry and linked into the
//! chain without touching the slots around the insertion point. The cursor
//! never moves here; a slot inserted right after the cursor is simply what
//! the next forward step reaches.

use tracing::debug;

use crate::chain::SlotId;
use crate::error::{Result, TrackError};

use super::slot::{FilterSlot, SlotHandle};
use super::Track;

enum Position {
    After(SlotId),
    Before(SlotId),
    Head,
    Tail,
}

impl Track {
    /// Insert a filter right after the cursor
    pub fn insert_after_current(&mut self, name: &str) -> Result<SlotHandle> {
        let at = self.cursor.ok_or(TrackError::EmptyChain)?;
        self.insert_after(at, name)
    }

    /// Insert a filter right before the cursor
    pub fn insert_before_current(&mut self, name: &str) -> Result<SlotHandle> {
        let at = self.cursor.ok_or(TrackError::EmptyChain)?;
        self.insert_before(at, name)
    }

    pub fn insert_at_head(&mut self, name: &str) -> Result<SlotHandle> {
        self.insert(Position::Head, name)
    }

    pub fn insert_at_tail(&mut self, name: &str) -> Result<SlotHandle> {
        self.insert(Position::Tail, name)
    }

    pub(crate) fn insert_after(&mut self, at: SlotId, name: &str) -> Result<SlotHandle> {
        self.insert(Position::After(at), name)
    }

    pub(crate) fn insert_before(&mut self, at: SlotId, name: &str) -> Result<SlotHandle> {
        self.insert(Position::Before(at), name)
    }

    fn insert(&mut self, pos: Position, name: &str) -> Result<SlotHandle> {
        if self.state.is_terminal() {
            return Err(TrackError::InvalidState {
                state: self.state.as_str(),
                expected: "created or running",
            });
        }
        let limit = self.config.max_filters;
        if self.added >= limit {
            return Err(TrackError::TooManyFilters { limit });
        }

        let filter = self.registry.resolve(name)?;
        let slot = FilterSlot::new(filter);
        let id = match pos {
            Position::Head => self.chain.push_front(slot),
            Position::Tail => self.chain.push_back(slot),
            Position::After(at) => self
                .chain
                .insert_after(at, slot)
                .ok_or(TrackError::InvalidSlot)?,
            Position::Before(at) => self
                .chain
                .insert_before(at, slot)
                .ok_or(TrackError::InvalidSlot)?,
        };
        self.added += 1;
        self.chain_version += 1;

        if self.state != super::TrackState::Created && self.cursor.is_none() {
            self.cursor = Some(id);
        }
        self.refresh_head();

        debug!(track = %self.id(), filter = name, chain = %self.chain_string(Some(id)), "added filter to chain");
        Ok(SlotHandle(id))
    }
}
