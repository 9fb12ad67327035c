use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::cue::{Cue, CueType, CueUpdate};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CueListError {
    #[error("cue index {index} is out of range (list has {len} cues)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("cue '{0}' not found")]
    CueNotFound(Uuid),
    #[error("cue list changed (expected revision {expected}, current {actual})")]
    StaleRevision { expected: u64, actual: u64 },
}

/// Ordered show list with the presenter's cursor.
///
/// Every change to order or contents bumps `revision`. Index-addressed edits
/// may carry the revision they were computed against and are rejected when the
/// list has moved on since.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CueList {
    cues: Vec<Cue>,
    active_index: Option<usize>,
    #[serde(default)]
    is_playing: bool,
    #[serde(default)]
    revision: u64,
}

impl CueList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cues(cues: Vec<Cue>) -> Self {
        let active_index = if cues.is_empty() { None } else { Some(0) };
        Self {
            cues,
            active_index,
            is_playing: false,
            revision: 0,
        }
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active_index
    }

    pub fn active_cue(&self) -> Option<&Cue> {
        self.active_index.and_then(|i| self.cues.get(i))
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn get(&self, cue_id: &Uuid) -> Option<&Cue> {
        self.cues.iter().find(|c| c.id.eq(cue_id))
    }

    pub fn position(&self, cue_id: &Uuid) -> Option<usize> {
        self.cues.iter().position(|c| c.id.eq(cue_id))
    }

    pub fn search(&self, query: &str) -> Vec<&Cue> {
        self.cues.iter().filter(|c| c.matches(query)).collect()
    }

    pub fn add_cue(&mut self, cue_type: CueType, expected_revision: Option<u64>) -> Result<&Cue, CueListError> {
        self.check_revision(expected_revision)?;
        self.cues.push(Cue::new(cue_type));
        let index = self.cues.len() - 1;
        self.active_index = Some(index);
        self.revision += 1;
        Ok(&self.cues[index])
    }

    pub fn delete_cue(&mut self, index: usize, expected_revision: Option<u64>) -> Result<Cue, CueListError> {
        self.check_revision(expected_revision)?;
        self.check_index(index)?;

        let removed = self.cues.remove(index);
        self.active_index = match self.active_index {
            _ if self.cues.is_empty() => None,
            Some(active) if active >= index => Some(active.saturating_sub(1)),
            other => other,
        };
        self.revision += 1;
        Ok(removed)
    }

    pub fn duplicate_cue(&mut self, index: usize, expected_revision: Option<u64>) -> Result<&Cue, CueListError> {
        self.check_revision(expected_revision)?;
        self.check_index(index)?;

        let copy = self.cues[index].duplicate();
        self.cues.insert(index + 1, copy);
        self.revision += 1;
        Ok(&self.cues[index + 1])
    }

    pub fn move_cue(&mut self, from: usize, to: usize, expected_revision: Option<u64>) -> Result<(), CueListError> {
        self.check_revision(expected_revision)?;
        self.check_index(from)?;
        self.check_index(to)?;

        let cue = self.cues.remove(from);
        self.cues.insert(to, cue);
        self.revision += 1;
        Ok(())
    }

    pub fn update_cue(&mut self, cue_id: &Uuid, update: CueUpdate) -> Result<&Cue, CueListError> {
        let index = self.position(cue_id).ok_or(CueListError::CueNotFound(*cue_id))?;
        update.apply(&mut self.cues[index]);
        self.revision += 1;
        Ok(&self.cues[index])
    }

    pub fn set_active(&mut self, cue_id: &Uuid) -> Result<usize, CueListError> {
        let index = self.position(cue_id).ok_or(CueListError::CueNotFound(*cue_id))?;
        self.active_index = Some(index);
        Ok(index)
    }

    /// Returns true when the cursor moved.
    pub fn next_cue(&mut self) -> bool {
        let next = match self.active_index {
            _ if self.cues.is_empty() => return false,
            None => 0,
            Some(i) if i + 1 < self.cues.len() => i + 1,
            Some(_) => return false,
        };
        self.active_index = Some(next);
        true
    }

    /// Returns true when the cursor moved.
    pub fn previous_cue(&mut self) -> bool {
        match self.active_index {
            Some(i) if i > 0 => {
                self.active_index = Some(i - 1);
                true
            }
            _ => false,
        }
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.is_playing = playing;
    }

    /// Brings a cursor read from disk back inside the list.
    pub fn clamp_cursor(&mut self) {
        self.active_index = match self.active_index {
            _ if self.cues.is_empty() => None,
            Some(i) => Some(i.min(self.cues.len() - 1)),
            None => None,
        };
    }

    fn check_revision(&self, expected: Option<u64>) -> Result<(), CueListError> {
        match expected {
            Some(expected) if expected != self.revision => Err(CueListError::StaleRevision {
                expected,
                actual: self.revision,
            }),
            _ => Ok(()),
        }
    }

    fn check_index(&self, index: usize) -> Result<(), CueListError> {
        if index < self.cues.len() {
            Ok(())
        } else {
            Err(CueListError::IndexOutOfRange {
                index,
                len: self.cues.len(),
            })
        }
    }
}
