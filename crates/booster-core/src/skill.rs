//! Per-skill handles shared between the manager, the pacing loops and the
//! status API.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::SkillId;

// ---------------------------------------------------------------------------
// SkillStatus
// ---------------------------------------------------------------------------

/// Last published state of a skill. Written only by the skill's own loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SkillStatus {
    pub skill_id: SkillId,
    pub active: bool,
    pub disabled: bool,
    pub all: u32,
    pub online: u32,
    pub busy: u32,
    pub wait: u32,
    pub approximate_busy: Option<f64>,
    pub power: f64,
    pub setpoint: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// SkillHandle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SkillHandle {
    skill_id: SkillId,
    active: Arc<AtomicBool>,
    disabled: Arc<AtomicBool>,
    status: Arc<RwLock<SkillStatus>>,
}

impl SkillHandle {
    /// New handle, inactive until the manager switches it on.
    pub fn new(skill_id: SkillId) -> Self {
        Self {
            skill_id,
            active: Arc::new(AtomicBool::new(false)),
            disabled: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(SkillStatus {
                skill_id,
                ..Default::default()
            })),
        }
    }

    pub fn skill_id(&self) -> SkillId {
        self.skill_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Flip the active flag, logging only real transitions.
    pub fn switch_active(&self, active: bool) {
        let was = self.active.swap(active, Ordering::AcqRel);
        if was != active {
            tracing::info!(skill_id = self.skill_id, active, "skill switched");
        }
    }

    pub fn set_disabled(&self, disabled: bool) {
        let was = self.disabled.swap(disabled, Ordering::AcqRel);
        if was != disabled {
            tracing::info!(skill_id = self.skill_id, disabled, "skill disable flag changed");
        }
    }

    pub fn status(&self) -> SkillStatus {
        let mut status = self
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        status.active = self.is_active();
        status.disabled = self.is_disabled();
        status
    }

    pub fn publish(&self, update: impl FnOnce(&mut SkillStatus)) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut status);
    }
}

// ---------------------------------------------------------------------------
// SkillRegistry
// ---------------------------------------------------------------------------

/// Skill id to handle map. Written by the manager, read by everyone else.
#[derive(Debug, Clone, Default)]
pub struct SkillRegistry {
    skills: Arc<RwLock<BTreeMap<SkillId, SkillHandle>>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, skill_id: SkillId) -> Option<SkillHandle> {
        self.skills
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&skill_id)
            .cloned()
    }

    /// Return the handle for `skill_id`, creating it if needed. The flag is
    /// `true` only for the call that created it.
    pub fn get_or_create(&self, skill_id: SkillId) -> (SkillHandle, bool) {
        let mut skills = self.skills.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = skills.get(&skill_id) {
            return (handle.clone(), false);
        }
        let handle = SkillHandle::new(skill_id);
        skills.insert(skill_id, handle.clone());
        (handle, true)
    }

    /// Forget a skill. The next poll that lists it creates a fresh handle.
    pub fn remove(&self, skill_id: SkillId) -> Option<SkillHandle> {
        self.skills
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&skill_id)
    }

    pub fn ids(&self) -> Vec<SkillId> {
        self.skills
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn handles(&self) -> Vec<SkillHandle> {
        self.skills
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn statuses(&self) -> Vec<SkillStatus> {
        self.handles().iter().map(SkillHandle::status).collect()
    }

    pub fn len(&self) -> usize {
        self.skills.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
