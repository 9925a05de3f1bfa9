use serde::{Deserialize, Serialize};

/// Artist-facing knobs that steer synthesis for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgeControls {
    pub target_age: f32,
    pub identity_lock_strength: f32,
    pub temporal_stability: f32,
    pub texture_keep: f32,
    pub skin_clean: f32,
    pub gray_density: f32,
    pub enable_hair_aging: bool,
    pub enable_beard_aging: bool,
    pub enable_neck_aging: bool,
}

impl Default for AgeControls {
    fn default() -> Self {
        Self {
            target_age: 30.0,
            identity_lock_strength: 0.8,
            temporal_stability: 0.5,
            texture_keep: 0.5,
            skin_clean: 0.0,
            gray_density: 0.0,
            enable_hair_aging: true,
            enable_beard_aging: false,
            enable_neck_aging: true,
        }
    }
}

impl AgeControls {
    pub fn with_target_age(mut self, age: f32) -> Self {
        self.target_age = age;
        self
    }

    pub fn with_identity_lock(mut self, strength: f32) -> Self {
        self.identity_lock_strength = strength;
        self
    }

    /// Target age clamped to [0, 100] and scaled to [0, 1].
    pub fn normalized_age(&self) -> f32 {
        clamp_unit(self.target_age / 100.0)
    }

    /// Identity lock clamped to [0, 1]. NaN locks identity fully.
    pub fn identity_lock(&self) -> f32 {
        if self.identity_lock_strength.is_nan() {
            1.0
        } else {
            self.identity_lock_strength.clamp(0.0, 1.0)
        }
    }
}

pub(crate) fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
