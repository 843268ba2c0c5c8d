//! Adaptive-personality marker skill.
//!
//! Has no hooks of its own: its presence on an agent lowers the fact
//! extractor's thresholds (style patterns need fewer observations) and
//! switches the context formatter to the style block instead of the raw
//! fact dump. Both effects are read via `SkillManager::has_skill`.

use crate::skill::Skill;

pub struct AdaptivePersonalitySkill;

impl Skill for AdaptivePersonalitySkill {
    fn skill_type(&self) -> &'static str {
        "adaptive_personality"
    }
}
