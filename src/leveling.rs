//! The leveling curve.
//!
//! Levels are derived from total XP via a fixed step function: reaching the
//! next level always costs `100 * current_level` more XP than the current
//! one, so the cumulative thresholds run 0, 100, 300, 600, 1000, ...
//! Changing the curve requires bumping [`CURVE_VERSION`] and re-deriving
//! stored levels.

/// Version of the threshold policy below.
pub const CURVE_VERSION: u32 = 1;

/// XP cost of the first level-up; each subsequent level-up costs one more
/// multiple of this.
const LEVEL_STEP_XP: i64 = 100;

/// Compute the level for a total XP amount.
///
/// Total and order-preserving: `xp1 <= xp2` implies
/// `level_for_xp(xp1) <= level_for_xp(xp2)`. Stored XP is never negative,
/// but negative input still maps to level 1 rather than panicking.
pub fn level_for_xp(xp: i64) -> i32 {
    let mut level: i32 = 1;
    let mut threshold: i64 = 0;

    loop {
        let next = threshold + LEVEL_STEP_XP * level as i64;
        if xp < next {
            return level;
        }
        threshold = next;
        level += 1;
    }
}

/// Cumulative XP required to reach `level`.
///
/// Inverse lookup for the curve above: `level_for_xp(xp_threshold_for_level(n)) == n`.
pub fn xp_threshold_for_level(level: i32) -> i64 {
    if level <= 1 {
        return 0;
    }
    let n = (level - 1) as i64;
    LEVEL_STEP_XP * n * (n + 1) / 2
}
