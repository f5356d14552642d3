//! Display names for furnace levels.
//!
//! Levels 31-34 are the four sub-steps of level 30, and from 35 on the game
//! counts in "fire crystal" tiers of five steps each (`FC 1`, `FC 1 - 1`, ...).

const FIRST_SUBSTEP: i64 = 31;
const FIRST_FIRE_CRYSTAL: i64 = 35;
const LAST_FIRE_CRYSTAL: i64 = 84;
const STEPS_PER_TIER: i64 = 5;

/// Name the game shows for `level`; unknown levels are printed as numbers.
pub fn furnace_display(level: i64) -> String {
    match level {
        FIRST_SUBSTEP..FIRST_FIRE_CRYSTAL => format!("30-{}", level - 30),
        FIRST_FIRE_CRYSTAL..=LAST_FIRE_CRYSTAL => {
            let offset = level - FIRST_FIRE_CRYSTAL;
            let tier = offset / STEPS_PER_TIER + 1;
            match offset % STEPS_PER_TIER {
                0 => format!("FC {tier}"),
                step => format!("FC {tier} - {step}"),
            }
        }
        _ => level.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_furnace_display() {
        assert_eq!(furnace_display(25), "25");
        assert_eq!(furnace_display(30), "30");
        assert_eq!(furnace_display(31), "30-1");
        assert_eq!(furnace_display(34), "30-4");
        assert_eq!(furnace_display(35), "FC 1");
        assert_eq!(furnace_display(36), "FC 1 - 1");
        assert_eq!(furnace_display(50), "FC 4");
        assert_eq!(furnace_display(51), "FC 4 - 1");
        assert_eq!(furnace_display(80), "FC 10");
        assert_eq!(furnace_display(84), "FC 10 - 4");
        assert_eq!(furnace_display(85), "85");
    }
}
