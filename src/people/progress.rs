use chrono::NaiveDate;

/// XP needed per level; level 1 starts at 0 XP.
const XP_PER_LEVEL: i32 = 100;

pub fn level_for_xp(xp: i32) -> i32 {
    if xp <= 0 {
        return 1;
    }
    xp / XP_PER_LEVEL + 1
}

pub fn award_xp(current_xp: i32, reward: i32) -> (i32, i32) {
    let xp = current_xp.saturating_add(reward.max(0));
    (xp, level_for_xp(xp))
}

/// Daily streak on login: consecutive days grow it, a gap resets it to 1 and
/// a second ping on the same day changes nothing (None).
pub fn streak_after_login(
    last_login: Option<NaiveDate>,
    today: NaiveDate,
    current_streak: i32,
) -> Option<i32> {
    match last_login {
        Some(last) if last == today => None,
        Some(last) if last.succ_opt() == Some(today) => Some(current_streak.max(0) + 1),
        _ => Some(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn level_grows_every_hundred_xp() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(250), 3);
        assert_eq!(level_for_xp(-10), 1);
    }

    #[test]
    fn award_updates_xp_and_level_together() {
        assert_eq!(award_xp(90, 20), (110, 2));
        assert_eq!(award_xp(0, 0), (0, 1));
        // Negative rewards never subtract.
        assert_eq!(award_xp(50, -30), (50, 1));
    }

    #[test]
    fn consecutive_day_extends_streak() {
        let streak = streak_after_login(Some(day(2025, 3, 1)), day(2025, 3, 2), 4);
        assert_eq!(streak, Some(5));
    }

    #[test]
    fn gap_resets_streak() {
        let streak = streak_after_login(Some(day(2025, 3, 1)), day(2025, 3, 4), 9);
        assert_eq!(streak, Some(1));
    }

    #[test]
    fn same_day_ping_is_noop() {
        let streak = streak_after_login(Some(day(2025, 3, 2)), day(2025, 3, 2), 4);
        assert_eq!(streak, None);
    }

    #[test]
    fn first_login_starts_at_one() {
        assert_eq!(streak_after_login(None, day(2025, 3, 2), 0), Some(1));
    }
}
