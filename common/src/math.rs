//! Fixed-point helpers for quorums and participation

/// Denominator for all quorum / participation fractions
pub const SCALE: i32 = 10_000;

/// `part / total` as a fixed-point fraction over [`SCALE`]; 0 when total is 0
pub fn ratio(part: i64, total: i64) -> i32 {
    if total <= 0 {
        0
    } else {
        (part.saturating_mul(SCALE as i64) / total) as i32
    }
}

/// Whether `part / total >= threshold`, computed without division
pub fn meets(part: i64, total: i64, threshold: i32) -> bool {
    if total <= 0 {
        return false;
    }
    part.saturating_mul(SCALE as i64) >= total.saturating_mul(threshold as i64)
}

/// Slow-moving participation average: `(1999 * ema + participation) / 2000`
pub fn ema_update(ema: i32, participation: i32) -> i32 {
    ((ema as i64 * 1999 + participation as i64) / 2000) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_floor_of_scaled_fraction() {
        assert_eq!(ratio(1, 2), 5_000);
        assert_eq!(ratio(1, 3), 3_333);
        assert_eq!(ratio(0, 10), 0);
        assert_eq!(ratio(5, 0), 0);
    }

    #[test]
    fn meets_matches_exact_boundary() {
        // 8/10 supermajority
        assert!(meets(8, 10, 8_000));
        assert!(!meets(7, 10, 8_000));
        assert!(meets(4, 5, 8_000));
        assert!(!meets(1, 0, 1));
    }

    #[test]
    fn ema_moves_slowly_toward_participation() {
        let ema = 5_000;
        let up = ema_update(ema, 10_000);
        assert!(up > ema && up < 5_100);
        let down = ema_update(ema, 0);
        assert!(down < ema && down > 4_900);
        // Fixed point at the participation value itself
        assert_eq!(ema_update(4_000, 4_000), 4_000);
    }
}
