//! Views estimate for platforms that do not report views to bots.

/// Typical share of viewers who react or comment.
pub const BASELINE_CTR: f64 = 0.04;

/// Fraction of the eventual audience reached after `hours`.
#[must_use]
pub fn time_factor(hours: f64) -> f64 {
    if hours < 1.0 {
        0.3
    } else if hours < 3.0 {
        0.6
    } else if hours < 12.0 {
        0.85
    } else {
        1.0
    }
}

/// Estimate views from `reactions` and `comments` of a post `hours` old.
#[must_use]
pub fn estimate_views(reactions: i64, comments: i64, hours: f64) -> i64 {
    let reactions = reactions.max(0) as f64;
    let comments = comments.max(0) as f64;

    let engagement = if comments == 0.0 {
        reactions
    } else {
        0.7f64.mul_add(reactions, 0.3 * comments)
    };

    (engagement / BASELINE_CTR * time_factor(hours.max(0.0))).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reactions_only() {
        // 10 / 0.04 = 250, full audience after a day
        assert_eq!(estimate_views(10, 0, 24.0), 250);
        assert_eq!(estimate_views(10, 0, 0.5), 75);
    }

    #[test]
    fn test_mixed_engagement() {
        // (0.7 * 10 + 0.3 * 20) / 0.04 = 325
        assert_eq!(estimate_views(10, 20, 48.0), 325);
        assert_eq!(estimate_views(10, 20, 2.0), 195);
    }

    #[test]
    fn test_no_engagement() {
        assert_eq!(estimate_views(0, 0, 100.0), 0);
        assert_eq!(estimate_views(-3, 0, 100.0), 0);
    }

    #[test]
    fn test_monotonic_in_inputs() {
        let hours = [0.0, 0.5, 1.0, 2.5, 3.0, 11.9, 12.0, 200.0];
        for pair in hours.windows(2) {
            assert!(estimate_views(40, 5, pair[0]) <= estimate_views(40, 5, pair[1]));
        }
        for r in 0..50 {
            assert!(estimate_views(r, 7, 6.0) <= estimate_views(r + 1, 7, 6.0));
        }
    }

    #[test]
    fn test_time_factor_buckets() {
        assert!((time_factor(0.99) - 0.3).abs() < f64::EPSILON);
        assert!((time_factor(1.0) - 0.6).abs() < f64::EPSILON);
        assert!((time_factor(3.0) - 0.85).abs() < f64::EPSILON);
        assert!((time_factor(12.0) - 1.0).abs() < f64::EPSILON);
    }
}
