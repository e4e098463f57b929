//! EWMA of inter-post interval, used to estimate how often a feed should
//! be refreshed (spec §4.E "Key algorithm — moving average", §9 design
//! note: the window and clamp values are observed-tuned constants, not
//! knobs).

use chrono::{DateTime, FixedOffset, Duration};

pub const WINDOW: usize = 7;
pub const MIN_INTERVAL: Duration = Duration::minutes(5);
pub const MAX_INTERVAL: Duration = Duration::minutes(15);

/// Folds a newly observed average delta into the running estimate.
/// `current` is `None` before the first observation.
pub fn fold(current: Option<Duration>, observed_avg: Duration) -> Duration {
    match current {
        Some(ma) => Duration::milliseconds((ma.num_milliseconds() + observed_avg.num_milliseconds()) / 2),
        None => observed_avg,
    }
}

/// Average inter-arrival delta over the union of the previous and new
/// first-`WINDOW` posts, newest-first. Returns `None` when fewer than two
/// timestamps are available to derive a delta from.
pub fn average_delta(timestamps_newest_first: &[DateTime<FixedOffset>]) -> Option<Duration> {
    let sample: Vec<&DateTime<FixedOffset>> = timestamps_newest_first.iter().take(WINDOW).collect();
    if sample.len() < 2 {
        return None;
    }
    let mut total = Duration::zero();
    let mut count = 0i32;
    for pair in sample.windows(2) {
        total = total + (*pair[0] - *pair[1]);
        count += 1;
    }
    Some(Duration::milliseconds(total.num_milliseconds() / count as i64))
}

/// Clamps a moving average into the scheduling window used by `FetchFeeds`.
pub fn clamp(ma: Duration) -> Duration {
    if ma < MIN_INTERVAL {
        MIN_INTERVAL
    } else if ma > MAX_INTERVAL {
        MAX_INTERVAL
    } else {
        ma
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn average_delta_needs_at_least_two_points() {
        assert!(average_delta(&[ts("2016-02-03T23:05:00Z")]).is_none());
    }

    #[test]
    fn average_delta_over_evenly_spaced_posts() {
        let timestamps = vec![
            ts("2016-02-03T23:20:00Z"),
            ts("2016-02-03T23:10:00Z"),
            ts("2016-02-03T23:00:00Z"),
        ];
        let avg = average_delta(&timestamps).unwrap();
        assert_eq!(avg, Duration::minutes(10));
    }

    #[test]
    fn clamp_bounds_to_five_and_fifteen_minutes() {
        assert_eq!(clamp(Duration::minutes(1)), MIN_INTERVAL);
        assert_eq!(clamp(Duration::minutes(30)), MAX_INTERVAL);
        assert_eq!(clamp(Duration::minutes(9)), Duration::minutes(9));
    }

    #[test]
    fn fold_averages_with_previous_estimate() {
        let folded = fold(Some(Duration::minutes(10)), Duration::minutes(20));
        assert_eq!(folded, Duration::minutes(15));
    }
}
