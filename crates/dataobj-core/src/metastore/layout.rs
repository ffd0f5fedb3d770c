//! Key layout of the metastore index.
//!
//! ```text
//! tenant/<tenant>/metastore/<window_start_secs>/<version:010>.dobj
//! ```
//!
//! Windows are aligned to the configured partition width. Versions within a
//! window start at 1 and are created exactly once.

use chrono::{DateTime, TimeDelta, Utc};

use crate::context::TenantId;

/// Number of digits in zero-padded version file names.
pub(crate) const VERSION_DIGITS: usize = 10;
const VERSION_SUFFIX: &str = ".dobj";

pub(crate) fn metastore_prefix(tenant: &TenantId) -> String {
    format!("tenant/{tenant}/metastore")
}

pub(crate) fn window_prefix(tenant: &TenantId, window: i64) -> String {
    format!("{}/{window}", metastore_prefix(tenant))
}

pub(crate) fn version_path(tenant: &TenantId, window: i64, version: u64) -> String {
    format!(
        "{}/{version:0width$}{VERSION_SUFFIX}",
        window_prefix(tenant, window),
        width = VERSION_DIGITS
    )
}

/// Parse the version from a key produced by [`version_path`].
pub(crate) fn parse_version(key: &str) -> Option<u64> {
    let file = key.rsplit('/').next()?;
    let digits = file.strip_suffix(VERSION_SUFFIX)?;
    if digits.len() != VERSION_DIGITS {
        return None;
    }
    digits.parse().ok()
}

fn width_secs(width: TimeDelta) -> i64 {
    width.num_seconds().max(1)
}

/// Start (seconds since the epoch) of the window containing `ts`.
pub(crate) fn window_start(ts: DateTime<Utc>, width: TimeDelta) -> i64 {
    let w = width_secs(width);
    ts.timestamp().div_euclid(w) * w
}

/// Starts of every window intersecting `[min, max]`.
pub(crate) fn windows_between(
    min: DateTime<Utc>,
    max: DateTime<Utc>,
    width: TimeDelta,
) -> impl Iterator<Item = i64> {
    let w = width_secs(width);
    let first = window_start(min, width);
    let last = window_start(max, width);
    (0..)
        .map(move |i: i64| first.saturating_add(i.saturating_mul(w)))
        .take_while(move |start| *start <= last)
}

/// Whether window `start` intersects `[from, to]`.
pub(crate) fn window_overlaps(
    start: i64,
    width: TimeDelta,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> bool {
    let end_exclusive = start.saturating_add(width_secs(width));
    start <= to.timestamp() && end_exclusive > from.timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{tenant, ts};

    #[test]
    fn keys_follow_layout() {
        let t = tenant();
        assert_eq!(metastore_prefix(&t), "tenant/test-tenant/metastore");
        let key = version_path(&t, 3600, 7);
        assert_eq!(key, "tenant/test-tenant/metastore/3600/0000000007.dobj");
        assert_eq!(parse_version(&key), Some(7));
        assert_eq!(parse_version("tenant/x/metastore/0/7.dobj"), None);
        assert_eq!(parse_version("tenant/x/metastore/0/0000000007.tmp"), None);
    }

    #[test]
    fn windows_are_aligned() {
        let hour = TimeDelta::hours(1);
        assert_eq!(window_start(ts(3599), hour), 0);
        assert_eq!(window_start(ts(3600), hour), 3600);
        assert_eq!(window_start(ts(-1), hour), -3600);

        let spans: Vec<i64> = windows_between(ts(3000), ts(7300), hour).collect();
        assert_eq!(spans, [0, 3600, 7200]);

        let single: Vec<i64> = windows_between(ts(10), ts(20), hour).collect();
        assert_eq!(single, [0]);
    }

    #[test]
    fn window_overlap_is_half_open_on_the_right() {
        let hour = TimeDelta::hours(1);
        assert!(window_overlaps(3600, hour, ts(0), ts(3600)));
        assert!(!window_overlaps(3600, hour, ts(0), ts(3599)));
        assert!(window_overlaps(3600, hour, ts(7199), ts(9000)));
        assert!(!window_overlaps(3600, hour, ts(7200), ts(9000)));
    }
}
