//! Debian version ordering and version assignment.
//!
//! Published versions must be monotonically non-decreasing even when the
//! upstream ecosystem reuses or regresses its version number: the repository
//! tool refuses uploads that do not sort above what a series already has.
//! [`compute_version`] guarantees this by appending the monotonic build
//! counter and bumping the epoch whenever the candidate would still sort
//! below the previously built version.

use std::cmp::Ordering;

/// A parsed Debian version: `[epoch:]upstream[-revision]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebVersion {
    pub epoch: u64,
    pub upstream: String,
    pub revision: String,
}

impl DebVersion {
    /// Parses a version string. Unparseable epochs are treated as 0.
    pub fn parse(s: &str) -> Self {
        let (epoch, rest) = match s.split_once(':') {
            Some((e, rest)) => (e.parse().unwrap_or(0), rest),
            None => (0, s),
        };
        let (upstream, revision) = match rest.rsplit_once('-') {
            Some((u, r)) => (u.to_string(), r.to_string()),
            None => (rest.to_string(), String::new()),
        };
        DebVersion {
            epoch,
            upstream,
            revision,
        }
    }
}

/// Compares two version strings with Debian semantics, including epochs.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = DebVersion::parse(a);
    let b = DebVersion::parse(b);
    a.epoch
        .cmp(&b.epoch)
        .then_with(|| compare_fragment(&a.upstream, &b.upstream))
        .then_with(|| compare_fragment(&a.revision, &b.revision))
}

/// Compares upstream-version or revision fragments.
///
/// Alternates between non-digit and digit runs, per deb-version(7):
/// non-digit runs compare with `~` before everything (including the end of
/// the fragment) and letters before non-letters; digit runs compare
/// numerically.
fn compare_fragment(a: &str, b: &str) -> Ordering {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (mut i, mut j) = (0, 0);

    let at_nondigit = |s: &[char], k: usize| k < s.len() && !s[k].is_ascii_digit();

    while i < a.len() || j < b.len() {
        // Non-digit run: a digit or the end of the fragment both weigh 0.
        while at_nondigit(&a, i) || at_nondigit(&b, j) {
            let oa = if at_nondigit(&a, i) { char_order(a[i]) } else { 0 };
            let ob = if at_nondigit(&b, j) { char_order(b[j]) } else { 0 };
            match oa.cmp(&ob) {
                Ordering::Equal => {}
                other => return other,
            }
            if at_nondigit(&a, i) {
                i += 1;
            }
            if at_nondigit(&b, j) {
                j += 1;
            }
        }

        // Digit run, compared numerically. Leading zeros are skipped so the
        // runs can be compared by length then lexically.
        let da = take_digits(&a, &mut i);
        let db = take_digits(&b, &mut j);
        let da = da.trim_start_matches('0');
        let db = db.trim_start_matches('0');
        match da.len().cmp(&db.len()).then_with(|| da.cmp(db)) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

/// Sort weight of a character in a non-digit run. `~` sorts before the end
/// of the fragment (weight 0), which sorts before letters, which sort before
/// the rest.
fn char_order(c: char) -> i32 {
    match c {
        '~' => -1,
        c if c.is_ascii_alphabetic() => c as i32,
        c => c as i32 + 256,
    }
}

fn take_digits<'a>(chars: &'a [char], idx: &mut usize) -> String {
    let start = *idx;
    while *idx < chars.len() && chars[*idx].is_ascii_digit() {
        *idx += 1;
    }
    chars[start..*idx].iter().collect()
}

/// Assigns the version for a new build.
///
/// 1. candidate is `{native}+{counter}` when the ecosystem reports a
///    version, else `{counter}`;
/// 2. the candidate (epoch ignored on both sides) is compared against the
///    last-built version; if it sorts lower, the last-built epoch (or 0)
///    is incremented;
/// 3. the result is `{epoch}:{candidate}` when the epoch is positive.
pub fn compute_version(
    native_version: Option<&str>,
    build_counter: u64,
    last_built: Option<&str>,
) -> String {
    let candidate = match native_version {
        Some(native) => format!("{native}+{build_counter}"),
        None => format!("{build_counter}"),
    };

    let epoch = match last_built {
        Some(last) => {
            let last_parsed = DebVersion::parse(last);
            let last_without_epoch = if last_parsed.revision.is_empty() {
                last_parsed.upstream.clone()
            } else {
                format!("{}-{}", last_parsed.upstream, last_parsed.revision)
            };
            if compare_versions(&candidate, &last_without_epoch) == Ordering::Less {
                last_parsed.epoch + 1
            } else {
                last_parsed.epoch
            }
        }
        None => 0,
    };

    if epoch > 0 {
        format!("{epoch}:{candidate}")
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_less(a: &str, b: &str) {
        assert_eq!(compare_versions(a, b), Ordering::Less, "{a} < {b}");
        assert_eq!(compare_versions(b, a), Ordering::Greater, "{b} > {a}");
    }

    #[test]
    fn numeric_runs_compare_numerically() {
        assert_less("1.2", "1.10");
        assert_less("2", "10");
        assert_less("1.0+9", "1.0+10");
        assert_eq!(compare_versions("1.00", "1.0"), Ordering::Equal);
    }

    #[test]
    fn tilde_sorts_before_everything() {
        assert_less("1.0~rc1", "1.0");
        assert_less("1.0~~", "1.0~");
        assert_less("1.0~rc1", "1.0~rc2");
    }

    #[test]
    fn letters_sort_before_non_letters() {
        assert_less("1.0a", "1.0+");
        // Only `~` sorts before the end of the fragment.
        assert_less("1.0", "1.0alpha");
    }

    #[test]
    fn epochs_dominate() {
        assert_less("9.9", "1:0.1");
        assert_less("1:2.0", "2:1.0");
    }

    #[test]
    fn revisions_break_ties() {
        assert_less("1.0-1", "1.0-2");
        assert_less("1.0", "1.0-1");
    }

    #[test]
    fn first_build_with_native_version() {
        // last_built=None, native="1.1", counter=1 → "1.1+1", no epoch.
        assert_eq!(compute_version(Some("1.1"), 1, None), "1.1+1");
    }

    #[test]
    fn upstream_downgrade_bumps_epoch() {
        // last="1.1+1", native="1.0" (downgrade), counter=2 →
        // candidate "1.0+2" < "1.1+1" → epoch 1.
        assert_eq!(compute_version(Some("1.0"), 2, Some("1.1+1")), "1:1.0+2");
    }

    #[test]
    fn epoch_carries_forward_without_downgrade() {
        // Already at epoch 1; candidate sorts above the last upstream part,
        // so the epoch stays at 1.
        assert_eq!(compute_version(Some("1.0"), 3, Some("1:1.0+2")), "1:1.0+3");
    }

    #[test]
    fn repeated_downgrades_keep_bumping() {
        assert_eq!(compute_version(Some("0.9"), 4, Some("1:1.0+3")), "2:0.9+4");
    }

    #[test]
    fn counter_only_versions_without_native() {
        assert_eq!(compute_version(None, 1, None), "1");
        assert_eq!(compute_version(None, 2, Some("1")), "2");
        // A counter reset (restored database, say) still moves forward via
        // the epoch.
        assert_eq!(compute_version(None, 1, Some("5")), "1:1");
    }

    proptest! {
        /// Successive computed versions are strictly increasing in Debian
        /// order regardless of what the native version does.
        #[test]
        fn versions_are_strictly_monotonic(
            natives in proptest::collection::vec(
                proptest::option::of("[0-9]{1,3}(\\.[0-9]{1,3}){0,2}"),
                2..8,
            )
        ) {
            let mut last: Option<String> = None;
            for (i, native) in natives.iter().enumerate() {
                let version = compute_version(
                    native.as_deref(),
                    (i + 1) as u64,
                    last.as_deref(),
                );
                if let Some(prev) = &last {
                    prop_assert_eq!(
                        compare_versions(&version, prev),
                        Ordering::Greater,
                        "{} should sort above {}",
                        version,
                        prev
                    );
                }
                last = Some(version);
            }
        }
    }
}
