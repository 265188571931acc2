//! Debian changelog entry generation.
//!
//! Every build prepends a fresh entry recording the computed version, the
//! configured target distribution, and the maintainer identity. The entry
//! targets the configured distribution regardless of what the source's own
//! changelog claims; the repository driver tolerates the mismatch at
//! include time.

use std::path::Path;

use chrono::{DateTime, Utc};

/// Renders one changelog entry.
pub fn render_entry(
    package: &str,
    version: &str,
    distribution: &str,
    sha: &str,
    maintainer: &str,
    when: DateTime<Utc>,
) -> String {
    format!(
        "{package} ({version}) {distribution}; urgency=low\n\
         \n  * Automated build of commit {sha}.\n\
         \n -- {maintainer}  {date}\n",
        date = when.to_rfc2822(),
    )
}

/// Prepends an entry to `debian/changelog`, creating the file if absent.
pub fn prepend_entry(workspace: &Path, entry: &str) -> std::io::Result<()> {
    let changelog = workspace.join("debian").join("changelog");
    if let Some(parent) = changelog.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let existing = match std::fs::read_to_string(&changelog) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    let content = if existing.is_empty() {
        entry.to_string()
    } else {
        format!("{entry}\n{existing}")
    };
    std::fs::write(&changelog, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 23, 12, 0, 0).unwrap()
    }

    #[test]
    fn entry_has_debian_changelog_shape() {
        let entry = render_entry(
            "widget",
            "1.1+1",
            "aptforge",
            "0123456",
            "aptforge <builds@aptforge.invalid>",
            fixed_time(),
        );
        let mut lines = entry.lines();
        assert_eq!(lines.next(), Some("widget (1.1+1) aptforge; urgency=low"));
        assert_eq!(lines.next(), Some(""));
        assert_eq!(lines.next(), Some("  * Automated build of commit 0123456."));
        assert_eq!(lines.next(), Some(""));
        let sign_off = lines.next().unwrap();
        assert!(sign_off.starts_with(" -- aptforge <builds@aptforge.invalid>  "));
        assert!(sign_off.contains("2026"));
    }

    #[test]
    fn prepend_keeps_existing_entries_below() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("debian")).unwrap();
        std::fs::write(
            dir.path().join("debian/changelog"),
            "widget (1.0) unstable; urgency=low\n\n -- old\n",
        )
        .unwrap();

        let entry = render_entry(
            "widget",
            "1.1+1",
            "aptforge",
            "abc",
            "m <m@x>",
            fixed_time(),
        );
        prepend_entry(dir.path(), &entry).unwrap();

        let content = std::fs::read_to_string(dir.path().join("debian/changelog")).unwrap();
        assert!(content.starts_with("widget (1.1+1) aptforge; urgency=low"));
        assert!(content.contains("widget (1.0) unstable"));
        let new_pos = content.find("1.1+1").unwrap();
        let old_pos = content.find("(1.0)").unwrap();
        assert!(new_pos < old_pos);
    }

    #[test]
    fn prepend_creates_missing_changelog() {
        let dir = tempdir().unwrap();
        prepend_entry(dir.path(), "widget (1) aptforge; urgency=low\n").unwrap();
        assert!(dir.path().join("debian/changelog").exists());
    }
}
