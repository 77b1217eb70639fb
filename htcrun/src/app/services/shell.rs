// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Very small, safe-ish shell escaper for paths.
pub fn sh_escape(p: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}

/// Joins remote POSIX path segments without touching the local path rules.
pub fn remote_join(base: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        return name.to_string();
    }
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sh_escape_wraps_and_escapes_single_quotes() {
        assert_eq!(sh_escape("/afs/work"), "'/afs/work'");
        assert_eq!(sh_escape("a'b"), r"'a'\''b'");
        assert_eq!(sh_escape(""), "''");
    }

    #[test]
    fn remote_join_handles_slashes() {
        assert_eq!(remote_join("/w/jobs", "7"), "/w/jobs/7");
        assert_eq!(remote_join("/w/jobs/", "/7"), "/w/jobs/7");
        assert_eq!(remote_join("", "main.sh"), "main.sh");
    }
}
