//! `FOR needs-restarting`: turn a `needs-restarting -s`-style stdout blob
//! into a deduplicated list of service names to restart.
//!
//! Grounded on `original_source/misc.go`'s `needsRestartingMangler`: yum's
//! `needs-restarting -s` prints `<pid> : <process invocation>` lines, and
//! the original heuristically collapses each invocation down to the
//! service name systemd/sysvinit would know it by. Only names ending in
//! `d` (taken as the daemon-naming convention) are kept, plus two named
//! exceptions; everything else is assumed to not be a restartable service.
//! The process-wide `dontrestart-processes` Misc key extends this built-in
//! exclusion list.

const EXCLUDED: &[&str] = &["mongod", "udevd"];

/// Fold embedded NUL bytes to spaces before line-splitting; some
/// `needs-restarting -s` builds pad truncated lines with NULs instead of
/// trimming them.
pub fn fold_nulls(stdout: &str) -> String {
    stdout.chars().map(|c| if c == '\0' { ' ' } else { c }).collect()
}

/// Parse `needs-restarting -s` output into the deduplicated set of service
/// names worth restarting. `extra_excluded` is appended to the built-in
/// `EXCLUDED` set, sourced from the process-wide `dontrestart-processes`
/// Misc key.
pub fn needs_restarting_services(stdout: &str, extra_excluded: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for line in stdout.lines() {
        if let Some(name) = mangle_line(line, extra_excluded) {
            if seen.insert(name.clone()) {
                out.push(name);
            }
        }
    }
    out
}

fn mangle_line(line: &str, extra_excluded: &[String]) -> Option<String> {
    let (_, invocation) = line.split_once(" : ")?;
    let cmd = invocation.split(' ').next().unwrap_or(invocation);

    // strip a leading pathname down to its basename
    let cmd = cmd.rsplit('/').next().unwrap_or(cmd);
    // strip a trailing control-name colon, e.g. "master:"
    let cmd = cmd.split(':').next().unwrap_or(cmd);

    if EXCLUDED.contains(&cmd) || extra_excluded.iter().any(|e| e == cmd) {
        None
    } else if cmd == "haproxy" {
        Some("haproxy".to_string())
    } else if cmd == "java" && invocation.contains("catalina") {
        Some("tomcat".to_string())
    } else if cmd.ends_with('d') {
        if cmd == "rsyslogd" {
            Some("rsyslog".to_string())
        } else {
            Some(cmd.to_string())
        }
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_suffixed_names_are_kept() {
        let out = needs_restarting_services("123 : /usr/sbin/httpd -DFOREGROUND", &[]);
        assert_eq!(out, vec!["httpd".to_string()]);
    }

    #[test]
    fn non_daemon_names_are_dropped() {
        let out = needs_restarting_services("456 : /usr/bin/python3 worker.py", &[]);
        assert!(out.is_empty());
    }

    #[test]
    fn rsyslogd_is_special_cased() {
        let out = needs_restarting_services("1 : /sbin/rsyslogd -n", &[]);
        assert_eq!(out, vec!["rsyslog".to_string()]);
    }

    #[test]
    fn excluded_names_never_appear() {
        let out = needs_restarting_services("1 : /usr/bin/mongod --config /etc/mongod.conf\n2 : /sbin/udevd", &[]);
        assert!(out.is_empty());
    }

    #[test]
    fn haproxy_and_tomcat_special_cases() {
        let out = needs_restarting_services(
            "1 : /usr/sbin/haproxy -f /etc/haproxy.cfg\n2 : /usr/bin/java -cp catalina.jar org.apache.catalina.startup.Bootstrap",
            &[],
        );
        assert_eq!(out, vec!["haproxy".to_string(), "tomcat".to_string()]);
    }

    #[test]
    fn duplicate_invocations_are_deduped() {
        let out = needs_restarting_services("1 : /usr/sbin/httpd\n2 : /usr/sbin/httpd", &[]);
        assert_eq!(out, vec!["httpd".to_string()]);
    }

    #[test]
    fn extra_excluded_names_are_honored() {
        let out = needs_restarting_services(
            "1 : /usr/sbin/httpd\n2 : /usr/sbin/tomcatd",
            &["tomcatd".to_string()],
        );
        assert_eq!(out, vec!["httpd".to_string()]);
    }

    #[test]
    fn fold_nulls_replaces_embedded_nul_bytes() {
        assert_eq!(fold_nulls("1 : /usr/sbin/httpd\0\0"), "1 : /usr/sbin/httpd  ");
    }
}
