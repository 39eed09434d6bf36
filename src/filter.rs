//! Boolean predicate evaluator over [`Host`] fields.
//!
//! Grounded on `original_source/hosts.go`'s `Host.If`, generalized from
//! "Tags ==/!=" only to the full field/operator grammar this orchestrator
//! needs. Precedence intentionally matches the Go source: the expression
//! is split on `and` first, and each resulting segment is then split on
//! `or`, so `or` groups nest inside `and` segments rather than the other
//! way around — `a and b or c and d` groups as `(a) AND (b or c) AND (d)`.
//! See the grammar comment on [`evaluate`].

use crate::host::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    FuzzyEq,
    FuzzyNe,
}

/// Evaluate a filter expression against a host.
///
/// ```text
/// expr     := and_term ( " or " and_term )*
/// and_term := atom ( " and " atom )*
/// atom     := FIELD OP VALUE
/// FIELD    := Tags | Name | Address | Port | Wave | Arch | Loc | User
/// OP       := == | != | ~= | ~!
/// ```
///
/// An empty filter is always true. A syntactically malformed atom
/// (wrong arity, unknown field, unknown operator) evaluates to `false`
/// and is logged, matching the source's "we should never get here"
/// fallback.
pub fn evaluate(host: &Host, expr: &str) -> bool {
    if expr.trim().is_empty() {
        return true;
    }
    eval_and(host, expr)
}

fn eval_and(host: &Host, expr: &str) -> bool {
    let lowered = expr.to_ascii_lowercase();
    if lowered.contains(" and ") || lowered.contains(" && ") {
        split_case_insensitive(expr, " and ")
            .into_iter()
            .flat_map(|part| split_case_insensitive(&part, " && "))
            .all(|term| eval_or(host, term.trim()))
    } else {
        eval_or(host, expr)
    }
}

fn eval_or(host: &Host, expr: &str) -> bool {
    let lowered = expr.to_ascii_lowercase();
    if lowered.contains(" or ") || lowered.contains(" || ") {
        split_case_insensitive(expr, " or ")
            .into_iter()
            .flat_map(|part| split_case_insensitive(&part, " || "))
            .any(|atom| eval_atom(host, atom.trim()))
    } else {
        eval_atom(host, expr)
    }
}

/// Split on a separator matched case-insensitively, preserving the
/// original casing of each returned segment.
fn split_case_insensitive(s: &str, sep: &str) -> Vec<String> {
    let lowered = s.to_ascii_lowercase();
    let sep_lower = sep.to_ascii_lowercase();
    if !lowered.contains(&sep_lower) {
        return vec![s.to_string()];
    }
    let mut parts = Vec::new();
    let mut rest = s;
    let mut rest_lower = lowered.as_str();
    while let Some(idx) = rest_lower.find(&sep_lower) {
        parts.push(rest[..idx].to_string());
        rest = &rest[idx + sep.len()..];
        rest_lower = &rest_lower[idx + sep.len()..];
    }
    parts.push(rest.to_string());
    parts
}

fn eval_atom(host: &Host, atom: &str) -> bool {
    let tokens: Vec<&str> = atom.split_whitespace().collect();
    if tokens.len() != 3 {
        tracing::warn!("malformed filter atom: '{atom}'");
        return false;
    }
    let (field, op_str, value) = (tokens[0], tokens[1], tokens[2]);
    let op = match op_str {
        "==" => Op::Eq,
        "!=" => Op::Ne,
        "~=" => Op::FuzzyEq,
        "~!" => Op::FuzzyNe,
        _ => {
            tracing::warn!("unknown filter operator '{op_str}' in '{atom}'");
            return false;
        }
    };

    let matched = match field {
        "Tags" => host.search_tags(value, matches!(op, Op::FuzzyEq | Op::FuzzyNe)),
        "Name" => string_match(&host.name, value, op),
        "Address" => string_match(&host.address, value, op),
        "Arch" => string_match(&host.arch, value, op),
        "Loc" => string_match(&host.loc, value, op),
        "User" => string_match(host.user.as_deref().unwrap_or(""), value, op),
        "Port" => {
            let port = host.effective_port() as i64;
            match value.parse::<i64>() {
                Ok(v) => port == v,
                Err(_) => {
                    tracing::warn!("Port filter value '{value}' is not an integer");
                    return false;
                }
            }
        }
        "Wave" => {
            if host.wave == 0 {
                // a host with Wave==0 never matches any explicit wave predicate
                return matches!(op, Op::Ne | Op::FuzzyNe);
            }
            match value.parse::<i64>() {
                Ok(v) => host.wave as i64 == v,
                Err(_) => {
                    tracing::warn!("Wave filter value '{value}' is not an integer");
                    return false;
                }
            }
        }
        _ => {
            tracing::warn!("unknown filter field '{field}' in '{atom}'");
            return false;
        }
    };

    match op {
        Op::Eq | Op::FuzzyEq => matched,
        Op::Ne | Op::FuzzyNe => !matched,
    }
}

fn string_match(haystack: &str, needle: &str, op: Op) -> bool {
    match op {
        Op::Eq | Op::Ne => haystack == needle,
        Op::FuzzyEq | Op::FuzzyNe => haystack.contains(needle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_with_tags(tags: &[&str]) -> Host {
        Host {
            name: "h1".into(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_filter_is_true() {
        assert!(evaluate(&host_with_tags(&[]), ""));
    }

    #[test]
    fn tag_membership() {
        let h = host_with_tags(&["tag1", "tag2", "tag3", "tag4"]);
        assert!(evaluate(&h, "Tags == tag2"));
        assert!(evaluate(&h, "Tags != NOPE"));
        assert!(!evaluate(&h, "Tags == NOPE"));
    }

    #[test]
    fn complex_expression() {
        let h = host_with_tags(&["dev", "httpd", "tomcat", "daisy"]);
        assert!(evaluate(
            &h,
            "Tags == dev and Tags == httpd or Tags == haproxy or Tags == tomcat and Tags == daisy"
        ));
        let h2 = host_with_tags(&["dev", "httpd", "tomcat", "dipsy"]);
        assert!(!evaluate(
            &h2,
            "Tags == dev and Tags == httpd or Tags == haproxy or Tags == tomcat and Tags == daisy"
        ));
    }

    #[test]
    fn port_defaulting() {
        let h = Host {
            port: 0,
            ..Default::default()
        };
        assert!(evaluate(&h, "Port == 22"));
    }

    #[test]
    fn wave_zero_never_matches_explicit_wave() {
        let h = Host {
            wave: 0,
            ..Default::default()
        };
        assert!(!evaluate(&h, "Wave == 1"));
    }

    #[test]
    fn unknown_field_is_false() {
        let h = host_with_tags(&[]);
        assert!(!evaluate(&h, "Bogus == x"));
    }
}
