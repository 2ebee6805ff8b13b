use regex::Regex;

use crate::failure::ErrorType;

/// Canonicalizes an error message into the signature used by the learning
/// store. Two messages that differ only in their numeric, quoted-string or
/// path payloads collapse to the same signature, which is what lets learned
/// outcomes generalize across occurrences.
///
/// Transform order matters: quoted payloads go first (they may contain
/// digits and slashes), then call expressions, then path fragments, then
/// digit runs.
pub fn normalize(message: &str) -> String {
    let mut out = message.to_lowercase();

    let quoted = Regex::new(r#""[^"]*"|'[^']*'"#).unwrap();
    out = quoted.replace_all(&out, "string").into_owned();

    let call = Regex::new(r"[a-z_$][a-z0-9_$.]*\([^()]*\)").unwrap();
    out = call.replace_all(&out, "function").into_owned();

    let path = Regex::new(r"(?:\.{1,2}/|/)?(?:[\w@.-]+/)+[\w@.-]+").unwrap();
    out = path.replace_all(&out, "path").into_owned();

    let digits = Regex::new(r"\d+").unwrap();
    out = digits.replace_all(&out, "number").into_owned();

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Key under which outcomes for one failure signature are accumulated.
pub fn pattern_key(error_type: ErrorType, message: &str) -> String {
    format!("{}:{}", error_type.as_str(), normalize(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_payloads_collapse() {
        let a = normalize("Expected 5 but received 3");
        let b = normalize("Expected 42 but received 0");
        assert_eq!(a, b);
        assert_eq!(a, "expected number but received number");
    }

    #[test]
    fn quoted_payloads_collapse() {
        let a = normalize("Cannot find module 'lodash'");
        let b = normalize("Cannot find module \"./utils/math\"");
        assert_eq!(a, b);
        assert_eq!(a, "cannot find module string");
    }

    #[test]
    fn path_payloads_collapse() {
        let a = normalize("error at src/app/main.js line 10");
        let b = normalize("error at lib/core/run.js line 999");
        assert_eq!(a, b);
    }

    #[test]
    fn call_expressions_collapse() {
        let a = normalize("expect(received).toEqual(expected)");
        let b = normalize("expect(5).toEqual(7)");
        assert_eq!(a, b);
    }

    #[test]
    fn whitespace_is_canonical() {
        assert_eq!(normalize("a   b\t c"), "a b c");
    }

    #[test]
    fn key_prefixes_error_type() {
        let key = pattern_key(ErrorType::NullReference, "Cannot read property 'x' of undefined");
        assert!(key.starts_with("null_reference:"));
    }
}
