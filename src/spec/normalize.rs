//! DNS-1035 normalization for identifiers that become Kubernetes object names.

/// A name the loader had to rewrite to make it a valid object name.
///
/// The pipeline refuses to proceed on a non-empty change set unless the
/// caller's name policy accepts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameChange {
    /// Which spec field was rewritten (e.g. `app.name`).
    pub field: String,
    pub from: String,
    pub to: String,
}

/// Normalize an identifier into a DNS-1035 label.
///
/// Lower-cases, maps underscores to hyphens, strips everything outside
/// `[a-z0-9-]`, trims hyphens at both ends, prefixes `app-` when the result
/// would start with a digit, and falls back to `my-app` when nothing is left.
/// Idempotent: `normalize_name(normalize_name(x)) == normalize_name(x)`.
pub fn normalize_name(input: &str) -> String {
    let mut out: String = input
        .to_lowercase()
        .replace('_', "-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();

    out = out.trim_matches('-').to_string();

    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out = format!("app-{out}");
    }

    if out.is_empty() {
        out = "my-app".to_string();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_maps_underscores() {
        assert_eq!(normalize_name("My_Cool_App"), "my-cool-app");
    }

    #[test]
    fn strips_invalid_characters() {
        assert_eq!(normalize_name("web server v2!"), "webserverv2");
        assert_eq!(normalize_name("api.staging"), "apistaging");
    }

    #[test]
    fn prefixes_leading_digit() {
        assert_eq!(normalize_name("9lives"), "app-9lives");
    }

    #[test]
    fn trims_hyphens_before_digit_check() {
        assert_eq!(normalize_name("-9-"), "app-9");
    }

    #[test]
    fn empty_input_falls_back_to_sentinel() {
        assert_eq!(normalize_name(""), "my-app");
        assert_eq!(normalize_name("!!!"), "my-app");
        assert_eq!(normalize_name("---"), "my-app");
    }

    #[test]
    fn valid_names_pass_through() {
        assert_eq!(normalize_name("hello"), "hello");
        assert_eq!(normalize_name("my-app-2"), "my-app-2");
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            "Hello_World",
            "9lives",
            "-trailing-",
            "",
            "UPPER",
            "a.b.c",
            "app-9",
            "my-app",
            "x!y?z",
        ];
        for input in inputs {
            let once = normalize_name(input);
            assert_eq!(normalize_name(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn results_match_dns_label_shape() {
        let re = regex::Regex::new("^[a-z]([-a-z0-9]*[a-z0-9])?$").unwrap();
        let inputs = ["Hello_World", "9lives", "x", "", "--a--", "A_B_C_1"];
        for input in inputs {
            let out = normalize_name(input);
            assert!(
                re.is_match(&out) || out == "my-app",
                "{input:?} normalized to invalid label {out:?}"
            );
        }
    }
}
