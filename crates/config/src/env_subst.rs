/// Replace `${ENV_VAR}` and `${ENV_VAR:-fallback}` placeholders in raw
/// config text.
///
/// A variable that is unset and has no fallback is left as-is so the parser
/// reports it where it was written.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Same as [`substitute_env`] with an injectable lookup, so tests never touch
/// the process environment.
pub(crate) fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            // Unterminated placeholder: keep the remainder literally.
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => {
                out.push_str("${");
                out.push_str(body);
                out.push('}');
            },
        }

        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn lookup(name: &str) -> Option<String> {
        match name {
            "PALAVER_TICK" => Some("250".to_string()),
            "PALAVER_EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[rstest]
    #[case("tick_interval_ms = ${PALAVER_TICK}", "tick_interval_ms = 250")]
    #[case("${PALAVER_MISSING}", "${PALAVER_MISSING}")]
    #[case("${PALAVER_MISSING:-500}", "500")]
    #[case("${PALAVER_TICK:-500}", "250")]
    #[case("x${PALAVER_EMPTY}y", "xy")]
    #[case("${}", "${}")]
    #[case("a ${PALAVER_TICK", "a ${PALAVER_TICK")]
    #[case("${PALAVER_TICK}/${PALAVER_TICK}", "250/250")]
    #[case("plain text", "plain text")]
    fn substitution(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(substitute_env_with(input, lookup), expected);
    }
}
