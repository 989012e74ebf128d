use crate::ConfigError;

/// Matches exactly one token.
pub const WILDCARD_ANY: &str = "*";

/// Matches one or more trailing tokens.
pub const WILDCARD_ALL: &str = ">";

/// Validates a subject or subject pattern.
///
/// # Errors
///
/// Returns `ConfigError::InvalidSubject` if the subject has empty tokens,
/// whitespace, or misplaced wildcards. Wildcards are only accepted when
/// `allow_wildcards` is set.
pub fn validate(subject: &str, allow_wildcards: bool) -> Result<(), ConfigError> {
    let invalid = |reason: &'static str| ConfigError::InvalidSubject {
        subject: subject.to_string(),
        reason,
    };

    if subject.is_empty() {
        return Err(invalid("empty subject"));
    }

    let tokens: Vec<&str> = subject.split('.').collect();
    let last = tokens.len() - 1;

    for (i, token) in tokens.iter().enumerate() {
        if token.is_empty() {
            return Err(invalid("empty token"));
        }

        if token.chars().any(char::is_whitespace) {
            return Err(invalid("whitespace in token"));
        }

        match *token {
            WILDCARD_ANY | WILDCARD_ALL if !allow_wildcards => {
                return Err(invalid("wildcards not allowed"));
            }
            WILDCARD_ALL if i != last => return Err(invalid("'>' must be the last token")),
            WILDCARD_ANY | WILDCARD_ALL => {}
            t if t.contains('*') || t.contains('>') => {
                return Err(invalid("wildcard must be a whole token"));
            }
            _ => {}
        }
    }

    Ok(())
}

/// Returns true if the literal `subject` is matched by `pattern`.
#[must_use]
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(WILDCARD_ALL), Some(_)) => return true,
            (Some(WILDCARD_ANY), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Returns true if every subject matched by `specific` is also matched by
/// `general`.
#[must_use]
pub fn covers(general: &str, specific: &str) -> bool {
    let mut general_tokens = general.split('.');
    let mut specific_tokens = specific.split('.');

    loop {
        match (general_tokens.next(), specific_tokens.next()) {
            (Some(WILDCARD_ALL), Some(_)) => return true,
            (Some(_), Some(WILDCARD_ALL)) => return false,
            (Some(WILDCARD_ANY), Some(_)) => {}
            (Some(g), Some(s)) if g == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Returns true if at least one literal subject is matched by both patterns.
#[must_use]
pub fn overlaps(a: &str, b: &str) -> bool {
    let mut a_tokens = a.split('.');
    let mut b_tokens = b.split('.');

    loop {
        match (a_tokens.next(), b_tokens.next()) {
            (Some(WILDCARD_ALL), Some(_)) | (Some(_), Some(WILDCARD_ALL)) | (None, None) => {
                return true;
            }
            (Some(WILDCARD_ANY), Some(_)) | (Some(_), Some(WILDCARD_ANY)) => {}
            (Some(x), Some(y)) if x == y => {}
            _ => return false,
        }
    }
}

/// Turns arbitrary text into a single subject token.
#[must_use]
pub fn sanitize_token(raw: &str) -> String {
    let token: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    if token.is_empty() {
        "_".to_string()
    } else {
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[test]
    fn test_validate() {
        assert!(validate("webhooks.github.push", false).is_ok());
        assert!(validate("webhooks.>", true).is_ok());
        assert!(validate("webhooks.*.push", true).is_ok());

        assert_matches!(
            validate("webhooks.>", false),
            Err(ConfigError::InvalidSubject { .. })
        );
        assert_matches!(
            validate("webhooks.>.push", true),
            Err(ConfigError::InvalidSubject { .. })
        );
        assert_matches!(
            validate("webhooks..push", true),
            Err(ConfigError::InvalidSubject { .. })
        );
        assert_matches!(
            validate("web hooks", true),
            Err(ConfigError::InvalidSubject { .. })
        );
        assert_matches!(
            validate("webhooks.pu*", true),
            Err(ConfigError::InvalidSubject { .. })
        );
    }

    #[test]
    fn test_matches() {
        assert!(matches("webhooks.>", "webhooks.github.push"));
        assert!(matches("webhooks.*.push", "webhooks.github.push"));
        assert!(matches("webhooks.github.push", "webhooks.github.push"));

        assert!(!matches("webhooks.>", "webhooks"));
        assert!(!matches("webhooks.*", "webhooks.github.push"));
        assert!(!matches("webhooks.github", "webhooks.gitlab"));
    }

    #[test]
    fn test_covers() {
        assert!(covers("webhooks.>", "webhooks.github.>"));
        assert!(covers("webhooks.>", "webhooks.*.push"));
        assert!(covers("webhooks.*.push", "webhooks.github.push"));

        assert!(!covers("webhooks.github.>", "webhooks.>"));
        assert!(!covers("webhooks.github.push", "webhooks.*.push"));
        assert!(!covers("webhooks.*", "webhooks.>"));
    }

    #[test]
    fn test_overlaps() {
        assert!(overlaps("webhooks.>", "webhooks.github.push"));
        assert!(overlaps("webhooks.github.*", "webhooks.*.push"));
        assert!(overlaps("a.*.c", "a.b.*"));
        assert!(overlaps("webhooks.*", "webhooks.>"));

        assert!(!overlaps("webhooks.>", "billing.>"));
        assert!(!overlaps("webhooks.>", "webhooks"));
        assert!(!overlaps("webhooks.*.push", "webhooks.*.pull"));
        assert!(!overlaps("webhooks.*", "webhooks.github.push"));
    }

    #[test]
    fn test_sanitize_token() {
        assert_eq!(sanitize_token("pull_request"), "pull_request");
        assert_eq!(sanitize_token("check.suite"), "check_suite");
        assert_eq!(sanitize_token(" a b>c* "), "a_b_c_");
        assert_eq!(sanitize_token(""), "_");
    }
}
