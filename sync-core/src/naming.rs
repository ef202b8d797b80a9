//! Names for conflicting copies.
//!
//! A local entity that loses a name collision is renamed to
//! `"<name> - conflicting"`, then `"<name> - conflicting (2)"`,
//! `"(3)"` and so on until the caller finds a free name.

/// Suffix appended to a renamed conflicting copy.
pub const CONFLICT_SUFFIX: &str = " - conflicting";

/// Candidate name for the given attempt (1-based).
pub fn conflicting_name(base: &str, attempt: u32) -> String {
    if attempt <= 1 {
        format!("{}{}", base, CONFLICT_SUFFIX)
    } else {
        format!("{}{} ({})", base, CONFLICT_SUFFIX, attempt)
    }
}

/// Endless sequence of candidate names for a base name.
#[derive(Debug, Clone)]
pub struct ConflictNames {
    base: String,
    attempt: u32,
}

impl ConflictNames {
    /// Start the sequence for `base`.
    pub fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            attempt: 0,
        }
    }

    /// Number of candidates produced so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Iterator for ConflictNames {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.attempt = self.attempt.saturating_add(1);
        Some(conflicting_name(&self.base, self.attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_candidate_has_plain_suffix() {
        assert_eq!(conflicting_name("Work", 1), "Work - conflicting");
    }

    #[test]
    fn later_candidates_are_numbered() {
        let names: Vec<String> = ConflictNames::new("Work").take(3).collect();
        assert_eq!(
            names,
            vec![
                "Work - conflicting",
                "Work - conflicting (2)",
                "Work - conflicting (3)",
            ]
        );
    }

    #[test]
    fn attempts_are_counted() {
        let mut names = ConflictNames::new("x");
        names.next();
        names.next();
        assert_eq!(names.attempts(), 2);
    }
}
