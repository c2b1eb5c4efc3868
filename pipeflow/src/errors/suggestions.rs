//! Fix hints for configuration error codes.

/// Lookup table of fix hints per configuration error code.
pub struct ConfigurationSuggestions;

impl ConfigurationSuggestions {
    /// Returns the fix hint for a code, if one is known.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        let hint = match code {
            "CONFIG-001-NO_PIPES" => "Add at least one pipe to the pipeline.",
            "CONFIG-002-DUPLICATE_PIPE" => "Give every pipe in a pipeline a unique name.",
            "CONFIG-003-FIRST_PIPE" => {
                "Set first_pipe to the name of a declared pipe, or leave it unset to start at the first pipe."
            }
            "CONFIG-004-UNRESOLVED_FORWARD" => {
                "Point the forward at a declared pipe or exit, or declare the missing target."
            }
            "CONFIG-005-DUPLICATE_EXIT" => "Give every exit a unique name.",
            "CONFIG-006-EMPTY_PATH" => "Forwards must have a non-empty path.",
            "CONFIG-007-UNNAMED_PIPE" => "Every pipe needs a non-empty name.",
            "CONFIG-008-PARSE" => "Check the configuration document against the documented fields.",
            _ => return None,
        };
        Some(hint)
    }

    /// Returns all known codes.
    #[must_use]
    pub fn codes() -> &'static [&'static str] {
        &[
            "CONFIG-001-NO_PIPES",
            "CONFIG-002-DUPLICATE_PIPE",
            "CONFIG-003-FIRST_PIPE",
            "CONFIG-004-UNRESOLVED_FORWARD",
            "CONFIG-005-DUPLICATE_EXIT",
            "CONFIG-006-EMPTY_PATH",
            "CONFIG-007-UNNAMED_PIPE",
            "CONFIG-008-PARSE",
        ]
    }
}
