//! Console output levels for the command-line tools.

/// Output level selected by the global `--quiet`/`--verbose` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Suppress everything except errors.
    Quiet,
    /// Default one-line-per-event output.
    Normal,
    /// Extra detail for debugging runs.
    Verbose,
}

impl LogLevel {
    /// Resolve the level from the global CLI flags; quiet wins.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if verbose {
            Self::Verbose
        } else {
            Self::Normal
        }
    }

    /// True when a message at `required` level should be printed.
    #[must_use]
    pub fn allows(self, required: LogLevel) -> bool {
        match self {
            Self::Quiet => false,
            Self::Normal => required == Self::Normal,
            Self::Verbose => true,
        }
    }
}

/// Print `msg` when the current level permits messages at `required`.
pub fn log(level: LogLevel, required: LogLevel, msg: &str) {
    if level.allows(required) {
        println!("{msg}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_wins_over_verbose() {
        assert_eq!(LogLevel::from_flags(true, true), LogLevel::Quiet);
        assert_eq!(LogLevel::from_flags(true, false), LogLevel::Quiet);
        assert_eq!(LogLevel::from_flags(false, true), LogLevel::Verbose);
        assert_eq!(LogLevel::from_flags(false, false), LogLevel::Normal);
    }

    #[test]
    fn test_allows_matrix() {
        assert!(!LogLevel::Quiet.allows(LogLevel::Normal));
        assert!(!LogLevel::Quiet.allows(LogLevel::Verbose));

        assert!(LogLevel::Normal.allows(LogLevel::Normal));
        assert!(!LogLevel::Normal.allows(LogLevel::Verbose));

        assert!(LogLevel::Verbose.allows(LogLevel::Normal));
        assert!(LogLevel::Verbose.allows(LogLevel::Verbose));
    }
}
