use core::fmt;

use crate::compile::LoweringMode;

/// Error raised when trying to parse an invalid option.
#[derive(Debug, Clone)]
pub struct ParseOptionError {
    option: Box<str>,
}

impl fmt::Display for ParseOptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unsupported lowering option `{}`", self.option)
    }
}

impl std::error::Error for ParseOptionError {}

/// Options that can be provided to the lowering.
///
/// See [lower][crate::compile::lower].
#[derive(Debug, Clone)]
pub struct Options {
    /// The lowering mode, which decides where spilled values are kept and
    /// which constructs may be spilled at all.
    pub(crate) mode: LoweringMode,
    /// Reuse slots whose live ranges have ended.
    pub(crate) reuse_slots: bool,
    /// Clear reference-typed slots once they are no longer live.
    pub(crate) release_slots: bool,
    /// Verify the emitted operations.
    pub(crate) verify: bool,
}

impl Options {
    /// Parse a lowering option. This is the function which parses the
    /// `<option>[=<value>]` syntax.
    ///
    /// # Examples
    ///
    /// ```
    /// use spill::compile::{LoweringMode, Options};
    ///
    /// let mut options = Options::default();
    /// options.parse_option("mode=runtime")?;
    /// options.parse_option("reuse-slots=false")?;
    /// assert_eq!(options.lowering_mode(), LoweringMode::Runtime);
    /// assert!(options.parse_option("optimize").is_err());
    /// # Ok::<_, spill::compile::ParseOptionError>(())
    /// ```
    pub fn parse_option(&mut self, option: &str) -> Result<(), ParseOptionError> {
        let (head, tail) = if let Some((head, tail)) = option.split_once('=') {
            (head, Some(tail))
        } else {
            (option, None)
        };

        match head {
            "mode" => {
                let Some(mode) = tail.and_then(|s| s.parse().ok()) else {
                    return Err(ParseOptionError {
                        option: option.into(),
                    });
                };

                self.mode = mode;
            }
            "reuse-slots" => {
                self.reuse_slots = tail.map_or(true, |s| s == "true");
            }
            "release-slots" => {
                self.release_slots = tail.map_or(true, |s| s == "true");
            }
            "verify" => {
                self.verify = tail.map_or(true, |s| s == "true");
            }
            _ => {
                return Err(ParseOptionError {
                    option: option.into(),
                });
            }
        }

        Ok(())
    }

    /// Construct options for the given mode.
    pub fn with_mode(mode: LoweringMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Get the configured lowering mode.
    pub fn lowering_mode(&self) -> LoweringMode {
        self.mode
    }

    /// Set the lowering mode. Defaults to [LoweringMode::StateMachine].
    pub fn mode(&mut self, mode: LoweringMode) {
        self.mode = mode;
    }

    /// Set if slots are reused once their live range has ended. Defaults to
    /// `true`. Without reuse, every spilled value gets its own slot.
    pub fn reuse_slots(&mut self, enabled: bool) {
        self.reuse_slots = enabled;
    }

    /// Set if reference-typed slots are cleared once no longer live. Defaults
    /// to `true`.
    pub fn release_slots(&mut self, enabled: bool) {
        self.release_slots = enabled;
    }

    /// Set if the emitted operations are verified. Defaults to `true`.
    pub fn verify(&mut self, enabled: bool) {
        self.verify = enabled;
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: LoweringMode::StateMachine,
            reuse_slots: true,
            release_slots: true,
            verify: true,
        }
    }
}
