//! Lowering configuration
//!
//! Controls the default inlining mode, loop-index naming and the debugging
//! aids of [`lower_kernel`](crate::lower::lower_kernel).

use crate::schedule::InlineMode;

/// Environment variable overriding [`LoweringConfig::index_prefix`]
pub const ENV_INDEX_PREFIX: &str = "LOOPNEST_INDEX_PREFIX";
/// Set to `1` to log every lowered kernel at info level
pub const ENV_DUMP_KERNEL: &str = "LOOPNEST_DUMP_KERNEL";
/// Set to `1` to skip kernel validation
pub const ENV_NO_VALIDATE: &str = "LOOPNEST_NO_VALIDATE";

/// Lowering parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweringConfig {
    /// Mode [`schedule_and_lower`](crate::lower::schedule_and_lower) inlines
    /// with
    pub inline_mode: InlineMode,

    /// Prefix for fresh serial loop indices
    ///
    /// e.g. `"i"` yields `i0`, `i1`, ...
    pub index_prefix: String,

    /// Run structural validation on the built kernel
    pub validate: bool,

    /// Log the rendered kernel at info level
    pub dump_kernel: bool,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            inline_mode: InlineMode::Standard,
            index_prefix: "i".to_string(),
            validate: true,
            dump_kernel: false,
        }
    }
}

impl LoweringConfig {
    /// Build a configuration step by step
    ///
    /// # Example
    ///
    /// ```
    /// use loopnest::config::LoweringConfig;
    ///
    /// let config = LoweringConfig::builder()
    ///     .index_prefix("ridx")
    ///     .validate(false)
    ///     .build();
    /// assert_eq!(config.index_prefix, "ridx");
    /// ```
    pub fn builder() -> LoweringConfigBuilder {
        LoweringConfigBuilder::new()
    }

    /// Default configuration with kernel dumping enabled
    pub fn debug() -> Self {
        Self {
            dump_kernel: true,
            ..Default::default()
        }
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by environment-variable name
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(prefix) = lookup(ENV_INDEX_PREFIX) {
            if prefix.is_empty() {
                log::warn!("Ignoring empty {}", ENV_INDEX_PREFIX);
            } else {
                self.index_prefix = prefix;
            }
        }
        if lookup(ENV_DUMP_KERNEL).as_deref() == Some("1") {
            self.dump_kernel = true;
        }
        if lookup(ENV_NO_VALIDATE).as_deref() == Some("1") {
            self.validate = false;
        }
        self
    }
}

/// Builder for [`LoweringConfig`]
pub struct LoweringConfigBuilder {
    config: LoweringConfig,
}

impl LoweringConfigBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self {
            config: LoweringConfig::default(),
        }
    }

    pub fn inline_mode(mut self, mode: InlineMode) -> Self {
        self.config.inline_mode = mode;
        self
    }

    pub fn index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.index_prefix = prefix.into();
        self
    }

    pub fn validate(mut self, enable: bool) -> Self {
        self.config.validate = enable;
        self
    }

    pub fn dump_kernel(mut self, enable: bool) -> Self {
        self.config.dump_kernel = enable;
        self
    }

    pub fn build(self) -> LoweringConfig {
        self.config
    }
}

impl Default for LoweringConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
