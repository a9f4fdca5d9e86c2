//! Pool configuration.

/// Configuration for the session pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of idle sessions kept per connection target.
    ///
    /// `None` keeps every healthy session that is returned. When a target
    /// already holds this many idle sessions, further returns are discarded.
    pub max_idle_per_target: Option<usize>,

    /// Whether to try another idle session (and finally a fresh one) when
    /// resuming an idle session fails.
    ///
    /// When disabled, the resume failure is returned to the caller.
    pub fallback_on_resume_failure: bool,

    /// Whether to end the remote session when a broken handle is released.
    ///
    /// By default the transport is closed with the session left alive and
    /// the server expires it on its own timeout.
    pub end_session_on_discard: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_target: None,
            fallback_on_resume_failure: true,
            end_session_on_discard: false,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of idle sessions kept for each target.
    #[must_use]
    pub fn max_idle_per_target(mut self, count: usize) -> Self {
        self.max_idle_per_target = Some(count);
        self
    }

    /// Keep every healthy returned session.
    #[must_use]
    pub fn unbounded_idle(mut self) -> Self {
        self.max_idle_per_target = None;
        self
    }

    /// Enable or disable falling back when an idle session cannot be resumed.
    #[must_use]
    pub fn fallback_on_resume_failure(mut self, enabled: bool) -> Self {
        self.fallback_on_resume_failure = enabled;
        self
    }

    /// Enable or disable ending the remote session of broken handles.
    #[must_use]
    pub fn end_session_on_discard(mut self, enabled: bool) -> Self {
        self.end_session_on_discard = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), crate::error::PoolError> {
        if self.max_idle_per_target == Some(0) {
            return Err(crate::error::PoolError::Configuration(
                "max_idle_per_target must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Whether a sub-queue holding `idle` sessions may take one more.
    pub(crate) fn has_idle_room(&self, idle: usize) -> bool {
        self.max_idle_per_target.is_none_or(|max| idle < max)
    }
}
