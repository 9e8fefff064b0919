use crate::registry::MAX_TYPES;

/// Controls type registration limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Maximum number of descriptors, reserved types included.
    ///
    /// Values above [`MAX_TYPES`] are clamped: one id value is kept back as
    /// the "unmapped" sentinel.
    pub max_types: usize,
}

impl RegistryConfig {
    pub(crate) fn capacity(&self) -> usize {
        self.max_types.min(MAX_TYPES)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_types: MAX_TYPES,
        }
    }
}
