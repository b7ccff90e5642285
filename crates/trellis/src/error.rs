//! Error types for the module framework.

/// Result type alias for framework operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error raised by a user-supplied lifecycle hook.
///
/// Hook failures are never caught by the framework; they propagate to the
/// caller of the instantiation entry point wrapped in [`Error::Hook`].
pub type BehaviorError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in the module framework.
///
/// All failures are local and synchronous; nothing is retried. Attribute
/// literal parse failures are deliberately absent: they recover to the raw
/// string value instead of surfacing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A module type name was defined twice in one registry.
    #[error("Module type '{0}' is already defined")]
    DuplicateType(String),

    /// `extend` was given something that is not a module capability table.
    #[error("Invalid parent for module type '{module}': {message}")]
    InvalidParent { module: String, message: String },

    /// A method name was accumulated twice across staged builder calls.
    #[error("Method '{name}' is already defined on module type '{module}'")]
    DuplicateProperty { module: String, name: String },

    /// A method name already exists on the shared base contract.
    #[error("Base method '{0}' is already defined")]
    DuplicateBaseMethod(String),

    /// The base contract can no longer change: a type has been compiled.
    #[error("Cannot extend the base contract after a module type has been built")]
    BaseSealed,

    /// Malformed deferral configuration (missing trigger event name).
    #[error("Invalid defer configuration for module type '{module}': {message}")]
    InvalidDeferConfig { module: String, message: String },

    /// A library name was registered twice.
    #[error("Library '{0}' is already registered")]
    DuplicateLibrary(String),

    /// A required library is not registered.
    #[error("Unknown library '{0}'")]
    UnknownLibrary(String),

    /// A user lifecycle hook failed. Construction is not transactional:
    /// the instance is left unregistered and partially wired.
    #[error("Module '{module}' hook '{slot}' failed: {source}")]
    Hook {
        module: String,
        slot: String,
        #[source]
        source: BehaviorError,
    },
}

impl Error {
    /// Create an [`Error::InvalidParent`].
    pub fn invalid_parent(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParent {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Create an [`Error::DuplicateProperty`].
    pub fn duplicate_property(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DuplicateProperty {
            module: module.into(),
            name: name.into(),
        }
    }

    /// Create an [`Error::InvalidDeferConfig`].
    pub fn invalid_defer(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDeferConfig {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Create an [`Error::Hook`].
    pub fn hook(
        module: impl Into<String>,
        slot: impl Into<String>,
        source: BehaviorError,
    ) -> Self {
        Self::Hook {
            module: module.into(),
            slot: slot.into(),
            source,
        }
    }
}
