use serde::{Deserialize, Serialize};

/// Options for wrapping an operation.
///
/// This can be deserialized from configuration files, all fields are optional:
///
/// ```yaml
/// memoize: true
/// name: find_user
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Options {
    /// Retain successful values indefinitely, until cleared.
    pub memoize: bool,
    /// The name of the operation in logs and metrics.
    ///
    /// Defaults to the type name of the operation.
    pub name: Option<String>,
}

impl Options {
    /// Options with memoization enabled.
    pub fn memoized() -> Self {
        Self {
            memoize: true,
            ..Default::default()
        }
    }
}
