use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// The (tenant, project) pair that isolates a memory universe.
///
/// Every artifact belongs to exactly one scope, and no operation may
/// cross tenants. Construction validates both components so that an
/// empty tenant can never reach a storage adapter.
///
/// # Examples
///
/// ```
/// use rae_core::Scope;
///
/// let scope = Scope::new("acme", "support-bot").unwrap();
/// assert_eq!(scope.tenant(), "acme");
/// assert_eq!(scope.project(), "support-bot");
///
/// assert!(Scope::new("", "p").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    tenant: String,
    project: String,
}

impl Scope {
    /// Maximum length for tenant and project identifiers.
    pub const MAX_COMPONENT_LEN: usize = 128;

    /// Create a validated scope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if either component is empty,
    /// overlong, or contains control characters.
    pub fn new(tenant: impl Into<String>, project: impl Into<String>) -> Result<Self> {
        let tenant = tenant.into();
        let project = project.into();
        Self::validate_component("tenant", &tenant)?;
        Self::validate_component("project", &project)?;
        Ok(Self { tenant, project })
    }

    fn validate_component(name: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(Error::InvalidInput(format!("{name} must not be empty")));
        }
        if value.len() > Self::MAX_COMPONENT_LEN {
            return Err(Error::InvalidInput(format!(
                "{name} exceeds {} characters",
                Self::MAX_COMPONENT_LEN
            )));
        }
        if value.chars().any(char::is_control) {
            return Err(Error::InvalidInput(format!(
                "{name} contains control characters"
            )));
        }
        Ok(())
    }

    /// Tenant identifier.
    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Project identifier.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Whether this scope shares a tenant with another.
    #[must_use]
    pub fn same_tenant(&self, other: &Scope) -> bool {
        self.tenant == other.tenant
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant, self.project)
    }
}
