//! Record location scheme
//!
//! `{root}/{applicationId}/{visibility}/{dataNamespace}/{collection}/{documentId}`

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::identity::UserId;

/// The two collections the pipeline touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// One `PaymentRequest` per user
    Payments,
    /// One `AccessGrant` per user
    UserAccess,
}

impl Collection {
    /// Path segment for this collection
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payments => "payments",
            Self::UserAccess => "user_access",
        }
    }
}

/// Path prefix shared by every record of one application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathScheme {
    /// Top-level root segment
    #[serde(default = "default_root")]
    pub root: String,
    /// Application identifier
    #[serde(default = "default_application_id")]
    pub application_id: String,
    /// Visibility segment
    #[serde(default = "default_visibility")]
    pub visibility: String,
    /// Data namespace segment
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_root() -> String {
    "artifacts".to_string()
}

fn default_application_id() -> String {
    "paygate_suite".to_string()
}

fn default_visibility() -> String {
    "public".to_string()
}

fn default_namespace() -> String {
    "data".to_string()
}

impl Default for PathScheme {
    fn default() -> Self {
        Self {
            root: default_root(),
            application_id: default_application_id(),
            visibility: default_visibility(),
            namespace: default_namespace(),
        }
    }
}

fn check_segment(name: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('/') {
        return Err(Error::InvalidPath(format!(
            "{} segment must be non-empty and contain no '/': {:?}",
            name, value
        )));
    }
    Ok(())
}

impl PathScheme {
    /// Build a validated scheme
    pub fn new(
        root: impl Into<String>,
        application_id: impl Into<String>,
        visibility: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<Self> {
        let scheme = Self {
            root: root.into(),
            application_id: application_id.into(),
            visibility: visibility.into(),
            namespace: namespace.into(),
        };
        scheme.validate()?;
        Ok(scheme)
    }

    /// Check every segment
    pub fn validate(&self) -> Result<()> {
        check_segment("root", &self.root)?;
        check_segment("application_id", &self.application_id)?;
        check_segment("visibility", &self.visibility)?;
        check_segment("namespace", &self.namespace)
    }

    /// Path of a whole collection
    #[must_use]
    pub fn collection(&self, collection: Collection) -> CollectionPath {
        CollectionPath(format!(
            "{}/{}/{}/{}/{}",
            self.root,
            self.application_id,
            self.visibility,
            self.namespace,
            collection.as_str()
        ))
    }

    /// Path of a user's payment request
    #[must_use]
    pub fn payment(&self, user_id: &UserId) -> DocumentPath {
        self.collection(Collection::Payments).document(user_id)
    }

    /// Path of a user's access grant
    #[must_use]
    pub fn grant(&self, user_id: &UserId) -> DocumentPath {
        self.collection(Collection::UserAccess).document(user_id)
    }
}

/// Fully qualified collection path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Document inside this collection
    #[must_use]
    pub fn document(&self, user_id: &UserId) -> DocumentPath {
        DocumentPath {
            collection: self.clone(),
            id: user_id.as_str().to_string(),
        }
    }

    /// Raw path string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully qualified document path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    collection: CollectionPath,
    id: String,
}

impl DocumentPath {
    /// Owning collection
    #[must_use]
    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    /// Document id (the user id)
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}
