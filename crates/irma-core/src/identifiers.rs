//! The dotted-path identifier tree: scheme manager, issuer, credential
//! type, attribute type. Parents are derivable from children by stripping
//! the last path segment; equality is string-exact.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

fn parent(path: &str) -> &str {
    match path.rfind('.') {
        Some(i) => &path[..i],
        None => path,
    }
}

fn last_segment(path: &str) -> &str {
    match path.rfind('.') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

macro_rules! identifier_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Last path segment.
            pub fn name(&self) -> &str {
                last_segment(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

identifier_type!(
    SchemeManagerIdentifier,
    "Trust root, e.g. `irma-demo`."
);
identifier_type!(IssuerIdentifier, "Issuer under a scheme manager, e.g. `irma-demo.RU`.");
identifier_type!(
    CredentialTypeIdentifier,
    "Credential type under an issuer, e.g. `irma-demo.RU.studentCard`."
);
identifier_type!(
    AttributeTypeIdentifier,
    "Attribute type under a credential type, e.g. `irma-demo.RU.studentCard.studentID`."
);

impl IssuerIdentifier {
    pub fn scheme_manager(&self) -> SchemeManagerIdentifier {
        SchemeManagerIdentifier::new(parent(&self.0))
    }
}

impl CredentialTypeIdentifier {
    pub fn issuer(&self) -> IssuerIdentifier {
        IssuerIdentifier::new(parent(&self.0))
    }
}

impl AttributeTypeIdentifier {
    /// A three-segment identifier names a whole credential rather than a
    /// single attribute within one.
    pub fn is_credential(&self) -> bool {
        self.0.matches('.').count() == 2
    }

    pub fn credential_type(&self) -> CredentialTypeIdentifier {
        if self.is_credential() {
            CredentialTypeIdentifier::new(self.0.clone())
        } else {
            CredentialTypeIdentifier::new(parent(&self.0))
        }
    }
}

/// Every identifier a request or session touches, grouped per level.
/// Sessions resolve this set against the configuration before proceeding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierSet {
    pub scheme_managers: BTreeSet<SchemeManagerIdentifier>,
    pub issuers: BTreeSet<IssuerIdentifier>,
    pub credential_types: BTreeSet<CredentialTypeIdentifier>,
    /// Key counters needed per issuer.
    pub public_keys: BTreeMap<IssuerIdentifier, Vec<u32>>,
}

impl IdentifierSet {
    pub fn is_empty(&self) -> bool {
        self.scheme_managers.is_empty()
            && self.issuers.is_empty()
            && self.credential_types.is_empty()
            && self.public_keys.is_empty()
    }

    /// Insert a credential type and its ancestors.
    pub fn add_credential_type(&mut self, id: &CredentialTypeIdentifier) {
        let issuer = id.issuer();
        self.scheme_managers.insert(issuer.scheme_manager());
        self.issuers.insert(issuer);
        self.credential_types.insert(id.clone());
    }

    pub fn add_public_key(&mut self, issuer: &IssuerIdentifier, counter: u32) {
        let counters = self.public_keys.entry(issuer.clone()).or_default();
        if !counters.contains(&counter) {
            counters.push(counter);
        }
    }

    /// A set containing just one scheme manager, used when announcing a
    /// freshly installed manager.
    pub fn singleton_manager(id: SchemeManagerIdentifier) -> Self {
        let mut set = Self::default();
        set.scheme_managers.insert(id);
        set
    }

    pub fn merge(&mut self, other: &IdentifierSet) {
        self.scheme_managers
            .extend(other.scheme_managers.iter().cloned());
        self.issuers.extend(other.issuers.iter().cloned());
        self.credential_types
            .extend(other.credential_types.iter().cloned());
        for (issuer, counters) in &other.public_keys {
            for c in counters {
                self.add_public_key(issuer, *c);
            }
        }
    }
}
