//! Attributes a record's `userIdentity` to a principal.
//!
//! Key, name and ARN are each resolved by walking an ordered list of fields
//! and taking the first non-empty one. A session issuer always comes first,
//! so temporary sessions are attributed to the role that issued them.

use super::model::{SessionIssuer, UserIdentity};
use crate::core::report::PrincipalType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    SessionIssuer,
    IdentityProvider,
    Arn,
    PrincipalId,
    InvokedBy,
}

const KEY_FIELDS: &[Field] = &[
    Field::SessionIssuer,
    Field::IdentityProvider,
    Field::Arn,
    Field::PrincipalId,
    Field::InvokedBy,
];

const NAME_FIELDS: &[Field] = &[
    Field::SessionIssuer,
    Field::IdentityProvider,
    Field::Arn,
    Field::InvokedBy,
];

const ARN_FIELDS: &[Field] = &[Field::SessionIssuer, Field::IdentityProvider, Field::Arn];

trait IdentityFields {
    fn issuer(&self) -> Option<&SessionIssuer>;
    fn identity_provider(&self) -> Option<&str>;
    fn arn(&self) -> Option<&str>;
    fn principal_id(&self) -> Option<&str>;
    fn invoked_by(&self) -> Option<&str>;
}

impl IdentityFields for UserIdentity {
    fn issuer(&self) -> Option<&SessionIssuer> {
        self.session_context.as_ref()?.session_issuer.as_ref()
    }
    fn identity_provider(&self) -> Option<&str> {
        self.identity_provider.as_deref()
    }
    fn arn(&self) -> Option<&str> {
        self.arn.as_deref()
    }
    fn principal_id(&self) -> Option<&str> {
        self.principal_id.as_deref()
    }
    fn invoked_by(&self) -> Option<&str> {
        self.invoked_by.as_deref()
    }
}

impl IdentityFields for SessionIssuer {
    fn issuer(&self) -> Option<&SessionIssuer> {
        None
    }
    fn identity_provider(&self) -> Option<&str> {
        self.identity_provider.as_deref()
    }
    fn arn(&self) -> Option<&str> {
        self.arn.as_deref()
    }
    fn principal_id(&self) -> Option<&str> {
        self.principal_id.as_deref()
    }
    fn invoked_by(&self) -> Option<&str> {
        self.invoked_by.as_deref()
    }
}

fn resolve<'a, I: IdentityFields + ?Sized>(identity: &'a I, fields: &[Field]) -> Option<&'a str> {
    fields.iter().find_map(|field| {
        let value = match field {
            Field::SessionIssuer => identity.issuer().and_then(|issuer| resolve(issuer, fields)),
            Field::IdentityProvider => identity.identity_provider(),
            Field::Arn => identity.arn(),
            Field::PrincipalId => identity.principal_id(),
            Field::InvokedBy => identity.invoked_by(),
        };
        value.filter(|value| !value.is_empty())
    })
}

/// Who a record is attributed to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPrincipal {
    /// Deduplication key within a report.
    pub key: String,
    pub name: String,
    pub arn: String,
    pub principal_type: PrincipalType,
}

/// Resolves a record's identity. A missing identity resolves to an empty key
/// of unknown type.
pub fn resolve_principal(identity: Option<&UserIdentity>) -> ResolvedPrincipal {
    let Some(identity) = identity else {
        return ResolvedPrincipal::default();
    };
    let field = |fields: &[Field]| resolve(identity, fields).unwrap_or_default().to_string();
    ResolvedPrincipal {
        key: field(KEY_FIELDS),
        name: field(NAME_FIELDS),
        arn: field(ARN_FIELDS),
        principal_type: principal_type(identity.identity_type.as_deref()),
    }
}

/// Maps CloudTrail's `userIdentity.type` onto [`PrincipalType`].
pub fn principal_type(identity_type: Option<&str>) -> PrincipalType {
    match identity_type {
        Some("AssumedRole") => PrincipalType::AssumedRole,
        Some("Role") => PrincipalType::Role,
        Some("IAMUser") => PrincipalType::IamUser,
        Some("AWSService") => PrincipalType::Service,
        Some("AWSAccount") => PrincipalType::Account,
        Some("WebIdentityUser") => PrincipalType::WebIdentityUser,
        _ => PrincipalType::Unknown,
    }
}
