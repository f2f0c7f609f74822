//! Email format checks and the MX-lookup seam.
//!
//! The core issues no DNS queries itself; MX existence is answered by an
//! injected [`MxResolver`]. Tests bind [`StaticMxResolver`]; production
//! binds a DNS-backed implementation outside the core.

use async_trait::async_trait;
use std::collections::HashSet;

/// Answers whether a domain publishes an MX record.
#[async_trait]
pub trait MxResolver: Send + Sync {
    async fn has_mx(&self, domain: &str) -> bool;
}

/// Resolver that treats every domain as deliverable. Used when no DNS
/// collaborator is wired in; the email rule then degrades to format-only.
pub struct PermissiveMxResolver;

#[async_trait]
impl MxResolver for PermissiveMxResolver {
    async fn has_mx(&self, _domain: &str) -> bool {
        true
    }
}

/// Fixed-set resolver for tests.
#[derive(Default)]
pub struct StaticMxResolver {
    domains: HashSet<String>,
}

impl StaticMxResolver {
    pub fn with_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains.into_iter().map(|d| d.into().to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl MxResolver for StaticMxResolver {
    async fn has_mx(&self, domain: &str) -> bool {
        self.domains.contains(&domain.to_lowercase())
    }
}

/// RFC-lite shape check: one `@`, a sane local part, dotted domain labels,
/// alphabetic TLD of at least two characters.
pub fn is_well_formed(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    if local.is_empty()
        || local.len() > 64
        || !local
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"._%+-".contains(&b))
        || local.starts_with('.')
        || local.ends_with('.')
    {
        return false;
    }

    if domain.is_empty() || domain.len() > 255 || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    for label in &labels {
        if label.is_empty()
            || !label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
            || label.starts_with('-')
            || label.ends_with('-')
        {
            return false;
        }
    }
    let tld = labels[labels.len() - 1];
    tld.len() >= 2 && tld.bytes().all(|b| b.is_ascii_alphabetic())
}

/// The domain part of a well-formed address.
pub fn domain_of(email: &str) -> Option<&str> {
    email.split_once('@').map(|(_, domain)| domain)
}
