//! URL handling for sandbar: canonicalization and lookup expressions.
//!
//! The service matches hashes of *expressions*, not raw URLs. A raw URL is
//! first reduced to a canonical form ([`canonicalize`]), then fanned out into
//! the host-suffix/path-prefix expressions ([`expressions`]) whose SHA-256
//! digests are probed against the local database.
//!
//! The canonical form is a compatibility contract with the service, so the
//! steps in [`canonicalize`] are deliberately literal rather than RFC 3986
//! general. Known limitation: high-bit hostnames are not punycoded; callers
//! handling international domains should pre-punycode.

mod canonical;
mod expression;

pub use canonical::{CanonicalUrl, UrlError, canonicalize};
pub use expression::{Expression, expressions};
