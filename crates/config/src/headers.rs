//! Static header injection for upstream provider requests.

use serde::Deserialize;

/// A single header to attach to every request sent to a provider.
///
/// Distinct from the credential header, which the dispatcher injects from the
/// resolved API key. These are for provider-specific extras such as
/// `OpenRouter`'s `HTTP-Referer`/`X-Title` attribution headers.
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderRule {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}
