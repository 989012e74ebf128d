use crate::Error;

use std::collections::HashMap;
use std::str::FromStr;

use hookstream_events::ProviderId;

/// An upstream webhook sender and the headers it puts its routing ids in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderConfig {
    /// Numeric id stored with every event.
    pub id: ProviderId,

    /// Name used in the request path and in subjects.
    pub name: String,

    /// Header carrying the hook id.
    pub hook_id_header: String,

    /// Header carrying the event name.
    pub event_header: String,

    /// Header carrying the delivery id.
    pub delivery_id_header: String,
}

impl ProviderConfig {
    /// A provider sending GitHub-style `X-GitHub-*` headers.
    #[must_use]
    pub fn github(id: impl Into<ProviderId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            hook_id_header: "X-GitHub-Hook-ID".to_string(),
            event_header: "X-GitHub-Event".to_string(),
            delivery_id_header: "X-GitHub-Delivery".to_string(),
        }
    }

    /// A provider sending the generic `X-Hook-ID`, `X-Event-Name` and `X-Delivery-ID` headers.
    #[must_use]
    pub fn generic(id: impl Into<ProviderId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            hook_id_header: "X-Hook-ID".to_string(),
            event_header: "X-Event-Name".to_string(),
            delivery_id_header: "X-Delivery-ID".to_string(),
        }
    }
}

/// Parses `id:name`. A provider named `github` gets the GitHub headers.
impl FromStr for ProviderConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::InvalidProvider {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (id, name) = s
            .split_once(':')
            .ok_or_else(|| invalid("expected `id:name`"))?;

        let id: ProviderId = id.parse().map_err(|_| invalid("id is not an integer"))?;
        let name = name.trim();

        if name.is_empty() || name.contains(['/', '.', '*', '>']) || name.contains(char::is_whitespace)
        {
            return Err(invalid("name must be a single path segment"));
        }

        if name.eq_ignore_ascii_case("github") {
            Ok(Self::github(id, name))
        } else {
            Ok(Self::generic(id, name))
        }
    }
}

/// Providers the gateway accepts webhooks from, looked up by name.
#[derive(Clone, Debug, Default)]
pub struct Providers {
    by_name: HashMap<String, ProviderConfig>,
}

impl Providers {
    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if two providers share a name or an id.
    pub fn new(providers: impl IntoIterator<Item = ProviderConfig>) -> Result<Self, Error> {
        let mut by_name = HashMap::new();

        for provider in providers {
            if by_name
                .values()
                .any(|existing: &ProviderConfig| existing.id == provider.id)
            {
                return Err(Error::DuplicateProvider(provider.id.to_string()));
            }

            if by_name.contains_key(&provider.name) {
                return Err(Error::DuplicateProvider(provider.name));
            }

            by_name.insert(provider.name.clone(), provider);
        }

        Ok(Self { by_name })
    }

    /// Looks up a provider by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.by_name.get(name)
    }

    /// Iterates over the configured providers in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.by_name.values()
    }

    /// Number of configured providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// True if no provider is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[test]
    fn test_parse_picks_header_set() {
        let github: ProviderConfig = "1:github".parse().unwrap();
        assert_eq!(github, ProviderConfig::github(ProviderId(1), "github"));

        let stripe: ProviderConfig = " 7:stripe".parse().unwrap();
        assert_eq!(stripe.id, ProviderId(7));
        assert_eq!(stripe.delivery_id_header, "X-Delivery-ID");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for value in ["github", "x:github", "1:", "1:git hub", "1:a.b"] {
            assert_matches!(
                value.parse::<ProviderConfig>(),
                Err(Error::InvalidProvider { .. }),
                "{value}"
            );
        }
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        assert_matches!(
            Providers::new([
                ProviderConfig::github(ProviderId(1), "github"),
                ProviderConfig::generic(ProviderId(1), "other"),
            ]),
            Err(Error::DuplicateProvider(_))
        );

        assert_matches!(
            Providers::new([
                ProviderConfig::github(ProviderId(1), "github"),
                ProviderConfig::generic(ProviderId(2), "github"),
            ]),
            Err(Error::DuplicateProvider(_))
        );

        let providers = Providers::new([ProviderConfig::github(ProviderId(1), "github")]).unwrap();
        assert_eq!(providers.len(), 1);
        assert!(providers.get("gitlab").is_none());
    }
}
