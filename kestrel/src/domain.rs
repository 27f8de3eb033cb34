// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Domain registry and domain selection on CONNECT.

use codec::ConnectReturnCode;

use crate::auth::backend::{default_backends, AuthBackend};
use crate::commands::{Admission, AuthResult};
use crate::config;
use crate::error::{Error, ErrorKind};
use crate::types::DomainId;

/// A loaded domain: its config plus the auth backend instance bound to it.
#[derive(Debug)]
pub struct Domain {
    id: DomainId,
    config: config::Domain,
    backend: Box<dyn AuthBackend>,
}

impl Domain {
    #[must_use]
    pub const fn id(&self) -> DomainId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.config.name()
    }

    #[must_use]
    pub const fn config(&self) -> &config::Domain {
        &self.config
    }

    /// Run the admission checks and authentication of this domain.
    fn admit(
        &self,
        domain_selected: bool,
        client_id: &str,
        username: Option<&str>,
        password: &[u8],
        clean_session: bool,
    ) -> AuthResult {
        let restrict = self.config.restrict_client_ids();
        if !restrict.is_empty() && !restrict.iter().any(|id| id == client_id) {
            return AuthResult::Rejected(ConnectReturnCode::IdentifierRejected);
        }

        if username.is_none() && !self.config.require_auth() {
            // Domains without mandatory auth admit credential-less clients
            // directly.
            return AuthResult::Accepted(Admission {
                domain_id: self.id,
                client_id: client_id.to_string(),
                username: None,
                clean_session,
            });
        }

        if self.config.require_auth() && username.is_none() {
            return AuthResult::Rejected(ConnectReturnCode::BadUserNameOrPassword);
        }

        if self
            .backend
            .auth(domain_selected, client_id, username, password)
        {
            AuthResult::Accepted(Admission {
                domain_id: self.id,
                client_id: client_id.to_string(),
                username: username.map(ToString::to_string),
                clean_session,
            })
        } else {
            AuthResult::Rejected(ConnectReturnCode::BadUserNameOrPassword)
        }
    }
}

/// All configured domains, in config order.
#[derive(Debug)]
pub struct DomainRegistry {
    domains: Vec<Domain>,
}

/// Split a `value@server-name` indication at the first `@`.
fn split_server_name(value: &str) -> Option<(&str, &str)> {
    value
        .find('@')
        .map(|index| (&value[..index], &value[index + 1..]))
}

impl DomainRegistry {
    /// Instantiate domains and their auth backends from config. An empty
    /// config gets the anonymous catch-all domain.
    ///
    /// # Errors
    ///
    /// Returns error for unknown backend labels or unreadable users
    /// databases.
    pub fn new(configs: &[config::Domain]) -> Result<Self, Error> {
        let factories = default_backends();
        let mut domains = Vec::new();

        let fallback;
        let configs = if configs.is_empty() {
            fallback = [config::Domain::fallback()];
            &fallback[..]
        } else {
            configs
        };

        #[allow(clippy::cast_possible_truncation)]
        for (index, domain_config) in configs.iter().enumerate() {
            let factory = factories.get(domain_config.backend()).ok_or_else(|| {
                Error::from_string(
                    ErrorKind::ConfigError,
                    format!(
                        "domain {}: unknown auth backend {:?}",
                        domain_config.name(),
                        domain_config.backend()
                    ),
                )
            })?;
            let mut backend = factory();
            backend.load(domain_config.name(), domain_config.users_db())?;
            domains.push(Domain {
                id: index as DomainId,
                config: domain_config.clone(),
                backend,
            });
        }

        Ok(Self { domains })
    }

    #[must_use]
    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    #[must_use]
    pub fn get(&self, id: DomainId) -> Option<&Domain> {
        self.domains.iter().find(|domain| domain.id == id)
    }

    /// Find an active domain by name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Domain> {
        self.domains
            .iter()
            .find(|domain| domain.config.is_active() && domain.name() == name)
    }

    /// Select the domain of a connecting client and authenticate it.
    ///
    /// Order of indications:
    /// 1. `client_id@server-name`, then `username@server-name`; a matching
    ///    domain is final and the tails are stripped before auth.
    /// 2. The transport server name (TLS SNI or WebSocket `Host`).
    /// 3. Probing every active domain with `domain_selected=false`; the
    ///    first backend accepting the credentials wins.
    #[must_use]
    pub fn select(
        &self,
        client_id: &str,
        username: Option<&str>,
        password: &[u8],
        server_name: Option<&str>,
        clean_session: bool,
    ) -> AuthResult {
        // Strip the tails from both values once a domain matched either.
        let stripped_client_id =
            split_server_name(client_id).map_or(client_id, |(head, _tail)| head);
        let stripped_username =
            username.map(|name| split_server_name(name).map_or(name, |(head, _tail)| head));

        if let Some((_, tail)) = split_server_name(client_id) {
            if let Some(domain) = self.find_by_name(tail) {
                log::info!("domain {}: selected by client id indication", domain.name());
                return domain.admit(
                    true,
                    stripped_client_id,
                    stripped_username,
                    password,
                    clean_session,
                );
            }
        }
        if let Some(name) = username {
            if let Some((_, tail)) = split_server_name(name) {
                if let Some(domain) = self.find_by_name(tail) {
                    log::info!("domain {}: selected by username indication", domain.name());
                    return domain.admit(
                        true,
                        stripped_client_id,
                        stripped_username,
                        password,
                        clean_session,
                    );
                }
            }
        }

        if let Some(name) = server_name {
            if !name.is_empty() {
                if let Some(domain) = self.find_by_name(name) {
                    log::info!("domain {}: selected by server name", domain.name());
                    return domain.admit(true, client_id, username, password, clean_session);
                }
            }
        }

        for domain in self.domains.iter().filter(|d| d.config.is_active()) {
            if let AuthResult::Accepted(admission) =
                domain.admit(false, client_id, username, password, clean_session)
            {
                log::info!("domain {}: selected by auth probing", domain.name());
                return AuthResult::Accepted(admission);
            }
        }

        log::warn!(
            "No domain found for client-id={client_id:?} username={username:?} server-name={server_name:?}"
        );
        AuthResult::Rejected(ConnectReturnCode::NotAuthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain_config(content: &str) -> config::Domain {
        toml::from_str(content).unwrap()
    }

    fn registry() -> DomainRegistry {
        let configs = vec![
            domain_config(r#"name = "tenant-a.example""#),
            domain_config(r#"name = "tenant-b.example""#),
        ];
        DomainRegistry::new(&configs).unwrap()
    }

    fn accepted_domain(result: AuthResult) -> Admission {
        match result {
            AuthResult::Accepted(admission) => admission,
            AuthResult::Rejected(code) => panic!("rejected with {code:?}"),
        }
    }

    #[test]
    fn test_select_by_client_id_indication() {
        let registry = registry();
        let admission = accepted_domain(registry.select(
            "dev-1@tenant-b.example",
            None,
            b"",
            None,
            true,
        ));
        assert_eq!(admission.domain_id, 1);
        // The server name tail is stripped from the client id.
        assert_eq!(admission.client_id, "dev-1");
    }

    #[test]
    fn test_select_by_username_indication() {
        let registry = registry();
        let admission = accepted_domain(registry.select(
            "dev-1",
            Some("alice@tenant-b.example"),
            b"",
            None,
            true,
        ));
        assert_eq!(admission.domain_id, 1);
        assert_eq!(admission.username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_select_by_server_name() {
        let registry = registry();
        let admission = accepted_domain(registry.select(
            "dev-1",
            None,
            b"",
            Some("tenant-b.example"),
            true,
        ));
        assert_eq!(admission.domain_id, 1);
    }

    #[test]
    fn test_probe_picks_first_active() {
        let configs = vec![
            domain_config(r#"
name = "inactive.example"
is_active = false
"#),
            domain_config(r#"name = "active.example""#),
        ];
        let registry = DomainRegistry::new(&configs).unwrap();
        let admission = accepted_domain(registry.select("dev-1", None, b"", None, true));
        assert_eq!(admission.domain_id, 1);
    }

    #[test]
    fn test_restrict_client_ids() {
        let configs = vec![domain_config(
            r#"
name = "strict.example"
restrict_client_ids = ["allowed-1"]
"#,
        )];
        let registry = DomainRegistry::new(&configs).unwrap();

        let admission = accepted_domain(registry.select("allowed-1", None, b"", None, true));
        assert_eq!(admission.client_id, "allowed-1");

        match registry.select("other", None, b"", None, true) {
            AuthResult::Rejected(code) => {
                assert_eq!(code, ConnectReturnCode::IdentifierRejected);
            }
            AuthResult::Accepted(_) => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_require_auth_without_credentials() {
        let configs = vec![domain_config(
            r#"
name = "secure.example"
require_auth = true
"#,
        )];
        let registry = DomainRegistry::new(&configs).unwrap();
        match registry.select("dev-1", None, b"", Some("secure.example"), true) {
            AuthResult::Rejected(code) => {
                assert_eq!(code, ConnectReturnCode::BadUserNameOrPassword);
            }
            AuthResult::Accepted(_) => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_empty_config_gets_fallback_domain() {
        let registry = DomainRegistry::new(&[]).unwrap();
        let admission = accepted_domain(registry.select("dev-1", None, b"", None, true));
        assert_eq!(admission.domain_id, 0);
        assert_eq!(registry.get(0).unwrap().name(), "default");
    }
}
