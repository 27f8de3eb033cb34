// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::QoS;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind};

/// Action taken when an ACL rule denies a publish.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum AclAction {
    /// Allow the operation.
    #[serde(alias = "allow")]
    Allow,

    /// Drop the message silently; the publisher still gets its ack.
    #[default]
    #[serde(alias = "discard")]
    Discard,

    /// Close the publishing connection.
    #[serde(alias = "close")]
    Close,
}

/// One access control rule, matched against publish topics and subscribe
/// filters in order of appearance. The first matching rule decides.
#[derive(Debug, Deserialize, Clone)]
pub struct AclRule {
    /// Topic filter this rule applies to, wildcards allowed.
    filter: String,

    /// Whether matching topics may be published to.
    ///
    /// Default is true.
    #[serde(default = "AclRule::default_publish")]
    publish: bool,

    /// Whether matching filters may be subscribed to.
    ///
    /// Default is true.
    #[serde(default = "AclRule::default_subscribe")]
    subscribe: bool,

    /// Maximum QoS granted for publishes and subscriptions matching this
    /// rule.
    ///
    /// Default is exact-once.
    #[serde(default = "AclRule::default_max_qos")]
    max_qos: QoS,

    /// What to do with a denied publish.
    ///
    /// Default is discard.
    #[serde(default = "AclRule::default_on_deny")]
    on_deny: AclAction,
}

impl AclRule {
    #[must_use]
    pub const fn default_publish() -> bool {
        true
    }

    #[must_use]
    pub const fn default_subscribe() -> bool {
        true
    }

    #[must_use]
    pub const fn default_max_qos() -> QoS {
        QoS::ExactOnce
    }

    #[must_use]
    pub const fn default_on_deny() -> AclAction {
        AclAction::Discard
    }

    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    #[must_use]
    pub const fn publish(&self) -> bool {
        self.publish
    }

    #[must_use]
    pub const fn subscribe(&self) -> bool {
        self.subscribe
    }

    #[must_use]
    pub const fn max_qos(&self) -> QoS {
        self.max_qos
    }

    #[must_use]
    pub const fn on_deny(&self) -> AclAction {
        self.on_deny
    }
}

/// A named multi-tenant isolation unit. Subscriptions, retained messages,
/// session storage and authentication never cross domains.
#[derive(Debug, Deserialize, Clone)]
pub struct Domain {
    /// Domain name, matched against server name indications and
    /// `client_id@name` / `username@name` hints.
    name: String,

    /// Storage sub directory of this domain below the global storage root.
    ///
    /// Default is the domain name.
    #[serde(default)]
    storage_path: Option<PathBuf>,

    /// Path to the users database consumed by the auth backend.
    ///
    /// Default is None.
    #[serde(default)]
    users_db: Option<PathBuf>,

    /// Label of the auth backend handling this domain; `plain` reads the
    /// users database file, `anonymous` admits every client.
    ///
    /// Default is `anonymous`.
    #[serde(default = "Domain::default_backend")]
    backend: String,

    /// Inactive domains are skipped during domain selection.
    ///
    /// Default is true.
    #[serde(default = "Domain::default_is_active")]
    is_active: bool,

    /// Require valid credentials; when false the domain accepts
    /// connections without username/password.
    ///
    /// Default is false.
    #[serde(default = "Domain::default_require_auth")]
    require_auth: bool,

    /// When non-empty, only the listed client ids may connect; everything
    /// else is answered with IdentifierRejected.
    ///
    /// Default is empty.
    #[serde(default = "Domain::default_restrict_client_ids")]
    restrict_client_ids: Vec<String>,

    /// Disconnect an existing live connection when a new one presents the
    /// same client id [MQTT-3.1.4-2].
    ///
    /// Default is true.
    #[serde(default = "Domain::default_drop_conn_same_client_id")]
    drop_conn_same_client_id: bool,

    /// Maximum number of concurrent connections; 0 means unlimited.
    ///
    /// Default is 0.
    #[serde(default = "Domain::default_conn_limit")]
    conn_limit: usize,

    /// Maximum accepted PUBLISH packet payload size in bytes; 0 means
    /// unlimited.
    ///
    /// Default is 0.
    #[serde(default = "Domain::default_message_size_limit")]
    message_size_limit: usize,

    /// Maximum number of stored messages per client; 0 means unlimited.
    ///
    /// Default is 0.
    #[serde(default = "Domain::default_storage_messages_limit")]
    storage_messages_limit: usize,

    /// Maximum bytes of stored messages per client; 0 means unlimited.
    ///
    /// Default is 0.
    #[serde(default = "Domain::default_storage_quota_limit")]
    storage_quota_limit: usize,

    /// Refuse SUBSCRIBE filters containing wildcards with return code 0x80.
    ///
    /// Default is false.
    #[serde(default = "Domain::default_disable_wildcard_support")]
    disable_wildcard_support: bool,

    /// Maximum messages accepted per civil day; 0 means unlimited.
    ///
    /// Default is 0.
    #[serde(default = "Domain::default_day_message_quota")]
    day_message_quota: u64,

    /// Maximum messages accepted per civil month; 0 means unlimited.
    ///
    /// Default is 0.
    #[serde(default = "Domain::default_month_message_quota")]
    month_message_quota: u64,

    /// Default verdict when no ACL rule matches.
    ///
    /// Default is allow.
    #[serde(default = "Domain::default_acl_default")]
    acl_default: AclAction,

    /// Access control rules, first match wins.
    ///
    /// Default is empty.
    #[serde(default = "Domain::default_acl")]
    acl: Vec<AclRule>,
}

impl Domain {
    /// A single anonymous catch-all domain, used when the config declares
    /// none.
    #[must_use]
    pub fn default_domains() -> Vec<Self> {
        Vec::new()
    }

    #[must_use]
    pub fn fallback() -> Self {
        Self {
            name: "default".to_string(),
            storage_path: None,
            users_db: None,
            backend: Self::default_backend(),
            is_active: true,
            require_auth: false,
            restrict_client_ids: Vec::new(),
            drop_conn_same_client_id: true,
            conn_limit: 0,
            message_size_limit: 0,
            storage_messages_limit: 0,
            storage_quota_limit: 0,
            disable_wildcard_support: false,
            day_message_quota: 0,
            month_message_quota: 0,
            acl_default: AclAction::Allow,
            acl: Vec::new(),
        }
    }

    #[must_use]
    pub fn default_backend() -> String {
        "anonymous".to_string()
    }

    #[must_use]
    pub const fn default_is_active() -> bool {
        true
    }

    #[must_use]
    pub const fn default_require_auth() -> bool {
        false
    }

    #[must_use]
    pub const fn default_restrict_client_ids() -> Vec<String> {
        Vec::new()
    }

    #[must_use]
    pub const fn default_drop_conn_same_client_id() -> bool {
        true
    }

    #[must_use]
    pub const fn default_conn_limit() -> usize {
        0
    }

    #[must_use]
    pub const fn default_message_size_limit() -> usize {
        0
    }

    #[must_use]
    pub const fn default_storage_messages_limit() -> usize {
        0
    }

    #[must_use]
    pub const fn default_storage_quota_limit() -> usize {
        0
    }

    #[must_use]
    pub const fn default_disable_wildcard_support() -> bool {
        false
    }

    #[must_use]
    pub const fn default_day_message_quota() -> u64 {
        0
    }

    #[must_use]
    pub const fn default_month_message_quota() -> u64 {
        0
    }

    #[must_use]
    pub const fn default_acl_default() -> AclAction {
        AclAction::Allow
    }

    #[must_use]
    pub const fn default_acl() -> Vec<AclRule> {
        Vec::new()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage sub directory, defaulting to the domain name.
    #[must_use]
    pub fn storage_path(&self) -> PathBuf {
        self.storage_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.name))
    }

    #[must_use]
    pub fn users_db(&self) -> Option<&Path> {
        self.users_db.as_deref()
    }

    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    #[must_use]
    pub const fn require_auth(&self) -> bool {
        self.require_auth
    }

    #[must_use]
    pub fn restrict_client_ids(&self) -> &[String] {
        &self.restrict_client_ids
    }

    #[must_use]
    pub const fn drop_conn_same_client_id(&self) -> bool {
        self.drop_conn_same_client_id
    }

    #[must_use]
    pub const fn conn_limit(&self) -> usize {
        self.conn_limit
    }

    #[must_use]
    pub const fn message_size_limit(&self) -> usize {
        self.message_size_limit
    }

    #[must_use]
    pub const fn storage_messages_limit(&self) -> usize {
        self.storage_messages_limit
    }

    #[must_use]
    pub const fn storage_quota_limit(&self) -> usize {
        self.storage_quota_limit
    }

    #[must_use]
    pub const fn disable_wildcard_support(&self) -> bool {
        self.disable_wildcard_support
    }

    #[must_use]
    pub const fn day_message_quota(&self) -> u64 {
        self.day_message_quota
    }

    #[must_use]
    pub const fn month_message_quota(&self) -> u64 {
        self.month_message_quota
    }

    #[must_use]
    pub const fn acl_default(&self) -> AclAction {
        self.acl_default
    }

    #[must_use]
    pub fn acl(&self) -> &[AclRule] {
        &self.acl
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if the domain name is empty, the backend label is
    /// unknown, or an ACL filter fails to parse.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::new(
                ErrorKind::ConfigError,
                "domain name must not be empty",
            ));
        }

        if self.backend == "plain" && self.users_db.is_none() {
            return Err(Error::from_string(
                ErrorKind::ConfigError,
                format!("domain {} uses the plain backend without users_db", self.name),
            ));
        }

        for rule in &self.acl {
            if codec::topic::validate_sub_topic(rule.filter()).is_err() {
                return Err(Error::from_string(
                    ErrorKind::ConfigError,
                    format!(
                        "domain {}: invalid acl filter {:?}",
                        self.name,
                        rule.filter()
                    ),
                ));
            }
        }

        Ok(())
    }
}
