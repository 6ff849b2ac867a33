//! # Topic Contract
//!
//! Every topic the device publishes or subscribes to, built from one
//! [`TopicScheme`].
//!
//! | Purpose | Topic |
//! |---|---|
//! | Issue credential | `<reserved>/certificates/create/json` |
//! | Register identity | `<reserved>/provisioning-templates/<template>/provision/json` |
//! | Shadow read | `<reserved>/things/<device>/shadow/name/<shadow>/get` |
//! | Shadow write | `<reserved>/things/<device>/shadow/name/<shadow>/update` |
//! | Command in | `<app>/<device>/cmd/call` |
//! | Status out | `<app>/<device>/status` |
//! | Echo check | `<app>/<device>/cert-rotate/verify` |
//!
//! Request topics have sibling `/accepted` and `/rejected` outcome topics.

use serde::{Deserialize, Serialize};

/// Default reserved (service-owned) topic prefix.
pub const DEFAULT_RESERVED_PREFIX: &str = "$aws";

/// Default application topic prefix.
pub const DEFAULT_APP_PREFIX: &str = "amr";

/// Sibling accepted/rejected topics of one request topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutcomePair {
    pub accepted: String,
    pub rejected: String,
}

impl OutcomePair {
    pub fn for_request(request: &str) -> Self {
        Self {
            accepted: format!("{request}/accepted"),
            rejected: format!("{request}/rejected"),
        }
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.accepted == topic || self.rejected == topic
    }

    pub fn topics(&self) -> [&str; 2] {
        [self.accepted.as_str(), self.rejected.as_str()]
    }
}

/// A request topic together with its outcome pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestTopics {
    pub request: String,
    pub outcomes: OutcomePair,
}

impl RequestTopics {
    pub fn new(request: impl Into<String>) -> Self {
        let request = request.into();
        let outcomes = OutcomePair::for_request(&request);
        Self { request, outcomes }
    }
}

/// Builds the topic contract for one fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicScheme {
    reserved_prefix: String,
    app_prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new(DEFAULT_RESERVED_PREFIX, DEFAULT_APP_PREFIX)
    }
}

impl TopicScheme {
    pub fn new(reserved_prefix: impl Into<String>, app_prefix: impl Into<String>) -> Self {
        Self {
            reserved_prefix: reserved_prefix.into().trim_end_matches('/').to_string(),
            app_prefix: app_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    fn reserved(&self, path: &str) -> String {
        if self.reserved_prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.reserved_prefix, path)
        }
    }

    pub fn create_credential(&self) -> RequestTopics {
        RequestTopics::new(self.reserved("certificates/create/json"))
    }

    pub fn register_identity(&self, template: &str) -> RequestTopics {
        RequestTopics::new(self.reserved(&format!(
            "provisioning-templates/{template}/provision/json"
        )))
    }

    pub fn shadow_get(&self, device: &str, shadow: &str) -> RequestTopics {
        RequestTopics::new(self.shadow_base(device, shadow) + "/get")
    }

    pub fn shadow_update(&self, device: &str, shadow: &str) -> RequestTopics {
        RequestTopics::new(self.shadow_base(device, shadow) + "/update")
    }

    fn shadow_base(&self, device: &str, shadow: &str) -> String {
        self.reserved(&format!("things/{device}/shadow/name/{shadow}"))
    }

    /// Filter matching `op` (`get` or `update`) requests of every named
    /// shadow of every device.
    pub fn shadow_requests(&self, op: &str) -> String {
        self.shadow_base("+", "+") + "/" + op
    }

    /// Split a shadow request topic into `(device, shadow, op)`. Outcome
    /// topics and anything else return `None`.
    pub fn parse_shadow_request<'a>(&self, topic: &'a str) -> Option<(&'a str, &'a str, &'a str)> {
        let rest = topic.strip_prefix(&self.reserved("things/"))?;
        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [device, "shadow", "name", shadow, op] if matches!(*op, "get" | "update") => {
                Some((*device, *shadow, *op))
            }
            _ => None,
        }
    }

    pub fn command(&self, device: &str) -> String {
        format!("{}/{device}/cmd/call", self.app_prefix)
    }

    pub fn status(&self, device: &str) -> String {
        format!("{}/{device}/status", self.app_prefix)
    }

    pub fn verify(&self, device: &str) -> String {
        format!("{}/{device}/cert-rotate/verify", self.app_prefix)
    }
}
