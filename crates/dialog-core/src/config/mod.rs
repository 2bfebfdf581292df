//! Configuration for the user-agent core
//!
//! [`UserAgentCoreConfig`] carries the identity the core stamps on every
//! request (address of record, Contact, Via sent-by), the capability lists it
//! advertises and enforces, optional digest credentials and the protocol
//! timers.
//!
//! ## Quick Start
//!
//! ```rust
//! use sipua_dialog_core::config::UserAgentCoreConfig;
//!
//! let config = UserAgentCoreConfig::new(
//!     "sip:alice@atlanta.example.com".parse().unwrap(),
//!     "sip:alice@192.0.2.10:5060".parse().unwrap(),
//! )
//! .with_display_name("Alice")
//! .with_user_agent("sipua/0.1")
//! .with_credentials("alice", "secret");
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.max_forwards, 70);
//! ```

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use sipua_sip_core::{Method, StatusCode, Uri};

use crate::transaction::TimerSettings;

/// Digest credentials, used for any realm that challenges us
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Reply used for re-INVITE and UPDATE race conditions (RFC 5407)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceConditionPolicy {
    pub status: u16,
    /// Inclusive range the `Retry-After` seconds are drawn from
    pub retry_after_min: u32,
    pub retry_after_max: u32,
}

impl Default for RaceConditionPolicy {
    fn default() -> Self {
        Self {
            status: 500,
            retry_after_min: 1,
            retry_after_max: 10,
        }
    }
}

impl RaceConditionPolicy {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16_unchecked(self.status)
    }

    pub fn retry_after(&self) -> RangeInclusive<u32> {
        self.retry_after_min..=self.retry_after_max
    }
}

/// Main configuration for [`crate::UserAgentCore`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAgentCoreConfig {
    /// Address of record used in From (and To for REGISTER)
    pub aor: Uri,
    pub display_name: Option<String>,
    /// URI advertised in Contact
    pub contact: Uri,
    /// Host (and port) placed in Via sent-by
    pub via_host: String,
    /// Via transport token (`UDP`, `TCP`, `WSS`, ...)
    pub via_transport: String,
    pub user_agent: Option<String>,
    /// Preloaded Route values for out-of-dialog requests
    pub route_set: Vec<String>,
    /// Option tags we support; inbound `Require` outside this list gets 420
    pub supported: Vec<String>,
    /// Methods accepted out of dialog; anything else gets 405
    pub allowed_methods: Vec<Method>,
    pub max_forwards: u8,
    pub credentials: Option<Credentials>,
    /// Send `100 Trying` as soon as an INVITE arrives
    pub auto_trying: bool,
    pub timers: TimerSettings,
    pub race_policy: RaceConditionPolicy,
}

impl UserAgentCoreConfig {
    /// Configuration with the default capability set. The Via sent-by is
    /// taken from the Contact host.
    pub fn new(aor: Uri, contact: Uri) -> Self {
        let via_host = contact.host_port().to_string();
        Self {
            aor,
            display_name: None,
            contact,
            via_host,
            via_transport: "UDP".to_string(),
            user_agent: None,
            route_set: Vec::new(),
            supported: vec!["100rel".to_string()],
            allowed_methods: vec![
                Method::Ack,
                Method::Bye,
                Method::Cancel,
                Method::Info,
                Method::Invite,
                Method::Message,
                Method::Notify,
                Method::Options,
                Method::Prack,
                Method::Refer,
                Method::Update,
            ],
            max_forwards: 70,
            credentials: None,
            auto_trying: true,
            timers: TimerSettings::default(),
            race_policy: RaceConditionPolicy::default(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_via(mut self, transport: impl Into<String>, host: impl Into<String>) -> Self {
        self.via_transport = transport.into();
        self.via_host = host.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route_set.push(route.into());
        self
    }

    pub fn with_supported(mut self, tags: Vec<String>) -> Self {
        self.supported = tags;
        self
    }

    pub fn with_allowed_methods(mut self, methods: Vec<Method>) -> Self {
        self.allowed_methods = methods;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_timers(mut self, timers: TimerSettings) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_race_policy(mut self, policy: RaceConditionPolicy) -> Self {
        self.race_policy = policy;
        self
    }

    pub fn without_auto_trying(mut self) -> Self {
        self.auto_trying = false;
        self
    }

    /// `Contact` header value
    pub fn contact_header(&self) -> String {
        format!("<{}>", self.contact)
    }

    /// `Allow` header value
    pub fn allow_header(&self) -> String {
        self.allowed_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `Supported` header value
    pub fn supported_header(&self) -> String {
        self.supported.join(", ")
    }

    pub fn supports(&self, tag: &str) -> bool {
        self.supported.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.allowed_methods.contains(method)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.timers.validate()?;
        if self.via_host.is_empty() {
            return Err("Via host must not be empty".to_string());
        }
        if self.max_forwards == 0 {
            return Err("Max-Forwards must be greater than 0".to_string());
        }
        let policy = &self.race_policy;
        if !(400..=699).contains(&policy.status) {
            return Err(format!("race condition status {} is not a final error", policy.status));
        }
        if policy.retry_after_min > policy.retry_after_max {
            return Err("race condition Retry-After range is empty".to_string());
        }
        if !self.allows(&Method::Ack) || !self.allows(&Method::Cancel) {
            return Err("ACK and CANCEL must always be allowed".to_string());
        }
        Ok(())
    }
}
