//! Client identity and handshake options.
//!
//! # Example
//!
//! ```ignore
//! use gateway_channel::ClientOptions;
//!
//! let options = ClientOptions::new()
//!     .with_id("web-chat-ui")
//!     .with_mode("operator")
//!     .with_timezone("Europe/Berlin");
//!
//! let params = options.to_connect_params();
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::env;

use crate::protocol::{ClientInfo, ConnectParams, PROTOCOL_VERSION};

// ============================================================================
// Constants
// ============================================================================

/// Default client id presented to the gateway.
pub const DEFAULT_CLIENT_ID: &str = "web-chat-ui";

/// Default connection mode.
pub const DEFAULT_MODE: &str = "operator";

/// Timezone reported when the host zone cannot be resolved.
pub const FALLBACK_TIMEZONE: &str = "UTC";

// ============================================================================
// ClientOptions
// ============================================================================

/// What the client announces in the `connect` handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Client kind.
    pub id: String,

    /// Human readable name.
    pub display_name: Option<String>,

    /// Client version.
    pub version: String,

    /// Host platform.
    pub platform: String,

    /// Connection mode.
    pub mode: String,

    /// Per-process instance id.
    pub instance_id: Option<String>,

    /// Oldest protocol version offered.
    pub min_protocol: u32,

    /// Newest protocol version offered.
    pub max_protocol: u32,

    /// Advertised capabilities.
    pub caps: Vec<String>,

    /// Requested role.
    pub role: Option<String>,

    /// Requested scopes.
    pub scopes: Vec<String>,

    /// Client locale.
    pub locale: Option<String>,

    /// User agent string.
    pub user_agent: Option<String>,

    /// IANA timezone name.
    pub timezone: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ClientOptions {
    /// Creates options with defaults for this process.
    ///
    /// The timezone is the host's IANA zone, then `TZ`, then `UTC`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: DEFAULT_CLIENT_ID.to_string(),
            display_name: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: env::consts::OS.to_string(),
            mode: DEFAULT_MODE.to_string(),
            instance_id: Some(uuid::Uuid::new_v4().to_string()),
            min_protocol: PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            caps: Vec::new(),
            role: None,
            scopes: Vec::new(),
            locale: None,
            user_agent: Some(format!("gateway-channel/{}", env!("CARGO_PKG_VERSION"))),
            timezone: Some(system_timezone()),
        }
    }
}

/// Resolves the host's IANA timezone name.
fn system_timezone() -> String {
    iana_time_zone::get_timezone()
        .ok()
        .or_else(|| env::var("TZ").ok())
        .map(|tz| tz.trim_start_matches(':').to_string())
        .filter(|tz| !tz.is_empty())
        .unwrap_or_else(|| FALLBACK_TIMEZONE.to_string())
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ClientOptions {
    /// Sets the client id.
    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the display name.
    #[inline]
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the client version.
    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the platform.
    #[inline]
    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// Sets the connection mode.
    #[inline]
    #[must_use]
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    /// Sets the offered protocol range.
    #[inline]
    #[must_use]
    pub fn with_protocol_range(mut self, min: u32, max: u32) -> Self {
        self.min_protocol = min;
        self.max_protocol = max;
        self
    }

    /// Adds one capability.
    #[inline]
    #[must_use]
    pub fn with_cap(mut self, cap: impl Into<String>) -> Self {
        self.caps.push(cap.into());
        self
    }

    /// Sets the requested role.
    #[inline]
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Adds requested scopes.
    #[inline]
    #[must_use]
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Sets the locale.
    #[inline]
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Sets the user agent.
    #[inline]
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the timezone.
    #[inline]
    #[must_use]
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }
}

// ============================================================================
// Conversion
// ============================================================================

impl ClientOptions {
    /// Builds the `connect` request parameters.
    #[must_use]
    pub fn to_connect_params(&self) -> ConnectParams {
        let non_empty = |items: &Vec<String>| (!items.is_empty()).then(|| items.clone());

        ConnectParams {
            min_protocol: self.min_protocol,
            max_protocol: self.max_protocol,
            client: ClientInfo {
                id: self.id.clone(),
                display_name: self.display_name.clone(),
                version: self.version.clone(),
                platform: self.platform.clone(),
                mode: self.mode.clone(),
                instance_id: self.instance_id.clone(),
            },
            caps: non_empty(&self.caps),
            role: self.role.clone(),
            scopes: non_empty(&self.scopes),
            locale: self.locale.clone(),
            user_agent: self.user_agent.clone(),
            timezone: self.timezone.clone(),
        }
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("client id must not be empty".to_string());
        }

        if self.mode.trim().is_empty() {
            return Err("client mode must not be empty".to_string());
        }

        if self.min_protocol > self.max_protocol {
            return Err(format!(
                "min protocol {} is above max protocol {}",
                self.min_protocol, self.max_protocol
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
