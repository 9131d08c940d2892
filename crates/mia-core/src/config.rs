use std::collections::HashSet;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{MiaError, Result};

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_BASE_PATH: &str = "/mia_proxy";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_PROFILE: &str = "openai-offical";
pub const OPENAI_ENDPOINT: &str = "https://api.openai.com";

/// Top-level config (mia.toml + MIA_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiaConfig {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default = "default_profiles")]
    pub profiles: Vec<OpenAiProfile>,
}

impl Default for MiaConfig {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            client: ClientConfig::default(),
            profiles: default_profiles(),
        }
    }
}

/// Reverse proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Mount point shared by every route, e.g. `/mia_proxy`.
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Attach a permissive CORS layer to every response.
    #[serde(default)]
    pub allow_cors: bool,
    #[serde(default = "default_routes")]
    pub routes: Vec<ProxyRoute>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            base_path: default_base_path(),
            allow_cors: false,
            routes: default_routes(),
        }
    }
}

/// One forwarding rule: `{base_path}{prefix}/rest` → `{target}/rest`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyRoute {
    pub prefix: String,
    /// Absolute http(s) URL. Only scheme, host and port are used.
    pub target: String,
}

impl ProxyRoute {
    pub fn new(prefix: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            target: target.into(),
        }
    }
}

/// Chat client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the entry in `profiles` used for API calls.
    #[serde(default = "default_profile")]
    pub profile: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            profile: default_profile(),
        }
    }
}

/// Connection details for one OpenAI-compatible endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenAiProfile {
    pub name: String,
    /// Base URL without the `/v1/...` path, e.g. `https://api.openai.com`
    /// or a mia-proxy mount such as `http://127.0.0.1:8787/mia_proxy/openai`.
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

impl OpenAiProfile {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            api_key: None,
            desc: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_profile() -> String {
    DEFAULT_PROFILE.to_string()
}
fn default_routes() -> Vec<ProxyRoute> {
    vec![
        ProxyRoute::new("/pokeapi", "https://pokeapi.co"),
        ProxyRoute::new("/openai", OPENAI_ENDPOINT),
    ]
}
fn default_profiles() -> Vec<OpenAiProfile> {
    vec![OpenAiProfile::new(DEFAULT_PROFILE, OPENAI_ENDPOINT).with_api_key("")]
}

impl MiaConfig {
    /// Load config from a TOML file with MIA_* env var overrides.
    ///
    /// Nested keys use a double underscore: `MIA_PROXY__PORT=9000`.
    /// A missing file is not an error; defaults apply.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: MiaConfig = Self::figment(&path)
            .extract()
            .map_err(|e| MiaError::Config(e.to_string()))?;

        config.validate()?;
        debug!(
            path = %path,
            routes = config.proxy.routes.len(),
            profiles = config.profiles.len(),
            "config loaded"
        );
        Ok(config)
    }

    /// The provider stack used by [`MiaConfig::load`].
    pub fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(MiaConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("MIA_").split("__"))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.proxy.base_path.is_empty() && !self.proxy.base_path.starts_with('/') {
            return Err(MiaError::Config(format!(
                "proxy.base_path must start with '/': {}",
                self.proxy.base_path
            )));
        }

        for route in &self.proxy.routes {
            if !route.prefix.starts_with('/') {
                return Err(MiaError::Config(format!(
                    "proxy route prefix must start with '/': {}",
                    route.prefix
                )));
            }
            if let Err(reason) = check_target(&route.target) {
                return Err(MiaError::Config(format!(
                    "proxy route {} has invalid target {}: {reason}",
                    route.prefix, route.target
                )));
            }
        }

        let mut names = HashSet::new();
        for profile in &self.profiles {
            if !names.insert(profile.name.as_str()) {
                return Err(MiaError::Config(format!(
                    "duplicate profile name: {}",
                    profile.name
                )));
            }
        }

        if !names.contains(self.client.profile.as_str()) {
            return Err(MiaError::Config(format!(
                "client.profile '{}' does not name a configured profile",
                self.client.profile
            )));
        }

        Ok(())
    }
}

/// Targets must be absolute http(s) URLs with a host.
fn check_target(target: &str) -> std::result::Result<(), String> {
    let url = Url::parse(target).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme {}", url.scheme()));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err("missing host".to_string()),
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.mia/mia.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_mirror_builtin_routes() {
        let config = MiaConfig::default();
        assert_eq!(config.proxy.port, 8787);
        assert_eq!(config.proxy.base_path, "/mia_proxy");
        assert_eq!(config.proxy.routes.len(), 2);
        assert_eq!(config.proxy.routes[1].target, "https://api.openai.com");
        assert_eq!(config.client.profile, "openai-offical");
        config.validate().unwrap();
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let config = MiaConfig::load(Some("does-not-exist.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.client.model, DEFAULT_MODEL);
            Ok(())
        });
    }

    #[test]
    fn file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "mia.toml",
                r#"
                [proxy]
                port = 9100
                routes = [{ prefix = "/local", target = "http://127.0.0.1:11434" }]

                [client]
                profile = "local"

                [[profiles]]
                name = "local"
                endpoint = "http://127.0.0.1:8787/mia_proxy/openai"
                "#,
            )?;
            jail.set_env("MIA_CLIENT__MODEL", "gpt-4o-mini");

            let config = MiaConfig::load(Some("mia.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.proxy.port, 9100);
            assert_eq!(config.proxy.bind, DEFAULT_BIND);
            assert_eq!(
                config.proxy.routes,
                vec![ProxyRoute::new("/local", "http://127.0.0.1:11434")]
            );
            assert_eq!(config.client.model, "gpt-4o-mini");
            assert_eq!(config.profiles[0].name, "local");
            assert_eq!(config.profiles[0].api_key, None);
            Ok(())
        });
    }

    #[test]
    fn rejects_unknown_used_profile() {
        let mut config = MiaConfig::default();
        config.client.profile = "missing".to_string();
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn rejects_bad_route_target() {
        let mut config = MiaConfig::default();
        config.proxy.routes.push(ProxyRoute::new("/x", "ftp://example.com"));
        assert!(config.validate().is_err());

        let mut config = MiaConfig::default();
        config.proxy.routes.push(ProxyRoute::new("x", "https://example.com"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_targets_that_do_not_parse() {
        for target in ["http://:80", "http://exa mple.com", "https://[bad", "example.com"] {
            let mut config = MiaConfig::default();
            config.proxy.routes.push(ProxyRoute::new("/x", target));
            let err = config.validate().unwrap_err();
            assert_eq!(err.code(), "CONFIG_ERROR", "{target}");
        }

        let mut config = MiaConfig::default();
        config.proxy.routes.push(ProxyRoute::new("/x", "http://127.0.0.1:11434"));
        config.validate().unwrap();
    }

    #[test]
    fn rejects_duplicate_profiles() {
        let mut config = MiaConfig::default();
        config.profiles.push(OpenAiProfile::new(DEFAULT_PROFILE, "https://other"));
        assert!(config.validate().is_err());
    }
}
