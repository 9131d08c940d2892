//! Route table: which upstream a request path belongs to, and where it goes.

use axum::http::HeaderValue;
use reqwest::Url;

use mia_core::config::{ProxyConfig, ProxyRoute};
use mia_core::{MiaError, Result};

/// One compiled forwarding rule.
#[derive(Debug, Clone)]
pub struct Route {
    /// The configured prefix, reported as `proxyKey`.
    pub key: String,
    mount: String,
    origin: Url,
}

impl Route {
    pub fn compile(base_path: &str, route: &ProxyRoute) -> Result<Self> {
        let origin = Url::parse(&route.target).map_err(|e| {
            MiaError::Config(format!(
                "proxy route {} has invalid target {}: {e}",
                route.prefix, route.target
            ))
        })?;
        if origin.host_str().is_none() {
            return Err(MiaError::Config(format!(
                "proxy route {} target has no host: {}",
                route.prefix, route.target
            )));
        }
        Ok(Self {
            key: route.prefix.clone(),
            mount: format!(
                "{}{}",
                base_path.trim_end_matches('/'),
                route.prefix.trim_end_matches('/')
            ),
            origin,
        })
    }

    /// Full path prefix this route answers on, e.g. `/mia_proxy/openai`.
    pub fn mount(&self) -> &str {
        &self.mount
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// The path left once the mount is removed, if `path` lies under it.
    /// `/mia_proxy/openaix` is not under `/mia_proxy/openai`.
    pub fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.mount.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    /// Upstream URL: the target's scheme, host and port with the stripped
    /// path and the original query.
    pub fn target_url(&self, rest: &str, query: Option<&str>) -> Url {
        let mut url = self.origin.clone();
        url.set_path(if rest.is_empty() { "/" } else { rest });
        url.set_query(query);
        url
    }

    /// `Host` value sent upstream. The port is only included when the
    /// target names a non-default one.
    pub fn host_header(&self) -> Option<HeaderValue> {
        let host = self.origin.host_str()?;
        let value = match self.origin.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        HeaderValue::from_str(&value).ok()
    }
}

/// All routes, longest mount first so nested prefixes win.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let mut routes = config
            .routes
            .iter()
            .map(|r| Route::compile(&config.base_path, r))
            .collect::<Result<Vec<_>>>()?;
        routes.sort_by(|a, b| b.mount.len().cmp(&a.mount.len()));
        Ok(Self { routes })
    }

    /// The route for `path` and the remainder after its mount.
    pub fn find<'a>(&self, path: &'a str) -> Option<(&Route, &'a str)> {
        self.routes
            .iter()
            .find_map(|route| route.strip(path).map(|rest| (route, rest)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::from_config(&ProxyConfig::default()).unwrap()
    }

    #[test]
    fn matches_on_segment_boundary() {
        let table = table();
        let (route, rest) = table.find("/mia_proxy/openai/v1/chat/completions").unwrap();
        assert_eq!(route.key, "/openai");
        assert_eq!(rest, "/v1/chat/completions");

        let (_, rest) = table.find("/mia_proxy/pokeapi").unwrap();
        assert_eq!(rest, "");

        assert!(table.find("/mia_proxy/openaix/v1").is_none());
        assert!(table.find("/openai/v1").is_none());
    }

    #[test]
    fn rewrites_origin_and_keeps_query() {
        let table = table();
        let (route, rest) = table.find("/mia_proxy/pokeapi/api/v2/pokemon").unwrap();
        let url = route.target_url(rest, Some("limit=5&offset=10"));
        assert_eq!(url.as_str(), "https://pokeapi.co/api/v2/pokemon?limit=5&offset=10");

        let url = route.target_url("", None);
        assert_eq!(url.as_str(), "https://pokeapi.co/");
    }

    #[test]
    fn target_path_is_ignored_and_port_kept() {
        let local = ProxyRoute::new("/local", "http://127.0.0.1:11434/ignored");
        let route = Route::compile("/p", &local).unwrap();
        assert_eq!(route.mount(), "/p/local");
        assert_eq!(route.target_url("/api/tags", None).as_str(), "http://127.0.0.1:11434/api/tags");
        assert_eq!(route.host_header().unwrap(), "127.0.0.1:11434");

        let openai = ProxyRoute::new("/openai", "https://api.openai.com");
        let route = Route::compile("/p", &openai).unwrap();
        assert_eq!(route.host_header().unwrap(), "api.openai.com");
    }

    #[test]
    fn nested_prefix_wins() {
        let config = ProxyConfig {
            routes: vec![
                ProxyRoute::new("/api", "http://one.test"),
                ProxyRoute::new("/api/v2", "http://two.test"),
            ],
            ..ProxyConfig::default()
        };
        let table = RouteTable::from_config(&config).unwrap();
        assert_eq!(table.find("/mia_proxy/api/v2/x").unwrap().0.key, "/api/v2");
        assert_eq!(table.find("/mia_proxy/api/v1/x").unwrap().0.key, "/api");
    }

    #[test]
    fn bad_target_is_a_config_error() {
        let err = Route::compile("/p", &ProxyRoute::new("/x", "not a url")).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
