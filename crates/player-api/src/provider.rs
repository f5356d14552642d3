//! Provider and proxy selection.
//!
//! The API is reachable through a primary and an optional fallback base URL,
//! either directly or through one of the configured proxies. A probe walks
//! those routes in order of preference and remembers the first reachable one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::client::{FetchError, build_client, sign};
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    Primary,
    Fallback,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Primary => f.write_str("primary"),
            ProviderKind::Fallback => f.write_str("fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyInUse {
    /// 1-based position in the proxy list.
    pub index: usize,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAvailability {
    pub kind: ProviderKind,
    pub direct: bool,
    /// Proxy (1-based) through which the provider answered, if any.
    pub via_proxy: Option<usize>,
}

/// Which route player requests currently take.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMode {
    pub active: Option<ProviderKind>,
    pub proxy_in_use: Option<ProxyInUse>,
    pub availability: Vec<ProviderAvailability>,
    /// `None` until the first probe completes.
    pub probed_at: Option<DateTime<Utc>>,
}

impl ProviderMode {
    pub fn is_available(&self) -> bool {
        self.active.is_some()
    }

    /// Human-readable summary for status reporting.
    pub fn description(&self) -> String {
        let Some(kind) = self.active else {
            return "no provider available".to_string();
        };

        let mut description = match &self.proxy_in_use {
            Some(proxy) => format!("using {kind} provider via proxy {}", proxy.index),
            None => format!("using {kind} provider directly"),
        };
        if self.probed_at.is_none() {
            description.push_str(" (not probed)");
        }
        description
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub primary_url: String,
    pub fallback_url: Option<String>,
    /// Proxy list entries, `host:port` or full proxy URLs.
    pub proxies: Vec<String>,
    pub secret: String,
    /// Player id requested by the reachability probe.
    pub probe_player_id: i64,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
struct Endpoint {
    kind: ProviderKind,
    base_url: Url,
}

/// A resolved way of reaching one provider.
#[derive(Debug, Clone)]
pub struct Route {
    pub kind: ProviderKind,
    pub base_url: Url,
    pub client: Client,
}

impl Route {
    /// URL for `path` below the provider's base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }
}

pub struct ProviderSelector {
    endpoints: Vec<Endpoint>,
    proxies: Vec<String>,
    direct: Client,
    secret: String,
    probe_player_id: i64,
    request_timeout: Duration,
    mode: ProviderMode,
    route: Option<Route>,
}

impl ProviderSelector {
    /// Create a selector that optimistically routes to the primary provider
    /// until [`probe`](Self::probe) says otherwise.
    pub fn new(config: ProviderConfig) -> Result<Self, ApiError> {
        let mut endpoints = vec![Endpoint {
            kind: ProviderKind::Primary,
            base_url: Url::parse(&config.primary_url)?,
        }];
        if let Some(fallback) = config.fallback_url.as_deref().filter(|u| !u.trim().is_empty()) {
            endpoints.push(Endpoint {
                kind: ProviderKind::Fallback,
                base_url: Url::parse(fallback)?,
            });
        }

        let direct = build_client(None, config.request_timeout)?;
        let route = Route {
            kind: ProviderKind::Primary,
            base_url: endpoints[0].base_url.clone(),
            client: direct.clone(),
        };

        Ok(Self {
            endpoints,
            proxies: config.proxies,
            direct,
            secret: config.secret,
            probe_player_id: config.probe_player_id,
            request_timeout: config.request_timeout,
            mode: ProviderMode {
                active: Some(ProviderKind::Primary),
                ..Default::default()
            },
            route: Some(route),
        })
    }

    pub fn mode(&self) -> &ProviderMode {
        &self.mode
    }

    pub fn active_description(&self) -> String {
        self.mode.description()
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// Probe providers directly, then through each proxy, and switch to the
    /// first route that answers.
    pub async fn probe(&mut self) -> &ProviderMode {
        let mut availability: Vec<ProviderAvailability> = Vec::new();
        let mut chosen: Option<(Route, Option<ProxyInUse>)> = None;

        for endpoint in &self.endpoints {
            let reachable = self.probe_endpoint(&self.direct, &endpoint.base_url).await;
            availability.push(ProviderAvailability {
                kind: endpoint.kind,
                direct: reachable,
                via_proxy: None,
            });
            if reachable && chosen.is_none() {
                chosen = Some((
                    Route {
                        kind: endpoint.kind,
                        base_url: endpoint.base_url.clone(),
                        client: self.direct.clone(),
                    },
                    None,
                ));
            }
        }

        if chosen.is_none() {
            'proxies: for (i, proxy) in self.proxies.iter().enumerate() {
                let client = match build_client(Some(proxy), self.request_timeout) {
                    Ok(client) => client,
                    Err(e) => {
                        warn!(proxy = %proxy, error = %e, "Skipping unusable proxy");
                        continue;
                    }
                };

                for endpoint in &self.endpoints {
                    if self.probe_endpoint(&client, &endpoint.base_url).await {
                        if let Some(entry) = availability.iter_mut().find(|a| a.kind == endpoint.kind) {
                            entry.via_proxy = Some(i + 1);
                        }
                        chosen = Some((
                            Route {
                                kind: endpoint.kind,
                                base_url: endpoint.base_url.clone(),
                                client,
                            },
                            Some(ProxyInUse {
                                index: i + 1,
                                url: proxy.clone(),
                            }),
                        ));
                        break 'proxies;
                    }
                }
            }
        }

        let (route, proxy_in_use) = match chosen {
            Some((route, proxy)) => (Some(route), proxy),
            None => (None, None),
        };

        self.mode = ProviderMode {
            active: route.as_ref().map(|r| r.kind),
            proxy_in_use,
            availability,
            probed_at: Some(Utc::now()),
        };
        self.route = route;

        if self.mode.is_available() {
            info!(mode = %self.mode.description(), "Provider probe finished");
        } else {
            warn!(
                proxies = self.proxies.len(),
                "Provider probe found no reachable provider"
            );
        }

        &self.mode
    }

    /// Resolve the route for one request, optionally forcing a proxy.
    pub fn route_for(&self, proxy: Option<&str>) -> Result<Route, FetchError> {
        let route = self.route.as_ref().ok_or_else(FetchError::no_provider)?;

        match proxy {
            None => Ok(route.clone()),
            Some(proxy) => {
                let client = build_client(Some(proxy), self.request_timeout)
                    .map_err(|e| FetchError::network(e.to_string()))?;
                Ok(Route {
                    client,
                    ..route.clone()
                })
            }
        }
    }

    /// Any HTTP answer below 500 means the provider is up, throttling included.
    async fn probe_endpoint(&self, client: &Client, base_url: &Url) -> bool {
        let url = format!("{}/player", base_url.as_str().trim_end_matches('/'));
        let form = sign::signed_form(
            vec![("fid", self.probe_player_id.to_string())],
            &self.secret,
        );

        match client.post(&url).form(&form).send().await {
            Ok(response) => {
                let status = response.status();
                debug!(url = %url, status = %status, "Probe response");
                status.as_u16() < 500
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(primary: &str) -> ProviderConfig {
        ProviderConfig {
            primary_url: primary.to_string(),
            fallback_url: None,
            proxies: Vec::new(),
            secret: "s".to_string(),
            probe_player_id: 1,
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_description() {
        let mut mode = ProviderMode {
            active: Some(ProviderKind::Fallback),
            proxy_in_use: Some(ProxyInUse {
                index: 2,
                url: "socks4://1.2.3.4:1080".to_string(),
            }),
            availability: Vec::new(),
            probed_at: Some(Utc::now()),
        };
        assert_eq!(mode.description(), "using fallback provider via proxy 2");

        mode.proxy_in_use = None;
        mode.active = Some(ProviderKind::Primary);
        assert_eq!(mode.description(), "using primary provider directly");

        mode.active = None;
        assert_eq!(mode.description(), "no provider available");
    }

    #[test]
    fn test_new_routes_to_primary_before_probe() {
        let selector = ProviderSelector::new(config("https://api.example.com/api")).unwrap();
        assert_eq!(
            selector.active_description(),
            "using primary provider directly (not probed)"
        );
        let route = selector.route_for(None).unwrap();
        assert_eq!(route.endpoint("player"), "https://api.example.com/api/player");
    }

    #[test]
    fn test_new_rejects_bad_url() {
        assert!(matches!(
            ProviderSelector::new(config("not a url")),
            Err(ApiError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_blank_fallback_is_ignored() {
        let mut cfg = config("https://a.example.com");
        cfg.fallback_url = Some("   ".to_string());
        let selector = ProviderSelector::new(cfg).unwrap();
        assert_eq!(selector.endpoints.len(), 1);
    }
}
