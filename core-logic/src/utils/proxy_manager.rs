use crate::config::ProxyConfig;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const SCHEMES: [&str; 5] = ["http", "https", "socks4", "socks5", "socks5h"];

pub struct ProxyManager;

impl ProxyManager {
    /// Loads proxies from a text file, one per line.
    /// A missing file is not an error: the run simply goes direct.
    pub fn load_proxies(path: impl AsRef<Path>) -> Result<Vec<ProxyConfig>> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("{} not found. Running without proxies.", path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let proxies = Self::parse_proxy_list(&content);

        info!("Loaded {} proxies from {}", proxies.len(), path.display());
        Ok(proxies)
    }

    /// Parses a whole list, skipping comments and invalid lines.
    pub fn parse_proxy_list(content: &str) -> Vec<ProxyConfig> {
        let mut proxies = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_proxy_line(line) {
                Some(proxy) => {
                    if !proxies.contains(&proxy) {
                        proxies.push(proxy);
                    }
                }
                None => warn!("Skipping invalid proxy line: {}", line),
            }
        }
        proxies
    }
}

/// Parses one proxy descriptor.
///
/// Accepts `ip:port`, `ip:port:user:pass`, `user:pass@ip:port` and
/// `scheme://[user:pass@]host:port` for http, https, socks4, socks5 and socks5h.
pub fn parse_proxy_line(line: &str) -> Option<ProxyConfig> {
    let line = line.trim();

    let (scheme, rest) = match line.split_once("://") {
        Some((scheme, rest)) => {
            let scheme = scheme.to_lowercase();
            if !SCHEMES.contains(&scheme.as_str()) {
                return None;
            }
            (scheme, rest)
        }
        None => ("http".to_string(), line),
    };
    let rest = rest.trim_end_matches('/');

    let (creds, host_port) = match rest.rsplit_once('@') {
        Some((creds, host_port)) => (Some(creds), host_port),
        None => (None, rest),
    };

    let parts: Vec<&str> = host_port.split(':').collect();
    let (host, port, inline_creds) = match parts.as_slice() {
        [host, port] => (*host, *port, None),
        // ip:port:user:pass only makes sense without an explicit `@` section
        [host, port, user, pass] if creds.is_none() => (*host, *port, Some((*user, *pass))),
        _ => return None,
    };

    if host.is_empty() || port.parse::<u16>().is_err() {
        return None;
    }

    let mut proxy = ProxyConfig::new(format!("{}://{}:{}", scheme, host, port));

    if let Some((user, pass)) = inline_creds {
        proxy = proxy.with_auth(user, pass);
    } else if let Some(creds) = creds {
        let (user, pass) = creds.split_once(':')?;
        proxy = proxy.with_auth(user, pass);
    }

    Some(proxy)
}
