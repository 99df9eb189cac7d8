//! Resolution of free-form server queries.
//!
//! Operators refer to servers by display name, routable address, opaque id,
//! or a proxy-local alias. The resolver maps such a query onto the cached
//! listing and settles ambiguous matches with a fixed tie-break.

use crate::cache::DirectoryCache;
use crate::error::{LinkError, Result};
use crate::proxy::ProxyTable;
use crate::types::{RemoteServer, ServerStatus};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Proxy-local routing names mapped to remote server addresses.
///
/// Built once from the proxy's backend list and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: IndexMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from the proxy's configured backends.
    ///
    /// Only backends whose address is a host under `domain`, optionally
    /// followed by `:port`, become aliases; the port is dropped.
    ///
    /// ```rust
    /// use tether_core::AliasTable;
    ///
    /// let aliases = AliasTable::from_proxy_servers(
    ///     [("lobby", "lobby.exaroton.me:25565"), ("local", "127.0.0.1:25566")],
    ///     "exaroton.me",
    /// );
    /// assert_eq!(aliases.address_for("lobby"), Some("lobby.exaroton.me"));
    /// assert_eq!(aliases.address_for("local"), None);
    /// ```
    pub fn from_proxy_servers<I, N, A>(servers: I, domain: &str) -> Self
    where
        I: IntoIterator<Item = (N, A)>,
        N: Into<String>,
        A: AsRef<str>,
    {
        let mut table = Self::new();
        for (name, address) in servers {
            if let Some(host) = alias_host(address.as_ref(), domain) {
                table.insert(name, host);
            }
        }
        table
    }

    pub fn insert(&mut self, name: impl Into<String>, address: impl Into<String>) {
        self.aliases.insert(name.into(), address.into());
    }

    pub fn address_for(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    /// Reverse lookup: the first alias pointing at `address`.
    pub fn routing_name_for(&self, address: &str) -> Option<&str> {
        self.aliases
            .iter()
            .find(|(_, target)| target.as_str() == address)
            .map(|(name, _)| name.as_str())
    }

    /// Aliases in configuration order as `(name, address)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(n, a)| (n.as_str(), a.as_str()))
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// Host part of `address` if it lies under `domain`.
fn alias_host(address: &str, domain: &str) -> Option<String> {
    let host = match address.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        Some(_) => return None,
        None => address,
    };
    let suffix = format!(".{domain}");
    (host.len() > suffix.len() && host.ends_with(&suffix)).then(|| host.to_string())
}

/// Exact match on id (case-sensitive) or on name or address (case-insensitive).
pub fn matches_exact(server: &RemoteServer, query: &str) -> bool {
    server.id == query
        || server.name.eq_ignore_ascii_case(query)
        || server.address.eq_ignore_ascii_case(query)
}

/// Picks the server `query` refers to out of `servers`.
///
/// With several matches, the one whose id equals `query` wins; otherwise the
/// first match in the order of `servers`. For a fixed listing the answer is
/// therefore always the same.
pub fn pick<'a>(servers: &'a [RemoteServer], query: &str) -> Option<&'a RemoteServer> {
    let mut matches = servers.iter().filter(|server| matches_exact(server, query));
    let first = matches.next()?;
    if first.id == query {
        return Some(first);
    }
    Some(matches.find(|server| server.id == query).unwrap_or(first))
}

/// Maps queries onto the cached directory listing.
#[derive(Debug)]
pub struct QueryResolver {
    cache: Arc<DirectoryCache>,
    aliases: AliasTable,
}

impl QueryResolver {
    pub fn new(cache: Arc<DirectoryCache>, aliases: AliasTable) -> Self {
        Self { cache, aliases }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Resolves `query` to a single server.
    ///
    /// Aliases are substituted by their address first. `Ok(None)` means no
    /// server matched; errors come only from refreshing the listing.
    pub async fn resolve(&self, query: &str, force_refresh: bool) -> Result<Option<RemoteServer>> {
        if query.is_empty() {
            return Err(LinkError::InvalidArgument("query must not be empty"));
        }
        let query = self.aliases.address_for(query).unwrap_or(query);
        let servers = self.cache.list(force_refresh).await?;
        let found = pick(&servers, query).cloned();
        debug!("Resolved '{}' to {:?}", query, found.as_ref().map(|s| &s.id));
        Ok(found)
    }

    /// Completion candidates for a partially typed server reference.
    ///
    /// Returns aliases first, then names, addresses and ids, each included
    /// when that field itself starts with `query`. With a status filter only
    /// servers in one of those statuses contribute. Never forces a refresh and
    /// returns nothing if the listing cannot be read.
    pub async fn resolve_prefix(&self, query: &str, status_filter: Option<&[ServerStatus]>) -> Vec<String> {
        let servers = match self.cache.list(false).await {
            Ok(servers) => servers,
            Err(e) => {
                error!("Failed to list servers for completion: {}", e);
                return Vec::new();
            }
        };
        let passes = |server: &RemoteServer| status_filter.map_or(true, |f| server.has_status(f));

        let mut result: Vec<String> = self
            .aliases
            .iter()
            .filter(|(name, _)| name.starts_with(query))
            .filter(|(_, address)| status_filter.is_none() || pick(&servers, address).is_some_and(|s| passes(s)))
            .map(|(name, _)| name.to_string())
            .collect();

        let candidates: Vec<&RemoteServer> = servers.iter().filter(|s| passes(*s)).collect();
        result.extend(field_completions(&candidates, query));
        result
    }

    /// Completion candidates for servers not currently routed by the proxy.
    pub async fn completions_not_in_proxy(&self, query: &str, table: &dyn ProxyTable) -> Vec<String> {
        let servers = match self.cache.list(false).await {
            Ok(servers) => servers,
            Err(e) => {
                error!("Failed to list servers for completion: {}", e);
                return Vec::new();
            }
        };
        let candidates: Vec<&RemoteServer> = servers
            .iter()
            .filter(|server| !table.contains(&self.routing_name(server)))
            .collect();
        field_completions(&candidates, query)
    }

    /// Name under which `server` is routed by the proxy.
    ///
    /// The configured alias for its address if there is one, else its display name.
    pub fn routing_name(&self, server: &RemoteServer) -> String {
        self.aliases
            .routing_name_for(&server.address)
            .unwrap_or(&server.name)
            .to_string()
    }
}

fn field_completions(servers: &[&RemoteServer], query: &str) -> Vec<String> {
    let names = servers.iter().map(|s| &s.name);
    let addresses = servers.iter().map(|s| &s.address);
    let ids = servers.iter().map(|s| &s.id);
    names
        .chain(addresses)
        .chain(ids)
        .filter(|field| field.starts_with(query))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_CACHE_TTL;
    use crate::local::LocalDirectory;
    use crate::proxy::{MemoryProxyTable, RouteEntry};

    fn server(id: &str, name: &str, address: &str, status: ServerStatus) -> RemoteServer {
        RemoteServer {
            id: id.to_string(),
            name: name.to_string(),
            address: address.to_string(),
            host: None,
            port: None,
            motd: String::new(),
            status,
        }
    }

    fn resolver_with(servers: Vec<RemoteServer>, aliases: AliasTable) -> (Arc<LocalDirectory>, QueryResolver) {
        let directory = Arc::new(LocalDirectory::new(servers));
        let cache = Arc::new(DirectoryCache::new(directory.clone(), DEFAULT_CACHE_TTL));
        (directory, QueryResolver::new(cache, aliases))
    }

    #[test]
    fn test_alias_host_filtering() {
        assert_eq!(alias_host("lobby.exaroton.me", "exaroton.me").as_deref(), Some("lobby.exaroton.me"));
        assert_eq!(alias_host("lobby.exaroton.me:25565", "exaroton.me").as_deref(), Some("lobby.exaroton.me"));
        assert_eq!(alias_host("exaroton.me", "exaroton.me"), None);
        assert_eq!(alias_host("lobby.example.com", "exaroton.me"), None);
        assert_eq!(alias_host("lobby.exaroton.me:abc", "exaroton.me"), None);
    }

    #[test]
    fn test_reverse_alias_lookup_prefers_first_configured() {
        let mut aliases = AliasTable::new();
        aliases.insert("hub", "lobby.exaroton.me");
        aliases.insert("lobby", "lobby.exaroton.me");
        assert_eq!(aliases.routing_name_for("lobby.exaroton.me"), Some("hub"));
        assert_eq!(aliases.routing_name_for("other.exaroton.me"), None);
    }

    #[test]
    fn test_exact_match_case_rules() {
        let s = server("AbC123", "Lobby", "lobby.exaroton.me", ServerStatus::Offline);
        assert!(matches_exact(&s, "lobby"));
        assert!(matches_exact(&s, "LOBBY.EXAROTON.ME"));
        assert!(matches_exact(&s, "AbC123"));
        assert!(!matches_exact(&s, "abc123"));
        assert!(!matches_exact(&s, "lob"));
    }

    #[test]
    fn test_pick_prefers_id_match_over_listing_order() {
        let servers = vec![
            server("x1", "lobby", "a.exaroton.me", ServerStatus::Offline),
            server("lobby", "other", "b.exaroton.me", ServerStatus::Offline),
        ];
        assert_eq!(pick(&servers, "lobby").unwrap().id, "lobby");
    }

    #[test]
    fn test_pick_falls_back_to_first_in_order() {
        let servers = vec![
            server("a1", "lobby", "a.exaroton.me", ServerStatus::Offline),
            server("a2", "lobby", "b.exaroton.me", ServerStatus::Online),
        ];
        for _ in 0..5 {
            assert_eq!(pick(&servers, "lobby").unwrap().id, "a1");
        }
        assert!(pick(&servers, "nothing").is_none());
    }

    #[tokio::test]
    async fn test_resolve_by_name_address_and_id() {
        let (_, resolver) = resolver_with(
            vec![server("abc", "lobby", "lobby.example.me", ServerStatus::Offline)],
            AliasTable::new(),
        );
        for query in ["lobby", "Lobby", "lobby.example.me", "abc"] {
            let found = resolver.resolve(query, false).await.unwrap();
            assert_eq!(found.unwrap().id, "abc", "query {query}");
        }
        assert!(resolver.resolve("ABC", false).await.unwrap().is_none());
        assert!(resolver.resolve("nope", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_substitutes_alias() {
        let mut aliases = AliasTable::new();
        aliases.insert("hub", "lobby.exaroton.me");
        let (_, resolver) = resolver_with(
            vec![server("abc", "lobby", "lobby.exaroton.me", ServerStatus::Offline)],
            aliases,
        );
        assert_eq!(resolver.resolve("hub", false).await.unwrap().unwrap().id, "abc");
    }

    #[tokio::test]
    async fn test_resolve_rejects_empty_query() {
        let (directory, resolver) = resolver_with(vec![], AliasTable::new());
        assert_eq!(
            resolver.resolve("", false).await.unwrap_err(),
            LinkError::InvalidArgument("query must not be empty")
        );
        assert_eq!(directory.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_force_refresh_lists_again() {
        let (directory, resolver) = resolver_with(
            vec![server("abc", "lobby", "lobby.exaroton.me", ServerStatus::Offline)],
            AliasTable::new(),
        );
        resolver.resolve("lobby", false).await.unwrap();
        resolver.resolve("lobby", false).await.unwrap();
        resolver.resolve("lobby", true).await.unwrap();
        assert_eq!(directory.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_prefix_completion_per_field() {
        let mut aliases = AliasTable::new();
        aliases.insert("lobby-hub", "lobby.exaroton.me");
        let (_, resolver) = resolver_with(
            vec![
                server("lo1", "lobby", "lobby.exaroton.me", ServerStatus::Offline),
                server("zz9", "survival", "lost.exaroton.me", ServerStatus::Online),
            ],
            aliases,
        );

        let all = resolver.resolve_prefix("lo", None).await;
        assert_eq!(all, vec!["lobby-hub", "lobby", "lobby.exaroton.me", "lost.exaroton.me", "lo1"]);

        let online = resolver.resolve_prefix("lo", Some(&[ServerStatus::Online])).await;
        assert_eq!(online, vec!["lost.exaroton.me"]);

        let offline = resolver.resolve_prefix("lo", Some(&[ServerStatus::Offline])).await;
        assert_eq!(offline, vec!["lobby-hub", "lobby", "lobby.exaroton.me", "lo1"]);
    }

    #[tokio::test]
    async fn test_prefix_completion_is_case_sensitive() {
        let (_, resolver) = resolver_with(
            vec![server("a1", "Lobby", "lobby.exaroton.me", ServerStatus::Offline)],
            AliasTable::new(),
        );
        assert_eq!(resolver.resolve_prefix("Lo", None).await, vec!["Lobby"]);
    }

    #[tokio::test]
    async fn test_prefix_completion_swallows_directory_errors() {
        let (directory, resolver) = resolver_with(
            vec![server("a1", "lobby", "lobby.exaroton.me", ServerStatus::Offline)],
            AliasTable::new(),
        );
        directory.fail_next_list(crate::DirectoryError::Unauthorized);
        assert!(resolver.resolve_prefix("lo", None).await.is_empty());
    }

    #[tokio::test]
    async fn test_completions_skip_routed_servers() {
        let (_, resolver) = resolver_with(
            vec![
                server("a1", "lobby", "lobby.exaroton.me", ServerStatus::Online),
                server("b2", "lost", "lost.exaroton.me", ServerStatus::Offline),
            ],
            AliasTable::new(),
        );
        let table = MemoryProxyTable::new();
        table.put(
            "lobby",
            RouteEntry {
                host: "127.0.0.1".to_string(),
                port: 25565,
                motd: String::new(),
                restricted: false,
            },
        );

        let completions = resolver.completions_not_in_proxy("lo", &table).await;
        assert_eq!(completions, vec!["lost", "lost.exaroton.me"]);
    }
}
