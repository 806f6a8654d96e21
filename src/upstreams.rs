use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpstreamAuth {
    pub auth_type: String,
    pub authority: String,
    pub resource: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    pub host: String,
    pub auth: Option<UpstreamAuth>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamAuthCredential {
    pub auth_type: String,
    pub authority: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for UpstreamAuthCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamAuthCredential")
            .field("auth_type", &self.auth_type)
            .field("authority", &self.authority)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

type CredentialMap = HashMap<String, HashMap<String, UpstreamAuthCredential>>;

/// Upstream topology and credentials from one registry push. Every resolver
/// compiled from that push closes over the same snapshot.
#[derive(Clone, Debug, Default)]
pub struct ServerContext {
    upstreams: HashMap<String, Upstream>,
    upstream_auth: CredentialMap,
}

impl ServerContext {
    pub fn upstream(&self, host: &str) -> Option<&Upstream> {
        self.upstreams.get(host)
    }

    /// Looks up the upstream serving `url` by its host (and port, if any).
    pub fn upstream_for_url(&self, url: &str) -> Option<&Upstream> {
        let url = Url::parse(url).ok()?;
        let host = url.host_str()?;
        if let Some(port) = url.port() {
            if let Some(upstream) = self.upstreams.get(&format!("{host}:{port}")) {
                return Some(upstream);
            }
        }
        self.upstreams.get(host)
    }

    pub fn credential(&self, auth_type: &str, authority: &str) -> Option<&UpstreamAuthCredential> {
        self.upstream_auth.get(auth_type)?.get(authority)
    }

    pub fn upstream_count(&self) -> usize {
        self.upstreams.len()
    }
}

/// Builds a fresh [`ServerContext`]: upstreams keyed by host, credentials
/// keyed by auth type and then authority. Later duplicates win.
pub fn rebuild(
    upstreams: impl IntoIterator<Item = Upstream>,
    credentials: impl IntoIterator<Item = UpstreamAuthCredential>,
) -> ServerContext {
    let upstreams = upstreams
        .into_iter()
        .map(|upstream| (upstream.host.clone(), upstream))
        .collect();

    let mut upstream_auth: CredentialMap = HashMap::new();
    for credential in credentials {
        upstream_auth
            .entry(credential.auth_type.clone())
            .or_default()
            .insert(credential.authority.clone(), credential);
    }

    ServerContext {
        upstreams,
        upstream_auth,
    }
}
