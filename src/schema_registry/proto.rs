//! Messages and client for the `registry.Registry` gRPC service.

use tonic::transport::Channel;

use crate::upstreams;

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeParams {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Schema {
    #[prost(string, tag = "1")]
    pub definition: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpstreamAuth {
    #[prost(string, tag = "1")]
    pub auth_type: String,
    #[prost(string, tag = "2")]
    pub authority: String,
    #[prost(string, tag = "3")]
    pub resource: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Upstream {
    #[prost(string, tag = "1")]
    pub host: String,
    #[prost(message, optional, tag = "2")]
    pub auth: Option<UpstreamAuth>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpstreamAuthCredentials {
    #[prost(string, tag = "1")]
    pub auth_type: String,
    #[prost(string, tag = "2")]
    pub authority: String,
    #[prost(string, tag = "3")]
    pub client_id: String,
    #[prost(string, tag = "4")]
    pub client_secret: String,
}

/// One push from the registry: the full schema and the full upstream set.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RegistryMessage {
    #[prost(message, optional, tag = "1")]
    pub schema: Option<Schema>,
    #[prost(message, repeated, tag = "2")]
    pub upstreams: Vec<Upstream>,
    #[prost(message, repeated, tag = "3")]
    pub upstream_auth_credentials: Vec<UpstreamAuthCredentials>,
}

impl From<Upstream> for upstreams::Upstream {
    fn from(upstream: Upstream) -> Self {
        upstreams::Upstream {
            host: upstream.host,
            auth: upstream.auth.map(|auth| upstreams::UpstreamAuth {
                auth_type: auth.auth_type,
                authority: auth.authority,
                resource: auth.resource,
            }),
        }
    }
}

impl From<UpstreamAuthCredentials> for upstreams::UpstreamAuthCredential {
    fn from(credential: UpstreamAuthCredentials) -> Self {
        upstreams::UpstreamAuthCredential {
            auth_type: credential.auth_type,
            authority: credential.authority,
            client_id: credential.client_id,
            client_secret: credential.client_secret,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    inner: tonic::client::Grpc<Channel>,
}

impl RegistryClient {
    pub fn new(channel: Channel) -> Self {
        RegistryClient {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn subscribe(
        &mut self,
        request: SubscribeParams,
    ) -> Result<tonic::Response<tonic::Streaming<RegistryMessage>>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("Service was not ready: {e}")))?;
        let codec = tonic::codec::ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static("/registry.Registry/Subscribe");
        self.inner
            .server_streaming(tonic::Request::new(request), path, codec)
            .await
    }
}
