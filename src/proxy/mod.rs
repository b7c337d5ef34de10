//! Proxy server module

pub mod core;
pub mod forward;
pub mod http_client;
pub mod pipeline;
pub mod server;

pub use core::{
    OutboundRequest, ProxyError, ProxyRequest, ProxyResponse, RequestContext, Transport,
    TransportError, UpstreamResponse,
};
pub use forward::ForwardingProxy;
pub use http_client::ReqwestTransport;
pub use pipeline::{Pipeline, HEALTH_BODY};
pub use server::ProxyServer;
