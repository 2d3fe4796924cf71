//! HTTP request pipeline: endpoint descriptors, interceptor chains, and the
//! executor that runs them against a [`Transport`].

mod cache_interceptor;
mod endpoint;
mod interceptor;
mod service;
mod transport;

pub use cache_interceptor::CacheInterceptor;
pub use endpoint::{BodyEncoding, DecodeError, Endpoint, JsonDecoder, ResponseDecoder};
pub use interceptor::{LoggingInterceptor, Outcome, RequestInterceptor, ResponseInterceptor, WireInterceptor};
pub use service::{NetworkConfig, NetworkService};
pub use transport::{
  HttpMethod, RawResponse, ReqwestTransport, Transport, TransportError, TransportFuture, WireRequest,
};
