//! Generated bindings for the subscriber provider/consumer RPC protocol.
//!
//! `ProxyApi` is exposed by the proxy process (providers call `Register`/`Disconnect`);
//! `ProxyApiConsumer` is exposed by each subscriber (the proxy calls `OnReceiveApiEvent`).

pub mod proxyapi {
    tonic::include_proto!("swarpf.proxyapi.v1");
}
