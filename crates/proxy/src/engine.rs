//! The MITM proxy engine: CONNECT classification, TLS interception, and the per-endpoint
//! request/response pipeline that feeds the codec, the location rewriter, and event assembly.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use http::{header, HeaderValue, Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use rustls::{ClientConfig, ServerConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use swarpf_ca::RootCa;

use crate::assembly::assemble;
use crate::error::ProxyError;
use crate::matchers;
use crate::rewriter::{encode_rewritten, rewrite_location_plaintext};
use crate::router::EventRouter;
use crate::session::SessionRegistry;
use crate::tls;

type Body = Full<Bytes>;

/// Configuration for a [`ProxyEngine`], mirroring §4.4 of the design.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Enables TLS interception of `proxy-game` CONNECTs and the `/ca.crt` serve path.
    pub intercept_https: bool,
    /// Enables the location-response rewriter on `/api/location_c2.php`.
    pub force_http_downgrade: bool,
    /// Engine-level verbose logging. The global `tracing` filter (set once at process start)
    /// already governs TRACE-vs-INFO output; this flag is carried through the config contract
    /// so callers can still gate engine-local matcher tracing independently if needed.
    pub verbose: bool,
}

#[derive(Clone, Copy, Debug)]
enum Transport {
    Plain,
    Tls,
}

impl Transport {
    fn default_port(self) -> u16 {
        match self {
            Transport::Plain => 80,
            Transport::Tls => 443,
        }
    }
}

/// The forward-proxy engine: owns the root CA, per-host leaf certificate cache, and the
/// per-session staging slots; routes assembled events to an [`EventRouter`].
pub struct ProxyEngine {
    root_ca: RootCa,
    config: EngineConfig,
    sessions: SessionRegistry,
    leaf_cache: DashMap<String, Arc<ServerConfig>>,
    client_config: Arc<ClientConfig>,
    router: Arc<dyn EventRouter>,
    active_connections: std::sync::atomic::AtomicUsize,
}

impl ProxyEngine {
    /// Builds a new engine. `root_ca` is loaded once by the caller (see `swarpf-ca`) and
    /// shared for the process lifetime; `router` receives every assembled [`ApiEvent`].
    pub fn new(root_ca: RootCa, config: EngineConfig, router: Arc<dyn EventRouter>) -> Arc<Self> {
        Arc::new(Self {
            root_ca,
            config,
            sessions: SessionRegistry::new(),
            leaf_cache: DashMap::new(),
            client_config: tls::upstream_client_config(),
            router,
            active_connections: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    /// Number of client connections currently being served, for shutdown draining.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Accepts connections on `listener` until `shutdown` is signalled, handling each on its
    /// own task. Returning from this function means no new connections are being accepted;
    /// in-flight connections may still be running.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let engine = self.clone();
                            tokio::spawn(async move {
                                tracing::trace!(%peer, "accepted proxy connection");
                                engine.serve_connection(stream).await;
                            });
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "failed to accept proxy connection");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("proxy listener stopping accept loop");
                        break;
                    }
                }
            }
        }
    }

    async fn serve_connection(self: Arc<Self>, stream: TcpStream) {
        self.active_connections.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let io = TokioIo::new(stream);
        let engine = self.clone();
        let service = hyper::service::service_fn(move |req| {
            let engine = engine.clone();
            async move { engine.handle_outer(req).await }
        });
        if let Err(err) = hyper::server::conn::http1::Builder::new()
            .serve_connection(io, service)
            .with_upgrades()
            .await
        {
            tracing::debug!(error = %err, "client connection closed");
        }
        self.active_connections.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }

    async fn handle_outer(
        self: Arc<Self>,
        req: Request<Incoming>,
    ) -> Result<Response<Body>, std::convert::Infallible> {
        if req.method() == Method::CONNECT {
            return Ok(self.handle_connect(req));
        }
        match self.clone().handle_plain(req).await {
            Ok(resp) => Ok(resp),
            Err(err) => {
                tracing::error!(error = %err, "proxy request failed");
                Ok(text_response(StatusCode::BAD_GATEWAY, "proxy error"))
            }
        }
    }

    fn handle_connect(self: Arc<Self>, req: Request<Incoming>) -> Response<Body> {
        let authority = match req.uri().authority() {
            Some(a) => a.as_str().to_string(),
            None => return text_response(StatusCode::BAD_REQUEST, "missing CONNECT authority"),
        };
        let (host, port) = split_authority(&authority, Transport::Tls.default_port());
        let intercept = self.config.intercept_https && matchers::is_proxy_game_connect("CONNECT", &host);

        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    let result = if intercept {
                        self.mitm_session(upgraded, host.clone(), port).await
                    } else {
                        self.splice(upgraded, host.clone(), port).await
                    };
                    if let Err(err) = result {
                        tracing::debug!(error = %err, host = %host, "CONNECT tunnel ended");
                    }
                }
                Err(err) => tracing::error!(error = %err, "CONNECT upgrade failed"),
            }
        });

        Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::new()))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
    }

    async fn splice(&self, upgraded: Upgraded, host: String, port: u16) -> Result<(), ProxyError> {
        let mut upstream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| ProxyError::UpstreamConnect(host.clone(), e))?;
        let mut client_io = TokioIo::new(upgraded);
        tokio::io::copy_bidirectional(&mut client_io, &mut upstream)
            .await
            .map_err(|e| ProxyError::UpstreamConnect(host, e))?;
        Ok(())
    }

    async fn mitm_session(
        self: Arc<Self>,
        upgraded: Upgraded,
        host: String,
        port: u16,
    ) -> Result<(), ProxyError> {
        let server_config = self.leaf_config_for(&host)?;
        let acceptor = TlsAcceptor::from(server_config);
        let tls_stream = acceptor
            .accept(TokioIo::new(upgraded))
            .await
            .map_err(ProxyError::ClientHandshake)?;

        let engine = self.clone();
        let host_for_svc = host.clone();
        let service = hyper::service::service_fn(move |req| {
            let engine = engine.clone();
            let host = host_for_svc.clone();
            async move { engine.handle_mitm_request(req, host, port).await }
        });

        hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(tls_stream), service)
            .await
            .map_err(|e| ProxyError::UpstreamHttp(e))?;
        Ok(())
    }

    async fn handle_mitm_request(
        self: Arc<Self>,
        req: Request<Incoming>,
        host: String,
        port: u16,
    ) -> Result<Response<Body>, std::convert::Infallible> {
        match self.process(req, host, port, Transport::Tls).await {
            Ok(resp) => Ok(resp),
            Err(err) => {
                tracing::error!(error = %err, "MITM request failed");
                Ok(text_response(StatusCode::BAD_GATEWAY, "proxy error"))
            }
        }
    }

    async fn handle_plain(self: Arc<Self>, req: Request<Incoming>) -> Result<Response<Body>, ProxyError> {
        let (host, port) = extract_target(&req)?;
        self.process(req, host, port, Transport::Plain).await
    }

    fn leaf_config_for(&self, host: &str) -> Result<Arc<ServerConfig>, ProxyError> {
        if let Some(config) = self.leaf_cache.get(host) {
            return Ok(config.clone());
        }
        let leaf = self
            .root_ca
            .issue_leaf(host)
            .map_err(|e| ProxyError::LeafCertificate(host.to_string(), e))?;
        let config = tls::server_config_for_leaf(&leaf)?;
        self.leaf_cache.insert(host.to_string(), config.clone());
        Ok(config)
    }

    async fn process(
        self: &Arc<Self>,
        req: Request<Incoming>,
        host: String,
        port: u16,
        transport: Transport,
    ) -> Result<Response<Body>, ProxyError> {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        if self.config.verbose {
            tracing::debug!(%method, %host, %path, "dispatching request");
        }

        if self.config.intercept_https && matchers::is_ca_serve(&method, &path) {
            return Ok(self.serve_ca_certificate());
        }

        if matchers::is_game_endpoint(&method, &host, &path) {
            return self.process_game(req, host, port, transport).await;
        }

        if self.config.force_http_downgrade && matchers::is_location_endpoint(&method, &host, &path) {
            return self.process_location(req, host, port, transport).await;
        }

        self.forward_passthrough(req, host, port, transport).await
    }

    fn serve_ca_certificate(&self) -> Response<Body> {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Full::new(Bytes::from(self.root_ca.certificate_pem().to_string())))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
    }

    async fn process_game(
        self: &Arc<Self>,
        req: Request<Incoming>,
        host: String,
        port: u16,
        transport: Transport,
    ) -> Result<Response<Body>, ProxyError> {
        let session = self.sessions.begin();
        let (parts, body) = req.into_parts();
        let req_bytes = read_full_body(body).await?;

        match swarpf_codec::decode_payload(&req_bytes, false) {
            Ok(plain) => match String::from_utf8(plain) {
                Ok(text) => self.sessions.stage_request(session, text),
                Err(err) => {
                    tracing::warn!(error = %err, "request plaintext was not valid UTF-8");
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "failed to decode request payload, forwarding unmodified");
            }
        }

        let outbound = Request::from_parts(parts, Full::new(req_bytes));
        let response = self.forward(&host, port, transport, outbound).await?;
        let (resp_parts, resp_body) = response.into_parts();
        let resp_bytes = read_full_body(resp_body).await?;

        let staged_request = self.sessions.take_request(session);
        match (staged_request, swarpf_codec::decode_payload(&resp_bytes, true)) {
            (Some(request_plain), Ok(plain)) => match String::from_utf8(plain) {
                Ok(response_plain) => {
                    if let Some(event) = assemble(request_plain, response_plain) {
                        self.router.route(event).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "response plaintext was not valid UTF-8");
                }
            },
            (None, Ok(_)) => {
                tracing::debug!("response decoded but request half was unavailable, dropping event");
            }
            (_, Err(err)) => {
                tracing::warn!(error = %err, "failed to decode response payload, forwarding unmodified");
            }
        }

        Ok(Response::from_parts(resp_parts, Full::new(resp_bytes)))
    }

    async fn process_location(
        self: &Arc<Self>,
        req: Request<Incoming>,
        host: String,
        port: u16,
        transport: Transport,
    ) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = req.into_parts();
        let req_bytes = read_full_body(body).await?;
        let outbound = Request::from_parts(parts, Full::new(req_bytes));
        let response = self.forward(&host, port, transport, outbound).await?;
        let (mut resp_parts, resp_body) = response.into_parts();
        let resp_bytes = read_full_body(resp_body).await?;

        let rewritten = match swarpf_codec::decode_payload(&resp_bytes, true) {
            Ok(plain) => match String::from_utf8(plain) {
                Ok(text) => match rewrite_location_plaintext(&text) {
                    Some(rewritten_text) => match encode_rewritten(&rewritten_text) {
                        Ok(bytes) => Some(bytes),
                        Err(err) => {
                            tracing::error!(error = %err, "failed to re-encode rewritten location response");
                            None
                        }
                    },
                    None => {
                        tracing::warn!("location response missing server_url_list marker, leaving unmodified");
                        None
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "location response plaintext was not valid UTF-8");
                    None
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "failed to decode location response, leaving unmodified");
                None
            }
        };

        match rewritten {
            Some(bytes) => {
                let len = bytes.len().to_string();
                if let Ok(value) = HeaderValue::from_str(&len) {
                    resp_parts.headers.insert(header::CONTENT_LENGTH, value);
                }
                Ok(Response::from_parts(resp_parts, Full::new(Bytes::from(bytes))))
            }
            None => Ok(Response::from_parts(resp_parts, Full::new(resp_bytes))),
        }
    }

    async fn forward_passthrough(
        self: &Arc<Self>,
        req: Request<Incoming>,
        host: String,
        port: u16,
        transport: Transport,
    ) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = req.into_parts();
        let bytes = read_full_body(body).await?;
        let outbound = Request::from_parts(parts, Full::new(bytes));
        let response = self.forward(&host, port, transport, outbound).await?;
        let (resp_parts, resp_body) = response.into_parts();
        let resp_bytes = read_full_body(resp_body).await?;
        Ok(Response::from_parts(resp_parts, Full::new(resp_bytes)))
    }

    async fn forward(
        &self,
        host: &str,
        port: u16,
        transport: Transport,
        mut req: Request<Body>,
    ) -> Result<Response<Incoming>, ProxyError> {
        *req.uri_mut() = origin_form_uri(req.uri());
        let authority = if port == transport.default_port() {
            host.to_string()
        } else {
            format!("{host}:{port}")
        };
        if let Ok(value) = HeaderValue::from_str(&authority) {
            req.headers_mut().insert(header::HOST, value);
        }

        match transport {
            Transport::Plain => {
                let stream = TcpStream::connect((host, port))
                    .await
                    .map_err(|e| ProxyError::UpstreamConnect(host.to_string(), e))?;
                let mut sender = self.http1_handshake(stream).await?;
                sender.send_request(req).await.map_err(ProxyError::UpstreamHttp)
            }
            Transport::Tls => {
                let stream = TcpStream::connect((host, port))
                    .await
                    .map_err(|e| ProxyError::UpstreamConnect(host.to_string(), e))?;
                let name = tls::server_name(host)?;
                let connector = TlsConnector::from(self.client_config.clone());
                let tls_stream = connector
                    .connect(name, stream)
                    .await
                    .map_err(ProxyError::UpstreamHandshake)?;
                let mut sender = self.http1_handshake(tls_stream).await?;
                sender.send_request(req).await.map_err(ProxyError::UpstreamHttp)
            }
        }
    }

    async fn http1_handshake<T>(
        &self,
        io: T,
    ) -> Result<hyper::client::conn::http1::SendRequest<Body>, ProxyError>
    where
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
            .await
            .map_err(ProxyError::UpstreamHttp)?;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                tracing::debug!(error = %err, "upstream connection closed");
            }
        });
        Ok(sender)
    }
}

async fn read_full_body(body: Incoming) -> Result<Bytes, ProxyError> {
    Ok(body.collect().await.map_err(ProxyError::BodyRead)?.to_bytes())
}

fn split_authority(authority: &str, default_port: u16) -> (String, u16) {
    match authority.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(p) => (host.to_string(), p),
            Err(_) => (authority.to_string(), default_port),
        },
        None => (authority.to_string(), default_port),
    }
}

fn extract_target(req: &Request<Incoming>) -> Result<(String, u16), ProxyError> {
    if let Some(authority) = req.uri().authority() {
        return Ok(split_authority(authority.as_str(), Transport::Plain.default_port()));
    }
    if let Some(host_header) = req.headers().get(header::HOST).and_then(|v| v.to_str().ok()) {
        return Ok(split_authority(host_header, Transport::Plain.default_port()));
    }
    Err(ProxyError::InvalidServerName("missing host".to_string()))
}

fn origin_form_uri(uri: &Uri) -> Uri {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    path_and_query
        .parse()
        .unwrap_or_else(|_| Uri::from_static("/"))
}

fn text_response(status: StatusCode, body: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_authority_parses_explicit_port() {
        assert_eq!(split_authority("example.com:8443", 443), ("example.com".to_string(), 8443));
    }

    #[test]
    fn split_authority_falls_back_to_default_port() {
        assert_eq!(split_authority("example.com", 443), ("example.com".to_string(), 443));
    }

    #[test]
    fn origin_form_uri_drops_scheme_and_authority() {
        let uri: Uri = "http://example.com/api/gateway_c2.php?x=1".parse().unwrap();
        assert_eq!(origin_form_uri(&uri).to_string(), "/api/gateway_c2.php?x=1");
    }
}
