use {
    crate::{optimization::ConfigError, service::LaunchpadRpc, solana_rpc::RpcError},
    anyhow::Context as _,
    futures::future::{ready, BoxFuture, FutureExt, TryFutureExt},
    hyper::{Request, Response, StatusCode},
    jsonrpsee::{
        core::http_helpers::Body,
        server::{ServerBuilder, ServerHandle},
        types::error::{ErrorObject, ErrorObjectOwned, INTERNAL_ERROR_CODE, INVALID_PARAMS_CODE},
    },
    std::{
        error::Error,
        fmt,
        future::Future,
        net::SocketAddr,
        sync::{Arc, Mutex},
        task::{Context, Poll},
        time::Instant,
    },
    tower::Service,
    tracing::{debug, info, warn},
};

#[derive(Clone)]
pub struct RpcServer {
    server_handle: Arc<Mutex<Option<ServerHandle>>>,
    local_addr: SocketAddr,
}

impl fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcServer")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

impl RpcServer {
    pub async fn new(addr: SocketAddr, service: Arc<LaunchpadRpc>) -> anyhow::Result<Self> {
        use rpc_admin::{RpcServer, RpcServerImpl};

        let health = Arc::clone(&service);
        let server_middleware = tower::ServiceBuilder::new()
            .layer_fn(move |service| UriRequestMiddleware {
                service,
                uri: "/health",
                get_response: {
                    let health = Arc::clone(&health);
                    move || ready(health_status(&health))
                },
            })
            .layer_fn(|service| UriRequestMiddleware {
                service,
                uri: "/metrics",
                get_response: || ready((StatusCode::OK, crate::metrics::collect_to_text())),
            });

        let server = ServerBuilder::new()
            .set_http_middleware(server_middleware)
            .build(addr)
            .await
            .with_context(|| format!("Failed to start HTTP server at {addr}"))?;
        let local_addr = server
            .local_addr()
            .with_context(|| format!("Failed to get local address of server at {addr}"))?;
        let server_handle = server.start(RpcServerImpl { service }.into_rpc());
        info!("started RPC admin server on {local_addr}");

        Ok(Self {
            server_handle: Arc::new(Mutex::new(Some(server_handle))),
            local_addr,
        })
    }

    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(self) {
        let server_handle = self
            .server_handle
            .lock()
            .expect("server handle lock poisoned")
            .take();
        match server_handle {
            Some(server_handle) => {
                if server_handle.stop().is_err() {
                    warn!("RPC admin server already stopped");
                }
            }
            None => warn!("RpcServer already shutdown"),
        }
    }
}

pub mod rpc_admin {
    use {
        super::invalid_params,
        crate::{
            optimization::{ConfigUpdate, OptimizationConfig},
            service::{LaunchpadRpc, ServiceStatus},
            solana_rpc::parse_address,
        },
        base64::{engine::general_purpose::STANDARD, Engine as _},
        jsonrpsee::{
            core::{async_trait, RpcResult},
            proc_macros::rpc,
        },
        serde::{Deserialize, Serialize},
        solana_sdk::account::Account,
        std::sync::Arc,
        tracing::info,
    };

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AccountInfo {
        pub lamports: u64,
        pub owner: String,
        /// base64
        pub data: String,
        pub executable: bool,
        pub rent_epoch: u64,
    }

    impl From<Account> for AccountInfo {
        fn from(account: Account) -> Self {
            Self {
                lamports: account.lamports,
                owner: account.owner.to_string(),
                data: STANDARD.encode(&account.data),
                executable: account.executable,
                rent_epoch: account.rent_epoch,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BlockhashInfo {
        pub blockhash: String,
        pub last_valid_block_height: u64,
    }

    #[rpc(server, client)]
    pub trait Rpc {
        #[method(name = "getStatus")]
        fn get_status(&self) -> RpcResult<ServiceStatus>;

        #[method(name = "updateConfig")]
        fn update_config(&self, update: ConfigUpdate) -> RpcResult<OptimizationConfig>;

        #[method(name = "applyPreset")]
        fn apply_preset(&self, name: String) -> RpcResult<OptimizationConfig>;

        #[method(name = "clearAllCaches")]
        fn clear_all_caches(&self) -> RpcResult<usize>;

        #[method(name = "rearm")]
        fn rearm(&self) -> RpcResult<()>;

        #[method(name = "getAccountInfo")]
        async fn get_account_info(&self, address: String) -> RpcResult<Option<AccountInfo>>;

        #[method(name = "getTokenBalance")]
        async fn get_token_balance(&self, address: String) -> RpcResult<f64>;

        #[method(name = "getBlockhash")]
        async fn get_blockhash(&self) -> RpcResult<BlockhashInfo>;
    }

    pub struct RpcServerImpl {
        pub service: Arc<LaunchpadRpc>,
    }

    #[async_trait]
    impl RpcServer for RpcServerImpl {
        fn get_status(&self) -> RpcResult<ServiceStatus> {
            Ok(self.service.get_status())
        }

        fn update_config(&self, update: ConfigUpdate) -> RpcResult<OptimizationConfig> {
            let config = self.service.update_config(&update);
            info!(?update, "config updated over admin rpc");
            Ok(config.as_ref().clone())
        }

        fn apply_preset(&self, name: String) -> RpcResult<OptimizationConfig> {
            let config = self.service.apply_preset(&name)?;
            Ok(config.as_ref().clone())
        }

        fn clear_all_caches(&self) -> RpcResult<usize> {
            Ok(self.service.clear_all_caches())
        }

        fn rearm(&self) -> RpcResult<()> {
            self.service.rearm();
            Ok(())
        }

        async fn get_account_info(&self, address: String) -> RpcResult<Option<AccountInfo>> {
            let address = parse_address(&address).map_err(|error| invalid_params(error.to_string()))?;
            let account = self.service.get_account_info(&address).await?;
            Ok(account.map(Into::into))
        }

        async fn get_token_balance(&self, address: String) -> RpcResult<f64> {
            let address = parse_address(&address).map_err(|error| invalid_params(error.to_string()))?;
            Ok(self.service.get_token_balance(&address).await?)
        }

        async fn get_blockhash(&self) -> RpcResult<BlockhashInfo> {
            let latest = self.service.get_blockhash().await?;
            Ok(BlockhashInfo {
                blockhash: latest.blockhash.to_string(),
                last_valid_block_height: latest.last_valid_block_height,
            })
        }
    }
}

impl From<RpcError> for ErrorObjectOwned {
    fn from(error: RpcError) -> Self {
        if error.is_validation() {
            invalid_params(error.to_string())
        } else {
            ErrorObject::owned(INTERNAL_ERROR_CODE, error.to_string(), None::<()>)
        }
    }
}

impl From<ConfigError> for ErrorObjectOwned {
    fn from(error: ConfigError) -> Self {
        invalid_params(error.to_string())
    }
}

#[derive(Clone)]
pub struct UriRequestMiddleware<S, F> {
    service: S,
    uri: &'static str,
    get_response: F,
}

impl<S, F, Fut> Service<Request<Body>> for UriRequestMiddleware<S, F>
where
    S: Service<Request<Body>, Response = Response<Body>>,
    S::Response: 'static,
    S::Error: Into<Box<dyn Error + Send + Sync>> + 'static,
    S::Future: Send + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = (StatusCode, String)> + Send + 'static,
{
    type Response = S::Response;
    type Error = Box<dyn Error + Send + Sync + 'static>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        if self.uri == request.uri() {
            let get_response_fut = (self.get_response)();
            let uri = self.uri;
            let ts = Instant::now();
            async move {
                let (status, body) = get_response_fut.await;
                let response = Response::builder()
                    .status(status)
                    .body(Body::new(body))?;
                debug!(
                    uri,
                    elapsed_ms = ts.elapsed().as_millis(),
                    "created response for uri"
                );
                Ok::<_, Box<dyn Error + Send + Sync>>(response)
            }
            .boxed()
        } else {
            self.service.call(request).map_err(Into::into).boxed()
        }
    }
}

/// Unhealthy while the error-rate breaker of `service` is tripped.
fn health_status(service: &LaunchpadRpc) -> (StatusCode, String) {
    if service.optimizations().is_tripped() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "optimizations disabled by error-rate breaker".to_owned(),
        )
    } else {
        (StatusCode::OK, "ok".to_owned())
    }
}

pub fn invalid_params(message: impl Into<String>) -> ErrorObjectOwned {
    ErrorObject::owned::<()>(INVALID_PARAMS_CODE, message, None)
}
