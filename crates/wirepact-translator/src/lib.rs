//! WirePact Basic Auth Translator - Envoy ext_authz 身份翻译边车
//!
//! 出站方向把 Basic Auth 凭证换成签名的 WirePact 身份令牌，入站方向验证令牌
//! 并换回 Basic Auth 凭证。密钥材料在任何授权服务监听之前引导完成，之后以
//! `Arc` 在两个方向之间只读共享。

pub mod config;
pub mod egress;
pub mod grpc;
pub mod health_check;
pub mod ingress;
pub mod kubernetes;
pub mod metrics;
pub mod repository;
pub mod server;

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::TranslatorConfig;
use crate::egress::EgressCheck;
use crate::health_check::HealthChecker;
use crate::ingress::IngressCheck;
use crate::metrics::MetricsCollector;
use crate::repository::UserRepository;
use crate::server::{serve_check, Direction};
use wirepact_pki::{HttpIssuanceClient, KeyMaterial, KeyStore, PkiEndpoint, TokenIssuer, TokenVerifier};

/// 翻译器主结构体
pub struct Translator {
    /// 配置
    config: TranslatorConfig,
    /// 引导完成的密钥材料
    key_material: Arc<KeyMaterial>,
    /// 用户仓库
    repository: Arc<dyn UserRepository>,
    /// 指标收集器
    metrics: MetricsCollector,
    /// 健康检查器
    health_checker: HealthChecker,
}

impl Translator {
    /// 引导密钥材料并创建用户仓库
    pub async fn new(config: TranslatorConfig) -> Result<Self> {
        let store = KeyStore::new(&config.storage_dir, &config.common_name);

        // 本地已有完整的密钥材料时不需要访问 PKI
        let key_material = if store.is_complete() && config.pki_address.is_none() {
            info!("使用 {} 中已有的密钥材料", store.dir().display());
            store.load().await.context("无法加载本地密钥材料")?
        } else {
            let endpoint = pki_endpoint(&config).await.context("无法确定 PKI 服务地址")?;
            store
                .bootstrap(&HttpIssuanceClient::new(endpoint))
                .await
                .context("无法引导密钥材料")?
        };

        let repository = repository::from_config(&config)
            .await
            .context("无法创建用户仓库")?;

        Self::with_parts(config, Arc::new(key_material), repository)
    }

    /// 使用现成的密钥材料和用户仓库创建
    pub fn with_parts(
        config: TranslatorConfig,
        key_material: Arc<KeyMaterial>,
        repository: Arc<dyn UserRepository>,
    ) -> Result<Self> {
        let metrics = MetricsCollector::new().context("无法注册指标")?;

        Ok(Self {
            config,
            key_material,
            repository,
            metrics,
            health_checker: HealthChecker::new(),
        })
    }

    /// 指标收集器
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// 健康检查器
    pub fn health_checker(&self) -> &HealthChecker {
        &self.health_checker
    }

    /// 在配置的端口上启动所有服务，直到 `shutdown` 完成
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let ingress = server::bind(self.config.ingress_port)
            .await
            .with_context(|| format!("无法监听入站端口 {}", self.config.ingress_port))?;
        let egress = server::bind(self.config.egress_port)
            .await
            .with_context(|| format!("无法监听出站端口 {}", self.config.egress_port))?;

        self.serve(ingress, egress, shutdown).await
    }

    /// 在已绑定的端口上提供入站和出站授权服务，以及健康检查和指标服务
    pub async fn serve(
        self,
        ingress_listener: TcpListener,
        egress_listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let ingress = Arc::new(IngressCheck::new(
            TokenVerifier::new(self.key_material.clone()),
            self.repository.clone(),
            self.config.ingress_mode,
        ));
        let egress = Arc::new(EgressCheck::new(
            self.repository.clone(),
            TokenIssuer::new(self.key_material.clone(), &self.config.issuer_name),
        ));
        info!(
            "入站模式 {}，令牌签发者 {}",
            self.config.ingress_mode, self.config.issuer_name
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let health_checker = self.health_checker.clone();
        tokio::spawn(async move {
            shutdown.await;
            info!("收到关闭信号，正在停止服务");
            health_checker.mark_stopping().await;
            let _ = stop_tx.send(true);
        });

        self.health_checker.mark_listening(Direction::Ingress).await;
        self.health_checker.mark_listening(Direction::Egress).await;

        let health_addr = SocketAddr::from(([0, 0, 0, 0], self.config.health_port));
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], self.config.metrics_port));

        tokio::try_join!(
            async {
                serve_check(
                    ingress,
                    self.metrics.clone(),
                    ingress_listener,
                    stopped(stop_rx.clone()),
                )
                .await
                .context("入站授权服务异常退出")
            },
            async {
                serve_check(
                    egress,
                    self.metrics.clone(),
                    egress_listener,
                    stopped(stop_rx.clone()),
                )
                .await
                .context("出站授权服务异常退出")
            },
            async {
                self.health_checker
                    .clone()
                    .serve(health_addr, stopped(stop_rx.clone()))
                    .await
                    .context("健康检查服务异常退出")
            },
            async {
                self.metrics
                    .clone()
                    .serve(metrics_addr, stopped(stop_rx.clone()))
                    .await
                    .context("指标服务异常退出")
            },
        )?;

        info!("翻译器已停止");
        Ok(())
    }
}

/// 解析 PKI 服务地址，未配置时通过 Kubernetes Service 发现
async fn pki_endpoint(config: &TranslatorConfig) -> wirepact_common::Result<PkiEndpoint> {
    let base_address = match config.pki_address.as_deref().map(str::trim) {
        Some(address) if !address.is_empty() => address.to_string(),
        _ => kubernetes::discover_pki_address(&config.pki_service_name).await?,
    };

    let mut endpoint = PkiEndpoint::new(&base_address);
    endpoint.ca_path = config.ca_path.clone();
    endpoint.csr_path = config.csr_path.clone();
    Ok(endpoint)
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// 等待 Ctrl-C 或 SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("无法监听 Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("无法监听 SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
