//! 授权 gRPC 服务
//!
//! 入站和出站检查共用同一套服务实现，各自监听一个端口。

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::grpc::{Authorization, AuthorizationServer, CheckRequest, CheckResponse, HttpAttributes};
use crate::metrics::{MetricsCollector, OUTCOME_ERROR};
use wirepact_common::{AuthorizationDecision, Result};

/// 请求方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// 进入工作负载的请求
    Ingress,
    /// 离开工作负载的请求
    Egress,
}

impl Direction {
    /// 日志和指标中使用的标签
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ingress => "ingress",
            Direction::Egress => "egress",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个方向的授权检查
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthorizationCheck: Send + Sync {
    /// 检查所处理的方向
    fn direction(&self) -> Direction;

    /// 为一个请求做出授权决策
    ///
    /// 拒绝是正常的决策结果；只有内部错误（如令牌签名失败）才返回 `Err`。
    async fn check(&self, request: &HttpAttributes) -> Result<AuthorizationDecision>;
}

/// 把 [`AuthorizationCheck`] 暴露为 Envoy ext_authz 服务
pub struct CheckService<C: ?Sized> {
    checker: Arc<C>,
    metrics: MetricsCollector,
}

impl<C: AuthorizationCheck + ?Sized> CheckService<C> {
    /// 创建新的服务
    pub fn new(checker: Arc<C>, metrics: MetricsCollector) -> Self {
        Self { checker, metrics }
    }
}

#[tonic::async_trait]
impl<C: AuthorizationCheck + ?Sized + 'static> Authorization for CheckService<C> {
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> std::result::Result<Response<CheckResponse>, Status> {
        let direction = self.checker.direction();
        let attributes = match HttpAttributes::from_check_request(request.into_inner()) {
            Ok(attributes) => attributes,
            Err(status) => {
                warn!("{} 授权请求缺少 HTTP 属性", direction);
                self.metrics.record(direction.as_str(), OUTCOME_ERROR);
                return Err(status);
            }
        };

        let span = info_span!(
            "check",
            direction = %direction,
            request_id = %attributes.id,
            host = %attributes.host,
            path = %attributes.path,
            method = %attributes.method,
        );

        async {
            match self.checker.check(&attributes).await {
                Ok(decision) => {
                    debug!(outcome = decision.outcome(), "授权决策完成");
                    self.metrics.record(direction.as_str(), decision.outcome());
                    Ok(Response::new(CheckResponse::from(&decision)))
                }
                Err(e) => {
                    error!("处理授权请求失败: {}", e);
                    self.metrics.record(direction.as_str(), OUTCOME_ERROR);
                    Err(Status::internal("authorization check failed"))
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// 在所有网卡的指定端口上监听
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await
}

/// 在已绑定的端口上提供授权服务，直到 `shutdown` 完成
pub async fn serve_check<C>(
    checker: Arc<C>,
    metrics: MetricsCollector,
    listener: TcpListener,
    shutdown: impl Future<Output = ()>,
) -> std::result::Result<(), tonic::transport::Error>
where
    C: AuthorizationCheck + ?Sized + 'static,
{
    let direction = checker.direction();
    if let Ok(addr) = listener.local_addr() {
        info!("{} 授权服务启动在 {}", direction, addr);
    }

    let incoming = futures::stream::unfold(listener, |listener| async move {
        let accepted = listener.accept().await.map(|(stream, _)| stream);
        Some((accepted, listener))
    });

    Server::builder()
        .add_service(AuthorizationServer::new(CheckService::new(checker, metrics)))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?;

    info!("{} 授权服务已停止", direction);
    Ok(())
}
