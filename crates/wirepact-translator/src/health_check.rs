//! 健康检查模块
//!
//! 跟踪两个授权服务是否已经开始监听，并提供健康状态 API 供 Kubernetes 探针调用。
//! 密钥材料在任何服务监听之前引导完成，因此监听即意味着可以处理请求。

use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::server::Direction;

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// 健康
    Healthy,
    /// 启动中（部分服务尚未监听）
    Starting,
    /// 不健康（正在关闭）
    Unhealthy,
}

/// 健康检查结果
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// 健康状态
    pub status: HealthStatus,
    /// 详细信息
    pub details: String,
    /// 上次状态变化时间
    pub last_check: chrono::DateTime<chrono::Utc>,
    /// 入站服务是否在监听
    pub ingress_listening: bool,
    /// 出站服务是否在监听
    pub egress_listening: bool,
}

impl HealthCheckResult {
    fn evaluate(&mut self) {
        self.last_check = chrono::Utc::now();
        if self.status == HealthStatus::Unhealthy {
            return;
        }

        if self.ingress_listening && self.egress_listening {
            self.status = HealthStatus::Healthy;
            self.details = "入站和出站授权服务均在监听".to_string();
        } else {
            self.status = HealthStatus::Starting;
            self.details = "等待授权服务开始监听".to_string();
        }
    }
}

/// 健康检查器
#[derive(Clone)]
pub struct HealthChecker {
    /// 最新的健康检查结果
    latest_result: Arc<Mutex<HealthCheckResult>>,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    /// 创建新的健康检查器
    pub fn new() -> Self {
        let initial_result = HealthCheckResult {
            status: HealthStatus::Starting,
            details: "健康检查尚未运行".to_string(),
            last_check: chrono::Utc::now(),
            ingress_listening: false,
            egress_listening: false,
        };

        Self {
            latest_result: Arc::new(Mutex::new(initial_result)),
        }
    }

    /// 标记某个方向的授权服务已开始监听
    pub async fn mark_listening(&self, direction: Direction) {
        let mut result = self.latest_result.lock().await;
        match direction {
            Direction::Ingress => result.ingress_listening = true,
            Direction::Egress => result.egress_listening = true,
        }
        result.evaluate();
        debug!("{} 授权服务已就绪，当前状态 {:?}", direction, result.status);
    }

    /// 标记进程正在关闭
    pub async fn mark_stopping(&self) {
        let mut result = self.latest_result.lock().await;
        result.status = HealthStatus::Unhealthy;
        result.details = "正在关闭".to_string();
        result.evaluate();
    }

    /// 获取最新的健康检查结果
    pub async fn get_latest_result(&self) -> HealthCheckResult {
        self.latest_result.lock().await.clone()
    }

    async fn handle(&self, path: &str) -> Response<Body> {
        match path {
            "/health" => self.handle_health_check().await,
            "/ready" => self.handle_readiness_check().await,
            _ => with_status(Response::new(Body::from("Not Found")), StatusCode::NOT_FOUND),
        }
    }

    /// 处理健康检查请求
    async fn handle_health_check(&self) -> Response<Body> {
        let result = self.get_latest_result().await;

        let status_code = match result.status {
            HealthStatus::Healthy | HealthStatus::Starting => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "status": format!("{:?}", result.status),
            "details": result.details,
            "last_check": result.last_check.to_rfc3339(),
            "ingress_listening": result.ingress_listening,
            "egress_listening": result.egress_listening,
        });

        let mut response = with_status(Response::new(Body::from(body.to_string())), status_code);
        response.headers_mut().insert(
            CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("application/json"),
        );
        response
    }

    /// 处理就绪检查请求
    async fn handle_readiness_check(&self) -> Response<Body> {
        let result = self.get_latest_result().await;

        let status_code = match result.status {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Starting | HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        };

        with_status(Response::new(Body::empty()), status_code)
    }

    /// 启动健康检查服务器，直到 `shutdown` 完成
    pub async fn serve(
        self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), hyper::Error> {
        let make_svc = make_service_fn(move |_| {
            let checker = self.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let checker = checker.clone();
                    let path = req.uri().path().to_string();
                    async move { Ok::<_, Infallible>(checker.handle(&path).await) }
                }))
            }
        });

        let server = Server::try_bind(&addr)?.serve(make_svc);
        info!("健康检查服务器启动在 {}", addr);

        server.with_graceful_shutdown(shutdown).await
    }
}

fn with_status(mut response: Response<Body>, status: StatusCode) -> Response<Body> {
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get(checker: &HealthChecker, path: &str) -> (StatusCode, String) {
        let response = checker.handle(path).await;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_ready_only_after_both_directions_listen() {
        let checker = HealthChecker::new();
        assert_eq!(get(&checker, "/ready").await.0, StatusCode::SERVICE_UNAVAILABLE);

        checker.mark_listening(Direction::Ingress).await;
        assert_eq!(get(&checker, "/ready").await.0, StatusCode::SERVICE_UNAVAILABLE);

        checker.mark_listening(Direction::Egress).await;
        assert_eq!(get(&checker, "/ready").await.0, StatusCode::OK);
        assert_eq!(checker.get_latest_result().await.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_health_reports_json() {
        let checker = HealthChecker::new();
        checker.mark_listening(Direction::Ingress).await;

        let (status, body) = get(&checker, "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "Starting");
        assert_eq!(json["ingress_listening"], true);
        assert_eq!(json["egress_listening"], false);
    }

    #[tokio::test]
    async fn test_stopping_is_unhealthy() {
        let checker = HealthChecker::new();
        checker.mark_listening(Direction::Ingress).await;
        checker.mark_listening(Direction::Egress).await;
        checker.mark_stopping().await;

        assert_eq!(get(&checker, "/health").await.0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(get(&checker, "/ready").await.0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let checker = HealthChecker::new();
        assert_eq!(get(&checker, "/nope").await.0, StatusCode::NOT_FOUND);
    }
}
