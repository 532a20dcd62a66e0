//! 指标收集与导出模块
//!
//! 统计每个方向上授权决策的结果（跳过、转换、拒绝、错误），
//! 并通过 Prometheus 格式导出监控指标。

use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tracing::{error, info};

/// 请求处理失败（参数错误或签名失败）时使用的结果标签
pub const OUTCOME_ERROR: &str = "error";

/// 指标收集器
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus 注册表
    registry: Registry,
    /// 授权决策计数器，按方向和结果区分
    decisions_total: IntCounterVec,
}

impl MetricsCollector {
    /// 创建新的指标收集器
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let decisions_total = IntCounterVec::new(
            Opts::new(
                "wirepact_decisions_total",
                "Total number of authorization decisions by direction and outcome",
            ),
            &["direction", "outcome"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        Ok(Self {
            registry,
            decisions_total,
        })
    }

    /// 记录一次授权决策
    pub fn record(&self, direction: &str, outcome: &str) {
        self.decisions_total
            .with_label_values(&[direction, outcome])
            .inc();
    }

    /// 查询某个方向和结果的计数
    pub fn count(&self, direction: &str, outcome: &str) -> u64 {
        self.decisions_total
            .with_label_values(&[direction, outcome])
            .get()
    }

    /// 以 Prometheus 文本格式编码全部指标
    pub fn encode(&self) -> prometheus::Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    /// 获取 Prometheus 注册表
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn handle(&self, request: &Request<Body>) -> Response<Body> {
        if request.uri().path() != "/metrics" {
            let mut response = Response::new(Body::from("Not Found"));
            *response.status_mut() = StatusCode::NOT_FOUND;
            return response;
        }

        match self.encode() {
            Ok(buffer) => {
                let mut response = Response::new(Body::from(buffer));
                if let Ok(value) = TextEncoder::new().format_type().parse() {
                    response.headers_mut().insert(CONTENT_TYPE, value);
                }
                response
            }
            Err(e) => {
                error!("编码指标失败: {}", e);
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }

    /// 启动指标服务器，直到 `shutdown` 完成
    pub async fn serve(
        self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), hyper::Error> {
        let make_svc = make_service_fn(move |_| {
            let collector = self.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let response = collector.handle(&req);
                    async move { Ok::<_, Infallible>(response) }
                }))
            }
        });

        let server = Server::try_bind(&addr)?.serve(make_svc);
        info!("指标服务器启动在 {}", addr);

        server.with_graceful_shutdown(shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_increments_labelled_counter() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record("egress", "translated");
        metrics.record("egress", "translated");
        metrics.record("ingress", "denied");

        assert_eq!(metrics.count("egress", "translated"), 2);
        assert_eq!(metrics.count("ingress", "denied"), 1);
        assert_eq!(metrics.count("ingress", "translated"), 0);
    }

    #[test]
    fn test_encode_exposes_decisions() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record("ingress", "skipped");

        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains("wirepact_decisions_total"));
        assert!(text.contains("direction=\"ingress\""));
        assert!(text.contains("outcome=\"skipped\""));
    }

    #[tokio::test]
    async fn test_handle_routes_metrics_path() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record("egress", "denied");

        let request = Request::get("/metrics").body(Body::empty()).unwrap();
        let response = metrics.handle(&request);
        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("wirepact_decisions_total"));

        let request = Request::get("/other").body(Body::empty()).unwrap();
        assert_eq!(metrics.handle(&request).status(), StatusCode::NOT_FOUND);
    }
}
