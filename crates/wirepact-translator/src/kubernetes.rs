//! Kubernetes 环境探测
//!
//! 解析当前命名空间，并在未显式配置时通过 Service 发现 PKI 服务地址。

use k8s_openapi::api::core::v1::Service;
use kube::config::Kubeconfig;
use kube::{Api, Client};
use std::env;
use std::path::Path;
use tracing::{debug, info};

use wirepact_common::{Error, Result};

/// 兜底命名空间
pub const DEFAULT_NAMESPACE: &str = "default";
/// Downward API 注入命名空间的环境变量
pub const DOWNWARD_API_ENV: &str = "POD_NAMESPACE";
/// ServiceAccount 挂载的命名空间文件
pub const DOWNWARD_API_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// kubeconfig 当前上下文中设置的命名空间
pub fn kubeconfig_namespace(config: &Kubeconfig) -> Option<String> {
    let current = config.current_context.as_deref()?;
    config
        .contexts
        .iter()
        .find(|named| named.name == current)
        .and_then(|named| named.context.as_ref())
        .and_then(|context| context.namespace.clone())
        .filter(|namespace| !namespace.is_empty())
}

/// 按优先级选择命名空间：kubeconfig > 环境变量 > ServiceAccount 文件 > `default`
pub fn resolve_namespace(
    from_kubeconfig: Option<String>,
    from_env: Option<String>,
    from_file: Option<String>,
) -> String {
    [from_kubeconfig, from_env, from_file]
        .into_iter()
        .flatten()
        .map(|namespace| namespace.trim().to_string())
        .find(|namespace| !namespace.is_empty())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}

/// 当前命名空间
pub async fn current_namespace() -> String {
    let from_kubeconfig = Kubeconfig::read()
        .ok()
        .and_then(|config| kubeconfig_namespace(&config));
    let from_env = env::var(DOWNWARD_API_ENV).ok();
    let from_file = if Path::new(DOWNWARD_API_FILE).exists() {
        tokio::fs::read_to_string(DOWNWARD_API_FILE).await.ok()
    } else {
        None
    };

    let namespace = resolve_namespace(from_kubeconfig, from_env, from_file);
    debug!("当前命名空间: {}", namespace);
    namespace
}

/// 创建 Kubernetes 客户端
pub async fn client() -> Result<Client> {
    Client::try_default()
        .await
        .map_err(|e| Error::Kubernetes(format!("无法创建 Kubernetes 客户端: {}", e)))
}

/// 由 Service 对象推导 HTTP 地址：`http://<名称>.<命名空间>:<第一个端口>`
pub fn service_address(service: &Service, name: &str, namespace: &str) -> Result<String> {
    let port = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.first())
        .map(|port| port.port)
        .ok_or_else(|| Error::Kubernetes(format!("Service {} 没有声明任何端口", name)))?;

    Ok(format!("http://{}.{}:{}", name, namespace, port))
}

/// 在当前命名空间中通过 Service 发现 PKI 地址
pub async fn discover_pki_address(service_name: &str) -> Result<String> {
    let namespace = current_namespace().await;
    let services: Api<Service> = Api::namespaced(client().await?, &namespace);
    let service = services.get(service_name).await.map_err(|e| {
        Error::Kubernetes(format!(
            "无法在命名空间 {} 中读取 Service {}: {}",
            namespace, service_name, e
        ))
    })?;

    let address = service_address(&service, service_name, &namespace)?;
    info!("发现 PKI 服务地址 {}", address);
    Ok(address)
}
