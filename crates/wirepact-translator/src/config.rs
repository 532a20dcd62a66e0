//! 配置管理模块
//!
//! 配置按以下顺序叠加：内置默认值、可选的 YAML/JSON 配置文件、
//! 命令行参数与环境变量。

use anyhow::{anyhow, Context};
use clap::Parser;
use config::{Config, ConfigBuilder, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ingress::IngressMode;
use crate::repository::RepositoryKind;
use wirepact_common::error::IntoError;
use wirepact_common::{Error, Result, DEFAULT_ISSUER};
use wirepact_pki::issuance::{DEFAULT_CA_PATH, DEFAULT_CSR_PATH};

/// 默认入站端口
pub const DEFAULT_INGRESS_PORT: u16 = 50051;
/// 默认出站端口
pub const DEFAULT_EGRESS_PORT: u16 = 50052;
/// 默认健康检查端口
pub const DEFAULT_HEALTH_PORT: u16 = 8080;
/// 默认指标端口
pub const DEFAULT_METRICS_PORT: u16 = 9090;
/// 默认 PKI Service 名称
pub const DEFAULT_PKI_SERVICE_NAME: &str = "wirepact-pki";
/// 默认证书通用名
pub const DEFAULT_COMMON_NAME: &str = "k8s basic auth translator";
/// Kubernetes 查询的默认超时（秒）
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 5;

/// Basic Auth 翻译器命令行参数
#[derive(Parser, Debug, Default)]
#[command(name = "k8s-basic-auth-translator", version, about, long_about = None)]
pub struct Cli {
    /// 配置文件路径（YAML 或 JSON）
    #[arg(short, long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// 入站授权服务端口
    #[arg(long, env = "INGRESS_PORT")]
    pub ingress_port: Option<u16>,

    /// 出站授权服务端口
    #[arg(long, env = "EGRESS_PORT")]
    pub egress_port: Option<u16>,

    /// 用户仓库类型：csv 或 kubernetes
    #[arg(long, env = "REPOSITORY")]
    pub repository: Option<RepositoryKind>,

    /// CSV 用户仓库文件
    #[arg(long, env = "CSV_PATH")]
    pub csv_path: Option<String>,

    /// 存放凭证的 Kubernetes Secret 名称
    #[arg(long, env = "K8S_SECRET_NAME")]
    pub k8s_secret_name: Option<String>,

    /// 入站模式：basic_auth 或 pass_through
    #[arg(long, env = "INGRESS_MODE")]
    pub ingress_mode: Option<IngressMode>,

    /// PKI 服务地址，不设置时通过 Kubernetes Service 发现
    #[arg(long, env = "PKI_ADDRESS")]
    pub pki_address: Option<String>,

    /// 用于发现 PKI 的 Service 名称
    #[arg(long, env = "PKI_SERVICE_NAME")]
    pub pki_service_name: Option<String>,

    /// 根证书路径
    #[arg(long, env = "CA_PATH")]
    pub ca_path: Option<String>,

    /// CSR 路径
    #[arg(long, env = "CSR_PATH")]
    pub csr_path: Option<String>,

    /// 证书通用名
    #[arg(long, env = "COMMON_NAME")]
    pub common_name: Option<String>,

    /// 令牌签发者名称
    #[arg(long, env = "ISSUER_NAME")]
    pub issuer_name: Option<String>,

    /// 证书与私钥的存放目录
    #[arg(long, env = "STORAGE_DIR")]
    pub storage_dir: Option<String>,

    /// Kubernetes 查询超时（秒）
    #[arg(long, env = "LOOKUP_TIMEOUT_SECS")]
    pub lookup_timeout_secs: Option<u64>,

    /// 健康检查端口
    #[arg(long, env = "HEALTH_PORT")]
    pub health_port: Option<u16>,

    /// 指标端口
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// 输出调试日志
    #[arg(short, long, env = "DEBUG")]
    pub debug: bool,
}

/// 翻译器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// 入站授权服务端口
    pub ingress_port: u16,
    /// 出站授权服务端口
    pub egress_port: u16,
    /// 用户仓库类型
    pub repository: RepositoryKind,
    /// CSV 用户仓库文件
    pub csv_path: Option<String>,
    /// Kubernetes Secret 名称
    pub k8s_secret_name: Option<String>,
    /// 入站模式
    pub ingress_mode: IngressMode,
    /// PKI 服务地址
    pub pki_address: Option<String>,
    /// 用于发现 PKI 的 Service 名称
    pub pki_service_name: String,
    /// 根证书路径
    pub ca_path: String,
    /// CSR 路径
    pub csr_path: String,
    /// 证书通用名
    pub common_name: String,
    /// 令牌签发者名称
    pub issuer_name: String,
    /// 证书与私钥的存放目录
    pub storage_dir: String,
    /// Kubernetes 查询超时（秒）
    pub lookup_timeout_secs: u64,
    /// 健康检查端口
    pub health_port: u16,
    /// 指标端口
    pub metrics_port: u16,
    /// 输出调试日志
    pub debug: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            ingress_port: DEFAULT_INGRESS_PORT,
            egress_port: DEFAULT_EGRESS_PORT,
            repository: RepositoryKind::Csv,
            csv_path: None,
            k8s_secret_name: None,
            ingress_mode: IngressMode::BasicAuth,
            pki_address: None,
            pki_service_name: DEFAULT_PKI_SERVICE_NAME.to_string(),
            ca_path: DEFAULT_CA_PATH.to_string(),
            csr_path: DEFAULT_CSR_PATH.to_string(),
            common_name: DEFAULT_COMMON_NAME.to_string(),
            issuer_name: DEFAULT_ISSUER.to_string(),
            storage_dir: ".".to_string(),
            lookup_timeout_secs: DEFAULT_LOOKUP_TIMEOUT_SECS,
            health_port: DEFAULT_HEALTH_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            debug: false,
        }
    }
}

impl TranslatorConfig {
    /// 从命令行参数（以及其中指定的配置文件）加载配置
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut builder = Self::defaults()?;

        if let Some(path) = &cli.config {
            builder = builder.add_source(File::from(path.as_path()).format(file_format(path)?));
        }

        builder = Self::apply_overrides(builder, cli).context("无法应用命令行参数")?;

        let config = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize::<TranslatorConfig>()
            .context("配置格式错误")?;

        config.validate()?;
        Ok(config)
    }

    fn defaults() -> anyhow::Result<ConfigBuilder<config::builder::DefaultState>> {
        let defaults = Config::try_from(&TranslatorConfig::default()).context("无法生成默认配置")?;
        Ok(Config::builder().add_source(defaults))
    }

    fn apply_overrides(
        builder: ConfigBuilder<config::builder::DefaultState>,
        cli: &Cli,
    ) -> std::result::Result<ConfigBuilder<config::builder::DefaultState>, config::ConfigError>
    {
        let builder = builder
            .set_override_option("ingress_port", cli.ingress_port.map(i64::from))?
            .set_override_option("egress_port", cli.egress_port.map(i64::from))?
            .set_override_option("repository", cli.repository.map(|kind| kind.to_string()))?
            .set_override_option("csv_path", cli.csv_path.clone())?
            .set_override_option("k8s_secret_name", cli.k8s_secret_name.clone())?
            .set_override_option("ingress_mode", cli.ingress_mode.map(|mode| mode.to_string()))?
            .set_override_option("pki_address", cli.pki_address.clone())?
            .set_override_option("pki_service_name", cli.pki_service_name.clone())?
            .set_override_option("ca_path", cli.ca_path.clone())?
            .set_override_option("csr_path", cli.csr_path.clone())?
            .set_override_option("common_name", cli.common_name.clone())?
            .set_override_option("issuer_name", cli.issuer_name.clone())?
            .set_override_option("storage_dir", cli.storage_dir.clone())?
            .set_override_option("lookup_timeout_secs", cli.lookup_timeout_secs.map(|v| v as i64))?
            .set_override_option("health_port", cli.health_port.map(i64::from))?
            .set_override_option("metrics_port", cli.metrics_port.map(i64::from))?;

        if cli.debug {
            builder.set_override("debug", true)
        } else {
            Ok(builder)
        }
    }

    /// 校验配置的一致性
    pub fn validate(&self) -> Result<()> {
        if self.ingress_port == self.egress_port {
            return format!("入站和出站端口不能相同: {}", self.ingress_port)
                .into_error(Error::Config);
        }

        match self.repository {
            RepositoryKind::Csv if is_blank(&self.csv_path) => {
                return "使用 csv 仓库时必须设置 csv_path".into_error(Error::Config);
            }
            RepositoryKind::Kubernetes if is_blank(&self.k8s_secret_name) => {
                return "使用 kubernetes 仓库时必须设置 k8s_secret_name".into_error(Error::Config);
            }
            _ => {}
        }

        if self.common_name.trim().is_empty() {
            return "证书通用名不能为空".into_error(Error::Config);
        }

        if self.lookup_timeout_secs == 0 {
            return "lookup_timeout_secs 必须大于 0".into_error(Error::Config);
        }

        Ok(())
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn file_format(path: &Path) -> anyhow::Result<FileFormat> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => Ok(FileFormat::Yaml),
        Some("json") => Ok(FileFormat::Json),
        _ => Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON")),
    }
}
