//! k8s-basic-auth-translator 入口

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wirepact_translator::config::{Cli, TranslatorConfig};
use wirepact_translator::{shutdown_signal, Translator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = TranslatorConfig::load(&cli)?;

    // RUST_LOG 优先于 --debug
    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    info!(
        "启动 Basic Auth 翻译器，入站端口 {}，出站端口 {}，用户仓库 {}",
        config.ingress_port, config.egress_port, config.repository
    );

    let translator = Translator::new(config).await?;
    translator.run(shutdown_signal()).await
}
