//! Bookstore Operator 入口
//!
//! `run` 启动 Operator，`crds` 输出 Bookstore CRD 清单。

use anyhow::Result;
use bookstore_operator::{
    config::{LogFormat, OperatorConfig},
    crd::Bookstore,
    BookstoreOperator,
};
use clap::{Args, Parser, Subcommand};
use kube::CustomResourceExt;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "bookstore-operator")]
#[command(about = "Kubernetes operator managing Helm releases for Bookstore tenants")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 输出 CRD 清单
    Crds,
    /// 运行 Operator
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// 配置文件（YAML 或 JSON）
    #[arg(long, env = "BOOKSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// 租户 Chart 所在目录
    #[arg(long)]
    chart_dir: Option<PathBuf>,

    /// 只监听该命名空间
    #[arg(long)]
    namespace: Option<String>,

    /// 指标服务器监听地址
    #[arg(long)]
    metrics_bind_address: Option<String>,

    /// 健康检查服务器监听地址
    #[arg(long)]
    health_probe_bind_address: Option<String>,

    /// 日志级别
    #[arg(long)]
    log_level: Option<String>,
}

impl RunArgs {
    /// 加载配置并应用命令行覆盖
    fn into_config(self) -> Result<OperatorConfig> {
        let mut config = OperatorConfig::load(self.config.as_deref())?;

        if let Some(chart_dir) = self.chart_dir {
            config.chart_dir = chart_dir;
        }
        if let Some(namespace) = self.namespace {
            config.watch_namespace = Some(namespace);
        }
        if let Some(address) = self.metrics_bind_address {
            config.metrics_address = address;
        }
        if let Some(address) = self.health_probe_bind_address {
            config.health_probe_address = address;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Crds => {
            print!("{}", serde_yaml::to_string(&Bookstore::crd())?);
            Ok(())
        }
        Commands::Run(args) => {
            let config_path = args.config.clone();
            let config = args.into_config()?;

            // 日志级别和格式来自配置，必须在加载配置之后初始化
            init_tracing(&config);
            if let Some(path) = config_path {
                info!("已从 {} 加载配置文件", path.display());
            }
            debug!("生效配置: {:?}", config);

            info!("启动 Bookstore Operator");
            BookstoreOperator::new(config).await?.run().await
        }
    }
}

fn init_tracing(config: &OperatorConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}
