//! 糖网筛查服务器主程序

use anyhow::Context;
use clap::Parser;
use retina_core::AppConfig;
use retina_detection::{CnnClient, DetectionDelegate, DetectionPipeline, Simulator};
use retina_store::EntityStore;
use retina_web::{AppState, AuthService, WebServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "retina-server")]
#[command(about = "糖尿病视网膜病变筛查后端服务")]
struct Args {
    /// 监听地址
    #[arg(long)]
    host: Option<String>,

    /// 监听端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 影像上传目录
    #[arg(short, long)]
    upload_dir: Option<String>,

    /// 日志级别，缺省时使用配置中的 logging.level
    #[arg(short, long)]
    log_level: Option<String>,

    /// 模拟检测的随机种子，缺省时取系统熵
    #[arg(long)]
    simulation_seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(upload_dir) = args.upload_dir {
        config.upload.upload_dir = upload_dir;
    }

    // 初始化日志
    let level = args.log_level.unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting retina server...");
    info!("  Listen: {}:{}", config.server.host, config.server.port);
    info!("  Upload dir: {}", config.upload.upload_dir);
    info!("  CNN service: {}", config.cnn.base_url);

    tokio::fs::create_dir_all(&config.upload.upload_dir)
        .await
        .with_context(|| format!("Failed to create upload dir {}", config.upload.upload_dir))?;

    let simulator = match args.simulation_seed {
        Some(seed) => {
            warn!("Fallback simulator seeded with {}, simulated verdicts are reproducible", seed);
            Simulator::seeded(seed)
        }
        None => Simulator::from_entropy(),
    };

    let store = Arc::new(EntityStore::new());
    let client = CnnClient::new(config.cnn.clone())?;
    let delegate = DetectionDelegate::new(
        Arc::new(client),
        simulator,
        config.upload.upload_dir.clone(),
        config.cnn.preprocess,
    );
    let pipeline = DetectionPipeline::new(store.clone(), Arc::new(delegate));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;

    let state = AppState {
        store,
        auth: Arc::new(AuthService::new(&config.jwt)),
        detection: Arc::new(pipeline),
        config: Arc::new(config),
    };

    WebServer::new(addr, state).run().await
}
