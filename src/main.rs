//! Xinglin Core 命令行入口
//!
//! 杏林平台内核的命令行工具，提供启动、管理和调试功能。
//!
//! # 命令概览
//!
//! - `start` - 启动平台内核
//! - `version` - 显示版本信息
//! - `check-config` - 验证配置文件
//! - `list-modules` - 列出模块仓库中的模块
//!
//! # 使用示例
//!
//! ```bash
//! # 启动内核
//! xinglin-core start
//!
//! # 使用自定义配置文件启动
//! xinglin-core -c my-config.yaml start
//!
//! # 开发模式启动
//! xinglin-core --dev start
//!
//! # 检查配置文件
//! xinglin-core check-config -c config.yaml
//!
//! # 查看版本
//! xinglin-core version
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

use xinglin_core::module::MODULE_DESCRIPTOR_FILENAME;
use xinglin_core::{DescriptorParser, ModuleSystem, PlatformConfig, RepositoryLoader};

/// Xinglin Core - 杏林平台内核
///
/// 杏林医疗信息平台的内核组件，提供模块生命周期管理、启动校验、
/// 特权执行与容器刷新功能。
#[derive(Parser)]
#[command(name = "xinglin-core")]
#[command(version, about = "杏林医疗信息平台的内核", long_about = None)]
#[command(author = "Xinglin Team")]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// 开发模式（启用更详细的日志和调试功能）
    #[arg(long, global = true)]
    dev: bool,

    /// 子命令
    #[command(subcommand)]
    command: Option<Commands>,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 启动平台内核
    ///
    /// 加载配置、装载模块仓库中的模块并逐个启动。
    /// 按 Ctrl+C 可优雅关闭。
    Start,

    /// 查看版本信息
    Version,

    /// 验证配置文件
    ///
    /// 检查配置文件是否有效，并显示解析后的配置内容。
    CheckConfig {
        /// 配置文件路径（不指定则使用全局 -c 选项）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// 列出模块仓库中的模块
    ///
    /// 扫描配置指定的模块仓库，显示每个模块包的描述信息。
    ListModules,
}

/// 初始化日志系统
///
/// 根据日志级别和开发模式配置 tracing 日志。
fn init_logging(level: &str, dev_mode: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::new(format!("xinglin_core={}", level))
    });

    let builder = fmt().with_env_filter(filter).with_target(true);

    if dev_mode {
        // 开发模式：显示更多信息
        builder
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    } else {
        // 生产模式：简洁输出
        builder
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// 启动内核
async fn run_start(config: PlatformConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("启动杏林平台内核...");

    let system = ModuleSystem::new(config).await?;
    let started = system.startup().await?;

    println!();
    println!("╔════════════════════════════════════════════════════════╗");
    println!("║         杏林平台内核已启动 (Xinglin Core Started)      ║");
    println!("╠════════════════════════════════════════════════════════╣");
    println!("║  版本: {}                                           ║", xinglin_core::VERSION);
    println!("║  已启动模块: {}                                         ║", started.len());
    println!("║                                                        ║");
    println!("║  按 Ctrl+C 优雅关闭内核                                ║");
    println!("╚════════════════════════════════════════════════════════╝");
    println!();

    // 等待关闭信号
    signal::ctrl_c().await?;

    println!();
    info!("收到关闭信号，正在优雅关闭...");
    system.shutdown().await;
    info!("杏林平台内核已关闭");

    Ok(())
}

/// 检查配置文件
async fn check_config(path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("检查配置文件: {}", path.display());
    println!();

    if !path.exists() {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        println!();
        print_config(&PlatformConfig::default());
        return Ok(());
    }

    match PlatformConfig::from_file(path).await {
        Ok(config) => {
            println!("✅ 配置文件有效！");
            println!();
            print_config(&config);
            Ok(())
        }
        Err(e) => {
            println!("❌ 配置文件无效: {}", e);
            Err(Box::new(e))
        }
    }
}

/// 打印配置内容
fn print_config(config: &PlatformConfig) {
    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  [平台]");
    println!("    平台版本:       {}", config.platform_version);
    if let Some(ref data_dir) = config.data_dir {
        println!("    数据目录:       {}", data_dir.display());
    }
    println!();
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", if config.logging.file_output { "是" } else { "否" });
    println!("    JSON 格式:      {}", if config.logging.json_format { "是" } else { "否" });
    println!();
    println!("  [模块配置]");
    println!("    模块仓库:       {}", config.module_repository().display());
    println!("    显式模块列表:   {} 个", config.modules.module_list.len());
    println!("    忽略核心校验:   {}", if config.modules.ignore_core_modules { "是" } else { "否" });
    let mandatory = config.mandatory_module_ids();
    if !mandatory.is_empty() {
        println!("    必备模块:       {}", mandatory.join(", "));
    }
    println!("────────────────────────────────────────");
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("Xinglin Core - 杏林平台内核");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", xinglin_core::VERSION);
    println!();
    println!("构建信息:");
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}

/// 列出模块仓库中的模块
async fn list_modules(config: PlatformConfig) -> Result<(), Box<dyn std::error::Error>> {
    let loader = RepositoryLoader::resolve(&config).await?;
    let packages = loader.scan().await?;

    println!();
    println!("模块仓库: {}", loader.repository().display());
    println!("═══════════════════════════════════════");

    if packages.is_empty() {
        println!();
        println!("  （仓库为空）");
    }

    for package in packages {
        let descriptor_path = package.join(MODULE_DESCRIPTOR_FILENAME);
        match DescriptorParser::parse_file(&descriptor_path).await {
            Ok(descriptor) => {
                println!();
                println!("  {} v{}", descriptor.id, descriptor.version);
                println!("    名称:     {}", descriptor.name);
                if !descriptor.require_version.is_empty() {
                    println!("    平台要求: {}", descriptor.require_version);
                }
                for required in &descriptor.require_modules {
                    match &required.version {
                        Some(v) => println!("    依赖:     {} >= {}", required.module_id, v),
                        None => println!("    依赖:     {}", required.module_id),
                    }
                }
            }
            Err(e) => {
                println!();
                println!("  ❌ {} 描述文件无效: {}", package.display(), e);
            }
        }
    }

    println!();
    println!("═══════════════════════════════════════");
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 初始化日志（Version 和 CheckConfig 命令不需要日志）
    let needs_logging = !matches!(
        cli.command,
        Some(Commands::Version) | Some(Commands::CheckConfig { .. })
    );

    if needs_logging {
        init_logging(&cli.log_level, cli.dev);
    }

    match cli.command {
        // 默认命令或 Start 命令：启动内核
        Some(Commands::Start) | None => {
            let config = load_config(&cli.config).await?;
            run_start(config).await?;
        }

        // 显示版本信息
        Some(Commands::Version) => {
            print_version();
        }

        // 检查配置文件
        Some(Commands::CheckConfig { config }) => {
            let config_path = config.unwrap_or(cli.config);
            check_config(&config_path).await?;
        }

        // 列出模块仓库中的模块
        Some(Commands::ListModules) => {
            let config = load_config(&cli.config).await?;
            list_modules(config).await?;
        }
    }

    Ok(())
}

/// 加载配置文件
async fn load_config(config_path: &PathBuf) -> Result<PlatformConfig, Box<dyn std::error::Error>> {
    let config = if config_path.exists() {
        let config = PlatformConfig::from_file(config_path).await?;
        info!("已加载配置文件: {}", config_path.display());
        config
    } else {
        info!("配置文件不存在 ({})，使用默认配置", config_path.display());
        PlatformConfig::default()
    };

    Ok(config)
}
