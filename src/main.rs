use std::time::Duration;

use anyhow::{Context, Result};
use bulksend::app::{load_recipients, Application};
use bulksend::shutdown::ShutdownManager;
use bulksend_core::config::AppConfig;
use bulksend_core::models::{QueueState, Recipient};
use clap::{value_parser, Arg, ArgMatches, Command};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Serialize)]
struct DispatchSummary<'a> {
    run_id: String,
    state: &'a QueueState,
    deferred: &'a [Recipient],
}

fn build_cli() -> Command {
    Command::new("bulksend")
        .version("1.0.0")
        .about("批量短信发送管道")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时查找 config/bulksend.toml")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"])
                .global(true),
        )
        .subcommand(
            Command::new("dispatch")
                .about("向接收人列表批量发送消息（演练通道）")
                .arg(
                    Arg::new("recipients")
                        .short('r')
                        .long("recipients")
                        .value_name("FILE")
                        .help("接收人JSON文件")
                        .required(true),
                )
                .arg(
                    Arg::new("template")
                        .short('t')
                        .long("template")
                        .value_name("TEXT")
                        .help("消息模板，支持 {name} {phone} 及自定义字段占位符")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("reconcile")
                .about("将长时间未决的发送记录标记为 UNKNOWN")
                .arg(
                    Arg::new("stale-threshold-minutes")
                        .long("stale-threshold-minutes")
                        .value_name("MINUTES")
                        .help("过期阈值（分钟），默认使用配置值")
                        .value_parser(value_parser!(u64)),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let config = AppConfig::load(config_path).context("加载配置失败")?;

    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.observability.log_level);
    let log_format = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.observability.log_format);
    init_logging(log_level, log_format)?;

    info!("启动批量短信发送管道");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let shutdown_manager = ShutdownManager::new();
    let signal_listener = shutdown_manager.listen_for_signals();

    let app = Application::new(config).await?;
    let result = run_command(&app, &matches, &shutdown_manager).await;

    signal_listener.abort();
    app.shutdown().await;

    if let Err(e) = &result {
        error!("命令执行失败: {e:#}");
    }
    result
}

async fn run_command(
    app: &Application,
    matches: &ArgMatches,
    shutdown_manager: &ShutdownManager,
) -> Result<()> {
    match matches.subcommand() {
        Some(("dispatch", sub)) => {
            let recipients_path = sub
                .get_one::<String>("recipients")
                .context("缺少 --recipients 参数")?;
            let template = sub
                .get_one::<String>("template")
                .context("缺少 --template 参数")?;

            let recipients = load_recipients(recipients_path)?;
            info!("读取到 {} 个接收人", recipients.len());

            let report = app
                .run_dispatch(recipients, template, shutdown_manager.subscribe())
                .await?;

            let summary = DispatchSummary {
                run_id: report.run_id.to_string(),
                state: &report.state,
                deferred: &report.deferred,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Some(("reconcile", sub)) => {
            let threshold = sub
                .get_one::<u64>("stale-threshold-minutes")
                .map(|minutes| Duration::from_secs(minutes * 60));

            let report = app
                .run_reconcile(threshold, shutdown_manager.subscribe())
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some((name, _)) => Err(anyhow::anyhow!("不支持的命令: {name}")),
        None => Err(anyhow::anyhow!("未指定命令")),
    }
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_parse_dispatch_command() {
        let matches = build_cli()
            .try_get_matches_from([
                "bulksend",
                "--log-format",
                "json",
                "dispatch",
                "--recipients",
                "people.json",
                "--template",
                "Hi {name}",
            ])
            .unwrap();

        assert_eq!(
            matches.get_one::<String>("log-format").map(String::as_str),
            Some("json")
        );
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "dispatch");
        assert_eq!(
            sub.get_one::<String>("template").map(String::as_str),
            Some("Hi {name}")
        );
    }

    #[test]
    fn test_parse_reconcile_threshold() {
        let matches = build_cli()
            .try_get_matches_from(["bulksend", "reconcile", "--stale-threshold-minutes", "90"])
            .unwrap();

        let (_, sub) = matches.subcommand().unwrap();
        assert_eq!(sub.get_one::<u64>("stale-threshold-minutes"), Some(&90));
    }

    #[test]
    fn test_dispatch_requires_template() {
        let result = build_cli().try_get_matches_from(["bulksend", "dispatch", "--recipients", "x.json"]);
        assert!(result.is_err());
    }
}
