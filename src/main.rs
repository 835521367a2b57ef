use chrono::{DateTime, Utc};
use clap::{Arg, Command};
use log::{error, info, warn};
use shortseller::{
    core::{config::EngineConfig, error::EngineError, types::Bar},
    strategies::short_seller::{
        EngineEvent, EngineHandle, EngineInput, LogEventSink, ShortSellerEngine, SignalAction,
    },
    utils::unified_logger::init_logger,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

type MainResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> MainResult<()> {
    // 解析命令行参数
    let matches = Command::new("shortseller")
        .version(env!("CARGO_PKG_VERSION"))
        .about("多资产空头决策引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .required(true),
        )
        .arg(
            Arg::new("events")
                .short('e')
                .long("events")
                .value_name("FILE")
                .help("按行回放的输入文件 (JSON Lines)，不指定时从标准输入实时读取"),
        )
        .arg(
            Arg::new("warmup")
                .short('w')
                .long("warmup")
                .value_name("FILE")
                .help("用于预热指标的历史K线 (JSON Lines)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("覆盖配置中的日志级别"),
        )
        .get_matches();

    let Some(config_file) = matches.get_one::<String>("config") else {
        return Err("缺少配置文件参数".into());
    };

    let mut config = EngineConfig::from_file(config_file)?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.log.default_level = level.to_uppercase();
    }

    // 初始化日志系统
    init_logger(&config.log)?;
    info!("📄 加载配置文件: {}", config_file);

    let (mut engine, handle) = ShortSellerEngine::new(config)?;
    engine.add_sink(Arc::new(LogEventSink));

    if let Some(path) = matches.get_one::<String>("warmup") {
        let bars: Vec<Bar> = read_inputs(path)
            .await?
            .into_iter()
            .filter_map(|input| match input {
                EngineInput::Bar(bar) => Some(bar),
                _ => None,
            })
            .collect();
        engine.warm_up(&bars).await;
    }

    let outcome = match matches.get_one::<String>("events") {
        Some(path) => replay(&mut engine, &handle, path).await,
        None => run_live(&mut engine, handle).await,
    };

    for stats in engine.trade_stats() {
        stats.log_summary();
    }

    match outcome {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("❌ 引擎停止: {}", e);
            std::process::exit(if e.is_fatal() { 2 } else { 1 });
        }
    }
}

async fn read_inputs(path: &str) -> MainResult<Vec<EngineInput>> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut inputs = Vec::new();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if let Some(input) = parse_line(&line, line_no) {
            inputs.push(input);
        }
    }
    Ok(inputs)
}

fn parse_line(line: &str, line_no: usize) -> Option<EngineInput> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(input) => Some(input),
        Err(e) => {
            warn!("第 {} 行无法解析，已跳过: {}", line_no, e);
            None
        }
    }
}

/// 回放输入文件：同一时间戳的K线组成一个周期
async fn replay(
    engine: &mut ShortSellerEngine,
    handle: &EngineHandle,
    path: &str,
) -> Result<(), EngineError> {
    let inputs = read_inputs(path)
        .await
        .map_err(|e| EngineError::Other(format!("读取输入文件失败: {}", e)))?;
    let enabled = engine.context().enabled_assets();
    info!("▶️ 回放 {} 条输入", inputs.len());

    let mut bucket: Vec<Bar> = Vec::new();
    let mut bucket_ts: Option<DateTime<Utc>> = None;

    for input in inputs {
        let EngineInput::Bar(bar) = input else {
            handle.send(input)?;
            continue;
        };

        if let Some(ts) = bucket_ts {
            if ts != bar.timestamp {
                run_and_print(engine, ts, std::mem::take(&mut bucket)).await?;
            }
        }
        bucket_ts = Some(bar.timestamp);
        bucket.push(bar);

        let complete = enabled
            .iter()
            .all(|asset| bucket.iter().any(|b| b.asset == *asset));
        if complete {
            if let Some(ts) = bucket_ts.take() {
                run_and_print(engine, ts, std::mem::take(&mut bucket)).await?;
            }
        }
    }

    if let Some(ts) = bucket_ts {
        run_and_print(engine, ts, bucket).await?;
    }
    Ok(())
}

async fn run_and_print(
    engine: &mut ShortSellerEngine,
    now: DateTime<Utc>,
    bars: Vec<Bar>,
) -> Result<(), EngineError> {
    let report = engine.run_cycle(now, bars).await?;
    for event in &report.events {
        if let EngineEvent::Signal(signal) = event {
            if signal.action == SignalAction::NoAction {
                continue;
            }
        }
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}

/// 实时模式：从标准输入读取，按配置的周期定时决策
async fn run_live(engine: &mut ShortSellerEngine, handle: EngineHandle) -> Result<(), EngineError> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut line_no = 0usize;
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        line_no += 1;
                        if let Some(input) = parse_line(&line, line_no) {
                            if handle.send(input).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        info!("标准输入已结束");
                        break;
                    }
                    Err(e) => {
                        error!("读取标准输入失败: {}", e);
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("收到 Ctrl+C");
                    break;
                }
            }
        }
        let _ = shutdown_tx.send(());
    });

    engine.run_scheduled(shutdown_rx).await
}
