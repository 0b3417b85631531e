//! echo-session: 会话存储交互式控制台
//!
//! 在进程内存 KV 存储上运行一个 REPL，用于手动体验分层状态和事件日志。
//!
//! ```bash
//! cargo run -- --config session.yaml
//! RUST_LOG=echo_session=debug cargo run
//! ```

use clap::Parser;
use echo_session::config::SessionConfig;
use echo_session::error::{Result, SessionError};
use echo_session::kv::InMemoryKvStore;
use echo_session::session::{Event, GetConfig, Session, SessionService, StateMap};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::Value;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "echo-session", about = "分层会话存储交互式控制台")]
struct Cli {
    /// YAML 配置文件；缺省时从环境变量读取
    #[arg(short, long, env = "ECHO_SESSION_CONFIG")]
    config: Option<String>,
}

const HELP: &str = r#"命令：
  create <app> <user> [id|-] [json-state]
  get    <app> <user> <id> [recent=N] [after=TS]
  list   <app> <user>
  delete <app> <user> <id>
  append <app> <user> <id> <author> [json-delta]
  set    <app> <user> <id> <key> <json-value>
  help | quit"#;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "echo_session=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match cli.config.as_deref() {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::from_env()?,
    };
    let service = SessionService::new(Arc::new(InMemoryKvStore::new()), config)?;

    println!("{}", "═".repeat(62));
    println!("  echo-session  (输入 help 查看命令)");
    println!("{}", "═".repeat(62));

    let mut rl = DefaultEditor::new()?;
    loop {
        let line = match rl.readline("session> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);
        if matches!(line, "quit" | "exit") {
            break;
        }
        if let Err(e) = run_command(&service, line).await {
            println!("  ✗ {}", e);
        }
    }

    service.close();
    Ok(())
}

async fn run_command(service: &SessionService, line: &str) -> Result<()> {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    match cmd {
        "help" => println!("{}", HELP),
        "create" => {
            let args = split_args(rest, 3);
            let [app, user] = required::<2>(&args)?;
            let id = args.get(2).filter(|s| s.as_str() != "-").map(String::as_str);
            let state = parse_state(args.get(3))?;
            let session = service.create(app, user, id, state).await?;
            print_session(&session).await?;
        }
        "get" => {
            let args: Vec<String> = rest.split_whitespace().map(String::from).collect();
            let [app, user, id] = required::<3>(&args)?;
            let mut config = GetConfig::default();
            for opt in &args[3..] {
                match opt.split_once('=') {
                    Some(("recent", n)) => config = config.num_recent_events(parse_num(n)?),
                    Some(("after", ts)) => config = config.after(parse_num(ts)?),
                    _ => return Err(SessionError::InvalidArgument(format!("未知选项: {opt}"))),
                }
            }
            let session = service.get(app, user, id, config).await?;
            print_session(&session).await?;
        }
        "list" => {
            let args = split_args(rest, 2);
            let [app, user] = required::<2>(&args)?;
            let sessions = service.list(app, user).await?;
            println!("  共 {} 个会话", sessions.len());
            for s in &sessions {
                println!("  - {}  state={} 项", s.id(), s.state().len());
            }
        }
        "delete" => {
            let args = split_args(rest, 3);
            let [app, user, id] = required::<3>(&args)?;
            service.delete(app, user, id).await?;
            println!("  ✓ 已删除");
        }
        "append" => {
            let args = split_args(rest, 4);
            let [app, user, id, author] = required::<4>(&args)?;
            let delta = parse_state(args.get(4))?;
            let mut session = service.get(app, user, id, GetConfig::default()).await?;
            service
                .append_event(&mut session, Event::new(author.as_str()).with_state_delta(delta))
                .await?;
            print_session(&session).await?;
        }
        "set" => {
            let args = split_args(rest, 4);
            let [app, user, id, key] = required::<4>(&args)?;
            let raw = args
                .get(4)
                .ok_or_else(|| SessionError::InvalidArgument("缺少 json-value".to_string()))?;
            let value: Value = serde_json::from_str(raw)?;
            let mut session = service.get(app, user, id, GetConfig::default()).await?;
            session.state_mut().set(key.as_str(), value).await?;
            print_session(&session).await?;
        }
        other => {
            return Err(SessionError::InvalidArgument(format!(
                "未知命令 '{other}'，输入 help 查看"
            )));
        }
    }
    Ok(())
}

/// 前 `n` 个空白分隔的参数，剩余部分（通常是 JSON）作为最后一个参数
fn split_args(rest: &str, n: usize) -> Vec<String> {
    let mut args = Vec::new();
    let mut remaining = rest.trim_start();
    for _ in 0..n {
        if remaining.is_empty() {
            break;
        }
        let (head, tail) = remaining.split_once(' ').unwrap_or((remaining, ""));
        args.push(head.to_string());
        remaining = tail.trim_start();
    }
    if !remaining.is_empty() {
        args.push(remaining.to_string());
    }
    args
}

fn required<const N: usize>(args: &[String]) -> Result<[&String; N]> {
    if args.len() < N {
        return Err(SessionError::InvalidArgument(format!(
            "至少需要 {N} 个参数，实际 {}",
            args.len()
        )));
    }
    Ok(std::array::from_fn(|i| &args[i]))
}

fn parse_state(raw: Option<&String>) -> Result<StateMap> {
    match raw {
        None => Ok(StateMap::new()),
        Some(raw) => Ok(serde_json::from_str(raw)?),
    }
}

fn parse_num<T: std::str::FromStr>(raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| SessionError::InvalidArgument(format!("无效数字: {raw}")))
}

async fn print_session(session: &Session) -> Result<()> {
    println!("  id:          {}", session.id());
    println!("  app/user:    {}/{}", session.app_name(), session.user_id());
    println!("  updated_at:  {:.3}", session.last_update_time());
    println!("  state:");
    for (k, v) in session.state().all() {
        println!("    {k} = {v}");
    }
    let view = if session.events().is_frozen() { "frozen" } else { "live" };
    let events = session.events().all().await?;
    println!("  events ({view}, {}):", events.len());
    for e in &events {
        println!("    [{:.3}] {} {}", e.timestamp, e.author, e.id);
    }
    Ok(())
}
