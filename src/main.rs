//! Infinite Research Lab - 命令行 REPL
//!
//! 入口：初始化日志、按配置构建实验室，逐行读取 stdin。
//! 普通输入作为新请求提交（抢占当前运行）；命令：/pause /resume /status /threads /thread <id> /ingest <path> /quit

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use infinite::config::load_config;
use infinite::core::{RunEvent, RunOutcome};
use infinite::{observability, LabBuilder, Orchestrator};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

fn print_event(event: RunEvent) {
    match event {
        RunEvent::UserEcho { .. } => {}
        RunEvent::Log { sender, content } => println!("[{}] {}", sender, content),
        RunEvent::ArtifactUpdate { key, content } => {
            println!("[artifact] {} updated ({} chars)", key, content.chars().count())
        }
        RunEvent::Error { message } => eprintln!("[error] {}", message),
        RunEvent::Cancelled { message } => println!("[paused] {}", message),
        RunEvent::Done { status } => println!("[done] {}", status),
    }
}

async fn print_status(lab: &Orchestrator, thread_id: &str) {
    match lab.snapshot(thread_id).await {
        Ok(Some(view)) => {
            println!(
                "thread {} | {} | step {}/{} | rejections {}",
                view.thread_id,
                view.phase,
                (view.current_step_index + 1).min(view.plan.len()),
                view.plan.len(),
                view.iteration_count
            );
            for (i, step) in view.plan.iter().enumerate() {
                println!("  {}. [{:?}] {} ({})", i + 1, step.status, step.title, step.assigned_worker);
            }
        }
        Ok(None) => println!("thread {} has no state yet", thread_id),
        Err(e) => eprintln!("[error] {}", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::var("INFINITE_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        Default::default()
    });

    let lab = Arc::new(
        LabBuilder::from_config(&cfg)
            .await
            .context("Failed to assemble lab")?
            .build()
            .context("Failed to build orchestrator")?,
    );

    let mut thread_id = std::env::args()
        .skip_while(|a| a != "--thread")
        .nth(1)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    println!("{} | thread {}", cfg.app.name, thread_id);
    println!("Type a research request. Commands: /pause /resume /status /threads /thread <id> /ingest <path> /quit");

    let (tx, mut rx) = mpsc::unbounded_channel::<RunEvent>();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(event) = rx.recv() => print_event(event),
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let (cmd, arg) = match input.split_once(' ') {
                    Some((c, a)) => (c, a.trim()),
                    None => (input, ""),
                };
                match cmd {
                    "/quit" | "/exit" => break,
                    "/pause" => {
                        if !lab.cancel(&thread_id).await {
                            println!("nothing is running");
                        }
                    }
                    "/status" => print_status(&lab, &thread_id).await,
                    "/threads" => match lab.threads().await {
                        Ok(threads) => {
                            for t in threads {
                                println!("{}  v{}  {}", t.thread_id, t.latest_version, t.updated_at);
                            }
                        }
                        Err(e) => eprintln!("[error] {}", e),
                    },
                    "/thread" if !arg.is_empty() => {
                        thread_id = arg.to_string();
                        println!("switched to thread {}", thread_id);
                    }
                    "/ingest" if !arg.is_empty() => match lab.ingest(&[PathBuf::from(arg)]).await {
                        Ok(s) => println!("indexed {} files ({} chunks)", s.files, s.chunks),
                        Err(e) => eprintln!("[error] {}", e),
                    },
                    "/resume" => {
                        let lab = lab.clone();
                        let thread = thread_id.clone();
                        let events = tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = lab.resume(&thread, Some(events)).await {
                                eprintln!("[error] {}", e);
                            }
                        });
                    }
                    _ => {
                        let lab = lab.clone();
                        let thread = thread_id.clone();
                        let events = tx.clone();
                        let message = input.to_string();
                        tokio::spawn(async move {
                            match lab.submit(&thread, &message, Some(events)).await {
                                Ok(reply) if reply.outcome == RunOutcome::Completed => {
                                    println!("\n{}\n", reply.reply);
                                }
                                Ok(_) => {}
                                Err(e) => eprintln!("[error] {}", e),
                            }
                        });
                    }
                }
            }
        }
    }

    Ok(())
}
