use anyhow::{Context, Result};
use clap::Parser;
use colored::control as color_control;
use keel::cli::commands::apply::{ApplyCommand, ApplyCommandHandler};
use keel::cli::commands::create::{CreateCommand, CreateCommandHandler};
use keel::cli::commands::init::{InitCommand, InitCommandHandler};
use keel::cli::commands::rollback::{RollbackCommand, RollbackCommandHandler};
use keel::cli::commands::status::{StatusCommand, StatusCommandHandler};
use keel::cli::{exit_code, Cli, Commands};
use keel::core::config::Dialect;
use std::env;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    sqlx::any::install_default_drivers();

    // CLIをパースして実行
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // 非同期ランタイムを作成して実行
    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create Tokio runtime")
        .unwrap_or_else(|e| {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        });

    let result = runtime.block_on(run_command(cli));

    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(exit_code(&e));
        }
    }
}

/// トレーシングを初期化する
///
/// RUST_LOG が設定されていればそれを優先し、なければ --verbose で debug、通常は warn。
/// ログは標準エラー出力に書き出し、標準出力はコマンド結果専用にする。
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "keel=debug,info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// コマンドを実行する
async fn run_command(cli: Cli) -> Result<String> {
    // --no-color フラグの処理
    if cli.no_color {
        color_control::set_override(false);
    }

    // プロジェクトのルートパスを取得
    let project_path = env::current_dir()?;

    // --config フラグの処理（絶対パスに変換）
    let config_path: Option<PathBuf> = cli.config.map(|p| {
        if p.is_absolute() {
            p
        } else {
            project_path.join(p)
        }
    });

    let format = cli.format;

    match cli.command {
        Commands::Init { dialect, force } => {
            let dialect: Dialect = dialect.parse()?;
            let handler = InitCommandHandler::new();
            let command = InitCommand {
                project_path,
                dialect,
                force,
                format,
            };
            handler.execute(&command)
        }

        Commands::Create { name } => {
            let handler = CreateCommandHandler::new();
            let command = CreateCommand {
                project_path,
                config_path,
                name,
                format,
            };
            handler.execute(&command)
        }

        Commands::Apply { env, lock_timeout } => {
            let handler = ApplyCommandHandler::new();
            let command = ApplyCommand {
                project_path,
                config_path,
                env,
                lock_timeout,
                format,
            };
            handler.execute(&command).await
        }

        Commands::Rollback { env, lock_timeout } => {
            let handler = RollbackCommandHandler::new();
            let command = RollbackCommand {
                project_path,
                config_path,
                env,
                lock_timeout,
                format,
            };
            handler.execute(&command).await
        }

        Commands::Status { env } => {
            let handler = StatusCommandHandler::new();
            let command = StatusCommand {
                project_path,
                config_path,
                env,
                format,
            };
            handler.execute(&command).await
        }
    }
}
