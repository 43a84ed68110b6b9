use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};

mod calendar;
mod config;
mod hours;
mod quiz;
mod shift;
mod utils;
mod wizard;

use config::AppConfig;
use wizard::ConfigWizard;

/// Study schedule automation with Google Calendar integration
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// Path to config file (defaults to the XDG config directory)
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Shift every timestamp in an ICS file so the earliest event lands on a target date
    Shift {
        /// Input .ics file
        input: PathBuf,

        /// Target start date (YYYYMMDD)
        #[clap(short, long, value_parser = parse_compact_date)]
        target_date: NaiveDate,

        /// Days added to the target date (e.g. 7 for week B)
        #[clap(short, long, default_value_t = 0)]
        week_offset: i64,

        /// Output file (defaults to Shifted_<input name> next to the input)
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Sum scheduled and completed study hours for a day
    Hours {
        /// Day to summarize (YYYYMMDD, defaults to today)
        #[clap(short, long, value_parser = parse_compact_date)]
        date: Option<NaiveDate>,
    },

    /// Delete all events scheduled on a day from the study calendars
    DeleteToday {
        /// Day to clear (YYYYMMDD, defaults to today)
        #[clap(short, long, value_parser = parse_compact_date)]
        date: Option<NaiveDate>,
    },

    /// Scrape a batch of practice questions and write them as LaTeX
    Quiz {
        /// Output file (defaults to questions.tex in the output directory)
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the interactive configuration wizard
    Wizard,
}

/// YYYYMMDD形式の日付引数をパースする
fn parse_compact_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .map_err(|e| format!("'{}' is not a YYYYMMDD date: {}", s, e))
}

/// アプリケーションのロギングを初期化
fn init_logging() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    Ok(())
}

/// 設定ファイルを読み込む（パス未指定ならXDGの既定の場所）
fn load_app_config(args: &Args) -> Result<AppConfig> {
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => utils::default_config_path()?,
    };

    // 初回実行時はサンプル設定を置いて案内する
    if args.config.is_none() && !config_path.exists() {
        config::generate_sample_config(&config_path)?;
        anyhow::bail!(
            "No config found; wrote a sample to {} (edit it or run `studyplan_rs wizard`)",
            config_path.display()
        );
    }

    config::load_config(&config_path).with_context(|| {
        format!("Failed to load configuration from {}", config_path.display())
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let args = Args::parse();

    // 設定ウィザードは設定ファイルがない状態でも実行できる
    if let Command::Wizard = args.command {
        info!("Starting configuration wizard");
        let wizard = ConfigWizard::new();
        return wizard.run().await;
    }

    info!("Starting studyplan_rs v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Shift {
            ref input,
            target_date,
            week_offset,
            ref output,
        } => run_shift(input, target_date, week_offset, output.as_deref()),
        Command::Hours { date } => run_hours(&load_app_config(&args)?, date).await,
        Command::DeleteToday { date } => run_delete(&load_app_config(&args)?, date).await,
        Command::Quiz { ref output } => {
            run_quiz(&load_app_config(&args)?, output.as_deref()).await
        }
        Command::Wizard => Ok(()), // 上で処理済み
    }
}

/// ICSファイルのタイムスタンプを目標日付に合わせてシフトする
fn run_shift(
    input: &Path,
    target_date: NaiveDate,
    week_offset: i64,
    output: Option<&Path>,
) -> Result<()> {
    let document = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let shifted = shift::shift_timestamps(&document, target_date, week_offset)?;

    let output_path = match output {
        Some(path) => path.to_path_buf(),
        None => default_shift_output(input),
    };

    std::fs::write(&output_path, shifted)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    info!("Shifted timetable written to {}", output_path.display());
    println!("Shifted ICS file generated: {}", output_path.display());

    Ok(())
}

/// デフォルトの出力先は入力と同じディレクトリの Shifted_<名前>
fn default_shift_output(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "timetable.ics".to_string());

    input.with_file_name(format!("Shifted_{}", name))
}

/// 指定日の学習時間を集計して表示する
async fn run_hours(config: &AppConfig, date: Option<NaiveDate>) -> Result<()> {
    let calendar_config = config
        .google_calendar
        .clone()
        .ok_or_else(|| anyhow::anyhow!("google_calendar section is missing from the config file"))?;

    if !utils::check_internet_connection() {
        warn!("No internet connection detected");
    }

    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let (day_start, day_end) = hours::day_bounds(date)?;
    let now = Utc::now();

    let client = calendar::GoogleCalendarClient::new(calendar_config);

    let mut events = Vec::new();
    for calendar_id in client.calendar_ids() {
        let mut fetched = client
            .list_events(&calendar_id, day_start, day_end)
            .await
            .with_context(|| format!("Failed to list events from {}", calendar_id))?;
        events.append(&mut fetched);
    }

    if events.is_empty() {
        println!("No events found for {}.", date);
        return Ok(());
    }

    let summary = hours::summarize(&events, now);

    println!("Total studying hours for {}: {:.2} hours", date, summary.scheduled);
    println!("Total studying hours completed: {:.2} hours", summary.completed);

    Ok(())
}

/// 指定日のイベントを学習用カレンダーから削除する
async fn run_delete(config: &AppConfig, date: Option<NaiveDate>) -> Result<()> {
    let calendar_config = config
        .google_calendar
        .clone()
        .ok_or_else(|| anyhow::anyhow!("google_calendar section is missing from the config file"))?;

    if !utils::check_internet_connection() {
        warn!("No internet connection detected");
    }

    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let (day_start, day_end) = hours::day_bounds(date)?;

    let client = calendar::GoogleCalendarClient::new(calendar_config);

    let mut deleted = 0usize;
    let mut failed = 0usize;

    for calendar_id in client.calendar_ids() {
        let events = client
            .list_events(&calendar_id, day_start, day_end)
            .await
            .with_context(|| format!("Failed to list events from {}", calendar_id))?;

        if events.is_empty() {
            info!("No events found in {} for {}", calendar_id, date);
            continue;
        }

        // 1件の失敗で残りの削除を止めない
        for event in events {
            match client.delete_event(&calendar_id, &event.id).await {
                Ok(()) => {
                    info!("Deleted event: {} scheduled for {}", event.title, date);
                    deleted += 1;
                }
                Err(e) => {
                    error!("An error occurred while deleting event {}: {}", event.title, e);
                    failed += 1;
                }
            }
        }
    }

    println!("Deleted {} events ({} failed).", deleted, failed);

    Ok(())
}

/// 演習問題を取得してLaTeXファイルに書き出す
async fn run_quiz(config: &AppConfig, output: Option<&Path>) -> Result<()> {
    let quiz_config = config
        .quiz
        .clone()
        .ok_or_else(|| anyhow::anyhow!("quiz section is missing from the config file"))?;

    if !utils::check_internet_connection() {
        warn!("No internet connection detected");
    }

    let client = quiz::QuizClient::new(quiz_config)?;
    let questions = client.fetch_questions().await?;

    if questions.is_empty() {
        warn!("No questions found in the response page");
    }

    let latex = quiz::format_latex(&questions);

    let output_path = match output {
        Some(path) => path.to_path_buf(),
        None => {
            let dir = PathBuf::from(&config.general.output_dir);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
            dir.join("questions.tex")
        }
    };

    std::fs::write(&output_path, latex)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    println!("Questions saved to {}", output_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_date_parses() {
        let date = parse_compact_date("20250310").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
    }

    #[test]
    fn compact_date_rejects_dashes() {
        assert!(parse_compact_date("2025-03-10").is_err());
    }

    #[test]
    fn shift_output_defaults_next_to_input() {
        let output = default_shift_output(Path::new("/tmp/timetable.ics"));
        assert_eq!(output, PathBuf::from("/tmp/Shifted_timetable.ics"));
    }
}
