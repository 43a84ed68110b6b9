use anyhow::{Context, Result};
use serde::Deserialize;
use serde::Serialize;
use std::fs::read_to_string;
use std::path::Path;

/// アプリケーション全体の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// アプリケーション全般の設定
    pub general: GeneralConfig,

    /// Google Calendar API の設定（オプション）
    pub google_calendar: Option<GoogleCalendarConfig>,

    /// 演習問題サイトの設定（オプション）
    pub quiz: Option<QuizConfig>,
}

/// 一般設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// 生成ファイル（questions.tex など）の出力先ディレクトリ
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

/// Google Calendar API 設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleCalendarConfig {
    /// クライアントID
    pub client_id: String,

    /// クライアントシークレット
    pub client_secret: String,

    /// リフレッシュトークン
    pub refresh_token: String,

    /// 学習用カレンダーID（カンマ区切りで複数指定可能）
    pub calendar_ids: String,
}

/// 演習問題サイト設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizConfig {
    /// ログイン用メールアドレス
    pub email: String,

    /// ログイン用パスワード
    pub password: String,

    /// ログインページのURL
    #[serde(default = "default_login_url")]
    pub login_url: String,

    /// 演習問題リクエスト先のURL
    #[serde(default = "default_questions_url")]
    pub questions_url: String,

    /// 出題セクション
    #[serde(default = "default_section")]
    pub section: String,

    /// 出題科目
    #[serde(default = "default_subject")]
    pub subject: String,

    /// 1回あたりの出題数
    #[serde(default = "default_question_count")]
    pub question_count: u32,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            password: String::new(),
            login_url: default_login_url(),
            questions_url: default_questions_url(),
            section: default_section(),
            subject: default_subject(),
            question_count: default_question_count(),
        }
    }
}

// デフォルト値
fn default_output_dir() -> String {
    "./output".to_string()
}

fn default_login_url() -> String {
    "https://tmua.exams.ninja/login".to_string()
}

fn default_questions_url() -> String {
    "https://tmua.exams.ninja/practice-dojo/practice".to_string()
}

fn default_section() -> String {
    "2".to_string()
}

fn default_subject() -> String {
    "2".to_string()
}

fn default_question_count() -> u32 {
    35 // サイト側の1回あたりの上限
}

/// 設定ファイルを読み込む
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let config_str = read_to_string(path)
        .context("Failed to read config file")?;

    let config: AppConfig = toml::from_str(&config_str)
        .context("Failed to parse config file")?;

    Ok(config)
}

/// デフォルトの設定を作成する
pub fn create_default_config() -> AppConfig {
    AppConfig {
        general: GeneralConfig {
            output_dir: default_output_dir(),
        },
        google_calendar: None,
        quiz: None,
    }
}

/// サンプル設定ファイルを作成する
pub fn generate_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let config = create_default_config();
    let toml_str = toml::to_string_pretty(&config)
        .context("Failed to serialize config")?;

    std::fs::write(path, toml_str)
        .context("Failed to write sample config file")?;

    Ok(())
}
