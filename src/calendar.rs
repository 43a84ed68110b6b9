use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use yup_oauth2::InstalledFlowAuthenticator;

use crate::config::GoogleCalendarConfig;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

// 削除も行うため読み書きスコープが必要
const SCOPES: &[&str] = &["https://www.googleapis.com/auth/calendar"];

/// カレンダーイベント
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// イベントID
    pub id: String,

    /// タイトル
    pub title: String,

    /// 開始時刻
    pub start_time: DateTime<Utc>,

    /// 終了時刻
    pub end_time: DateTime<Utc>,

    /// カレンダーID
    pub calendar_id: String,

    /// 説明
    pub description: Option<String>,
}

/// APIレスポンスのイベントを型付きレコードへ変換する際のエラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventParseError {
    /// 必須フィールドが存在しない
    #[error("event is missing required field '{field}'")]
    MissingField { field: String },

    /// 時刻フィールドの値が解釈できない
    #[error("event field '{field}' has an invalid time value '{value}'")]
    InvalidTime { field: String, value: String },
}

/// カンマ区切りのカレンダーID設定をリストに展開する
///
/// 空の設定はプライマリカレンダーにフォールバックする。
pub fn parse_calendar_ids(raw: &str) -> Vec<String> {
    let ids: Vec<String> = raw
        .split(',')
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
        .collect();

    if ids.is_empty() {
        vec!["primary".to_string()]
    } else {
        ids
    }
}

/// Google Calendar APIのクライアント
pub struct GoogleCalendarClient {
    config: GoogleCalendarConfig,
    client: reqwest::Client,
}

impl GoogleCalendarClient {
    /// 新しいクライアントを作成
    pub fn new(config: GoogleCalendarConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// 設定されたカレンダーIDの一覧
    pub fn calendar_ids(&self) -> Vec<String> {
        parse_calendar_ids(&self.config.calendar_ids)
    }

    /// アクセストークンを取得する
    ///
    /// リフレッシュトークンがあればトークンエンドポイントで更新し、
    /// なければブラウザ認証フローにフォールバックする。
    pub async fn access_token(&self) -> Result<String> {
        if self.config.refresh_token.is_empty() {
            warn!("Refresh token is empty. Browser authentication will be required");
            return self.browser_flow_token().await;
        }

        debug!("Requesting access token using refresh token");

        let form_data = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", self.config.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client
            .post(TOKEN_URL)
            .form(&form_data)
            .send()
            .await
            .context("Failed to send token refresh request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            error!("Token refresh request failed: {} - {}", status, error_text);
            anyhow::bail!("Token refresh request failed with status: {}", status);
        }

        let token_response: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse token response")?;

        token_response
            .get("access_token")
            .and_then(|token| token.as_str())
            .map(|token| token.to_string())
            .ok_or_else(|| anyhow::anyhow!("No access_token in token response"))
    }

    /// ブラウザ認証フローでアクセストークンを取得する
    async fn browser_flow_token(&self) -> Result<String> {
        let secret = yup_oauth2::ApplicationSecret {
            client_id: self.config.client_id.clone(),
            client_secret: self.config.client_secret.clone(),
            auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
            token_uri: TOKEN_URL.to_string(),
            redirect_uris: vec!["http://localhost".to_string()],
            project_id: None,
            client_email: None,
            auth_provider_x509_cert_url: None,
            client_x509_cert_url: None,
        };

        let auth = InstalledFlowAuthenticator::builder(
            secret,
            yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
        )
        .build()
        .await
        .context("Failed to create authenticator")?;

        let token_result = auth
            .token(SCOPES)
            .await
            .context("Failed to obtain access token")?;

        Ok(token_result.token().unwrap_or_default().to_string())
    }

    /// 指定期間のイベント一覧を取得する
    ///
    /// パースできないイベントは警告を出してスキップし、一覧全体は失敗させない。
    pub async fn list_events(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        let token = self.access_token().await?;

        let endpoint = format!(
            "https://www.googleapis.com/calendar/v3/calendars/{}/events",
            urlencoding::encode(calendar_id)
        );

        let mut url = url::Url::parse(&endpoint)?;
        url.query_pairs_mut()
            .append_pair("timeMin", &time_min.to_rfc3339())
            .append_pair("timeMax", &time_max.to_rfc3339())
            .append_pair("singleEvents", "true")
            .append_pair("orderBy", "startTime")
            .append_pair("maxResults", "100");

        debug!("Calendar API URL: {}", url);

        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .context("Failed to send request to Google Calendar API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            error!("Calendar API request failed: {} - {}", status, error_text);
            anyhow::bail!("Calendar API request failed with status: {}", status);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse calendar response")?;

        let mut events = Vec::new();

        if let Some(items) = body.get("items").and_then(|items| items.as_array()) {
            debug!("Retrieved {} events from calendar {}", items.len(), calendar_id);

            for item in items {
                match parse_event(item, calendar_id) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        warn!("Skipping unparsable event in {}: {}", calendar_id, e);
                    }
                }
            }
        } else {
            warn!("No 'items' field in response or not an array");
        }

        Ok(events)
    }

    /// イベントを削除する
    ///
    /// 410 Goneは削除済みとして成功扱いにする。
    pub async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<()> {
        let token = self.access_token().await?;

        let url = format!(
            "https://www.googleapis.com/calendar/v3/calendars/{}/events/{}",
            urlencoding::encode(calendar_id),
            urlencoding::encode(event_id)
        );

        let response = self
            .client
            .delete(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .context("Failed to send delete request")?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::GONE {
            debug!("Deleted event {} from {}", event_id, calendar_id);
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            anyhow::bail!(
                "Failed to delete event {}: HTTP {} - {}",
                event_id,
                status,
                error_text
            )
        }
    }
}

/// APIレスポンスの1イベントを型付きレコードへ変換する
pub fn parse_event(
    item: &serde_json::Value,
    calendar_id: &str,
) -> Result<CalendarEvent, EventParseError> {
    let id = require_str(item, "id")?;
    let title = require_str(item, "summary")?;

    let start_time = parse_event_time(item.get("start"), "start")?;
    let end_time = parse_event_time(item.get("end"), "end")?;

    Ok(CalendarEvent {
        id: id.to_string(),
        title: title.to_string(),
        start_time,
        end_time,
        calendar_id: calendar_id.to_string(),
        description: item
            .get("description")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string()),
    })
}

fn require_str<'a>(
    item: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, EventParseError> {
    item.get(field)
        .and_then(|value| value.as_str())
        .ok_or_else(|| EventParseError::MissingField {
            field: field.to_string(),
        })
}

/// イベントの時刻オブジェクトをUTCの日時に変換する
///
/// 通常イベントは `dateTime`（RFC 3339）、終日イベントは `date` を持つ。
fn parse_event_time(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<DateTime<Utc>, EventParseError> {
    let obj = value.ok_or_else(|| EventParseError::MissingField {
        field: field.to_string(),
    })?;

    if let Some(date_time) = obj.get("dateTime").and_then(|value| value.as_str()) {
        return DateTime::parse_from_rfc3339(date_time)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|_| EventParseError::InvalidTime {
                field: format!("{}.dateTime", field),
                value: date_time.to_string(),
            });
    }

    if let Some(date) = obj.get("date").and_then(|value| value.as_str()) {
        // 終日イベントはUTCの0時として扱う
        return NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| EventParseError::InvalidTime {
                field: format!("{}.date", field),
                value: date.to_string(),
            })
            .and_then(|parsed| {
                parsed
                    .and_hms_opt(0, 0, 0)
                    .map(|naive| naive.and_utc())
                    .ok_or_else(|| EventParseError::InvalidTime {
                        field: format!("{}.date", field),
                        value: date.to_string(),
                    })
            });
    }

    Err(EventParseError::MissingField {
        field: format!("{}.dateTime", field),
    })
}
