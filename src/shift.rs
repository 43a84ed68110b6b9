use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

/// ICSファイル内のタイムスタンプ形式（YYYYMMDDTHHMMSS）
const TIMESTAMP_PATTERN: &str = r"\d{8}T\d{6}";

/// chrono用のパース・整形フォーマット
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// タイムスタンプシフト処理のエラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShiftError {
    /// 文書にタイムスタンプが1つも含まれていない（デルタが計算できない）
    #[error("no timestamps in YYYYMMDDTHHMMSS format found in the document")]
    NoTimestampsFound,

    /// 字句的にはパターンに一致するが、暦として存在しない日付・時刻
    #[error("'{token}' is not a valid calendar date/time")]
    InvalidDate { token: String },

    /// タイムスタンプ形式に一致しない入力（正しいパターンでは通常起こらない）
    #[error("'{token}' does not match the YYYYMMDDTHHMMSS format")]
    InvalidFormat { token: String },
}

fn timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TIMESTAMP_PATTERN).expect("timestamp pattern is valid"))
}

/// トークンがYYYYMMDDTHHMMSSの形をしているかどうか
fn is_token_shape(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() == 15
        && bytes[8] == b'T'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 8 || b.is_ascii_digit())
}

/// 単一のタイムスタンプトークンをパースする
pub fn parse_timestamp(token: &str) -> Result<NaiveDateTime, ShiftError> {
    if !is_token_shape(token) {
        return Err(ShiftError::InvalidFormat {
            token: token.to_string(),
        });
    }

    // 形は正しいので、ここで失敗するのは2月31日のような存在しない日付
    NaiveDateTime::parse_from_str(token, TIMESTAMP_FORMAT).map_err(|_| ShiftError::InvalidDate {
        token: token.to_string(),
    })
}

/// 文書中の全タイムスタンプを一定のデルタでシフトした文書を返す
///
/// 最も早いタイムスタンプの時刻を `target_date + week_offset_days` 日に
/// 合成した日時をアンカーとし、アンカーまでのデルタを全トークンに
/// 一律に適用する。イベント同士の相対的な間隔は変わらない。
/// タイムスタンプ以外のテキストはそのままコピーされる。
pub fn shift_timestamps(
    document: &str,
    target_date: NaiveDate,
    week_offset_days: i64,
) -> Result<String, ShiftError> {
    let re = timestamp_regex();

    // 置換前に全トークンをパースして検証する（置換クロージャはエラーを返せない）
    let mut parsed: HashMap<&str, NaiveDateTime> = HashMap::new();
    for found in re.find_iter(document) {
        let token = found.as_str();
        if !parsed.contains_key(token) {
            let value = parse_timestamp(token)?;
            parsed.insert(token, value);
        }
    }

    let earliest = parsed
        .values()
        .min()
        .copied()
        .ok_or(ShiftError::NoTimestampsFound)?;

    // ターゲット日付に最早イベントの時刻を合成してアンカーを作る
    // （ターゲット側の時刻成分は持たない）
    let anchor_date = target_date
        .checked_add_signed(Duration::days(week_offset_days))
        .ok_or_else(|| ShiftError::InvalidDate {
            token: format!("{} + {} days", target_date, week_offset_days),
        })?;
    let anchor = anchor_date.and_time(earliest.time());
    let delta = anchor - earliest;

    // シフト後のトークンを先に計算する
    let mut shifted: HashMap<&str, String> = HashMap::with_capacity(parsed.len());
    for (&token, &value) in &parsed {
        let moved = value
            .checked_add_signed(delta)
            .ok_or_else(|| ShiftError::InvalidDate {
                token: token.to_string(),
            })?;

        // 4桁年で表現できない値は固定幅フォーマットを壊すので拒否する
        if !(0..=9999).contains(&moved.year()) {
            return Err(ShiftError::InvalidDate {
                token: format!("{}", moved.format("%Y-%m-%dT%H:%M:%S")),
            });
        }

        shifted.insert(token, moved.format(TIMESTAMP_FORMAT).to_string());
    }

    let result = re.replace_all(document, |caps: &regex::Captures<'_>| {
        let token = &caps[0];
        // 全マッチはパース済みなので必ず見つかる
        shifted
            .get(token)
            .cloned()
            .unwrap_or_else(|| token.to_string())
    });

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn shifts_all_tokens_by_the_same_delta() {
        let doc = "DTSTART:20240101T090000\nDTEND:20240102T100000\n";
        let result = shift_timestamps(doc, date(2025, 3, 10), 0).unwrap();

        // アンカーは 2025-03-10T09:00:00、1日+1時間の間隔は保存される
        assert_eq!(result, "DTSTART:20250310T090000\nDTEND:20250311T100000\n");
    }

    #[test]
    fn week_offset_adds_exactly_seven_days() {
        let doc = "20240101T090000 20240102T100000";
        let week_a = shift_timestamps(doc, date(2025, 3, 10), 0).unwrap();
        let week_b = shift_timestamps(doc, date(2025, 3, 10), 7).unwrap();

        assert_eq!(week_a, "20250310T090000 20250311T100000");
        assert_eq!(week_b, "20250317T090000 20250318T100000");
    }

    #[test]
    fn round_trip_restores_the_original_document() {
        let doc = "BEGIN:VEVENT\nDTSTART:20240916T083000\nDTEND:20240916T101500\nEND:VEVENT\n\
                   BEGIN:VEVENT\nDTSTART:20240918T140000\nDTEND:20240918T160000\nEND:VEVENT\n";

        let shifted = shift_timestamps(doc, date(2025, 3, 10), 0).unwrap();
        assert_ne!(shifted, doc);

        // 元の最早日付に戻すと完全に一致する
        let restored = shift_timestamps(&shifted, date(2024, 9, 16), 0).unwrap();
        assert_eq!(restored, doc);
    }

    #[test]
    fn preserves_ordering_and_surrounding_text() {
        let doc = "X-FIRST;20240301T070000|middle text|X-SECOND;20240301T191500;tail";
        let result = shift_timestamps(doc, date(2024, 6, 1), 0).unwrap();

        assert_eq!(result, "X-FIRST;20240601T070000|middle text|X-SECOND;20240601T191500;tail");
        assert_eq!(result.len(), doc.len());

        let first = parse_timestamp("20240601T070000").unwrap();
        let second = parse_timestamp("20240601T191500").unwrap();
        assert!(first < second);
    }

    #[test]
    fn duplicate_tokens_shift_identically() {
        let doc = "20240101T120000 and again 20240101T120000";
        let result = shift_timestamps(doc, date(2024, 1, 2), 0).unwrap();
        assert_eq!(result, "20240102T120000 and again 20240102T120000");
    }

    #[test]
    fn negative_week_offset_moves_backwards() {
        let doc = "20240110T080000";
        let result = shift_timestamps(doc, date(2024, 1, 10), -7).unwrap();
        assert_eq!(result, "20240103T080000");
    }

    #[test]
    fn empty_document_has_no_timestamps() {
        let err = shift_timestamps("no dates here", date(2025, 1, 1), 0).unwrap_err();
        assert_eq!(err, ShiftError::NoTimestampsFound);
    }

    #[test]
    fn impossible_date_is_rejected() {
        let err = shift_timestamps("DTSTART:20240231T000000", date(2025, 1, 1), 0).unwrap_err();
        assert_eq!(
            err,
            ShiftError::InvalidDate {
                token: "20240231T000000".to_string()
            }
        );
    }

    #[test]
    fn impossible_time_is_rejected() {
        let err = parse_timestamp("20240101T250000").unwrap_err();
        assert!(matches!(err, ShiftError::InvalidDate { .. }));
    }

    #[test]
    fn malformed_token_is_invalid_format() {
        let err = parse_timestamp("2024-01-01T09:00").unwrap_err();
        assert!(matches!(err, ShiftError::InvalidFormat { .. }));
    }

    #[test]
    fn shift_past_year_9999_is_rejected() {
        let err = shift_timestamps("99990101T000000", date(9999, 12, 31), 7).unwrap_err();
        assert!(matches!(err, ShiftError::InvalidDate { .. }));
    }
}
