use anyhow::Result;
use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};

use crate::calendar::CalendarEvent;

/// 1日分の学習時間の集計結果
#[derive(Debug, Clone, PartialEq)]
pub struct HoursSummary {
    /// その日に予定されている合計時間
    pub scheduled: f64,

    /// 現在時刻までに完了した合計時間
    pub completed: f64,
}

/// 予定されている学習時間の合計（時間単位）
pub fn scheduled_hours(events: &[CalendarEvent]) -> f64 {
    events
        .iter()
        .map(|event| duration_hours(event.start_time, event.end_time))
        .sum()
}

/// 完了済みの学習時間の合計（時間単位）
///
/// 判定に使う現在時刻は引数で受け取る。終了済みのイベントだけを数える。
pub fn completed_hours(events: &[CalendarEvent], now: DateTime<Utc>) -> f64 {
    events
        .iter()
        .filter(|event| event.end_time <= now)
        .map(|event| duration_hours(event.start_time, event.end_time))
        .sum()
}

/// 2つの集計をまとめて行う
pub fn summarize(events: &[CalendarEvent], now: DateTime<Utc>) -> HoursSummary {
    HoursSummary {
        scheduled: scheduled_hours(events),
        completed: completed_hours(events, now),
    }
}

fn duration_hours(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_seconds() as f64 / 3600.0
}

/// ローカルタイムゾーンでの1日の範囲をUTCで返す
///
/// 0:00:00から翌日0:00:00の直前まで。夏時間の切り替えで存在しない・
/// 曖昧なローカル時刻になる場合は、それぞれ早い方・遅い方を採用する。
pub fn day_bounds(date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start_naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("invalid day start for {}", date))?;
    let end_naive = start_naive + Duration::days(1) - Duration::seconds(1);

    let start = Local
        .from_local_datetime(&start_naive)
        .earliest()
        .ok_or_else(|| anyhow::anyhow!("day start {} does not exist locally", start_naive))?;
    let end = Local
        .from_local_datetime(&end_naive)
        .latest()
        .ok_or_else(|| anyhow::anyhow!("day end {} does not exist locally", end_naive))?;

    Ok((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn utc(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn event(start: &str, end: &str) -> CalendarEvent {
        CalendarEvent {
            id: "e1".to_string(),
            title: "Maths".to_string(),
            start_time: utc(start),
            end_time: utc(end),
            calendar_id: "study".to_string(),
            description: None,
        }
    }

    #[test]
    fn scheduled_hours_sums_all_events() {
        let events = vec![
            event("2024-05-01 09:00:00", "2024-05-01 10:30:00"),
            event("2024-05-01 14:00:00", "2024-05-01 16:00:00"),
        ];
        assert_eq!(scheduled_hours(&events), 3.5);
    }

    #[test]
    fn scheduled_hours_of_empty_set_is_zero() {
        assert_eq!(scheduled_hours(&[]), 0.0);
    }

    #[test]
    fn completed_hours_only_counts_finished_events() {
        let events = vec![
            event("2024-05-01 09:00:00", "2024-05-01 10:00:00"),
            event("2024-05-01 14:00:00", "2024-05-01 16:00:00"),
        ];

        // 午前のセッションだけが終わっている
        let now = utc("2024-05-01 12:00:00");
        assert_eq!(completed_hours(&events, now), 1.0);
    }

    #[test]
    fn event_ending_exactly_now_counts_as_completed() {
        let events = vec![event("2024-05-01 09:00:00", "2024-05-01 10:00:00")];
        let now = utc("2024-05-01 10:00:00");
        assert_eq!(completed_hours(&events, now), 1.0);
    }

    #[test]
    fn in_progress_event_is_not_completed() {
        let events = vec![event("2024-05-01 09:00:00", "2024-05-01 11:00:00")];
        let now = utc("2024-05-01 10:00:00");
        assert_eq!(completed_hours(&events, now), 0.0);
        assert_eq!(scheduled_hours(&events), 2.0);
    }

    #[test]
    fn summarize_combines_both_totals() {
        let events = vec![
            event("2024-05-01 09:00:00", "2024-05-01 10:00:00"),
            event("2024-05-01 20:00:00", "2024-05-01 22:00:00"),
        ];
        let summary = summarize(&events, utc("2024-05-01 12:00:00"));
        assert_eq!(
            summary,
            HoursSummary {
                scheduled: 3.0,
                completed: 1.0
            }
        );
    }

    #[test]
    fn day_bounds_spans_one_day() {
        let (start, end) = day_bounds(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()).unwrap();
        assert!(start < end);
        // 23時間59分59秒（夏時間切替日は前後1時間ずれる）
        let span = end - start;
        assert!(span >= Duration::hours(22));
        assert!(span <= Duration::hours(25));
    }
}
