//! Read-only statistics over the cache
//!
//! Every query skips tombstoned rows. `since` bounds the message date;
//! hour and weekday buckets are taken in UTC.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use rusqlite::{Connection, params};

use super::PersistentStore;
use super::codec::ts;
use crate::error::ValidationError;
use crate::models::{
    AnalyticsOverview, DailyCount, HourlyCount, ResponseStats, SenderStats, WeekdayCount,
};

/// `%w` numbering: Sunday is 0
const WEEKDAYS: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

/// Date lower bound; the empty string sorts before every stored date.
fn cutoff(since: Option<DateTime<Utc>>) -> String {
    since.as_ref().map(ts).unwrap_or_default()
}

/// Counts grouped by one `strftime` bucket.
fn bucket_counts(
    conn: &Connection,
    account_id: i64,
    since: Option<DateTime<Utc>>,
    format: &str,
) -> Result<Vec<(i64, usize)>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT CAST(strftime(?3, date) AS INTEGER) AS bucket, COUNT(*)
        FROM emails
        WHERE account_id = ?1 AND is_deleted = 0 AND date >= ?2
        GROUP BY bucket
        HAVING bucket IS NOT NULL
        ORDER BY bucket
        "#,
    )?;
    let rows = stmt
        .query_map(params![account_id, cutoff(since), format], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as usize))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

impl PersistentStore {
    /// Headline numbers for an account, read in one statement.
    pub fn analytics_overview(&self, account_id: i64) -> Result<AnalyticsOverview> {
        self.with_conn(|conn| {
            let overview = conn.query_row(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM emails
                     WHERE account_id = ?1 AND is_deleted = 0),
                    (SELECT COUNT(*) FROM emails
                     WHERE account_id = ?1 AND is_deleted = 0 AND is_archived = 0
                       AND is_read = 0),
                    (SELECT COUNT(*) FROM emails
                     WHERE account_id = ?1 AND is_deleted = 0 AND is_starred = 1),
                    (SELECT COUNT(*) FROM emails
                     WHERE account_id = ?1 AND is_deleted = 0 AND is_archived = 1),
                    (SELECT COUNT(*) FROM sent_emails WHERE account_id = ?1),
                    (SELECT COUNT(*) FROM drafts
                     WHERE account_id = ?1 AND status IN ('draft', 'scheduled')),
                    (SELECT COALESCE(SUM(size), 0) FROM emails
                     WHERE account_id = ?1 AND is_deleted = 0)
                "#,
                [account_id],
                |row| {
                    Ok(AnalyticsOverview {
                        total_emails: row.get::<_, i64>(0)? as usize,
                        unread_emails: row.get::<_, i64>(1)? as usize,
                        starred_emails: row.get::<_, i64>(2)? as usize,
                        archived_emails: row.get::<_, i64>(3)? as usize,
                        sent_emails: row.get::<_, i64>(4)? as usize,
                        draft_count: row.get::<_, i64>(5)? as usize,
                        storage_bytes: row.get(6)?,
                    })
                },
            )?;
            Ok(overview)
        })
    }

    /// Senders with the most visible emails, busiest first.
    pub fn top_senders(
        &self,
        account_id: i64,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<SenderStats>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT from_email,
                       COALESCE(NULLIF(MAX(from_name), ''), from_email),
                       COUNT(*) AS total,
                       SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END)
                FROM emails
                WHERE account_id = ?1 AND is_deleted = 0 AND is_archived = 0 AND date >= ?2
                GROUP BY from_email COLLATE NOCASE
                ORDER BY total DESC, from_email ASC
                LIMIT ?3
                "#,
            )?;
            let senders = stmt
                .query_map(params![account_id, cutoff(since), limit as i64], |row| {
                    Ok(SenderStats {
                        email: row.get(0)?,
                        name: row.get(1)?,
                        count: row.get::<_, i64>(2)? as usize,
                        unread: row.get::<_, i64>(3)? as usize,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(senders)
        })
    }

    /// Emails per hour of day. Always 24 entries, hour 0 first.
    pub fn email_count_by_hour(
        &self,
        account_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<HourlyCount>> {
        let buckets = self.with_conn(|conn| bucket_counts(conn, account_id, since, "%H"))?;
        let mut hours: Vec<HourlyCount> =
            (0..24).map(|hour| HourlyCount { hour, count: 0 }).collect();
        for (hour, count) in buckets {
            if let Some(slot) = usize::try_from(hour).ok().and_then(|h| hours.get_mut(h)) {
                slot.count = count;
            }
        }
        Ok(hours)
    }

    /// Emails per weekday. Always 7 entries, Sunday first.
    pub fn email_count_by_weekday(
        &self,
        account_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WeekdayCount>> {
        let buckets = self.with_conn(|conn| bucket_counts(conn, account_id, since, "%w"))?;
        let mut days: Vec<WeekdayCount> = WEEKDAYS
            .iter()
            .map(|&weekday| WeekdayCount { weekday, count: 0 })
            .collect();
        for (day, count) in buckets {
            if let Some(slot) = usize::try_from(day).ok().and_then(|d| days.get_mut(d)) {
                slot.count = count;
            }
        }
        Ok(days)
    }

    /// Emails per calendar day (UTC), most recent `limit` days with mail.
    pub fn email_count_by_day(
        &self,
        account_id: i64,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<DailyCount>> {
        let rows: Vec<(String, usize)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT strftime('%Y-%m-%d', date) AS day, COUNT(*)
                FROM emails
                WHERE account_id = ?1 AND is_deleted = 0 AND date >= ?2
                GROUP BY day
                HAVING day IS NOT NULL
                ORDER BY day DESC
                LIMIT ?3
                "#,
            )?;
            let rows = stmt
                .query_map(params![account_id, cutoff(since), limit as i64], |row| {
                    Ok((row.get(0)?, row.get::<_, i64>(1)? as usize))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(day, count)| -> Result<DailyCount> {
                let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                    .map_err(|_| ValidationError::Timestamp(day))?;
                Ok(DailyCount { date, count })
            })
            .collect()
    }

    /// Reply latency from the sent log and reply rate from the replied flag.
    pub fn response_stats(&self, account_id: i64) -> Result<ResponseStats> {
        self.with_conn(|conn| {
            let avg: f64 = conn.query_row(
                r#"
                SELECT COALESCE(AVG((julianday(s.sent_at) - julianday(e.date)) * 24 * 60), 0)
                FROM sent_emails s
                JOIN emails e ON e.id = s.reply_to_email_id
                WHERE s.account_id = ?1
                "#,
                [account_id],
                |row| row.get(0),
            )?;
            let (received, replied): (i64, i64) = conn.query_row(
                r#"
                SELECT COUNT(*), COALESCE(SUM(is_replied), 0)
                FROM emails
                WHERE account_id = ?1 AND is_deleted = 0
                "#,
                [account_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let response_rate = if received > 0 {
                replied as f64 / received as f64 * 100.0
            } else {
                0.0
            };
            Ok(ResponseStats {
                avg_response_minutes: avg,
                response_rate,
                replied: replied as usize,
                received: received as usize,
            })
        })
    }
}
