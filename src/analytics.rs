use std::collections::BTreeMap;

use bigdecimal::BigDecimal;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::dsl::{count_star, sum};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;

use crate::auth::ROLE_CLIENT;
use crate::error::AppResult;
use crate::loan::{money_to_f64, LoanStatus};
use crate::notifications;
use crate::schema::{loans, notifications as notifications_table, users};

#[derive(Debug, Serialize)]
pub struct Kpis {
    pub total_loans: i64,
    pub open_loans: i64,
    pub active_clients: i64,
    pub total_amount: f64,
    pub average_amount: f64,
    pub approval_rate: f64,
    pub monthly_growth: f64,
}

#[derive(Debug, Serialize)]
pub struct MonthBucket {
    pub month: String,
    pub submitted: i64,
    pub approved: i64,
    pub rejected: i64,
}

#[derive(Debug, Serialize)]
pub struct LoanStats {
    pub by_status: BTreeMap<String, i64>,
    pub by_amount_range: BTreeMap<String, i64>,
    pub by_duration: BTreeMap<String, i64>,
    pub monthly: Vec<MonthBucket>,
}

#[derive(Debug, Serialize)]
pub struct NotificationStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_channel: BTreeMap<String, i64>,
    pub failed_last_24h: i64,
}

const OPEN_STATUSES: [&str; 5] = [
    "pending",
    "under_review",
    "documents_requested",
    "approved",
    "active",
];

pub fn kpis(conn: &mut PgConnection) -> AppResult<Kpis> {
    let total_loans: i64 = loans::table.select(count_star()).first(conn)?;

    let open_loans: i64 = loans::table
        .filter(loans::status.eq_any(OPEN_STATUSES))
        .select(count_star())
        .first(conn)?;

    let active_clients: i64 = users::table
        .filter(users::role.eq(ROLE_CLIENT))
        .filter(users::is_active.eq(true))
        .select(count_star())
        .first(conn)?;

    let total_amount: Option<BigDecimal> = loans::table
        .filter(loans::status.ne(LoanStatus::Rejected.as_str()))
        .select(sum(loans::amount))
        .first(conn)?;
    let total_amount = total_amount.as_ref().map(money_to_f64).unwrap_or(0.0);

    let counted = total_loans.max(0) as f64;
    let average_amount = if total_loans > 0 {
        total_amount / counted
    } else {
        0.0
    };

    let approved: i64 = loans::table
        .filter(loans::status.eq_any(["approved", "active", "completed"]))
        .select(count_star())
        .first(conn)?;
    let rejected: i64 = loans::table
        .filter(loans::status.eq(LoanStatus::Rejected.as_str()))
        .select(count_star())
        .first(conn)?;
    let decided = approved + rejected;
    let approval_rate = if decided > 0 {
        approved as f64 * 100.0 / decided as f64
    } else {
        0.0
    };

    let now = Utc::now().naive_utc();
    let this_month_start = month_start(now);
    let last_month_start = month_start(this_month_start - ChronoDuration::days(1));

    let this_month: i64 = loans::table
        .filter(loans::created_at.ge(this_month_start))
        .select(count_star())
        .first(conn)?;
    let last_month: i64 = loans::table
        .filter(loans::created_at.ge(last_month_start))
        .filter(loans::created_at.lt(this_month_start))
        .select(count_star())
        .first(conn)?;
    let monthly_growth = if last_month > 0 {
        (this_month - last_month) as f64 * 100.0 / last_month as f64
    } else if this_month > 0 {
        100.0
    } else {
        0.0
    };

    Ok(Kpis {
        total_loans,
        open_loans,
        active_clients,
        total_amount,
        average_amount,
        approval_rate,
        monthly_growth,
    })
}

pub fn loan_stats(conn: &mut PgConnection) -> AppResult<LoanStats> {
    let by_status: BTreeMap<String, i64> = loans::table
        .group_by(loans::status)
        .select((loans::status, count_star()))
        .load::<(String, i64)>(conn)?
        .into_iter()
        .collect();

    // Range and month bucketing stay in Rust; the table is small enough and
    // the buckets do not map onto SQL expressions diesel can type.
    let rows: Vec<(BigDecimal, i32, String, NaiveDateTime)> = loans::table
        .select((
            loans::amount,
            loans::duration_months,
            loans::status,
            loans::created_at,
        ))
        .load(conn)?;

    let mut by_amount_range = BTreeMap::new();
    let mut by_duration = BTreeMap::new();
    for (amount, duration, _, _) in &rows {
        let amount = money_to_f64(amount);
        let range = match amount {
            a if a < 5_000.0 => "0-5000",
            a if a < 15_000.0 => "5000-15000",
            a if a < 30_000.0 => "15000-30000",
            a if a < 50_000.0 => "30000-50000",
            _ => "50000+",
        };
        *by_amount_range.entry(range.to_string()).or_insert(0) += 1;

        let band = match duration {
            d if *d <= 12 => "<=12",
            d if *d <= 36 => "13-36",
            d if *d <= 60 => "37-60",
            _ => ">60",
        };
        *by_duration.entry(band.to_string()).or_insert(0) += 1;
    }

    let monthly = monthly_evolution(&rows);

    Ok(LoanStats {
        by_status,
        by_amount_range,
        by_duration,
        monthly,
    })
}

/// One bucket per month over the trailing twelve, oldest first. Empty months
/// still appear so chart axes stay stable.
fn monthly_evolution(rows: &[(BigDecimal, i32, String, NaiveDateTime)]) -> Vec<MonthBucket> {
    let now = Utc::now().naive_utc();
    let mut months: Vec<(i32, u32)> = Vec::with_capacity(12);
    let mut year = now.year();
    let mut month = now.month();
    for _ in 0..12 {
        months.push((year, month));
        if month == 1 {
            month = 12;
            year -= 1;
        } else {
            month -= 1;
        }
    }
    months.reverse();

    let mut buckets: BTreeMap<(i32, u32), MonthBucket> = months
        .iter()
        .map(|&(y, m)| {
            (
                (y, m),
                MonthBucket {
                    month: format!("{y:04}-{m:02}"),
                    submitted: 0,
                    approved: 0,
                    rejected: 0,
                },
            )
        })
        .collect();

    for (_, _, status, created_at) in rows {
        let key = (created_at.year(), created_at.month());
        if let Some(bucket) = buckets.get_mut(&key) {
            bucket.submitted += 1;
            match status.as_str() {
                "approved" | "active" | "completed" => bucket.approved += 1,
                "rejected" => bucket.rejected += 1,
                _ => {}
            }
        }
    }

    months
        .into_iter()
        .filter_map(|key| buckets.remove(&key))
        .collect()
}

pub fn notification_stats(conn: &mut PgConnection) -> AppResult<NotificationStats> {
    let total: i64 = notifications_table::table.select(count_star()).first(conn)?;

    let by_status: BTreeMap<String, i64> = notifications_table::table
        .group_by(notifications_table::status)
        .select((notifications_table::status, count_star()))
        .load::<(String, i64)>(conn)?
        .into_iter()
        .collect();

    let by_channel: BTreeMap<String, i64> = notifications_table::table
        .group_by(notifications_table::channel)
        .select((notifications_table::channel, count_star()))
        .load::<(String, i64)>(conn)?
        .into_iter()
        .collect();

    let day_ago = Utc::now().naive_utc() - ChronoDuration::hours(24);
    let failed_last_24h: i64 = notifications_table::table
        .filter(notifications_table::status.eq(notifications::STATUS_FAILED))
        .filter(notifications_table::updated_at.ge(day_ago))
        .select(count_star())
        .first(conn)?;

    Ok(NotificationStats {
        total,
        by_status,
        by_channel,
        failed_last_24h,
    })
}

fn month_start(moment: NaiveDateTime) -> NaiveDateTime {
    moment
        .date()
        .with_day(1)
        .unwrap_or(moment.date())
        .and_hms_opt(0, 0, 0)
        .unwrap_or(moment)
}
