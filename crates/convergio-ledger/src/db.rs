use std::path::Path;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::error::{LedgerError, LedgerResult};
use crate::types::{
    AlertLevel, BudgetAlert, BudgetLimits, BudgetScope, CostLedgerEntry, LedgerScope, Prediction,
    UsageSummary, UsageWindow, ALERT_THRESHOLDS,
};

/// SQLite-backed append-only cost ledger. One connection, serialized through
/// a tokio mutex the way the memory crate serializes its own connection.
pub struct CostLedger {
    conn: Arc<Mutex<Connection>>,
}

impl CostLedger {
    pub async fn open(db_path: &Path) -> LedgerResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(10))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;

        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    pub async fn open_in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    async fn init_schema(&self) -> LedgerResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cost_ledger (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                conv_id TEXT NOT NULL,
                tokens_in INTEGER NOT NULL,
                tokens_out INTEGER NOT NULL,
                cost_usd TEXT NOT NULL,
                session_id TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cost_ledger_ts ON cost_ledger(ts)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cost_ledger_provider ON cost_ledger(provider)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cost_ledger_conv ON cost_ledger(conv_id)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS budget_limits (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                daily_usd TEXT NOT NULL,
                monthly_usd TEXT NOT NULL,
                per_provider_usd TEXT NOT NULL,
                per_conversation_usd TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS budget_alert_log (
                scope_key TEXT NOT NULL,
                window_key TEXT NOT NULL,
                threshold_pct INTEGER NOT NULL,
                fired_at TEXT NOT NULL,
                PRIMARY KEY (scope_key, window_key, threshold_pct)
            )",
            [],
        )?;
        Ok(())
    }

    /// Durably append one cost observation, then evaluate whether it
    /// crosses a budget alert threshold that has not already fired for this
    /// (scope, window) pair.
    pub async fn record(&self, entry: &CostLedgerEntry) -> LedgerResult<Vec<BudgetAlert>> {
        {
            let conn = self.conn.lock().await;
            conn.execute(
                "INSERT INTO cost_ledger
                 (ts, provider, model, agent_id, conv_id, tokens_in, tokens_out, cost_usd, session_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.ts.to_rfc3339(),
                    entry.provider,
                    entry.model,
                    entry.agent_id,
                    entry.conv_id,
                    entry.tokens_in as i64,
                    entry.tokens_out as i64,
                    entry.cost_usd.to_string(),
                    entry.session_id,
                ],
            )?;
        }

        let mut alerts = Vec::new();
        let limits = self.get_limits().await?;
        let today = entry.ts.date_naive();

        if limits.daily_usd > Decimal::ZERO {
            alerts.extend(
                self.check_threshold(
                    "global:daily",
                    &format!("day:{today}"),
                    UsageWindow::Day(today),
                    LedgerScope::Global,
                    limits.daily_usd,
                )
                .await?,
            );
        }
        if limits.monthly_usd > Decimal::ZERO {
            let window = UsageWindow::Month {
                year: today.year(),
                month: today.month(),
            };
            alerts.extend(
                self.check_threshold(
                    "global:monthly",
                    &format!("month:{}-{:02}", today.year(), today.month()),
                    window,
                    LedgerScope::Global,
                    limits.monthly_usd,
                )
                .await?,
            );
        }
        if let Some(limit) = limits.per_provider_usd.get(&entry.provider) {
            if *limit > Decimal::ZERO {
                alerts.extend(
                    self.check_threshold(
                        &format!("provider:{}", entry.provider),
                        &format!("day:{today}"),
                        UsageWindow::Day(today),
                        LedgerScope::Provider(entry.provider.clone()),
                        *limit,
                    )
                    .await?,
                );
            }
        }
        if limits.per_conversation_usd > Decimal::ZERO {
            alerts.extend(
                self.check_threshold(
                    &format!("conversation:{}", entry.conv_id),
                    "alltime",
                    UsageWindow::AllTime,
                    LedgerScope::Conversation(entry.conv_id.clone()),
                    limits.per_conversation_usd,
                )
                .await?,
            );
        }

        Ok(alerts)
    }

    async fn check_threshold(
        &self,
        scope_key: &str,
        window_key: &str,
        window: UsageWindow,
        scope: LedgerScope,
        limit: Decimal,
    ) -> LedgerResult<Vec<BudgetAlert>> {
        let usage = self.usage(&scope, window).await?;
        let pct = (usage.cost_usd / limit * Decimal::from(100))
            .to_string()
            .parse::<f64>()
            .unwrap_or(0.0);

        let mut fired = Vec::new();
        for threshold in ALERT_THRESHOLDS {
            if pct < threshold as f64 {
                continue;
            }
            let already_fired = {
                let conn = self.conn.lock().await;
                conn.query_row(
                    "SELECT 1 FROM budget_alert_log WHERE scope_key = ?1 AND window_key = ?2 AND threshold_pct = ?3",
                    params![scope_key, window_key, threshold as i64],
                    |_| Ok(()),
                )
                .optional()?
                .is_some()
            };
            if already_fired {
                continue;
            }
            let now = Utc::now();
            {
                let conn = self.conn.lock().await;
                conn.execute(
                    "INSERT INTO budget_alert_log (scope_key, window_key, threshold_pct, fired_at) VALUES (?1, ?2, ?3, ?4)",
                    params![scope_key, window_key, threshold as i64, now.to_rfc3339()],
                )?;
            }
            fired.push(BudgetAlert {
                scope_key: scope_key.to_string(),
                window_key: window_key.to_string(),
                threshold_pct: threshold,
                level: AlertLevel::for_threshold(threshold).expect("valid threshold"),
                utilization_pct: pct,
                fired_at: now,
            });
        }
        Ok(fired)
    }

    pub async fn usage(&self, scope: &LedgerScope, window: UsageWindow) -> LedgerResult<UsageSummary> {
        let (start, end) = window.bounds();
        let conn = self.conn.lock().await;

        let (filter_sql, filter_val): (&str, Option<String>) = match scope {
            LedgerScope::Global => ("", None),
            LedgerScope::Provider(p) => ("AND provider = ?3", Some(p.clone())),
            LedgerScope::Agent(a) => ("AND agent_id = ?3", Some(a.clone())),
            LedgerScope::Conversation(c) => ("AND conv_id = ?3", Some(c.clone())),
        };

        let sql = format!(
            "SELECT COALESCE(SUM(tokens_in), 0), COALESCE(SUM(tokens_out), 0), cost_usd, COUNT(*)
             FROM cost_ledger WHERE ts >= ?1 AND ts < ?2 {filter_sql}"
        );

        // cost_usd needs decimal-accurate summation; pull raw strings and sum in Rust
        // rather than relying on SQLite's floating-point SUM().
        let cost_sql = format!(
            "SELECT cost_usd FROM cost_ledger WHERE ts >= ?1 AND ts < ?2 {filter_sql}"
        );

        let (tokens_in, tokens_out, calls): (i64, i64, i64) = if let Some(val) = &filter_val {
            conn.query_row(&sql, params![start.to_rfc3339(), end.to_rfc3339(), val], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(3)?))
            })?
        } else {
            conn.query_row(&sql, params![start.to_rfc3339(), end.to_rfc3339()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(3)?))
            })?
        };

        let mut stmt = conn.prepare(&cost_sql)?;
        let cost_rows: Vec<String> = if let Some(val) = &filter_val {
            stmt.query_map(params![start.to_rfc3339(), end.to_rfc3339(), val], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?
        } else {
            stmt.query_map(params![start.to_rfc3339(), end.to_rfc3339()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?
        };

        let total_cost = cost_rows
            .iter()
            .filter_map(|s| s.parse::<Decimal>().ok())
            .sum();

        Ok(UsageSummary {
            tokens_in: tokens_in as u64,
            tokens_out: tokens_out as u64,
            cost_usd: total_cost,
            calls: calls as u64,
        })
    }

    /// `cost / limit` as a percentage for the scope's natural window
    /// (daily for `DailyGlobal`, monthly for `MonthlyGlobal`, current day
    /// for `Provider`, all-time for `Conversation`).
    pub async fn utilization(&self, scope: BudgetScope) -> LedgerResult<f64> {
        let limits = self.get_limits().await?;
        let today = Utc::now().date_naive();

        let (ledger_scope, window, limit) = match scope {
            BudgetScope::DailyGlobal => (LedgerScope::Global, UsageWindow::Day(today), limits.daily_usd),
            BudgetScope::MonthlyGlobal => (
                LedgerScope::Global,
                UsageWindow::Month { year: today.year(), month: today.month() },
                limits.monthly_usd,
            ),
            BudgetScope::Provider(p) => {
                let limit = limits.per_provider_usd.get(&p).copied().unwrap_or(Decimal::ZERO);
                (LedgerScope::Provider(p), UsageWindow::Day(today), limit)
            }
            BudgetScope::Conversation(c) => (
                LedgerScope::Conversation(c),
                UsageWindow::AllTime,
                limits.per_conversation_usd,
            ),
        };

        if limit <= Decimal::ZERO {
            return Ok(0.0);
        }
        let usage = self.usage(&ledger_scope, window).await?;
        Ok((usage.cost_usd / limit * Decimal::from(100))
            .to_string()
            .parse::<f64>()
            .unwrap_or(0.0))
    }

    /// Linear regression over the last 7 daily global cost aggregates, with
    /// a day-of-week multiplier applied to the projected next-day value.
    pub async fn predict(&self, window: UsageWindow) -> LedgerResult<Prediction> {
        let today = Utc::now().date_naive();
        let mut daily_costs = Vec::with_capacity(7);
        for offset in (0..7).rev() {
            let date = today - chrono::Duration::days(offset);
            let usage = self.usage(&LedgerScope::Global, UsageWindow::Day(date)).await?;
            daily_costs.push(usage.cost_usd.to_string().parse::<f64>().unwrap_or(0.0));
        }

        let n = daily_costs.len() as f64;
        let xs: Vec<f64> = (0..daily_costs.len()).map(|i| i as f64).collect();
        let mean_x = xs.iter().sum::<f64>() / n;
        let mean_y = daily_costs.iter().sum::<f64>() / n;
        let mut num = 0.0;
        let mut den = 0.0;
        for (x, y) in xs.iter().zip(daily_costs.iter()) {
            num += (x - mean_x) * (y - mean_y);
            den += (x - mean_x).powi(2);
        }
        let slope = if den.abs() < f64::EPSILON { 0.0 } else { num / den };
        let intercept = mean_y - slope * mean_x;

        let (start, end) = window.bounds();
        let days_in_window = ((end - start).num_seconds().max(1) as f64 / 86_400.0).max(1.0);

        // Day-of-week seasonality: weight this weekday's historical share of
        // the 7-day total against a uniform 1/7 baseline.
        let weekday_idx = today.weekday().num_days_from_monday() as usize;
        let weekday_cost = daily_costs.get(weekday_idx % daily_costs.len()).copied().unwrap_or(mean_y);
        let total: f64 = daily_costs.iter().sum();
        let seasonality = if total > 0.0 {
            (weekday_cost / total) * 7.0
        } else {
            1.0
        };

        let next_step = (xs.len() as f64) * slope + intercept;
        let daily_estimate = (next_step.max(0.0)) * seasonality;
        let expected_cost = daily_estimate * days_in_window;

        // Confidence grows with how little the recent daily costs vary
        // around the fitted line; always in [0.1, 0.9].
        let residual_var: f64 = xs
            .iter()
            .zip(daily_costs.iter())
            .map(|(x, y)| {
                let predicted = slope * x + intercept;
                (y - predicted).powi(2)
            })
            .sum::<f64>()
            / n;
        let scale = if mean_y.abs() < f64::EPSILON { 1.0 } else { mean_y.abs() };
        let confidence = (1.0 - (residual_var.sqrt() / scale)).clamp(0.1, 0.9);

        Ok(Prediction {
            expected_cost: Decimal::from_f64_retain(expected_cost.max(0.0)).unwrap_or(Decimal::ZERO),
            confidence,
        })
    }

    pub async fn set_limits(&self, limits: &BudgetLimits) -> LedgerResult<()> {
        limits.validate()?;
        let per_provider = serde_json::to_string(&limits.per_provider_usd)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO budget_limits (id, daily_usd, monthly_usd, per_provider_usd, per_conversation_usd)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                daily_usd = excluded.daily_usd,
                monthly_usd = excluded.monthly_usd,
                per_provider_usd = excluded.per_provider_usd,
                per_conversation_usd = excluded.per_conversation_usd",
            params![
                limits.daily_usd.to_string(),
                limits.monthly_usd.to_string(),
                per_provider,
                limits.per_conversation_usd.to_string(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_limits(&self) -> LedgerResult<BudgetLimits> {
        let conn = self.conn.lock().await;
        let row: Option<(String, String, String, String)> = conn
            .query_row(
                "SELECT daily_usd, monthly_usd, per_provider_usd, per_conversation_usd FROM budget_limits WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        match row {
            Some((daily, monthly, per_provider, per_conv)) => Ok(BudgetLimits {
                daily_usd: daily.parse().map_err(|_| LedgerError::InvalidLimits("corrupt daily_usd".into()))?,
                monthly_usd: monthly.parse().map_err(|_| LedgerError::InvalidLimits("corrupt monthly_usd".into()))?,
                per_provider_usd: serde_json::from_str(&per_provider)?,
                per_conversation_usd: per_conv.parse().map_err(|_| LedgerError::InvalidLimits("corrupt per_conversation_usd".into()))?,
            }),
            None => Ok(BudgetLimits::default()),
        }
    }
}
