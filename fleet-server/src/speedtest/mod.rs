// File: fleet-server/src/speedtest/mod.rs
//
// The speed-test aggregator: a specialized secondary store with SQL-capable
// backing. Grounded on the reference workspace's `database::Database::new`
// connection/DDL pattern (`CREATE TABLE IF NOT EXISTS` + `CREATE INDEX IF NOT
// EXISTS`, idempotent on repeated startup).
pub mod stats;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

pub const RETENTION_DAYS: i64 = 90;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedtestResult {
    pub machine_id: String,
    pub ts: DateTime<Utc>,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
    pub server_name: Option<String>,
    pub isp: Option<String>,
}

pub struct Aggregator {
    pool: SqlitePool,
}

impl Aggregator {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new().max_connections(5).connect(url).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS speedtest_results (
                machine_id TEXT NOT NULL,
                ts TEXT NOT NULL,
                download_mbps REAL NOT NULL,
                upload_mbps REAL NOT NULL,
                ping_ms REAL NOT NULL,
                jitter_ms REAL NOT NULL,
                server_name TEXT,
                isp TEXT,
                PRIMARY KEY (machine_id, ts)
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_speedtest_machine_ts ON speedtest_results (machine_id, ts)")
            .execute(&pool)
            .await?;
        Ok(Self { pool })
    }

    pub async fn insert_result(&self, result: &SpeedtestResult) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO speedtest_results
             (machine_id, ts, download_mbps, upload_mbps, ping_ms, jitter_ms, server_name, isp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&result.machine_id)
        .bind(result.ts.to_rfc3339())
        .bind(result.download_mbps)
        .bind(result.upload_mbps)
        .bind(result.ping_ms)
        .bind(result.jitter_ms)
        .bind(&result.server_name)
        .bind(&result.isp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rows_in_window(&self, machine_id: Option<&str>, window_hours: i64) -> anyhow::Result<Vec<SpeedtestResult>> {
        let cutoff = (Utc::now() - chrono::Duration::hours(window_hours)).to_rfc3339();
        let rows = match machine_id {
            Some(id) => {
                sqlx::query("SELECT * FROM speedtest_results WHERE machine_id = ? AND ts >= ? ORDER BY ts ASC")
                    .bind(id)
                    .bind(&cutoff)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM speedtest_results WHERE ts >= ? ORDER BY ts ASC")
                    .bind(&cutoff)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(row_to_result).collect()
    }

    pub async fn fleet_summary(&self, window_hours: i64) -> anyhow::Result<FleetSpeedtestSummary> {
        let rows = self.rows_in_window(None, window_hours).await?;
        let download: Vec<f64> = rows.iter().map(|r| r.download_mbps).collect();
        let upload: Vec<f64> = rows.iter().map(|r| r.upload_mbps).collect();
        let ping: Vec<f64> = rows.iter().map(|r| r.ping_ms).collect();
        let machine_count = rows.iter().map(|r| r.machine_id.clone()).collect::<std::collections::HashSet<_>>().len();
        Ok(FleetSpeedtestSummary {
            count: rows.len(),
            machine_count,
            download: stats::distribution(&download),
            upload: stats::distribution(&upload),
            ping: stats::distribution(&ping),
        })
    }

    pub async fn machine_stats(&self, machine_id: &str, window_hours: i64) -> anyhow::Result<MachineSpeedtestStats> {
        let rows = self.rows_in_window(Some(machine_id), window_hours).await?;
        let download: Vec<f64> = rows.iter().map(|r| r.download_mbps).collect();
        let upload: Vec<f64> = rows.iter().map(|r| r.upload_mbps).collect();
        let ping: Vec<f64> = rows.iter().map(|r| r.ping_ms).collect();
        Ok(MachineSpeedtestStats {
            count: rows.len(),
            download: stats::distribution(&download),
            upload: stats::distribution(&upload),
            ping: stats::distribution(&ping),
            time_series: rows,
        })
    }

    pub async fn comparison(&self, window_hours: i64) -> anyhow::Result<Vec<MachineComparison>> {
        let rows = self.rows_in_window(None, window_hours).await?;
        let fleet_avg_download = stats::distribution(&rows.iter().map(|r| r.download_mbps).collect::<Vec<_>>()).avg;

        let mut by_machine: std::collections::HashMap<String, Vec<&SpeedtestResult>> = std::collections::HashMap::new();
        for row in &rows {
            by_machine.entry(row.machine_id.clone()).or_default().push(row);
        }

        let mut out = Vec::new();
        for (machine_id, rows) in by_machine {
            let download: Vec<f64> = rows.iter().map(|r| r.download_mbps).collect();
            let upload: Vec<f64> = rows.iter().map(|r| r.upload_mbps).collect();
            let ping: Vec<f64> = rows.iter().map(|r| r.ping_ms).collect();
            let dd = stats::distribution(&download);
            let du = stats::distribution(&upload);
            let dp = stats::distribution(&ping);
            let vs_fleet_percent = if fleet_avg_download > 0.0 {
                ((dd.avg - fleet_avg_download) / fleet_avg_download) * 100.0
            } else {
                0.0
            };
            out.push(MachineComparison {
                machine_id,
                avg_download: dd.avg,
                avg_upload: du.avg,
                avg_ping: dp.avg,
                variability: dd.stdev,
                vs_fleet_percent,
            });
        }
        out.sort_by(|a, b| a.machine_id.cmp(&b.machine_id));
        Ok(out)
    }

    pub async fn anomalies(&self, machine_id: &str, threshold_std: f64) -> anyhow::Result<Vec<SpeedtestResult>> {
        let rows = self.rows_in_window(Some(machine_id), RETENTION_DAYS * 24).await?;
        let download: Vec<f64> = rows.iter().map(|r| r.download_mbps).collect();
        let upload: Vec<f64> = rows.iter().map(|r| r.upload_mbps).collect();
        let ping: Vec<f64> = rows.iter().map(|r| r.ping_ms).collect();

        let mut flagged = std::collections::BTreeSet::new();
        flagged.extend(stats::anomaly_indices(&download, threshold_std));
        flagged.extend(stats::anomaly_indices(&upload, threshold_std));
        flagged.extend(stats::anomaly_indices(&ping, threshold_std));

        Ok(flagged.into_iter().filter_map(|i| rows.get(i).cloned()).collect())
    }

    pub async fn recent(&self, machine_id: Option<&str>, window_hours: i64, limit: usize) -> anyhow::Result<Vec<SpeedtestResult>> {
        let mut rows = self.rows_in_window(machine_id, window_hours).await?;
        rows.sort_by(|a, b| b.ts.cmp(&a.ts));
        rows.truncate(limit);
        Ok(rows)
    }

    pub async fn cleanup_old_rows(&self) -> anyhow::Result<u64> {
        let cutoff = (Utc::now() - chrono::Duration::days(RETENTION_DAYS)).to_rfc3339();
        let result = sqlx::query("DELETE FROM speedtest_results WHERE ts < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_result(row: sqlx::sqlite::SqliteRow) -> anyhow::Result<SpeedtestResult> {
    let ts_text: String = row.try_get("ts")?;
    Ok(SpeedtestResult {
        machine_id: row.try_get("machine_id")?,
        ts: DateTime::parse_from_rfc3339(&ts_text)?.with_timezone(&Utc),
        download_mbps: row.try_get("download_mbps")?,
        upload_mbps: row.try_get("upload_mbps")?,
        ping_ms: row.try_get("ping_ms")?,
        jitter_ms: row.try_get("jitter_ms")?,
        server_name: row.try_get("server_name")?,
        isp: row.try_get("isp")?,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetSpeedtestSummary {
    pub count: usize,
    pub machine_count: usize,
    pub download: stats::Distribution,
    pub upload: stats::Distribution,
    pub ping: stats::Distribution,
}

#[derive(Debug, Clone, Serialize)]
pub struct MachineSpeedtestStats {
    pub count: usize,
    pub download: stats::Distribution,
    pub upload: stats::Distribution,
    pub ping: stats::Distribution,
    pub time_series: Vec<SpeedtestResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MachineComparison {
    pub machine_id: String,
    pub avg_download: f64,
    pub avg_upload: f64,
    pub avg_ping: f64,
    pub variability: f64,
    pub vs_fleet_percent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn in_memory() -> Aggregator {
        Aggregator::connect("sqlite::memory:").await.unwrap()
    }

    fn result(machine_id: &str, ts: DateTime<Utc>, download: f64) -> SpeedtestResult {
        SpeedtestResult {
            machine_id: machine_id.to_string(),
            ts,
            download_mbps: download,
            upload_mbps: download / 10.0,
            ping_ms: 15.0,
            jitter_ms: 1.0,
            server_name: Some("test-server".to_string()),
            isp: Some("test-isp".to_string()),
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent_on_machine_and_ts() {
        let agg = in_memory().await;
        let ts = Utc::now();
        agg.insert_result(&result("m1", ts, 100.0)).await.unwrap();
        agg.insert_result(&result("m1", ts, 999.0)).await.unwrap();
        let rows = agg.recent(Some("m1"), 24, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].download_mbps, 100.0);
    }

    #[tokio::test]
    async fn fleet_summary_aggregates_across_machines() {
        let agg = in_memory().await;
        let now = Utc::now();
        agg.insert_result(&result("m1", now, 100.0)).await.unwrap();
        agg.insert_result(&result("m2", now + chrono::Duration::seconds(1), 50.0)).await.unwrap();
        let summary = agg.fleet_summary(24).await.unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.machine_count, 2);
    }

    #[tokio::test]
    async fn anomalies_flags_outlier_result() {
        let agg = in_memory().await;
        let base = Utc::now();
        for i in 0..5 {
            let download = if i == 4 { 500.0 } else { 100.0 };
            agg.insert_result(&result("m1", base + chrono::Duration::seconds(i), download)).await.unwrap();
        }
        let anomalies = agg.anomalies("m1", 2.0).await.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].download_mbps, 500.0);
    }

    #[tokio::test]
    async fn comparison_reports_vs_fleet_percent() {
        let agg = in_memory().await;
        let now = Utc::now();
        agg.insert_result(&result("m1", now, 200.0)).await.unwrap();
        agg.insert_result(&result("m2", now + chrono::Duration::seconds(1), 100.0)).await.unwrap();
        let comparison = agg.comparison(24).await.unwrap();
        assert_eq!(comparison.len(), 2);
    }
}
