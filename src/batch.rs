use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::EngineError;
use crate::pipeline::{AccountUnit, AuditUnit, PortfolioUnit, UnitReport, WorkUnit};
use crate::records::normalizer::NormalizedBatch;
use crate::records::types::{Period, RecordKind, Transaction};

/// Work units for one batch, plus every record that could not be placed.
#[derive(Debug, Clone)]
pub struct UnitPlan {
    pub period: Period,
    pub units: Vec<WorkUnit>,
    pub rejected: Vec<EngineError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum UnitStatus {
    Completed(UnitReport),
    Failed(EngineError),
    /// Shutdown was requested before the unit was scheduled.
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitOutcome {
    pub unit: String,
    #[serde(flatten)]
    pub status: UnitStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub period: Period,
    pub rejected: Vec<EngineError>,
    /// Sorted by unit id.
    pub outcomes: Vec<UnitOutcome>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, UnitStatus::Completed(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, UnitStatus::Failed(_)))
            .count()
    }
}

/// Group normalized records into independent units of work.
///
/// Each known account gets an `AccountUnit` with its transactions split into
/// history (before the period) and the period itself. Holdings are grouped by
/// portfolio, and the audit trail becomes a single unit. Transactions and book
/// records naming an account the batch does not contain are rejected.
pub fn build_units(batch: NormalizedBatch) -> UnitPlan {
    let NormalizedBatch {
        period,
        accounts,
        transactions,
        book_records,
        holdings,
        market_snapshots,
        audit_entries,
        document_versions,
        mut rejected,
    } = batch;

    let mut account_units: BTreeMap<String, AccountUnit> = accounts
        .into_iter()
        .map(|account| {
            let id = account.account_id.clone();
            let unit = AccountUnit {
                account,
                period,
                history: Vec::new(),
                transactions: Vec::new(),
                book_records: Vec::new(),
            };
            (id, unit)
        })
        .collect();

    // Only transactions of known accounts reach the audit trail
    let mut audited: Vec<Transaction> = Vec::with_capacity(transactions.len());
    let mut after_period = 0usize;
    for (index, tx) in transactions.into_iter().enumerate() {
        let Some(unit) = account_units.get_mut(&tx.account_id) else {
            rejected.push(unknown_account(RecordKind::Transaction, index, &tx.id, &tx.account_id));
            continue;
        };
        if period.is_before(&tx.timestamp) {
            unit.history.push(tx.clone());
        } else if period.contains(&tx.timestamp) {
            unit.transactions.push(tx.clone());
        } else {
            after_period += 1;
            continue;
        }
        audited.push(tx);
    }

    for (index, record) in book_records.into_iter().enumerate() {
        match account_units.get_mut(&record.account_id) {
            Some(unit) if period.contains(&record.timestamp) => unit.book_records.push(record),
            Some(_) => after_period += 1,
            None => rejected.push(unknown_account(
                RecordKind::BookRecord,
                index,
                &record.reference,
                &record.account_id,
            )),
        }
    }

    if after_period > 0 {
        tracing::debug!(records = after_period, "Ignoring records outside the period");
    }

    let snapshots = Arc::new(market_snapshots);
    let mut portfolios: BTreeMap<String, Vec<_>> = BTreeMap::new();
    for holding in holdings {
        portfolios
            .entry(holding.portfolio_id.clone())
            .or_default()
            .push(holding);
    }

    let mut units: Vec<WorkUnit> = account_units.into_values().map(WorkUnit::Account).collect();
    units.extend(portfolios.into_iter().map(|(portfolio_id, holdings)| {
        WorkUnit::Portfolio(PortfolioUnit {
            portfolio_id,
            holdings,
            snapshots: Arc::clone(&snapshots),
        })
    }));

    if !(audited.is_empty() && audit_entries.is_empty() && document_versions.is_empty()) {
        units.push(WorkUnit::Audit(AuditUnit {
            period,
            transactions: audited,
            entries: audit_entries,
            document_versions,
        }));
    }

    UnitPlan {
        period,
        units,
        rejected,
    }
}

fn unknown_account(kind: RecordKind, index: usize, id: &str, account_id: &str) -> EngineError {
    EngineError::validation(kind, index, Some(id), format!("unknown account '{}'", account_id))
}

/// Run a plan with the engines. See [`run_units_with`].
pub async fn run_batch(
    plan: UnitPlan,
    config: Arc<Config>,
    shutdown: CancellationToken,
) -> BatchReport {
    run_units_with(plan, config, shutdown, |unit: &WorkUnit, config: &Config| {
        unit.run(config)
    })
    .await
}

/// Run every unit on the blocking pool, at most `max_workers` at a time.
///
/// Each unit is bounded by `unit_timeout_ms`; a unit that overruns or panics
/// fails on its own without touching the others. Once `shutdown` is
/// cancelled, units not yet started are reported as cancelled. A timed-out
/// worker thread is left to finish in the background and its result is
/// discarded.
pub async fn run_units_with<F>(
    plan: UnitPlan,
    config: Arc<Config>,
    shutdown: CancellationToken,
    runner: F,
) -> BatchReport
where
    F: Fn(&WorkUnit, &Config) -> UnitReport + Send + Sync + 'static,
{
    let UnitPlan {
        period,
        units,
        rejected,
    } = plan;

    let runner = Arc::new(runner);
    let max_workers = config.batch.max_workers.max(1);
    let timeout_ms = config.batch.unit_timeout_ms;
    let total = units.len();

    tracing::info!(units = total, max_workers, timeout_ms, "Starting batch");

    let mut outcomes: Vec<UnitOutcome> = stream::iter(units)
        .map(|unit| {
            let config = Arc::clone(&config);
            let runner = Arc::clone(&runner);
            let shutdown = shutdown.clone();
            async move {
                let id = unit.id();
                if shutdown.is_cancelled() {
                    return UnitOutcome {
                        unit: id,
                        status: UnitStatus::Cancelled,
                    };
                }

                let task = tokio::task::spawn_blocking(move || (*runner)(&unit, config.as_ref()));
                let limit = Duration::from_millis(timeout_ms);
                let status = match tokio::time::timeout(limit, task).await {
                    Ok(Ok(report)) => UnitStatus::Completed(report),
                    Ok(Err(e)) => {
                        tracing::error!(unit = %id, error = %e, "Worker failed");
                        UnitStatus::Failed(EngineError::WorkerFailed {
                            unit: id.clone(),
                            reason: e.to_string(),
                        })
                    }
                    Err(_) => {
                        tracing::warn!(unit = %id, after_ms = timeout_ms, "Unit timed out");
                        UnitStatus::Failed(EngineError::Timeout {
                            unit: id.clone(),
                            after_ms: timeout_ms,
                        })
                    }
                };
                UnitOutcome { unit: id, status }
            }
        })
        .buffer_unordered(max_workers)
        .collect()
        .await;

    outcomes.sort_by(|a, b| a.unit.cmp(&b.unit));

    let report = BatchReport {
        period,
        rejected,
        outcomes,
    };
    tracing::info!(
        units = total,
        completed = report.completed(),
        failed = report.failed(),
        rejected = report.rejected.len(),
        "Batch finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::AuditAnomalyKind;
    use crate::pipeline::run_audit;
    use crate::records::normalizer::{normalize_batch, RawBatch};
    use crate::risk::types::StressScenario;
    use serde_json::json;

    fn raw_batch() -> RawBatch {
        serde_json::from_value(json!({
            "period": { "start": "2024-01-01", "end": "2024-01-31" },
            "accounts": [
                { "account_id": "acc-1", "account_type": "checking", "current_balance": "50.00",
                  "available_balance": "50.00", "snapshot_time": "2024-01-31T23:00:00Z" },
                { "account_id": "acc-2", "account_type": "savings", "current_balance": 0,
                  "available_balance": 0, "snapshot_time": "2024-01-31T23:00:00Z" }
            ],
            "transactions": [
                { "id": "h1", "account_id": "acc-1", "timestamp": "2023-12-20T10:00:00Z",
                  "amount": "20.00", "description": "Coffee Co" },
                { "id": "t1", "account_id": "acc-1", "timestamp": "2024-01-01T10:00:00Z",
                  "amount": "100.00", "description": "Deposit" },
                { "id": "t2", "account_id": "acc-1", "timestamp": "2024-01-02T10:00:00Z",
                  "amount": "-50.00", "description": "Rent" },
                { "id": "late", "account_id": "acc-1", "timestamp": "2024-02-03T10:00:00Z",
                  "amount": "1.00", "description": "Next month" },
                { "id": "x1", "account_id": "acc-9", "timestamp": "2024-01-05T10:00:00Z",
                  "amount": "5.00", "description": "Orphan" }
            ],
            "book_records": [
                { "reference": "b1", "account_id": "acc-1", "timestamp": "2024-01-01",
                  "amount": 100 }
            ],
            "holdings": [
                { "portfolio_id": "growth", "symbol": "aaa", "quantity": 10, "cost_basis": 900 },
                { "portfolio_id": "income", "symbol": "bbb", "quantity": 5, "cost_basis": 500 }
            ],
            "market_snapshots": [
                { "symbol": "AAA", "price": 100, "beta": 1.5 },
                { "symbol": "BBB", "price": 100, "beta": 0.5 }
            ],
            "audit_entries": [
                { "transaction_id": "t1", "actor_id": "alice", "action": "create",
                  "timestamp": "2024-01-01T10:00:00Z" }
            ]
        }))
        .unwrap()
    }

    fn plan() -> UnitPlan {
        let batch = normalize_batch(&raw_batch(), &Default::default());
        build_units(batch)
    }

    fn config() -> Arc<Config> {
        let mut config = Config::default();
        config.stress.scenarios = vec![StressScenario::market("crash", -0.3)];
        Arc::new(config)
    }

    fn unit_ids(plan: &UnitPlan) -> Vec<String> {
        plan.units.iter().map(|u| u.id()).collect()
    }

    #[test]
    fn test_build_units_groups_records() {
        let plan = plan();
        assert_eq!(
            unit_ids(&plan),
            vec![
                "account:acc-1",
                "account:acc-2",
                "portfolio:growth",
                "portfolio:income",
                "audit:trail"
            ]
        );

        let WorkUnit::Account(acc) = &plan.units[0] else {
            panic!("expected account unit");
        };
        assert_eq!(acc.history.len(), 1);
        assert_eq!(acc.transactions.len(), 2);
        assert_eq!(acc.book_records.len(), 1);

        assert_eq!(plan.rejected.len(), 1);
        assert!(plan.rejected[0].to_string().contains("acc-9"));
    }

    #[test]
    fn test_rejected_transaction_stays_out_of_audit_trail() {
        let plan = plan();
        let Some(WorkUnit::Audit(audit)) = plan.units.last() else {
            panic!("expected audit unit");
        };
        let ids: Vec<&str> = audit.transactions.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["h1", "t1", "t2"]);

        let report = run_audit(audit, &Config::default());
        assert!(report.anomalies.iter().all(|a| a.reference != "x1"));
        // t2 is the only accepted in-period transaction without an entry
        assert_eq!(report.count(AuditAnomalyKind::MissingEntry), 1);
        assert_eq!(report.anomalies[0].reference, "t2");
    }

    #[tokio::test]
    async fn test_run_batch_produces_every_report() {
        let report = run_batch(plan(), config(), CancellationToken::new()).await;
        assert_eq!(report.outcomes.len(), 5);
        assert_eq!(report.completed(), 5);

        let ids: Vec<&str> = report.outcomes.iter().map(|o| o.unit.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let acc1 = report
            .outcomes
            .iter()
            .find(|o| o.unit == "account:acc-1")
            .unwrap();
        let UnitStatus::Completed(UnitReport::Account(account)) = &acc1.status else {
            panic!("expected account report");
        };
        assert!(!account.reconciliation.is_balanced());
        assert_eq!(account.reconciliation.discrepancies.len(), 1);
        assert_eq!(account.scoring.assessments.len(), 2);

        let growth = report
            .outcomes
            .iter()
            .find(|o| o.unit == "portfolio:growth")
            .unwrap();
        let UnitStatus::Completed(UnitReport::Portfolio(portfolio)) = &growth.status else {
            panic!("expected portfolio report");
        };
        assert_eq!(portfolio.stress.len(), 1);
        assert!((portfolio.stress[0].stressed_value - 700.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_slow_unit_times_out_alone() {
        let mut config = Config::default();
        config.batch.unit_timeout_ms = 50;
        let config = Arc::new(config);

        let report = run_units_with(plan(), config, CancellationToken::new(), |unit, config| {
            if unit.id() == "account:acc-2" {
                std::thread::sleep(Duration::from_millis(500));
            }
            unit.run(config)
        })
        .await;

        assert_eq!(report.completed(), 4);
        let slow = report
            .outcomes
            .iter()
            .find(|o| o.unit == "account:acc-2")
            .unwrap();
        assert!(matches!(
            slow.status,
            UnitStatus::Failed(EngineError::Timeout { after_ms: 50, .. })
        ));
    }

    #[tokio::test]
    async fn test_panicking_unit_is_scoped() {
        let report = run_units_with(plan(), config(), CancellationToken::new(), |unit, config| {
            if unit.id() == "portfolio:income" {
                panic!("boom");
            }
            unit.run(config)
        })
        .await;

        assert_eq!(report.completed(), 4);
        assert_eq!(report.failed(), 1);
        let failed = report
            .outcomes
            .iter()
            .find(|o| o.unit == "portfolio:income")
            .unwrap();
        assert!(matches!(
            failed.status,
            UnitStatus::Failed(EngineError::WorkerFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_batch_schedules_nothing() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let report = run_batch(plan(), config(), shutdown).await;
        assert_eq!(report.outcomes.len(), 5);
        assert!(report
            .outcomes
            .iter()
            .all(|o| matches!(o.status, UnitStatus::Cancelled)));
    }
}
