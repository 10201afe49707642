use serde::Serialize;
use std::sync::Arc;

use crate::anomaly::engine::score_account;
use crate::anomaly::types::ScoringReport;
use crate::audit::checker::check_audit_trail;
use crate::audit::types::{AuditInput, AuditReport};
use crate::config::Config;
use crate::recon::engine::reconcile;
use crate::recon::types::ReconciliationReport;
use crate::records::types::{
    Account, AuditEntry, BookRecord, DocumentVersion, Holding, MarketSnapshot, Period, Transaction,
};
use crate::risk::metrics::assess_portfolio;
use crate::risk::stress::run_stress_test;
use crate::risk::types::{PortfolioAssessment, StressResult};

/// One account's records for a period, plus its earlier transactions.
#[derive(Debug, Clone)]
pub struct AccountUnit {
    pub account: Account,
    pub period: Period,
    /// Transactions dated before the period, used for baselines only.
    pub history: Vec<Transaction>,
    pub transactions: Vec<Transaction>,
    pub book_records: Vec<BookRecord>,
}

#[derive(Debug, Clone)]
pub struct PortfolioUnit {
    pub portfolio_id: String,
    pub holdings: Vec<Holding>,
    /// Shared across every portfolio of a batch.
    pub snapshots: Arc<Vec<MarketSnapshot>>,
}

/// The whole batch's audit trail. Actors and documents cut across accounts,
/// so the trail is checked once rather than per account.
#[derive(Debug, Clone)]
pub struct AuditUnit {
    pub period: Period,
    pub transactions: Vec<Transaction>,
    pub entries: Vec<AuditEntry>,
    pub document_versions: Vec<DocumentVersion>,
}

#[derive(Debug, Clone)]
pub enum WorkUnit {
    Account(AccountUnit),
    Portfolio(PortfolioUnit),
    Audit(AuditUnit),
}

impl WorkUnit {
    /// Stable identifier, also the order outcomes are reported in.
    pub fn id(&self) -> String {
        match self {
            Self::Account(unit) => format!("account:{}", unit.account.account_id),
            Self::Portfolio(unit) => format!("portfolio:{}", unit.portfolio_id),
            Self::Audit(_) => "audit:trail".to_string(),
        }
    }

    pub fn run(&self, config: &Config) -> UnitReport {
        match self {
            Self::Account(unit) => UnitReport::Account(run_account(unit, config)),
            Self::Portfolio(unit) => UnitReport::Portfolio(run_portfolio(unit, config)),
            Self::Audit(unit) => UnitReport::Audit(run_audit(unit, config)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub account_id: String,
    pub reconciliation: ReconciliationReport,
    pub scoring: ScoringReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioReport {
    pub portfolio_id: String,
    pub assessment: PortfolioAssessment,
    pub stress: Vec<StressResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum UnitReport {
    Account(AccountReport),
    Portfolio(PortfolioReport),
    Audit(AuditReport),
}

/// Reconcile and score one account:
/// 1. Bank vs. book reconciliation over the period
/// 2. Baseline and fraud scoring of the period's transactions
pub fn run_account(unit: &AccountUnit, config: &Config) -> AccountReport {
    let account_id = unit.account.account_id.as_str();

    let reconciliation = reconcile(
        &unit.account,
        &unit.period,
        &unit.transactions,
        &unit.book_records,
        &config.reconciliation,
    );
    let scoring = score_account(account_id, &unit.transactions, &unit.history, &config.scoring);

    tracing::info!(
        account = %account_id,
        status = ?reconciliation.status,
        matched = reconciliation.matched.len(),
        discrepancies = reconciliation.discrepancies.len(),
        flagged = scoring.flagged().count(),
        "Account processed"
    );

    AccountReport {
        account_id: account_id.to_string(),
        reconciliation,
        scoring,
    }
}

pub fn run_portfolio(unit: &PortfolioUnit, config: &Config) -> PortfolioReport {
    let assessment = assess_portfolio(&unit.portfolio_id, &unit.holdings, &unit.snapshots);
    let stress = run_stress_test(
        &assessment.holdings,
        &config.stress.scenarios,
        config.stress.top_worst_count,
    );

    tracing::info!(
        portfolio = %unit.portfolio_id,
        value = assessment.metrics.total_market_value,
        beta = assessment.metrics.portfolio_beta,
        missing = assessment.missing_market_data.len(),
        scenarios = stress.len(),
        "Portfolio processed"
    );

    PortfolioReport {
        portfolio_id: unit.portfolio_id.clone(),
        assessment,
        stress,
    }
}

pub fn run_audit(unit: &AuditUnit, config: &Config) -> AuditReport {
    let input = AuditInput {
        period: unit.period,
        transactions: &unit.transactions,
        entries: &unit.entries,
        document_versions: &unit.document_versions,
    };
    let report = check_audit_trail(&input, &config.audit);

    tracing::info!(
        entries = unit.entries.len(),
        anomalies = report.anomalies.len(),
        risk = ?report.risk_level,
        "Audit trail processed"
    );
    report
}
