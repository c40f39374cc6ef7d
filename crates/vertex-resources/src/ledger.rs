// Credit Ledger
// Per-component credit allocation and usage with an append-only audit trail.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    Allocate,
    Use,
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub timestamp: DateTime<Utc>,
    pub component_id: String,
    pub action: LedgerAction,
    pub amount: f64,
    /// Global balance after an ALLOCATE.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    /// Component allocation remaining after a USE.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_allocation: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ComponentUsage {
    pub allocated: f64,
    pub used: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub total_allocated: f64,
    pub total_used: f64,
    pub component_usage: HashMap<String, ComponentUsage>,
    pub current_balance: f64,
    pub current_allocations: HashMap<String, f64>,
    pub history: Vec<LedgerRecord>,
}

#[derive(Debug, Default)]
struct LedgerState {
    balance: f64,
    allocations: HashMap<String, f64>,
    history: Vec<LedgerRecord>,
}

/// Credit ledger gating every execution.
///
/// Budget conditions are ordinary results (`false`), never errors. All
/// mutations serialize on the inner lock; reads take a point-in-time
/// snapshot.
pub struct CreditLedger {
    budget_cap: Option<f64>,
    state: RwLock<LedgerState>,
}

impl CreditLedger {
    pub fn new(initial_balance: f64, budget_cap: Option<f64>) -> Self {
        Self {
            budget_cap,
            state: RwLock::new(LedgerState {
                balance: initial_balance,
                ..Default::default()
            }),
        }
    }

    /// Allocate credits to a component. Fails when the budget cap would be
    /// exceeded or the amount is not a non-negative finite number.
    pub async fn allocate(&self, component_id: &str, amount: f64) -> bool {
        if !amount.is_finite() || amount < 0.0 {
            return false;
        }

        let mut state = self.state.write().await;
        if let Some(cap) = self.budget_cap {
            if state.balance + amount > cap {
                tracing::debug!(component_id, amount, cap, "allocation denied by budget cap");
                return false;
            }
        }

        *state.allocations.entry(component_id.to_string()).or_insert(0.0) += amount;
        state.balance += amount;
        let balance = state.balance;
        state.history.push(LedgerRecord {
            timestamp: Utc::now(),
            component_id: component_id.to_string(),
            action: LedgerAction::Allocate,
            amount,
            balance: Some(balance),
            remaining_allocation: None,
        });
        true
    }

    /// Consume credits from a component's allocation. Fails when the
    /// allocation is insufficient.
    pub async fn use_credits(&self, component_id: &str, amount: f64) -> bool {
        if !amount.is_finite() || amount < 0.0 {
            return false;
        }

        let mut state = self.state.write().await;
        let allocation = state.allocations.get(component_id).copied().unwrap_or(0.0);
        if allocation < amount {
            tracing::debug!(component_id, amount, allocation, "usage denied");
            return false;
        }

        let remaining = allocation - amount;
        state
            .allocations
            .insert(component_id.to_string(), remaining);
        state.history.push(LedgerRecord {
            timestamp: Utc::now(),
            component_id: component_id.to_string(),
            action: LedgerAction::Use,
            amount,
            balance: None,
            remaining_allocation: Some(remaining),
        });
        true
    }

    pub async fn balance(&self) -> f64 {
        self.state.read().await.balance
    }

    pub fn budget_cap(&self) -> Option<f64> {
        self.budget_cap
    }

    pub async fn allocation(&self, component_id: &str) -> f64 {
        self.state
            .read()
            .await
            .allocations
            .get(component_id)
            .copied()
            .unwrap_or(0.0)
    }

    /// Totals and history, optionally filtered by component and time window.
    pub async fn usage_report(
        &self,
        component_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> UsageReport {
        let state = self.state.read().await;

        let history: Vec<LedgerRecord> = state
            .history
            .iter()
            .filter(|r| component_id.map_or(true, |c| r.component_id == c))
            .filter(|r| start.map_or(true, |s| r.timestamp >= s))
            .filter(|r| end.map_or(true, |e| r.timestamp <= e))
            .cloned()
            .collect();

        let mut total_allocated = 0.0;
        let mut total_used = 0.0;
        let mut component_usage: HashMap<String, ComponentUsage> = HashMap::new();

        for record in &history {
            let usage = component_usage
                .entry(record.component_id.clone())
                .or_default();
            match record.action {
                LedgerAction::Allocate => {
                    total_allocated += record.amount;
                    usage.allocated += record.amount;
                }
                LedgerAction::Use => {
                    total_used += record.amount;
                    usage.used += record.amount;
                }
            }
        }

        UsageReport {
            total_allocated,
            total_used,
            component_usage,
            current_balance: state.balance,
            current_allocations: state.allocations.clone(),
            history,
        }
    }
}
