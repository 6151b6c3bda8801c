// =============================================================================
// Ledger — accounts and positions
// =============================================================================

pub mod account;
pub mod position;

pub use account::{Account, AccountState, OpenPositionError, OpenPositionParams, Trade};
pub use position::{ExitReason, Position, PositionStatus, Side};

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::agent::AgentRegistry;

/// One `Account` per configured agent, created once at genesis and never
/// destroyed for the lifetime of the process.
pub struct AccountRegistry {
    accounts: HashMap<String, Account>,
}

impl AccountRegistry {
    pub fn from_agents(agents: &AgentRegistry, starting_balances: &HashMap<String, Decimal>) -> Self {
        let accounts = agents
            .iter()
            .map(|agent| {
                let balance = starting_balances
                    .get(&agent.id)
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                (agent.id.clone(), Account::new(agent.id.clone(), balance))
            })
            .collect();
        Self { accounts }
    }

    pub fn get(&self, agent_id: &str) -> Option<&Account> {
        self.accounts.get(agent_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Account)> {
        self.accounts.iter()
    }
}
