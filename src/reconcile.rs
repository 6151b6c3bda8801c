// =============================================================================
// Position reconciler
// =============================================================================
//
// Ownership-tagged reconciliation: venue positions carry (when available) the
// client-order-id of the order that opened them, `{agentId}_{symbol}_{ts}`.
// This pass aligns each agent's local `Account` with venue reality.
//
// SAFETY POLICY: never automatically cancel orders or place new ones here —
// this only adopts, updates, and closes positions to match what the venue
// already reports.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::{AccountRegistry, ExitReason, Position, PositionStatus};
use crate::venue::{VenueClient, VenuePosition};

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub added: u32,
    pub updated: u32,
    pub removed: u32,
    pub unowned: u32,
}

/// Parses `{agentId}_{symbol}_{epochMillis}` back into `(agentId, symbol)`.
/// Agent ids and symbols are themselves free of underscores by convention
/// (enforced at config load), so splitting from the right is unambiguous.
fn parse_ownership_tag(client_order_id: &str) -> Option<(&str, &str)> {
    let mut parts = client_order_id.rsplitn(3, '_');
    let _epoch_millis = parts.next()?;
    let symbol = parts.next()?;
    let agent_id = parts.next()?;
    if agent_id.is_empty() || symbol.is_empty() {
        return None;
    }
    Some((agent_id, symbol))
}

const EPSILON: Decimal = rust_decimal_macros::dec!(0.00000001);

/// `Reconcile(accounts) -> ReconcileReport`. Aborts the whole pass without
/// mutating any state if the venue fetch fails.
pub async fn reconcile(
    venue: &dyn VenueClient,
    accounts: &AccountRegistry,
    last_snapshot_prices: &HashMap<String, Decimal>,
) -> anyhow::Result<ReconcileReport> {
    let venue_positions = venue.get_open_positions().await?;
    info!(count = venue_positions.len(), "reconcile: venue positions fetched");

    let mut report = ReconcileReport::default();
    let mut seen_by_agent: HashMap<&str, Vec<&VenuePosition>> = HashMap::new();

    for vp in &venue_positions {
        let Some(client_order_id) = vp.client_order_id.as_deref() else {
            report.unowned += 1;
            warn!(symbol = %vp.symbol, "reconcile: venue position has no client-order-id, ignoring");
            continue;
        };
        let Some((agent_id, tagged_symbol)) = parse_ownership_tag(client_order_id) else {
            report.unowned += 1;
            warn!(client_order_id, "reconcile: unparseable ownership tag, ignoring");
            continue;
        };
        if tagged_symbol != vp.symbol {
            report.unowned += 1;
            warn!(
                client_order_id,
                venue_symbol = %vp.symbol,
                "reconcile: ownership tag symbol mismatch, ignoring"
            );
            continue;
        }
        seen_by_agent.entry(agent_id).or_default().push(vp);
    }

    for (agent_id, account) in accounts.iter() {
        let venue_positions_for_agent = seen_by_agent.get(agent_id.as_str()).cloned().unwrap_or_default();
        let local = account.snapshot();

        for vp in &venue_positions_for_agent {
            match local
                .positions
                .iter()
                .find(|p| p.status == PositionStatus::Open && p.symbol == vp.symbol)
            {
                None => {
                    let position = adopt_from_venue(agent_id, vp);
                    account.adopt_position(position);
                    report.added += 1;
                    info!(agent_id, symbol = %vp.symbol, "reconcile: adopted orphan venue position");
                }
                Some(existing) => {
                    let diverged = (existing.quantity - vp.quantity).abs() > EPSILON
                        || (existing.entry_price - vp.entry_price).abs() > EPSILON;
                    if diverged {
                        account.reconcile_update(existing.id, vp.quantity, vp.entry_price);
                        report.updated += 1;
                        info!(agent_id, symbol = %vp.symbol, "reconcile: updated quantity/entry from venue");
                    }
                }
            }
        }

        let venue_symbols: std::collections::HashSet<&str> =
            venue_positions_for_agent.iter().map(|vp| vp.symbol.as_str()).collect();
        for local_position in local
            .positions
            .iter()
            .filter(|p| p.status == PositionStatus::Open)
        {
            if venue_symbols.contains(local_position.symbol.as_str()) {
                continue;
            }
            let exit_price = last_snapshot_prices
                .get(&local_position.symbol)
                .copied()
                .unwrap_or(local_position.current_price);
            account.close_position(local_position.id, exit_price, ExitReason::ReconcileRemoved);
            report.removed += 1;
            warn!(
                agent_id,
                symbol = %local_position.symbol,
                "reconcile: local position has no venue counterpart, closed as RECONCILE_REMOVED"
            );
        }
    }

    info!(
        added = report.added,
        updated = report.updated,
        removed = report.removed,
        unowned = report.unowned,
        "reconcile: pass complete"
    );
    Ok(report)
}

fn adopt_from_venue(agent_id: &str, vp: &VenuePosition) -> Position {
    let leverage = vp.leverage.max(1);
    Position {
        id: Uuid::new_v4(),
        agent_id: agent_id.to_string(),
        symbol: vp.symbol.clone(),
        side: vp.side,
        entry_price: vp.entry_price,
        quantity: vp.quantity,
        leverage,
        margin_used: vp.entry_price * vp.quantity / Decimal::from(leverage),
        stop_loss_price: None,
        take_profit_price: None,
        liquidation_price: Position::liquidation_price_for(vp.side, vp.entry_price, leverage),
        current_price: vp.entry_price,
        unrealised_pnl: Decimal::ZERO,
        opened_at: chrono::Utc::now(),
        status: PositionStatus::Open,
        venue_client_order_id: vp.client_order_id.clone().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ownership_tag() {
        let (agent, symbol) = parse_ownership_tag("agentA_BTCUSDT_1700000000000").unwrap();
        assert_eq!(agent, "agentA");
        assert_eq!(symbol, "BTCUSDT");
    }

    #[test]
    fn rejects_malformed_tag() {
        assert!(parse_ownership_tag("no-underscores").is_none());
        assert!(parse_ownership_tag("_BTCUSDT_123").is_none());
    }

    #[tokio::test]
    async fn adds_orphan_venue_position() {
        use crate::agent::AgentRegistry;
        use crate::config::{AgentConfig, Config, ProviderKind};
        use crate::ledger::Side;
        use crate::venue::mock::MockVenue;
        use rust_decimal_macros::dec;

        let mut cfg = Config::default();
        cfg.agents.push(AgentConfig {
            id: "agentA".into(),
            display_name: "Agent A".into(),
            provider: ProviderKind::Anthropic,
            model: "claude".into(),
            system_prompt: None,
            starting_balance: dec!(10000),
        });
        let agents = AgentRegistry::from_config(&cfg);
        let accounts = AccountRegistry::from_agents(&agents, &HashMap::new());

        let venue = MockVenue::new();
        venue.seed_open_position(VenuePosition {
            symbol: "DOGEUSDT".into(),
            side: Side::Long,
            quantity: dec!(100),
            entry_price: dec!(0.1),
            leverage: 5,
            client_order_id: Some("agentA_DOGEUSDT_1700000000000".into()),
        });

        let report = reconcile(&venue, &accounts, &HashMap::new()).await.unwrap();
        assert_eq!(report.added, 1);
        assert!(accounts.get("agentA").unwrap().has_open_position("DOGEUSDT"));
    }

    #[tokio::test]
    async fn unparseable_tag_is_ignored_not_reassigned() {
        use crate::agent::AgentRegistry;
        use crate::config::Config;
        use crate::ledger::Side;
        use crate::venue::mock::MockVenue;
        use rust_decimal_macros::dec;

        let cfg = Config::default();
        let agents = AgentRegistry::from_config(&cfg);
        let accounts = AccountRegistry::from_agents(&agents, &HashMap::new());

        let venue = MockVenue::new();
        venue.seed_open_position(VenuePosition {
            symbol: "DOGEUSDT".into(),
            side: Side::Long,
            quantity: dec!(100),
            entry_price: dec!(0.1),
            leverage: 3,
            client_order_id: None,
        });

        let report = reconcile(&venue, &accounts, &HashMap::new()).await.unwrap();
        assert_eq!(report.unowned, 1);
        assert_eq!(report.added, 0);
    }
}
