//! Contract sizing from the ladder's per-trade risk limit.
//!
//! ```text
//! budget    = limit * decision.size_fraction() * (stress_multiplier if stressed)
//! contracts = floor(budget / ((spread_width - net_credit) * 100))
//! ```

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::scoring::Decision;

/// Standard equity option multiplier.
pub const CONTRACT_MULTIPLIER: Decimal = Decimal::ONE_HUNDRED;

/// Worst-case loss of one vertical credit spread contract, or `None` if it
/// does not fit in a `Decimal`.
#[must_use]
pub fn checked_max_loss_per_contract(spread_width: Decimal, net_credit: Decimal) -> Option<Decimal> {
    spread_width
        .checked_sub(net_credit)?
        .checked_mul(CONTRACT_MULTIPLIER)
}

/// Worst-case loss of one vertical credit spread contract. Saturates at
/// `Decimal::MAX`.
#[must_use]
pub fn max_loss_per_contract(spread_width: Decimal, net_credit: Decimal) -> Decimal {
    checked_max_loss_per_contract(spread_width, net_credit).unwrap_or(Decimal::MAX)
}

/// Output of [`PositionSizer::size`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizedPosition {
    /// Capital at risk allowed for this trade.
    pub budget: Decimal,
    /// Whole contracts that fit in the budget.
    pub contracts: u32,
    /// Worst-case loss of the sized position.
    pub max_loss: Decimal,
    /// Why the size was cut to zero, if it was.
    pub constraint_reason: Option<String>,
}

/// Sizes positions against the ladder limit.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    stress_multiplier: Decimal,
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self {
            stress_multiplier: Decimal::new(5, 1),
        }
    }
}

impl PositionSizer {
    /// Sizer applying `stress_multiplier` under market stress.
    #[must_use]
    pub const fn new(stress_multiplier: Decimal) -> Self {
        Self { stress_multiplier }
    }

    /// Multiplier applied under market stress.
    #[must_use]
    pub const fn stress_multiplier(&self) -> Decimal {
        self.stress_multiplier
    }

    /// Size a position.
    #[must_use]
    pub fn size(
        &self,
        limit: Decimal,
        decision: Decision,
        max_loss_per_contract: Decimal,
        stressed: bool,
    ) -> SizedPosition {
        let mut budget = limit * decision.size_fraction();
        if stressed {
            budget *= self.stress_multiplier;
        }

        if max_loss_per_contract <= Decimal::ZERO {
            return SizedPosition {
                budget,
                contracts: 0,
                max_loss: Decimal::ZERO,
                constraint_reason: Some(format!(
                    "Non-positive max loss per contract: {max_loss_per_contract}"
                )),
            };
        }

        // A quotient too large for the count saturates.
        let contracts = budget
            .checked_div(max_loss_per_contract)
            .map_or(Some(u32::MAX), |q| q.floor().to_u32())
            .unwrap_or(u32::MAX);

        let constraint_reason = (contracts == 0).then(|| {
            format!("Budget {budget} is below one contract's max loss {max_loss_per_contract}")
        });

        SizedPosition {
            budget,
            contracts,
            max_loss: max_loss_per_contract
                .checked_mul(Decimal::from(contracts))
                .unwrap_or(budget),
            constraint_reason,
        }
    }
}
