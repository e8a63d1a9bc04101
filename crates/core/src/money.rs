use rust_decimal::{Decimal, RoundingStrategy};

/// Fraction digits kept on stored amounts, rates and quantities.
pub const MONEY_SCALE: u32 = 3;

const ONE_HUNDRED: Decimal = Decimal::ONE_HUNDRED;

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `amount * percent / 100`, rounded to the money scale.
pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    round_money(amount * percent / ONE_HUNDRED)
}
