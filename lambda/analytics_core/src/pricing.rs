use crate::config::PricingConfig;
use crate::tokens::TokenCounts;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use std::str::FromStr;

/// Fractional digits kept in every reported price.
pub const PRICE_SCALE: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    /// USD per 1,000 input tokens.
    pub input_per_1k: Decimal,
    /// USD per 1,000 output tokens.
    pub output_per_1k: Decimal,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_1k: dec!(0.003),
            output_per_1k: dec!(0.015),
        }
    }
}

impl From<&PricingConfig> for Pricing {
    fn from(config: &PricingConfig) -> Self {
        Self {
            input_per_1k: config.input_per_1k,
            output_per_1k: config.output_per_1k,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceBreakdown {
    pub input: Decimal,
    pub output: Decimal,
    pub total: Decimal,
}

impl PriceBreakdown {
    pub fn zero() -> Self {
        Self {
            input: fixed(Decimal::ZERO),
            output: fixed(Decimal::ZERO),
            total: fixed(Decimal::ZERO),
        }
    }
}

impl Pricing {
    /// The total sums the already rounded sides, so `input + output == total`
    /// holds for every row.
    pub fn price(&self, counts: TokenCounts) -> PriceBreakdown {
        let input = cost(counts.input, self.input_per_1k);
        let output = cost(counts.output, self.output_per_1k);

        PriceBreakdown {
            input,
            output,
            total: fixed(input + output),
        }
    }
}

fn cost(tokens: u64, per_1k: Decimal) -> Decimal {
    fixed(Decimal::from(tokens) * per_1k / dec!(1000))
}

/// Plain or scientific notation (`1.5e-05`, as float writers emit it).
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// Rounds half away from zero and pads to exactly [`PRICE_SCALE`] digits.
pub fn fixed(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(PRICE_SCALE);
    rounded
}
