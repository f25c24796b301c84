//! Order-book quoting — depth-aware price and size selection.
//!
//! Walks the top levels of the book to find a volume-weighted price for
//! the desired amount, damps the size by current volatility and the
//! forecasted loss, and nudges the limit price toward the touch by a
//! spread-scaled adjustment so thin books get priced more aggressively.

use tracing::debug;

use crate::errors::TradeError;
use crate::types::{OrderBook, Side, Ticker};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything quoting needs beyond the book itself.
#[derive(Debug, Clone)]
pub struct PricingContext {
    pub avg_close: f64,
    pub atr: f64,
    pub forecasted_loss: f64,
    /// The pair's quote balance on the venue being quoted.
    pub quote_balance: f64,
    pub base_qty: f64,
    pub ticker: Ticker,
    // Config knobs.
    pub volatility_threshold: f64,
    pub base_price_adjustment: f64,
    pub base_max_position_size: f64,
    pub base_daily_loss_limit: f64,
    pub depth_levels: usize,
}

/// A priced order suggestion.
#[derive(Debug, Clone, Copy)]
pub struct Quote {
    pub price: f64,
    pub amount: f64,
}

// ---------------------------------------------------------------------------
// Quoting
// ---------------------------------------------------------------------------

/// Price and size an order of `desired` base units against the book.
///
/// The returned amount is capped by book depth and by the dynamic
/// position-size limit; it can be zero when risk damping leaves no room.
pub fn best_price_and_amount(
    book: &OrderBook,
    side: Side,
    desired: f64,
    ctx: &PricingContext,
) -> Result<Quote, TradeError> {
    let levels = book.levels(side);
    if levels.is_empty() {
        return Err(TradeError::StaleData("empty order book side".into()));
    }
    if desired <= 0.0 || ctx.avg_close <= 0.0 {
        return Ok(Quote { price: levels[0].price, amount: 0.0 });
    }

    // Walk the top of the book, accumulating size and cost until the
    // desired amount is covered.
    let mut total_amount = 0.0;
    let mut total_cost = 0.0;
    let mut depth_amount = 0.0;
    for level in levels.iter().take(ctx.depth_levels.max(1)) {
        depth_amount += level.qty;
        let take = (desired - total_amount).min(level.qty);
        if take > 0.0 {
            total_amount += take;
            total_cost += take * level.price;
            if total_amount >= desired {
                break;
            }
        }
    }

    let avg_price = if total_amount > 0.0 {
        total_cost / total_amount
    } else {
        levels[0].price
    };
    let available = total_amount.min(desired);

    // Size damping: shrink in volatile markets and when the book is too
    // thin to absorb the order, but never below half the base cap.
    let volatility = ctx.atr / ctx.avg_close;
    let depth_factor = (depth_amount / desired).min(1.0);
    let position_size_factor =
        (1.0 - volatility / ctx.volatility_threshold).max(0.5) * depth_factor;

    // Loss damping: a high forecasted loss relative to the daily budget
    // halves the position cap at the extreme.
    let loss_budget = ctx.base_daily_loss_limit * ctx.quote_balance;
    let loss_risk_factor = if loss_budget > 0.0 {
        (1.0 - ctx.forecasted_loss / loss_budget).max(0.5)
    } else {
        0.5
    };

    let dynamic_max_position = ctx.base_max_position_size * position_size_factor * loss_risk_factor;
    let total_value = ctx.base_qty * avg_price + ctx.quote_balance;
    let max_allowed = total_value * dynamic_max_position / avg_price;
    let final_amount = available.min(max_allowed);

    // Price adjustment: scale the base nudge by the live spread (wide
    // spread → more room to improve), inflate it on thin books.
    let spread = ctx.ticker.relative_spread();
    let adjustment_factor = (spread * 10.0).clamp(0.5, 2.0);
    let price_adjustment = ctx.base_price_adjustment * adjustment_factor;
    let final_adjustment = if depth_factor > 0.0 {
        price_adjustment / depth_factor
    } else {
        price_adjustment
    };
    let price = match side {
        Side::Buy => avg_price * (1.0 + final_adjustment),
        Side::Sell => avg_price * (1.0 - final_adjustment),
    };

    debug!(
        side = %side,
        desired,
        final_amount,
        avg_price,
        price,
        depth_factor,
        position_size_factor,
        loss_risk_factor,
        "Order quoted"
    );

    Ok(Quote { price, amount: final_amount })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
