//! Redemption Authority
//!
//! Validates and commits checkout redemptions. Validation and the append
//! happen under the account lock against freshly replayed state, so two
//! concurrent redemptions can't both spend the same coins.

use crate::context::LedgerContext;
use fitcoin_core::{
    Discount, Error, IdempotencyKey, LedgerEntry, Redemption, RedemptionRequest, Result,
};
use fitcoin_persistence::LedgerStore;
use std::sync::Arc;
use tracing::{debug, info};

pub fn redeem_dedupe_key(key: &IdempotencyKey) -> String {
    format!("redeem:{}", key.as_str())
}

pub struct RedemptionAuthority<S> {
    ctx: Arc<LedgerContext<S>>,
}

impl<S> Clone for RedemptionAuthority<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<S: LedgerStore> RedemptionAuthority<S> {
    pub(crate) fn new(ctx: Arc<LedgerContext<S>>) -> Self {
        Self { ctx }
    }

    /// Spend FitCoins against a product. A retried request with the same
    /// idempotency key returns the original entry with `replayed = true`.
    pub async fn redeem(&self, request: &RedemptionRequest) -> Result<Redemption> {
        let amount = request.requested_fitcoin_amount;
        if amount <= 0 {
            return Err(Error::InvalidAmount(amount));
        }

        let config = self.ctx.config().await;
        let product = request.product_id.as_str();
        let dedupe_key = redeem_dedupe_key(&request.idempotency_key);

        let committed = self
            .ctx
            .commit(
                &request.account_id,
                "redeem",
                |_| dedupe_key.clone(),
                |state, header, key| {
                    let cap = config
                        .product_cap(product)
                        .ok_or_else(|| Error::UnknownProduct(product.to_string()))?;
                    if amount > cap {
                        return Err(Error::ExceedsProductCap {
                            product_id: product.to_string(),
                            requested: amount,
                            cap,
                        });
                    }

                    let available = state.balance_at(header.created_at) as i64;
                    if amount > available {
                        debug!(
                            "Rejecting redemption of {} by {}: only {} available",
                            amount, header.account_id, available
                        );
                        return Err(Error::InsufficientBalance {
                            requested: amount,
                            available,
                        });
                    }

                    LedgerEntry::redeem(header, amount, product, key)
                },
            )
            .await?;

        if committed.replayed {
            debug!(
                "Redemption {} for {} already committed",
                request.idempotency_key.as_str(),
                request.account_id
            );
        } else {
            info!(
                "Redeemed {} FitCoins from {} on {}",
                amount, request.account_id, product
            );
        }

        Ok(Redemption {
            entry: committed.entry,
            replayed: committed.replayed,
        })
    }

    /// Checkout value of `fitcoins` at the configured conversion rate
    pub async fn quote_discount(&self, fitcoins: i64) -> Result<Discount> {
        if fitcoins < 0 {
            return Err(Error::InvalidAmount(fitcoins));
        }
        let conversion = self.ctx.config().await.conversion;
        Ok(Discount {
            fitcoins,
            amount: conversion.value_of(fitcoins)?,
            currency: conversion.currency,
        })
    }
}
