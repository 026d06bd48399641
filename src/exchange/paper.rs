//! Simulated exchange for paper trading.
//!
//! Market orders fill immediately at the cached top of book. Each account keeps
//! its own wallet and hedge-mode long/short holdings per symbol; ledgers are
//! shared by every adapter the exchange hands out.

use super::traits::{AdapterFactory, ExchangeAdapter, Venue};
use super::types::*;
use crate::cache::TickerCache;
use crate::registry::{AccountSpec, InstrumentSpec};
use crate::utils::decimal::safe_div;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Fills kept for `get_order`; older ones are dropped.
const RETAINED_FILLS: usize = 1_000;

/// Holdings of one symbol in one paper account.
#[derive(Debug, Clone)]
struct PaperHolding {
    long_amount: Decimal,
    long_entry: Decimal,
    short_amount: Decimal,
    short_entry: Decimal,
    contract_value: Decimal,
    leverage: u8,
}

impl PaperHolding {
    fn new(contract_value: Decimal, leverage: u8) -> Self {
        Self {
            long_amount: Decimal::ZERO,
            long_entry: Decimal::ZERO,
            short_amount: Decimal::ZERO,
            short_entry: Decimal::ZERO,
            contract_value,
            leverage: leverage.max(1),
        }
    }

    fn margin_used(&self) -> Decimal {
        let notional = (self.long_amount * self.long_entry + self.short_amount * self.short_entry)
            * self.contract_value;
        notional / Decimal::from(self.leverage)
    }

    fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        ((mark - self.long_entry) * self.long_amount + (self.short_entry - mark) * self.short_amount)
            * self.contract_value
    }
}

/// Wallet and holdings of one paper account.
#[derive(Debug, Clone)]
struct PaperAccount {
    wallet: Decimal,
    fees_paid: Decimal,
    holdings: HashMap<String, PaperHolding>,
}

#[derive(Debug, Default)]
struct PaperState {
    accounts: HashMap<String, PaperAccount>,
    orders: HashMap<String, OrderFill>,
    /// Retained order ids, oldest first
    order_ids: VecDeque<String>,
    orders_placed: usize,
}

impl PaperState {
    fn record_fill(&mut self, fill: OrderFill) {
        self.orders_placed += 1;
        self.order_ids.push_back(fill.order_id.clone());
        self.orders.insert(fill.order_id.clone(), fill);
        while self.order_ids.len() > RETAINED_FILLS {
            if let Some(evicted) = self.order_ids.pop_front() {
                self.orders.remove(&evicted);
            }
        }
    }
}

struct PaperInner {
    state: RwLock<PaperState>,
    cache: Arc<dyn TickerCache>,
    initial_balance: Decimal,
    fee_rate: Decimal,
    default_leverage: u8,
    order_id_counter: AtomicU64,
}

/// Paper exchange shared by every simulated account.
#[derive(Clone)]
pub struct PaperExchange {
    inner: Arc<PaperInner>,
}

impl PaperExchange {
    pub fn new(
        cache: Arc<dyn TickerCache>,
        initial_balance: Decimal,
        fee_rate: Decimal,
        default_leverage: u8,
    ) -> Self {
        Self {
            inner: Arc::new(PaperInner {
                state: RwLock::new(PaperState::default()),
                cache,
                initial_balance,
                fee_rate,
                default_leverage,
                order_id_counter: AtomicU64::new(1),
            }),
        }
    }

    /// Seed holdings directly, bypassing fees and margin.
    pub async fn set_position(
        &self,
        account_id: &str,
        instrument: &InstrumentSpec,
        long_amount: Decimal,
        short_amount: Decimal,
        entry_price: Decimal,
    ) {
        let mut state = self.inner.state.write().await;
        let holding = self.holding_mut(&mut state, account_id, instrument);
        holding.long_amount = long_amount;
        holding.long_entry = entry_price;
        holding.short_amount = short_amount;
        holding.short_entry = entry_price;
    }

    /// Wallet balance of an account, excluding unrealized PnL.
    pub async fn wallet(&self, account_id: &str) -> Decimal {
        let state = self.inner.state.read().await;
        state
            .accounts
            .get(account_id)
            .map(|a| a.wallet)
            .unwrap_or(self.inner.initial_balance)
    }

    /// Number of orders filled so far.
    pub async fn order_count(&self) -> usize {
        self.inner.state.read().await.orders_placed
    }

    fn holding_mut<'s>(
        &self,
        state: &'s mut PaperState,
        account_id: &str,
        instrument: &InstrumentSpec,
    ) -> &'s mut PaperHolding {
        let initial = self.inner.initial_balance;
        let leverage = instrument.leverage_or(self.inner.default_leverage);
        state
            .accounts
            .entry(account_id.to_string())
            .or_insert_with(|| PaperAccount {
                wallet: initial,
                fees_paid: Decimal::ZERO,
                holdings: HashMap::new(),
            })
            .holdings
            .entry(instrument.symbol.clone())
            .or_insert_with(|| PaperHolding::new(instrument.contract_value, leverage))
    }

    fn next_order_id(&self) -> String {
        format!(
            "paper-{}",
            self.inner.order_id_counter.fetch_add(1, Ordering::SeqCst)
        )
    }

    fn mark(&self, symbol: &str, fallback: Decimal) -> Decimal {
        self.inner
            .cache
            .latest(symbol)
            .map(|t| t.mid())
            .unwrap_or(fallback)
    }

    async fn fill(
        &self,
        account_id: &str,
        instrument: &InstrumentSpec,
        order: &OrderRequest,
    ) -> Result<OrderAck> {
        let tick = self
            .inner
            .cache
            .latest(&instrument.symbol)
            .ok_or_else(|| anyhow!("No price for {} in paper exchange", instrument.symbol))?;
        let price = match (order.order_type, order.price) {
            (OrderType::Limit, Some(limit)) => limit,
            _ => tick.price_for(order.direction),
        };
        if price <= Decimal::ZERO {
            bail!("Invalid fill price {} for {}", price, instrument.symbol);
        }
        if order.amount <= Decimal::ZERO {
            bail!("Order quantity must be positive, got {}", order.amount);
        }
        if order
            .amount
            .checked_mul(price)
            .and_then(|notional| notional.checked_mul(instrument.contract_value))
            .is_none()
        {
            bail!(
                "Order notional of {} at {} overflows for {}",
                order.amount,
                price,
                instrument.symbol
            );
        }

        let fee_rate = self.inner.fee_rate;
        let mut state = self.inner.state.write().await;
        let holding = self.holding_mut(&mut state, account_id, instrument);
        let contract_value = holding.contract_value;

        let (quantity, realized) = match order.direction {
            Direction::OpenLong => {
                let total = holding.long_amount + order.amount;
                holding.long_entry = safe_div(
                    holding.long_entry * holding.long_amount + price * order.amount,
                    total,
                );
                holding.long_amount = total;
                (order.amount, Decimal::ZERO)
            }
            Direction::OpenShort => {
                let total = holding.short_amount + order.amount;
                holding.short_entry = safe_div(
                    holding.short_entry * holding.short_amount + price * order.amount,
                    total,
                );
                holding.short_amount = total;
                (order.amount, Decimal::ZERO)
            }
            Direction::CloseLong => {
                let quantity = order.amount.min(holding.long_amount);
                holding.long_amount -= quantity;
                (quantity, (price - holding.long_entry) * quantity * contract_value)
            }
            Direction::CloseShort => {
                let quantity = order.amount.min(holding.short_amount);
                holding.short_amount -= quantity;
                (quantity, (holding.short_entry - price) * quantity * contract_value)
            }
        };

        let fee = quantity * price * contract_value * fee_rate;
        if let Some(account) = state.accounts.get_mut(account_id) {
            account.wallet += realized - fee;
            account.fees_paid += fee;
        }

        let order_id = self.next_order_id();
        let status = if quantity > Decimal::ZERO {
            OrderStatus::Filled
        } else {
            OrderStatus::Expired
        };
        state.record_fill(OrderFill {
            order_id: order_id.clone(),
            status,
            filled_amount: quantity,
            avg_price: price,
        });

        info!(
            %order_id,
            account = %account_id,
            symbol = %instrument.symbol,
            direction = %order.direction,
            %quantity,
            %price,
            %fee,
            %realized,
            "Paper order executed"
        );

        Ok(OrderAck { order_id, status })
    }

    async fn balance(&self, account_id: &str) -> Balance {
        let state = self.inner.state.read().await;
        let (equity, available) = match state.accounts.get(account_id) {
            Some(account) => {
                let mut upnl = Decimal::ZERO;
                let mut margin = Decimal::ZERO;
                for (symbol, holding) in &account.holdings {
                    let mark = self.mark(symbol, holding.long_entry.max(holding.short_entry));
                    upnl += holding.unrealized_pnl(mark);
                    margin += holding.margin_used();
                }
                let equity = account.wallet + upnl;
                (equity, (equity - margin).max(Decimal::ZERO))
            }
            None => (self.inner.initial_balance, self.inner.initial_balance),
        };

        Balance {
            equity,
            available,
            observed_at: Utc::now(),
        }
    }
}

impl AdapterFactory for PaperExchange {
    fn create(
        &self,
        account: &AccountSpec,
        instrument: &InstrumentSpec,
    ) -> Result<Box<dyn ExchangeAdapter>> {
        debug!(account = %account.id, instrument = %instrument.id, "Creating paper adapter");
        Ok(Box::new(PaperAdapter {
            exchange: self.clone(),
            account_id: account.id.clone(),
            instrument: instrument.clone(),
        }))
    }
}

/// Paper adapter for one (account, instrument) pair.
pub struct PaperAdapter {
    exchange: PaperExchange,
    account_id: String,
    instrument: InstrumentSpec,
}

#[async_trait]
impl ExchangeAdapter for PaperAdapter {
    fn venue(&self) -> Venue {
        Venue::Paper
    }

    async fn get_position(&self) -> Result<Position> {
        let state = self.exchange.inner.state.read().await;
        let position = state
            .accounts
            .get(&self.account_id)
            .and_then(|a| a.holdings.get(&self.instrument.symbol))
            .map(|h| Position::new(h.long_amount, h.short_amount, Utc::now()))
            .unwrap_or_else(|| Position::flat(Utc::now()));
        Ok(position)
    }

    async fn get_balance(&self) -> Result<Balance> {
        Ok(self.exchange.balance(&self.account_id).await)
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        self.exchange
            .fill(&self.account_id, &self.instrument, order)
            .await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let state = self.exchange.inner.state.read().await;
        match state.orders.get(order_id) {
            Some(fill) => bail!("Order {} is already {:?}", order_id, fill.status),
            None => bail!("Unknown order {}", order_id),
        }
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderFill> {
        let state = self.exchange.inner.state.read().await;
        state
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown order {}", order_id))
    }

    async fn get_ticker(&self) -> Result<Tick> {
        self.exchange
            .inner
            .cache
            .latest(&self.instrument.symbol)
            .ok_or_else(|| anyhow!("No price for {} in paper exchange", self.instrument.symbol))
    }
}
