//! Account and instrument registry.
//!
//! The registry is loaded once into an immutable [`InstrumentRegistry`] snapshot.
//! A reload builds a fresh snapshot and swaps the pointer held by
//! [`RegistryHandle`]; calls already in flight keep the snapshot they started with.

use crate::error::ExecutionError;
use crate::exchange::Venue;
use anyhow::{ensure, Context};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Trading account credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountSpec {
    pub id: String,
    pub venue: Venue,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
}

impl fmt::Debug for AccountSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSpec")
            .field("id", &self.id)
            .field("venue", &self.venue)
            .field("api_key", &mask(&self.api_key))
            .finish_non_exhaustive()
    }
}

fn mask(key: &str) -> String {
    if key.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", key.chars().take(4).collect::<String>())
    }
}

/// Tradable contract metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub id: String,
    pub venue: Venue,
    /// Exchange symbol (e.g. "BTCUSDT")
    pub symbol: String,
    /// Quote value of one contract unit
    #[serde(default = "default_contract_value")]
    pub contract_value: Decimal,
    /// Smallest tradable amount increment
    #[serde(default = "default_lot_size")]
    pub lot_size: Decimal,
    /// Leverage used for capacity; falls back to the execution default
    #[serde(default)]
    pub leverage: Option<u8>,
}

fn default_contract_value() -> Decimal {
    Decimal::ONE
}

fn default_lot_size() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

impl InstrumentSpec {
    pub fn leverage_or(&self, default: u8) -> u8 {
        self.leverage.unwrap_or(default).max(1)
    }
}

/// Immutable lookup table of accounts and instruments.
#[derive(Debug)]
pub struct InstrumentRegistry {
    accounts: HashMap<String, AccountSpec>,
    instruments: HashMap<String, InstrumentSpec>,
    loaded_at: DateTime<Utc>,
}

impl InstrumentRegistry {
    pub fn new(accounts: Vec<AccountSpec>, instruments: Vec<InstrumentSpec>) -> Self {
        Self {
            accounts: accounts.into_iter().map(|a| (a.id.clone(), a)).collect(),
            instruments: instruments.into_iter().map(|i| (i.id.clone(), i)).collect(),
            loaded_at: Utc::now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn account(&self, id: &str) -> Result<&AccountSpec, ExecutionError> {
        self.accounts
            .get(id)
            .ok_or_else(|| ExecutionError::UnknownAccount(id.to_string()))
    }

    pub fn instrument(&self, id: &str) -> Result<&InstrumentSpec, ExecutionError> {
        self.instruments
            .get(id)
            .ok_or_else(|| ExecutionError::UnknownInstrument(id.to_string()))
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountSpec> {
        self.accounts.values()
    }

    pub fn instruments(&self) -> impl Iterator<Item = &InstrumentSpec> {
        self.instruments.values()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn instrument_count(&self) -> usize {
        self.instruments.len()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Exchange symbols for every instrument on a venue.
    pub fn symbols_for(&self, venue: Venue) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .instruments
            .values()
            .filter(|i| i.venue == venue)
            .map(|i| i.symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }
}

/// JSON document listing accounts and instruments, as accepted by `registry import`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub accounts: Vec<AccountSpec>,
    #[serde(default)]
    pub instruments: Vec<InstrumentSpec>,
}

impl RegistryFile {
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read registry file {:?}", path.as_ref()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse registry file {:?}", path.as_ref()))
    }

    /// Reject duplicate ids and instruments with a non-positive lot or contract value.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for account in &self.accounts {
            ensure!(seen.insert(&account.id), "Duplicate account id {}", account.id);
        }
        seen.clear();
        for instrument in &self.instruments {
            ensure!(
                seen.insert(&instrument.id),
                "Duplicate instrument id {}",
                instrument.id
            );
            ensure!(
                instrument.lot_size > Decimal::ZERO && instrument.contract_value > Decimal::ZERO,
                "Instrument {} needs positive lot_size and contract_value",
                instrument.id
            );
        }
        Ok(())
    }
}

/// Shared pointer to the current registry snapshot.
#[derive(Debug)]
pub struct RegistryHandle {
    current: RwLock<Arc<InstrumentRegistry>>,
}

impl RegistryHandle {
    pub fn new(registry: InstrumentRegistry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
        }
    }

    /// Current snapshot; cheap to clone and safe to hold across awaits.
    pub fn snapshot(&self) -> Arc<InstrumentRegistry> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replace the snapshot, returning the previous one.
    pub fn swap(&self, registry: InstrumentRegistry) -> Arc<InstrumentRegistry> {
        let next = Arc::new(registry);
        info!(
            accounts = next.account_count(),
            instruments = next.instrument_count(),
            "Registry snapshot swapped"
        );
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn instrument(id: &str, symbol: &str) -> InstrumentSpec {
        InstrumentSpec {
            id: id.to_string(),
            venue: Venue::Paper,
            symbol: symbol.to_string(),
            contract_value: Decimal::ONE,
            lot_size: dec!(0.001),
            leverage: None,
        }
    }

    fn account(id: &str) -> AccountSpec {
        AccountSpec {
            id: id.to_string(),
            venue: Venue::Paper,
            api_key: "abcdefgh".to_string(),
            secret_key: "secret".to_string(),
        }
    }

    #[test]
    fn test_lookup_and_unknown_ids() {
        let registry = InstrumentRegistry::new(
            vec![account("main")],
            vec![instrument("btc-perp", "BTCUSDT")],
        );

        assert_eq!(registry.account("main").unwrap().id, "main");
        assert_eq!(registry.instrument("btc-perp").unwrap().symbol, "BTCUSDT");
        assert!(matches!(
            registry.account("nope"),
            Err(ExecutionError::UnknownAccount(_))
        ));
        assert!(matches!(
            registry.instrument("nope"),
            Err(ExecutionError::UnknownInstrument(_))
        ));
    }

    #[test]
    fn test_swap_keeps_old_snapshot_alive() {
        let handle = RegistryHandle::new(InstrumentRegistry::new(
            vec![account("main")],
            vec![instrument("btc-perp", "BTCUSDT")],
        ));

        let before = handle.snapshot();
        handle.swap(InstrumentRegistry::new(
            vec![account("main"), account("hedge")],
            vec![],
        ));
        let after = handle.snapshot();

        assert_eq!(before.instrument_count(), 1);
        assert!(before.instrument("btc-perp").is_ok());
        assert_eq!(after.account_count(), 2);
        assert!(after.instrument("btc-perp").is_err());
    }

    #[test]
    fn test_debug_masks_credentials() {
        let text = format!("{:?}", account("main"));
        assert!(text.contains("abcd****"));
        assert!(!text.contains("secret"));
    }

    #[test]
    fn test_registry_file_validation() {
        let file: RegistryFile = serde_json::from_str(
            r#"{
                "accounts": [{"id": "main", "venue": "paper"}],
                "instruments": [
                    {"id": "btc-perp", "venue": "paper", "symbol": "BTCUSDT"},
                    {"id": "btc-perp", "venue": "paper", "symbol": "BTCUSDT"}
                ]
            }"#,
        )
        .unwrap();
        assert!(file.validate().is_err());

        let mut file = file;
        file.instruments.pop();
        assert!(file.validate().is_ok());
        file.instruments[0].lot_size = Decimal::ZERO;
        assert!(file.validate().is_err());
    }

    #[test]
    fn test_spec_defaults_from_json() {
        let spec: InstrumentSpec = serde_json::from_str(
            r#"{"id": "eth-perp", "venue": "binance", "symbol": "ETHUSDT"}"#,
        )
        .unwrap();
        assert_eq!(spec.contract_value, Decimal::ONE);
        assert_eq!(spec.lot_size, dec!(0.001));
        assert_eq!(spec.leverage_or(5), 5);
    }
}
