// 🏷️ Identifier Layer - closed set of warehouse tables
// Only names produced here (or read back from the catalog) ever reach SQL text

use crate::error::EtlError;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// LAYERS
// ============================================================================

/// Logical namespace of the warehouse (an attached database)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Full-refresh landing area
    Staging,
    /// Long-lived merge target
    Curated,
    /// Execution bookkeeping
    Logs,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Staging, Layer::Curated, Layer::Logs];

    /// Schema name the layer is attached under
    pub fn schema(&self) -> &'static str {
        match self {
            Layer::Staging => "scss",
            Layer::Curated => "ds",
            Layer::Logs => "logs",
        }
    }
}

// ============================================================================
// ENTITIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    FtPostingF,
    FtBalanceF,
    MdAccountD,
    MdCurrencyD,
    MdExchangeRateD,
    MdLedgerAccountS,
}

impl Entity {
    /// Every loadable entity, postings first
    pub const ALL: [Entity; 6] = [
        Entity::FtPostingF,
        Entity::FtBalanceF,
        Entity::MdAccountD,
        Entity::MdCurrencyD,
        Entity::MdExchangeRateD,
        Entity::MdLedgerAccountS,
    ];

    /// Entities merged through the generic upsert, in processing order
    pub const REFERENCE: [Entity; 5] = [
        Entity::FtBalanceF,
        Entity::MdAccountD,
        Entity::MdCurrencyD,
        Entity::MdExchangeRateD,
        Entity::MdLedgerAccountS,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            Entity::FtPostingF => "ft_posting_f",
            Entity::FtBalanceF => "ft_balance_f",
            Entity::MdAccountD => "md_account_d",
            Entity::MdCurrencyD => "md_currency_d",
            Entity::MdExchangeRateD => "md_exchange_rate_d",
            Entity::MdLedgerAccountS => "md_ledger_account_s",
        }
    }

    /// Source extract name: `FT_POSTING_F.csv`
    pub fn file_name(&self) -> String {
        format!("{}.csv", self.table_name().to_uppercase())
    }

    pub fn in_layer(&self, layer: Layer) -> QualifiedName {
        QualifiedName {
            layer,
            table: self.table_name(),
        }
    }

    pub fn staging(&self) -> QualifiedName {
        self.in_layer(Layer::Staging)
    }

    pub fn curated(&self) -> QualifiedName {
        self.in_layer(Layer::Curated)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for Entity {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Entity::ALL
            .iter()
            .copied()
            .find(|e| e.table_name() == lower)
            .ok_or_else(|| EtlError::UnknownTable(s.to_string()))
    }
}

// ============================================================================
// QUALIFIED NAMES
// ============================================================================

/// `"schema"."table"` for a table in the closed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub layer: Layer,
    pub table: &'static str,
}

impl QualifiedName {
    pub fn schema(&self) -> &'static str {
        self.layer.schema()
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", quote_ident(self.schema()), quote_ident(self.table))
    }
}

/// Quote an identifier for SQLite, doubling embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Comma-separated quoted column list
pub fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}
