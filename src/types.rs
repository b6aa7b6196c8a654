//! Core input and connection types for a3s-recon

use crate::vault::Secret;
use serde::{Deserialize, Serialize};

/// A single row of the input table
///
/// Column 0 carries the card key, column 1 the item key. Cells are kept
/// exactly as read; sanitization happens in the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRow {
    /// 1-based ordinal used for reporting
    pub index: usize,

    /// Raw card-key cell (`None` for a null cell)
    pub card_key: Option<String>,

    /// Raw item-key cell (`None` for a null cell)
    pub item_key: Option<String>,
}

impl InputRow {
    pub fn new(index: usize, card_key: Option<&str>, item_key: Option<&str>) -> Self {
        Self {
            index,
            card_key: card_key.map(str::to_string),
            item_key: item_key.map(str::to_string),
        }
    }

    /// Build a row from positional cells; missing columns become `None`
    pub fn from_cells(index: usize, cells: &[Option<String>]) -> Self {
        Self {
            index,
            card_key: cells.first().cloned().flatten(),
            item_key: cells.get(1).cloned().flatten(),
        }
    }
}

/// Number a header-less table of positional cells from 1
pub fn rows_from_table(table: &[Vec<Option<String>>]) -> Vec<InputRow> {
    table
        .iter()
        .enumerate()
        .map(|(i, cells)| InputRow::from_cells(i + 1, cells))
        .collect()
}

/// Database engine behind the directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbServerType {
    #[serde(rename = "dst_MSSQL2016")]
    MsSql2016,
    #[serde(rename = "dst_MSSQL2017")]
    MsSql2017,
    #[serde(rename = "dst_MSSQL2019")]
    MsSql2019,
    #[default]
    #[serde(rename = "dst_HANADB")]
    HanaDb,
}

/// Plaintext connection parameters for opening a directory session
///
/// Produced from settings after the vault unprotects the passwords.
/// Never serialized.
#[derive(Debug, Clone, Default)]
pub struct ConnectionParams {
    pub server: String,
    pub db_server_type: DbServerType,
    pub db_user_name: String,
    pub db_password: Secret,
    pub company_db: String,
    pub user_name: String,
    pub password: Secret,
    pub license_server: String,
    pub sld_server: String,
}
