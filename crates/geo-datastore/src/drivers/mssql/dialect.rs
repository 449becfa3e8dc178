//! Microsoft SQL Server dialect.

use crate::core::traits::Dialect;

/// SQL Server dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn quote_ident(&self, name: &str) -> String {
        // Square brackets, with embedded closing brackets doubled
        format!("[{}]", name.replace(']', "]]"))
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn apply_limit(&self, sql: String, limit: u64) -> String {
        // SQL Server limits rows with TOP, inserted after SELECT
        sql.replacen("SELECT ", &format!("SELECT TOP {} ", limit), 1)
    }
}
