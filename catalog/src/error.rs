/// Errors raised while querying the catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The database rejected or failed a query.
    #[cfg(feature = "postgres")]
    #[error("catalog query failed: {0}")]
    Database(#[from] sqlx::Error),

    /// A row held a value the catalog cannot represent.
    #[error("invalid catalog row: {0}")]
    InvalidRow(String),

    /// The catalog backend is unavailable.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}
