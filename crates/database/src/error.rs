use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to load environment variables for database connection: {0}")]
    ConnectionConfigError(String),

    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Stored data is invalid: {0}")]
    InvalidData(String),
}
