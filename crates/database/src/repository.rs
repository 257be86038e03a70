use crate::DbError;
use chrono::{DateTime, Utc};
use core_types::{CurrentQuote, Instrument, PricePoint, RankingKind};
use sqlx::postgres::PgPool;
use sqlx::Row;

/// The `DbRepository` provides a high-level, application-specific interface
/// to the database. It encapsulates all SQL queries and data access logic.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

/// One row of the persisted ranking cache.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRanking {
    pub kind: RankingKind,
    pub ticker: Option<String>,
    pub score: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // --- Instruments ---

    /// Lists every tracked instrument, ordered by ticker.
    pub async fn list_instruments(&self) -> Result<Vec<Instrument>, DbError> {
        let rows = sqlx::query("SELECT ticker, name FROM instruments ORDER BY ticker ASC")
            .fetch_all(&self.pool)
            .await?;

        let instruments = rows
            .into_iter()
            .map(|row| -> Result<Instrument, DbError> {
                Ok(Instrument {
                    ticker: row.try_get("ticker")?,
                    name: row.try_get("name")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(instruments)
    }

    /// Inserts an instrument. Returns `false` if the ticker was already tracked.
    pub async fn insert_instrument(&self, ticker: &str) -> Result<bool, DbError> {
        let result = sqlx::query(
            "INSERT INTO instruments (ticker) VALUES ($1) ON CONFLICT (ticker) DO NOTHING",
        )
        .bind(ticker)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes an instrument together with its price history and current quote.
    /// Returns `false` if the ticker was unknown.
    pub async fn delete_instrument(&self, ticker: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM instruments WHERE ticker = $1")
            .bind(ticker)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // --- Price history ---

    /// Fetches the full price history of an instrument.
    ///
    /// The result is ordered by date for convenience, but callers must not rely
    /// on it. Unknown tickers yield an empty history.
    pub async fn get_price_history(&self, ticker: &str) -> Result<Vec<PricePoint>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT p.trade_date, p.open, p.close, p.high, p.low, p.volume
            FROM price_points AS p
            JOIN instruments AS i ON i.instrument_id = p.instrument_id
            WHERE i.ticker = $1
            ORDER BY p.trade_date ASC
            "#,
        )
        .bind(ticker)
        .fetch_all(&self.pool)
        .await?;

        let points = rows
            .into_iter()
            .map(|row| -> Result<PricePoint, DbError> {
                Ok(PricePoint {
                    date: row.try_get("trade_date")?,
                    open: row.try_get("open")?,
                    close: row.try_get("close")?,
                    high: row.try_get("high")?,
                    low: row.try_get("low")?,
                    volume: row.try_get("volume")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(points)
    }

    /// Saves a batch of price points for one instrument in a single transaction.
    ///
    /// The instrument is created if needed. Uses `ON CONFLICT DO NOTHING` so a
    /// re-import of overlapping history is idempotent. Returns the number of
    /// newly inserted points.
    pub async fn save_price_points(&self, ticker: &str, points: &[PricePoint]) -> Result<u64, DbError> {
        let mut tx = self.pool.begin().await?;

        let instrument_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO instruments (ticker) VALUES ($1)
            ON CONFLICT (ticker) DO UPDATE SET ticker = EXCLUDED.ticker
            RETURNING instrument_id
            "#,
        )
        .bind(ticker)
        .fetch_one(&mut *tx)
        .await?;

        let mut inserted = 0;
        for point in points {
            let result = sqlx::query(
                r#"
                INSERT INTO price_points (instrument_id, trade_date, open, close, high, low, volume)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (instrument_id, trade_date) DO NOTHING
                "#,
            )
            .bind(instrument_id)
            .bind(point.date)
            .bind(point.open)
            .bind(point.close)
            .bind(point.high)
            .bind(point.low)
            .bind(point.volume)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        tracing::debug!(ticker, inserted, offered = points.len(), "Saved price points.");
        Ok(inserted)
    }

    // --- Current quotes ---

    /// Inserts or replaces the current quote of a tracked instrument.
    /// Returns `false` when the ticker is not tracked.
    pub async fn upsert_current_quote(&self, ticker: &str, quote: &CurrentQuote) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO current_quotes (instrument_id, price, change, change_pct, updated_at)
            SELECT instrument_id, $2, $3, $4, $5 FROM instruments WHERE ticker = $1
            ON CONFLICT (instrument_id) DO UPDATE SET
                price = EXCLUDED.price,
                change = EXCLUDED.change,
                change_pct = EXCLUDED.change_pct,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(ticker)
        .bind(quote.price)
        .bind(quote.change)
        .bind(quote.change_pct)
        .bind(quote.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetches the current quote of an instrument, if one was ever recorded.
    pub async fn get_current_quote(&self, ticker: &str) -> Result<Option<CurrentQuote>, DbError> {
        let row = sqlx::query(
            r#"
            SELECT q.price, q.change, q.change_pct, q.updated_at
            FROM current_quotes AS q
            JOIN instruments AS i ON i.instrument_id = q.instrument_id
            WHERE i.ticker = $1
            "#,
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<CurrentQuote, DbError> {
            Ok(CurrentQuote {
                price: row.try_get("price")?,
                change: row.try_get("change")?,
                change_pct: row.try_get("change_pct")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    // --- Ranking cache ---

    /// Replaces the persisted ranking cache with `rankings`.
    ///
    /// Runs in one transaction, so concurrent readers see either the previous
    /// or the new set, never a partially deleted table.
    pub async fn replace_rankings(&self, rankings: &[StoredRanking]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM ranking_cache")
            .execute(&mut *tx)
            .await?;

        for ranking in rankings {
            sqlx::query(
                "INSERT INTO ranking_cache (kind, ticker, score, computed_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(ranking.kind.as_str())
            .bind(ranking.ticker.as_deref())
            .bind(ranking.score)
            .bind(ranking.computed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Loads the persisted ranking cache.
    pub async fn load_rankings(&self) -> Result<Vec<StoredRanking>, DbError> {
        let rows = sqlx::query("SELECT kind, ticker, score, computed_at FROM ranking_cache")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| -> Result<StoredRanking, DbError> {
                let kind: String = row.try_get("kind")?;
                Ok(StoredRanking {
                    kind: kind
                        .parse()
                        .map_err(|e: core_types::CoreError| DbError::InvalidData(e.to_string()))?,
                    ticker: row.try_get("ticker")?,
                    score: row.try_get("score")?,
                    computed_at: row.try_get("computed_at")?,
                })
            })
            .collect()
    }
}
