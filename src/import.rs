use anyhow::Context;
use chrono::NaiveDate;
use core_types::PricePoint;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// One row of a daily history export. Missing or empty numeric cells are null.
///
/// Numbers are read as text and parsed exactly, never through `f64`.
#[derive(Debug, Deserialize)]
struct HistoryRow {
    date: NaiveDate,
    #[serde(default)]
    open: Option<String>,
    #[serde(default)]
    high: Option<String>,
    #[serde(default)]
    low: Option<String>,
    #[serde(default)]
    close: Option<String>,
    #[serde(default)]
    volume: Option<String>,
}

impl HistoryRow {
    fn into_point(self) -> anyhow::Result<PricePoint> {
        Ok(PricePoint {
            date: self.date,
            open: parse_cell("open", self.open)?,
            close: parse_cell("close", self.close)?,
            high: parse_cell("high", self.high)?,
            low: parse_cell("low", self.low)?,
            volume: parse_cell("volume", self.volume)?,
        })
    }
}

fn parse_cell(column: &str, cell: Option<String>) -> anyhow::Result<Option<Decimal>> {
    match cell.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => Decimal::from_str(text)
            .map(Some)
            .with_context(|| format!("'{}' is not a number in column {}", text, column)),
    }
}

/// Reads a CSV file with a `date,open,high,low,close,volume` header.
pub fn read_history_file(path: &Path) -> anyhow::Result<Vec<PricePoint>> {
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    read_history(file).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Parses daily rows, keeping the first row seen for each date.
pub fn read_history<R: Read>(reader: R) -> anyhow::Result<Vec<PricePoint>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut points: BTreeMap<NaiveDate, PricePoint> = BTreeMap::new();
    for (line, row) in reader.deserialize::<HistoryRow>().enumerate() {
        let point = row
            .map_err(anyhow::Error::from)
            .and_then(HistoryRow::into_point)
            .with_context(|| format!("Invalid row {}", line + 2))?;
        points.entry(point.date).or_insert(point);
    }

    Ok(points.into_values().collect())
}

/// The ticker implied by a file name, e.g. `data/petr4.csv` -> `petr4`.
pub fn ticker_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_rows_with_missing_cells() {
        let data = "date,open,high,low,close,volume\n\
                    2024-01-02,10.5,11,10,10.8,1200\n\
                    2024-01-03,,,,,\n";

        let points = read_history(data.as_bytes()).unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].close, Some(dec!(10.8)));
        assert_eq!(points[0].volume, Some(dec!(1200)));
        assert_eq!(points[1].close, None);
    }

    #[test]
    fn duplicate_dates_keep_the_first_row() {
        let data = "date,close\n2024-01-03,5\n2024-01-02,4\n2024-01-03,99\n";

        let points = read_history(data.as_bytes()).unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(points[1].close, Some(dec!(5)));
    }

    #[test]
    fn malformed_date_is_reported_with_its_row() {
        let data = "date,close\n2024-01-02,1\nyesterday,2\n";
        let err = read_history(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("row 3"));
    }

    #[test]
    fn non_numeric_price_is_rejected() {
        let data = "date,close\n2024-01-02,n/a\n";
        assert!(read_history(data.as_bytes()).is_err());
    }

    #[test]
    fn ticker_comes_from_file_stem() {
        assert_eq!(ticker_from_path(Path::new("data/petr4.csv")).as_deref(), Some("petr4"));
    }
}
