//! The bet store adapter: the only abstraction over persistence.
//!
//! The coordinator never touches a file directly — it only calls
//! [`BetStore::append`] and [`BetStore::load_all`]. This keeps the
//! on-disk format an implementation detail of whichever adapter is
//! plugged in.

use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bet::Bet;
use crate::error::StoreError;

/// Abstract persistence collaborator for bets.
pub trait BetStore: Send + Sync {
    /// Durably appends every bet in `batch`. Callers must hold
    /// whatever external mutual-exclusion is appropriate (the
    /// coordinator's `FileLock`) before calling this — the adapter
    /// itself does not synchronize concurrent callers.
    fn append(&self, batch: &[Bet]) -> Result<(), StoreError>;

    /// Enumerates every bet ever appended, in append order.
    fn load_all(&self) -> Result<Vec<Bet>, StoreError>;
}

/// A row in the on-disk CSV representation. Plain tuple-of-strings
/// shape, matching [`Bet`] field-for-field, with no header row so the
/// file behaves as a simple append-only log.
#[derive(Debug, Serialize, Deserialize)]
struct BetRow {
    agency: u32,
    first_name: String,
    last_name: String,
    document: String,
    birthdate: String,
    number: String,
}

impl From<&Bet> for BetRow {
    fn from(bet: &Bet) -> Self {
        BetRow {
            agency: bet.agency,
            first_name: bet.first_name.clone(),
            last_name: bet.last_name.clone(),
            document: bet.document.clone(),
            birthdate: bet.birthdate.clone(),
            number: bet.number.clone(),
        }
    }
}

impl From<BetRow> for Bet {
    fn from(row: BetRow) -> Self {
        Bet {
            agency: row.agency,
            first_name: row.first_name,
            last_name: row.last_name,
            document: row.document,
            birthdate: row.birthdate,
            number: row.number,
        }
    }
}

/// A [`BetStore`] backed by a single append-only CSV file.
///
/// This is the concrete adapter the shipped binary uses; nothing in
/// [`crate::coordinator`] or [`crate::session`] knows this type
/// exists, only the [`BetStore`] trait.
pub struct CsvBetStore {
    path: PathBuf,
}

impl CsvBetStore {
    /// Opens (creating if necessary) a CSV-backed store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvBetStore { path: path.into() }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl BetStore for CsvBetStore {
    fn append(&self, batch: &[Bet]) -> Result<(), StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path())?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        for bet in batch {
            writer.serialize(BetRow::from(bet))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Bet>, StoreError> {
        if !self.path().exists() {
            return Ok(Vec::new());
        }
        let file = OpenOptions::new().read(true).open(self.path())?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(BufReader::new(file));

        let mut bets = Vec::new();
        for result in reader.deserialize::<BetRow>() {
            bets.push(Bet::from(result?));
        }
        Ok(bets)
    }
}

/// Pure winner predicate: a bet wins iff its `number` equals the
/// server's configured winning number.
pub fn has_won(bet: &Bet, winning_number: i64) -> bool {
    bet.number
        .parse::<i64>()
        .map(|n| n == winning_number)
        .unwrap_or(false)
}
