use crate::domain::transaction::NewTransaction;
use crate::error::{Result, SagaError};
use std::io::Read;

/// Reads transaction requests from a CSV source.
///
/// Expected header: `debit_account_id, credit_account_id, type_code, amount`.
/// Whitespace around fields is trimmed.
pub struct TransactionReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> TransactionReader<R> {
    /// Creates a new `TransactionReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes requests.
    ///
    /// A malformed row yields an error for that row only.
    pub fn transactions(self) -> impl Iterator<Item = Result<NewTransaction>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(SagaError::from))
    }
}
