pub mod record_writer;
pub mod transaction_reader;
