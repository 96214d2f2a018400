use crate::application::transactions::TransactionView;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct Row<'a> {
    id: &'a str,
    type_code: &'a str,
    amount: Decimal,
    status: &'static str,
}

/// Writes settled transactions as CSV (`id,type_code,amount,status`).
pub struct RecordWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_views(&mut self, views: &[TransactionView]) -> Result<()> {
        if views.is_empty() {
            self.writer
                .write_record(["id", "type_code", "amount", "status"])?;
        }
        for view in views {
            self.writer.serialize(Row {
                id: &view.transaction_external_id,
                type_code: &view.transaction_type.code,
                amount: view.amount.normalize(),
                status: view.transaction_status.name.as_str(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
