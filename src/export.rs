use crate::types::TransferRecord;
use anyhow::{Context, Result};
use csv::Writer;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Destination for decoded transfers. `open` is called once before any
/// export, `close` once on every job exit path. `export_item` may be called
/// from several workers at once; implementations must not interleave
/// records.
pub trait TransferSink: Send + Sync {
    fn open(&self) -> Result<()>;
    fn export_item(&self, record: &TransferRecord) -> Result<()>;
    fn close(&self) -> Result<()>;
}

impl<S: TransferSink + ?Sized> TransferSink for Box<S> {
    fn open(&self) -> Result<()> {
        (**self).open()
    }

    fn export_item(&self, record: &TransferRecord) -> Result<()> {
        (**self).export_item(record)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

impl<S: TransferSink + ?Sized> TransferSink for std::sync::Arc<S> {
    fn open(&self) -> Result<()> {
        (**self).open()
    }

    fn export_item(&self, record: &TransferRecord) -> Result<()> {
        (**self).export_item(record)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

/// CSV sink with a header row. The writer lock serializes concurrent
/// exports.
pub struct CsvSink {
    writer: Mutex<Writer<Box<dyn Write + Send>>>,
}

impl CsvSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file {}", path.display()))?;
        Ok(CsvSink {
            writer: Mutex::new(Writer::from_writer(Box::new(file))),
        })
    }

    pub fn stdout() -> Self {
        CsvSink {
            writer: Mutex::new(Writer::from_writer(Box::new(std::io::stdout()))),
        }
    }
}

impl TransferSink for CsvSink {
    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn export_item(&self, record: &TransferRecord) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("CSV writer lock poisoned"))?;
        writer.serialize(record).context("Failed to write CSV record")
    }

    fn close(&self) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("CSV writer lock poisoned"))?;
        writer.flush().context("Failed to flush CSV output")
    }
}

/// One JSON object per line, for line-oriented downstream tooling.
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file {}", path.display()))?;
        Ok(JsonLinesSink {
            writer: Mutex::new(Box::new(file)),
        })
    }
}

impl TransferSink for JsonLinesSink {
    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn export_item(&self, record: &TransferRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("Failed to serialize record")?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("JSON writer lock poisoned"))?;
        writeln!(writer, "{}", line).context("Failed to write JSON record")
    }

    fn close(&self) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("JSON writer lock poisoned"))?;
        writer.flush().context("Failed to flush JSON output")
    }
}
