//! Header-first delimited text reader.

use crate::error::{MigrateError, Result};
use crate::mapping::HeaderIndex;
use csv::{ByteRecord, ReaderBuilder, StringRecord};
use std::io::Read;
use tracing::{debug, warn};

/// One data row together with its position in the source.
#[derive(Debug)]
pub struct DataRow<'a> {
    /// 1-based data row number; the header is row 0.
    pub number: u64,
    pub record: &'a StringRecord,
}

/// Rows of one delimited-text stream.
///
/// The first record is the header. Data rows whose width differs from the
/// header are logged and skipped. Fields that are not valid UTF-8 are
/// decoded lossily rather than failing the stream.
pub struct CsvRowSource<R: Read> {
    name: String,
    reader: csv::Reader<R>,
    header: HeaderIndex,
    raw: ByteRecord,
    record: StringRecord,
    row: u64,
    skipped: u64,
}

impl<R: Read> CsvRowSource<R> {
    /// Read the header of `reader` and index it.
    ///
    /// An empty stream yields a source with a zero-width header and no rows.
    pub fn new(name: impl Into<String>, reader: R) -> Result<Self> {
        let name = name.into();
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut first = ByteRecord::new();
        let header = if reader.read_byte_record(&mut first)? {
            let mut names = StringRecord::new();
            decode_lossy(&first, &mut names, &name, 0);
            HeaderIndex::from_header(names.iter(), &name)?
        } else {
            HeaderIndex::default()
        };
        debug!("{}: header has {} fields", name, header.width());

        Ok(Self {
            name,
            reader,
            header,
            raw: ByteRecord::new(),
            record: StringRecord::new(),
            row: 0,
            skipped: 0,
        })
    }

    /// Diagnostic name: the file path or `archive!entry`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &HeaderIndex {
        &self.header
    }

    /// Whether the stream had no header record at all.
    pub fn is_empty(&self) -> bool {
        self.header.width() == 0
    }

    /// Data rows skipped so far for having the wrong width.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Advance to the next well-formed data row. `None` at end of stream.
    pub fn next_row(&mut self) -> Result<Option<DataRow<'_>>> {
        if self.is_empty() {
            return Ok(None);
        }
        loop {
            if !self.reader.read_byte_record(&mut self.raw)? {
                return Ok(None);
            }
            self.row += 1;

            let found = self.raw.len();
            if found == self.header.width() {
                decode_lossy(&self.raw, &mut self.record, &self.name, self.row);
                return Ok(Some(DataRow {
                    number: self.row,
                    record: &self.record,
                }));
            }

            let err = MigrateError::RowShape {
                source_name: self.name.clone(),
                row: self.row,
                expected: self.header.width(),
                found,
            };
            warn!("Skipping row: {}", err);
            self.skipped += 1;
        }
    }
}

fn decode_lossy(raw: &ByteRecord, record: &mut StringRecord, name: &str, row: u64) {
    record.clear();
    for field in raw.iter() {
        let text = String::from_utf8_lossy(field);
        if matches!(text, std::borrow::Cow::Owned(_)) {
            debug!("{}: row {} has a field that is not valid UTF-8", name, row);
        }
        record.push_field(&text);
    }
}
