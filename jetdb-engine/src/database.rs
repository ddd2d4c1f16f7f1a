//! Open databases
//!
//! A [`Database`] owns the page reader and the parsed header. Opening reads
//! page 0, then bootstraps the system catalog (MSysObjects, definition page
//! 2) to learn which tables exist. Table definitions are parsed on first use
//! and cached; rows are read lazily through [`Rows`].

use std::collections::HashMap;
use std::io::{self, Read, Seek};
use std::path::Path;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{JetError, JetResult};
use crate::file_manager::reader::PageReader;
use crate::file_manager::source::{
    FactorySource, FileSource, PageSource, SharedStream, UnlockedStream,
};
use crate::options::{ReaderOptions, TableNameComparison};
use crate::schema::{Column, Table};
use crate::storage::format::{CATALOG_PAGE, MIN_FILE_SIZE, MIN_PAGE_SIZE};
use crate::storage::header::DatabaseHeader;
use crate::storage::lval::{LongValue, LongValueReader};
use crate::storage::page::{DataPage, PageType, RowPointer};
use crate::storage::row::crack_row;
use crate::storage::tdef;
use crate::storage::usage_map::{read_usage_map, UsagePages};
use crate::storage::value::{decode, Value};

const CATALOG_NAME: &str = "MSysObjects";

/// Catalog object type for tables (local, system and hidden alike)
const OBJECT_TYPE_TABLE: i16 = 1;

/// One row of MSysObjects
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogObject {
    pub id: i32,
    pub name: String,
    pub object_type: i16,
    /// `None` when the Flags cell is NULL
    pub flags: Option<i32>,
}

impl CatalogObject {
    /// Definition page of a table object
    pub fn definition_page(&self) -> u32 {
        (self.id as u32) & 0x00FF_FFFF
    }

    fn is_table(&self) -> bool {
        self.object_type & 0x7F == OBJECT_TYPE_TABLE
    }

    /// Ordinary user table: not system, hidden or linked
    ///
    /// A NULL Flags cell does not qualify; only an explicit 0 does.
    pub fn is_user_table(&self) -> bool {
        self.is_table() && self.flags == Some(0)
    }

    /// Table object carrying system or hidden flags
    pub fn is_system_table(&self) -> bool {
        self.is_table() && matches!(self.flags, Some(flags) if flags != 0)
    }
}

/// An open, read-only database
pub struct Database<S> {
    reader: PageReader<S>,
    header: DatabaseHeader,
    options: ReaderOptions,
    objects: Vec<CatalogObject>,
    /// Parsed definitions keyed by definition page
    tables: Mutex<HashMap<u32, Arc<Table>>>,
}

impl Database<FileSource> {
    /// Open a file with default options
    pub fn open(path: impl AsRef<Path>) -> JetResult<Self> {
        Self::open_with(path, ReaderOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: ReaderOptions) -> JetResult<Self> {
        Self::with_source(FileSource::open(path)?, options)
    }
}

impl<R: Read + Seek> Database<SharedStream<R>> {
    /// Read from one stream, locking it around each page read
    pub fn from_stream(stream: R, options: ReaderOptions) -> JetResult<Self> {
        Self::with_source(SharedStream::new(stream), options)
    }
}

impl<R: Read + Seek> Database<UnlockedStream<R>> {
    /// Read from one stream without locking; the database is not `Sync`
    pub fn from_stream_unlocked(stream: R, options: ReaderOptions) -> JetResult<Self> {
        Self::with_source(UnlockedStream::new(stream), options)
    }
}

impl<F, R> Database<FactorySource<F>>
where
    F: Fn() -> io::Result<R>,
    R: Read + Seek,
{
    /// Read through a fresh stream per page from `factory`
    pub fn from_factory(factory: F, options: ReaderOptions) -> JetResult<Self> {
        Self::with_source(FactorySource::new(factory), options)
    }
}

impl<S: PageSource> Database<S> {
    /// Open over any page source
    pub fn with_source(source: S, options: ReaderOptions) -> JetResult<Self> {
        if options.cancel.is_cancelled() {
            return Err(JetError::Cancelled);
        }

        let len = source.byte_len()?;
        if len < MIN_FILE_SIZE {
            return Err(JetError::NotJetDatabase(format!(
                "file is {} bytes, at least {} needed",
                len, MIN_FILE_SIZE
            )));
        }

        let mut first = vec![0u8; MIN_PAGE_SIZE];
        source.read_at(0, &mut first)?;
        let header = DatabaseHeader::parse(&first)?;
        debug!(
            "Opening {:?} database: page size {}, codepage {}, encrypted {}",
            header.version,
            header.page_size,
            header.codepage,
            header.is_encrypted()
        );

        let reader = PageReader::new(source, header.format(), header.db_key, options.cancel.clone());
        let mut db = Database {
            reader,
            header,
            options,
            objects: Vec::new(),
            tables: Mutex::new(HashMap::new()),
        };
        db.objects = db.load_catalog()?;
        Ok(db)
    }

    fn load_catalog(&self) -> JetResult<Vec<CatalogObject>> {
        let catalog = Arc::new(tdef::read_table(
            &self.reader,
            CATALOG_PAGE,
            CATALOG_NAME,
            &self.header,
            self.options.max_table_definition_size,
        )?);
        self.tables.lock().insert(CATALOG_PAGE, catalog.clone());

        let mut objects = Vec::new();
        for row in self.rows_with_columns(&catalog, &["Id", "Name", "Type", "Flags"])? {
            let row = row?;
            let id = row.get("Id")?.as_i32()?;
            let name = row.get("Name")?.as_str()?.map(str::to_string);
            let (id, name) = match (id, name) {
                (Some(id), Some(name)) => (id, name),
                _ => {
                    warn!("Skipping catalog object without id or name");
                    continue;
                }
            };
            objects.push(CatalogObject {
                id,
                name,
                object_type: row.get("Type")?.as_i32()?.unwrap_or(0) as i16,
                flags: row.get("Flags")?.as_i32()?,
            });
        }

        debug!(
            "Loaded catalog: {} objects, {} user tables",
            objects.len(),
            objects.iter().filter(|o| o.is_user_table()).count()
        );
        Ok(objects)
    }

    pub fn header(&self) -> &DatabaseHeader {
        &self.header
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Every catalog object, tables or not
    pub fn objects(&self) -> &[CatalogObject] {
        &self.objects
    }

    /// Names of user tables in catalog order
    pub fn table_names(&self) -> Vec<&str> {
        self.objects
            .iter()
            .filter(|o| o.is_user_table())
            .map(|o| o.name.as_str())
            .collect()
    }

    /// Names of system and hidden tables in catalog order
    pub fn system_table_names(&self) -> Vec<&str> {
        self.objects
            .iter()
            .filter(|o| o.is_system_table())
            .map(|o| o.name.as_str())
            .collect()
    }

    /// Look up a user table
    pub fn table(&self, name: &str) -> JetResult<Arc<Table>> {
        self.find_table(name, CatalogObject::is_user_table)
    }

    /// Look up a system or hidden table
    pub fn system_table(&self, name: &str) -> JetResult<Arc<Table>> {
        self.find_table(name, CatalogObject::is_system_table)
    }

    /// All user tables, parsing any not yet cached
    pub fn tables(&self) -> JetResult<Vec<Arc<Table>>> {
        self.table_names()
            .into_iter()
            .map(|name| self.table(name))
            .collect()
    }

    fn find_table(&self, name: &str, filter: fn(&CatalogObject) -> bool) -> JetResult<Arc<Table>> {
        self.check_open()?;
        let comparison = self.options.table_name_comparison;
        let object = self
            .objects
            .iter()
            .filter(|o| filter(o))
            .find(|o| comparison.matches(&o.name, name))
            .ok_or_else(|| JetError::TableNotFound(name.to_string()))?;
        self.load_table(object)
    }

    fn load_table(&self, object: &CatalogObject) -> JetResult<Arc<Table>> {
        let page = object.definition_page();
        if let Some(table) = self.tables.lock().get(&page) {
            return Ok(table.clone());
        }

        // Parsed outside the lock; a racing parse of the same table keeps the first
        let table = Arc::new(tdef::read_table(
            &self.reader,
            page,
            &object.name,
            &self.header,
            self.options.max_table_definition_size,
        )?);
        Ok(self.tables.lock().entry(page).or_insert(table).clone())
    }

    /// Every row of `table`
    pub fn rows(&self, table: &Arc<Table>) -> JetResult<Rows<'_, S>> {
        let selected = (0..table.columns.len()).collect();
        self.rows_selected(table, selected)
    }

    /// Position of a column of `table`, compared the way table names are
    pub fn column_index(&self, table: &Table, name: &str) -> JetResult<usize> {
        table.column_index_with(name, self.options.table_name_comparison)
    }

    /// Rows of `table` holding only the named columns, in the order given
    pub fn rows_with_columns(&self, table: &Arc<Table>, columns: &[&str]) -> JetResult<Rows<'_, S>> {
        let selected = columns
            .iter()
            .map(|name| self.column_index(table, name))
            .collect::<JetResult<Vec<_>>>()?;
        self.rows_selected(table, selected)
    }

    fn rows_selected(&self, table: &Arc<Table>, selected: Vec<usize>) -> JetResult<Rows<'_, S>> {
        self.check_open()?;
        let map = read_usage_map(&self.reader, table.used_pages)?;
        let columns: Arc<[Column]> = selected.iter().map(|&i| table.columns[i].clone()).collect();
        Ok(Rows {
            db: self,
            table: table.clone(),
            columns,
            selected,
            pages: map.pages(&self.reader),
            current: None,
            next_row: 0,
            finished: false,
        })
    }

    /// Stream over a Memo or OLE value
    pub fn long_value_reader<'a>(&'a self, value: &'a LongValue) -> LongValueReader<'a, S> {
        LongValueReader::new(&self.reader, value, self.options.max_long_value_size)
    }

    /// Whole Memo or OLE value as bytes
    pub fn read_long_value(&self, value: &LongValue) -> JetResult<Vec<u8>> {
        self.long_value_reader(value).read_to_end()
    }

    /// Whole Memo value as text
    pub fn read_memo(&self, value: &LongValue) -> JetResult<String> {
        self.long_value_reader(value).read_text()
    }

    /// Number of whole pages in the file
    pub fn page_count(&self) -> JetResult<u32> {
        self.reader.page_count()
    }

    /// Type tag of a page
    pub fn page_type(&self, page_number: u32) -> JetResult<PageType> {
        self.reader.page_type(page_number)
    }

    /// Release the database; later reads fail with [`JetError::Disposed`]
    pub fn close(&self) {
        debug!("Closing database");
        self.reader.close();
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_closed()
    }

    fn check_open(&self) -> JetResult<()> {
        if self.reader.is_closed() {
            return Err(JetError::Disposed);
        }
        Ok(())
    }

    /// Row region an overflow slot points at
    fn overflow_row(&self, page: &DataPage, row: usize) -> JetResult<(Bytes, u32)> {
        let stub = page.row_bytes(row)?;
        let target = RowPointer::read(&stub, 0).ok_or_else(|| {
            JetError::invalid_data(page.page_number(), "overflow row is too short for its pointer")
        })?;
        trace!(
            "Row {} of page {} continues at {}:{}",
            row,
            page.page_number(),
            target.page,
            target.row
        );
        let data = self.reader.read_page(target.page, PageType::Data)?;
        let target_page = DataPage::new(target.page, data, self.reader.format())?;
        Ok((target_page.row_bytes(target.row as usize)?, target.page))
    }
}

/// Lazy row iterator over one table
///
/// Deleted rows are skipped. The first error ends the iteration.
pub struct Rows<'a, S> {
    db: &'a Database<S>,
    table: Arc<Table>,
    columns: Arc<[Column]>,
    /// Table column index of each produced value
    selected: Vec<usize>,
    pages: UsagePages<'a, S>,
    current: Option<DataPage>,
    next_row: usize,
    finished: bool,
}

impl<S: PageSource> Rows<'_, S> {
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    fn advance(&mut self) -> JetResult<Option<Row>> {
        loop {
            if let Some(page) = &self.current {
                while self.next_row < page.row_count() {
                    let row = self.next_row;
                    self.next_row += 1;

                    let slot = page.slot(row)?;
                    if slot.is_deleted() {
                        continue;
                    }
                    let (bytes, page_number) = if slot.is_overflow() {
                        self.db.overflow_row(page, row)?
                    } else {
                        (page.row_bytes(row)?, page.page_number())
                    };
                    return self.decode_row(&bytes, page_number).map(Some);
                }
                self.current = None;
            }

            let page_number = match self.pages.next() {
                Some(page_number) => page_number?,
                None => return Ok(None),
            };
            let data = self.db.reader.read_page(page_number, PageType::Data)?;
            let owner = LittleEndian::read_u32(&data[4..8]);
            if owner != self.table.definition_page {
                trace!(
                    "Skipping page {} owned by {} while reading '{}'",
                    page_number,
                    owner,
                    self.table.name
                );
                continue;
            }
            self.current = Some(DataPage::new(page_number, data, self.db.reader.format())?);
            self.next_row = 0;
        }
    }

    fn decode_row(&self, bytes: &Bytes, page: u32) -> JetResult<Row> {
        let fields = crack_row(&self.table, self.db.reader.format(), bytes, page)?;
        let values = self
            .selected
            .iter()
            .map(|&i| {
                decode(
                    &self.table.columns[i],
                    fields[i].clone(),
                    self.db.header.encoding,
                    page,
                )
            })
            .collect::<JetResult<Vec<_>>>()?;
        Ok(Row {
            columns: self.columns.clone(),
            values,
            comparison: self.db.options.table_name_comparison,
        })
    }
}

impl<S: PageSource> Iterator for Rows<'_, S> {
    type Item = JetResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.advance() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// One decoded row
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
    comparison: TableNameComparison,
}

impl Row {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Position of a column in this row
    pub fn index_of(&self, name: &str) -> JetResult<usize> {
        self.columns
            .iter()
            .position(|c| self.comparison.matches(&c.name, name))
            .ok_or_else(|| JetError::ColumnNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> JetResult<&Value> {
        Ok(&self.values[self.index_of(name)?])
    }

    pub fn get_by_index(&self, index: usize) -> JetResult<&Value> {
        self.values.get(index).ok_or(JetError::ColumnOutOfRange {
            index,
            count: self.values.len(),
        })
    }

    /// Name of the column at `index`
    pub fn name(&self, index: usize) -> JetResult<&str> {
        self.get_by_index(index)?;
        Ok(&self.columns[index].name)
    }

    pub fn is_null(&self, name: &str) -> JetResult<bool> {
        Ok(self.get(name)?.is_null())
    }
}
