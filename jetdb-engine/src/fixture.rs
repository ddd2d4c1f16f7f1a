//! Synthetic database images for tests
//!
//! Builds byte-exact Jet3/Jet4 files: header, catalog, table definitions,
//! usage maps, data pages and long-value pages.

use byteorder::{ByteOrder, LittleEndian};
use encoding_rs::WINDOWS_1252;

use crate::schema::{ColumnType, Table};
use crate::storage::format::{
    Format, JetVersion, CATALOG_PAGE, ENCRYPTED_HEADER_OFFSET, FORMAT_ID_OFFSET, HEADER_KEY,
    LVAL_TAG, MAGIC, VAR_COL_SENTINEL, VERSION_OFFSET,
};
use crate::storage::header::DatabaseHeader;
use crate::storage::page::PageType;
use crate::storage::rc4;
use crate::storage::tdef::parse_table;

pub const CODEPAGE: u16 = 1252;
pub const COLLATION: u16 = 0x0409;

fn version_byte(version: JetVersion) -> u8 {
    match version {
        JetVersion::Jet3 => 0,
        JetVersion::Jet4 => 1,
        JetVersion::Access2007 => 2,
        JetVersion::Access2010 => 3,
        JetVersion::Access2013 => 5,
        JetVersion::Access2016 => 6,
        JetVersion::Unknown(raw) => raw,
    }
}

/// Page 0 with the obfuscated header region filled in
pub fn header_page(
    version: JetVersion,
    codepage: u16,
    collation: u16,
    db_key: u32,
    created: f64,
) -> Vec<u8> {
    let format = Format::for_version(version);
    let mut page = vec![0u8; format.page_size];
    LittleEndian::write_u32(&mut page, MAGIC);
    let id = version.format_id();
    page[FORMAT_ID_OFFSET..FORMAT_ID_OFFSET + id.len()].copy_from_slice(id);
    page[VERSION_OFFSET] = version_byte(version);

    let layout = format.header;
    let mut region = vec![0u8; layout.encrypted_len];
    LittleEndian::write_u16(&mut region[layout.collation..], collation);
    LittleEndian::write_u16(&mut region[layout.codepage..], codepage);
    LittleEndian::write_u32(&mut region[layout.db_key..], db_key);
    LittleEndian::write_f64(&mut region[layout.creation_date..], created);
    rc4::apply_in_place(&mut region, &HEADER_KEY);
    page[ENCRYPTED_HEADER_OFFSET..ENCRYPTED_HEADER_OFFSET + region.len()].copy_from_slice(&region);
    page
}

/// Header for tests that only need a parsed one
pub fn header(version: JetVersion) -> DatabaseHeader {
    DatabaseHeader::parse(&header_page(version, CODEPAGE, COLLATION, 0, 0.0))
        .expect("fixture header parses")
}

/// Column declaration
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub length: u16,
    pub flags: u8,
    pub misc: [u8; 4],
    /// Number counting deleted columns; declaration order when unset
    pub number_incl_deleted: Option<u16>,
}

impl ColumnDef {
    pub fn fixed(name: &str, column_type: ColumnType, length: u16) -> Self {
        ColumnDef {
            name: name.to_string(),
            column_type,
            length,
            flags: 0x03,
            misc: [0; 4],
            number_incl_deleted: None,
        }
    }

    pub fn variable(name: &str, column_type: ColumnType, length: u16) -> Self {
        ColumnDef {
            name: name.to_string(),
            column_type,
            length,
            flags: 0x02,
            misc: [0; 4],
            number_incl_deleted: None,
        }
    }

    pub fn with_misc(mut self, misc: [u8; 4]) -> Self {
        self.misc = misc;
        self
    }

    /// Place the column at `number` as if earlier columns had been deleted
    pub fn numbered(mut self, number: u16) -> Self {
        self.number_incl_deleted = Some(number);
        self
    }

    fn is_fixed(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

/// Null-bitmap position of each column
fn bitmap_numbers(columns: &[ColumnDef]) -> Vec<usize> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| c.number_incl_deleted.map_or(i, usize::from))
        .collect()
}

/// Index declaration: name, type byte and the real index it uses
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub index_type: u8,
    pub real_index: u32,
    /// Columns of the backing real index as (column number, order)
    pub columns: Vec<(u16, u8)>,
}

/// Table declaration
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
    pub table_type: u8,
}

impl TableDef {
    pub fn new(name: &str, columns: Vec<ColumnDef>) -> Self {
        TableDef {
            name: name.to_string(),
            columns,
            indexes: Vec::new(),
            table_type: 0x4E,
        }
    }
}

/// Per-column placement derived from declaration order
struct Placement {
    offset_fixed: u16,
    offset_variable: u16,
}

fn placements(columns: &[ColumnDef]) -> Vec<Placement> {
    let mut fixed = 0u16;
    let mut var = 0u16;
    columns
        .iter()
        .map(|c| {
            if c.is_fixed() {
                let p = Placement {
                    offset_fixed: fixed,
                    offset_variable: 0,
                };
                fixed += c.length;
                p
            } else {
                let p = Placement {
                    offset_fixed: 0,
                    offset_variable: var,
                };
                var += 1;
                p
            }
        })
        .collect()
}

/// Encode text the way names and Jet3 text are stored
pub fn text_bytes(format: &Format, text: &str) -> Vec<u8> {
    if format.is_jet3() {
        WINDOWS_1252.encode(text).0.into_owned()
    } else {
        text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }
}

fn push_name(format: &Format, out: &mut Vec<u8>, name: &str) {
    let bytes = text_bytes(format, name);
    if format.tdef.name_len_size == 1 {
        out.push(bytes.len() as u8);
    } else {
        out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    }
    out.extend_from_slice(&bytes);
}

/// Definition payload (what follows byte 8 of the first definition page)
pub fn tdef_payload(format: &Format, table: &TableDef, row_count: u32, used_pages: u32) -> Vec<u8> {
    let t = &format.tdef;
    let columns = &table.columns;
    let num_var = columns.iter().filter(|c| !c.is_fixed()).count() as u16;

    let mut out = vec![0u8; t.cursor_start];
    LittleEndian::write_u32(&mut out[t.num_rows..], row_count);
    LittleEndian::write_u32(&mut out[t.next_autonum..], row_count + 1);
    if let Some(at) = t.autonum_increment {
        LittleEndian::write_u32(&mut out[at..], 1);
    }
    out[t.table_type] = table.table_type;
    LittleEndian::write_u16(&mut out[t.max_cols..], columns.len() as u16);
    LittleEndian::write_u16(&mut out[t.num_var_cols..], num_var);
    LittleEndian::write_u16(&mut out[t.num_cols..], columns.len() as u16);
    LittleEndian::write_u32(&mut out[t.num_indexes..], table.indexes.len() as u32);
    LittleEndian::write_u32(&mut out[t.num_real_indexes..], table.indexes.len() as u32);
    LittleEndian::write_u32(&mut out[t.used_pages..], used_pages);

    for _ in &table.indexes {
        let mut record = vec![0u8; t.real_index1_len];
        LittleEndian::write_u32(&mut record[t.real_index1_rows..], row_count);
        out.extend_from_slice(&record);
    }

    for (i, (column, place)) in columns.iter().zip(placements(columns)).enumerate() {
        let mut record = vec![0u8; t.column_len];
        record[t.col_type] = column.column_type.code();
        let number = column.number_incl_deleted.unwrap_or(i as u16);
        LittleEndian::write_u16(&mut record[t.col_num_incl_deleted..], number);
        LittleEndian::write_u16(&mut record[t.col_offset_var..], place.offset_variable);
        LittleEndian::write_u16(&mut record[t.col_num..], i as u16);
        record[t.col_misc..t.col_misc + 4].copy_from_slice(&column.misc);
        record[t.col_flags] = column.flags;
        LittleEndian::write_u16(&mut record[t.col_offset_fixed..], place.offset_fixed);
        LittleEndian::write_u16(&mut record[t.col_length..], column.length);
        out.extend_from_slice(&record);
    }
    for column in columns {
        push_name(format, &mut out, &column.name);
    }

    for index in &table.indexes {
        let mut record = vec![0u8; t.real_index2_len];
        for slot in 0..10 {
            let at = t.real_index2_columns + slot * 3;
            let (col, order) = index.columns.get(slot).copied().unwrap_or((VAR_COL_SENTINEL, 0));
            LittleEndian::write_u16(&mut record[at..], col);
            record[at + 2] = order;
        }
        LittleEndian::write_u32(&mut record[t.real_index2_first_data..], 0x77);
        record[t.real_index2_flags] = 0x01;
        out.extend_from_slice(&record);
    }

    for (i, index) in table.indexes.iter().enumerate() {
        let mut record = vec![0u8; t.index_len];
        LittleEndian::write_u32(&mut record[t.index_num..], i as u32);
        LittleEndian::write_u32(&mut record[t.index_num2..], index.real_index);
        LittleEndian::write_i32(&mut record[t.index_rel_index_num..], -1);
        record[t.index_type] = index.index_type;
        out.extend_from_slice(&record);
    }
    for index in &table.indexes {
        push_name(format, &mut out, &index.name);
    }

    out.extend_from_slice(&VAR_COL_SENTINEL.to_le_bytes());

    let len = out.len() as u32;
    LittleEndian::write_u32(&mut out[0..], len);
    out
}

/// Split a payload over definition pages, chaining them in order
pub fn tdef_pages(format: &Format, payload: &[u8], pages: &[u32]) -> Vec<Vec<u8>> {
    let per_page = format.tdef_payload_per_page();
    payload
        .chunks(per_page)
        .enumerate()
        .map(|(i, chunk)| {
            let mut page = vec![0u8; format.page_size];
            page[0] = PageType::TableDefinition as u8;
            page[1] = 0x01;
            if format.is_jet3() {
                page[2..4].copy_from_slice(b"VC");
            }
            let next = pages.get(i + 1).copied().unwrap_or(0);
            LittleEndian::write_u32(&mut page[4..], next);
            page[8..8 + chunk.len()].copy_from_slice(chunk);
            page
        })
        .collect()
}

/// Number of definition pages a payload needs
pub fn tdef_page_count(format: &Format, payload: &[u8]) -> usize {
    payload.len().div_ceil(format.tdef_payload_per_page()).max(1)
}

/// Parsed schema for a column list, via the real definition parser
pub fn table_schema(format: &Format, name: &str, columns: &[ColumnDef]) -> Table {
    let version = if format.is_jet3() {
        JetVersion::Jet3
    } else {
        JetVersion::Jet4
    };
    let payload = tdef_payload(format, &TableDef::new(name, columns.to_vec()), 0, 0);
    let mut buffer = payload;
    buffer.resize(buffer.len().max(format.tdef_payload_per_page()), 0);
    parse_table(&buffer, format, 5, name, &header(version)).expect("fixture table parses")
}

/// One column of a row being encoded
#[derive(Debug, Clone)]
pub enum Field {
    Null,
    Bytes(Vec<u8>),
    Bool(bool),
}

impl Field {
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Field::Bytes(bytes.into())
    }

    fn present(&self) -> bool {
        match self {
            Field::Null => false,
            Field::Bytes(_) => true,
            Field::Bool(v) => *v,
        }
    }
}

/// Pack a row region
pub fn encode_row(format: &Format, columns: &[ColumnDef], fields: &[Field]) -> Vec<u8> {
    assert_eq!(columns.len(), fields.len());
    let place = placements(columns);
    let fixed_len: usize = columns
        .iter()
        .filter(|c| c.is_fixed())
        .map(|c| c.length as usize)
        .sum();
    let count_size = format.row_count_size;
    let numbers = bitmap_numbers(columns);
    // Deleted columns still count toward the row's column count
    let column_count = numbers.iter().map(|n| n + 1).max().unwrap_or(0);

    let mut row = vec![0u8; count_size + fixed_len];
    if format.is_jet3() {
        row[0] = column_count as u8;
    } else {
        LittleEndian::write_u16(&mut row, column_count as u16);
    }

    for ((column, p), field) in columns.iter().zip(&place).zip(fields) {
        if let (true, Field::Bytes(bytes)) = (column.is_fixed(), field) {
            let at = count_size + p.offset_fixed as usize;
            let n = bytes.len().min(column.length as usize);
            row[at..at + n].copy_from_slice(&bytes[..n]);
        }
    }

    let mut offsets = vec![row.len()];
    for (column, field) in columns.iter().zip(fields) {
        if column.is_fixed() {
            continue;
        }
        if let Field::Bytes(bytes) = field {
            row.extend_from_slice(bytes);
        }
        offsets.push(row.len());
    }
    let num_var = offsets.len() - 1;

    if num_var > 0 {
        for offset in offsets.iter().rev() {
            if format.is_jet3() {
                row.push(*offset as u8);
            } else {
                row.extend_from_slice(&(*offset as u16).to_le_bytes());
            }
        }
        if format.is_jet3() {
            row.push(num_var as u8);
        } else {
            row.extend_from_slice(&(num_var as u16).to_le_bytes());
        }
    }

    let mut bitmap = vec![0u8; column_count.div_ceil(8)];
    for (&bit, field) in numbers.iter().zip(fields) {
        if field.present() {
            bitmap[bit / 8] |= 1 << (bit % 8);
        }
    }
    row.extend_from_slice(&bitmap);

    if format.is_jet3() {
        assert!(row.len() <= 256, "fixture cannot encode Jet3 jump tables");
    }
    row
}

/// Data page holding `rows`; each row may carry directory flags
pub fn data_page(format: &Format, owner: u32, rows: &[(Vec<u8>, u16)]) -> Vec<u8> {
    rows_page(format, owner.to_le_bytes(), rows)
}

/// Long-value page holding `rows`
pub fn lval_page(format: &Format, rows: &[Vec<u8>]) -> Vec<u8> {
    let rows: Vec<(Vec<u8>, u16)> = rows.iter().map(|r| (r.clone(), 0)).collect();
    rows_page(format, *LVAL_TAG, &rows)
}

fn rows_page(format: &Format, tag: [u8; 4], rows: &[(Vec<u8>, u16)]) -> Vec<u8> {
    let layout = format.data;
    let mut page = vec![0u8; format.page_size];
    page[0] = PageType::Data as u8;
    page[1] = 0x01;
    page[4..8].copy_from_slice(&tag);
    LittleEndian::write_u16(&mut page[layout.row_count..], rows.len() as u16);

    let mut end = format.page_size;
    for (i, (row, flags)) in rows.iter().enumerate() {
        let start = end - row.len();
        assert!(start >= layout.header_size + rows.len() * 2, "rows overflow the page");
        page[start..end].copy_from_slice(row);
        LittleEndian::write_u16(&mut page[layout.header_size + i * 2..], start as u16 | flags);
        end = start;
    }
    let free = end - (layout.header_size + rows.len() * 2);
    LittleEndian::write_u16(&mut page[2..], free as u16);
    page
}

/// Type-0 usage map covering `pages`
pub fn usage_map_type0(start: u32, pages: &[u32]) -> Vec<u8> {
    let span = pages.iter().map(|p| p - start + 1).max().unwrap_or(1) as usize;
    let mut map = vec![0u8; 5 + span.div_ceil(8)];
    LittleEndian::write_u32(&mut map[1..], start);
    for page in pages {
        let bit = (page - start) as usize;
        map[5 + bit / 8] |= 1 << (bit % 8);
    }
    map
}

/// First-data pointer for an inline long value
pub fn lval_inline(data: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 12];
    LittleEndian::write_u32(&mut out, data.len() as u32 | 0x8000_0000);
    out.extend_from_slice(data);
    out
}

/// First-data pointer referencing an LVAL row; `kind` is 0x40 or 0x00
pub fn lval_pointer(len: u32, kind: u8, page: u32, row: u8) -> Vec<u8> {
    let mut out = vec![0u8; 12];
    LittleEndian::write_u32(&mut out, len | (kind as u32) << 24);
    LittleEndian::write_u32(&mut out[4..], (page << 8) | row as u32);
    out
}

/// Catalog row before encoding
struct CatalogRow {
    id: i32,
    name: String,
    object_type: i16,
    flags: Option<i32>,
}

fn catalog_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::fixed("Id", ColumnType::Int32, 4),
        ColumnDef::fixed("ParentId", ColumnType::Int32, 4),
        ColumnDef::variable("Name", ColumnType::Text, 255),
        ColumnDef::fixed("Type", ColumnType::Int16, 2),
        ColumnDef::fixed("Flags", ColumnType::Int32, 4),
    ]
}

/// Whole-database builder
pub struct DbBuilder {
    version: JetVersion,
    format: &'static Format,
    pages: Vec<Vec<u8>>,
    catalog: Vec<CatalogRow>,
    db_key: u32,
    created: f64,
}

impl DbBuilder {
    pub fn new(version: JetVersion) -> Self {
        let format = Format::for_version(version);
        let mut builder = DbBuilder {
            version,
            format,
            pages: Vec::new(),
            catalog: Vec::new(),
            db_key: 0,
            created: 36526.25,
        };
        builder.push(vec![0u8; format.page_size]);
        builder.push(data_page(format, 0, &[]));
        // Page 2 is filled with the catalog definition in `build`
        builder.push(vec![0u8; format.page_size]);
        builder.catalog.push(CatalogRow {
            id: CATALOG_PAGE as i32,
            name: "MSysObjects".into(),
            object_type: 1,
            flags: Some(0x8000_0002u32 as i32),
        });
        builder
    }

    pub fn format(&self) -> &'static Format {
        self.format
    }

    pub fn with_key(mut self, db_key: u32) -> Self {
        self.db_key = db_key;
        self
    }

    /// Append a page and return its number
    pub fn push(&mut self, page: Vec<u8>) -> u32 {
        assert_eq!(page.len(), self.format.page_size);
        self.pages.push(page);
        (self.pages.len() - 1) as u32
    }

    pub fn next_page(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn set(&mut self, page_number: u32, page: Vec<u8>) {
        self.pages[page_number as usize] = page;
    }

    /// Extra catalog row (system objects, queries, linked tables)
    pub fn catalog_entry(&mut self, id: i32, name: &str, object_type: i16, flags: i32) {
        self.catalog_entry_with(id, name, object_type, Some(flags));
    }

    /// Catalog row whose Flags cell may be NULL
    pub fn catalog_entry_with(&mut self, id: i32, name: &str, object_type: i16, flags: Option<i32>) {
        self.catalog.push(CatalogRow {
            id,
            name: name.to_string(),
            object_type,
            flags,
        });
    }

    /// Write a table's definition, data pages and usage map; returns its definition page
    pub fn add_table(&mut self, table: &TableDef, rows: &[Vec<Field>]) -> u32 {
        let encoded: Vec<(Vec<u8>, u16)> = rows
            .iter()
            .map(|r| (encode_row(self.format, &table.columns, r), 0))
            .collect();
        let first = self.add_table_raw(table, &encoded);
        self.catalog_entry(first as i32, &table.name, 1, 0);
        first
    }

    /// Like `add_table` with pre-encoded rows and directory flags, not registered in the catalog
    pub fn add_table_raw(&mut self, table: &TableDef, rows: &[(Vec<u8>, u16)]) -> u32 {
        let format = self.format;
        let sizing = tdef_payload(format, table, rows.len() as u32, 0);
        let tdef_count = tdef_page_count(format, &sizing);
        let first = self.next_page();
        let tdef_numbers: Vec<u32> = (first..first + tdef_count as u32).collect();
        for _ in 0..tdef_count {
            self.push(vec![0u8; format.page_size]);
        }

        let data_pages = self.add_data_pages(first, rows);
        let map_page = self.push(data_page(
            format,
            first,
            &[(usage_map_type0(first, &data_pages), 0)],
        ));

        let payload = tdef_payload(format, table, rows.len() as u32, map_page << 8);
        for (number, page) in tdef_numbers.iter().zip(tdef_pages(format, &payload, &tdef_numbers)) {
            self.set(*number, page);
        }
        first
    }

    fn add_data_pages(&mut self, owner: u32, rows: &[(Vec<u8>, u16)]) -> Vec<u32> {
        let format = self.format;
        let capacity = format.page_size - format.data.header_size;
        let mut numbers = Vec::new();
        let mut batch: Vec<(Vec<u8>, u16)> = Vec::new();
        let mut used = 0;
        for row in rows {
            let need = row.0.len() + 2;
            if used + need > capacity && !batch.is_empty() {
                numbers.push(self.push(data_page(format, owner, &batch)));
                batch.clear();
                used = 0;
            }
            used += need;
            batch.push(row.clone());
        }
        if !batch.is_empty() {
            numbers.push(self.push(data_page(format, owner, &batch)));
        }
        numbers
    }

    fn write_catalog(&mut self) {
        let format = self.format;
        let columns = catalog_columns();
        let rows: Vec<(Vec<u8>, u16)> = self
            .catalog
            .iter()
            .map(|entry| {
                let fields = vec![
                    Field::bytes(entry.id.to_le_bytes()),
                    Field::bytes(0x0F00_0000i32.to_le_bytes()),
                    Field::bytes(text_bytes(format, &entry.name)),
                    Field::bytes(entry.object_type.to_le_bytes()),
                    entry.flags.map_or(Field::Null, |flags| Field::bytes(flags.to_le_bytes())),
                ];
                (encode_row(format, &columns, &fields), 0)
            })
            .collect();

        let mut table = TableDef::new("MSysObjects", columns);
        table.table_type = 0x53;
        let data_pages = self.add_data_pages(CATALOG_PAGE, &rows);
        let map_page = self.push(data_page(
            format,
            CATALOG_PAGE,
            &[(usage_map_type0(data_pages[0], &data_pages), 0)],
        ));
        let payload = tdef_payload(format, &table, rows.len() as u32, map_page << 8);
        let mut pages = tdef_pages(format, &payload, &[CATALOG_PAGE]);
        self.set(CATALOG_PAGE, pages.remove(0));
    }

    /// Finish the catalog and produce the file image
    pub fn build(mut self) -> Vec<u8> {
        self.write_catalog();
        self.pages[0] = header_page(self.version, CODEPAGE, COLLATION, self.db_key, self.created);

        let mut image = Vec::with_capacity(self.pages.len() * self.format.page_size);
        for (number, page) in self.pages.iter().enumerate() {
            let mut page = page.clone();
            if self.db_key != 0 && number != 0 {
                rc4::apply_in_place(&mut page, &rc4::page_key(self.db_key, number as u32));
            }
            image.extend_from_slice(&page);
        }
        image
    }
}
