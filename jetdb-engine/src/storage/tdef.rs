//! Table-definition (TDEF) parsing
//!
//! A definition may span several pages chained through the next-page pointer
//! at offset 4 of each page. The payload of every page (from offset 8) is
//! concatenated and then decoded in order:
//!
//! 1. table-level fields
//! 2. one short record per real index (row counts)
//! 3. one record per column
//! 4. column names
//! 5. one long record per real index (columns, pages, flags)
//! 6. one record per logical index, then index names
//! 7. variable-column usage-map pointers, up to a 0xFFFF sentinel

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use crate::error::{JetError, JetResult};
use crate::file_manager::reader::PageReader;
use crate::file_manager::source::PageSource;
use crate::schema::{
    Column, ColumnFlags, ColumnInfo, ColumnType, Index, IndexColumn, IndexType, RealIndex,
    Table, TableType, VarColumnMaps,
};
use crate::storage::format::{
    Format, REAL_INDEX_COLUMNS, VAR_COL_RECORD_LEN, VAR_COL_SENTINEL,
};
use crate::storage::header::DatabaseHeader;
use crate::storage::page::PageType;
use crate::storage::text::{decode_utf16, TextEncoding};

/// Jet3 definition pages carry this tag at offset 2
const JET3_TDEF_TAG: &[u8; 2] = b"VC";

/// Offset of the next-page pointer in a definition page
const NEXT_PAGE_OFFSET: usize = 4;

/// Offset of the declared definition length in the first page
const LENGTH_OFFSET: usize = 8;

/// Read and concatenate the payload of a (possibly chained) definition
pub fn assemble<S: PageSource>(
    reader: &PageReader<S>,
    first_page: u32,
    max_size: usize,
) -> JetResult<Vec<u8>> {
    let format = reader.format();
    let per_page = format.tdef_payload_per_page();

    let page = read_definition_page(reader, first_page)?;
    let declared = LittleEndian::read_u32(&page[LENGTH_OFFSET..]) as usize;
    if declared > max_size {
        return Err(JetError::invalid_data(
            first_page,
            format!(
                "table definition declares {} bytes, limit is {}",
                declared, max_size
            ),
        ));
    }

    let total = declared.max(per_page);
    let mut buffer = Vec::with_capacity(total);
    let mut next = LittleEndian::read_u32(&page[NEXT_PAGE_OFFSET..]);
    let mut current = first_page;
    buffer.extend_from_slice(&page[format.tdef_page_header..]);

    // Each page adds `per_page` bytes, so the loop is bounded by `total`
    while buffer.len() < total {
        if next == 0 {
            return Err(JetError::invalid_data(
                current,
                format!(
                    "table definition chain ends after {} of {} bytes",
                    buffer.len(),
                    total
                ),
            ));
        }
        let page = read_definition_page(reader, next)?;
        current = next;
        next = LittleEndian::read_u32(&page[NEXT_PAGE_OFFSET..]);
        buffer.extend_from_slice(&page[format.tdef_page_header..]);
    }

    buffer.truncate(total);
    Ok(buffer)
}

fn read_definition_page<S: PageSource>(
    reader: &PageReader<S>,
    page_number: u32,
) -> JetResult<bytes::Bytes> {
    let page = reader.read_page(page_number, PageType::TableDefinition)?;
    if reader.format().is_jet3() && &page[2..4] != JET3_TDEF_TAG {
        return Err(JetError::invalid_data(
            page_number,
            "table definition page is missing its VC tag",
        ));
    }
    Ok(page)
}

/// Read a table definition and freeze it into a [`Table`]
pub fn read_table<S: PageSource>(
    reader: &PageReader<S>,
    first_page: u32,
    name: &str,
    header: &DatabaseHeader,
    max_size: usize,
) -> JetResult<Table> {
    let buffer = assemble(reader, first_page, max_size)?;
    let table = parse_table(&buffer, reader.format(), first_page, name, header)?;
    debug!(
        "Parsed table '{}' from page {}: {} columns, {} indexes",
        table.name,
        first_page,
        table.columns.len(),
        table.indexes.len()
    );
    Ok(table)
}

/// Bounds-checked forward reader over the assembled definition
struct Slicer<'a> {
    buf: &'a [u8],
    pos: usize,
    page: u32,
}

impl<'a> Slicer<'a> {
    fn take(&mut self, len: usize) -> JetResult<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(JetError::invalid_data(
                self.page,
                format!(
                    "table definition truncated: {} bytes needed at offset {}",
                    len, self.pos
                ),
            )),
        }
    }

    fn name(&mut self, format: &Format, encoding: TextEncoding) -> JetResult<String> {
        if format.tdef.name_len_size == 1 {
            let len = self.take(1)?[0] as usize;
            Ok(encoding.decode(self.take(len)?))
        } else {
            let len = LittleEndian::read_u16(self.take(2)?) as usize;
            Ok(decode_utf16(self.take(len)?))
        }
    }
}

/// Column record before its name is known
struct ColumnBuilder {
    column_type: ColumnType,
    number: u16,
    number_incl_deleted: u16,
    offset_variable: u16,
    offset_fixed: u16,
    length: u16,
    flags: ColumnFlags,
    info: ColumnInfo,
}

impl ColumnBuilder {
    fn from_record(record: &[u8], format: &Format, encoding: TextEncoding, codepage: u16) -> Self {
        let t = &format.tdef;
        let column_type = ColumnType::from(record[t.col_type]);
        let misc = &record[t.col_misc..t.col_misc + 4];

        let info = if format.is_jet3() {
            if column_type.is_textual() {
                let column_codepage = LittleEndian::read_u16(&misc[2..]);
                ColumnInfo::Text {
                    collation: LittleEndian::read_u16(misc),
                    codepage: column_codepage,
                    encoding: if column_codepage == 0 {
                        encoding
                    } else {
                        TextEncoding::for_codepage(column_codepage)
                    },
                }
            } else {
                ColumnInfo::Decimal {
                    precision: misc[1],
                    scale: misc[2],
                }
            }
        } else if column_type.is_textual() {
            ColumnInfo::Text {
                collation: LittleEndian::read_u16(misc),
                codepage,
                encoding,
            }
        } else if column_type == ColumnType::Complex {
            ColumnInfo::Complex {
                definition_page: LittleEndian::read_u32(misc),
            }
        } else {
            ColumnInfo::Decimal {
                precision: misc[0],
                scale: misc[1],
            }
        };

        ColumnBuilder {
            column_type,
            number: LittleEndian::read_u16(&record[t.col_num..]),
            number_incl_deleted: LittleEndian::read_u16(&record[t.col_num_incl_deleted..]),
            offset_variable: LittleEndian::read_u16(&record[t.col_offset_var..]),
            offset_fixed: LittleEndian::read_u16(&record[t.col_offset_fixed..]),
            length: LittleEndian::read_u16(&record[t.col_length..]),
            flags: ColumnFlags::from_bits_retain(record[t.col_flags]),
            info,
        }
    }

    fn build(self, name: String) -> Column {
        Column {
            name,
            column_type: self.column_type,
            number: self.number,
            number_incl_deleted: self.number_incl_deleted,
            offset_variable: self.offset_variable,
            offset_fixed: self.offset_fixed,
            length: self.length,
            flags: self.flags,
            info: self.info,
        }
    }
}

/// Parse an assembled definition buffer
pub fn parse_table(
    buffer: &[u8],
    format: &Format,
    first_page: u32,
    name: &str,
    header: &DatabaseHeader,
) -> JetResult<Table> {
    let t = &format.tdef;
    let encoding = header.encoding;
    if buffer.len() < t.cursor_start {
        return Err(JetError::invalid_data(
            first_page,
            "table definition is shorter than its fixed header",
        ));
    }

    let u16_at = |offset: usize| LittleEndian::read_u16(&buffer[offset..]);
    let u32_at = |offset: usize| LittleEndian::read_u32(&buffer[offset..]);

    let row_count = u32_at(t.num_rows);
    let next_autonumber = u32_at(t.next_autonum);
    let autonumber_increment = t.autonum_increment.map(u32_at);
    let table_type = TableType::from(buffer[t.table_type]);
    let max_columns = u16_at(t.max_cols);
    let variable_column_count = u16_at(t.num_var_cols);
    let num_columns = u16_at(t.num_cols) as usize;
    let num_indexes = u32_at(t.num_indexes) as usize;
    let num_real_indexes = u32_at(t.num_real_indexes) as usize;
    let used_pages = u32_at(t.used_pages);
    let free_pages = u32_at(t.free_pages);

    let mut slicer = Slicer {
        buf: buffer,
        pos: t.cursor_start,
        page: first_page,
    };

    // Real indexes, first pass: row counts only
    let mut index_rows = Vec::with_capacity(num_real_indexes.min(1024));
    for _ in 0..num_real_indexes {
        let record = slicer.take(t.real_index1_len)?;
        index_rows.push(LittleEndian::read_u32(&record[t.real_index1_rows..]));
    }

    let mut builders = Vec::with_capacity(num_columns.min(1024));
    for _ in 0..num_columns {
        let record = slicer.take(t.column_len)?;
        builders.push(ColumnBuilder::from_record(
            record,
            format,
            encoding,
            header.codepage,
        ));
    }

    let mut columns = Vec::with_capacity(builders.len());
    for builder in builders {
        let name = slicer.name(format, encoding)?;
        columns.push(builder.build(name));
    }
    columns.sort_by_key(|c| c.number_incl_deleted);

    // Real indexes, second pass
    let mut real_indexes = Vec::with_capacity(index_rows.len());
    for rows in index_rows {
        let record = slicer.take(t.real_index2_len)?;
        let index_columns = (0..REAL_INDEX_COLUMNS)
            .map(|i| {
                let at = t.real_index2_columns + i * 3;
                IndexColumn {
                    column: LittleEndian::read_u16(&record[at..]),
                    order: record[at + 2],
                }
            })
            .filter(|c| c.column != VAR_COL_SENTINEL)
            .collect();
        let flags = if t.real_index2_flags_wide {
            LittleEndian::read_u16(&record[t.real_index2_flags..])
        } else {
            record[t.real_index2_flags] as u16
        };
        real_indexes.push(RealIndex {
            index_rows: rows,
            columns: index_columns,
            used_pages: LittleEndian::read_u32(&record[t.real_index2_used_pages..]),
            first_data_page: LittleEndian::read_u32(&record[t.real_index2_first_data..]),
            flags,
        });
    }

    // Logical indexes; names follow all records
    let mut index_records = Vec::with_capacity(num_indexes.min(1024));
    for _ in 0..num_indexes {
        index_records.push(slicer.take(t.index_len)?);
    }
    let mut indexes = Vec::with_capacity(index_records.len());
    for record in index_records {
        let name = slicer.name(format, encoding)?;
        indexes.push(Index {
            name,
            number: LittleEndian::read_u32(&record[t.index_num..]),
            real_index: LittleEndian::read_u32(&record[t.index_num2..]),
            related_table_type: record[t.index_rel_table_type],
            related_index: LittleEndian::read_i32(&record[t.index_rel_index_num..]),
            related_table_page: LittleEndian::read_i32(&record[t.index_rel_table_page..]),
            cascade_updates: record[t.index_cascade_updates] != 0,
            cascade_deletes: record[t.index_cascade_deletes] != 0,
            index_type: IndexType::from(record[t.index_type]),
        });
    }

    // Long-value usage maps per variable column
    let mut var_column_maps = Vec::new();
    loop {
        let column = LittleEndian::read_u16(slicer.take(2)?);
        if column == VAR_COL_SENTINEL {
            break;
        }
        let record = slicer.take(VAR_COL_RECORD_LEN - 2)?;
        var_column_maps.push(VarColumnMaps {
            column,
            used_pages: LittleEndian::read_u32(record),
            free_pages: LittleEndian::read_u32(&record[4..]),
        });
    }

    Ok(Table {
        name: name.to_string(),
        definition_page: first_page,
        table_type,
        row_count,
        next_autonumber,
        autonumber_increment,
        max_columns,
        variable_column_count,
        columns,
        indexes,
        real_indexes,
        var_column_maps,
        used_pages,
        free_pages,
    })
}
