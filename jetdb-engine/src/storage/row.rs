//! Row cracking: splitting a packed row region into per-column byte spans
//!
//! Row layout, front to back:
//!
//! ```text
//! [column count][fixed-length data][variable-length data]
//!     [variable offsets, last first][jump table (Jet3)][variable count][null bitmap]
//! ```
//!
//! Counts are one byte on Jet3 and two on Jet4. Jet3 offsets are single
//! bytes; each jump-table entry names the first variable column whose offset
//! lies in the next 256-byte block.

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

use crate::error::{JetError, JetResult};
use crate::schema::Table;
use crate::storage::format::Format;
use crate::storage::value::RawField;

/// Split a row into one [`RawField`] per column of `table`
pub fn crack_row(table: &Table, format: &Format, row: &Bytes, page: u32) -> JetResult<Vec<RawField>> {
    let len = row.len();
    let count_size = format.row_count_size;
    if len < count_size {
        return Err(JetError::invalid_data(page, "row is shorter than its column count"));
    }

    let num_cols = if format.is_jet3() {
        row[0] as usize
    } else {
        LittleEndian::read_u16(row) as usize
    };

    let bitmap_len = num_cols.div_ceil(8);
    if bitmap_len + count_size > len {
        return Err(JetError::invalid_data(
            page,
            format!("null bitmap for {} columns exceeds {} byte row", num_cols, len),
        ));
    }
    let bitmap = &row[len - bitmap_len..];

    let var_offsets = if table.has_variable_columns() {
        if format.is_jet3() {
            jet3_var_offsets(row, bitmap_len, page)?
        } else {
            jet4_var_offsets(row, bitmap_len, page)?
        }
    } else {
        Vec::new()
    };
    let num_var = var_offsets.len().saturating_sub(1);

    let mut fields = Vec::with_capacity(table.columns.len());
    let mut fixed_found = 0;

    for column in &table.columns {
        let bit = column.number_incl_deleted as usize;
        let present = bitmap
            .get(bit / 8)
            .map(|byte| byte & (1 << (bit % 8)) != 0)
            .unwrap_or(false);

        let span = if column.is_fixed() {
            if fixed_found < num_cols {
                fixed_found += 1;
                let start = format.row_fixed_start + column.offset_fixed as usize;
                Some(start..start + column.length as usize)
            } else {
                None
            }
        } else {
            let index = column.offset_variable as usize;
            if index < num_var {
                Some(var_offsets[index]..var_offsets[index + 1])
            } else {
                None
            }
        };

        let bytes = match span {
            Some(range) => {
                if range.start > range.end || range.end > len {
                    return Err(JetError::invalid_data(
                        page,
                        format!(
                            "column '{}' spans {}..{} outside its {} byte row",
                            column.name, range.start, range.end, len
                        ),
                    ));
                }
                Some(row.slice(range))
            }
            None => None,
        };

        fields.push(RawField {
            is_null: !present || bytes.is_none(),
            bytes,
        });
    }

    Ok(fields)
}

/// Jet4: 16-bit offsets, `count + 1` of them, stored last-first
fn jet4_var_offsets(row: &[u8], bitmap_len: usize, page: u32) -> JetResult<Vec<usize>> {
    let len = row.len();
    let col_ptr = len
        .checked_sub(bitmap_len + 2)
        .ok_or_else(|| JetError::invalid_data(page, "row too short for variable columns"))?;
    let num_var = LittleEndian::read_u16(&row[col_ptr..]) as usize;

    let table_len = (num_var + 1) * 2;
    if table_len + 2 > col_ptr {
        return Err(JetError::invalid_data(
            page,
            format!("offset table for {} variable columns exceeds the row", num_var),
        ));
    }

    Ok((0..=num_var)
        .map(|i| LittleEndian::read_u16(&row[col_ptr - 2 * (i + 1)..]) as usize)
        .collect())
}

/// Jet3: byte offsets plus a jump table adding 256 per jump passed
fn jet3_var_offsets(row: &[u8], bitmap_len: usize, page: u32) -> JetResult<Vec<usize>> {
    let len = row.len();
    let too_short = || JetError::invalid_data(page, "row too short for variable columns");

    let num_var = row[len.checked_sub(bitmap_len + 1).ok_or_else(too_short)?] as usize;
    let mut num_jumps = (len - 1) / 256;
    let col_ptr = len
        .checked_sub(bitmap_len + num_jumps + 2)
        .ok_or_else(too_short)?;

    if col_ptr < num_var + 1 {
        return Err(JetError::invalid_data(
            page,
            format!("offset table for {} variable columns exceeds the row", num_var),
        ));
    }

    // The last jump slot may be padding
    if (col_ptr - num_var) / 256 < num_jumps {
        num_jumps -= 1;
    }

    // Jump entries are read backwards starting just before the variable count
    let jump_end = len - bitmap_len - 1;
    let mut jumps_used = 0;
    let mut offsets = Vec::with_capacity(num_var + 1);
    for i in 0..=num_var {
        while jumps_used < num_jumps && i == row[jump_end - jumps_used - 1] as usize {
            jumps_used += 1;
        }
        offsets.push(row[col_ptr - i] as usize + jumps_used * 256);
    }
    Ok(offsets)
}
