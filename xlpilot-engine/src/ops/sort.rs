use std::cmp::Ordering;

use xlpilot_plan::{SortDirection, SortParams};
use xlpilot_table::{Table, Value};

use super::col;
use crate::OpError;

/// Stable multi-key sort. Nulls go last whatever the direction.
pub(crate) fn sort(table: &mut Table, params: &SortParams) -> Result<String, OpError> {
    let keys = params
        .keys
        .iter()
        .map(|k| Ok((col(table, &k.column)?, k.direction)))
        .collect::<Result<Vec<_>, OpError>>()?;

    table.rows.sort_by(|a, b| {
        for (idx, dir) in &keys {
            let (x, y) = (a.get(*idx).unwrap_or(&Value::Null), b.get(*idx).unwrap_or(&Value::Null));
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => match dir {
                    SortDirection::Asc => x.sort_cmp(y),
                    SortDirection::Desc => y.sort_cmp(x),
                },
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });

    let described: Vec<String> = params
        .keys
        .iter()
        .map(|k| format!("{} {:?}", k.column, k.direction).to_lowercase())
        .collect();
    Ok(format!("sorted by {}", described.join(", ")))
}
