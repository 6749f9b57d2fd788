//! Symbolic column lists: what each operation does to a table's columns,
//! computed without touching data.

use crate::operation::{ColumnPosition, Operation};

/// Column names of one bound table at some point of a plan. An `open` view
/// has data-dependent columns (a pivot with a column axis) and accepts any name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaView {
    pub columns: Vec<String>,
    pub open: bool,
}

/// `name` if free, otherwise `name_N` with the smallest free `N >= 1`.
pub fn disambiguate(name: &str, taken: &[String]) -> String {
    if !taken.iter().any(|t| t == name) {
        return name.to_string();
    }
    (1..)
        .map(|n| format!("{name}_{n}"))
        .find(|candidate| !taken.iter().any(|t| t == candidate))
        .unwrap_or_else(|| name.to_string())
}

impl SchemaView {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            open: false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    fn index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Appends `name`, renamed if it collides, and returns the name used.
    pub fn append(&mut self, name: &str) -> String {
        let name = disambiguate(name, &self.columns);
        self.columns.push(name.clone());
        name
    }

    fn remove(&mut self, name: &str) {
        self.columns.retain(|c| c != name);
    }

    /// Where `add-column` inserts a new column.
    pub fn insert_index(&self, position: &ColumnPosition) -> usize {
        match position {
            ColumnPosition::End => self.columns.len(),
            ColumnPosition::Start => 0,
            ColumnPosition::After(c) => self.index(c).map_or(self.columns.len(), |i| i + 1),
            ColumnPosition::Before(c) => self.index(c).unwrap_or(self.columns.len()),
        }
    }
}

impl Operation {
    /// Applies this operation's effect on `target`'s columns. Returns the view
    /// of a newly derived table, if the operation creates one.
    pub fn project(
        &self,
        target: &mut SchemaView,
        source: Option<&SchemaView>,
    ) -> Option<SchemaView> {
        match self {
            Operation::AddColumn(p) => {
                if !target.contains(&p.name) {
                    let at = target.insert_index(&p.position);
                    target.columns.insert(at, p.name.clone());
                }
                None
            }
            Operation::DeleteColumn(p) => {
                for c in p.columns.iter() {
                    target.remove(c);
                }
                None
            }
            Operation::SplitColumn(p) => {
                for name in &p.new_columns {
                    target.append(name);
                }
                if p.drop_original {
                    target.remove(&p.column);
                }
                None
            }
            Operation::MergeColumns(p) => {
                if !p.keep_original {
                    for c in p.columns.iter() {
                        target.remove(c);
                    }
                }
                target.append(&p.new_name);
                None
            }
            Operation::LookupJoin(p) => {
                for (i, col) in p.return_columns.iter().enumerate() {
                    let name = p.new_names.0.get(i).unwrap_or(col);
                    target.append(name);
                }
                None
            }
            Operation::MergeVertical(_) => {
                match source {
                    Some(src) => {
                        for c in &src.columns {
                            if !target.contains(c) {
                                target.columns.push(c.clone());
                            }
                        }
                        target.open |= src.open;
                    }
                    None => target.open = true,
                }
                None
            }
            Operation::MergeHorizontal(p) => {
                let Some(src) = source else {
                    target.open = true;
                    return None;
                };
                let key = p.source_key_column.as_deref().unwrap_or(&p.key_column);
                let incoming: Vec<String> = if p.columns_to_add.is_empty() {
                    src.columns.iter().filter(|c| *c != key).cloned().collect()
                } else {
                    p.columns_to_add.0.clone()
                };
                for c in &incoming {
                    target.append(c);
                }
                target.open |= src.open;
                None
            }
            Operation::Pivot(p) => {
                let mut view = SchemaView::new(p.index.0.clone());
                if p.columns.is_empty() {
                    if let Some(values) = p.values.0.first() {
                        view.append(values);
                    }
                } else {
                    view.open = true;
                }
                Some(view)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view(cols: &[&str]) -> SchemaView {
        SchemaView::new(cols.iter().map(|s| s.to_string()).collect())
    }

    fn op(kind: &str, params: serde_json::Value) -> Operation {
        serde_json::from_value(json!({"type": kind, "params": params})).unwrap()
    }

    #[test]
    fn collision_suffix_picks_smallest_free() {
        let taken = vec!["amt".to_string(), "amt_1".to_string(), "amt_3".to_string()];
        assert_eq!(disambiguate("amt", &taken), "amt_2");
        assert_eq!(disambiguate("qty", &taken), "qty");
    }

    #[test]
    fn add_column_respects_position() {
        let mut v = view(&["a", "b", "c"]);
        op("ADD_COLUMN", json!({"name": "x", "formula": "a+1", "position": "before:b"}))
            .project(&mut v, None);
        assert_eq!(v.columns, vec!["a", "x", "b", "c"]);
    }

    #[test]
    fn merge_horizontal_renames_collisions() {
        let mut target = view(&["id", "amt"]);
        let source = view(&["id", "amt", "rep"]);
        op("MERGE_HORIZONTAL", json!({"key_column": "id"})).project(&mut target, Some(&source));
        assert_eq!(target.columns, vec!["id", "amt", "amt_1", "rep"]);
    }

    #[test]
    fn pivot_with_axis_is_open() {
        let mut target = view(&["region", "month", "amt"]);
        let derived = op(
            "PIVOT",
            json!({"index": "region", "columns": "month", "values": "amt"}),
        )
        .project(&mut target, None)
        .unwrap();
        assert!(derived.open);
        assert_eq!(derived.columns, vec!["region"]);
        assert_eq!(target.columns.len(), 3);
    }

    #[test]
    fn merge_vertical_unions_in_first_table_order() {
        let mut target = view(&["a", "b"]);
        let source = view(&["c", "a"]);
        op("MERGE_VERTICAL", json!({"source_table": "other"})).project(&mut target, Some(&source));
        assert_eq!(target.columns, vec!["a", "b", "c"]);
    }
}
