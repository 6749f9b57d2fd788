//! Binds the names a planner used to the live schema.
//!
//! Columns resolve strict to loose: exact, then normalized spelling, then
//! Jaro-Winkler similarity with a clear winner. Anything else rejects the
//! plan. The resolver walks operations in order, tracking the columns each
//! operation leaves behind, so later steps may refer to columns earlier steps
//! create and may not refer to columns they removed.

use std::collections::BTreeMap;

use strsim::jaro_winkler;
use tracing::debug;
use xlpilot_plan::{
    is_wildcard, Operation, OperationKind, OperationPlan, PlannedOperation, RawPlan,
    ReferenceResolver, SchemaView, SourceRef, TableBinding, PRIMARY_BINDING,
};
use xlpilot_types::{CopilotError, FileSchema, SheetSchema};

/// A fuzzy winner must beat the runner-up by more than this.
const FUZZY_MARGIN: f64 = 0.02;

/// Case, whitespace and line breaks are ignored; `.N` and `_N` suffixes are the same.
pub fn normalize(name: &str) -> String {
    let folded: String = name
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    match folded.rsplit_once('.') {
        Some((stem, n))
            if !stem.is_empty() && !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) =>
        {
            format!("{stem}_{n}")
        }
        _ => folded,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NameMatch {
    Found(String),
    Ambiguous(Vec<String>),
    Missing,
}

pub fn match_name(wanted: &str, candidates: &[String], threshold: f64) -> NameMatch {
    if let Some(c) = candidates.iter().find(|c| c.as_str() == wanted) {
        return NameMatch::Found(c.clone());
    }
    let key = normalize(wanted);
    if key.is_empty() {
        return NameMatch::Missing;
    }

    let same: Vec<&String> = candidates.iter().filter(|c| normalize(c) == key).collect();
    match same.len() {
        0 => {}
        1 => return NameMatch::Found(same[0].clone()),
        _ => return NameMatch::Ambiguous(same.into_iter().cloned().collect()),
    }

    let mut scored: Vec<(f64, &String)> = candidates
        .iter()
        .map(|c| (jaro_winkler(&key, &normalize(c)), c))
        .filter(|(score, _)| *score >= threshold)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let Some(&(best, winner)) = scored.first() else {
        return NameMatch::Missing;
    };
    match scored.get(1) {
        Some(&(next, _)) if best - next <= FUZZY_MARGIN => NameMatch::Ambiguous(
            scored
                .iter()
                .take_while(|(s, _)| best - s <= FUZZY_MARGIN)
                .map(|(_, c)| (*c).clone())
                .collect(),
        ),
        _ => NameMatch::Found(winner.clone()),
    }
}

enum Unresolved {
    Reference(String),
    Invalid(String),
}

impl Unresolved {
    fn at(self, index: usize, kind: OperationKind) -> CopilotError {
        match self {
            Unresolved::Reference(m) => {
                CopilotError::AmbiguousReference(format!("operation {index} ({kind}): {m}"))
            }
            Unresolved::Invalid(m) => {
                CopilotError::ValidationError(format!("operation {index} ({kind}): {m}"))
            }
        }
    }
}

/// Column lookups for one operation.
struct ColumnScope<'v> {
    table: &'v str,
    view: &'v SchemaView,
    source: Option<(&'v str, &'v SchemaView)>,
    threshold: f64,
}

fn lookup(
    table: &str,
    view: &SchemaView,
    name: &str,
    threshold: f64,
) -> Result<String, Unresolved> {
    match match_name(name, &view.columns, threshold) {
        NameMatch::Found(c) => Ok(c),
        NameMatch::Missing if view.open => Ok(name.trim().to_string()),
        NameMatch::Missing => Err(Unresolved::Reference(format!(
            "column `{name}` matches nothing in `{table}` (columns: {})",
            view.columns.join(", ")
        ))),
        NameMatch::Ambiguous(options) => Err(Unresolved::Reference(format!(
            "column `{name}` in `{table}` could be any of {}",
            options.join(", ")
        ))),
    }
}

impl ReferenceResolver for ColumnScope<'_> {
    type Error = Unresolved;

    fn column(&mut self, name: &str) -> Result<String, Unresolved> {
        lookup(self.table, self.view, name, self.threshold)
    }

    fn columns(&mut self, names: &[String]) -> Result<Vec<String>, Unresolved> {
        if names.iter().any(|n| is_wildcard(n) && !self.view.contains(n)) {
            return Ok(self.view.columns.clone());
        }
        names.iter().map(|n| self.column(n)).collect()
    }

    fn source_column(&mut self, name: &str) -> Result<String, Unresolved> {
        let (table, view) = self
            .source
            .ok_or_else(|| Unresolved::Invalid("no secondary table is bound".into()))?;
        lookup(table, view, name, self.threshold)
    }
}

/// Resolves a planner plan against the schemas of a session's files.
/// The first file is the primary; its active sheet is bound as `main`.
pub struct PlanResolver<'a> {
    files: &'a [FileSchema],
    threshold: f64,
    bindings: Vec<TableBinding>,
    views: BTreeMap<String, SchemaView>,
}

impl<'a> PlanResolver<'a> {
    pub fn new(files: &'a [FileSchema], threshold: f64) -> Result<Self, CopilotError> {
        let primary = files
            .first()
            .ok_or_else(|| CopilotError::ValidationError("no file to plan against".into()))?;
        let sheet = primary.active().ok_or_else(|| {
            CopilotError::ValidationError(format!("`{}` has no sheets", primary.file_name))
        })?;

        let mut resolver = Self {
            files,
            threshold,
            bindings: Vec::new(),
            views: BTreeMap::new(),
        };
        resolver.add_binding(PRIMARY_BINDING.to_string(), 0, sheet);
        Ok(resolver)
    }

    pub fn resolve(mut self, raw: &RawPlan) -> Result<OperationPlan, CopilotError> {
        let mut operations = raw
            .parse_operations()
            .map_err(|e| CopilotError::ValidationError(e.to_string()))?;
        for (i, planned) in operations.iter_mut().enumerate() {
            let kind = planned.kind();
            self.resolve_operation(planned).map_err(|e| e.at(i + 1, kind))?;
        }
        Ok(OperationPlan {
            summary: raw.summary.clone(),
            estimated_impact: raw.estimated_impact.clone(),
            operations,
            bindings: self.bindings,
        })
    }

    fn resolve_operation(&mut self, planned: &mut PlannedOperation) -> Result<(), Unresolved> {
        let target = match planned.target_table.as_deref() {
            None => PRIMARY_BINDING.to_string(),
            Some(name) => self.target_binding(name)?,
        };
        planned.target_table = (target != PRIMARY_BINDING).then(|| target.clone());

        let source_id = match planned.op.source() {
            Some(src) => Some(self.source_binding(src)?),
            None => None,
        };
        if let (Some(id), Some(src)) = (&source_id, planned.op.source_mut()) {
            *src = SourceRef::bound(id.clone());
        }

        let mut view = self
            .views
            .get(&target)
            .cloned()
            .ok_or_else(|| Unresolved::Invalid(format!("no table is bound as `{target}`")))?;
        let source_view = source_id.as_ref().and_then(|id| self.views.get(id)).cloned();

        let mut scope = ColumnScope {
            table: &target,
            view: &view,
            source: source_id.as_deref().zip(source_view.as_ref()),
            threshold: self.threshold,
        };
        planned.op.visit_references(&mut scope)?;

        if let Operation::Pivot(p) = &mut planned.op {
            p.output = Some(p.output_id(&target));
        }
        let derived = planned.op.project(&mut view, source_view.as_ref());
        self.views.insert(target.clone(), view);
        if let (Operation::Pivot(p), Some(derived)) = (&planned.op, derived) {
            self.views.insert(p.output_id(&target), derived);
        }
        Ok(())
    }

    fn target_binding(&mut self, name: &str) -> Result<String, Unresolved> {
        let name = name.trim();
        if self.views.contains_key(name) {
            return Ok(name.to_string());
        }
        self.table_ref(name, None)
    }

    fn source_binding(&mut self, src: &SourceRef) -> Result<String, Unresolved> {
        if let Some(i) = src.source_file_index {
            if i >= self.files.len() {
                return Err(Unresolved::Invalid(format!(
                    "source_file_index {i} is out of range ({} files)",
                    self.files.len()
                )));
            }
            return self.sheet_of(i, src.sheet.as_deref());
        }
        match (src.table.as_deref(), src.sheet.as_deref()) {
            (Some(table), sheet) => self.table_ref(table.trim(), sheet),
            (None, Some(sheet)) => self.sheet_anywhere(sheet),
            (None, None) => self.default_source(),
        }
    }

    /// A binding id, a file name or stem (optionally `file!sheet`), or a sheet name.
    fn table_ref(&mut self, name: &str, sheet: Option<&str>) -> Result<String, Unresolved> {
        let (name, sheet) = match (name.rsplit_once('!'), sheet) {
            (Some((file, sheet)), None) => (file, Some(sheet)),
            _ => (name, sheet),
        };
        if sheet.is_none() && self.views.contains_key(name) {
            return Ok(name.to_string());
        }

        let files = self.files;
        let mut names = Vec::with_capacity(files.len() * 2);
        for f in files {
            names.push(f.file_name.clone());
            if f.stem() != f.file_name {
                names.push(f.stem().to_string());
            }
        }
        match match_name(name, &names, self.threshold) {
            NameMatch::Found(hit) => {
                let idx = files
                    .iter()
                    .position(|f| f.file_name == hit || f.stem() == hit)
                    .unwrap_or(0);
                self.sheet_of(idx, sheet)
            }
            NameMatch::Ambiguous(options) => Err(Unresolved::Reference(format!(
                "table `{name}` could be any of {}",
                options.join(", ")
            ))),
            NameMatch::Missing if sheet.is_none() => self.sheet_anywhere(name),
            NameMatch::Missing => Err(Unresolved::Reference(format!("no file matches `{name}`"))),
        }
    }

    fn sheet_of(&mut self, file_idx: usize, sheet: Option<&str>) -> Result<String, Unresolved> {
        let files = self.files;
        let file = &files[file_idx];
        let schema = match sheet {
            None => file
                .active()
                .ok_or_else(|| Unresolved::Invalid(format!("`{}` has no sheets", file.file_name)))?,
            Some(wanted) => {
                let names: Vec<String> = file.sheets.iter().map(|s| s.name.clone()).collect();
                match match_name(wanted, &names, self.threshold) {
                    NameMatch::Found(hit) => file
                        .sheet(&hit)
                        .ok_or_else(|| Unresolved::Invalid(format!("sheet `{hit}` vanished")))?,
                    NameMatch::Ambiguous(options) => {
                        return Err(Unresolved::Reference(format!(
                            "sheet `{wanted}` in `{}` could be any of {}",
                            file.file_name,
                            options.join(", ")
                        )))
                    }
                    NameMatch::Missing => {
                        return Err(Unresolved::Reference(format!(
                            "`{}` has no sheet matching `{wanted}`",
                            file.file_name
                        )))
                    }
                }
            }
        };
        Ok(self.bind(file_idx, schema))
    }

    /// First file, in session order, with a sheet matching `name`.
    fn sheet_anywhere(&mut self, name: &str) -> Result<String, Unresolved> {
        let files = self.files;
        for (idx, file) in files.iter().enumerate() {
            let names: Vec<String> = file.sheets.iter().map(|s| s.name.clone()).collect();
            match match_name(name, &names, self.threshold) {
                NameMatch::Missing => continue,
                NameMatch::Found(_) | NameMatch::Ambiguous(_) => {
                    return self.sheet_of(idx, Some(name));
                }
            }
        }
        Err(Unresolved::Reference(format!("no file or sheet matches `{name}`")))
    }

    /// Unnamed secondary table: the second file, else another sheet of the primary file.
    fn default_source(&mut self) -> Result<String, Unresolved> {
        let files = self.files;
        if let Some(second) = files.get(1).and_then(FileSchema::active) {
            return Ok(self.bind(1, second));
        }
        let main_sheet = self.bindings.first().map(|b| b.sheet.clone()).unwrap_or_default();
        match files[0].sheets.iter().find(|s| s.name != main_sheet) {
            Some(other) => Ok(self.bind(0, other)),
            None => Err(Unresolved::Invalid(
                "operation needs a second table but the session has only one sheet".into(),
            )),
        }
    }

    fn bind(&mut self, file_idx: usize, sheet: &SheetSchema) -> String {
        let file_id = self.files[file_idx].file_id;
        let existing = self
            .bindings
            .iter()
            .find(|b| b.file_id == file_id && b.sheet == sheet.name);
        if let Some(b) = existing {
            return b.id.clone();
        }
        let id = format!("src{}", self.bindings.len());
        self.add_binding(id.clone(), file_idx, sheet);
        id
    }

    fn add_binding(&mut self, id: String, file_idx: usize, sheet: &SheetSchema) {
        let file = &self.files[file_idx];
        debug!(binding = %id, file = %file.file_id, sheet = %sheet.name, "table bound");
        self.bindings.push(TableBinding {
            id: id.clone(),
            file_id: file.file_id,
            sheet: sheet.name.clone(),
        });
        self.views.insert(id, SchemaView::new(sheet.column_names()));
    }
}

/// Resolves `raw` against `files` in one call.
pub fn resolve_plan(
    raw: &RawPlan,
    files: &[FileSchema],
    threshold: f64,
) -> Result<OperationPlan, CopilotError> {
    PlanResolver::new(files, threshold)?.resolve(raw)
}
