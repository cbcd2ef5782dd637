//! Table discovery and scoring.
//!
//! Every `<table>` on the page is parsed into one or more [`Grid`]s. Spans are
//! expanded so grids stay rectangular, multi-level headers are flattened to
//! their innermost label, and a header row appearing after data rows starts a
//! new logical grid. The grid with the most cells wins.

use crate::driver::Interactable;
use crate::locator::Selector;
use crate::result::{CosechaError, CosechaResult};
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound for `colspan`/`rowspan` attributes
const MAX_SPAN: usize = 1_000;

// =============================================================================
// GRID
// =============================================================================

#[derive(Deserialize)]
struct GridParts {
    headers: Option<Vec<String>>,
    rows: Vec<Vec<String>>,
}

impl From<GridParts> for Grid {
    fn from(parts: GridParts) -> Self {
        Self::new(parts.headers, parts.rows)
    }
}

/// A rectangular table of string cells with an optional header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "GridParts")]
pub struct Grid {
    headers: Option<Vec<String>>,
    rows: Vec<Vec<String>>,
}

impl Grid {
    /// Build a grid, padding short rows (and the header) with empty cells
    #[must_use]
    pub fn new(headers: Option<Vec<String>>, rows: Vec<Vec<String>>) -> Self {
        let width = rows
            .iter()
            .map(Vec::len)
            .chain(headers.iter().map(Vec::len))
            .max()
            .unwrap_or(0);
        let pad = |mut row: Vec<String>| {
            row.resize(width, String::new());
            row
        };
        Self {
            headers: headers.map(pad),
            rows: rows.into_iter().map(pad).collect(),
        }
    }

    /// Number of data rows
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.headers
            .as_ref()
            .or_else(|| self.rows.first())
            .map_or(0, Vec::len)
    }

    /// Header labels, if the grid has a header
    #[must_use]
    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    /// Data rows
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Cell at `row`, `col`
    #[must_use]
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    /// Whether the grid has no rows or no columns
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0 || self.column_count() == 0
    }

    /// rows × columns
    #[must_use]
    pub fn score(&self) -> usize {
        self.row_count() * self.column_count()
    }

    /// Index of the first header containing `name`, case-insensitively
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let needle = name.to_lowercase();
        self.headers
            .as_ref()?
            .iter()
            .position(|h| h.to_lowercase().contains(&needle))
    }

    /// Whether some header contains `name`, case-insensitively
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Values of the column whose header contains `name`
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.row_count(), self.column_count())
    }
}

/// Collapse multi-level column headers to one label per column.
///
/// Each input item holds one column's header segments, outermost first. The
/// innermost non-empty segment wins.
#[must_use]
pub fn flatten_columns<S: AsRef<str>>(columns: &[Vec<S>]) -> Vec<String> {
    columns
        .iter()
        .map(|segments| {
            segments
                .iter()
                .rev()
                .map(|s| s.as_ref().trim())
                .find(|s| !s.is_empty())
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

// =============================================================================
// CANDIDATE SET
// =============================================================================

/// All grids parsed from a page at one point in time
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    grids: Vec<Grid>,
}

impl CandidateSet {
    /// Candidate set from already-built grids
    #[must_use]
    pub fn new(grids: Vec<Grid>) -> Self {
        Self { grids }
    }

    /// Parse every table in an HTML document or fragment
    pub fn from_html(html: &str) -> CosechaResult<Self> {
        let document = Html::parse_document(html);
        let table_sel = css("table")?;
        let row_sel = css("tr")?;

        let mut grids = Vec::new();
        for table in document.select(&table_sel) {
            let rows: Vec<RawRow> = table
                .select(&row_sel)
                .filter(|tr| belongs_to(*tr, table))
                .map(RawRow::parse)
                .filter(|r| !r.cells.is_empty())
                .collect();
            grids.extend(split_grids(&layout(&rows)));
        }
        Ok(Self { grids })
    }

    /// Number of candidates
    #[must_use]
    pub fn len(&self) -> usize {
        self.grids.len()
    }

    /// Whether there are no candidates
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    /// The candidates in document order
    #[must_use]
    pub fn grids(&self) -> &[Grid] {
        &self.grids
    }

    /// Highest-scoring non-empty grid, optionally required to have a column.
    ///
    /// Ties go to the grid that comes first in document order.
    #[must_use]
    pub fn best(&self, required_column: Option<&str>) -> Option<&Grid> {
        self.grids
            .iter()
            .filter(|g| !g.is_empty())
            .filter(|g| required_column.map_or(true, |c| g.has_column(c)))
            .fold(None, |best: Option<&Grid>, g| match best {
                Some(b) if b.score() >= g.score() => Some(b),
                _ => Some(g),
            })
    }

    /// Like [`best`](Self::best), consuming the set and failing with `NotFound`
    pub fn into_best(self, required_column: Option<&str>) -> CosechaResult<Grid> {
        if let Some(best) = self.best(required_column) {
            return Ok(best.clone());
        }
        let target = required_column.map_or_else(
            || "data table".to_string(),
            |c| format!("table with column '{c}'"),
        );
        let attempts = if self.grids.is_empty() {
            vec!["no tables on page".to_string()]
        } else {
            self.grids
                .iter()
                .map(|g| match g.headers() {
                    Some(h) => format!("{g} [{}]", h.join(", ")),
                    None => format!("{g} [no header]"),
                })
                .collect()
        };
        Err(CosechaError::not_found(target, attempts))
    }
}

/// Parse every table currently rendered and return the best grid
pub async fn extract_best<D>(driver: &D, required_column: Option<&str>) -> CosechaResult<Grid>
where
    D: Interactable + ?Sized,
{
    let html = driver.outer_html(&Selector::css("html")).await?;
    let candidates = CandidateSet::from_html(&html)?;
    tracing::debug!(candidates = candidates.len(), ?required_column, "parsed page tables");
    let best = candidates.into_best(required_column)?;
    tracing::info!(rows = best.row_count(), cols = best.column_count(), "selected table");
    Ok(best)
}

// =============================================================================
// HTML PARSING
// =============================================================================

fn css(selector: &str) -> CosechaResult<scraper::Selector> {
    scraper::Selector::parse(selector)
        .map_err(|e| CosechaError::parse(format!("invalid CSS selector '{selector}': {e}")))
}

/// Whether `table` is the closest `<table>` ancestor of `el`
fn belongs_to(el: ElementRef<'_>, table: ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "table")
        .is_some_and(|t| t.id() == table.id())
}

#[derive(Debug, Clone)]
struct RawCell {
    text: String,
    header: bool,
    colspan: usize,
    rowspan: usize,
}

#[derive(Debug, Clone)]
struct RawRow {
    cells: Vec<RawCell>,
    in_thead: bool,
}

impl RawRow {
    fn parse(tr: ElementRef<'_>) -> Self {
        let span = |cell: &ElementRef<'_>, name: &str| {
            cell.value()
                .attr(name)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(1)
                .clamp(1, MAX_SPAN)
        };
        let cells = tr
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|c| matches!(c.value().name(), "td" | "th"))
            .map(|c| RawCell {
                text: c.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" "),
                header: c.value().name() == "th",
                colspan: span(&c, "colspan"),
                rowspan: span(&c, "rowspan"),
            })
            .collect();
        let in_thead = tr
            .parent()
            .and_then(ElementRef::wrap)
            .is_some_and(|p| p.value().name() == "thead");
        Self { cells, in_thead }
    }
}

/// A laid-out row: cell texts plus whether it is a header row
type Line = (Vec<String>, bool);

/// Expand row and column spans into a position-aligned layout
fn layout(rows: &[RawRow]) -> Vec<Line> {
    let mut carry: Vec<Option<(usize, String, bool)>> = Vec::new();
    let mut out = Vec::with_capacity(rows.len());

    for row in rows {
        let mut texts = Vec::new();
        let mut all_header = true;
        let mut col = 0;
        let mut cells = row.cells.iter();

        loop {
            if let Some(slot) = carry.get_mut(col) {
                if let Some((left, text, header)) = slot.take() {
                    all_header &= header;
                    texts.push(text.clone());
                    if left > 1 {
                        *slot = Some((left - 1, text, header));
                    }
                    col += 1;
                    continue;
                }
            }
            let Some(cell) = cells.next() else { break };
            all_header &= cell.header;
            for _ in 0..cell.colspan {
                // A cell spanning into a reserved slot takes it over for this row
                if let Some(slot) = carry.get_mut(col) {
                    if let Some((left, text, header)) = slot.take() {
                        if left > 1 {
                            *slot = Some((left - 1, text, header));
                        }
                    }
                }
                if cell.rowspan > 1 {
                    if carry.len() <= col {
                        carry.resize(col + 1, None);
                    }
                    carry[col] = Some((cell.rowspan - 1, cell.text.clone(), cell.header));
                }
                texts.push(cell.text.clone());
                col += 1;
            }
        }

        while col < carry.len() {
            if let Some((left, text, header)) = carry[col].take() {
                texts.resize(col, String::new());
                texts.push(text.clone());
                all_header &= header;
                if left > 1 {
                    carry[col] = Some((left - 1, text, header));
                }
            }
            col += 1;
        }

        out.push((texts, row.in_thead || all_header));
    }
    out
}

/// Group laid-out rows into grids, starting a new one at each header block
/// that follows data rows
fn split_grids(lines: &[Line]) -> Vec<Grid> {
    let mut grids = Vec::new();
    let mut header_rows: Vec<&[String]> = Vec::new();
    let mut body: Vec<Vec<String>> = Vec::new();

    for (texts, is_header) in lines {
        if *is_header {
            if !body.is_empty() {
                grids.push(make_grid(&header_rows, std::mem::take(&mut body)));
                header_rows.clear();
            }
            header_rows.push(texts);
        } else {
            body.push(texts.clone());
        }
    }
    if !header_rows.is_empty() || !body.is_empty() {
        grids.push(make_grid(&header_rows, body));
    }
    grids
}

fn make_grid(header_rows: &[&[String]], body: Vec<Vec<String>>) -> Grid {
    let headers = (!header_rows.is_empty()).then(|| {
        let width = header_rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let columns: Vec<Vec<&str>> = (0..width)
            .map(|j| {
                header_rows
                    .iter()
                    .map(|r| r.get(j).map_or("", String::as_str))
                    .collect()
            })
            .collect();
        flatten_columns(&columns)
    });
    Grid::new(headers, body)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::driver::{MockDriver, MockElement};
    use proptest::prelude::*;

    fn grid(rows: usize, cols: usize, header: Option<&[&str]>) -> Grid {
        Grid::new(
            header.map(|h| h.iter().map(ToString::to_string).collect()),
            vec![vec!["x".to_string(); cols]; rows],
        )
    }

    mod grid_tests {
        use super::*;

        #[test]
        fn test_ragged_rows_are_padded() {
            let g = Grid::new(
                Some(vec!["a".into()]),
                vec![vec!["1".into(), "2".into()], vec!["3".into()]],
            );
            assert_eq!(g.column_count(), 2);
            assert_eq!(g.headers().unwrap(), ["a", ""]);
            assert_eq!(g.cell(1, 1), Some(""));
            assert_eq!(g.score(), 4);
        }

        #[test]
        fn test_empty_grids() {
            assert!(Grid::new(Some(vec!["a".into()]), vec![]).is_empty());
            assert!(Grid::new(None, vec![vec![], vec![]]).is_empty());
            assert!(!grid(1, 1, None).is_empty());
        }

        #[test]
        fn test_column_lookup_is_case_insensitive_substring() {
            let g = grid(2, 2, Some(&["Nombre Sucursal", "Ventas"]));
            assert!(g.has_column("sucursal"));
            assert_eq!(g.column("VENTAS").unwrap(), vec!["x", "x"]);
            assert!(!g.has_column("Fecha"));
            assert!(!grid(2, 2, None).has_column("x"));
        }

        #[test]
        fn test_deserialize_keeps_rectangular() {
            let g: Grid =
                serde_json::from_str(r#"{"headers":null,"rows":[["a","b"],["c"]]}"#).unwrap();
            assert_eq!(g.rows()[1], vec!["c".to_string(), String::new()]);
        }

        #[test]
        fn test_display_dimensions() {
            assert_eq!(grid(5, 4, None).to_string(), "5x4");
        }
    }

    mod flatten_tests {
        use super::*;

        #[test]
        fn test_two_level_header_keeps_innermost() {
            let cols = vec![
                vec!["Meta CNM", "Numero de CNM (Meta)"],
                vec!["Meta CNM", "Porcentaje"],
            ];
            assert_eq!(flatten_columns(&cols), vec!["Numero de CNM (Meta)", "Porcentaje"]);
        }

        #[test]
        fn test_empty_innermost_falls_back_outward() {
            let cols = vec![vec!["Sucursal", ""], vec!["", "  "]];
            assert_eq!(flatten_columns(&cols), vec!["Sucursal", ""]);
        }
    }

    mod candidate_tests {
        use super::*;

        fn three() -> CandidateSet {
            CandidateSet::new(vec![
                grid(2, 3, Some(&["a", "b", "c"])),
                grid(5, 4, Some(&["d", "e", "f", "g"])),
                grid(1, 10, Some(&["Sucursal", "1", "2", "3", "4", "5", "6", "7", "8", "9"])),
            ])
        }

        #[test]
        fn test_largest_wins() {
            let set = three();
            let best = set.best(None).unwrap();
            assert_eq!((best.row_count(), best.column_count()), (5, 4));
        }

        #[test]
        fn test_required_column_overrides_score() {
            let set = three();
            let best = set.best(Some("Sucursal")).unwrap();
            assert_eq!((best.row_count(), best.column_count()), (1, 10));
        }

        #[test]
        fn test_tie_goes_to_first() {
            let set = CandidateSet::new(vec![
                grid(2, 3, Some(&["first", "", ""])),
                grid(3, 2, Some(&["second", ""])),
            ]);
            assert_eq!(set.best(None).unwrap().headers().unwrap()[0], "first");
        }

        #[test]
        fn test_empty_grids_never_selected() {
            let set = CandidateSet::new(vec![Grid::new(Some(vec!["only".into()]), vec![])]);
            assert!(set.best(None).is_none());
            let err = set.into_best(None).unwrap_err();
            assert!(err.is_not_found());
            assert!(err.to_string().contains("0x1 [only]"));
        }

        #[test]
        fn test_missing_column_is_not_found() {
            let err = three().into_best(Some("Fecha")).unwrap_err();
            assert!(err.to_string().contains("table with column 'Fecha'"));
        }
    }

    mod html_tests {
        use super::*;

        #[test]
        fn test_simple_table_with_thead() {
            let html = "<table><thead><tr><th>Sucursal</th><th>Total</th></tr></thead>\
                        <tbody><tr><td>Centro</td><td> 1,200 </td></tr>\
                        <tr><td>Norte</td><td>800</td></tr></tbody></table>";
            let set = CandidateSet::from_html(html).unwrap();
            assert_eq!(set.len(), 1);
            let g = &set.grids()[0];
            assert_eq!(g.headers().unwrap(), ["Sucursal", "Total"]);
            assert_eq!(g.cell(0, 1), Some("1,200"));
            assert_eq!(g.row_count(), 2);
        }

        #[test]
        fn test_multi_level_header_with_spans() {
            let html = "<table><thead>\
                <tr><th rowspan=2>Sucursal</th><th colspan=2>Meta CNM</th></tr>\
                <tr><th>Numero de CNM (Meta)</th><th>Porcentaje</th></tr>\
                </thead><tbody><tr><td>Centro</td><td>10</td><td>50%</td></tr></tbody></table>";
            let set = CandidateSet::from_html(html).unwrap();
            let g = &set.grids()[0];
            assert_eq!(
                g.headers().unwrap(),
                ["Sucursal", "Numero de CNM (Meta)", "Porcentaje"]
            );
            assert_eq!(g.rows()[0], ["Centro", "10", "50%"]);
        }

        #[test]
        fn test_header_row_without_thead() {
            let html = "<table><tr><th>A</th><th>B</th></tr><tr><td>1</td><td>2</td></tr></table>";
            let g = CandidateSet::from_html(html).unwrap().grids()[0].clone();
            assert_eq!(g.headers().unwrap(), ["A", "B"]);
            assert_eq!(g.row_count(), 1);
        }

        #[test]
        fn test_body_colspan_and_rowspan_expand() {
            let html = "<table><tr><td rowspan=2>x</td><td>1</td></tr><tr><td>2</td></tr>\
                        <tr><td colspan=2>total</td></tr></table>";
            let g = CandidateSet::from_html(html).unwrap().grids()[0].clone();
            assert!(g.headers().is_none());
            assert_eq!(g.rows()[1], ["x", "2"]);
            assert_eq!(g.rows()[2], ["total", "total"]);
        }

        #[test]
        fn test_colspan_over_reserved_rowspan_slot() {
            let html = "<table><tr><td>A</td><td rowspan=2>B</td></tr>\
                        <tr><td colspan=2>C</td></tr><tr><td>D</td><td>E</td></tr></table>";
            let g = CandidateSet::from_html(html).unwrap().grids()[0].clone();
            assert!(g.headers().is_none());
            assert_eq!(g.column_count(), 2);
            assert_eq!(g.row_count(), 3);
            assert_eq!(g.rows()[1], ["C", "C"]);
            assert_eq!(g.rows()[2], ["D", "E"]);
        }

        #[test]
        fn test_colspan_over_longer_rowspan_keeps_remaining_rows() {
            let html = "<table><tr><td>A</td><td rowspan=3>B</td></tr>\
                        <tr><td colspan=2>C</td></tr><tr><td>D</td></tr></table>";
            let g = CandidateSet::from_html(html).unwrap().grids()[0].clone();
            assert_eq!(g.column_count(), 2);
            assert_eq!(g.rows()[2], ["D", "B"]);
        }

        #[test]
        fn test_nested_tables_are_separate_candidates() {
            let html = "<table><tr><td>outer</td><td>\
                <table><tr><th>k</th></tr><tr><td>1</td></tr><tr><td>2</td></tr></table>\
                </td></tr></table>";
            let set = CandidateSet::from_html(html).unwrap();
            assert_eq!(set.len(), 2);
            assert_eq!(set.grids()[0].row_count(), 1);
            assert_eq!(set.grids()[1].headers().unwrap(), ["k"]);
            assert_eq!(set.grids()[1].row_count(), 2);
        }

        #[test]
        fn test_repeated_header_starts_new_grid() {
            let html = "<table>\
                <tr><th>A</th></tr><tr><td>1</td></tr>\
                <tr><th>B</th><th>C</th></tr><tr><td>2</td><td>3</td></tr><tr><td>4</td><td>5</td></tr>\
                </table>";
            let set = CandidateSet::from_html(html).unwrap();
            assert_eq!(set.len(), 2);
            assert_eq!(set.best(None).unwrap().headers().unwrap(), ["B", "C"]);
        }

        #[test]
        fn test_decoy_tables_lose_to_report() {
            let html = "<div><table><tr><td>Ctrl+F</td><td>Buscar</td></tr></table>\
                <table><thead><tr><th>Sucursal</th><th>Socios</th><th>Meta</th></tr></thead><tbody>\
                <tr><td>a</td><td>1</td><td>2</td></tr><tr><td>b</td><td>3</td><td>4</td></tr>\
                </tbody></table><table><tr><td>1</td><td>2</td><td>3</td></tr></table></div>";
            let set = CandidateSet::from_html(html).unwrap();
            assert_eq!(set.len(), 3);
            assert!(set.best(None).unwrap().has_column("sucursal"));
        }

        #[test]
        fn test_page_without_tables() {
            let set = CandidateSet::from_html("<p>Sin datos</p>").unwrap();
            assert!(set.is_empty());
            let err = set.into_best(None).unwrap_err();
            assert!(err.to_string().contains("no tables on page"));
        }

        #[tokio::test]
        async fn test_extract_best_reads_document() {
            let driver = MockDriver::new();
            driver.add_element(
                &Selector::css("html"),
                MockElement::html(
                    "<html><body><table><tr><th>Sucursal</th></tr><tr><td>Centro</td></tr></table></body></html>",
                ),
            );
            let g = extract_best(&driver, Some("sucursal")).await.unwrap();
            assert_eq!(g.cell(0, 0), Some("Centro"));
        }
    }

    proptest! {
        #[test]
        fn prop_grid_is_rectangular(
            rows in prop::collection::vec(prop::collection::vec("[a-z]{0,3}", 0..6), 0..8),
            header in prop::option::of(prop::collection::vec("[a-z]{1,3}", 0..6)),
        ) {
            let g = Grid::new(header, rows);
            let w = g.column_count();
            prop_assert!(g.rows().iter().all(|r| r.len() == w));
            if let Some(h) = g.headers() {
                prop_assert_eq!(h.len(), w);
            }
        }

        #[test]
        fn prop_flatten_is_idempotent(
            cols in prop::collection::vec(prop::collection::vec("[a-z ]{0,4}", 1..4), 0..6),
        ) {
            let once = flatten_columns(&cols);
            let again = flatten_columns(&once.iter().map(|c| vec![c.clone()]).collect::<Vec<_>>());
            prop_assert_eq!(once, again);
        }
    }
}
