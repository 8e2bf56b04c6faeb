use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::{Datelike, NaiveDate};
use serde_json::Value;

use crate::model::{DailyRecord, SheetOperation, Task};

/// Row 1, column A label on record tabs.
const SHEET_LABEL_HEADER: &str = "項目";
/// Hidden last column that keys rows to tasks across renames.
const HIDDEN_TASK_ID_HEADER: &str = "taskId(hidden)";
/// Row 2, column A label on journal tabs.
const JOURNAL_ROW_LABEL: &str = "記事";

/// The slice of the spreadsheet REST surface the appliers need. The access
/// token travels with every call, mirroring the wire contract.
pub trait SheetsApi {
    fn sheet_titles(&self, token: &str, spreadsheet_id: &str) -> Result<Vec<String>>;
    fn add_sheet(&self, token: &str, spreadsheet_id: &str, title: &str) -> Result<()>;
    fn values_get(&self, token: &str, spreadsheet_id: &str, range: &str)
        -> Result<Vec<Vec<String>>>;
    fn values_update(
        &self,
        token: &str,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<()>;
    fn create_spreadsheet(&self, token: &str, title: &str) -> Result<String>;
    fn find_spreadsheet_by_title(&self, token: &str, title: &str) -> Result<Option<String>>;
}

// --- layout math ---------------------------------------------------------

/// 1 → A, 26 → Z, 27 → AA.
pub fn col_index_to_letter(mut n: u32) -> String {
    let mut s = String::new();
    while n > 0 {
        let m = (n - 1) % 26;
        s.insert(0, (b'A' + m as u8) as char);
        n = (n - m) / 26;
    }
    s
}

fn parse_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| anyhow!("invalid date: {date}"))
}

pub fn month_title(date: &str) -> Result<String> {
    let d = parse_date(date)?;
    Ok(format!("{:04}-{:02}", d.year(), d.month()))
}

pub fn days_in_month_of(date: &str) -> Result<u32> {
    let d = parse_date(date)?;
    let (next_year, next_month) = if d.month() == 12 {
        (d.year() + 1, 1)
    } else {
        (d.year(), d.month() + 1)
    };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .ok_or_else(|| anyhow!("invalid date: {date}"))?;
    Ok(first_of_next.pred_opt().map(|d| d.day()).unwrap_or(31))
}

pub fn day_of_month(date: &str) -> Result<u32> {
    Ok(parse_date(date)?.day())
}

// --- record tabs ---------------------------------------------------------

struct RecordCell {
    clear: bool,
    task_id: String,
    date: String,
    count: i64,
    task_name: Option<String>,
}

struct MonthBatch {
    days: u32,
    cells: Vec<RecordCell>,
}

fn record_cells_by_month(
    operations: &[SheetOperation],
    tracked_task_ids: &BTreeSet<String>,
) -> Result<BTreeMap<String, MonthBatch>> {
    let mut by_month: BTreeMap<String, MonthBatch> = BTreeMap::new();
    for op in operations {
        let clear = match op.op_type.as_str() {
            "record.upsert" => false,
            "record.delete" => true,
            _ => continue,
        };
        for item in payload_items(&op.payload) {
            let (Some(task_id), Some(date)) = (
                item.get("taskId").and_then(Value::as_str),
                item.get("date").and_then(Value::as_str),
            ) else {
                continue;
            };
            if !tracked_task_ids.contains(task_id) {
                continue;
            }
            let Ok(month) = month_title(date) else {
                continue;
            };
            let days = days_in_month_of(date)?;
            let batch = by_month.entry(month).or_insert(MonthBatch {
                days,
                cells: Vec::new(),
            });
            batch.cells.push(RecordCell {
                clear,
                task_id: task_id.to_string(),
                date: date.to_string(),
                count: item.get("count").and_then(Value::as_i64).unwrap_or(0),
                task_name: item
                    .get("taskName")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
    }
    Ok(by_month)
}

fn ensure_month_tab(
    api: &dyn SheetsApi,
    token: &str,
    spreadsheet_id: &str,
    known_tabs: &mut BTreeSet<String>,
    month: &str,
    days: u32,
) -> Result<()> {
    if !known_tabs.contains(month) {
        api.add_sheet(token, spreadsheet_id, month)?;
        known_tabs.insert(month.to_string());
    }
    let mut header: Vec<String> = Vec::with_capacity(days as usize + 2);
    header.push(SHEET_LABEL_HEADER.to_string());
    header.extend((1..=days).map(|d| d.to_string()));
    header.push(HIDDEN_TASK_ID_HEADER.to_string());
    let end_col = col_index_to_letter(days + 2);
    api.values_update(
        token,
        spreadsheet_id,
        &format!("{month}!A1:{end_col}1"),
        &[header],
    )
}

fn row_map_from(rows: &[Vec<String>], hidden_index: usize) -> BTreeMap<String, u32> {
    let mut map = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        if let Some(task_id) = row.get(hidden_index) {
            if !task_id.is_empty() {
                // Data rows start at sheet row 2.
                map.insert(task_id.clone(), i as u32 + 2);
            }
        }
    }
    map
}

/// Writes one month-grid cell per record operation: count on upsert, blank
/// on delete. Rows are keyed by the hidden task-id column and created on
/// demand, re-reading the row map after any append.
pub fn apply_sheet_operations(
    api: &dyn SheetsApi,
    token: &str,
    spreadsheet_id: &str,
    tracked_task_ids: &BTreeSet<String>,
    operations: &[SheetOperation],
) -> Result<usize> {
    let by_month = record_cells_by_month(operations, tracked_task_ids)?;
    if by_month.is_empty() {
        return Ok(0);
    }

    let mut known_tabs: BTreeSet<String> =
        api.sheet_titles(token, spreadsheet_id)?.into_iter().collect();
    let mut written = 0usize;

    for (month, batch) in by_month {
        let days = batch.days;
        ensure_month_tab(api, token, spreadsheet_id, &mut known_tabs, &month, days)?;

        let end_col = col_index_to_letter(days + 2);
        let hidden_index = (days + 1) as usize;
        let rows = api.values_get(token, spreadsheet_id, &format!("{month}!A2:{end_col}1000"))?;
        let mut row_map = row_map_from(&rows, hidden_index);

        let mut new_rows: Vec<Vec<String>> = Vec::new();
        let mut ensured: BTreeSet<String> = BTreeSet::new();
        for cell in &batch.cells {
            if row_map.contains_key(&cell.task_id) || ensured.contains(&cell.task_id) {
                continue;
            }
            let mut row = vec![String::new(); days as usize + 2];
            row[0] = cell.task_name.clone().unwrap_or_default();
            row[days as usize + 1] = cell.task_id.clone();
            new_rows.push(row);
            ensured.insert(cell.task_id.clone());
        }
        if !new_rows.is_empty() {
            api.values_update(
                token,
                spreadsheet_id,
                &format!("{month}!A{}", rows.len() + 2),
                &new_rows,
            )?;
            let total = rows.len() + new_rows.len();
            let fresh = api.values_get(
                token,
                spreadsheet_id,
                &format!("{month}!A2:{end_col}{}", total + 1),
            )?;
            row_map = row_map_from(&fresh, hidden_index);
        }

        for cell in &batch.cells {
            let Some(row_number) = row_map.get(&cell.task_id) else {
                continue;
            };
            let day = day_of_month(&cell.date)?;
            let col_letter = col_index_to_letter(1 + day);
            let value = if cell.clear {
                String::new()
            } else {
                cell.count.to_string()
            };
            api.values_update(
                token,
                spreadsheet_id,
                &format!("{month}!{col_letter}{row_number}"),
                &[vec![value]],
            )?;
            written += 1;
        }
    }

    Ok(written)
}

// --- journal tabs --------------------------------------------------------

struct JournalMonth {
    days: u32,
    // day → combined cell text; empty string means "clear".
    cells: BTreeMap<u32, String>,
}

fn journal_cells_by_month(operations: &[SheetOperation]) -> Result<BTreeMap<String, JournalMonth>> {
    let mut by_month: BTreeMap<String, JournalMonth> = BTreeMap::new();
    for op in operations {
        let clear = match op.op_type.as_str() {
            "journal.upsert" => false,
            "journal.delete" => true,
            _ => continue,
        };
        for item in payload_items(&op.payload) {
            let Some(date) = item.get("date").and_then(Value::as_str) else {
                continue;
            };
            let Ok(month) = month_title(date) else {
                continue;
            };
            let days = days_in_month_of(date)?;
            let day = day_of_month(date)?;
            let entry = by_month.entry(month).or_insert(JournalMonth {
                days,
                cells: BTreeMap::new(),
            });
            if clear {
                entry.cells.insert(day, String::new());
            } else {
                let content = item
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let combined = match entry.cells.get(&day) {
                    Some(prev) if !prev.is_empty() => format!("{prev}\n{content}"),
                    _ => content.to_string(),
                };
                entry.cells.insert(day, combined);
            }
        }
    }
    Ok(by_month)
}

/// Journal layout: one shared notes row per month tab, addressed by day
/// column; multiple same-day entries concatenate with newlines.
pub fn apply_journal_operations(
    api: &dyn SheetsApi,
    token: &str,
    spreadsheet_id: &str,
    operations: &[SheetOperation],
) -> Result<usize> {
    let by_month = journal_cells_by_month(operations)?;
    if by_month.is_empty() {
        return Ok(0);
    }

    let mut known_tabs: BTreeSet<String> =
        api.sheet_titles(token, spreadsheet_id)?.into_iter().collect();
    let mut written = 0usize;

    for (month, batch) in by_month {
        if !known_tabs.contains(&month) {
            api.add_sheet(token, spreadsheet_id, &month)?;
            known_tabs.insert(month.clone());
        }
        let mut header: Vec<String> = Vec::with_capacity(batch.days as usize + 1);
        header.push(String::new());
        header.extend((1..=batch.days).map(|d| d.to_string()));
        let end_col = col_index_to_letter(batch.days + 1);
        api.values_update(
            token,
            spreadsheet_id,
            &format!("{month}!A1:{end_col}1"),
            &[header],
        )?;
        api.values_update(
            token,
            spreadsheet_id,
            &format!("{month}!A2:A2"),
            &[vec![JOURNAL_ROW_LABEL.to_string()]],
        )?;

        for (day, value) in batch.cells {
            let col_letter = col_index_to_letter(1 + day);
            api.values_update(
                token,
                spreadsheet_id,
                &format!("{month}!{col_letter}2"),
                &[vec![value]],
            )?;
            written += 1;
        }
    }

    Ok(written)
}

// --- export / create -----------------------------------------------------

/// Creates (or reuses) a destination spreadsheet and seeds the current
/// month's grid from the local store. Returns the destination id the caller
/// should link, with the selected task ids, as a `SheetConfig`.
pub fn export_or_create(
    api: &dyn SheetsApi,
    token: &str,
    template: &str,
    today: &str,
    tasks: &[Task],
    records: &[DailyRecord],
    existing_id: Option<&str>,
) -> Result<String> {
    let title = template.replace("{date}", today);
    let spreadsheet_id = match existing_id {
        Some(id) => id.to_string(),
        None => match api.find_spreadsheet_by_title(token, &title)? {
            Some(id) => id,
            None => api.create_spreadsheet(token, &title)?,
        },
    };

    let month = month_title(today)?;
    let days = days_in_month_of(today)?;
    let mut known_tabs: BTreeSet<String> = api
        .sheet_titles(token, &spreadsheet_id)?
        .into_iter()
        .collect();
    ensure_month_tab(api, token, &spreadsheet_id, &mut known_tabs, &month, days)?;

    let mut rows: Vec<Vec<String>> = Vec::with_capacity(tasks.len());
    for task in tasks {
        let mut row = vec![String::new(); days as usize + 2];
        row[0] = task.name.clone();
        for record in records.iter().filter(|r| r.task_id == task.id) {
            let Ok(record_month) = month_title(&record.date) else {
                continue;
            };
            if record_month == month {
                let day = day_of_month(&record.date)?;
                row[day as usize] = record.count.to_string();
            }
        }
        row[days as usize + 1] = task.id.clone();
        rows.push(row);
    }
    if !rows.is_empty() {
        api.values_update(token, &spreadsheet_id, &format!("{month}!A2"), &rows)?;
    }

    Ok(spreadsheet_id)
}

fn payload_items(payload: &Value) -> Vec<&Value> {
    match payload {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

// --- in-memory fake ------------------------------------------------------

type Grid = BTreeMap<(u32, u32), String>;

static INMEM_NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Grid-level fake of the spreadsheet REST surface, the way tests stand in
/// for the real service. Cells are addressed 1-based (row, col).
pub struct InMemorySheetsApi {
    titles: Mutex<BTreeMap<String, String>>,
    tabs: Mutex<BTreeMap<String, BTreeMap<String, Grid>>>,
}

impl InMemorySheetsApi {
    pub fn new() -> Self {
        Self {
            titles: Mutex::new(BTreeMap::new()),
            tabs: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers an existing spreadsheet under a fixed id.
    pub fn add_spreadsheet(&self, spreadsheet_id: &str, title: &str) {
        if let Ok(mut titles) = self.titles.lock() {
            titles.insert(spreadsheet_id.to_string(), title.to_string());
        }
        if let Ok(mut tabs) = self.tabs.lock() {
            tabs.entry(spreadsheet_id.to_string()).or_default();
        }
    }

    pub fn tab_names(&self, spreadsheet_id: &str) -> Vec<String> {
        self.tabs
            .lock()
            .ok()
            .and_then(|tabs| {
                tabs.get(spreadsheet_id)
                    .map(|sheet| sheet.keys().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// 1-based cell read; `None` for blank cells.
    pub fn cell(&self, spreadsheet_id: &str, tab: &str, row: u32, col: u32) -> Option<String> {
        self.tabs
            .lock()
            .ok()?
            .get(spreadsheet_id)?
            .get(tab)?
            .get(&(row, col))
            .cloned()
    }
}

impl Default for InMemorySheetsApi {
    fn default() -> Self {
        Self::new()
    }
}

fn letters_to_col(s: &str) -> Result<u32> {
    let mut col: u32 = 0;
    for c in s.chars() {
        if !c.is_ascii_uppercase() {
            return Err(anyhow!("invalid column letters: {s}"));
        }
        col = col * 26 + (c as u32 - 'A' as u32 + 1);
    }
    if col == 0 {
        return Err(anyhow!("invalid column letters: {s}"));
    }
    Ok(col)
}

fn parse_cell_ref(s: &str) -> Result<(u32, u32)> {
    let split = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
    let (letters, digits) = s.split_at(split);
    let col = letters_to_col(letters)?;
    let row: u32 = digits.parse().map_err(|_| anyhow!("invalid cell ref: {s}"))?;
    Ok((row, col))
}

struct ParsedRange {
    tab: String,
    start: (u32, u32),
    end: Option<(u32, u32)>,
}

fn parse_range(range: &str) -> Result<ParsedRange> {
    let (tab, cells) = range
        .split_once('!')
        .ok_or_else(|| anyhow!("range missing tab: {range}"))?;
    let (start, end) = match cells.split_once(':') {
        Some((a, b)) => (parse_cell_ref(a)?, Some(parse_cell_ref(b)?)),
        None => (parse_cell_ref(cells)?, None),
    };
    Ok(ParsedRange {
        tab: tab.to_string(),
        start,
        end,
    })
}

impl SheetsApi for InMemorySheetsApi {
    fn sheet_titles(&self, _token: &str, spreadsheet_id: &str) -> Result<Vec<String>> {
        let tabs = self.tabs.lock().map_err(|_| anyhow!("poisoned lock"))?;
        let sheet = tabs
            .get(spreadsheet_id)
            .ok_or_else(|| anyhow!("spreadsheet not found: {spreadsheet_id}"))?;
        Ok(sheet.keys().cloned().collect())
    }

    fn add_sheet(&self, _token: &str, spreadsheet_id: &str, title: &str) -> Result<()> {
        let mut tabs = self.tabs.lock().map_err(|_| anyhow!("poisoned lock"))?;
        let sheet = tabs
            .get_mut(spreadsheet_id)
            .ok_or_else(|| anyhow!("spreadsheet not found: {spreadsheet_id}"))?;
        sheet.entry(title.to_string()).or_default();
        Ok(())
    }

    fn values_get(
        &self,
        _token: &str,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>> {
        let parsed = parse_range(range)?;
        let (start_row, start_col) = parsed.start;
        let (end_row, end_col) = parsed.end.unwrap_or(parsed.start);

        let tabs = self.tabs.lock().map_err(|_| anyhow!("poisoned lock"))?;
        let grid = tabs
            .get(spreadsheet_id)
            .ok_or_else(|| anyhow!("spreadsheet not found: {spreadsheet_id}"))?
            .get(&parsed.tab)
            .cloned()
            .unwrap_or_default();

        let mut rows: Vec<Vec<String>> = Vec::new();
        for row in start_row..=end_row {
            let mut cells = Vec::new();
            for col in start_col..=end_col {
                cells.push(grid.get(&(row, col)).cloned().unwrap_or_default());
            }
            rows.push(cells);
        }
        // Like the real service, trailing all-blank rows are not returned.
        while rows.last().is_some_and(|r| r.iter().all(String::is_empty)) {
            rows.pop();
        }
        Ok(rows)
    }

    fn values_update(
        &self,
        _token: &str,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<()> {
        let parsed = parse_range(range)?;
        let (start_row, start_col) = parsed.start;

        let mut tabs = self.tabs.lock().map_err(|_| anyhow!("poisoned lock"))?;
        let grid = tabs
            .get_mut(spreadsheet_id)
            .ok_or_else(|| anyhow!("spreadsheet not found: {spreadsheet_id}"))?
            .entry(parsed.tab)
            .or_default();

        for (row_offset, row_values) in values.iter().enumerate() {
            for (col_offset, value) in row_values.iter().enumerate() {
                let key = (start_row + row_offset as u32, start_col + col_offset as u32);
                if value.is_empty() {
                    grid.remove(&key);
                } else {
                    grid.insert(key, value.clone());
                }
            }
        }
        Ok(())
    }

    fn create_spreadsheet(&self, _token: &str, title: &str) -> Result<String> {
        let id = INMEM_NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let spreadsheet_id = format!("inmem-sheet-{id}");
        self.add_spreadsheet(&spreadsheet_id, title);
        Ok(spreadsheet_id)
    }

    fn find_spreadsheet_by_title(&self, _token: &str, title: &str) -> Result<Option<String>> {
        let titles = self.titles.lock().map_err(|_| anyhow!("poisoned lock"))?;
        Ok(titles
            .iter()
            .find(|(_, t)| t.as_str() == title)
            .map(|(id, _)| id.clone()))
    }
}
