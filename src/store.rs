use rusqlite::types::Value;

use crate::parser::ParsedRecord;

/// Columns written for every record, in order.
pub const STORE_COLUMNS: &[&str] = &[
    "url",
    "title",
    "author",
    "content",
    "likes",
    "comments",
    "date_published",
    "images",
    "shared_url",
    "description",
    "source_reference",
];

/// Master table of posts, one row per url, in first-seen order.
///
/// Holds whatever columns the persisted table has; columns outside
/// [`STORE_COLUMNS`] are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterStore {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(usize),
    Updated(usize),
}

impl MasterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from loaded columns and rows; short rows are padded with NULL.
    pub fn from_parts(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, Value::Null);
                r
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[col])
    }

    /// Add a column (NULL in every row) unless it exists. Returns its index.
    pub fn add_column(&mut self, name: &str) -> usize {
        if let Some(i) = self.column_index(name) {
            return i;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        self.columns.len() - 1
    }

    pub fn set(&mut self, row: usize, column: &str, value: Value) -> bool {
        let Some(col) = self.column_index(column) else {
            return false;
        };
        match self.rows.get_mut(row) {
            Some(r) => {
                r[col] = value;
                true
            }
            None => false,
        }
    }

    /// Index of the first row whose `url` is exactly `url`.
    pub fn find_url(&self, url: &str) -> Option<usize> {
        let col = self.column_index("url")?;
        self.rows
            .iter()
            .position(|r| matches!(&r[col], Value::Text(t) if t == url))
    }

    /// Overwrite the mapped columns of the first row with the same url, or
    /// append a new row. A record without a url is always appended.
    pub fn upsert(&mut self, record: &ParsedRecord) -> UpsertOutcome {
        let mapped = row_values(record);
        let indices: Vec<usize> = STORE_COLUMNS.iter().map(|c| self.add_column(c)).collect();

        let existing = record.url.as_deref().and_then(|u| self.find_url(u));
        match existing {
            Some(i) => {
                let row = &mut self.rows[i];
                for (col, value) in indices.into_iter().zip(mapped) {
                    row[col] = value;
                }
                UpsertOutcome::Updated(i)
            }
            None => {
                let mut row = vec![Value::Null; self.columns.len()];
                for (col, value) in indices.into_iter().zip(mapped) {
                    row[col] = value;
                }
                self.rows.push(row);
                UpsertOutcome::Inserted(self.rows.len() - 1)
            }
        }
    }
}

/// Merge one record into the store and hand the store back.
pub fn upsert(mut store: MasterStore, record: &ParsedRecord) -> MasterStore {
    store.upsert(record);
    store
}

/// Row cells for a record, aligned with [`STORE_COLUMNS`].
pub fn row_values(record: &ParsedRecord) -> Vec<Value> {
    let text = |v: &Option<String>| v.clone().map(Value::Text).unwrap_or(Value::Null);
    // SQLite integers are signed; larger counts are kept as decimal text.
    let count = |v: Option<u64>| match v {
        Some(n) => i64::try_from(n)
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::Text(n.to_string())),
        None => Value::Null,
    };
    let images = serde_json::to_string(&record.images).unwrap_or_else(|_| "[]".to_string());

    vec![
        text(&record.url),
        text(&record.title),
        text(&record.author),
        text(&record.content),
        count(record.likes),
        count(record.comments),
        text(&record.date_published),
        Value::Text(images),
        text(&record.shared_url),
        text(&record.description),
        text(&record.source_reference),
    ]
}
