use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use url::Url;

use crate::config::Config;
use crate::error::{Result, ScraperError};
use crate::normalizer::ProfileRecord;
use crate::sheets::{RemoteTable, TagBook};

/// Column order of the local history file.
pub const LOCAL_COLUMNS: [&str; 14] = [
    "DATE", "TIME", "NICKNAME", "TAGS", "CITY", "GENDER", "MARRIED", "AGE", "JOINED", "FOLLOWERS",
    "POSTS", "PLINK", "PIMAGE", "INTRO",
];

/// Remote sheet columns: the local columns plus the seen counter.
pub const SHEET_COLUMNS: [&str; 15] = [
    "DATE", "TIME", "NICKNAME", "TAGS", "CITY", "GENDER", "MARRIED", "AGE", "JOINED", "FOLLOWERS",
    "POSTS", "PLINK", "PIMAGE", "INTRO", "SCOUNT",
];

const NICKNAME_COL: usize = 2;
const SCOUNT_COL: usize = 14;

/// Snapshot of the remote sheet: body rows in sheet order plus a
/// nickname index. Read once per write cycle, before planning upserts.
#[derive(Debug, Default)]
pub struct SheetState {
    header_present: bool,
    rows: Vec<Vec<String>>,
    index: HashMap<String, usize>,
}

impl SheetState {
    /// Build from a raw read-all. The first row, when present, is the
    /// header; later duplicate nicknames keep their first (authoritative)
    /// row, matching the upsert behavior that created them.
    pub fn from_rows(all: Vec<Vec<String>>) -> Self {
        let mut state = SheetState {
            header_present: !all.is_empty(),
            ..Default::default()
        };
        for row in all.into_iter().skip(1) {
            if let Some(cell) = row.get(NICKNAME_COL) {
                let nickname = cell.trim();
                if !nickname.is_empty() && !state.index.contains_key(nickname) {
                    state.index.insert(nickname.to_string(), state.rows.len());
                }
            }
            state.rows.push(row);
        }
        state
    }

    pub fn seen_count(&self, nickname: &str) -> u64 {
        self.index
            .get(nickname)
            .and_then(|&pos| self.rows[pos].get(SCOUNT_COL))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// One planned remote write. `sheet_row` is 1-based and counts the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOp {
    Append(Vec<String>),
    Update {
        sheet_row: usize,
        values: Vec<String>,
    },
}

impl RowOp {
    fn values(&self) -> &[String] {
        match self {
            RowOp::Append(values) => values,
            RowOp::Update { values, .. } => values,
        }
    }

    fn nickname(&self) -> &str {
        self.values()
            .get(NICKNAME_COL)
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Plan the remote reconciliation: unknown nicknames become appends with a
/// seen count of 1 (insertion order preserved); known nicknames become
/// in-place updates with the count bumped. Re-encounters within the same
/// batch fold into one op with the count accumulated. Pure, so it is
/// testable without the remote store.
pub fn plan_upserts(state: &SheetState, records: &[ProfileRecord]) -> Vec<RowOp> {
    let mut ops: Vec<RowOp> = Vec::new();
    let mut op_index: HashMap<String, usize> = HashMap::new();
    let mut counts: HashMap<String, u64> = HashMap::new();

    for record in records {
        let nickname = record.nickname.as_str();
        let count = counts
            .entry(nickname.to_string())
            .or_insert_with(|| state.seen_count(nickname));
        *count += 1;
        let values = record_to_row(record, *count);

        if let Some(&existing) = op_index.get(nickname) {
            match &mut ops[existing] {
                RowOp::Append(v) => *v = values,
                RowOp::Update { values: v, .. } => *v = values,
            }
        } else if let Some(&pos) = state.index.get(nickname) {
            op_index.insert(nickname.to_string(), ops.len());
            ops.push(RowOp::Update {
                sheet_row: pos + 2,
                values,
            });
        } else {
            op_index.insert(nickname.to_string(), ops.len());
            ops.push(RowOp::Append(values));
        }
    }
    ops
}

fn local_row(record: &ProfileRecord) -> Vec<String> {
    vec![
        record.date_string(),
        record.time_string(),
        record.nickname.clone(),
        record.tags_string(),
        record.city.clone(),
        record.gender.as_str().to_string(),
        record.married_string().to_string(),
        record.age.map(|a| a.to_string()).unwrap_or_default(),
        record.join_year.map(|y| y.to_string()).unwrap_or_default(),
        record.followers.to_string(),
        record.posts.to_string(),
        record.profile_link.to_string(),
        record
            .image_link
            .as_ref()
            .map(Url::to_string)
            .unwrap_or_default(),
        record.intro.clone(),
    ]
}

pub fn record_to_row(record: &ProfileRecord, seen_count: u64) -> Vec<String> {
    let mut row = local_row(record);
    row.push(seen_count.to_string());
    row
}

fn sheet_header() -> Vec<String> {
    SHEET_COLUMNS.iter().map(|c| c.to_string()).collect()
}

#[derive(Debug, Default, Clone)]
pub struct WriteSummary {
    pub appended: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Persists normalized records: every record goes to the local CSV history
/// (never deduplicated), then the remote sheet is reconciled in batches.
pub struct SinkWriter {
    csv_path: PathBuf,
    remote: Option<Box<dyn RemoteTable>>,
    sheet_tab: String,
    tags_tab: String,
    batch_size: usize,
    max_retries: u32,
    retry_delay: Duration,
}

impl SinkWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        csv_path: PathBuf,
        remote: Option<Box<dyn RemoteTable>>,
        sheet_tab: String,
        tags_tab: String,
        batch_size: usize,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        SinkWriter {
            csv_path,
            remote,
            sheet_tab,
            tags_tab,
            batch_size: batch_size.max(1),
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    pub fn from_config(config: &Config, remote: Option<Box<dyn RemoteTable>>) -> Self {
        Self::new(
            config.csv_output.clone(),
            remote,
            config.sheet_tab.clone(),
            config.tags_tab.clone(),
            config.batch_size,
            config.max_retries,
            config.retry_delay,
        )
    }

    pub fn load_tag_book(&self) -> TagBook {
        match &self.remote {
            Some(table) => TagBook::load(table.as_ref(), &self.tags_tab),
            None => TagBook::empty(),
        }
    }

    /// Local append failures are fatal (the history file is the audit
    /// trail); remote batch failures are retried, then logged per nickname
    /// and counted in the summary instead of aborting the run.
    pub fn write(&mut self, records: &[ProfileRecord]) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();
        if records.is_empty() {
            return Ok(summary);
        }

        self.append_local(records)?;
        self.sync_remote(records, &mut summary);
        Ok(summary)
    }

    fn append_local(&self, records: &[ProfileRecord]) -> Result<()> {
        let had_content = self
            .csv_path
            .metadata()
            .map(|m| m.len() > 0)
            .unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)?;
        let mut writer = csv::WriterBuilder::new().from_writer(file);

        if !had_content {
            writer.write_record(LOCAL_COLUMNS)?;
        }
        for record in records {
            writer.write_record(&local_row(record))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn sync_remote(&mut self, records: &[ProfileRecord], summary: &mut WriteSummary) {
        let Some(table) = self.remote.as_deref_mut() else {
            return;
        };
        let tab = self.sheet_tab.as_str();

        let state = match table.read_all(tab) {
            Ok(rows) => SheetState::from_rows(rows),
            Err(e) => {
                error!("Could not read remote sheet, skipping remote sync: {e}");
                summary.failed += records.len();
                return;
            }
        };

        if !state.header_present {
            if let Err(e) = table.append_rows(tab, &[sheet_header()]) {
                error!("Could not initialize remote sheet header: {e}");
                summary.failed += records.len();
                return;
            }
            info!("Header row added to remote sheet.");
        }

        let ops = plan_upserts(&state, records);
        for chunk in ops.chunks(self.batch_size) {
            match apply_batch_with_retry(table, tab, chunk, self.max_retries, self.retry_delay) {
                Ok(()) => {
                    for op in chunk {
                        match op {
                            RowOp::Append(_) => summary.appended += 1,
                            RowOp::Update { .. } => summary.updated += 1,
                        }
                    }
                }
                Err(e) => {
                    let failure = ScraperError::SinkWrite {
                        count: chunk.len(),
                        reason: e.to_string(),
                    };
                    let nicknames: Vec<&str> = chunk.iter().map(RowOp::nickname).collect();
                    error!("{failure}; affected: {}", nicknames.join(", "));
                    summary.failed += chunk.len();
                }
            }
        }
    }
}

fn apply_batch(table: &mut dyn RemoteTable, tab: &str, ops: &[RowOp]) -> Result<()> {
    let mut appends: Vec<Vec<String>> = Vec::new();
    for op in ops {
        match op {
            RowOp::Append(values) => appends.push(values.clone()),
            RowOp::Update { sheet_row, values } => table.update_row(tab, *sheet_row, values)?,
        }
    }
    table.append_rows(tab, &appends)
}

fn apply_batch_with_retry(
    table: &mut dyn RemoteTable,
    tab: &str,
    ops: &[RowOp],
    max_retries: u32,
    retry_delay: Duration,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match apply_batch(table, tab, ops) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < max_retries => {
                warn!("Remote batch failed (attempt {attempt}): {e}");
                thread::sleep(retry_delay);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScraperError;
    use crate::normalizer::Gender;
    use crate::sheets::InMemoryTable;
    use chrono::{NaiveDate, NaiveTime};
    use std::collections::BTreeSet;

    fn record(nickname: &str, followers: u64) -> ProfileRecord {
        ProfileRecord {
            nickname: nickname.to_string(),
            tags: BTreeSet::new(),
            city: "Lahore".to_string(),
            gender: Gender::Unknown,
            married: None,
            age: None,
            join_year: None,
            followers,
            posts: 0,
            profile_link: Url::parse(&format!("https://damadam.pk/users/{nickname}/")).unwrap(),
            image_link: None,
            intro: String::new(),
            capture_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            capture_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        }
    }

    fn writer(dir: &tempfile::TempDir, remote: Option<Box<dyn RemoteTable>>) -> SinkWriter {
        SinkWriter::new(
            dir.path().join("history.csv"),
            remote,
            "Sheet1".to_string(),
            "Tags".to_string(),
            5,
            3,
            Duration::ZERO,
        )
    }

    fn read_csv_rows(dir: &tempfile::TempDir) -> Vec<csv::StringRecord> {
        let mut reader = csv::Reader::from_path(dir.path().join("history.csv")).unwrap();
        reader.records().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn plan_preserves_insertion_order_and_positions() {
        let state = SheetState::from_rows(vec![
            sheet_header(),
            record_to_row(&record("alice", 10), 1),
        ]);

        let ops = plan_upserts(&state, &[record("bob", 1), record("alice", 20)]);
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], RowOp::Append(values) if values[NICKNAME_COL] == "bob"));
        match &ops[1] {
            RowOp::Update { sheet_row, values } => {
                assert_eq!(*sheet_row, 2);
                assert_eq!(values[SCOUNT_COL], "2");
                assert_eq!(values[9], "20");
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn plan_folds_same_batch_duplicates_into_one_op() {
        let state = SheetState::default();
        let ops = plan_upserts(&state, &[record("alice", 1), record("alice", 2)]);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            RowOp::Append(values) => {
                assert_eq!(values[SCOUNT_COL], "2");
                assert_eq!(values[9], "2");
            }
            other => panic!("expected append, got {other:?}"),
        }
    }

    #[test]
    fn local_history_is_never_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = writer(&dir, None);

        for _ in 0..3 {
            sink.write(&[record("alice", 5)]).unwrap();
        }

        let rows = read_csv_rows(&dir);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| &r[2] == "alice"));
    }

    #[test]
    fn two_runs_leave_one_remote_row_per_nickname_with_seen_count_two() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = writer(&dir, Some(Box::new(InMemoryTable::new())));

        let first = sink.write(&[record("alice", 10), record("bob", 20)]).unwrap();
        assert_eq!((first.appended, first.updated, first.failed), (2, 0, 0));

        let second = sink
            .write(&[record("alice", 11), record("bob", 21)])
            .unwrap();
        assert_eq!((second.appended, second.updated, second.failed), (0, 2, 0));

        // Peek at the remote store through a fresh read.
        let table = match &sink.remote {
            Some(t) => t,
            None => unreachable!(),
        };
        let rows = table.read_all("Sheet1").unwrap();
        assert_eq!(rows.len(), 3); // header + alice + bob
        assert_eq!(rows[1][NICKNAME_COL], "alice");
        assert_eq!(rows[1][SCOUNT_COL], "2");
        assert_eq!(rows[1][9], "11"); // followers refreshed by the second write
        assert_eq!(rows[2][NICKNAME_COL], "bob");
        assert_eq!(rows[2][SCOUNT_COL], "2");

        // Local history keeps all four capture events.
        assert_eq!(read_csv_rows(&dir).len(), 4);
    }

    struct FlakyTable {
        inner: InMemoryTable,
        failures_left: u32,
    }

    impl RemoteTable for FlakyTable {
        fn read_all(&self, tab: &str) -> Result<Vec<Vec<String>>> {
            self.inner.read_all(tab)
        }

        fn append_rows(&mut self, tab: &str, rows: &[Vec<String>]) -> Result<()> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(ScraperError::Remote {
                    status: 429,
                    message: "rate limited".to_string(),
                });
            }
            self.inner.append_rows(tab, rows)
        }

        fn update_row(&mut self, tab: &str, sheet_row: usize, values: &[String]) -> Result<()> {
            self.inner.update_row(tab, sheet_row, values)
        }
    }

    #[test]
    fn failed_batch_is_retried_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut flaky = FlakyTable {
            inner: InMemoryTable::new(),
            failures_left: 2,
        };
        // Seed the header directly so the flaky failures hit the data batch.
        flaky.inner.append_rows("Sheet1", &[sheet_header()]).unwrap();

        let mut sink = writer(&dir, Some(Box::new(flaky)));
        let summary = sink.write(&[record("alice", 1)]).unwrap();
        assert_eq!((summary.appended, summary.failed), (1, 0));
    }

    #[test]
    fn exhausted_batch_is_logged_and_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = FlakyTable {
            inner: InMemoryTable::new(),
            failures_left: u32::MAX,
        };
        table.inner.append_rows("Sheet1", &[sheet_header()]).unwrap();

        let mut sink = writer(&dir, Some(Box::new(table)));
        let summary = sink.write(&[record("alice", 1)]).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.appended, 0);

        // The local history still recorded the capture.
        assert_eq!(read_csv_rows(&dir).len(), 1);
    }

    #[test]
    fn seen_count_survives_malformed_cells() {
        let mut row = record_to_row(&record("alice", 1), 1);
        row[SCOUNT_COL] = "garbage".to_string();
        let state = SheetState::from_rows(vec![sheet_header(), row]);
        assert_eq!(state.seen_count("alice"), 0);
        assert_eq!(state.seen_count("missing"), 0);
    }
}
