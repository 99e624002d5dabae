//! Rating records and the resettable file stream that produces them.
//!
//! Rating files hold one record per line, with whitespace-delimited
//! unsigned integer fields:
//!
//! ```text
//! user item date rating     (RecordLayout::Labeled)
//! user item date            (RecordLayout::Unlabeled)
//! ```
//!
//! User and item ids are 1-based. Fields may be separated by any run of
//! spaces or tabs, leading and trailing whitespace is ignored and blank lines
//! are skipped; any other deviation is reported as a
//! [`DataError`](enum.DataError.html) carrying the file and line.
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use csv;
use failure::Fail;

use super::{Day, ItemId, Rating, UserId};

/// Lowest valid star rating.
pub const MIN_RATING: Rating = 1;
/// Highest valid star rating.
pub const MAX_RATING: Rating = 5;

/// Input validation errors.
#[derive(Debug, Fail)]
pub enum DataError {
    /// The file could not be opened or read.
    #[fail(display = "{}: cannot read rating file: {}", file, error)]
    Io {
        /// The offending file.
        file: String,
        /// Underlying I/O failure.
        #[fail(cause)]
        error: io::Error,
    },
    /// The line does not follow the record layout.
    #[fail(display = "{}:{}: malformed record: {}", file, line, reason)]
    Malformed {
        /// The offending file.
        file: String,
        /// The offending line.
        line: u64,
        /// What is wrong with the line.
        reason: String,
    },
    /// User id outside `[1, num_users]`.
    #[fail(display = "{}:{}: user id {} outside [1, {}]", file, line, user, num_users)]
    UserOutOfRange {
        /// The offending file.
        file: String,
        /// The offending line.
        line: u64,
        /// The offending id.
        user: UserId,
        /// Number of users.
        num_users: usize,
    },
    /// Item id outside `[1, num_items]`.
    #[fail(display = "{}:{}: item id {} outside [1, {}]", file, line, item, num_items)]
    ItemOutOfRange {
        /// The offending file.
        file: String,
        /// The offending line.
        line: u64,
        /// The offending id.
        item: ItemId,
        /// Number of items.
        num_items: usize,
    },
    /// Rating outside `[MIN_RATING, MAX_RATING]`.
    #[fail(display = "{}:{}: rating {} outside [1, 5]", file, line, rating)]
    RatingOutOfRange {
        /// The offending file.
        file: String,
        /// The offending line.
        line: u64,
        /// The offending rating.
        rating: u64,
    },
    /// A stream without ratings was given where ratings are required.
    #[fail(display = "{}: stream carries no ratings", file)]
    UnlabeledStream {
        /// The offending file.
        file: String,
    },
}

/// A single `(user, item, day, rating)` observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    user: UserId,
    item: ItemId,
    day: Day,
    rating: Option<Rating>,
}

impl Record {
    /// Build a record with a known rating.
    pub fn labeled(user: UserId, item: ItemId, day: Day, rating: Rating) -> Self {
        Record {
            user,
            item,
            day,
            rating: Some(rating),
        }
    }

    /// Build a record whose rating is unknown.
    pub fn unlabeled(user: UserId, item: ItemId, day: Day) -> Self {
        Record {
            user,
            item,
            day,
            rating: None,
        }
    }

    /// 1-based user id.
    pub fn user(&self) -> UserId {
        self.user
    }

    /// 1-based item id.
    pub fn item(&self) -> ItemId {
        self.item
    }

    /// Day of the rating.
    pub fn day(&self) -> Day {
        self.day
    }

    /// The rating, if the record carries one.
    pub fn rating(&self) -> Option<Rating> {
        self.rating
    }
}

/// Column layout of a rating file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordLayout {
    /// `user item date rating`
    Labeled,
    /// `user item date`
    Unlabeled,
}

impl RecordLayout {
    fn num_fields(self) -> usize {
        match self {
            RecordLayout::Labeled => 4,
            RecordLayout::Unlabeled => 3,
        }
    }
}

#[derive(Deserialize)]
struct LabeledRow {
    user: UserId,
    item: ItemId,
    day: Day,
    rating: u64,
}

#[derive(Deserialize)]
struct UnlabeledRow {
    user: UserId,
    item: ItemId,
    day: Day,
}

/// Sequential, resettable reader over a rating file.
///
/// Iterating yields records in file order; `reset` rewinds to the first
/// record. A malformed line yields an error carrying its file and line.
pub struct RecordStream {
    path: PathBuf,
    file: String,
    layout: RecordLayout,
    reader: BufReader<File>,
    text: String,
    buffer: csv::StringRecord,
    bounds: Option<(usize, usize)>,
    line: u64,
}

impl RecordStream {
    /// Open a rating file with the given column layout.
    pub fn open<P: AsRef<Path>>(path: P, layout: RecordLayout) -> Result<Self, DataError> {
        let path = path.as_ref().to_owned();
        let file = path.display().to_string();

        let handle = File::open(&path).map_err(|error| DataError::Io {
            file: file.clone(),
            error,
        })?;

        Ok(RecordStream {
            path,
            file,
            layout,
            reader: BufReader::new(handle),
            text: String::new(),
            buffer: csv::StringRecord::new(),
            bounds: None,
            line: 0,
        })
    }

    /// Reject user ids outside `[1, num_users]` and item ids outside
    /// `[1, num_items]`.
    pub fn with_bounds(mut self, num_users: usize, num_items: usize) -> Self {
        self.bounds = Some((num_users, num_items));
        self
    }

    pub(crate) fn set_bounds(&mut self, num_users: usize, num_items: usize) {
        self.bounds = Some((num_users, num_items));
    }

    /// Rewind to the first record.
    pub fn reset(&mut self) -> Result<(), DataError> {
        debug!("Resetting {}", self.file);

        self.reader
            .seek(SeekFrom::Start(0))
            .map_err(|error| self.io_error(error))?;
        self.line = 0;

        Ok(())
    }

    /// Column layout of the file.
    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    /// Path the stream was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Display name of the underlying file, used in diagnostics.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Line of the most recently read record.
    pub fn line(&self) -> u64 {
        self.line
    }

    fn io_error(&self, error: io::Error) -> DataError {
        DataError::Io {
            file: self.file.clone(),
            error,
        }
    }

    fn malformed(&self, reason: String) -> DataError {
        DataError::Malformed {
            file: self.file.clone(),
            line: self.line,
            reason,
        }
    }

    fn parse(&self) -> Result<Record, DataError> {
        let expected = self.layout.num_fields();

        if self.buffer.len() != expected {
            return Err(self.malformed(format!(
                "expected {} fields, found {}",
                expected,
                self.buffer.len()
            )));
        }

        let record = match self.layout {
            RecordLayout::Labeled => {
                let row: LabeledRow = self
                    .buffer
                    .deserialize(None)
                    .map_err(|error| self.malformed(error.to_string()))?;

                if row.rating < u64::from(MIN_RATING) || row.rating > u64::from(MAX_RATING) {
                    return Err(DataError::RatingOutOfRange {
                        file: self.file.clone(),
                        line: self.line,
                        rating: row.rating,
                    });
                }

                Record::labeled(row.user, row.item, row.day, row.rating as Rating)
            }
            RecordLayout::Unlabeled => {
                let row: UnlabeledRow = self
                    .buffer
                    .deserialize(None)
                    .map_err(|error| self.malformed(error.to_string()))?;

                Record::unlabeled(row.user, row.item, row.day)
            }
        };

        if let Some((num_users, num_items)) = self.bounds {
            if record.user == 0 || record.user > num_users {
                return Err(DataError::UserOutOfRange {
                    file: self.file.clone(),
                    line: self.line,
                    user: record.user,
                    num_users,
                });
            }
            if record.item == 0 || record.item > num_items {
                return Err(DataError::ItemOutOfRange {
                    file: self.file.clone(),
                    line: self.line,
                    item: record.item,
                    num_items,
                });
            }
        }

        Ok(record)
    }
}

impl Iterator for RecordStream {
    type Item = Result<Record, DataError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.text.clear();

            match self.reader.read_line(&mut self.text) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line += 1;

                    self.buffer.clear();
                    for field in self.text.split_ascii_whitespace() {
                        self.buffer.push_field(field);
                    }

                    if !self.buffer.is_empty() {
                        return Some(self.parse());
                    }
                }
                Err(error) => return Some(Err(self.io_error(error))),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn collect(stream: &mut RecordStream) -> Vec<Record> {
        stream.map(|record| record.unwrap()).collect()
    }

    #[test]
    fn reads_labeled_records_in_file_order() {
        let file = write_lines(&["1 2 10 4", "3 1 200 5", "2 2 7 1\r"]);
        let mut stream = RecordStream::open(file.path(), RecordLayout::Labeled).unwrap();

        assert_eq!(
            collect(&mut stream),
            vec![
                Record::labeled(1, 2, 10, 4),
                Record::labeled(3, 1, 200, 5),
                Record::labeled(2, 2, 7, 1),
            ]
        );
        assert_eq!(stream.line(), 3);
    }

    #[test]
    fn fields_split_on_any_whitespace() {
        let file = write_lines(&[
            "1 2 10 4 ",
            " 1 2 10 4",
            "1  2   10 4",
            "1\t2\t10\t4",
            "\t 1 \t2 10\t 4 \t",
        ]);
        let mut stream = RecordStream::open(file.path(), RecordLayout::Labeled).unwrap();

        let records = collect(&mut stream);

        assert_eq!(records.len(), 5);
        assert!(records
            .iter()
            .all(|record| *record == Record::labeled(1, 2, 10, 4)));
    }

    #[test]
    fn blank_lines_are_skipped_but_counted() {
        let file = write_lines(&["1 2 10 4", "", "   ", "2 1 11 3", "1 x 1 1"]);
        let mut stream = RecordStream::open(file.path(), RecordLayout::Labeled).unwrap();

        assert_eq!(stream.next().unwrap().unwrap(), Record::labeled(1, 2, 10, 4));
        assert_eq!(stream.next().unwrap().unwrap(), Record::labeled(2, 1, 11, 3));
        assert_eq!(stream.line(), 4);

        match stream.next().unwrap() {
            Err(DataError::Malformed { line, .. }) => assert_eq!(line, 5),
            other => panic!("Unexpected result {:?}", other),
        }
        assert!(stream.next().is_none());
    }

    #[test]
    fn reads_unlabeled_records() {
        let file = write_lines(&["1 2 10", "3 1 200"]);
        let mut stream = RecordStream::open(file.path(), RecordLayout::Unlabeled).unwrap();

        let records = collect(&mut stream);

        assert_eq!(records[1], Record::unlabeled(3, 1, 200));
        assert!(records.iter().all(|record| record.rating().is_none()));
    }

    #[test]
    fn reset_is_idempotent() {
        let records = synthetic_records(6, 8);
        let (_file, mut stream) = labeled_stream(&records);

        stream.reset().unwrap();
        let first = collect(&mut stream);
        stream.reset().unwrap();
        stream.reset().unwrap();
        let second = collect(&mut stream);

        assert_eq!(first, records);
        assert_eq!(first, second);
    }

    #[test]
    fn reset_midway_restarts_from_the_beginning() {
        let records = synthetic_records(4, 4);
        let (_file, mut stream) = labeled_stream(&records);

        stream.next().unwrap().unwrap();
        stream.next().unwrap().unwrap();
        stream.reset().unwrap();

        assert_eq!(collect(&mut stream), records);
    }

    #[test]
    fn malformed_lines_report_file_and_line() {
        let file = write_lines(&["1 2 10 4", "1 x 10 4"]);
        let mut stream = RecordStream::open(file.path(), RecordLayout::Labeled).unwrap();

        assert!(stream.next().unwrap().is_ok());

        match stream.next().unwrap() {
            Err(DataError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn wrong_field_count_is_malformed() {
        let file = write_lines(&["1 2 10"]);
        let mut stream = RecordStream::open(file.path(), RecordLayout::Labeled).unwrap();

        match stream.next().unwrap() {
            Err(DataError::Malformed { line, reason, .. }) => {
                assert_eq!(line, 1);
                assert!(reason.contains("expected 4 fields"));
            }
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn ratings_outside_star_range_are_rejected() {
        let file = write_lines(&["1 2 10 6"]);
        let mut stream = RecordStream::open(file.path(), RecordLayout::Labeled).unwrap();

        match stream.next().unwrap() {
            Err(DataError::RatingOutOfRange { rating, .. }) => assert_eq!(rating, 6),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn ids_are_checked_against_bounds() {
        let file = write_lines(&["1 2 10 4", "0 1 10 4"]);
        let mut stream = RecordStream::open(file.path(), RecordLayout::Labeled)
            .unwrap()
            .with_bounds(2, 2);

        assert!(stream.next().unwrap().is_ok());
        match stream.next().unwrap() {
            Err(DataError::UserOutOfRange { user, line, .. }) => {
                assert_eq!(user, 0);
                assert_eq!(line, 2);
            }
            other => panic!("Unexpected result {:?}", other),
        }

        let file = write_lines(&["1 3 10 4"]);
        let mut stream = RecordStream::open(file.path(), RecordLayout::Labeled)
            .unwrap()
            .with_bounds(2, 2);

        match stream.next().unwrap() {
            Err(DataError::ItemOutOfRange { item, .. }) => assert_eq!(item, 3),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        match RecordStream::open("/nonexistent/ratings.dta", RecordLayout::Labeled) {
            Err(DataError::Io { file, .. }) => assert!(file.contains("ratings.dta")),
            Err(other) => panic!("Unexpected error {:?}", other),
            Ok(_) => panic!("Opened a missing file"),
        }
    }
}
