use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::day::DaySeries;
use crate::Result;

const FILE_PREFIX: &str = "series_";
const FILE_SUFFIX: &str = ".dat";
const TEMP_SUFFIX: &str = ".tmp";

/// One file per day under a data directory, named `series_YYYY-MM-DD.dat`.
#[derive(Debug, Clone)]
pub struct SeriesFileStore {
    dir: PathBuf,
}

impl SeriesFileStore {
    /// Opens `dir`, creating it (and its parents) if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(file_name(date))
    }

    /// Replaces the file for `date` with `series`. The bytes go to a
    /// sibling `.tmp` file first and are renamed into place, so an earlier
    /// copy survives a failed write.
    pub fn save(&self, series: &DaySeries, date: NaiveDate) -> Result<()> {
        let mut buf = BytesMut::new();
        series.encode(&mut buf)?;

        let path = self.path(date);
        let staging = self.dir.join(format!("{}{TEMP_SUFFIX}", file_name(date)));
        let mut out = BufWriter::new(File::create(&staging)?);
        out.write_all(&buf)?;
        let file = out.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        drop(file);

        if let Err(err) = fs::rename(&staging, &path) {
            let _ = fs::remove_file(&staging);
            return Err(err.into());
        }
        debug!(%date, bytes = buf.len(), path = %path.display(), "series saved");
        Ok(())
    }

    /// `Ok(None)` when no file exists for `date`.
    pub fn load(&self, date: NaiveDate) -> Result<Option<DaySeries>> {
        let file = match File::open(self.path(date)) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut bytes = Vec::new();
        BufReader::new(file).read_to_end(&mut bytes)?;
        let series = DaySeries::decode(&mut &bytes[..])?;
        debug!(%date, bytes = bytes.len(), "series loaded");
        Ok(Some(series))
    }

    pub fn exists(&self, date: NaiveDate) -> bool {
        self.path(date).is_file()
    }

    /// Number of well-formed day files in the directory.
    pub fn count_historical_days(&self) -> Result<usize> {
        Ok(self.saved_dates()?.count())
    }

    /// The most recent date with a day file, ignoring malformed names.
    pub fn latest_saved_date(&self) -> Result<Option<NaiveDate>> {
        Ok(self.saved_dates()?.max())
    }

    fn saved_dates(&self) -> Result<impl Iterator<Item = NaiveDate>> {
        let entries = fs::read_dir(&self.dir)?;
        Ok(entries.filter_map(|entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable directory entry");
                    return None;
                }
            };
            entry.file_name().to_str().and_then(parse_file_date)
        }))
    }
}

fn file_name(date: NaiveDate) -> String {
    format!("{FILE_PREFIX}{}{FILE_SUFFIX}", date.format("%Y-%m-%d"))
}

fn parse_file_date(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SeriesError;
    use ss_core::SalesEvent;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample(on: NaiveDate) -> DaySeries {
        let series = DaySeries::new(on, true);
        let at = on.and_hms_opt(10, 30, 0).unwrap();
        series.add_event(SalesEvent::new("Widget", 3, 9.99, at)).unwrap();
        series.add_event(SalesEvent::new("Gadget", 1, 120.0, at)).unwrap();
        series.set_current_day(false);
        series
    }

    #[test]
    fn file_names_use_iso_dates() {
        assert_eq!(file_name(date(2024, 1, 5)), "series_2024-01-05.dat");
        assert_eq!(parse_file_date("series_2024-01-05.dat"), Some(date(2024, 1, 5)));
        assert_eq!(parse_file_date("series_2024-13-05.dat"), None);
        assert_eq!(parse_file_date("series_notes.dat"), None);
        assert_eq!(parse_file_date("series_2024-01-05.bak"), None);
    }

    #[test]
    fn open_creates_nested_directories() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("data").join("timeseries");
        let store = SeriesFileStore::open(&dir).unwrap();
        assert!(store.dir().is_dir());
        assert_eq!(store.count_historical_days().unwrap(), 0);
        assert_eq!(store.latest_saved_date().unwrap(), None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = SeriesFileStore::open(tmp.path()).unwrap();
        let day = date(2024, 5, 17);
        let series = sample(day);

        assert!(!store.exists(day));
        store.save(&series, day).unwrap();
        assert!(store.exists(day));

        let loaded = store.load(day).unwrap().expect("saved day");
        assert_eq!(loaded, series);
        assert!(!loaded.is_current_day());
        assert_eq!(loaded.quantity("Widget"), 3);
    }

    #[test]
    fn save_replaces_an_existing_day_without_leftovers() {
        let tmp = TempDir::new().unwrap();
        let store = SeriesFileStore::open(tmp.path()).unwrap();
        let day = date(2024, 5, 17);
        store.save(&sample(day), day).unwrap();

        let replacement = DaySeries::new(day, false);
        store.save(&replacement, day).unwrap();

        assert_eq!(store.load(day).unwrap().expect("saved day"), replacement);
        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["series_2024-05-17.dat".to_string()]);
    }

    #[test]
    fn staging_file_is_not_a_saved_day() {
        let tmp = TempDir::new().unwrap();
        let store = SeriesFileStore::open(tmp.path()).unwrap();
        fs::write(tmp.path().join("series_2024-05-17.dat.tmp"), b"partial").unwrap();

        assert_eq!(store.count_historical_days().unwrap(), 0);
        assert!(!store.exists(date(2024, 5, 17)));
    }

    #[test]
    fn load_of_missing_day_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = SeriesFileStore::open(tmp.path()).unwrap();
        assert!(store.load(date(2024, 5, 17)).unwrap().is_none());
    }

    #[test]
    fn truncated_file_is_a_format_error() {
        let tmp = TempDir::new().unwrap();
        let store = SeriesFileStore::open(tmp.path()).unwrap();
        let day = date(2024, 5, 17);
        store.save(&sample(day), day).unwrap();

        let path = store.path(day);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        assert!(matches!(store.load(day), Err(SeriesError::Format(_))));
    }

    #[test]
    fn directory_scan_skips_malformed_names() {
        let tmp = TempDir::new().unwrap();
        let store = SeriesFileStore::open(tmp.path()).unwrap();
        for day in [date(2024, 5, 15), date(2024, 5, 17), date(2023, 12, 31)] {
            store.save(&sample(day), day).unwrap();
        }
        for junk in ["series_garbage.dat", "series_2024-02-30.dat", "notes.txt"] {
            fs::write(tmp.path().join(junk), b"junk").unwrap();
        }

        assert_eq!(store.latest_saved_date().unwrap(), Some(date(2024, 5, 17)));
        assert_eq!(store.count_historical_days().unwrap(), 3);
    }
}
