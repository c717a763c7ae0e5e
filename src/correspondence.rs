use tracing::{debug, warn};

use crate::domain::{KeyMiss, SearchUnit, SpectraRecord, TargetDecoyDatabase};
use crate::error::KiraError;
use crate::keyed::{ensure_unique, index_unique, join};

/// Inner join of per-fraction databases (one per fraction) with spectra
/// records (many per fraction) on the fraction key.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrespondenceJoiner {
    on_missing: KeyMiss,
}

impl CorrespondenceJoiner {
    pub fn new(on_missing: KeyMiss) -> Self {
        Self { on_missing }
    }

    /// One [`SearchUnit`] per spectra record, in record order. A repeated
    /// fraction among the databases is always a [`KiraError::Correspondence`];
    /// a record without a database follows the configured [`KeyMiss`].
    pub fn join(
        &self,
        databases: &[TargetDecoyDatabase],
        records: &[SpectraRecord],
    ) -> Result<Vec<SearchUnit>, KiraError> {
        let index = index_unique(
            databases
                .iter()
                .map(|database| (database.fraction.clone(), database)),
            "target-decoy database",
        )?;

        let joined = join(
            records.to_vec(),
            |record| &record.fraction,
            &index,
            self.on_missing,
            |record, database| SearchUnit {
                fraction: record.fraction,
                set: record.set,
                sample: record.sample,
                spectra: record.spectra,
                database: database.path.clone(),
            },
        )
        .map_err(|err| match err {
            KiraError::Correspondence(message) => KiraError::Correspondence(format!(
                "spectra reference a fraction without database: {message}"
            )),
            other => other,
        })?;

        for record in &joined.dropped {
            warn!(
                fraction = %record.fraction,
                set = %record.set,
                sample = %record.sample,
                "dropping spectra record: fraction has no database"
            );
        }

        ensure_unique(&joined.matched, SearchUnit::key, "search unit")?;
        debug!(units = joined.matched.len(), dropped = joined.dropped.len(), "joined");
        Ok(joined.matched)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

    fn database(fraction: &str) -> TargetDecoyDatabase {
        TargetDecoyDatabase {
            fraction: fraction.parse().unwrap(),
            path: Utf8PathBuf::from(format!("td/db_{fraction}.td.fa")),
            canonical_only: false,
        }
    }

    fn record(spectra: &str, set: &str, fraction: &str) -> SpectraRecord {
        SpectraRecord {
            fraction: fraction.parse().unwrap(),
            set: set.parse().unwrap(),
            sample: spectra.parse().unwrap(),
            spectra: Utf8PathBuf::from(format!("{spectra}.mzML")),
        }
    }

    #[test]
    fn shared_fraction_fans_out_to_every_set() {
        let units = CorrespondenceJoiner::default()
            .join(
                &[database("01"), database("02")],
                &[record("a1", "A", "01"), record("b1", "B", "01"), record("a2", "A", "02")],
            )
            .unwrap();
        let keys = units
            .iter()
            .map(|unit| (unit.fraction.as_str(), unit.set.as_str(), unit.sample.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(keys, vec![("01", "A", "a1"), ("01", "B", "b1"), ("02", "A", "a2")]);
        assert!(units[1].database.ends_with("db_01.td.fa"));
    }

    #[test]
    fn duplicate_database_fraction_is_rejected() {
        let err = CorrespondenceJoiner::default()
            .join(&[database("01"), database("01")], &[record("a1", "A", "01")])
            .unwrap_err();
        assert_matches!(err, KiraError::Correspondence(_));
    }

    #[test]
    fn unmatched_fraction_rejected_or_dropped() {
        let databases = [database("01")];
        let records = [record("a1", "A", "01"), record("a9", "A", "09")];

        let err = CorrespondenceJoiner::new(KeyMiss::Reject)
            .join(&databases, &records)
            .unwrap_err();
        assert_matches!(err, KiraError::Correspondence(msg) if msg.contains("09"));

        let units = CorrespondenceJoiner::new(KeyMiss::Drop)
            .join(&databases, &records)
            .unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].sample.as_str(), "a1");
    }
}
