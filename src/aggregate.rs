use std::collections::HashMap;

use tracing::info;

use crate::domain::{IdentificationResult, SampleId, SetGroup, SetId, SpectraRecord, ValidationResult};
use crate::error::KiraError;
use crate::keyed::{ensure_unique, group_by, index_unique};
use crate::tasks::{CancelToken, TaskGroup};
use crate::tools::{Tool, ToolInvocation, ToolRunner};
use crate::workdir::{WorkDir, write_bytes_atomic};

/// Identification results of one set, in declaration order.
pub type PendingGroup = (SetId, Vec<IdentificationResult>);

/// Regroups identification results by analytical set and joins each group
/// with the set's validation output.
pub struct SetAggregator<'a, R: ToolRunner> {
    runner: &'a R,
    workdir: &'a WorkDir,
}

impl<'a, R: ToolRunner> SetAggregator<'a, R> {
    pub fn new(runner: &'a R, workdir: &'a WorkDir) -> Self {
        Self { runner, workdir }
    }

    pub fn aggregate(
        &self,
        group: &TaskGroup,
        records: &[SpectraRecord],
        results: Vec<IdentificationResult>,
    ) -> Result<Vec<SetGroup>, KiraError> {
        let pending = group_results(records, results)?;
        let validations = group.run(pending.clone(), |(set, members), cancel| {
            self.validate(&set, &members, cancel)
        })?;
        join_validation(pending, validations)
    }

    /// Validation reads its inputs positionally, so the list file carries
    /// the identification files in declaration order.
    pub fn validate(
        &self,
        set: &SetId,
        members: &[IdentificationResult],
        cancel: &CancelToken,
    ) -> Result<ValidationResult, KiraError> {
        let inputs = self.workdir.validation_inputs(set);
        let listing = members
            .iter()
            .map(|member| format!("{}\n", member.ident))
            .collect::<String>();
        write_bytes_atomic(&inputs, listing.as_bytes())?;

        let output = self.workdir.validation_output(set);
        let label = format!("Set{set}");
        let invocation = ToolInvocation::new(
            Tool::Validate,
            label.as_str(),
            self.workdir.log_path(Tool::Validate, &label),
        )
        .bind("set", set)
        .bind("inputs_list", &inputs)
        .bind("output", &output)
        .expect_output(&output);
        self.runner.run(&invocation, cancel)?;

        info!(set = %set, members = members.len(), "set validated");
        Ok(ValidationResult {
            set: set.clone(),
            validated: output,
        })
    }
}

/// Groups results by set. Sets and the members inside each set follow the
/// order of the spectra definition, not the order results arrived in.
pub fn group_results(
    records: &[SpectraRecord],
    results: Vec<IdentificationResult>,
) -> Result<Vec<PendingGroup>, KiraError> {
    let declared: HashMap<(&SetId, &SampleId), usize> = records
        .iter()
        .enumerate()
        .map(|(position, record)| ((&record.set, &record.sample), position))
        .collect();

    ensure_unique(&results, |result| (&result.set, &result.sample), "identification result")?;

    let mut positioned = results
        .into_iter()
        .map(|result| {
            let position = declared.get(&(&result.set, &result.sample)).copied();
            match position {
                Some(position) => Ok((position, result)),
                None => Err(KiraError::Correspondence(format!(
                    "identification result for sample {} was never declared in set {}",
                    result.sample, result.set
                ))),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    positioned.sort_by_key(|(position, _)| *position);

    Ok(group_by(
        positioned.into_iter().map(|(_, result)| result),
        |result| result.set.clone(),
    ))
}

/// Pairs every group with the validation result of its set. A set present
/// on only one side is a [`KiraError::MissingGroup`].
pub fn join_validation(
    groups: Vec<PendingGroup>,
    validations: Vec<ValidationResult>,
) -> Result<Vec<SetGroup>, KiraError> {
    let mut index = index_unique(
        validations
            .into_iter()
            .map(|validation| (validation.set.clone(), validation)),
        "validation result",
    )?;

    let mut joined = Vec::with_capacity(groups.len());
    for (set, members) in groups {
        let validation = index.remove(&set).ok_or_else(|| {
            KiraError::MissingGroup(format!("set {set} has identification results but no validation"))
        })?;
        joined.push(SetGroup {
            set,
            members,
            validation,
        });
    }

    if let Some(orphan) = index.keys().min() {
        return Err(KiraError::MissingGroup(format!(
            "set {orphan} has a validation result but no identification results"
        )));
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

    fn record(sample: &str, set: &str, fraction: &str) -> SpectraRecord {
        SpectraRecord {
            fraction: fraction.parse().unwrap(),
            set: set.parse().unwrap(),
            sample: sample.parse().unwrap(),
            spectra: Utf8PathBuf::from(format!("{sample}.mzML")),
        }
    }

    fn result(sample: &str, set: &str, fraction: &str) -> IdentificationResult {
        IdentificationResult {
            set: set.parse().unwrap(),
            fraction: fraction.parse().unwrap(),
            sample: sample.parse().unwrap(),
            ident: Utf8PathBuf::from(format!("{sample}.mzid")),
            table: Utf8PathBuf::from(format!("{sample}.tsv")),
        }
    }

    fn validation(set: &str) -> ValidationResult {
        ValidationResult {
            set: set.parse().unwrap(),
            validated: Utf8PathBuf::from(format!("Set{set}.perco.xml")),
        }
    }

    #[test]
    fn grouping_follows_declaration_not_completion() {
        let records = [
            record("s1", "A", "01"),
            record("t1", "B", "01"),
            record("s2", "A", "02"),
            record("s3", "A", "03"),
        ];
        let finished = vec![
            result("s3", "A", "03"),
            result("t1", "B", "01"),
            result("s1", "A", "01"),
            result("s2", "A", "02"),
        ];
        let groups = group_results(&records, finished).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.as_str(), "A");
        let order = groups[0].1.iter().map(|r| r.sample.as_str()).collect::<Vec<_>>();
        assert_eq!(order, vec!["s1", "s2", "s3"]);
        assert_eq!(groups[1].0.as_str(), "B");
    }

    #[test]
    fn missing_validation_is_missing_group() {
        let groups = vec![("A".parse().unwrap(), vec![result("s1", "A", "01")])];
        let err = join_validation(groups, vec![]).unwrap_err();
        assert_matches!(err, KiraError::MissingGroup(_));
    }

    #[test]
    fn orphan_validation_is_missing_group() {
        let groups = vec![("A".parse().unwrap(), vec![result("s1", "A", "01")])];
        let err = join_validation(groups, vec![validation("A"), validation("Z")]).unwrap_err();
        assert_matches!(err, KiraError::MissingGroup(msg) if msg.contains("Z"));
    }

    #[test]
    fn undeclared_result_is_rejected() {
        let err = group_results(&[record("s1", "A", "01")], vec![result("s1", "B", "01")])
            .unwrap_err();
        assert_matches!(err, KiraError::Correspondence(_));
    }
}
