use std::fs;

use camino::Utf8Path;
use tracing::info;

use crate::domain::{IdentificationResult, SearchUnit};
use crate::error::KiraError;
use crate::tasks::{CancelToken, TaskGroup};
use crate::tools::{Tool, ToolInvocation, ToolRunner};
use crate::workdir::WorkDir;

/// Runs the search tool once per [`SearchUnit`], then flattens its
/// identification file into a table.
pub struct SearchDispatcher<'a, R: ToolRunner> {
    runner: &'a R,
    workdir: &'a WorkDir,
    modifications: &'a Utf8Path,
    threads: usize,
}

impl<'a, R: ToolRunner> SearchDispatcher<'a, R> {
    pub fn new(
        runner: &'a R,
        workdir: &'a WorkDir,
        modifications: &'a Utf8Path,
        threads: usize,
    ) -> Self {
        Self {
            runner,
            workdir,
            modifications,
            threads,
        }
    }

    pub fn dispatch_all(
        &self,
        group: &TaskGroup,
        units: Vec<SearchUnit>,
    ) -> Result<Vec<IdentificationResult>, KiraError> {
        group.run(units, |unit, cancel| self.dispatch(&unit, cancel))
    }

    pub fn dispatch(
        &self,
        unit: &SearchUnit,
        cancel: &CancelToken,
    ) -> Result<IdentificationResult, KiraError> {
        let ident = self.workdir.ident_path(&unit.set, &unit.sample);
        let table = self.workdir.table_path(&unit.set, &unit.sample);
        let label = format!("Set{}-{}", unit.set, unit.sample);
        if let Some(parent) = ident.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }

        let search = ToolInvocation::new(
            Tool::Search,
            label.as_str(),
            self.workdir.set_log_path(Tool::Search, &unit.set, unit.sample.as_str()),
        )
        .bind("spectra", &unit.spectra)
        .bind("database", &unit.database)
        .bind("output", &ident)
        .bind("mods", self.modifications)
        .bind("threads", self.threads)
        .expect_output(&ident);
        self.runner.run(&search, cancel)?;

        let flatten = ToolInvocation::new(
            Tool::SearchTable,
            label.as_str(),
            self.workdir.set_log_path(Tool::SearchTable, &unit.set, unit.sample.as_str()),
        )
        .bind("input", &ident)
        .bind("output", &table)
        .expect_output(&table);
        self.runner.run(&flatten, cancel)?;

        info!(
            fraction = %unit.fraction,
            set = %unit.set,
            sample = %unit.sample,
            "search finished"
        );
        Ok(IdentificationResult {
            set: unit.set.clone(),
            fraction: unit.fraction.clone(),
            sample: unit.sample.clone(),
            ident,
            table,
        })
    }
}
