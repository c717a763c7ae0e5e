pub mod aggregate;
pub mod canonical;
pub mod config;
pub mod correspondence;
pub mod domain;
pub mod error;
pub mod fasta;
pub mod fractions;
pub mod ingest;
pub mod keyed;
pub mod output;
pub mod pipeline;
pub mod search;
pub mod tasks;
pub mod tools;
pub mod transcript;
pub mod workdir;
