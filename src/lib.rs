pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod error;
pub mod fastq;
pub mod output;
pub mod pipeline;
pub mod runner;
pub mod sample_set;
pub mod stage;
pub mod stages;
pub mod tracker;
pub mod workspace;
