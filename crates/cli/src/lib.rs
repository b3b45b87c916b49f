// GorodIndex CLI library: batch orchestration and the exit-code registry.
// The `gorodindex` binary is a thin clap layer over this.

pub mod exit_codes;
pub mod pipeline;

pub use pipeline::{
    alias_table, load_and_reconcile, Located, Pipeline, PipelineError, RunOptions, RunSummary,
};
