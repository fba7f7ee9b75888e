//! Scenario-based tests for etl-pipeline

mod helpers;

mod checkpoint_resume;
mod connections;
mod documents;
mod failure_handling;
mod references;
mod step_naming;
