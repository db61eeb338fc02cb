mod aggregation;
mod common;
mod workflow;
