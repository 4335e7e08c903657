//! Streaming OCP-on-AWS cost usage aggregation and attribution engine.
//!
//! Raw OCP usage (pods, storage, node capacity, labels) and raw AWS cost and
//! usage report rows go in; per-namespace daily cost and usage summaries come
//! out. [`pipeline`] is the entry point that wires every stage together —
//! the other modules are the stages themselves and can be used standalone.

pub mod capacity_calculator;
pub mod config;
pub mod cost_attributor;
pub mod disk_capacity_solver;
pub mod error;
pub mod executor;
pub mod labels;
pub mod model;
pub mod network_cost_handler;
pub mod pipeline;
pub mod pod_aggregator;
pub mod resource_matcher;
pub mod storage_aggregator;
pub mod tag_matcher;
pub mod time_util;
pub mod unallocated_calculator;
