pub mod task;

pub use task::{CostClass, MergeRule, TaskProfile};
