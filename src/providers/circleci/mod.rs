mod client;
mod jobs;
mod pagination;
mod provider;
mod types;
mod workflows;

pub use provider::{CircleCiProvider, CycleReport};
