pub(crate) mod circleci;

pub use circleci::{CircleCiProvider, CycleReport};
