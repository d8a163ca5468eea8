//! Best master clock selection over Ethernet ports and the virtual port

pub mod bmca;
pub mod dataset_comparison;
pub mod foreign_master;

pub use bmca::{Bmca, Candidate, RecommendedState, SourceId};
pub use dataset_comparison::{ComparisonDataset, DatasetOrdering};
pub use foreign_master::{AnnounceInfo, ForeignMasterList};
