pub mod channel;
pub mod run;
pub mod validation;

pub use channel::{ChannelEntry, Collection, SourceCollection, Trust, UNKNOWN_DURATION};
pub use run::{RunState, RunSummary, SourceReport, TierReport};
pub use validation::{ValidationResults, Verdict, VerdictCounts};
