pub mod candidates;
pub mod matcher;
pub mod normalize;

pub use candidates::{find_candidates, LinkCandidate};
pub use matcher::{match_names, MatchMethod, NameMatch};
