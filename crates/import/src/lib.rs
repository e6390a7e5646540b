pub mod match_engine;
pub mod ofx;
pub(crate) mod util;

pub use match_engine::{
    description_similarity, Candidate, CandidatePair, DuplicateMatcher, MatchConfig,
    MatchConfigError, MatchMethod, MatchableEntry, PairScore, SessionIgnores,
};
pub use ofx::{OfxAccount, OfxError, OfxStatement, OfxTransaction, SkippedBlock};

pub mod import {
    use crate::{OfxError, OfxStatement};

    /// Reads a statement file as exported by the bank. Invalid UTF-8 is
    /// replaced rather than rejected.
    pub fn import_ofx(data: &[u8]) -> Result<OfxStatement, OfxError> {
        crate::ofx::parse(data)
    }
}
