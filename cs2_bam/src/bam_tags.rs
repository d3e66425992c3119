/// Number of reported alignments of the query, set by most aligners.
pub const NUM_HITS_TAG: &[u8] = b"NH";
