/// Tracks the candidate most similar to some name.
///
/// Used to produce "did you mean" hints for misspelled entity, member, and
/// setting names.
#[derive(Debug, Clone, Copy)]
pub struct SimilarName<'a> {
    score: f64,
    candidate: &'a str,
}

impl<'a> SimilarName<'a> {
    const SIMILARITY_THRESHOLD: f64 = 0.7;

    /// Find the candidate most similar to `name`, if any are similar enough.
    pub fn find(candidates: impl IntoIterator<Item = &'a str>, name: &str) -> Option<&'a str> {
        let mut current: Option<Self> = None;
        for candidate in candidates {
            Self::maybe_update(&mut current, candidate, name);
        }
        current.map(|similar| similar.candidate)
    }

    fn maybe_update(current: &mut Option<Self>, candidate: &'a str, name: &str) {
        let score = strsim::jaro(candidate, name);
        if score <= Self::SIMILARITY_THRESHOLD {
            return;
        }

        match current {
            Some(existing) if existing.score >= score => (),
            _ => *current = Some(SimilarName { score, candidate }),
        }
    }
}
