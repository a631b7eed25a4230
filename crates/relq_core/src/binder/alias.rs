use tracing::trace;

/// Generates sequential aliases (`t0`, `t1`, ...) for a single translation.
#[derive(Debug, Default)]
pub struct AliasGenerator {
    next: usize,
}

impl AliasGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_alias(&mut self) -> String {
        let alias = format!("t{}", self.next);
        self.next += 1;
        trace!(%alias, "generated alias");
        alias
    }
}
