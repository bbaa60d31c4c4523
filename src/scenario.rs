use typed_builder::TypedBuilder;

use crate::chain::Chain;

/// A named chain. One scenario is run by every virtual user of a run, each with
/// its own session.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Scenario {
    #[builder(setter(into))]
    pub name: String,
    pub chain: Chain,
}

impl Scenario {
    /// Whether a user running this scenario only stops when the run is cancelled.
    pub fn loops_forever(&self) -> bool {
        self.chain.loops_forever()
    }
}
