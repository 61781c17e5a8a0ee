/*!
Population filtering, stratified sampling and anonymity-gated aggregation for
repeated anonymous surveys.

The crate is the algorithmic core of a survey platform:

- filtering: translates a declarative [FilterSpec] into predicate leaves,
  each tagged as pushable to the store or residual (date arithmetic applied
  in memory after the fetch).
- sampling: draws a proportionally-stratified random sample of a filtered
  population, auto-selecting up to [MAX_STRATA_DIMENSIONS] low-cardinality
  dimensions and apportioning with the largest-remainder method.
- aggregation: turns raw answers into per-question statistics (choice
  tallies, Likert distributions and means, free-text collections), withheld
  entirely below [ANONYMITY_THRESHOLD] respondents.
- [align_waves]: matches questions across the survey instances of a tracking
  group (stable code first, ordinal position second) into a per-question time
  series where "no data" is an explicit null, never a zero.

Everything here is pure and store-agnostic: dates are passed in, randomness is
drawn fresh per sampling call, and persistence lives with the caller.
*/

mod aggregate;
mod filter;
mod model;
mod sample;
mod waves;

pub use crate::aggregate::*;
pub use crate::filter::*;
pub use crate::model::*;
pub use crate::sample::*;
pub use crate::waves::*;
