use std::collections::{HashMap, HashSet};

use log::{debug, info};
use rand::Rng;

use crate::model::*;

/// A dimension must be populated on at least this share of the population to
/// be considered for stratification. Policy constant, not a derived value.
pub const MIN_DIMENSION_COVERAGE: f64 = 0.10;

/// At most this many dimensions are combined into the stratum key. Policy
/// constant, not a derived value.
pub const MAX_STRATA_DIMENSIONS: usize = 3;

/// Key component for records missing a value on a selected dimension. Such
/// records form their own stratum instead of being excluded.
const ABSENT: &str = "__absent__";

/// A candidate stratification axis: one of the organizational sub-levels or
/// one of the categorical demographic attributes.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum Dimension {
    Unit(UnitLevel),
    Category(Category),
}

impl Dimension {
    /// Candidates in declaration order. This order is the tie-break when two
    /// dimensions have the same cardinality.
    pub const CANDIDATES: [Dimension; 9] = [
        Dimension::Unit(UnitLevel::Department),
        Dimension::Unit(UnitLevel::Service),
        Dimension::Unit(UnitLevel::Team),
        Dimension::Category(Category::Sex),
        Dimension::Category(Category::JobFunction),
        Dimension::Category(Category::WorkLocation),
        Dimension::Category(Category::ContractType),
        Dimension::Category(Category::WorkTime),
        Dimension::Category(Category::CostCenter),
    ];

    pub fn value_of(&self, identity: &Identity) -> Option<String> {
        match self {
            Dimension::Unit(level) => identity.units.at(*level).map(|u| u.0.to_string()),
            Dimension::Category(cat) => {
                identity.demographics.category(*cat).map(|v| v.to_string())
            }
        }
    }
}

/// Draws a proportionally-stratified random sample of
/// `round(|population| * percentage / 100)` records (minimum 1 when the
/// population is non-empty).
///
/// Every invocation uses a fresh thread-local generator, so repeated runs are
/// statistically independent.
pub fn sample(population: &[Identity], percentage: f64) -> Result<Vec<IdentityId>, CoreError> {
    sample_with_rng(population, percentage, &mut rand::rng())
}

/// Same as [sample], with the generator supplied by the caller.
pub fn sample_with_rng<R: Rng>(
    population: &[Identity],
    percentage: f64,
    rng: &mut R,
) -> Result<Vec<IdentityId>, CoreError> {
    if !(percentage > 0.0 && percentage <= 100.0) {
        return Err(CoreError::InvalidPercentage(percentage));
    }
    if population.is_empty() {
        return Ok(Vec::new());
    }
    let n = population.len();
    let target = (((n as f64) * percentage / 100.0).round() as usize).max(1);
    if target >= n {
        return Ok(population.iter().map(|p| p.id).collect());
    }

    let dims = select_dimensions(population);
    info!(
        "sample: population {}, target {}, dimensions {:?}",
        n, target, dims
    );
    if dims.is_empty() {
        // No dimension qualifies: plain uniform sampling.
        let mut pool: Vec<usize> = (0..n).collect();
        let picked = draw(&mut pool, target, rng);
        return Ok(picked.iter().map(|&i| population[i].id).collect());
    }

    // Partition into strata, preserving discovery order.
    let mut key_index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut strata: Vec<Vec<usize>> = Vec::new();
    for (idx, identity) in population.iter().enumerate() {
        let key: Vec<String> = dims
            .iter()
            .map(|d| d.value_of(identity).unwrap_or_else(|| ABSENT.to_string()))
            .collect();
        let next = strata.len();
        let s = *key_index.entry(key).or_insert(next);
        if s == strata.len() {
            strata.push(Vec::new());
        }
        strata[s].push(idx);
    }
    debug!(
        "sample: {} strata, sizes {:?}",
        strata.len(),
        strata.iter().map(|s| s.len()).collect::<Vec<_>>()
    );

    let sizes: Vec<usize> = strata.iter().map(|s| s.len()).collect();
    let allocations = allocate(&sizes, n, target);

    let mut res: Vec<IdentityId> = Vec::with_capacity(target);
    for (stratum, quota) in strata.iter().zip(allocations.iter()) {
        // A stratum smaller than its quota is capped at its own size. The
        // final sample may undershoot the target, never overshoot.
        let take = (*quota).min(stratum.len());
        if take == 0 {
            continue;
        }
        let mut pool = stratum.clone();
        let picked = draw(&mut pool, take, rng);
        res.extend(picked.iter().map(|&i| population[i].id));
    }
    Ok(res)
}

/// Selects up to [MAX_STRATA_DIMENSIONS] eligible dimensions, preferring the
/// lowest distinct-value cardinality. Low-cardinality dimensions give stable,
/// well-populated strata; high-cardinality ones give noisy slivers.
fn select_dimensions(population: &[Identity]) -> Vec<Dimension> {
    let n = population.len();
    let mut eligible: Vec<(Dimension, usize)> = Vec::new();
    for dim in Dimension::CANDIDATES {
        let mut covered: usize = 0;
        let mut distinct: HashSet<String> = HashSet::new();
        for identity in population.iter() {
            if let Some(v) = dim.value_of(identity) {
                covered += 1;
                distinct.insert(v);
            }
        }
        let coverage = covered as f64 / n as f64;
        if coverage >= MIN_DIMENSION_COVERAGE && !distinct.is_empty() {
            debug!(
                "select_dimensions: {:?} coverage {:.2} cardinality {}",
                dim,
                coverage,
                distinct.len()
            );
            eligible.push((dim, distinct.len()));
        }
    }
    // Stable sort: declaration order breaks cardinality ties.
    eligible.sort_by_key(|(_, card)| *card);
    eligible.truncate(MAX_STRATA_DIMENSIONS);
    eligible.iter().map(|(d, _)| *d).collect()
}

/// Largest-remainder (Hare–Niemeyer) apportionment of `target` units across
/// strata proportionally to their sizes.
///
/// Floors of the ideal fractional shares are assigned first; the shortfall is
/// then distributed one unit at a time to the largest remainders, ties broken
/// by stratum discovery order. The returned allocations always sum to
/// `target` (before any stratum-size capping by the caller).
pub fn allocate(sizes: &[usize], population: usize, target: usize) -> Vec<usize> {
    if population == 0 {
        // Nothing to apportion over; NaN ideals would floor to 0 anyway but
        // the contract is explicit.
        return vec![0; sizes.len()];
    }
    let mut allocations: Vec<usize> = Vec::with_capacity(sizes.len());
    let mut remainders: Vec<(usize, f64)> = Vec::with_capacity(sizes.len());
    for (idx, &size) in sizes.iter().enumerate() {
        let ideal = size as f64 * target as f64 / population as f64;
        let base = ideal.floor();
        allocations.push(base as usize);
        remainders.push((idx, ideal - base));
    }
    let assigned: usize = allocations.iter().sum();
    let shortfall = target.saturating_sub(assigned);
    // Stable sort keeps discovery order among equal remainders.
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (idx, _) in remainders.iter().take(shortfall) {
        allocations[*idx] += 1;
    }
    allocations
}

/// Uniform selection of `k` elements without replacement: a partial
/// Fisher–Yates shuffle of the first `k` positions.
fn draw<R: Rng>(pool: &mut Vec<usize>, k: usize, rng: &mut R) -> Vec<usize> {
    let len = pool.len();
    for i in 0..k.min(len) {
        let j = rng.random_range(i..len);
        pool.swap(i, j);
    }
    pool[..k.min(len)].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn rng() -> StdRng {
        init_logging();
        StdRng::seed_from_u64(0x5eed)
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn person(id: u64, sex: Option<&str>) -> Identity {
        Identity {
            id: IdentityId(id),
            token: format!("tok-{}", id),
            units: OrgPath::default(),
            demographics: Demographics {
                sex: sex.map(|s| s.to_string()),
                ..Demographics::default()
            },
            active: true,
        }
    }

    fn population_60f_40m() -> Vec<Identity> {
        let mut pop: Vec<Identity> = Vec::new();
        for i in 0..60 {
            pop.push(person(i, Some("F")));
        }
        for i in 60..100 {
            pop.push(person(i, Some("M")));
        }
        pop
    }

    #[test]
    fn empty_population_yields_empty_sample() {
        assert_eq!(sample_with_rng(&[], 50.0, &mut rng()).unwrap(), vec![]);
    }

    #[test]
    fn invalid_percentages_are_rejected() {
        let pop = population_60f_40m();
        assert_eq!(
            sample_with_rng(&pop, 0.0, &mut rng()),
            Err(CoreError::InvalidPercentage(0.0))
        );
        assert_eq!(
            sample_with_rng(&pop, 101.0, &mut rng()),
            Err(CoreError::InvalidPercentage(101.0))
        );
    }

    #[test]
    fn full_percentage_returns_the_whole_population() {
        let pop = population_60f_40m();
        let res = sample_with_rng(&pop, 100.0, &mut rng()).unwrap();
        let expected: HashSet<IdentityId> = pop.iter().map(|p| p.id).collect();
        let got: HashSet<IdentityId> = res.iter().cloned().collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn sample_size_matches_rounding() {
        let pop = population_60f_40m();
        for (pct, expected) in [(50.0, 50), (33.0, 33), (1.0, 1), (99.0, 99)] {
            let res = sample_with_rng(&pop, pct, &mut rng()).unwrap();
            assert_eq!(res.len(), expected, "pct {}", pct);
        }
    }

    #[test]
    fn tiny_population_still_yields_one() {
        let pop = vec![person(1, None), person(2, None), person(3, None)];
        let res = sample_with_rng(&pop, 1.0, &mut rng()).unwrap();
        assert_eq!(res.len(), 1);
    }

    #[test]
    fn sample_is_a_subset_without_duplicates() {
        let pop = population_60f_40m();
        let res = sample_with_rng(&pop, 37.0, &mut rng()).unwrap();
        let ids: HashSet<IdentityId> = pop.iter().map(|p| p.id).collect();
        let got: HashSet<IdentityId> = res.iter().cloned().collect();
        assert_eq!(got.len(), res.len());
        assert!(got.is_subset(&ids));
    }

    // Population of 100 identities, 60 F / 40 M, sampled at 50% with sex as
    // the only populated dimension: ~30 F and ~20 M within rounding.
    #[test]
    fn proportional_allocation_across_sexes() {
        let pop = population_60f_40m();
        let res = sample_with_rng(&pop, 50.0, &mut rng()).unwrap();
        assert_eq!(res.len(), 50);
        let f_count = res.iter().filter(|id| id.0 < 60).count();
        let m_count = res.len() - f_count;
        assert!((29..=31).contains(&f_count), "F count {}", f_count);
        assert!((19..=21).contains(&m_count), "M count {}", m_count);
    }

    #[test]
    fn absent_values_form_their_own_stratum() {
        // 50 F, 50 without a value: coverage 50% keeps the dimension
        // eligible and the absent records must still be sampled.
        let mut pop: Vec<Identity> = Vec::new();
        for i in 0..50 {
            pop.push(person(i, Some("F")));
        }
        for i in 50..100 {
            pop.push(person(i, None));
        }
        let res = sample_with_rng(&pop, 50.0, &mut rng()).unwrap();
        assert_eq!(res.len(), 50);
        let absent = res.iter().filter(|id| id.0 >= 50).count();
        assert!((24..=26).contains(&absent), "absent count {}", absent);
    }

    #[test]
    fn low_coverage_dimension_is_ignored() {
        // Only 5% of records carry a sex: the dimension is not eligible and
        // sampling falls back to the uniform path. Size is still exact.
        let mut pop: Vec<Identity> = Vec::new();
        for i in 0..5 {
            pop.push(person(i, Some("F")));
        }
        for i in 5..100 {
            pop.push(person(i, None));
        }
        let res = sample_with_rng(&pop, 40.0, &mut rng()).unwrap();
        assert_eq!(res.len(), 40);
    }

    #[test]
    fn lowest_cardinality_dimensions_win() {
        // cost_center has 20 distinct values, sex has 2: with more than
        // three eligible dimensions, sex must be among the selected ones.
        let mut pop: Vec<Identity> = Vec::new();
        for i in 0..100 {
            let mut p = person(i, Some(if i % 2 == 0 { "F" } else { "M" }));
            p.demographics.cost_center = Some(format!("cc-{}", i % 20));
            p.demographics.contract_type = Some(format!("ct-{}", i % 10));
            p.demographics.work_location = Some(format!("loc-{}", i % 4));
            pop.push(p);
        }
        let dims = select_dimensions(&pop);
        assert_eq!(dims.len(), MAX_STRATA_DIMENSIONS);
        assert!(dims.contains(&Dimension::Category(Category::Sex)));
        assert!(dims.contains(&Dimension::Category(Category::WorkLocation)));
        assert!(!dims.contains(&Dimension::Category(Category::CostCenter)));
    }

    #[test]
    fn allocations_sum_to_target() {
        let sizes = vec![33, 33, 34];
        let alloc = allocate(&sizes, 100, 10);
        assert_eq!(alloc.iter().sum::<usize>(), 10);
        let sizes2 = vec![1, 2, 3, 5, 8, 13, 21];
        let total: usize = sizes2.iter().sum();
        for target in [1, 7, 20, 50] {
            let alloc = allocate(&sizes2, total, target);
            assert_eq!(alloc.iter().sum::<usize>(), target, "target {}", target);
        }
    }

    #[test]
    fn allocation_over_an_empty_population_is_all_zeros() {
        assert_eq!(allocate(&[], 0, 5), Vec::<usize>::new());
        assert_eq!(allocate(&[0, 0], 0, 5), vec![0, 0]);
    }

    #[test]
    fn remainder_ties_keep_discovery_order() {
        // Two strata with identical sizes and remainders: the extra unit
        // goes to the first-discovered one.
        let alloc = allocate(&[5, 5], 10, 5);
        assert_eq!(alloc, vec![3, 2]);
    }

    #[test]
    fn draw_is_without_replacement() {
        let mut pool: Vec<usize> = (0..10).collect();
        let picked = draw(&mut pool, 10, &mut rng());
        let distinct: HashSet<usize> = picked.iter().cloned().collect();
        assert_eq!(distinct.len(), 10);
    }
}
