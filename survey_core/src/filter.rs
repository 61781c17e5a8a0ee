use chrono::{Datelike, NaiveDate};
use log::debug;

use crate::model::*;

/// A declarative filter over the active population.
///
/// Every field is an optional inclusion list (or an optional inclusive bound
/// for the derived age/tenure attributes). An empty specification matches the
/// entire active population. Constraints combine with AND across dimensions,
/// OR within one dimension's list.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct FilterSpec {
    pub divisions: Option<Vec<UnitId>>,
    pub departments: Option<Vec<UnitId>>,
    pub services: Option<Vec<UnitId>>,
    pub teams: Option<Vec<UnitId>>,
    pub sex: Option<Vec<String>>,
    pub job_functions: Option<Vec<String>>,
    pub work_locations: Option<Vec<String>>,
    pub contract_types: Option<Vec<String>>,
    pub work_times: Option<Vec<String>>,
    pub cost_centers: Option<Vec<String>>,
    /// Inclusive, in whole years.
    pub age_min: Option<u32>,
    pub age_max: Option<u32>,
    /// Inclusive, in whole years since the hire date.
    pub tenure_min: Option<u32>,
    pub tenure_max: Option<u32>,
}

impl FilterSpec {
    pub fn units(&self, level: UnitLevel) -> Option<&Vec<UnitId>> {
        match level {
            UnitLevel::Division => self.divisions.as_ref(),
            UnitLevel::Department => self.departments.as_ref(),
            UnitLevel::Service => self.services.as_ref(),
            UnitLevel::Team => self.teams.as_ref(),
        }
    }

    pub fn categories(&self, cat: Category) -> Option<&Vec<String>> {
        match cat {
            Category::Sex => self.sex.as_ref(),
            Category::JobFunction => self.job_functions.as_ref(),
            Category::WorkLocation => self.work_locations.as_ref(),
            Category::ContractType => self.contract_types.as_ref(),
            Category::WorkTime => self.work_times.as_ref(),
            Category::CostCenter => self.cost_centers.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        build_predicates(self).is_empty()
    }
}

/// A leaf of the filter expression. The first two variants can be pushed to
/// the store as inclusion-list predicates; the last two require date
/// arithmetic the query layer cannot express and are applied in memory after
/// the fetch.
#[derive(PartialEq, Debug, Clone)]
pub enum Predicate {
    UnitIn(UnitLevel, Vec<UnitId>),
    CategoryIn(Category, Vec<String>),
    AgeBetween(Option<u32>, Option<u32>),
    TenureBetween(Option<u32>, Option<u32>),
}

impl Predicate {
    pub fn is_pushable(&self) -> bool {
        matches!(self, Predicate::UnitIn(_, _) | Predicate::CategoryIn(_, _))
    }
}

/// Translates a specification into its predicate leaves. Absent constraints
/// produce no leaf, so an empty specification yields an empty vector.
pub fn build_predicates(spec: &FilterSpec) -> Vec<Predicate> {
    let mut preds: Vec<Predicate> = Vec::new();
    for level in UnitLevel::ALL {
        if let Some(units) = spec.units(level) {
            if !units.is_empty() {
                preds.push(Predicate::UnitIn(level, units.clone()));
            }
        }
    }
    for cat in Category::ALL {
        if let Some(values) = spec.categories(cat) {
            if !values.is_empty() {
                preds.push(Predicate::CategoryIn(cat, values.clone()));
            }
        }
    }
    if spec.age_min.is_some() || spec.age_max.is_some() {
        preds.push(Predicate::AgeBetween(spec.age_min, spec.age_max));
    }
    if spec.tenure_min.is_some() || spec.tenure_max.is_some() {
        preds.push(Predicate::TenureBetween(spec.tenure_min, spec.tenure_max));
    }
    debug!("build_predicates: {:?}", preds);
    preds
}

/// Splits the leaves into (pushable, residual).
pub fn split_predicates(preds: Vec<Predicate>) -> (Vec<Predicate>, Vec<Predicate>) {
    preds.into_iter().partition(|p| p.is_pushable())
}

/// Whole calendar years elapsed between `from` and `today`: the raw year
/// difference, decremented by one when today's month/day precedes the
/// anniversary month/day. Not a divided-days approximation.
///
/// A `from` date after `today` (a data-entry error) clamps to 0 rather than
/// going negative, so such records behave like age/tenure 0.
pub fn whole_years(from: NaiveDate, today: NaiveDate) -> u32 {
    let mut years = today.year() - from.year();
    if (today.month(), today.day()) < (from.month(), from.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

fn within(value: u32, min: Option<u32>, max: Option<u32>) -> bool {
    min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
}

/// Applies the residual (date-derived) predicates to one record. A record
/// missing the referenced date never satisfies a bound and is excluded.
pub fn matches_residual(identity: &Identity, preds: &[Predicate], today: NaiveDate) -> bool {
    preds.iter().all(|p| match p {
        Predicate::AgeBetween(min, max) => match identity.demographics.birth_date {
            Some(birth) => within(whole_years(birth, today), *min, *max),
            None => false,
        },
        Predicate::TenureBetween(min, max) => match identity.demographics.hire_date {
            Some(hired) => within(whole_years(hired, today), *min, *max),
            None => false,
        },
        _ => true,
    })
}

/// In-memory equivalent of the store push-down, for the paths that already
/// hold the records (response-slice sub-filtering).
pub fn matches_pushable(identity: &Identity, preds: &[Predicate]) -> bool {
    preds.iter().all(|p| match p {
        Predicate::UnitIn(level, units) => identity
            .units
            .at(*level)
            .map(|u| units.contains(&u))
            .unwrap_or(false),
        Predicate::CategoryIn(cat, values) => identity
            .demographics
            .category(*cat)
            .map(|v| values.iter().any(|w| w == v))
            .unwrap_or(false),
        _ => true,
    })
}

/// Full in-memory evaluation of a specification against one record.
pub fn matches_all(identity: &Identity, spec: &FilterSpec, today: NaiveDate) -> bool {
    let preds = build_predicates(spec);
    matches_pushable(identity, &preds) && matches_residual(identity, &preds, today)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn identity(birth: Option<NaiveDate>, hired: Option<NaiveDate>) -> Identity {
        Identity {
            id: IdentityId(1),
            token: "t".to_string(),
            units: OrgPath::default(),
            demographics: Demographics {
                birth_date: birth,
                hire_date: hired,
                ..Demographics::default()
            },
            active: true,
        }
    }

    #[test]
    fn empty_spec_has_no_predicates() {
        let spec = FilterSpec::default();
        assert!(spec.is_empty());
        assert!(matches_all(
            &identity(None, None),
            &spec,
            date(2024, 6, 1)
        ));
    }

    #[test]
    fn whole_years_decrements_before_anniversary() {
        let birth = date(1990, 6, 15);
        assert_eq!(whole_years(birth, date(2024, 6, 14)), 33);
        assert_eq!(whole_years(birth, date(2024, 6, 15)), 34);
        assert_eq!(whole_years(birth, date(2024, 6, 16)), 34);
    }

    #[test]
    fn future_reference_date_clamps_to_zero() {
        let today = date(2024, 6, 15);
        assert_eq!(whole_years(date(2030, 1, 1), today), 0);
        // Such a record counts as age 0: kept by a bare minimum of 0,
        // excluded by any higher one.
        let id = identity(Some(date(2030, 1, 1)), None);
        let floor = FilterSpec {
            age_min: Some(0),
            ..FilterSpec::default()
        };
        let adult = FilterSpec {
            age_min: Some(18),
            ..FilterSpec::default()
        };
        assert!(matches_all(&id, &floor, today));
        assert!(!matches_all(&id, &adult, today));
    }

    // An identity whose birth date is exactly N years before today is
    // included by age_min = N and excluded by age_min = N + 1.
    #[test]
    fn age_bound_on_exact_anniversary() {
        let today = date(2024, 6, 15);
        let id = identity(Some(date(1990, 6, 15)), None);
        let included = FilterSpec {
            age_min: Some(34),
            ..FilterSpec::default()
        };
        let excluded = FilterSpec {
            age_min: Some(35),
            ..FilterSpec::default()
        };
        assert!(matches_all(&id, &included, today));
        assert!(!matches_all(&id, &excluded, today));
    }

    #[test]
    fn missing_date_never_satisfies_a_bound() {
        let today = date(2024, 6, 15);
        let spec = FilterSpec {
            age_min: Some(0),
            ..FilterSpec::default()
        };
        assert!(!matches_all(&identity(None, None), &spec, today));
        // Without the bound, the same record passes.
        assert!(matches_all(
            &identity(None, None),
            &FilterSpec::default(),
            today
        ));
    }

    #[test]
    fn tenure_bounds_are_inclusive() {
        let today = date(2024, 6, 15);
        let id = identity(None, Some(date(2019, 6, 15)));
        let spec = FilterSpec {
            tenure_min: Some(5),
            tenure_max: Some(5),
            ..FilterSpec::default()
        };
        assert!(matches_all(&id, &spec, today));
        let spec2 = FilterSpec {
            tenure_max: Some(4),
            ..FilterSpec::default()
        };
        assert!(!matches_all(&id, &spec2, today));
    }

    #[test]
    fn split_by_pushability() {
        let spec = FilterSpec {
            departments: Some(vec![UnitId(7)]),
            sex: Some(vec!["F".to_string()]),
            age_min: Some(30),
            ..FilterSpec::default()
        };
        let (pushable, residual) = split_predicates(build_predicates(&spec));
        assert_eq!(pushable.len(), 2);
        assert_eq!(residual, vec![Predicate::AgeBetween(Some(30), None)]);
    }

    #[test]
    fn pushable_predicates_match_in_memory() {
        let mut id = identity(None, None);
        id.units.department = Some(UnitId(7));
        id.demographics.sex = Some("F".to_string());
        let spec = FilterSpec {
            departments: Some(vec![UnitId(7), UnitId(8)]),
            sex: Some(vec!["F".to_string()]),
            ..FilterSpec::default()
        };
        let preds = build_predicates(&spec);
        assert!(matches_pushable(&id, &preds));
        id.demographics.sex = Some("M".to_string());
        assert!(!matches_pushable(&id, &preds));
        // A record with no value on a constrained dimension is excluded.
        id.demographics.sex = None;
        assert!(!matches_pushable(&id, &preds));
    }
}
