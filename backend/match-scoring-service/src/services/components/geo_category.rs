use crate::models::{
    CategoryRelation, GeoCategoryParams, Job, LocationRelation, PrefCode, ReferenceData,
    UserProfile,
};

/// Where and what the job is, against what the user wants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoCategoryScore {
    pub total: f64,
    pub location_score: f64,
    pub category_score: f64,
    /// False when either side had no location to compare
    pub location_known: bool,
    pub category_known: bool,
}

pub struct GeoCategoryMatchCalculator<'a> {
    params: &'a GeoCategoryParams,
    reference: &'a ReferenceData,
}

impl<'a> GeoCategoryMatchCalculator<'a> {
    pub fn new(params: &'a GeoCategoryParams, reference: &'a ReferenceData) -> Self {
        Self { params, reference }
    }

    pub fn score(&self, user: &UserProfile, job: &Job) -> GeoCategoryScore {
        let (location_score, location_known) =
            self.location_score(&user.candidate_locations(), job.location);
        let (category_score, category_known) =
            self.category_score(&user.preferences.desired_categories, &job.categories);

        GeoCategoryScore {
            total: self.params.location_weight * location_score
                + self.params.category_weight * category_score,
            location_score,
            category_score,
            location_known,
            category_known,
        }
    }

    /// Best tier over every location the user is tied to
    pub fn location_score(&self, user_locations: &[PrefCode], job_location: Option<PrefCode>) -> (f64, bool) {
        let Some(job_location) = job_location else {
            return (0.0, false);
        };
        if user_locations.is_empty() {
            return (0.0, false);
        }

        let best = user_locations
            .iter()
            .map(|loc| self.location_points(self.reference.location_relation(*loc, job_location)))
            .fold(0.0, f64::max);
        (best, true)
    }

    /// Best tier over every (desired, job) category pair
    pub fn category_score(&self, desired: &[String], job_categories: &[String]) -> (f64, bool) {
        if desired.is_empty() || job_categories.is_empty() {
            return (0.0, false);
        }

        let best = desired
            .iter()
            .flat_map(|d| job_categories.iter().map(move |c| (d, c)))
            .map(|(d, c)| self.category_points(self.reference.category_relation(d, c)))
            .fold(0.0, f64::max);
        (best, true)
    }

    pub fn location_points(&self, relation: LocationRelation) -> f64 {
        match relation {
            LocationRelation::Same => self.params.same_location,
            LocationRelation::Adjacent => self.params.adjacent_location,
            LocationRelation::SameRegion => self.params.same_region,
            LocationRelation::Unrelated => 0.0,
        }
    }

    pub fn category_points(&self, relation: CategoryRelation) -> f64 {
        match relation {
            CategoryRelation::Exact => self.params.exact_category,
            CategoryRelation::SharedParent => self.params.shared_parent_category,
            CategoryRelation::Unrelated => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivitySummary, UserPreferences};
    use chrono::Utc;
    use uuid::Uuid;

    fn reference() -> ReferenceData {
        let mut reference = ReferenceData::default();
        reference.adjacency.insert(13, [11, 12, 14, 19].into_iter().collect());
        reference.regions.extend([(13, 3), (14, 3), (8, 3), (27, 6)]);
        reference
            .category_parents
            .insert("warehouse_picking".into(), "logistics".into());
        reference
            .category_parents
            .insert("delivery_driver".into(), "logistics".into());
        reference
    }

    fn user(locations: Vec<PrefCode>, categories: Vec<&str>) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            estimated_location: None,
            preferences: UserPreferences {
                salary_floor: None,
                desired_categories: categories.into_iter().map(String::from).collect(),
                desired_locations: locations,
            },
            activity: ActivitySummary::default(),
            revision: 1,
        }
    }

    fn job(location: Option<PrefCode>, categories: Vec<&str>) -> Job {
        Job {
            id: Uuid::new_v4(),
            location,
            categories: categories.into_iter().map(String::from).collect(),
            salary: None,
            fee: None,
            features: vec![],
            posted_at: Utc::now(),
            view_count: 0,
            apply_count: 0,
            revision: 1,
        }
    }

    #[test]
    fn test_same_location_and_category_scores_full() {
        let params = GeoCategoryParams::default();
        let reference = reference();
        let calc = GeoCategoryMatchCalculator::new(&params, &reference);

        let score = calc.score(
            &user(vec![13], vec!["warehouse_picking"]),
            &job(Some(13), vec!["warehouse_picking"]),
        );
        assert_eq!(score.total, 100.0);
        assert!(score.location_known && score.category_known);
    }

    #[test]
    fn test_adjacent_and_shared_parent_tiers() {
        let params = GeoCategoryParams::default();
        let reference = reference();
        let calc = GeoCategoryMatchCalculator::new(&params, &reference);

        let score = calc.score(
            &user(vec![14], vec!["delivery_driver"]),
            &job(Some(13), vec!["warehouse_picking"]),
        );
        assert_eq!(score.location_score, 60.0);
        assert_eq!(score.category_score, 60.0);
        assert!((score.total - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_region_tier_and_best_of_many_locations() {
        let params = GeoCategoryParams::default();
        let reference = reference();
        let calc = GeoCategoryMatchCalculator::new(&params, &reference);

        assert_eq!(calc.location_score(&[8], Some(13)), (30.0, true));
        assert_eq!(calc.location_score(&[27, 8, 13], Some(13)), (100.0, true));
        assert_eq!(calc.location_score(&[27], Some(13)), (0.0, true));
    }

    #[test]
    fn test_missing_data_is_zero_and_unknown() {
        let params = GeoCategoryParams::default();
        let reference = reference();
        let calc = GeoCategoryMatchCalculator::new(&params, &reference);

        let score = calc.score(&user(vec![13], vec![]), &job(None, vec!["nursing"]));
        assert_eq!(score.total, 0.0);
        assert!(!score.location_known);
        assert!(!score.category_known);
    }

    #[test]
    fn test_estimated_location_counts() {
        let params = GeoCategoryParams::default();
        let reference = reference();
        let calc = GeoCategoryMatchCalculator::new(&params, &reference);

        let mut u = user(vec![], vec!["nursing"]);
        u.estimated_location = Some(13);
        let score = calc.score(&u, &job(Some(13), vec!["nursing"]));
        assert_eq!(score.total, 100.0);
    }
}
