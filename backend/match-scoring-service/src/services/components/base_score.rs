use crate::models::weights::{MAX_BASE_POINTS, MAX_FEE_POINTS, MAX_SALARY_POINTS};
use crate::models::{BaseScoreTiers, Job, Salary, SalaryType, Tier};

/// Job-intrinsic attractiveness, independent of the user
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseScore {
    /// Fee + salary + feature points, capped at 80
    pub total: f64,
    pub fee_points: f64,
    pub salary_points: f64,
    pub feature_points: f64,
    /// Fraction of fee/salary that were present on the job
    pub inputs_present: f64,
}

pub struct BaseScoreCalculator<'a> {
    tiers: &'a BaseScoreTiers,
}

impl<'a> BaseScoreCalculator<'a> {
    pub fn new(tiers: &'a BaseScoreTiers) -> Self {
        Self { tiers }
    }

    pub fn score(&self, job: &Job) -> BaseScore {
        let fee_points = self.fee_points(job.fee);
        let salary_points = self.salary_points(job.salary);
        let feature_points = self.feature_points(&job.features);

        let present = [job.fee.is_some(), job.salary.is_some()]
            .iter()
            .filter(|p| **p)
            .count();

        BaseScore {
            total: (fee_points + salary_points + feature_points).min(MAX_BASE_POINTS),
            fee_points,
            salary_points,
            feature_points,
            inputs_present: present as f64 / 2.0,
        }
    }

    /// Step function over the fee tiers; below the first anchor earns nothing
    pub fn fee_points(&self, fee: Option<i64>) -> f64 {
        match fee {
            Some(fee) if fee > 0 => step_points(&self.tiers.fee, fee as f64)
                .unwrap_or(0.0)
                .min(MAX_FEE_POINTS),
            _ => 0.0,
        }
    }

    /// Step function over the salary tiers for the salary's unit. Below the
    /// lowest tier, points scale linearly toward that tier.
    pub fn salary_points(&self, salary: Option<Salary>) -> f64 {
        let Some(salary) = salary else {
            return 0.0;
        };
        if !salary.amount.is_finite() || salary.amount <= 0.0 {
            return 0.0;
        }

        let tiers = match salary.salary_type {
            SalaryType::Hourly => &self.tiers.salary.hourly,
            SalaryType::Daily => &self.tiers.salary.daily,
            SalaryType::Monthly => &self.tiers.salary.monthly,
        };
        let Some(lowest) = tiers.first() else {
            return 0.0;
        };

        let points = match step_points(tiers, salary.amount) {
            Some(points) => points,
            None => lowest.points * salary.amount / lowest.threshold,
        };
        points.min(MAX_SALARY_POINTS)
    }

    pub fn feature_points(&self, features: &[String]) -> f64 {
        features
            .iter()
            .filter_map(|f| self.tiers.feature_bonus.get(f))
            .sum()
    }
}

/// Points of the highest tier whose threshold the value reaches
fn step_points(tiers: &[Tier], value: f64) -> Option<f64> {
    tiers
        .iter()
        .take_while(|tier| value >= tier.threshold)
        .last()
        .map(|tier| tier.points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn job(fee: Option<i64>, salary: Option<Salary>) -> Job {
        Job {
            id: Uuid::new_v4(),
            location: None,
            categories: vec![],
            salary,
            fee,
            features: vec![],
            posted_at: Utc::now(),
            view_count: 0,
            apply_count: 0,
            revision: 1,
        }
    }

    fn hourly(amount: f64) -> Option<Salary> {
        Some(Salary {
            amount,
            salary_type: SalaryType::Hourly,
        })
    }

    #[test]
    fn test_fee_anchor_points() {
        let tiers = BaseScoreTiers::default();
        let calc = BaseScoreCalculator::new(&tiers);

        assert_eq!(calc.fee_points(Some(499)), 0.0);
        assert_eq!(calc.fee_points(Some(500)), 10.0);
        assert_eq!(calc.fee_points(Some(2749)), 10.0);
        assert_eq!(calc.fee_points(Some(2750)), 30.0);
        assert_eq!(calc.fee_points(Some(5000)), 50.0);
        assert_eq!(calc.fee_points(Some(90_000)), 50.0);
        assert_eq!(calc.fee_points(Some(-10)), 0.0);
        assert_eq!(calc.fee_points(None), 0.0);
    }

    #[test]
    fn test_fee_points_bounded_and_monotone() {
        let tiers = BaseScoreTiers::default();
        let calc = BaseScoreCalculator::new(&tiers);

        let mut previous = 0.0;
        for fee in 0..=10_000 {
            let points = calc.fee_points(Some(fee));
            assert!((0.0..=MAX_FEE_POINTS).contains(&points), "fee {} gave {}", fee, points);
            assert!(points >= previous, "fee {} dropped to {}", fee, points);
            previous = points;
        }
    }

    #[test]
    fn test_hourly_salary_tiers() {
        let tiers = BaseScoreTiers::default();
        let calc = BaseScoreCalculator::new(&tiers);

        assert_eq!(calc.salary_points(hourly(1200.0)), 20.0);
        assert_eq!(calc.salary_points(hourly(1499.0)), 20.0);
        assert_eq!(calc.salary_points(hourly(1500.0)), 30.0);
        assert_eq!(calc.salary_points(hourly(3000.0)), 30.0);

        // Below the lowest tier: proportional, monotone, under 20
        let low = calc.salary_points(hourly(600.0));
        assert!((low - 10.0).abs() < 1e-9);
        assert!(calc.salary_points(hourly(1199.0)) < 20.0);
        assert_eq!(calc.salary_points(hourly(0.0)), 0.0);
        assert_eq!(calc.salary_points(hourly(f64::NAN)), 0.0);
    }

    #[test]
    fn test_salary_type_uses_matching_tiers() {
        let tiers = BaseScoreTiers::default();
        let calc = BaseScoreCalculator::new(&tiers);
        let monthly = Some(Salary {
            amount: 240_000.0,
            salary_type: SalaryType::Monthly,
        });
        assert_eq!(calc.salary_points(monthly), 30.0);
    }

    #[test]
    fn test_missing_inputs_score_zero() {
        let tiers = BaseScoreTiers::default();
        let score = BaseScoreCalculator::new(&tiers).score(&job(None, None));
        assert_eq!(score.total, 0.0);
        assert_eq!(score.inputs_present, 0.0);
    }

    #[test]
    fn test_total_capped_with_feature_bonus() {
        let mut tiers = BaseScoreTiers::default();
        tiers.feature_bonus.insert("same_day_pay".into(), 15.0);
        let calc = BaseScoreCalculator::new(&tiers);

        let mut j = job(Some(5000), hourly(1500.0));
        j.features = vec!["same_day_pay".into(), "unknown_flag".into()];
        let score = calc.score(&j);

        assert_eq!(score.feature_points, 15.0);
        assert_eq!(score.total, 80.0);
        assert_eq!(score.inputs_present, 1.0);
    }
}
