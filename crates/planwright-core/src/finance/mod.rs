//! Financial plan synthesis and the budget headroom / violation check.
//!
//! Overruns are reported as data: the plan always carries the real
//! calculated cost and, when a budget ceiling was declared, either a
//! headroom or a violation record, never both.

use serde::{Deserialize, Serialize};

use crate::model::{BudgetLine, BudgetRange, CostFrequency, ResourcePlan};

/// Share of the subtotal reserved as contingency.
pub const CONTINGENCY_RATE: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetHeadroom {
    pub allocated: f64,
    pub calculated: f64,
    pub available: f64,
    pub available_percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetViolation {
    pub user_constraint: f64,
    pub calculated_cost: f64,
    pub exceeds_by: f64,
    pub exceeds_percentage: f64,
}

/// Where the calculated cost sits relative to the declared ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetPosition {
    Headroom(BudgetHeadroom),
    Violation(BudgetViolation),
}

/// Compare a calculated cost against the declared budget ceiling.
///
/// Returns `None` when no budget was declared.
pub fn assess_budget(calculated: f64, budget: Option<BudgetRange>) -> Option<BudgetPosition> {
    let max = budget?.max;
    if calculated <= max {
        let available = max - calculated;
        Some(BudgetPosition::Headroom(BudgetHeadroom {
            allocated: max,
            calculated,
            available,
            available_percentage: available / max * 100.0,
        }))
    } else {
        let exceeds_by = calculated - max;
        Some(BudgetPosition::Violation(BudgetViolation {
            user_constraint: max,
            calculated_cost: calculated,
            exceeds_by,
            exceeds_percentage: exceeds_by / max * 100.0,
        }))
    }
}

/// One line of the cost breakdown, expanded over the program duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostItem {
    pub category: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<CostFrequency>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FinancialPlanRepr", into = "FinancialPlanRepr")]
pub struct FinancialPlan {
    /// Calculated cost including contingency.
    pub total_budget: f64,
    pub cost_breakdown: Vec<CostItem>,
    pub contingency: f64,
    position: Option<BudgetPosition>,
}

impl FinancialPlan {
    pub fn new(
        cost_breakdown: Vec<CostItem>,
        contingency: f64,
        budget: Option<BudgetRange>,
    ) -> Self {
        let subtotal: f64 = cost_breakdown.iter().map(|item| item.amount).sum();
        let total_budget = subtotal + contingency;
        Self {
            total_budget,
            cost_breakdown,
            contingency,
            position: assess_budget(total_budget, budget),
        }
    }

    pub fn position(&self) -> Option<&BudgetPosition> {
        self.position.as_ref()
    }

    pub fn budget_headroom(&self) -> Option<&BudgetHeadroom> {
        match &self.position {
            Some(BudgetPosition::Headroom(h)) => Some(h),
            _ => None,
        }
    }

    pub fn budget_violation(&self) -> Option<&BudgetViolation> {
        match &self.position {
            Some(BudgetPosition::Violation(v)) => Some(v),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinancialPlanRepr {
    total_budget: f64,
    cost_breakdown: Vec<CostItem>,
    contingency: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    budget_headroom: Option<BudgetHeadroom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    budget_violation: Option<BudgetViolation>,
}

impl From<FinancialPlan> for FinancialPlanRepr {
    fn from(plan: FinancialPlan) -> Self {
        let (budget_headroom, budget_violation) = match plan.position {
            Some(BudgetPosition::Headroom(h)) => (Some(h), None),
            Some(BudgetPosition::Violation(v)) => (None, Some(v)),
            None => (None, None),
        };
        Self {
            total_budget: plan.total_budget,
            cost_breakdown: plan.cost_breakdown,
            contingency: plan.contingency,
            budget_headroom,
            budget_violation,
        }
    }
}

impl TryFrom<FinancialPlanRepr> for FinancialPlan {
    type Error = String;

    fn try_from(repr: FinancialPlanRepr) -> Result<Self, Self::Error> {
        let position = match (repr.budget_headroom, repr.budget_violation) {
            (Some(_), Some(_)) => {
                return Err("financial plan has both budgetHeadroom and budgetViolation".into());
            }
            (Some(h), None) => Some(BudgetPosition::Headroom(h)),
            (None, Some(v)) => Some(BudgetPosition::Violation(v)),
            (None, None) => None,
        };
        Ok(Self {
            total_budget: repr.total_budget,
            cost_breakdown: repr.cost_breakdown,
            contingency: repr.contingency,
            position,
        })
    }
}

/// Total cost of a budget line over `months`.
pub fn expand_line(line: &BudgetLine, months: u32) -> f64 {
    let occurrences = match line.frequency {
        CostFrequency::OneTime => 1,
        CostFrequency::Monthly => months,
        CostFrequency::Quarterly => months.div_ceil(3),
        CostFrequency::Annual => months.div_ceil(12),
    };
    line.amount * f64::from(occurrences)
}

/// Build the financial plan from accepted budget lines and the resource plan.
pub fn synthesize_financial_plan(
    lines: &[BudgetLine],
    resources: &ResourcePlan,
    total_months: u32,
    budget: Option<BudgetRange>,
) -> FinancialPlan {
    let mut breakdown: Vec<CostItem> = lines
        .iter()
        .map(|line| CostItem {
            category: line.category.clone(),
            amount: expand_line(line, total_months),
            frequency: Some(line.frequency),
        })
        .collect();

    if resources.total_cost > 0.0 {
        breakdown.push(CostItem {
            category: "Personnel".into(),
            amount: resources.total_cost,
            frequency: None,
        });
    }

    let subtotal: f64 = breakdown.iter().map(|item| item.amount).sum();
    FinancialPlan::new(breakdown, subtotal * CONTINGENCY_RATE, budget)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ceiling(max: f64) -> Option<BudgetRange> {
        Some(BudgetRange { min: None, max })
    }

    #[test]
    fn cost_under_ceiling_reports_headroom() {
        let position = assess_budget(3_500_000.0, ceiling(7_000_000.0)).unwrap();
        let BudgetPosition::Headroom(h) = position else {
            panic!("expected headroom, got {position:?}");
        };
        assert_eq!(h.available, 3_500_000.0);
        assert_eq!(h.available_percentage, 50.0);
    }

    #[test]
    fn cost_over_ceiling_reports_violation() {
        let position = assess_budget(10_000_000.0, ceiling(7_000_000.0)).unwrap();
        let BudgetPosition::Violation(v) = position else {
            panic!("expected violation, got {position:?}");
        };
        assert_eq!(v.exceeds_by, 3_000_000.0);
        assert!((v.exceeds_percentage - 42.857).abs() < 0.01);
    }

    #[test]
    fn cost_equal_to_ceiling_is_headroom() {
        let position = assess_budget(7_000_000.0, ceiling(7_000_000.0)).unwrap();
        assert!(matches!(position, BudgetPosition::Headroom(h) if h.available == 0.0));
    }

    #[test]
    fn no_ceiling_reports_neither() {
        assert!(assess_budget(1.0, None).is_none());
    }

    #[test]
    fn expands_lines_by_frequency() {
        let line = |frequency| BudgetLine {
            category: "x".into(),
            amount: 100.0,
            frequency,
            description: String::new(),
        };
        assert_eq!(expand_line(&line(CostFrequency::OneTime), 10), 100.0);
        assert_eq!(expand_line(&line(CostFrequency::Monthly), 10), 1_000.0);
        assert_eq!(expand_line(&line(CostFrequency::Quarterly), 10), 400.0);
        assert_eq!(expand_line(&line(CostFrequency::Annual), 13), 200.0);
    }

    #[test]
    fn synthesized_plan_adds_personnel_and_contingency() {
        let lines = vec![BudgetLine {
            category: "Technology".into(),
            amount: 50_000.0,
            frequency: CostFrequency::OneTime,
            description: String::new(),
        }];
        let resources = ResourcePlan {
            roles: vec![],
            total_headcount: 1.0,
            total_cost: 150_000.0,
        };
        let plan = synthesize_financial_plan(&lines, &resources, 10, ceiling(100_000.0));
        assert_eq!(plan.cost_breakdown.len(), 2);
        assert_eq!(plan.contingency, 20_000.0);
        assert_eq!(plan.total_budget, 220_000.0);
        assert!(plan.budget_headroom().is_none());
        assert_eq!(plan.budget_violation().unwrap().exceeds_by, 120_000.0);
    }

    #[test]
    fn serializes_only_the_present_position() {
        let plan = FinancialPlan::new(vec![], 0.0, ceiling(10.0));
        let json = serde_json::to_value(&plan).unwrap();
        assert!(json.get("budgetHeadroom").is_some());
        assert!(json.get("budgetViolation").is_none());
    }

    #[test]
    fn rejects_payload_with_both_positions() {
        let json = serde_json::json!({
            "totalBudget": 10.0,
            "costBreakdown": [],
            "contingency": 0.0,
            "budgetHeadroom": {"allocated": 20.0, "calculated": 10.0, "available": 10.0, "availablePercentage": 50.0},
            "budgetViolation": {"userConstraint": 5.0, "calculatedCost": 10.0, "exceedsBy": 5.0, "exceedsPercentage": 100.0}
        });
        let err = serde_json::from_value::<FinancialPlan>(json).unwrap_err();
        assert!(err.to_string().contains("both budgetHeadroom and budgetViolation"));
    }
}
