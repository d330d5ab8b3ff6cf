//! Built-in rule-based agents for the seven planning roles.
//!
//! Each role speaks in the rounds that own its concern and stays silent
//! otherwise. Output depends only on the [`AgentInput`], so two runs over
//! the same context produce the same contributions.

use anyhow::{Result, bail};
use async_trait::async_trait;

use super::trait_def::{Agent, AgentInput, Analysis};
use crate::finance::{CONTINGENCY_RATE, expand_line};
use crate::model::{
    BudgetLine, BusinessContext, CostFrequency, Decision, Deliverable, Level, ResourceRole, Risk,
    Scale, Workstream,
};
use crate::schedule::effective_duration;
use crate::synthesis::{Contribution, Sections};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    ProgramCoordinator,
    TechArchitecture,
    PlatformDelivery,
    GoToMarket,
    CustomerSuccess,
    RiskCompliance,
    FinanceResources,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::ProgramCoordinator,
        Role::TechArchitecture,
        Role::PlatformDelivery,
        Role::GoToMarket,
        Role::CustomerSuccess,
        Role::RiskCompliance,
        Role::FinanceResources,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::ProgramCoordinator => "program_coordinator",
            Self::TechArchitecture => "tech_architecture",
            Self::PlatformDelivery => "platform_delivery",
            Self::GoToMarket => "go_to_market",
            Self::CustomerSuccess => "customer_success",
            Self::RiskCompliance => "risk_compliance",
            Self::FinanceResources => "finance_resources",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::ProgramCoordinator => "Program Coordinator",
            Self::TechArchitecture => "Technology Architecture Lead",
            Self::PlatformDelivery => "Platform Delivery Manager",
            Self::GoToMarket => "Go-to-Market Strategist",
            Self::CustomerSuccess => "Customer Success Lead",
            Self::RiskCompliance => "Risk & Compliance Officer",
            Self::FinanceResources => "Finance & Resource Manager",
        }
    }
}

const WS_STRATEGY: &str = "ws-strategy-planning";
const WS_TECHNOLOGY: &str = "ws-technology-foundation";
const WS_PLATFORM: &str = "ws-platform-delivery";
const WS_MARKET: &str = "ws-go-to-market";
const WS_CUSTOMER: &str = "ws-customer-enablement";
const WS_COMPLIANCE: &str = "ws-regulatory-compliance";

/// Sequencing applied in round 3: workstream -> prerequisites.
const DEPENDENCY_MAP: [(&str, &[&str]); 5] = [
    (WS_TECHNOLOGY, &[WS_STRATEGY]),
    (WS_PLATFORM, &[WS_TECHNOLOGY, WS_COMPLIANCE]),
    (WS_MARKET, &[WS_STRATEGY]),
    (WS_CUSTOMER, &[WS_PLATFORM]),
    (WS_COMPLIANCE, &[WS_STRATEGY]),
];

/// Duration and cost scaling derived from the context.
struct Sizing {
    duration: f64,
    cost: f64,
    scale: Scale,
}

impl Sizing {
    fn new(context: &BusinessContext) -> Self {
        Self {
            duration: context.scale.duration_factor() * context.urgency().duration_factor(),
            cost: context.scale.cost_factor(),
            scale: context.scale,
        }
    }

    fn months(&self, base: u32) -> u32 {
        ((f64::from(base) * self.duration).round() as u32).max(1)
    }

    fn money(&self, base: f64) -> f64 {
        base * self.cost
    }

    fn engineering_team(&self) -> f64 {
        match self.scale {
            Scale::Smb => 3.0,
            Scale::MidMarket => 5.0,
            Scale::Enterprise => 8.0,
        }
    }
}

fn slug(s: &str) -> String {
    let raw: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    raw.split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn workstream(
    id: &str,
    name: &str,
    owner: Role,
    start: u32,
    months: u32,
    deliverables: [&str; 2],
    confidence: f64,
) -> Workstream {
    let end = start + months - 1;
    Workstream {
        id: id.into(),
        name: name.into(),
        description: format!("{name} led by the {}", owner.title()),
        owner: owner.title().into(),
        deliverables: vec![
            Deliverable {
                id: format!("{id}-d1"),
                name: deliverables[0].into(),
                due_month: start + (months - 1) / 2,
                effort_estimate: f64::from(months) * 0.5,
            },
            Deliverable {
                id: format!("{id}-d2"),
                name: deliverables[1].into(),
                due_month: end,
                effort_estimate: f64::from(months),
            },
        ],
        start_month: start,
        end_month: end,
        dependencies: vec![],
        confidence,
    }
}

fn role(name: &str, skills: &[&str], allocation: f64, cost_per_month: f64) -> Contribution {
    Contribution::Resource(ResourceRole {
        role: name.into(),
        skills: skills.iter().map(|s| s.to_string()).collect(),
        allocation,
        cost_per_month,
    })
}

fn risk(id: &str, description: &str, probability: Level, impact: Level, mitigation: &str, owner: Role) -> Contribution {
    Contribution::Risk(Risk {
        id: id.into(),
        description: description.into(),
        probability,
        impact,
        mitigation: mitigation.into(),
        owner: Some(owner.title().into()),
        category: None,
    })
}

fn line(category: &str, amount: f64, frequency: CostFrequency, description: &str) -> Contribution {
    Contribution::BudgetLine(BudgetLine {
        category: category.into(),
        amount,
        frequency,
        description: description.into(),
    })
}

/// Rough cost of the accepted sections over `months`, contingency included.
fn estimate_cost(sections: &Sections, months: u32) -> f64 {
    let lines: f64 = sections.budget_lines.iter().map(|l| expand_line(l, months)).sum();
    let personnel: f64 = sections
        .resources
        .iter()
        .map(|r| r.cost_per_month * r.allocation)
        .sum::<f64>()
        * f64::from(months);
    (lines + personnel) * (1.0 + CONTINGENCY_RATE)
}

/// A built-in agent playing one [`Role`].
#[derive(Debug, Clone, Copy)]
pub struct RosterAgent {
    role: Role,
}

impl RosterAgent {
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    fn analysis(&self, contributions: Vec<Contribution>, confidence: f64, reasoning: String) -> Analysis {
        Analysis {
            contributions,
            confidence,
            reasoning,
        }
    }

    fn silent(&self, input: &AgentInput) -> Analysis {
        self.analysis(
            vec![],
            0.5,
            format!("{} has no input for {}.", self.role.title(), input.round.name),
        )
    }

    fn decision(&self, input: &AgentInput, topic: &str, decision: String, rationale: String, endorsed_by: Vec<String>, confidence: f64) -> Contribution {
        Contribution::Decision(Decision {
            topic: topic.into(),
            decision,
            rationale,
            made_by: self.role.id().into(),
            endorsed_by,
            round: input.round.number,
            confidence,
        })
    }

    fn align_objectives(&self, input: &AgentInput) -> Analysis {
        let ctx = &input.context;
        match self.role {
            Role::ProgramCoordinator => {
                let frameworks: Vec<&str> = input
                    .insights
                    .iter()
                    .flat_map(|i| i.frameworks.iter().map(|f| f.framework.as_str()))
                    .collect();
                let confidence = input
                    .insights
                    .as_ref()
                    .and_then(|i| i.mean_confidence())
                    .map_or(0.75, |mean| ((0.75 + mean) / 2.0).clamp(0.0, 1.0));
                let rationale = if frameworks.is_empty() {
                    ctx.description.clone()
                } else {
                    format!("{} Informed by: {}.", ctx.description, frameworks.join(", "))
                };
                let decision = self.decision(
                    input,
                    "program-objectives",
                    format!("Run a {:?} {} transformation program for {}", ctx.scale, ctx.business_type, ctx.name),
                    rationale,
                    vec![Role::GoToMarket.id().into(), Role::FinanceResources.id().into()],
                    confidence,
                );
                self.analysis(
                    vec![decision],
                    confidence,
                    format!("Framed objectives for {} from {} upstream insights.", ctx.name, frameworks.len()),
                )
            }
            Role::GoToMarket => {
                let market = ctx.industry.as_deref().unwrap_or(&ctx.business_type);
                let decision = self.decision(
                    input,
                    "market-positioning",
                    format!("Position {} within {market}", ctx.name),
                    if ctx.keywords.is_empty() {
                        format!("Target segment inferred from business type {}.", ctx.business_type)
                    } else {
                        format!("Messaging anchored on {}.", ctx.keywords.join(", "))
                    },
                    vec![Role::CustomerSuccess.id().into()],
                    0.7,
                );
                self.analysis(vec![decision], 0.7, format!("Positioned {} in {market}.", ctx.name))
            }
            _ => self.silent(input),
        }
    }

    fn define_workstreams(&self, input: &AgentInput, size: &Sizing) -> Analysis {
        let m = |base| size.months(base);
        let (contributions, confidence) = match self.role {
            Role::ProgramCoordinator => (
                vec![workstream(WS_STRATEGY, "Strategy & Planning", self.role, 0, m(3), ["Program charter", "Governance model"], 0.8)],
                0.8,
            ),
            Role::TechArchitecture => (
                vec![workstream(WS_TECHNOLOGY, "Technology Foundation", self.role, m(2), m(4), ["Target architecture", "Core platform baseline"], 0.8)],
                0.8,
            ),
            Role::PlatformDelivery => (
                vec![
                    workstream(WS_TECHNOLOGY, "Technology Foundation", self.role, m(2), m(5), ["Environment setup", "Platform baseline"], 0.7),
                    workstream(WS_PLATFORM, "Platform Delivery", self.role, m(3), m(5), ["Pilot release", "General availability"], 0.7),
                ],
                0.7,
            ),
            Role::GoToMarket => (
                vec![workstream(WS_MARKET, "Go-to-Market", self.role, m(4), m(4), ["Launch plan", "Market launch"], 0.75)],
                0.75,
            ),
            Role::CustomerSuccess => (
                vec![workstream(WS_CUSTOMER, "Customer Enablement", self.role, m(6), m(3), ["Onboarding playbook", "Adoption review"], 0.75)],
                0.75,
            ),
            Role::RiskCompliance if !input.context.regulations().is_empty() => (
                vec![workstream(WS_COMPLIANCE, "Regulatory Compliance", self.role, 0, m(4), ["Obligations register", "Compliance attestation"], 0.8)],
                0.8,
            ),
            _ => return self.silent(input),
        };
        let count = contributions.len();
        self.analysis(
            contributions.into_iter().map(Contribution::Workstream).collect(),
            confidence,
            format!("Proposed {count} workstream(s) for {}.", input.round.name),
        )
    }

    fn sequence(&self, input: &AgentInput) -> Analysis {
        if self.role != Role::ProgramCoordinator {
            return self.silent(input);
        }
        let sections = input.program_so_far.sections();
        let known: Vec<&str> = sections.workstreams.iter().map(|w| w.id.as_str()).collect();

        let mut linked = 0;
        let contributions = sections
            .workstreams
            .iter()
            .filter_map(|ws| {
                let (_, prerequisites) = DEPENDENCY_MAP.iter().find(|(id, _)| *id == ws.id)?;
                let dependencies: Vec<String> = prerequisites
                    .iter()
                    .filter(|dep| known.contains(dep))
                    .map(|dep| dep.to_string())
                    .collect();
                if dependencies.is_empty() {
                    return None;
                }
                linked += dependencies.len();
                let mut sequenced = ws.clone();
                sequenced.dependencies = dependencies;
                sequenced.confidence = 0.85;
                Some(Contribution::Workstream(sequenced))
            })
            .collect();

        self.analysis(
            contributions,
            0.85,
            format!("Linked {linked} dependencies across {} workstreams.", known.len()),
        )
    }

    fn staff(&self, input: &AgentInput, size: &Sizing) -> Analysis {
        let max_headcount = input.context.max_headcount();
        let (contributions, confidence) = match self.role {
            Role::FinanceResources => (
                vec![
                    role("Strategy Consultant", &["strategy", "facilitation"], 1.0, 15_000.0),
                    role("Project Manager", &["planning", "delivery"], 1.0, 13_000.0),
                    role("Business Analyst", &["analysis", "requirements"], 0.5, 10_000.0),
                ],
                0.8,
            ),
            Role::TechArchitecture => (
                vec![role("Solutions Architect", &["architecture", "integration"], 1.0, 16_000.0)],
                0.75,
            ),
            Role::PlatformDelivery => {
                let team = max_headcount.map_or(size.engineering_team(), |max| size.engineering_team().min(max));
                (
                    vec![
                        role("Project Manager", &["agile", "release management"], 1.0, 14_000.0),
                        role("Engineering Team", &["software engineering"], team, 12_000.0),
                    ],
                    0.7,
                )
            }
            Role::GoToMarket => (vec![role("Marketing Lead", &["positioning", "demand generation"], 1.0, 11_000.0)], 0.75),
            Role::CustomerSuccess => (vec![role("Customer Success Manager", &["onboarding", "retention"], 1.0, 9_000.0)], 0.75),
            Role::RiskCompliance if !input.context.regulations().is_empty() => {
                (vec![role("Compliance Officer", &["regulatory", "audit"], 0.5, 12_000.0)], 0.8)
            }
            _ => return self.silent(input),
        };
        let count = contributions.len();
        self.analysis(contributions, confidence, format!("Requested {count} role(s)."))
    }

    fn assess_risks(&self, input: &AgentInput) -> Analysis {
        let (contributions, confidence) = match self.role {
            Role::RiskCompliance => {
                let mut risks = vec![
                    risk(
                        "risk-resource-availability",
                        "Resource availability constraints may delay timeline",
                        Level::Medium,
                        Level::High,
                        "Secure named staff before each phase starts",
                        self.role,
                    ),
                    risk(
                        "risk-stakeholder-alignment",
                        "Stakeholder alignment challenges",
                        Level::Medium,
                        Level::Medium,
                        "Monthly steering reviews with decision log",
                        self.role,
                    ),
                ];
                for regulation in input.context.regulations() {
                    risks.push(risk(
                        &format!("risk-regulatory-{}", slug(regulation)),
                        &format!("Non-compliance with {regulation}"),
                        Level::Medium,
                        Level::High,
                        &format!("Map {regulation} obligations to controls and audit quarterly"),
                        self.role,
                    ));
                }
                (risks, 0.8)
            }
            Role::FinanceResources => (
                vec![risk(
                    "risk-resource-availability",
                    "Resource availability constraints may delay timeline",
                    Level::Low,
                    Level::Low,
                    "Budget includes contractor fallback",
                    self.role,
                )],
                0.6,
            ),
            Role::TechArchitecture => (
                vec![risk(
                    "risk-integration-complexity",
                    "Integration with existing systems is more complex than estimated",
                    Level::Medium,
                    Level::Medium,
                    "Prototype critical integrations in the foundation workstream",
                    self.role,
                )],
                0.75,
            ),
            Role::CustomerSuccess => (
                vec![risk(
                    "risk-adoption",
                    "Customers adopt the new offering slower than planned",
                    Level::Medium,
                    Level::Medium,
                    "Run guided onboarding for the first cohorts",
                    self.role,
                )],
                0.7,
            ),
            Role::ProgramCoordinator => {
                let Some(range) = input.context.timeline_range() else {
                    return self.silent(input);
                };
                let needed = effective_duration(&input.program_so_far.workstreams());
                if needed <= range.max {
                    return self.silent(input);
                }
                (
                    vec![risk(
                        "risk-timeline-overrun",
                        &format!("Planned work needs {needed} months against a {}-month ceiling", range.max),
                        Level::High,
                        Level::High,
                        "Re-scope late workstreams or extend the timeline",
                        self.role,
                    )],
                    0.85,
                )
            }
            _ => return self.silent(input),
        };
        let count = contributions.len();
        self.analysis(contributions, confidence, format!("Identified {count} risk(s)."))
    }

    fn estimate_costs(&self, input: &AgentInput, size: &Sizing) -> Analysis {
        use CostFrequency::*;
        let (contributions, confidence) = match self.role {
            Role::FinanceResources => (
                vec![
                    line("Technology", size.money(50_000.0), OneTime, "Licenses and tooling"),
                    line("Infrastructure", size.money(25_000.0), OneTime, "Environments and hosting setup"),
                    line("Operations", size.money(10_000.0), Monthly, "Run costs"),
                ],
                0.8,
            ),
            Role::TechArchitecture => (
                vec![line("Technology", size.money(60_000.0), OneTime, "Platform licenses incl. integration middleware")],
                0.75,
            ),
            Role::GoToMarket => (vec![line("Marketing", size.money(8_000.0), Monthly, "Campaigns and events")], 0.75),
            Role::CustomerSuccess => (
                vec![line("Training & Enablement", size.money(15_000.0), OneTime, "Customer onboarding material")],
                0.7,
            ),
            Role::RiskCompliance if !input.context.regulations().is_empty() => (
                vec![line("Compliance & Audit", size.money(20_000.0), OneTime, "External audit and certification")],
                0.8,
            ),
            _ => return self.silent(input),
        };
        let count = contributions.len();
        self.analysis(contributions, confidence, format!("Estimated {count} cost line(s)."))
    }

    fn sign_off(&self, input: &AgentInput) -> Analysis {
        let sections = input.program_so_far.sections();
        let mut participants: Vec<String> = input
            .prior_outputs
            .iter()
            .filter(|o| o.round + 1 == input.round.number && !o.contributions.is_empty())
            .map(|o| o.agent_id.clone())
            .collect();
        participants.sort();
        participants.dedup();

        match self.role {
            Role::ProgramCoordinator => {
                let decision = self.decision(
                    input,
                    "program-sign-off",
                    format!(
                        "Approve program with {} workstreams, {} roles and {} risks",
                        sections.workstreams.len(),
                        sections.resources.len(),
                        sections.risks.len()
                    ),
                    "All planning rounds completed and conflicts resolved.".into(),
                    participants,
                    0.85,
                );
                self.analysis(vec![decision], 0.85, "Program integrated and signed off.".into())
            }
            Role::FinanceResources => {
                let months = effective_duration(&sections.workstreams);
                let estimate = estimate_cost(&sections, months);
                let (decision, rationale) = match input.context.budget_range() {
                    Some(range) if estimate > range.max => (
                        format!("Escalate projected overrun of {:.0}", estimate - range.max),
                        format!("Estimated {estimate:.0} over {months} months exceeds the {:.0} ceiling.", range.max),
                    ),
                    Some(range) => (
                        "Approve budget".to_string(),
                        format!("Estimated {estimate:.0} over {months} months fits the {:.0} ceiling.", range.max),
                    ),
                    None => (
                        "Approve budget".to_string(),
                        format!("Estimated {estimate:.0} over {months} months; no ceiling declared."),
                    ),
                };
                let decision = self.decision(input, "budget-approval", decision, rationale, vec![], 0.8);
                self.analysis(vec![decision], 0.8, format!("Reviewed a {estimate:.0} cost estimate."))
            }
            Role::RiskCompliance => {
                let (topic, decision) = if input.context.regulations().is_empty() {
                    ("risk-acceptance", "Accept residual risks with listed mitigations".to_string())
                } else {
                    (
                        "compliance-sign-off",
                        format!("Compliance plan covers {}", input.context.regulations().join(", ")),
                    )
                };
                let decision = self.decision(
                    input,
                    topic,
                    decision,
                    format!("{} risks registered with owners and mitigations.", sections.risks.len()),
                    vec![Role::ProgramCoordinator.id().into()],
                    0.8,
                );
                self.analysis(vec![decision], 0.8, "Risk posture reviewed.".into())
            }
            _ => self.silent(input),
        }
    }
}

#[async_trait]
impl Agent for RosterAgent {
    fn id(&self) -> &str {
        self.role.id()
    }

    fn role(&self) -> &str {
        self.role.title()
    }

    async fn analyze(&self, input: &AgentInput) -> Result<Analysis> {
        let size = Sizing::new(&input.context);
        let analysis = match input.round.number {
            1 => self.align_objectives(input),
            2 => self.define_workstreams(input, &size),
            3 => self.sequence(input),
            4 => self.staff(input, &size),
            5 => self.assess_risks(input),
            6 => self.estimate_costs(input, &size),
            7 => self.sign_off(input),
            other => bail!("{} has no behaviour for round {other}", self.role.id()),
        };
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{Constraints, UpstreamInsights, Urgency};
    use crate::rounds::round_spec;
    use crate::synthesis::ProgramDraft;

    fn context(regulations: &[&str]) -> BusinessContext {
        BusinessContext {
            name: "Acme".into(),
            business_type: "saas".into(),
            scale: Scale::MidMarket,
            description: "Analytics platform".into(),
            industry: None,
            keywords: vec![],
            constraints: Some(Constraints {
                regulations: regulations.iter().map(|r| r.to_string()).collect(),
                urgency: Urgency::High,
                ..Default::default()
            }),
        }
    }

    fn input(round: u32, context: BusinessContext) -> AgentInput {
        AgentInput {
            round: round_spec(round).unwrap(),
            context: Arc::new(context),
            insights: Some(Arc::new(UpstreamInsights::default())),
            program_so_far: Arc::new(ProgramDraft::new()),
            prior_outputs: Arc::new(vec![]),
        }
    }

    #[test]
    fn slug_collapses_separators() {
        assert_eq!(slug("PCI DSS / v4"), "pci-dss-v4");
    }

    #[test]
    fn sizing_scales_months() {
        // mid-market (1.25) x high urgency (0.85)
        let size = Sizing::new(&context(&[]));
        assert_eq!(size.months(4), 4);
        assert_eq!(size.months(10), 11);
        assert_eq!(size.months(0), 1);
    }

    #[tokio::test]
    async fn compliance_workstream_only_with_regulations() {
        let agent = RosterAgent::new(Role::RiskCompliance);
        let without = agent.analyze(&input(2, context(&[]))).await.unwrap();
        assert!(without.contributions.is_empty());

        let with = agent.analyze(&input(2, context(&["GDPR"]))).await.unwrap();
        assert_eq!(with.contributions.len(), 1);
        assert_eq!(with.contributions[0].key().id, WS_COMPLIANCE);
    }

    #[tokio::test]
    async fn regulation_risks_use_slugged_ids() {
        let agent = RosterAgent::new(Role::RiskCompliance);
        let analysis = agent.analyze(&input(5, context(&["PCI DSS"]))).await.unwrap();
        let ids: Vec<String> = analysis.contributions.iter().map(|c| c.key().id).collect();
        assert!(ids.contains(&"risk-regulatory-pci-dss".to_string()));
    }

    #[tokio::test]
    async fn analysis_is_deterministic() {
        let agent = RosterAgent::new(Role::PlatformDelivery);
        let a = agent.analyze(&input(4, context(&[]))).await.unwrap();
        let b = agent.analyze(&input(4, context(&[]))).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn unknown_round_is_an_error() {
        let agent = RosterAgent::new(Role::GoToMarket);
        let mut bad = input(1, context(&[]));
        bad.round.number = 8;
        assert!(agent.analyze(&bad).await.is_err());
    }
}
