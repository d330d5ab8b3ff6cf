//! The fixed sequence of generation rounds.

/// Every full generation runs exactly this many rounds.
pub const TOTAL_ROUNDS: u32 = 7;

/// Name and objective of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundSpec {
    pub number: u32,
    pub name: &'static str,
    pub objective: &'static str,
}

const ROUNDS: [RoundSpec; TOTAL_ROUNDS as usize] = [
    RoundSpec {
        number: 1,
        name: "Context & Objectives Alignment",
        objective: "Agree on program objectives, scope and success criteria",
    },
    RoundSpec {
        number: 2,
        name: "Workstream Definition",
        objective: "Define workstreams, owners and deliverables",
    },
    RoundSpec {
        number: 3,
        name: "Dependency & Sequencing",
        objective: "Map dependencies between workstreams and sequence them",
    },
    RoundSpec {
        number: 4,
        name: "Resource & Capacity Planning",
        objective: "Staff the workstreams within declared capacity",
    },
    RoundSpec {
        number: 5,
        name: "Risk & Compliance Review",
        objective: "Identify risks, regulatory obligations and mitigations",
    },
    RoundSpec {
        number: 6,
        name: "Financial Planning",
        objective: "Estimate one-time and recurring costs",
    },
    RoundSpec {
        number: 7,
        name: "Integration & Sign-off",
        objective: "Reconcile all sections and record sign-off decisions",
    },
];

/// Look up a round by its 1-based number.
pub fn round_spec(number: u32) -> Option<RoundSpec> {
    let index = usize::try_from(number.checked_sub(1)?).ok()?;
    ROUNDS.get(index).copied()
}

/// Percentage of the run completed once `round` has finished.
pub fn percent_complete(round: u32) -> u8 {
    let pct = round.min(TOTAL_ROUNDS) * 100 / TOTAL_ROUNDS;
    u8::try_from(pct).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_are_numbered_in_order() {
        for n in 1..=TOTAL_ROUNDS {
            assert_eq!(round_spec(n).map(|r| r.number), Some(n));
        }
        assert!(round_spec(0).is_none());
        assert!(round_spec(TOTAL_ROUNDS + 1).is_none());
    }

    #[test]
    fn percentage_tracks_round() {
        assert_eq!(percent_complete(0), 0);
        assert_eq!(percent_complete(1), 14);
        assert_eq!(percent_complete(7), 100);
        assert_eq!(percent_complete(9), 100);
    }
}
