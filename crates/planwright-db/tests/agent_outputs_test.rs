//! Tests for the append-only `agent_outputs` query module.

use serde_json::json;
use uuid::Uuid;

use planwright_db::models::SessionStatus;
use planwright_db::queries::agent_outputs::{self, NewAgentOutput};
use planwright_db::queries::sessions::{self, SessionUpsert};
use planwright_test_utils::{create_test_db, drop_test_db};

async fn create_session(pool: &sqlx::PgPool) -> Uuid {
    let id = Uuid::new_v4();
    sessions::upsert_session(
        pool,
        &SessionUpsert {
            id,
            user_id: "user-1",
            correlation_id: None,
            status: SessionStatus::Running,
            round_index: 1,
            phase: None,
            failure_reason: None,
        },
    )
    .await
    .expect("insert session");
    id
}

#[tokio::test]
async fn duplicate_insert_is_ignored() {
    let (pool, db_name) = create_test_db().await;
    let session_id = create_session(&pool).await;

    let original = json!({"contributions": [], "reasoning": "first"});
    let inserted = agent_outputs::insert_agent_output(
        &pool,
        &NewAgentOutput {
            session_id,
            round: 1,
            agent_id: "tech_architecture",
            confidence: 0.8,
            output: &original,
        },
    )
    .await
    .unwrap();
    assert!(inserted);

    let rewrite = json!({"contributions": [], "reasoning": "second"});
    let inserted_again = agent_outputs::insert_agent_output(
        &pool,
        &NewAgentOutput {
            session_id,
            round: 1,
            agent_id: "tech_architecture",
            confidence: 0.2,
            output: &rewrite,
        },
    )
    .await
    .unwrap();
    assert!(!inserted_again, "log rows must never be rewritten");

    let rows = agent_outputs::list_outputs_for_session(&pool, session_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].output["reasoning"], "first");
    assert!((rows[0].confidence - 0.8).abs() < f64::EPSILON);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn outputs_are_ordered_by_round_then_agent() {
    let (pool, db_name) = create_test_db().await;
    let session_id = create_session(&pool).await;
    let payload = json!({});

    for (round, agent) in [(2, "b_agent"), (1, "z_agent"), (1, "a_agent")] {
        agent_outputs::insert_agent_output(
            &pool,
            &NewAgentOutput {
                session_id,
                round,
                agent_id: agent,
                confidence: 0.5,
                output: &payload,
            },
        )
        .await
        .unwrap();
    }

    let rows = agent_outputs::list_outputs_for_session(&pool, session_id)
        .await
        .unwrap();
    let order: Vec<(i32, &str)> = rows.iter().map(|r| (r.round, r.agent_id.as_str())).collect();
    assert_eq!(order, vec![(1, "a_agent"), (1, "z_agent"), (2, "b_agent")]);

    assert_eq!(
        agent_outputs::count_outputs_for_round(&pool, session_id, 1)
            .await
            .unwrap(),
        2
    );

    let round_one = agent_outputs::list_outputs_for_round(&pool, session_id, 1)
        .await
        .unwrap();
    let agents: Vec<&str> = round_one.iter().map(|r| r.agent_id.as_str()).collect();
    assert_eq!(agents, vec!["a_agent", "z_agent"]);

    pool.close().await;
    drop_test_db(&db_name).await;
}
