use super::model::{ClaimedStep, InstanceRecord, NewInstance, TransitionRecord};
use crate::error::{Failure, FailureKind};
use crate::model::{Step, WorkflowInput, WorkflowState};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::{error, instrument};
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // WAL and stricter durability.
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database URL {normalized}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Record an admitted notification; schedules its first step when it has one.
#[instrument(skip_all)]
pub async fn insert_instance(
    pool: &Pool,
    new: &NewInstance<'_>,
    now: DateTime<Utc>,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let input_json = new.input.map(serde_json::to_string).transpose()?;
    let target_name = new.input.map(|i| i.target_name.as_str());

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO workflow_instances (id, workflow_name, message_id, raw_message, target_name, state, input, failure_kind, failure_detail, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(new.workflow_name)
    .bind(new.message_id)
    .bind(new.raw_message)
    .bind(target_name)
    .bind(new.state.as_str())
    .bind(input_json)
    .bind(new.failure.map(|f| f.kind.as_str()))
    .bind(new.failure.map(|f| f.detail.as_str()))
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for (state, detail) in new.history {
        record_transition_tx(&mut tx, &id, *state, detail.as_deref(), now).await?;
    }

    if let Some(step) = new.step {
        sqlx::query(
            "INSERT INTO workflow_steps (instance_id, step, attempt, due_at) VALUES (?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(serde_json::to_string(step)?)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(id)
}

/// Claim up to `limit` due steps. A claimed step is pushed out by `lease` and
/// stamped with a fresh token, so a concurrent worker skips it; if this worker
/// dies, it becomes due again. Rows that no longer decode fail their instance.
#[instrument(skip_all)]
pub async fn claim_due_steps(
    pool: &Pool,
    now: DateTime<Utc>,
    limit: i64,
    lease: Duration,
) -> Result<Vec<ClaimedStep>> {
    let rows = sqlx::query(
        "SELECT s.id, s.instance_id, s.step, s.attempt, i.input \
         FROM workflow_steps s JOIN workflow_instances i ON i.id = s.instance_id \
         WHERE julianday(s.due_at) <= julianday(?) \
         ORDER BY julianday(s.due_at) ASC LIMIT ?",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut claimed = Vec::with_capacity(rows.len());
    for row in rows {
        let id: i64 = row.get("id");
        let token = Uuid::new_v4().to_string();
        let res = sqlx::query(
            "UPDATE workflow_steps SET due_at = ?, lease_token = ? \
             WHERE id = ? AND julianday(due_at) <= julianday(?)",
        )
        .bind(now + lease)
        .bind(&token)
        .bind(id)
        .bind(now)
        .execute(pool)
        .await?;
        if res.rows_affected() != 1 {
            continue;
        }
        match claimed_step(&row, token) {
            Ok(step) => claimed.push(step),
            Err(err) => {
                let instance_id: String = row.get("instance_id");
                error!(?err, step_id = id, %instance_id, "stored step cannot be decoded");
                let failure = Failure::new(FailureKind::Parse, format!("{err:#}"));
                abandon_step(pool, id, &instance_id, &failure, now).await?;
            }
        }
    }
    Ok(claimed)
}

fn claimed_step(row: &SqliteRow, lease_token: String) -> Result<ClaimedStep> {
    let id: i64 = row.get("id");
    let step: String = row.get("step");
    let input: Option<String> = row.get("input");
    let attempt: i64 = row.get("attempt");
    let input = input.ok_or_else(|| anyhow!("step {} belongs to an instance without input", id))?;
    Ok(ClaimedStep {
        id,
        instance_id: row.get("instance_id"),
        step: serde_json::from_str::<Step>(&step)
            .with_context(|| format!("step {} has invalid payload", id))?,
        attempt: u32::try_from(attempt).unwrap_or(u32::MAX),
        input: serde_json::from_str::<WorkflowInput>(&input)
            .with_context(|| format!("step {} has invalid instance input", id))?,
        lease_token,
    })
}

/// Drop a step that cannot run and fail its instance.
async fn abandon_step(
    pool: &Pool,
    step_id: i64,
    instance_id: &str,
    failure: &Failure,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM workflow_steps WHERE id = ?")
        .bind(step_id)
        .execute(&mut *tx)
        .await?;
    mark_terminal_tx(&mut tx, instance_id, WorkflowState::Failed, None, Some(failure), now).await?;
    tx.commit().await?;
    Ok(())
}

/// Replace the claimed step with `next`, due at `due_at`.
///
/// Returns `false`, writing nothing, when the lease was lost to another worker.
#[instrument(skip_all)]
pub async fn advance_step(
    pool: &Pool,
    claimed: &ClaimedStep,
    next: &Step,
    due_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let state = next.state();
    let mut tx = pool.begin().await?;
    let res = sqlx::query(
        "UPDATE workflow_steps SET step = ?, attempt = 0, due_at = ?, lease_token = NULL \
         WHERE id = ? AND lease_token = ?",
    )
    .bind(serde_json::to_string(next)?)
    .bind(due_at)
    .bind(claimed.id)
    .bind(&claimed.lease_token)
    .execute(&mut *tx)
    .await?;
    if res.rows_affected() != 1 {
        tx.rollback().await?;
        return Ok(false);
    }

    let resolved = match next {
        Step::Publish {
            resolved_identifier,
        } => Some(resolved_identifier.as_str()),
        _ => None,
    };
    sqlx::query(
        "UPDATE workflow_instances SET state = ?, resolved_identifier = COALESCE(?, resolved_identifier), updated_at = ? WHERE id = ?",
    )
    .bind(state.as_str())
    .bind(resolved)
    .bind(now)
    .bind(&claimed.instance_id)
    .execute(&mut *tx)
    .await?;

    // Poll re-entries are not history.
    if state != claimed.step.state() {
        record_transition_tx(&mut tx, &claimed.instance_id, state, resolved, now).await?;
    }
    tx.commit().await?;
    Ok(true)
}

/// Keep the claimed step, bump its attempt and delay it. `false` when the lease was lost.
#[instrument(skip_all)]
pub async fn retry_step(
    pool: &Pool,
    claimed: &ClaimedStep,
    due_at: DateTime<Utc>,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let res = sqlx::query(
        "UPDATE workflow_steps SET attempt = attempt + 1, due_at = ?, lease_token = NULL \
         WHERE id = ? AND lease_token = ?",
    )
    .bind(due_at)
    .bind(claimed.id)
    .bind(&claimed.lease_token)
    .execute(&mut *tx)
    .await?;
    if res.rows_affected() != 1 {
        tx.rollback().await?;
        return Ok(false);
    }
    sqlx::query("UPDATE workflow_instances SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(&claimed.instance_id)
        .execute(&mut *tx)
        .await?;
    let detail = format!("retry {}: {}", claimed.attempt.saturating_add(1), reason);
    record_transition_tx(
        &mut tx,
        &claimed.instance_id,
        claimed.step.state(),
        Some(&detail),
        now,
    )
    .await?;
    tx.commit().await?;
    Ok(true)
}

/// Move the instance to a terminal state and drop its step. `false` when the
/// lease was lost.
#[instrument(skip_all)]
pub async fn finish_instance(
    pool: &Pool,
    claimed: &ClaimedStep,
    state: WorkflowState,
    resolved_identifier: Option<&str>,
    failure: Option<&Failure>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let res = sqlx::query("DELETE FROM workflow_steps WHERE id = ? AND lease_token = ?")
        .bind(claimed.id)
        .bind(&claimed.lease_token)
        .execute(&mut *tx)
        .await?;
    if res.rows_affected() != 1 {
        tx.rollback().await?;
        return Ok(false);
    }
    mark_terminal_tx(
        &mut tx,
        &claimed.instance_id,
        state,
        resolved_identifier,
        failure,
        now,
    )
    .await?;
    tx.commit().await?;
    Ok(true)
}

async fn mark_terminal_tx(
    tx: &mut Transaction<'_, Sqlite>,
    instance_id: &str,
    state: WorkflowState,
    resolved_identifier: Option<&str>,
    failure: Option<&Failure>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE workflow_instances SET state = ?, resolved_identifier = COALESCE(?, resolved_identifier), \
         failure_kind = ?, failure_detail = ?, updated_at = ? WHERE id = ?",
    )
    .bind(state.as_str())
    .bind(resolved_identifier)
    .bind(failure.map(|f| f.kind.as_str()))
    .bind(failure.map(|f| f.detail.as_str()))
    .bind(now)
    .bind(instance_id)
    .execute(&mut **tx)
    .await?;
    let detail = failure.map(|f| f.to_string());
    record_transition_tx(
        tx,
        instance_id,
        state,
        detail.as_deref().or(resolved_identifier),
        now,
    )
    .await
}

async fn record_transition_tx(
    tx: &mut Transaction<'_, Sqlite>,
    instance_id: &str,
    state: WorkflowState,
    detail: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO workflow_transitions (instance_id, state, detail, recorded_at) VALUES (?, ?, ?, ?)",
    )
    .bind(instance_id)
    .bind(state.as_str())
    .bind(detail)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

const INSTANCE_COLUMNS: &str = "id, workflow_name, message_id, target_name, state, input, resolved_identifier, \
     failure_kind, failure_detail, created_at, updated_at";

#[instrument(skip_all)]
pub async fn fetch_instance(pool: &Pool, id: &str) -> Result<Option<InstanceRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(instance_record).transpose()
}

#[instrument(skip_all)]
pub async fn list_instances_for_target(pool: &Pool, target_name: &str) -> Result<Vec<InstanceRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE target_name = ? ORDER BY created_at ASC"
    ))
    .bind(target_name)
    .fetch_all(pool)
    .await?;
    rows.iter().map(instance_record).collect()
}

fn instance_record(row: &SqliteRow) -> Result<InstanceRecord> {
    let id: String = row.get("id");
    let state_str: String = row.get("state");
    let state = WorkflowState::parse_state(&state_str)
        .ok_or_else(|| anyhow!("instance {} has unknown state {}", id, state_str))?;
    let input = row
        .get::<Option<String>, _>("input")
        .map(|s| serde_json::from_str::<WorkflowInput>(&s))
        .transpose()
        .with_context(|| format!("instance {} has invalid input", id))?;
    let failure = match row.get::<Option<String>, _>("failure_kind") {
        Some(kind) => Some(Failure::new(
            FailureKind::parse_kind(&kind)
                .ok_or_else(|| anyhow!("instance {} has unknown failure kind {}", id, kind))?,
            row.get::<Option<String>, _>("failure_detail").unwrap_or_default(),
        )),
        None => None,
    };

    Ok(InstanceRecord {
        workflow_name: row.get("workflow_name"),
        message_id: row.get("message_id"),
        target_name: row.get("target_name"),
        state,
        input,
        resolved_identifier: row.get("resolved_identifier"),
        failure,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        id,
    })
}

#[instrument(skip_all)]
pub async fn list_transitions(pool: &Pool, instance_id: &str) -> Result<Vec<TransitionRecord>> {
    let rows = sqlx::query(
        "SELECT state, detail, recorded_at FROM workflow_transitions WHERE instance_id = ? ORDER BY id ASC",
    )
    .bind(instance_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            let state_str: String = row.get("state");
            Ok(TransitionRecord {
                state: WorkflowState::parse_state(&state_str)
                    .ok_or_else(|| anyhow!("unknown transition state {}", state_str))?,
                detail: row.get("detail"),
                recorded_at: row.get("recorded_at"),
            })
        })
        .collect()
}

/// Instances that still have a step to run.
#[instrument(skip_all)]
pub async fn count_live_instances(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workflow_steps")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
